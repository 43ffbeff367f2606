pub mod mock_adapter;
pub mod seaorm_adapter;

pub use mock_adapter::MockPersistenceAdapter;
pub use seaorm_adapter::SeaOrmPersistenceAdapter;
