pub mod command_dispatcher;

pub use command_dispatcher::CommandDispatcher;
