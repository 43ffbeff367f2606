pub mod dispatcher;
pub mod domain;
pub mod infrastructure;
pub mod logging;
pub mod models;
pub mod recipe;
pub mod registry;
pub mod sync;
pub mod utils;
