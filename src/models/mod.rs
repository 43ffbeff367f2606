pub mod enums;
pub mod structs;
pub mod entities;

pub use enums::*;
pub use structs::*;
