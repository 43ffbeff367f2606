pub mod parameter_registry;
pub mod valve_control;

pub use parameter_registry::{ParameterRegistry, ResolvedTarget};
pub use valve_control::ValveController;
