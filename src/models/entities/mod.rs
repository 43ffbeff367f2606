//! SeaORM entity definitions, one module per table named in the
//! specification's external-interfaces section. These are intentionally a
//! 1:1 mapping of the documented schema fragments — no extra columns, no
//! extra tables.

pub mod component_parameters;
pub mod component_parameter_definitions;
pub mod parameter_control_commands;
pub mod recipes;
pub mod recipe_steps;
pub mod valve_step_config;
pub mod purge_step_config;
pub mod loop_step_config;
pub mod parameter_step_config;
pub mod recipe_parameters;
pub mod process_executions;
pub mod process_execution_state;
