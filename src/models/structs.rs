use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{CommandKind, CommandStatus, DataType, ExecutionStatus, ModbusType, StepKind, ValveState};

pub fn default_id() -> Uuid {
    Uuid::new_v4()
}

/// An addressable process parameter, loaded from `component_parameters`
/// joined with `component_parameter_definitions`.
///
/// Invariant: `data_type == Binary` iff `modbus_type == Coil`; every other
/// data type lives in holding registers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub id: Uuid,
    pub name: String,
    pub component: String,
    pub unit: Option<String>,
    pub description: Option<String>,
    pub modbus_read_addr: Option<u16>,
    pub modbus_write_addr: Option<u16>,
    pub modbus_type: ModbusType,
    pub data_type: DataType,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub current_value: Option<f64>,
    pub set_value: Option<f64>,
    pub is_writable: bool,
    pub is_critical: bool,
    /// Explicit valve number, preferred over the `/valve\s*(\d+)/i` name
    /// match when present (Design Note 9).
    pub valve_number: Option<u32>,
    /// Marks the parameter as the purge actuator the Valve & Purge
    /// Controller activates for `execute_purge` — "the designated purge
    /// actuator (coil or register flagged in the registry)" per §4.D, but
    /// no such flag is named in the documented schema, so it is added here.
    pub is_purge_actuator: bool,
}

impl Parameter {
    pub fn is_readable(&self) -> bool {
        self.modbus_read_addr.is_some()
    }

    pub fn is_write_capable(&self) -> bool {
        self.is_writable && self.modbus_write_addr.is_some()
    }

    pub fn in_range(&self, value: f64) -> bool {
        let above_min = self.min.map(|m| value >= m).unwrap_or(true);
        let below_max = self.max.map(|m| value <= m).unwrap_or(true);
        above_min && below_max
    }
}

/// Derived view of a parameter whose name matches `/valve\s*(\d+)/i` and
/// whose `data_type` is `Binary`, or which carries an explicit
/// `valve_number` (preferred over the regex match when present).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Valve {
    pub number: u32,
    pub parameter_id: Uuid,
    pub coil_addr: u16,
}

/// A row in `parameter_control_commands`.
///
/// Lifecycle: created externally as `Pending`; the dispatcher transitions
/// `Pending -> Processing -> {Completed, Failed}` exactly once. A terminal
/// status is never rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: Uuid,
    pub machine_id: Uuid,
    pub kind: CommandKind,
    pub payload: serde_json::Value,
    pub status: CommandStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

/// Parsed `set_parameter` payload fields, in resolution-priority order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetParameterPayload {
    pub write_modbus_address: Option<u16>,
    pub component_parameter_id: Option<Uuid>,
    pub parameter_name: Option<String>,
    pub target_value: f64,
    pub data_type: Option<DataType>,
}

/// A recipe: an ordered step tree plus a flat map of named parameters used
/// by `parameter` steps that reference a recipe-local value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub id: Uuid,
    pub name: String,
    pub steps: Vec<Step>,
    pub parameters: std::collections::HashMap<String, f64>,
}

/// One indivisible recipe step. `seq` values within a sibling list form
/// `1..N` with no gaps or duplicates; a loop's body has its own `1..M`
/// numbering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub seq: u32,
    pub name: String,
    pub kind: StepKind,
    pub config: StepConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepConfig {
    Valve { valve_number: u32, duration_ms: u64, state: ValveState },
    Purge { duration_ms: u64, gas_type: Option<String>, flow_rate: Option<f64> },
    Parameter { parameter_id: Uuid, value: f64 },
    Loop { iteration_count: u32, body: Vec<Step> },
}

/// Counts the number of "overall steps" a step tree flattens to: a loop of
/// `N` iterations over `M` body steps contributes `N*M`; nested loops
/// multiply accordingly; an `iteration_count` of zero contributes zero.
pub fn count_overall_steps(steps: &[Step]) -> u32 {
    steps.iter().map(count_overall_steps_one).sum()
}

fn count_overall_steps_one(step: &Step) -> u32 {
    match &step.config {
        StepConfig::Loop { iteration_count, body } => {
            iteration_count * count_overall_steps(body)
        }
        _ => 1,
    }
}

/// A started recipe run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessExecution {
    pub id: Uuid,
    pub recipe_id: Uuid,
    pub machine_id: Uuid,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub operator_id: Option<Uuid>,
}

/// 1:1 progress row for a `ProcessExecution`, updated on every step
/// boundary. Invariant: `current_overall_step <= total_overall_steps`;
/// `status == Completed` implies they are equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessExecutionState {
    pub execution_id: Uuid,
    pub current_step_id: Option<String>,
    pub current_overall_step: u32,
    pub total_overall_steps: u32,
    pub progress_percentage: u8,
    pub loop_iteration: Option<u32>,
    pub step_start_time: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
}

impl ProcessExecutionState {
    pub fn new(execution_id: Uuid, total_overall_steps: u32) -> Self {
        Self {
            execution_id,
            current_step_id: None,
            current_overall_step: 0,
            total_overall_steps,
            progress_percentage: 0,
            loop_iteration: None,
            step_start_time: None,
            last_updated: Utc::now(),
        }
    }

    pub fn recompute_progress(&mut self) {
        self.progress_percentage = if self.total_overall_steps == 0 {
            100
        } else {
            ((self.current_overall_step as u64 * 100) / self.total_overall_steps as u64) as u8
        };
        self.last_updated = Utc::now();
    }
}
