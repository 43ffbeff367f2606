use serde::{Deserialize, Serialize};

/// Modbus word/byte order for 32-bit register pairs.
///
/// `Abcd` is straight big-endian; the other three orders swap words and/or
/// bytes within the pair. This is a process-wide setting chosen once at
/// startup — individual reads and writes never override it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ByteOrder {
    Abcd,
    Badc,
    Cdab,
    Dcba,
}

impl Default for ByteOrder {
    fn default() -> Self {
        ByteOrder::Badc
    }
}

impl ByteOrder {
    /// Parses a configured byte order string, falling back to `Badc` with
    /// `Err` carrying the offending input so the caller can log the
    /// once-only startup warning required by the specification.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s.to_ascii_uppercase().as_str() {
            "ABCD" => Ok(ByteOrder::Abcd),
            "BADC" => Ok(ByteOrder::Badc),
            "CDAB" => Ok(ByteOrder::Cdab),
            "DCBA" => Ok(ByteOrder::Dcba),
            other => Err(other.to_string()),
        }
    }
}

/// Underlying Modbus object class a parameter is backed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModbusType {
    Holding,
    Coil,
}

/// Engineering data type carried by a parameter's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Float32,
    Int32,
    Int16,
    Binary,
}

impl DataType {
    /// Number of 16-bit registers a holding-register-backed value of this
    /// type occupies. Not meaningful for `Binary` (coil-backed).
    pub fn register_width(self) -> u16 {
        match self {
            DataType::Float32 | DataType::Int32 => 2,
            DataType::Int16 => 1,
            DataType::Binary => 0,
        }
    }
}

/// Lifecycle state of a `parameter_control_commands` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl CommandStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, CommandStatus::Completed | CommandStatus::Failed)
    }
}

/// The kind of action a command instructs the agent to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    SetParameter,
    OpenValve,
    CloseValve,
    PulseValve,
    Purge,
    StartRecipe,
    StopRecipe,
}

/// Status of a running or finished `ProcessExecution`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Preparing,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Discriminant for a recipe `Step`'s `config` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Valve,
    Purge,
    Parameter,
    Loop,
}

/// Commanded state for a `valve` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValveState {
    On,
    Off,
}
