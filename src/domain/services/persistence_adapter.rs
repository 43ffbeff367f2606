use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::enums::ExecutionStatus;
use crate::models::structs::{Command, Parameter, ProcessExecution, ProcessExecutionState, Recipe};
use crate::utils::error::AppResult;

/// Thin typed wrapper over the tables named in the specification's external
/// interfaces section. All operations are idempotent at the row level
/// (upsert-by-id); reads see a consistent snapshot per call; writes are
/// durable on return.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    /// Loads every `component_parameters` row for `machine_id`, joined
    /// with `component_parameter_definitions` for name/unit/description.
    async fn load_parameters(&self, machine_id: Uuid) -> AppResult<Vec<Parameter>>;

    /// Single batched update of `current_value`/`updated_at` keyed by id,
    /// as required by the sync loop's per-tick write-back.
    async fn batch_update_current_values(&self, updates: &[(Uuid, f64)]) -> AppResult<()>;

    /// Used only by the external-PLC-edit reconciliation branch: the PLC
    /// is authoritative, so the database `set_value` is overwritten.
    async fn update_set_value(&self, parameter_id: Uuid, value: f64) -> AppResult<()>;

    /// Commands with `status = pending` and `machine_id = self`, ordered by
    /// `created_at` ascending — the polling half of the dispatcher intake.
    async fn poll_pending_commands(&self, machine_id: Uuid) -> AppResult<Vec<Command>>;

    /// Conditional transition `pending -> processing`. Returns `false`
    /// (not an error) if another worker already claimed the row, so the
    /// two intake paths (poll, subscription) can safely race.
    async fn try_claim_command(&self, command_id: Uuid) -> AppResult<bool>;

    async fn complete_command(&self, command_id: Uuid) -> AppResult<()>;

    async fn fail_command(&self, command_id: Uuid, error: &str) -> AppResult<()>;

    /// Push half of the dispatcher's dual intake: a channel that receives a
    /// wake signal whenever a `parameter_control_commands` row changes for
    /// `machine_id`. At-least-once and uncounted — a signal may arrive with
    /// nothing new to claim, or several changes may coalesce into one
    /// signal — callers must always re-poll rather than trust the signal
    /// count.
    async fn subscribe_commands(&self, machine_id: Uuid) -> AppResult<mpsc::UnboundedReceiver<()>>;

    /// Loads a recipe with every step, step config, and recipe-scoped
    /// parameter in one call.
    async fn load_recipe(&self, recipe_id: Uuid) -> AppResult<Recipe>;

    /// Creates the `ProcessExecution` row and its paired
    /// `ProcessExecutionState` row together.
    async fn create_execution(
        &self,
        execution: &ProcessExecution,
        state: &ProcessExecutionState,
    ) -> AppResult<()>;

    async fn update_execution_state(&self, state: &ProcessExecutionState) -> AppResult<()>;

    async fn finish_execution(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        completed_at: chrono::DateTime<chrono::Utc>,
    ) -> AppResult<()>;

    /// True when a `ProcessExecution` for this machine is still
    /// `Preparing`/`Running` — backs the "only one concurrent execution"
    /// invariant across process restarts.
    async fn has_active_execution(&self, machine_id: Uuid) -> AppResult<bool>;
}
