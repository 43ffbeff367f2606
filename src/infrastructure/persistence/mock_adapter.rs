//! In-memory `PersistenceAdapter` double, guarded by `tokio::sync::Mutex`
//! maps, used the same way the source lineage hand-writes mock services
//! behind a trait rather than reaching for `mockall`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::domain::services::PersistenceAdapter;
use crate::models::enums::ExecutionStatus;
use crate::models::structs::{Command, Parameter, ProcessExecution, ProcessExecutionState, Recipe};
use crate::utils::error::{AppError, AppResult};

#[derive(Default)]
pub struct MockPersistenceAdapter {
    parameters: Mutex<HashMap<Uuid, Parameter>>,
    commands: Mutex<HashMap<Uuid, Command>>,
    recipes: Mutex<HashMap<Uuid, Recipe>>,
    executions: Mutex<HashMap<Uuid, ProcessExecution>>,
    states: Mutex<HashMap<Uuid, ProcessExecutionState>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<()>>>,
}

impl MockPersistenceAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_parameter(&self, parameter: Parameter) {
        self.parameters.lock().await.insert(parameter.id, parameter);
    }

    pub async fn seed_command(&self, command: Command) {
        self.commands.lock().await.insert(command.id, command);
    }

    pub async fn seed_recipe(&self, recipe: Recipe) {
        self.recipes.lock().await.insert(recipe.id, recipe);
    }

    pub async fn get_parameter(&self, id: Uuid) -> Option<Parameter> {
        self.parameters.lock().await.get(&id).cloned()
    }

    pub async fn get_command(&self, id: Uuid) -> Option<Command> {
        self.commands.lock().await.get(&id).cloned()
    }

    pub async fn get_state(&self, execution_id: Uuid) -> Option<ProcessExecutionState> {
        self.states.lock().await.get(&execution_id).cloned()
    }

    pub async fn get_execution(&self, execution_id: Uuid) -> Option<ProcessExecution> {
        self.executions.lock().await.get(&execution_id).cloned()
    }

    /// Test helper: wakes every active `subscribe_commands` receiver, as a
    /// real trigger-backed `NOTIFY` would.
    pub async fn notify_commands(&self) {
        self.subscribers.lock().await.retain(|tx| tx.send(()).is_ok());
    }
}

#[async_trait]
impl PersistenceAdapter for MockPersistenceAdapter {
    async fn load_parameters(&self, _machine_id: Uuid) -> AppResult<Vec<Parameter>> {
        Ok(self.parameters.lock().await.values().cloned().collect())
    }

    async fn batch_update_current_values(&self, updates: &[(Uuid, f64)]) -> AppResult<()> {
        let mut parameters = self.parameters.lock().await;
        for (id, value) in updates {
            if let Some(p) = parameters.get_mut(id) {
                p.current_value = Some(*value);
            }
        }
        Ok(())
    }

    async fn update_set_value(&self, parameter_id: Uuid, value: f64) -> AppResult<()> {
        let mut parameters = self.parameters.lock().await;
        let p = parameters
            .get_mut(&parameter_id)
            .ok_or_else(|| AppError::not_found("parameter", parameter_id.to_string()))?;
        p.set_value = Some(value);
        Ok(())
    }

    async fn poll_pending_commands(&self, machine_id: Uuid) -> AppResult<Vec<Command>> {
        let mut pending: Vec<Command> = self
            .commands
            .lock()
            .await
            .values()
            .filter(|c| c.machine_id == machine_id && c.status == crate::models::enums::CommandStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|c| c.created_at);
        Ok(pending)
    }

    async fn try_claim_command(&self, command_id: Uuid) -> AppResult<bool> {
        let mut commands = self.commands.lock().await;
        let command = commands
            .get_mut(&command_id)
            .ok_or_else(|| AppError::not_found("command", command_id.to_string()))?;
        if command.status == crate::models::enums::CommandStatus::Pending {
            command.status = crate::models::enums::CommandStatus::Processing;
            command.updated_at = Utc::now();
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn complete_command(&self, command_id: Uuid) -> AppResult<()> {
        let mut commands = self.commands.lock().await;
        let command = commands
            .get_mut(&command_id)
            .ok_or_else(|| AppError::not_found("command", command_id.to_string()))?;
        command.status = crate::models::enums::CommandStatus::Completed;
        command.updated_at = Utc::now();
        Ok(())
    }

    async fn fail_command(&self, command_id: Uuid, error: &str) -> AppResult<()> {
        let mut commands = self.commands.lock().await;
        let command = commands
            .get_mut(&command_id)
            .ok_or_else(|| AppError::not_found("command", command_id.to_string()))?;
        command.status = crate::models::enums::CommandStatus::Failed;
        command.error = Some(error.to_string());
        command.updated_at = Utc::now();
        Ok(())
    }

    async fn subscribe_commands(&self, _machine_id: Uuid) -> AppResult<mpsc::UnboundedReceiver<()>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().await.push(tx);
        Ok(rx)
    }

    async fn load_recipe(&self, recipe_id: Uuid) -> AppResult<Recipe> {
        self.recipes
            .lock()
            .await
            .get(&recipe_id)
            .cloned()
            .ok_or_else(|| AppError::not_found("recipe", recipe_id.to_string()))
    }

    async fn create_execution(
        &self,
        execution: &ProcessExecution,
        state: &ProcessExecutionState,
    ) -> AppResult<()> {
        self.executions.lock().await.insert(execution.id, execution.clone());
        self.states.lock().await.insert(state.execution_id, state.clone());
        Ok(())
    }

    async fn update_execution_state(&self, state: &ProcessExecutionState) -> AppResult<()> {
        self.states.lock().await.insert(state.execution_id, state.clone());
        Ok(())
    }

    async fn finish_execution(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        completed_at: chrono::DateTime<Utc>,
    ) -> AppResult<()> {
        let mut executions = self.executions.lock().await;
        let execution = executions
            .get_mut(&execution_id)
            .ok_or_else(|| AppError::not_found("execution", execution_id.to_string()))?;
        execution.status = status;
        execution.completed_at = Some(completed_at);
        Ok(())
    }

    async fn has_active_execution(&self, machine_id: Uuid) -> AppResult<bool> {
        Ok(self.executions.lock().await.values().any(|e| {
            e.machine_id == machine_id
                && matches!(e.status, ExecutionStatus::Preparing | ExecutionStatus::Running)
        }))
    }
}
