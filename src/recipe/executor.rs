//! Recipe Executor (§4.G): walks a recipe's step tree depth-first,
//! dispatching each step to the valve/purge controller or the parameter
//! registry, with step-boundary progress persistence and best-effort
//! cancellation.

use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

use crate::domain::services::PersistenceAdapter;
use crate::models::enums::{ExecutionStatus, ValveState};
use crate::models::structs::{count_overall_steps, ProcessExecution, ProcessExecutionState, Recipe, Step, StepConfig};
use crate::registry::{ParameterRegistry, ResolvedTarget, ValveController};
use crate::utils::error::{AppError, AppResult};
use crate::utils::time_utils::cancellable_sleep;

struct ActiveExecution {
    execution_id: Uuid,
    cancel_tx: watch::Sender<bool>,
}

enum WalkOutcome {
    Completed,
    Cancelled,
}

pub struct RecipeExecutor {
    machine_id: Uuid,
    persistence: Arc<dyn PersistenceAdapter>,
    registry: Arc<ParameterRegistry>,
    valves: Arc<ValveController>,
    active: Mutex<Option<ActiveExecution>>,
}

impl RecipeExecutor {
    pub fn new(
        machine_id: Uuid,
        persistence: Arc<dyn PersistenceAdapter>,
        registry: Arc<ParameterRegistry>,
        valves: Arc<ValveController>,
    ) -> Self {
        Self { machine_id, persistence, registry, valves, active: Mutex::new(None) }
    }

    pub async fn is_running(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Refuses if an execution is already active for this process or, per
    /// the cross-restart invariant, already active in the database.
    pub async fn start(self: &Arc<Self>, recipe_id: Uuid, operator_id: Option<Uuid>) -> AppResult<Uuid> {
        if self.active.lock().await.is_some() {
            return Err(AppError::conflict("a recipe execution is already active"));
        }
        if self.persistence.has_active_execution(self.machine_id).await? {
            return Err(AppError::conflict("a recipe execution is already active for this machine"));
        }

        let recipe = self.persistence.load_recipe(recipe_id).await?;
        let total_overall_steps = count_overall_steps(&recipe.steps);
        let execution = ProcessExecution {
            id: Uuid::new_v4(),
            recipe_id,
            machine_id: self.machine_id,
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            operator_id,
        };
        let state = ProcessExecutionState::new(execution.id, total_overall_steps);
        self.persistence.create_execution(&execution, &state).await?;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        *self.active.lock().await = Some(ActiveExecution { execution_id: execution.id, cancel_tx });

        let this = self.clone();
        let execution_id = execution.id;
        tokio::spawn(async move {
            this.run(execution_id, recipe, state, cancel_rx).await;
        });
        Ok(execution_id)
    }

    /// Interrupts the current step's sleep; the run loop performs the
    /// best-effort valve close and terminal status write-back.
    pub async fn stop(&self) -> AppResult<()> {
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(a) => {
                let _ = a.cancel_tx.send(true);
                Ok(())
            }
            None => Err(AppError::validation("no active recipe execution to stop")),
        }
    }

    async fn run(
        self: Arc<Self>,
        execution_id: Uuid,
        recipe: Recipe,
        mut state: ProcessExecutionState,
        mut cancel_rx: watch::Receiver<bool>,
    ) {
        let mut opened_valves: Vec<u32> = Vec::new();
        let outcome = self.walk_steps(&recipe.steps, &mut state, &mut cancel_rx, &mut opened_valves).await;

        match outcome {
            Ok(WalkOutcome::Completed) => {
                state.current_overall_step = state.total_overall_steps;
                state.recompute_progress();
                if let Err(e) = self.persistence.update_execution_state(&state).await {
                    log::warn!("execution {execution_id} final state write-back failed: {e}");
                }
                if let Err(e) = self.persistence.finish_execution(execution_id, ExecutionStatus::Completed, Utc::now()).await {
                    log::error!("execution {execution_id} completion write-back failed: {e}");
                }
            }
            Ok(WalkOutcome::Cancelled) => {
                self.close_opened_valves(&opened_valves).await;
                if let Err(e) = self.persistence.finish_execution(execution_id, ExecutionStatus::Cancelled, Utc::now()).await {
                    log::error!("execution {execution_id} cancellation write-back failed: {e}");
                }
            }
            Err(e) => {
                log::error!("execution {execution_id} aborted: {e}");
                self.close_opened_valves(&opened_valves).await;
                if let Err(e) = self.persistence.finish_execution(execution_id, ExecutionStatus::Failed, Utc::now()).await {
                    log::error!("execution {execution_id} failure write-back failed: {e}");
                }
            }
        }

        *self.active.lock().await = None;
    }

    async fn close_opened_valves(&self, opened: &[u32]) {
        for &number in opened {
            if let Err(e) = self.valves.control_valve(number, false, None).await {
                log::warn!("best-effort close of valve {number} on cancellation failed: {e}");
            }
        }
    }

    fn walk_steps<'a>(
        &'a self,
        steps: &'a [Step],
        state: &'a mut ProcessExecutionState,
        cancel_rx: &'a mut watch::Receiver<bool>,
        opened_valves: &'a mut Vec<u32>,
    ) -> BoxFuture<'a, AppResult<WalkOutcome>> {
        async move {
            for step in steps {
                if *cancel_rx.borrow() {
                    return Ok(WalkOutcome::Cancelled);
                }

                match &step.config {
                    StepConfig::Loop { iteration_count, body } => {
                        for iteration in 1..=*iteration_count {
                            if *cancel_rx.borrow() {
                                return Ok(WalkOutcome::Cancelled);
                            }
                            state.loop_iteration = Some(iteration);
                            match self.walk_steps(body, state, cancel_rx, opened_valves).await? {
                                WalkOutcome::Cancelled => return Ok(WalkOutcome::Cancelled),
                                WalkOutcome::Completed => {}
                            }
                        }
                        state.loop_iteration = None;
                    }
                    _ => {
                        state.current_step_id = Some(step.name.clone());
                        state.current_overall_step += 1;
                        state.step_start_time = Some(Utc::now());
                        state.recompute_progress();
                        self.persistence.update_execution_state(state).await?;

                        if !self.execute_step(step, cancel_rx, opened_valves).await? {
                            return Ok(WalkOutcome::Cancelled);
                        }
                    }
                }
            }
            Ok(WalkOutcome::Completed)
        }
        .boxed()
    }

    /// Dispatches one non-loop step. Returns `false` if cancellation
    /// interrupted the step's sleep.
    async fn execute_step(
        &self,
        step: &Step,
        cancel_rx: &mut watch::Receiver<bool>,
        opened_valves: &mut Vec<u32>,
    ) -> AppResult<bool> {
        match &step.config {
            StepConfig::Valve { valve_number, duration_ms, state } => {
                let turning_on = *state == ValveState::On;
                self.valves
                    .control_valve(*valve_number, turning_on, Some(*duration_ms))
                    .await?;
                if turning_on {
                    opened_valves.push(*valve_number);
                }
                let completed =
                    cancellable_sleep(std::time::Duration::from_millis(*duration_ms), cancel_rx).await;
                if completed && turning_on {
                    opened_valves.retain(|v| v != valve_number);
                }
                Ok(completed)
            }
            StepConfig::Purge { duration_ms, .. } => {
                self.valves.execute_purge(*duration_ms).await?;
                Ok(cancellable_sleep(std::time::Duration::from_millis(*duration_ms), cancel_rx).await)
            }
            StepConfig::Parameter { parameter_id, value } => {
                let parameter = self.registry.get(*parameter_id).await?;
                self.registry.write(&ResolvedTarget::Parameter(parameter), *value).await?;
                Ok(true)
            }
            StepConfig::Loop { .. } => unreachable!("loop steps are handled by walk_steps"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::MockPersistenceAdapter;
    use crate::infrastructure::plc::MockPlcTransport;
    use crate::domain::services::plc_transport::PlcTransport;
    use crate::models::enums::{ByteOrder, DataType, ModbusType};
    use crate::models::structs::Parameter;
    use std::time::Duration;

    fn valve_step(seq: u32, valve_number: u32, duration_ms: u64, state: ValveState) -> Step {
        Step {
            seq,
            name: format!("valve-{seq}"),
            kind: crate::models::enums::StepKind::Valve,
            config: StepConfig::Valve { valve_number, duration_ms, state },
        }
    }

    fn parameter_step(seq: u32, parameter_id: Uuid, value: f64) -> Step {
        Step {
            seq,
            name: format!("parameter-{seq}"),
            kind: crate::models::enums::StepKind::Parameter,
            config: StepConfig::Parameter { parameter_id, value },
        }
    }

    fn valve_parameter(number: u32, coil_addr: u16) -> Parameter {
        Parameter {
            id: Uuid::new_v4(),
            name: format!("Valve {number}"),
            component: "gas-panel".to_string(),
            unit: None,
            description: None,
            modbus_read_addr: Some(coil_addr),
            modbus_write_addr: Some(coil_addr),
            modbus_type: ModbusType::Coil,
            data_type: DataType::Binary,
            min: None,
            max: None,
            current_value: None,
            set_value: None,
            is_writable: true,
            is_critical: false,
            valve_number: Some(number),
            is_purge_actuator: false,
        }
    }

    async fn build() -> (Arc<RecipeExecutor>, Arc<MockPersistenceAdapter>, Arc<MockPlcTransport>, Uuid) {
        let persistence = Arc::new(MockPersistenceAdapter::new());
        let valve = valve_parameter(1, 20);
        persistence.seed_parameter(valve).await;
        let transport = Arc::new(MockPlcTransport::new());
        let machine_id = Uuid::new_v4();
        let registry = Arc::new(
            ParameterRegistry::load(persistence.as_ref(), machine_id, transport.clone(), ByteOrder::Badc)
                .await
                .unwrap(),
        );
        let valves = Arc::new(ValveController::new(registry.clone(), transport.clone()));
        let executor = Arc::new(RecipeExecutor::new(machine_id, persistence.clone(), registry, valves));

        let recipe_id = Uuid::new_v4();
        let recipe = Recipe {
            id: recipe_id,
            name: "short purge cycle".to_string(),
            steps: vec![valve_step(1, 1, 20, ValveState::On)],
            parameters: Default::default(),
        };
        persistence.seed_recipe(recipe).await;
        (executor, persistence, transport, recipe_id)
    }

    #[tokio::test]
    async fn start_runs_to_completion_and_records_progress() {
        let (executor, persistence, transport, recipe_id) = build().await;
        let execution_id = executor.start(recipe_id, None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;

        let execution = persistence.get_execution(execution_id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        let state = persistence.get_state(execution_id).await.unwrap();
        assert_eq!(state.progress_percentage, 100);
        assert_eq!(transport.read_coils(20, 1).await.unwrap(), vec![false]);
    }

    #[tokio::test]
    async fn start_refuses_a_second_concurrent_execution() {
        let (executor, _persistence, _transport, recipe_id) = build().await;
        executor.start(recipe_id, None).await.unwrap();
        let err = executor.start(recipe_id, None).await.unwrap_err();
        assert_eq!(err.code(), "conflict");
    }

    #[tokio::test]
    async fn stop_cancels_the_running_step_and_closes_the_valve() {
        let persistence = Arc::new(MockPersistenceAdapter::new());
        let valve = valve_parameter(1, 20);
        persistence.seed_parameter(valve).await;
        let transport = Arc::new(MockPlcTransport::new());
        let machine_id = Uuid::new_v4();
        let registry = Arc::new(
            ParameterRegistry::load(persistence.as_ref(), machine_id, transport.clone(), ByteOrder::Badc)
                .await
                .unwrap(),
        );
        let valves = Arc::new(ValveController::new(registry.clone(), transport.clone()));
        let executor = Arc::new(RecipeExecutor::new(machine_id, persistence.clone(), registry, valves));
        let recipe_id = Uuid::new_v4();
        persistence
            .seed_recipe(Recipe {
                id: recipe_id,
                name: "long hold".to_string(),
                steps: vec![valve_step(1, 1, 5_000, ValveState::On)],
                parameters: Default::default(),
            })
            .await;

        let execution_id = executor.start(recipe_id, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        executor.stop().await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let execution = persistence.get_execution(execution_id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Cancelled);
        assert_eq!(transport.read_coils(20, 1).await.unwrap(), vec![false]);
    }

    #[test]
    fn parameter_step_round_trips_through_structs() {
        let id = Uuid::new_v4();
        let step = parameter_step(1, id, 42.0);
        assert!(matches!(step.config, StepConfig::Parameter { value, .. } if value == 42.0));
    }
}
