//! Command Dispatcher (§4.F): merges a periodic poll and a push
//! subscription into one deduplicated, serially-drained command queue,
//! resolving each command's target and routing it to the registry, the
//! valve controller, or the recipe executor.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

use crate::domain::services::PersistenceAdapter;
use crate::models::enums::CommandKind;
use crate::models::structs::{Command, SetParameterPayload};
use crate::recipe::RecipeExecutor;
use crate::registry::{ParameterRegistry, ValveController};
use crate::utils::error::AppResult;

#[derive(Debug, Deserialize)]
struct ValvePayload {
    valve_number: u32,
    #[serde(default)]
    duration_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct PurgePayload {
    duration_ms: u64,
}

#[derive(Debug, Deserialize)]
struct StartRecipePayload {
    recipe_id: Uuid,
    #[serde(default)]
    operator_id: Option<Uuid>,
}

pub struct CommandDispatcher {
    machine_id: Uuid,
    persistence: Arc<dyn PersistenceAdapter>,
    registry: Arc<ParameterRegistry>,
    valves: Arc<ValveController>,
    recipes: Arc<RecipeExecutor>,
    poll_period: Duration,
    /// In-process dedup across the poll and push intake paths: an id stays
    /// here until its command reaches a terminal status, so a notification
    /// racing a poll cannot enqueue the same command twice.
    seen: Mutex<HashSet<Uuid>>,
    queue: Mutex<VecDeque<Command>>,
}

impl CommandDispatcher {
    pub fn new(
        machine_id: Uuid,
        persistence: Arc<dyn PersistenceAdapter>,
        registry: Arc<ParameterRegistry>,
        valves: Arc<ValveController>,
        recipes: Arc<RecipeExecutor>,
        poll_period: Duration,
    ) -> Self {
        Self {
            machine_id,
            persistence,
            registry,
            valves,
            recipes,
            poll_period,
            seen: Mutex::new(HashSet::new()),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Runs the poll loop, the subscription listener, and the serial queue
    /// drain concurrently until `shutdown` fires.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut subscription = match self.persistence.subscribe_commands(self.machine_id).await {
            Ok(rx) => Some(rx),
            Err(e) => {
                log::error!("command subscription unavailable, falling back to polling only: {e}");
                None
            }
        };
        let mut ticker = tokio::time::interval(self.poll_period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        log::error!("command poll failed: {e}");
                    }
                }
                // Guarded so a missing or dead subscription disables this
                // branch instead of resolving immediately forever (which
                // would starve the other branches in a busy loop).
                signal = subscription.as_mut().unwrap().recv(), if subscription.is_some() => {
                    match signal {
                        Some(()) => {
                            if let Err(e) = self.poll_once().await {
                                log::error!("command poll (subscription-triggered) failed: {e}");
                            }
                        }
                        None => {
                            log::warn!("command subscription closed, falling back to polling only");
                            subscription = None;
                        }
                    }
                }
                drained = self.drain_one() => {
                    if let Some(command) = drained {
                        self.execute(command).await;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        log::info!("command dispatcher shutting down");
                        return;
                    }
                }
            }
        }
    }

    async fn poll_once(&self) -> AppResult<()> {
        let commands = self.persistence.poll_pending_commands(self.machine_id).await?;
        let mut seen = self.seen.lock().await;
        let mut queue = self.queue.lock().await;
        for command in commands {
            if seen.insert(command.id) {
                queue.push_back(command);
            }
        }
        Ok(())
    }

    /// Waits for a queued command to become available. Used inside
    /// `select!` so the drain competes fairly with polling and the
    /// subscription listener rather than starving them.
    async fn drain_one(&self) -> Option<Command> {
        loop {
            if let Some(command) = self.queue.lock().await.pop_front() {
                return Some(command);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    async fn execute(&self, command: Command) {
        match self.persistence.try_claim_command(command.id).await {
            Ok(true) => {}
            Ok(false) => {
                self.seen.lock().await.remove(&command.id);
                return;
            }
            Err(e) => {
                log::error!("[command={}] claim failed: {e}", command.id);
                self.seen.lock().await.remove(&command.id);
                return;
            }
        }

        let result = self.dispatch(&command).await;
        match result {
            Ok(()) => {
                if let Err(e) = self.persistence.complete_command(command.id).await {
                    log::error!("[command={}] completion write-back failed: {e}", command.id);
                }
            }
            Err(e) => {
                log::warn!("[command={}] failed: {e}", command.id);
                if let Err(write_err) = self.persistence.fail_command(command.id, &e.to_string()).await {
                    log::error!("[command={}] failure write-back failed: {write_err}", command.id);
                }
            }
        }
        self.seen.lock().await.remove(&command.id);
    }

    async fn dispatch(&self, command: &Command) -> AppResult<()> {
        match command.kind {
            CommandKind::SetParameter => {
                let payload: SetParameterPayload = serde_json::from_value(command.payload.clone())?;
                let target = self.registry.resolve_for_command(&payload).await?;
                self.registry.write(&target, payload.target_value).await
            }
            CommandKind::OpenValve => {
                let payload: ValvePayload = serde_json::from_value(command.payload.clone())?;
                self.valves.control_valve(payload.valve_number, true, payload.duration_ms).await
            }
            CommandKind::CloseValve => {
                let payload: ValvePayload = serde_json::from_value(command.payload.clone())?;
                self.valves.control_valve(payload.valve_number, false, None).await
            }
            CommandKind::PulseValve => {
                let payload: ValvePayload = serde_json::from_value(command.payload.clone())?;
                self.valves.control_valve(payload.valve_number, true, payload.duration_ms).await
            }
            CommandKind::Purge => {
                let payload: PurgePayload = serde_json::from_value(command.payload.clone())?;
                self.valves.execute_purge(payload.duration_ms).await
            }
            CommandKind::StartRecipe => {
                let payload: StartRecipePayload = serde_json::from_value(command.payload.clone())?;
                self.recipes.start(payload.recipe_id, payload.operator_id).await.map(|_| ())
            }
            CommandKind::StopRecipe => self.recipes.stop().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::MockPersistenceAdapter;
    use crate::infrastructure::plc::MockPlcTransport;
    use crate::domain::services::plc_transport::PlcTransport;
    use crate::models::enums::{ByteOrder, CommandStatus, DataType, ModbusType};
    use crate::models::structs::Parameter;
    use chrono::Utc;
    use serde_json::json;

    fn sample_parameter(write_addr: u16) -> Parameter {
        Parameter {
            id: Uuid::new_v4(),
            name: "setpoint".to_string(),
            component: "reactor".to_string(),
            unit: None,
            description: None,
            modbus_read_addr: Some(write_addr),
            modbus_write_addr: Some(write_addr),
            modbus_type: ModbusType::Holding,
            data_type: DataType::Float32,
            min: Some(0.0),
            max: Some(500.0),
            current_value: None,
            set_value: None,
            is_writable: true,
            is_critical: false,
            valve_number: None,
            is_purge_actuator: false,
        }
    }

    async fn build() -> (CommandDispatcher, Arc<MockPersistenceAdapter>, Arc<MockPlcTransport>, Uuid) {
        let persistence = Arc::new(MockPersistenceAdapter::new());
        let parameter = sample_parameter(42);
        let parameter_id = parameter.id;
        persistence.seed_parameter(parameter).await;
        let transport = Arc::new(MockPlcTransport::new());
        let machine_id = Uuid::new_v4();
        let registry = Arc::new(
            ParameterRegistry::load(persistence.as_ref(), machine_id, transport.clone(), ByteOrder::Badc)
                .await
                .unwrap(),
        );
        let valves = Arc::new(ValveController::new(registry.clone(), transport.clone()));
        let recipes = Arc::new(RecipeExecutor::new(machine_id, persistence.clone(), registry.clone(), valves.clone()));
        let dispatcher =
            CommandDispatcher::new(machine_id, persistence.clone(), registry, valves, recipes, Duration::from_millis(500));
        (dispatcher, persistence, transport, parameter_id)
    }

    fn pending_command(machine_id: Uuid, kind: CommandKind, payload: serde_json::Value) -> Command {
        Command {
            id: Uuid::new_v4(),
            machine_id,
            kind,
            payload,
            status: CommandStatus::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            error: None,
        }
    }

    #[tokio::test]
    async fn set_parameter_command_writes_and_completes() {
        let (dispatcher, persistence, transport, parameter_id) = build().await;
        let command = pending_command(
            dispatcher.machine_id,
            CommandKind::SetParameter,
            json!({"component_parameter_id": parameter_id, "target_value": 12.5}),
        );
        let id = command.id;
        persistence.seed_command(command).await;

        dispatcher.poll_once().await.unwrap();
        let queued = dispatcher.drain_one().await.unwrap();
        dispatcher.execute(queued).await;

        let value = transport.read_float32(42, ByteOrder::Badc).await.unwrap();
        assert_eq!(value, 12.5);
        let stored = persistence.get_command(id).await.unwrap();
        assert_eq!(stored.status, CommandStatus::Completed);
    }

    #[tokio::test]
    async fn missing_target_fails_the_command_with_a_message() {
        let (dispatcher, persistence, _transport, _parameter_id) = build().await;
        let command = pending_command(
            dispatcher.machine_id,
            CommandKind::SetParameter,
            json!({"target_value": 1.0}),
        );
        let id = command.id;
        persistence.seed_command(command).await;

        dispatcher.poll_once().await.unwrap();
        let queued = dispatcher.drain_one().await.unwrap();
        dispatcher.execute(queued).await;

        let stored = persistence.get_command(id).await.unwrap();
        assert_eq!(stored.status, CommandStatus::Failed);
        assert!(stored.error.is_some());
    }

    #[tokio::test]
    async fn duplicate_poll_does_not_enqueue_twice() {
        let (dispatcher, persistence, _transport, parameter_id) = build().await;
        let command = pending_command(
            dispatcher.machine_id,
            CommandKind::SetParameter,
            json!({"component_parameter_id": parameter_id, "target_value": 1.0}),
        );
        persistence.seed_command(command).await;

        dispatcher.poll_once().await.unwrap();
        dispatcher.poll_once().await.unwrap();
        assert_eq!(dispatcher.queue.lock().await.len(), 1);
    }
}
