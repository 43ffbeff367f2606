//! Valve & Purge Control (§4.D): maps logical valve numbers to coils,
//! schedules deferred auto-close, and serializes purge activation behind a
//! single in-flight flag.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::services::PlcTransport;
use crate::models::enums::DataType;
use crate::utils::error::{AppError, AppResult};
use crate::utils::time_utils::{spawn_after, DeferredHandle};

use super::parameter_registry::ParameterRegistry;

pub struct ValveController {
    registry: Arc<ParameterRegistry>,
    transport: Arc<dyn PlcTransport>,
    purge_in_flight: Arc<std::sync::atomic::AtomicBool>,
    /// Held so pending auto-close/purge-release tasks can be aborted on
    /// process shutdown; never read otherwise.
    pending: std::sync::Mutex<Vec<DeferredHandle>>,
}

impl ValveController {
    pub fn new(registry: Arc<ParameterRegistry>, transport: Arc<dyn PlcTransport>) -> Self {
        Self {
            registry,
            transport,
            purge_in_flight: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            pending: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Writes the valve's coil to `state`; if `state` is on and a duration
    /// is given, schedules a deferred close that is cancellable on process
    /// shutdown but otherwise fires-and-forgets (logged, not retried, on
    /// failure).
    pub async fn control_valve(&self, number: u32, state: bool, duration_ms: Option<u64>) -> AppResult<()> {
        let valve = self.registry.valve_by_number(number).await?;
        self.transport.write_coil(valve.coil_addr, state).await?;

        if state {
            if let Some(duration_ms) = duration_ms {
                let transport = self.transport.clone();
                let coil_addr = valve.coil_addr;
                let handle = spawn_after(Duration::from_millis(duration_ms), async move {
                    if let Err(e) = transport.write_coil(coil_addr, false).await {
                        log::warn!("[valve={number}] auto-close write failed: {e}");
                    }
                });
                self.pending.lock().unwrap().push(handle);
            }
        }
        Ok(())
    }

    /// Activates the registry-flagged purge actuator, waits `duration_ms`,
    /// then clears it. The call returns once activation succeeds; release
    /// runs as a deferred task. A second concurrent purge is rejected.
    pub async fn execute_purge(&self, duration_ms: u64) -> AppResult<()> {
        if self
            .purge_in_flight
            .compare_exchange(false, true, std::sync::atomic::Ordering::SeqCst, std::sync::atomic::Ordering::SeqCst)
            .is_err()
        {
            return Err(AppError::conflict("a purge is already in progress"));
        }

        let actuator = self.registry.list_writable().await.into_iter().find(|p| p.is_purge_actuator);
        let actuator = match actuator {
            Some(p) => p,
            None => {
                self.purge_in_flight.store(false, std::sync::atomic::Ordering::SeqCst);
                return Err(AppError::configuration("no parameter is flagged as the purge actuator"));
            }
        };

        let addr = actuator.modbus_write_addr.expect("writable implies an address");
        let activation = match actuator.data_type {
            DataType::Binary => self.transport.write_coil(addr, true).await,
            _ => self.transport.write_float32(addr, 1.0, crate::models::enums::ByteOrder::default()).await,
        };
        if let Err(e) = activation {
            self.purge_in_flight.store(false, std::sync::atomic::Ordering::SeqCst);
            return Err(e);
        }

        let transport = self.transport.clone();
        let in_flight = self.purge_in_flight.clone();
        let handle = spawn_after(Duration::from_millis(duration_ms), async move {
            let release = match actuator.data_type {
                DataType::Binary => transport.write_coil(addr, false).await,
                _ => transport.write_float32(addr, 0.0, crate::models::enums::ByteOrder::default()).await,
            };
            if let Err(e) = release {
                log::warn!("purge release write failed: {e}");
            }
            in_flight.store(false, std::sync::atomic::Ordering::SeqCst);
        });
        self.pending.lock().unwrap().push(handle);
        Ok(())
    }

    pub fn is_purge_in_flight(&self) -> bool {
        self.purge_in_flight.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Cancels every pending auto-close/purge-release task — called during
    /// process shutdown.
    pub fn cancel_pending(&self) {
        for handle in self.pending.lock().unwrap().drain(..) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::plc::MockPlcTransport;
    use crate::infrastructure::persistence::MockPersistenceAdapter;
    use crate::models::enums::{ByteOrder, ModbusType};
    use crate::models::structs::Parameter;
    use uuid::Uuid;

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

    async fn build() -> (Arc<ParameterRegistry>, Arc<MockPlcTransport>, Uuid) {
        let persistence = MockPersistenceAdapter::new();
        let valve = valve_parameter(3, 20);
        let id = valve.id;
        persistence.seed_parameter(valve).await;
        let transport = Arc::new(MockPlcTransport::new());
        let registry = Arc::new(
            ParameterRegistry::load(&persistence, Uuid::new_v4(), transport.clone(), ByteOrder::Badc)
                .await
                .unwrap(),
        );
        (registry, transport, id)
    }

    #[tokio::test]
    async fn control_valve_opens_the_coil_immediately() {
        let (registry, transport, _id) = build().await;
        let controller = ValveController::new(registry, transport.clone());
        controller.control_valve(3, true, None).await.unwrap();
        assert_eq!(transport.read_coils(20, 1).await.unwrap(), vec![true]);
    }

    #[tokio::test]
    async fn control_valve_schedules_auto_close() {
        let (registry, transport, _id) = build().await;
        let controller = ValveController::new(registry, transport.clone());
        controller.control_valve(3, true, Some(20)).await.unwrap();
        assert_eq!(transport.read_coils(20, 1).await.unwrap(), vec![true]);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(transport.read_coils(20, 1).await.unwrap(), vec![false]);
    }

    #[tokio::test]
    async fn unknown_valve_number_is_not_found() {
        let (registry, transport, _id) = build().await;
        let controller = ValveController::new(registry, transport);
        let err = controller.control_valve(99, true, None).await.unwrap_err();
        assert_eq!(err.code(), "not_found");
    }
}
