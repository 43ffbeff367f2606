//! Parameter Synchronization Loop (§4.E): a fixed-cadence task that keeps
//! the database's view of every readable parameter current and reconciles
//! writable set-points between the database and the PLC.
//!
//! Each tick re-reads the parameter catalog from the Persistence Adapter
//! rather than trusting the in-memory registry, since the registry has no
//! way to observe an edit made to `set_value` by anything other than this
//! process; the registry is still updated afterward so readers between
//! ticks see fresh values.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::domain::services::{PersistenceAdapter, PlcTransport};
use crate::models::enums::{ByteOrder, DataType};
use crate::models::structs::Parameter;
use crate::registry::ParameterRegistry;
use crate::utils::error::AppResult;

/// Per-parameter memory sufficient to distinguish a database-side edit from
/// an external PLC-side edit across ticks.
#[derive(Debug, Clone, Copy, Default)]
struct ParamSyncState {
    last_db_set: Option<f64>,
    last_plc_value: Option<f64>,
}

pub struct SyncLoop {
    machine_id: Uuid,
    registry: Arc<ParameterRegistry>,
    transport: Arc<dyn PlcTransport>,
    persistence: Arc<dyn PersistenceAdapter>,
    byte_order: ByteOrder,
    period: Duration,
    state: Mutex<HashMap<Uuid, ParamSyncState>>,
}

impl SyncLoop {
    pub fn new(
        machine_id: Uuid,
        registry: Arc<ParameterRegistry>,
        transport: Arc<dyn PlcTransport>,
        persistence: Arc<dyn PersistenceAdapter>,
        byte_order: ByteOrder,
        hz: f64,
    ) -> Self {
        let period = Duration::from_secs_f64(1.0 / hz);
        Self { machine_id, registry, transport, persistence, byte_order, period, state: Mutex::new(HashMap::new()) }
    }

    /// Runs until `shutdown` fires. A tick that overruns the period is
    /// absorbed by `Skip`: the next tick fires on the original schedule
    /// rather than firing a burst to catch up.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        log::error!("sync loop tick failed: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        log::info!("sync loop shutting down");
                        return;
                    }
                }
            }
        }
    }

    async fn tick(&self) -> AppResult<()> {
        let snapshot = self.persistence.load_parameters(self.machine_id).await?;

        let mut plc_values = Vec::with_capacity(snapshot.len());
        for parameter in snapshot.iter().filter(|p| p.is_readable()) {
            match self.read_one(parameter).await {
                Ok(value) => plc_values.push((parameter.id, value)),
                Err(e) => log::warn!("[parameter={}] read failed, skipping this tick: {e}", parameter.name),
            }
        }

        if !plc_values.is_empty() {
            self.persistence.batch_update_current_values(&plc_values).await?;
            for (id, value) in &plc_values {
                self.registry.update_current_value(*id, *value).await;
            }
        }

        let plc_by_id: HashMap<Uuid, f64> = plc_values.into_iter().collect();
        self.reconcile_set_points(&snapshot, &plc_by_id).await?;
        Ok(())
    }

    async fn read_one(&self, parameter: &Parameter) -> AppResult<f64> {
        let addr = parameter.modbus_read_addr.expect("checked by is_readable");
        Ok(match parameter.data_type {
            DataType::Float32 => self.transport.read_float32(addr, self.byte_order).await? as f64,
            DataType::Int32 => self.transport.read_i32(addr, self.byte_order).await? as f64,
            DataType::Int16 => self.transport.read_i16(addr).await? as f64,
            DataType::Binary => {
                if self.transport.read_coils(addr, 1).await?[0] {
                    1.0
                } else {
                    0.0
                }
            }
        })
    }

    async fn write_one(&self, parameter: &Parameter, value: f64) -> AppResult<()> {
        let addr = parameter.modbus_write_addr.expect("checked by is_write_capable");
        match parameter.data_type {
            DataType::Float32 => self.transport.write_float32(addr, value as f32, self.byte_order).await,
            DataType::Int32 => self.transport.write_i32(addr, value as i32, self.byte_order).await,
            DataType::Int16 => self.transport.write_i16(addr, value as i16).await,
            DataType::Binary => self.transport.write_coil(addr, value > 0.0).await,
        }
    }

    async fn reconcile_set_points(&self, snapshot: &[Parameter], plc_by_id: &HashMap<Uuid, f64>) -> AppResult<()> {
        let mut state = self.state.lock().await;
        for parameter in snapshot.iter().filter(|p| p.is_write_capable()) {
            let Some(&plc_value) = plc_by_id.get(&parameter.id) else { continue };
            let Some(db_set) = parameter.set_value else { continue };

            let entry = state.entry(parameter.id).or_default();
            // No prior observation (first tick after startup for this
            // parameter): treat both sides as "changed" so a pre-existing
            // divergence resolves to the database's configured set-point
            // rather than silently adopting whatever the PLC happens to
            // hold — the ambiguous-case rule (database wins) already
            // produces that outcome.
            let db_changed = entry
                .last_db_set
                .map(|prev| !values_equal(prev, db_set, parameter.data_type))
                .unwrap_or(true);
            let plc_changed = entry
                .last_plc_value
                .map(|prev| !values_equal(prev, plc_value, parameter.data_type))
                .unwrap_or(true);
            let diverges = !values_equal(db_set, plc_value, parameter.data_type);

            if diverges {
                if db_changed && plc_changed {
                    log::warn!(
                        "[parameter={}] set-point changed on both sides since the last tick; database wins",
                        parameter.name
                    );
                    self.write_one(parameter, db_set).await?;
                } else if db_changed {
                    self.write_one(parameter, db_set).await?;
                } else {
                    self.persistence.update_set_value(parameter.id, plc_value).await?;
                    self.registry.update_set_value_from_plc(parameter.id, plc_value).await;
                }
            }

            entry.last_db_set = Some(db_set);
            entry.last_plc_value = Some(plc_value);
        }
        Ok(())
    }
}

fn values_equal(a: f64, b: f64, data_type: DataType) -> bool {
    match data_type {
        DataType::Float32 => {
            let tolerance = (1e-4 * a.abs()).max(1e-2);
            (a - b).abs() <= tolerance
        }
        DataType::Int32 | DataType::Int16 | DataType::Binary => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::MockPersistenceAdapter;
    use crate::infrastructure::plc::MockPlcTransport;
    use crate::models::enums::ModbusType;

    fn writable_parameter(set_value: Option<f64>) -> Parameter {
        Parameter {
            id: Uuid::new_v4(),
            name: "setpoint".to_string(),
            component: "reactor".to_string(),
            unit: None,
            description: None,
            modbus_read_addr: Some(10),
            modbus_write_addr: Some(10),
            modbus_type: ModbusType::Holding,
            data_type: DataType::Float32,
            min: Some(0.0),
            max: Some(500.0),
            current_value: None,
            set_value,
            is_writable: true,
            is_critical: false,
            valve_number: None,
            is_purge_actuator: false,
        }
    }

    async fn build(parameter: Parameter) -> (SyncLoop, Arc<MockPlcTransport>, Arc<MockPersistenceAdapter>) {
        let persistence = Arc::new(MockPersistenceAdapter::new());
        persistence.seed_parameter(parameter.clone()).await;
        let transport = Arc::new(MockPlcTransport::new());
        let registry = Arc::new(
            ParameterRegistry::load(persistence.as_ref(), Uuid::new_v4(), transport.clone(), ByteOrder::Badc)
                .await
                .unwrap(),
        );
        let machine_id = Uuid::new_v4();
        let sync = SyncLoop::new(machine_id, registry, transport.clone(), persistence.clone(), ByteOrder::Badc, 1.0);
        (sync, transport, persistence)
    }

    #[tokio::test]
    async fn tick_writes_back_current_values() {
        let parameter = writable_parameter(Some(12.0));
        let (sync, transport, persistence) = build(parameter.clone()).await;
        transport.write_float32(10, 12.0, ByteOrder::Badc).await.unwrap();
        sync.tick().await.unwrap();
        let stored = persistence.get_parameter(parameter.id).await.unwrap();
        assert_eq!(stored.current_value, Some(12.0));
    }

    #[tokio::test]
    async fn db_edit_pushes_to_the_plc() {
        let parameter = writable_parameter(Some(50.0));
        let id = parameter.id;
        let (sync, transport, _persistence) = build(parameter).await;
        transport.write_float32(10, 10.0, ByteOrder::Badc).await.unwrap();
        sync.tick().await.unwrap();
        let written = transport.read_float32(10, ByteOrder::Badc).await.unwrap();
        assert_eq!(written, 50.0);
        let _ = id;
    }

    #[tokio::test]
    async fn external_plc_edit_updates_the_database_set_value() {
        let parameter = writable_parameter(Some(10.0));
        let id = parameter.id;
        let (sync, transport, persistence) = build(parameter).await;
        transport.write_float32(10, 10.0, ByteOrder::Badc).await.unwrap();
        sync.tick().await.unwrap();

        transport.write_float32(10, 75.0, ByteOrder::Badc).await.unwrap();
        sync.tick().await.unwrap();
        sync.tick().await.unwrap();

        let stored = persistence.get_parameter(id).await.unwrap();
        assert_eq!(stored.set_value, Some(75.0));
    }

    #[test]
    fn tolerance_scales_with_magnitude_for_floats() {
        assert!(values_equal(1000.0, 1000.09, DataType::Float32));
        assert!(!values_equal(1000.0, 1000.2, DataType::Float32));
        assert!(values_equal(0.0, 0.005, DataType::Float32));
    }

    #[test]
    fn integers_and_coils_require_exact_equality() {
        assert!(!values_equal(1.0, 1.0001, DataType::Int16));
        assert!(!values_equal(0.0, 1.0, DataType::Binary));
    }
}
