//! In-memory parameter catalog: the sole owner of the process's Parameter
//! map (per the Ownership paragraph). Loaded once at startup from the
//! Persistence Adapter; rebuilt wholesale (never patched field-by-field)
//! on reconnection or reconfiguration.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::services::{PersistenceAdapter, PlcTransport};
use crate::models::enums::{ByteOrder, DataType};
use crate::models::structs::{Parameter, SetParameterPayload, Valve};
use crate::utils::error::{AppError, AppResult};

static VALVE_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)valve\s*(\d+)").expect("static valve regex is valid"));

/// What a `set_parameter` command resolved to, per the §4.F priority
/// chain. `DirectAddress` bypasses the registry entirely — no range or
/// writability validation is possible without parameter metadata.
#[derive(Debug, Clone)]
pub enum ResolvedTarget {
    DirectAddress { addr: u16, data_type: DataType },
    Parameter(Parameter),
}

pub struct ParameterRegistry {
    parameters: RwLock<HashMap<Uuid, Parameter>>,
    transport: Arc<dyn PlcTransport>,
    byte_order: ByteOrder,
}

impl ParameterRegistry {
    pub async fn load(
        persistence: &dyn PersistenceAdapter,
        machine_id: Uuid,
        transport: Arc<dyn PlcTransport>,
        byte_order: ByteOrder,
    ) -> AppResult<Self> {
        let loaded = persistence.load_parameters(machine_id).await?;
        let mut by_id = HashMap::with_capacity(loaded.len());
        for p in loaded {
            by_id.insert(p.id, p);
        }
        Ok(Self { parameters: RwLock::new(by_id), transport, byte_order })
    }

    /// Exclusively replaces the in-memory map — used on reconnect or
    /// reconfiguration, never merged field-by-field.
    pub async fn reload(&self, persistence: &dyn PersistenceAdapter, machine_id: Uuid) -> AppResult<()> {
        let loaded = persistence.load_parameters(machine_id).await?;
        let mut by_id = HashMap::with_capacity(loaded.len());
        for p in loaded {
            by_id.insert(p.id, p);
        }
        *self.parameters.write().await = by_id;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> AppResult<Parameter> {
        self.parameters
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::not_found("parameter", id.to_string()))
    }

    /// Resolves by name, logging (not failing on) a conflict when more than
    /// one parameter shares the name; the first match is returned.
    pub async fn get_by_name(&self, name: &str) -> AppResult<Parameter> {
        let parameters = self.parameters.read().await;
        let matches: Vec<&Parameter> = parameters.values().filter(|p| p.name == name).collect();
        match matches.len() {
            0 => Err(AppError::not_found("parameter", name.to_string())),
            1 => Ok(matches[0].clone()),
            _ => {
                log::warn!("parameter name '{name}' is not unique ({} matches); using the first", matches.len());
                Ok(matches[0].clone())
            }
        }
    }

    pub async fn list_readable(&self) -> Vec<Parameter> {
        self.parameters.read().await.values().filter(|p| p.is_readable()).cloned().collect()
    }

    pub async fn list_writable(&self) -> Vec<Parameter> {
        self.parameters.read().await.values().filter(|p| p.is_write_capable()).cloned().collect()
    }

    /// Derives the valve view: parameters with `data_type = binary` whose
    /// name matches `/valve\s*(\d+)/i`, or which carry an explicit
    /// `valve_number` (preferred when present).
    pub async fn valves(&self) -> Vec<Valve> {
        self.parameters
            .read()
            .await
            .values()
            .filter(|p| p.data_type == DataType::Binary)
            .filter_map(|p| {
                let number = p
                    .valve_number
                    .or_else(|| VALVE_NAME_PATTERN.captures(&p.name).and_then(|c| c[1].parse().ok()))?;
                let coil_addr = p.modbus_write_addr.or(p.modbus_read_addr)?;
                Some(Valve { number, parameter_id: p.id, coil_addr })
            })
            .collect()
    }

    pub async fn valve_by_number(&self, number: u32) -> AppResult<Valve> {
        self.valves()
            .await
            .into_iter()
            .find(|v| v.number == number)
            .ok_or_else(|| AppError::not_found("valve", number.to_string()))
    }

    /// §4.F parameter resolution priority for `set_parameter` commands.
    pub async fn resolve_for_command(&self, payload: &SetParameterPayload) -> AppResult<ResolvedTarget> {
        if let Some(addr) = payload.write_modbus_address {
            return Ok(ResolvedTarget::DirectAddress {
                addr,
                data_type: payload.data_type.unwrap_or(DataType::Float32),
            });
        }
        if let Some(id) = payload.component_parameter_id {
            return Ok(ResolvedTarget::Parameter(self.get(id).await?));
        }
        if let Some(name) = &payload.parameter_name {
            return Ok(ResolvedTarget::Parameter(self.get_by_name(name).await?));
        }
        Err(AppError::validation("missing_target"))
    }

    /// §4.C write validation + dispatch. Range and writability are only
    /// enforced for registry-resolved targets — a direct address write
    /// bypasses registry metadata by definition.
    pub async fn write(&self, target: &ResolvedTarget, value: f64) -> AppResult<()> {
        match target {
            ResolvedTarget::DirectAddress { addr, data_type } => {
                self.write_typed(*addr, *data_type, value).await
            }
            ResolvedTarget::Parameter(parameter) => {
                if !parameter.in_range(value) {
                    return Err(AppError::validation(format!(
                        "value {value} out of range [{:?}, {:?}] for parameter {}",
                        parameter.min, parameter.max, parameter.id
                    )));
                }
                if !parameter.is_write_capable() {
                    return Err(AppError::validation(format!("parameter {} is not writable", parameter.id)));
                }
                let addr = parameter.modbus_write_addr.expect("checked by is_write_capable");
                self.write_typed(addr, parameter.data_type, value).await?;
                if let Some(entry) = self.parameters.write().await.get_mut(&parameter.id) {
                    entry.set_value = Some(value);
                }
                Ok(())
            }
        }
    }

    /// Folds a sync-loop PLC read back into the in-memory view so readers
    /// between ticks (the dispatcher, the recipe executor) see current
    /// values without waiting on the next `reload`.
    pub async fn update_current_value(&self, id: Uuid, value: f64) {
        if let Some(entry) = self.parameters.write().await.get_mut(&id) {
            entry.current_value = Some(value);
        }
    }

    /// Folds an external-PLC-edit reconciliation back into the in-memory
    /// view, mirroring the database write the sync loop just made.
    pub async fn update_set_value_from_plc(&self, id: Uuid, value: f64) {
        if let Some(entry) = self.parameters.write().await.get_mut(&id) {
            entry.set_value = Some(value);
        }
    }

    async fn write_typed(&self, addr: u16, data_type: DataType, value: f64) -> AppResult<()> {
        match data_type {
            DataType::Float32 => self.transport.write_float32(addr, value as f32, self.byte_order).await,
            DataType::Int32 => self.transport.write_i32(addr, value as i32, self.byte_order).await,
            DataType::Int16 => self.transport.write_i16(addr, value as i16).await,
            DataType::Binary => self.transport.write_coil(addr, value > 0.0).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::plc::MockPlcTransport;
    use crate::infrastructure::persistence::MockPersistenceAdapter;
    use crate::models::enums::ModbusType;

    fn sample_parameter(name: &str, min: f64, max: f64, write_addr: u16) -> Parameter {
        Parameter {
            id: Uuid::new_v4(),
            name: name.to_string(),
            component: "reactor".to_string(),
            unit: None,
            description: None,
            modbus_read_addr: Some(write_addr),
            modbus_write_addr: Some(write_addr),
            modbus_type: ModbusType::Holding,
            data_type: DataType::Float32,
            min: Some(min),
            max: Some(max),
            current_value: None,
            set_value: None,
            is_writable: true,
            is_critical: false,
            valve_number: None,
            is_purge_actuator: false,
        }
    }

    async fn build_registry() -> (ParameterRegistry, Arc<MockPlcTransport>, Uuid) {
        let persistence = MockPersistenceAdapter::new();
        let parameter = sample_parameter("temperature", 0.0, 100.0, 42);
        let id = parameter.id;
        persistence.seed_parameter(parameter).await;
        let transport = Arc::new(MockPlcTransport::new());
        let registry = ParameterRegistry::load(&persistence, Uuid::new_v4(), transport.clone(), ByteOrder::Badc)
            .await
            .unwrap();
        (registry, transport, id)
    }

    #[tokio::test]
    async fn write_within_range_reaches_the_transport() {
        let (registry, transport, id) = build_registry().await;
        let target = ResolvedTarget::Parameter(registry.get(id).await.unwrap());
        registry.write(&target, 37.5).await.unwrap();
        let value = transport.read_float32(42, ByteOrder::Badc).await.unwrap();
        assert_eq!(value, 37.5);
    }

    #[tokio::test]
    async fn write_out_of_range_is_rejected_without_touching_the_transport() {
        let (registry, transport, id) = build_registry().await;
        let target = ResolvedTarget::Parameter(registry.get(id).await.unwrap());
        let err = registry.write(&target, 150.0).await.unwrap_err();
        assert_eq!(err.code(), "validation");
        assert_eq!(transport.read_float32(42, ByteOrder::Badc).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn min_and_max_are_inclusive_boundaries() {
        let (registry, _transport, id) = build_registry().await;
        let target = ResolvedTarget::Parameter(registry.get(id).await.unwrap());
        registry.write(&target, 0.0).await.unwrap();
        registry.write(&target, 100.0).await.unwrap();
    }

    #[tokio::test]
    async fn resolve_for_command_prefers_direct_address_over_registry_lookup() {
        let (registry, _transport, id) = build_registry().await;
        let payload = SetParameterPayload {
            write_modbus_address: Some(99),
            component_parameter_id: Some(id),
            parameter_name: None,
            target_value: 1.0,
            data_type: Some(DataType::Int16),
        };
        let resolved = registry.resolve_for_command(&payload).await.unwrap();
        assert!(matches!(resolved, ResolvedTarget::DirectAddress { addr: 99, .. }));
    }

    #[tokio::test]
    async fn resolve_for_command_with_no_target_fields_fails() {
        let (registry, ..) = build_registry().await;
        let payload = SetParameterPayload::default();
        let err = registry.resolve_for_command(&payload).await.unwrap_err();
        assert_eq!(err.code(), "validation");
    }

    #[tokio::test]
    async fn valve_number_is_extracted_from_name_by_regex() {
        let persistence = MockPersistenceAdapter::new();
        let mut valve = sample_parameter("Valve 3", 0.0, 1.0, 10);
        valve.data_type = DataType::Binary;
        valve.valve_number = None;
        persistence.seed_parameter(valve).await;
        let transport = Arc::new(MockPlcTransport::new());
        let registry = ParameterRegistry::load(&persistence, Uuid::new_v4(), transport, ByteOrder::Badc)
            .await
            .unwrap();
        let valves = registry.valves().await;
        assert_eq!(valves.len(), 1);
        assert_eq!(valves[0].number, 3);
    }

    #[tokio::test]
    async fn explicit_valve_number_column_is_preferred_over_name_match() {
        let persistence = MockPersistenceAdapter::new();
        let mut valve = sample_parameter("Valve 3", 0.0, 1.0, 10);
        valve.data_type = DataType::Binary;
        valve.valve_number = Some(7);
        persistence.seed_parameter(valve).await;
        let transport = Arc::new(MockPlcTransport::new());
        let registry = ParameterRegistry::load(&persistence, Uuid::new_v4(), transport, ByteOrder::Badc)
            .await
            .unwrap();
        let valves = registry.valves().await;
        assert_eq!(valves[0].number, 7);
    }
}
