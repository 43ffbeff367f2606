//! `PersistenceAdapter` over `sea-orm` against the Postgres-hosted control
//! plane database, following the source lineage's "`Arc<DatabaseConnection>`
//! behind a service struct" shape (`SqliteOrmPersistenceService`), adapted
//! to the tables and runtime (`sqlx-postgres`) this system targets.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, Database, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::services::PersistenceAdapter;
use crate::models::entities::{
    component_parameter_definitions, component_parameters, loop_step_config,
    parameter_control_commands, parameter_step_config, process_execution_state,
    process_executions, purge_step_config, recipe_parameters, recipe_steps, recipes,
    valve_step_config,
};
use crate::models::enums::{
    CommandKind, CommandStatus, DataType, ExecutionStatus, ModbusType, StepKind,
};
use crate::models::structs::{Command, Parameter, ProcessExecution, ProcessExecutionState, Recipe, Step, StepConfig};
use crate::utils::error::{AppError, AppResult};

/// `NOTIFY` channel a `parameter_control_commands` trigger is expected to
/// fire on insert/update, carrying no payload — listeners re-poll rather
/// than trust anything in the notification itself.
const COMMAND_CHANGE_CHANNEL: &str = "parameter_control_commands_changed";

pub struct SeaOrmPersistenceAdapter {
    db: Arc<DatabaseConnection>,
    /// Kept alongside the pooled connection so `subscribe_commands` can
    /// open the dedicated connection `PgListener` requires.
    database_url: String,
}

impl SeaOrmPersistenceAdapter {
    pub async fn connect(database_url: &str) -> AppResult<Self> {
        let mut opts = ConnectOptions::new(database_url.to_string());
        opts.max_connections(10)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(10))
            .sqlx_logging(false);
        let db = Database::connect(opts).await?;
        Ok(Self { db: Arc::new(db), database_url: database_url.to_string() })
    }

    #[cfg(test)]
    pub fn from_connection(db: DatabaseConnection, database_url: &str) -> Self {
        Self { db: Arc::new(db), database_url: database_url.to_string() }
    }
}

fn parse_modbus_type(s: &str) -> ModbusType {
    match s {
        "coil" => ModbusType::Coil,
        _ => ModbusType::Holding,
    }
}

fn parse_data_type(s: &str) -> DataType {
    match s {
        "int32" => DataType::Int32,
        "int16" => DataType::Int16,
        "binary" => DataType::Binary,
        _ => DataType::Float32,
    }
}

fn parse_command_status(s: &str) -> CommandStatus {
    match s {
        "processing" => CommandStatus::Processing,
        "completed" => CommandStatus::Completed,
        "failed" => CommandStatus::Failed,
        _ => CommandStatus::Pending,
    }
}

fn parse_command_kind(s: &str) -> AppResult<CommandKind> {
    match s {
        "set_parameter" => Ok(CommandKind::SetParameter),
        "open_valve" => Ok(CommandKind::OpenValve),
        "close_valve" => Ok(CommandKind::CloseValve),
        "pulse_valve" => Ok(CommandKind::PulseValve),
        "purge" => Ok(CommandKind::Purge),
        "start_recipe" => Ok(CommandKind::StartRecipe),
        "stop_recipe" => Ok(CommandKind::StopRecipe),
        other => Err(AppError::validation(format!("unknown command kind: {other}"))),
    }
}

fn parse_execution_status(s: &str) -> ExecutionStatus {
    match s {
        "running" => ExecutionStatus::Running,
        "completed" => ExecutionStatus::Completed,
        "failed" => ExecutionStatus::Failed,
        "cancelled" => ExecutionStatus::Cancelled,
        _ => ExecutionStatus::Preparing,
    }
}

fn execution_status_str(s: ExecutionStatus) -> &'static str {
    match s {
        ExecutionStatus::Preparing => "preparing",
        ExecutionStatus::Running => "running",
        ExecutionStatus::Completed => "completed",
        ExecutionStatus::Failed => "failed",
        ExecutionStatus::Cancelled => "cancelled",
    }
}

/// Recursively assembles the step tree for steps sharing `parent_id`,
/// pulling each step's kind-specific config out of the maps built from the
/// four step-config tables.
fn build_steps(
    parent_id: Option<Uuid>,
    rows: &[recipe_steps::Model],
    valve_cfg: &HashMap<Uuid, valve_step_config::Model>,
    purge_cfg: &HashMap<Uuid, purge_step_config::Model>,
    loop_cfg: &HashMap<Uuid, loop_step_config::Model>,
    parameter_cfg: &HashMap<Uuid, parameter_step_config::Model>,
) -> AppResult<Vec<Step>> {
    let mut children: Vec<&recipe_steps::Model> =
        rows.iter().filter(|r| r.parent_step_id == parent_id).collect();
    children.sort_by_key(|r| r.sequence_number);

    children
        .into_iter()
        .map(|row| {
            let kind = match row.r#type.as_str() {
                "valve" => StepKind::Valve,
                "purge" => StepKind::Purge,
                "parameter" => StepKind::Parameter,
                "loop" => StepKind::Loop,
                other => return Err(AppError::validation(format!("unknown step type: {other}"))),
            };
            let config = match kind {
                StepKind::Valve => {
                    let cfg = valve_cfg
                        .get(&row.id)
                        .ok_or_else(|| AppError::not_found("valve_step_config", row.id.to_string()))?;
                    StepConfig::Valve {
                        valve_number: cfg.valve_number as u32,
                        duration_ms: cfg.duration_ms as u64,
                        state: if cfg.state == "on" {
                            crate::models::enums::ValveState::On
                        } else {
                            crate::models::enums::ValveState::Off
                        },
                    }
                }
                StepKind::Purge => {
                    let cfg = purge_cfg
                        .get(&row.id)
                        .ok_or_else(|| AppError::not_found("purge_step_config", row.id.to_string()))?;
                    StepConfig::Purge {
                        duration_ms: cfg.duration_ms as u64,
                        gas_type: cfg.gas_type.clone(),
                        flow_rate: cfg.flow_rate,
                    }
                }
                StepKind::Parameter => {
                    let cfg = parameter_cfg
                        .get(&row.id)
                        .ok_or_else(|| AppError::not_found("parameter_step_config", row.id.to_string()))?;
                    StepConfig::Parameter { parameter_id: cfg.parameter_id, value: cfg.value }
                }
                StepKind::Loop => {
                    let cfg = loop_cfg
                        .get(&row.id)
                        .ok_or_else(|| AppError::not_found("loop_step_config", row.id.to_string()))?;
                    let body = build_steps(Some(row.id), rows, valve_cfg, purge_cfg, loop_cfg, parameter_cfg)?;
                    StepConfig::Loop { iteration_count: cfg.iteration_count as u32, body }
                }
            };
            Ok(Step { seq: row.sequence_number as u32, name: row.name.clone(), kind, config })
        })
        .collect()
}

#[async_trait]
impl PersistenceAdapter for SeaOrmPersistenceAdapter {
    async fn load_parameters(&self, machine_id: Uuid) -> AppResult<Vec<Parameter>> {
        let rows = component_parameters::Entity::find()
            .filter(component_parameters::Column::MachineId.eq(machine_id))
            .all(self.db.as_ref())
            .await?;

        let mut parameters = Vec::with_capacity(rows.len());
        for row in rows {
            let definition = component_parameter_definitions::Entity::find_by_id(row.definition_id)
                .one(self.db.as_ref())
                .await?
                .ok_or_else(|| AppError::not_found("component_parameter_definitions", row.definition_id.to_string()))?;

            parameters.push(Parameter {
                id: row.id,
                name: definition.name,
                component: row.component_id.to_string(),
                unit: definition.unit,
                description: definition.description,
                modbus_read_addr: row.modbus_address.map(|a| a as u16),
                modbus_write_addr: row.write_modbus_address.map(|a| a as u16),
                modbus_type: parse_modbus_type(&row.modbus_type),
                data_type: parse_data_type(&row.data_type),
                min: row.min_value,
                max: row.max_value,
                current_value: row.current_value,
                set_value: row.set_value,
                is_writable: row.is_writable,
                is_critical: row.is_critical,
                valve_number: row.valve_number.map(|n| n as u32),
                is_purge_actuator: row.is_purge_actuator,
            });
        }
        Ok(parameters)
    }

    async fn batch_update_current_values(&self, updates: &[(Uuid, f64)]) -> AppResult<()> {
        let txn = self.db.begin().await?;
        for (id, value) in updates {
            let mut active = component_parameters::ActiveModel {
                id: Set(*id),
                ..Default::default()
            };
            active.current_value = Set(Some(*value));
            active.updated_at = Set(Utc::now());
            component_parameters::Entity::update(active)
                .filter(component_parameters::Column::Id.eq(*id))
                .exec(&txn)
                .await?;
        }
        txn.commit().await?;
        Ok(())
    }

    async fn update_set_value(&self, parameter_id: Uuid, value: f64) -> AppResult<()> {
        let mut active = component_parameters::ActiveModel {
            id: Set(parameter_id),
            ..Default::default()
        };
        active.set_value = Set(Some(value));
        active.updated_at = Set(Utc::now());
        component_parameters::Entity::update(active)
            .filter(component_parameters::Column::Id.eq(parameter_id))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    async fn poll_pending_commands(&self, machine_id: Uuid) -> AppResult<Vec<Command>> {
        let rows = parameter_control_commands::Entity::find()
            .filter(parameter_control_commands::Column::MachineId.eq(machine_id))
            .filter(parameter_control_commands::Column::Status.eq("pending"))
            .order_by_asc(parameter_control_commands::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?;

        rows.into_iter()
            .map(|row| {
                Ok(Command {
                    id: row.id,
                    machine_id: row.machine_id,
                    kind: parse_command_kind(&row.kind)?,
                    payload: row.payload,
                    status: parse_command_status(&row.status),
                    created_at: row.created_at,
                    updated_at: row.updated_at,
                    error: row.error,
                })
            })
            .collect()
    }

    async fn try_claim_command(&self, command_id: Uuid) -> AppResult<bool> {
        let result = parameter_control_commands::Entity::update_many()
            .filter(parameter_control_commands::Column::Id.eq(command_id))
            .filter(parameter_control_commands::Column::Status.eq("pending"))
            .col_expr(parameter_control_commands::Column::Status, sea_orm::sea_query::Expr::value("processing"))
            .col_expr(parameter_control_commands::Column::UpdatedAt, sea_orm::sea_query::Expr::value(Utc::now()))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected == 1)
    }

    async fn complete_command(&self, command_id: Uuid) -> AppResult<()> {
        parameter_control_commands::Entity::update_many()
            .filter(parameter_control_commands::Column::Id.eq(command_id))
            .col_expr(parameter_control_commands::Column::Status, sea_orm::sea_query::Expr::value("completed"))
            .col_expr(parameter_control_commands::Column::UpdatedAt, sea_orm::sea_query::Expr::value(Utc::now()))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    async fn fail_command(&self, command_id: Uuid, error: &str) -> AppResult<()> {
        parameter_control_commands::Entity::update_many()
            .filter(parameter_control_commands::Column::Id.eq(command_id))
            .col_expr(parameter_control_commands::Column::Status, sea_orm::sea_query::Expr::value("failed"))
            .col_expr(parameter_control_commands::Column::Error, sea_orm::sea_query::Expr::value(error))
            .col_expr(parameter_control_commands::Column::UpdatedAt, sea_orm::sea_query::Expr::value(Utc::now()))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Opens a dedicated `PgListener` (the pooled `DatabaseConnection` sea-orm
    /// uses cannot itself hold a session-level `LISTEN`) and forwards one
    /// wake signal per notification. Reconnects with a fixed backoff if the
    /// listener connection drops; the dispatcher's poll path covers intake
    /// during that gap.
    async fn subscribe_commands(&self, _machine_id: Uuid) -> AppResult<mpsc::UnboundedReceiver<()>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let database_url = self.database_url.clone();
        tokio::spawn(async move {
            loop {
                match sqlx::postgres::PgListener::connect(&database_url).await {
                    Ok(mut listener) => {
                        if let Err(e) = listener.listen(COMMAND_CHANGE_CHANNEL).await {
                            log::warn!("command subscription LISTEN failed: {e}");
                        } else {
                            loop {
                                match listener.recv().await {
                                    Ok(_notification) => {
                                        if tx.send(()).is_err() {
                                            return;
                                        }
                                    }
                                    Err(e) => {
                                        log::warn!("command subscription connection lost: {e}");
                                        break;
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => log::warn!("command subscription connect failed: {e}"),
                }
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        });
        Ok(rx)
    }

    async fn load_recipe(&self, recipe_id: Uuid) -> AppResult<Recipe> {
        let recipe_row = recipes::Entity::find_by_id(recipe_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| AppError::not_found("recipes", recipe_id.to_string()))?;

        let step_rows = recipe_steps::Entity::find()
            .filter(recipe_steps::Column::RecipeId.eq(recipe_id))
            .all(self.db.as_ref())
            .await?;
        let step_ids: Vec<Uuid> = step_rows.iter().map(|r| r.id).collect();

        let valve_cfg: HashMap<_, _> = valve_step_config::Entity::find()
            .filter(valve_step_config::Column::StepId.is_in(step_ids.clone()))
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(|m| (m.step_id, m))
            .collect();
        let purge_cfg: HashMap<_, _> = purge_step_config::Entity::find()
            .filter(purge_step_config::Column::StepId.is_in(step_ids.clone()))
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(|m| (m.step_id, m))
            .collect();
        let loop_cfg: HashMap<_, _> = loop_step_config::Entity::find()
            .filter(loop_step_config::Column::StepId.is_in(step_ids.clone()))
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(|m| (m.step_id, m))
            .collect();
        let parameter_cfg: HashMap<_, _> = parameter_step_config::Entity::find()
            .filter(parameter_step_config::Column::StepId.is_in(step_ids.clone()))
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(|m| (m.step_id, m))
            .collect();

        let steps = build_steps(None, &step_rows, &valve_cfg, &purge_cfg, &loop_cfg, &parameter_cfg)?;

        let parameter_rows = recipe_parameters::Entity::find()
            .filter(recipe_parameters::Column::RecipeId.eq(recipe_id))
            .all(self.db.as_ref())
            .await?;
        let parameters = parameter_rows
            .into_iter()
            .map(|row| (row.parameter_name, row.parameter_value))
            .collect();

        Ok(Recipe { id: recipe_row.id, name: recipe_row.name, steps, parameters })
    }

    async fn create_execution(
        &self,
        execution: &ProcessExecution,
        state: &ProcessExecutionState,
    ) -> AppResult<()> {
        let txn = self.db.begin().await?;
        let exec_active = process_executions::ActiveModel {
            id: Set(execution.id),
            recipe_id: Set(execution.recipe_id),
            machine_id: Set(execution.machine_id),
            status: Set(execution_status_str(execution.status).to_string()),
            started_at: Set(execution.started_at),
            completed_at: Set(execution.completed_at),
            operator_id: Set(execution.operator_id),
            session_id: Set(None),
        };
        exec_active.insert(&txn).await?;

        let state_active = process_execution_state::ActiveModel {
            execution_id: Set(state.execution_id),
            current_step_id: Set(state.current_step_id.clone()),
            current_overall_step: Set(state.current_overall_step as i32),
            total_overall_steps: Set(state.total_overall_steps as i32),
            progress_percentage: Set(state.progress_percentage as i16),
            loop_iteration: Set(state.loop_iteration.map(|v| v as i32)),
            step_start_time: Set(state.step_start_time),
            last_updated: Set(state.last_updated),
        };
        state_active.insert(&txn).await?;

        txn.commit().await?;
        Ok(())
    }

    async fn update_execution_state(&self, state: &ProcessExecutionState) -> AppResult<()> {
        let active = process_execution_state::ActiveModel {
            execution_id: Set(state.execution_id),
            current_step_id: Set(state.current_step_id.clone()),
            current_overall_step: Set(state.current_overall_step as i32),
            total_overall_steps: Set(state.total_overall_steps as i32),
            progress_percentage: Set(state.progress_percentage as i16),
            loop_iteration: Set(state.loop_iteration.map(|v| v as i32)),
            step_start_time: Set(state.step_start_time),
            last_updated: Set(state.last_updated),
        };
        process_execution_state::Entity::update(active)
            .filter(process_execution_state::Column::ExecutionId.eq(state.execution_id))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    async fn finish_execution(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        completed_at: chrono::DateTime<Utc>,
    ) -> AppResult<()> {
        process_executions::Entity::update_many()
            .filter(process_executions::Column::Id.eq(execution_id))
            .col_expr(process_executions::Column::Status, sea_orm::sea_query::Expr::value(execution_status_str(status)))
            .col_expr(process_executions::Column::CompletedAt, sea_orm::sea_query::Expr::value(completed_at))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    async fn has_active_execution(&self, machine_id: Uuid) -> AppResult<bool> {
        let count = process_executions::Entity::find()
            .filter(process_executions::Column::MachineId.eq(machine_id))
            .filter(
                process_executions::Column::Status
                    .eq("preparing")
                    .or(process_executions::Column::Status.eq("running")),
            )
            .count(self.db.as_ref())
            .await?;
        Ok(count > 0)
    }
}
