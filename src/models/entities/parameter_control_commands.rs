use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "parameter_control_commands")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub machine_id: Uuid,
    pub component_parameter_id: Option<Uuid>,
    pub parameter_name: Option<String>,
    pub write_modbus_address: Option<i32>,
    /// The command `kind` (`set_parameter`, `open_valve`, ...) plus any
    /// kind-specific fields (valve number, duration, recipe id, ...) live
    /// together in this JSON payload, with `target_value` surfaced as its
    /// own column for set_parameter commands per the documented schema.
    pub kind: String,
    pub target_value: Option<f64>,
    pub data_type: Option<String>,
    pub payload: sea_orm::JsonValue,
    pub timeout_ms: Option<i64>,
    #[sea_orm(column_type = "Text")]
    pub status: String,
    pub error: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
