use sea_orm::entity::prelude::*;

/// `component_parameters`, joined with `component_parameter_definitions`
/// by the registry to recover `name` / `unit` / `description`.
///
/// `modbus_type` and `data_type` are stored as text (`holding`/`coil` and
/// `float32`/`int32`/`int16`/`binary` respectively) rather than integers so
/// the column values stay human-readable in ad-hoc SQL against the control
/// plane database.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "component_parameters")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Not named in the documented schema fragment, but the registry load
    /// is specified as "for the machine" — added so that filter has a
    /// column to run against, same reasoning as `is_critical` below.
    pub machine_id: Uuid,
    pub component_id: Uuid,
    pub definition_id: Uuid,
    pub modbus_address: Option<i32>,
    pub write_modbus_address: Option<i32>,
    #[sea_orm(column_type = "Text")]
    pub modbus_type: String,
    #[sea_orm(column_type = "Text")]
    pub data_type: String,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub current_value: Option<f64>,
    pub set_value: Option<f64>,
    pub is_writable: bool,
    pub is_critical: bool,
    /// Design Note 9 calls for accepting an explicit valve number in
    /// preference to the regex match on `name` — not in the documented
    /// schema fragment, so this column is added by the same reasoning as
    /// `is_critical` above.
    pub valve_number: Option<i32>,
    /// The purge actuator flag §4.D refers to; same reasoning as
    /// `valve_number` above.
    pub is_purge_actuator: bool,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::component_parameter_definitions::Entity",
        from = "Column::DefinitionId",
        to = "super::component_parameter_definitions::Column::Id"
    )]
    Definition,
}

impl Related<super::component_parameter_definitions::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Definition.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
