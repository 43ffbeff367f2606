use sea_orm::entity::prelude::*;

/// Config for a `parameter` step. Not named in the specification's list of
/// step-config tables (which enumerates `valve_step_config`,
/// `purge_step_config`, `loop_step_config`), but the `parameter` step kind
/// needs the same kind of side table as the other three — added by analogy.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "parameter_step_config")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub step_id: Uuid,
    pub parameter_id: Uuid,
    pub value: f64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
