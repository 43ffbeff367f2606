use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "process_execution_state")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub execution_id: Uuid,
    pub current_step_id: Option<String>,
    pub current_overall_step: i32,
    pub total_overall_steps: i32,
    pub progress_percentage: i16,
    pub loop_iteration: Option<i32>,
    pub step_start_time: Option<DateTimeUtc>,
    pub last_updated: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::process_executions::Entity",
        from = "Column::ExecutionId",
        to = "super::process_executions::Column::Id"
    )]
    Execution,
}

impl Related<super::process_executions::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Execution.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
