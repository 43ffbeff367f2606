use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "component_parameter_definitions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub unit: Option<String>,
    pub description: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::component_parameters::Entity")]
    ComponentParameters,
}

impl Related<super::component_parameters::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ComponentParameters.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
