use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "email_templates")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub name: String,
    pub subject: String,
    #[sea_orm(column_type = "Text")]
    pub body: String,
    pub category: Option<String>,
    #[sea_orm(indexed)]
    pub cadence_step: Option<i32>,
    pub delay_days: i32,
    pub is_default: bool,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter)]
pub enum Relation {
    ScheduledEmails,
}

impl RelationTrait for Relation {
    fn def(&self) -> RelationDef {
        match self {
            Self::ScheduledEmails => Entity::has_many(super::scheduled_emails::Entity).into(),
        }
    }
}

impl Related<super::scheduled_emails::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ScheduledEmails.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
