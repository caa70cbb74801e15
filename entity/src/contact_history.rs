use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::leads::Stage;

/// Append-only log of interactions and system transitions for one lead.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "contact_history")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(indexed)]
    pub lead_id: i32,
    pub method: Method,
    pub kind: Kind,
    pub notes: Option<String>,
    pub outcome: Option<String>,
    pub next_callback: Option<DateTimeWithTimeZone>,
    pub email_template_id: Option<i32>,
    pub email_subject: Option<String>,
    pub from_stage: Option<Stage>,
    pub to_stage: Option<Stage>,
    pub cadence_step: Option<i32>,
    pub contacted_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::leads::Entity",
        from = "Column::LeadId",
        to = "super::leads::Column::Id",
        on_delete = "Cascade"
    )]
    Lead,
    #[sea_orm(
        belongs_to = "super::email_templates::Entity",
        from = "Column::EmailTemplateId",
        to = "super::email_templates::Column::Id",
        on_delete = "SetNull"
    )]
    EmailTemplate,
}

impl Related<super::leads::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Lead.def()
    }
}

impl Related<super::email_templates::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::EmailTemplate.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(
    Copy, Clone, Debug, EnumIter, DeriveActiveEnum, Eq, PartialEq, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(Some(16))")]
pub enum Method {
    #[sea_orm(string_value = "Phone")]
    Phone,
    #[sea_orm(string_value = "Email")]
    Email,
    #[sea_orm(string_value = "In-Person")]
    #[serde(rename = "In-Person")]
    InPerson,
    #[sea_orm(string_value = "Text")]
    Text,
    #[sea_orm(string_value = "Other")]
    Other,
}

impl Method {
    pub const ALL: [Method; 5] = [
        Method::Phone,
        Method::Email,
        Method::InPerson,
        Method::Text,
        Method::Other,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Method::Phone => "Phone",
            Method::Email => "Email",
            Method::InPerson => "In-Person",
            Method::Text => "Text",
            Method::Other => "Other",
        }
    }

    pub fn from_label(value: &str) -> Option<Method> {
        let wanted = value.trim();
        Method::ALL
            .into_iter()
            .find(|method| method.label().eq_ignore_ascii_case(wanted))
    }
}

/// Structured form of an entry; `notes` keeps the human-readable rendering.
#[derive(
    Copy, Clone, Debug, EnumIter, DeriveActiveEnum, Eq, PartialEq, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(Some(32))")]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    #[sea_orm(string_value = "contact")]
    Contact,
    #[sea_orm(string_value = "stage_change")]
    StageChange,
    #[sea_orm(string_value = "cadence_advance")]
    CadenceAdvance,
    #[sea_orm(string_value = "merge")]
    Merge,
}
