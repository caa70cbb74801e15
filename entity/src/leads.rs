use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "leads")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(indexed)]
    pub dispensary_name: String,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub contact_name: Option<String>,
    pub manager_name: Option<String>,
    pub owner_name: Option<String>,
    pub phone: Option<String>,
    pub contact_email: Option<String>,
    pub website: Option<String>,
    pub current_pos_system: Option<String>,
    pub deal_value: Option<f64>,
    pub priority: Priority,
    #[sea_orm(indexed)]
    pub stage: Stage,
    pub callback_days: Option<String>,
    pub callback_time_slots: Option<String>,
    pub callback_time_from: Option<String>,
    pub callback_time_to: Option<String>,
    pub next_callback_date: Option<Date>,
    pub cadence_step: i32,
    pub notes: Option<String>,
    pub source: Option<String>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter)]
pub enum Relation {
    ContactHistory,
    Tasks,
    ScheduledEmails,
}

impl RelationTrait for Relation {
    fn def(&self) -> RelationDef {
        match self {
            Self::ContactHistory => Entity::has_many(super::contact_history::Entity).into(),
            Self::Tasks => Entity::has_many(super::tasks::Entity).into(),
            Self::ScheduledEmails => Entity::has_many(super::scheduled_emails::Entity).into(),
        }
    }
}

impl Related<super::contact_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ContactHistory.def()
    }
}

impl Related<super::tasks::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Tasks.def()
    }
}

impl Related<super::scheduled_emails::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ScheduledEmails.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Pipeline stage, in pipeline order.
#[derive(
    Copy, Clone, Debug, EnumIter, DeriveActiveEnum, Eq, PartialEq, Hash, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(Some(32))")]
pub enum Stage {
    #[sea_orm(string_value = "New Lead")]
    #[serde(rename = "New Lead")]
    NewLead,
    #[sea_orm(string_value = "Contacted")]
    #[serde(rename = "Contacted")]
    Contacted,
    #[sea_orm(string_value = "Demo Scheduled")]
    #[serde(rename = "Demo Scheduled")]
    DemoScheduled,
    #[sea_orm(string_value = "Demo Completed")]
    #[serde(rename = "Demo Completed")]
    DemoCompleted,
    #[sea_orm(string_value = "Proposal Sent")]
    #[serde(rename = "Proposal Sent")]
    ProposalSent,
    #[sea_orm(string_value = "Negotiating")]
    #[serde(rename = "Negotiating")]
    Negotiating,
    #[sea_orm(string_value = "Closed Won")]
    #[serde(rename = "Closed Won")]
    ClosedWon,
    #[sea_orm(string_value = "Closed Lost")]
    #[serde(rename = "Closed Lost")]
    ClosedLost,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::NewLead,
        Stage::Contacted,
        Stage::DemoScheduled,
        Stage::DemoCompleted,
        Stage::ProposalSent,
        Stage::Negotiating,
        Stage::ClosedWon,
        Stage::ClosedLost,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Stage::NewLead => "New Lead",
            Stage::Contacted => "Contacted",
            Stage::DemoScheduled => "Demo Scheduled",
            Stage::DemoCompleted => "Demo Completed",
            Stage::ProposalSent => "Proposal Sent",
            Stage::Negotiating => "Negotiating",
            Stage::ClosedWon => "Closed Won",
            Stage::ClosedLost => "Closed Lost",
        }
    }

    /// Exact label match, ignoring surrounding whitespace and case.
    pub fn from_label(value: &str) -> Option<Stage> {
        let wanted = value.trim();
        Stage::ALL
            .into_iter()
            .find(|stage| stage.label().eq_ignore_ascii_case(wanted))
    }

    pub fn is_closed(self) -> bool {
        matches!(self, Stage::ClosedWon | Stage::ClosedLost)
    }
}

#[derive(
    Copy, Clone, Debug, EnumIter, DeriveActiveEnum, Eq, PartialEq, Hash, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(Some(16))")]
pub enum Priority {
    #[sea_orm(string_value = "Low")]
    Low,
    #[sea_orm(string_value = "Medium")]
    Medium,
    #[sea_orm(string_value = "High")]
    High,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::Low, Priority::Medium, Priority::High];

    pub fn label(self) -> &'static str {
        match self {
            Priority::Low => "Low",
            Priority::Medium => "Medium",
            Priority::High => "High",
        }
    }

    pub fn from_label(value: &str) -> Option<Priority> {
        let wanted = value.trim();
        Priority::ALL
            .into_iter()
            .find(|priority| priority.label().eq_ignore_ascii_case(wanted))
    }
}
