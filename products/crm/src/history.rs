//! Append-only contact history.
//!
//! Rows are only ever inserted. Synthetic rows for stage changes, cadence
//! advances and merges carry a structured `kind` plus the readable note.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, Utc};
use entity::{
    contact_history::{self, Kind, Method},
    email_templates,
    leads::{self, Stage},
};
use platform_db::DbPool;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, IntoActiveModel,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{CrmError, CrmResult, transitions::cadence_label, validate::Checks};

const NOTES_MAX: usize = 5000;
const OUTCOME_MAX: usize = 255;

pub fn stage_change_note(from: Stage, to: Stage) -> String {
    format!("Stage changed from \"{}\" to \"{}\"", from.label(), to.label())
}

pub fn cadence_note(step: i32) -> String {
    format!(
        "Cadence advanced to Step {step}: {}",
        cadence_label(step).unwrap_or("Unknown")
    )
}

/// `reason` only survives for moves into a closed stage.
pub fn stage_change_outcome(to: Stage, reason: Option<&str>) -> String {
    match reason.map(str::trim).filter(|r| !r.is_empty()) {
        Some(reason) if to.is_closed() => reason.to_string(),
        _ => format!("Stage: {}", to.label()),
    }
}

fn synthetic(lead_id: i32, kind: Kind, at: DateTime<Utc>) -> contact_history::ActiveModel {
    contact_history::ActiveModel {
        lead_id: Set(lead_id),
        method: Set(Method::Other),
        kind: Set(kind),
        notes: Set(None),
        outcome: Set(None),
        next_callback: Set(None),
        email_template_id: Set(None),
        email_subject: Set(None),
        from_stage: Set(None),
        to_stage: Set(None),
        cadence_step: Set(None),
        contacted_at: Set(at.fixed_offset()),
        ..Default::default()
    }
}

pub(crate) fn stage_change_entry(
    lead_id: i32,
    from: Stage,
    to: Stage,
    reason: Option<&str>,
    at: DateTime<Utc>,
) -> contact_history::ActiveModel {
    contact_history::ActiveModel {
        notes: Set(Some(stage_change_note(from, to))),
        outcome: Set(Some(stage_change_outcome(to, reason))),
        from_stage: Set(Some(from)),
        to_stage: Set(Some(to)),
        ..synthetic(lead_id, Kind::StageChange, at)
    }
}

pub(crate) fn cadence_entry(lead_id: i32, step: i32, at: DateTime<Utc>) -> contact_history::ActiveModel {
    contact_history::ActiveModel {
        notes: Set(Some(cadence_note(step))),
        cadence_step: Set(Some(step)),
        ..synthetic(lead_id, Kind::CadenceAdvance, at)
    }
}

pub(crate) fn merge_entry(
    keep_id: i32,
    merged: &leads::Model,
    copied: &[&str],
    at: DateTime<Utc>,
) -> contact_history::ActiveModel {
    let outcome = if copied.is_empty() {
        "No fields copied".to_string()
    } else {
        format!("Fields copied: {}", copied.join(", "))
    };
    contact_history::ActiveModel {
        notes: Set(Some(format!(
            "Merged duplicate lead \"{}\" (#{})",
            merged.dispensary_name, merged.id
        ))),
        outcome: Set(Some(outcome)),
        ..synthetic(keep_id, Kind::Merge, at)
    }
}

/// Record of an email that actually went out.
pub(crate) fn email_entry(
    lead_id: i32,
    template_id: Option<i32>,
    subject: &str,
    outcome: String,
    at: DateTime<Utc>,
) -> contact_history::ActiveModel {
    contact_history::ActiveModel {
        method: Set(Method::Email),
        notes: Set(Some(format!("Email sent: {subject}"))),
        outcome: Set(Some(outcome)),
        email_template_id: Set(template_id),
        email_subject: Set(Some(subject.to_string())),
        ..synthetic(lead_id, Kind::Contact, at)
    }
}

/// Structured reading of a history row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryEvent {
    Contact,
    StageChange { from: Option<Stage>, to: Option<Stage> },
    CadenceAdvance { step: Option<i32>, label: Option<&'static str> },
    Merge,
}

impl HistoryEvent {
    pub fn of(entry: &contact_history::Model) -> Self {
        match entry.kind {
            Kind::Contact => HistoryEvent::Contact,
            Kind::StageChange => HistoryEvent::StageChange {
                from: entry.from_stage,
                to: entry.to_stage,
            },
            Kind::CadenceAdvance => HistoryEvent::CadenceAdvance {
                step: entry.cadence_step,
                label: entry.cadence_step.and_then(cadence_label),
            },
            Kind::Merge => HistoryEvent::Merge,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct HistoryView {
    pub id: i32,
    pub lead_id: i32,
    pub method: Method,
    pub notes: Option<String>,
    pub outcome: Option<String>,
    pub next_callback: Option<DateTime<FixedOffset>>,
    pub email_template_id: Option<i32>,
    pub email_subject: Option<String>,
    pub contacted_at: DateTime<FixedOffset>,
    pub event: HistoryEvent,
}

impl From<contact_history::Model> for HistoryView {
    fn from(entry: contact_history::Model) -> Self {
        let event = HistoryEvent::of(&entry);
        Self {
            id: entry.id,
            lead_id: entry.lead_id,
            method: entry.method,
            notes: entry.notes,
            outcome: entry.outcome,
            next_callback: entry.next_callback,
            email_template_id: entry.email_template_id,
            email_subject: entry.email_subject,
            contacted_at: entry.contacted_at,
            event,
        }
    }
}

/// Body of `POST /leads/{id}/history`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ContactInput {
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub next_callback: Option<String>,
    #[serde(default)]
    pub email_template_id: Option<i32>,
    #[serde(default)]
    pub email_subject: Option<String>,
    #[serde(default)]
    pub contacted_at: Option<String>,
}

struct NewContact {
    method: Method,
    notes: Option<String>,
    outcome: Option<String>,
    next_callback: Option<DateTime<FixedOffset>>,
    email_template_id: Option<i32>,
    email_subject: Option<String>,
    contacted_at: Option<DateTime<FixedOffset>>,
}

impl ContactInput {
    fn validate(self) -> CrmResult<NewContact> {
        let mut checks = Checks::default();
        let labels: Vec<&str> = Method::ALL.iter().map(|m| m.label()).collect();
        let method = checks
            .one_of("method", self.method, Method::from_label, &labels)
            .unwrap_or(Method::Phone);
        let contact = NewContact {
            method,
            notes: checks.optional("notes", self.notes, NOTES_MAX),
            outcome: checks.optional("outcome", self.outcome, OUTCOME_MAX),
            next_callback: checks.timestamp("next_callback", self.next_callback),
            email_template_id: self.email_template_id,
            email_subject: checks.optional("email_subject", self.email_subject, OUTCOME_MAX),
            contacted_at: checks.timestamp("contacted_at", self.contacted_at),
        };
        checks.finish()?;
        Ok(contact)
    }
}

/// Logs a manual interaction. A next-callback time also moves the lead's
/// `next_callback_date`.
#[instrument(skip(db, input))]
pub async fn log_contact(
    db: &DbPool,
    lead_id: i32,
    input: ContactInput,
    now: DateTime<Utc>,
) -> CrmResult<HistoryView> {
    let contact = input.validate()?;
    let txn = db.begin().await?;
    let lead = leads::Entity::find_by_id(lead_id)
        .one(&txn)
        .await?
        .ok_or(CrmError::NotFound("lead"))?;
    if let Some(template_id) = contact.email_template_id {
        if email_templates::Entity::find_by_id(template_id)
            .one(&txn)
            .await?
            .is_none()
        {
            return Err(CrmError::invalid("email_template_id", "does not exist"));
        }
    }

    let entry = contact_history::ActiveModel {
        lead_id: Set(lead_id),
        method: Set(contact.method),
        kind: Set(Kind::Contact),
        notes: Set(contact.notes),
        outcome: Set(contact.outcome),
        next_callback: Set(contact.next_callback),
        email_template_id: Set(contact.email_template_id),
        email_subject: Set(contact.email_subject),
        from_stage: Set(None),
        to_stage: Set(None),
        cadence_step: Set(None),
        contacted_at: Set(contact.contacted_at.unwrap_or_else(|| now.fixed_offset())),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    if let Some(callback) = contact.next_callback {
        let mut active = lead.into_active_model();
        active.next_callback_date = Set(Some(callback.date_naive()));
        active.updated_at = Set(now.fixed_offset());
        active.update(&txn).await?;
    }

    txn.commit().await?;
    tracing::info!(lead_id, entry_id = entry.id, "contact logged");
    Ok(entry.into())
}

/// Newest first.
pub async fn list_history(db: &DbPool, lead_id: i32) -> CrmResult<Vec<HistoryView>> {
    leads::Entity::find_by_id(lead_id)
        .one(db)
        .await?
        .ok_or(CrmError::NotFound("lead"))?;
    Ok(entries_for(db, lead_id)
        .await?
        .into_iter()
        .map(HistoryView::from)
        .collect())
}

pub(crate) async fn entries_for<C: ConnectionTrait>(
    conn: &C,
    lead_id: i32,
) -> Result<Vec<contact_history::Model>, DbErr> {
    contact_history::Entity::find()
        .filter(contact_history::Column::LeadId.eq(lead_id))
        .order_by_desc(contact_history::Column::ContactedAt)
        .order_by_desc(contact_history::Column::Id)
        .all(conn)
        .await
}

/// Most recent entry time per lead, optionally restricted to one kind.
pub(crate) async fn latest_by_lead<C: ConnectionTrait>(
    conn: &C,
    kind: Option<Kind>,
) -> Result<HashMap<i32, DateTime<FixedOffset>>, DbErr> {
    let mut query = contact_history::Entity::find()
        .select_only()
        .column(contact_history::Column::LeadId)
        .column(contact_history::Column::ContactedAt);
    if let Some(kind) = kind {
        query = query.filter(contact_history::Column::Kind.eq(kind));
    }
    let rows: Vec<(i32, DateTime<FixedOffset>)> = query.into_tuple().all(conn).await?;
    Ok(latest_per_key(rows))
}

pub(crate) fn latest_per_key(
    rows: impl IntoIterator<Item = (i32, DateTime<FixedOffset>)>,
) -> HashMap<i32, DateTime<FixedOffset>> {
    let mut latest: HashMap<i32, DateTime<FixedOffset>> = HashMap::new();
    for (lead_id, at) in rows {
        latest
            .entry(lead_id)
            .and_modify(|seen| {
                if at > *seen {
                    *seen = at;
                }
            })
            .or_insert(at);
    }
    latest
}

/// Last substantive contact for one lead; transitions and merges do not count.
pub(crate) async fn last_contact<C: ConnectionTrait>(
    conn: &C,
    lead_id: i32,
) -> Result<Option<DateTime<FixedOffset>>, DbErr> {
    let latest = contact_history::Entity::find()
        .filter(contact_history::Column::LeadId.eq(lead_id))
        .filter(contact_history::Column::Kind.eq(Kind::Contact))
        .order_by_desc(contact_history::Column::ContactedAt)
        .one(conn)
        .await?;
    Ok(latest.map(|entry| entry.contacted_at))
}
