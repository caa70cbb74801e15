//! Stage and cadence moves. Every real change appends a synthetic history row
//! in the same transaction as the lead update.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use entity::{
    contact_history, email_templates,
    leads::{self, Stage},
    scheduled_emails,
};
use platform_db::DbPool;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder, Set, TransactionTrait, sea_query::Expr,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    CrmError, CrmResult,
    history::{cadence_entry, stage_change_entry},
    validate::{Checks, clean},
};

pub const CADENCE_STEPS: [&str; 6] = [
    "Not Started",
    "Intro Email",
    "Follow-up Call",
    "Value Email",
    "Check-in Call",
    "Break-up Email",
];

pub const MAX_CADENCE_STEP: i32 = CADENCE_STEPS.len() as i32 - 1;

pub fn cadence_label(step: i32) -> Option<&'static str> {
    usize::try_from(step)
        .ok()
        .and_then(|idx| CADENCE_STEPS.get(idx).copied())
}

fn stage_labels() -> Vec<&'static str> {
    Stage::ALL.iter().map(|s| s.label()).collect()
}

pub(crate) fn parse_stage(checks: &mut Checks, field: &str, value: Option<String>) -> Option<Stage> {
    let labels = stage_labels();
    checks.one_of(field, value, Stage::from_label, &labels)
}

/// Body of `PATCH /leads/{id}/stage`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct StageRequest {
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl StageRequest {
    pub fn validate(self) -> CrmResult<(Stage, Option<String>)> {
        let mut checks = Checks::default();
        let present = self.stage.as_deref().is_some_and(|s| !s.trim().is_empty());
        let stage = parse_stage(&mut checks, "stage", self.stage);
        if !present {
            checks.fail("stage", "is required");
        }
        checks.finish()?;
        match stage {
            Some(stage) => Ok((stage, clean(self.reason))),
            None => Err(CrmError::invalid("stage", "is required")),
        }
    }
}

/// Body of `PATCH /leads/bulk/stage`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct BulkStageRequest {
    #[serde(default)]
    pub ids: Vec<i32>,
    #[serde(flatten)]
    pub change: StageRequest,
}

#[derive(Clone, Debug, Serialize)]
pub struct StageChange {
    pub lead: leads::Model,
    pub changed: bool,
    pub entry: Option<contact_history::Model>,
}

#[instrument(skip(db, reason))]
pub async fn set_stage(
    db: &DbPool,
    lead_id: i32,
    stage: Stage,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> CrmResult<StageChange> {
    let txn = db.begin().await?;
    let lead = leads::Entity::find_by_id(lead_id)
        .one(&txn)
        .await?
        .ok_or(CrmError::NotFound("lead"))?;
    let change = apply_stage(&txn, lead, stage, reason.as_deref(), now).await?;
    txn.commit().await?;
    Ok(change)
}

/// Moves `lead` to `stage` on `conn`; a same-stage move writes nothing.
pub(crate) async fn apply_stage<C: ConnectionTrait>(
    conn: &C,
    lead: leads::Model,
    stage: Stage,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> CrmResult<StageChange> {
    if lead.stage == stage {
        return Ok(StageChange {
            lead,
            changed: false,
            entry: None,
        });
    }
    let from = lead.stage;
    let lead_id = lead.id;
    let mut active = lead.into_active_model();
    active.stage = Set(stage);
    active.updated_at = Set(now.fixed_offset());
    let lead = active.update(conn).await?;

    let entry = stage_change_entry(lead_id, from, stage, reason, now)
        .insert(conn)
        .await?;
    tracing::info!(lead_id, from = from.label(), to = stage.label(), "stage changed");
    Ok(StageChange {
        lead,
        changed: true,
        entry: Some(entry),
    })
}

/// All-or-nothing: a missing id aborts the batch before anything is written.
#[instrument(skip(db, ids, reason), fields(count = ids.len()))]
pub async fn bulk_set_stage(
    db: &DbPool,
    ids: &[i32],
    stage: Stage,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> CrmResult<Vec<StageChange>> {
    if ids.is_empty() {
        return Err(CrmError::invalid("ids", "must not be empty"));
    }
    let mut seen = HashSet::new();
    let unique: Vec<i32> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();

    let txn = db.begin().await?;
    let found = leads::Entity::find()
        .filter(leads::Column::Id.is_in(unique.clone()))
        .all(&txn)
        .await?;
    if found.len() != unique.len() {
        return Err(CrmError::NotFound("lead"));
    }

    let mut by_id: std::collections::HashMap<i32, leads::Model> =
        found.into_iter().map(|lead| (lead.id, lead)).collect();
    let mut changes = Vec::with_capacity(unique.len());
    for id in unique {
        let lead = by_id.remove(&id).ok_or(CrmError::NotFound("lead"))?;
        changes.push(apply_stage(&txn, lead, stage, reason.as_deref(), now).await?);
    }
    txn.commit().await?;
    Ok(changes)
}

/// Body of `PATCH /leads/{id}/cadence-step`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CadenceRequest {
    #[serde(default)]
    pub step: Option<i32>,
}

impl CadenceRequest {
    pub fn validate(self) -> CrmResult<i32> {
        let step = self
            .step
            .ok_or_else(|| CrmError::invalid("step", "is required"))?;
        check_step(step)?;
        Ok(step)
    }
}

pub(crate) fn check_step(step: i32) -> CrmResult<()> {
    let mut checks = Checks::default();
    checks.range("cadence_step", step, 0, MAX_CADENCE_STEP);
    checks.finish()
}

#[derive(Clone, Debug, Serialize)]
pub struct CadenceAdvance {
    pub lead: leads::Model,
    pub changed: bool,
    pub entry: Option<contact_history::Model>,
    pub scheduled: Option<scheduled_emails::Model>,
    pub cancelled: u64,
}

#[instrument(skip(db))]
pub async fn advance_cadence(
    db: &DbPool,
    lead_id: i32,
    step: i32,
    now: DateTime<Utc>,
) -> CrmResult<CadenceAdvance> {
    check_step(step)?;
    let txn = db.begin().await?;
    let lead = leads::Entity::find_by_id(lead_id)
        .one(&txn)
        .await?
        .ok_or(CrmError::NotFound("lead"))?;
    let advance = apply_cadence(&txn, lead, step, now).await?;
    txn.commit().await?;
    Ok(advance)
}

pub(crate) async fn apply_cadence<C: ConnectionTrait>(
    conn: &C,
    lead: leads::Model,
    step: i32,
    now: DateTime<Utc>,
) -> CrmResult<CadenceAdvance> {
    if lead.cadence_step == step {
        return Ok(CadenceAdvance {
            lead,
            changed: false,
            entry: None,
            scheduled: None,
            cancelled: 0,
        });
    }
    let lead_id = lead.id;
    let mut active = lead.into_active_model();
    active.cadence_step = Set(step);
    active.updated_at = Set(now.fixed_offset());
    let lead = active.update(conn).await?;

    let entry = cadence_entry(lead_id, step, now).insert(conn).await?;

    let cancelled = scheduled_emails::Entity::update_many()
        .col_expr(
            scheduled_emails::Column::Status,
            Expr::value(scheduled_emails::Status::Cancelled),
        )
        .filter(scheduled_emails::Column::LeadId.eq(lead_id))
        .filter(scheduled_emails::Column::Status.eq(scheduled_emails::Status::Pending))
        .exec(conn)
        .await?
        .rows_affected;

    let template = email_templates::Entity::find()
        .filter(email_templates::Column::CadenceStep.eq(step))
        .order_by_desc(email_templates::Column::IsDefault)
        .order_by_asc(email_templates::Column::Id)
        .one(conn)
        .await?;
    let scheduled = match template {
        Some(template) => Some(
            scheduled_emails::ActiveModel {
                lead_id: Set(lead_id),
                template_id: Set(template.id),
                cadence_step: Set(step),
                send_at: Set((now + Duration::days(i64::from(template.delay_days))).fixed_offset()),
                status: Set(scheduled_emails::Status::Pending),
                sent_at: Set(None),
                error: Set(None),
                created_at: Set(now.fixed_offset()),
                ..Default::default()
            }
            .insert(conn)
            .await?,
        ),
        None => None,
    };

    tracing::info!(
        lead_id,
        step,
        cancelled,
        scheduled = scheduled.as_ref().map(|s| s.id),
        "cadence advanced"
    );
    Ok(CadenceAdvance {
        lead,
        changed: true,
        entry: Some(entry),
        scheduled,
        cancelled,
    })
}
