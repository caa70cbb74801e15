//! Atomic merge of a duplicate lead into the one that survives.

use chrono::{DateTime, Utc};
use entity::{contact_history, leads, scheduled_emails, tasks};
use platform_db::DbPool;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, IntoActiveModel, ModelTrait, QueryFilter, Set,
    TransactionTrait, sea_query::Expr,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{CrmError, CrmResult, history::merge_entry};

/// Fields that may be taken from the merged lead. Stage and cadence are
/// excluded: they only move through the transition log.
pub const MERGEABLE_FIELDS: [&str; 21] = [
    "dispensary_name",
    "address",
    "city",
    "state",
    "zip",
    "contact_name",
    "manager_name",
    "owner_name",
    "phone",
    "contact_email",
    "website",
    "current_pos_system",
    "deal_value",
    "priority",
    "callback_days",
    "callback_time_slots",
    "callback_time_from",
    "callback_time_to",
    "next_callback_date",
    "notes",
    "source",
];

fn mergeable_column(name: &str) -> Option<leads::Column> {
    use leads::Column as C;
    let column = match name {
        "dispensary_name" => C::DispensaryName,
        "address" => C::Address,
        "city" => C::City,
        "state" => C::State,
        "zip" => C::Zip,
        "contact_name" => C::ContactName,
        "manager_name" => C::ManagerName,
        "owner_name" => C::OwnerName,
        "phone" => C::Phone,
        "contact_email" => C::ContactEmail,
        "website" => C::Website,
        "current_pos_system" => C::CurrentPosSystem,
        "deal_value" => C::DealValue,
        "priority" => C::Priority,
        "callback_days" => C::CallbackDays,
        "callback_time_slots" => C::CallbackTimeSlots,
        "callback_time_from" => C::CallbackTimeFrom,
        "callback_time_to" => C::CallbackTimeTo,
        "next_callback_date" => C::NextCallbackDate,
        "notes" => C::Notes,
        "source" => C::Source,
        _ => return None,
    };
    Some(column)
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct MergeRequest {
    pub keep_id: i32,
    pub merge_id: i32,
    /// Field names to take from the merged lead; unknown names are ignored.
    #[serde(default)]
    pub fields_from_merge: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct MergeOutcome {
    pub lead: leads::Model,
    pub merged_id: i32,
    pub fields_copied: Vec<String>,
    pub history_moved: u64,
    pub tasks_moved: u64,
    pub scheduled_moved: u64,
}

#[instrument(skip(db, request), fields(keep_id = request.keep_id, merge_id = request.merge_id))]
pub async fn merge_leads(
    db: &DbPool,
    request: &MergeRequest,
    now: DateTime<Utc>,
) -> CrmResult<MergeOutcome> {
    let (keep_id, merge_id) = (request.keep_id, request.merge_id);
    if keep_id == merge_id {
        return Err(CrmError::invalid("merge_id", "must differ from keep_id"));
    }

    let txn = db.begin().await?;
    let keep = leads::Entity::find_by_id(keep_id)
        .one(&txn)
        .await?
        .ok_or(CrmError::NotFound("lead"))?;
    let merged = leads::Entity::find_by_id(merge_id)
        .one(&txn)
        .await?
        .ok_or(CrmError::NotFound("lead"))?;

    let mut copied: Vec<&'static str> = Vec::new();
    let mut active = keep.into_active_model();
    for name in MERGEABLE_FIELDS {
        if !request.fields_from_merge.iter().any(|f| f.trim() == name) {
            continue;
        }
        if let Some(column) = mergeable_column(name) {
            active.set(column, merged.get(column));
            copied.push(name);
        }
    }
    active.updated_at = Set(now.fixed_offset());
    let lead = active.update(&txn).await?;

    let history_moved = contact_history::Entity::update_many()
        .col_expr(contact_history::Column::LeadId, Expr::value(keep_id))
        .filter(contact_history::Column::LeadId.eq(merge_id))
        .exec(&txn)
        .await?
        .rows_affected;
    let tasks_moved = tasks::Entity::update_many()
        .col_expr(tasks::Column::LeadId, Expr::value(keep_id))
        .filter(tasks::Column::LeadId.eq(merge_id))
        .exec(&txn)
        .await?
        .rows_affected;
    let scheduled_moved = scheduled_emails::Entity::update_many()
        .col_expr(scheduled_emails::Column::LeadId, Expr::value(keep_id))
        .filter(scheduled_emails::Column::LeadId.eq(merge_id))
        .exec(&txn)
        .await?
        .rows_affected;

    merge_entry(keep_id, &merged, &copied, now)
        .insert(&txn)
        .await?;
    leads::Entity::delete_by_id(merge_id).exec(&txn).await?;
    txn.commit().await?;

    tracing::info!(
        history_moved,
        tasks_moved,
        scheduled_moved,
        fields = copied.len(),
        "leads merged"
    );
    Ok(MergeOutcome {
        lead,
        merged_id: merge_id,
        fields_copied: copied.into_iter().map(str::to_string).collect(),
        history_moved,
        tasks_moved,
        scheduled_moved,
    })
}
