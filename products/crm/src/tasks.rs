//! Follow-up tasks and the stale-lead reminder generator.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use entity::{
    contact_history::Kind,
    leads::{self, Priority, Stage},
    tasks::{self, Source, Status},
};
use platform_db::DbPool;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, IntoActiveModel, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    CrmError, CrmResult, history,
    scoring::{Heat, score_lead},
    validate::{Checks, today},
};

const TITLE_MAX: usize = 200;
const DESCRIPTION_MAX: usize = 2000;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct TaskInput {
    pub lead_id: Option<i32>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub due_date: Option<String>,
    pub due_time: Option<String>,
    pub priority: Option<String>,
    pub status: Option<String>,
}

fn parse_status(value: &str) -> Option<Status> {
    match value.trim().to_ascii_lowercase().as_str() {
        "pending" => Some(Status::Pending),
        "completed" => Some(Status::Completed),
        _ => None,
    }
}

fn priority_labels() -> Vec<&'static str> {
    Priority::ALL.iter().map(|p| p.label()).collect()
}

#[derive(Clone, Debug, Serialize)]
pub struct TaskView {
    #[serde(flatten)]
    pub task: tasks::Model,
    pub dispensary_name: Option<String>,
}

/// Query string of `GET /tasks`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct TaskFilter {
    pub status: Option<String>,
    pub lead_id: Option<i32>,
}

/// Pending first, then by due date (undated last), then id.
fn task_order(a: &tasks::Model, b: &tasks::Model) -> std::cmp::Ordering {
    let pending = |t: &tasks::Model| t.status != Status::Pending;
    pending(a)
        .cmp(&pending(b))
        .then_with(|| match (a.due_date, b.due_date) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        })
        .then_with(|| a.due_time.cmp(&b.due_time))
        .then(a.id.cmp(&b.id))
}

#[instrument(skip(db, filter))]
pub async fn list(db: &DbPool, filter: TaskFilter) -> CrmResult<Vec<TaskView>> {
    let mut checks = Checks::default();
    let status = checks.one_of("status", filter.status, parse_status, &["pending", "completed"]);
    checks.finish()?;

    let mut query = tasks::Entity::find().find_also_related(leads::Entity);
    if let Some(status) = status {
        query = query.filter(tasks::Column::Status.eq(status));
    }
    if let Some(lead_id) = filter.lead_id {
        query = query.filter(tasks::Column::LeadId.eq(lead_id));
    }
    let mut rows = query.all(db).await?;
    rows.sort_by(|(a, _), (b, _)| task_order(a, b));
    Ok(rows
        .into_iter()
        .map(|(task, lead)| TaskView {
            task,
            dispensary_name: lead.map(|l| l.dispensary_name),
        })
        .collect())
}

async fn view(db: &DbPool, task: tasks::Model) -> CrmResult<TaskView> {
    let lead = leads::Entity::find_by_id(task.lead_id).one(db).await?;
    Ok(TaskView {
        task,
        dispensary_name: lead.map(|l| l.dispensary_name),
    })
}

pub async fn get(db: &DbPool, id: i32) -> CrmResult<TaskView> {
    let task = tasks::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or(CrmError::NotFound("task"))?;
    view(db, task).await
}

#[instrument(skip(db, input))]
pub async fn create(db: &DbPool, input: TaskInput, now: DateTime<Utc>) -> CrmResult<TaskView> {
    let mut checks = Checks::default();
    if input.lead_id.is_none() {
        checks.fail("lead_id", "is required");
    }
    let title = checks.required("title", input.title, TITLE_MAX);
    let description = checks.optional("description", input.description, DESCRIPTION_MAX);
    let due_date = checks.date("due_date", input.due_date);
    let due_time = checks.time_of_day("due_time", input.due_time);
    let priority = checks
        .one_of("priority", input.priority, Priority::from_label, &priority_labels())
        .unwrap_or(Priority::Medium);
    let status = checks
        .one_of("status", input.status, parse_status, &["pending", "completed"])
        .unwrap_or(Status::Pending);
    checks.finish()?;

    let lead_id = input
        .lead_id
        .ok_or_else(|| CrmError::invalid("lead_id", "is required"))?;
    leads::Entity::find_by_id(lead_id)
        .one(db)
        .await?
        .ok_or(CrmError::NotFound("lead"))?;

    let at = now.fixed_offset();
    let task = tasks::ActiveModel {
        lead_id: Set(lead_id),
        title: Set(title),
        description: Set(description),
        due_date: Set(due_date),
        due_time: Set(due_time),
        priority: Set(priority),
        status: Set(status),
        source: Set(Source::Manual),
        completed_at: Set((status == Status::Completed).then_some(at)),
        created_at: Set(at),
        updated_at: Set(at),
        ..Default::default()
    }
    .insert(db)
    .await?;
    tracing::info!(task_id = task.id, lead_id, "task created");
    view(db, task).await
}

/// Absent fields are kept; blank description, date or time clears them.
#[instrument(skip(db, input))]
pub async fn update(
    db: &DbPool,
    id: i32,
    input: TaskInput,
    now: DateTime<Utc>,
) -> CrmResult<TaskView> {
    let task = tasks::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or(CrmError::NotFound("task"))?;

    let mut checks = Checks::default();
    let current = task.status;
    let mut active = task.into_active_model();
    if input.title.is_some() {
        active.title = Set(checks.required("title", input.title, TITLE_MAX));
    }
    if input.description.is_some() {
        active.description = Set(checks.optional("description", input.description, DESCRIPTION_MAX));
    }
    if input.due_date.is_some() {
        active.due_date = Set(checks.date("due_date", input.due_date));
    }
    if input.due_time.is_some() {
        active.due_time = Set(checks.time_of_day("due_time", input.due_time));
    }
    if let Some(priority) =
        checks.one_of("priority", input.priority, Priority::from_label, &priority_labels())
    {
        active.priority = Set(priority);
    }
    if let Some(status) = checks.one_of("status", input.status, parse_status, &["pending", "completed"]) {
        apply_status(&mut active, current, status, now);
    }
    if let Some(lead_id) = input.lead_id {
        leads::Entity::find_by_id(lead_id)
            .one(db)
            .await?
            .ok_or(CrmError::NotFound("lead"))?;
        active.lead_id = Set(lead_id);
    }
    checks.finish()?;

    active.updated_at = Set(now.fixed_offset());
    let task = active.update(db).await?;
    view(db, task).await
}

fn apply_status(active: &mut tasks::ActiveModel, was: Status, status: Status, now: DateTime<Utc>) {
    if was == status {
        return;
    }
    active.status = Set(status);
    active.completed_at = Set((status == Status::Completed).then_some(now.fixed_offset()));
}

/// Flips pending and completed.
#[instrument(skip(db))]
pub async fn toggle(db: &DbPool, id: i32, now: DateTime<Utc>) -> CrmResult<TaskView> {
    let task = tasks::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or(CrmError::NotFound("task"))?;
    let was = task.status;
    let next = match was {
        Status::Pending => Status::Completed,
        Status::Completed => Status::Pending,
    };
    let mut active = task.into_active_model();
    apply_status(&mut active, was, next, now);
    active.updated_at = Set(now.fixed_offset());
    let task = active.update(db).await?;
    view(db, task).await
}

pub async fn delete(db: &DbPool, id: i32) -> CrmResult<()> {
    let result = tasks::Entity::delete_by_id(id).exec(db).await?;
    if result.rows_affected == 0 {
        return Err(CrmError::NotFound("task"));
    }
    Ok(())
}

/// Days without activity before an open lead in `stage` gets a reminder.
pub fn stale_after_days(stage: Stage) -> Option<i64> {
    match stage {
        Stage::NewLead => Some(3),
        Stage::Contacted => Some(5),
        Stage::DemoScheduled => Some(2),
        Stage::DemoCompleted => Some(3),
        Stage::ProposalSent => Some(4),
        Stage::Negotiating => Some(3),
        Stage::ClosedWon | Stage::ClosedLost => None,
    }
}

pub fn reminder_title(dispensary_name: &str) -> String {
    format!("Follow up with {dispensary_name}")
}

#[derive(Clone, Debug, Serialize)]
pub struct ReminderRun {
    pub created: Vec<tasks::Model>,
    pub checked: usize,
}

/// Creates one reminder per stale open lead that does not already have a
/// pending one. Activity is the newest history entry of any kind, or the
/// lead's creation time.
#[instrument(skip(db))]
pub async fn generate_reminders(db: &DbPool, now: DateTime<Utc>) -> CrmResult<ReminderRun> {
    let open = leads::Entity::find()
        .filter(leads::Column::Stage.is_not_in([Stage::ClosedWon, Stage::ClosedLost]))
        .order_by_asc(leads::Column::Id)
        .all(db)
        .await?;
    let last_activity = history::latest_by_lead(db, None).await?;
    let last_contact = history::latest_by_lead(db, Some(Kind::Contact)).await?;
    let already: HashSet<i32> = tasks::Entity::find()
        .filter(tasks::Column::Source.eq(Source::AutoReminder))
        .filter(tasks::Column::Status.eq(Status::Pending))
        .all(db)
        .await?
        .into_iter()
        .map(|task| task.lead_id)
        .collect();

    let checked = open.len();
    let mut created = Vec::new();
    for lead in open {
        let Some(threshold) = stale_after_days(lead.stage) else {
            continue;
        };
        if already.contains(&lead.id) {
            continue;
        }
        let active_at = last_activity
            .get(&lead.id)
            .copied()
            .unwrap_or(lead.created_at);
        let idle_days = now
            .signed_duration_since(active_at.with_timezone(&Utc))
            .num_days();
        if idle_days <= threshold {
            continue;
        }

        let heat = score_lead(&lead, last_contact.get(&lead.id).copied(), now).heat;
        let at = now.fixed_offset();
        let task = tasks::ActiveModel {
            lead_id: Set(lead.id),
            title: Set(reminder_title(&lead.dispensary_name)),
            description: Set(Some(format!(
                "No activity for {idle_days} days while in {}",
                lead.stage.label()
            ))),
            due_date: Set(Some(today(now))),
            due_time: Set(None),
            priority: Set(if heat == Heat::Hot {
                Priority::High
            } else {
                Priority::Medium
            }),
            status: Set(Status::Pending),
            source: Set(Source::AutoReminder),
            completed_at: Set(None),
            created_at: Set(at),
            updated_at: Set(at),
            ..Default::default()
        }
        .insert(db)
        .await?;
        created.push(task);
    }

    tracing::info!(checked, created = created.len(), "reminder sweep finished");
    Ok(ReminderRun { created, checked })
}

/// Tasks due today and overdue, pending only.
pub(crate) fn due_counts(tasks: &[tasks::Model], now: DateTime<Utc>) -> (usize, usize) {
    let today = today(now);
    tasks
        .iter()
        .filter(|t| t.status == Status::Pending)
        .filter_map(|t| t.due_date)
        .fold((0, 0), |(due, overdue), date| {
            if date == today {
                (due + 1, overdue)
            } else if date < today {
                (due, overdue + 1)
            } else {
                (due, overdue)
            }
        })
}
