//! Lead repository: CRUD, listing with live scores, bulk import and export.

use std::cmp::Ordering;

use chrono::{DateTime, FixedOffset, Utc};
use entity::{
    contact_history::Kind,
    leads::{self, Priority, Stage},
    scheduled_emails, tasks,
};
use platform_api::FieldError;
use platform_db::DbPool;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, IdenStatic,
    IntoActiveModel, QueryFilter, QueryOrder, Set, TransactionTrait, Value,
    sea_query::{Expr, Func},
};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::instrument;

use crate::{
    CrmError, CrmResult,
    dedup::{DedupKeys, DuplicateIndex, MatchField},
    history::{self, HistoryView},
    scoring::{Heat, score_lead},
    tabular::write_csv,
    transitions::{MAX_CADENCE_STEP, apply_cadence, apply_stage, cadence_label, parse_stage},
    validate::{Checks, clean},
};

const NAME_MAX: usize = 200;
const SHORT_MAX: usize = 120;
const LONG_MAX: usize = 255;
const NOTES_MAX: usize = 5000;

const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Lead fields as they arrive over the wire or from an import row.
///
/// On update an absent or `null` field is left alone and an empty string
/// clears it.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LeadInput {
    pub dispensary_name: Option<String>,
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
    /// Number or money-like string (`"$1,200"`).
    pub deal_value: Option<Json>,
    pub priority: Option<String>,
    pub stage: Option<String>,
    /// Recorded as the outcome when `stage` moves the lead to a closed stage.
    pub stage_reason: Option<String>,
    pub callback_days: Option<String>,
    pub callback_time_slots: Option<String>,
    pub callback_time_from: Option<String>,
    pub callback_time_to: Option<String>,
    pub next_callback_date: Option<String>,
    pub cadence_step: Option<i32>,
    pub notes: Option<String>,
    pub source: Option<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Mode {
    Create,
    Update,
}

/// Validated column writes plus the two fields that move through the
/// transition log.
#[derive(Debug, Default)]
struct LeadChanges {
    values: Vec<(leads::Column, Value)>,
    stage: Option<Stage>,
    stage_reason: Option<String>,
    cadence_step: Option<i32>,
}

impl LeadChanges {
    fn get(&self, column: leads::Column) -> Option<&Value> {
        self.values
            .iter()
            .find(|(c, _)| c.as_str() == column.as_str())
            .map(|(_, value)| value)
    }
}

fn text(
    checks: &mut Checks,
    out: &mut Vec<(leads::Column, Value)>,
    column: leads::Column,
    field: &str,
    value: Option<String>,
    max: usize,
) {
    if value.is_some() {
        out.push((column, checks.optional(field, value, max).into()));
    }
}

fn looks_like_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains('@')
        && !value.chars().any(char::is_whitespace)
}

/// Accepts plain numbers and money-like strings. `Ok(None)` clears the value.
pub fn parse_deal_value(value: &Json) -> Result<Option<f64>, &'static str> {
    let parsed = match value {
        Json::Null => return Ok(None),
        Json::Number(n) => n.as_f64().ok_or("must be a number")?,
        Json::String(s) => {
            let digits: String = s
                .chars()
                .filter(|c| !matches!(c, '$' | ',' | ' '))
                .collect();
            if digits.is_empty() {
                return Ok(None);
            }
            digits.parse::<f64>().map_err(|_| "must be a number")?
        }
        _ => return Err("must be a number"),
    };
    if !parsed.is_finite() {
        return Err("must be a number");
    }
    if parsed < 0.0 {
        return Err("must not be negative");
    }
    Ok(Some(parsed))
}

/// `"monday, Wed ,fri"` -> `"Mon,Wed,Fri"`, in week order without repeats.
pub fn normalize_callback_days(value: &str) -> Result<Option<String>, String> {
    let mut days = [false; 7];
    for token in value.split([',', ';', '/']).map(str::trim).filter(|t| !t.is_empty()) {
        let lower = token.to_lowercase();
        let idx = WEEKDAYS
            .iter()
            .position(|day| lower.len() >= 3 && lower.starts_with(&day.to_lowercase()))
            .ok_or_else(|| format!("unknown day \"{token}\""))?;
        days[idx] = true;
    }
    let joined = WEEKDAYS
        .iter()
        .zip(days)
        .filter(|(_, on)| *on)
        .map(|(day, _)| *day)
        .collect::<Vec<_>>()
        .join(",");
    Ok((!joined.is_empty()).then_some(joined))
}

fn normalize_list(value: &str) -> Option<String> {
    let joined = value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect::<Vec<_>>()
        .join(",");
    (!joined.is_empty()).then_some(joined)
}

impl LeadInput {
    fn validate(self, mode: Mode) -> CrmResult<LeadChanges> {
        use leads::Column as C;

        let mut checks = Checks::default();
        let mut values: Vec<(leads::Column, Value)> = Vec::new();

        if mode == Mode::Create || self.dispensary_name.is_some() {
            let name = checks.required("dispensary_name", self.dispensary_name, NAME_MAX);
            values.push((C::DispensaryName, name.into()));
        }
        text(&mut checks, &mut values, C::Address, "address", self.address, LONG_MAX);
        text(&mut checks, &mut values, C::City, "city", self.city, SHORT_MAX);
        text(&mut checks, &mut values, C::State, "state", self.state, 64);
        text(&mut checks, &mut values, C::Zip, "zip", self.zip, 20);
        text(&mut checks, &mut values, C::ContactName, "contact_name", self.contact_name, SHORT_MAX);
        text(&mut checks, &mut values, C::ManagerName, "manager_name", self.manager_name, SHORT_MAX);
        text(&mut checks, &mut values, C::OwnerName, "owner_name", self.owner_name, SHORT_MAX);
        text(&mut checks, &mut values, C::Phone, "phone", self.phone, 40);
        text(&mut checks, &mut values, C::Website, "website", self.website, LONG_MAX);
        text(
            &mut checks,
            &mut values,
            C::CurrentPosSystem,
            "current_pos_system",
            self.current_pos_system,
            SHORT_MAX,
        );
        text(&mut checks, &mut values, C::Notes, "notes", self.notes, NOTES_MAX);
        text(&mut checks, &mut values, C::Source, "source", self.source, SHORT_MAX);

        if self.contact_email.is_some() {
            let email = checks.optional("contact_email", self.contact_email, LONG_MAX);
            if let Some(email) = &email {
                if !looks_like_email(email) {
                    checks.fail("contact_email", "must be an email address");
                }
            }
            values.push((C::ContactEmail, email.into()));
        }

        if let Some(raw) = self.deal_value {
            match parse_deal_value(&raw) {
                Ok(value) => values.push((C::DealValue, value.into())),
                Err(message) => checks.fail("deal_value", message),
            }
        }

        let priority_labels: Vec<&str> = Priority::ALL.iter().map(|p| p.label()).collect();
        if let Some(priority) =
            checks.one_of("priority", self.priority, Priority::from_label, &priority_labels)
        {
            values.push((C::Priority, priority.into()));
        }

        if let Some(raw) = self.callback_days {
            match normalize_callback_days(&raw) {
                Ok(days) => values.push((C::CallbackDays, days.into())),
                Err(message) => checks.fail("callback_days", message),
            }
        }
        if let Some(raw) = self.callback_time_slots {
            let slots = normalize_list(&raw);
            if slots.as_ref().is_some_and(|s| s.len() > LONG_MAX) {
                checks.fail("callback_time_slots", format!("must be at most {LONG_MAX} characters"));
            }
            values.push((C::CallbackTimeSlots, slots.into()));
        }

        let from_given = self.callback_time_from.is_some();
        let to_given = self.callback_time_to.is_some();
        let from = checks.time_of_day("callback_time_from", self.callback_time_from);
        let to = checks.time_of_day("callback_time_to", self.callback_time_to);
        if let (Some(from), Some(to)) = (&from, &to) {
            // Zero-padded HH:MM compares correctly as text.
            if from > to {
                checks.fail("callback_time_to", "must not be before callback_time_from");
            }
        }
        if from_given {
            values.push((C::CallbackTimeFrom, from.into()));
        }
        if to_given {
            values.push((C::CallbackTimeTo, to.into()));
        }

        if self.next_callback_date.is_some() {
            let date = checks.date("next_callback_date", self.next_callback_date);
            values.push((C::NextCallbackDate, date.into()));
        }

        let stage = parse_stage(&mut checks, "stage", self.stage);
        if let Some(step) = self.cadence_step {
            checks.range("cadence_step", step, 0, MAX_CADENCE_STEP);
        }

        checks.finish()?;
        Ok(LeadChanges {
            values,
            stage,
            stage_reason: clean(self.stage_reason),
            cadence_step: self.cadence_step,
        })
    }

    /// Builds an input from `(field, value)` pairs produced by the column mapper.
    pub fn from_mapped(pairs: &[(&str, &str)]) -> Self {
        let mut input = LeadInput::default();
        for &(field, value) in pairs {
            let value = Some(value.to_string());
            match field {
                "dispensary_name" => input.dispensary_name = value,
                "address" => input.address = value,
                "city" => input.city = value,
                "state" => input.state = value,
                "zip" => input.zip = value,
                "contact_name" => input.contact_name = value,
                "manager_name" => input.manager_name = value,
                "owner_name" => input.owner_name = value,
                "phone" => input.phone = value,
                "contact_email" => input.contact_email = value,
                "website" => input.website = value,
                "current_pos_system" => input.current_pos_system = value,
                "deal_value" => input.deal_value = value.map(Json::String),
                "priority" => input.priority = value,
                "stage" => input.stage = value,
                "callback_days" => input.callback_days = value,
                "callback_time_slots" => input.callback_time_slots = value,
                "next_callback_date" => input.next_callback_date = value,
                "notes" => input.notes = value,
                "source" => input.source = value,
                _ => {}
            }
        }
        input
    }
}

fn new_lead(values: Vec<(leads::Column, Value)>, now: DateTime<Utc>) -> leads::ActiveModel {
    let at = now.fixed_offset();
    let mut active = leads::ActiveModel {
        dispensary_name: Set(String::new()),
        address: Set(None),
        city: Set(None),
        state: Set(None),
        zip: Set(None),
        contact_name: Set(None),
        manager_name: Set(None),
        owner_name: Set(None),
        phone: Set(None),
        contact_email: Set(None),
        website: Set(None),
        current_pos_system: Set(None),
        deal_value: Set(None),
        priority: Set(Priority::Medium),
        stage: Set(Stage::NewLead),
        callback_days: Set(None),
        callback_time_slots: Set(None),
        callback_time_from: Set(None),
        callback_time_to: Set(None),
        next_callback_date: Set(None),
        cadence_step: Set(0),
        notes: Set(None),
        source: Set(None),
        created_at: Set(at),
        updated_at: Set(at),
        ..Default::default()
    };
    for (column, value) in values {
        active.set(column, value);
    }
    active
}

/// Inserts at New Lead, step 0, then moves stage and cadence through the
/// transition log like any later change.
async fn insert_lead<C: ConnectionTrait>(
    conn: &C,
    changes: LeadChanges,
    now: DateTime<Utc>,
) -> CrmResult<leads::Model> {
    let LeadChanges {
        values,
        stage,
        stage_reason,
        cadence_step,
    } = changes;
    let mut lead = new_lead(values, now).insert(conn).await?;
    if let Some(stage) = stage {
        lead = apply_stage(conn, lead, stage, stage_reason.as_deref(), now)
            .await?
            .lead;
    }
    if let Some(step) = cadence_step {
        lead = apply_cadence(conn, lead, step, now).await?.lead;
    }
    Ok(lead)
}

#[derive(Clone, Debug, Serialize)]
pub struct LeadView {
    #[serde(flatten)]
    pub lead: leads::Model,
    pub score: i32,
    pub heat: Heat,
    pub last_contact: Option<DateTime<FixedOffset>>,
    pub cadence_label: &'static str,
}

impl LeadView {
    pub fn new(
        lead: leads::Model,
        last_contact: Option<DateTime<FixedOffset>>,
        now: DateTime<Utc>,
    ) -> Self {
        let scored = score_lead(&lead, last_contact, now);
        let cadence_label = cadence_label(lead.cadence_step).unwrap_or("Unknown");
        Self {
            lead,
            score: scored.score,
            heat: scored.heat,
            last_contact,
            cadence_label,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct LeadDetail {
    #[serde(flatten)]
    pub view: LeadView,
    pub history: Vec<HistoryView>,
    pub tasks: Vec<tasks::Model>,
    pub scheduled_emails: Vec<scheduled_emails::Model>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum LeadSort {
    #[default]
    Score,
    Name,
    Created,
    Updated,
    DealValue,
    NextCallback,
}

impl LeadSort {
    pub const LABELS: [&'static str; 6] = [
        "score",
        "name",
        "created",
        "updated",
        "deal_value",
        "next_callback",
    ];

    pub fn from_label(value: &str) -> Option<Self> {
        let sort = match value.trim().to_ascii_lowercase().as_str() {
            "score" => LeadSort::Score,
            "name" => LeadSort::Name,
            "created" => LeadSort::Created,
            "updated" => LeadSort::Updated,
            "deal_value" => LeadSort::DealValue,
            "next_callback" => LeadSort::NextCallback,
            _ => return None,
        };
        Some(sort)
    }

    /// Orders two views; ties fall back to id so listings are stable.
    fn compare(self, a: &LeadView, b: &LeadView) -> Ordering {
        let primary = match self {
            LeadSort::Score => b.score.cmp(&a.score),
            LeadSort::Name => a
                .lead
                .dispensary_name
                .to_lowercase()
                .cmp(&b.lead.dispensary_name.to_lowercase()),
            LeadSort::Created => b.lead.created_at.cmp(&a.lead.created_at),
            LeadSort::Updated => b.lead.updated_at.cmp(&a.lead.updated_at),
            LeadSort::DealValue => b
                .lead
                .deal_value
                .unwrap_or(0.0)
                .total_cmp(&a.lead.deal_value.unwrap_or(0.0)),
            LeadSort::NextCallback => match (a.lead.next_callback_date, b.lead.next_callback_date) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
        };
        primary.then(a.lead.id.cmp(&b.lead.id))
    }
}

/// Query string of `GET /leads`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct LeadFilter {
    pub stage: Option<String>,
    pub priority: Option<String>,
    pub q: Option<String>,
    pub sort: Option<String>,
}

#[instrument(skip(db, filter))]
pub async fn list(db: &DbPool, filter: LeadFilter, now: DateTime<Utc>) -> CrmResult<Vec<LeadView>> {
    let mut checks = Checks::default();
    let stage = parse_stage(&mut checks, "stage", filter.stage);
    let priority_labels: Vec<&str> = Priority::ALL.iter().map(|p| p.label()).collect();
    let priority = checks.one_of("priority", filter.priority, Priority::from_label, &priority_labels);
    let sort = checks
        .one_of("sort", filter.sort, LeadSort::from_label, &LeadSort::LABELS)
        .unwrap_or_default();
    checks.finish()?;

    let mut query = leads::Entity::find();
    if let Some(stage) = stage {
        query = query.filter(leads::Column::Stage.eq(stage));
    }
    if let Some(priority) = priority {
        query = query.filter(leads::Column::Priority.eq(priority));
    }
    if let Some(q) = clean(filter.q) {
        let pattern = format!("%{}%", q.to_lowercase());
        let mut any = Condition::any();
        for column in [
            leads::Column::DispensaryName,
            leads::Column::ContactName,
            leads::Column::City,
            leads::Column::Phone,
            leads::Column::ContactEmail,
        ] {
            any = any.add(Expr::expr(Func::lower(Expr::col(column))).like(pattern.as_str()));
        }
        query = query.filter(any);
    }

    let rows = query.order_by_asc(leads::Column::Id).all(db).await?;
    let last_contacts = history::latest_by_lead(db, Some(Kind::Contact)).await?;
    let mut views: Vec<LeadView> = rows
        .into_iter()
        .map(|lead| {
            let last = last_contacts.get(&lead.id).copied();
            LeadView::new(lead, last, now)
        })
        .collect();
    views.sort_by(|a, b| sort.compare(a, b));
    Ok(views)
}

pub async fn get(db: &DbPool, id: i32, now: DateTime<Utc>) -> CrmResult<LeadDetail> {
    let lead = leads::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or(CrmError::NotFound("lead"))?;
    let entries = history::entries_for(db, id).await?;
    let last_contact = entries
        .iter()
        .filter(|entry| entry.kind == Kind::Contact)
        .map(|entry| entry.contacted_at)
        .max();
    let tasks = tasks::Entity::find()
        .filter(tasks::Column::LeadId.eq(id))
        .order_by_asc(tasks::Column::DueDate)
        .order_by_asc(tasks::Column::Id)
        .all(db)
        .await?;
    let scheduled = scheduled_emails::Entity::find()
        .filter(scheduled_emails::Column::LeadId.eq(id))
        .order_by_asc(scheduled_emails::Column::SendAt)
        .all(db)
        .await?;
    Ok(LeadDetail {
        view: LeadView::new(lead, last_contact, now),
        history: entries.into_iter().map(HistoryView::from).collect(),
        tasks,
        scheduled_emails: scheduled,
    })
}

#[instrument(skip(db, input))]
pub async fn create(db: &DbPool, input: LeadInput, now: DateTime<Utc>) -> CrmResult<LeadView> {
    let changes = input.validate(Mode::Create)?;
    let txn = db.begin().await?;
    let lead = insert_lead(&txn, changes, now).await?;
    txn.commit().await?;
    tracing::info!(lead_id = lead.id, "lead created");
    Ok(LeadView::new(lead, None, now))
}

/// Partial update. Stage and cadence changes are logged like their
/// dedicated endpoints, in the same transaction as the field writes.
#[instrument(skip(db, input))]
pub async fn update(
    db: &DbPool,
    id: i32,
    input: LeadInput,
    now: DateTime<Utc>,
) -> CrmResult<LeadView> {
    let changes = input.validate(Mode::Update)?;
    let txn = db.begin().await?;
    let mut lead = leads::Entity::find_by_id(id)
        .one(&txn)
        .await?
        .ok_or(CrmError::NotFound("lead"))?;

    // A one-sided window edit is checked against the stored other side.
    match (
        changes.get(leads::Column::CallbackTimeFrom),
        changes.get(leads::Column::CallbackTimeTo),
    ) {
        (Some(Value::String(Some(from))), None) => {
            if lead.callback_time_to.as_deref().is_some_and(|to| from.as_str() > to) {
                return Err(CrmError::invalid(
                    "callback_time_from",
                    "must not be after callback_time_to",
                ));
            }
        }
        (None, Some(Value::String(Some(to)))) => {
            if lead.callback_time_from.as_deref().is_some_and(|from| from > to.as_str()) {
                return Err(CrmError::invalid(
                    "callback_time_to",
                    "must not be before callback_time_from",
                ));
            }
        }
        _ => {}
    }

    let LeadChanges {
        values,
        stage,
        stage_reason,
        cadence_step,
    } = changes;
    if !values.is_empty() {
        let mut active = lead.into_active_model();
        for (column, value) in values {
            active.set(column, value);
        }
        active.updated_at = Set(now.fixed_offset());
        lead = active.update(&txn).await?;
    }
    if let Some(stage) = stage {
        lead = apply_stage(&txn, lead, stage, stage_reason.as_deref(), now)
            .await?
            .lead;
    }
    if let Some(step) = cadence_step {
        lead = apply_cadence(&txn, lead, step, now).await?.lead;
    }
    let last_contact = history::last_contact(&txn, id).await?;
    txn.commit().await?;
    Ok(LeadView::new(lead, last_contact, now))
}

/// History, tasks and scheduled emails go with the lead.
#[instrument(skip(db))]
pub async fn delete(db: &DbPool, id: i32) -> CrmResult<()> {
    let result = leads::Entity::delete_by_id(id).exec(db).await?;
    if result.rows_affected == 0 {
        return Err(CrmError::NotFound("lead"));
    }
    tracing::info!(lead_id = id, "lead deleted");
    Ok(())
}

/// Body of `POST /leads/bulk`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct BulkImport {
    #[serde(default)]
    pub rows: Vec<LeadInput>,
    /// Skip rows that share a name, phone or email with an existing lead or
    /// an earlier row.
    #[serde(default)]
    pub skip_duplicates: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct RowError {
    pub index: usize,
    pub details: Vec<FieldError>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SkippedRow {
    pub index: usize,
    pub duplicate_of: i32,
    pub matched_on: MatchField,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub ids: Vec<i32>,
    pub skipped: Vec<SkippedRow>,
    pub errors: Vec<RowError>,
}

/// Each row runs in its own savepoint; a failing row is rolled back alone and
/// reported, the rest commit together.
#[instrument(skip(db, request), fields(rows = request.rows.len()))]
pub async fn bulk_import(
    db: &DbPool,
    request: BulkImport,
    now: DateTime<Utc>,
) -> CrmResult<ImportReport> {
    if request.rows.is_empty() {
        return Err(CrmError::invalid("rows", "must not be empty"));
    }
    let mut report = ImportReport::default();
    let txn = db.begin().await?;
    let mut index = if request.skip_duplicates {
        let existing = leads::Entity::find().all(&txn).await?;
        Some(DuplicateIndex::from_leads(&existing))
    } else {
        None
    };

    for (row, input) in request.rows.into_iter().enumerate() {
        let keys = DedupKeys::new(
            input.dispensary_name.as_deref(),
            input.phone.as_deref(),
            input.contact_email.as_deref(),
        );
        let changes = match input.validate(Mode::Create) {
            Ok(changes) => changes,
            Err(CrmError::Validation(details)) => {
                report.errors.push(RowError { index: row, details });
                continue;
            }
            Err(other) => return Err(other),
        };
        if let Some(index) = &index {
            if let Some((duplicate_of, matched_on)) = index.find(&keys) {
                report.skipped.push(SkippedRow {
                    index: row,
                    duplicate_of,
                    matched_on,
                });
                continue;
            }
        }

        let savepoint = txn.begin().await?;
        match insert_lead(&savepoint, changes, now).await {
            Ok(lead) => {
                savepoint.commit().await?;
                if let Some(index) = index.as_mut() {
                    index.insert(lead.id, &keys);
                }
                report.ids.push(lead.id);
            }
            Err(err) => {
                tracing::warn!(row, error = %err, "import row rolled back");
                savepoint.rollback().await?;
                report.errors.push(RowError {
                    index: row,
                    details: vec![FieldError::new("row", "could not be saved")],
                });
            }
        }
    }

    txn.commit().await?;
    report.imported = report.ids.len();
    tracing::info!(
        imported = report.imported,
        skipped = report.skipped.len(),
        failed = report.errors.len(),
        "bulk import finished"
    );
    Ok(report)
}

pub const EXPORT_COLUMNS: [&str; 29] = [
    "id",
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
    "stage",
    "score",
    "heat",
    "cadence_step",
    "callback_days",
    "callback_time_slots",
    "callback_time_from",
    "callback_time_to",
    "next_callback_date",
    "last_contact",
    "notes",
    "source",
    "created_at",
    "updated_at",
];

fn export_row(view: &LeadView) -> Vec<String> {
    let lead = &view.lead;
    let opt = |value: &Option<String>| value.clone().unwrap_or_default();
    vec![
        lead.id.to_string(),
        lead.dispensary_name.clone(),
        opt(&lead.address),
        opt(&lead.city),
        opt(&lead.state),
        opt(&lead.zip),
        opt(&lead.contact_name),
        opt(&lead.manager_name),
        opt(&lead.owner_name),
        opt(&lead.phone),
        opt(&lead.contact_email),
        opt(&lead.website),
        opt(&lead.current_pos_system),
        lead.deal_value.map(|v| v.to_string()).unwrap_or_default(),
        lead.priority.label().to_string(),
        lead.stage.label().to_string(),
        view.score.to_string(),
        view.heat.label().to_string(),
        lead.cadence_step.to_string(),
        opt(&lead.callback_days),
        opt(&lead.callback_time_slots),
        opt(&lead.callback_time_from),
        opt(&lead.callback_time_to),
        lead.next_callback_date
            .map(|d| d.to_string())
            .unwrap_or_default(),
        view.last_contact
            .map(|at| at.to_rfc3339())
            .unwrap_or_default(),
        opt(&lead.notes),
        opt(&lead.source),
        lead.created_at.to_rfc3339(),
        lead.updated_at.to_rfc3339(),
    ]
}

/// Every lead as CSV, id order.
#[instrument(skip(db))]
pub async fn export_csv(db: &DbPool, now: DateTime<Utc>) -> CrmResult<String> {
    let filter = LeadFilter {
        sort: Some("created".into()),
        ..Default::default()
    };
    let mut views = list(db, filter, now).await?;
    views.sort_by_key(|view| view.lead.id);
    Ok(write_csv(&EXPORT_COLUMNS, views.iter().map(export_row)))
}
