use chrono::{DateTime, Utc};
use entity::email_templates;
use platform_db::DbPool;
use sea_orm::{ActiveModelTrait, EntityTrait, IntoActiveModel, QueryOrder, Set};
use serde::Deserialize;
use tracing::instrument;

use crate::{
    CrmError, CrmResult,
    transitions::MAX_CADENCE_STEP,
    validate::Checks,
};

const NAME_MAX: usize = 120;
const SUBJECT_MAX: usize = 255;
const BODY_MAX: usize = 20_000;
const MAX_DELAY_DAYS: i32 = 365;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct TemplateInput {
    pub name: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub category: Option<String>,
    /// `-1` on update unbinds the template from its step.
    pub cadence_step: Option<i32>,
    pub delay_days: Option<i32>,
    pub is_default: Option<bool>,
}

fn check_binding(checks: &mut Checks, input: &TemplateInput, updating: bool) {
    if let Some(step) = input.cadence_step {
        if !(updating && step == -1) {
            checks.range("cadence_step", step, 0, MAX_CADENCE_STEP);
        }
    }
    if let Some(delay) = input.delay_days {
        checks.range("delay_days", delay, 0, MAX_DELAY_DAYS);
    }
}

pub async fn list(db: &DbPool) -> CrmResult<Vec<email_templates::Model>> {
    Ok(email_templates::Entity::find()
        .order_by_asc(email_templates::Column::CadenceStep)
        .order_by_asc(email_templates::Column::Name)
        .order_by_asc(email_templates::Column::Id)
        .all(db)
        .await?)
}

pub async fn get(db: &DbPool, id: i32) -> CrmResult<email_templates::Model> {
    email_templates::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or(CrmError::NotFound("email template"))
}

#[instrument(skip(db, input))]
pub async fn create(
    db: &DbPool,
    input: TemplateInput,
    now: DateTime<Utc>,
) -> CrmResult<email_templates::Model> {
    let mut checks = Checks::default();
    check_binding(&mut checks, &input, false);
    let name = checks.required("name", input.name, NAME_MAX);
    let subject = checks.required("subject", input.subject, SUBJECT_MAX);
    let body = checks.required("body", input.body, BODY_MAX);
    let category = checks.optional("category", input.category, NAME_MAX);
    checks.finish()?;

    let at = now.fixed_offset();
    let template = email_templates::ActiveModel {
        name: Set(name),
        subject: Set(subject),
        body: Set(body),
        category: Set(category),
        cadence_step: Set(input.cadence_step),
        delay_days: Set(input.delay_days.unwrap_or(0)),
        is_default: Set(input.is_default.unwrap_or(false)),
        created_at: Set(at),
        updated_at: Set(at),
        ..Default::default()
    }
    .insert(db)
    .await?;
    tracing::info!(template_id = template.id, "email template created");
    Ok(template)
}

#[instrument(skip(db, input))]
pub async fn update(
    db: &DbPool,
    id: i32,
    input: TemplateInput,
    now: DateTime<Utc>,
) -> CrmResult<email_templates::Model> {
    let template = get(db, id).await?;
    let mut checks = Checks::default();
    check_binding(&mut checks, &input, true);

    let mut active = template.into_active_model();
    if input.name.is_some() {
        active.name = Set(checks.required("name", input.name, NAME_MAX));
    }
    if input.subject.is_some() {
        active.subject = Set(checks.required("subject", input.subject, SUBJECT_MAX));
    }
    if input.body.is_some() {
        active.body = Set(checks.required("body", input.body, BODY_MAX));
    }
    if input.category.is_some() {
        active.category = Set(checks.optional("category", input.category, NAME_MAX));
    }
    match input.cadence_step {
        Some(-1) => active.cadence_step = Set(None),
        Some(step) => active.cadence_step = Set(Some(step)),
        None => {}
    }
    if let Some(delay) = input.delay_days {
        active.delay_days = Set(delay);
    }
    if let Some(is_default) = input.is_default {
        active.is_default = Set(is_default);
    }
    checks.finish()?;

    active.updated_at = Set(now.fixed_offset());
    Ok(active.update(db).await?)
}

/// Pending scheduled sends for the template go with it.
pub async fn delete(db: &DbPool, id: i32) -> CrmResult<()> {
    let result = email_templates::Entity::delete_by_id(id).exec(db).await?;
    if result.rows_affected == 0 {
        return Err(CrmError::NotFound("email template"));
    }
    Ok(())
}
