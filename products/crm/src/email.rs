//! Outbound email through the Resend HTTP API, merge-field rendering and the
//! scheduled-send sweep.

use std::time::Duration;

use chrono::{DateTime, Utc};
use entity::{
    email_templates,
    leads::{self, Stage},
    scheduled_emails::{self, Status},
};
use once_cell::sync::Lazy;
use platform_db::DbPool;
use regex::{Captures, Regex};
use reqwest::Client;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, IntoActiveModel, QueryFilter, QueryOrder, Set,
    sea_query::Expr,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    CrmError, CrmResult,
    history::email_entry,
    validate::{Checks, clean},
};

pub const DEFAULT_API_BASE: &str = "https://api.resend.com";
pub const DEFAULT_FROM: &str = "Leadline <onboarding@resend.dev>";

static MERGE_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_]+)\s*\}\}").expect("merge-field pattern compiles")
});

#[derive(Clone, Debug)]
pub struct EmailSettings {
    pub api_key: Option<String>,
    pub from: String,
    pub reply_to: Option<String>,
    pub api_base: String,
    pub timeout: Duration,
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            from: DEFAULT_FROM.to_string(),
            reply_to: None,
            api_base: DEFAULT_API_BASE.to_string(),
            timeout: Duration::from_secs(15),
        }
    }
}

impl EmailSettings {
    /// `RESEND_API_KEY`, `EMAIL_FROM`, `EMAIL_REPLY_TO` and, for tests or a
    /// proxy, `RESEND_API_BASE`.
    pub fn from_env() -> Self {
        let var = |key: &str| clean(std::env::var(key).ok());
        let defaults = Self::default();
        Self {
            api_key: var("RESEND_API_KEY"),
            from: var("EMAIL_FROM").unwrap_or(defaults.from),
            reply_to: var("EMAIL_REPLY_TO"),
            api_base: var("RESEND_API_BASE").unwrap_or(defaults.api_base),
            timeout: defaults.timeout,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct EmailStatus {
    pub configured: bool,
    pub from: String,
    pub reply_to: Option<String>,
}

#[derive(Clone, Debug)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub text: String,
}

#[derive(Serialize)]
struct ResendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: &'a str,
    html: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
}

#[derive(Deserialize)]
struct ResendResponse {
    id: String,
}

/// Thin Resend client; one per process, cloned into handlers.
#[derive(Clone, Debug)]
pub struct Mailer {
    client: Client,
    settings: EmailSettings,
}

impl Mailer {
    pub fn new(settings: EmailSettings) -> CrmResult<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|err| CrmError::Delivery(format!("http client: {err}")))?;
        Ok(Self { client, settings })
    }

    pub fn is_configured(&self) -> bool {
        self.settings.api_key.is_some()
    }

    pub fn status(&self) -> EmailStatus {
        EmailStatus {
            configured: self.is_configured(),
            from: self.settings.from.clone(),
            reply_to: self.settings.reply_to.clone(),
        }
    }

    /// Sends one message and returns the provider's message id.
    #[instrument(skip(self, message), fields(to = %message.to))]
    pub async fn send(&self, message: &OutgoingEmail) -> CrmResult<String> {
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .ok_or(CrmError::EmailNotConfigured)?;
        let body = ResendRequest {
            from: &self.settings.from,
            to: [message.to.as_str()],
            subject: &message.subject,
            text: &message.text,
            html: text_to_html(&message.text),
            reply_to: self.settings.reply_to.as_deref(),
        };
        let response = self
            .client
            .post(format!("{}/emails", self.settings.api_base.trim_end_matches('/')))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| CrmError::Delivery(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            tracing::warn!(%status, detail = %detail, "email provider rejected message");
            return Err(CrmError::Delivery(format!("provider returned {status}: {detail}")));
        }
        let sent: ResendResponse = response
            .json()
            .await
            .map_err(|err| CrmError::Delivery(err.to_string()))?;
        Ok(sent.id)
    }
}

fn text_to_html(text: &str) -> String {
    let escaped = text
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;");
    escaped.replace("\r\n", "\n").replace('\n', "<br>\n")
}

/// Value for a known merge field; `None` for names the renderer does not know.
pub fn merge_value(lead: &leads::Model, name: &str) -> Option<String> {
    let opt = |value: &Option<String>| value.clone().unwrap_or_default();
    let value = match name {
        "dispensary_name" => lead.dispensary_name.clone(),
        "contact_name" => opt(&lead.contact_name),
        "first_name" => lead
            .contact_name
            .as_deref()
            .or(lead.manager_name.as_deref())
            .and_then(|full| full.split_whitespace().next())
            .unwrap_or("there")
            .to_string(),
        "manager_name" => opt(&lead.manager_name),
        "owner_name" => opt(&lead.owner_name),
        "city" => opt(&lead.city),
        "state" => opt(&lead.state),
        "phone" => opt(&lead.phone),
        "contact_email" => opt(&lead.contact_email),
        "website" => opt(&lead.website),
        "current_pos_system" => opt(&lead.current_pos_system),
        "stage" => lead.stage.label().to_string(),
        _ => return None,
    };
    Some(value)
}

/// Replaces `{{field}}` placeholders; unknown placeholders are left as written.
pub fn render(template: &str, lead: &leads::Model) -> String {
    MERGE_FIELD
        .replace_all(template, |caps: &Captures| {
            merge_value(lead, &caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Body of `POST /email/send`: a template, an ad-hoc message, or a template
/// with subject/body overrides.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct SendRequest {
    pub lead_id: Option<i32>,
    pub template_id: Option<i32>,
    pub subject: Option<String>,
    pub body: Option<String>,
}

/// Body of `POST /email/batch`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct BatchRequest {
    pub lead_ids: Vec<i32>,
    pub template_id: Option<i32>,
    pub subject: Option<String>,
    pub body: Option<String>,
}

struct Content {
    template_id: Option<i32>,
    subject: String,
    body: String,
}

async fn resolve_content(
    db: &DbPool,
    template_id: Option<i32>,
    subject: Option<String>,
    body: Option<String>,
) -> CrmResult<Content> {
    let (subject, body) = (clean(subject), clean(body));
    let template = match template_id {
        Some(id) => Some(
            email_templates::Entity::find_by_id(id)
                .one(db)
                .await?
                .ok_or(CrmError::NotFound("email template"))?,
        ),
        None => None,
    };
    let mut checks = Checks::default();
    let subject = subject.or_else(|| template.as_ref().map(|t| t.subject.clone()));
    let body = body.or_else(|| template.as_ref().map(|t| t.body.clone()));
    let subject = checks.required("subject", subject, 255);
    let body = checks.required("body", body, 20_000);
    checks.finish()?;
    Ok(Content {
        template_id,
        subject,
        body,
    })
}

#[derive(Clone, Debug, Serialize)]
pub struct SentEmail {
    pub lead_id: i32,
    pub to: String,
    pub subject: String,
    pub provider_id: String,
    pub history_id: i32,
}

async fn deliver(
    db: &DbPool,
    mailer: &Mailer,
    lead_id: i32,
    content: &Content,
    now: DateTime<Utc>,
) -> CrmResult<SentEmail> {
    let lead = leads::Entity::find_by_id(lead_id)
        .one(db)
        .await?
        .ok_or(CrmError::NotFound("lead"))?;
    let to = clean(lead.contact_email.clone())
        .ok_or_else(|| CrmError::invalid("contact_email", "lead has no email address"))?;
    let subject = render(&content.subject, &lead);
    let message = OutgoingEmail {
        to: to.clone(),
        subject: subject.clone(),
        text: render(&content.body, &lead),
    };
    let provider_id = mailer.send(&message).await?;
    let entry = email_entry(lead_id, content.template_id, &subject, "Sent".to_string(), now)
        .insert(db)
        .await?;
    tracing::info!(lead_id, provider_id = %provider_id, "email sent");
    Ok(SentEmail {
        lead_id,
        to,
        subject,
        provider_id,
        history_id: entry.id,
    })
}

#[instrument(skip(db, mailer, request))]
pub async fn send_to_lead(
    db: &DbPool,
    mailer: &Mailer,
    request: SendRequest,
    now: DateTime<Utc>,
) -> CrmResult<SentEmail> {
    if !mailer.is_configured() {
        return Err(CrmError::EmailNotConfigured);
    }
    let lead_id = request
        .lead_id
        .ok_or_else(|| CrmError::invalid("lead_id", "is required"))?;
    let content = resolve_content(db, request.template_id, request.subject, request.body).await?;
    deliver(db, mailer, lead_id, &content, now).await
}

#[derive(Clone, Debug, Serialize)]
pub struct BatchItem {
    pub lead_id: i32,
    pub ok: bool,
    pub provider_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct BatchReport {
    pub sent: usize,
    pub failed: usize,
    pub results: Vec<BatchItem>,
}

/// Human-readable failure for per-item reports.
pub fn describe_error(err: &CrmError) -> String {
    match err {
        CrmError::Validation(details) => details
            .iter()
            .map(|d| format!("{} {}", d.field, d.message))
            .collect::<Vec<_>>()
            .join("; "),
        CrmError::Db(_) => "internal error".to_string(),
        other => other.to_string(),
    }
}

/// One send per lead; failures are collected, never retried.
#[instrument(skip(db, mailer, request), fields(count = request.lead_ids.len()))]
pub async fn send_batch(
    db: &DbPool,
    mailer: &Mailer,
    request: BatchRequest,
    now: DateTime<Utc>,
) -> CrmResult<BatchReport> {
    if !mailer.is_configured() {
        return Err(CrmError::EmailNotConfigured);
    }
    if request.lead_ids.is_empty() {
        return Err(CrmError::invalid("lead_ids", "must not be empty"));
    }
    let content = resolve_content(db, request.template_id, request.subject, request.body).await?;
    let mut report = BatchReport::default();
    for lead_id in request.lead_ids {
        let item = match deliver(db, mailer, lead_id, &content, now).await {
            Ok(sent) => {
                report.sent += 1;
                BatchItem {
                    lead_id,
                    ok: true,
                    provider_id: Some(sent.provider_id),
                    error: None,
                }
            }
            Err(err) => {
                if let CrmError::Db(db_err) = &err {
                    tracing::error!(lead_id, error = %db_err, "batch send failed");
                }
                report.failed += 1;
                BatchItem {
                    lead_id,
                    ok: false,
                    provider_id: None,
                    error: Some(describe_error(&err)),
                }
            }
        };
        report.results.push(item);
    }
    Ok(report)
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SweepReport {
    pub due: usize,
    pub sent: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Rows left pending because a read or write failed before the send.
    pub errored: usize,
}

enum SweepOutcome {
    Sent,
    Failed,
    Cancelled,
    /// Claimed by a concurrent sweep.
    Skipped,
}

/// Sends every pending scheduled email whose `send_at` has passed. Rows for
/// closed leads are cancelled; failures are marked and left alone.
#[instrument(skip(db, mailer))]
pub async fn process_scheduled(
    db: &DbPool,
    mailer: &Mailer,
    now: DateTime<Utc>,
) -> CrmResult<SweepReport> {
    if !mailer.is_configured() {
        return Err(CrmError::EmailNotConfigured);
    }
    let due = scheduled_emails::Entity::find()
        .filter(scheduled_emails::Column::Status.eq(Status::Pending))
        .filter(scheduled_emails::Column::SendAt.lte(now.fixed_offset()))
        .order_by_asc(scheduled_emails::Column::SendAt)
        .order_by_asc(scheduled_emails::Column::Id)
        .all(db)
        .await?;

    let mut report = SweepReport {
        due: due.len(),
        ..Default::default()
    };
    for row in due {
        let scheduled_id = row.id;
        match sweep_row(db, mailer, row, now).await {
            Ok(SweepOutcome::Sent) => report.sent += 1,
            Ok(SweepOutcome::Failed) => report.failed += 1,
            Ok(SweepOutcome::Cancelled) => report.cancelled += 1,
            Ok(SweepOutcome::Skipped) => {}
            Err(err) => {
                tracing::error!(scheduled_id, error = %err, "scheduled email not processed");
                report.errored += 1;
            }
        }
    }

    tracing::info!(
        due = report.due,
        sent = report.sent,
        failed = report.failed,
        cancelled = report.cancelled,
        errored = report.errored,
        "scheduled email sweep finished"
    );
    Ok(report)
}

async fn sweep_row(
    db: &DbPool,
    mailer: &Mailer,
    row: scheduled_emails::Model,
    now: DateTime<Utc>,
) -> CrmResult<SweepOutcome> {
    let lead = leads::Entity::find_by_id(row.lead_id).one(db).await?;
    let template = email_templates::Entity::find_by_id(row.template_id)
        .one(db)
        .await?;
    let (Some(lead), Some(template)) = (lead, template) else {
        finish(db, row, Status::Cancelled, None, now).await?;
        return Ok(SweepOutcome::Cancelled);
    };
    if matches!(lead.stage, Stage::ClosedWon | Stage::ClosedLost) {
        finish(db, row, Status::Cancelled, None, now).await?;
        return Ok(SweepOutcome::Cancelled);
    }
    let Some(to) = clean(lead.contact_email.clone()) else {
        finish(db, row, Status::Failed, Some("lead has no email address".into()), now).await?;
        return Ok(SweepOutcome::Failed);
    };

    // The row leaves `pending` before the provider call, so nothing that
    // fails after it can cause a second send.
    let claimed = scheduled_emails::Entity::update_many()
        .col_expr(scheduled_emails::Column::Status, Expr::value(Status::Sent))
        .col_expr(scheduled_emails::Column::SentAt, Expr::value(now.fixed_offset()))
        .filter(scheduled_emails::Column::Id.eq(row.id))
        .filter(scheduled_emails::Column::Status.eq(Status::Pending))
        .exec(db)
        .await?
        .rows_affected;
    if claimed == 0 {
        return Ok(SweepOutcome::Skipped);
    }

    let subject = render(&template.subject, &lead);
    let message = OutgoingEmail {
        to,
        subject: subject.clone(),
        text: render(&template.body, &lead),
    };
    match mailer.send(&message).await {
        Ok(provider_id) => {
            let step = row.cadence_step;
            let logged = email_entry(
                lead.id,
                Some(template.id),
                &subject,
                format!("Sent (cadence step {step})"),
                now,
            )
            .insert(db)
            .await;
            if let Err(err) = logged {
                tracing::error!(
                    lead_id = lead.id,
                    scheduled_id = row.id,
                    provider_id = %provider_id,
                    error = %err,
                    "scheduled email sent but not logged"
                );
            }
            Ok(SweepOutcome::Sent)
        }
        Err(err) => {
            finish(db, row, Status::Failed, Some(describe_error(&err)), now).await?;
            Ok(SweepOutcome::Failed)
        }
    }
}

async fn finish(
    db: &DbPool,
    row: scheduled_emails::Model,
    status: Status,
    error: Option<String>,
    now: DateTime<Utc>,
) -> CrmResult<()> {
    let mut active = row.into_active_model();
    active.status = Set(status);
    active.error = Set(error);
    active.sent_at = Set((status == Status::Sent).then(|| now.fixed_offset()));
    active.update(db).await?;
    Ok(())
}
