mod common;

use std::sync::{Arc, Mutex};

use axum::{Json, Router, extract::State, http::HeaderMap, http::StatusCode, routing::post};
use chrono::Duration;
use common::{at, input, lead, pool, template};
use crm::{
    CrmError, Stage,
    analytics,
    email::{self, BatchRequest, EmailSettings, Mailer, SendRequest},
    history::{self, ContactInput},
    leads::LeadInput,
    tasks::{self, TaskFilter, TaskInput},
    transitions::{advance_cadence, set_stage},
};
use entity::{
    contact_history::{self, Kind, Method},
    scheduled_emails::{self, Status},
};
use platform_db::DbPool;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use serde_json::{Value, json};

type Seen = Arc<Mutex<Vec<(Option<String>, Value)>>>;

#[derive(Clone, Default)]
struct Provider {
    seen: Seen,
    /// Drops the history table once a message is accepted.
    drop_history: Option<DbPool>,
}

async fn fake_emails(
    State(provider): State<Provider>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let rejected = body["to"][0].as_str().is_some_and(|to| to.starts_with("bounce@"));
    let count = {
        let mut seen = provider.seen.lock().unwrap();
        seen.push((auth, body));
        seen.len()
    };
    if rejected {
        return (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({"message": "invalid recipient"})));
    }
    if let Some(db) = &provider.drop_history {
        db.execute_unprepared("DROP TABLE contact_history").await.unwrap();
    }
    (StatusCode::OK, Json(json!({"id": format!("msg_{count}")})))
}

async fn fake_provider() -> (Mailer, Seen) {
    serve_provider(Provider::default()).await
}

async fn serve_provider(provider: Provider) -> (Mailer, Seen) {
    let seen = provider.seen.clone();
    let app = Router::new()
        .route("/emails", post(fake_emails))
        .with_state(provider);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let mailer = Mailer::new(EmailSettings {
        api_key: Some("re_test".into()),
        api_base: format!("http://{addr}"),
        ..Default::default()
    })
    .unwrap();
    (mailer, seen)
}

#[tokio::test]
async fn sends_require_a_configured_provider() {
    let db = pool().await;
    let now = at(2025, 4, 1);
    let lead = lead(&db, input("Alpha Shop", None, Some("a@alpha.test")), now).await;
    let mailer = Mailer::new(EmailSettings::default()).unwrap();
    assert!(!mailer.status().configured);

    let request = SendRequest {
        lead_id: Some(lead.id),
        subject: Some("Hi".into()),
        body: Some("Hello".into()),
        ..Default::default()
    };
    let err = email::send_to_lead(&db, &mailer, request, now).await.unwrap_err();
    assert!(matches!(err, CrmError::EmailNotConfigured));
    assert!(matches!(
        email::process_scheduled(&db, &mailer, now).await,
        Err(CrmError::EmailNotConfigured)
    ));
}

#[tokio::test]
async fn send_renders_merge_fields_and_logs_history() {
    let db = pool().await;
    let now = at(2025, 4, 1);
    let (mailer, seen) = fake_provider().await;
    let tpl = template(&db, None, 0, false, now).await;
    let lead = lead(
        &db,
        LeadInput {
            contact_name: Some("Dana Reyes".into()),
            ..input("Alpha Shop", None, Some("dana@alpha.test"))
        },
        now,
    )
    .await;

    let sent = email::send_to_lead(
        &db,
        &mailer,
        SendRequest {
            lead_id: Some(lead.id),
            template_id: Some(tpl.id),
            ..Default::default()
        },
        now,
    )
    .await
    .unwrap();
    assert_eq!(sent.subject, "Hello Alpha Shop");
    assert_eq!(sent.provider_id, "msg_1");

    let requests = seen.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    let (auth, body) = &requests[0];
    assert_eq!(auth.as_deref(), Some("Bearer re_test"));
    assert_eq!(body["to"], json!(["dana@alpha.test"]));
    assert_eq!(body["text"], "Hi Dana, about Alpha Shop.");

    let entry = contact_history::Entity::find_by_id(sent.history_id)
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.method, Method::Email);
    assert_eq!(entry.kind, Kind::Contact);
    assert_eq!(entry.email_template_id, Some(tpl.id));
    assert_eq!(entry.notes.as_deref(), Some("Email sent: Hello Alpha Shop"));
}

#[tokio::test]
async fn batch_collects_per_lead_failures() {
    let db = pool().await;
    let now = at(2025, 4, 1);
    let (mailer, _seen) = fake_provider().await;
    let ok = lead(&db, input("Alpha Shop", None, Some("a@alpha.test")), now).await;
    let no_email = lead(&db, input("Beta Shop", None, None), now).await;
    let bounced = lead(&db, input("Gamma Shop", None, Some("bounce@gamma.test")), now).await;

    let report = email::send_batch(
        &db,
        &mailer,
        BatchRequest {
            lead_ids: vec![ok.id, no_email.id, bounced.id, 999],
            subject: Some("Quick question for {{dispensary_name}}".into()),
            body: Some("Hello".into()),
            ..Default::default()
        },
        now,
    )
    .await
    .unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(report.failed, 3);
    let errors: Vec<Option<&str>> = report.results.iter().map(|r| r.error.as_deref()).collect();
    assert_eq!(errors[0], None);
    assert_eq!(errors[1], Some("contact_email lead has no email address"));
    assert!(errors[2].is_some_and(|e| e.contains("422")));
    assert_eq!(errors[3], Some("lead not found"));
}

#[tokio::test]
async fn sweep_sends_due_rows_and_cancels_closed_leads() {
    let db = pool().await;
    let now = at(2025, 4, 1);
    let (mailer, seen) = fake_provider().await;
    template(&db, Some(1), 0, true, now).await;
    let later = template(&db, Some(2), 7, true, now).await;

    let alpha = lead(&db, input("Alpha Shop", None, Some("a@alpha.test")), now).await;
    let beta = lead(&db, input("Beta Shop", None, None), now).await;
    let gamma = lead(&db, input("Gamma Shop", None, Some("g@gamma.test")), now).await;
    let delta = lead(&db, input("Delta Shop", None, Some("d@delta.test")), now).await;
    for id in [alpha.id, beta.id, gamma.id] {
        advance_cadence(&db, id, 1, now).await.unwrap();
    }
    set_stage(&db, gamma.id, Stage::ClosedLost, None, now).await.unwrap();
    let not_due = advance_cadence(&db, delta.id, 2, now).await.unwrap();
    assert_eq!(not_due.scheduled.as_ref().map(|s| s.template_id), Some(later.id));

    let report = email::process_scheduled(&db, &mailer, now + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!((report.due, report.sent, report.failed, report.cancelled), (3, 1, 1, 1));
    assert_eq!(seen.lock().unwrap().len(), 1);

    let rows = scheduled_emails::Entity::find().all(&db).await.unwrap();
    let status_of = |lead_id: i32| rows.iter().find(|r| r.lead_id == lead_id).unwrap();
    assert_eq!(status_of(alpha.id).status, Status::Sent);
    assert!(status_of(alpha.id).sent_at.is_some());
    assert_eq!(status_of(beta.id).status, Status::Failed);
    assert_eq!(status_of(beta.id).error.as_deref(), Some("lead has no email address"));
    assert_eq!(status_of(gamma.id).status, Status::Cancelled);
    assert_eq!(status_of(delta.id).status, Status::Pending);

    let sent_entry = contact_history::Entity::find()
        .filter(contact_history::Column::LeadId.eq(alpha.id))
        .filter(contact_history::Column::Method.eq(Method::Email))
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sent_entry.outcome.as_deref(), Some("Sent (cadence step 1)"));

    let again = email::process_scheduled(&db, &mailer, now + Duration::hours(2))
        .await
        .unwrap();
    assert_eq!(again.due, 0);
}

#[tokio::test]
async fn sweep_does_not_resend_when_logging_fails() {
    let db = pool().await;
    let now = at(2025, 4, 1);
    let (mailer, seen) = serve_provider(Provider {
        drop_history: Some(db.clone()),
        ..Default::default()
    })
    .await;
    template(&db, Some(1), 0, true, now).await;
    let alpha = lead(&db, input("Alpha Shop", None, Some("a@alpha.test")), now).await;
    let bounced = lead(&db, input("Bounce Shop", None, Some("bounce@shop.test")), now).await;
    advance_cadence(&db, bounced.id, 1, now).await.unwrap();
    advance_cadence(&db, alpha.id, 1, now).await.unwrap();

    let report = email::process_scheduled(&db, &mailer, now + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(
        (report.due, report.sent, report.failed, report.errored),
        (2, 1, 1, 0)
    );

    let rows = scheduled_emails::Entity::find().all(&db).await.unwrap();
    let row_of = |lead_id: i32| rows.iter().find(|r| r.lead_id == lead_id).unwrap();
    assert_eq!(row_of(alpha.id).status, Status::Sent);
    assert!(row_of(alpha.id).sent_at.is_some());
    assert_eq!(row_of(bounced.id).status, Status::Failed);
    assert_eq!(row_of(bounced.id).sent_at, None);

    let again = email::process_scheduled(&db, &mailer, now + Duration::hours(2))
        .await
        .unwrap();
    assert_eq!(again.due, 0);
    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn reminders_target_idle_open_leads_once() {
    let db = pool().await;
    let created = at(2025, 4, 1);
    let now = created + Duration::days(10);

    let idle = lead(&db, input("Idle Shop", None, None), created).await;
    let recent = lead(&db, input("Recent Shop", None, None), created).await;
    lead(
        &db,
        LeadInput {
            stage: Some("Closed Won".into()),
            ..input("Won Shop", None, None)
        },
        created,
    )
    .await;
    history::log_contact(
        &db,
        recent.id,
        ContactInput {
            notes: Some("Left a voicemail".into()),
            contacted_at: Some((now - Duration::days(1)).to_rfc3339()),
            ..Default::default()
        },
        now,
    )
    .await
    .unwrap();

    let run = tasks::generate_reminders(&db, now).await.unwrap();
    assert_eq!(run.checked, 2);
    assert_eq!(run.created.len(), 1);
    let reminder = &run.created[0];
    assert_eq!(reminder.lead_id, idle.id);
    assert_eq!(reminder.title, "Follow up with Idle Shop");
    assert_eq!(reminder.source, entity::tasks::Source::AutoReminder);

    let second = tasks::generate_reminders(&db, now).await.unwrap();
    assert!(second.created.is_empty());

    tasks::toggle(&db, reminder.id, now).await.unwrap();
    let third = tasks::generate_reminders(&db, now).await.unwrap();
    assert_eq!(third.created.len(), 1);
}

#[tokio::test]
async fn task_lifecycle() {
    let db = pool().await;
    let now = at(2025, 4, 1);
    let lead = lead(&db, input("Alpha Shop", None, None), now).await;

    let missing = tasks::create(
        &db,
        TaskInput {
            lead_id: Some(404),
            title: Some("Call".into()),
            ..Default::default()
        },
        now,
    )
    .await;
    assert!(matches!(missing, Err(CrmError::NotFound("lead"))));

    let task = tasks::create(
        &db,
        TaskInput {
            lead_id: Some(lead.id),
            title: Some("Send pricing".into()),
            due_date: Some("2025-04-03".into()),
            priority: Some("High".into()),
            ..Default::default()
        },
        now,
    )
    .await
    .unwrap();
    assert_eq!(task.dispensary_name.as_deref(), Some("Alpha Shop"));

    let done = tasks::toggle(&db, task.task.id, now).await.unwrap();
    assert_eq!(done.task.status, entity::tasks::Status::Completed);
    assert!(done.task.completed_at.is_some());

    let pending = tasks::list(
        &db,
        TaskFilter {
            status: Some("pending".into()),
            lead_id: None,
        },
    )
    .await
    .unwrap();
    assert!(pending.is_empty());

    let reopened = tasks::update(
        &db,
        task.task.id,
        TaskInput {
            status: Some("pending".into()),
            due_date: Some(String::new()),
            ..Default::default()
        },
        now,
    )
    .await
    .unwrap();
    assert_eq!(reopened.task.completed_at, None);
    assert_eq!(reopened.task.due_date, None);
    tasks::delete(&db, task.task.id).await.unwrap();
    assert!(matches!(tasks::get(&db, task.task.id).await, Err(CrmError::NotFound("task"))));
}

#[tokio::test]
async fn analytics_read_the_transition_log() {
    let db = pool().await;
    let day = |d: u32| at(2025, 5, d);
    let won = lead(
        &db,
        LeadInput {
            deal_value: Some(json!(500)),
            ..input("Won Shop", None, None)
        },
        day(1),
    )
    .await;
    let lost = lead(
        &db,
        LeadInput {
            deal_value: Some(json!("$200")),
            ..input("Lost Shop", None, None)
        },
        day(1),
    )
    .await;
    lead(
        &db,
        LeadInput {
            deal_value: Some(json!(100)),
            ..input("Open Shop", None, None)
        },
        day(1),
    )
    .await;

    set_stage(&db, won.id, Stage::Contacted, None, day(3)).await.unwrap();
    set_stage(&db, won.id, Stage::DemoScheduled, None, day(5)).await.unwrap();
    set_stage(&db, won.id, Stage::ClosedWon, Some("Signed".into()), day(6)).await.unwrap();
    set_stage(&db, lost.id, Stage::ClosedLost, None, day(2)).await.unwrap();

    let funnel = analytics::funnel(&db).await.unwrap();
    let entered = |stage: Stage| funnel.iter().find(|f| f.stage == stage).unwrap().entered;
    assert_eq!(entered(Stage::NewLead), 3);
    assert_eq!(entered(Stage::Contacted), 1);
    assert_eq!(entered(Stage::ProposalSent), 0);
    assert_eq!(funnel.iter().find(|f| f.stage == Stage::ClosedWon).unwrap().current, 1);

    let durations = analytics::stage_durations(&db).await.unwrap();
    let average = |stage: Stage| durations.iter().find(|d| d.stage == stage).unwrap().average_days;
    assert_eq!(average(Stage::NewLead), Some(1.5));
    assert_eq!(average(Stage::Contacted), Some(2.0));
    assert_eq!(average(Stage::DemoScheduled), Some(1.0));
    assert_eq!(average(Stage::Negotiating), None);
    assert!(durations.iter().all(|d| !d.stage.is_closed()));

    let report = analytics::win_loss(&db).await.unwrap();
    assert_eq!((report.won, report.lost), (1, 1));
    assert_eq!(report.win_rate, Some(0.5));
    assert_eq!((report.won_value, report.lost_value), (500.0, 200.0));
    let reasons: Vec<(Stage, &str)> = report
        .reasons
        .iter()
        .map(|r| (r.stage, r.reason.as_str()))
        .collect();
    assert_eq!(
        reasons,
        [(Stage::ClosedLost, "No reason given"), (Stage::ClosedWon, "Signed")]
    );

    let dashboard = analytics::dashboard(&db, day(7)).await.unwrap();
    assert_eq!(dashboard.total_leads, 3);
    assert_eq!(dashboard.open_leads, 1);
    assert_eq!(dashboard.pipeline_value, 100.0);
    assert_eq!(dashboard.won_value, 500.0);
    assert_eq!(dashboard.pending_scheduled_emails, 0);
}
