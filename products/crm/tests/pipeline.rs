mod common;

use common::{at, input, lead, pool, template};
use crm::{
    CrmError, Stage,
    dedup::{DuplicateCandidate, MatchField, check_duplicates, find_duplicate_groups},
    history::{self, ContactInput},
    leads::{self, BulkImport, LeadInput},
    merge::{MergeRequest, merge_leads},
    transitions::{advance_cadence, bulk_set_stage, set_stage},
};
use entity::{
    contact_history::{self, Kind},
    scheduled_emails::{self, Status},
    tasks,
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};

async fn history_of(db: &platform_db::DbPool, lead_id: i32) -> Vec<contact_history::Model> {
    contact_history::Entity::find()
        .filter(contact_history::Column::LeadId.eq(lead_id))
        .order_by_asc(contact_history::Column::Id)
        .all(db)
        .await
        .unwrap()
}

#[tokio::test]
async fn stage_change_is_logged_once() {
    let db = pool().await;
    let now = at(2025, 3, 1);
    let lead = lead(&db, input("Green Leaf", None, None), now).await;

    set_stage(&db, lead.id, Stage::Contacted, None, now).await.unwrap();
    let change = set_stage(&db, lead.id, Stage::DemoScheduled, Some("ignored".into()), now)
        .await
        .unwrap();
    assert!(change.changed);
    let entry = change.entry.unwrap();
    assert_eq!(entry.kind, Kind::StageChange);
    assert_eq!(
        entry.notes.as_deref(),
        Some("Stage changed from \"Contacted\" to \"Demo Scheduled\"")
    );
    assert_eq!(entry.outcome.as_deref(), Some("Stage: Demo Scheduled"));

    let again = set_stage(&db, lead.id, Stage::DemoScheduled, None, now).await.unwrap();
    assert!(!again.changed);
    assert_eq!(history_of(&db, lead.id).await.len(), 2);

    let lost = set_stage(&db, lead.id, Stage::ClosedLost, Some("Price".into()), now)
        .await
        .unwrap();
    assert_eq!(lost.entry.unwrap().outcome.as_deref(), Some("Price"));
}

#[tokio::test]
async fn bulk_stage_with_missing_id_writes_nothing() {
    let db = pool().await;
    let now = at(2025, 3, 1);
    let a = lead(&db, input("A Shop", None, None), now).await;
    let b = lead(&db, input("B Shop", None, None), now).await;

    let err = bulk_set_stage(&db, &[a.id, 9999], Stage::Contacted, None, now)
        .await
        .unwrap_err();
    assert!(matches!(err, CrmError::NotFound("lead")));
    assert_eq!(contact_history::Entity::find().count(&db).await.unwrap(), 0);

    let changes = bulk_set_stage(&db, &[a.id, b.id, a.id], Stage::Contacted, None, now)
        .await
        .unwrap();
    assert_eq!(changes.len(), 2);
    assert!(changes.iter().all(|c| c.changed && c.lead.stage == Stage::Contacted));
    assert_eq!(contact_history::Entity::find().count(&db).await.unwrap(), 2);
}

#[tokio::test]
async fn cadence_advance_replaces_pending_send() {
    let db = pool().await;
    let now = at(2025, 3, 1);
    let lead = lead(&db, input("Mesa Wellness", None, Some("a@mesa.test")), now).await;
    template(&db, Some(1), 0, false, now).await;
    let preferred = template(&db, Some(1), 2, true, now).await;
    let step_two = template(&db, Some(2), 3, true, now).await;

    let first = advance_cadence(&db, lead.id, 1, now).await.unwrap();
    let scheduled = first.scheduled.unwrap();
    assert_eq!(scheduled.template_id, preferred.id);
    assert_eq!(scheduled.send_at, (now + chrono::Duration::days(2)).fixed_offset());
    assert_eq!(first.cancelled, 0);
    assert_eq!(
        first.entry.unwrap().notes.as_deref(),
        Some("Cadence advanced to Step 1: Intro Email")
    );

    let second = advance_cadence(&db, lead.id, 2, now).await.unwrap();
    assert_eq!(second.cancelled, 1);
    assert_eq!(second.scheduled.unwrap().template_id, step_two.id);

    let old = scheduled_emails::Entity::find_by_id(scheduled.id)
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(old.status, Status::Cancelled);

    let unchanged = advance_cadence(&db, lead.id, 2, now).await.unwrap();
    assert!(!unchanged.changed);
    assert!(matches!(
        advance_cadence(&db, lead.id, 6, now).await,
        Err(CrmError::Validation(_))
    ));
}

#[tokio::test]
async fn merge_copies_fields_and_moves_children() {
    let db = pool().await;
    let now = at(2025, 3, 1);
    let keep = lead(&db, input("Green Leaf", Some("303-555-0140"), None), now).await;
    let dup = lead(
        &db,
        LeadInput {
            city: Some("Denver".into()),
            contact_email: Some("dana@greenleaf.test".into()),
            ..input("Green Leaf Dispensary", Some("(303) 555-0140"), None)
        },
        now,
    )
    .await;
    set_stage(&db, dup.id, Stage::Contacted, None, now).await.unwrap();
    template(&db, Some(1), 3, true, now).await;
    let pending = advance_cadence(&db, dup.id, 1, now)
        .await
        .unwrap()
        .scheduled
        .unwrap();
    tasks::ActiveModel {
        lead_id: Set(dup.id),
        title: Set("Call back".into()),
        priority: Set(entity::leads::Priority::Medium),
        status: Set(tasks::Status::Pending),
        source: Set(tasks::Source::Manual),
        created_at: Set(now.fixed_offset()),
        updated_at: Set(now.fixed_offset()),
        ..Default::default()
    }
    .insert(&db)
    .await
    .unwrap();

    let request = MergeRequest {
        keep_id: keep.id,
        merge_id: dup.id,
        fields_from_merge: vec!["city".into(), "contact_email".into(), "stage".into()],
    };
    let outcome = merge_leads(&db, &request, now).await.unwrap();
    assert_eq!(outcome.fields_copied, ["city", "contact_email"]);
    assert_eq!(outcome.lead.city.as_deref(), Some("Denver"));
    assert_eq!(outcome.lead.dispensary_name, "Green Leaf");
    assert_eq!(outcome.lead.stage, Stage::NewLead);
    assert_eq!(outcome.history_moved, 2);
    assert_eq!(outcome.tasks_moved, 1);
    assert_eq!(outcome.scheduled_moved, 1);
    let moved = scheduled_emails::Entity::find_by_id(pending.id)
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(moved.lead_id, keep.id);
    assert_eq!(moved.status, Status::Pending);

    assert!(entity::leads::Entity::find_by_id(dup.id).one(&db).await.unwrap().is_none());
    let history = history_of(&db, keep.id).await;
    let merges: Vec<_> = history.iter().filter(|h| h.kind == Kind::Merge).collect();
    assert_eq!(merges.len(), 1);
    assert_eq!(
        merges[0].notes.as_deref(),
        Some(format!("Merged duplicate lead \"Green Leaf Dispensary\" (#{})", dup.id).as_str())
    );
    assert_eq!(
        merges[0].outcome.as_deref(),
        Some("Fields copied: city, contact_email")
    );

    let same = MergeRequest {
        keep_id: keep.id,
        merge_id: keep.id,
        fields_from_merge: vec![],
    };
    assert!(matches!(merge_leads(&db, &same, now).await, Err(CrmError::Validation(_))));
}

#[tokio::test]
async fn duplicates_are_found_by_normalized_keys() {
    let db = pool().await;
    let now = at(2025, 3, 1);
    let a = lead(&db, input("Green  Leaf", Some("303-555-0140"), None), now).await;
    let b = lead(&db, input("green leaf", None, None), now).await;
    let c = lead(&db, input("Other Shop", Some("(303) 555.0140"), Some("x@y.test")), now).await;
    lead(&db, input("Unrelated", None, Some("z@y.test")), now).await;

    let groups = find_duplicate_groups(&db).await.unwrap();
    assert_eq!(groups.len(), 2);
    let by_phone = groups
        .iter()
        .find(|g| g.reason == MatchField::Phone)
        .unwrap();
    let ids: Vec<i32> = by_phone.leads.iter().map(|l| l.id).collect();
    assert_eq!(ids, [a.id, c.id]);
    assert!(groups
        .iter()
        .any(|g| g.reason == MatchField::Name && g.leads.iter().any(|l| l.id == b.id)));

    let candidate = DuplicateCandidate {
        contact_email: Some(" X@Y.test ".into()),
        exclude_id: Some(c.id),
        ..Default::default()
    };
    assert!(check_duplicates(&db, &candidate).await.unwrap().is_empty());
    let candidate = DuplicateCandidate {
        exclude_id: None,
        ..candidate
    };
    let matches = check_duplicates(&db, &candidate).await.unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].lead.id, c.id);
}

#[tokio::test]
async fn import_reports_bad_rows_and_skips_duplicates() {
    let db = pool().await;
    let now = at(2025, 3, 1);
    let existing = lead(&db, input("Canyon Collective", None, Some("lee@canyon.test")), now).await;

    let rows = vec![
        input("Fresh Shop", Some("719-555-0101"), None),
        input("", None, None),
        input("Canyon Co", None, Some("LEE@canyon.test")),
        input("Fresh Shop Two", Some("7195550101"), None),
        LeadInput {
            stage: Some("Demo Scheduled".into()),
            cadence_step: Some(2),
            ..input("Staged Shop", None, None)
        },
    ];
    let report = leads::bulk_import(
        &db,
        BulkImport {
            rows,
            skip_duplicates: true,
        },
        now,
    )
    .await
    .unwrap();

    assert_eq!(report.imported, 2);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].index, 1);
    assert_eq!(report.errors[0].details[0].field, "dispensary_name");
    let skipped: Vec<(usize, i32)> = report
        .skipped
        .iter()
        .map(|s| (s.index, s.duplicate_of))
        .collect();
    assert_eq!(skipped, [(2, existing.id), (3, report.ids[0])]);
    assert_eq!(report.skipped[0].matched_on, MatchField::Email);

    let staged = entity::leads::Entity::find_by_id(report.ids[1])
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(staged.stage, Stage::DemoScheduled);
    assert_eq!(staged.cadence_step, 2);
    let kinds: Vec<Kind> = history_of(&db, staged.id).await.iter().map(|h| h.kind).collect();
    assert_eq!(kinds, [Kind::StageChange, Kind::CadenceAdvance]);
    assert_eq!(entity::leads::Entity::find().count(&db).await.unwrap(), 3);
}

#[tokio::test]
async fn create_logs_initial_stage_and_schedules_cadence() {
    let db = pool().await;
    let now = at(2025, 3, 1);
    let intro = template(&db, Some(1), 1, true, now).await;

    let created = lead(
        &db,
        LeadInput {
            stage: Some("Contacted".into()),
            cadence_step: Some(1),
            ..input("Fresh Start", None, Some("hi@fresh.test"))
        },
        now,
    )
    .await;
    assert_eq!(created.stage, Stage::Contacted);
    assert_eq!(created.cadence_step, 1);

    let history = history_of(&db, created.id).await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].from_stage, Some(Stage::NewLead));
    assert_eq!(history[0].to_stage, Some(Stage::Contacted));
    assert_eq!(history[1].kind, Kind::CadenceAdvance);

    let scheduled = scheduled_emails::Entity::find()
        .filter(scheduled_emails::Column::LeadId.eq(created.id))
        .all(&db)
        .await
        .unwrap();
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0].template_id, intro.id);
    assert_eq!(scheduled[0].status, Status::Pending);
    assert_eq!(scheduled[0].send_at, (now + chrono::Duration::days(1)).fixed_offset());

    let repeat = advance_cadence(&db, created.id, 1, now).await.unwrap();
    assert!(!repeat.changed);
    assert_eq!(scheduled_emails::Entity::find().count(&db).await.unwrap(), 1);

    let plain = lead(&db, input("Plain Shop", None, None), now).await;
    assert_eq!(plain.stage, Stage::NewLead);
    assert!(history_of(&db, plain.id).await.is_empty());
}

#[tokio::test]
async fn callback_window_edits_are_checked_against_the_stored_side() {
    let db = pool().await;
    let now = at(2025, 3, 1);
    let lead = lead(
        &db,
        LeadInput {
            callback_time_from: Some("15:00".into()),
            ..input("Window Shop", None, None)
        },
        now,
    )
    .await;

    let early_to = LeadInput {
        callback_time_to: Some("09:00".into()),
        ..Default::default()
    };
    let Err(CrmError::Validation(errors)) = leads::update(&db, lead.id, early_to, now).await else {
        panic!("expected validation failure");
    };
    assert_eq!(errors[0].field, "callback_time_to");

    let later_to = LeadInput {
        callback_time_to: Some("17:00".into()),
        ..Default::default()
    };
    let view = leads::update(&db, lead.id, later_to, now).await.unwrap();
    assert_eq!(view.lead.callback_time_from.as_deref(), Some("15:00"));
    assert_eq!(view.lead.callback_time_to.as_deref(), Some("17:00"));

    let late_from = LeadInput {
        callback_time_from: Some("18:00".into()),
        ..Default::default()
    };
    let Err(CrmError::Validation(errors)) = leads::update(&db, lead.id, late_from, now).await else {
        panic!("expected validation failure");
    };
    assert_eq!(errors[0].field, "callback_time_from");
}

#[tokio::test]
async fn recency_counts_only_real_contacts() {
    let db = pool().await;
    let now = at(2025, 3, 10);
    let quiet = lead(&db, input("Quiet Shop", None, None), now).await;
    let dup = lead(&db, input("Quiet Shop Two", None, None), now).await;
    set_stage(&db, quiet.id, Stage::Contacted, None, now).await.unwrap();
    merge_leads(
        &db,
        &MergeRequest {
            keep_id: quiet.id,
            merge_id: dup.id,
            fields_from_merge: vec![],
        },
        now,
    )
    .await
    .unwrap();

    // Contacted (10) with a fresh stage-change and merge row but no contact.
    let detail = leads::get(&db, quiet.id, now).await.unwrap();
    assert_eq!(detail.history.len(), 2);
    assert_eq!(detail.view.last_contact, None);
    assert_eq!(detail.view.score, 10);
    let listed = leads::list(&db, Default::default(), now).await.unwrap();
    assert_eq!(listed[0].score, 10);

    history::log_contact(
        &db,
        quiet.id,
        ContactInput {
            method: Some("Phone".into()),
            notes: Some("Spoke with the manager".into()),
            ..Default::default()
        },
        now,
    )
    .await
    .unwrap();
    let listed = leads::list(&db, Default::default(), now).await.unwrap();
    assert_eq!(listed[0].score, 35);
    assert_eq!(leads::get(&db, quiet.id, now).await.unwrap().view.score, 35);
    let updated = leads::update(
        &db,
        quiet.id,
        LeadInput {
            notes: Some("Follow up Friday".into()),
            ..Default::default()
        },
        now,
    )
    .await
    .unwrap();
    assert_eq!(updated.score, 35);
}

#[tokio::test]
async fn update_moves_stage_through_the_log() {
    let db = pool().await;
    let now = at(2025, 3, 1);
    let lead = lead(&db, input("Summit Supply", None, Some("a@summit.test")), now).await;

    let view = leads::update(
        &db,
        lead.id,
        LeadInput {
            stage: Some("Closed Won".into()),
            stage_reason: Some("Signed".into()),
            contact_email: Some(String::new()),
            ..Default::default()
        },
        now,
    )
    .await
    .unwrap();
    assert_eq!(view.lead.stage, Stage::ClosedWon);
    assert_eq!(view.lead.contact_email, None);
    assert_eq!(view.lead.dispensary_name, "Summit Supply");

    let history = history_of(&db, lead.id).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome.as_deref(), Some("Signed"));

    assert!(matches!(
        leads::update(&db, 4242, LeadInput::default(), now).await,
        Err(CrmError::NotFound("lead"))
    ));
}
