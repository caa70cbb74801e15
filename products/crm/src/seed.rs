//! Demo data for local development. Safe to run repeatedly: each part is
//! skipped once its table has rows.

use chrono::{DateTime, Duration, Utc};
use entity::{email_templates, leads};
use platform_db::DbPool;
use sea_orm::{ActiveModelTrait, EntityTrait, PaginatorTrait, Set};
use serde::Serialize;
use serde_json::json;
use tracing::instrument;

use crate::{
    CrmResult, Stage,
    history::{self, ContactInput},
    leads::{LeadInput, create},
    transitions::set_stage,
};

/// `(cadence step, name, subject, delay days)`
const TEMPLATES: [(i32, &str, &str, i32); 5] = [
    (1, "Intro Email", "Quick intro for {{dispensary_name}}", 0),
    (2, "Follow-up Call Prep", "Following up, {{first_name}}", 2),
    (3, "Value Email", "How shops like {{dispensary_name}} cut checkout time", 3),
    (4, "Check-in", "Still a fit for {{dispensary_name}}?", 4),
    (5, "Break-up Email", "Closing the loop, {{first_name}}", 5),
];

const TEMPLATE_BODY: &str = "Hi {{first_name}},\n\n\
We help stores like {{dispensary_name}} in {{city}} move off {{current_pos_system}} \
without downtime.\n\nWorth a 15 minute call this week?\n";

#[derive(Clone, Debug, Default, Serialize)]
pub struct SeedReport {
    pub templates: usize,
    pub leads: usize,
}

#[instrument(skip(db))]
pub async fn seed_demo(db: &DbPool, now: DateTime<Utc>) -> CrmResult<SeedReport> {
    let mut report = SeedReport::default();

    if email_templates::Entity::find().count(db).await? == 0 {
        for (step, name, subject, delay) in TEMPLATES {
            email_templates::ActiveModel {
                name: Set(name.to_string()),
                subject: Set(subject.to_string()),
                body: Set(TEMPLATE_BODY.to_string()),
                category: Set(Some("cadence".to_string())),
                cadence_step: Set(Some(step)),
                delay_days: Set(delay),
                is_default: Set(true),
                created_at: Set(now.fixed_offset()),
                updated_at: Set(now.fixed_offset()),
                ..Default::default()
            }
            .insert(db)
            .await?;
            report.templates += 1;
        }
    }

    if leads::Entity::find().count(db).await? > 0 {
        tracing::info!(templates = report.templates, "leads already present, skipping demo leads");
        return Ok(report);
    }

    let demo = [
        ("Green Leaf Dispensary", "Denver", "CO", "Dana Reyes", "(303) 555-0140", "dana@greenleaf.test", 650, Stage::Negotiating),
        ("High Plains Cannabis", "Boulder", "CO", "Sam Ortiz", "303-555-0177", "sam@highplains.test", 320, Stage::DemoScheduled),
        ("Mesa Wellness", "Grand Junction", "CO", "Priya Shah", "970 555 0102", "priya@mesawellness.test", 180, Stage::Contacted),
        ("Canyon Collective", "Pueblo", "CO", "Lee Park", "719-555-0199", "lee@canyon.test", 900, Stage::ClosedWon),
        ("Riverside Remedies", "Fort Collins", "CO", "Jo Grant", "970-555-0111", "jo@riverside.test", 250, Stage::ClosedLost),
        ("Summit Supply Co", "Aspen", "CO", "Alex Kim", "970-555-0123", "alex@summit.test", 0, Stage::NewLead),
    ];

    for (name, city, state, contact, phone, email, value, stage) in demo {
        let input = LeadInput {
            dispensary_name: Some(name.to_string()),
            city: Some(city.to_string()),
            state: Some(state.to_string()),
            contact_name: Some(contact.to_string()),
            manager_name: Some(contact.to_string()),
            phone: Some(phone.to_string()),
            contact_email: Some(email.to_string()),
            current_pos_system: Some("Legacy POS".to_string()),
            deal_value: Some(json!(value)),
            callback_days: Some("Tue,Thu".to_string()),
            source: Some("seed".to_string()),
            ..Default::default()
        };
        let lead = create(db, input, now - Duration::days(21)).await?.lead;

        if stage != Stage::NewLead {
            history::log_contact(
                db,
                lead.id,
                ContactInput {
                    method: Some("Phone".to_string()),
                    notes: Some("Intro call".to_string()),
                    outcome: Some("Interested".to_string()),
                    contacted_at: Some((now - Duration::days(2)).to_rfc3339()),
                    ..Default::default()
                },
                now,
            )
            .await?;
            set_stage(db, lead.id, Stage::Contacted, None, now - Duration::days(14)).await?;
        }
        if !matches!(stage, Stage::NewLead | Stage::Contacted) {
            let reason = match stage {
                Stage::ClosedWon => Some("Signed annual plan".to_string()),
                Stage::ClosedLost => Some("Price".to_string()),
                _ => None,
            };
            set_stage(db, lead.id, stage, reason, now - Duration::days(5)).await?;
        }
        report.leads += 1;
    }

    tracing::info!(templates = report.templates, leads = report.leads, "demo data seeded");
    Ok(report)
}
