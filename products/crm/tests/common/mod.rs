#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use crm::leads::{self, LeadInput};
use entity::email_templates;
use migration::{Migrator, MigratorTrait};
use platform_db::{DatabaseSettings, DbPool, connect};
use sea_orm::{ActiveModelTrait, Set};

pub async fn pool() -> DbPool {
    let db = connect(&DatabaseSettings::sqlite_memory())
        .await
        .expect("sqlite pool");
    Migrator::up(&db, None).await.expect("migrations");
    db
}

pub fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
}

pub fn input(name: &str, phone: Option<&str>, email: Option<&str>) -> LeadInput {
    LeadInput {
        dispensary_name: Some(name.to_string()),
        phone: phone.map(str::to_string),
        contact_email: email.map(str::to_string),
        ..Default::default()
    }
}

pub async fn lead(db: &DbPool, input: LeadInput, now: DateTime<Utc>) -> entity::leads::Model {
    leads::create(db, input, now).await.expect("create lead").lead
}

pub async fn template(
    db: &DbPool,
    step: Option<i32>,
    delay_days: i32,
    is_default: bool,
    now: DateTime<Utc>,
) -> email_templates::Model {
    email_templates::ActiveModel {
        name: Set(format!("Step {step:?}")),
        subject: Set("Hello {{dispensary_name}}".to_string()),
        body: Set("Hi {{first_name}}, about {{dispensary_name}}.".to_string()),
        category: Set(None),
        cadence_step: Set(step),
        delay_days: Set(delay_days),
        is_default: Set(is_default),
        created_at: Set(now.fixed_offset()),
        updated_at: Set(now.fixed_offset()),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("insert template")
}
