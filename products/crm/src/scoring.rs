//! Lead score: a fixed weighted sum over stage, contact recency, deal value
//! and contact completeness.
//!
//! The total is never clamped or normalized; heat labels are plain
//! thresholds over the raw sum.

use chrono::{DateTime, FixedOffset, Utc};
use entity::leads::{self, Stage};
use serde::Serialize;

pub const HOT_THRESHOLD: i32 = 70;
pub const WARM_THRESHOLD: i32 = 40;

const UNRECOGNIZED_STAGE_WEIGHT: i32 = 5;
const COMPLETENESS_POINTS: i32 = 5;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Heat {
    Hot,
    Warm,
    Cold,
}

impl Heat {
    pub fn from_score(score: i32) -> Self {
        if score >= HOT_THRESHOLD {
            Heat::Hot
        } else if score >= WARM_THRESHOLD {
            Heat::Warm
        } else {
            Heat::Cold
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Heat::Hot => "Hot",
            Heat::Warm => "Warm",
            Heat::Cold => "Cold",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LeadScore {
    pub score: i32,
    pub heat: Heat,
}

/// Everything the score looks at, detached from storage.
#[derive(Clone, Debug, Default)]
pub struct ScoreInput<'a> {
    /// `None` stands for a stage label outside the pipeline enumeration.
    pub stage: Option<Stage>,
    /// Whole days since the last substantive contact; `None` if never contacted.
    pub days_since_contact: Option<i64>,
    pub deal_value: Option<f64>,
    pub email: Option<&'a str>,
    pub phone: Option<&'a str>,
    pub manager_name: Option<&'a str>,
    pub callback_days: Option<&'a str>,
    pub has_callback_date: bool,
}

impl<'a> ScoreInput<'a> {
    pub fn from_lead(
        lead: &'a leads::Model,
        last_contact: Option<DateTime<FixedOffset>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            stage: Some(lead.stage),
            days_since_contact: last_contact
                .map(|at| now.signed_duration_since(at.with_timezone(&Utc)).num_days()),
            deal_value: lead.deal_value,
            email: lead.contact_email.as_deref(),
            phone: lead.phone.as_deref(),
            manager_name: lead.manager_name.as_deref(),
            callback_days: lead.callback_days.as_deref(),
            has_callback_date: lead.next_callback_date.is_some(),
        }
    }
}

pub fn stage_weight(stage: Option<Stage>) -> i32 {
    match stage {
        Some(Stage::NewLead) => 5,
        Some(Stage::Contacted) => 10,
        Some(Stage::DemoScheduled) => 15,
        Some(Stage::DemoCompleted) => 20,
        Some(Stage::ProposalSent) => 25,
        Some(Stage::Negotiating) => 30,
        Some(Stage::ClosedWon) => 30,
        Some(Stage::ClosedLost) => 0,
        None => UNRECOGNIZED_STAGE_WEIGHT,
    }
}

/// Weight for a raw stage label, e.g. one read from an import file.
pub fn stage_label_weight(label: &str) -> i32 {
    stage_weight(Stage::from_label(label))
}

pub fn recency_weight(days_since_contact: Option<i64>) -> i32 {
    match days_since_contact {
        Some(days) if days <= 3 => 25,
        Some(days) if days <= 7 => 20,
        Some(days) if days <= 14 => 12,
        Some(days) if days <= 30 => 5,
        _ => 0,
    }
}

pub fn value_weight(deal_value: Option<f64>) -> i32 {
    match deal_value {
        Some(value) if value <= 0.0 => 0,
        Some(value) if value <= 200.0 => 8,
        Some(value) if value <= 500.0 => 14,
        Some(_) => 20,
        None => 0,
    }
}

pub fn completeness_bonus(input: &ScoreInput<'_>) -> i32 {
    let present = |value: Option<&str>| value.is_some_and(|v| !v.trim().is_empty());
    let filled = [
        present(input.email),
        present(input.phone),
        present(input.manager_name),
        present(input.callback_days),
        input.has_callback_date,
    ];
    filled.iter().filter(|&&set| set).count() as i32 * COMPLETENESS_POINTS
}

pub fn score(input: &ScoreInput<'_>) -> i32 {
    stage_weight(input.stage)
        + recency_weight(input.days_since_contact)
        + value_weight(input.deal_value)
        + completeness_bonus(input)
}

pub fn score_lead(
    lead: &leads::Model,
    last_contact: Option<DateTime<FixedOffset>>,
    now: DateTime<Utc>,
) -> LeadScore {
    let score = score(&ScoreInput::from_lead(lead, last_contact, now));
    LeadScore {
        score,
        heat: Heat::from_score(score),
    }
}
