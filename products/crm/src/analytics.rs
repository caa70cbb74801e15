//! Read-only reports over the structured transition log.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, FixedOffset, Utc};
use entity::{
    contact_history::{self, Kind},
    leads::{self, Stage},
    scheduled_emails, tasks,
};
use platform_db::DbPool;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder};
use serde::Serialize;
use tracing::instrument;

use crate::{
    CrmResult,
    history::latest_by_lead,
    scoring::{Heat, score_lead},
    tasks::due_counts,
};

pub const NO_REASON: &str = "No reason given";

/// One stage transition as read from history.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transition {
    pub lead_id: i32,
    pub from: Option<Stage>,
    pub to: Stage,
    pub at: DateTime<FixedOffset>,
}

async fn transitions(db: &DbPool) -> CrmResult<Vec<(Transition, Option<String>)>> {
    let rows = contact_history::Entity::find()
        .filter(contact_history::Column::Kind.eq(Kind::StageChange))
        .order_by_asc(contact_history::Column::LeadId)
        .order_by_asc(contact_history::Column::ContactedAt)
        .order_by_asc(contact_history::Column::Id)
        .all(db)
        .await?;
    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let to = row.to_stage?;
            Some((
                Transition {
                    lead_id: row.lead_id,
                    from: row.from_stage,
                    to,
                    at: row.contacted_at,
                },
                row.outcome,
            ))
        })
        .collect())
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FunnelStage {
    pub stage: Stage,
    /// Leads sitting in the stage now.
    pub current: usize,
    /// Leads that were ever in the stage, current ones included.
    pub entered: usize,
}

pub fn funnel_counts(current: &[(i32, Stage)], transitions: &[Transition]) -> Vec<FunnelStage> {
    let mut entered: HashMap<Stage, HashSet<i32>> = HashMap::new();
    for &(lead_id, stage) in current {
        entered.entry(stage).or_default().insert(lead_id);
    }
    for t in transitions {
        entered.entry(t.to).or_default().insert(t.lead_id);
        if let Some(from) = t.from {
            entered.entry(from).or_default().insert(t.lead_id);
        }
    }
    Stage::ALL
        .into_iter()
        .map(|stage| FunnelStage {
            stage,
            current: current.iter().filter(|(_, s)| *s == stage).count(),
            entered: entered.get(&stage).map_or(0, HashSet::len),
        })
        .collect()
}

#[instrument(skip(db))]
pub async fn funnel(db: &DbPool) -> CrmResult<Vec<FunnelStage>> {
    let current: Vec<(i32, Stage)> = leads::Entity::find()
        .all(db)
        .await?
        .into_iter()
        .map(|lead| (lead.id, lead.stage))
        .collect();
    let transitions: Vec<Transition> = transitions(db).await?.into_iter().map(|(t, _)| t).collect();
    Ok(funnel_counts(&current, &transitions))
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StageDuration {
    pub stage: Stage,
    pub average_days: Option<f64>,
    pub samples: usize,
}

/// Time spent in each stage that a lead has already left. The first stay
/// runs from the lead's creation to its first recorded change. A change whose
/// `from` does not continue the previous `to`, as with rows carried over by a
/// merge, is skipped and does not move the timeline.
pub fn stage_stays(
    created_at: &HashMap<i32, DateTime<FixedOffset>>,
    transitions: &[Transition],
) -> Vec<(Stage, f64)> {
    let mut by_lead: BTreeMap<i32, Vec<&Transition>> = BTreeMap::new();
    for t in transitions {
        by_lead.entry(t.lead_id).or_default().push(t);
    }
    let mut stays = Vec::new();
    for (lead_id, moves) in by_lead {
        if let (Some(first), Some(created)) = (moves.first(), created_at.get(&lead_id)) {
            if let Some(from) = first.from {
                stays.push((from, days_between(*created, first.at)));
            }
        }
        let mut previous: Option<&Transition> = None;
        for t in moves {
            if let Some(prev) = previous {
                if t.from != Some(prev.to) {
                    continue;
                }
                stays.push((prev.to, days_between(prev.at, t.at)));
            }
            previous = Some(t);
        }
    }
    stays
}

fn days_between(start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> f64 {
    let seconds = end.signed_duration_since(start).num_seconds().max(0);
    seconds as f64 / 86_400.0
}

pub fn average_stays(stays: &[(Stage, f64)]) -> Vec<StageDuration> {
    Stage::ALL
        .into_iter()
        .filter(|stage| !stage.is_closed())
        .map(|stage| {
            let samples: Vec<f64> = stays
                .iter()
                .filter(|(s, _)| *s == stage)
                .map(|(_, days)| *days)
                .collect();
            let average_days = (!samples.is_empty())
                .then(|| (samples.iter().sum::<f64>() / samples.len() as f64 * 10.0).round() / 10.0);
            StageDuration {
                stage,
                average_days,
                samples: samples.len(),
            }
        })
        .collect()
}

#[instrument(skip(db))]
pub async fn stage_durations(db: &DbPool) -> CrmResult<Vec<StageDuration>> {
    let created_at: HashMap<i32, DateTime<FixedOffset>> = leads::Entity::find()
        .all(db)
        .await?
        .into_iter()
        .map(|lead| (lead.id, lead.created_at))
        .collect();
    let transitions: Vec<Transition> = transitions(db).await?.into_iter().map(|(t, _)| t).collect();
    Ok(average_stays(&stage_stays(&created_at, &transitions)))
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReasonCount {
    pub stage: Stage,
    pub reason: String,
    pub count: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WinLoss {
    pub won: usize,
    pub lost: usize,
    pub win_rate: Option<f64>,
    pub won_value: f64,
    pub lost_value: f64,
    pub reasons: Vec<ReasonCount>,
}

/// The synthetic outcome `Stage: <label>` means no reason was supplied.
pub fn closing_reason(to: Stage, outcome: Option<&str>) -> String {
    match outcome.map(str::trim) {
        Some(text) if !text.is_empty() && text != format!("Stage: {}", to.label()) => {
            text.to_string()
        }
        _ => NO_REASON.to_string(),
    }
}

pub fn count_reasons(closings: &[(Stage, String)]) -> Vec<ReasonCount> {
    let mut counts: BTreeMap<(usize, String), usize> = BTreeMap::new();
    for (stage, reason) in closings {
        let order = Stage::ALL.iter().position(|s| s == stage).unwrap_or(0);
        *counts.entry((order, reason.clone())).or_insert(0) += 1;
    }
    let mut reasons: Vec<ReasonCount> = counts
        .into_iter()
        .map(|((order, reason), count)| ReasonCount {
            stage: Stage::ALL[order],
            reason,
            count,
        })
        .collect();
    reasons.sort_by(|a, b| {
        a.stage
            .label()
            .cmp(b.stage.label())
            .then(b.count.cmp(&a.count))
            .then(a.reason.cmp(&b.reason))
    });
    reasons
}

#[instrument(skip(db))]
pub async fn win_loss(db: &DbPool) -> CrmResult<WinLoss> {
    let closed = leads::Entity::find()
        .filter(leads::Column::Stage.is_in([Stage::ClosedWon, Stage::ClosedLost]))
        .all(db)
        .await?;
    let total = |stage: Stage| -> (usize, f64) {
        closed
            .iter()
            .filter(|l| l.stage == stage)
            .fold((0, 0.0), |(n, v), l| (n + 1, v + l.deal_value.unwrap_or(0.0)))
    };
    let (won, won_value) = total(Stage::ClosedWon);
    let (lost, lost_value) = total(Stage::ClosedLost);

    let closings: Vec<(Stage, String)> = transitions(db)
        .await?
        .into_iter()
        .filter(|(t, _)| t.to.is_closed())
        .map(|(t, outcome)| (t.to, closing_reason(t.to, outcome.as_deref())))
        .collect();

    Ok(WinLoss {
        won,
        lost,
        win_rate: (won + lost > 0).then(|| won as f64 / (won + lost) as f64),
        won_value,
        lost_value,
        reasons: count_reasons(&closings),
    })
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Dashboard {
    pub total_leads: usize,
    pub open_leads: usize,
    pub pipeline_value: f64,
    pub won_value: f64,
    pub hot_leads: usize,
    pub warm_leads: usize,
    pub cold_leads: usize,
    pub tasks_due_today: usize,
    pub tasks_overdue: usize,
    pub pending_scheduled_emails: u64,
    pub by_stage: Vec<FunnelStage>,
}

#[instrument(skip(db))]
pub async fn dashboard(db: &DbPool, now: DateTime<Utc>) -> CrmResult<Dashboard> {
    let all = leads::Entity::find().all(db).await?;
    let last_contacts = latest_by_lead(db, Some(Kind::Contact)).await?;
    let mut heat: HashMap<Heat, usize> = HashMap::new();
    let mut pipeline_value = 0.0;
    let mut won_value = 0.0;
    for lead in &all {
        let scored = score_lead(lead, last_contacts.get(&lead.id).copied(), now);
        *heat.entry(scored.heat).or_insert(0) += 1;
        match lead.stage {
            Stage::ClosedWon => won_value += lead.deal_value.unwrap_or(0.0),
            Stage::ClosedLost => {}
            _ => pipeline_value += lead.deal_value.unwrap_or(0.0),
        }
    }

    let open_tasks = tasks::Entity::find()
        .filter(tasks::Column::Status.eq(tasks::Status::Pending))
        .all(db)
        .await?;
    let (tasks_due_today, tasks_overdue) = due_counts(&open_tasks, now);
    let pending_scheduled_emails = scheduled_emails::Entity::find()
        .filter(scheduled_emails::Column::Status.eq(scheduled_emails::Status::Pending))
        .count(db)
        .await?;

    let current: Vec<(i32, Stage)> = all.iter().map(|l| (l.id, l.stage)).collect();
    let transitions: Vec<Transition> = transitions(db).await?.into_iter().map(|(t, _)| t).collect();

    Ok(Dashboard {
        total_leads: all.len(),
        open_leads: all.iter().filter(|l| !l.stage.is_closed()).count(),
        pipeline_value,
        won_value,
        hot_leads: heat.get(&Heat::Hot).copied().unwrap_or(0),
        warm_leads: heat.get(&Heat::Warm).copied().unwrap_or(0),
        cold_leads: heat.get(&Heat::Cold).copied().unwrap_or(0),
        tasks_due_today,
        tasks_overdue,
        pending_scheduled_emails,
        by_stage: funnel_counts(&current, &transitions),
    })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(day: u32) -> DateTime<FixedOffset> {
        Utc.with_ymd_and_hms(2025, 3, day, 12, 0, 0).unwrap().fixed_offset()
    }

    fn moved(lead_id: i32, from: Stage, to: Stage, day: u32) -> Transition {
        Transition {
            lead_id,
            from: Some(from),
            to,
            at: at(day),
        }
    }

    #[test]
    fn funnel_counts_include_past_and_current_stages() {
        let current = vec![(1, Stage::DemoScheduled), (2, Stage::NewLead)];
        let transitions = vec![
            moved(1, Stage::NewLead, Stage::Contacted, 2),
            moved(1, Stage::Contacted, Stage::DemoScheduled, 4),
        ];
        let funnel = funnel_counts(&current, &transitions);
        let get = |stage| funnel.iter().find(|f| f.stage == stage).unwrap().clone();
        assert_eq!(get(Stage::NewLead).entered, 2);
        assert_eq!(get(Stage::NewLead).current, 1);
        assert_eq!(get(Stage::Contacted).entered, 1);
        assert_eq!(get(Stage::Contacted).current, 0);
        assert_eq!(get(Stage::DemoScheduled).entered, 1);
        assert_eq!(get(Stage::ClosedWon).entered, 0);
    }

    #[test]
    fn stays_are_measured_between_consecutive_changes() {
        let created = HashMap::from([(1, at(1))]);
        let transitions = vec![
            moved(1, Stage::NewLead, Stage::Contacted, 3),
            moved(1, Stage::Contacted, Stage::DemoScheduled, 7),
        ];
        let stays = stage_stays(&created, &transitions);
        assert_eq!(stays, vec![(Stage::NewLead, 2.0), (Stage::Contacted, 4.0)]);

        let averages = average_stays(&stays);
        let contacted = averages.iter().find(|d| d.stage == Stage::Contacted).unwrap();
        assert_eq!(contacted.average_days, Some(4.0));
        let scheduled = averages.iter().find(|d| d.stage == Stage::DemoScheduled).unwrap();
        assert_eq!(scheduled.average_days, None);
        assert!(averages.iter().all(|d| !d.stage.is_closed()));
    }

    #[test]
    fn merged_in_changes_do_not_break_the_timeline() {
        let created = HashMap::from([(1, at(1))]);
        let transitions = vec![
            moved(1, Stage::NewLead, Stage::Contacted, 2),
            // carried over from a merged duplicate
            moved(1, Stage::NewLead, Stage::Contacted, 3),
            moved(1, Stage::Contacted, Stage::DemoScheduled, 6),
        ];
        let stays = stage_stays(&created, &transitions);
        assert_eq!(stays, vec![(Stage::NewLead, 1.0), (Stage::Contacted, 4.0)]);
    }

    #[test]
    fn synthetic_outcomes_count_as_no_reason() {
        assert_eq!(
            closing_reason(Stage::ClosedLost, Some("Stage: Closed Lost")),
            NO_REASON
        );
        assert_eq!(closing_reason(Stage::ClosedLost, None), NO_REASON);
        assert_eq!(closing_reason(Stage::ClosedWon, Some("Great demo")), "Great demo");
    }

    #[test]
    fn reasons_are_grouped_per_stage() {
        let closings = vec![
            (Stage::ClosedLost, "Price".to_string()),
            (Stage::ClosedLost, "Price".to_string()),
            (Stage::ClosedLost, "Timing".to_string()),
            (Stage::ClosedWon, NO_REASON.to_string()),
        ];
        let reasons = count_reasons(&closings);
        assert_eq!(
            reasons,
            vec![
                ReasonCount {
                    stage: Stage::ClosedLost,
                    reason: "Price".into(),
                    count: 2
                },
                ReasonCount {
                    stage: Stage::ClosedLost,
                    reason: "Timing".into(),
                    count: 1
                },
                ReasonCount {
                    stage: Stage::ClosedWon,
                    reason: NO_REASON.into(),
                    count: 1
                },
            ]
        );
    }
}
