//! Duplicate detection over normalized name, phone and email keys.
//!
//! Groups are formed per shared key and never merged transitively: if X and Y
//! share a phone and Y and Z share an email, that is two groups.

use std::collections::{HashMap, HashSet};

use entity::leads;
use platform_db::DbPool;
use sea_orm::{EntityTrait, QueryOrder};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{CrmResult, validate::clean};

const MIN_PHONE_DIGITS: usize = 7;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchField {
    Name,
    Phone,
    Email,
}

impl MatchField {
    /// Order in which a group's reason is reported when several keys tie.
    pub const ORDER: [MatchField; 3] = [MatchField::Name, MatchField::Phone, MatchField::Email];
}

pub fn normalize_name(value: &str) -> Option<String> {
    let joined = value
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");
    (!joined.is_empty()).then_some(joined)
}

/// Digits only; anything shorter than seven digits is not a usable key.
pub fn normalize_phone(value: &str) -> Option<String> {
    let digits: String = value.chars().filter(char::is_ascii_digit).collect();
    (digits.len() >= MIN_PHONE_DIGITS).then_some(digits)
}

pub fn normalize_email(value: &str) -> Option<String> {
    let compact: String = value
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();
    (!compact.is_empty()).then_some(compact)
}

/// Normalized keys of one lead or candidate.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DedupKeys {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl DedupKeys {
    pub fn new(name: Option<&str>, phone: Option<&str>, email: Option<&str>) -> Self {
        Self {
            name: name.and_then(normalize_name),
            phone: phone.and_then(normalize_phone),
            email: email.and_then(normalize_email),
        }
    }

    pub fn of_lead(lead: &leads::Model) -> Self {
        Self::new(
            Some(lead.dispensary_name.as_str()),
            lead.phone.as_deref(),
            lead.contact_email.as_deref(),
        )
    }

    fn get(&self, field: MatchField) -> Option<&str> {
        match field {
            MatchField::Name => self.name.as_deref(),
            MatchField::Phone => self.phone.as_deref(),
            MatchField::Email => self.email.as_deref(),
        }
    }

    /// Fields on which `self` and `other` share a key, in reporting order.
    pub fn shared_with(&self, other: &DedupKeys) -> Vec<MatchField> {
        MatchField::ORDER
            .into_iter()
            .filter(|&field| match (self.get(field), other.get(field)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            })
            .collect()
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct DuplicateGroup {
    pub reason: MatchField,
    pub key: String,
    pub leads: Vec<leads::Model>,
}

/// Clusters `leads` by each key; input order decides member order.
pub fn group_duplicates(leads: &[leads::Model]) -> Vec<DuplicateGroup> {
    let keys: Vec<DedupKeys> = leads.iter().map(DedupKeys::of_lead).collect();
    let mut seen_sets: HashSet<Vec<i32>> = HashSet::new();
    let mut groups = Vec::new();

    for field in MatchField::ORDER {
        let mut buckets: Vec<(String, Vec<usize>)> = Vec::new();
        let mut positions: HashMap<&str, usize> = HashMap::new();
        for (idx, lead_keys) in keys.iter().enumerate() {
            let Some(key) = lead_keys.get(field) else {
                continue;
            };
            match positions.get(key) {
                Some(&pos) => buckets[pos].1.push(idx),
                None => {
                    positions.insert(key, buckets.len());
                    buckets.push((key.to_string(), vec![idx]));
                }
            }
        }

        for (key, members) in buckets {
            if members.len() < 2 {
                continue;
            }
            let mut id_set: Vec<i32> = members.iter().map(|&i| leads[i].id).collect();
            id_set.sort_unstable();
            if !seen_sets.insert(id_set) {
                continue;
            }
            groups.push(DuplicateGroup {
                reason: field,
                key,
                leads: members.iter().map(|&i| leads[i].clone()).collect(),
            });
        }
    }

    groups
}

#[instrument(skip(db))]
pub async fn find_duplicate_groups(db: &DbPool) -> CrmResult<Vec<DuplicateGroup>> {
    let all = leads::Entity::find()
        .order_by_asc(leads::Column::Id)
        .all(db)
        .await?;
    let groups = group_duplicates(&all);
    tracing::debug!(groups = groups.len(), "duplicate scan finished");
    Ok(groups)
}

/// A not-yet-saved lead (or an edit of one) to check against existing rows.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DuplicateCandidate {
    #[serde(default)]
    pub dispensary_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub contact_email: Option<String>,
    /// Lead to leave out, e.g. the one being edited.
    #[serde(default)]
    pub exclude_id: Option<i32>,
}

impl DuplicateCandidate {
    fn keys(&self) -> DedupKeys {
        DedupKeys::new(
            clean(self.dispensary_name.clone()).as_deref(),
            clean(self.phone.clone()).as_deref(),
            clean(self.contact_email.clone()).as_deref(),
        )
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct DuplicateMatch {
    pub lead: leads::Model,
    pub matched_on: Vec<MatchField>,
}

#[instrument(skip(db, candidate))]
pub async fn check_duplicates(
    db: &DbPool,
    candidate: &DuplicateCandidate,
) -> CrmResult<Vec<DuplicateMatch>> {
    let wanted = candidate.keys();
    if wanted == DedupKeys::default() {
        return Ok(Vec::new());
    }
    let all = leads::Entity::find()
        .order_by_asc(leads::Column::Id)
        .all(db)
        .await?;
    Ok(all
        .into_iter()
        .filter(|lead| Some(lead.id) != candidate.exclude_id)
        .filter_map(|lead| {
            let matched_on = wanted.shared_with(&DedupKeys::of_lead(&lead));
            (!matched_on.is_empty()).then_some(DuplicateMatch { lead, matched_on })
        })
        .collect())
}

/// In-memory key index used while importing many rows at once.
#[derive(Debug, Default)]
pub struct DuplicateIndex {
    by_field: HashMap<(MatchField, String), i32>,
}

impl DuplicateIndex {
    pub fn from_leads(leads: &[leads::Model]) -> Self {
        let mut index = Self::default();
        for lead in leads {
            index.insert(lead.id, &DedupKeys::of_lead(lead));
        }
        index
    }

    pub fn insert(&mut self, id: i32, keys: &DedupKeys) {
        for field in MatchField::ORDER {
            if let Some(key) = keys.get(field) {
                self.by_field.entry((field, key.to_string())).or_insert(id);
            }
        }
    }

    /// First existing lead sharing any key, with the field it matched on.
    pub fn find(&self, keys: &DedupKeys) -> Option<(i32, MatchField)> {
        MatchField::ORDER.into_iter().find_map(|field| {
            let key = keys.get(field)?;
            self.by_field
                .get(&(field, key.to_string()))
                .map(|&id| (id, field))
        })
    }
}
