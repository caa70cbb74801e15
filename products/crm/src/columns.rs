//! Header auto-mapping for CSV and pasted imports.
//!
//! Advisory only: the caller may override any suggestion before importing.

use std::collections::HashSet;

use serde::Serialize;

/// Canonical lead fields with their accepted header aliases, in priority order.
/// Aliases are stored already normalized. Email and phone sit ahead of the
/// name fields so "contact ..." headers prefer them on fuzzy passes.
pub const FIELD_ALIASES: &[(&str, &[&str])] = &[
    (
        "dispensary_name",
        &[
            "dispensary name",
            "dispensary",
            "company name",
            "company",
            "business name",
            "business",
            "store name",
            "store",
            "account name",
            "account",
            "organization",
            "shop name",
        ],
    ),
    (
        "contact_email",
        &["contact email", "email", "email address", "e mail", "mail"],
    ),
    (
        "phone",
        &["phone", "phone number", "telephone", "mobile", "cell", "contact number"],
    ),
    ("address", &["address", "street address", "street", "address 1", "address line 1"]),
    ("city", &["city", "town"]),
    ("state", &["state", "province", "region"]),
    ("zip", &["zip", "zip code", "zipcode", "postal code", "postcode", "postal"]),
    (
        "contact_name",
        &["contact name", "contact", "full name", "name", "primary contact", "buyer"],
    ),
    ("manager_name", &["manager name", "manager", "store manager", "general manager"]),
    ("owner_name", &["owner name", "owner", "proprietor"]),
    ("website", &["website", "web site", "url", "site", "web"]),
    (
        "current_pos_system",
        &["current pos system", "pos system", "current pos", "pos", "point of sale"],
    ),
    (
        "deal_value",
        &["deal value", "value", "monthly value", "deal size", "amount", "revenue"],
    ),
    ("priority", &["priority"]),
    ("stage", &["stage", "pipeline stage", "status", "lead status"]),
    ("callback_days", &["callback days", "best days", "call days"]),
    ("callback_time_slots", &["callback time slots", "time slots", "best time", "call time"]),
    ("next_callback_date", &["next callback date", "next callback", "callback date", "follow up date"]),
    ("notes", &["notes", "note", "comments", "comment", "description"]),
    ("source", &["source", "lead source", "origin"]),
];

/// Lowercase, trim, drop anything neither alphanumeric nor whitespace,
/// collapse runs of whitespace.
pub fn normalize_header(raw: &str) -> String {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ColumnMapping {
    pub header: String,
    pub field: Option<&'static str>,
}

#[derive(Copy, Clone)]
enum Pass {
    Exact,
    Prefix,
    Substring,
}

impl Pass {
    fn matches(self, header: &str, alias: &str) -> bool {
        match self {
            Pass::Exact => header == alias,
            Pass::Prefix => header.starts_with(alias) || alias.starts_with(header),
            Pass::Substring => header.contains(alias) || alias.contains(header),
        }
    }
}

/// Maps each header to at most one field; one result per input header, in
/// input order.
pub fn auto_map_columns<S: AsRef<str>>(headers: &[S]) -> Vec<ColumnMapping> {
    let normalized: Vec<String> = headers
        .iter()
        .map(|h| normalize_header(h.as_ref()))
        .collect();
    let mut assigned: Vec<Option<&'static str>> = vec![None; headers.len()];
    let mut claimed: HashSet<&'static str> = HashSet::new();

    for pass in [Pass::Exact, Pass::Prefix, Pass::Substring] {
        for (idx, header) in normalized.iter().enumerate() {
            if assigned[idx].is_some() || header.is_empty() {
                continue;
            }
            let hit = FIELD_ALIASES.iter().find(|(field, aliases)| {
                !claimed.contains(field) && aliases.iter().any(|alias| pass.matches(header, alias))
            });
            if let Some(&(field, _)) = hit {
                claimed.insert(field);
                assigned[idx] = Some(field);
            }
        }
    }

    headers
        .iter()
        .zip(assigned)
        .map(|(header, field)| ColumnMapping {
            header: header.as_ref().to_string(),
            field,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(headers: &[&str]) -> Vec<Option<&'static str>> {
        auto_map_columns(headers).into_iter().map(|m| m.field).collect()
    }

    #[test]
    fn maps_the_documented_example() {
        assert_eq!(
            fields(&["Company Name", "E-mail", "Random123"]),
            vec![Some("dispensary_name"), Some("contact_email"), None]
        );
    }

    #[test]
    fn normalization_strips_punctuation_and_collapses_space() {
        assert_eq!(normalize_header("  Zip/Postal   CODE "), "zippostal code");
        assert_eq!(normalize_header("E-mail"), "email");
        assert_eq!(normalize_header("#!?"), "");
    }

    #[test]
    fn exact_matches_win_over_earlier_fuzzy_headers() {
        // "Phone Ext" would prefix-match phone, but the exact "Phone" header claims it first.
        assert_eq!(fields(&["Phone Ext", "Phone"]), vec![None, Some("phone")]);
    }

    #[test]
    fn claimed_fields_are_never_reassigned() {
        assert_eq!(
            fields(&["Store", "Dispensary"]),
            vec![Some("dispensary_name"), None]
        );
    }

    #[test]
    fn prefix_and_substring_passes() {
        assert_eq!(
            fields(&["Cell #", "Email (Work)", "Your Lead Source"]),
            vec![Some("phone"), Some("contact_email"), Some("source")]
        );
    }

    #[test]
    fn blank_headers_stay_unmapped() {
        assert_eq!(fields(&["", "  ", "City"]), vec![None, None, Some("city")]);
    }
}
