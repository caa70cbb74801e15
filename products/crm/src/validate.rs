use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};
use platform_api::FieldError;

use crate::{CrmError, CrmResult};

/// Collects every failed field check so a request reports all of them at once.
#[derive(Debug, Default)]
pub(crate) struct Checks {
    errors: Vec<FieldError>,
}

impl Checks {
    pub(crate) fn fail(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError::new(field, message));
    }

    /// Trimmed non-empty value, or a "is required" error.
    pub(crate) fn required(&mut self, field: &str, value: Option<String>, max: usize) -> String {
        match self.optional(field, value, max) {
            Some(value) => value,
            None => {
                if !self.errors.iter().any(|e| e.field == field) {
                    self.fail(field, "is required");
                }
                String::new()
            }
        }
    }

    /// Trims, maps blank to `None` and enforces a character limit.
    pub(crate) fn optional(
        &mut self,
        field: &str,
        value: Option<String>,
        max: usize,
    ) -> Option<String> {
        let value = clean(value)?;
        if value.chars().count() > max {
            self.fail(field, format!("must be at most {max} characters"));
        }
        Some(value)
    }

    pub(crate) fn one_of<T: Copy>(
        &mut self,
        field: &str,
        value: Option<String>,
        parse: impl Fn(&str) -> Option<T>,
        allowed: &[&str],
    ) -> Option<T> {
        let value = clean(value)?;
        let parsed = parse(&value);
        if parsed.is_none() {
            self.fail(field, format!("must be one of {}", allowed.join(", ")));
        }
        parsed
    }

    pub(crate) fn date(&mut self, field: &str, value: Option<String>) -> Option<NaiveDate> {
        let value = clean(value)?;
        match parse_date(&value) {
            Some(date) => Some(date),
            None => {
                self.fail(field, "must be a date (YYYY-MM-DD)");
                None
            }
        }
    }

    pub(crate) fn timestamp(
        &mut self,
        field: &str,
        value: Option<String>,
    ) -> Option<DateTime<FixedOffset>> {
        let value = clean(value)?;
        if let Ok(parsed) = DateTime::parse_from_rfc3339(&value) {
            return Some(parsed);
        }
        match parse_date(&value).and_then(|d| d.and_hms_opt(0, 0, 0)) {
            Some(midnight) => Some(midnight.and_utc().fixed_offset()),
            None => {
                self.fail(field, "must be an RFC 3339 timestamp or a date");
                None
            }
        }
    }

    /// `HH:MM` (24h); stored normalized with zero padding.
    pub(crate) fn time_of_day(&mut self, field: &str, value: Option<String>) -> Option<String> {
        let value = clean(value)?;
        match NaiveTime::parse_from_str(&value, "%H:%M") {
            Ok(time) => Some(time.format("%H:%M").to_string()),
            Err(_) => {
                self.fail(field, "must be a time of day (HH:MM)");
                None
            }
        }
    }

    pub(crate) fn range(&mut self, field: &str, value: i32, min: i32, max: i32) {
        if value < min || value > max {
            self.fail(field, format!("must be between {min} and {max}"));
        }
    }

    pub(crate) fn finish(self) -> CrmResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(CrmError::Validation(self.errors))
        }
    }
}

pub(crate) fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%m/%d/%Y"))
        .ok()
}

pub(crate) fn today(now: DateTime<Utc>) -> NaiveDate {
    now.date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_reports_blank_values_once() {
        let mut checks = Checks::default();
        assert_eq!(checks.required("name", Some("   ".into()), 10), "");
        let Err(CrmError::Validation(errors)) = checks.finish() else {
            panic!("expected validation failure");
        };
        assert_eq!(errors, vec![FieldError::new("name", "is required")]);
    }

    #[test]
    fn dates_accept_iso_and_us_formats() {
        let mut checks = Checks::default();
        let iso = checks.date("d", Some("2025-03-04".into()));
        let us = checks.date("d", Some("03/04/2025".into()));
        assert_eq!(iso, us);
        assert!(checks.finish().is_ok());
    }

    #[test]
    fn time_of_day_is_normalized() {
        let mut checks = Checks::default();
        assert_eq!(checks.time_of_day("t", Some("9:05".into())), Some("09:05".into()));
        assert_eq!(checks.time_of_day("t", Some("25:00".into())), None);
        assert!(checks.finish().is_err());
    }

    #[test]
    fn timestamps_fall_back_to_midnight_utc() {
        let mut checks = Checks::default();
        let ts = checks.timestamp("at", Some("2025-05-01".into())).unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-05-01T00:00:00+00:00");
    }
}
