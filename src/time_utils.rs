// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared helpers for date/time formatting and parsing.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

/// Format a UTC timestamp as RFC3339 using a `Z` suffix.
pub fn format_utc_rfc3339(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Current time as Unix epoch seconds.
pub fn now_epoch_seconds() -> i64 {
    Utc::now().timestamp()
}

/// Parse a CRM timestamp (RFC3339, `Z` or offset suffix) into UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Calendar date of a CRM date or timestamp.
///
/// Accepts `YYYY-MM-DD` as well as full timestamps, in which case only the
/// leading date part is used (no timezone conversion).
pub fn parse_calendar_date(raw: &str) -> Option<NaiveDate> {
    let date_part = raw.trim().get(..10)?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_calendar_date_variants() {
        let expected = NaiveDate::from_ymd_opt(2025, 1, 2);
        assert_eq!(parse_calendar_date("2025-01-02"), expected);
        assert_eq!(parse_calendar_date("2025-01-02T23:59:00Z"), expected);
        assert_eq!(parse_calendar_date("2025-01-02T10:00:00.000+05:00"), expected);
        assert_eq!(parse_calendar_date("2025-1-2"), None);
        assert_eq!(parse_calendar_date(""), None);
        assert_eq!(parse_calendar_date("not a date at all"), None);
    }

    #[test]
    fn test_parse_timestamp_offsets() {
        let z = parse_timestamp("2025-01-01T00:10:00Z").unwrap();
        let offset = parse_timestamp("2025-01-01T01:10:00+01:00").unwrap();
        assert_eq!(z, offset);
        assert!(parse_timestamp("2025-01-01").is_none());
    }
}
