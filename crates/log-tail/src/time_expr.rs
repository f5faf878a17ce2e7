// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Start and end times given as text, e.g. `"2 hours ago"`, `"now"`,
//! `"2024-05-31 12:00:00"` or epoch seconds.

use std::sync::OnceLock;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use lifecycle_common::ConfigError;
use regex::Regex;

const RELATIVE_PATTERN: &str =
    r"^(\d+)\s?(m|minutes?|h|hours?|d|days?|w|weeks?)(?:\s+ago)?$";

fn relative_pattern() -> Option<&'static Regex> {
    static RELATIVE: OnceLock<Option<Regex>> = OnceLock::new();
    RELATIVE
        .get_or_init(|| Regex::new(RELATIVE_PATTERN).ok())
        .as_ref()
}

/// How far back a tail starts when no start time is given.
pub const DEFAULT_LOOKBACK_SECS: i64 = 60;

/// Parses `text` relative to `now`. All results are UTC.
pub fn parse_time_expression(text: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, ConfigError> {
    let text = text.trim();
    let invalid = || ConfigError::InvalidTimeExpression(text.to_string());

    if text.eq_ignore_ascii_case("now") {
        return Ok(now);
    }

    if let Some(captures) = relative_pattern().and_then(|re| re.captures(text)) {
        let amount: i64 = captures[1].parse().map_err(|_| invalid())?;
        let unit = match captures[2].chars().next() {
            Some('m') => Duration::try_minutes(amount),
            Some('h') => Duration::try_hours(amount),
            Some('d') => Duration::try_days(amount),
            Some('w') => Duration::try_weeks(amount),
            _ => None,
        };
        return unit
            .and_then(|offset| now.checked_sub_signed(offset))
            .ok_or_else(invalid);
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Ok(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|naive| naive.and_utc())
            .ok_or_else(invalid);
    }

    if let Ok(seconds) = text.parse::<i64>() {
        return Utc.timestamp_opt(seconds, 0).single().ok_or_else(invalid);
    }

    Err(invalid())
}

/// Query start in epoch milliseconds; `now - 60s` when absent.
pub fn start_time_millis(text: Option<&str>, now: DateTime<Utc>) -> Result<i64, ConfigError> {
    match text.map(str::trim).filter(|t| !t.is_empty()) {
        Some(text) => parse_time_expression(text, now).map(|t| t.timestamp_millis()),
        None => Ok((now - Duration::seconds(DEFAULT_LOOKBACK_SECS)).timestamp_millis()),
    }
}

/// Query end in epoch milliseconds; `None` means tail indefinitely.
pub fn end_time_millis(text: Option<&str>, now: DateTime<Utc>) -> Result<Option<i64>, ConfigError> {
    text.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|text| parse_time_expression(text, now).map(|t| t.timestamp_millis()))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 31, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_relative_pattern_is_compiled_once() {
        let first = relative_pattern().expect("pattern compiles");
        let second = relative_pattern().expect("pattern compiles");
        assert!(std::ptr::eq(first, second));
    }

    #[test]
    fn test_relative_expressions() {
        let cases = [
            ("5m", Duration::minutes(5)),
            ("5 minutes ago", Duration::minutes(5)),
            ("1 minute", Duration::minutes(1)),
            ("2h", Duration::hours(2)),
            ("3 hours ago", Duration::hours(3)),
            ("1 day ago", Duration::days(1)),
            ("10d", Duration::days(10)),
            ("2 weeks ago", Duration::weeks(2)),
            ("1w", Duration::weeks(1)),
        ];
        for (text, offset) in cases {
            assert_eq!(parse_time_expression(text, now()), Ok(now() - offset), "{text}");
        }
    }

    #[test]
    fn test_absolute_expressions() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();
        assert_eq!(parse_time_expression("2024-05-01 08:30:00", now()), Ok(expected));
        assert_eq!(parse_time_expression("2024-05-01T08:30:00", now()), Ok(expected));
        assert_eq!(parse_time_expression("2024-05-01T10:30:00+02:00", now()), Ok(expected));
        assert_eq!(parse_time_expression("1714552200", now()), Ok(expected));
        assert_eq!(
            parse_time_expression("2024-05-01", now()),
            Ok(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_time_expression("now", now()), Ok(now()));
    }

    #[test]
    fn test_invalid_expressions() {
        for text in ["", "yesterday", "5 fortnights", "2024-13-01", "m5"] {
            assert_eq!(
                parse_time_expression(text, now()),
                Err(ConfigError::InvalidTimeExpression(text.to_string())),
                "{text}"
            );
        }
    }

    #[test]
    fn test_query_bounds() {
        assert_eq!(
            start_time_millis(None, now()),
            Ok(now().timestamp_millis() - 60_000)
        );
        assert_eq!(
            start_time_millis(Some("1h"), now()),
            Ok(now().timestamp_millis() - 3_600_000)
        );
        assert_eq!(end_time_millis(None, now()), Ok(None));
        assert_eq!(end_time_millis(Some("  "), now()), Ok(None));
        assert_eq!(
            end_time_millis(Some("now"), now()),
            Ok(Some(now().timestamp_millis()))
        );
        assert!(end_time_millis(Some("soon"), now()).is_err());
    }
}
