// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Retention tiers and the policy that enables them.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use lifecycle_common::ConfigError;

/// One retention granularity with its own bucket-floor function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tier {
    TenMinutely,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Tier {
    pub const ALL: [Tier; 6] = [
        Tier::TenMinutely,
        Tier::Hourly,
        Tier::Daily,
        Tier::Weekly,
        Tier::Monthly,
        Tier::Yearly,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Tier::TenMinutely => "ten_minutely",
            Tier::Hourly => "hourly",
            Tier::Daily => "daily",
            Tier::Weekly => "weekly",
            Tier::Monthly => "monthly",
            Tier::Yearly => "yearly",
        }
    }

    /// Start of the bucket containing `time`, in UTC.
    ///
    /// A time exactly on a boundary is its own bucket start.
    #[must_use]
    pub fn floor(self, time: DateTime<Utc>) -> DateTime<Utc> {
        let naive = time.naive_utc();
        let date = naive.date();
        let floored: Option<NaiveDateTime> = match self {
            Tier::TenMinutely => date.and_hms_opt(naive.hour(), naive.minute() - naive.minute() % 10, 0),
            Tier::Hourly => date.and_hms_opt(naive.hour(), 0, 0),
            Tier::Daily => date.and_hms_opt(0, 0, 0),
            Tier::Weekly => date
                .checked_sub_signed(Duration::days(i64::from(
                    date.weekday().num_days_from_monday(),
                )))
                .and_then(|monday| monday.and_hms_opt(0, 0, 0)),
            Tier::Monthly => date.with_day(1).and_then(|first| first.and_hms_opt(0, 0, 0)),
            Tier::Yearly => {
                NaiveDate::from_ymd_opt(date.year(), 1, 1).and_then(|first| first.and_hms_opt(0, 0, 0))
            }
        };
        floored.map_or(time, |n| Utc.from_utc_datetime(&n))
    }

    /// Oldest instant still covered by `count` buckets of this tier before `now`.
    ///
    /// `None` means the cutoff lies before the representable range, so every item
    /// is recent enough.
    #[must_use]
    pub fn cutoff(self, count: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let count = i64::from(count);
        match self {
            Tier::TenMinutely => now.checked_sub_signed(Duration::minutes(count * 10)),
            Tier::Hourly => now.checked_sub_signed(Duration::hours(count)),
            Tier::Daily => now.checked_sub_signed(Duration::days(count)),
            Tier::Weekly => now.checked_sub_signed(Duration::weeks(count)),
            Tier::Monthly => {
                let months = u32::try_from(count).ok()?;
                now.checked_sub_months(Months::new(months))
            }
            Tier::Yearly => {
                let months = u32::try_from(count).ok()?.checked_mul(12)?;
                now.checked_sub_months(Months::new(months))
            }
        }
    }
}

/// Six independent tier counts. `None` or `Some(0)` disables a tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub ten_minutely: Option<u32>,
    pub hourly: Option<u32>,
    pub daily: Option<u32>,
    pub weekly: Option<u32>,
    pub monthly: Option<u32>,
    pub yearly: Option<u32>,
}

impl RetentionPolicy {
    /// Snapshot defaults: two days of ten-minutely, a week of hourly, a month of
    /// daily, a quarter of weekly, half a year of monthly and three years of yearly.
    #[must_use]
    pub fn snapshot_defaults() -> Self {
        Self {
            ten_minutely: Some(288),
            hourly: Some(168),
            daily: Some(30),
            weekly: Some(13),
            monthly: Some(6),
            yearly: Some(3),
        }
    }

    #[must_use]
    pub fn count(&self, tier: Tier) -> Option<u32> {
        match tier {
            Tier::TenMinutely => self.ten_minutely,
            Tier::Hourly => self.hourly,
            Tier::Daily => self.daily,
            Tier::Weekly => self.weekly,
            Tier::Monthly => self.monthly,
            Tier::Yearly => self.yearly,
        }
    }

    #[must_use]
    pub fn with_count(mut self, tier: Tier, count: Option<u32>) -> Self {
        let slot = match tier {
            Tier::TenMinutely => &mut self.ten_minutely,
            Tier::Hourly => &mut self.hourly,
            Tier::Daily => &mut self.daily,
            Tier::Weekly => &mut self.weekly,
            Tier::Monthly => &mut self.monthly,
            Tier::Yearly => &mut self.yearly,
        };
        *slot = count;
        self
    }

    /// Tiers with a positive count, in granularity order.
    pub fn enabled_tiers(&self) -> impl Iterator<Item = (Tier, u32)> + '_ {
        Tier::ALL
            .into_iter()
            .filter_map(|tier| match self.count(tier) {
                Some(count) if count > 0 => Some((tier, count)),
                _ => None,
            })
    }

    /// A policy with no enabled tier would delete every item, so pruning refuses it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled_tiers().next().is_none() {
            return Err(ConfigError::InvalidPolicy(
                "at least one retention tier must have a count greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .expect("valid timestamp")
            .with_timezone(&Utc)
    }

    #[test]
    fn test_floor_per_tier() {
        // Thursday
        let t = at("2024-05-16T13:47:31.250Z");
        assert_eq!(Tier::TenMinutely.floor(t), at("2024-05-16T13:40:00Z"));
        assert_eq!(Tier::Hourly.floor(t), at("2024-05-16T13:00:00Z"));
        assert_eq!(Tier::Daily.floor(t), at("2024-05-16T00:00:00Z"));
        assert_eq!(Tier::Weekly.floor(t), at("2024-05-13T00:00:00Z"));
        assert_eq!(Tier::Monthly.floor(t), at("2024-05-01T00:00:00Z"));
        assert_eq!(Tier::Yearly.floor(t), at("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn test_boundary_is_own_bucket_start() {
        for tier in Tier::ALL {
            let boundary = tier.floor(at("2024-05-16T13:47:31Z"));
            assert_eq!(tier.floor(boundary), boundary, "{}", tier.name());
        }
        let monday = at("2024-05-13T00:00:00Z");
        assert_eq!(Tier::Weekly.floor(monday), monday);
    }

    #[test]
    fn test_weekly_floor_crosses_month_boundary() {
        // Sunday 2024-03-03 belongs to the week starting Monday 2024-02-26
        assert_eq!(
            Tier::Weekly.floor(at("2024-03-03T23:59:59Z")),
            at("2024-02-26T00:00:00Z")
        );
    }

    #[test]
    fn test_cutoffs() {
        let now = at("2024-05-31T12:00:00Z");
        assert_eq!(Tier::TenMinutely.cutoff(5, now), Some(at("2024-05-31T11:10:00Z")));
        assert_eq!(Tier::Hourly.cutoff(3, now), Some(at("2024-05-31T09:00:00Z")));
        assert_eq!(Tier::Daily.cutoff(2, now), Some(at("2024-05-29T12:00:00Z")));
        assert_eq!(Tier::Weekly.cutoff(1, now), Some(at("2024-05-24T12:00:00Z")));
        // calendar months clamp to the last valid day
        assert_eq!(Tier::Monthly.cutoff(3, now), Some(at("2024-02-29T12:00:00Z")));
        assert_eq!(Tier::Yearly.cutoff(2, now), Some(at("2022-05-31T12:00:00Z")));
    }

    #[test]
    fn test_cutoff_out_of_range() {
        let now = at("2024-05-31T12:00:00Z");
        assert_eq!(Tier::Yearly.cutoff(u32::MAX, now), None);
        assert_eq!(Tier::Monthly.cutoff(u32::MAX, now), None);
    }

    #[test]
    fn test_enabled_tiers_skip_zero_and_unset() {
        let policy = RetentionPolicy {
            hourly: Some(0),
            daily: Some(7),
            yearly: Some(1),
            ..Default::default()
        };
        let enabled: Vec<_> = policy.enabled_tiers().collect();
        assert_eq!(enabled, vec![(Tier::Daily, 7), (Tier::Yearly, 1)]);
    }

    #[test]
    fn test_validate_requires_one_tier() {
        assert!(RetentionPolicy::default().validate().is_err());
        assert!(RetentionPolicy::default()
            .with_count(Tier::Hourly, Some(0))
            .validate()
            .is_err());
        assert!(RetentionPolicy::snapshot_defaults().validate().is_ok());
    }
}
