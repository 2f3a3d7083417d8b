// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The seven time windows counts are rolled through.

use std::{fmt, str::FromStr};

use jiff::{Timestamp, Zoned, civil::Date, tz::TimeZone};
use serde::{Deserialize, Serialize};

const MINUTE_MS: i64 = 60 * 1000;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

/// A time-window granularity.
///
/// Tiers are ordered finest to coarsest, so `Tier::Minute < Tier::Forever`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    /// Live counts that have not been promoted yet
    Minute,
    /// Counts promoted at the start of each hour
    Hour,
    /// Counts promoted at midnight
    Day,
    /// Counts promoted at Monday midnight
    Week,
    /// Counts promoted on the first of the month
    Month,
    /// Counts promoted on the first of January
    Year,
    /// Everything older than the previous year
    Forever,
}

impl Tier {
    /// Every tier, finest first.
    pub const ALL: [Tier; 7] = [
        Tier::Minute,
        Tier::Hour,
        Tier::Day,
        Tier::Week,
        Tier::Month,
        Tier::Year,
        Tier::Forever,
    ];

    /// Node name of this tier under an instance or cluster scope.
    pub const fn name(self) -> &'static str {
        match self {
            Tier::Minute => "Minute",
            Tier::Hour => "Hour",
            Tier::Day => "Day",
            Tier::Week => "Week",
            Tier::Month => "Month",
            Tier::Year => "Year",
            Tier::Forever => "Forever",
        }
    }

    /// Position in [`Tier::ALL`].
    pub const fn ordinal(self) -> usize {
        self as usize
    }

    /// The tier this one is promoted into, if any.
    pub const fn coarser(self) -> Option<Tier> {
        match self {
            Tier::Minute => Some(Tier::Hour),
            Tier::Hour => Some(Tier::Day),
            Tier::Day => Some(Tier::Week),
            Tier::Week => Some(Tier::Month),
            Tier::Month => Some(Tier::Year),
            Tier::Year => Some(Tier::Forever),
            Tier::Forever => None,
        }
    }

    /// Label used by the reporting surface, numbered by recency so that
    /// lexicographic order matches tier order: `"1 Minute"` ... `"7 Forever"`.
    pub fn report_label(self) -> String {
        format!("{} {}", self.ordinal() + 1, self.name())
    }

    /// Bookkeeping property on the scope node recording, in epoch millis,
    /// when counts were last promoted into this tier.
    pub fn rollup_timestamp_property(self) -> String {
        format!("lastRollupTimestamp_{}", self.name())
    }

    /// The instant the current window of this tier began, in UTC.
    ///
    /// `Week` windows start on Monday. `Forever` is promoted into once per
    /// year, so it shares the `Year` boundary.
    ///
    /// ```
    /// use usertally_core::Tier;
    ///
    /// let now = "2024-05-15T13:45:12Z".parse::<jiff::Timestamp>().unwrap()
    ///     .to_zoned(jiff::tz::TimeZone::UTC);
    /// let start = Tier::Week.window_start(&now).unwrap();
    /// assert_eq!(start.to_string(), "2024-05-13T00:00:00Z");
    /// ```
    pub fn window_start(self, now: &Zoned) -> Result<Timestamp, jiff::Error> {
        let now = now.with_time_zone(TimeZone::UTC);
        let millis = now.timestamp().as_millisecond();
        let start = match self {
            Tier::Minute => floor(millis, MINUTE_MS),
            Tier::Hour => floor(millis, HOUR_MS),
            Tier::Day => floor(millis, DAY_MS),
            Tier::Week => {
                let days_since_monday = i64::from(now.weekday().to_monday_zero_offset());
                floor(millis, DAY_MS) - days_since_monday * DAY_MS
            }
            Tier::Month => return start_of(Date::new(now.year(), now.month(), 1)?),
            Tier::Year | Tier::Forever => return start_of(Date::new(now.year(), 1, 1)?),
        };
        Timestamp::from_millisecond(start)
    }
}

fn floor(millis: i64, unit: i64) -> i64 {
    millis.div_euclid(unit) * unit
}

fn start_of(date: Date) -> Result<Timestamp, jiff::Error> {
    Ok(date.to_zoned(TimeZone::UTC)?.timestamp())
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returned when parsing a tier name that does not exist.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownTier(pub String);

impl fmt::Display for UnknownTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown tier `{}`", self.0)
    }
}

impl std::error::Error for UnknownTier {}

impl FromStr for Tier {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tier::ALL
            .into_iter()
            .find(|tier| tier.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownTier(s.to_owned()))
    }
}
