// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

use std::{
    fmt::Debug,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use jiff::{Timestamp, Zoned, tz::TimeZone};

/// Module containing fake time sources for testing
///
/// To enable this module, you must enable the `test-util` feature.
#[cfg(feature = "test-util")]
pub mod fakes;

/// Trait for providing custom wall clocks
///
/// Implementors of this trait can be handed to [`TimeSource::custom`] to pin or
/// step the clock that window boundaries are computed from.
pub trait Time: Send + Sync + Debug {
    /// Get the current system time
    fn now(&self) -> SystemTime;
}

/// The clock a tracker reads `now` from.
///
/// Cloning is cheap; a custom source is shared behind an [`Arc`].
#[derive(Clone, Default)]
pub enum TimeSource {
    /// Use the system time
    #[default]
    System,
    /// Use a custom time source
    Custom(Arc<dyn Time>),
}

impl Debug for TimeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "TimeSource::System"),
            Self::Custom(_) => write!(f, "TimeSource::Custom(...)"),
        }
    }
}

impl TimeSource {
    /// Create a new TimeSource with a custom time implementation
    ///
    /// # Examples
    ///
    /// ```
    /// use usertally_timesource::{TimeSource, fakes::StaticTimeSource};
    /// use std::time::UNIX_EPOCH;
    ///
    /// let ts = TimeSource::custom(StaticTimeSource::at_time(UNIX_EPOCH));
    /// assert_eq!(ts.epoch_millis(), 0);
    /// ```
    pub fn custom(custom: impl Time + 'static) -> TimeSource {
        Self::Custom(Arc::new(custom))
    }

    /// Get the current [`SystemTime`] from this time source
    pub fn system_time(&self) -> SystemTime {
        match self {
            Self::System => SystemTime::now(),
            Self::Custom(ts) => ts.now(),
        }
    }

    /// Get the current time as a [`jiff::Timestamp`]
    ///
    /// Clocks outside of the range jiff can represent (years -9999 to 9999)
    /// are reported as the Unix epoch.
    pub fn timestamp(&self) -> Timestamp {
        Timestamp::try_from(self.system_time()).unwrap_or(Timestamp::UNIX_EPOCH)
    }

    /// Milliseconds since the Unix epoch, negative before 1970
    pub fn epoch_millis(&self) -> i64 {
        self.timestamp().as_millisecond()
    }

    /// The current time as civil time in UTC
    ///
    /// All window boundaries are computed in UTC so that instances running in
    /// different time zones agree on when an hour, day or week began.
    ///
    /// # Examples
    ///
    /// ```
    /// use usertally_timesource::{TimeSource, fakes::StaticTimeSource};
    ///
    /// let at: jiff::Timestamp = "2024-03-04T10:15:00Z".parse().unwrap();
    /// let ts = TimeSource::custom(StaticTimeSource::at_timestamp(at));
    /// let now = ts.utc();
    /// assert_eq!((now.hour(), now.minute()), (10, 15));
    /// ```
    pub fn utc(&self) -> Zoned {
        self.timestamp().to_zoned(TimeZone::UTC)
    }

    /// Time elapsed since `earlier`, or zero if the clock moved backwards
    pub fn since(&self, earlier: SystemTime) -> std::time::Duration {
        self.system_time()
            .duration_since(earlier)
            .unwrap_or_default()
    }
}

/// Converts an epoch-millisecond timestamp back into a [`SystemTime`]
pub fn system_time_from_millis(millis: i64) -> SystemTime {
    let offset = std::time::Duration::from_millis(millis.unsigned_abs());
    if millis >= 0 {
        UNIX_EPOCH + offset
    } else {
        UNIX_EPOCH - offset
    }
}
