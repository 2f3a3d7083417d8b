// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};

use jiff::Timestamp;

use crate::Time;

/// Simple static timesource that will always return the same time
#[derive(Debug)]
pub struct StaticTimeSource {
    now: SystemTime,
}

impl StaticTimeSource {
    /// Create a new StaticTimeSource that always returns the given time
    ///
    /// # Examples
    ///
    /// ```
    /// use usertally_timesource::{TimeSource, fakes::StaticTimeSource};
    /// use std::time::UNIX_EPOCH;
    ///
    /// let ts = TimeSource::custom(StaticTimeSource::at_time(UNIX_EPOCH));
    /// assert_eq!(ts.system_time(), UNIX_EPOCH);
    /// ```
    pub fn at_time(time: impl Into<SystemTime>) -> Self {
        Self { now: time.into() }
    }

    /// Create a new StaticTimeSource pinned to a [`jiff::Timestamp`]
    pub fn at_timestamp(at: Timestamp) -> Self {
        Self::at_time(SystemTime::from(at))
    }
}

impl Time for StaticTimeSource {
    fn now(&self) -> SystemTime {
        self.now
    }
}

/// Timesource that is loaded with one time, but can be cloned and moved
/// forward through a shared handle.
///
/// Rollup tests use this to walk a tracker across hour, day and year
/// boundaries one tick at a time.
#[derive(Debug, Clone)]
pub struct ManuallyAdvancedTimeSource(Arc<Mutex<SystemTime>>);

impl ManuallyAdvancedTimeSource {
    /// Create a new ManuallyAdvancedTimeSource that is started with the given time.
    ///
    /// # Examples
    ///
    /// ```
    /// use usertally_timesource::{TimeSource, fakes::ManuallyAdvancedTimeSource};
    /// use std::time::{Duration, UNIX_EPOCH};
    ///
    /// let clock = ManuallyAdvancedTimeSource::at_time(UNIX_EPOCH);
    /// let ts = TimeSource::custom(clock.clone());
    /// clock.advance(Duration::from_secs(60));
    /// assert_eq!(ts.epoch_millis(), 60_000);
    /// ```
    pub fn at_time(time: impl Into<SystemTime>) -> Self {
        Self(Arc::new(Mutex::new(time.into())))
    }

    /// Create a new ManuallyAdvancedTimeSource starting at a [`jiff::Timestamp`]
    pub fn at_timestamp(at: Timestamp) -> Self {
        Self::at_time(SystemTime::from(at))
    }

    /// Replace the time returned by this source.
    pub fn update_time(&self, time: impl Into<SystemTime>) {
        *self.0.lock().unwrap() = time.into();
    }

    /// Replace the time returned by this source with a [`jiff::Timestamp`].
    pub fn update_timestamp(&self, at: Timestamp) {
        self.update_time(SystemTime::from(at));
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        *self.0.lock().unwrap() += by;
    }
}

impl Time for ManuallyAdvancedTimeSource {
    fn now(&self) -> SystemTime {
        *self.0.lock().unwrap()
    }
}
