// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    fmt,
    future::Future,
    pin::pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use futures::future::{Either, select};
use hashbrown::HashMap;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use usertally_timesource::TimeSource;

/// Runs named jobs on a fixed cadence.
///
/// Each job gets its own task. The first run is aligned to the next wall-clock
/// multiple of the interval (a 1 minute job runs at the top of every minute),
/// and a job is awaited before its next run is considered, so it never
/// overlaps itself; runs that would have started while it was still busy are
/// skipped rather than queued.
///
/// Must be used within a Tokio runtime. Clones share the same set of jobs.
#[derive(Clone)]
pub struct Scheduler {
    tasks: TaskTracker,
    shutdown: CancellationToken,
    jobs: Arc<Mutex<HashMap<String, CancellationToken>>>,
    time: TimeSource,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("jobs", &self.jobs().len())
            .field("time", &self.time)
            .finish()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Scheduler aligning to the system clock
    pub fn new() -> Self {
        Self::with_time_source(TimeSource::System)
    }

    /// Scheduler aligning to `time`
    pub fn with_time_source(time: TimeSource) -> Self {
        Self {
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            jobs: Arc::default(),
            time,
        }
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `job` every `every` until [`Scheduler::unschedule`] is called
    /// with `name` or the scheduler shuts down.
    pub fn schedule<F, Fut>(&self, name: &str, every: Duration, job: F) -> Result<(), ScheduleError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if every.is_zero() {
            return Err(ScheduleError::ZeroInterval);
        }
        if self.shutdown.is_cancelled() {
            return Err(ScheduleError::ShutDown);
        }
        let token = {
            let mut jobs = self.jobs();
            if jobs.contains_key(name) {
                return Err(ScheduleError::AlreadyScheduled(name.to_owned()));
            }
            let token = self.shutdown.child_token();
            jobs.insert(name.to_owned(), token.clone());
            token
        };

        let first = Instant::now() + self.delay_until_aligned(every);
        let name = name.to_owned();
        tracing::info!(job = %name, ?every, "scheduled job");
        self.tasks.spawn(async move {
            let mut ticker = tokio::time::interval_at(first, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            while let Either::Left(_ticked) =
                select(pin!(ticker.tick()), pin!(token.cancelled())).await
            {
                tracing::trace!(job = %name, "running scheduled job");
                job().await;
            }
            tracing::debug!(job = %name, "job stopped");
        });
        Ok(())
    }

    fn delay_until_aligned(&self, every: Duration) -> Duration {
        let period = every.as_millis();
        let now = self.time.epoch_millis();
        let Ok(now) = u128::try_from(now) else {
            return Duration::ZERO;
        };
        match now % period {
            0 => Duration::ZERO,
            offset => Duration::from_millis(u64::try_from(period - offset).unwrap_or(u64::MAX)),
        }
    }

    /// Stops the job called `name`. A run in progress finishes first.
    /// Returns whether such a job existed.
    pub fn unschedule(&self, name: &str) -> bool {
        match self.jobs().remove(name) {
            Some(token) => {
                token.cancel();
                tracing::info!(job = %name, "unscheduled job");
                true
            }
            None => false,
        }
    }

    /// Whether a job called `name` is scheduled
    pub fn is_scheduled(&self, name: &str) -> bool {
        self.jobs().contains_key(name)
    }

    /// Stops every job and waits for runs in progress to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.jobs().clear();
        self.tasks.close();
        self.tasks.wait().await;
    }
}

/// Why a job could not be scheduled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// A job with this name is already running
    AlreadyScheduled(String),
    /// The interval was zero
    ZeroInterval,
    /// [`Scheduler::shutdown`] was called
    ShutDown,
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyScheduled(name) => write!(f, "job `{name}` is already scheduled"),
            Self::ZeroInterval => f.write_str("job interval must be non-zero"),
            Self::ShutDown => f.write_str("scheduler has shut down"),
        }
    }
}

impl std::error::Error for ScheduleError {}
