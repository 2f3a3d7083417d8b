// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Promotion of completed windows into the next coarser tier.
//!
//! Each step is guarded by the `lastRollupTimestamp_<Tier>` property on the
//! scope node: a step whose destination window already began before the
//! recorded timestamp has run for this window and does nothing. Repeating a
//! tick, or restarting a process mid-window, is therefore safe.

use std::{fmt, time::Duration};

use jiff::{Zoned, civil::Weekday, tz::TimeZone};
use usertally_core::{
    Tier,
    store::{StoreError, WINDOW_NODE_TYPE, WindowSession, WindowStore, WriteMode},
};

use crate::{
    scope::{Layout, Scope},
    timed,
};

/// Scope node property naming the year the `Year` tier holds data for.
pub const DATA_YEAR_PROPERTY: &str = "dataYear";

/// One step of the cascade: move `from` into `to` when `due` holds for the
/// UTC civil time of the tick.
#[derive(Clone, Copy)]
struct Promotion {
    from: Tier,
    to: Tier,
    due: fn(&Zoned) -> bool,
}

fn always(_: &Zoned) -> bool {
    true
}

fn midnight(now: &Zoned) -> bool {
    now.hour() == 0 && now.minute() == 0
}

fn monday_midnight(now: &Zoned) -> bool {
    midnight(now) && now.weekday() == Weekday::Monday
}

fn first_of_month(now: &Zoned) -> bool {
    midnight(now) && now.day() == 1
}

fn first_of_year(now: &Zoned) -> bool {
    midnight(now) && now.day_of_year() == 1
}

const CASCADE: [Promotion; 5] = [
    Promotion { from: Tier::Minute, to: Tier::Hour, due: always },
    Promotion { from: Tier::Hour, to: Tier::Day, due: midnight },
    Promotion { from: Tier::Day, to: Tier::Week, due: monday_midnight },
    Promotion { from: Tier::Week, to: Tier::Month, due: first_of_month },
    Promotion { from: Tier::Month, to: Tier::Year, due: first_of_year },
];

/// Result of a single promotion step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromotionOutcome {
    /// Counts were moved and the boundary recorded
    Promoted {
        /// Number of users moved
        users: usize,
        /// Sum of the moved counts
        total: u64,
    },
    /// The destination's current window was already promoted into
    AlreadyDone,
}

/// Result of the year-boundary `Year → Forever` step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum YearEndOutcome {
    /// `Year` held an earlier year's data and was moved into `Forever`
    Archived {
        /// Number of users moved
        users: usize,
        /// Sum of the moved counts
        total: u64,
    },
    /// Nothing to archive; `dataYear` was still advanced
    NothingToArchive,
    /// This year boundary was already processed
    AlreadyDone,
}

/// What a [`RollupEngine::roll_up`] pass did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RollupSummary {
    /// Destination tiers that received counts, finest first
    pub promoted: Vec<Tier>,
    /// Steps that failed and will be retried on a later tick
    pub failures: usize,
}

impl RollupSummary {
    /// True when every attempted step succeeded
    pub fn is_clean(&self) -> bool {
        self.failures == 0
    }
}

/// Why a rollup step was abandoned.
#[derive(Debug)]
pub enum RollupError {
    /// A window store call failed or timed out
    Store(StoreError),
    /// The window boundary could not be computed for `now`
    Clock(jiff::Error),
}

impl RollupError {
    /// True when a later tick may succeed where this one failed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(err) => err.is_transient(),
            Self::Clock(_) => false,
        }
    }
}

impl fmt::Display for RollupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(err) => fmt::Display::fmt(err, f),
            Self::Clock(err) => write!(f, "computing window boundary: {err}"),
        }
    }
}

impl std::error::Error for RollupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::Clock(err) => Some(err),
        }
    }
}

impl From<StoreError> for RollupError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<jiff::Error> for RollupError {
    fn from(value: jiff::Error) -> Self {
        Self::Clock(value)
    }
}

/// Runs the promotion cascade for a scope against a window store.
#[derive(Debug)]
pub struct RollupEngine<'a, S> {
    store: &'a S,
    layout: &'a Layout,
    store_timeout: Duration,
}

impl<'a, S: WindowStore> RollupEngine<'a, S> {
    /// Engine over `store`, bounding each store call by `store_timeout`
    pub fn new(store: &'a S, layout: &'a Layout, store_timeout: Duration) -> Self {
        Self {
            store,
            layout,
            store_timeout,
        }
    }

    /// Runs every step due at `now`, finest first, then the year-end step.
    ///
    /// A failing step is logged and skipped; the steps after it still run,
    /// each behind its own boundary guard.
    pub async fn roll_up(&self, scope: &Scope, now: &Zoned) -> RollupSummary {
        let now = now.with_time_zone(TimeZone::UTC);
        let mut summary = RollupSummary::default();
        for step in CASCADE.iter().filter(|step| (step.due)(&now)) {
            match self.promote(scope, step.from, step.to, &now).await {
                Ok(PromotionOutcome::Promoted { users, total }) => {
                    tracing::debug!(%scope, from = %step.from, to = %step.to, users, total, "promoted window");
                    if users > 0 {
                        summary.promoted.push(step.to);
                    }
                }
                Ok(PromotionOutcome::AlreadyDone) => {
                    tracing::trace!(%scope, to = %step.to, "window already promoted");
                }
                Err(err) => {
                    tracing::error!(?err, %scope, from = %step.from, to = %step.to, "promotion failed");
                    summary.failures += 1;
                }
            }
        }
        if first_of_year(&now) {
            match self.archive_year(scope, &now).await {
                Ok(YearEndOutcome::Archived { users, total }) => {
                    tracing::debug!(%scope, users, total, "archived previous year");
                    if users > 0 {
                        summary.promoted.push(Tier::Forever);
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::error!(?err, %scope, "year-end archive failed");
                    summary.failures += 1;
                }
            }
        }
        summary
    }

    /// Moves every count in `from` into `to` unless `to`'s current window was
    /// already promoted into, then records `now` as the promotion time. All of
    /// it lands in one commit.
    pub async fn promote(
        &self,
        scope: &Scope,
        from: Tier,
        to: Tier,
        now: &Zoned,
    ) -> Result<PromotionOutcome, RollupError> {
        let scope_path = self.layout.scope(scope)?;
        let from_path = self.layout.tier(scope, from)?;
        let to_path = self.layout.tier(scope, to)?;
        let boundary = to.window_start(now)?.as_millisecond();
        let now_millis = now.timestamp().as_millisecond();
        let guard = to.rollup_timestamp_property();

        let mut session = timed::open_session(self.store, self.store_timeout).await?;
        for path in [&scope_path, &from_path, &to_path] {
            session.get_or_create(path, WINDOW_NODE_TYPE).await?;
        }
        let last = match session.read_long(&scope_path, &guard).await? {
            Some(last) => last,
            None => {
                session.set_long(&scope_path, &guard, 0).await?;
                0
            }
        };
        if last >= boundary {
            session.commit().await?;
            return Ok(PromotionOutcome::AlreadyDone);
        }

        let moving = session.read_counts(&from_path).await?;
        session
            .write_counts(&to_path, &moving, WriteMode::Additive)
            .await?;
        for user in moving.keys() {
            session.remove_property(&from_path, user).await?;
        }
        session.set_long(&scope_path, &guard, now_millis).await?;
        session.commit().await?;

        Ok(PromotionOutcome::Promoted {
            users: moving.len(),
            total: moving.values().fold(0u64, |acc, c| acc.saturating_add(*c)),
        })
    }

    /// The year-boundary step: when the scope's `dataYear` names a year before
    /// `now`'s, `Year` is moved into `Forever`. `dataYear` then becomes the
    /// year that just ended. The step is guarded by `lastRollupTimestamp_Forever`
    /// and commits atomically.
    pub async fn archive_year(&self, scope: &Scope, now: &Zoned) -> Result<YearEndOutcome, RollupError> {
        let now = now.with_time_zone(TimeZone::UTC);
        let scope_path = self.layout.scope(scope)?;
        let year_path = self.layout.tier(scope, Tier::Year)?;
        let forever_path = self.layout.tier(scope, Tier::Forever)?;
        let boundary = Tier::Forever.window_start(&now)?.as_millisecond();
        let now_millis = now.timestamp().as_millisecond();
        let current_year = i64::from(now.year());
        let guard = Tier::Forever.rollup_timestamp_property();

        let mut session = timed::open_session(self.store, self.store_timeout).await?;
        for path in [&scope_path, &year_path, &forever_path] {
            session.get_or_create(path, WINDOW_NODE_TYPE).await?;
        }
        let last = session.read_long(&scope_path, &guard).await?.unwrap_or(0);
        if last >= boundary {
            return Ok(YearEndOutcome::AlreadyDone);
        }

        let data_year = session.read_long(&scope_path, DATA_YEAR_PROPERTY).await?;
        let outcome = match data_year {
            Some(year) if year < current_year => {
                let moving = session.read_counts(&year_path).await?;
                session
                    .write_counts(&forever_path, &moving, WriteMode::Additive)
                    .await?;
                for user in moving.keys() {
                    session.remove_property(&year_path, user).await?;
                }
                YearEndOutcome::Archived {
                    users: moving.len(),
                    total: moving.values().fold(0u64, |acc, c| acc.saturating_add(*c)),
                }
            }
            _ => YearEndOutcome::NothingToArchive,
        };
        session
            .set_long(&scope_path, DATA_YEAR_PROPERTY, current_year - 1)
            .await?;
        session.set_long(&scope_path, &guard, now_millis).await?;
        session.commit().await?;
        Ok(outcome)
    }
}
