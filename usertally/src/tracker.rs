// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{fmt, sync::Arc};

use arc_swap::ArcSwapOption;
use tokio::sync::Mutex;
use usertally_core::{
    CounterStore, Tier,
    store::{StoreError, WINDOW_NODE_TYPE, WindowSession, WindowStore, WriteMode},
};
use usertally_timesource::TimeSource;

use crate::{
    cluster::aggregate_cluster,
    config::{ConfigError, TrackerConfig},
    ingest::RequestTracker,
    refresh::refresh_counters,
    rollup::RollupEngine,
    scheduler::{ScheduleError, Scheduler},
    scope::{Layout, Scope},
    timed,
};

/// Name the rollup tick is scheduled under.
pub const PERSISTENCE_JOB: &str = "user-request-persistence";

/// This process's place in the cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Membership {
    /// Stable identifier of this instance; names its subtree
    pub instance_id: String,
    /// Whether this instance aggregates the cluster scope
    pub is_leader: bool,
}

/// Notification from the cluster membership service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TopologyEvent {
    /// First view of the topology after joining
    Init(Membership),
    /// A topology change is in progress; the view is not settled
    Changing,
    /// The topology changed
    Changed(Membership),
    /// Only instance properties changed
    PropertiesChanged(Membership),
}

/// What a call to [`Tracker::tick`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Tracking is disabled in the configuration
    Disabled,
    /// Another tick was still running
    Skipped,
    /// No topology event has identified this instance yet
    NoIdentity,
    /// The tick ran to the end
    Completed {
        /// Whether the cluster scope was aggregated
        leader: bool,
        /// Steps that failed and were left for a later tick
        failures: usize,
    },
}

pub(crate) struct Inner<S> {
    pub(crate) store: S,
    pub(crate) counters: CounterStore,
    pub(crate) config: TrackerConfig,
    pub(crate) layout: Layout,
    membership: ArcSwapOption<Membership>,
    time: TimeSource,
    // held for the whole of a tick, and by `stop` while the instance leaves
    ticking: Mutex<()>,
}

/// The per-process tracking context.
///
/// Owns the in-memory counters and drives the rollup, persist, aggregate and
/// refresh cycle against a [`WindowStore`]. Construct one at process start and
/// hand clones to the scheduler and the request path; clones share all state.
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use usertally::{Membership, TickOutcome, TopologyEvent, Tracker, TrackerConfig};
/// use usertally_core::{Tier, store::LocalWindowStore};
///
/// let tracker = Tracker::new(LocalWindowStore::in_memory(), TrackerConfig::default()).unwrap();
/// tracker.handle_topology_event(TopologyEvent::Init(Membership {
///     instance_id: "node-1".into(),
///     is_leader: true,
/// }));
/// tracker.request_tracker().track(Some("alice"));
///
/// let outcome = tracker.tick().await;
/// assert_eq!(outcome, TickOutcome::Completed { leader: true, failures: 0 });
/// // persisted, and summed into the cluster scope by the leader
/// assert_eq!(tracker.snapshot(Tier::Minute).get("alice"), None);
/// let cluster = tracker.fetch_cluster_wide(&[Tier::Minute]).await;
/// assert_eq!(cluster["1 Minute"]["alice"], 1);
/// # }
/// ```
pub struct Tracker<S> {
    pub(crate) inner: Arc<Inner<S>>,
}

impl<S> Clone for Tracker<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S> fmt::Debug for Tracker<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("config", &self.inner.config)
            .field("membership", &self.inner.membership.load_full())
            .field("counters", &self.inner.counters)
            .finish()
    }
}

impl<S: WindowStore> Tracker<S> {
    /// Tracker over `store` reading the system clock.
    pub fn new(store: S, config: TrackerConfig) -> Result<Self, ConfigError> {
        Self::with_time_source(store, config, TimeSource::System)
    }

    /// Tracker over `store` reading `time`.
    pub fn with_time_source(
        store: S,
        config: TrackerConfig,
        time: TimeSource,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let layout = Layout::new(config.root()?);
        Ok(Self {
            inner: Arc::new(Inner {
                store,
                counters: CounterStore::new(),
                config,
                layout,
                membership: ArcSwapOption::empty(),
                time,
                ticking: Mutex::new(()),
            }),
        })
    }

    /// The in-memory counters
    pub fn counters(&self) -> &CounterStore {
        &self.inner.counters
    }

    /// Handle for the request path
    pub fn request_tracker(&self) -> RequestTracker {
        RequestTracker::new(self.inner.counters.clone())
    }

    /// The validated configuration
    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    /// The backing window store
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// Node layout under the configured root
    pub fn layout(&self) -> &Layout {
        &self.inner.layout
    }

    /// Identity and leadership from the latest settled topology event
    pub fn membership(&self) -> Option<Arc<Membership>> {
        self.inner.membership.load_full()
    }

    /// Records identity and leadership. Only `Init` and `Changed` carry a
    /// settled view; other events are ignored.
    pub fn handle_topology_event(&self, event: TopologyEvent) {
        match event {
            TopologyEvent::Init(membership) | TopologyEvent::Changed(membership) => {
                tracing::info!(
                    instance = %membership.instance_id,
                    leader = membership.is_leader,
                    "cluster membership updated"
                );
                self.inner.membership.store(Some(Arc::new(membership)));
            }
            TopologyEvent::Changing | TopologyEvent::PropertiesChanged(_) => {
                tracing::trace!(?event, "ignoring topology event");
            }
        }
    }

    /// One scheduler cycle.
    ///
    /// Rolls up this instance's scope, then persists the live `Minute` counts
    /// into it, so traffic seen by a tick that crosses a boundary counts toward
    /// the window that just opened. A leader then rolls up the cluster scope,
    /// promoting the sum taken on the previous tick, before recomputing
    /// `cluster/Minute` from every instance. The promoted cluster window does
    /// not depend on whether followers ticked before or after the leader.
    /// Finally the in-memory tiers are reloaded.
    ///
    /// Never fails: each failing step is logged, counted in the outcome and
    /// retried on the next tick. A tick started while another is running
    /// returns [`TickOutcome::Skipped`].
    pub async fn tick(&self) -> TickOutcome {
        if !self.inner.config.enabled {
            return TickOutcome::Disabled;
        }
        let Ok(_ticking) = self.inner.ticking.try_lock() else {
            tracing::warn!("previous tick still running, skipping");
            return TickOutcome::Skipped;
        };
        let Some(membership) = self.membership() else {
            tracing::warn!("instance identity unknown, skipping tick");
            return TickOutcome::NoIdentity;
        };

        let now = self.inner.time.utc();
        let timeout = self.inner.config.store_timeout();
        let instance = Scope::Instance(membership.instance_id.clone());
        let engine = RollupEngine::new(&self.inner.store, &self.inner.layout, timeout);
        let mut failures = 0;

        failures += engine.roll_up(&instance, &now).await.failures;

        if let Err(err) = self.persist_live(&instance).await {
            tracing::error!(?err, %instance, "persisting live counts failed");
            failures += 1;
        }

        if membership.is_leader {
            failures += engine.roll_up(&Scope::Cluster, &now).await.failures;
            if let Err(err) = aggregate_cluster(&self.inner.store, &self.inner.layout, timeout).await {
                tracing::error!(?err, "cluster aggregation failed");
                failures += 1;
            }
        }

        if let Err(err) = refresh_counters(
            &self.inner.store,
            &self.inner.layout,
            &instance,
            &self.inner.counters,
            timeout,
        )
        .await
        {
            tracing::error!(?err, %instance, "refreshing in-memory counts failed");
            failures += 1;
        }

        TickOutcome::Completed {
            leader: membership.is_leader,
            failures,
        }
    }

    /// Moves the live `Minute` counts into the instance's persisted `Minute`
    /// node. Counts are put back in memory if the commit does not land.
    async fn persist_live(&self, instance: &Scope) -> Result<(), StoreError> {
        let live = self.inner.counters.drain(Tier::Minute);
        if live.is_empty() {
            return Ok(());
        }
        let result = async {
            let path = self.inner.layout.tier(instance, Tier::Minute)?;
            let mut session =
                timed::open_session(&self.inner.store, self.inner.config.store_timeout()).await?;
            session.get_or_create(&path, WINDOW_NODE_TYPE).await?;
            session
                .write_counts(&path, &live, WriteMode::Additive)
                .await?;
            session.commit().await
        }
        .await;
        if result.is_err() {
            self.inner.counters.restore(live);
        }
        result
    }

    /// Schedules [`Tracker::tick`] under [`PERSISTENCE_JOB`] at the configured
    /// interval. Returns `Ok(false)` without scheduling when disabled.
    pub fn start(&self, scheduler: &Scheduler) -> Result<bool, ScheduleError> {
        if !self.inner.config.enabled {
            tracing::info!("user request tracking disabled, not scheduling");
            return Ok(false);
        }
        let tracker = self.clone();
        scheduler.schedule(
            PERSISTENCE_JOB,
            self.inner.config.scheduler_interval(),
            move || {
                let tracker = tracker.clone();
                async move {
                    tracker.tick().await;
                }
            },
        )?;
        Ok(true)
    }

    /// Unschedules the tick and deletes this instance's subtree, so the
    /// cluster sum stops including it.
    ///
    /// A tick already running is waited for first. The identity is dropped,
    /// so later ticks return [`TickOutcome::NoIdentity`] until the next
    /// topology event instead of recreating the subtree.
    pub async fn stop(&self, scheduler: &Scheduler) {
        scheduler.unschedule(PERSISTENCE_JOB);
        let _ticking = self.inner.ticking.lock().await;
        let Some(membership) = self.inner.membership.swap(None) else {
            return;
        };
        let instance = Scope::Instance(membership.instance_id.clone());
        if let Err(err) = self.remove_scope(&instance).await {
            tracing::error!(?err, %instance, "removing instance data failed");
        }
    }

    async fn remove_scope(&self, scope: &Scope) -> Result<(), StoreError> {
        let path = self.inner.layout.scope(scope)?;
        let mut session =
            timed::open_session(&self.inner.store, self.inner.config.store_timeout()).await?;
        if session.exists(&path).await? {
            session.delete(&path).await?;
            session.commit().await?;
            tracing::info!(%scope, "removed instance data");
        }
        Ok(())
    }
}
