// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use assert2::{check, let_assert};
use jiff::{Timestamp, Zoned, tz::TimeZone};
use usertally::{
    Layout, Membership, Scope, TickOutcome, TopologyEvent, Tracker, TrackerConfig,
    rollup::{DATA_YEAR_PROPERTY, PromotionOutcome, RollupEngine, RollupError, YearEndOutcome},
};
use usertally_core::{
    CountMap, Tier,
    store::{LocalWindowStore, NodePath, Property, StoreError, WindowSession, WindowStore, WriteMode},
};
use usertally_timesource::{TimeSource, fakes::ManuallyAdvancedTimeSource};

const TIMEOUT: Duration = Duration::from_secs(5);

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn ts(s: &str) -> Timestamp {
    s.parse().unwrap()
}

fn at(s: &str) -> Zoned {
    ts(s).to_zoned(TimeZone::UTC)
}

fn counts(entries: &[(&str, u64)]) -> CountMap {
    entries.iter().map(|(u, c)| (u.to_string(), *c)).collect()
}

fn layout() -> Layout {
    Layout::new(NodePath::parse("/var/analytics/user-tracking").unwrap())
}

fn instance() -> Scope {
    Scope::Instance("node-1".into())
}

struct Harness {
    store: LocalWindowStore,
    clock: ManuallyAdvancedTimeSource,
    tracker: Tracker<LocalWindowStore>,
}

impl Harness {
    fn starting_at(start: &str) -> Self {
        init_logging();
        let store = LocalWindowStore::in_memory();
        let clock = ManuallyAdvancedTimeSource::at_timestamp(ts(start));
        let tracker = Tracker::with_time_source(
            store.clone(),
            TrackerConfig::default(),
            TimeSource::custom(clock.clone()),
        )
        .unwrap();
        tracker.handle_topology_event(TopologyEvent::Init(Membership {
            instance_id: "node-1".into(),
            is_leader: false,
        }));
        Self {
            store,
            clock,
            tracker,
        }
    }

    fn track(&self, user: &str, times: u64) {
        let requests = self.tracker.request_tracker();
        for _ in 0..times {
            check!(requests.track(Some(user)));
        }
    }

    async fn tick(&self) {
        let outcome = self.tracker.tick().await;
        check!(outcome == TickOutcome::Completed { leader: false, failures: 0 });
    }

    fn persisted(&self, tier: Tier) -> CountMap {
        let path = layout().tier(&instance(), tier).unwrap();
        self.store.node(&path).map(|node| node.counts()).unwrap_or_default()
    }

    fn scope_long(&self, name: &str) -> Option<i64> {
        let scope = layout().scope(&instance()).unwrap();
        match self.store.node(&scope)?.properties.get(name)? {
            Property::Long(v) => Some(*v),
            _ => None,
        }
    }

    fn persisted_total(&self) -> u64 {
        Tier::ALL
            .iter()
            .flat_map(|tier| self.persisted(*tier).into_values())
            .sum()
    }
}

#[tokio::test]
async fn new_year_midnight_cascades_to_year() {
    let h = Harness::starting_at("2024-01-01T00:00:00Z");
    seed(&h.store, Tier::Minute, &[("alice", 5)]).await;

    h.tick().await;

    for tier in [Tier::Minute, Tier::Hour, Tier::Day, Tier::Week, Tier::Month] {
        check!(h.persisted(tier).is_empty(), "tier {tier} should be empty");
    }
    check!(h.persisted(Tier::Year) == counts(&[("alice", 5)]));
    check!(h.persisted(Tier::Forever).is_empty());
    check!(h.scope_long(DATA_YEAR_PROPERTY) == Some(2023));

    check!(h.tracker.snapshot(Tier::Year).get("alice") == Some(&5));
    check!(h.tracker.snapshot(Tier::Minute).is_empty());
}

#[tokio::test]
async fn repeated_tick_in_same_window_changes_nothing() {
    let h = Harness::starting_at("2024-05-15T13:45:00Z");
    h.track("alice", 3);
    h.tick().await;
    check!(h.persisted(Tier::Minute) == counts(&[("alice", 3)]));
    check!(h.persisted(Tier::Hour).is_empty());

    let before = h.store.snapshot();
    h.tick().await;
    check!(h.store.snapshot() == before);

    h.clock.advance(Duration::from_secs(60));
    h.track("bob", 2);
    h.tick().await;
    check!(h.persisted(Tier::Minute) == counts(&[("alice", 3), ("bob", 2)]));
    check!(h.persisted(Tier::Hour).is_empty());

    // traffic seen by the boundary tick belongs to the hour that just opened
    h.clock.update_timestamp(ts("2024-05-15T14:00:00Z"));
    h.track("carol", 1);
    h.tick().await;
    check!(h.persisted(Tier::Minute) == counts(&[("carol", 1)]));
    check!(h.persisted(Tier::Hour) == counts(&[("alice", 3), ("bob", 2)]));
    check!(h.tracker.counters().read_all(Tier::Hour) == h.persisted(Tier::Hour));

    let before = h.store.snapshot();
    h.tick().await;
    check!(h.store.snapshot() == before);
}

#[tokio::test]
async fn restart_mid_window_does_not_promote_twice() {
    let h = Harness::starting_at("2024-05-15T13:45:00Z");
    h.track("alice", 1);
    h.tick().await;
    h.clock.update_timestamp(ts("2024-05-15T14:00:00Z"));
    h.tick().await;
    check!(h.persisted(Tier::Hour) == counts(&[("alice", 1)]));

    let restarted = Tracker::with_time_source(
        h.store.clone(),
        TrackerConfig::default(),
        TimeSource::custom(h.clock.clone()),
    )
    .unwrap();
    restarted.handle_topology_event(TopologyEvent::Init(Membership {
        instance_id: "node-1".into(),
        is_leader: false,
    }));
    h.clock.advance(Duration::from_secs(120));
    restarted.request_tracker().track(Some("alice"));
    restarted.tick().await;

    check!(h.persisted(Tier::Minute) == counts(&[("alice", 1)]));
    check!(h.persisted(Tier::Hour) == counts(&[("alice", 1)]));
    check!(restarted.snapshot(Tier::Hour).get("alice") == Some(&1));
}

#[tokio::test]
async fn walking_across_year_end_conserves_counts_and_keeps_guards_monotonic() {
    let h = Harness::starting_at("2024-12-31T23:50:00Z");
    let guards: Vec<String> = Tier::ALL[1..]
        .iter()
        .map(|tier| tier.rollup_timestamp_property())
        .collect();
    let mut last_seen = vec![0i64; guards.len()];
    let mut tracked = 0;

    for minute in 0..25u64 {
        let users = ["alice", "bob", "carol"];
        let user = users[(minute % 3) as usize];
        h.track(user, minute + 1);
        tracked += minute + 1;
        h.tick().await;

        check!(h.persisted_total() == tracked);
        for (guard, last) in guards.iter().zip(last_seen.iter_mut()) {
            let current = h.scope_long(guard).unwrap_or(0);
            check!(current >= *last, "{guard} moved backwards");
            *last = current;
        }
        h.clock.advance(Duration::from_secs(60));
    }

    // 2025-01-01 is a Wednesday: the midnight tick moved the old hours into
    // Day, and Day stays put until the next Monday. Traffic seen by the
    // midnight tick itself went into the new day's `Minute`.
    let upto_midnight: u64 = (1..=10).sum();
    check!(h.persisted(Tier::Day).values().sum::<u64>() == upto_midnight);
    check!(h.persisted(Tier::Week).is_empty());
    check!(h.persisted(Tier::Year).is_empty());
    check!(h.persisted(Tier::Forever).is_empty());
    check!(h.scope_long(DATA_YEAR_PROPERTY) == Some(2024));
}

async fn seed(store: &LocalWindowStore, tier: Tier, entries: &[(&str, u64)]) {
    let path = layout().tier(&instance(), tier).unwrap();
    let mut session = store.open_session().await.unwrap();
    session.get_or_create(&path, "nt:unstructured").await.unwrap();
    session
        .write_counts(&path, &counts(entries), WriteMode::Additive)
        .await
        .unwrap();
    session.commit().await.unwrap();
}

async fn set_scope_long(store: &LocalWindowStore, name: &str, value: i64) {
    let scope = layout().scope(&instance()).unwrap();
    let mut session = store.open_session().await.unwrap();
    session.get_or_create(&scope, "nt:unstructured").await.unwrap();
    session.set_long(&scope, name, value).await.unwrap();
    session.commit().await.unwrap();
}

fn node_counts(store: &LocalWindowStore, tier: Tier) -> CountMap {
    let path = layout().tier(&instance(), tier).unwrap();
    store.node(&path).map(|node| node.counts()).unwrap_or_default()
}

#[tokio::test]
async fn previous_year_is_archived_once() {
    let store = LocalWindowStore::in_memory();
    let layout = layout();
    let engine = RollupEngine::new(&store, &layout, TIMEOUT);
    seed(&store, Tier::Year, &[("alice", 7)]).await;
    seed(&store, Tier::Month, &[("alice", 1), ("bob", 2)]).await;
    set_scope_long(&store, DATA_YEAR_PROPERTY, 2023).await;

    let now = at("2025-01-01T00:00:00Z");
    let summary = engine.roll_up(&instance(), &now).await;
    check!(summary.is_clean());
    check!(summary.promoted == vec![Tier::Year, Tier::Forever]);
    check!(node_counts(&store, Tier::Forever) == counts(&[("alice", 8), ("bob", 2)]));
    check!(node_counts(&store, Tier::Year).is_empty());

    let before = store.snapshot();
    check!(engine.archive_year(&instance(), &now).await.unwrap() == YearEndOutcome::AlreadyDone);
    let again = engine.roll_up(&instance(), &now).await;
    check!(again.promoted.is_empty());
    check!(store.snapshot() == before);
}

#[tokio::test]
async fn promotion_moves_exactly_what_it_removes() {
    let store = LocalWindowStore::in_memory();
    let layout = layout();
    let engine = RollupEngine::new(&store, &layout, TIMEOUT);
    seed(&store, Tier::Hour, &[("alice", 4), ("bob", 1)]).await;
    seed(&store, Tier::Day, &[("alice", 10), ("carol", 3)]).await;

    let outcome = engine
        .promote(&instance(), Tier::Hour, Tier::Day, &at("2024-05-15T00:00:00Z"))
        .await
        .unwrap();
    check!(outcome == PromotionOutcome::Promoted { users: 2, total: 5 });
    check!(node_counts(&store, Tier::Hour).is_empty());
    check!(node_counts(&store, Tier::Day) == counts(&[("alice", 14), ("bob", 1), ("carol", 3)]));
}

#[tokio::test]
async fn reserved_properties_stay_behind() {
    let store = LocalWindowStore::in_memory();
    let layout = layout();
    let engine = RollupEngine::new(&store, &layout, TIMEOUT);
    let minute = layout.tier(&instance(), Tier::Minute).unwrap();
    {
        let mut session = store.open_session().await.unwrap();
        session.get_or_create(&minute, "nt:unstructured").await.unwrap();
        session.set_long(&minute, "alice", 2).await.unwrap();
        session.set_long(&minute, "sys:marker", 99).await.unwrap();
        session.commit().await.unwrap();
    }

    engine
        .promote(&instance(), Tier::Minute, Tier::Hour, &at("2024-05-15T13:45:00Z"))
        .await
        .unwrap();

    let left = store.node(&minute).unwrap();
    check!(left.counts().is_empty());
    check!(left.properties.get("sys:marker") == Some(&Property::Long(99)));
    check!(left.properties.contains_key("jcr:primaryType"));
    check!(node_counts(&store, Tier::Hour) == counts(&[("alice", 2)]));
}

#[tokio::test]
async fn failed_commit_leaves_state_for_the_next_tick() {
    let store = LocalWindowStore::in_memory();
    let layout = layout();
    let engine = RollupEngine::new(&store, &layout, TIMEOUT);
    seed(&store, Tier::Minute, &[("alice", 2)]).await;
    let now = at("2024-05-15T13:45:00Z");

    store.fail_next_commits(1);
    let_assert!(Err(err) = engine.promote(&instance(), Tier::Minute, Tier::Hour, &now).await);
    check!(err.is_transient());
    check!(node_counts(&store, Tier::Minute) == counts(&[("alice", 2)]));
    check!(node_counts(&store, Tier::Hour).is_empty());

    let retried = engine.promote(&instance(), Tier::Minute, Tier::Hour, &now).await.unwrap();
    check!(retried == PromotionOutcome::Promoted { users: 1, total: 2 });
}

#[tokio::test(start_paused = true)]
async fn hung_store_times_out_and_keeps_live_counts() {
    let h = Harness::starting_at("2024-05-15T13:45:00Z");
    let slow = Tracker::with_time_source(
        h.store.clone(),
        TrackerConfig {
            store_timeout_secs: 1,
            ..TrackerConfig::default()
        },
        TimeSource::custom(h.clock.clone()),
    )
    .unwrap();
    slow.handle_topology_event(TopologyEvent::Init(Membership {
        instance_id: "node-1".into(),
        is_leader: true,
    }));
    slow.request_tracker().track(Some("alice"));

    h.store.set_latency(Duration::from_secs(10));
    let_assert!(TickOutcome::Completed { failures, .. } = slow.tick().await);
    check!(failures > 0);
    check!(slow.counters().get(Tier::Minute, "alice") == Some(1));
    check!(node_counts(&h.store, Tier::Minute).is_empty());

    let engine = RollupEngine::new(&h.store, slow.layout(), Duration::from_secs(1));
    let_assert!(
        Err(RollupError::Store(StoreError::Timeout(_))) = engine
            .promote(&instance(), Tier::Minute, Tier::Hour, &at("2024-05-15T13:45:00Z"))
            .await
    );

    h.store.set_latency(Duration::ZERO);
    check!(slow.tick().await == TickOutcome::Completed { leader: true, failures: 0 });
    check!(slow.counters().get(Tier::Minute, "alice") == None);
    check!(node_counts(&h.store, Tier::Minute) == counts(&[("alice", 1)]));
}
