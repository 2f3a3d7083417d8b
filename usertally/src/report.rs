// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Read side: in-memory snapshots and persisted per-scope views.
//!
//! Nothing here returns an error. A scope or tier that cannot be read is
//! logged and left out, so callers always get whatever could be read.

use std::collections::BTreeMap;

use serde::Serialize;
use usertally_core::{
    CountMap, Tier,
    store::{StoreError, WindowSession, WindowStore},
};

use crate::{Tracker, scope::Scope, timed};

/// Counts per user, ordered by user id.
pub type UserCounts = BTreeMap<String, u64>;

/// Counts per tier, keyed by [`Tier::report_label`] so keys sort finest first.
pub type TierCounts = BTreeMap<String, UserCounts>;

/// Everything the tracker knows, as served by a reporting endpoint.
///
/// Serializes to `{"Cluster": {...}, "<instanceId>": {...}, ...}`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    /// The cluster scope
    #[serde(rename = "Cluster")]
    pub cluster: TierCounts,
    /// Each instance scope by instance id
    #[serde(flatten)]
    pub instances: BTreeMap<String, TierCounts>,
}

fn ordered(counts: CountMap) -> UserCounts {
    counts.into_iter().collect()
}

impl<S: WindowStore> Tracker<S> {
    /// Point-in-time copy of an in-memory tier
    pub fn snapshot(&self, tier: Tier) -> UserCounts {
        ordered(self.inner.counters.read_all(tier))
    }

    /// Clears every in-memory tier. Persisted data is untouched.
    pub fn reset_all(&self) {
        self.inner.counters.reset_all();
    }

    /// Persisted cluster-scope counts for `tiers`.
    pub async fn fetch_cluster_wide(&self, tiers: &[Tier]) -> TierCounts {
        match self.read_scope(&Scope::Cluster, tiers).await {
            Ok(counts) => counts,
            Err(err) => {
                tracing::error!(?err, "reading cluster counts failed");
                TierCounts::new()
            }
        }
    }

    /// Persisted counts for `tiers` of every instance scope, by instance id.
    pub async fn fetch_all_instances(&self, tiers: &[Tier]) -> BTreeMap<String, TierCounts> {
        let members = match self.instance_ids().await {
            Ok(members) => members,
            Err(err) => {
                tracing::error!(?err, "listing instances failed");
                return BTreeMap::new();
            }
        };
        let mut all = BTreeMap::new();
        for member in members {
            let scope = Scope::Instance(member.clone());
            match self.read_scope(&scope, tiers).await {
                Ok(counts) => {
                    all.insert(member, counts);
                }
                Err(err) => tracing::error!(?err, %scope, "reading instance counts failed"),
            }
        }
        all
    }

    /// Cluster and instance views of every tier.
    ///
    /// ```
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// use usertally::{Tracker, TrackerConfig};
    /// use usertally_core::store::LocalWindowStore;
    ///
    /// let tracker = Tracker::new(LocalWindowStore::in_memory(), TrackerConfig::default()).unwrap();
    /// let json = serde_json::to_value(tracker.report().await).unwrap();
    /// assert_eq!(json, serde_json::json!({ "Cluster": {} }));
    /// # }
    /// ```
    pub async fn report(&self) -> Report {
        Report {
            cluster: self.fetch_cluster_wide(&Tier::ALL).await,
            instances: self.fetch_all_instances(&Tier::ALL).await,
        }
    }

    async fn instance_ids(&self) -> Result<Vec<String>, StoreError> {
        let instances = self.inner.layout.instances()?;
        let mut session =
            timed::open_session(&self.inner.store, self.inner.config.store_timeout()).await?;
        if !session.exists(&instances).await? {
            return Ok(Vec::new());
        }
        session.children(&instances).await
    }

    async fn read_scope(&self, scope: &Scope, tiers: &[Tier]) -> Result<TierCounts, StoreError> {
        let mut session =
            timed::open_session(&self.inner.store, self.inner.config.store_timeout()).await?;
        let mut view = TierCounts::new();
        for tier in tiers {
            let path = self.inner.layout.tier(scope, *tier)?;
            if session.exists(&path).await? {
                view.insert(tier.report_label(), ordered(session.read_counts(&path).await?));
            }
        }
        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use assert2::check;
    use serde_json::json;
    use usertally_core::{Tier, store::LocalWindowStore};

    use super::{Report, TierCounts, UserCounts};
    use crate::{Membership, TopologyEvent, Tracker, TrackerConfig};

    #[test]
    fn report_serializes_cluster_beside_instances() {
        let mut report = Report::default();
        report.cluster.insert(
            Tier::Minute.report_label(),
            UserCounts::from([("alice".to_string(), 3)]),
        );
        report.instances.insert(
            "node-1".into(),
            TierCounts::from([(Tier::Hour.report_label(), UserCounts::new())]),
        );

        check!(
            serde_json::to_value(&report).unwrap()
                == json!({
                    "Cluster": { "1 Minute": { "alice": 3 } },
                    "node-1": { "2 Hour": {} },
                })
        );
    }

    #[tokio::test]
    async fn unavailable_store_degrades_to_empty() {
        let store = LocalWindowStore::in_memory();
        let tracker = Tracker::new(store.clone(), TrackerConfig::default()).unwrap();
        tracker.handle_topology_event(TopologyEvent::Init(Membership {
            instance_id: "a".into(),
            is_leader: true,
        }));
        tracker.request_tracker().track(Some("alice"));
        tracker.tick().await;

        store.refuse_sessions(true);
        check!(tracker.report().await == Report::default());
        check!(tracker.fetch_cluster_wide(&Tier::ALL).await.is_empty());
    }

    #[tokio::test]
    async fn reset_all_only_touches_memory() {
        let store = LocalWindowStore::in_memory();
        let tracker = Tracker::new(store, TrackerConfig::default()).unwrap();
        tracker.handle_topology_event(TopologyEvent::Init(Membership {
            instance_id: "a".into(),
            is_leader: false,
        }));
        tracker.request_tracker().track(Some("alice"));
        tracker.tick().await;
        tracker.request_tracker().track(Some("bob"));

        tracker.reset_all();
        for tier in Tier::ALL {
            check!(tracker.snapshot(tier).is_empty());
        }
        let persisted = tracker.fetch_all_instances(&Tier::ALL).await;
        let total: u64 = persisted["a"].values().flat_map(|users| users.values()).sum();
        check!(total == 1);
    }
}
