// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Cluster-scope aggregation, run by the leader.

use std::time::Duration;

use usertally_core::{
    CountMap, Tier,
    store::{StoreError, WINDOW_NODE_TYPE, WindowSession, WindowStore, WriteMode},
};

use crate::{
    scope::{Layout, Scope},
    timed,
};

/// Recomputes the cluster `Minute` tier from every instance's `Minute` tier.
///
/// The sum is built from scratch and replaces the cluster node's counts, so
/// users no instance reports any more disappear and a departed instance's
/// subtree stops contributing as soon as it is deleted. Returns the counts
/// written.
pub async fn aggregate_cluster<S: WindowStore>(
    store: &S,
    layout: &Layout,
    store_timeout: Duration,
) -> Result<CountMap, StoreError> {
    let mut session = timed::open_session(store, store_timeout).await?;
    let instances = layout.instances()?;
    let members = if session.exists(&instances).await? {
        session.children(&instances).await?
    } else {
        Vec::new()
    };

    let mut total = CountMap::new();
    for member in &members {
        let minute = match layout.tier(&Scope::Instance(member.clone()), Tier::Minute) {
            Ok(path) => path,
            Err(err) => {
                tracing::warn!(?err, instance = %member, "skipping unaddressable instance");
                continue;
            }
        };
        if !session.exists(&minute).await? {
            continue;
        }
        for (user, count) in session.read_counts(&minute).await? {
            let entry = total.entry(user).or_insert(0);
            *entry = entry.saturating_add(count);
        }
    }

    let cluster_minute = layout.tier(&Scope::Cluster, Tier::Minute)?;
    session.get_or_create(&cluster_minute, WINDOW_NODE_TYPE).await?;
    session
        .write_counts(&cluster_minute, &total, WriteMode::Replace)
        .await?;
    session.commit().await?;
    tracing::debug!(instances = members.len(), users = total.len(), "aggregated cluster minute");
    Ok(total)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert2::check;
    use usertally_core::{
        CountMap, Tier,
        store::{LocalWindowStore, NodePath, WindowSession, WindowStore, WriteMode},
    };

    use super::aggregate_cluster;
    use crate::scope::{Layout, Scope};

    fn counts(entries: &[(&str, u64)]) -> CountMap {
        entries.iter().map(|(u, c)| (u.to_string(), *c)).collect()
    }

    async fn seed(store: &LocalWindowStore, layout: &Layout, instance: &str, minute: &[(&str, u64)]) {
        let path = layout.tier(&Scope::Instance(instance.into()), Tier::Minute).unwrap();
        let mut session = store.open_session().await.unwrap();
        session.get_or_create(&path, "nt:unstructured").await.unwrap();
        session
            .write_counts(&path, &counts(minute), WriteMode::Replace)
            .await
            .unwrap();
        session.commit().await.unwrap();
    }

    #[tokio::test]
    async fn sums_instances_per_user() {
        let store = LocalWindowStore::in_memory();
        let layout = Layout::new(NodePath::parse("/t").unwrap());
        seed(&store, &layout, "i1", &[("u1", 3), ("u2", 5)]).await;
        seed(&store, &layout, "i2", &[("u1", 2)]).await;

        let total = aggregate_cluster(&store, &layout, Duration::from_secs(1)).await.unwrap();
        check!(total == counts(&[("u1", 5), ("u2", 5)]));

        let cluster = layout.tier(&Scope::Cluster, Tier::Minute).unwrap();
        check!(store.node(&cluster).unwrap().counts() == counts(&[("u1", 5), ("u2", 5)]));
    }

    #[tokio::test]
    async fn recomputes_rather_than_accumulates() {
        let store = LocalWindowStore::in_memory();
        let layout = Layout::new(NodePath::parse("/t").unwrap());
        seed(&store, &layout, "i1", &[("u1", 3), ("u2", 1)]).await;
        aggregate_cluster(&store, &layout, Duration::from_secs(1)).await.unwrap();

        seed(&store, &layout, "i1", &[("u1", 4)]).await;
        aggregate_cluster(&store, &layout, Duration::from_secs(1)).await.unwrap();

        let cluster = layout.tier(&Scope::Cluster, Tier::Minute).unwrap();
        check!(store.node(&cluster).unwrap().counts() == counts(&[("u1", 4)]));
    }

    #[tokio::test]
    async fn no_instances_yields_empty_cluster() {
        let store = LocalWindowStore::in_memory();
        let layout = Layout::new(NodePath::parse("/t").unwrap());
        let total = aggregate_cluster(&store, &layout, Duration::from_secs(1)).await.unwrap();
        check!(total.is_empty());
    }
}
