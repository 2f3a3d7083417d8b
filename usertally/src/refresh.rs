// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Reloading the in-memory view after a tick.

use std::time::Duration;

use usertally_core::{
    CountMap, CounterStore, Tier,
    store::{StoreError, WindowSession, WindowStore},
};

use crate::{
    scope::{Layout, Scope},
    timed,
};

/// Reloads the in-memory `Hour` through `Forever` tiers from the instance's
/// persisted nodes.
///
/// Every tier is read before any is replaced, so a failed read leaves the
/// in-memory view untouched. `Minute` is not reloaded: it only ever holds
/// increments that have not been persisted yet.
pub async fn refresh_counters<S: WindowStore>(
    store: &S,
    layout: &Layout,
    instance: &Scope,
    counters: &CounterStore,
    store_timeout: Duration,
) -> Result<(), StoreError> {
    let mut session = timed::open_session(store, store_timeout).await?;
    let mut fresh: Vec<(Tier, CountMap)> = Vec::with_capacity(Tier::ALL.len() - 1);
    for tier in Tier::ALL.into_iter().filter(|tier| *tier != Tier::Minute) {
        let path = layout.tier(instance, tier)?;
        let counts = if session.exists(&path).await? {
            session.read_counts(&path).await?
        } else {
            CountMap::new()
        };
        fresh.push((tier, counts));
    }
    for (tier, counts) in fresh {
        counters.replace_all(tier, counts);
    }
    Ok(())
}
