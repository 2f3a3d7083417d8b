// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! In-memory per-user counts, one map per [`Tier`].

use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;

use crate::{CountMap, Tier};

/// Process-wide per-user request counts.
///
/// `CounterStore` is a cheap handle; clones share the same underlying maps.
/// Request handlers call [`CounterStore::merge_add`] from any number of threads
/// while the rollup tick takes snapshots and replaces whole tiers.
///
/// Only the `Minute` tier is written by ingestion and is kept in a concurrent
/// map. The coarser tiers mirror the persisted instance scope; each is an
/// immutable snapshot swapped in whole after every tick, so readers see either
/// the old or the new contents of a tier and never a mix.
#[derive(Clone, Default)]
pub struct CounterStore {
    inner: Arc<Tiers>,
}

#[derive(Default)]
struct Tiers {
    minute: DashMap<String, u64>,
    windows: [ArcSwap<CountMap>; 6],
}

impl std::fmt::Debug for CounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("CounterStore");
        for tier in Tier::ALL {
            s.field(tier.name(), &self.len(tier));
        }
        s.finish()
    }
}

impl CounterStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot slot of a tier coarser than `Minute`.
    fn window(&self, tier: Tier) -> Option<&ArcSwap<CountMap>> {
        tier.ordinal()
            .checked_sub(1)
            .and_then(|slot| self.inner.windows.get(slot))
    }

    /// Adds `delta` to `user`'s live `Minute` count, creating the entry if absent.
    ///
    /// Concurrent calls for the same user compose; the shard lock is held for
    /// the read-modify-write.
    pub fn merge_add(&self, user: &str, delta: u64) {
        let minute = &self.inner.minute;
        if let Some(mut count) = minute.get_mut(user) {
            *count = count.saturating_add(delta);
            return;
        }
        minute
            .entry(user.to_owned())
            .and_modify(|c| *c = c.saturating_add(delta))
            .or_insert(delta);
    }

    /// Current count of `user` in `tier`
    pub fn get(&self, tier: Tier, user: &str) -> Option<u64> {
        match self.window(tier) {
            Some(window) => window.load().get(user).copied(),
            None => self.inner.minute.get(user).map(|c| *c),
        }
    }

    /// Point-in-time copy of a tier.
    ///
    /// Coarser tiers are copied from a single snapshot. `Minute` is copied key
    /// by key while increments keep landing, so each count is exact as of when
    /// its key was read.
    pub fn read_all(&self, tier: Tier) -> CountMap {
        match self.window(tier) {
            Some(window) => CountMap::clone(&window.load()),
            None => self
                .inner
                .minute
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
        }
    }

    /// Overwrites the whole contents of `tier` with `counts`.
    ///
    /// For coarser tiers the new contents are published in one swap. `Minute`
    /// is rewritten key by key.
    pub fn replace_all(&self, tier: Tier, counts: CountMap) {
        match self.window(tier) {
            Some(window) => window.store(Arc::new(counts)),
            None => {
                let minute = &self.inner.minute;
                minute.retain(|user, _| counts.contains_key(user));
                for (user, count) in counts {
                    minute.insert(user, count);
                }
            }
        }
    }

    /// Removes every entry from `tier` and returns them.
    ///
    /// Each `Minute` key is removed under its shard lock, so an increment
    /// racing the drain either lands in the returned batch or stays behind in
    /// the tier; it is never dropped.
    pub fn drain(&self, tier: Tier) -> CountMap {
        if let Some(window) = self.window(tier) {
            return CountMap::clone(&window.swap(Arc::default()));
        }
        let minute = &self.inner.minute;
        let users: Vec<String> = minute.iter().map(|entry| entry.key().clone()).collect();
        users
            .into_iter()
            .filter_map(|user| minute.remove(&user))
            .collect()
    }

    /// Merges a previously drained batch back into `Minute`.
    pub fn restore(&self, counts: CountMap) {
        for (user, count) in counts {
            self.merge_add(&user, count);
        }
    }

    /// Empties `tier`.
    pub fn clear(&self, tier: Tier) {
        match self.window(tier) {
            Some(window) => window.store(Arc::default()),
            None => self.inner.minute.clear(),
        }
    }

    /// Empties every tier. Persisted data is untouched.
    pub fn reset_all(&self) {
        tracing::info!("resetting all in-memory request counts");
        for tier in Tier::ALL {
            self.clear(tier);
        }
    }

    /// Number of users with an entry in `tier`
    pub fn len(&self, tier: Tier) -> usize {
        match self.window(tier) {
            Some(window) => window.load().len(),
            None => self.inner.minute.len(),
        }
    }

    /// True when `tier` holds no entries
    pub fn is_empty(&self, tier: Tier) -> bool {
        self.len(tier) == 0
    }
}
