// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-operation time bounds for window store calls.

use std::{future::Future, time::Duration};

use usertally_core::{
    CountMap,
    store::{NodePath, StoreError, WindowSession, WindowStore, WriteMode},
};

async fn bounded<T>(
    limit: Duration,
    op: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    match tokio::time::timeout(limit, op).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}

/// Opens a session whose every operation, including acquisition, fails with
/// [`StoreError::Timeout`] after `limit`.
pub(crate) async fn open_session<S: WindowStore>(
    store: &S,
    limit: Duration,
) -> Result<TimedSession<S::Session>, StoreError> {
    let inner = bounded(limit, store.open_session()).await?;
    Ok(TimedSession { inner, limit })
}

pub(crate) struct TimedSession<S> {
    inner: S,
    limit: Duration,
}

impl<S: WindowSession> WindowSession for TimedSession<S> {
    async fn get_or_create(&mut self, path: &NodePath, node_type: &str) -> Result<(), StoreError> {
        bounded(self.limit, self.inner.get_or_create(path, node_type)).await
    }

    async fn exists(&mut self, path: &NodePath) -> Result<bool, StoreError> {
        bounded(self.limit, self.inner.exists(path)).await
    }

    async fn read_counts(&mut self, path: &NodePath) -> Result<CountMap, StoreError> {
        bounded(self.limit, self.inner.read_counts(path)).await
    }

    async fn read_long(&mut self, path: &NodePath, name: &str) -> Result<Option<i64>, StoreError> {
        bounded(self.limit, self.inner.read_long(path, name)).await
    }

    async fn write_counts(
        &mut self,
        path: &NodePath,
        counts: &CountMap,
        mode: WriteMode,
    ) -> Result<(), StoreError> {
        bounded(self.limit, self.inner.write_counts(path, counts, mode)).await
    }

    async fn set_long(&mut self, path: &NodePath, name: &str, value: i64) -> Result<(), StoreError> {
        bounded(self.limit, self.inner.set_long(path, name, value)).await
    }

    async fn remove_property(&mut self, path: &NodePath, name: &str) -> Result<(), StoreError> {
        bounded(self.limit, self.inner.remove_property(path, name)).await
    }

    async fn children(&mut self, path: &NodePath) -> Result<Vec<String>, StoreError> {
        bounded(self.limit, self.inner.children(path)).await
    }

    async fn delete(&mut self, path: &NodePath) -> Result<(), StoreError> {
        bounded(self.limit, self.inner.delete(path)).await
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        bounded(self.limit, self.inner.commit()).await
    }

    fn discard(&mut self) {
        self.inner.discard();
    }
}
