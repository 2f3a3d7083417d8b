// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Capability interface over the persistent, path-addressable window tree.
//!
//! The tree holds one node per scope (an instance or the cluster) with one
//! child node per [`Tier`](crate::Tier). Tier nodes carry a `Long` property per
//! user; scope nodes carry the rollup bookkeeping properties.
//!
//! All reads and writes go through a [`WindowSession`]. Writes are staged on
//! the session and become visible to other sessions only when
//! [`WindowSession::commit`] succeeds, which applies every staged change or
//! none of them.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::CountMap;

mod error;
mod local;
mod path;

pub use error::StoreError;
pub use local::{LocalSession, LocalWindowStore, Node};
pub use path::NodePath;

/// Property holding a node's type; present on every node created through
/// [`WindowSession::get_or_create`].
pub const PRIMARY_TYPE_PROPERTY: &str = "jcr:primaryType";

/// Node type given to intermediate nodes created on the way to a target path.
pub const FOLDER_NODE_TYPE: &str = "sling:Folder";

/// Node type given to scope and tier nodes.
pub const WINDOW_NODE_TYPE: &str = "nt:unstructured";

/// Whether `name` is a system property rather than a user id.
///
/// System properties are namespaced (`jcr:primaryType`), so any name
/// containing `:` is reserved and never treated as a count.
pub fn is_reserved_key(name: &str) -> bool {
    name.contains(':')
}

/// A typed property value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Property {
    /// 64-bit integer; the only type counts are read from
    Long(i64),
    /// Floating point number
    Double(f64),
    /// String
    String(String),
}

/// How [`WindowSession::write_counts`] combines new counts with a node's
/// existing ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    /// Add each count to the user's existing value
    Additive,
    /// Make the node's counts exactly `counts`, removing users not present
    Replace,
}

/// Source of sessions on a window tree.
pub trait WindowStore: Send + Sync + 'static {
    /// Session type handed out by this store
    type Session: WindowSession;

    /// Acquires a session.
    ///
    /// Fails with [`StoreError::Unavailable`] when the backing tree cannot be
    /// reached.
    fn open_session(&self) -> impl Future<Output = Result<Self::Session, StoreError>> + Send;
}

/// A unit of work on the window tree.
///
/// Reads observe committed state overlaid with this session's own staged
/// writes. Dropping a session discards anything not committed.
pub trait WindowSession: Send {
    /// Ensures the node at `path` exists, creating missing ancestors as
    /// [`FOLDER_NODE_TYPE`] nodes and the node itself with `node_type`.
    fn get_or_create(
        &mut self,
        path: &NodePath,
        node_type: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Whether a node exists at `path`
    fn exists(&mut self, path: &NodePath) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Reads the node's counts: every non-reserved `Long` property with a
    /// non-negative value.
    fn read_counts(
        &mut self,
        path: &NodePath,
    ) -> impl Future<Output = Result<CountMap, StoreError>> + Send;

    /// Reads a single `Long` property, `None` if absent or of another type
    fn read_long(
        &mut self,
        path: &NodePath,
        name: &str,
    ) -> impl Future<Output = Result<Option<i64>, StoreError>> + Send;

    /// Stages count properties on the node, see [`WriteMode`].
    fn write_counts(
        &mut self,
        path: &NodePath,
        counts: &CountMap,
        mode: WriteMode,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Stages a `Long` property
    fn set_long(
        &mut self,
        path: &NodePath,
        name: &str,
        value: i64,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Stages removal of a property; removing an absent property is a no-op
    fn remove_property(
        &mut self,
        path: &NodePath,
        name: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Names of the direct children of `path`, sorted
    fn children(
        &mut self,
        path: &NodePath,
    ) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;

    /// Stages removal of the node and its whole subtree
    fn delete(&mut self, path: &NodePath) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Atomically applies every staged change.
    ///
    /// On failure nothing is applied and the staged changes are kept; call
    /// [`WindowSession::discard`] before reusing the session.
    fn commit(&mut self) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Drops every staged change
    fn discard(&mut self);
}
