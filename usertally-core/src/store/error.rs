// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{fmt, io, time::Duration};

use super::NodePath;

/// The error cases for window tree operations.
///
/// [`StoreError::is_transient`] separates failures that the next scheduled
/// tick can be expected to recover from (the store was unreachable, slow, or
/// refused a commit) from contract violations made by the caller.
#[derive(Debug)]
pub enum StoreError {
    /// No session could be acquired
    Unavailable(String),
    /// An operation did not finish within the configured bound
    Timeout(Duration),
    /// The node does not exist
    NodeNotFound(NodePath),
    /// An empty, relative or otherwise malformed path
    InvalidPath(String),
    /// A required argument was empty
    InvalidArgument(&'static str),
    /// The store rejected the staged changes; nothing was applied
    Commit(String),
    /// Reading or writing the backing file failed
    Io(io::Error),
    /// The backing file could not be encoded or decoded
    Serialization(serde_json::Error),
}

impl StoreError {
    /// True for failures that a later attempt may not hit again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::Timeout(_) | Self::Commit(_) | Self::Io(_)
        )
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(reason) => write!(f, "window store unavailable: {reason}"),
            Self::Timeout(limit) => write!(f, "window store operation timed out after {limit:?}"),
            Self::NodeNotFound(path) => write!(f, "node `{path}` does not exist"),
            Self::InvalidPath(path) => write!(f, "invalid node path `{path}`"),
            Self::InvalidArgument(what) => write!(f, "{what} cannot be empty"),
            Self::Commit(reason) => write!(f, "commit rejected: {reason}"),
            Self::Io(err) => fmt::Display::fmt(err, f),
            Self::Serialization(err) => fmt::Display::fmt(err, f),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}
