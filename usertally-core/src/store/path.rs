// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use serde::{Deserialize, Serialize};

use super::StoreError;

/// Absolute, normalized path of a node in the window tree, such as
/// `/var/analytics/user-tracking/instances/node-1/Minute`.
///
/// Construction validates the path, so an empty path or segment never reaches
/// a store.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodePath(String);

impl NodePath {
    /// The root node, `/`
    pub fn root() -> Self {
        Self("/".to_owned())
    }

    /// Parses an absolute path. Repeated and trailing slashes are collapsed.
    ///
    /// ```
    /// use usertally_core::store::NodePath;
    ///
    /// let path = NodePath::parse("/var//analytics/").unwrap();
    /// assert_eq!(path.as_str(), "/var/analytics");
    /// assert!(NodePath::parse("").is_err());
    /// assert!(NodePath::parse("relative/path").is_err());
    /// ```
    pub fn parse(path: &str) -> Result<Self, StoreError> {
        if !path.starts_with('/') {
            return Err(StoreError::InvalidPath(path.to_owned()));
        }
        let mut normalized = Self::root();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            normalized = normalized.child(segment)?;
        }
        Ok(normalized)
    }

    /// Path of the child named `segment`.
    pub fn child(&self, segment: &str) -> Result<Self, StoreError> {
        if segment.is_empty() || segment.contains('/') || segment == "." || segment == ".." {
            return Err(StoreError::InvalidPath(format!("{}/{segment}", self.0)));
        }
        if self.is_root() {
            Ok(Self(format!("/{segment}")))
        } else {
            Ok(Self(format!("{}/{segment}", self.0)))
        }
    }

    /// Last segment of the path, empty for the root
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    /// Parent path, `None` for the root
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_owned())),
            None => None,
        }
    }

    /// Every proper ancestor from the root down, excluding `self`
    pub fn ancestors(&self) -> Vec<Self> {
        let mut chain = Vec::new();
        let mut cursor = self.parent();
        while let Some(path) = cursor {
            cursor = path.parent();
            chain.push(path);
        }
        chain.reverse();
        chain
    }

    /// True for `/`
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// True when `self` is a direct child of `parent`
    pub fn is_child_of(&self, parent: &NodePath) -> bool {
        self.parent().as_ref() == Some(parent)
    }

    /// True when `self` equals `ancestor` or lies below it
    pub fn is_within(&self, ancestor: &NodePath) -> bool {
        ancestor.is_root()
            || self.0 == ancestor.0
            || (self.0.starts_with(&ancestor.0) && self.0.as_bytes().get(ancestor.0.len()) == Some(&b'/'))
    }

    /// The path as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for NodePath {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NodePath> for String {
    fn from(value: NodePath) -> Self {
        value.0
    }
}
