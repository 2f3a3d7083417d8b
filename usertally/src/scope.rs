// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use usertally_core::{
    Tier,
    store::{NodePath, StoreError},
};

const INSTANCES: &str = "instances";
const CLUSTER: &str = "cluster";

/// Which subtree of the window tree a rollup operates on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    /// One cluster member's own counts
    Instance(String),
    /// Counts summed across every member
    Cluster,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Instance(id) => write!(f, "instance {id}"),
            Scope::Cluster => f.write_str("cluster"),
        }
    }
}

/// Node paths under the configured root:
///
/// ```text
/// <root>/instances/<instanceId>/<Tier>
/// <root>/cluster/<Tier>
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layout {
    root: NodePath,
}

impl Layout {
    /// Layout rooted at `root`
    pub fn new(root: NodePath) -> Self {
        Self { root }
    }

    /// The configured root
    pub fn root(&self) -> &NodePath {
        &self.root
    }

    /// Parent of every instance scope
    pub fn instances(&self) -> Result<NodePath, StoreError> {
        self.root.child(INSTANCES)
    }

    /// Node carrying a scope's rollup bookkeeping
    pub fn scope(&self, scope: &Scope) -> Result<NodePath, StoreError> {
        match scope {
            Scope::Instance(id) => self.instances()?.child(id),
            Scope::Cluster => self.root.child(CLUSTER),
        }
    }

    /// Node holding a scope's counts for `tier`
    pub fn tier(&self, scope: &Scope, tier: Tier) -> Result<NodePath, StoreError> {
        self.scope(scope)?.child(tier.name())
    }
}
