// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    io::Write as _,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use serde::{Deserialize, Serialize};

use super::{
    FOLDER_NODE_TYPE, NodePath, PRIMARY_TYPE_PROPERTY, Property, StoreError, WindowSession,
    WindowStore, WriteMode, is_reserved_key,
};
use crate::CountMap;

type Tree = BTreeMap<NodePath, Node>;

/// A node of the window tree and its properties.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Properties by name
    pub properties: BTreeMap<String, Property>,
}

impl Node {
    fn typed(node_type: &str) -> Self {
        let mut node = Self::default();
        node.properties.insert(
            PRIMARY_TYPE_PROPERTY.to_owned(),
            Property::String(node_type.to_owned()),
        );
        node
    }

    /// The node's counts: non-reserved, non-negative `Long` properties.
    pub fn counts(&self) -> CountMap {
        self.properties
            .iter()
            .filter_map(|(name, value)| {
                if is_reserved_key(name) {
                    return None;
                }
                match value {
                    Property::Long(v) => match u64::try_from(*v) {
                        Ok(count) => Some((name.clone(), count)),
                        Err(_) => {
                            tracing::debug!(property = %name, value = v, "skipping negative count");
                            None
                        }
                    },
                    other => {
                        tracing::debug!(property = %name, ?other, "skipping non-integer property");
                        None
                    }
                }
            })
            .collect()
    }

    fn long(&self, name: &str) -> Option<i64> {
        match self.properties.get(name) {
            Some(Property::Long(v)) => Some(*v),
            _ => None,
        }
    }

    fn set_count(&mut self, user: &str, count: u64) {
        let value = i64::try_from(count).unwrap_or(i64::MAX);
        self.properties.insert(user.to_owned(), Property::Long(value));
    }
}

#[derive(Default)]
struct Faults {
    refuse_sessions: AtomicBool,
    failing_commits: AtomicUsize,
    latency_ms: AtomicU64,
}

struct Shared {
    tree: Mutex<Tree>,
    file: Option<PathBuf>,
    // held across a file-backed commit, from reading the tree to publishing it
    writer: tokio::sync::Mutex<()>,
    faults: Faults,
}

impl Shared {
    fn tree(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn committed(&self, path: &NodePath) -> Option<Node> {
        self.tree().get(path).cloned()
    }

    async fn pause(&self) {
        let latency = self.faults.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
    }
}

/// Window tree kept in process memory, optionally mirrored to a JSON file.
///
/// Each commit applies the session's staged nodes under a single lock. When
/// file-backed, commits are serialized and the whole tree is written on the
/// blocking pool to a temporary file next to the target, then renamed over it.
/// The in-memory tree is only replaced once the file is in place, so a failed
/// write leaves both copies at the previous commit and readers never see a
/// tree the file does not hold.
///
/// Clones share the same tree, which lets tests run several trackers against
/// one store the way cluster members share one repository.
#[derive(Clone)]
pub struct LocalWindowStore {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for LocalWindowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalWindowStore")
            .field("file", &self.shared.file)
            .field("nodes", &self.shared.tree().len())
            .finish()
    }
}

impl Default for LocalWindowStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl LocalWindowStore {
    fn with_tree(tree: Tree, file: Option<PathBuf>) -> Self {
        Self {
            shared: Arc::new(Shared {
                tree: Mutex::new(tree),
                file,
                writer: tokio::sync::Mutex::new(()),
                faults: Faults::default(),
            }),
        }
    }

    /// An empty tree that lives only as long as the store
    pub fn in_memory() -> Self {
        Self::with_tree(root_tree(), None)
    }

    /// A tree loaded from `file` if it exists, written back on every commit.
    pub fn file_backed(file: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let file = file.into();
        let tree = match fs::read(&file) {
            Ok(bytes) => {
                let mut tree: Tree = serde_json::from_slice(&bytes)?;
                tree.entry(NodePath::root())
                    .or_insert_with(|| Node::typed(FOLDER_NODE_TYPE));
                tracing::info!(file = %file.display(), nodes = tree.len(), "loaded window tree");
                tree
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => root_tree(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self::with_tree(tree, Some(file)))
    }

    /// Committed copy of the node at `path`
    pub fn node(&self, path: &NodePath) -> Option<Node> {
        self.shared.committed(path)
    }

    /// Committed copy of the whole tree
    pub fn snapshot(&self) -> BTreeMap<NodePath, Node> {
        self.shared.tree().clone()
    }

    /// Makes [`WindowStore::open_session`] fail until called with `false`.
    #[cfg(any(test, feature = "test-util"))]
    pub fn refuse_sessions(&self, refuse: bool) {
        self.shared
            .faults
            .refuse_sessions
            .store(refuse, Ordering::Relaxed);
    }

    /// Makes the next `count` commits fail without applying anything.
    #[cfg(any(test, feature = "test-util"))]
    pub fn fail_next_commits(&self, count: usize) {
        self.shared
            .faults
            .failing_commits
            .store(count, Ordering::Relaxed);
    }

    /// Delays every session operation by `latency`.
    #[cfg(any(test, feature = "test-util"))]
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.shared.faults.latency_ms.store(millis, Ordering::Relaxed);
    }
}

fn root_tree() -> Tree {
    let mut tree = Tree::new();
    tree.insert(NodePath::root(), Node::typed(FOLDER_NODE_TYPE));
    tree
}

fn write_atomically(file: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut tmp = file.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    {
        let mut out = fs::File::create(&tmp)?;
        out.write_all(bytes)?;
        out.sync_all()?;
    }
    fs::rename(&tmp, file)?;
    Ok(())
}

impl WindowStore for LocalWindowStore {
    type Session = LocalSession;

    async fn open_session(&self) -> Result<LocalSession, StoreError> {
        self.shared.pause().await;
        if self.shared.faults.refuse_sessions.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("sessions are being refused".into()));
        }
        Ok(LocalSession {
            shared: self.shared.clone(),
            staged: BTreeMap::new(),
        })
    }
}

/// Session on a [`LocalWindowStore`].
///
/// Staged nodes are whole copies; `None` marks a staged deletion.
pub struct LocalSession {
    shared: Arc<Shared>,
    staged: BTreeMap<NodePath, Option<Node>>,
}

impl LocalSession {
    fn lookup(&self, path: &NodePath) -> Option<Node> {
        match self.staged.get(path) {
            Some(staged) => staged.clone(),
            None => self.shared.committed(path),
        }
    }

    fn staged_mut(&mut self, path: &NodePath) -> Result<&mut Node, StoreError> {
        if !self.staged.contains_key(path) {
            let node = self
                .shared
                .committed(path)
                .ok_or_else(|| StoreError::NodeNotFound(path.clone()))?;
            self.staged.insert(path.clone(), Some(node));
        }
        match self.staged.get_mut(path) {
            Some(Some(node)) => Ok(node),
            _ => Err(StoreError::NodeNotFound(path.clone())),
        }
    }
}

impl WindowSession for LocalSession {
    async fn get_or_create(&mut self, path: &NodePath, node_type: &str) -> Result<(), StoreError> {
        self.shared.pause().await;
        if node_type.is_empty() {
            return Err(StoreError::InvalidArgument("node type"));
        }
        if path.is_root() {
            return Ok(());
        }
        for ancestor in path.ancestors() {
            if self.lookup(&ancestor).is_none() {
                self.staged
                    .insert(ancestor, Some(Node::typed(FOLDER_NODE_TYPE)));
            }
        }
        if self.lookup(path).is_none() {
            tracing::debug!(%path, node_type, "creating node");
            self.staged.insert(path.clone(), Some(Node::typed(node_type)));
        }
        Ok(())
    }

    async fn exists(&mut self, path: &NodePath) -> Result<bool, StoreError> {
        self.shared.pause().await;
        Ok(self.lookup(path).is_some())
    }

    async fn read_counts(&mut self, path: &NodePath) -> Result<CountMap, StoreError> {
        self.shared.pause().await;
        self.lookup(path)
            .map(|node| node.counts())
            .ok_or_else(|| StoreError::NodeNotFound(path.clone()))
    }

    async fn read_long(&mut self, path: &NodePath, name: &str) -> Result<Option<i64>, StoreError> {
        self.shared.pause().await;
        self.lookup(path)
            .map(|node| node.long(name))
            .ok_or_else(|| StoreError::NodeNotFound(path.clone()))
    }

    async fn write_counts(
        &mut self,
        path: &NodePath,
        counts: &CountMap,
        mode: WriteMode,
    ) -> Result<(), StoreError> {
        self.shared.pause().await;
        let node = self.staged_mut(path)?;
        let mut current = node.counts();
        if mode == WriteMode::Replace {
            for stale in current.keys().filter(|user| !counts.contains_key(*user)) {
                node.properties.remove(stale);
            }
            current.clear();
        }
        for (user, count) in counts {
            if is_reserved_key(user) {
                tracing::debug!(property = %user, "refusing to write count over system property");
                continue;
            }
            let base = current.get(user).copied().unwrap_or(0);
            node.set_count(user, base.saturating_add(*count));
        }
        Ok(())
    }

    async fn set_long(&mut self, path: &NodePath, name: &str, value: i64) -> Result<(), StoreError> {
        self.shared.pause().await;
        if name.is_empty() {
            return Err(StoreError::InvalidArgument("property name"));
        }
        self.staged_mut(path)?
            .properties
            .insert(name.to_owned(), Property::Long(value));
        Ok(())
    }

    async fn remove_property(&mut self, path: &NodePath, name: &str) -> Result<(), StoreError> {
        self.shared.pause().await;
        self.staged_mut(path)?.properties.remove(name);
        Ok(())
    }

    async fn children(&mut self, path: &NodePath) -> Result<Vec<String>, StoreError> {
        self.shared.pause().await;
        let mut names: BTreeSet<String> = self
            .shared
            .tree()
            .keys()
            .filter(|candidate| candidate.is_child_of(path))
            .map(|child| child.name().to_owned())
            .collect();
        for (candidate, staged) in &self.staged {
            if candidate.is_child_of(path) {
                match staged {
                    Some(_) => names.insert(candidate.name().to_owned()),
                    None => names.remove(candidate.name()),
                };
            }
        }
        Ok(names.into_iter().collect())
    }

    async fn delete(&mut self, path: &NodePath) -> Result<(), StoreError> {
        self.shared.pause().await;
        if path.is_root() {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        if self.lookup(path).is_none() {
            return Err(StoreError::NodeNotFound(path.clone()));
        }
        let mut doomed: Vec<NodePath> = self
            .shared
            .tree()
            .keys()
            .filter(|candidate| candidate.is_within(path))
            .cloned()
            .collect();
        doomed.extend(
            self.staged
                .keys()
                .filter(|candidate| candidate.is_within(path))
                .cloned(),
        );
        for node in doomed {
            self.staged.insert(node, None);
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.shared.pause().await;
        let injected = self
            .shared
            .faults
            .failing_commits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Commit("injected commit failure".into()));
        }
        if self.staged.is_empty() {
            return Ok(());
        }

        let Some(file) = self.shared.file.clone() else {
            apply(&mut self.shared.tree(), &self.staged);
            self.staged.clear();
            return Ok(());
        };

        let _writer = self.shared.writer.lock().await;
        let next = {
            let mut next = self.shared.tree().clone();
            apply(&mut next, &self.staged);
            next
        };
        let bytes = serde_json::to_vec_pretty(&next)?;
        tokio::task::spawn_blocking(move || write_atomically(&file, &bytes))
            .await
            .map_err(|err| StoreError::Commit(format!("tree writer did not finish: {err}")))??;
        *self.shared.tree() = next;
        self.staged.clear();
        Ok(())
    }

    fn discard(&mut self) {
        self.staged.clear();
    }
}

fn apply(tree: &mut Tree, staged: &BTreeMap<NodePath, Option<Node>>) {
    for (path, node) in staged {
        match node {
            Some(node) => {
                tree.insert(path.clone(), node.clone());
            }
            None => {
                tree.remove(path);
            }
        }
    }
}
