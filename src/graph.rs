//! The build graph: one node per target, and the registry that owns them.
//!
//! Nodes are shared between the discoverer and the worker pool, so every
//! mutable field lives behind the node's own lock.  Lock order is always
//! parent before child; nothing calls back into a parent while holding a
//! child's lock.

use crate::error::{Error, Result};
use crate::fs::MTime;
use crate::step::Step;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rustc_hash::{FxHashSet, FxHasher};
use std::hash::BuildHasherDefault;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NodeState {
    /// Not yet built (possibly waiting on children).
    New,
    /// A dependency probe added sources; waiting for them before running.
    ExtraCheck,
    Done,
    Failed,
}

impl NodeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, NodeState::Done | NodeState::Failed)
    }
}

/// The mutable half of a node.
pub(crate) struct NodeInner {
    pub sources: Vec<Arc<Node>>,
    pub parents: Vec<Weak<Node>>,
    /// Destination stamp; None until the discoverer first inspects the node.
    pub dest: Option<MTime>,
    /// Count of sources in a terminal state.
    pub ready_children: usize,
    pub state: NodeState,
    /// Set once the dependency probe has had its one chance to run.
    pub probed: bool,
    /// Set while the node sits in (or runs from) the scheduler, so a node is
    /// never handed to the pool twice for the same round.
    pub queued: bool,
}

pub struct Node {
    id: String,
    path: PathBuf,
    step: Step,
    /// Scheduling hints; only the discoverer writes these.
    priority: AtomicU64,
    cumulative_priority: AtomicU64,
    inner: Mutex<NodeInner>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node").field("id", &self.id).finish()
    }
}

impl Node {
    pub(crate) fn new(id: String, path: PathBuf, sources: Vec<Arc<Node>>, step: Step) -> Arc<Node> {
        let node = Arc::new(Node {
            id,
            path,
            step,
            priority: AtomicU64::new(0),
            cumulative_priority: AtomicU64::new(0),
            inner: Mutex::new(NodeInner {
                sources,
                parents: Vec::new(),
                dest: None,
                ready_children: 0,
                state: NodeState::New,
                probed: false,
                queued: false,
            }),
        });
        for src in node.lock().sources.iter() {
            src.lock().parents.push(Arc::downgrade(&node));
        }
        node
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, NodeInner> {
        self.inner.lock().unwrap()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// On-disk location of the destination.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn step(&self) -> &Step {
        &self.step
    }

    pub fn state(&self) -> NodeState {
        self.lock().state
    }

    /// The recorded destination stamp; Missing until inspected.
    pub fn modtime(&self) -> MTime {
        self.lock().dest.unwrap_or(MTime::Missing)
    }

    pub(crate) fn set_modtime(&self, mtime: MTime) {
        self.lock().dest = Some(mtime);
    }

    pub fn sources(&self) -> Vec<Arc<Node>> {
        self.lock().sources.clone()
    }

    pub fn parents(&self) -> Vec<Arc<Node>> {
        self.lock().parents.iter().filter_map(Weak::upgrade).collect()
    }

    pub fn ready_children(&self) -> usize {
        self.lock().ready_children
    }

    pub fn priority(&self) -> u64 {
        self.priority.load(Ordering::Relaxed)
    }

    pub fn cumulative_priority(&self) -> u64 {
        self.cumulative_priority.load(Ordering::Relaxed)
    }

    pub(crate) fn set_priority(&self, priority: u64, cumulative: u64) {
        self.priority.store(priority, Ordering::Relaxed);
        self.cumulative_priority.store(cumulative, Ordering::Relaxed);
    }

    pub(crate) fn add_cumulative_priority(&self, extra: u64) {
        let _ = self
            .cumulative_priority
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |p| {
                Some(p.saturating_add(extra))
            });
    }

    /// Record a terminal state, returning the parents to notify.  The parent
    /// list is snapshotted under the lock; the caller notifies them after it
    /// is released.
    pub(crate) fn complete(&self, state: NodeState) -> Vec<Arc<Node>> {
        let mut inner = self.lock();
        debug_assert!(!inner.state.is_terminal(), "{} completed twice", self.id);
        inner.state = state;
        inner.parents.iter().filter_map(Weak::upgrade).collect()
    }

    /// A child reached a terminal state.  Returns true if this node is now
    /// ready and the caller must hand it to the scheduler.
    pub(crate) fn child_ready(&self) -> bool {
        let mut inner = self.lock();
        inner.ready_children += 1;
        debug_assert!(
            inner.ready_children <= inner.sources.len(),
            "{}: {} ready of {} sources",
            self.id,
            inner.ready_children,
            inner.sources.len()
        );
        // Parents no requested target reaches are never inspected; they
        // stay pending forever.
        if inner.dest.is_none() {
            return false;
        }
        if inner.ready_children == inner.sources.len()
            && !inner.queued
            && !inner.state.is_terminal()
        {
            inner.queued = true;
            return true;
        }
        false
    }

    /// Whether `target` is reachable from this node through source edges.
    pub(crate) fn reaches(self: &Arc<Self>, target: &Arc<Node>) -> bool {
        let mut seen = FxHashSet::default();
        let mut stack = vec![self.clone()];
        while let Some(node) = stack.pop() {
            if Arc::ptr_eq(&node, target) {
                return true;
            }
            if seen.insert(Arc::as_ptr(&node)) {
                stack.extend(node.sources());
            }
        }
        false
    }
}

type FxBuildHasher = BuildHasherDefault<FxHasher>;

/// The table of every target in the build, keyed by id.
///
/// Ids are paths relative to the top directory (or absolute paths for files
/// outside it).  A registry serves exactly one build: nodes carry that
/// build's state.
pub struct Registry {
    top: PathBuf,
    nodes: DashMap<String, Arc<Node>, FxBuildHasher>,
    built: AtomicBool,
}

impl Registry {
    pub fn new(top: impl Into<PathBuf>) -> Self {
        Registry {
            top: top.into(),
            nodes: DashMap::with_hasher(FxBuildHasher::default()),
            built: AtomicBool::new(false),
        }
    }

    pub fn top(&self) -> &Path {
        &self.top
    }

    /// Declare a target built from `sources` by `step`.
    pub fn register(
        &self,
        id: impl Into<String>,
        sources: Vec<Arc<Node>>,
        step: Step,
    ) -> Result<Arc<Node>> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::config("empty target name"));
        }
        if id.contains('%') {
            return Err(Error::config(format!("target has a '%': {}", id)));
        }
        step.validate(&id, sources.len())?;
        match self.nodes.entry(id) {
            Entry::Occupied(e) => Err(Error::config(format!(
                "more than one rule for target {}",
                e.key()
            ))),
            Entry::Vacant(e) => {
                let path = self.top.join(e.key());
                let node = Node::new(e.key().clone(), path, sources, step);
                e.insert(node.clone());
                Ok(node)
            }
        }
    }

    /// Declare an existing source file.
    pub fn source(&self, id: impl Into<String>) -> Result<Arc<Node>> {
        self.register(id, Vec::new(), Step::Source)
    }

    /// Find a node, or create a sourceless leaf for a file nobody declared
    /// (e.g. a system header found by a dependency probe).  Racing callers
    /// all get the same node.
    pub fn resolve_leaf(&self, id: &str) -> Arc<Node> {
        if let Some(node) = self.get(id) {
            return node;
        }
        self.nodes
            .entry(id.to_owned())
            .or_insert_with(|| {
                let path = self.top.join(id);
                Node::new(id.to_owned(), path, Vec::new(), Step::Source)
            })
            .value()
            .clone()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Node>> {
        self.nodes.get(id).map(|n| n.value().clone())
    }

    /// Mark the registry as consumed by a build.
    pub(crate) fn claim(&self) -> Result<()> {
        if self.built.swap(true, Ordering::SeqCst) {
            return Err(Error::config("this registry was already built once"));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_target() -> Result<()> {
        let reg = Registry::new("/top");
        reg.source("a.c")?;
        match reg.source("a.c") {
            Err(Error::Configuration(msg)) => assert!(msg.contains("a.c")),
            other => panic!("expected configuration error, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn edges_link_both_ways() -> Result<()> {
        let reg = Registry::new("/top");
        let a = reg.source("a.c")?;
        let b = reg.source("b.c")?;
        let out = reg.register("out", vec![a.clone(), b.clone()], Step::Phony)?;
        assert_eq!(out.sources().len(), 2);
        assert_eq!(a.parents()[0].id(), "out");
        assert_eq!(out.path(), Path::new("/top/out"));
        assert!(out.reaches(&b));
        assert!(!b.reaches(&out));
        Ok(())
    }

    #[test]
    fn percent_in_target() {
        let reg = Registry::new("/top");
        assert!(reg.source("100%.txt").is_err());
    }

    #[test]
    fn racing_leaf_creation_converges() {
        let reg = Registry::new("/top");
        let nodes: Vec<Arc<Node>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| reg.resolve_leaf("/usr/include/stdio.h")))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for node in &nodes[1..] {
            assert!(Arc::ptr_eq(&nodes[0], node));
        }
        assert_eq!(reg.len(), 1);
        assert_eq!(nodes[0].path(), Path::new("/usr/include/stdio.h"));
    }

    #[test]
    fn resolve_leaf_returns_declared_node() -> Result<()> {
        let reg = Registry::new("/top");
        let declared = reg.register("gen.h", Vec::new(), Step::Touch)?;
        assert!(Arc::ptr_eq(&declared, &reg.resolve_leaf("gen.h")));
        Ok(())
    }

    #[test]
    fn child_ready_waits_for_inspection() -> Result<()> {
        let reg = Registry::new("/top");
        let a = reg.source("a")?;
        let out = reg.register("out", vec![a], Step::Phony)?;
        // Never inspected: counted, but not handed out.
        assert!(!out.child_ready());
        assert_eq!(out.ready_children(), 1);
        Ok(())
    }
}
