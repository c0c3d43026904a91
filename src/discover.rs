//! The discoverer: the single thread that resolves node metadata and grows
//! the graph.
//!
//! Every structural change (a node's first stat, its priority, new sources
//! found by a probe) happens here, one at a time.  Workers never append to
//! `sources`; they send an event and carry on.

use crate::error::{Error, Result};
use crate::fs::{self, Stat};
use crate::graph::{Node, NodeState};
use crate::scheduler::Shared;
use std::sync::Arc;

/// Priority for a destination that does not exist yet: likely a step that
/// failed last time, so it is worth finding out early.
const MISSING_WEIGHT: u64 = 1 << 40;
/// Priority for steps whose output feeds dependency probes.
const DEPENDENCIES_WEIGHT: u64 = 1 << 39;

/// Messages from the workers to the discoverer.
pub enum Event {
    /// A probe found more sources for `node`, which is now in ExtraCheck.
    Extend {
        node: Arc<Node>,
        sources: Vec<Arc<Node>>,
    },
    /// The sentinel completed: every requested root is terminal.
    RootsDone,
    /// A fatal error stopped the build.
    Halted,
}

pub struct Discoverer {
    shared: Arc<Shared>,
}

fn priority(node: &Node, stat: Stat) -> u64 {
    let base = if !stat.mtime.exists() {
        MISSING_WEIGHT
    } else if node.step().produces_dependencies() {
        DEPENDENCIES_WEIGHT
    } else {
        // Bigger outputs tend to come from slower steps; start those first.
        0
    };
    base.saturating_add(stat.len)
}

impl Discoverer {
    pub fn new(shared: Arc<Shared>) -> Self {
        Discoverer { shared }
    }

    /// Inspect `root` and everything below it that has not been seen yet.
    pub fn inspect(&mut self, root: Arc<Node>) -> Result<()> {
        let mut pending = vec![root];
        while let Some(node) = pending.pop() {
            self.visit(&node, &mut pending)?;
        }
        Ok(())
    }

    fn visit(&mut self, node: &Arc<Node>, pending: &mut Vec<Arc<Node>>) -> Result<()> {
        let mut inner = node.lock();
        if inner.dest.is_none() {
            let stat = if node.step().is_virtual() {
                Stat::MISSING
            } else {
                fs::stat(node.path()).map_err(|err| Error::io(node.path(), err))?
            };
            inner.dest = Some(stat.mtime);
            let local = priority(node, stat);
            // Parents' priorities are atomics, so reading them here does not
            // take their locks while ours is held.
            let cumulative = inner
                .parents
                .iter()
                .filter_map(|p| p.upgrade())
                .fold(local, |sum, p| sum.saturating_add(p.cumulative_priority()));
            node.set_priority(local, cumulative);
            tracing::trace!(node = node.id(), priority = local, cumulative, "inspected");
        } else if inner.state != NodeState::ExtraCheck {
            return Ok(());
        }

        let cumulative = node.cumulative_priority();
        for child in inner.sources.iter() {
            let needs_visit = {
                let c = child.lock();
                c.dest.is_none() || c.state == NodeState::ExtraCheck
            };
            if needs_visit {
                pending.push(child.clone());
            } else {
                child.add_cumulative_priority(cumulative);
            }
        }

        if !inner.queued
            && !inner.state.is_terminal()
            && inner.ready_children == inner.sources.len()
        {
            inner.queued = true;
            drop(inner);
            self.shared.submit(node.clone());
        }
        Ok(())
    }

    /// Add sources found by `node`'s probe, then wait for them like any
    /// other.
    pub fn extend(&mut self, node: Arc<Node>, sources: Vec<Arc<Node>>) -> Result<()> {
        for src in &sources {
            if src.reaches(&node) {
                return Err(Error::config(format!(
                    "dependency cycle: {} depends on {}, which depends on it",
                    node.id(),
                    src.id()
                )));
            }
        }

        {
            let mut inner = node.lock();
            debug_assert_eq!(inner.state, NodeState::ExtraCheck);
            for src in sources {
                if inner.sources.iter().any(|s| s.id() == src.id()) {
                    continue;
                }
                inner.sources.push(src.clone());
                let mut child = src.lock();
                if child.state.is_terminal() {
                    inner.ready_children += 1;
                } else {
                    child.parents.push(Arc::downgrade(&node));
                }
            }
            // Held since the probe ran; release it so the visit below (or a
            // finishing child) can hand the node out again.
            inner.queued = false;
            tracing::debug!(
                node = node.id(),
                sources = inner.sources.len(),
                ready = inner.ready_children,
                "extended"
            );
        }
        self.inspect(node)
    }
}
