//! The engine entry point: build a set of root targets from a populated
//! registry.

use crate::config::Config;
use crate::discover::{Discoverer, Event};
use crate::error::{Error, Result};
use crate::graph::{Node, NodeState, Registry};
use crate::progress::Progress;
use crate::scheduler::Shared;
use crate::step::Step;
use std::sync::mpsc;
use std::sync::Arc;

/// How one requested root ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootOutcome {
    pub id: String,
    pub state: NodeState,
}

/// The result of a build that was not stopped by a fatal error.
#[derive(Debug)]
pub struct Report {
    pub roots: Vec<RootOutcome>,
    /// Steps actually run (or printed, in a dry run).
    pub executed: usize,
}

impl Report {
    pub fn success(&self) -> bool {
        self.roots.iter().all(|r| r.state == NodeState::Done)
    }

    pub fn exit_code(&self) -> i32 {
        if self.success() {
            0
        } else {
            1
        }
    }
}

pub struct Engine {
    registry: Arc<Registry>,
    config: Arc<Config>,
    progress: Arc<dyn Progress>,
}

impl Engine {
    pub fn new(registry: Arc<Registry>, config: Arc<Config>, progress: Arc<dyn Progress>) -> Self {
        Engine {
            registry,
            config,
            progress,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Build `roots` and everything they depend on.
    ///
    /// Returns Err for anything fatal: configuration problems, integrity
    /// violations, and step failures unless keep-going is set.  Under
    /// keep-going, failed roots show up in the report instead.
    pub fn build<S: AsRef<str>>(&self, roots: &[S]) -> Result<Report> {
        let mut nodes: Vec<Arc<Node>> = Vec::with_capacity(roots.len());
        for id in roots {
            let id = id.as_ref();
            let node = self
                .registry
                .get(id)
                .ok_or_else(|| Error::config(format!("unknown target '{}'", id)))?;
            if !nodes.iter().any(|n| Arc::ptr_eq(n, &node)) {
                nodes.push(node);
            }
        }
        self.registry.claim()?;

        // The sentinel depends on every root; its completion ends the build.
        // It is not registered, so no catalog id can collide with it.
        let sentinel = Node::new(
            "<roots>".to_owned(),
            self.registry.top().to_path_buf(),
            nodes.clone(),
            Step::Phony,
        );

        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(Shared::new(
            self.config.clone(),
            self.registry.clone(),
            self.progress.clone(),
            tx,
            sentinel.clone(),
        )?);
        let mut discoverer = Discoverer::new(shared.clone());

        if let Err(err) = discoverer.inspect(sentinel) {
            shared.halt(err);
        }
        for event in rx.iter() {
            match event {
                Event::Extend { node, sources } => {
                    if let Err(err) = discoverer.extend(node, sources) {
                        shared.halt(err);
                    }
                }
                Event::RootsDone | Event::Halted => break,
            }
        }
        // Steps already running finish before we report.
        shared.wait_idle();

        if let Some(err) = shared.take_fatal() {
            return Err(err);
        }
        let roots = nodes
            .iter()
            .map(|n| RootOutcome {
                id: n.id().to_owned(),
                state: n.state(),
            })
            .collect();
        Ok(Report {
            roots,
            executed: shared.executed(),
        })
    }
}
