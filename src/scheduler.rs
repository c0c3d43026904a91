//! The worker pool: runs ready nodes in priority order and propagates their
//! completion to parents.

use crate::config::{Config, Verbosity};
use crate::discover::Event;
use crate::error::{Error, Result};
use crate::fs::{self, MTime};
use crate::graph::{Node, NodeState, Registry};
use crate::oracle::{self, Staleness};
use crate::progress::Progress;
use crate::step::{Probe, Step};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex};

/// A node waiting for a worker.  Ordered so the heap's maximum is the
/// highest cumulative priority, earliest submitted among equals.
struct ReadyEntry {
    priority: u64,
    seq: u64,
    node: Arc<Node>,
}

impl PartialEq for ReadyEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ReadyEntry {}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// State shared by the discoverer, the engine loop and every worker.
pub struct Shared {
    pub config: Arc<Config>,
    pub registry: Arc<Registry>,
    progress: Arc<dyn Progress>,
    pool: rayon::ThreadPool,
    ready: Mutex<BinaryHeap<ReadyEntry>>,
    seq: AtomicU64,
    events: Sender<Event>,
    halted: AtomicBool,
    fatal: Mutex<Option<Error>>,
    executed: AtomicUsize,
    /// Jobs handed to the pool and not yet finished.
    outstanding: Mutex<usize>,
    idle: Condvar,
    sentinel: Arc<Node>,
}

impl Shared {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<Registry>,
        progress: Arc<dyn Progress>,
        events: Sender<Event>,
        sentinel: Arc<Node>,
    ) -> Result<Self> {
        let workers = config.workers();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("kiln-worker-{}", i))
            .build()
            .map_err(|err| Error::config(format!("cannot start {} workers: {}", workers, err)))?;
        tracing::debug!(workers, "started worker pool");
        Ok(Shared {
            config,
            registry,
            progress,
            pool,
            ready: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
            events,
            halted: AtomicBool::new(false),
            fatal: Mutex::new(None),
            executed: AtomicUsize::new(0),
            outstanding: Mutex::new(0),
            idle: Condvar::new(),
            sentinel,
        })
    }

    fn send(&self, event: Event) {
        // The receiver only goes away once the build is over.
        let _ = self.events.send(event);
    }

    /// Queue a node whose sources are all terminal.  The caller has already
    /// set its `queued` flag.
    pub fn submit(self: &Arc<Self>, node: Arc<Node>) {
        let entry = ReadyEntry {
            priority: node.cumulative_priority(),
            seq: self.seq.fetch_add(1, AtomicOrdering::Relaxed),
            node,
        };
        self.ready.lock().unwrap().push(entry);
        *self.outstanding.lock().unwrap() += 1;
        let shared = self.clone();
        self.pool.spawn(move || shared.run_next());
    }

    /// Stop handing out work and remember why.  The first error wins.
    pub fn halt(&self, err: Error) {
        tracing::debug!(error = %err, "halting build");
        {
            let mut fatal = self.fatal.lock().unwrap();
            if fatal.is_none() {
                *fatal = Some(err);
            }
        }
        self.halted.store(true, AtomicOrdering::SeqCst);
        self.send(Event::Halted);
    }

    pub fn take_fatal(&self) -> Option<Error> {
        self.fatal.lock().unwrap().take()
    }

    pub fn executed(&self) -> usize {
        self.executed.load(AtomicOrdering::Relaxed)
    }

    /// Block until no job is queued or running.
    pub fn wait_idle(&self) {
        let mut outstanding = self.outstanding.lock().unwrap();
        while *outstanding > 0 {
            outstanding = self.idle.wait(outstanding).unwrap();
        }
    }

    /// One pool job: take the best ready node and run it.
    fn run_next(self: Arc<Self>) {
        let entry = self.ready.lock().unwrap().pop();
        if let Some(ReadyEntry { node, .. }) = entry {
            if !self.halted.load(AtomicOrdering::SeqCst) {
                match self.execute(&node) {
                    Ok(Some(state)) => self.finish(&node, state),
                    Ok(None) => {}
                    Err(err) => {
                        if err.is_fatal(self.config.keep_going) {
                            self.halt(err);
                        } else {
                            self.finish(&node, NodeState::Failed);
                        }
                    }
                }
            }
        }
        let mut outstanding = self.outstanding.lock().unwrap();
        *outstanding -= 1;
        if *outstanding == 0 {
            self.idle.notify_all();
        }
    }

    /// Record the terminal state and hand out any parent that became ready.
    fn finish(self: &Arc<Self>, node: &Arc<Node>, state: NodeState) {
        let parents = node.complete(state);
        if Arc::ptr_eq(node, &self.sentinel) {
            self.send(Event::RootsDone);
            return;
        }
        for parent in parents {
            if parent.child_ready() {
                self.submit(parent);
            }
        }
    }

    /// Bring one ready node up to date.  Ok(None) means the node went back
    /// to the discoverer to wait for newly found sources.
    fn execute(self: &Arc<Self>, node: &Arc<Node>) -> Result<Option<NodeState>> {
        let (sources, first_attempt) = {
            let mut inner = node.lock();
            let first = !inner.probed;
            inner.probed = true;
            (inner.sources.clone(), first)
        };

        if let Some(failed) = sources.iter().find(|s| s.state() == NodeState::Failed) {
            tracing::debug!(node = node.id(), child = failed.id(), "skipped, a source failed");
            return Ok(Some(NodeState::Failed));
        }

        let mut forced = false;
        if first_attempt && !self.config.clean {
            match node.step().probe(node, &self.registry, &self.config)? {
                Probe::NoChange => {}
                Probe::Discovered(found) => {
                    // `queued` stays set until the discoverer has added the
                    // new edges, so nothing runs the node in between.
                    node.lock().state = NodeState::ExtraCheck;
                    self.send(Event::Extend {
                        node: node.clone(),
                        sources: found,
                    });
                    return Ok(None);
                }
                Probe::ForceRebuild => forced = true,
                Probe::Satisfied => return Ok(Some(NodeState::Done)),
            }
        }

        if self.config.clean {
            return self.clean(node, &sources);
        }
        self.build(node, &sources, forced).map(Some)
    }

    fn clean(&self, node: &Node, sources: &[Arc<Node>]) -> Result<Option<NodeState>> {
        if sources.is_empty() || node.step().is_virtual() || !node.modtime().exists() {
            return Ok(Some(NodeState::Done));
        }
        self.progress
            .started(node.id(), &format!("rm {}", node.id()));
        if !self.config.dry_run {
            fs::remove(node.path()).map_err(|err| Error::io(node.path(), err))?;
        }
        node.set_modtime(MTime::Missing);
        Ok(Some(NodeState::Done))
    }

    fn log_staleness(&self, node: &Node, sources: &[Arc<Node>], staleness: &Staleness) {
        let verbose = self.config.verbose;
        let msg = match staleness {
            Staleness::UpToDate if verbose >= Verbosity::VeryNoisy && !sources.is_empty() => {
                let ids: Vec<&str> = sources.iter().map(|s| s.id()).collect();
                format!("-- {} > {{ {} }} : already up to date", node.id(), ids.join(" "))
            }
            Staleness::UpToDate => return,
            _ if verbose < Verbosity::Noisy => return,
            Staleness::Missing => format!("-- {} is missing", node.id()),
            Staleness::Newer(ids) => format!("-- {} <= {{ {} }}", node.id(), ids.join(" ")),
            Staleness::Forced => format!("-- {} changed contents", node.id()),
        };
        self.progress.log(&msg);
    }

    fn build(&self, node: &Node, sources: &[Arc<Node>], forced: bool) -> Result<NodeState> {
        let ours = node.modtime();
        match node.step() {
            Step::Phony => {
                let newest = sources.iter().map(|s| s.modtime()).max();
                node.set_modtime(newest.unwrap_or(MTime::Missing));
                return Ok(NodeState::Done);
            }
            Step::Source => {
                if ours.exists() {
                    return Ok(NodeState::Done);
                }
                let needed_by = node
                    .parents()
                    .iter()
                    .find(|p| !Arc::ptr_eq(p, &self.sentinel))
                    .map(|p| p.id().to_owned());
                let message = match needed_by {
                    Some(parent) => {
                        format!("source file {} is missing, needed by {}", node.id(), parent)
                    }
                    None => format!("source file {} is missing", node.id()),
                };
                return self.fail(node, message, Vec::new());
            }
            _ => {}
        }

        let staleness = oracle::staleness(ours, sources, forced);
        self.log_staleness(node, sources, &staleness);
        if !staleness.is_stale() {
            return Ok(NodeState::Done);
        }

        let top = self.registry.top();
        if let Some(msg) = node.step().message(node, top, self.config.verbose) {
            self.progress.started(node.id(), &msg);
        }
        if self.config.dry_run {
            self.executed.fetch_add(1, AtomicOrdering::Relaxed);
            let newest = sources.iter().map(|s| s.modtime()).fold(ours, MTime::max);
            node.set_modtime(newest.advanced());
            return Ok(NodeState::Done);
        }

        if let Some(dir) = node.path().parent() {
            std::fs::create_dir_all(dir).map_err(|err| Error::io(dir, err))?;
        }
        let output = match node.step().run(node, top) {
            Ok(output) => output,
            Err(failure) => {
                // Whatever was left behind is suspect; make sure the next run
                // does not take it for up to date.
                if let Err(err) = fs::remove(node.path()) {
                    tracing::warn!(
                        node = node.id(),
                        error = %err,
                        "could not remove failed output"
                    );
                }
                return self.fail(node, failure.message, failure.output);
            }
        };
        self.executed.fetch_add(1, AtomicOrdering::Relaxed);
        if self.config.show_output {
            self.progress.output(node.id(), &output);
        }
        let mtime = oracle::verify(node, sources)?;
        node.set_modtime(mtime);
        Ok(NodeState::Done)
    }

    fn fail(&self, node: &Node, message: String, output: Vec<u8>) -> Result<NodeState> {
        self.progress.failed(node.id(), &message, &output);
        if self.config.keep_going {
            return Ok(NodeState::Failed);
        }
        Err(Error::BuildStep {
            target: node.id().to_owned(),
            message,
        })
    }
}
