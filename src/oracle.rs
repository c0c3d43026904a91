//! Timestamp bookkeeping: deciding whether a node needs its step, and
//! checking afterwards that the step did what it claimed.

use crate::error::{Error, Result};
use crate::fs::{self, MTime};
use crate::graph::Node;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Filesystems round stamps; give a fresh destination this many chances
/// to read back strictly newer than its sources.
const SETTLE_ATTEMPTS: usize = 100;
const SETTLE_SLEEP: Duration = Duration::from_millis(1);

/// How far in the future a stamp may be before we wait for the clock.
const SKEW_TOLERANCE: Duration = Duration::from_secs(3);

/// Why (or whether) a node must be rebuilt.
#[derive(Debug, PartialEq, Eq)]
pub enum Staleness {
    Missing,
    /// Ids of the sources newer than the destination.
    Newer(Vec<String>),
    /// The dependency probe asked for a rebuild.
    Forced,
    UpToDate,
}

impl Staleness {
    pub fn is_stale(&self) -> bool {
        *self != Staleness::UpToDate
    }
}

pub fn staleness(ours: MTime, sources: &[Arc<Node>], forced: bool) -> Staleness {
    if !ours.exists() {
        return Staleness::Missing;
    }
    let newer: Vec<String> = sources
        .iter()
        .filter(|src| src.modtime() > ours)
        .map(|src| src.id().to_owned())
        .collect();
    if !newer.is_empty() {
        return Staleness::Newer(newer);
    }
    if forced {
        return Staleness::Forced;
    }
    Staleness::UpToDate
}

/// Check a step's effect on disk after it succeeded, returning the
/// destination's new stamp.
pub fn verify(node: &Node, sources: &[Arc<Node>]) -> Result<MTime> {
    let mut newest = MTime::Missing;
    for src in sources {
        let recorded = src.modtime();
        newest = newest.max(recorded);
        if src.step().is_virtual() {
            continue;
        }
        let now = fs::mtime(src.path()).map_err(|err| Error::io(src.path(), err))?;
        if now != recorded {
            return Err(Error::Integrity(format!(
                "building {} changed its source {}; does the rule write the wrong file?",
                node.id(),
                src.id()
            )));
        }
    }

    let mut ours = MTime::Missing;
    for attempt in 0..SETTLE_ATTEMPTS {
        ours = fs::mtime(node.path()).map_err(|err| Error::io(node.path(), err))?;
        // Ties are retried too, and accepted once the attempts run out.
        if ours.exists() && ours > newest {
            break;
        }
        if attempt == 0 {
            tracing::debug!(node = node.id(), "waiting for destination stamp to settle");
        }
        std::thread::sleep(SETTLE_SLEEP);
    }
    let stamp = match ours {
        MTime::Missing => {
            return Err(Error::Integrity(format!(
                "{} was not produced by its step",
                node.id()
            )))
        }
        MTime::Stamp(t) => t,
    };
    if ours < newest {
        return Err(Error::Integrity(format!(
            "{} is older than its sources after being built",
            node.id()
        )));
    }

    // Networked filesystems may stamp with a clock running ahead of ours.
    // Wait it out, otherwise anything built next could look older than
    // this destination.
    if let Ok(ahead) = stamp.duration_since(SystemTime::now()) {
        if ahead > SKEW_TOLERANCE {
            tracing::warn!(
                node = node.id(),
                ahead_ms = ahead.as_millis() as u64,
                "destination stamped in the future; waiting for the clock"
            );
            std::thread::sleep(ahead);
        }
    }
    Ok(ours)
}
