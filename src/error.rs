//! Error classes raised by the build engine.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while discovering or building the graph.
#[derive(Error, Debug)]
pub enum Error {
    /// The rule catalog or a dependency probe described an impossible graph.
    /// Always fatal, independent of keep-going.
    #[error("{0}")]
    Configuration(String),

    /// A build step ran and failed, or could not be launched.
    #[error("{target}: {message}")]
    BuildStep { target: String, message: String },

    /// A build step misbehaved with respect to timestamps: it modified one of
    /// its sources, or left its destination behind its newest source.
    /// Always fatal and never retried.
    #[error("{0}")]
    Integrity(String),

    /// An unexpected filesystem failure while inspecting the graph.
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error stops the whole run.  Only step failures are
    /// recoverable, and only under keep-going.
    pub fn is_fatal(&self, keep_going: bool) -> bool {
        match self {
            Error::BuildStep { .. } => !keep_going,
            _ => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_step_failures_survive_keep_going() {
        let step = Error::BuildStep {
            target: "out".into(),
            message: "exit status 1".into(),
        };
        assert!(step.is_fatal(false));
        assert!(!step.is_fatal(true));
        assert!(Error::config("dup").is_fatal(true));
        assert!(Error::Integrity("moved".into()).is_fatal(true));
    }

    #[test]
    fn build_step_message_names_target() {
        let err = Error::BuildStep {
            target: "obj/a.o".into(),
            message: "exit status 2".into(),
        };
        assert_eq!(err.to_string(), "obj/a.o: exit status 2");
    }
}
