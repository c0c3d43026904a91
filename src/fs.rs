//! Filesystem probing: modification times and sizes of destinations.

use std::path::Path;
use std::time::{Duration, SystemTime};

/// MTime info gathered for a file.  This also models "file is absent".
/// It's not using an Option<> just because it makes the code using it easier
/// to follow.  `Missing` orders before every stamp.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum MTime {
    Missing,
    Stamp(SystemTime),
}

impl MTime {
    pub fn exists(&self) -> bool {
        matches!(self, MTime::Stamp(_))
    }

    /// A stamp just past this one, used by dry runs to pretend a step ran.
    pub fn advanced(&self) -> MTime {
        match self {
            MTime::Missing => MTime::Stamp(SystemTime::now()),
            MTime::Stamp(t) => MTime::Stamp(*t + Duration::from_millis(1)),
        }
    }
}

/// The result of stat()ing a destination.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Stat {
    pub mtime: MTime,
    pub len: u64,
}

impl Stat {
    pub const MISSING: Stat = Stat {
        mtime: MTime::Missing,
        len: 0,
    };
}

/// stat() an on-disk path.
///
/// Zero-length files are reported as missing: they are almost always the
/// remains of a step that was interrupted halfway through writing.
pub fn stat(path: &Path) -> std::io::Result<Stat> {
    match std::fs::metadata(path) {
        Ok(meta) => {
            if meta.len() == 0 {
                return Ok(Stat::MISSING);
            }
            Ok(Stat {
                mtime: MTime::Stamp(meta.modified()?),
                len: meta.len(),
            })
        }
        Err(err) => {
            if err.kind() == std::io::ErrorKind::NotFound {
                Ok(Stat::MISSING)
            } else {
                Err(err)
            }
        }
    }
}

pub fn mtime(path: &Path) -> std::io::Result<MTime> {
    Ok(stat(path)?.mtime)
}

/// Remove a file, treating "already gone" as success.
pub fn remove(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}
