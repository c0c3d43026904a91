//! Step kinds: what it takes to produce a node's destination from its
//! sources, plus the optional dependency probe each kind may run first.

use crate::config::{Config, Verbosity};
use crate::depfile;
use crate::error::{Error, Result};
use crate::fs::{self, MTime};
use crate::graph::{Node, Registry};
use crate::process;
use crate::scanner::{self, Scanner};
use crate::template::Template;
use rustc_hash::FxHashSet;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CommandKind {
    /// Arbitrary command; always printed in full.
    Exec,
    /// Writes a depfile that a later compile reads.
    Depend,
    /// Compiles, then has its depfile checked on first attempt.
    Compile,
    Archive,
    Link,
}

#[derive(Debug)]
pub struct CommandStep {
    pub kind: CommandKind,
    pub template: Template,
    /// Id of the source holding this step's depfile; defaults to the first
    /// source.  Only read for `Compile`.
    pub depfile: Option<String>,
    /// Working directory relative to the top, if not the top itself.
    pub cwd: Option<PathBuf>,
}

#[derive(Debug)]
pub enum Step {
    /// A file that exists before the build starts.
    Source,
    /// An alias for its sources; produces nothing on disk.
    Phony,
    Command(CommandStep),
    /// Recreate the destination with a fresh timestamp.
    Touch,
    /// Concatenate the sources in order.
    Concat,
    /// Copy the single source over the destination, but only when the
    /// contents actually differ.
    CompareCopy,
}

/// What a dependency probe found.
#[derive(Debug)]
pub enum Probe {
    NoChange,
    /// More sources that must be built before this step may run.
    Discovered(Vec<Arc<Node>>),
    /// Run the step even if timestamps say it is up to date.
    ForceRebuild,
    /// The destination is already correct; skip the step entirely.
    Satisfied,
}

/// A step that ran and failed, with everything it printed.
#[derive(Debug)]
pub struct StepFailure {
    pub message: String,
    pub output: Vec<u8>,
}

impl StepFailure {
    fn new(message: impl Into<String>) -> Self {
        StepFailure {
            message: message.into(),
            output: Vec::new(),
        }
    }
}

impl Step {
    pub fn command(kind: CommandKind, template: Template) -> Step {
        Step::Command(CommandStep {
            kind,
            template,
            depfile: None,
            cwd: None,
        })
    }

    /// Check the step can be applied to `count` sources.
    pub(crate) fn validate(&self, id: &str, count: usize) -> Result<()> {
        match self {
            Step::Command(cmd) => cmd.template.check_arity(count),
            Step::CompareCopy if count != 1 => Err(Error::config(format!(
                "{}: compare-copy needs exactly one source, got {}",
                id, count
            ))),
            Step::Concat if count == 0 => {
                Err(Error::config(format!("{}: nothing to concatenate", id)))
            }
            _ => Ok(()),
        }
    }

    /// Steps that produce nothing on disk; their stamp is derived from their
    /// sources.
    pub fn is_virtual(&self) -> bool {
        matches!(self, Step::Phony)
    }

    /// Whether running this step tends to reveal further dependencies, which
    /// makes it worth scheduling early.
    pub fn produces_dependencies(&self) -> bool {
        matches!(
            self,
            Step::Command(CommandStep {
                kind: CommandKind::Depend,
                ..
            })
        )
    }

    /// The line printed when the step starts, if any.
    pub fn message(&self, node: &Node, top: &Path, verbose: Verbosity) -> Option<String> {
        let id = node.id();
        let msg = match self {
            Step::Source | Step::Phony => return None,
            Step::Command(cmd) => {
                let brief = match (cmd.kind, verbose) {
                    (CommandKind::Compile, Verbosity::Quiet) => Some("Compiling"),
                    (CommandKind::Archive, Verbosity::Quiet) => Some("Archiving"),
                    (CommandKind::Link, Verbosity::Quiet) => Some("Linking  "),
                    (CommandKind::Depend, v) if v < Verbosity::VeryNoisy => Some("Depending"),
                    _ => None,
                };
                match brief {
                    Some(verb) => format!("{} {}", verb, id),
                    None => cmd.command_line(node, top),
                }
            }
            Step::Touch => format!("touch {}", id),
            Step::Concat if verbose == Verbosity::VeryNoisy => {
                format!("cat {} > {}", join_ids(&node.sources()), id)
            }
            Step::Concat => format!("Concating {}", id),
            Step::CompareCopy if verbose == Verbosity::VeryNoisy => {
                format!("cat {} > {}", join_ids(&node.sources()), id)
            }
            Step::CompareCopy => format!("Copying   {}", id),
        };
        Some(msg)
    }

    /// Run the kind's dependency probe.  Called once per node, after its
    /// sources are terminal and before the step itself.
    pub(crate) fn probe(
        &self,
        node: &Node,
        registry: &Registry,
        config: &Config,
    ) -> Result<Probe> {
        match self {
            Step::Command(cmd) if cmd.kind == CommandKind::Compile => {
                probe_depfile(cmd, node, registry, config)
            }
            Step::CompareCopy => probe_compare(node, config),
            _ => Ok(Probe::NoChange),
        }
    }

    /// Produce the destination.  Returns the step's console output.
    pub(crate) fn run(&self, node: &Node, top: &Path) -> std::result::Result<Vec<u8>, StepFailure> {
        match self {
            Step::Source | Step::Phony => Ok(Vec::new()),
            Step::Command(cmd) => {
                let cmdline = cmd.command_line(node, top);
                if cmd.kind == CommandKind::Archive {
                    // Archivers compare stamps on the objects they were just
                    // handed; let the filesystem settle first.
                    std::thread::sleep(Duration::from_millis(2));
                }
                let cwd = match &cmd.cwd {
                    Some(dir) => top.join(dir),
                    None => top.to_path_buf(),
                };
                let captured = process::run_command(&cmdline, &cwd)
                    .map_err(|err| StepFailure::new(format!("failed to run: {}", err)))?;
                if !captured.success() {
                    return Err(StepFailure {
                        message: captured.status.clone(),
                        output: captured.combined(),
                    });
                }
                Ok(captured.combined())
            }
            Step::Touch => {
                touch(node.path()).map_err(|err| {
                    StepFailure::new(format!("unable to make {}: {}", node.id(), err))
                })?;
                Ok(Vec::new())
            }
            Step::Concat | Step::CompareCopy => {
                concat(node.path(), &node.sources()).map_err(|err| {
                    StepFailure::new(format!("unable to write {}: {}", node.id(), err))
                })?;
                Ok(Vec::new())
            }
        }
    }
}

impl CommandStep {
    pub fn command_line(&self, node: &Node, top: &Path) -> String {
        let sources = node.sources();
        let ids: Vec<&str> = sources.iter().map(|s| s.id()).collect();
        self.template
            .render(node.id(), &ids, &top.to_string_lossy())
    }
}

fn join_ids(nodes: &[Arc<Node>]) -> String {
    nodes
        .iter()
        .map(|n| n.id())
        .collect::<Vec<_>>()
        .join(" ")
}

fn touch(path: &Path) -> std::io::Result<()> {
    fs::remove(path)?;
    // A zero-length file reads back as missing, so leave a newline behind.
    let mut f = std::fs::File::create(path)?;
    f.write_all(b"\n")?;
    drop(f);
    filetime::set_file_mtime(path, filetime::FileTime::from_system_time(SystemTime::now()))
}

fn concat(dst: &Path, sources: &[Arc<Node>]) -> std::io::Result<()> {
    let mut out = std::fs::File::create(dst)?;
    for src in sources {
        let mut input = std::fs::File::open(src.path())?;
        std::io::copy(&mut input, &mut out)?;
    }
    out.sync_all()
}

/// Whether two paths name the same file, allowing either to be a suffix of
/// the other ("obj/a.o" vs "/top/obj/a.o").
fn same_file(a: &str, b: &str) -> bool {
    fn suffix(long: &str, short: &str) -> bool {
        long.len() > short.len()
            && long.ends_with(short)
            && long.as_bytes()[long.len() - short.len() - 1] == b'/'
    }
    a == b || suffix(a, b) || suffix(b, a)
}

/// Render a top-relative path as an id, with '/' separators.
fn relative_id(rel: &Path) -> String {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Map one depfile entry onto a node.
fn resolve_dep(dep: &str, dependent: &Node, registry: &Registry) -> Result<Arc<Node>> {
    let path = Path::new(dep);
    let id = if path.is_absolute() {
        match path.strip_prefix(registry.top()) {
            Ok(rel) => relative_id(rel),
            // System headers and the like.
            Err(_) => return Ok(registry.resolve_leaf(dep)),
        }
    } else if dep.starts_with("../") {
        return Ok(registry.resolve_leaf(dep));
    } else {
        dep.to_owned()
    };

    let node = match registry.get(&id) {
        Some(node) => node,
        None => {
            let on_disk = registry.top().join(&id).exists();
            return Err(Error::config(if on_disk {
                format!(
                    "{} (needed by {}) is present but the catalog does not declare it",
                    id,
                    dependent.id()
                )
            } else {
                format!(
                    "{} (needed by {}) is neither declared in the catalog nor present",
                    id,
                    dependent.id()
                )
            }));
        }
    };
    if matches!(node.step(), Step::Source) {
        let st = fs::stat(node.path()).map_err(|err| Error::io(node.path(), err))?;
        if !st.mtime.exists() {
            return Err(Error::config(format!(
                "declared source {} (needed by {}) is missing",
                id,
                dependent.id()
            )));
        }
    }
    Ok(node)
}

fn probe_depfile(
    cmd: &CommandStep,
    node: &Node,
    registry: &Registry,
    config: &Config,
) -> Result<Probe> {
    let sources = node.sources();
    let depnode = match &cmd.depfile {
        Some(id) => match sources.iter().find(|s| s.id() == id) {
            Some(s) => s.clone(),
            None => {
                return Err(Error::config(format!(
                    "{}: depfile {} is not one of its sources",
                    node.id(),
                    id
                )))
            }
        },
        None => match sources.first() {
            Some(s) => s.clone(),
            None => return Ok(Probe::NoChange),
        },
    };

    let text = match std::fs::read_to_string(depnode.path()) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            // Never generated because nothing really ran.
            if config.dry_run || config.clean {
                return Ok(Probe::NoChange);
            }
            return Err(Error::config(format!(
                "{}: depfile {} was not produced",
                node.id(),
                depnode.id()
            )));
        }
        Err(err) => return Err(Error::io(depnode.path(), err)),
    };
    let buf = scanner::terminated(&text);
    let mut scanner = Scanner::new(&buf);
    let parsed = depfile::parse(&mut scanner)
        .map_err(|err| Error::config(scanner.format_parse_error(depnode.path(), err)))?;

    if !same_file(parsed.target, node.id()) {
        return Err(Error::config(format!(
            "depfile {} describes {}, expected {}",
            depnode.id(),
            parsed.target,
            node.id()
        )));
    }
    let mut deps = parsed.deps.iter();
    if let (Some(primary), Some(expected)) = (deps.next(), depnode.sources().first()) {
        if !same_file(primary, expected.id()) {
            return Err(Error::config(format!(
                "depfile {} starts with {}, expected {}",
                depnode.id(),
                primary,
                expected.id()
            )));
        }
    }

    let mut seen: FxHashSet<String> = sources.iter().map(|s| s.id().to_owned()).collect();
    let mut discovered = Vec::new();
    for dep in deps {
        let dep = resolve_dep(dep, node, registry)?;
        if seen.insert(dep.id().to_owned()) {
            discovered.push(dep);
        }
    }
    if discovered.is_empty() {
        return Ok(Probe::NoChange);
    }
    tracing::debug!(node = node.id(), count = discovered.len(), "discovered dependencies");
    Ok(Probe::Discovered(discovered))
}

fn probe_compare(node: &Node, config: &Config) -> Result<Probe> {
    // In a dry run a newer source only means its generator would have run;
    // there is nothing on disk to compare yet.
    if config.dry_run {
        return Ok(Probe::NoChange);
    }
    let src = match node.sources().first() {
        Some(s) => s.clone(),
        None => return Ok(Probe::NoChange),
    };
    let ours = node.modtime();
    if ours == MTime::Missing || src.modtime() <= ours {
        return Ok(Probe::NoChange);
    }
    let read = |path: &Path| std::fs::read(path).map_err(|err| Error::io(path, err));
    if read(src.path())? != read(node.path())? {
        return Ok(Probe::ForceRebuild);
    }
    Ok(Probe::Satisfied)
}
