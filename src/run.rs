//! The command-line driver: flags, logging, the bootstrap handoff, and the
//! summary line.

use crate::catalog;
use crate::config::{Config, Verbosity};
use crate::engine::Engine;
use crate::fs;
use crate::progress::{ConsoleProgress, Progress};
use anyhow::anyhow;
use argh::FromArgs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Set in the environment of an instance started after a bootstrap rebuild,
/// so that it does not hand off again.
const BOOTSTRAPPED_ENV: &str = "KILN_BOOTSTRAPPED";

#[derive(FromArgs)]
/// kiln: a parallel, incremental build tool.
struct Args {
    /// chdir before running
    #[argh(option, short = 'C')]
    chdir: Option<PathBuf>,

    /// rule catalog to read [default=kiln.rules]
    #[argh(option, short = 'f', default = "PathBuf::from(\"kiln.rules\")")]
    file: PathBuf,

    /// parallelism [default derived from the CPU count]
    #[argh(option, short = 'j')]
    jobs: Option<usize>,

    /// keep building unrelated targets after a step fails
    #[argh(switch, short = 'k')]
    keep_going: bool,

    /// print what would run, without running it
    #[argh(switch, short = 'n')]
    dry_run: bool,

    /// delete built files instead of building them
    #[argh(switch)]
    clean: bool,

    /// print why steps run, and their command lines
    #[argh(switch, short = 'v')]
    verbose: bool,

    /// like -v, and also print targets that are already up to date
    #[argh(switch)]
    very_verbose: bool,

    /// show the output of every step, not only of failed ones
    #[argh(switch, short = 'w')]
    show_output: bool,

    /// targets to build [default: the catalog's defaults]
    #[argh(positional)]
    targets: Vec<String>,
}

// The result of starting a build.
enum BuildResult {
    /// A build step failed.
    Failed,
    /// Rebuilt the bootstrap target; the caller must hand off to a fresh
    /// instance to continue.
    Regen,
    /// Build succeeded, and the number is the count of executed steps.
    Success(usize),
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_env("KILN_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    // A second init (e.g. from tests) is harmless.
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

/// Build the catalog's bootstrap target on its own.  Returns Regen if that
/// changed it.
fn bootstrap(
    catalog_path: &Path,
    config: &Arc<Config>,
    progress: &Arc<dyn Progress>,
) -> anyhow::Result<BuildResult> {
    let catalog = catalog::load(catalog_path)?;
    let target = match catalog.bootstrap {
        Some(t) => t,
        None => return Ok(BuildResult::Success(0)),
    };
    let registry = Arc::new(catalog.registry);
    let node = registry
        .get(&target)
        .ok_or_else(|| anyhow!("unknown bootstrap target '{}'", target))?;
    let before = fs::mtime(node.path())?;

    let engine = Engine::new(registry, config.clone(), progress.clone());
    let report = engine.build(&[target.as_str()])?;
    if !report.success() {
        return Ok(BuildResult::Failed);
    }
    if node.modtime() != before {
        tracing::debug!(bootstrap = target.as_str(), "bootstrap target changed");
        return Ok(BuildResult::Regen);
    }
    Ok(BuildResult::Success(report.executed))
}

fn build(
    catalog_path: &Path,
    targets: &[String],
    config: &Arc<Config>,
    progress: &Arc<dyn Progress>,
) -> anyhow::Result<BuildResult> {
    let catalog = catalog::load(catalog_path)?;
    let targets: Vec<String> = if !targets.is_empty() {
        targets.to_vec()
    } else if !catalog.defaults.is_empty() {
        catalog.defaults
    } else {
        anyhow::bail!("no target specified and no default");
    };

    let engine = Engine::new(Arc::new(catalog.registry), config.clone(), progress.clone());
    let report = engine.build(&targets[..])?;
    if !report.success() {
        return Ok(BuildResult::Failed);
    }
    Ok(BuildResult::Success(report.executed))
}

/// Start a fresh copy of ourselves with the same arguments and wait for it.
fn hand_off(original_dir: &Path) -> anyhow::Result<i32> {
    let exe = std::env::current_exe()?;
    let status = std::process::Command::new(&exe)
        .args(std::env::args_os().skip(1))
        .current_dir(original_dir)
        .env(BOOTSTRAPPED_ENV, "1")
        .status()
        .map_err(|err| anyhow!("restart {}: {}", exe.display(), err))?;
    Ok(status.code().unwrap_or(1))
}

pub fn run() -> anyhow::Result<i32> {
    let args: Args = argh::from_env();
    init_logging();

    let original_dir = std::env::current_dir()?;
    if let Some(dir) = &args.chdir {
        std::env::set_current_dir(dir)
            .map_err(|err| anyhow!("chdir {}: {}", dir.display(), err))?;
    }

    let verbose = if args.very_verbose {
        Verbosity::VeryNoisy
    } else if args.verbose {
        Verbosity::Noisy
    } else {
        Verbosity::Quiet
    };
    let config = Arc::new(Config {
        parallelism: args.jobs.unwrap_or(0),
        dry_run: args.dry_run,
        clean: args.clean,
        keep_going: args.keep_going,
        verbose,
        show_output: args.show_output,
    });
    let progress: Arc<dyn Progress> = Arc::new(ConsoleProgress::new());

    let bootstrapped = std::env::var_os(BOOTSTRAPPED_ENV).is_some();
    if !bootstrapped && !config.clean && !config.dry_run {
        match bootstrap(&args.file, &config, &progress)? {
            BuildResult::Failed => return Ok(1),
            BuildResult::Regen => return hand_off(&original_dir),
            BuildResult::Success(_) => {}
        }
    }

    match build(&args.file, &args.targets, &config, &progress)? {
        BuildResult::Regen => unreachable!("only bootstrap regenerates"),
        BuildResult::Failed => {
            // Don't print any summary, the failing step is enough info.
            return Ok(1);
        }
        BuildResult::Success(0) => {
            // Special case: don't print numbers when no work done.
            println!("kiln: no work to do");
        }
        BuildResult::Success(n) => {
            println!("kiln: ran {} steps, now up to date", n);
        }
    }

    Ok(0)
}
