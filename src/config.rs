//! Engine-wide options, fixed for the duration of a build.

use std::num::NonZeroUsize;

/// How much to print about what the engine is doing.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    #[default]
    Quiet,
    /// Print why steps run and full command lines for most steps.
    Noisy,
    /// Also print up-to-date targets and every command line.
    VeryNoisy,
}

#[derive(Clone, Debug, Default)]
pub struct Config {
    /// Number of worker threads; 0 derives a count from the machine.
    pub parallelism: usize,
    /// Print steps instead of running them.
    pub dry_run: bool,
    /// Delete destinations instead of building them.
    pub clean: bool,
    /// Keep building unrelated targets after a step fails.
    pub keep_going: bool,
    pub verbose: Verbosity,
    /// Show the captured output of successful steps too.
    pub show_output: bool,
}

impl Config {
    /// The worker pool size.  Most steps spend some time blocked on I/O, so
    /// without an explicit setting the pool is a little larger than the CPU
    /// count.
    pub fn workers(&self) -> usize {
        if self.parallelism > 0 {
            return self.parallelism;
        }
        let cpus = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        oversubscribe(cpus)
    }
}

fn oversubscribe(cpus: usize) -> usize {
    if cpus < 3 {
        cpus + 1
    } else if cpus < 8 {
        cpus + 2
    } else {
        cpus + cpus / 4
    }
}
