//! Runs build commands as subprocesses, capturing their output.
//!
//! Output is buffered per invocation so that the caller can decide whether
//! and when to show it; this is what keeps the logs of concurrently running
//! steps from interleaving.

use std::io::Read;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Termination {
    Success,
    Interrupted,
    Failure,
}

/// The result of running a command to completion.
#[derive(Debug)]
pub struct Captured {
    pub termination: Termination,
    /// Human-readable exit status, e.g. "exit status 2" or "signal 9".
    pub status: String,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl Captured {
    pub fn success(&self) -> bool {
        self.termination == Termination::Success
    }

    /// stdout followed by stderr, as shown to the user.
    pub fn combined(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.stdout.len() + self.stderr.len());
        out.extend_from_slice(&self.stdout);
        out.extend_from_slice(&self.stderr);
        out
    }
}

#[cfg(unix)]
fn shell(cmdline: &str) -> Command {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(cmdline);
    cmd
}

#[cfg(windows)]
fn shell(cmdline: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(cmdline);
    cmd
}

fn drain(pipe: Option<impl Read>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf)?;
    }
    Ok(buf)
}

#[cfg(unix)]
fn termination(status: ExitStatus) -> (Termination, String) {
    use std::os::unix::process::ExitStatusExt;
    if status.success() {
        return (Termination::Success, status.to_string());
    }
    match status.signal() {
        Some(libc::SIGINT) => (Termination::Interrupted, "interrupted".to_owned()),
        Some(sig) => (Termination::Failure, format!("signal {}", sig)),
        None => (
            Termination::Failure,
            format!("exit status {}", status.code().unwrap_or(-1)),
        ),
    }
}

#[cfg(not(unix))]
fn termination(status: ExitStatus) -> (Termination, String) {
    if status.success() {
        return (Termination::Success, status.to_string());
    }
    (
        Termination::Failure,
        format!("exit status {}", status.code().unwrap_or(-1)),
    )
}

/// Run `cmdline` through the shell in `cwd` and wait for it.
///
/// stdout and stderr are drained concurrently: reading only one of them
/// deadlocks as soon as the child fills the OS pipe buffer of the other.
/// Returns an Err() only if the command could not be run at all.
pub fn run_command(cmdline: &str, cwd: &Path) -> std::io::Result<Captured> {
    let mut child = shell(cmdline)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();
    let (stdout, stderr) = std::thread::scope(|s| {
        let stderr_reader = s.spawn(move || drain(stderr_pipe));
        let stdout = drain(stdout_pipe);
        let stderr = stderr_reader.join().unwrap_or_else(|_| {
            Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "stderr reader panicked",
            ))
        });
        (stdout, stderr)
    });
    // Reap the child before reporting any read error, so it never lingers.
    let status = child.wait()?;
    let (stdout, stderr) = (stdout?, stderr?);

    let (termination, status) = termination(status);
    Ok(Captured {
        termination,
        status,
        stdout,
        stderr,
    })
}
