//! Build progress reporting, for the purpose of display to the user.
//!
//! Workers call into a shared Progress from many threads at once; each call
//! must reach the console as one piece.

use std::io::Write;

/// Trait for build progress notifications.
pub trait Progress: Send + Sync {
    /// Called when a step is about to run, with its one-line description
    /// (or full command line, depending on verbosity).
    fn started(&self, id: &str, message: &str);

    /// Called with the captured output of a step that succeeded, when the
    /// configuration asks to see it.
    fn output(&self, id: &str, output: &[u8]);

    /// Called when a step fails, with everything it printed.
    fn failed(&self, id: &str, message: &str, output: &[u8]);

    /// Log a line of engine output (staleness reasons, warnings).
    fn log(&self, msg: &str);
}

/// Progress implementation for a plain console, without any overprinting.
#[derive(Default)]
pub struct ConsoleProgress {}

impl ConsoleProgress {
    pub fn new() -> Self {
        ConsoleProgress {}
    }

    fn write(&self, chunks: &[&[u8]]) {
        // One locked write per message keeps concurrent steps apart.  A
        // closed stdout is not worth failing the build over.
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        for chunk in chunks {
            if out.write_all(chunk).is_err() {
                return;
            }
        }
        let _ = out.flush();
    }
}

fn ensure_newline(output: &[u8]) -> &'static [u8] {
    if output.is_empty() || output.ends_with(b"\n") {
        b""
    } else {
        b"\n"
    }
}

impl Progress for ConsoleProgress {
    fn started(&self, _id: &str, message: &str) {
        self.write(&[message.as_bytes(), b"\n"]);
    }

    fn output(&self, _id: &str, output: &[u8]) {
        if output.is_empty() {
            return;
        }
        self.write(&[output, ensure_newline(output)]);
    }

    fn failed(&self, _id: &str, message: &str, output: &[u8]) {
        self.write(&[
            output,
            ensure_newline(output),
            b"failed: ",
            message.as_bytes(),
            b"\n",
        ]);
    }

    fn log(&self, msg: &str) {
        self.write(&[msg.as_bytes(), b"\n"]);
    }
}

/// Implementation of Progress that prints nothing.
#[derive(Default)]
pub struct NoProgress {}

impl Progress for NoProgress {
    fn started(&self, _id: &str, _message: &str) {}
    fn output(&self, _id: &str, _output: &[u8]) {}
    fn failed(&self, _id: &str, _message: &str, _output: &[u8]) {}
    fn log(&self, _msg: &str) {}
}
