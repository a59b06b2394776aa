//! Operator-facing progress output.
//!
//! Workflows narrate each step to the operator separately from the
//! structured `tracing` log. [`Console`] is that channel; the terminal
//! implementation writes progress to stdout and problems to stderr.

use std::io::{self, Write};

/// Sink for human-readable progress messages.
pub trait Console {
    /// Reports a neutral progress step.
    fn status(&self, message: &str);
    /// Reports a completed step.
    fn success(&self, message: &str);
    /// Reports something the operator should notice.
    fn warn(&self, message: &str);
    /// Reports a failed step.
    fn failure(&self, message: &str);
}

/// Writes messages to the process terminal.
#[derive(Clone, Copy, Debug, Default)]
pub struct TerminalConsole;

impl Console for TerminalConsole {
    fn status(&self, message: &str) {
        writeln!(io::stdout(), "{message}").ok();
    }

    fn success(&self, message: &str) {
        writeln!(io::stdout(), "{message}").ok();
    }

    fn warn(&self, message: &str) {
        writeln!(io::stderr(), "warning: {message}").ok();
    }

    fn failure(&self, message: &str) {
        writeln!(io::stderr(), "error: {message}").ok();
    }
}
