use std::io::{IsTerminal, Write};
use std::sync::Arc;

use owo_colors::OwoColorize;
use scry_query::http::ExplainSink;

/// Everything user-facing that is not the command's result goes through
/// here, and always to stderr.
#[derive(Debug, Clone, Copy)]
pub struct Diagnostics {
    color: bool,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl Diagnostics {
    pub fn new() -> Self {
        Self {
            color: std::io::stderr().is_terminal(),
        }
    }

    pub fn warn(&self, message: &str) {
        if self.color {
            self.write(&format!("{} {message}", "warning:".yellow().bold()));
        } else {
            self.write(&format!("warning: {message}"));
        }
    }

    pub fn hint(&self, message: &str) {
        if self.color {
            self.write(&format!("{} {message}", "hint:".cyan()));
        } else {
            self.write(&format!("hint: {message}"));
        }
    }

    pub fn error(&self, message: &str) {
        if self.color {
            self.write(&format!("{} {message}", "error:".red().bold()));
        } else {
            self.write(&format!("error: {message}"));
        }
    }

    pub fn explain(&self, message: &str) {
        for line in message.lines() {
            if self.color {
                self.write(&format!("{}", format!("  | {line}").bright_black()));
            } else {
                self.write(&format!("  | {line}"));
            }
        }
    }

    pub fn explain_sink(self) -> ExplainSink {
        Arc::new(move |line: String| self.explain(&line))
    }

    fn write(&self, line: &str) {
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "{line}");
    }
}
