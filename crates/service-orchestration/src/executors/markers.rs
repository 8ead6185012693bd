//! Classifying tool output into log entries

use command_executor::LogSource;
use regex::Regex;
use service_store::{LogEntry, LogLevel};

/// Marks a line as a warning
pub const WARNING_MARKER: &str = "⚠️";
/// Marks a line as an error
pub const ERROR_MARKER: &str = "❌";
/// Marks a line as a success
pub const SUCCESS_MARKER: &str = "✅";

/// Severity forced by a marker embedded in `line`
pub fn severity_marker(line: &str) -> Option<LogLevel> {
    // Match on the base glyph so lines without the variation selector count
    if line.contains('⚠') {
        Some(LogLevel::Warning)
    } else if line.contains(ERROR_MARKER) {
        Some(LogLevel::Error)
    } else if line.contains(SUCCESS_MARKER) {
        Some(LogLevel::Success)
    } else {
        None
    }
}

/// Default severity of a line from `source`
pub fn default_level(source: LogSource) -> LogLevel {
    match source {
        LogSource::Stdout => LogLevel::Info,
        LogSource::Stderr => LogLevel::Error,
    }
}

/// Marker prefix a console renders for `level`
pub fn marker_for(level: LogLevel) -> Option<&'static str> {
    match level {
        LogLevel::Info => None,
        LogLevel::Warning => Some(WARNING_MARKER),
        LogLevel::Error => Some(ERROR_MARKER),
        LogLevel::Success => Some(SUCCESS_MARKER),
    }
}

/// Turns output lines of one command into log entries
///
/// Tracks the most recent `Step i/n: <label>` marker and tags every
/// following line with it, on both streams.
pub struct LineClassifier {
    step_marker: Regex,
    current_step: Option<String>,
}

impl LineClassifier {
    /// Create a classifier, optionally starting inside a step
    pub fn new(initial_step: Option<String>) -> Self {
        Self {
            step_marker: Regex::new(r"Step \d+/\d+: (.*)").expect("step marker pattern is valid"),
            current_step: initial_step,
        }
    }

    /// Step label lines are currently tagged with
    pub fn current_step(&self) -> Option<&str> {
        self.current_step.as_deref()
    }

    /// Classify one line; blank lines yield `None`
    pub fn classify(&mut self, line: &str, source: LogSource) -> Option<LogEntry> {
        let message = line.trim();
        if message.is_empty() {
            return None;
        }

        if let Some(caps) = self.step_marker.captures(message) {
            let label = caps[1].trim().trim_end_matches('.').trim_end();
            self.current_step = Some(label.to_string());
        }

        let level = severity_marker(message).unwrap_or_else(|| default_level(source));
        Some(LogEntry::new(level, message).with_step(self.current_step.clone()))
    }
}

impl Default for LineClassifier {
    fn default() -> Self {
        Self::new(None)
    }
}
