//! Raw process events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A raw event from a process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessEvent {
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// The type of event
    pub event_type: ProcessEventType,
    /// The output line for stdout/stderr events
    pub data: Option<String>,
}

impl ProcessEvent {
    /// Create a new process event
    pub fn new(event_type: ProcessEventType) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            data: None,
        }
    }

    /// Create an output line event for the given stream
    pub fn line(source: LogSource, data: impl Into<String>) -> Self {
        let event_type = match source {
            LogSource::Stdout => ProcessEventType::Stdout,
            LogSource::Stderr => ProcessEventType::Stderr,
        };
        Self {
            timestamp: Utc::now(),
            event_type,
            data: Some(data.into()),
        }
    }

    /// The stream an output event came from, `None` for lifecycle events
    pub fn source(&self) -> Option<LogSource> {
        match self.event_type {
            ProcessEventType::Stdout => Some(LogSource::Stdout),
            ProcessEventType::Stderr => Some(LogSource::Stderr),
            ProcessEventType::Started { .. } => None,
        }
    }
}

/// Types of raw process events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProcessEventType {
    /// Process has started
    Started {
        /// OS process id
        pid: u32,
    },
    /// Line from stdout
    Stdout,
    /// Line from stderr
    Stderr,
}

/// Source of an output line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogSource {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogSource::Stdout => write!(f, "stdout"),
            LogSource::Stderr => write!(f, "stderr"),
        }
    }
}
