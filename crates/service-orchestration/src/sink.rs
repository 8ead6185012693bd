//! Where pipeline log entries go

use crate::executors::markers::{marker_for, severity_marker};
use async_trait::async_trait;
use service_store::{LogBroadcastHub, LogEntry, LogLevel};
use std::io::Write;
use std::sync::Arc;

/// Destination for log entries of one service
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Record one entry
    async fn emit(&self, entry: LogEntry);
}

/// Persists entries to a service log and fans them out to subscribers
pub struct ServiceLog {
    service_id: String,
    hub: Arc<LogBroadcastHub>,
}

impl ServiceLog {
    /// Sink for the log of `service_id`
    pub fn new(service_id: impl Into<String>, hub: Arc<LogBroadcastHub>) -> Self {
        Self {
            service_id: service_id.into(),
            hub,
        }
    }

    /// Service this sink writes to
    pub fn service_id(&self) -> &str {
        &self.service_id
    }
}

#[async_trait]
impl LogSink for ServiceLog {
    async fn emit(&self, entry: LogEntry) {
        self.hub.publish(&self.service_id, entry).await;
    }
}

/// Prints entries to stdout with their severity marker
///
/// Output keeps the step and severity markers, so a parent process can
/// classify it again line by line.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleLog;

impl ConsoleLog {
    /// Render an entry as one console line
    pub fn render(entry: &LogEntry) -> String {
        match marker_for(entry.level) {
            Some(marker) if severity_marker(&entry.message) != Some(entry.level) => {
                format!("{} {}", marker, entry.message)
            }
            _ => entry.message.clone(),
        }
    }
}

#[async_trait]
impl LogSink for ConsoleLog {
    async fn emit(&self, entry: LogEntry) {
        let mut stdout = std::io::stdout().lock();
        // A closed stdout must not take the pipeline down
        let _ = writeln!(stdout, "{}", Self::render(&entry));
        let _ = stdout.flush();
    }
}

/// A sink bound to the current pipeline step
#[derive(Clone)]
pub struct PipelineLog<'a> {
    sink: &'a dyn LogSink,
    step: Option<String>,
}

impl<'a> PipelineLog<'a> {
    /// Log into `sink` outside of any step
    pub fn new(sink: &'a dyn LogSink) -> Self {
        Self { sink, step: None }
    }

    /// The same sink, tagging entries with `step`
    pub fn for_step(&self, step: impl Into<String>) -> PipelineLog<'a> {
        PipelineLog {
            sink: self.sink,
            step: Some(step.into()),
        }
    }

    /// Current step label
    pub fn step(&self) -> Option<&str> {
        self.step.as_deref()
    }

    /// Underlying sink
    pub fn sink(&self) -> &'a dyn LogSink {
        self.sink
    }

    /// Emit a prepared entry, tagging it with the current step if it has none
    pub async fn emit(&self, mut entry: LogEntry) {
        if entry.step.is_none() {
            entry.step = self.step.clone();
        }
        self.sink.emit(entry).await;
    }

    async fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(LogEntry::new(level, message)).await;
    }

    /// Emit an info entry
    pub async fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message).await;
    }

    /// Emit a warning entry
    pub async fn warning(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message).await;
    }

    /// Emit an error entry
    pub async fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message).await;
    }

    /// Emit a success entry
    pub async fn success(&self, message: impl Into<String>) {
        self.log(LogLevel::Success, message).await;
    }
}
