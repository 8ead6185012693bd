//! Streaming external commands into service logs

use super::markers::LineClassifier;
use super::{CommandRunner, EventStream};
use crate::sink::{PipelineLog, ServiceLog};
use crate::{Error, Result};
use command_executor::{Command, ExitStatus, LogSource};
use futures::{Stream, StreamExt};
use service_store::{LogBroadcastHub, ServiceStatus};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Runs commands without blocking the caller and turns each output line
/// into a classified log entry
pub struct ProcessExecutor {
    runner: Arc<dyn CommandRunner>,
    command_timeout: Option<Duration>,
}

impl ProcessExecutor {
    /// Create an executor over `runner` with no per-command timeout
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            command_timeout: None,
        }
    }

    /// Bound every command by `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// The runner commands are spawned through
    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    /// Run `command`, emitting every output line into `log`
    ///
    /// Both pipes are drained concurrently. Lines are tagged with the
    /// step of `log` until the output announces a new `Step i/n:` marker.
    /// When a per-command timeout is set and runs out, the child is killed
    /// and [`Error::Timeout`] is returned.
    pub async fn stream(&self, log: &PipelineLog<'_>, command: Command) -> Result<ExitStatus> {
        let rendered = command.to_string();
        debug!("Streaming command: {}", rendered);

        let (events, mut handle) = self.runner.spawn(command).await?;
        let mut classifier = LineClassifier::new(log.step().map(str::to_string));

        let outcome = {
            let run = async {
                forward_events(log, &mut classifier, events).await;
                handle.wait().await
            };
            match self.command_timeout {
                None => Some(run.await),
                Some(limit) => {
                    smol::future::or(async { Some(run.await) }, async {
                        smol::Timer::after(limit).await;
                        None
                    })
                    .await
                }
            }
        };

        match outcome {
            Some(status) => Ok(status?),
            None => {
                let after = self.command_timeout.unwrap_or_default();
                warn!("Killing `{}` after {}s", rendered, after.as_secs());
                if let Err(e) = handle.kill().await {
                    warn!("Failed to kill timed out command: {}", e);
                }
                let _ = handle.wait().await;
                Err(Error::Timeout {
                    operation: rendered,
                    after,
                })
            }
        }
    }

    /// Run `command` and fail with [`Error::ExternalTool`] on a nonzero exit
    pub async fn stream_checked(&self, log: &PipelineLog<'_>, command: Command) -> Result<()> {
        let rendered = command.to_string();
        let status = self.stream(log, command).await?;
        if status.success() {
            Ok(())
        } else {
            Err(Error::ExternalTool {
                command: rendered,
                status: status.to_string(),
                detail: "see service log".to_string(),
            })
        }
    }

    /// Classify plain lines (for example remote build logs) into `log`
    pub async fn forward_lines<S>(&self, log: &PipelineLog<'_>, lines: S)
    where
        S: Stream<Item = String> + Send,
    {
        let mut classifier = LineClassifier::new(log.step().map(str::to_string));
        let mut lines = std::pin::pin!(lines);
        while let Some(line) = lines.next().await {
            if let Some(entry) = classifier.classify(&line, LogSource::Stdout) {
                log.emit(entry).await;
            }
        }
    }

    /// Run `command` on behalf of a service and settle its status
    ///
    /// Output goes to the service log. Exit code 0 makes the service
    /// active; a nonzero exit or a failure to run at all makes it failed.
    pub async fn run_command(
        &self,
        hub: &Arc<LogBroadcastHub>,
        service_id: &str,
        command: Command,
    ) -> ServiceStatus {
        let sink = ServiceLog::new(service_id, hub.clone());
        let log = PipelineLog::new(&sink);

        info!("Running command for service {}: {}", service_id, command);
        log.info(format!("Starting command: {command}")).await;

        let status = match self.stream(&log, command).await {
            Ok(exit) if exit.success() => {
                log.success("Command completed successfully").await;
                ServiceStatus::Active
            }
            Ok(exit) => {
                log.error(format!("Command failed with {exit}")).await;
                ServiceStatus::Failed
            }
            Err(e) => {
                error!("Error running command for {}: {}", service_id, e);
                log.error(format!("Internal error: {e}")).await;
                ServiceStatus::Failed
            }
        };

        if let Err(e) = hub.store().set_status(service_id, status).await {
            error!("Failed to update status of {}: {}", service_id, e);
        }
        status
    }
}

async fn forward_events(log: &PipelineLog<'_>, classifier: &mut LineClassifier, mut events: EventStream) {
    while let Some(event) = events.next().await {
        let (Some(source), Some(data)) = (event.source(), event.data.as_deref()) else {
            continue;
        };
        if let Some(entry) = classifier.classify(data, source) {
            log.emit(entry).await;
        }
    }
}
