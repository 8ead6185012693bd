//! Running external tools
//!
//! Every tool the pipeline drives (git, the image builder, the cluster
//! client) goes through a [`CommandRunner`]. [`LocalRunner`] spawns real
//! processes; tests substitute a scripted runner.

pub mod markers;
pub mod process;

pub use markers::LineClassifier;
pub use process::ProcessExecutor;

use crate::{Error, Result};
use async_trait::async_trait;
use command_executor::{
    Command, Executor, ExitResult, LogSource, ProcessEvent, ProcessHandle, backends::LocalLauncher,
};
use futures::StreamExt;
use futures::stream::BoxStream;

/// Output events of a spawned command
pub type EventStream = BoxStream<'static, ProcessEvent>;

/// Spawns commands from explicit argument vectors
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Spawn `command`, returning its output events and a control handle
    async fn spawn(&self, command: Command) -> Result<(EventStream, Box<dyn ProcessHandle>)>;

    /// Run `command` to completion, capturing its output
    async fn output(&self, command: Command) -> Result<ExitResult> {
        let (mut events, mut handle) = self.spawn(command).await?;
        let mut stdout = String::new();
        let mut stderr = String::new();

        while let Some(event) = events.next().await {
            let (Some(source), Some(data)) = (event.source(), event.data.as_deref()) else {
                continue;
            };
            let buf = match source {
                LogSource::Stdout => &mut stdout,
                LogSource::Stderr => &mut stderr,
            };
            buf.push_str(data);
            buf.push('\n');
        }

        let status = handle.wait().await?;
        Ok(ExitResult {
            status,
            stdout,
            stderr,
        })
    }

    /// Run `command` and fail with [`Error::ExternalTool`] on a nonzero exit
    async fn run_checked(&self, command: Command) -> Result<ExitResult> {
        let rendered = command.to_string();
        let result = self.output(command).await?;
        if result.success() {
            Ok(result)
        } else {
            Err(Error::external(rendered, &result))
        }
    }
}

/// Runs commands as local child processes
pub struct LocalRunner {
    executor: Executor<LocalLauncher>,
}

impl LocalRunner {
    /// Create a runner named `name` in debug logs
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            executor: Executor::local(name),
        }
    }
}

impl Default for LocalRunner {
    fn default() -> Self {
        Self::new("launchpad")
    }
}

#[async_trait]
impl CommandRunner for LocalRunner {
    async fn spawn(&self, command: Command) -> Result<(EventStream, Box<dyn ProcessHandle>)> {
        let (events, handle) = self.executor.launch(command).await?;
        Ok((events.boxed(), Box::new(handle)))
    }

    async fn output(&self, command: Command) -> Result<ExitResult> {
        Ok(self.executor.execute(command).await?)
    }
}
