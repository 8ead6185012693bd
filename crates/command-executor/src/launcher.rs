//! Launcher trait for spawning commands

use crate::command::Command;
use crate::error::Result;
use crate::event::{LogSource, ProcessEvent};
use crate::process::{ExitResult, ProcessHandle};
use async_trait::async_trait;
use futures::stream::Stream;

/// Something that can spawn a [`Command`]
#[async_trait]
pub trait Launcher: Send + Sync + 'static {
    /// The event stream type this launcher produces
    type EventStream: Stream<Item = ProcessEvent> + Send + Unpin + 'static;

    /// The process handle type this launcher produces
    type Handle: ProcessHandle + 'static;

    /// Launch a command, returning its event stream and control handle
    async fn launch(&self, command: Command) -> Result<(Self::EventStream, Self::Handle)>;

    /// Execute a command and wait for it to complete, capturing output
    async fn execute(&self, command: Command) -> Result<ExitResult> {
        use futures::StreamExt;

        let (mut events, mut handle) = self.launch(command).await?;
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
}
