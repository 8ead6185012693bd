//! Named executor wrapping a launcher

use crate::command::Command;
use crate::error::Result;
use crate::launcher::Launcher;
use crate::process::ExitResult;
use tracing::debug;

/// An executor that runs commands through a specific launcher
pub struct Executor<L: Launcher> {
    /// Name used to identify this executor in logs
    name: String,
    launcher: L,
}

impl<L: Launcher> Executor<L> {
    /// Create a new executor with the given launcher
    pub fn new(name: impl Into<String>, launcher: L) -> Self {
        Self {
            name: name.into(),
            launcher,
        }
    }

    /// Get the executor name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn a command and return event stream and process handle
    pub async fn launch(&self, command: Command) -> Result<(L::EventStream, L::Handle)> {
        debug!("[{}] launching: {}", self.name, command);
        self.launcher.launch(command).await
    }

    /// Execute a command and wait for it to complete
    pub async fn execute(&self, command: Command) -> Result<ExitResult> {
        debug!("[{}] executing: {}", self.name, command);
        self.launcher.execute(command).await
    }

    /// Get a reference to the launcher
    pub fn launcher(&self) -> &L {
        &self.launcher
    }
}
