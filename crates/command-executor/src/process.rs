//! Process management traits and types

use crate::error::Result;
use async_trait::async_trait;
use std::fmt;

/// A handle to control a running process
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// Get the process ID
    fn pid(&self) -> Option<u32>;

    /// Wait for the process to complete and return its exit status
    async fn wait(&mut self) -> Result<ExitStatus>;

    /// Send SIGTERM (or equivalent) for graceful shutdown
    async fn terminate(&mut self) -> Result<()>;

    /// Send SIGKILL (or equivalent) to forcefully stop the process
    async fn kill(&mut self) -> Result<()>;
}

/// Process exit status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit code if the process exited normally
    pub code: Option<i32>,
    /// Signal that terminated the process (Unix only)
    #[cfg(unix)]
    pub signal: Option<i32>,
}

impl ExitStatus {
    /// Status for a process that exited with `code`
    pub fn from_code(code: i32) -> Self {
        Self {
            code: Some(code),
            #[cfg(unix)]
            signal: None,
        }
    }

    /// Returns true if the process exited successfully (code 0)
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Returns true if the process was terminated by a signal
    pub fn terminated_by_signal(&self) -> bool {
        #[cfg(unix)]
        {
            self.signal.is_some()
        }
        #[cfg(not(unix))]
        {
            false
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.code {
            return write!(f, "exit code {code}");
        }
        #[cfg(unix)]
        if let Some(signal) = self.signal {
            return write!(f, "terminated by signal {signal}");
        }
        write!(f, "unknown exit status")
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone)]
pub struct ExitResult {
    /// How the process exited
    pub status: ExitStatus,
    /// Collected stdout lines, newline-terminated
    pub stdout: String,
    /// Collected stderr lines, newline-terminated
    pub stderr: String,
}

impl ExitResult {
    /// Returns true if the process exited with code 0
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Trimmed stdout
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Last non-empty stderr line, falling back to stdout, for error messages
    pub fn failure_summary(&self) -> String {
        fn last_line(text: &str) -> Option<&str> {
            text.lines().map(str::trim).filter(|l| !l.is_empty()).last()
        }
        last_line(&self.stderr)
            .or_else(|| last_line(&self.stdout))
            .unwrap_or_default()
            .to_string()
    }
}
