//! Error types for command execution

use thiserror::Error;

/// Unified error type for command execution
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to spawn a process
    #[error("failed to spawn {program}: {reason}")]
    SpawnFailed {
        /// The program that could not be started
        program: String,
        /// The reason for the spawn failure
        reason: String,
    },

    /// The program could not be found on PATH
    #[error("command not found: {command}")]
    CommandNotFound {
        /// The command that was not found
        command: String,
    },

    /// Failed to send signal to process
    #[error("failed to send signal {signal}: {reason}")]
    SignalFailed {
        /// The signal number that failed to send
        signal: i32,
        /// The reason for the signal failure
        reason: String,
    },

    /// Waiting on a child failed
    #[error("failed to wait for process {pid}: {reason}")]
    WaitFailed {
        /// Process id of the child
        pid: u32,
        /// The underlying error
        reason: String,
    },

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Nix error (Unix signal handling)
    #[cfg(unix)]
    #[error(transparent)]
    Nix(#[from] nix::Error),
}

impl Error {
    /// Create a spawn failed error
    pub fn spawn_failed(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            program: program.into(),
            reason: reason.into(),
        }
    }

    /// Classify an I/O error raised while spawning `program`
    pub fn from_spawn(program: impl Into<String>, err: std::io::Error) -> Self {
        let program = program.into();
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::CommandNotFound { command: program }
        } else {
            Self::spawn_failed(program, err.to_string())
        }
    }

    /// Create a signal failed error
    pub fn signal_failed(signal: i32, reason: impl Into<String>) -> Self {
        Self::SignalFailed {
            signal,
            reason: reason.into(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
