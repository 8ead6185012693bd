//! # Service orchestration
//!
//! Provisions services onto a cluster through a git-backed delivery model
//! and controls them afterwards.
//!
//! - [`Orchestrator`] drives a [`TemplateHandler`] through the creation
//!   pipeline: validate, generate code, prepare the delivery workspace,
//!   generate manifests, build and publish the image, push, deploy.
//! - [`ProcessExecutor`] runs external tools and turns their output into
//!   service log entries.
//! - [`GitSyncManager`] owns the delivery repository checkout.
//! - [`ImageBuilder`] has a local-daemon and an in-cluster job backend.
//! - [`LifecycleController`] pauses, resumes and removes services.
//!
//! Every external tool is invoked through a [`CommandRunner`] with an
//! explicit argument vector.

#![warn(missing_docs)]
#![warn(unsafe_code)]

pub mod builders;
pub mod cluster;
pub mod config;
pub mod context;
pub mod executors;
pub mod git;
pub mod lifecycle;
pub mod orchestrator;
pub mod sink;
pub mod templates;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use builders::{BuildRequest, ClusterJobBuilder, ImageBuilder, LocalDaemonBuilder};
pub use cluster::{Kubectl, Reachability};
pub use config::{BuilderKind, Settings};
pub use context::OrchestrationContext;
pub use executors::{CommandRunner, EventStream, LocalRunner, ProcessExecutor};
pub use git::{GitSyncManager, Workspace, WorkspaceMode, WorkspaceSession};
pub use lifecycle::{LifecycleController, RemovalReport};
pub use orchestrator::{
    CreateRequest, Orchestrator, PipelineError, PipelineReport, PreparedService, Stage,
};
pub use sink::{ConsoleLog, LogSink, PipelineLog, ServiceLog};
pub use templates::{ServiceConfig, TemplateHandler, TemplateKind, Validation};

use command_executor::ExitResult;
use std::time::Duration;

/// Error types for orchestration operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration rejected before any side effect
    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// An external tool exited unsuccessfully
    #[error("`{command}` failed ({status}): {detail}")]
    ExternalTool {
        /// Rendered argv
        command: String,
        /// Exit status description
        status: String,
        /// Last meaningful output line
        detail: String,
    },

    /// A bounded wait ran out
    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout {
        /// What was being waited for
        operation: String,
        /// The bound that was exceeded
        after: Duration,
    },

    /// Service store errors
    #[error("Service store error: {0}")]
    Store(#[from] service_store::Error),

    /// Command executor errors
    #[error("Command execution error: {0}")]
    CommandExecutor(#[from] command_executor::Error),

    /// Invalid settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Build an [`Error::ExternalTool`] from a finished command
    pub fn external(command: impl Into<String>, result: &ExitResult) -> Self {
        Self::ExternalTool {
            command: command.into(),
            status: result.status.to_string(),
            detail: result.failure_summary(),
        }
    }

    /// Whether this is a tool failure caused by a missing resource
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::ExternalTool { detail, .. } => {
                let detail = detail.to_lowercase();
                detail.contains("not found") || detail.contains("notfound")
            }
            _ => false,
        }
    }
}

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, Error>;
