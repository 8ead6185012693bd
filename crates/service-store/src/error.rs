//! Error types for the service store

use crate::models::ServiceStatus;
use thiserror::Error;

/// Service store error type
#[derive(Error, Debug)]
pub enum Error {
    /// Service not found
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// Service already exists
    #[error("Service already exists: {0}")]
    ServiceExists(String),

    /// Invalid service status transition
    #[error("Invalid status transition for {id}: {from} -> {to}")]
    InvalidStateTransition {
        /// Service id
        id: String,
        /// Current status
        from: ServiceStatus,
        /// Attempted status
        to: ServiceStatus,
    },

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
