//! Storage backends for the service store

pub mod memory;
pub mod sled;

use crate::error::Result;
use crate::models::{LogEntry, ServiceRecord};
use async_trait::async_trait;

/// Trait for service store backends
///
/// Records are whole documents; logs are an append-only sequence per
/// service id. Callers serialize appends for a given service id.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Initialize the backend
    async fn init(&self) -> Result<()>;

    /// Insert or replace a record
    async fn put_record(&self, record: &ServiceRecord) -> Result<()>;

    /// Get a record by id
    async fn get_record(&self, id: &str) -> Result<Option<ServiceRecord>>;

    /// List all records
    async fn list_records(&self) -> Result<Vec<ServiceRecord>>;

    /// Append a log entry, returning its sequence number
    async fn append_log(&self, service_id: &str, entry: &LogEntry) -> Result<u64>;

    /// Read the full log of a service in append order
    async fn read_logs(&self, service_id: &str) -> Result<Vec<LogEntry>>;

    /// Make every write so far durable
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}
