//! Service store over a pluggable backend

use crate::backend::{StoreBackend, memory::MemoryBackend, sled::SledBackend};
use crate::error::{Error, Result};
use crate::models::{LogEntry, ServiceRecord, ServiceStatus};
use chrono::Utc;
use futures::lock::Mutex;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Service records and their append-only logs
pub struct ServiceStore {
    backend: Arc<dyn StoreBackend>,
    /// Serializes read-modify-write of records
    records_lock: Mutex<()>,
}

impl ServiceStore {
    /// Create a store backed by process memory
    pub fn in_memory() -> Self {
        Self::with_backend(Arc::new(MemoryBackend::new()))
    }

    /// Open a persistent sled-backed store at `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading service store from {:?}", path);

        let backend = SledBackend::new(path).await?;
        backend.init().await?;

        Ok(Self::with_backend(Arc::new(backend)))
    }

    /// Create a store with a custom backend
    pub fn with_backend(backend: Arc<dyn StoreBackend>) -> Self {
        Self {
            backend,
            records_lock: Mutex::new(()),
        }
    }

    /// Persist a new record
    pub async fn create(&self, record: ServiceRecord) -> Result<ServiceRecord> {
        let _guard = self.records_lock.lock().await;

        if self.backend.get_record(&record.id).await?.is_some() {
            return Err(Error::ServiceExists(record.id));
        }

        info!(
            "Registering service {} ({}) in namespace {}",
            record.name, record.id, record.namespace
        );
        self.backend.put_record(&record).await?;
        Ok(record)
    }

    /// Get a record by id
    pub async fn get(&self, id: &str) -> Result<ServiceRecord> {
        self.backend
            .get_record(id)
            .await?
            .ok_or_else(|| Error::ServiceNotFound(id.to_string()))
    }

    /// Most recent record with the given workload name that is not deleted
    pub async fn find_by_name(&self, name: &str) -> Result<Option<ServiceRecord>> {
        let found = self
            .backend
            .list_records()
            .await?
            .into_iter()
            .filter(|r| r.name == name && !r.is_deleted())
            .max_by_key(|r| r.created_at);
        Ok(found)
    }

    /// List records, oldest first
    pub async fn list(&self, include_deleted: bool) -> Result<Vec<ServiceRecord>> {
        let mut records: Vec<_> = self
            .backend
            .list_records()
            .await?
            .into_iter()
            .filter(|r| include_deleted || !r.is_deleted())
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    /// Move a record to `status`, enforcing the transition table
    pub async fn set_status(&self, id: &str, status: ServiceStatus) -> Result<ServiceRecord> {
        let _guard = self.records_lock.lock().await;

        let mut record = self.get(id).await?;
        if !record.status.can_transition_to(status) {
            return Err(Error::InvalidStateTransition {
                id: id.to_string(),
                from: record.status,
                to: status,
            });
        }

        if record.status != status {
            debug!("Service {} status {} -> {}", id, record.status, status);
            record.status = status;
            self.backend.put_record(&record).await?;
        }
        Ok(record)
    }

    /// Mark a record deleted, stamping the deletion time once
    pub async fn mark_deleted(&self, id: &str) -> Result<ServiceRecord> {
        let _guard = self.records_lock.lock().await;

        let mut record = self.get(id).await?;
        record.status = ServiceStatus::Deleted;
        if record.deleted_at.is_none() {
            record.deleted_at = Some(Utc::now());
        }
        self.backend.put_record(&record).await?;

        info!("Service {} marked deleted", id);
        Ok(record)
    }

    /// Append an entry to a service's log, returning its sequence number
    ///
    /// Appends for one service id must be serialized by the caller; the
    /// [`LogBroadcastHub`](crate::LogBroadcastHub) does this.
    pub async fn append_log(&self, id: &str, entry: &LogEntry) -> Result<u64> {
        if self.backend.get_record(id).await?.is_none() {
            return Err(Error::ServiceNotFound(id.to_string()));
        }
        self.backend.append_log(id, entry).await
    }

    /// Full log of a service in emission order
    pub async fn history(&self, id: &str) -> Result<Vec<LogEntry>> {
        if self.backend.get_record(id).await?.is_none() {
            return Err(Error::ServiceNotFound(id.to_string()));
        }
        self.backend.read_logs(id).await
    }

    /// Persist buffered writes; log appends are not flushed individually
    pub async fn flush(&self) -> Result<()> {
        self.backend.flush().await
    }
}
