//! Sled database backend

use super::StoreBackend;
use crate::error::Result;
use crate::models::{LogEntry, ServiceRecord};
use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, info};

/// Separates the service id from the sequence number in log keys
const KEY_SEPARATOR: u8 = 0;

/// Sled-based backend
///
/// Records live in the `services` tree keyed by id. Log entries live in the
/// `logs` tree under `service_id ++ 0x00 ++ seq` with a big-endian sequence,
/// so a prefix scan returns them in append order.
pub struct SledBackend {
    db: sled::Db,
    services: sled::Tree,
    logs: sled::Tree,
}

impl SledBackend {
    /// Open (or create) a database at `path`
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!("Opening sled database at {:?}", path);
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Create a temporary database (for testing)
    pub async fn in_memory() -> Result<Self> {
        info!("Creating temporary sled database");
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self> {
        let services = db.open_tree("services")?;
        let logs = db.open_tree("logs")?;
        Ok(Self { db, services, logs })
    }

    fn log_prefix(service_id: &str) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(service_id.len() + 1);
        prefix.extend_from_slice(service_id.as_bytes());
        prefix.push(KEY_SEPARATOR);
        prefix
    }
}

#[async_trait]
impl StoreBackend for SledBackend {
    async fn init(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }

    async fn put_record(&self, record: &ServiceRecord) -> Result<()> {
        debug!("Storing service record: {}", record.id);

        let value = serde_json::to_vec(record)?;
        self.services.insert(record.id.as_bytes(), value)?;
        self.services.flush_async().await?;

        Ok(())
    }

    async fn get_record(&self, id: &str) -> Result<Option<ServiceRecord>> {
        match self.services.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_records(&self) -> Result<Vec<ServiceRecord>> {
        let mut records = Vec::new();
        for result in self.services.iter() {
            let (_, value) = result?;
            records.push(serde_json::from_slice(&value)?);
        }
        Ok(records)
    }

    async fn append_log(&self, service_id: &str, entry: &LogEntry) -> Result<u64> {
        // Monotonic across the whole database, which is all ordering needs
        let seq = self.db.generate_id()?;

        let mut key = Self::log_prefix(service_id);
        key.extend_from_slice(&seq.to_be_bytes());

        let value = serde_json::to_vec(entry)?;
        self.logs.insert(key, value)?;

        Ok(seq)
    }

    async fn read_logs(&self, service_id: &str) -> Result<Vec<LogEntry>> {
        let mut entries = Vec::new();
        for result in self.logs.scan_prefix(Self::log_prefix(service_id)) {
            let (_, value) = result?;
            entries.push(serde_json::from_slice(&value)?);
        }
        Ok(entries)
    }

    async fn flush(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }
}
