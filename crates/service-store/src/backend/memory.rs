//! In-memory backend

use super::StoreBackend;
use crate::error::Result;
use crate::models::{LogEntry, ServiceRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Backend that keeps everything in process memory
#[derive(Default)]
pub struct MemoryBackend {
    records: RwLock<HashMap<String, ServiceRecord>>,
    logs: RwLock<HashMap<String, Vec<LogEntry>>>,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn put_record(&self, record: &ServiceRecord) -> Result<()> {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get_record(&self, id: &str) -> Result<Option<ServiceRecord>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(id).cloned())
    }

    async fn list_records(&self) -> Result<Vec<ServiceRecord>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.values().cloned().collect())
    }

    async fn append_log(&self, service_id: &str, entry: &LogEntry) -> Result<u64> {
        let mut logs = self.logs.write().unwrap_or_else(PoisonError::into_inner);
        let log = logs.entry(service_id.to_string()).or_default();
        log.push(entry.clone());
        Ok(log.len() as u64 - 1)
    }

    async fn read_logs(&self, service_id: &str) -> Result<Vec<LogEntry>> {
        let logs = self.logs.read().unwrap_or_else(PoisonError::into_inner);
        Ok(logs.get(service_id).cloned().unwrap_or_default())
    }
}
