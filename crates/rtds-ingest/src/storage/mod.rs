//! Record stores
//!
//! Both destinations implement [`RecordStore`]. Stores are append-only and
//! keyed by `(owner, dataset type)`; retried writes may leave duplicates at
//! rest, which every read path collapses by record identity
//! `(job_id, chunk_index, record_index, fingerprint)`.

pub mod memory;
pub mod session;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rtds_common::DatasetKey;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::StoredRecord;

pub use memory::MemoryRecordStore;
pub use session::SessionRegistry;
pub use sqlite::SqliteRecordStore;

/// A page of de-duplicated records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordPage {
    pub records: Vec<StoredRecord>,
    pub offset: u64,
    /// Distinct records stored under the key
    pub total: u64,
}

impl RecordPage {
    pub fn empty(offset: u64) -> Self {
        Self {
            records: Vec::new(),
            offset,
            total: 0,
        }
    }

    pub fn has_more(&self) -> bool {
        self.offset + (self.records.len() as u64) < self.total
    }
}

/// Cheap existence and count summary of one key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// At least one record is stored
    pub available: bool,
    pub total_records: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

impl StoreStats {
    pub fn empty() -> Self {
        Self {
            available: false,
            total_records: 0,
            last_updated: None,
        }
    }
}

/// Storage backend for imported records
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Backend name used in logs
    fn name(&self) -> &str;

    /// Append records, returning how many were committed
    async fn append(&self, key: &DatasetKey, records: &[StoredRecord]) -> Result<usize, StoreError>;

    /// Read distinct records in insertion order
    async fn page(&self, key: &DatasetKey, offset: u64, limit: u64)
        -> Result<RecordPage, StoreError>;

    async fn stats(&self, key: &DatasetKey) -> Result<StoreStats, StoreError>;

    /// Remove every record a job wrote under `key`, returning rows removed
    async fn delete_job(&self, key: &DatasetKey, job_id: Uuid) -> Result<u64, StoreError>;

    /// Release the store's contents; later calls may fail
    async fn close(&self) {}
}
