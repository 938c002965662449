//! In-memory record store backing one owner's ephemeral session

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rtds_common::DatasetKey;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{RecordPage, RecordStore, StoreStats};
use crate::error::StoreError;
use crate::types::StoredRecord;

type Identity = (Uuid, u64, u32, String);

#[derive(Default)]
struct KeyedRecords {
    /// Everything appended, duplicates included
    records: Vec<StoredRecord>,
    /// Positions of first occurrences, in insertion order
    distinct: Vec<usize>,
    seen: HashSet<Identity>,
    last_updated: Option<DateTime<Utc>>,
}

impl KeyedRecords {
    fn push(&mut self, record: StoredRecord) {
        let identity = (
            record.job_id,
            record.chunk_index,
            record.record_index,
            record.fingerprint.clone(),
        );
        if self.seen.insert(identity) {
            self.distinct.push(self.records.len());
        }
        self.records.push(record);
    }

    fn rebuild(records: Vec<StoredRecord>, last_updated: Option<DateTime<Utc>>) -> Self {
        let mut rebuilt = KeyedRecords {
            last_updated,
            ..Default::default()
        };
        for record in records {
            rebuilt.push(record);
        }
        rebuilt
    }
}

/// Record store held in process memory
#[derive(Default)]
pub struct MemoryRecordStore {
    sets: RwLock<HashMap<DatasetKey, KeyedRecords>>,
    closed: AtomicBool,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.is_closed() {
            return Err(StoreError::Fatal("session store is closed".to_string()));
        }
        Ok(())
    }

    /// Stored rows under `key`, duplicates included
    pub async fn raw_len(&self, key: &DatasetKey) -> usize {
        self.sets
            .read()
            .await
            .get(key)
            .map(|set| set.records.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn append(&self, key: &DatasetKey, records: &[StoredRecord]) -> Result<usize, StoreError> {
        self.ensure_open()?;
        let mut sets = self.sets.write().await;
        let set = sets.entry(key.clone()).or_default();
        for record in records {
            set.push(record.clone());
        }
        set.last_updated = Some(Utc::now());
        Ok(records.len())
    }

    async fn page(
        &self,
        key: &DatasetKey,
        offset: u64,
        limit: u64,
    ) -> Result<RecordPage, StoreError> {
        self.ensure_open()?;
        let sets = self.sets.read().await;
        let Some(set) = sets.get(key) else {
            return Ok(RecordPage::empty(offset));
        };

        let records = set
            .distinct
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .filter_map(|&pos| set.records.get(pos).cloned())
            .collect();

        Ok(RecordPage {
            records,
            offset,
            total: set.distinct.len() as u64,
        })
    }

    async fn stats(&self, key: &DatasetKey) -> Result<StoreStats, StoreError> {
        self.ensure_open()?;
        let sets = self.sets.read().await;
        Ok(match sets.get(key) {
            Some(set) => StoreStats {
                available: !set.distinct.is_empty(),
                total_records: set.distinct.len() as u64,
                last_updated: set.last_updated,
            },
            None => StoreStats::empty(),
        })
    }

    async fn delete_job(&self, key: &DatasetKey, job_id: Uuid) -> Result<u64, StoreError> {
        self.ensure_open()?;
        let mut sets = self.sets.write().await;
        let Some(set) = sets.remove(key) else {
            return Ok(0);
        };

        let before = set.records.len();
        let kept: Vec<StoredRecord> = set
            .records
            .into_iter()
            .filter(|r| r.job_id != job_id)
            .collect();
        let removed = (before - kept.len()) as u64;

        if !kept.is_empty() {
            sets.insert(key.clone(), KeyedRecords::rebuild(kept, set.last_updated));
        }
        Ok(removed)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.sets.write().await.clear();
    }
}
