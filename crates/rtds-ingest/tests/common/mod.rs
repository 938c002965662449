//! Shared fixtures for integration tests
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use futures::StreamExt;
use rtds_common::DatasetKey;
use rtds_ingest::config::{ImportOptions, RetryPolicy};
use rtds_ingest::error::{IngestError, Result, StoreError};
use rtds_ingest::fetcher::{
    ConfigSchema, DatasetDefinition, DatasetFetcher, DatasetProvider, FetchedDataset,
};
use rtds_ingest::orchestrator::{ImportOrchestrator, OrchestratorConfig};
use rtds_ingest::storage::{MemoryRecordStore, RecordPage, RecordStore, SessionRegistry, StoreStats};
use rtds_ingest::types::{RawRecord, StoredRecord};
use rtds_ingest::writer::DualStoreWriter;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const SCRIPTED: &str = "scripted";

/// In-process provider with scripted failures by record offset
#[derive(Default)]
pub struct ScriptedProvider {
    records: u64,
    report_total: bool,
    /// Offsets that yield a fatal error instead of a record
    fatal_at: HashSet<u64>,
    /// Offsets that yield a transient error once, ending the stream
    transient_once_at: Arc<Mutex<HashSet<u64>>>,
    /// Transient failures returned by `open` before it succeeds
    open_failures: AtomicU32,
    /// Opens at a non-zero offset fail fatally
    fatal_reopen: bool,
    delay: Option<Duration>,
    opened_at: Mutex<Vec<u64>>,
    opens: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(records: u64) -> Self {
        Self {
            records,
            report_total: true,
            ..Default::default()
        }
    }

    pub fn without_total(mut self) -> Self {
        self.report_total = false;
        self
    }

    pub fn fatal_at(mut self, offset: u64) -> Self {
        self.fatal_at.insert(offset);
        self
    }

    pub fn transient_once_at(self, offset: u64) -> Self {
        self.transient_once_at.lock().unwrap().insert(offset);
        self
    }

    pub fn failing_opens(self, count: u32) -> Self {
        self.open_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn fatal_reopen(mut self) -> Self {
        self.fatal_reopen = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Offsets every successful `open` started at
    pub fn opened_at(&self) -> Vec<u64> {
        self.opened_at.lock().unwrap().clone()
    }

    pub fn open_attempts(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

pub fn record_value(offset: u64) -> Value {
    json!({ "prompt": format!("prompt {}", offset), "offset": offset })
}

struct Cursor {
    offset: u64,
    end: u64,
    fatal_at: HashSet<u64>,
    transient_once_at: Arc<Mutex<HashSet<u64>>>,
    delay: Option<Duration>,
    done: bool,
}

#[async_trait]
impl DatasetProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn open(&self, _config: &Map<String, Value>, offset: u64) -> Result<FetchedDataset> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let remaining = self.open_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.open_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(IngestError::FetchTransient("provider unavailable".to_string()));
        }
        if self.fatal_reopen && offset > 0 {
            return Err(IngestError::FetchFatal("dataset revision changed".to_string()));
        }
        self.opened_at.lock().unwrap().push(offset);

        let cursor = Cursor {
            offset,
            end: self.records,
            fatal_at: self.fatal_at.clone(),
            transient_once_at: self.transient_once_at.clone(),
            delay: self.delay,
            done: false,
        };

        let stream = futures::stream::unfold(cursor, |mut cursor| async move {
            if cursor.done || cursor.offset >= cursor.end {
                return None;
            }
            if let Some(delay) = cursor.delay {
                tokio::time::sleep(delay).await;
            }

            let offset = cursor.offset;
            if cursor.transient_once_at.lock().unwrap().remove(&offset) {
                cursor.done = true;
                let err = IngestError::FetchTransient(format!("connection reset at {}", offset));
                return Some((Err(err), cursor));
            }

            cursor.offset += 1;
            if cursor.fatal_at.contains(&offset) {
                let err = IngestError::FetchFatal(format!("malformed record at {}", offset));
                return Some((Err(err), cursor));
            }
            let record = RawRecord::new(offset, record_value(offset)).with_metadata("row_idx", json!(offset));
            Some((Ok(record), cursor))
        })
        .boxed();

        Ok(FetchedDataset {
            stream,
            estimated_total: self.report_total.then_some(self.records),
        })
    }
}

pub fn fetcher_with(provider: Arc<ScriptedProvider>) -> DatasetFetcher {
    let mut fetcher = DatasetFetcher::new();
    fetcher.register(DatasetDefinition {
        dataset_type: SCRIPTED.to_string(),
        description: "scripted test records".to_string(),
        schema: ConfigSchema::new(),
        provider,
    });
    fetcher
}

/// Durable store wrapper that injects write failures
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryRecordStore,
    /// Appends that fail transiently before appends succeed again
    transient_failures: AtomicU32,
    /// Commit the batch before reporting the transient failure
    commit_then_fail: bool,
    /// Chunks whose appends always fail fatally
    fatal_chunks: HashSet<u64>,
    /// Chunk index of every successful append, in call order
    appended_chunks: Mutex<Vec<u64>>,
    append_calls: AtomicUsize,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transient_failures(self, count: u32) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn commit_then_fail(mut self) -> Self {
        self.commit_then_fail = true;
        self
    }

    pub fn fatal_on_chunk(mut self, chunk_index: u64) -> Self {
        self.fatal_chunks.insert(chunk_index);
        self
    }

    pub fn appended_chunks(&self) -> Vec<u64> {
        self.appended_chunks.lock().unwrap().clone()
    }

    pub fn append_calls(&self) -> usize {
        self.append_calls.load(Ordering::SeqCst)
    }

    /// Stored rows including duplicates
    pub async fn raw_len(&self, key: &DatasetKey) -> usize {
        self.inner.raw_len(key).await
    }
}

#[async_trait]
impl RecordStore for FaultyStore {
    fn name(&self) -> &str {
        "faulty"
    }

    async fn append(&self, key: &DatasetKey, records: &[StoredRecord]) -> std::result::Result<usize, StoreError> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(record) = records.iter().find(|r| self.fatal_chunks.contains(&r.chunk_index)) {
            return Err(StoreError::Fatal(format!("constraint violated in chunk {}", record.chunk_index)));
        }

        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            if self.commit_then_fail {
                self.inner.append(key, records).await?;
            }
            return Err(StoreError::Transient("database is locked".to_string()));
        }

        let written = self.inner.append(key, records).await?;
        if let Some(first) = records.first() {
            self.appended_chunks.lock().unwrap().push(first.chunk_index);
        }
        Ok(written)
    }

    async fn page(&self, key: &DatasetKey, offset: u64, limit: u64) -> std::result::Result<RecordPage, StoreError> {
        self.inner.page(key, offset, limit).await
    }

    async fn stats(&self, key: &DatasetKey) -> std::result::Result<StoreStats, StoreError> {
        self.inner.stats(key).await
    }

    async fn delete_job(&self, key: &DatasetKey, job_id: Uuid) -> std::result::Result<u64, StoreError> {
        self.inner.delete_job(key, job_id).await
    }
}

pub struct Harness {
    pub orchestrator: ImportOrchestrator,
    pub sessions: Arc<SessionRegistry>,
    pub durable: Arc<dyn RecordStore>,
}

pub fn harness(provider: Arc<ScriptedProvider>, durable: Arc<dyn RecordStore>) -> Harness {
    harness_with_limit(provider, durable, 4)
}

pub fn harness_with_limit(
    provider: Arc<ScriptedProvider>,
    durable: Arc<dyn RecordStore>,
    max_concurrent_jobs: usize,
) -> Harness {
    let sessions = Arc::new(SessionRegistry::new());
    let writer = DualStoreWriter::new(sessions.clone(), durable.clone());
    let orchestrator = ImportOrchestrator::new(
        Arc::new(fetcher_with(provider)),
        Arc::new(writer),
        OrchestratorConfig {
            max_concurrent_jobs,
            progress_buffer: 16,
        },
    );
    Harness {
        orchestrator,
        sessions,
        durable,
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

/// Options with fast retries and a fixed chunk size
pub fn options(chunk_size: usize) -> ImportOptions {
    ImportOptions::default()
        .with_retry(fast_retry())
        .with_fixed_chunk_size(chunk_size)
}

pub fn key(owner: &str) -> DatasetKey {
    DatasetKey::new(rtds_common::OwnerId::new(owner).unwrap(), SCRIPTED).unwrap()
}
