//! Dual-store writer
//!
//! Writes one chunk to the ephemeral and durable stores concurrently. The two
//! writes share nothing: a failure on one never blocks or rolls back the
//! other, and sub-batches already committed to a store stay committed.

use chrono::Utc;
use rtds_common::fingerprint::record_fingerprint;
use rtds_common::DatasetKey;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::IngestError;
use crate::storage::{RecordStore, SessionRegistry};
use crate::types::{DatasetChunk, Destination, DestinationSet, StoredRecord};

/// Who a write belongs to
#[derive(Debug, Clone)]
pub struct WriteContext {
    pub job_id: Uuid,
    pub key: DatasetKey,
}

/// Per-write knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// Upper bound on records per underlying store call
    pub sub_batch_size: usize,
}

/// Outcome of writing a chunk (or the rest of one) to a single destination
#[derive(Debug, Default)]
pub struct DestinationOutcome {
    pub written: usize,
    pub failed: usize,
    pub error: Option<IngestError>,
}

impl DestinationOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Per requested destination outcome; `None` where nothing was requested
#[derive(Debug, Default)]
pub struct WriteResult {
    pub ephemeral: Option<DestinationOutcome>,
    pub durable: Option<DestinationOutcome>,
}

impl WriteResult {
    pub fn get(&self, destination: Destination) -> Option<&DestinationOutcome> {
        match destination {
            Destination::Ephemeral => self.ephemeral.as_ref(),
            Destination::Durable => self.durable.as_ref(),
        }
    }

    pub fn take(&mut self, destination: Destination) -> Option<DestinationOutcome> {
        match destination {
            Destination::Ephemeral => self.ephemeral.take(),
            Destination::Durable => self.durable.take(),
        }
    }
}

/// Writes chunks to the owner's ephemeral store and the shared durable store
pub struct DualStoreWriter {
    sessions: Arc<SessionRegistry>,
    durable: Arc<dyn RecordStore>,
}

impl DualStoreWriter {
    pub fn new(sessions: Arc<SessionRegistry>, durable: Arc<dyn RecordStore>) -> Self {
        Self { sessions, durable }
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn durable(&self) -> &Arc<dyn RecordStore> {
        &self.durable
    }

    async fn store_for(&self, ctx: &WriteContext, destination: Destination) -> Arc<dyn RecordStore> {
        match destination {
            Destination::Ephemeral => self.sessions.get_or_create(&ctx.key.owner).await,
            Destination::Durable => self.durable.clone(),
        }
    }

    /// Attach identity (job, chunk, position, fingerprint) to every record
    pub fn prepare(ctx: &WriteContext, chunk: &DatasetChunk) -> Vec<StoredRecord> {
        let created_at = Utc::now();
        chunk
            .records
            .iter()
            .zip(&chunk.record_metadata)
            .enumerate()
            .map(|(i, (value, metadata))| StoredRecord {
                job_id: ctx.job_id,
                chunk_index: chunk.chunk_index,
                record_index: i as u32,
                fingerprint: record_fingerprint(value),
                value: value.clone(),
                metadata: metadata.clone(),
                created_at,
            })
            .collect()
    }

    /// Write a chunk to every destination in `destinations`.
    ///
    /// An empty set is a dry run: nothing is written and both outcomes are `None`.
    pub async fn write(
        &self,
        ctx: &WriteContext,
        chunk: &DatasetChunk,
        destinations: DestinationSet,
        opts: WriteOptions,
    ) -> WriteResult {
        if destinations.is_empty() {
            debug!(job_id = %ctx.job_id, chunk_index = chunk.chunk_index, "Dry run, chunk not written");
            return WriteResult::default();
        }
        let records = Self::prepare(ctx, chunk);
        self.write_prepared(ctx, &records, destinations, opts).await
    }

    /// Like [`DualStoreWriter::write`] for records already prepared
    pub async fn write_prepared(
        &self,
        ctx: &WriteContext,
        records: &[StoredRecord],
        destinations: DestinationSet,
        opts: WriteOptions,
    ) -> WriteResult {
        let ephemeral = async {
            if destinations.ephemeral {
                Some(self.write_records(ctx, Destination::Ephemeral, records, opts).await)
            } else {
                None
            }
        };
        let durable = async {
            if destinations.durable {
                Some(self.write_records(ctx, Destination::Durable, records, opts).await)
            } else {
                None
            }
        };

        let (ephemeral, durable) = tokio::join!(ephemeral, durable);
        WriteResult { ephemeral, durable }
    }

    /// Write `records` to one destination in sub-batches, stopping at the
    /// first failing sub-batch.
    ///
    /// `written` counts records in committed sub-batches; retrying with
    /// `&records[written..]` resumes where the failure happened.
    pub async fn write_records(
        &self,
        ctx: &WriteContext,
        destination: Destination,
        records: &[StoredRecord],
        opts: WriteOptions,
    ) -> DestinationOutcome {
        let store = self.store_for(ctx, destination).await;
        let mut outcome = DestinationOutcome::default();

        for batch in records.chunks(opts.sub_batch_size.max(1)) {
            match store.append(&ctx.key, batch).await {
                Ok(_) => outcome.written += batch.len(),
                Err(e) => {
                    outcome.failed = records.len() - outcome.written;
                    warn!(
                        job_id = %ctx.job_id,
                        chunk_index = batch.first().map(|r| r.chunk_index),
                        destination = %destination,
                        store = store.name(),
                        written = outcome.written,
                        failed = outcome.failed,
                        error = %e,
                        "Sub-batch write failed"
                    );
                    outcome.error = Some(IngestError::from_store(destination, e));
                    break;
                },
            }
        }

        outcome
    }
}
