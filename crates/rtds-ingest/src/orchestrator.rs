//! Import job orchestrator
//!
//! Every accepted job runs on its own task:
//!
//! ```text
//! Pending --(permit)--> Running --> Completed | PartiallyCompleted | Failed | Cancelled
//!    \------------------(cancel)--> Cancelled
//! ```
//!
//! At most `max_concurrent_jobs` jobs hold a permit; the rest wait in
//! `Pending`. A running job pulls chunks strictly in order, writes each one
//! to its destinations, retries transient errors with exponential backoff
//! and checks for cancellation once per chunk. A chunk whose write has
//! started always finishes before the job stops.

use chrono::Utc;
use rtds_common::{DatasetKey, OwnerId};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::chunker::{AdaptiveChunker, ChunkBudget};
use crate::config::{ImportOptions, ImportSettings, DEFAULT_MAX_CONCURRENT_JOBS, DEFAULT_PROGRESS_BUFFER};
use crate::error::{IngestError, Result};
use crate::fetcher::{DatasetFetcher, FetchedDataset};
use crate::progress::{ProgressHub, ProgressSubscription};
use crate::retrieval::HybridRetrievalService;
use crate::types::{
    DatasetChunk, Destination, ErrorLogEntry, ImportJob, JobStatus, ProgressEvent, StoredRecord,
};
use crate::writer::{DestinationOutcome, DualStoreWriter, WriteContext, WriteOptions};

/// Orchestrator-wide limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub max_concurrent_jobs: usize,
    /// Buffered progress events per job before slow subscribers lose the oldest
    pub progress_buffer: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            progress_buffer: DEFAULT_PROGRESS_BUFFER,
        }
    }
}

impl From<&ImportSettings> for OrchestratorConfig {
    fn from(settings: &ImportSettings) -> Self {
        Self {
            max_concurrent_jobs: settings.max_concurrent_jobs,
            progress_buffer: settings.progress_buffer,
        }
    }
}

struct JobEntry {
    snapshot: ImportJob,
    cancel: CancellationToken,
    status: watch::Receiver<JobStatus>,
}

struct Inner {
    fetcher: Arc<DatasetFetcher>,
    writer: Arc<DualStoreWriter>,
    progress: ProgressHub,
    jobs: RwLock<HashMap<Uuid, JobEntry>>,
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Inner {
    async fn store_snapshot(&self, job: &ImportJob) {
        if let Some(entry) = self.jobs.write().await.get_mut(&job.id) {
            entry.snapshot = job.clone();
        }
    }
}

/// Accepts import jobs and drives them to a terminal state
#[derive(Clone)]
pub struct ImportOrchestrator {
    inner: Arc<Inner>,
}

impl ImportOrchestrator {
    pub fn new(
        fetcher: Arc<DatasetFetcher>,
        writer: Arc<DualStoreWriter>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher,
                writer,
                progress: ProgressHub::new(config.progress_buffer),
                jobs: RwLock::new(HashMap::new()),
                permits: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Read service over the same session registry and durable store
    pub fn retrieval(&self) -> HybridRetrievalService {
        HybridRetrievalService::new(
            self.inner.writer.sessions().clone(),
            self.inner.writer.durable().clone(),
        )
    }

    pub fn fetcher(&self) -> &DatasetFetcher {
        &self.inner.fetcher
    }

    /// Accept an import and start it in the background.
    ///
    /// Unknown dataset types, invalid configs, blank owners and unusable
    /// options are rejected here; the returned job id is always valid.
    pub async fn start_import(
        &self,
        dataset_type: &str,
        config: Map<String, Value>,
        owner: &str,
        opts: ImportOptions,
    ) -> Result<Uuid> {
        if self.inner.shutdown.is_cancelled() {
            return Err(IngestError::Cancelled);
        }

        let owner = OwnerId::new(owner).map_err(|e| IngestError::InvalidOwner(e.to_string()))?;
        let dataset_config = self.inner.fetcher.validate_config(dataset_type, &config)?;
        opts.validate()?;
        let key = DatasetKey::new(owner.clone(), dataset_type)
            .map_err(|e| IngestError::UnknownDatasetType(e.to_string()))?;

        let job = ImportJob::new(dataset_type, dataset_config, owner);
        let job_id = job.id;
        let cancel = self.inner.shutdown.child_token();
        let (status_tx, status_rx) = watch::channel(JobStatus::Pending);

        self.inner.progress.register(ProgressEvent::from_job(&job));
        self.inner.jobs.write().await.insert(
            job_id,
            JobEntry {
                snapshot: job.clone(),
                cancel: cancel.clone(),
                status: status_rx,
            },
        );

        info!(
            %job_id,
            dataset_type,
            owner = %job.owner,
            destinations = ?opts.destinations,
            max_import_size = opts.max_import_size,
            "Import job accepted"
        );

        let runner = JobRunner {
            inner: self.inner.clone(),
            ctx: WriteContext { job_id, key },
            job,
            opts,
            cancel,
            status_tx,
        };
        self.inner.tracker.spawn(runner.run());

        Ok(job_id)
    }

    /// Current snapshot of a job
    pub async fn get_job_status(&self, job_id: Uuid) -> Result<ImportJob> {
        self.inner
            .jobs
            .read()
            .await
            .get(&job_id)
            .map(|entry| entry.snapshot.clone())
            .ok_or(IngestError::JobNotFound(job_id))
    }

    /// Subscribe to a job's progress, starting with its latest snapshot
    pub async fn subscribe_progress(&self, job_id: Uuid) -> Result<ProgressSubscription> {
        if !self.inner.jobs.read().await.contains_key(&job_id) {
            return Err(IngestError::JobNotFound(job_id));
        }
        self.inner
            .progress
            .subscribe(job_id)
            .ok_or(IngestError::JobNotFound(job_id))
    }

    /// Request cooperative cancellation.
    ///
    /// Returns `false` when the job had already reached a terminal state.
    pub async fn cancel_import(&self, job_id: Uuid) -> Result<bool> {
        let jobs = self.inner.jobs.read().await;
        let entry = jobs.get(&job_id).ok_or(IngestError::JobNotFound(job_id))?;

        if entry.snapshot.status.is_terminal() {
            debug!(%job_id, status = %entry.snapshot.status, "Cancel ignored for finished job");
            return Ok(false);
        }

        info!(%job_id, "Cancellation requested");
        entry.cancel.cancel();
        Ok(true)
    }

    /// Jobs of one owner, oldest first
    pub async fn list_jobs(&self, owner: &str) -> Result<Vec<ImportJob>> {
        let owner = OwnerId::new(owner).map_err(|e| IngestError::InvalidOwner(e.to_string()))?;
        let mut jobs: Vec<ImportJob> = self
            .inner
            .jobs
            .read()
            .await
            .values()
            .filter(|entry| entry.snapshot.owner == owner)
            .map(|entry| entry.snapshot.clone())
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }

    /// Forget a finished job. Records it wrote are not touched.
    pub async fn purge_job(&self, job_id: Uuid) -> Result<ImportJob> {
        let mut jobs = self.inner.jobs.write().await;
        let entry = jobs.get(&job_id).ok_or(IngestError::JobNotFound(job_id))?;
        if !entry.snapshot.status.is_terminal() {
            return Err(IngestError::JobActive(job_id));
        }

        let removed = jobs.remove(&job_id).ok_or(IngestError::JobNotFound(job_id))?;
        self.inner.progress.remove(job_id);
        info!(%job_id, "Import job purged");
        Ok(removed.snapshot)
    }

    /// Wait until a job reaches a terminal state and return its final snapshot
    pub async fn wait_for_job(&self, job_id: Uuid) -> Result<ImportJob> {
        let mut status = self
            .inner
            .jobs
            .read()
            .await
            .get(&job_id)
            .map(|entry| entry.status.clone())
            .ok_or(IngestError::JobNotFound(job_id))?;

        // A dropped sender means the runner is gone; the snapshot is final either way
        let _ = status.wait_for(|s| s.is_terminal()).await;
        self.get_job_status(job_id).await
    }

    /// Number of jobs not yet in a terminal state
    pub async fn active_jobs(&self) -> usize {
        self.inner
            .jobs
            .read()
            .await
            .values()
            .filter(|entry| !entry.snapshot.status.is_terminal())
            .count()
    }

    /// Cancel every job, wait for their tasks and reject new imports
    pub async fn shutdown(&self) {
        info!(active = self.active_jobs().await, "Shutting down import orchestrator");
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }
}

/// What to do after a chunk
enum Flow {
    Continue,
    Stop(JobStatus),
}

/// Final state of one destination's write for a chunk
struct Settled {
    written: usize,
    /// Error that survived all retries, with the attempt count
    error: Option<(IngestError, u32)>,
}

/// Owns and mutates one job until it reaches a terminal state
struct JobRunner {
    inner: Arc<Inner>,
    ctx: WriteContext,
    job: ImportJob,
    opts: ImportOptions,
    cancel: CancellationToken,
    status_tx: watch::Sender<JobStatus>,
}

impl JobRunner {
    async fn run(mut self) {
        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            permit = self.inner.permits.clone().acquire_owned() => permit.ok(),
        };
        let Some(_permit) = permit else {
            info!(job_id = %self.job.id, "Import cancelled while queued");
            self.finish(JobStatus::Cancelled).await;
            return;
        };

        if let Err(e) = self.transition(JobStatus::Running) {
            error!(job_id = %self.job.id, error = %e, "Could not start import");
            return;
        }
        self.job.started_at = Some(Utc::now());
        info!(
            job_id = %self.job.id,
            dataset_type = %self.job.dataset_type,
            owner = %self.job.owner,
            "Import started"
        );
        self.publish().await;

        let status = self.drive().await;
        if matches!(status, JobStatus::Failed | JobStatus::Cancelled) && self.opts.cleanup_on_failure
        {
            self.cleanup().await;
        }
        self.finish(status).await;
    }

    fn transition(&mut self, to: JobStatus) -> Result<()> {
        let from = self.job.status;
        if !from.can_transition_to(to) {
            return Err(IngestError::InvalidTransition { from, to });
        }
        self.job.status = to;
        Ok(())
    }

    async fn publish(&self) {
        self.inner.store_snapshot(&self.job).await;
        self.inner.progress.publish(ProgressEvent::from_job(&self.job));
    }

    async fn finish(&mut self, status: JobStatus) {
        if let Err(e) = self.transition(status) {
            error!(job_id = %self.job.id, error = %e, "Invalid terminal transition");
            return;
        }
        self.job.completed_at = Some(Utc::now());
        self.publish().await;
        self.status_tx.send_replace(status);

        let job = &self.job;
        match status {
            JobStatus::Completed => info!(
                job_id = %job.id,
                processed = job.processed_count,
                chunks = job.chunks_processed,
                "Import completed"
            ),
            JobStatus::PartiallyCompleted => warn!(
                job_id = %job.id,
                processed = job.processed_count,
                errors = job.error_log.len(),
                "Import partially completed"
            ),
            JobStatus::Cancelled => info!(
                job_id = %job.id,
                processed = job.processed_count,
                "Import cancelled"
            ),
            _ => error!(
                job_id = %job.id,
                processed = job.processed_count,
                errors = job.error_log.len(),
                "Import failed"
            ),
        }
    }

    fn record_error(
        &mut self,
        chunk_index: Option<u64>,
        destination: Option<Destination>,
        attempt: u32,
        err: &IngestError,
    ) {
        self.job.error_log.push(ErrorLogEntry {
            chunk_index,
            destination,
            attempt,
            kind: err.kind().to_string(),
            message: err.to_string(),
            occurred_at: Utc::now(),
        });
    }

    /// Fetch, chunk and write until the stream ends or the job must stop
    async fn drive(&mut self) -> JobStatus {
        let fetched = match self.open_stream(0, None, None).await {
            Ok(fetched) => fetched,
            Err(IngestError::Cancelled) => return JobStatus::Cancelled,
            Err(_) => return JobStatus::Failed,
        };

        self.job.estimated_total = match (fetched.estimated_total, self.opts.record_ceiling()) {
            (Some(total), Some(ceiling)) => Some(total.min(ceiling)),
            (total, _) => total,
        };
        self.publish().await;

        let mut chunker = AdaptiveChunker::new(fetched.stream, ChunkBudget::from_options(&self.opts));

        loop {
            if self.cancel.is_cancelled() {
                return JobStatus::Cancelled;
            }

            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return JobStatus::Cancelled,
                next = chunker.next_chunk() => next,
            };

            match next {
                None => break,
                Some(Ok(chunk)) => {
                    if let Flow::Stop(status) = self.process_chunk(chunk).await {
                        return status;
                    }
                },
                Some(Err(err)) if err.is_retryable() => {
                    let chunk_index = chunker.next_chunk_index();
                    match self
                        .open_stream(chunker.resume_offset(), Some(chunk_index), Some(err))
                        .await
                    {
                        Ok(fetched) => chunker.attach(fetched.stream),
                        Err(IngestError::Cancelled) => return JobStatus::Cancelled,
                        Err(err) if self.opts.enable_partial_import => {
                            warn!(
                                job_id = %self.job.id,
                                chunk_index,
                                error = %err,
                                "Could not resume fetch, ending import with the records read so far"
                            );
                            break;
                        },
                        Err(_) => return JobStatus::Failed,
                    }
                },
                Some(Err(err)) => {
                    let chunk_index = chunker.next_chunk_index();
                    error!(job_id = %self.job.id, chunk_index, error = %err, "Fatal fetch error");
                    self.record_error(Some(chunk_index), None, 0, &err);
                    if matches!(err, IngestError::BudgetExceeded(_)) || !self.opts.enable_partial_import {
                        return JobStatus::Failed;
                    }
                    self.publish().await;
                },
            }
        }

        if self.job.error_log.is_empty() {
            JobStatus::Completed
        } else {
            JobStatus::PartiallyCompleted
        }
    }

    /// Open (or reopen) the dataset at `offset`, retrying transient errors.
    ///
    /// `pending` is a transient error that already happened and counts as
    /// the first failed attempt. Failures other than cancellation are
    /// recorded in the job's error log before being returned.
    async fn open_stream(
        &mut self,
        offset: u64,
        chunk_index: Option<u64>,
        mut pending: Option<IngestError>,
    ) -> Result<FetchedDataset> {
        let retry = self.opts.retry;
        let mut attempt: u32 = 0;

        loop {
            if let Some(err) = pending.take() {
                if attempt >= retry.max_retries {
                    error!(
                        job_id = %self.job.id,
                        chunk_index,
                        offset,
                        attempt,
                        error = %err,
                        "Fetch retries exhausted"
                    );
                    self.record_error(chunk_index, None, attempt, &err);
                    return Err(err);
                }

                let delay = retry.delay_for(attempt);
                warn!(
                    job_id = %self.job.id,
                    chunk_index,
                    offset,
                    attempt = attempt + 1,
                    max_retries = retry.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient fetch error, retrying"
                );
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(IngestError::Cancelled),
                    _ = tokio::time::sleep(delay) => {},
                }
                attempt += 1;
            }

            let opened = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(IngestError::Cancelled),
                opened = self.inner.fetcher.fetch_from(
                    &self.job.dataset_type,
                    &self.job.dataset_config,
                    offset,
                ) => opened,
            };

            match opened {
                Ok(fetched) => {
                    debug!(
                        job_id = %self.job.id,
                        offset,
                        estimated_total = ?fetched.estimated_total,
                        "Dataset stream opened"
                    );
                    return Ok(fetched);
                },
                Err(err) if err.is_retryable() => pending = Some(err),
                Err(err) => {
                    error!(job_id = %self.job.id, offset, error = %err, "Could not open dataset");
                    self.record_error(chunk_index, None, attempt, &err);
                    return Err(err);
                },
            }
        }
    }

    async fn process_chunk(&mut self, chunk: DatasetChunk) -> Flow {
        let chunk_index = chunk.chunk_index;
        let write_opts = WriteOptions {
            sub_batch_size: self.opts.sub_batch_size,
        };
        let records = DualStoreWriter::prepare(&self.ctx, &chunk);

        let mut result = self
            .inner
            .writer
            .write_prepared(&self.ctx, &records, self.opts.destinations, write_opts)
            .await;

        let ephemeral = result.take(Destination::Ephemeral);
        let durable = result.take(Destination::Durable);
        let (ephemeral, durable) = tokio::join!(
            self.settle(Destination::Ephemeral, chunk_index, &records, ephemeral, write_opts),
            self.settle(Destination::Durable, chunk_index, &records, durable, write_opts),
        );

        let mut fail = false;
        for (destination, settled) in [(Destination::Ephemeral, ephemeral), (Destination::Durable, durable)] {
            let Some(settled) = settled else { continue };
            match destination {
                Destination::Ephemeral => self.job.ephemeral_written += settled.written as u64,
                Destination::Durable => self.job.durable_written += settled.written as u64,
            }

            if let Some((err, attempt)) = settled.error {
                error!(
                    job_id = %self.job.id,
                    chunk_index,
                    destination = %destination,
                    attempt,
                    error = %err,
                    "Chunk write failed"
                );
                self.record_error(Some(chunk_index), Some(destination), attempt, &err);
                if self.opts.required.contains(destination) || !self.opts.enable_partial_import {
                    fail = true;
                }
            }
        }

        if fail {
            return Flow::Stop(JobStatus::Failed);
        }

        self.job.processed_count += chunk.len() as u64;
        self.job.chunks_processed += 1;
        debug!(
            job_id = %self.job.id,
            chunk_index,
            records = chunk.len(),
            processed = self.job.processed_count,
            estimated_total = ?self.job.estimated_total,
            "Chunk processed"
        );
        self.publish().await;
        Flow::Continue
    }

    /// Retry one destination's transient failure until it succeeds, turns
    /// fatal or runs out of attempts. Retries resume after the last
    /// committed sub-batch.
    async fn settle(
        &self,
        destination: Destination,
        chunk_index: u64,
        records: &[StoredRecord],
        outcome: Option<DestinationOutcome>,
        write_opts: WriteOptions,
    ) -> Option<Settled> {
        let mut outcome = outcome?;
        let mut written = outcome.written;
        let mut attempt: u32 = 0;
        let retry = self.opts.retry;

        loop {
            let Some(err) = outcome.error.take() else {
                return Some(Settled {
                    written,
                    error: None,
                });
            };
            if !err.is_retryable() || attempt >= retry.max_retries {
                return Some(Settled {
                    written,
                    error: Some((err, attempt)),
                });
            }

            let delay = retry.delay_for(attempt);
            warn!(
                job_id = %self.job.id,
                chunk_index,
                destination = %destination,
                attempt = attempt + 1,
                max_retries = retry.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient write error, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;

            outcome = self
                .inner
                .writer
                .write_records(&self.ctx, destination, &records[written..], write_opts)
                .await;
            written += outcome.written;
        }
    }

    /// Best-effort removal of everything this job wrote
    async fn cleanup(&self) {
        for destination in self.opts.destinations.iter() {
            let store = match destination {
                Destination::Ephemeral => {
                    match self.inner.writer.sessions().get(&self.ctx.key.owner).await {
                        Some(store) => store,
                        None => continue,
                    }
                },
                Destination::Durable => self.inner.writer.durable().clone(),
            };

            match store.delete_job(&self.ctx.key, self.job.id).await {
                Ok(removed) => info!(
                    job_id = %self.job.id,
                    destination = %destination,
                    removed,
                    "Cleaned up records of failed import"
                ),
                Err(e) => warn!(
                    job_id = %self.job.id,
                    destination = %destination,
                    error = %e,
                    "Cleanup failed, records left in place"
                ),
            }
        }
    }
}
