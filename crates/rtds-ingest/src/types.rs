//! Core types for the dataset import pipeline

use chrono::{DateTime, Utc};
use rtds_common::OwnerId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// One of the two stores a chunk can be written to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    /// Session-scoped store used by the active test run
    Ephemeral,
    /// Shared store that survives sessions
    Durable,
}

impl Destination {
    pub fn as_str(&self) -> &str {
        match self {
            Destination::Ephemeral => "ephemeral",
            Destination::Durable => "durable",
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subset of {ephemeral, durable}. The empty set is a dry run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DestinationSet {
    pub ephemeral: bool,
    pub durable: bool,
}

impl DestinationSet {
    pub const fn both() -> Self {
        Self {
            ephemeral: true,
            durable: true,
        }
    }

    pub const fn none() -> Self {
        Self {
            ephemeral: false,
            durable: false,
        }
    }

    pub const fn only(destination: Destination) -> Self {
        match destination {
            Destination::Ephemeral => Self {
                ephemeral: true,
                durable: false,
            },
            Destination::Durable => Self {
                ephemeral: false,
                durable: true,
            },
        }
    }

    pub fn contains(&self, destination: Destination) -> bool {
        match destination {
            Destination::Ephemeral => self.ephemeral,
            Destination::Durable => self.durable,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.ephemeral && !self.durable
    }

    pub fn iter(&self) -> impl Iterator<Item = Destination> + '_ {
        [Destination::Ephemeral, Destination::Durable]
            .into_iter()
            .filter(|d| self.contains(*d))
    }
}

/// Import job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    PartiallyCompleted,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::PartiallyCompleted => "partially_completed",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::PartiallyCompleted
                | JobStatus::Completed
                | JobStatus::Failed
                | JobStatus::Cancelled
        )
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// Terminal states are final. A pending job may be cancelled or failed
    /// before it ever runs; only a running job can complete.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Running) => true,
            (JobStatus::Pending, JobStatus::Cancelled | JobStatus::Failed) => true,
            (JobStatus::Running, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One raw record produced by a dataset provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Position in the upstream dataset; reopening a stream at `offset + 1`
    /// resumes right after this record
    pub offset: u64,
    pub value: Value,
    /// Provider annotations such as the split or source row index
    pub metadata: Map<String, Value>,
}

impl RawRecord {
    pub fn new(offset: u64, value: Value) -> Self {
        Self {
            offset,
            value,
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// A batch of records moved as one unit from the chunker to the writer
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetChunk {
    pub chunk_index: u64,
    pub records: Vec<Value>,
    /// Parallel to `records`
    pub record_metadata: Vec<Map<String, Value>>,
    pub approx_byte_size: usize,
}

impl DatasetChunk {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A record as persisted by either store.
///
/// `(job_id, chunk_index, record_index, fingerprint)` identifies the record
/// across retried writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub job_id: Uuid,
    pub chunk_index: u64,
    pub record_index: u32,
    pub fingerprint: String,
    pub value: Value,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl StoredRecord {
    pub fn identity(&self) -> (Uuid, u64, u32, &str) {
        (
            self.job_id,
            self.chunk_index,
            self.record_index,
            &self.fingerprint,
        )
    }
}

/// One chunk-level error recorded against a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub chunk_index: Option<u64>,
    pub destination: Option<Destination>,
    pub attempt: u32,
    /// Error kind, e.g. "write_fatal"
    pub kind: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

/// One import attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportJob {
    pub id: Uuid,
    pub dataset_type: String,
    /// Validated fetch parameters with schema defaults applied
    pub dataset_config: Map<String, Value>,
    pub owner: OwnerId,
    pub status: JobStatus,
    pub processed_count: u64,
    /// Provider-supplied total, if any
    pub estimated_total: Option<u64>,
    pub error_log: Vec<ErrorLogEntry>,
    pub chunks_processed: u64,
    pub ephemeral_written: u64,
    pub durable_written: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ImportJob {
    pub fn new(
        dataset_type: impl Into<String>,
        dataset_config: Map<String, Value>,
        owner: OwnerId,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            dataset_type: dataset_type.into(),
            dataset_config,
            owner,
            status: JobStatus::Pending,
            processed_count: 0,
            estimated_total: None,
            error_log: Vec::new(),
            chunks_processed: 0,
            ephemeral_written: 0,
            durable_written: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Completion fraction in [0, 1], or None when the total is unknown
    pub fn completion_fraction(&self) -> Option<f64> {
        fraction(self.processed_count, self.estimated_total)
    }

    pub fn last_error(&self) -> Option<&ErrorLogEntry> {
        self.error_log.last()
    }
}

/// Snapshot pushed to progress subscribers after every chunk boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: Uuid,
    pub processed_count: u64,
    pub estimated_total: Option<u64>,
    pub status: JobStatus,
    pub last_error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn from_job(job: &ImportJob) -> Self {
        Self {
            job_id: job.id,
            processed_count: job.processed_count,
            estimated_total: job.estimated_total,
            status: job.status,
            last_error: job.last_error().map(|e| e.message.clone()),
            timestamp: Utc::now(),
        }
    }

    pub fn fraction(&self) -> Option<f64> {
        fraction(self.processed_count, self.estimated_total)
    }
}

fn fraction(processed: u64, total: Option<u64>) -> Option<f64> {
    match total {
        Some(0) => Some(1.0),
        Some(total) => Some((processed as f64 / total as f64).min(1.0)),
        None => None,
    }
}
