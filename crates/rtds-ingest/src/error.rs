//! Error types for the import pipeline
//!
//! Retry decisions are made on the variant alone, never on message text:
//! `FetchTransient` and `WriteTransient` are retryable, everything else is
//! final for the operation that raised it.

use thiserror::Error;
use uuid::Uuid;

use crate::types::{Destination, JobStatus};

/// Result type alias for import operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Error raised by a [`RecordStore`](crate::storage::RecordStore)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Worth retrying: lock contention, pool exhaustion, I/O hiccups
    #[error("transient store error: {0}")]
    Transient(String),

    #[error("fatal store error: {0}")]
    Fatal(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed => {
                StoreError::Transient(err.to_string())
            },
            sqlx::Error::Database(db) => {
                // SQLITE_BUSY (5) and SQLITE_LOCKED (6), including extended codes
                let busy = db
                    .code()
                    .and_then(|c| c.parse::<i32>().ok())
                    .map(|c| matches!(c & 0xff, 5 | 6))
                    .unwrap_or(false);
                if busy {
                    StoreError::Transient(err.to_string())
                } else {
                    StoreError::Fatal(err.to_string())
                }
            },
            _ => StoreError::Fatal(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Fatal(format!("record encoding: {}", err))
    }
}

/// Import pipeline errors
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Unknown dataset type: {0}")]
    UnknownDatasetType(String),

    #[error("Invalid dataset config: {0}")]
    InvalidConfig(String),

    #[error("Invalid owner: {0}")]
    InvalidOwner(String),

    #[error("Transient fetch error: {0}")]
    FetchTransient(String),

    #[error("Fatal fetch error: {0}")]
    FetchFatal(String),

    #[error("Transient write error on {destination}: {message}")]
    WriteTransient {
        destination: Destination,
        message: String,
    },

    #[error("Fatal write error on {destination}: {message}")]
    WriteFatal {
        destination: Destination,
        message: String,
    },

    #[error("Import job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Import cancelled")]
    Cancelled,

    #[error("Memory budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("Invalid job transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Import job {0} is still active")]
    JobActive(Uuid),

    #[error("Both sources failed: ephemeral: {}, durable: {durable}", describe(.ephemeral))]
    SourcesExhausted {
        /// `None` when the ephemeral store answered with zero rows
        ephemeral: Option<StoreError>,
        durable: StoreError,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

fn describe(ephemeral: &Option<StoreError>) -> String {
    match ephemeral {
        Some(err) => err.to_string(),
        None => "no rows".to_string(),
    }
}

impl IngestError {
    /// Lift a store error into the write taxonomy for `destination`
    pub fn from_store(destination: Destination, err: StoreError) -> Self {
        match err {
            StoreError::Transient(message) => IngestError::WriteTransient {
                destination,
                message,
            },
            StoreError::Fatal(message) => IngestError::WriteFatal {
                destination,
                message,
            },
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IngestError::FetchTransient(_) | IngestError::WriteTransient { .. }
        )
    }

    /// Destination the error is attached to, for write errors
    pub fn destination(&self) -> Option<Destination> {
        match self {
            IngestError::WriteTransient { destination, .. }
            | IngestError::WriteFatal { destination, .. } => Some(*destination),
            _ => None,
        }
    }

    /// Stable snake_case name used in job error logs
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::UnknownDatasetType(_) => "unknown_dataset_type",
            IngestError::InvalidConfig(_) => "invalid_config",
            IngestError::InvalidOwner(_) => "invalid_owner",
            IngestError::FetchTransient(_) => "fetch_transient",
            IngestError::FetchFatal(_) => "fetch_fatal",
            IngestError::WriteTransient { .. } => "write_transient",
            IngestError::WriteFatal { .. } => "write_fatal",
            IngestError::JobNotFound(_) => "job_not_found",
            IngestError::Cancelled => "cancelled",
            IngestError::BudgetExceeded(_) => "budget_exceeded",
            IngestError::InvalidTransition { .. } => "invalid_transition",
            IngestError::JobActive(_) => "job_active",
            IngestError::SourcesExhausted { .. } => "sources_exhausted",
            IngestError::Store(_) => "store",
        }
    }
}
