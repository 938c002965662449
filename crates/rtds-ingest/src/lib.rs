//! RTDS Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Imports large adversarial benchmark datasets from an upstream provider
//! into two stores: a per-owner session store used by the active test run
//! and a durable store shared across sessions.
//!
//! # Pipeline
//!
//! - **Fetcher**: registered dataset types, config schemas and lazy record streams
//! - **Chunker**: memory-bounded chunks sized from observed record sizes
//! - **Writer**: independent writes to both stores, per-destination outcomes
//! - **Orchestrator**: job lifecycle, retries with backoff, cancellation, cleanup
//! - **Retrieval**: paginated reads preferring the session store with durable fallback
//! - **Progress**: non-blocking per-job progress events with replay on subscribe
//!
//! # Example
//!
//! ```no_run
//! use rtds_ingest::config::ImportOptions;
//! use rtds_ingest::fetcher::{catalog::builtin_fetcher, RowsApiProvider};
//! use rtds_ingest::orchestrator::{ImportOrchestrator, OrchestratorConfig};
//! use rtds_ingest::storage::{SessionRegistry, SqliteRecordStore};
//! use rtds_ingest::writer::DualStoreWriter;
//! use serde_json::Map;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let provider = RowsApiProvider::with_client(
//!         reqwest::Client::new(),
//!         "https://datasets-server.huggingface.co",
//!     );
//!     let durable = SqliteRecordStore::connect("sqlite://rtds.db").await?;
//!     let orchestrator = ImportOrchestrator::new(
//!         Arc::new(builtin_fetcher(Arc::new(provider))),
//!         Arc::new(DualStoreWriter::new(Arc::new(SessionRegistry::new()), Arc::new(durable))),
//!         OrchestratorConfig::default(),
//!     );
//!
//!     let job_id = orchestrator
//!         .start_import("advbench", Map::new(), "alice", ImportOptions::default())
//!         .await?;
//!     let job = orchestrator.wait_for_job(job_id).await?;
//!     println!("{} records, status {}", job.processed_count, job.status);
//!     Ok(())
//! }
//! ```

pub mod chunker;
pub mod cli;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod orchestrator;
pub mod progress;
pub mod retrieval;
pub mod storage;
pub mod types;
pub mod writer;

pub use config::{ImportOptions, ImportSettings, RetryPolicy};
pub use error::{IngestError, Result, StoreError};
pub use orchestrator::{ImportOrchestrator, OrchestratorConfig};
pub use retrieval::{HybridRetrievalService, SourcePreference, SourceUsed};
pub use types::{
    DatasetChunk, Destination, DestinationSet, ImportJob, JobStatus, ProgressEvent, RawRecord,
};
