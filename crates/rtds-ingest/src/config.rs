//! Import configuration
//!
//! [`ImportSettings`] is the process-wide configuration loaded from the
//! environment. [`ImportOptions`] is the per-job view derived from it; callers
//! may override any import knob per job.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::DestinationSet;

// ============================================================================
// Import Configuration Constants
// ============================================================================

/// Default (and maximum) records per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Default lower bound for adaptive chunk sizing.
pub const DEFAULT_MIN_CHUNK_SIZE: usize = 10;

/// Default record ceiling per import (0 = unlimited).
pub const DEFAULT_MAX_IMPORT_SIZE: u64 = 0;

/// Default memory budget per chunk in megabytes.
pub const DEFAULT_MAX_MEMORY_MB: usize = 512;

/// Default retry attempts for transient fetch and write errors.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay of the exponential backoff.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;

/// Default cap on a single backoff delay.
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 30_000;

/// Default maximum number of concurrently running imports.
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 4;

/// Default records per underlying store write call.
pub const DEFAULT_SUB_BATCH_SIZE: usize = 100;

/// Default number of buffered progress events per job.
pub const DEFAULT_PROGRESS_BUFFER: usize = 64;

/// Default durable store location.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://rtds.db";

/// Default dataset rows API.
pub const DEFAULT_PROVIDER_BASE_URL: &str = "https://datasets-server.huggingface.co";

/// Default provider request timeout in seconds.
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 30;

/// Exponential backoff policy: `base * 2^attempt`, capped at `max_delay`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// No retries and no delay, used by dry runs and tests
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_RETRY_MAX_DELAY_MS),
        }
    }
}

/// Process-wide import settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSettings {
    pub chunk_size: usize,
    pub min_chunk_size: usize,
    pub max_import_size: u64,
    pub max_memory_mb: usize,
    pub retry: RetryPolicy,
    pub enable_partial_import: bool,
    pub cleanup_on_failure: bool,
    pub max_concurrent_jobs: usize,
    pub sub_batch_size: usize,
    pub progress_buffer: usize,
    pub database_url: String,
    pub provider: ProviderSettings,
}

/// Dataset provider connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Bearer token for gated datasets
    #[serde(skip_serializing)]
    pub token: Option<String>,
}

impl ImportSettings {
    /// Load settings from `.env` and the process environment
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load settings through an explicit variable lookup.
    ///
    /// Unparseable values fall back to the default, like a missing key.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
            default: T,
        ) -> T {
            lookup(key)
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(default)
        }

        let settings = ImportSettings {
            chunk_size: parsed(&lookup, "IMPORT_CHUNK_SIZE", DEFAULT_CHUNK_SIZE),
            min_chunk_size: parsed(&lookup, "IMPORT_MIN_CHUNK_SIZE", DEFAULT_MIN_CHUNK_SIZE),
            max_import_size: parsed(&lookup, "IMPORT_MAX_SIZE", DEFAULT_MAX_IMPORT_SIZE),
            max_memory_mb: parsed(&lookup, "IMPORT_MAX_MEMORY_MB", DEFAULT_MAX_MEMORY_MB),
            retry: RetryPolicy {
                max_retries: parsed(&lookup, "IMPORT_MAX_RETRIES", DEFAULT_MAX_RETRIES),
                base_delay: Duration::from_millis(parsed(
                    &lookup,
                    "IMPORT_RETRY_BASE_DELAY_MS",
                    DEFAULT_RETRY_BASE_DELAY_MS,
                )),
                max_delay: Duration::from_millis(parsed(
                    &lookup,
                    "IMPORT_RETRY_MAX_DELAY_MS",
                    DEFAULT_RETRY_MAX_DELAY_MS,
                )),
            },
            enable_partial_import: parsed(&lookup, "IMPORT_ENABLE_PARTIAL", false),
            cleanup_on_failure: parsed(&lookup, "IMPORT_CLEANUP_ON_FAILURE", false),
            max_concurrent_jobs: parsed(
                &lookup,
                "IMPORT_MAX_CONCURRENT_JOBS",
                DEFAULT_MAX_CONCURRENT_JOBS,
            ),
            sub_batch_size: parsed(&lookup, "IMPORT_SUB_BATCH_SIZE", DEFAULT_SUB_BATCH_SIZE),
            progress_buffer: parsed(&lookup, "IMPORT_PROGRESS_BUFFER", DEFAULT_PROGRESS_BUFFER),
            database_url: lookup("IMPORT_DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            provider: ProviderSettings {
                base_url: lookup("IMPORT_PROVIDER_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_PROVIDER_BASE_URL.to_string()),
                timeout_secs: parsed(
                    &lookup,
                    "IMPORT_PROVIDER_TIMEOUT_SECS",
                    DEFAULT_PROVIDER_TIMEOUT_SECS,
                ),
                token: lookup("IMPORT_PROVIDER_TOKEN").filter(|t| !t.trim().is_empty()),
            },
        };

        settings.validate()?;

        Ok(settings)
    }

    /// Validate settings
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunk_size == 0 {
            anyhow::bail!("Chunk size must be greater than 0");
        }

        if self.min_chunk_size == 0 {
            anyhow::bail!("Minimum chunk size must be greater than 0");
        }

        if self.min_chunk_size > self.chunk_size {
            anyhow::bail!(
                "Minimum chunk size ({}) cannot be greater than chunk size ({})",
                self.min_chunk_size,
                self.chunk_size
            );
        }

        if self.max_memory_mb == 0 {
            anyhow::bail!("Memory budget must be greater than 0");
        }

        if self.max_concurrent_jobs == 0 {
            anyhow::bail!("Max concurrent jobs must be greater than 0");
        }

        if self.sub_batch_size == 0 {
            anyhow::bail!("Sub-batch size must be greater than 0");
        }

        if self.progress_buffer == 0 {
            anyhow::bail!("Progress buffer must be greater than 0");
        }

        if self.retry.base_delay > self.retry.max_delay {
            anyhow::bail!(
                "Retry base delay ({:?}) cannot exceed the max delay ({:?})",
                self.retry.base_delay,
                self.retry.max_delay
            );
        }

        if self.database_url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        Ok(())
    }

    /// Per-job options seeded from these settings
    pub fn import_options(&self) -> ImportOptions {
        ImportOptions {
            destinations: DestinationSet::both(),
            required: DestinationSet::none(),
            chunk_size: self.chunk_size,
            min_chunk_size: self.min_chunk_size,
            max_import_size: self.max_import_size,
            max_memory_bytes: self.max_memory_mb.saturating_mul(1024 * 1024),
            retry: self.retry,
            enable_partial_import: self.enable_partial_import,
            cleanup_on_failure: self.cleanup_on_failure,
            sub_batch_size: self.sub_batch_size,
        }
    }
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            min_chunk_size: DEFAULT_MIN_CHUNK_SIZE,
            max_import_size: DEFAULT_MAX_IMPORT_SIZE,
            max_memory_mb: DEFAULT_MAX_MEMORY_MB,
            retry: RetryPolicy::default(),
            enable_partial_import: false,
            cleanup_on_failure: false,
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            sub_batch_size: DEFAULT_SUB_BATCH_SIZE,
            progress_buffer: DEFAULT_PROGRESS_BUFFER,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            provider: ProviderSettings {
                base_url: DEFAULT_PROVIDER_BASE_URL.to_string(),
                timeout_secs: DEFAULT_PROVIDER_TIMEOUT_SECS,
                token: None,
            },
        }
    }
}

/// Options for a single import job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportOptions {
    /// Stores to write to
    pub destinations: DestinationSet,
    /// Stores whose exhausted retries fail the job regardless of partial import
    pub required: DestinationSet,
    /// Upper bound for adaptive chunk sizing
    pub chunk_size: usize,
    pub min_chunk_size: usize,
    /// Record ceiling, 0 = unlimited
    pub max_import_size: u64,
    pub max_memory_bytes: usize,
    pub retry: RetryPolicy,
    pub enable_partial_import: bool,
    pub cleanup_on_failure: bool,
    pub sub_batch_size: usize,
}

impl Default for ImportOptions {
    fn default() -> Self {
        ImportSettings::default().import_options()
    }
}

impl ImportOptions {
    pub fn with_destinations(mut self, destinations: DestinationSet) -> Self {
        self.destinations = destinations;
        self
    }

    pub fn with_required(mut self, required: DestinationSet) -> Self {
        self.required = required;
        self
    }

    /// Fix the chunk size: adaptive sizing is clamped to exactly `size`
    pub fn with_fixed_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self.min_chunk_size = size;
        self
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self.min_chunk_size = self.min_chunk_size.min(size);
        self
    }

    pub fn with_max_import_size(mut self, max: u64) -> Self {
        self.max_import_size = max;
        self
    }

    pub fn with_max_memory_bytes(mut self, bytes: usize) -> Self {
        self.max_memory_bytes = bytes;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_partial_import(mut self, enabled: bool) -> Self {
        self.enable_partial_import = enabled;
        self
    }

    pub fn with_cleanup_on_failure(mut self, enabled: bool) -> Self {
        self.cleanup_on_failure = enabled;
        self
    }

    pub fn with_sub_batch_size(mut self, size: usize) -> Self {
        self.sub_batch_size = size;
        self
    }

    /// Record ceiling as an Option, None when unlimited
    pub fn record_ceiling(&self) -> Option<u64> {
        (self.max_import_size > 0).then_some(self.max_import_size)
    }

    /// Reject options no job could run with
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::IngestError;

        if self.chunk_size == 0 || self.min_chunk_size == 0 {
            return Err(IngestError::InvalidConfig(
                "chunk sizes must be greater than 0".to_string(),
            ));
        }
        if self.min_chunk_size > self.chunk_size {
            return Err(IngestError::InvalidConfig(format!(
                "min chunk size {} exceeds chunk size {}",
                self.min_chunk_size, self.chunk_size
            )));
        }
        if self.sub_batch_size == 0 {
            return Err(IngestError::InvalidConfig(
                "sub-batch size must be greater than 0".to_string(),
            ));
        }
        if self.max_memory_bytes == 0 {
            return Err(IngestError::InvalidConfig(
                "memory budget must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
