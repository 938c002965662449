//! Hybrid retrieval over the ephemeral and durable stores
//!
//! Reads prefer the owner's session store and fall back to the durable store
//! when the session store errors or has nothing at the requested offset.
//! The store that served a page is always reported.

use chrono::{DateTime, Utc};
use rtds_common::{DatasetKey, OwnerId};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::error::{IngestError, Result, StoreError};
use crate::storage::{RecordPage, RecordStore, SessionRegistry, StoreStats};

/// Largest page a single request may ask for
pub const MAX_PAGE_LIMIT: u64 = 1000;

/// Which store a read should try first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourcePreference {
    #[default]
    Auto,
    Ephemeral,
    /// Durable store only, no fallback
    Durable,
}

impl SourcePreference {
    pub fn as_str(&self) -> &str {
        match self {
            SourcePreference::Auto => "auto",
            SourcePreference::Ephemeral => "ephemeral",
            SourcePreference::Durable => "durable",
        }
    }
}

impl FromStr for SourcePreference {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(SourcePreference::Auto),
            "ephemeral" | "session" => Ok(SourcePreference::Ephemeral),
            "durable" => Ok(SourcePreference::Durable),
            other => Err(IngestError::InvalidConfig(format!(
                "unknown source '{}', expected auto, ephemeral or durable",
                other
            ))),
        }
    }
}

/// Store that actually served a page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceUsed {
    Ephemeral,
    Durable,
}

impl SourceUsed {
    pub fn as_str(&self) -> &str {
        match self {
            SourceUsed::Ephemeral => "ephemeral",
            SourceUsed::Durable => "durable",
        }
    }
}

impl std::fmt::Display for SourceUsed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResponse {
    pub page: RecordPage,
    pub source: SourceUsed,
}

/// Statistics of one store, with the error that prevented reading it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStats {
    pub available: bool,
    pub total_records: u64,
    pub last_updated: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl From<StoreStats> for SourceStats {
    fn from(stats: StoreStats) -> Self {
        Self {
            available: stats.available,
            total_records: stats.total_records,
            last_updated: stats.last_updated,
            error: None,
        }
    }
}

impl SourceStats {
    fn unavailable(err: &StoreError) -> Self {
        Self {
            available: false,
            total_records: 0,
            last_updated: None,
            error: Some(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetStatistics {
    pub ephemeral: SourceStats,
    pub durable: SourceStats,
}

impl DatasetStatistics {
    /// Store an `Auto` read would be served from
    pub fn preferred_source(&self) -> SourceUsed {
        if self.ephemeral.available {
            SourceUsed::Ephemeral
        } else {
            SourceUsed::Durable
        }
    }
}

/// Read side shared by every consumer of imported datasets
#[derive(Clone)]
pub struct HybridRetrievalService {
    sessions: Arc<SessionRegistry>,
    durable: Arc<dyn RecordStore>,
}

impl HybridRetrievalService {
    pub fn new(sessions: Arc<SessionRegistry>, durable: Arc<dyn RecordStore>) -> Self {
        Self { sessions, durable }
    }

    fn key(owner: &str, dataset_type: &str) -> Result<DatasetKey> {
        let owner = OwnerId::new(owner).map_err(|e| IngestError::InvalidOwner(e.to_string()))?;
        DatasetKey::new(owner, dataset_type).map_err(|e| IngestError::InvalidConfig(e.to_string()))
    }

    /// Session store of the owner; a missing session reads as empty
    async fn ephemeral_page(
        &self,
        key: &DatasetKey,
        offset: u64,
        limit: u64,
    ) -> std::result::Result<RecordPage, StoreError> {
        match self.sessions.get(&key.owner).await {
            Some(store) => store.page(key, offset, limit).await,
            None => Ok(RecordPage::empty(offset)),
        }
    }

    async fn ephemeral_stats(&self, key: &DatasetKey) -> std::result::Result<StoreStats, StoreError> {
        match self.sessions.get(&key.owner).await {
            Some(store) => store.stats(key).await,
            None => Ok(StoreStats::empty()),
        }
    }

    /// Read one page of `(owner, dataset_type)`.
    ///
    /// `limit` must be positive and is capped at [`MAX_PAGE_LIMIT`]. With
    /// `Auto` or `Ephemeral` the session store is tried first; an error or
    /// an empty page there falls back to the durable store. If the durable
    /// read fails too, both causes are returned together.
    pub async fn get_page(
        &self,
        owner: &str,
        dataset_type: &str,
        offset: u64,
        limit: u64,
        preference: SourcePreference,
    ) -> Result<PageResponse> {
        let key = Self::key(owner, dataset_type)?;
        if limit == 0 {
            return Err(IngestError::InvalidConfig(
                "page limit must be greater than 0".to_string(),
            ));
        }
        let limit = limit.min(MAX_PAGE_LIMIT);

        if preference == SourcePreference::Durable {
            let page = self.durable.page(&key, offset, limit).await?;
            return Ok(PageResponse {
                page,
                source: SourceUsed::Durable,
            });
        }

        let ephemeral_error = match self.ephemeral_page(&key, offset, limit).await {
            Ok(page) if !page.records.is_empty() => {
                return Ok(PageResponse {
                    page,
                    source: SourceUsed::Ephemeral,
                });
            },
            Ok(_) => {
                debug!(key = %key, offset, "No session rows, reading durable store");
                None
            },
            Err(e) => {
                warn!(
                    key = %key,
                    offset,
                    error = %e,
                    "Session store read failed, falling back to durable store"
                );
                Some(e)
            },
        };

        match self.durable.page(&key, offset, limit).await {
            Ok(page) => Ok(PageResponse {
                page,
                source: SourceUsed::Durable,
            }),
            Err(durable) => {
                error!(
                    key = %key,
                    offset,
                    ephemeral_error = ephemeral_error.as_ref().map(|e| e.to_string()),
                    durable_error = %durable,
                    "Both stores failed to serve page"
                );
                Err(IngestError::SourcesExhausted {
                    ephemeral: ephemeral_error,
                    durable,
                })
            },
        }
    }

    /// Per-store availability and counts, without reading records.
    ///
    /// One failing store is reported in its `error` field; both failing is
    /// an error.
    pub async fn get_statistics(&self, owner: &str, dataset_type: &str) -> Result<DatasetStatistics> {
        let key = Self::key(owner, dataset_type)?;
        let (ephemeral, durable) = tokio::join!(self.ephemeral_stats(&key), self.durable.stats(&key));

        match (ephemeral, durable) {
            (Err(ephemeral), Err(durable)) => {
                error!(key = %key, ephemeral_error = %ephemeral, durable_error = %durable, "Statistics unavailable");
                Err(IngestError::SourcesExhausted {
                    ephemeral: Some(ephemeral),
                    durable,
                })
            },
            (ephemeral, durable) => Ok(DatasetStatistics {
                ephemeral: ephemeral.map_or_else(|e| SourceStats::unavailable(&e), SourceStats::from),
                durable: durable.map_or_else(|e| SourceStats::unavailable(&e), SourceStats::from),
            }),
        }
    }
}
