//! Upstream dataset fetching
//!
//! A [`DatasetProvider`] turns a validated config into a lazy, single-pass
//! [`RecordStream`]. The [`DatasetFetcher`] is the registry that maps dataset
//! types to providers and config schemas; it is the only entry point the
//! orchestrator uses.
//!
//! Streams are not restartable. Retrying a transient error means calling
//! [`DatasetFetcher::fetch_from`] again at the offset after the last record
//! that was consumed.

pub mod catalog;
pub mod rows_api;
pub mod schema;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{IngestError, Result};
use crate::types::RawRecord;

pub use rows_api::RowsApiProvider;
pub use schema::{ConfigSchema, FieldKind, FieldSpec};

/// Lazy, finite, single-pass sequence of raw records
pub type RecordStream = BoxStream<'static, Result<RawRecord>>;

/// An opened dataset
pub struct FetchedDataset {
    pub stream: RecordStream,
    /// Total records the provider reports, counted from offset 0
    pub estimated_total: Option<u64>,
}

impl std::fmt::Debug for FetchedDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedDataset")
            .field("estimated_total", &self.estimated_total)
            .finish_non_exhaustive()
    }
}

/// A source of dataset records
#[async_trait]
pub trait DatasetProvider: Send + Sync {
    /// Provider name used in logs
    fn name(&self) -> &str;

    /// Open a stream positioned at `offset`.
    ///
    /// Errors while opening use the same classification as stream items:
    /// `FetchTransient` for network or provider hiccups, `FetchFatal` for
    /// responses that will not get better on retry.
    async fn open(&self, config: &Map<String, Value>, offset: u64) -> Result<FetchedDataset>;
}

/// A registered dataset type
#[derive(Clone)]
pub struct DatasetDefinition {
    pub dataset_type: String,
    pub description: String,
    pub schema: ConfigSchema,
    pub provider: Arc<dyn DatasetProvider>,
}

impl std::fmt::Debug for DatasetDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetDefinition")
            .field("dataset_type", &self.dataset_type)
            .field("provider", &self.provider.name())
            .finish_non_exhaustive()
    }
}

/// Registry of dataset types and the single fetch entry point
#[derive(Debug, Default, Clone)]
pub struct DatasetFetcher {
    definitions: BTreeMap<String, DatasetDefinition>,
}

impl DatasetFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a dataset type
    pub fn register(&mut self, definition: DatasetDefinition) {
        debug!(
            dataset_type = %definition.dataset_type,
            provider = definition.provider.name(),
            "Registered dataset type"
        );
        self.definitions
            .insert(definition.dataset_type.clone(), definition);
    }

    pub fn definition(&self, dataset_type: &str) -> Result<&DatasetDefinition> {
        self.definitions
            .get(dataset_type)
            .ok_or_else(|| IngestError::UnknownDatasetType(dataset_type.to_string()))
    }

    pub fn is_registered(&self, dataset_type: &str) -> bool {
        self.definitions.contains_key(dataset_type)
    }

    /// Registered definitions in dataset type order
    pub fn definitions(&self) -> impl Iterator<Item = &DatasetDefinition> {
        self.definitions.values()
    }

    /// Validate `config` for `dataset_type`, returning it with defaults applied
    pub fn validate_config(
        &self,
        dataset_type: &str,
        config: &Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        self.definition(dataset_type)?.schema.validate(config)
    }

    /// Open a dataset from its first record
    pub async fn fetch(
        &self,
        dataset_type: &str,
        config: &Map<String, Value>,
    ) -> Result<FetchedDataset> {
        self.fetch_from(dataset_type, config, 0).await
    }

    /// Open a dataset positioned at record `offset`
    pub async fn fetch_from(
        &self,
        dataset_type: &str,
        config: &Map<String, Value>,
        offset: u64,
    ) -> Result<FetchedDataset> {
        let definition = self.definition(dataset_type)?;
        let config = definition.schema.validate(config)?;

        debug!(dataset_type, offset, provider = definition.provider.name(), "Opening dataset");
        definition.provider.open(&config, offset).await
    }
}
