//! Dataset-server rows API provider
//!
//! Pages through `GET {base}/rows?dataset=&config=&split=&offset=&length=`,
//! which returns at most 100 rows per request:
//!
//! ```json
//! {
//!   "rows": [{"row_idx": 0, "row": {"prompt": "...", "target": "..."}}],
//!   "num_rows_total": 520
//! }
//! ```
//!
//! Pages are requested lazily as the stream is polled, so memory use is one
//! page regardless of dataset size.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::schema::{ConfigSchema, FieldKind};
use super::{DatasetProvider, FetchedDataset};
use crate::config::ProviderSettings;
use crate::error::{IngestError, Result};
use crate::types::RawRecord;

/// Largest page the rows API serves
pub const MAX_PAGE_SIZE: u64 = 100;

const USER_AGENT: &str = concat!("rtds-ingest/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct RowsPage {
    rows: Vec<RowEntry>,
    #[serde(default)]
    num_rows_total: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RowEntry {
    #[serde(default)]
    row_idx: Option<u64>,
    row: Value,
}

/// A failed page request
struct PageFailure {
    error: IngestError,
    /// The response arrived but could not be decoded; the next page may be fine
    skippable: bool,
}

impl PageFailure {
    fn transient(message: String) -> Self {
        Self {
            error: IngestError::FetchTransient(message),
            skippable: false,
        }
    }

    fn fatal(message: String) -> Self {
        Self {
            error: IngestError::FetchFatal(message),
            skippable: false,
        }
    }
}

/// Fetches datasets from a dataset-server rows API
#[derive(Debug, Clone)]
pub struct RowsApiProvider {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl RowsApiProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| IngestError::InvalidConfig(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            token: settings.token.clone(),
        })
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        }
    }

    /// Config keys understood by this provider, with `dataset` defaulted
    /// when the dataset type is bound to a fixed upstream id
    pub fn schema(default_dataset: Option<&str>) -> ConfigSchema {
        let schema = match default_dataset {
            Some(id) => ConfigSchema::new().optional(
                "dataset",
                FieldKind::String,
                Some(json!(id)),
                "Upstream dataset id",
            ),
            None => ConfigSchema::new().required("dataset", FieldKind::String, "Upstream dataset id"),
        };
        schema
            .optional(
                "config",
                FieldKind::String,
                Some(json!("default")),
                "Dataset configuration (subset) name",
            )
            .optional("split", FieldKind::String, Some(json!("train")), "Split to import")
            .optional(
                "page_size",
                FieldKind::Integer,
                Some(json!(MAX_PAGE_SIZE)),
                "Rows per request (1-100)",
            )
    }
}

#[async_trait]
impl DatasetProvider for RowsApiProvider {
    fn name(&self) -> &str {
        "rows-api"
    }

    async fn open(&self, config: &Map<String, Value>, offset: u64) -> Result<FetchedDataset> {
        let request = Arc::new(RowsRequest::from_config(self, config)?);

        let first = match request.fetch_page(offset).await {
            Ok(page) => page,
            Err(failure) => return Err(failure.error),
        };

        let mut cursor = RowsCursor {
            request,
            offset,
            total: None,
            buffer: VecDeque::new(),
            done: false,
        };
        cursor.absorb(first);
        let estimated_total = cursor.total;

        let stream = futures::stream::unfold(cursor, |mut cursor| async move {
            cursor.next_record().await.map(|item| (item, cursor))
        })
        .boxed();

        Ok(FetchedDataset {
            stream,
            estimated_total,
        })
    }
}

/// Fixed parameters of one dataset read
#[derive(Debug)]
struct RowsRequest {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    dataset: String,
    config: String,
    split: String,
    page_size: u64,
}

impl RowsRequest {
    fn from_config(provider: &RowsApiProvider, config: &Map<String, Value>) -> Result<Self> {
        let text = |key: &str| -> Result<String> {
            config
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| IngestError::InvalidConfig(format!("missing '{}'", key)))
        };

        let page_size = config
            .get("page_size")
            .and_then(Value::as_u64)
            .unwrap_or(MAX_PAGE_SIZE);
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(IngestError::InvalidConfig(format!(
                "page_size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, page_size
            )));
        }

        Ok(Self {
            client: provider.client.clone(),
            url: format!("{}/rows", provider.base_url),
            token: provider.token.clone(),
            dataset: text("dataset")?,
            config: text("config")?,
            split: text("split")?,
            page_size,
        })
    }

    async fn fetch_page(&self, offset: u64) -> std::result::Result<RowsPage, PageFailure> {
        debug!(dataset = %self.dataset, offset, length = self.page_size, "Requesting rows page");

        let offset_param = offset.to_string();
        let length_param = self.page_size.to_string();
        let mut request = self.client.get(&self.url).query(&[
            ("dataset", self.dataset.as_str()),
            ("config", self.config.as_str()),
            ("split", self.split.as_str()),
            ("offset", offset_param.as_str()),
            ("length", length_param.as_str()),
        ]);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_builder() {
                PageFailure::fatal(format!("invalid request: {}", e))
            } else {
                PageFailure::transient(format!("request to {} failed: {}", self.url, e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!(
                "{} returned {} at offset {}: {}",
                self.dataset,
                status,
                offset,
                body.chars().take(200).collect::<String>()
            );
            return Err(if is_transient_status(status) {
                PageFailure::transient(message)
            } else {
                PageFailure::fatal(message)
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| PageFailure::transient(format!("reading rows page: {}", e)))?;

        serde_json::from_slice::<RowsPage>(&body).map_err(|e| PageFailure {
            error: IngestError::FetchFatal(format!(
                "malformed rows page for {} at offset {}: {}",
                self.dataset, offset, e
            )),
            skippable: true,
        })
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

/// Read position of an open stream
struct RowsCursor {
    request: Arc<RowsRequest>,
    offset: u64,
    total: Option<u64>,
    buffer: VecDeque<RawRecord>,
    done: bool,
}

impl RowsCursor {
    fn absorb(&mut self, page: RowsPage) {
        if page.num_rows_total.is_some() {
            self.total = page.num_rows_total;
        }
        if page.rows.is_empty() {
            self.done = true;
            return;
        }

        let fetched = page.rows.len() as u64;
        for (i, entry) in page.rows.into_iter().enumerate() {
            let offset = entry.row_idx.unwrap_or(self.offset + i as u64);
            self.buffer.push_back(
                RawRecord::new(offset, entry.row)
                    .with_metadata("row_idx", json!(offset))
                    .with_metadata("source", json!(self.request.dataset))
                    .with_metadata("split", json!(self.request.split)),
            );
        }
        self.offset += fetched;
    }

    async fn next_record(&mut self) -> Option<Result<RawRecord>> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                return Some(Ok(record));
            }
            if self.done || matches!(self.total, Some(total) if self.offset >= total) {
                return None;
            }

            match self.request.fetch_page(self.offset).await {
                Ok(page) => self.absorb(page),
                Err(failure) => {
                    if failure.skippable && self.total.is_some() {
                        warn!(
                            dataset = %self.request.dataset,
                            offset = self.offset,
                            "Skipping malformed rows page"
                        );
                        self.offset += self.request.page_size;
                    } else {
                        self.done = true;
                    }
                    return Some(Err(failure.error));
                },
            }
        }
    }
}
