//! Adaptive stream chunker
//!
//! Groups a [`RecordStream`] into memory-bounded [`DatasetChunk`]s. The chunk
//! size is derived from the average footprint of the first
//! [`SAMPLE_WINDOW`] records:
//!
//! ```text
//! target = clamp(0.7 * max_bytes_per_chunk / avg_record_bytes, min_chunk_size, max_chunk_size)
//! ```
//!
//! The target only changes at chunk boundaries. Independently of the target,
//! a chunk never grows past `max_bytes_per_chunk`.

use futures::{Stream, StreamExt};
use rtds_common::fingerprint::approx_record_bytes;
use tracing::debug;

use crate::config::ImportOptions;
use crate::error::{IngestError, Result};
use crate::fetcher::RecordStream;
use crate::types::{DatasetChunk, RawRecord};

/// Number of leading records used to estimate the per-record footprint
pub const SAMPLE_WINDOW: usize = 10;

/// Share of the byte budget the target chunk size aims to fill
pub const FILL_RATIO: f64 = 0.7;

/// Sizing limits for one import
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkBudget {
    pub max_bytes_per_chunk: usize,
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
    /// Stop pulling upstream once this many records were consumed
    pub max_total_records: Option<u64>,
}

impl ChunkBudget {
    pub fn from_options(opts: &ImportOptions) -> Self {
        Self {
            max_bytes_per_chunk: opts.max_memory_bytes,
            min_chunk_size: opts.min_chunk_size,
            max_chunk_size: opts.chunk_size,
            max_total_records: opts.record_ceiling(),
        }
    }
}

/// Target records per chunk for an average record footprint
pub fn target_chunk_size(avg_record_bytes: f64, budget: &ChunkBudget) -> Result<usize> {
    let avg = avg_record_bytes.max(1.0);
    let max_bytes = budget.max_bytes_per_chunk as f64;

    if avg * budget.min_chunk_size as f64 > max_bytes {
        return Err(IngestError::BudgetExceeded(format!(
            "{} records of ~{:.0} bytes do not fit in {} bytes",
            budget.min_chunk_size, avg, budget.max_bytes_per_chunk
        )));
    }

    let raw = (FILL_RATIO * max_bytes / avg).floor() as usize;
    Ok(raw.clamp(budget.min_chunk_size, budget.max_chunk_size))
}

/// Pulls records lazily and hands out chunks in increasing index order
pub struct AdaptiveChunker {
    stream: RecordStream,
    budget: ChunkBudget,
    next_index: u64,
    buffer: Vec<RawRecord>,
    buffer_bytes: usize,
    /// Record that would have overflowed the previous chunk's byte budget
    carry: Option<(RawRecord, usize)>,
    sampled: usize,
    sampled_bytes: usize,
    target: Option<usize>,
    /// Target computed when the sample window filled, applied at the next boundary
    pending_target: Option<usize>,
    consumed: u64,
    resume_offset: u64,
    upstream_done: bool,
}

impl AdaptiveChunker {
    pub fn new(stream: RecordStream, budget: ChunkBudget) -> Self {
        Self {
            stream,
            budget,
            next_index: 0,
            buffer: Vec::new(),
            buffer_bytes: 0,
            carry: None,
            sampled: 0,
            sampled_bytes: 0,
            target: None,
            pending_target: None,
            consumed: 0,
            resume_offset: 0,
            upstream_done: false,
        }
    }

    /// Replace the upstream stream, keeping buffered records and counters.
    ///
    /// The new stream must start at [`AdaptiveChunker::resume_offset`].
    pub fn attach(&mut self, stream: RecordStream) {
        self.stream = stream;
        self.upstream_done = false;
    }

    /// Records pulled from upstream so far
    pub fn records_consumed(&self) -> u64 {
        self.consumed
    }

    /// Upstream offset right after the last pulled record
    pub fn resume_offset(&self) -> u64 {
        self.resume_offset
    }

    /// Index the next emitted chunk will carry
    pub fn next_chunk_index(&self) -> u64 {
        self.next_index
    }

    /// Current target size, `max_chunk_size` until the sample window filled
    pub fn target_size(&self) -> usize {
        self.target.unwrap_or(self.budget.max_chunk_size)
    }

    fn ceiling_reached(&self) -> bool {
        matches!(self.budget.max_total_records, Some(max) if self.consumed >= max)
    }

    /// Add a record to the size sample. The budget is checked once, against
    /// the average of the full window.
    fn observe(&mut self, bytes: usize) -> Result<()> {
        if self.sampled >= SAMPLE_WINDOW {
            return Ok(());
        }
        self.sampled += 1;
        self.sampled_bytes += bytes;

        if self.sampled == SAMPLE_WINDOW {
            self.pending_target = Some(target_chunk_size(self.average(), &self.budget)?);
        }
        Ok(())
    }

    fn average(&self) -> f64 {
        self.sampled_bytes as f64 / self.sampled.max(1) as f64
    }

    fn push(&mut self, record: RawRecord, bytes: usize) {
        self.buffer_bytes += bytes;
        self.buffer.push(record);
    }

    /// Next chunk; `None` once upstream is exhausted and the buffer drained.
    ///
    /// An upstream error is returned as `Some(Err(..))` with the partially
    /// filled buffer kept, so the caller may skip it or re-attach a stream.
    pub async fn next_chunk(&mut self) -> Option<Result<DatasetChunk>> {
        if let Some(target) = self.pending_target.take() {
            self.target = Some(target);
        }

        loop {
            if self.buffer.len() >= self.target_size() {
                break;
            }
            if let Some((record, bytes)) = self.carry.take() {
                self.push(record, bytes);
                continue;
            }
            if self.upstream_done || self.ceiling_reached() {
                self.upstream_done = true;
                break;
            }

            match self.stream.next().await {
                None => {
                    self.upstream_done = true;
                    break;
                },
                Some(Err(e)) => return Some(Err(e)),
                Some(Ok(record)) => {
                    let bytes = approx_record_bytes(&record.value);
                    if bytes > self.budget.max_bytes_per_chunk {
                        return Some(Err(IngestError::BudgetExceeded(format!(
                            "record at offset {} is ~{} bytes, budget is {} bytes",
                            record.offset, bytes, self.budget.max_bytes_per_chunk
                        ))));
                    }

                    self.consumed += 1;
                    self.resume_offset = record.offset + 1;
                    let sampled = self.observe(bytes);

                    let overflow = !self.buffer.is_empty()
                        && self.buffer_bytes + bytes > self.budget.max_bytes_per_chunk;
                    if overflow {
                        self.carry = Some((record, bytes));
                    } else {
                        self.push(record, bytes);
                    }

                    if let Err(e) = sampled {
                        return Some(Err(e));
                    }
                    if overflow {
                        break;
                    }
                },
            }
        }

        if self.buffer.is_empty() {
            return None;
        }
        Some(Ok(self.emit()))
    }

    fn emit(&mut self) -> DatasetChunk {
        let records = std::mem::take(&mut self.buffer);
        let approx_byte_size = std::mem::take(&mut self.buffer_bytes);
        let (records, record_metadata): (Vec<_>, Vec<_>) =
            records.into_iter().map(|r| (r.value, r.metadata)).unzip();

        let chunk_index = self.next_index;
        self.next_index += 1;

        debug!(
            chunk_index,
            records = records.len(),
            approx_byte_size,
            target = self.target_size(),
            "Chunk ready"
        );

        DatasetChunk {
            chunk_index,
            records,
            record_metadata,
            approx_byte_size,
        }
    }

    /// Turn the chunker into a stream of chunks
    pub fn into_stream(self) -> impl Stream<Item = Result<DatasetChunk>> + Send {
        futures::stream::unfold(self, |mut chunker| async move {
            chunker.next_chunk().await.map(|item| (item, chunker))
        })
    }
}

/// Chunk `stream` under `budget`
pub fn chunk(stream: RecordStream, budget: ChunkBudget) -> impl Stream<Item = Result<DatasetChunk>> + Send {
    AdaptiveChunker::new(stream, budget).into_stream()
}
