//! `rtds-ingest` command line
//!
//! A thin collaborator over the library: it wires the configured durable
//! store and the built-in dataset catalog, then runs one command.

pub mod progress;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::info;

use crate::config::{ImportOptions, ImportSettings};
use crate::fetcher::{catalog::builtin_fetcher, DatasetFetcher, RowsApiProvider};
use crate::orchestrator::{ImportOrchestrator, OrchestratorConfig};
use crate::retrieval::{DatasetStatistics, PageResponse, SourcePreference, SourceStats};
use crate::storage::{SessionRegistry, SqliteRecordStore};
use crate::types::{Destination, DestinationSet, ImportJob, JobStatus};
use crate::writer::DualStoreWriter;
use progress::{format_count, ImportProgress};

#[derive(Parser, Debug)]
#[command(name = "rtds-ingest")]
#[command(author, version, about = "Red-team dataset import tool")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Import a dataset into the session and durable stores
    Import(ImportArgs),

    /// Print one page of an imported dataset
    Page {
        /// Dataset type
        dataset_type: String,

        /// Owner the records belong to
        #[arg(long, env = "RTDS_OWNER")]
        owner: String,

        #[arg(long, default_value_t = 0)]
        offset: u64,

        #[arg(long, default_value_t = 20)]
        limit: u64,

        /// Store to read: auto, ephemeral or durable
        #[arg(long, default_value = "auto")]
        source: SourcePreference,
    },

    /// Show per-store record counts
    Stats {
        /// Dataset type
        dataset_type: String,

        #[arg(long, env = "RTDS_OWNER")]
        owner: String,
    },

    /// List registered dataset types
    Datasets,
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Dataset type, see `rtds-ingest datasets`
    pub dataset_type: String,

    /// Owner the import runs for
    #[arg(long, env = "RTDS_OWNER")]
    pub owner: String,

    /// Dataset config entry; values are parsed as JSON, else kept as strings
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub set: Vec<(String, Value)>,

    /// Stop after this many records (default: no limit)
    #[arg(long)]
    pub max_records: Option<u64>,

    /// Upper bound for adaptive chunk sizing
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Keep going after failed chunks
    #[arg(long)]
    pub partial: bool,

    /// Delete written records if the import fails or is cancelled
    #[arg(long)]
    pub cleanup: bool,

    /// Write to the session store only
    #[arg(long, conflicts_with = "durable_only")]
    pub ephemeral_only: bool,

    /// Write to the durable store only
    #[arg(long)]
    pub durable_only: bool,
}

impl ImportArgs {
    /// Job options: settings first, then flags
    pub fn options(&self, settings: &ImportSettings) -> ImportOptions {
        let mut opts = settings.import_options();
        if let Some(size) = self.chunk_size {
            opts = opts.with_chunk_size(size);
        }
        if let Some(max) = self.max_records {
            opts = opts.with_max_import_size(max);
        }
        if self.partial {
            opts = opts.with_partial_import(true);
        }
        if self.cleanup {
            opts = opts.with_cleanup_on_failure(true);
        }
        if self.ephemeral_only {
            opts = opts.with_destinations(DestinationSet::only(Destination::Ephemeral));
        } else if self.durable_only {
            opts = opts.with_destinations(DestinationSet::only(Destination::Durable));
        }
        opts
    }

    pub fn dataset_config(&self) -> Map<String, Value> {
        self.set.iter().cloned().collect()
    }
}

/// Parse `key=value`, reading the value as JSON when possible
pub fn parse_key_value(raw: &str) -> std::result::Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{}'", raw));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn dataset_fetcher(settings: &ImportSettings) -> Result<DatasetFetcher> {
    let provider = RowsApiProvider::new(&settings.provider).context("Failed to build HTTP client")?;
    Ok(builtin_fetcher(Arc::new(provider)))
}

async fn orchestrator(settings: &ImportSettings) -> Result<ImportOrchestrator> {
    let durable = SqliteRecordStore::connect(&settings.database_url)
        .await
        .with_context(|| format!("Failed to open durable store at {}", settings.database_url))?;
    let writer = DualStoreWriter::new(Arc::new(SessionRegistry::new()), Arc::new(durable));

    Ok(ImportOrchestrator::new(
        Arc::new(dataset_fetcher(settings)?),
        Arc::new(writer),
        OrchestratorConfig::from(settings),
    ))
}

/// Run a parsed command
pub async fn run(cli: Cli, settings: ImportSettings) -> Result<()> {
    match cli.command {
        Command::Import(args) => import(args, &settings).await,
        Command::Page {
            dataset_type,
            owner,
            offset,
            limit,
            source,
        } => {
            let orchestrator = orchestrator(&settings).await?;
            let response = orchestrator
                .retrieval()
                .get_page(&owner, &dataset_type, offset, limit, source)
                .await?;
            print_page(&dataset_type, &response);
            Ok(())
        },
        Command::Stats {
            dataset_type,
            owner,
        } => {
            let orchestrator = orchestrator(&settings).await?;
            let stats = orchestrator
                .retrieval()
                .get_statistics(&owner, &dataset_type)
                .await?;
            print_statistics(&dataset_type, &stats);
            Ok(())
        },
        Command::Datasets => {
            print_datasets(&dataset_fetcher(&settings)?);
            Ok(())
        },
    }
}

async fn import(args: ImportArgs, settings: &ImportSettings) -> Result<()> {
    let orchestrator = orchestrator(settings).await?;
    let job_id = orchestrator
        .start_import(
            &args.dataset_type,
            args.dataset_config(),
            &args.owner,
            args.options(settings),
        )
        .await?;
    info!(%job_id, dataset_type = %args.dataset_type, "Import submitted");

    let mut subscription = orchestrator.subscribe_progress(job_id).await?;
    let mut progress = ImportProgress::new(&format!("Importing {}", args.dataset_type))?;
    let mut cancel_requested = false;

    loop {
        tokio::select! {
            event = subscription.recv() => match event {
                Some(event) => progress.update(&event)?,
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !cancel_requested => {
                cancel_requested = true;
                progress.set_message("Cancelling after the current chunk");
                orchestrator.cancel_import(job_id).await?;
            },
        }
    }

    let job = orchestrator.wait_for_job(job_id).await?;
    progress.finish();
    print_job(&job);
    orchestrator.shutdown().await;

    if job.status == JobStatus::Failed {
        anyhow::bail!("Import {} failed", job_id);
    }
    Ok(())
}

fn status_label(status: JobStatus) -> String {
    match status {
        JobStatus::Completed => status.as_str().green().bold().to_string(),
        JobStatus::PartiallyCompleted => status.as_str().yellow().bold().to_string(),
        JobStatus::Failed => status.as_str().red().bold().to_string(),
        _ => status.as_str().to_string(),
    }
}

fn print_job(job: &ImportJob) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS);

    table.add_row(vec!["Job".to_string(), job.id.to_string()]);
    table.add_row(vec!["Dataset".to_string(), job.dataset_type.clone()]);
    table.add_row(vec!["Owner".to_string(), job.owner.to_string()]);
    table.add_row(vec!["Status".to_string(), status_label(job.status)]);
    table.add_row(vec![
        "Processed".to_string(),
        match job.estimated_total {
            Some(total) => format!("{} / {}", format_count(job.processed_count), format_count(total)),
            None => format_count(job.processed_count),
        },
    ]);
    table.add_row(vec!["Chunks".to_string(), format_count(job.chunks_processed)]);
    table.add_row(vec!["Session store".to_string(), format_count(job.ephemeral_written)]);
    table.add_row(vec!["Durable store".to_string(), format_count(job.durable_written)]);
    println!("{}", table);

    if !job.error_log.is_empty() {
        println!();
        println!("{}", "Errors:".red().bold());
        for entry in &job.error_log {
            let chunk = entry
                .chunk_index
                .map(|c| format!("chunk {}", c))
                .unwrap_or_else(|| "open".to_string());
            let destination = entry
                .destination
                .map(|d| format!(" {}", d))
                .unwrap_or_default();
            println!(
                "  [{}{}] {} (attempts: {}): {}",
                chunk, destination, entry.kind, entry.attempt, entry.message
            );
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max.saturating_sub(3)).collect::<String>())
    }
}

fn print_page(dataset_type: &str, response: &PageResponse) {
    let page = &response.page;
    println!(
        "{} {} from {} store ({} of {})",
        "Dataset:".cyan().bold(),
        dataset_type,
        response.source,
        page.records.len(),
        format_count(page.total)
    );

    if page.records.is_empty() {
        println!("No records at offset {}.", page.offset);
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["#", "Chunk", "Record", "Fingerprint", "Value"]);

    for (i, record) in page.records.iter().enumerate() {
        table.add_row(vec![
            (page.offset + i as u64).to_string(),
            record.chunk_index.to_string(),
            record.record_index.to_string(),
            record.fingerprint.chars().take(12).collect(),
            truncate(&record.value.to_string(), 80),
        ]);
    }
    println!("{}", table);

    if page.has_more() {
        println!(
            "Next page: --offset {}",
            page.offset + page.records.len() as u64
        );
    }
}

fn stats_row(name: &str, stats: &SourceStats) -> Vec<String> {
    vec![
        name.to_string(),
        if stats.available { "yes" } else { "no" }.to_string(),
        format_count(stats.total_records),
        stats
            .last_updated
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string()),
        stats.error.clone().unwrap_or_else(|| "-".to_string()),
    ]
}

fn print_statistics(dataset_type: &str, stats: &DatasetStatistics) {
    println!("{} {}", "Dataset:".cyan().bold(), dataset_type);

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Store", "Available", "Records", "Last updated", "Error"]);
    table.add_row(stats_row("session", &stats.ephemeral));
    table.add_row(stats_row("durable", &stats.durable));
    println!("{}", table);
    println!("Reads are served from: {}", stats.preferred_source());
}

fn print_datasets(fetcher: &DatasetFetcher) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Type", "Provider", "Description", "Config keys"]);

    for definition in fetcher.definitions() {
        let keys = definition
            .schema
            .fields()
            .iter()
            .map(|f| {
                if f.required {
                    format!("{}*", f.name)
                } else {
                    f.name.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row(vec![
            definition.dataset_type.clone(),
            definition.provider.name().to_string(),
            definition.description.clone(),
            keys,
        ]);
    }
    println!("{}", table);
}
