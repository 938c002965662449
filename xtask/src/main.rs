//! Build automation tasks for RTDS
//!
//! - Generating the `rtds-ingest` CLI reference from the clap definitions

use clap::Parser;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build automation tasks for RTDS", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser)]
enum Command {
    /// Generate the CLI reference in markdown
    GenerateCliDocs {
        /// Output directory for generated documentation
        #[arg(short, long, default_value = "docs")]
        output_dir: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::GenerateCliDocs { output_dir } => generate_cli_docs(&output_dir)?,
    }

    Ok(())
}

fn generate_cli_docs(output_dir: &str) -> anyhow::Result<()> {
    println!("Generating CLI documentation...");

    let markdown = clap_markdown::help_markdown::<rtds_ingest::cli::Cli>();

    let content = format!(
        r#"# rtds-ingest CLI Reference

This documentation is generated from the CLI source code. Last updated: {}.

## Overview

`rtds-ingest` imports adversarial benchmark datasets from a dataset-server rows API into
a per-owner session store and a durable SQLite store, and reads them back.

## Quick Start

```bash
# List the built-in dataset types
rtds-ingest datasets

# Import AdvBench for one owner, showing progress
rtds-ingest import advbench --owner alice

# Import a subset of another dataset, tolerating failed chunks
rtds-ingest import rows_api --owner alice --set dataset=LibrAI/do-not-answer --max-records 500 --partial

# Read records back and inspect both stores
rtds-ingest page advbench --owner alice --limit 10
rtds-ingest stats advbench --owner alice
```

## Commands

{}

## Environment Variables

- `RTDS_OWNER` - Default owner for `import`, `page` and `stats`
- `IMPORT_DATABASE_URL` - Durable store (default: `sqlite://rtds.db`)
- `IMPORT_PROVIDER_BASE_URL` - Rows API base URL
- `IMPORT_PROVIDER_TOKEN` - Bearer token for gated datasets
- `IMPORT_CHUNK_SIZE`, `IMPORT_MAX_SIZE`, `IMPORT_MAX_MEMORY_MB` - Chunking and record ceiling
- `IMPORT_MAX_RETRIES`, `IMPORT_RETRY_BASE_DELAY_MS` - Retry policy
- `IMPORT_ENABLE_PARTIAL`, `IMPORT_CLEANUP_ON_FAILURE` - Failure handling
- `LOG_LEVEL`, `LOG_OUTPUT`, `LOG_FORMAT`, `LOG_DIR` - Logging

---

*To update, run `cargo xtask generate-cli-docs`.*
"#,
        chrono::Utc::now().format("%Y-%m-%d"),
        markdown
    );

    let output_path = PathBuf::from(output_dir);
    fs::create_dir_all(&output_path)?;

    let file_path = output_path.join("cli-reference.md");
    fs::write(&file_path, content)?;

    println!("Generated CLI documentation at: {}", file_path.display());

    Ok(())
}
