//! # docshift CLI
//!
//! Migrates the collections of a document store into a relational load
//! script or a live SQLite database, in one transaction.
//!
//! ## Usage
//!
//! ```bash
//! docshift [SOURCE] --config ./config/docshift.toml [--output <path> | --target <db>] [--dry-run]
//! ```
//!
//! ## Exit codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Run committed |
//! | 1 | Run aborted; the error kind is printed on stderr |
//! | 2 | Startup or configuration error |
//!
//! ## Examples
//!
//! ```bash
//! # Write importer.sql from a live MongoDB
//! docshift mongodb://localhost:27017/observatory
//!
//! # Apply a mongoexport dump directly to a SQLite database
//! docshift file:///srv/export --target ./observ.db
//!
//! # Validate every document without writing anything
//! docshift mongodb://localhost:27017/observatory --dry-run --progress json
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use docshift::config;
use docshift::migrate::{run_migration, Destination};
use docshift::progress::ProgressMode;

/// docshift: one-shot, all-or-nothing migration of document collections
/// into a relational database.
#[derive(Parser)]
#[command(
    name = "docshift",
    about = "One-shot migration of document collections into a relational load script",
    version,
    long_about = "docshift reads every document of the configured collections, maps each \
    one into relational rows through declarative rules, and writes a single transactional \
    load script (or applies it to a SQLite database). Any error aborts the whole run."
)]
struct Cli {
    /// Source connection string: `mongodb://host/db`, `file:///export/dir`,
    /// or an export directory.
    ///
    /// Optional when `source.uri` is set in the config file.
    source: Option<String>,

    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/docshift.toml`. Mapping rules, output mode and
    /// source settings are read from this file.
    #[arg(long, default_value = "./config/docshift.toml")]
    config: PathBuf,

    /// Write the load script to this path (overrides `output.script_path`).
    #[arg(long, conflicts_with = "target")]
    output: Option<PathBuf>,

    /// Apply directly to this SQLite database (overrides `output.mode`).
    #[arg(long)]
    target: Option<PathBuf>,

    /// Map and validate every document without writing anything.
    #[arg(long)]
    dry_run: bool,

    /// Progress on stderr: `off`, `human` or `json`. Defaults to `human` on a terminal.
    #[arg(long)]
    progress: Option<ProgressMode>,
}

const EXIT_ABORTED: u8 = 1;
const EXIT_STARTUP: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(EXIT_STARTUP)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let cfg = config::load_config(&cli.config)?;

    let source = match cli.source.or_else(|| cfg.source.uri.clone()) {
        Some(source) => source,
        None => anyhow::bail!("no source given: pass a connection string or set source.uri"),
    };
    let destination = Destination::resolve(&cfg, cli.output, cli.target, cli.dry_run)?;
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);

    let summary = run_migration(&cfg, &source, &destination, progress).await?;

    for warning in &summary.warnings {
        eprintln!("Warning: {}", warning);
    }
    summary.print();

    match &summary.error {
        None => Ok(ExitCode::SUCCESS),
        Some(err) => {
            eprintln!("Error [{}]: {}", err.kind(), err);
            Ok(ExitCode::from(EXIT_ABORTED))
        }
    }
}
