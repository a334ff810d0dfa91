//! delver - Unpack nested containers and extract recognized assets
//!
//! This tool walks a file or directory tree, opens archives, disk images and
//! compressed streams recursively, and writes recognized payloads to an
//! output directory that mirrors their logical paths.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use delver_core::{CutStrategy, Engine, ExtractStrategy, RunSummary, ScanOptions};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{info, info_span, warn, Level};
use tracing_subscriber::EnvFilter;

/// Unpack nested containers and extract recognized assets
#[derive(Parser, Debug)]
#[command(name = "delver")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// File or directory to scan
    #[arg(env = "DELVER_SOURCE")]
    source: PathBuf,

    /// Output directory
    #[arg(env = "DELVER_DEST")]
    dest: PathBuf,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// What to do with each item
    #[arg(long, value_enum, default_value = "extract", env = "DELVER_STRATEGY")]
    strategy: StrategyKind,

    /// Dry run - don't write files, just report what would be extracted
    #[arg(long, env = "DELVER_DRY_RUN")]
    dry_run: bool,

    /// Maximum nesting depth (0 = unlimited)
    #[arg(long, default_value = "0", env = "DELVER_MAX_DEPTH")]
    max_depth: u32,

    /// Workers for top-level files (default: available cores, 1 = sequential)
    #[arg(short = 'j', long, env = "DELVER_TOP_PARALLELISM")]
    top_parallelism: Option<usize>,

    /// Workers for container entries
    #[arg(long, default_value = "2", env = "DELVER_SUB_PARALLELISM")]
    sub_parallelism: usize,

    /// Try generic decompression even on items with a known handler
    #[arg(long, env = "DELVER_FORCE_RECOVERY")]
    force_recovery: bool,

    /// Also copy recognized-but-unhandled items unmodified
    #[arg(long, env = "DELVER_RAW_PASSTHROUGH")]
    raw_passthrough: bool,

    /// Copy failing items under ~Corrupt/ and ~Exception/
    #[arg(long, env = "DELVER_QUARANTINE")]
    quarantine: bool,

    /// Write the per-item run log (tab-separated) to this file
    #[arg(long, env = "DELVER_LOG")]
    log: Option<PathBuf>,
}

/// Per-item behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StrategyKind {
    /// Unpack containers and extract textures
    Extract,
    /// Cut every item at embedded signatures
    Cut,
}

impl Cli {
    fn options(&self) -> ScanOptions {
        let mut options = ScanOptions::new()
            .dry_run(self.dry_run)
            .max_depth(self.max_depth)
            .sub_parallelism(self.sub_parallelism)
            .force_recovery(self.force_recovery)
            .raw_passthrough(self.raw_passthrough)
            .quarantine(self.quarantine);
        if let Some(workers) = self.top_parallelism {
            options = options.top_parallelism(workers);
        }
        options
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();

    let summary = run(&cli)?;

    if let Some(ref log) = cli.log {
        write_log(log, &summary)?;
        info!("Run log written to {}", log.display());
    }
    println!("{summary}");

    Ok(())
}

fn run(cli: &Cli) -> Result<RunSummary> {
    if !cli.source.exists() {
        bail!("Source does not exist: {}", cli.source.display());
    }
    if cli.dest.is_file() {
        bail!("Destination is a file: {}", cli.dest.display());
    }
    if cli.dry_run {
        warn!("Dry run: nothing will be written");
    }

    let span = info_span!("delver", source = %cli.source.display());
    let builder = Engine::builder(&cli.dest).options(cli.options()).span(span);
    let builder = match cli.strategy {
        StrategyKind::Extract => builder.strategy(ExtractStrategy::new()),
        StrategyKind::Cut => builder.strategy(CutStrategy),
    };
    let engine = builder.build().context("Failed to start worker pools")?;

    info!("Scanning {}", cli.source.display());
    engine
        .run(&cli.source)
        .with_context(|| format!("Failed to scan {}", cli.source.display()))
}

/// Write the tab-separated run log followed by the summary
fn write_log(path: &Path, summary: &RunSummary) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create log file: {}", path.display()))?;
    summary
        .write_log(BufWriter::new(file))
        .with_context(|| format!("Failed to write log file: {}", path.display()))
}
