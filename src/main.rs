use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use m3u8_batch_downloader::core::batch::{jobs_from_page_index, jobs_from_playlist, BatchRunner};
use m3u8_batch_downloader::core::config::{AppConfig, BackendMode, OverwritePolicy};
use m3u8_batch_downloader::core::orchestrator::{DownloadOrchestrator, LinkSource};
use m3u8_batch_downloader::core::observer::TracingObserver;
use m3u8_batch_downloader::parsers::csv_parser::{read_page_index, read_playlist};
use m3u8_batch_downloader::utils::logging::init_tracing;
use m3u8_batch_downloader::{BatchJob, BatchSummary, NAME, VERSION};

/// Resumable batch downloader for segmented m3u8 videos.
#[derive(Debug, Parser)]
#[command(name = "m3u8-dl", version)]
#[command(about = "Resumable batch downloader for m3u8 videos", long_about = None)]
struct Cli {
    /// Configuration file; defaults to the per-user config location.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Backend: `aio` (segment pipeline) or `ff` (external transcoder).
    #[arg(long, global = true)]
    mode: Option<BackendMode>,

    /// Segments downloaded at the same time.
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Attempts per resource.
    #[arg(long, global = true)]
    retries: Option<usize>,

    /// Replace existing output files instead of skipping them.
    #[arg(long, global = true)]
    overwrite: bool,

    /// Log to stderr instead of the log directory.
    #[arg(long, global = true)]
    stderr: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download a single video.
    Get {
        /// Player page URL, or manifest URL with --direct.
        url: String,

        /// Output name without extension.
        name: String,

        /// Treat URL as the manifest itself.
        #[arg(long)]
        direct: bool,
    },

    /// Download every row of a page index CSV (`name,_,link`).
    Batch {
        csv: PathBuf,

        /// Prefix of the relative links in the CSV.
        #[arg(long)]
        site_base: Option<String>,

        /// Resume point overriding the stored one.
        #[arg(long)]
        current: Option<String>,

        /// Keys never processed. May be repeated.
        #[arg(long = "skip")]
        skip: Vec<String>,
    },

    /// Download every row of a playlist CSV export.
    Playlist {
        csv: PathBuf,

        /// Prefix of manifest locations, e.g. `http://host/vedio/`.
        #[arg(long)]
        base: Option<String>,

        #[arg(long)]
        current: Option<String>,

        #[arg(long = "skip")]
        skip: Vec<String>,
    },

    /// Print the effective configuration and where it is stored.
    Config,
}

impl Cli {
    fn load_config(&self) -> Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::load_from(path)?,
            None => AppConfig::load()?,
        };
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(concurrency) = self.concurrency {
            config.download.concurrency = concurrency;
        }
        if let Some(retries) = self.retries {
            config.download.retry_attempts = retries;
        }
        if self.overwrite {
            config.download.overwrite = OverwritePolicy::Overwrite;
        }
        Ok(config)
    }
}

fn apply_ledger_overrides(config: &mut AppConfig, current: Option<String>, skip: Vec<String>) {
    if current.is_some() {
        config.ledger.current = current;
    }
    config.ledger.skip_keys.extend(skip);
}

fn print_summary(summary: &BatchSummary) {
    println!(
        "{} jobs: {} downloaded, {} failed, {} skipped, {} done earlier ({}s)",
        summary.total,
        summary.succeeded,
        summary.failed,
        summary.skipped,
        summary.resumed,
        summary.elapsed().num_seconds()
    );
    for key in &summary.failed_keys {
        println!("  failed: {key}");
    }
}

async fn run_batch(config: &AppConfig, source: LinkSource, mut jobs: Vec<BatchJob>) -> Result<()> {
    let orchestrator = DownloadOrchestrator::from_config(config, source, TracingObserver::shared())?;
    let runner = BatchRunner::new(Arc::new(orchestrator), config.ledger.clone());
    let summary = runner.run(&mut jobs).await?;
    print_summary(&summary);
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = cli.load_config()?;
    let log_dir = (!cli.stderr).then(|| config.paths.log_dir.clone());
    init_tracing(log_dir.as_deref());
    tracing::info!("{} v{} starting ({:?} mode)", NAME, VERSION, config.mode);

    match cli.command {
        Command::Get { url, name, direct } => {
            config.validate()?;
            let source = if direct { LinkSource::Direct } else { LinkSource::Page };
            let orchestrator =
                DownloadOrchestrator::from_config(&config, source, TracingObserver::shared())?;
            let (output, downloaded) = orchestrator.download_one(&url, &name).await?;
            if downloaded {
                println!("Downloaded {}", output.display());
            } else {
                println!("Skipped, {} already exists", output.display());
            }
        }
        Command::Batch {
            csv,
            site_base,
            current,
            skip,
        } => {
            apply_ledger_overrides(&mut config, current, skip);
            config.validate()?;
            let site_base = site_base.unwrap_or_else(|| config.download.site_base.clone());
            let rows = read_page_index(&csv)?;
            run_batch(&config, LinkSource::Page, jobs_from_page_index(&rows, &site_base)).await?;
        }
        Command::Playlist {
            csv,
            base,
            current,
            skip,
        } => {
            apply_ledger_overrides(&mut config, current, skip);
            config.validate()?;
            let base = base.unwrap_or_else(|| config.download.playlist_base.clone());
            if base.is_empty() {
                anyhow::bail!("a manifest base is required: pass --base or set download.playlist_base");
            }
            let rows = read_playlist(&csv)?;
            run_batch(&config, LinkSource::Direct, jobs_from_playlist(&rows, &base)).await?;
        }
        Command::Config => {
            let path = match &cli.config {
                Some(path) => path.clone(),
                None => AppConfig::get_config_path()?,
            };
            println!("# {}", path.display());
            println!("{}", config.export().context("Failed to render configuration")?);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        tracing::error!("{:#}", err);
        eprintln!("m3u8-dl error: {:#}", err);
        std::process::exit(1);
    }
}
