use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use medline_etl::app::fetch_use_case::{FetchSummary, FetchUseCase};
use medline_etl::app::filter_use_case::{FilterReport, FilterUseCase};
use medline_etl::config::{EtlConfig, FetchConfig, FilterConfig};
use medline_etl::infra::http_client::ReqwestHttp;
use medline_etl::logging;

#[derive(Parser)]
#[command(name = "medline_etl")]
#[command(about = "MEDLINE/PubMed baseline loader and venue filter")]
#[command(version)]
struct Cli {
    /// TOML configuration file (defaults to ./medline_etl.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for the JSON log file
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download archives into the cache and build the columnar dataset
    Fetch(FetchArgs),
    /// Filter the dataset by venue allow-list and export a delimited file
    Filter(FilterArgs),
    /// Run fetch and filter sequentially
    Run {
        #[command(flatten)]
        fetch: FetchArgs,
        #[command(flatten)]
        filter: FilterArgs,
    },
}

#[derive(Args, Debug, Default)]
struct FetchArgs {
    /// Archive location (URL, file:// URL or path); repeatable
    #[arg(long = "archive", value_name = "LOCATION")]
    archives: Vec<String>,

    /// File with one archive location per line
    #[arg(long)]
    archive_list: Option<PathBuf>,

    /// Root for the archive cache and the dataset
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Parse workers (defaults to the number of cores)
    #[arg(long)]
    workers: Option<usize>,

    /// Simultaneous downloads
    #[arg(long)]
    download_concurrency: Option<usize>,
}

impl FetchArgs {
    fn apply(self, config: &mut FetchConfig) {
        if !self.archives.is_empty() {
            config.archives = self.archives;
        }
        if self.archive_list.is_some() {
            config.archive_list = self.archive_list;
        }
        if let Some(dir) = self.output_dir {
            config.output_dir = dir;
        }
        if self.workers.is_some() {
            config.num_workers = self.workers;
        }
        if let Some(n) = self.download_concurrency {
            config.download_concurrency = n;
        }
    }
}

#[derive(Args, Debug, Default)]
struct FilterArgs {
    /// Dataset directory (defaults to the one built by fetch)
    #[arg(long)]
    dataset: Option<PathBuf>,

    /// Venue allow-list CSV
    #[arg(long)]
    allow_list: Option<PathBuf>,

    /// Output file
    #[arg(long)]
    output: Option<PathBuf>,

    /// Compare venue names case-insensitively
    #[arg(long)]
    ignore_case: bool,

    /// Allow-list column holding venue names
    #[arg(long)]
    venue_column: Option<String>,

    /// Allow-list has no header row
    #[arg(long)]
    no_header: bool,

    /// Output field delimiter
    #[arg(long)]
    delimiter: Option<char>,

    /// Drop matching records without an abstract
    #[arg(long)]
    require_abstract: bool,
}

impl FilterArgs {
    fn apply(self, config: &mut FilterConfig) {
        if self.dataset.is_some() {
            config.dataset_dir = self.dataset;
        }
        if let Some(path) = self.allow_list {
            config.allow_list = path;
        }
        if let Some(path) = self.output {
            config.output_file = path;
        }
        if self.ignore_case {
            config.case_sensitive = false;
        }
        if self.venue_column.is_some() {
            config.venue_column = self.venue_column;
        }
        if self.no_header {
            config.has_header = false;
        }
        if let Some(delimiter) = self.delimiter {
            config.delimiter = delimiter;
        }
        if self.require_abstract {
            config.require_abstract = true;
        }
    }
}

async fn run_fetch(config: &EtlConfig) -> Result<FetchSummary> {
    let locations = config.fetch.resource_locations()?;
    println!("🔄 Fetching {} archives...", locations.len());

    let http = ReqwestHttp::new(config.fetch.http_timeout_secs)?;
    let use_case = FetchUseCase::from_config(&config.fetch, Arc::new(http))
        .context("failed to open archive cache")?;
    let summary = use_case.run(&locations).await?;
    print_fetch_summary(&summary);
    Ok(summary)
}

fn run_filter(config: &EtlConfig) -> Result<FilterReport> {
    println!("🔎 Filtering dataset by venue...");
    let use_case = FilterUseCase::from_config(config)?;
    let report = use_case.run()?;
    println!("\n📊 Filter Results:");
    println!("   Records scanned: {}", report.scanned);
    println!("   Venue matches: {}", report.matched);
    if use_case.require_abstract {
        println!("   Dropped (no abstract): {}", report.dropped_without_abstract);
    }
    println!("   Exported: {}", report.exported);
    println!("   Output file: {}", report.output.display());
    Ok(report)
}

fn print_fetch_summary(summary: &FetchSummary) {
    let manifest = &summary.build.manifest;
    println!("\n📊 Fetch Results:");
    println!("   Downloaded: {}", summary.fetch.downloaded());
    println!("   From cache: {}", summary.fetch.cached());
    println!("   Records: {}", manifest.total_records);
    println!("   Malformed records skipped: {}", manifest.stats.malformed);
    println!(
        "   Years recovered from MedlineDate: {}",
        manifest.stats.year_from_medline_date
    );
    println!("   Dataset: {}", summary.build.dataset_dir.display());

    if manifest.failed_archives.is_empty() {
        println!("✅ All archives processed");
    } else {
        warn!(
            "{} archives could not be used",
            manifest.failed_archives.len()
        );
        println!("\n⚠️  Archives skipped ({}):", manifest.failed_archives.len());
        for failed in &manifest.failed_archives {
            println!("   - {}: {}", failed.archive, failed.reason);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let mut config = EtlConfig::load(cli.config.as_deref())?;
    if let Some(dir) = cli.log_dir {
        config.logging.log_dir = dir;
    }
    let _guard = logging::init_logging(&config.logging.log_dir, &config.logging.log_file)
        .context("failed to initialise logging")?;

    let result = match cli.command {
        Commands::Fetch(args) => {
            args.apply(&mut config.fetch);
            config.validate()?;
            run_fetch(&config).await.map(|_| ())
        }
        Commands::Filter(args) => {
            args.apply(&mut config.filter);
            config.validate()?;
            run_filter(&config).map(|_| ())
        }
        Commands::Run { fetch, filter } => {
            fetch.apply(&mut config.fetch);
            filter.apply(&mut config.filter);
            config.validate()?;
            // Validate stage two inputs before spending time on stage one
            if !config.filter.allow_list.is_file() {
                anyhow::bail!(
                    "venue allow-list not found at {}",
                    config.filter.allow_list.display()
                );
            }
            run_fetch(&config)
                .await
                .and_then(|_| run_filter(&config))
                .map(|_| ())
        }
    };

    match &result {
        Ok(()) => info!("done"),
        Err(e) => {
            error!("{:#}", e);
            println!("❌ {:#}", e);
        }
    }
    result
}
