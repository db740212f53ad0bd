use anyhow::{Context, Result};
use clap::Parser;
use std::collections::BTreeMap;
use std::path::PathBuf;

use medline_etl::config::EtlConfig;
use medline_etl::pipeline::storage::dataset::DatasetReader;

#[derive(Parser)]
#[command(name = "inspect-dataset")]
#[command(about = "Summarise a MEDLINE dataset and its publication date coverage")]
struct Cli {
    /// Dataset directory (defaults to the one configured for fetch)
    dataset: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Also print record counts per decade
    #[arg(long)]
    decades: bool,
}

#[derive(Default)]
struct Coverage {
    with_year: u64,
    free_text_only: u64,
    no_date: u64,
    with_abstract: u64,
    by_decade: BTreeMap<i32, u64>,
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let dataset_dir = match cli.dataset {
        Some(dir) => dir,
        None => EtlConfig::load(cli.config.as_deref())?.fetch.dataset_dir(),
    };

    let reader = DatasetReader::open(&dataset_dir)
        .with_context(|| format!("cannot open dataset at {}", dataset_dir.display()))?;
    let manifest = reader.manifest();

    println!("📦 Dataset: {}", dataset_dir.display());
    println!("   Schema version: {}", manifest.schema_version);
    println!("   Parts: {}", manifest.parts.len());
    println!("   Records: {}", manifest.total_records);
    println!("   Malformed records skipped: {}", manifest.stats.malformed);
    for part in manifest.parts.iter().filter(|p| p.truncated.is_some()) {
        println!("   ⚠️  {} ended early: {}", part.archive, part.truncated.as_deref().unwrap_or(""));
    }
    for failed in &manifest.failed_archives {
        println!("   ❌ {}: {}", failed.archive, failed.reason);
    }

    let mut coverage = Coverage::default();
    reader.scan(|record| {
        match (record.year, record.medline_date.as_deref()) {
            (Some(year), _) => {
                coverage.with_year += 1;
                *coverage.by_decade.entry(year - year.rem_euclid(10)).or_default() += 1;
            }
            (None, Some(_)) => coverage.free_text_only += 1,
            (None, None) => coverage.no_date += 1,
        }
        if record.has_abstract() {
            coverage.with_abstract += 1;
        }
        Ok(())
    })?;

    println!("\n📅 Date coverage:");
    println!("   With year: {}", coverage.with_year);
    println!("   Free-text date only: {}", coverage.free_text_only);
    println!("   No date: {}", coverage.no_date);
    println!("   With abstract: {}", coverage.with_abstract);

    if cli.decades {
        println!("\n   Records per decade:");
        for (decade, count) in &coverage.by_decade {
            println!("   {}s: {}", decade, count);
        }
    }
    Ok(())
}
