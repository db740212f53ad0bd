use flate2::read::MultiGzDecoder;
use rayon::prelude::*;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::dataset::{part_file_name, write_part, DatasetManifest, FailedArchive, PartInfo};
use crate::error::{EtlError, Result};
use crate::metrics;
use crate::pipeline::ingestion::archive_cache::CachedArchive;
use crate::pipeline::processing::parser::MedlineParser;

#[derive(Debug, Clone)]
pub struct BuildReport {
    pub dataset_dir: PathBuf,
    pub manifest: DatasetManifest,
    pub elapsed: Duration,
}

/// Parses cached archives on a fixed-size worker pool and writes the dataset.
#[derive(Debug, Clone, Copy)]
pub struct DatasetBuilder {
    workers: usize,
    row_group_size: usize,
}

impl DatasetBuilder {
    pub fn new(workers: usize, row_group_size: usize) -> Self {
        Self {
            workers: workers.max(1),
            row_group_size: row_group_size.max(1),
        }
    }

    /// Build the dataset at `dataset_dir`, replacing any previous one only once
    /// the new one is complete. `earlier_failures` (archives that never reached
    /// the cache) are carried into the manifest.
    pub fn build(
        &self,
        archives: &[CachedArchive],
        earlier_failures: Vec<FailedArchive>,
        dataset_dir: &Path,
    ) -> Result<BuildReport> {
        let started = Instant::now();
        let staging = staging_dir(dataset_dir)?;
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("medline-parse-{}", i))
            .build()
            .map_err(|e| EtlError::Config(format!("cannot start worker pool: {}", e)))?;
        info!(
            workers = self.workers,
            archives = archives.len(),
            "building dataset"
        );

        let results: Vec<Result<std::result::Result<PartInfo, FailedArchive>>> =
            pool.install(|| {
                archives
                    .par_iter()
                    .map(|archive| self.build_part(archive, &staging))
                    .collect()
            });

        let mut parts = Vec::new();
        let mut failed = earlier_failures;
        for result in results {
            match result? {
                Ok(part) => parts.push(part),
                Err(failure) => failed.push(failure),
            }
        }

        let manifest = DatasetManifest::new(parts, failed);
        manifest.write(&staging)?;
        replace_dir(&staging, dataset_dir)?;

        let elapsed = started.elapsed();
        info!(
            records = manifest.total_records,
            parts = manifest.parts.len(),
            failed = manifest.failed_archives.len(),
            malformed = manifest.stats.malformed,
            elapsed_ms = elapsed.as_millis() as u64,
            "dataset ready"
        );
        Ok(BuildReport {
            dataset_dir: dataset_dir.to_path_buf(),
            manifest,
            elapsed,
        })
    }

    /// Outer error: the part could not be written. Inner error: the archive
    /// could not be opened and is reported instead of aborting the build.
    fn build_part(
        &self,
        archive: &CachedArchive,
        staging: &Path,
    ) -> Result<std::result::Result<PartInfo, FailedArchive>> {
        let span = tracing::info_span!("parse_archive", archive = %archive.name);
        let _enter = span.enter();
        let started = Instant::now();

        let input = match open_archive(&archive.path) {
            Ok(input) => input,
            Err(e) => {
                warn!(path = %archive.path.display(), error = %e, "archive unreadable");
                metrics::parse::archive_unreadable();
                return Ok(Err(FailedArchive {
                    archive: archive.name.clone(),
                    reason: e.to_string(),
                }));
            }
        };

        let outcome = MedlineParser::new(archive.name.clone()).parse_reader(input);
        let file = part_file_name(&archive.name);
        let records = write_part(&staging.join(&file), &outcome.records, self.row_group_size)?;

        metrics::parse::archive_parsed(&outcome.stats);
        metrics::parse::duration(started.elapsed().as_secs_f64());
        info!(
            records,
            malformed = outcome.stats.malformed,
            truncated = outcome.truncated.is_some(),
            "archive parsed"
        );
        Ok(Ok(PartInfo {
            archive: archive.name.clone(),
            file,
            records,
            stats: outcome.stats,
            truncated: outcome.truncated,
        }))
    }
}

fn open_archive(path: &Path) -> std::io::Result<Box<dyn BufRead>> {
    let file = File::open(path)?;
    let is_gzip = path.extension().is_some_and(|ext| ext == "gz");
    if is_gzip {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(BufReader::new(
            file,
        )))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// `<dataset>.staging`, next to the dataset so the final rename stays on one filesystem.
fn staging_dir(dataset_dir: &Path) -> Result<PathBuf> {
    let name = dataset_dir.file_name().ok_or_else(|| {
        EtlError::Config(format!(
            "dataset directory {} has no final component",
            dataset_dir.display()
        ))
    })?;
    let mut staging = name.to_os_string();
    staging.push(".staging");
    Ok(dataset_dir.with_file_name(staging))
}

fn replace_dir(staging: &Path, dataset_dir: &Path) -> Result<()> {
    if let Some(parent) = dataset_dir.parent() {
        fs::create_dir_all(parent)?;
    }
    if dataset_dir.exists() {
        fs::remove_dir_all(dataset_dir)?;
    }
    fs::rename(staging, dataset_dir)?;
    Ok(())
}
