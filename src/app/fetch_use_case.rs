use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::app::ports::HttpClientPort;
use crate::config::FetchConfig;
use crate::error::{EtlError, Result};
use crate::pipeline::ingestion::archive_cache::{ArchiveCache, FetchReport};
use crate::pipeline::storage::builder::{BuildReport, DatasetBuilder};
use crate::pipeline::storage::dataset::FailedArchive;

/// Stage one: make archives available locally, then build the dataset from them.
pub struct FetchUseCase {
    cache: ArchiveCache,
    builder: DatasetBuilder,
    dataset_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct FetchSummary {
    pub fetch: FetchReport,
    pub build: BuildReport,
}

impl FetchUseCase {
    pub fn new(cache: ArchiveCache, builder: DatasetBuilder, dataset_dir: PathBuf) -> Self {
        Self {
            cache,
            builder,
            dataset_dir,
        }
    }

    pub fn from_config(config: &FetchConfig, http: Arc<dyn HttpClientPort>) -> Result<Self> {
        let cache = ArchiveCache::open(config.cache_dir(), http, config.download_concurrency)?;
        let builder = DatasetBuilder::new(config.workers(), config.row_group_size);
        Ok(Self::new(cache, builder, config.dataset_dir()))
    }

    #[instrument(name = "fetch", skip_all, fields(archives = locations.len()))]
    pub async fn run(&self, locations: &[String]) -> Result<FetchSummary> {
        info!(
            archives = locations.len(),
            cache = %self.cache.cache_dir().display(),
            "fetching archives"
        );
        let fetch = self.cache.fetch_all(locations).await;
        let failed: Vec<FailedArchive> = fetch
            .failures()
            .into_iter()
            .map(|(location, reason)| {
                warn!(location, reason, "archive skipped");
                FailedArchive {
                    archive: location.to_string(),
                    reason: reason.to_string(),
                }
            })
            .collect();

        let available = fetch.available();
        if available.is_empty() && !locations.is_empty() {
            // Keep the previous dataset rather than replacing it with an empty one
            return Err(EtlError::archive(
                "all",
                format!(
                    "none of {} archives could be fetched; dataset left unchanged",
                    locations.len()
                ),
            ));
        }
        info!(
            downloaded = fetch.downloaded(),
            cached = fetch.cached(),
            failed = failed.len(),
            bytes = fetch.bytes_downloaded(),
            "archives ready"
        );

        let builder = self.builder;
        let dataset_dir = self.dataset_dir.clone();
        let build = tokio::task::spawn_blocking(move || {
            builder.build(&available, failed, &dataset_dir)
        })
        .await
        .map_err(|e| EtlError::Io(std::io::Error::other(e)))??;

        Ok(FetchSummary { fetch, build })
    }
}
