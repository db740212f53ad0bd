//! Local cache of raw archives.
//!
//! Each resource location maps to one file in the cache directory, named after
//! the last segment of the location. A SQLite manifest remembers the SHA-256 of
//! every file the cache wrote, so a later run can tell a complete archive from
//! a damaged one without refetching it.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn, Instrument};

use super::cache_meta::{CacheEntry, CacheMeta};
use crate::app::ports::HttpClientPort;
use crate::error::{EtlError, Result};
use crate::metrics;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// An archive that is present and verified in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedArchive {
    pub location: String,
    /// File name inside the cache directory, also used as `source_archive`.
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Cached(CachedArchive),
    Downloaded { archive: CachedArchive, bytes: u64 },
    Failed { location: String, reason: String },
}

impl FetchOutcome {
    pub fn archive(&self) -> Option<&CachedArchive> {
        match self {
            FetchOutcome::Cached(archive) | FetchOutcome::Downloaded { archive, .. } => {
                Some(archive)
            }
            FetchOutcome::Failed { .. } => None,
        }
    }

    fn failed(location: &str, reason: impl ToString) -> Self {
        FetchOutcome::Failed {
            location: location.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Outcomes in the same order as the requested locations.
#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    pub outcomes: Vec<FetchOutcome>,
}

impl FetchReport {
    pub fn available(&self) -> Vec<CachedArchive> {
        self.outcomes
            .iter()
            .filter_map(|o| o.archive().cloned())
            .collect()
    }

    pub fn failures(&self) -> Vec<(&str, &str)> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                FetchOutcome::Failed { location, reason } => {
                    Some((location.as_str(), reason.as_str()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn downloaded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, FetchOutcome::Downloaded { .. }))
            .count()
    }

    pub fn cached(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, FetchOutcome::Cached(_)))
            .count()
    }

    pub fn bytes_downloaded(&self) -> u64 {
        self.outcomes
            .iter()
            .map(|o| match o {
                FetchOutcome::Downloaded { bytes, .. } => *bytes,
                _ => 0,
            })
            .sum()
    }
}

#[derive(Clone)]
pub struct ArchiveCache {
    cache_dir: PathBuf,
    http: Arc<dyn HttpClientPort>,
    meta: Arc<Mutex<CacheMeta>>,
    concurrency: usize,
}

impl ArchiveCache {
    pub fn open(
        cache_dir: impl Into<PathBuf>,
        http: Arc<dyn HttpClientPort>,
        concurrency: usize,
    ) -> Result<Self> {
        let cache_dir = cache_dir.into();
        let meta = CacheMeta::open_at_root(&cache_dir)?;
        let entries = meta.len()?;
        debug!(cache_dir = %cache_dir.display(), entries, "archive cache opened");
        Ok(Self {
            cache_dir,
            http,
            meta: Arc::new(Mutex::new(meta)),
            concurrency: concurrency.max(1),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Make every location available locally. A failed location never aborts
    /// the others; it is reported as `FetchOutcome::Failed`.
    pub async fn fetch_all(&self, locations: &[String]) -> FetchReport {
        let mut slots: Vec<Option<FetchOutcome>> = vec![None; locations.len()];
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut owners: HashMap<String, &str> = HashMap::new();

        for (idx, location) in locations.iter().enumerate() {
            let name = match archive_name(location) {
                Ok(name) => name,
                Err(e) => {
                    slots[idx] = Some(FetchOutcome::failed(location, e));
                    continue;
                }
            };
            if let Some(owner) = owners.get(&name) {
                slots[idx] = Some(FetchOutcome::failed(
                    location,
                    format!("cache file name {} already used by {}", name, owner),
                ));
                continue;
            }
            owners.insert(name.clone(), location);

            let cache = self.clone();
            let semaphore = semaphore.clone();
            let location = location.clone();
            let span = tracing::info_span!("fetch_archive", archive = %name);
            tasks.spawn(
                async move {
                    let outcome = match semaphore.acquire_owned().await {
                        Ok(_permit) => cache.fetch_one(&location, &name).await,
                        Err(e) => FetchOutcome::failed(&location, e),
                    };
                    (idx, outcome)
                }
                .instrument(span),
            );
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, outcome)) => slots[idx] = Some(outcome),
                Err(e) => warn!(error = %e, "fetch task aborted"),
            }
        }

        let outcomes = slots
            .into_iter()
            .zip(locations)
            .map(|(slot, location)| {
                slot.unwrap_or_else(|| FetchOutcome::failed(location, "fetch task aborted"))
            })
            .collect();
        FetchReport { outcomes }
    }

    async fn fetch_one(&self, location: &str, name: &str) -> FetchOutcome {
        let dest = self.cache_dir.join(name);

        match self.check_cached(location, name, &dest).await {
            Ok(true) => {
                debug!(location, "cache hit");
                metrics::fetch::archive_cached();
                return FetchOutcome::Cached(self.cached(location, name, dest));
            }
            Ok(false) => {}
            Err(e) => {
                metrics::fetch::archive_failed();
                return FetchOutcome::failed(location, e);
            }
        }

        match self.download(location, name, &dest).await {
            Ok(bytes) => {
                info!(location, bytes, "archive stored");
                metrics::fetch::archive_downloaded(bytes);
                FetchOutcome::Downloaded {
                    archive: self.cached(location, name, dest),
                    bytes,
                }
            }
            Err(e) => {
                warn!(location, error = %e, "archive unavailable");
                metrics::fetch::archive_failed();
                FetchOutcome::failed(location, e)
            }
        }
    }

    fn cached(&self, location: &str, name: &str, path: PathBuf) -> CachedArchive {
        CachedArchive {
            location: location.to_string(),
            name: name.to_string(),
            path,
        }
    }

    /// True when `dest` holds a complete copy of `location`. Damaged or
    /// mismatching files are removed so the caller refetches.
    async fn check_cached(&self, location: &str, name: &str, dest: &Path) -> Result<bool> {
        if !dest.is_file() {
            return Ok(false);
        }
        let entry = self.with_meta(|meta| meta.get(location))?;
        let digest = hash_file(dest.to_path_buf()).await?;

        match entry {
            Some(entry) if entry.sha256 == digest.sha256 => Ok(true),
            Some(entry) => {
                warn!(
                    location,
                    expected = %entry.sha256,
                    found = %digest.sha256,
                    "cached archive checksum mismatch, refetching"
                );
                tokio::fs::remove_file(dest).await?;
                self.with_meta(|meta| meta.remove(location))?;
                Ok(false)
            }
            None => {
                // A file placed in the cache by hand is adopted once it looks sane
                if let Err(reason) = validate_archive(name, dest) {
                    warn!(location, reason = %reason, "unrecorded cache file rejected, refetching");
                    tokio::fs::remove_file(dest).await?;
                    return Ok(false);
                }
                self.record(location, name, &digest)?;
                info!(location, "adopted unrecorded cache file");
                Ok(true)
            }
        }
    }

    async fn download(&self, location: &str, name: &str, dest: &Path) -> Result<u64> {
        let part = self.cache_dir.join(format!("{}.part", name));
        let result = self.download_to_part(location, name, &part, dest).await;
        if result.is_err() && part.exists() {
            let _ = tokio::fs::remove_file(&part).await;
        }
        result
    }

    async fn download_to_part(
        &self,
        location: &str,
        name: &str,
        part: &Path,
        dest: &Path,
    ) -> Result<u64> {
        let expected_bytes = match Source::parse(location) {
            Source::Remote(url) => {
                let resp = self
                    .http
                    .download(url, part)
                    .await
                    .map_err(|e| EtlError::archive(name, e))?;
                debug!(status = resp.status, content_type = %resp.content_type, "response received");
                resp.bytes_written
            }
            Source::Local(path) => {
                if !path.is_file() {
                    return Err(EtlError::missing("archive", path));
                }
                tokio::fs::copy(&path, part).await?
            }
        };

        validate_archive(name, part).map_err(|reason| EtlError::archive(name, reason))?;
        let digest = hash_file(part.to_path_buf()).await?;
        if digest.size_bytes != expected_bytes {
            return Err(EtlError::archive(
                name,
                format!(
                    "received {} bytes but {} reached the cache",
                    expected_bytes, digest.size_bytes
                ),
            ));
        }
        tokio::fs::rename(part, dest).await?;
        self.record(location, name, &digest)?;
        Ok(digest.size_bytes)
    }

    fn record(&self, location: &str, name: &str, digest: &FileDigest) -> Result<()> {
        let entry = CacheEntry {
            location: location.to_string(),
            file_name: name.to_string(),
            sha256: digest.sha256.clone(),
            size_bytes: digest.size_bytes,
            fetched_at: chrono::Utc::now().timestamp(),
        };
        self.with_meta(|meta| meta.put(&entry))
    }

    fn with_meta<T>(&self, f: impl FnOnce(&CacheMeta) -> Result<T>) -> Result<T> {
        let meta = self
            .meta
            .lock()
            .map_err(|_| EtlError::Config("cache manifest lock poisoned".into()))?;
        f(&meta)
    }
}

enum Source<'a> {
    Remote(&'a str),
    Local(PathBuf),
}

impl<'a> Source<'a> {
    fn parse(location: &'a str) -> Self {
        if location.starts_with("http://") || location.starts_with("https://") {
            Source::Remote(location)
        } else if let Some(path) = location.strip_prefix("file://") {
            Source::Local(PathBuf::from(path))
        } else {
            Source::Local(PathBuf::from(location))
        }
    }
}

/// Cache file name for a location: its last path segment, without query or fragment.
pub fn archive_name(location: &str) -> Result<String> {
    let without_query = location.split(['?', '#']).next().unwrap_or_default();
    let path = match without_query.split_once("://") {
        // Skip the host of remote URLs
        Some((scheme, rest)) if scheme != "file" => {
            rest.split_once('/').map(|(_, p)| p).unwrap_or_default()
        }
        Some((_, rest)) => rest,
        None => without_query,
    };
    let name = path.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
    if name.is_empty() || name == "." || name == ".." {
        return Err(EtlError::Config(format!(
            "cannot derive an archive file name from {:?}",
            location
        )));
    }
    Ok(name.to_string())
}

struct FileDigest {
    sha256: String,
    size_bytes: u64,
}

async fn hash_file(path: PathBuf) -> Result<FileDigest> {
    tokio::task::spawn_blocking(move || -> Result<FileDigest> {
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; 64 * 1024];
        let mut size_bytes = 0u64;
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            size_bytes += n as u64;
        }
        Ok(FileDigest {
            sha256: hex::encode(hasher.finalize()),
            size_bytes,
        })
    })
    .await
    .map_err(|e| EtlError::Io(std::io::Error::other(e)))?
}

/// Cheap completeness check: non-empty, and gzip magic for `.gz` names.
fn validate_archive(name: &str, path: &Path) -> std::result::Result<(), String> {
    let mut file = std::fs::File::open(path).map_err(|e| e.to_string())?;
    let mut head = [0u8; 2];
    let n = file.read(&mut head).map_err(|e| e.to_string())?;
    if n == 0 {
        return Err("archive is empty".into());
    }
    if name.ends_with(".gz") && (n < 2 || head != GZIP_MAGIC) {
        return Err("not a gzip file".into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_names_come_from_the_last_segment() {
        assert_eq!(
            archive_name("https://ftp.ncbi.nlm.nih.gov/pubmed/baseline/pubmed24n0001.xml.gz")
                .unwrap(),
            "pubmed24n0001.xml.gz"
        );
        assert_eq!(
            archive_name("https://example.org/files/a.xml.gz?sig=abc").unwrap(),
            "a.xml.gz"
        );
        assert_eq!(archive_name("file:///mirror/b.xml").unwrap(), "b.xml");
        assert_eq!(archive_name("relative/c.xml.gz").unwrap(), "c.xml.gz");
        assert!(archive_name("https://example.org/").is_err());
        assert!(archive_name("").is_err());
    }

    #[test]
    fn gzip_names_require_gzip_magic() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.xml.gz");
        std::fs::write(&good, [0x1f, 0x8b, 0x08, 0x00]).unwrap();
        assert!(validate_archive("good.xml.gz", &good).is_ok());

        let bad = dir.path().join("bad.xml.gz");
        std::fs::write(&bad, b"<html>not found</html>").unwrap();
        assert!(validate_archive("bad.xml.gz", &bad).is_err());

        let plain = dir.path().join("plain.xml");
        std::fs::write(&plain, b"<PubmedArticleSet/>").unwrap();
        assert!(validate_archive("plain.xml", &plain).is_ok());

        let empty = dir.path().join("empty.xml");
        std::fs::write(&empty, b"").unwrap();
        assert!(validate_archive("empty.xml", &empty).is_err());
    }
}
