use crate::constants;
use crate::error::{EtlError, Result};
use crate::pipeline::processing::venue_filter::{AllowListOptions, MatchMode};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Whole-pipeline configuration, read from a TOML file and overridden by CLI flags.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EtlConfig {
    pub fetch: FetchConfig,
    pub filter: FilterConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub output_dir: PathBuf,
    /// Parse workers; `None` means one per available core.
    pub num_workers: Option<usize>,
    pub download_concurrency: usize,
    pub row_group_size: usize,
    pub http_timeout_secs: u64,
    /// Explicit resource locations (URLs, `file://` URLs or local paths).
    pub archives: Vec<String>,
    /// File with one resource location per line.
    pub archive_list: Option<PathBuf>,
    pub baseline: Option<BaselineConfig>,
}

/// Generates baseline archive URLs such as `.../pubmed24n0009.xml.gz`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    pub base_url: String,
    pub release: String,
    /// Explicit file numbers; takes precedence over `first`/`last`.
    pub files: Vec<u32>,
    pub first: Option<u32>,
    pub last: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Defaults to the dataset produced under `fetch.output_dir`.
    pub dataset_dir: Option<PathBuf>,
    pub allow_list: PathBuf,
    pub output_file: PathBuf,
    pub case_sensitive: bool,
    pub venue_column: Option<String>,
    pub has_header: bool,
    pub delimiter: char,
    pub require_abstract: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_dir: PathBuf,
    pub log_file: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(constants::DEFAULT_OUTPUT_DIR),
            num_workers: None,
            download_concurrency: constants::DEFAULT_DOWNLOAD_CONCURRENCY,
            row_group_size: constants::DEFAULT_ROW_GROUP_SIZE,
            http_timeout_secs: constants::DEFAULT_HTTP_TIMEOUT_SECS,
            archives: Vec::new(),
            archive_list: None,
            baseline: None,
        }
    }
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            base_url: constants::DEFAULT_BASELINE_URL.to_string(),
            release: constants::DEFAULT_BASELINE_RELEASE.to_string(),
            files: Vec::new(),
            first: None,
            last: None,
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            dataset_dir: None,
            allow_list: PathBuf::from(constants::DEFAULT_ALLOW_LIST),
            output_file: PathBuf::from(constants::DEFAULT_FILTER_OUTPUT),
            case_sensitive: true,
            venue_column: None,
            has_header: true,
            delimiter: ',',
            require_abstract: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from(constants::DEFAULT_LOG_DIR),
            log_file: constants::DEFAULT_LOG_FILE.to_string(),
        }
    }
}

impl EtlConfig {
    /// Load configuration from `path`, or from `medline_etl.toml` in the working
    /// directory when no path is given and that file exists. Falls back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default_path = PathBuf::from(constants::DEFAULT_CONFIG_FILE);
                if !default_path.exists() {
                    return Ok(Self::default());
                }
                default_path
            }
        };
        let content = fs::read_to_string(&config_path).map_err(|e| {
            EtlError::Config(format!(
                "Failed to read config file '{}': {}",
                config_path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EtlConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fetch.num_workers == Some(0) {
            return Err(EtlError::Config("fetch.num_workers must be at least 1".into()));
        }
        if self.fetch.download_concurrency == 0 {
            return Err(EtlError::Config(
                "fetch.download_concurrency must be at least 1".into(),
            ));
        }
        if self.fetch.row_group_size == 0 {
            return Err(EtlError::Config("fetch.row_group_size must be at least 1".into()));
        }
        self.filter.delimiter_byte()?;
        Ok(())
    }

    /// Dataset read by the filter stage.
    pub fn filter_dataset_dir(&self) -> PathBuf {
        self.filter
            .dataset_dir
            .clone()
            .unwrap_or_else(|| self.fetch.dataset_dir())
    }
}

impl FetchConfig {
    pub fn cache_dir(&self) -> PathBuf {
        self.output_dir.join(constants::CACHE_DIR_NAME)
    }

    pub fn dataset_dir(&self) -> PathBuf {
        self.output_dir.join(constants::DATASET_DIR_NAME)
    }

    pub fn workers(&self) -> usize {
        self.num_workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
    }

    /// Every configured resource location, de-duplicated, in configuration order:
    /// explicit archives, then the archive list file, then the baseline generator.
    pub fn resource_locations(&self) -> Result<Vec<String>> {
        let mut locations = self.archives.clone();
        if let Some(list) = &self.archive_list {
            locations.extend(read_archive_list(list)?);
        }
        if let Some(baseline) = &self.baseline {
            locations.extend(baseline.urls()?);
        }

        let mut seen = HashSet::new();
        locations.retain(|loc| seen.insert(loc.clone()));

        if locations.is_empty() {
            return Err(EtlError::Config(
                "no archives configured: set fetch.archives, fetch.archive_list or fetch.baseline"
                    .into(),
            ));
        }
        Ok(locations)
    }
}

impl BaselineConfig {
    pub fn urls(&self) -> Result<Vec<String>> {
        let numbers: Vec<u32> = if !self.files.is_empty() {
            self.files.clone()
        } else {
            match (self.first, self.last) {
                (Some(first), Some(last)) if first <= last => (first..=last).collect(),
                (Some(first), Some(last)) => {
                    return Err(EtlError::Config(format!(
                        "fetch.baseline.first ({}) is after fetch.baseline.last ({})",
                        first, last
                    )))
                }
                _ => {
                    return Err(EtlError::Config(
                        "fetch.baseline needs either `files` or both `first` and `last`".into(),
                    ))
                }
            }
        };
        let base = self.base_url.trim_end_matches('/');
        Ok(numbers
            .into_iter()
            .map(|n| format!("{}/pubmed{}n{:04}.xml.gz", base, self.release, n))
            .collect())
    }
}

impl FilterConfig {
    pub fn match_mode(&self) -> MatchMode {
        if self.case_sensitive {
            MatchMode::Exact
        } else {
            MatchMode::IgnoreCase
        }
    }

    pub fn delimiter_byte(&self) -> Result<u8> {
        if self.delimiter.is_ascii() {
            Ok(self.delimiter as u8)
        } else {
            Err(EtlError::Config(format!(
                "filter.delimiter must be a single ASCII character, got {:?}",
                self.delimiter
            )))
        }
    }

    pub fn allow_list_options(&self) -> AllowListOptions {
        AllowListOptions {
            mode: self.match_mode(),
            has_header: self.has_header,
            venue_column: self.venue_column.clone(),
        }
    }
}

/// One location per line; blank lines and `#` comments are ignored.
pub fn read_archive_list(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Err(EtlError::missing("archive list", path));
    }
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_urls_use_four_digit_file_numbers() {
        let baseline = BaselineConfig {
            files: vec![9, 16, 100],
            ..BaselineConfig::default()
        };
        let urls = baseline.urls().unwrap();
        assert_eq!(
            urls,
            vec![
                "https://ftp.ncbi.nlm.nih.gov/pubmed/baseline/pubmed24n0009.xml.gz",
                "https://ftp.ncbi.nlm.nih.gov/pubmed/baseline/pubmed24n0016.xml.gz",
                "https://ftp.ncbi.nlm.nih.gov/pubmed/baseline/pubmed24n0100.xml.gz",
            ]
        );
    }

    #[test]
    fn baseline_range_must_be_ordered() {
        let baseline = BaselineConfig {
            first: Some(5),
            last: Some(2),
            ..BaselineConfig::default()
        };
        assert!(baseline.urls().is_err());

        let baseline = BaselineConfig {
            release: "25".into(),
            first: Some(1),
            last: Some(3),
            ..BaselineConfig::default()
        };
        let urls = baseline.urls().unwrap();
        assert_eq!(urls.len(), 3);
        assert!(urls[2].ends_with("pubmed25n0003.xml.gz"));
    }

    #[test]
    fn parses_toml_with_defaults() {
        let config = EtlConfig::from_toml_str(
            r#"
            [fetch]
            output_dir = "/tmp/pubmed"
            num_workers = 3
            archives = ["https://example.org/a.xml.gz", "https://example.org/a.xml.gz"]

            [filter]
            allow_list = "journals.csv"
            case_sensitive = false
            delimiter = "\t"
            "#,
        )
        .unwrap();

        assert_eq!(config.fetch.workers(), 3);
        assert_eq!(config.fetch.row_group_size, constants::DEFAULT_ROW_GROUP_SIZE);
        assert_eq!(config.fetch.resource_locations().unwrap().len(), 1);
        assert_eq!(config.filter.match_mode(), MatchMode::IgnoreCase);
        assert_eq!(config.filter.delimiter_byte().unwrap(), b'\t');
        assert_eq!(
            config.filter_dataset_dir(),
            PathBuf::from("/tmp/pubmed").join(constants::DATASET_DIR_NAME)
        );
        assert_eq!(config.logging.log_file, constants::DEFAULT_LOG_FILE);
    }

    #[test]
    fn rejects_zero_workers_and_empty_archive_lists() {
        let err = EtlConfig::from_toml_str("[fetch]\nnum_workers = 0\n").unwrap_err();
        assert!(err.to_string().contains("num_workers"));

        let config = EtlConfig::default();
        assert!(config.fetch.resource_locations().is_err());
    }

    #[test]
    fn archive_list_skips_comments_and_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("archives.txt");
        fs::write(
            &list,
            "# baseline subset\nhttps://example.org/one.xml.gz\n\n  /mirror/two.xml.gz  \n",
        )
        .unwrap();
        let locations = read_archive_list(&list).unwrap();
        assert_eq!(
            locations,
            vec!["https://example.org/one.xml.gz", "/mirror/two.xml.gz"]
        );
    }
}
