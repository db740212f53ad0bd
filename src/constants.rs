/// Defaults shared by the config layer and the CLI.

// Baseline archive location on the NLM FTP mirror
pub const DEFAULT_BASELINE_URL: &str = "https://ftp.ncbi.nlm.nih.gov/pubmed/baseline";
pub const DEFAULT_BASELINE_RELEASE: &str = "24";

// Stage one layout
pub const DEFAULT_OUTPUT_DIR: &str = "./data/pubmed";
pub const CACHE_DIR_NAME: &str = "cache";
pub const DATASET_DIR_NAME: &str = "dataset";
pub const CACHE_META_FILE: &str = "cache_meta.db";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const DEFAULT_ROW_GROUP_SIZE: usize = 50_000;
pub const DEFAULT_DOWNLOAD_CONCURRENCY: usize = 2;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 600;

// Stage two
pub const DEFAULT_ALLOW_LIST: &str = "venue_allow_list.csv";
pub const DEFAULT_FILTER_OUTPUT: &str = "filtered_records.csv";

// Logging
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_LOG_FILE: &str = "pubmed.log";

pub const DEFAULT_CONFIG_FILE: &str = "medline_etl.toml";

/// Bumped whenever the part schema changes shape.
pub const DATASET_SCHEMA_VERSION: u32 = 2;

/// Separator used when list fields are flattened into one export column.
pub const LIST_SEPARATOR: &str = "; ";

/// Fixed column order of the exported table.
pub const EXPORT_COLUMNS: [&str; 17] = [
    "pmid",
    "title",
    "venue",
    "year",
    "month",
    "day",
    "medline_date",
    "language",
    "issn",
    "iso_abbreviation",
    "medline_ta",
    "volume",
    "issue",
    "publication_types",
    "authors",
    "abstract",
    "source_archive",
];
