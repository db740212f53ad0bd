use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Cache manifest error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required input: {what} not found at {}", .path.display())]
    MissingInput { what: &'static str, path: PathBuf },

    #[error("Venue allow-list {} contains no entries", .0.display())]
    EmptyAllowList(PathBuf),

    #[error("Archive {archive} failed: {message}")]
    Archive { archive: String, message: String },
}

impl EtlError {
    pub fn missing(what: &'static str, path: impl Into<PathBuf>) -> Self {
        EtlError::MissingInput {
            what,
            path: path.into(),
        }
    }

    pub fn archive(archive: impl Into<String>, message: impl ToString) -> Self {
        EtlError::Archive {
            archive: archive.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
