use async_trait::async_trait;
use std::path::Path;

// Ingest-side ports
#[async_trait]
pub trait HttpClientPort: Send + Sync {
    /// Stream the body of `url` into `dest`, replacing any existing file.
    async fn download(&self, url: &str, dest: &Path) -> Result<HttpDownloadResult, String>;
}

#[derive(Clone, Debug)]
pub struct HttpDownloadResult {
    pub status: u16,
    /// Body bytes written to `dest`; the cache rejects a file of any other size.
    pub bytes_written: u64,
    pub content_type: String,
}
