// Pipeline ingestion: archive cache and its manifest

pub mod archive_cache;
pub mod cache_meta;
