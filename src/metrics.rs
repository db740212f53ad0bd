//! Pipeline counters.
//!
//! Thin wrappers over the `metrics` facade so call sites stay one line. No
//! recorder is installed by the binaries; embedding applications may install
//! their own.

pub mod fetch {
    pub fn archive_downloaded(bytes: u64) {
        ::metrics::counter!("medline_archives_downloaded_total").increment(1);
        ::metrics::counter!("medline_archive_bytes_total").increment(bytes);
    }

    pub fn archive_cached() {
        ::metrics::counter!("medline_archives_cached_total").increment(1);
    }

    pub fn archive_failed() {
        ::metrics::counter!("medline_archives_failed_total").increment(1);
    }
}

pub mod parse {
    use crate::types::ParseStats;

    pub fn archive_parsed(stats: &ParseStats) {
        ::metrics::counter!("medline_records_parsed_total").increment(stats.parsed);
        ::metrics::counter!("medline_records_malformed_total").increment(stats.malformed);
        ::metrics::counter!("medline_year_from_medline_date_total")
            .increment(stats.year_from_medline_date);
    }

    pub fn archive_unreadable() {
        ::metrics::counter!("medline_archives_unreadable_total").increment(1);
    }

    pub fn duration(secs: f64) {
        ::metrics::histogram!("medline_archive_parse_seconds").record(secs);
    }
}

pub mod filter {
    pub fn records_scanned(n: u64) {
        ::metrics::counter!("medline_filter_scanned_total").increment(n);
    }

    pub fn records_exported(n: u64) {
        ::metrics::counter!("medline_filter_exported_total").increment(n);
    }
}
