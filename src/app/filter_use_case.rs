use std::path::PathBuf;
use tracing::{info, instrument};

use crate::config::EtlConfig;
use crate::error::Result;
use crate::metrics;
use crate::pipeline::processing::venue_filter::{AllowListOptions, VenueAllowList};
use crate::pipeline::storage::dataset::DatasetReader;
use crate::pipeline::storage::exporter::CsvExporter;

/// Stage two: keep dataset records whose venue is on the allow-list and export them.
#[derive(Debug, Clone)]
pub struct FilterUseCase {
    pub dataset_dir: PathBuf,
    pub allow_list: PathBuf,
    pub allow_list_options: AllowListOptions,
    pub output: PathBuf,
    pub delimiter: u8,
    pub require_abstract: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterReport {
    pub scanned: u64,
    pub matched: u64,
    pub dropped_without_abstract: u64,
    pub exported: u64,
    pub output: PathBuf,
}

impl FilterUseCase {
    pub fn from_config(config: &EtlConfig) -> Result<Self> {
        Ok(Self {
            dataset_dir: config.filter_dataset_dir(),
            allow_list: config.filter.allow_list.clone(),
            allow_list_options: config.filter.allow_list_options(),
            output: config.filter.output_file.clone(),
            delimiter: config.filter.delimiter_byte()?,
            require_abstract: config.filter.require_abstract,
        })
    }

    /// Inputs are validated before the output file is created, so a failed
    /// run never leaves a partial or empty export behind.
    #[instrument(name = "filter", skip_all, fields(allow_list = %self.allow_list.display()))]
    pub fn run(&self) -> Result<FilterReport> {
        let allow_list = VenueAllowList::load(&self.allow_list, &self.allow_list_options)?;
        let dataset = DatasetReader::open(&self.dataset_dir)?;
        info!(
            dataset = %self.dataset_dir.display(),
            records = dataset.manifest().total_records,
            "filtering dataset"
        );

        let mut exporter = CsvExporter::create(&self.output, self.delimiter)?;
        let mut report = FilterReport {
            output: self.output.clone(),
            ..FilterReport::default()
        };

        let scanned = dataset.scan(|record| {
            if !allow_list.matches(&record) {
                return Ok(());
            }
            report.matched += 1;
            if self.require_abstract && !record.has_abstract() {
                report.dropped_without_abstract += 1;
                return Ok(());
            }
            exporter.write(&record)
        });
        report.scanned = match scanned {
            Ok(n) => n,
            Err(e) => {
                exporter.abort();
                return Err(e);
            }
        };
        report.exported = exporter.finish()?;

        metrics::filter::records_scanned(report.scanned);
        metrics::filter::records_exported(report.exported);
        info!(
            scanned = report.scanned,
            matched = report.matched,
            dropped_without_abstract = report.dropped_without_abstract,
            exported = report.exported,
            output = %report.output.display(),
            "export written"
        );
        Ok(report)
    }
}
