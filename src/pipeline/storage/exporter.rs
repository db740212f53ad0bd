use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::constants::{EXPORT_COLUMNS, LIST_SEPARATOR};
use crate::error::{EtlError, Result};
use crate::types::Record;

/// Delimited writer for exported records. Rows go to `<output>.tmp`, which is
/// renamed over `output` by `finish`; a writer dropped early leaves `output`
/// untouched.
pub struct CsvExporter {
    writer: csv::Writer<File>,
    tmp_path: PathBuf,
    output: PathBuf,
    rows: u64,
}

impl CsvExporter {
    pub fn create(output: &Path, delimiter: u8) -> Result<Self> {
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut tmp_name = output
            .file_name()
            .ok_or_else(|| {
                EtlError::Config(format!("output path {} has no file name", output.display()))
            })?
            .to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = output.with_file_name(tmp_name);

        let mut writer = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_path(&tmp_path)?;
        writer.write_record(EXPORT_COLUMNS)?;
        Ok(Self {
            writer,
            tmp_path,
            output: output.to_path_buf(),
            rows: 0,
        })
    }

    pub fn write(&mut self, record: &Record) -> Result<()> {
        self.writer.write_record(export_row(record))?;
        self.rows += 1;
        Ok(())
    }

    /// Flush and move the file into place. Returns the number of data rows.
    pub fn finish(mut self) -> Result<u64> {
        self.writer.flush()?;
        fs::rename(&self.tmp_path, &self.output)?;
        Ok(self.rows)
    }

    /// Discard the partial file.
    pub fn abort(self) {
        let tmp_path = self.tmp_path.clone();
        drop(self.writer);
        let _ = fs::remove_file(tmp_path);
    }
}

/// One output row, in `EXPORT_COLUMNS` order. Absent values are empty fields.
pub fn export_row(record: &Record) -> Vec<String> {
    let opt = |v: &Option<String>| v.clone().unwrap_or_default();
    let num = |v: Option<i64>| v.map(|n| n.to_string()).unwrap_or_default();
    vec![
        record.pmid.to_string(),
        opt(&record.title),
        opt(&record.venue),
        num(record.year.map(i64::from)),
        num(record.month.map(i64::from)),
        num(record.day.map(i64::from)),
        opt(&record.medline_date),
        opt(&record.language),
        opt(&record.issn),
        opt(&record.iso_abbreviation),
        opt(&record.medline_ta),
        opt(&record.volume),
        opt(&record.issue),
        record.publication_types.join(LIST_SEPARATOR),
        record.authors.join(LIST_SEPARATOR),
        opt(&record.abstract_text),
        record.source_archive.clone(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_header_and_quotes_embedded_delimiters() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("nested").join("out.csv");
        let mut exporter = CsvExporter::create(&output, b',').unwrap();
        assert!(!output.exists());

        exporter
            .write(&Record {
                pmid: 7,
                title: Some("Cells, genes and \"things\"".into()),
                venue: Some("Journal of Testing".into()),
                year: Some(1990),
                authors: vec!["Smith, Jane".into(), "Doe, J".into()],
                source_archive: "a.xml.gz".into(),
                ..Record::default()
            })
            .unwrap();
        assert_eq!(exporter.finish().unwrap(), 1);

        let mut reader = csv::Reader::from_path(&output).unwrap();
        let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(headers, EXPORT_COLUMNS);
        let row = reader.records().next().unwrap().unwrap();
        assert_eq!(&row[0], "7");
        assert_eq!(&row[1], "Cells, genes and \"things\"");
        assert_eq!(&row[3], "1990");
        assert_eq!(&row[4], "");
        assert_eq!(&row[14], "Smith, Jane; Doe, J");
        assert!(!dir.path().join("nested").join("out.csv.tmp").exists());
    }

    #[test]
    fn honours_tab_delimiter() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.tsv");
        let exporter = CsvExporter::create(&output, b'\t').unwrap();
        assert_eq!(exporter.finish().unwrap(), 0);
        let content = fs::read_to_string(&output).unwrap();
        assert!(content.starts_with("pmid\ttitle\tvenue\t"));
    }
}
