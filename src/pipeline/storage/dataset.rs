//! Columnar dataset: one Parquet part per source archive plus a JSON manifest.
//!
//! Layout of a dataset directory:
//!
//! ```text
//! dataset/
//!   manifest.json
//!   part-pubmed24n0001.parquet
//!   part-pubmed24n0002.parquet
//! ```
//!
//! List fields (`authors`, `publication_types`) are stored as Parquet
//! `LIST<UTF8>` columns; an empty list is stored as an empty list.

use parquet::basic::{Compression, ZstdLevel};
use parquet::data_type::{ByteArray, ByteArrayType, Int32Type, Int64Type};
use parquet::file::properties::WriterProperties;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::file::writer::SerializedFileWriter;
use parquet::record::{Field, Row};
use parquet::schema::parser::parse_message_type;
use parquet::schema::types::Type;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::constants::{DATASET_SCHEMA_VERSION, MANIFEST_FILE};
use crate::error::{EtlError, Result};
use crate::types::{ParseStats, Record};

const RECORD_SCHEMA: &str = "
message medline_record {
    REQUIRED INT64 pmid;
    OPTIONAL BINARY title (UTF8);
    OPTIONAL BINARY venue (UTF8);
    OPTIONAL INT32 year;
    OPTIONAL INT32 month;
    OPTIONAL INT32 day;
    OPTIONAL BINARY medline_date (UTF8);
    OPTIONAL BINARY language (UTF8);
    OPTIONAL BINARY abstract (UTF8);
    OPTIONAL BINARY issn (UTF8);
    OPTIONAL BINARY iso_abbreviation (UTF8);
    OPTIONAL BINARY medline_ta (UTF8);
    OPTIONAL BINARY nlm_unique_id (UTF8);
    OPTIONAL BINARY country (UTF8);
    OPTIONAL BINARY volume (UTF8);
    OPTIONAL BINARY issue (UTF8);
    REQUIRED group publication_types (LIST) {
        REPEATED group list {
            REQUIRED BINARY element (UTF8);
        }
    }
    REQUIRED group authors (LIST) {
        REPEATED group list {
            REQUIRED BINARY element (UTF8);
        }
    }
    OPTIONAL BINARY date_completed (UTF8);
    OPTIONAL BINARY date_revised (UTF8);
    REQUIRED BINARY source_archive (UTF8);
}
";

fn record_schema() -> Result<Arc<Type>> {
    Ok(Arc::new(parse_message_type(RECORD_SCHEMA)?))
}

/// Part file name for an archive: `pubmed24n0001.xml.gz` -> `part-pubmed24n0001.parquet`.
pub fn part_file_name(archive: &str) -> String {
    let stem = archive
        .strip_suffix(".gz")
        .unwrap_or(archive)
        .trim_end_matches(".xml");
    format!("part-{}.parquet", stem)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartInfo {
    pub archive: String,
    pub file: String,
    pub records: u64,
    pub stats: ParseStats,
    /// Set when the archive ended early on an XML error; records before it are kept.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncated: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedArchive {
    pub archive: String,
    pub reason: String,
}

/// Contents of `manifest.json`. Holds no timestamps so identical inputs give
/// identical bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetManifest {
    pub schema_version: u32,
    pub total_records: u64,
    pub stats: ParseStats,
    pub parts: Vec<PartInfo>,
    pub failed_archives: Vec<FailedArchive>,
}

impl DatasetManifest {
    pub fn new(mut parts: Vec<PartInfo>, mut failed_archives: Vec<FailedArchive>) -> Self {
        parts.sort_by(|a, b| a.archive.cmp(&b.archive));
        failed_archives.sort_by(|a, b| a.archive.cmp(&b.archive));
        let mut stats = ParseStats::default();
        for part in &parts {
            stats.merge(&part.stats);
        }
        Self {
            schema_version: DATASET_SCHEMA_VERSION,
            total_records: parts.iter().map(|p| p.records).sum(),
            stats,
            parts,
            failed_archives,
        }
    }

    pub fn write(&self, dir: &Path) -> Result<()> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        fs::write(dir.join(MANIFEST_FILE), json)?;
        Ok(())
    }

    pub fn read(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        if !path.is_file() {
            return Err(EtlError::missing("dataset manifest", path));
        }
        let manifest: DatasetManifest = serde_json::from_str(&fs::read_to_string(&path)?)?;
        if manifest.schema_version != DATASET_SCHEMA_VERSION {
            return Err(EtlError::Config(format!(
                "dataset at {} has schema version {}, expected {}",
                dir.display(),
                manifest.schema_version,
                DATASET_SCHEMA_VERSION
            )));
        }
        Ok(manifest)
    }
}

/// Write `records` to a single Parquet file, `row_group_size` rows per row group.
pub fn write_part(path: &Path, records: &[Record], row_group_size: usize) -> Result<u64> {
    let props = Arc::new(
        WriterProperties::builder()
            .set_compression(Compression::ZSTD(ZstdLevel::default()))
            .set_max_row_group_size(row_group_size.max(1))
            .build(),
    );
    let file = File::create(path)?;
    let mut writer = SerializedFileWriter::new(file, record_schema()?, props)?;

    for chunk in records.chunks(row_group_size.max(1)) {
        let mut columns = ColumnValues::for_records(chunk).into_iter();
        let mut row_group = writer.next_row_group()?;
        while let Some(mut col_writer) = row_group.next_column()? {
            let values = columns.next().ok_or_else(|| {
                EtlError::Config("record schema has more columns than the writer".into())
            })?;
            match values {
                ColumnValues::Long(values) => {
                    col_writer
                        .typed::<Int64Type>()
                        .write_batch(&values, None, None)?;
                }
                ColumnValues::Int { values, defs } => {
                    col_writer
                        .typed::<Int32Type>()
                        .write_batch(&values, Some(&defs[..]), None)?;
                }
                ColumnValues::Text { values, defs } => {
                    col_writer
                        .typed::<ByteArrayType>()
                        .write_batch(&values, defs.as_deref(), None)?;
                }
                ColumnValues::TextList { values, defs, reps } => {
                    col_writer
                        .typed::<ByteArrayType>()
                        .write_batch(&values, Some(&defs[..]), Some(&reps[..]))?;
                }
            }
            col_writer.close()?;
        }
        row_group.close()?;
    }
    writer.close()?;
    debug!(path = %path.display(), records = records.len(), "part written");
    Ok(records.len() as u64)
}

/// Values of one column for a row group, in schema order.
enum ColumnValues {
    Long(Vec<i64>),
    Int { values: Vec<i32>, defs: Vec<i16> },
    Text { values: Vec<ByteArray>, defs: Option<Vec<i16>> },
    /// Leaf of a `LIST<UTF8>`: definition level 0 marks an empty list,
    /// repetition level 0 starts a new row.
    TextList { values: Vec<ByteArray>, defs: Vec<i16>, reps: Vec<i16> },
}

impl ColumnValues {
    fn for_records(records: &[Record]) -> Vec<ColumnValues> {
        vec![
            ColumnValues::Long(records.iter().map(|r| r.pmid).collect()),
            optional_text(records, |r| r.title.clone()),
            optional_text(records, |r| r.venue.clone()),
            optional_int(records, |r| r.year),
            optional_int(records, |r| r.month.map(|m| m as i32)),
            optional_int(records, |r| r.day.map(|d| d as i32)),
            optional_text(records, |r| r.medline_date.clone()),
            optional_text(records, |r| r.language.clone()),
            optional_text(records, |r| r.abstract_text.clone()),
            optional_text(records, |r| r.issn.clone()),
            optional_text(records, |r| r.iso_abbreviation.clone()),
            optional_text(records, |r| r.medline_ta.clone()),
            optional_text(records, |r| r.nlm_unique_id.clone()),
            optional_text(records, |r| r.country.clone()),
            optional_text(records, |r| r.volume.clone()),
            optional_text(records, |r| r.issue.clone()),
            text_list(records, |r| &r.publication_types),
            text_list(records, |r| &r.authors),
            optional_text(records, |r| r.date_completed.clone()),
            optional_text(records, |r| r.date_revised.clone()),
            ColumnValues::Text {
                values: records
                    .iter()
                    .map(|r| ByteArray::from(r.source_archive.as_str()))
                    .collect(),
                defs: None,
            },
        ]
    }
}

fn optional_text(records: &[Record], get: impl Fn(&Record) -> Option<String>) -> ColumnValues {
    let mut values = Vec::with_capacity(records.len());
    let mut defs = Vec::with_capacity(records.len());
    for record in records {
        match get(record) {
            Some(value) => {
                values.push(ByteArray::from(value.as_str()));
                defs.push(1);
            }
            None => defs.push(0),
        }
    }
    ColumnValues::Text {
        values,
        defs: Some(defs),
    }
}

fn optional_int(records: &[Record], get: impl Fn(&Record) -> Option<i32>) -> ColumnValues {
    let mut values = Vec::with_capacity(records.len());
    let mut defs = Vec::with_capacity(records.len());
    for record in records {
        match get(record) {
            Some(value) => {
                values.push(value);
                defs.push(1);
            }
            None => defs.push(0),
        }
    }
    ColumnValues::Int { values, defs }
}

fn text_list(records: &[Record], get: impl Fn(&Record) -> &Vec<String>) -> ColumnValues {
    let mut values = Vec::new();
    let mut defs = Vec::new();
    let mut reps = Vec::new();
    for record in records {
        let items = get(record);
        if items.is_empty() {
            defs.push(0);
            reps.push(0);
            continue;
        }
        for (i, item) in items.iter().enumerate() {
            values.push(ByteArray::from(item.as_str()));
            defs.push(1);
            reps.push(if i == 0 { 0 } else { 1 });
        }
    }
    ColumnValues::TextList { values, defs, reps }
}

/// Rebuild a `Record` from one Parquet row. Unknown columns are ignored.
fn record_from_row(row: &Row) -> Result<Record> {
    let mut record = Record::default();
    let mut has_pmid = false;
    for (name, field) in row.get_column_iter() {
        match name.as_str() {
            "pmid" => {
                record.pmid = long_field(name, field)?;
                has_pmid = true;
            }
            "year" => record.year = int_field(field),
            "month" => record.month = int_field(field).map(|m| m as u32),
            "day" => record.day = int_field(field).map(|d| d as u32),
            "title" => record.title = text_field(field),
            "venue" => record.venue = text_field(field),
            "medline_date" => record.medline_date = text_field(field),
            "language" => record.language = text_field(field),
            "abstract" => record.abstract_text = text_field(field),
            "issn" => record.issn = text_field(field),
            "iso_abbreviation" => record.iso_abbreviation = text_field(field),
            "medline_ta" => record.medline_ta = text_field(field),
            "nlm_unique_id" => record.nlm_unique_id = text_field(field),
            "country" => record.country = text_field(field),
            "volume" => record.volume = text_field(field),
            "issue" => record.issue = text_field(field),
            "publication_types" => record.publication_types = list_field(field),
            "authors" => record.authors = list_field(field),
            "date_completed" => record.date_completed = text_field(field),
            "date_revised" => record.date_revised = text_field(field),
            "source_archive" => record.source_archive = text_field(field).unwrap_or_default(),
            _ => {}
        }
    }
    if !has_pmid {
        return Err(EtlError::Config("dataset row has no pmid column".into()));
    }
    Ok(record)
}

fn long_field(name: &str, field: &Field) -> Result<i64> {
    match field {
        Field::Long(v) => Ok(*v),
        Field::Int(v) => Ok(*v as i64),
        other => Err(EtlError::Config(format!(
            "column {} holds unexpected value {:?}",
            name, other
        ))),
    }
}

fn int_field(field: &Field) -> Option<i32> {
    match field {
        Field::Int(v) => Some(*v),
        _ => None,
    }
}

fn text_field(field: &Field) -> Option<String> {
    match field {
        Field::Str(s) => Some(s.clone()),
        _ => None,
    }
}

fn list_field(field: &Field) -> Vec<String> {
    match field {
        Field::ListInternal(list) => list.elements().iter().filter_map(text_field).collect(),
        _ => Vec::new(),
    }
}

/// Read access to a finished dataset.
pub struct DatasetReader {
    dir: PathBuf,
    manifest: DatasetManifest,
}

impl DatasetReader {
    /// Fails fast when the directory, its manifest or any listed part is missing.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(EtlError::missing("dataset", dir));
        }
        let manifest = DatasetManifest::read(&dir)?;
        for part in &manifest.parts {
            let path = dir.join(&part.file);
            if !path.is_file() {
                return Err(EtlError::missing("dataset part", path));
            }
        }
        Ok(Self { dir, manifest })
    }

    pub fn manifest(&self) -> &DatasetManifest {
        &self.manifest
    }

    pub fn part_paths(&self) -> Vec<PathBuf> {
        self.manifest
            .parts
            .iter()
            .map(|p| self.dir.join(&p.file))
            .collect()
    }

    /// Visit every record, part by part in manifest order. Returns the row count.
    pub fn scan<F>(&self, mut visit: F) -> Result<u64>
    where
        F: FnMut(Record) -> Result<()>,
    {
        let mut rows = 0u64;
        for path in self.part_paths() {
            rows += scan_part(&path, &mut visit)?;
        }
        Ok(rows)
    }

    pub fn read_all(&self) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        self.scan(|record| {
            records.push(record);
            Ok(())
        })?;
        Ok(records)
    }
}

/// Visit every record of one part file.
pub fn scan_part<F>(path: &Path, visit: &mut F) -> Result<u64>
where
    F: FnMut(Record) -> Result<()>,
{
    let reader = SerializedFileReader::new(File::open(path)?)?;
    let mut rows = 0u64;
    for row in reader.get_row_iter(None)? {
        visit(record_from_row(&row?)?)?;
        rows += 1;
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(pmid: i64) -> Record {
        Record {
            pmid,
            title: Some(format!("Title {}", pmid)),
            venue: Some("Journal of Testing".into()),
            year: Some(1990),
            month: Some(2),
            day: None,
            medline_date: Some("1990 Jan-Feb".into()),
            language: Some("eng".into()),
            abstract_text: None,
            issn: Some("0001-0001".into()),
            authors: vec!["Smith, Jane".into(), "Doe, J".into()],
            publication_types: vec![],
            source_archive: "pubmed24n0001.xml.gz".into(),
            ..Record::default()
        }
    }

    #[test]
    fn part_names_drop_archive_extensions() {
        assert_eq!(
            part_file_name("pubmed24n0001.xml.gz"),
            "part-pubmed24n0001.parquet"
        );
        assert_eq!(part_file_name("extra.xml"), "part-extra.parquet");
    }

    #[test]
    fn part_preserves_nulls_and_lists_across_row_groups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part-test.parquet");
        let records: Vec<Record> = (1..=5).map(sample).collect();

        assert_eq!(write_part(&path, &records, 2).unwrap(), 5);

        let reader = SerializedFileReader::new(File::open(&path).unwrap()).unwrap();
        assert_eq!(reader.metadata().num_row_groups(), 3);

        let mut read = Vec::new();
        scan_part(&path, &mut |r: Record| {
            read.push(r);
            Ok(())
        })
        .unwrap();
        assert_eq!(read, records);
        assert_eq!(read[0].day, None);
        assert_eq!(read[0].authors, vec!["Smith, Jane", "Doe, J"]);
    }

    #[test]
    fn list_items_keep_their_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part-lists.parquet");
        let records = vec![
            Record {
                authors: vec!["Group A; Group B".into()],
                publication_types: vec!["Journal Article".into(), "Review".into()],
                ..sample(1)
            },
            Record {
                authors: vec![],
                ..sample(2)
            },
            Record {
                authors: vec!["Solo, Author".into()],
                ..sample(3)
            },
        ];
        write_part(&path, &records, 10).unwrap();

        let mut read = Vec::new();
        scan_part(&path, &mut |r: Record| {
            read.push(r);
            Ok(())
        })
        .unwrap();
        assert_eq!(read[0].authors, vec!["Group A; Group B"]);
        assert_eq!(read[0].publication_types, vec!["Journal Article", "Review"]);
        assert!(read[1].authors.is_empty());
        assert_eq!(read[2].authors, vec!["Solo, Author"]);
        assert_eq!(read, records);
    }

    #[test]
    fn open_fails_fast_on_missing_dataset_or_part() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            DatasetReader::open(dir.path().join("absent")),
            Err(EtlError::MissingInput { .. })
        ));
        assert!(matches!(
            DatasetReader::open(dir.path()),
            Err(EtlError::MissingInput { .. })
        ));

        let manifest = DatasetManifest::new(
            vec![PartInfo {
                archive: "a.xml.gz".into(),
                file: "part-a.parquet".into(),
                records: 1,
                stats: ParseStats::default(),
                truncated: None,
            }],
            vec![],
        );
        manifest.write(dir.path()).unwrap();
        assert!(matches!(
            DatasetReader::open(dir.path()),
            Err(EtlError::MissingInput { .. })
        ));
    }

    #[test]
    fn manifest_orders_parts_and_totals_stats() {
        let part = |archive: &str, parsed: u64| PartInfo {
            archive: archive.into(),
            file: part_file_name(archive),
            records: parsed,
            stats: ParseStats {
                parsed,
                ..ParseStats::default()
            },
            truncated: None,
        };
        let manifest = DatasetManifest::new(
            vec![part("b.xml.gz", 3), part("a.xml.gz", 2)],
            vec![FailedArchive {
                archive: "c.xml.gz".into(),
                reason: "404".into(),
            }],
        );
        assert_eq!(manifest.parts[0].archive, "a.xml.gz");
        assert_eq!(manifest.total_records, 5);
        assert_eq!(manifest.stats.parsed, 5);
        assert_eq!(manifest.schema_version, DATASET_SCHEMA_VERSION);
    }
}
