use anyhow::Result;
use medline_etl::app::filter_use_case::FilterUseCase;
use medline_etl::error::EtlError;
use medline_etl::pipeline::ingestion::archive_cache::CachedArchive;
use medline_etl::pipeline::processing::venue_filter::{AllowListOptions, MatchMode};
use medline_etl::pipeline::storage::builder::DatasetBuilder;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

fn sample_archive() -> CachedArchive {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("resources")
        .join("sample_archive.xml");
    CachedArchive {
        location: path.display().to_string(),
        name: "sample_archive.xml".into(),
        path,
    }
}

/// A built dataset plus a filter request pointing at it.
fn setup(allow_list: &str, mode: MatchMode) -> (TempDir, FilterUseCase) {
    let root = tempdir().unwrap();
    let dataset_dir = root.path().join("dataset");
    DatasetBuilder::new(1, 100)
        .build(&[sample_archive()], vec![], &dataset_dir)
        .unwrap();
    let allow_path = root.path().join("venues.csv");
    std::fs::write(&allow_path, allow_list).unwrap();

    let use_case = FilterUseCase {
        dataset_dir,
        allow_list: allow_path,
        allow_list_options: AllowListOptions {
            mode,
            has_header: true,
            venue_column: None,
        },
        output: root.path().join("out").join("filtered.csv"),
        delimiter: b',',
        require_abstract: false,
    };
    (root, use_case)
}

fn exported_pmids(path: &PathBuf) -> Vec<String> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    reader
        .records()
        .map(|r| r.unwrap()[0].to_string())
        .collect()
}

#[test]
fn exact_match_keeps_only_identical_venue_names() -> Result<()> {
    let (_root, use_case) = setup("Title\nJournal of Testing\n", MatchMode::Exact);
    let report = use_case.run()?;

    assert_eq!(report.scanned, 5);
    assert_eq!(report.matched, 2);
    assert_eq!(report.exported, 2);
    assert_eq!(exported_pmids(&report.output), vec!["1001", "1006"]);
    Ok(())
}

#[test]
fn ignore_case_match_adds_case_variants_only() -> Result<()> {
    let (_root, use_case) = setup("Title\nJournal of Testing\n", MatchMode::IgnoreCase);
    let report = use_case.run()?;

    assert_eq!(exported_pmids(&report.output), vec!["1001", "1002", "1006"]);
    Ok(())
}

#[test]
fn exported_rows_carry_normalized_dates_and_lists() -> Result<()> {
    let (_root, use_case) = setup("Title\nJournal of Testing\n", MatchMode::IgnoreCase);
    let report = use_case.run()?;

    let mut reader = csv::Reader::from_path(&report.output)?;
    let headers = reader.headers()?.clone();
    let column = |name: &str| headers.iter().position(|h| h == name).unwrap();
    let rows: Vec<csv::StringRecord> = reader.records().collect::<Result<_, _>>()?;

    let first = &rows[0];
    assert_eq!(&first[column("year")], "1987");
    assert_eq!(&first[column("month")], "3");
    assert_eq!(&first[column("day")], "5");
    assert_eq!(&first[column("authors")], "Smith, Jane; Doe JA");
    assert_eq!(&first[column("issn")], "0001-0001");

    let second = &rows[1];
    assert_eq!(&second[column("year")], "1990");
    assert_eq!(&second[column("medline_date")], "1990 Jan-Feb");
    assert_eq!(&second[column("abstract")], "");
    Ok(())
}

#[test]
fn require_abstract_drops_matches_without_one() -> Result<()> {
    let (_root, mut use_case) = setup("Title\nJournal of Testing\n", MatchMode::Exact);
    use_case.require_abstract = true;
    let report = use_case.run()?;

    assert_eq!(report.matched, 2);
    assert_eq!(report.dropped_without_abstract, 1);
    assert_eq!(exported_pmids(&report.output), vec!["1001"]);
    Ok(())
}

#[test]
fn issn_columns_extend_the_allow_list() -> Result<()> {
    let (_root, use_case) = setup("Title,ISSN\nSome Other Name,0010-0277\n", MatchMode::Exact);
    let report = use_case.run()?;

    assert_eq!(exported_pmids(&report.output), vec!["1005"]);
    Ok(())
}

#[test]
fn abbreviation_and_nlm_id_columns_extend_the_allow_list() -> Result<()> {
    let (_root, use_case) = setup(
        "Title,MedlineAbbr,NlmId\nNothing Listed,j test methods,\nAlso Unlisted,,0367541\n",
        MatchMode::Exact,
    );
    let report = use_case.run()?;

    assert_eq!(exported_pmids(&report.output), vec!["1003", "1005"]);
    Ok(())
}

#[test]
fn empty_allow_list_fails_before_any_output() {
    let (_root, use_case) = setup("Title\n", MatchMode::Exact);
    let err = use_case.run().unwrap_err();

    assert!(matches!(err, EtlError::EmptyAllowList(_)));
    assert!(!use_case.output.exists());
    assert!(!use_case.output.parent().unwrap().exists());
}

#[test]
fn missing_dataset_fails_before_any_output() {
    let (root, mut use_case) = setup("Title\nJournal of Testing\n", MatchMode::Exact);
    use_case.dataset_dir = root.path().join("no-such-dataset");
    let err = use_case.run().unwrap_err();

    assert!(matches!(err, EtlError::MissingInput { .. }));
    assert!(!use_case.output.exists());
}
