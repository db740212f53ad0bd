//! Venue allow-list and the per-record inclusion predicate.

use std::collections::HashSet;
use std::path::Path;
use tracing::info;

use crate::error::{EtlError, Result};
use crate::types::Record;

/// Case policy for venue names. ISSN and abbreviation keys always compare
/// case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    /// Byte-exact comparison of the record venue with an allow-list name.
    #[default]
    Exact,
    /// Comparison after Unicode lowercasing both sides.
    IgnoreCase,
}

#[derive(Debug, Clone, Default)]
pub struct AllowListOptions {
    pub mode: MatchMode,
    /// When true the first row is a header; `venue_column` and the key columns
    /// are located by header name.
    pub has_header: bool,
    /// Header of the venue column. Defaults to the first column.
    pub venue_column: Option<String>,
}

/// Extra key a header column contributes, picked by a case-insensitive
/// substring of its name. Checked in this order, so `ISSN_Abbr` is an ISSN column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyColumn {
    /// Cells split on `,`; compared case-insensitively with the record ISSN.
    Issn,
    /// Compared case-insensitively with `ISOAbbreviation` and `MedlineTA`.
    Abbreviation,
    /// Compared exactly with `NlmUniqueID`.
    NlmId,
}

impl KeyColumn {
    fn classify(header: &str) -> Option<Self> {
        let header = header.to_lowercase();
        if header.contains("issn") {
            Some(KeyColumn::Issn)
        } else if header.contains("abbr") {
            Some(KeyColumn::Abbreviation)
        } else if header.contains("id") {
            Some(KeyColumn::NlmId)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VenueAllowList {
    mode: MatchMode,
    venues: HashSet<String>,
    issns: HashSet<String>,
    abbreviations: HashSet<String>,
    nlm_ids: HashSet<String>,
}

impl VenueAllowList {
    /// Load the allow-list, failing fast when the file is missing or holds no entries.
    pub fn load(path: &Path, options: &AllowListOptions) -> Result<Self> {
        if !path.is_file() {
            return Err(EtlError::missing("venue allow-list", path));
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(options.has_header)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)?;

        let (venue_idx, key_columns) = if options.has_header {
            let headers = reader.headers()?.clone();
            let venue_idx = match &options.venue_column {
                Some(name) => headers.iter().position(|h| h == name).ok_or_else(|| {
                    EtlError::Config(format!(
                        "venue column {:?} not found in {} (columns: {:?})",
                        name,
                        path.display(),
                        headers.iter().collect::<Vec<_>>()
                    ))
                })?,
                None => 0,
            };
            let key_columns: Vec<(usize, KeyColumn)> = headers
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != venue_idx)
                .filter_map(|(i, h)| KeyColumn::classify(h).map(|kind| (i, kind)))
                .collect();
            (venue_idx, key_columns)
        } else {
            (0, Vec::new())
        };

        let mut list = VenueAllowList {
            mode: options.mode,
            ..VenueAllowList::default()
        };
        for row in reader.records() {
            let row = row?;
            if let Some(name) = row.get(venue_idx) {
                list.add_venue(name);
            }
            for &(i, kind) in &key_columns {
                let Some(cell) = row.get(i) else { continue };
                match kind {
                    KeyColumn::Issn => cell.split(',').for_each(|issn| {
                        insert_key(&mut list.issns, issn.to_lowercase());
                    }),
                    KeyColumn::Abbreviation => insert_key(&mut list.abbreviations, cell.to_lowercase()),
                    KeyColumn::NlmId => insert_key(&mut list.nlm_ids, cell.to_string()),
                }
            }
        }

        if list.is_empty() {
            return Err(EtlError::EmptyAllowList(path.to_path_buf()));
        }
        info!(
            path = %path.display(),
            venues = list.venues.len(),
            issns = list.issns.len(),
            abbreviations = list.abbreviations.len(),
            nlm_ids = list.nlm_ids.len(),
            mode = ?list.mode,
            "loaded venue allow-list"
        );
        Ok(list)
    }

    /// Build from in-memory names; blank entries are dropped.
    pub fn from_names<I, S>(mode: MatchMode, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = VenueAllowList {
            mode,
            ..VenueAllowList::default()
        };
        for name in names {
            list.add_venue(name.as_ref());
        }
        list
    }

    fn add_venue(&mut self, name: &str) {
        let name = match self.mode {
            MatchMode::Exact => name.trim().to_string(),
            MatchMode::IgnoreCase => name.trim().to_lowercase(),
        };
        insert_key(&mut self.venues, name);
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        self.venues.len() + self.issns.len() + self.abbreviations.len() + self.nlm_ids.len()
    }

    pub fn contains_venue(&self, venue: &str) -> bool {
        match self.mode {
            MatchMode::Exact => self.venues.contains(venue),
            MatchMode::IgnoreCase => self.venues.contains(&venue.to_lowercase()),
        }
    }

    /// Inclusion predicate: venue name, ISSN, journal abbreviation or NLM id on the list.
    pub fn matches(&self, record: &Record) -> bool {
        let folded = |set: &HashSet<String>, value: Option<&str>| {
            value.is_some_and(|v| set.contains(&v.trim().to_lowercase()))
        };
        record
            .venue
            .as_deref()
            .is_some_and(|venue| self.contains_venue(venue))
            || (!self.issns.is_empty() && folded(&self.issns, record.issn.as_deref()))
            || (!self.abbreviations.is_empty()
                && (folded(&self.abbreviations, record.iso_abbreviation.as_deref())
                    || folded(&self.abbreviations, record.medline_ta.as_deref())))
            || record
                .nlm_unique_id
                .as_deref()
                .is_some_and(|id| self.nlm_ids.contains(id.trim()))
    }
}

fn insert_key(set: &mut HashSet<String>, key: String) {
    let key = key.trim();
    if !key.is_empty() {
        set.insert(key.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn record(pmid: i64, venue: &str) -> Record {
        Record {
            pmid,
            venue: Some(venue.to_string()),
            ..Record::default()
        }
    }

    #[test]
    fn exact_mode_is_case_sensitive() {
        let list = VenueAllowList::from_names(MatchMode::Exact, ["Journal of Testing"]);
        assert!(list.matches(&record(1, "Journal of Testing")));
        assert!(!list.matches(&record(2, "journal of testing")));
        assert!(!list.matches(&record(3, "JOURNAL OF TESTING")));
        assert!(!list.matches(&record(4, "Journal of Testing Methods")));
        assert!(!list.matches(&Record::default()));
    }

    #[test]
    fn ignore_case_mode_folds_case_but_not_content() {
        let list = VenueAllowList::from_names(MatchMode::IgnoreCase, ["Journal of Testing"]);
        assert!(list.matches(&record(1, "Journal of Testing")));
        assert!(list.matches(&record(2, "journal of testing")));
        assert!(list.matches(&record(3, "JOURNAL OF TESTING")));
        assert!(!list.matches(&record(4, "Journal of Testing Methods")));
    }

    #[test]
    fn loads_header_file_with_named_column_and_issns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journals.csv");
        fs::write(
            &path,
            "NlmId,Title,ISSN_Print,Status\n\
             1,Journal of Testing,\"0001-0001, 0001-000X\",True\n\
             2,  Cognition  ,0010-0277,False\n\
             3,,,\n",
        )
        .unwrap();

        let options = AllowListOptions {
            mode: MatchMode::Exact,
            has_header: true,
            venue_column: Some("Title".into()),
        };
        let list = VenueAllowList::load(&path, &options).unwrap();
        assert!(list.contains_venue("Journal of Testing"));
        assert!(list.contains_venue("Cognition"));
        // two venues, three ISSNs, three NLM ids
        assert_eq!(list.len(), 2 + 3 + 3);

        let by_issn = Record {
            pmid: 9,
            venue: Some("Unlisted Title".into()),
            issn: Some("0001-000x".into()),
            ..Record::default()
        };
        assert!(list.matches(&by_issn));
    }

    #[test]
    fn abbreviation_and_id_columns_match_journal_identifiers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journals.csv");
        fs::write(&path, "Title,ISOAbbr,NlmUniqueId\n,Cogn Sci,\n,,0367541\n").unwrap();
        let options = AllowListOptions {
            has_header: true,
            ..AllowListOptions::default()
        };
        let list = VenueAllowList::load(&path, &options).unwrap();
        assert_eq!(list.len(), 2);

        let by_iso = Record {
            iso_abbreviation: Some("COGN SCI".into()),
            ..record(1, "Cognitive Science")
        };
        let by_medline_ta = Record {
            medline_ta: Some("Cogn Sci".into()),
            ..record(2, "Cognitive Science")
        };
        let by_nlm_id = Record {
            nlm_unique_id: Some("0367541".into()),
            ..record(3, "Cognition")
        };
        let unlisted = Record {
            iso_abbreviation: Some("Cogn".into()),
            nlm_unique_id: Some("0367542".into()),
            ..record(4, "Cognition")
        };
        assert!(list.matches(&by_iso));
        assert!(list.matches(&by_medline_ta));
        assert!(list.matches(&by_nlm_id));
        assert!(!list.matches(&unlisted));
    }

    #[test]
    fn headerless_file_uses_first_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("venues.csv");
        fs::write(&path, "Journal of Testing\nCognition\n").unwrap();
        let options = AllowListOptions {
            mode: MatchMode::Exact,
            has_header: false,
            venue_column: None,
        };
        let list = VenueAllowList::load(&path, &options).unwrap();
        assert_eq!(list.len(), 2);
        assert!(list.contains_venue("Journal of Testing"));
    }

    #[test]
    fn empty_or_missing_allow_list_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let options = AllowListOptions {
            has_header: true,
            ..AllowListOptions::default()
        };

        let missing = dir.path().join("missing.csv");
        assert!(matches!(
            VenueAllowList::load(&missing, &options),
            Err(EtlError::MissingInput { .. })
        ));

        let empty = dir.path().join("empty.csv");
        fs::write(&empty, "").unwrap();
        assert!(matches!(
            VenueAllowList::load(&empty, &options),
            Err(EtlError::EmptyAllowList(_))
        ));

        let header_only = dir.path().join("header_only.csv");
        fs::write(&header_only, "Title\n").unwrap();
        assert!(matches!(
            VenueAllowList::load(&header_only, &options),
            Err(EtlError::EmptyAllowList(_))
        ));
    }

    #[test]
    fn unknown_venue_column_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journals.csv");
        fs::write(&path, "Title\nJournal of Testing\n").unwrap();
        let options = AllowListOptions {
            mode: MatchMode::Exact,
            has_header: true,
            venue_column: Some("JournalTitle".into()),
        };
        assert!(matches!(
            VenueAllowList::load(&path, &options),
            Err(EtlError::Config(_))
        ));
    }
}
