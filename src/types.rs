use serde::{Deserialize, Serialize};

/// One flattened publication record.
///
/// `year` is the best known publication year: the structured `PubDate/Year`
/// when present, otherwise a year recovered from `medline_date` when that
/// text names exactly one year. `medline_date` is always kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub pmid: i64,
    pub title: Option<String>,
    pub venue: Option<String>,
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
    pub medline_date: Option<String>,
    pub language: Option<String>,
    pub abstract_text: Option<String>,
    pub issn: Option<String>,
    pub iso_abbreviation: Option<String>,
    pub medline_ta: Option<String>,
    pub nlm_unique_id: Option<String>,
    pub country: Option<String>,
    pub volume: Option<String>,
    pub issue: Option<String>,
    pub publication_types: Vec<String>,
    pub authors: Vec<String>,
    pub date_completed: Option<String>,
    pub date_revised: Option<String>,
    pub source_archive: String,
}

impl Record {
    pub fn has_abstract(&self) -> bool {
        self.abstract_text
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty())
    }
}

/// Raw `PubDate` contents before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PubDate {
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
    pub medline_date: Option<String>,
}

/// Counters produced while parsing one archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseStats {
    pub parsed: u64,
    pub malformed: u64,
    pub year_from_medline_date: u64,
    pub year_unresolved: u64,
}

impl ParseStats {
    pub fn merge(&mut self, other: &ParseStats) {
        self.parsed += other.parsed;
        self.malformed += other.malformed;
        self.year_from_medline_date += other.year_from_medline_date;
        self.year_unresolved += other.year_unresolved;
    }
}
