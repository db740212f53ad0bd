//! Publication date normalization.
//!
//! `PubDate` carries either a structured `Year` (with optional `Month`/`Day`)
//! or a free-text `MedlineDate` such as `1990 Jan-Feb` or `1977-1978 Winter`.
//! Everything here is pure so it can be tested without touching archives.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

use crate::types::PubDate;

// Four-digit years 1000-2999, not glued to other digits
static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([12]\d{3})\b").unwrap());

// Abbreviated range ends: `1998-99`, `1998 - 99`
static SHORT_RANGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([12]\d{3})\s*-\s*(\d{2})\b").unwrap());

/// Best known publication year.
///
/// A structured year wins unchanged. Otherwise the free-text date is searched
/// for a single unambiguous year.
pub fn normalize_year(structured: Option<i32>, free_text: Option<&str>) -> Option<i32> {
    match structured {
        Some(year) => Some(year),
        None => free_text.and_then(extract_year),
    }
}

/// Extract exactly one year from a free-text date, or `None` when the text
/// names no year or several distinct years (`1977-1978 Winter`,
/// `1998 Dec-1999 Jan`). Month and season qualifiers are ignored.
pub fn extract_year(text: &str) -> Option<i32> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let mut years = BTreeSet::new();
    for caps in YEAR_RE.captures_iter(text) {
        if let Ok(year) = caps[1].parse::<i32>() {
            years.insert(year);
        }
    }
    for caps in SHORT_RANGE_RE.captures_iter(text) {
        let (Ok(start), Ok(short_end)) = (caps[1].parse::<i32>(), caps[2].parse::<i32>()) else {
            continue;
        };
        years.insert(expand_short_year(start, short_end));
    }

    if years.len() == 1 {
        years.into_iter().next()
    } else {
        None
    }
}

/// `1998` + `99` -> `1999`; `1999` + `01` -> `2001`.
fn expand_short_year(start: i32, short_end: i32) -> i32 {
    let century = start - start % 100;
    let candidate = century + short_end;
    if candidate < start {
        candidate + 100
    } else {
        candidate
    }
}

/// Numeric month or English month name/abbreviation.
pub fn parse_month(text: &str) -> Option<u32> {
    let text = text.trim();
    if let Ok(n) = text.parse::<u32>() {
        return (1..=12).contains(&n).then_some(n);
    }
    let lower = text.to_lowercase();
    let month = match lower.get(..3)? {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    // Reject things like "Mayday" while accepting "May" and "September"
    let full = [
        "january", "february", "march", "april", "may", "june", "july", "august",
        "september", "october", "november", "december",
    ][month as usize - 1];
    if full.starts_with(lower.as_str()) || lower == "sept" {
        Some(month)
    } else {
        None
    }
}

/// Day of month, 1-31.
pub fn parse_day(text: &str) -> Option<u32> {
    text.trim()
        .parse::<u32>()
        .ok()
        .filter(|d| (1..=31).contains(d))
}

/// Structured year, only when the text is a plain number.
pub fn parse_structured_year(text: &str) -> Option<i32> {
    let text = text.trim();
    if text.len() != 4 {
        return None;
    }
    text.parse::<i32>().ok()
}

/// Outcome of normalizing one `PubDate`, used for parse statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YearSource {
    Structured,
    MedlineDate,
    Unresolved,
}

pub fn resolve(date: &PubDate) -> (Option<i32>, YearSource) {
    if let Some(year) = date.year {
        return (Some(year), YearSource::Structured);
    }
    match normalize_year(None, date.medline_date.as_deref()) {
        Some(year) => (Some(year), YearSource::MedlineDate),
        None => (None, YearSource::Unresolved),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_year_is_used_unchanged() {
        assert_eq!(normalize_year(Some(1987), None), Some(1987));
        // free text never overrides a structured year
        assert_eq!(normalize_year(Some(1987), Some("1990 Jan-Feb")), Some(1987));
        assert_eq!(normalize_year(Some(1987), Some("1977-1978 Winter")), Some(1987));
    }

    #[test]
    fn single_leading_year_with_months() {
        assert_eq!(normalize_year(None, Some("1990 Jan-Feb")), Some(1990));
        assert_eq!(extract_year("2001 Spring"), Some(2001));
        assert_eq!(extract_year("1985 Jul 12-19"), Some(1985));
        assert_eq!(extract_year("  1976  "), Some(1976));
    }

    #[test]
    fn ranges_across_years_are_ambiguous() {
        assert_eq!(normalize_year(None, Some("1977-1978 Winter")), None);
        assert_eq!(extract_year("1998 Dec-1999 Jan"), None);
        assert_eq!(extract_year("1998-99"), None);
        assert_eq!(extract_year("1999-00"), None);
    }

    #[test]
    fn range_with_identical_bounds_resolves() {
        assert_eq!(extract_year("1983-1983"), Some(1983));
        assert_eq!(extract_year("1983 Jan-1983 Mar"), Some(1983));
    }

    #[test]
    fn text_without_a_year_is_unresolved() {
        assert_eq!(extract_year("Winter"), None);
        assert_eq!(extract_year(""), None);
        assert_eq!(extract_year("Vol 12345"), None);
        assert_eq!(normalize_year(None, None), None);
    }

    #[test]
    fn short_years_expand_within_century() {
        assert_eq!(expand_short_year(1998, 99), 1999);
        assert_eq!(expand_short_year(1999, 1), 2001);
        assert_eq!(expand_short_year(2010, 10), 2010);
    }

    #[test]
    fn months_accept_numbers_and_names() {
        assert_eq!(parse_month("Jan"), Some(1));
        assert_eq!(parse_month("september"), Some(9));
        assert_eq!(parse_month("Sept"), Some(9));
        assert_eq!(parse_month("07"), Some(7));
        assert_eq!(parse_month("13"), None);
        assert_eq!(parse_month("Mayday"), None);
        assert_eq!(parse_month("Spring"), None);
    }

    #[test]
    fn structured_year_requires_four_digits() {
        assert_eq!(parse_structured_year("2003"), Some(2003));
        assert_eq!(parse_structured_year("03"), None);
        assert_eq!(parse_structured_year("1977-1978"), None);
    }

    #[test]
    fn resolve_reports_where_the_year_came_from() {
        let structured = PubDate {
            year: Some(2004),
            ..PubDate::default()
        };
        assert_eq!(resolve(&structured), (Some(2004), YearSource::Structured));

        let free_text = PubDate {
            medline_date: Some("1990 Jan-Feb".into()),
            ..PubDate::default()
        };
        assert_eq!(resolve(&free_text), (Some(1990), YearSource::MedlineDate));

        let ambiguous = PubDate {
            medline_date: Some("1977-1978 Winter".into()),
            ..PubDate::default()
        };
        assert_eq!(resolve(&ambiguous), (None, YearSource::Unresolved));
    }
}
