//! Streaming MEDLINE/PubMed XML parser.
//!
//! Walks `PubmedArticleSet/PubmedArticle` with quick-xml and flattens each
//! article into a [`Record`]. Unknown elements are skipped whole so nested
//! identifiers (e.g. `CommentsCorrections/PMID`) never leak into the parent.
//! A bad article is skipped and counted; only an XML error between articles
//! stops the archive.

use chrono::NaiveDate;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::io::BufRead;
use tracing::{debug, warn};

use super::date::{self, YearSource};
use crate::types::{ParseStats, PubDate, Record};

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("xml: {0}")]
    Xml(String),
    #[error("record has no PMID")]
    MissingPmid,
    #[error("PMID {0:?} is not a positive integer")]
    InvalidPmid(String),
}

fn xml_err<E: std::fmt::Display>(e: E) -> RecordError {
    RecordError::Xml(e.to_string())
}

const ARTICLE: &[u8] = b"PubmedArticle";

/// Where the input stands after skipping the rest of a broken article.
enum Resync {
    ArticleEnd,
    /// The start tag of the next article was consumed; its body comes next.
    NextArticle,
    Eof,
}

/// quick-xml reader that checks end tags against its own stack of open
/// elements. quick-xml's own check is off: after a mismatch its stack no
/// longer matches the input, and every later end tag would fail too.
struct XmlCursor<R> {
    reader: Reader<R>,
    open: Vec<Vec<u8>>,
    /// A mismatch was reported on `</PubmedArticle>` itself.
    article_closed: bool,
    /// A `<PubmedArticle>` start tag appeared inside an unfinished article.
    article_opened: bool,
}

impl<R: BufRead> XmlCursor<R> {
    fn new(input: R) -> Self {
        let mut reader = Reader::from_reader(input);
        reader.config_mut().check_end_names = false;
        Self {
            reader,
            open: Vec::new(),
            article_closed: false,
            article_opened: false,
        }
    }

    fn next<'b>(&mut self, buf: &'b mut Vec<u8>) -> Result<Event<'b>, RecordError> {
        let event = self.reader.read_event_into(buf).map_err(xml_err)?;
        match &event {
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                if name == ARTICLE && self.open.iter().any(|open| open == ARTICLE) {
                    self.article_opened = true;
                    return Err(RecordError::Xml(
                        "`<PubmedArticle>` found inside an unfinished article".into(),
                    ));
                }
                self.open.push(name);
            }
            Event::End(e) => {
                let name = e.name();
                match self.open.pop() {
                    Some(open) if open == name.as_ref() => {}
                    Some(open) => {
                        self.article_closed = name.as_ref() == ARTICLE;
                        return Err(RecordError::Xml(format!(
                            "expected `</{}>`, but `</{}>` was found",
                            String::from_utf8_lossy(&open),
                            String::from_utf8_lossy(name.as_ref())
                        )));
                    }
                    None => {
                        return Err(RecordError::Xml(format!(
                            "unexpected `</{}>`",
                            String::from_utf8_lossy(name.as_ref())
                        )))
                    }
                }
            }
            _ => {}
        }
        Ok(event)
    }

    fn depth(&self) -> usize {
        self.open.len()
    }

    fn position(&self) -> u64 {
        self.reader.buffer_position() as u64
    }

    /// Skip to the end of the current article, leaving `outer_depth` elements open.
    fn resync(&mut self, outer_depth: usize) -> Result<Resync, RecordError> {
        self.open.truncate(outer_depth);
        if std::mem::take(&mut self.article_closed) {
            return Ok(Resync::ArticleEnd);
        }
        if std::mem::take(&mut self.article_opened) {
            self.open.push(ARTICLE.to_vec());
            return Ok(Resync::NextArticle);
        }

        let mut buf = Vec::new();
        loop {
            match self.reader.read_event_into(&mut buf).map_err(xml_err)? {
                Event::Start(e) if e.name().as_ref() == ARTICLE => {
                    self.open.push(ARTICLE.to_vec());
                    return Ok(Resync::NextArticle);
                }
                Event::End(e) if e.name().as_ref() == ARTICLE => return Ok(Resync::ArticleEnd),
                Event::Eof => return Ok(Resync::Eof),
                _ => {}
            }
            buf.clear();
        }
    }
}

/// Records and counters from one archive.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub records: Vec<Record>,
    pub stats: ParseStats,
    /// Set when an XML error outside any article stopped the archive early.
    pub truncated: Option<String>,
}

/// Article fields as read from XML, before validation.
#[derive(Debug, Default)]
struct RawArticle {
    pmid: Option<String>,
    title: Option<String>,
    venue: Option<String>,
    pub_date: PubDate,
    languages: Vec<String>,
    abstract_parts: Vec<String>,
    issn: Option<String>,
    iso_abbreviation: Option<String>,
    medline_ta: Option<String>,
    nlm_unique_id: Option<String>,
    country: Option<String>,
    volume: Option<String>,
    issue: Option<String>,
    publication_types: Vec<String>,
    authors: Vec<String>,
    date_completed: Option<String>,
    date_revised: Option<String>,
}

impl RawArticle {
    fn into_record(self, archive: &str) -> Result<(Record, YearSource), RecordError> {
        let pmid_text = self.pmid.ok_or(RecordError::MissingPmid)?;
        let pmid = pmid_text
            .parse::<i64>()
            .ok()
            .filter(|id| *id > 0)
            .ok_or_else(|| RecordError::InvalidPmid(pmid_text.clone()))?;

        let (year, source) = date::resolve(&self.pub_date);
        let abstract_text = if self.abstract_parts.is_empty() {
            None
        } else {
            non_empty(self.abstract_parts.join(" "))
        };
        let language = if self.languages.is_empty() {
            None
        } else {
            Some(self.languages.join(";"))
        };

        let record = Record {
            pmid,
            title: self.title,
            venue: self.venue,
            year,
            month: self.pub_date.month,
            day: self.pub_date.day,
            medline_date: self.pub_date.medline_date,
            language,
            abstract_text,
            issn: self.issn,
            iso_abbreviation: self.iso_abbreviation,
            medline_ta: self.medline_ta,
            nlm_unique_id: self.nlm_unique_id,
            country: self.country,
            volume: self.volume,
            issue: self.issue,
            publication_types: self.publication_types,
            authors: self.authors,
            date_completed: self.date_completed,
            date_revised: self.date_revised,
            source_archive: archive.to_string(),
        };
        Ok((record, source))
    }
}

pub struct MedlineParser {
    archive: String,
}

impl MedlineParser {
    /// `archive` is stamped on every record as `source_archive`.
    pub fn new(archive: impl Into<String>) -> Self {
        Self {
            archive: archive.into(),
        }
    }

    pub fn parse_str(&self, xml: &str) -> ParseOutcome {
        self.parse_reader(xml.as_bytes())
    }

    pub fn parse_reader<R: BufRead>(&self, input: R) -> ParseOutcome {
        let mut reader = XmlCursor::new(input);
        let mut outcome = ParseOutcome::default();
        let mut buf = Vec::new();

        loop {
            let at_article = match reader.next(&mut buf) {
                Ok(Event::Start(e)) => match e.name().as_ref() {
                    ARTICLE => true,
                    // Container; its children are handled above
                    b"PubmedArticleSet" => false,
                    // Book records and update-file deletions carry no article
                    other => {
                        debug!(
                            archive = %self.archive,
                            element = %String::from_utf8_lossy(other),
                            "skipping non-article element"
                        );
                        if let Err(e) = skip_element(&mut reader) {
                            outcome.truncated = Some(e.to_string());
                            break;
                        }
                        false
                    }
                },
                Ok(Event::Eof) => break,
                Ok(_) => false,
                Err(e) => {
                    warn!(
                        archive = %self.archive,
                        position = reader.position(),
                        error = %e,
                        "archive stopped early on XML error"
                    );
                    outcome.truncated = Some(e.to_string());
                    break;
                }
            };
            buf.clear();

            if at_article {
                if let Err(e) = self.read_articles(&mut reader, &mut outcome) {
                    warn!(
                        archive = %self.archive,
                        position = reader.position(),
                        error = %e,
                        "archive stopped early on XML error"
                    );
                    outcome.truncated = Some(e.to_string());
                    break;
                }
            }
        }

        outcome
    }

    /// Parse the article whose start tag was just read. A structurally broken
    /// article is counted, then the input is skipped to the next article
    /// boundary; an article found while skipping is parsed in turn.
    fn read_articles<R: BufRead>(
        &self,
        reader: &mut XmlCursor<R>,
        outcome: &mut ParseOutcome,
    ) -> Result<(), RecordError> {
        let outer_depth = reader.depth().saturating_sub(1);
        loop {
            let result = parse_article(reader).and_then(|raw| raw.into_record(&self.archive));
            let broken = matches!(result, Err(RecordError::Xml(_)));
            self.accept(result, outcome, reader.position());
            if !broken {
                return Ok(());
            }
            match reader.resync(outer_depth)? {
                Resync::ArticleEnd | Resync::Eof => return Ok(()),
                Resync::NextArticle => {}
            }
        }
    }

    fn accept(
        &self,
        result: Result<(Record, YearSource), RecordError>,
        outcome: &mut ParseOutcome,
        position: u64,
    ) {
        match result {
            Ok((record, source)) => {
                match source {
                    YearSource::MedlineDate => outcome.stats.year_from_medline_date += 1,
                    YearSource::Unresolved => outcome.stats.year_unresolved += 1,
                    YearSource::Structured => {}
                }
                outcome.stats.parsed += 1;
                outcome.records.push(record);
            }
            Err(e) => {
                warn!(
                    archive = %self.archive,
                    position,
                    error = %e,
                    "skipping malformed record"
                );
                outcome.stats.malformed += 1;
            }
        }
    }
}

fn parse_article<R: BufRead>(reader: &mut XmlCursor<R>) -> Result<RawArticle, RecordError> {
    let mut article = RawArticle::default();
    let mut buf = Vec::new();

    loop {
        match reader.next(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"MedlineCitation" => parse_medline_citation(reader, &mut article)?,
                _ => skip_element(reader)?,
            },
            Event::End(_) => break,
            Event::Eof => return Err(unexpected_eof("PubmedArticle")),
            _ => {}
        }
        buf.clear();
    }

    Ok(article)
}

fn parse_medline_citation<R: BufRead>(
    reader: &mut XmlCursor<R>,
    article: &mut RawArticle,
) -> Result<(), RecordError> {
    let mut buf = Vec::new();

    loop {
        match reader.next(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"PMID" => article.pmid = read_optional_text(reader)?,
                b"DateCompleted" => article.date_completed = parse_ymd(reader)?,
                b"DateRevised" => article.date_revised = parse_ymd(reader)?,
                b"Article" => parse_article_element(reader, article)?,
                b"MedlineJournalInfo" => parse_journal_info(reader, article)?,
                _ => skip_element(reader)?,
            },
            Event::End(_) => break,
            Event::Eof => return Err(unexpected_eof("MedlineCitation")),
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

fn parse_article_element<R: BufRead>(
    reader: &mut XmlCursor<R>,
    article: &mut RawArticle,
) -> Result<(), RecordError> {
    let mut buf = Vec::new();

    loop {
        match reader.next(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"Journal" => parse_journal(reader, article)?,
                b"ArticleTitle" => article.title = read_optional_text(reader)?,
                b"Abstract" => article.abstract_parts = parse_abstract(reader)?,
                b"AuthorList" => article.authors = parse_author_list(reader)?,
                b"Language" => {
                    if let Some(lang) = read_optional_text(reader)? {
                        article.languages.push(lang);
                    }
                }
                b"PublicationTypeList" => {
                    article.publication_types = collect_children(reader, b"PublicationType")?
                }
                _ => skip_element(reader)?,
            },
            Event::End(_) => break,
            Event::Eof => return Err(unexpected_eof("Article")),
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

fn parse_journal<R: BufRead>(
    reader: &mut XmlCursor<R>,
    article: &mut RawArticle,
) -> Result<(), RecordError> {
    let mut buf = Vec::new();

    loop {
        match reader.next(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"ISSN" => article.issn = read_optional_text(reader)?,
                b"Title" => article.venue = read_optional_text(reader)?,
                b"ISOAbbreviation" => article.iso_abbreviation = read_optional_text(reader)?,
                b"JournalIssue" => parse_journal_issue(reader, article)?,
                _ => skip_element(reader)?,
            },
            Event::End(_) => break,
            Event::Eof => return Err(unexpected_eof("Journal")),
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

fn parse_journal_issue<R: BufRead>(
    reader: &mut XmlCursor<R>,
    article: &mut RawArticle,
) -> Result<(), RecordError> {
    let mut buf = Vec::new();

    loop {
        match reader.next(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"Volume" => article.volume = read_optional_text(reader)?,
                b"Issue" => article.issue = read_optional_text(reader)?,
                b"PubDate" => article.pub_date = parse_pub_date(reader)?,
                _ => skip_element(reader)?,
            },
            Event::End(_) => break,
            Event::Eof => return Err(unexpected_eof("JournalIssue")),
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

fn parse_pub_date<R: BufRead>(reader: &mut XmlCursor<R>) -> Result<PubDate, RecordError> {
    let mut pub_date = PubDate::default();
    let mut buf = Vec::new();

    loop {
        match reader.next(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"Year" => pub_date.year = date::parse_structured_year(&read_text(reader)?),
                b"Month" => pub_date.month = date::parse_month(&read_text(reader)?),
                b"Day" => pub_date.day = date::parse_day(&read_text(reader)?),
                b"MedlineDate" => pub_date.medline_date = read_optional_text(reader)?,
                _ => skip_element(reader)?,
            },
            Event::End(_) => break,
            Event::Eof => return Err(unexpected_eof("PubDate")),
            _ => {}
        }
        buf.clear();
    }

    Ok(pub_date)
}

fn parse_journal_info<R: BufRead>(
    reader: &mut XmlCursor<R>,
    article: &mut RawArticle,
) -> Result<(), RecordError> {
    let mut buf = Vec::new();

    loop {
        match reader.next(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"Country" => article.country = read_optional_text(reader)?,
                b"MedlineTA" => article.medline_ta = read_optional_text(reader)?,
                b"NlmUniqueID" => article.nlm_unique_id = read_optional_text(reader)?,
                _ => skip_element(reader)?,
            },
            Event::End(_) => break,
            Event::Eof => return Err(unexpected_eof("MedlineJournalInfo")),
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

/// Structured abstracts keep their section label: `BACKGROUND: ...`.
fn parse_abstract<R: BufRead>(reader: &mut XmlCursor<R>) -> Result<Vec<String>, RecordError> {
    let mut parts = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.next(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"AbstractText" => {
                    let label = attribute(&e, b"Label");
                    if let Some(text) = read_optional_text(reader)? {
                        match label {
                            Some(label) if !label.is_empty() => {
                                parts.push(format!("{}: {}", label, text))
                            }
                            _ => parts.push(text),
                        }
                    }
                }
                _ => skip_element(reader)?,
            },
            Event::End(_) => break,
            Event::Eof => return Err(unexpected_eof("Abstract")),
            _ => {}
        }
        buf.clear();
    }

    Ok(parts)
}

fn parse_author_list<R: BufRead>(reader: &mut XmlCursor<R>) -> Result<Vec<String>, RecordError> {
    let mut authors = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.next(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"Author" => {
                    if let Some(author) = parse_author(reader)? {
                        authors.push(author);
                    }
                }
                _ => skip_element(reader)?,
            },
            Event::End(_) => break,
            Event::Eof => return Err(unexpected_eof("AuthorList")),
            _ => {}
        }
        buf.clear();
    }

    Ok(authors)
}

/// "Last, Fore", "Last Initials", "Last", or the collective name.
fn parse_author<R: BufRead>(reader: &mut XmlCursor<R>) -> Result<Option<String>, RecordError> {
    let mut last = None;
    let mut fore = None;
    let mut initials = None;
    let mut collective = None;
    let mut buf = Vec::new();

    loop {
        match reader.next(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"LastName" => last = read_optional_text(reader)?,
                b"ForeName" => fore = read_optional_text(reader)?,
                b"Initials" => initials = read_optional_text(reader)?,
                b"CollectiveName" => collective = read_optional_text(reader)?,
                _ => skip_element(reader)?,
            },
            Event::End(_) => break,
            Event::Eof => return Err(unexpected_eof("Author")),
            _ => {}
        }
        buf.clear();
    }

    Ok(match (last, fore, initials) {
        (Some(last), Some(fore), _) => Some(format!("{}, {}", last, fore)),
        (Some(last), None, Some(initials)) => Some(format!("{} {}", last, initials)),
        (Some(last), None, None) => Some(last),
        (None, _, _) => collective,
    })
}

/// `DateCompleted` / `DateRevised` as `YYYY-MM-DD`; invalid dates become `None`.
fn parse_ymd<R: BufRead>(reader: &mut XmlCursor<R>) -> Result<Option<String>, RecordError> {
    let mut year = None;
    let mut month = None;
    let mut day = None;
    let mut buf = Vec::new();

    loop {
        match reader.next(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"Year" => year = date::parse_structured_year(&read_text(reader)?),
                b"Month" => month = date::parse_month(&read_text(reader)?),
                b"Day" => day = date::parse_day(&read_text(reader)?),
                _ => skip_element(reader)?,
            },
            Event::End(_) => break,
            Event::Eof => return Err(unexpected_eof("date")),
            _ => {}
        }
        buf.clear();
    }

    Ok(match (year, month, day) {
        (Some(y), Some(m), Some(d)) => {
            NaiveDate::from_ymd_opt(y, m, d).map(|date| date.format("%Y-%m-%d").to_string())
        }
        _ => None,
    })
}

/// Text of every `child` element directly under the current element.
fn collect_children<R: BufRead>(
    reader: &mut XmlCursor<R>,
    child: &[u8],
) -> Result<Vec<String>, RecordError> {
    let mut values = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.next(&mut buf)? {
            Event::Start(e) => {
                if e.name().as_ref() == child {
                    if let Some(value) = read_optional_text(reader)? {
                        values.push(value);
                    }
                } else {
                    skip_element(reader)?;
                }
            }
            Event::End(_) => break,
            Event::Eof => return Err(unexpected_eof("list")),
            _ => {}
        }
        buf.clear();
    }

    Ok(values)
}

/// Text content up to the matching end tag, with inline markup (`<i>`, `<sup>`)
/// flattened and whitespace collapsed.
fn read_text<R: BufRead>(reader: &mut XmlCursor<R>) -> Result<String, RecordError> {
    let mut buf = Vec::new();
    let mut text = String::new();
    let mut depth = 0usize;

    loop {
        match reader.next(&mut buf)? {
            Event::Text(e) => text.push_str(&e.unescape().map_err(xml_err)?),
            Event::CData(e) => text.push_str(&String::from_utf8_lossy(&e.into_inner())),
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
            }
            Event::Eof => return Err(unexpected_eof("text")),
            _ => {}
        }
        buf.clear();
    }

    Ok(text.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn read_optional_text<R: BufRead>(reader: &mut XmlCursor<R>) -> Result<Option<String>, RecordError> {
    read_text(reader).map(non_empty)
}

/// Consume the rest of the element whose start tag was just read.
fn skip_element<R: BufRead>(reader: &mut XmlCursor<R>) -> Result<(), RecordError> {
    let mut buf = Vec::new();
    let mut depth = 0usize;

    loop {
        match reader.next(&mut buf)? {
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
            }
            Event::Eof => return Err(unexpected_eof("skipped element")),
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == key)
        .map(|attr| String::from_utf8_lossy(&attr.value).trim().to_string())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

fn unexpected_eof(context: &str) -> RecordError {
    RecordError::Xml(format!("unexpected end of input inside {}", context))
}
