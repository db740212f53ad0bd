// Pipeline processing: record parsing, date normalization and venue filtering

pub mod date;
pub mod parser;
pub mod venue_filter;
