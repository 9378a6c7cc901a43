//! Parsers that turn unstructured text into records
//!
//! Currently a single fixed grammar is supported:
//! - Apache Combined Log Format access logs

pub mod apache_combined;

pub use apache_combined::{
    ApacheCombinedLogParser, FieldValue, LogField, LogRecord, LogRecords, TIMESTAMP_FORMAT,
};

use std::io::Write;
use std::path::PathBuf;

/// Error while iterating the files a parser reads
#[derive(Debug, thiserror::Error)]
pub enum ParserError {
    /// The glob pattern could not be compiled
    #[error("Invalid file pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    /// A matched file could not be opened or read
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A record could not be serialised
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Writing parsed records failed
    #[error("Failed to write records: {0}")]
    Output(#[source] std::io::Error),
}

/// Result type for parser operations
pub type ParserResult<T> = Result<T, ParserError>;

/// Line counters of one parse run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ParseSummary {
    /// Lines read from all inputs
    pub lines: usize,
    /// Lines that did not match the grammar
    pub unparsed: usize,
}

/// Write every record as one JSON object per line
///
/// Stops at the first read or write error.
pub fn write_json_lines<W: Write>(
    mut records: LogRecords<'_>,
    mut writer: W,
) -> ParserResult<ParseSummary> {
    for record in records.by_ref() {
        let record = record?;
        let line =
            serde_json::to_string(&record).map_err(|e| ParserError::Serialization(e.to_string()))?;
        writer
            .write_all(line.as_bytes())
            .and_then(|_| writer.write_all(b"\n"))
            .map_err(ParserError::Output)?;
    }
    writer.flush().map_err(ParserError::Output)?;

    let summary = ParseSummary {
        lines: records.lines_read(),
        unparsed: records.unparsed_lines(),
    };
    tracing::info!(
        lines = summary.lines,
        unparsed = summary.unparsed,
        "Parsed log records"
    );
    Ok(summary)
}
