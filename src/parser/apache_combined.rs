//! Apache Combined Log Format parser
//!
//! Parses access-log lines as defined at
//! <http://httpd.apache.org/docs/2.2/logs.html> into [`LogRecord`]s:
//!
//! ```text
//! 127.0.0.1 - frank [10/Oct/2000:13:55:36 -0700] "GET /apache_pb.gif HTTP/1.0" 200 2326 "http://www.example.com/start.html" "Mozilla/4.08 [en] (Win98; I ;Nav)"
//! ```
//!
//! Lines that do not match the grammar are not errors: they produce a record
//! with every field absent. [`LogRecords`] counts them so callers can report
//! how much of an input was unusable.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::ser::{Serialize, SerializeMap, Serializer};

use super::{ParserError, ParserResult};

// Separators are ASCII whitespace only, other spaces belong to the field
static LINE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    let s = r"[ \t\n\x0B\x0C\r]";
    let t = r"[^ \t\n\x0B\x0C\r]";
    Regex::new(&format!(
        r#"^({t}+){s}({t}+){s}({t}+){s}\[([^\]]*)\]{s}"([^"]*)"{s}([0-9]*){s}({t}*){s}"([^"]*)"{s}"([^"]*)"$"#
    ))
    .expect("Invalid regex")
});

/// Timestamp layout inside the brackets; the trailing zone offset is ignored
pub const TIMESTAMP_FORMAT: &str = "%d/%b/%Y:%H:%M:%S";

/// Layout used when a parsed timestamp is serialized
const TIMESTAMP_OUTPUT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Placeholder the log format uses for "no value"
const PLACEHOLDER: &str = "-";

/// Named fields of a [`LogRecord`], in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogField {
    IpAddress,
    Identd,
    User,
    Timestamp,
    Request,
    ResponseCode,
    Bytes,
    Referrer,
    UserAgent,
    /// First token of `request`
    Method,
    /// Second token of `request`
    Path,
}

impl LogField {
    /// Number of fields in a record
    pub const COUNT: usize = 11;

    /// Every field, in declaration order
    pub const ALL: [LogField; LogField::COUNT] = [
        LogField::IpAddress,
        LogField::Identd,
        LogField::User,
        LogField::Timestamp,
        LogField::Request,
        LogField::ResponseCode,
        LogField::Bytes,
        LogField::Referrer,
        LogField::UserAgent,
        LogField::Method,
        LogField::Path,
    ];

    /// Fields filled positionally from the grammar's capture groups
    const CAPTURED: [LogField; 9] = [
        LogField::IpAddress,
        LogField::Identd,
        LogField::User,
        LogField::Timestamp,
        LogField::Request,
        LogField::ResponseCode,
        LogField::Bytes,
        LogField::Referrer,
        LogField::UserAgent,
    ];

    /// Field name as used in serialized output
    pub fn name(&self) -> &'static str {
        match self {
            LogField::IpAddress => "ip_address",
            LogField::Identd => "identd",
            LogField::User => "user",
            LogField::Timestamp => "timestamp",
            LogField::Request => "request",
            LogField::ResponseCode => "response_code",
            LogField::Bytes => "bytes",
            LogField::Referrer => "referrer",
            LogField::UserAgent => "user_agent",
            LogField::Method => "method",
            LogField::Path => "path",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for LogField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Value of a single record field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Raw text as captured (also used for timestamps that failed to parse)
    Text(String),
    /// Integer conversion of the `bytes` field
    Integer(i64),
    /// Parsed timestamp, zone offset discarded
    Timestamp(NaiveDateTime),
}

impl FieldValue {
    /// Text content, if this is a text value
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Text(s) => serializer.serialize_str(s),
            FieldValue::Integer(n) => serializer.serialize_i64(*n),
            FieldValue::Timestamp(ts) => {
                serializer.collect_str(&ts.format(TIMESTAMP_OUTPUT_FORMAT))
            }
        }
    }
}

/// One parsed access-log line
///
/// Every [`LogField`] is always present; absent values are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogRecord {
    values: [Option<FieldValue>; LogField::COUNT],
}

impl LogRecord {
    /// Record with every field absent
    pub fn empty() -> Self {
        Self::default()
    }

    /// Value of a field
    pub fn get(&self, field: LogField) -> Option<&FieldValue> {
        self.values[field.index()].as_ref()
    }

    /// Text value of a field (None when absent or not text)
    pub fn text(&self, field: LogField) -> Option<&str> {
        self.get(field).and_then(FieldValue::as_text)
    }

    /// Byte count, when present
    pub fn bytes(&self) -> Option<i64> {
        match self.get(LogField::Bytes) {
            Some(FieldValue::Integer(n)) => Some(*n),
            _ => None,
        }
    }

    /// Parsed timestamp, when present and well-formed
    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        match self.get(LogField::Timestamp) {
            Some(FieldValue::Timestamp(ts)) => Some(*ts),
            _ => None,
        }
    }

    /// True when every field is absent
    pub fn is_empty(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }

    /// Fields and values in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (LogField, Option<&FieldValue>)> + '_ {
        LogField::ALL
            .iter()
            .map(move |field| (*field, self.get(*field)))
    }

    fn set(&mut self, field: LogField, value: Option<FieldValue>) {
        self.values[field.index()] = value;
    }
}

impl Serialize for LogRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(LogField::COUNT))?;
        for (field, value) in self.iter() {
            map.serialize_entry(field.name(), &value)?;
        }
        map.end()
    }
}

/// Parser for the Apache Combined Log Format
///
/// Holds the glob pattern of the files to read; [`parse`](Self::parse) can be
/// used on its own for single lines.
#[derive(Debug, Clone)]
pub struct ApacheCombinedLogParser {
    pattern: String,
}

impl ApacheCombinedLogParser {
    /// Create a parser reading every file matching `pattern`
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }

    /// Glob pattern of the input files
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Parse one line, degrading to an all-absent record when it does not match
    pub fn parse(&self, line: &str) -> LogRecord {
        self.try_parse(line).unwrap_or_default()
    }

    /// Parse one line, returning None when it does not match the grammar
    pub fn try_parse(&self, line: &str) -> Option<LogRecord> {
        let line = line.trim_end_matches(['\n', '\r']).replace("\\\"", "'");
        let captures = LINE_PATTERN.captures(&line)?;

        let mut record = LogRecord::empty();
        for (i, field) in LogField::CAPTURED.iter().enumerate() {
            record.set(
                *field,
                captures
                    .get(i + 1)
                    .map(|m| FieldValue::Text(m.as_str().to_string())),
            );
        }

        // The placeholder is left as text so normalization clears it below
        if let Some(FieldValue::Text(raw)) = record.get(LogField::Bytes).cloned()
            && raw != PLACEHOLDER
        {
            record.set(
                LogField::Bytes,
                Some(FieldValue::Integer(leading_integer(&raw))),
            );
        }

        if let Some(FieldValue::Text(raw)) = record.get(LogField::Timestamp).cloned()
            && let Some(ts) = parse_timestamp(&raw)
        {
            record.set(LogField::Timestamp, Some(FieldValue::Timestamp(ts)));
        }

        if let Some(FieldValue::Text(request)) = record.get(LogField::Request).cloned() {
            let mut tokens: Vec<&str> = request
                .split(|c: char| c.is_ascii_whitespace())
                .collect();
            while tokens.last().is_some_and(|t| t.is_empty()) {
                tokens.pop();
            }
            let token = |i: usize| tokens.get(i).map(|t| FieldValue::Text(t.to_string()));
            record.set(LogField::Method, token(0));
            record.set(LogField::Path, token(1));
        }

        for value in record.values.iter_mut() {
            if matches!(value, Some(FieldValue::Text(s)) if s == PLACEHOLDER) {
                *value = None;
            }
        }

        Some(record)
    }

    /// Iterate the records of every matching file
    ///
    /// Files are visited in glob order, lines in file order. Each call starts
    /// a fresh pass over the inputs.
    pub fn records(&self) -> ParserResult<LogRecords<'_>> {
        let entries = glob::glob(&self.pattern).map_err(|e| ParserError::InvalidPattern {
            pattern: self.pattern.clone(),
            message: e.to_string(),
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            match entry {
                Ok(path) => {
                    if path.is_file() {
                        paths.push(path);
                    }
                }
                Err(e) => {
                    tracing::warn!("Error accessing path: {}", e);
                }
            }
        }

        tracing::debug!(pattern = %self.pattern, files = paths.len(), "Resolved log files");

        Ok(LogRecords {
            parser: self,
            paths: paths.into_iter(),
            current: None,
            buffer: Vec::new(),
            lines_read: 0,
            unparsed_lines: 0,
        })
    }
}

/// Lazy iterator over the records of a set of log files
pub struct LogRecords<'a> {
    parser: &'a ApacheCombinedLogParser,
    paths: std::vec::IntoIter<PathBuf>,
    current: Option<(PathBuf, BufReader<File>)>,
    buffer: Vec<u8>,
    lines_read: usize,
    unparsed_lines: usize,
}

impl LogRecords<'_> {
    /// Lines consumed so far
    pub fn lines_read(&self) -> usize {
        self.lines_read
    }

    /// Lines so far that did not match the grammar
    pub fn unparsed_lines(&self) -> usize {
        self.unparsed_lines
    }
}

impl Iterator for LogRecords<'_> {
    type Item = ParserResult<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current.is_none() {
                let path = self.paths.next()?;
                match File::open(&path) {
                    Ok(file) => self.current = Some((path, BufReader::new(file))),
                    Err(source) => return Some(Err(ParserError::Io { path, source })),
                }
            }

            let (path, reader) = self.current.as_mut()?;
            self.buffer.clear();
            match reader.read_until(b'\n', &mut self.buffer) {
                Ok(0) => {
                    self.current = None;
                }
                Ok(_) => {
                    self.lines_read += 1;
                    let line = String::from_utf8_lossy(&self.buffer);
                    let record = match self.parser.try_parse(&line) {
                        Some(record) => record,
                        None => {
                            self.unparsed_lines += 1;
                            LogRecord::empty()
                        }
                    };
                    return Some(Ok(record));
                }
                Err(source) => {
                    let path = path.clone();
                    self.current = None;
                    return Some(Err(ParserError::Io { path, source }));
                }
            }
        }
    }
}

/// Parse the bracketed timestamp, ignoring anything after the seconds
fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_and_remainder(raw, TIMESTAMP_FORMAT)
        .ok()
        .map(|(ts, _)| ts)
}

/// Leading integer of a string, zero when there is none
fn leading_integer(raw: &str) -> i64 {
    let trimmed = raw.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let value = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0i64, |acc, d| {
            acc.saturating_mul(10).saturating_add(i64::from(d - b'0'))
        });

    if negative { -value } else { value }
}
