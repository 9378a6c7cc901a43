//! Delimited text reading
//!
//! Reads bulk-load files with the same formatting options the loader hands to
//! a sink: a field separator, an optional enclosure (a doubled enclosure
//! inside an enclosed field stands for one literal enclosure) and a line
//! separator. Enclosed fields may span line separators.

use std::io::Read;

use csv::{ReaderBuilder, StringRecord, Terminator};

use super::{SinkError, SinkResult};
use crate::processor::BulkLoadOptions;

/// Single-byte layout of a delimited file
#[derive(Debug, Clone, Copy)]
pub struct DelimitedFormat {
    delimiter: u8,
    enclosure: Option<u8>,
    terminator: Terminator,
}

impl DelimitedFormat {
    /// Format described by the load options
    ///
    /// The separator and enclosure must be one byte each. The line separator
    /// is one byte or `\r\n`.
    pub fn from_options(options: &BulkLoadOptions) -> SinkResult<Self> {
        let delimiter = single_byte("field separator", &options.field_separator)?;
        let enclosure = options
            .field_enclosure
            .as_deref()
            .filter(|e| !e.is_empty())
            .map(|e| single_byte("field enclosure", e))
            .transpose()?;
        let terminator = match options.line_separator.as_str() {
            "\r\n" => Terminator::CRLF,
            other => Terminator::Any(single_byte("line separator", other)?),
        };

        Ok(Self {
            delimiter,
            enclosure,
            terminator,
        })
    }

    /// Reader over `input`; records may have any number of fields
    pub fn reader<R: Read>(&self, input: R) -> csv::Reader<R> {
        let mut builder = ReaderBuilder::new();
        builder
            .has_headers(false)
            .flexible(true)
            .delimiter(self.delimiter)
            .terminator(self.terminator)
            .double_quote(true)
            .quoting(self.enclosure.is_some());
        if let Some(enclosure) = self.enclosure {
            builder.quote(enclosure);
        }
        builder.from_reader(input)
    }

    /// Read every record of `input`
    pub fn read_all<R: Read>(&self, input: R) -> Result<Vec<StringRecord>, csv::Error> {
        self.reader(input).records().collect()
    }
}

fn single_byte(name: &str, value: &str) -> SinkResult<u8> {
    match value.as_bytes() {
        [byte] => Ok(*byte),
        _ => Err(SinkError::Unsupported(format!(
            "{} {:?} must be a single byte",
            name, value
        ))),
    }
}
