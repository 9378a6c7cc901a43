//! Load command
//!
//! Bulk loads a delimited file into a DuckDB table.

use std::path::PathBuf;

use crate::cli::error::CliError;
use crate::processor::{BulkLoadOptions, LoadContext};

/// Load command arguments
#[derive(Debug, Clone)]
pub struct LoadArgs {
    pub file: PathBuf,
    pub table: String,
    /// DuckDB database file
    pub database: PathBuf,
    pub table_prefix: Option<String>,
    pub columns: Vec<String>,
    pub field_separator: String,
    pub field_enclosure: Option<String>,
    pub line_separator: String,
    pub null_string: String,
    pub truncate: bool,
    pub replace: bool,
    pub disable_keys: bool,
    pub commit_every: i64,
    pub resume_from: usize,
    /// Do nothing, also set by `ETL_SKIP_BULK_IMPORT`
    pub skip: bool,
}

impl LoadArgs {
    /// Load options from the arguments
    ///
    /// Separators accept the escapes `\n`, `\r`, `\t` and `\\`.
    pub fn options(&self) -> BulkLoadOptions {
        BulkLoadOptions {
            table: self.table.clone(),
            columns: self.columns.clone(),
            field_separator: unescape(&self.field_separator),
            field_enclosure: self.field_enclosure.as_deref().map(unescape),
            line_separator: unescape(&self.line_separator),
            null_string: self.null_string.clone(),
            truncate: self.truncate,
            replace: self.replace,
            disable_keys: self.disable_keys,
            commit_every: self.commit_every,
            resume_from: self.resume_from,
        }
    }

    pub fn context(&self) -> LoadContext {
        LoadContext {
            skip_bulk_import: self.skip || crate::config::skip_bulk_import_from_env(),
        }
    }
}

/// Expand backslash escapes typed on the command line
fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Load the file into the database
#[cfg(feature = "duckdb-backend")]
pub fn handle_load(args: &LoadArgs) -> Result<(), CliError> {
    use crate::processor::{BulkImportProcessor, Processor};
    use crate::sink::DuckDbSink;

    if !args.file.exists() {
        return Err(CliError::FileNotFound(args.file.clone()));
    }

    let mut sink = DuckDbSink::new(&args.database)?;
    if let Some(prefix) = &args.table_prefix {
        sink = sink.with_table_prefix(prefix.clone());
    }

    let mut processor =
        BulkImportProcessor::new(args.options(), &args.file, sink, args.context())?;
    processor.process()?;

    let report = processor.report();
    if report.skipped {
        eprintln!("Bulk import skipped");
    } else {
        eprintln!(
            "Loaded {} lines in {} chunks ({} skipped) in {}",
            report.total_lines,
            report.chunks_loaded,
            report.chunks_skipped,
            report.duration_string()
        );
    }
    Ok(())
}

#[cfg(not(feature = "duckdb-backend"))]
pub fn handle_load(_args: &LoadArgs) -> Result<(), CliError> {
    Err(CliError::InvalidArgument(
        "DuckDB support not enabled. Build with --features duckdb-backend".to_string(),
    ))
}
