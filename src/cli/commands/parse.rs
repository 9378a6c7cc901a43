//! Parse command
//!
//! Turns Apache combined access logs into JSON lines.

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;

use crate::cli::error::CliError;
use crate::parser::{ApacheCombinedLogParser, write_json_lines};

/// Parse command arguments
#[derive(Debug, Clone)]
pub struct ParseArgs {
    /// Glob pattern of the log files
    pub pattern: String,
    /// Output file, stdout when absent
    pub output: Option<PathBuf>,
}

/// Parse every matching log file and write one JSON record per line
pub fn handle_parse(args: &ParseArgs) -> Result<(), CliError> {
    let parser = ApacheCombinedLogParser::new(args.pattern.clone());
    let records = parser.records()?;

    let summary = match &args.output {
        Some(path) => {
            let file = File::create(path)
                .map_err(|e| CliError::FileWriteError(path.clone(), e.to_string()))?;
            write_json_lines(records, BufWriter::new(file))?
        }
        None => write_json_lines(records, io::stdout().lock())?,
    };

    eprintln!(
        "Parsed {} lines ({} unparsed)",
        summary.lines, summary.unparsed
    );
    Ok(())
}
