//! Escape command
//!
//! Rewrites a file through regex filters, by default doubling `"` for CSV.

use std::path::PathBuf;

use crate::cli::error::CliError;
use crate::processor::{EscapeCsvProcessor, FilterRule, Processor};

/// Escape command arguments
#[derive(Debug, Clone)]
pub struct EscapeArgs {
    /// Rewrite this file in place
    pub file: Option<PathBuf>,
    pub source: Option<PathBuf>,
    pub target: Option<PathBuf>,
    /// Read chunk size in bytes
    pub buffer: usize,
    /// Filters as `PATTERN=REPLACEMENT`, applied in order
    pub filters: Vec<String>,
}

/// Split a `PATTERN=REPLACEMENT` filter on its first `=`
pub fn parse_filter(filter: &str) -> Result<FilterRule, CliError> {
    let (pattern, replacement) = filter.split_once('=').ok_or_else(|| {
        CliError::InvalidArgument(format!(
            "Filter '{}' must have the form PATTERN=REPLACEMENT",
            filter
        ))
    })?;
    Ok(FilterRule::new(pattern, replacement)?)
}

fn build_processor(args: &EscapeArgs) -> Result<EscapeCsvProcessor, CliError> {
    let processor = match (&args.file, &args.source, &args.target) {
        (Some(file), None, None) => EscapeCsvProcessor::in_place(file)?,
        (None, Some(source), Some(target)) => EscapeCsvProcessor::new(source, target)?,
        _ => {
            return Err(CliError::InvalidArgument(
                "Use either --file or both --source and --target".to_string(),
            ));
        }
    };

    let processor = if args.filters.is_empty() {
        processor
    } else {
        let filters = args
            .filters
            .iter()
            .map(|filter| parse_filter(filter))
            .collect::<Result<Vec<_>, _>>()?;
        processor.with_filters(filters)
    };

    Ok(processor.with_buffer_size(args.buffer)?)
}

/// Rewrite the file
pub fn handle_escape(args: &EscapeArgs) -> Result<(), CliError> {
    let mut processor = build_processor(args)?;
    if !processor.source_file().exists() {
        return Err(CliError::FileNotFound(processor.source_file().to_path_buf()));
    }

    processor.process()?;

    let stats = processor.last_stats();
    eprintln!(
        "Rewrote {} ({} bytes read, {} bytes written)",
        processor.source_file().display(),
        stats.bytes_read,
        stats.bytes_written
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> EscapeArgs {
        EscapeArgs {
            file: None,
            source: None,
            target: None,
            buffer: 8192,
            filters: Vec::new(),
        }
    }

    #[test]
    fn test_parse_filter() {
        let rule = parse_filter(r"\t=,").unwrap();
        assert_eq!(rule.pattern(), r"\t");
        assert_eq!(rule.replacement(), ",");

        // Only the first '=' separates
        let rule = parse_filter("a=b=c").unwrap();
        assert_eq!(rule.replacement(), "b=c");

        assert!(matches!(
            parse_filter("no-separator"),
            Err(CliError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_mode_selection() {
        let mut in_place = args();
        in_place.file = Some(PathBuf::from("data.csv"));
        assert!(build_processor(&in_place).unwrap().use_temp_file());

        let mut mixed = in_place.clone();
        mixed.target = Some(PathBuf::from("out.csv"));
        assert!(matches!(
            build_processor(&mixed),
            Err(CliError::InvalidArgument(_))
        ));

        assert!(build_processor(&args()).is_err());
    }
}
