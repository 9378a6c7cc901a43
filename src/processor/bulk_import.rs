//! Chunked, transactional bulk import
//!
//! A delimited file is loaded into a [`BulkLoadSink`] table. Files longer than
//! the commit threshold are split into chunks of at most that many lines and
//! each chunk is loaded in its own transaction. A failed chunk is rolled back
//! and stops the load; chunks committed before it stay committed.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;

use super::split::{Chunker, FileSplitter, LoadChunk};
use super::{Processor, ProcessorError, ProcessorResult};
use crate::sink::{BulkLoadSink, in_transaction};

/// Table and format settings of a bulk load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkLoadOptions {
    /// Logical target table, resolved through the sink
    pub table: String,
    /// Columns the file fields map to, in file order; empty means all
    pub columns: Vec<String>,
    pub field_separator: String,
    pub field_enclosure: Option<String>,
    pub line_separator: String,
    /// Unenclosed field value read as NULL
    pub null_string: String,
    /// Clear the table in the first chunk's transaction
    pub truncate: bool,
    /// Replace rows with an equal key instead of appending
    pub replace: bool,
    /// Ask the sink to suspend index maintenance during the load
    pub disable_keys: bool,
    /// Lines per chunk; zero or negative loads the whole file at once
    pub commit_every: i64,
    /// Index of the first chunk to load; earlier chunks are skipped
    pub resume_from: usize,
}

impl BulkLoadOptions {
    /// Options with the default CSV format for `table`
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            field_separator: ",".to_string(),
            field_enclosure: None,
            line_separator: "\n".to_string(),
            null_string: String::new(),
            truncate: false,
            replace: false,
            disable_keys: false,
            commit_every: 0,
            resume_from: 0,
        }
    }

    /// Lines per chunk, when splitting is enabled
    pub fn lines_per_chunk(&self) -> Option<usize> {
        usize::try_from(self.commit_every).ok().filter(|n| *n > 0)
    }
}

/// Job-level flags passed to the loader
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadContext {
    pub skip_bulk_import: bool,
}

/// Statistics of one load
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    /// Lines in the source file
    pub total_lines: usize,
    /// Chunks planned for the load
    pub chunk_count: usize,
    pub chunks_loaded: usize,
    /// Chunks before the resume index
    pub chunks_skipped: usize,
    /// Whether the table was truncated
    pub truncated: bool,
    /// Whether the load was skipped by the job context
    pub skipped: bool,
    #[serde(skip)]
    pub duration: Duration,
}

impl LoadReport {
    /// Lines per second over the whole load
    pub fn throughput(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.total_lines as f64 / secs
        }
    }

    /// Format duration as human-readable string
    pub fn duration_string(&self) -> String {
        let secs = self.duration.as_secs();
        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else {
            format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
        }
    }
}

/// Loads a delimited file into a sink, one transaction per chunk
pub struct BulkImportProcessor<S: BulkLoadSink> {
    options: BulkLoadOptions,
    file: PathBuf,
    sink: S,
    context: LoadContext,
    chunker: Box<dyn Chunker>,
    report: LoadReport,
}

impl<S: BulkLoadSink> BulkImportProcessor<S> {
    /// Create a loader for `file`
    ///
    /// Fails when the table or the file is not specified.
    pub fn new(
        options: BulkLoadOptions,
        file: impl Into<PathBuf>,
        sink: S,
        context: LoadContext,
    ) -> ProcessorResult<Self> {
        let file = file.into();
        if options.table.trim().is_empty() {
            return Err(ProcessorError::Configuration(
                "Table must be specified".to_string(),
            ));
        }
        if file.as_os_str().is_empty() {
            return Err(ProcessorError::Configuration(
                "File must be specified".to_string(),
            ));
        }

        Ok(Self {
            options,
            file,
            sink,
            context,
            chunker: Box::new(FileSplitter),
            report: LoadReport::default(),
        })
    }

    /// Use another line counter and splitter
    pub fn with_chunker(mut self, chunker: Box<dyn Chunker>) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn options(&self) -> &BulkLoadOptions {
        &self.options
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Statistics of the last run, also filled in when it failed
    pub fn report(&self) -> &LoadReport {
        &self.report
    }

    fn plan(&self, total_lines: usize) -> ProcessorResult<Vec<LoadChunk>> {
        match self.options.lines_per_chunk() {
            Some(lines_per_chunk) if total_lines > lines_per_chunk => self
                .chunker
                .split(&self.file, lines_per_chunk, total_lines)
                .map_err(|e| ProcessorError::io(&self.file, e)),
            _ => Ok(vec![LoadChunk::whole(&self.file, total_lines)]),
        }
    }

    fn load(&mut self, report: &mut LoadReport) -> ProcessorResult<()> {
        if self.context.skip_bulk_import {
            tracing::info!(file = %self.file.display(), "Bulk import skipped");
            report.skipped = true;
            return Ok(());
        }

        let metadata = fs::metadata(&self.file).map_err(|e| ProcessorError::io(&self.file, e))?;
        if metadata.len() == 0 {
            tracing::info!(file = %self.file.display(), "Source file is empty, nothing to load");
            return Ok(());
        }

        report.total_lines = self
            .chunker
            .count_lines(&self.file)
            .map_err(|e| ProcessorError::io(&self.file, e))?;

        let chunks = self.plan(report.total_lines)?;
        report.chunk_count = chunks.len();

        if self.options.resume_from > 0 && self.options.resume_from >= chunks.len() {
            chunks.iter().for_each(remove_generated);
            return Err(ProcessorError::Configuration(format!(
                "Resume index {} is beyond the last chunk ({} chunks)",
                self.options.resume_from,
                chunks.len()
            )));
        }

        let table = self.sink.resolve_table_name(&self.options.table);
        tracing::info!(
            file = %self.file.display(),
            table = %table,
            backend = self.sink.backend_type(),
            lines = report.total_lines,
            chunks = chunks.len(),
            "Starting bulk import"
        );

        let resume_from = self.options.resume_from;
        if resume_from > 0 && self.options.truncate {
            tracing::info!(resume_from, "Resumed load, truncate disabled");
            self.options.truncate = false;
        }

        for chunk in &chunks {
            if chunk.index < resume_from {
                report.chunks_skipped += 1;
                remove_generated(chunk);
                continue;
            }

            let truncate = self.options.truncate;
            let options = &self.options;
            let result = in_transaction(&mut self.sink, |sink| {
                if truncate {
                    sink.truncate(&table)?;
                }
                sink.bulk_load(&chunk.path, &table, options)
            });
            self.options.truncate = false;

            if let Err(source) = result {
                tracing::warn!(
                    chunk = chunk.index,
                    path = %chunk.path.display(),
                    error = %source,
                    "Chunk rolled back"
                );
                return Err(ProcessorError::ChunkFailed {
                    chunk: chunk.index,
                    path: chunk.path.clone(),
                    source,
                });
            }

            report.chunks_loaded += 1;
            report.truncated |= truncate;
            tracing::debug!(
                chunk = chunk.index,
                lines = chunk.line_count,
                "Chunk committed"
            );
            remove_generated(chunk);
        }

        Ok(())
    }
}

impl<S: BulkLoadSink> Processor for BulkImportProcessor<S> {
    fn process(&mut self) -> ProcessorResult<()> {
        let start = Instant::now();
        let mut report = LoadReport::default();
        let result = self.load(&mut report);
        report.duration = start.elapsed();

        if result.is_ok() && !report.skipped {
            tracing::info!(
                table = %self.options.table,
                lines = report.total_lines,
                chunks = report.chunks_loaded,
                duration = %report.duration_string(),
                "Bulk import finished"
            );
        }
        self.report = report;
        result
    }

    fn name(&self) -> &'static str {
        "bulk_import"
    }
}

fn remove_generated(chunk: &LoadChunk) {
    if chunk.generated
        && let Err(e) = fs::remove_file(&chunk.path)
    {
        tracing::warn!(path = %chunk.path.display(), error = %e, "Failed to remove chunk file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use crate::sink::memory::SinkOperation;
    use tempfile::tempdir;

    fn write_rows(path: &Path, n: usize) {
        let content: String = (1..=n).map(|i| format!("{},name{}\n", i, i)).collect();
        fs::write(path, content).unwrap();
    }

    fn sink() -> MemorySink {
        MemorySink::new().with_table("t", &["id", "name"])
    }

    fn options(commit_every: i64) -> BulkLoadOptions {
        let mut options = BulkLoadOptions::new("t");
        options.commit_every = commit_every;
        options
    }

    fn split_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.contains("_split_"))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_under_threshold_is_single_chunk() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("rows.csv");
        write_rows(&file, 5);

        let mut processor =
            BulkImportProcessor::new(options(10), &file, sink(), LoadContext::default()).unwrap();
        processor.process().unwrap();

        assert_eq!(processor.report().chunk_count, 1);
        assert_eq!(processor.sink().commits(), 1);
        assert_eq!(processor.sink().row_count("t"), 5);
        assert!(file.exists());
        assert!(split_files(dir.path()).is_empty());
    }

    #[test]
    fn test_no_threshold_is_single_chunk() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("rows.csv");
        write_rows(&file, 25);

        let mut processor =
            BulkImportProcessor::new(options(0), &file, sink(), LoadContext::default()).unwrap();
        processor.process().unwrap();

        assert_eq!(processor.report().chunk_count, 1);
        assert_eq!(processor.sink().row_count("t"), 25);
    }

    #[test]
    fn test_split_into_chunks_and_clean_up() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("rows.csv");
        write_rows(&file, 10);

        let mut processor =
            BulkImportProcessor::new(options(3), &file, sink(), LoadContext::default()).unwrap();
        processor.process().unwrap();

        let report = processor.report();
        assert_eq!(report.total_lines, 10);
        assert_eq!(report.chunk_count, 4);
        assert_eq!(report.chunks_loaded, 4);
        assert_eq!(processor.sink().commits(), 4);
        assert_eq!(processor.sink().row_count("t"), 10);
        assert!(split_files(dir.path()).is_empty());
        assert!(file.exists());
    }

    #[test]
    fn test_truncate_once_in_first_transaction() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("rows.csv");
        write_rows(&file, 6);

        let mut opts = options(2);
        opts.truncate = true;
        let mut processor =
            BulkImportProcessor::new(opts, &file, sink(), LoadContext::default()).unwrap();
        processor.process().unwrap();

        let ops = processor.sink().operations();
        assert_eq!(processor.sink().truncates(), 1);
        assert_eq!(ops[0], SinkOperation::Begin);
        assert_eq!(ops[1], SinkOperation::Truncate("t".to_string()));
        assert!(matches!(ops[2], SinkOperation::BulkLoad { .. }));
        assert!(processor.report().truncated);
        assert!(!processor.options().truncate);
    }

    #[test]
    fn test_truncate_clears_existing_rows() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("rows.csv");
        write_rows(&file, 4);

        let mut processor =
            BulkImportProcessor::new(options(0), &file, sink(), LoadContext::default()).unwrap();
        processor.process().unwrap();
        let sink = processor.into_sink();

        let mut opts = options(0);
        opts.truncate = true;
        let mut processor =
            BulkImportProcessor::new(opts, &file, sink, LoadContext::default()).unwrap();
        processor.process().unwrap();

        assert_eq!(processor.sink().row_count("t"), 4);
    }

    #[test]
    fn test_failed_chunk_keeps_earlier_commits() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("rows.csv");
        let mut content: String = (1..=10).map(|i| format!("{},name{}\n", i, i)).collect();
        content = content.replace("6,name6\n", "6,name6,extra\n");
        fs::write(&file, content).unwrap();

        let mut processor =
            BulkImportProcessor::new(options(2), &file, sink(), LoadContext::default()).unwrap();
        let err = processor.process().unwrap_err();

        assert_eq!(err.failed_chunk(), Some(2));
        match &err {
            ProcessorError::ChunkFailed { path, .. } => {
                assert!(path.ends_with("rows_split_0002"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(processor.sink().row_count("t"), 4);
        assert_eq!(processor.sink().rollbacks(), 1);
        assert_eq!(processor.report().chunks_loaded, 2);
        assert_eq!(
            split_files(dir.path()),
            vec!["rows_split_0002", "rows_split_0003", "rows_split_0004"]
        );
    }

    #[test]
    fn test_resume_skips_loaded_chunks() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("rows.csv");
        write_rows(&file, 10);

        let mut opts = options(4);
        opts.resume_from = 1;
        opts.truncate = true;
        let mut processor =
            BulkImportProcessor::new(opts, &file, sink(), LoadContext::default()).unwrap();
        processor.process().unwrap();

        let report = processor.report();
        assert_eq!(report.chunks_skipped, 1);
        assert_eq!(report.chunks_loaded, 2);
        assert!(!report.truncated);
        assert_eq!(processor.sink().truncates(), 0);
        assert_eq!(processor.sink().row_count("t"), 6);
        assert!(split_files(dir.path()).is_empty());
    }

    #[test]
    fn test_skip_flag_does_nothing() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("rows.csv");
        write_rows(&file, 3);

        let context = LoadContext {
            skip_bulk_import: true,
        };
        let mut processor = BulkImportProcessor::new(options(1), &file, sink(), context).unwrap();
        processor.process().unwrap();

        assert!(processor.report().skipped);
        assert!(processor.sink().operations().is_empty());
        assert!(split_files(dir.path()).is_empty());
    }

    #[test]
    fn test_empty_file_is_noop() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("rows.csv");
        fs::write(&file, "").unwrap();

        let mut processor =
            BulkImportProcessor::new(options(1), &file, sink(), LoadContext::default()).unwrap();
        processor.process().unwrap();

        assert!(processor.sink().operations().is_empty());
        assert_eq!(processor.report().chunk_count, 0);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("missing.csv");

        let mut processor =
            BulkImportProcessor::new(options(1), &file, sink(), LoadContext::default()).unwrap();
        assert!(matches!(
            processor.process(),
            Err(ProcessorError::Io { .. })
        ));
    }

    #[test]
    fn test_configuration_errors() {
        let result = BulkImportProcessor::new(
            BulkLoadOptions::new(""),
            "rows.csv",
            sink(),
            LoadContext::default(),
        );
        assert!(matches!(result, Err(ProcessorError::Configuration(_))));

        let result = BulkImportProcessor::new(options(0), "", sink(), LoadContext::default());
        assert!(matches!(result, Err(ProcessorError::Configuration(_))));
    }

    #[test]
    fn test_table_prefix_is_applied() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("rows.csv");
        write_rows(&file, 2);

        let sink = MemorySink::new()
            .with_table("stg_t", &["id", "name"])
            .with_table_prefix("stg_");
        let mut processor =
            BulkImportProcessor::new(options(0), &file, sink, LoadContext::default()).unwrap();
        processor.process().unwrap();

        assert_eq!(processor.sink().row_count("stg_t"), 2);
    }

    #[test]
    fn test_report_formatting() {
        let report = LoadReport {
            total_lines: 100,
            duration: Duration::from_secs(3725),
            ..Default::default()
        };
        assert_eq!(report.duration_string(), "1h 2m 5s");
        assert!(report.throughput() > 0.0);
        assert_eq!(LoadReport::default().throughput(), 0.0);
    }

    #[test]
    fn test_resume_beyond_last_chunk_rejected() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("rows.csv");
        write_rows(&file, 6);

        let mut opts = options(2);
        opts.resume_from = 3;
        let mut processor =
            BulkImportProcessor::new(opts, &file, sink(), LoadContext::default()).unwrap();

        assert!(matches!(
            processor.process(),
            Err(ProcessorError::Configuration(_))
        ));
        assert_eq!(processor.report().chunk_count, 3);
        assert_eq!(processor.sink().commits(), 0);
        assert!(split_files(dir.path()).is_empty());
        assert!(file.exists());
    }

    #[test]
    fn test_resume_on_unsplit_file_rejected() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("rows.csv");
        write_rows(&file, 3);

        let mut opts = options(0);
        opts.resume_from = 1;
        let mut processor =
            BulkImportProcessor::new(opts, &file, sink(), LoadContext::default()).unwrap();

        assert!(processor.process().is_err());
        assert!(processor.sink().operations().is_empty());
        assert!(file.exists());
    }
}
