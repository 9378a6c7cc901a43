//! ETL Stages - pipeline stages for getting log data into a database
//!
//! Provides:
//! - Apache combined log parsing into structured records
//! - Streaming regex rewrite of files (CSV quote escaping by default)
//! - Chunked, transactional bulk loading of delimited files into a sink
//! - TOML job files chaining the stages

pub mod config;
pub mod parser;
pub mod processor;
pub mod sink;

#[cfg(feature = "cli")]
pub mod cli;

// Re-export commonly used types
pub use config::{ConfigError, ConfigResult, JobConfig, JobReport};
pub use parser::{
    ApacheCombinedLogParser, FieldValue, LogField, LogRecord, ParseSummary, ParserError,
    write_json_lines,
};
pub use processor::{
    BulkImportProcessor, BulkLoadOptions, EscapeCsvProcessor, FilterRule, LoadContext,
    LoadReport, Processor, ProcessorError, ProcessorResult,
};
#[cfg(feature = "duckdb-backend")]
pub use sink::DuckDbSink;
pub use sink::{BulkLoadSink, MemorySink, SinkError, SinkResult, in_transaction};
