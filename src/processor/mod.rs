//! File processors
//!
//! Processors consume a file and produce a file or a side effect on a sink:
//! - [`EscapeCsvProcessor`]: streaming pattern rewrite of a file
//! - [`BulkImportProcessor`]: chunked, transactional bulk load into a sink
//!
//! Configuration problems are reported when a processor is constructed, before
//! any file is touched.

pub mod bulk_import;
pub mod escape_csv;
pub mod split;

pub use bulk_import::{BulkImportProcessor, BulkLoadOptions, LoadContext, LoadReport};
pub use escape_csv::{EscapeCsvProcessor, FilterRule};
pub use split::{Chunker, FileSplitter, LoadChunk};

use std::path::PathBuf;

use crate::sink::SinkError;

/// Error raised by a processor
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    /// Required settings are missing or inconsistent
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A filter pattern failed to compile
    #[error("Invalid filter pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    /// Filesystem failure
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Sink failure outside of a chunk load
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// Loading one chunk failed; earlier chunks stay committed
    #[error("Chunk {chunk} ({}) failed: {source}", path.display())]
    ChunkFailed {
        chunk: usize,
        path: PathBuf,
        #[source]
        source: SinkError,
    },
}

impl ProcessorError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ProcessorError::Io {
            path: path.into(),
            source,
        }
    }

    /// Index of the chunk that failed, for chunk failures
    pub fn failed_chunk(&self) -> Option<usize> {
        match self {
            ProcessorError::ChunkFailed { chunk, .. } => Some(*chunk),
            _ => None,
        }
    }
}

/// Result type for processor operations
pub type ProcessorResult<T> = Result<T, ProcessorError>;

/// A pipeline stage that does its work in one blocking call
pub trait Processor {
    /// Run the processor
    fn process(&mut self) -> ProcessorResult<()>;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}
