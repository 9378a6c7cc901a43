//! Transactional bulk-load sinks
//!
//! The loader in [`crate::processor::bulk_import`] only talks to the
//! [`BulkLoadSink`] trait. Implementations provided here:
//! - [`MemorySink`]: in-process tables, used for tests and dry runs
//! - `DuckDbSink`: embedded DuckDB database (feature `duckdb-backend`)

pub mod delimited;
#[cfg(feature = "duckdb-backend")]
pub mod duckdb;
pub mod memory;

#[cfg(feature = "duckdb-backend")]
pub use self::duckdb::DuckDbSink;
pub use memory::MemorySink;

use std::path::{Path, PathBuf};

use crate::processor::BulkLoadOptions;

/// Error type for sink operations
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Failed to open the underlying store
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Begin, commit or rollback failed
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// A transactional operation was attempted outside a transaction
    #[error("No transaction in progress")]
    NoTransaction,

    /// A transaction was opened while another one is still open
    #[error("Transaction already in progress")]
    TransactionInProgress,

    /// The target table does not exist
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    /// Truncating the target table failed
    #[error("Truncate of {table} failed: {message}")]
    TruncateFailed { table: String, message: String },

    /// Loading a file into the target table failed
    #[error("Bulk load of {} into {table} failed: {message}", file.display())]
    LoadFailed {
        file: PathBuf,
        table: String,
        message: String,
    },

    /// The sink cannot honour one of the load options
    #[error("Unsupported option: {0}")]
    Unsupported(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),
}

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

/// Storage target that accepts delimited files under a transaction
///
/// Truncate and bulk load are only valid between `begin_transaction` and
/// `commit`/`rollback`.
pub trait BulkLoadSink {
    /// Open a transaction
    fn begin_transaction(&mut self) -> SinkResult<()>;

    /// Commit the open transaction
    fn commit(&mut self) -> SinkResult<()>;

    /// Discard the open transaction
    fn rollback(&mut self) -> SinkResult<()>;

    /// Remove every row from `table`
    fn truncate(&mut self, table: &str) -> SinkResult<()>;

    /// Load the delimited `file` into `table`
    ///
    /// `options` carries the column order and the field formatting of the file.
    fn bulk_load(&mut self, file: &Path, table: &str, options: &BulkLoadOptions)
    -> SinkResult<()>;

    /// Map a logical table name to the name used by the store
    fn resolve_table_name(&self, logical: &str) -> String {
        logical.to_string()
    }

    /// Backend type name
    fn backend_type(&self) -> &'static str;
}

impl<S: BulkLoadSink + ?Sized> BulkLoadSink for &mut S {
    fn begin_transaction(&mut self) -> SinkResult<()> {
        (**self).begin_transaction()
    }

    fn commit(&mut self) -> SinkResult<()> {
        (**self).commit()
    }

    fn rollback(&mut self) -> SinkResult<()> {
        (**self).rollback()
    }

    fn truncate(&mut self, table: &str) -> SinkResult<()> {
        (**self).truncate(table)
    }

    fn bulk_load(
        &mut self,
        file: &Path,
        table: &str,
        options: &BulkLoadOptions,
    ) -> SinkResult<()> {
        (**self).bulk_load(file, table, options)
    }

    fn resolve_table_name(&self, logical: &str) -> String {
        (**self).resolve_table_name(logical)
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}

/// Run `f` inside a transaction on `sink`
///
/// Commits when `f` succeeds. When `f` or the commit fails the transaction is
/// rolled back and the original error is returned.
pub fn in_transaction<S, T, F>(sink: &mut S, f: F) -> SinkResult<T>
where
    S: BulkLoadSink + ?Sized,
    F: FnOnce(&mut S) -> SinkResult<T>,
{
    sink.begin_transaction()?;

    let result = f(sink).and_then(|value| sink.commit().map(|_| value));

    if let Err(ref e) = result
        && let Err(rollback_err) = sink.rollback()
    {
        tracing::warn!("Rollback after '{}' failed: {}", e, rollback_err);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_transaction_commits_on_success() {
        let mut sink = MemorySink::new().with_table("t", &["id"]);
        let value = in_transaction(&mut sink, |_| Ok(7)).unwrap();
        assert_eq!(value, 7);
        assert!(!sink.in_transaction());
        assert_eq!(sink.commits(), 1);
    }

    #[test]
    fn test_in_transaction_rolls_back_on_error() {
        let mut sink = MemorySink::new().with_table("t", &["id"]);
        let result: SinkResult<()> = in_transaction(&mut sink, |s| s.truncate("missing"));
        assert!(matches!(result, Err(SinkError::UnknownTable(_))));
        assert!(!sink.in_transaction());
        assert_eq!(sink.commits(), 0);
        assert_eq!(sink.rollbacks(), 1);
    }

    #[test]
    fn test_mut_ref_forwards_resolution() {
        let mut sink = MemorySink::new().with_table_prefix("dev_");
        let by_ref: &mut MemorySink = &mut sink;
        assert_eq!(by_ref.resolve_table_name("events"), "dev_events");
        assert_eq!(BulkLoadSink::backend_type(&by_ref), "memory");
    }
}
