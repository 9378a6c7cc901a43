//! In-memory sink
//!
//! Keeps declared tables in process memory. A transaction works on a copy of
//! the tables which replaces the committed state on commit and is dropped on
//! rollback. Every call is recorded in an operation log so a load can be
//! inspected afterwards.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::delimited::DelimitedFormat;
use super::{BulkLoadSink, SinkError, SinkResult};
use crate::processor::BulkLoadOptions;

/// Row of a memory table; `None` is SQL NULL
pub type MemoryRow = Vec<Option<String>>;

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    columns: Vec<String>,
    rows: Vec<MemoryRow>,
}

/// A call made against a [`MemorySink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkOperation {
    Begin,
    Truncate(String),
    BulkLoad { file: PathBuf, table: String },
    Commit,
    Rollback,
}

/// Transactional in-memory sink
#[derive(Debug, Default)]
pub struct MemorySink {
    tables: BTreeMap<String, MemoryTable>,
    pending: Option<BTreeMap<String, MemoryTable>>,
    table_prefix: Option<String>,
    operations: Vec<SinkOperation>,
}

impl MemorySink {
    /// Create a sink without tables
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a table with its columns
    pub fn with_table(mut self, name: &str, columns: &[&str]) -> Self {
        self.tables.insert(
            name.to_string(),
            MemoryTable {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows: Vec::new(),
            },
        );
        self
    }

    /// Prefix applied by [`resolve_table_name`](BulkLoadSink::resolve_table_name)
    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = Some(prefix.into());
        self
    }

    /// Committed rows of a table
    pub fn rows(&self, table: &str) -> Option<&[MemoryRow]> {
        self.tables.get(table).map(|t| t.rows.as_slice())
    }

    /// Number of committed rows in a table (0 for unknown tables)
    pub fn row_count(&self, table: &str) -> usize {
        self.rows(table).map_or(0, <[MemoryRow]>::len)
    }

    /// Every call made so far, in order
    pub fn operations(&self) -> &[SinkOperation] {
        &self.operations
    }

    /// Whether a transaction is open
    pub fn in_transaction(&self) -> bool {
        self.pending.is_some()
    }

    /// Number of commits so far
    pub fn commits(&self) -> usize {
        self.count(|op| matches!(op, SinkOperation::Commit))
    }

    /// Number of rollbacks so far
    pub fn rollbacks(&self) -> usize {
        self.count(|op| matches!(op, SinkOperation::Rollback))
    }

    /// Number of truncate calls so far
    pub fn truncates(&self) -> usize {
        self.count(|op| matches!(op, SinkOperation::Truncate(_)))
    }

    fn count(&self, predicate: impl Fn(&SinkOperation) -> bool) -> usize {
        self.operations.iter().filter(|op| predicate(op)).count()
    }

    fn pending_table(&mut self, table: &str) -> SinkResult<&mut MemoryTable> {
        self.pending
            .as_mut()
            .ok_or(SinkError::NoTransaction)?
            .get_mut(table)
            .ok_or_else(|| SinkError::UnknownTable(table.to_string()))
    }
}

impl BulkLoadSink for MemorySink {
    fn begin_transaction(&mut self) -> SinkResult<()> {
        if self.pending.is_some() {
            return Err(SinkError::TransactionInProgress);
        }
        self.operations.push(SinkOperation::Begin);
        self.pending = Some(self.tables.clone());
        Ok(())
    }

    fn commit(&mut self) -> SinkResult<()> {
        let pending = self.pending.take().ok_or(SinkError::NoTransaction)?;
        self.operations.push(SinkOperation::Commit);
        self.tables = pending;
        Ok(())
    }

    fn rollback(&mut self) -> SinkResult<()> {
        self.pending.take().ok_or(SinkError::NoTransaction)?;
        self.operations.push(SinkOperation::Rollback);
        Ok(())
    }

    fn truncate(&mut self, table: &str) -> SinkResult<()> {
        self.operations.push(SinkOperation::Truncate(table.to_string()));
        self.pending_table(table)?.rows.clear();
        Ok(())
    }

    fn bulk_load(
        &mut self,
        file: &Path,
        table: &str,
        options: &BulkLoadOptions,
    ) -> SinkResult<()> {
        self.operations.push(SinkOperation::BulkLoad {
            file: file.to_path_buf(),
            table: table.to_string(),
        });

        let load_failed = |message: String| SinkError::LoadFailed {
            file: file.to_path_buf(),
            table: table.to_string(),
            message,
        };

        let format = DelimitedFormat::from_options(options)?;
        let input = std::fs::File::open(file)
            .map_err(|e| SinkError::IoError(format!("{}: {}", file.display(), e)))?;
        let records = format
            .read_all(input)
            .map_err(|e| load_failed(e.to_string()))?;

        let target = self.pending_table(table)?;
        let columns: Vec<String> = if options.columns.is_empty() {
            target.columns.clone()
        } else {
            options.columns.clone()
        };

        let positions = columns
            .iter()
            .map(|column| {
                target
                    .columns
                    .iter()
                    .position(|c| c == column)
                    .ok_or_else(|| load_failed(format!("unknown column '{}'", column)))
            })
            .collect::<SinkResult<Vec<usize>>>()?;

        let mut loaded = Vec::new();
        for (index, record) in records.iter().enumerate() {
            if record.len() > positions.len() {
                return Err(load_failed(format!(
                    "record {} has {} fields, expected at most {}",
                    index + 1,
                    record.len(),
                    positions.len()
                )));
            }

            let mut row: MemoryRow = vec![None; target.columns.len()];
            for (value, position) in record.iter().zip(&positions) {
                if value != options.null_string {
                    row[*position] = Some(value.to_string());
                }
            }
            loaded.push(row);
        }

        for row in loaded {
            if options.replace {
                target.rows.retain(|existing| existing.first() != row.first());
            }
            target.rows.push(row);
        }

        Ok(())
    }

    fn resolve_table_name(&self, logical: &str) -> String {
        match &self.table_prefix {
            Some(prefix) => format!("{}{}", prefix, logical),
            None => logical.to_string(),
        }
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn options(table: &str) -> BulkLoadOptions {
        BulkLoadOptions::new(table)
    }

    #[test]
    fn test_load_requires_transaction() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("rows.csv");
        fs::write(&file, "1,a\n").unwrap();

        let mut sink = MemorySink::new().with_table("t", &["id", "name"]);
        let result = sink.bulk_load(&file, "t", &options("t"));
        assert!(matches!(result, Err(SinkError::NoTransaction)));
    }

    #[test]
    fn test_commit_publishes_rows() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("rows.csv");
        fs::write(&file, "1,alice\n2,\n").unwrap();

        let mut sink = MemorySink::new().with_table("t", &["id", "name"]);
        sink.begin_transaction().unwrap();
        sink.bulk_load(&file, "t", &options("t")).unwrap();
        assert_eq!(sink.row_count("t"), 0);
        sink.commit().unwrap();

        let rows = sink.rows("t").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec![Some("1".to_string()), Some("alice".to_string())]);
        // Empty string is the default null sentinel
        assert_eq!(rows[1], vec![Some("2".to_string()), None]);
    }

    #[test]
    fn test_rollback_discards_rows() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("rows.csv");
        fs::write(&file, "1,alice\n").unwrap();

        let mut sink = MemorySink::new().with_table("t", &["id", "name"]);
        sink.begin_transaction().unwrap();
        sink.bulk_load(&file, "t", &options("t")).unwrap();
        sink.rollback().unwrap();

        assert_eq!(sink.row_count("t"), 0);
        assert_eq!(sink.rollbacks(), 1);
    }

    #[test]
    fn test_column_subset_and_enclosure() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("rows.csv");
        fs::write(&file, "\"x|y\"|9\n").unwrap();

        let mut opts = options("t");
        opts.columns = vec!["name".to_string(), "id".to_string()];
        opts.field_separator = "|".to_string();
        opts.field_enclosure = Some("\"".to_string());

        let mut sink = MemorySink::new().with_table("t", &["id", "name", "extra"]);
        sink.begin_transaction().unwrap();
        sink.bulk_load(&file, "t", &opts).unwrap();
        sink.commit().unwrap();

        assert_eq!(
            sink.rows("t").unwrap()[0],
            vec![Some("9".to_string()), Some("x|y".to_string()), None]
        );
    }

    #[test]
    fn test_enclosed_line_separator_stays_in_field() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("rows.csv");
        fs::write(&file, "1,\"line one\nline two\"\n").unwrap();

        let mut opts = options("t");
        opts.field_enclosure = Some("\"".to_string());

        let mut sink = MemorySink::new().with_table("t", &["id", "name"]);
        sink.begin_transaction().unwrap();
        sink.bulk_load(&file, "t", &opts).unwrap();
        sink.commit().unwrap();

        assert_eq!(
            sink.rows("t").unwrap(),
            &[vec![
                Some("1".to_string()),
                Some("line one\nline two".to_string())
            ]]
        );
    }

    #[test]
    fn test_multi_byte_separator_unsupported() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("rows.csv");
        fs::write(&file, "1||a\n").unwrap();

        let mut opts = options("t");
        opts.field_separator = "||".to_string();

        let mut sink = MemorySink::new().with_table("t", &["id", "name"]);
        sink.begin_transaction().unwrap();
        assert!(matches!(
            sink.bulk_load(&file, "t", &opts),
            Err(SinkError::Unsupported(_))
        ));
    }

    #[test]
    fn test_replace_overwrites_by_first_column() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("first.csv");
        let second = dir.path().join("second.csv");
        fs::write(&first, "1,old\n2,keep\n").unwrap();
        fs::write(&second, "1,new\n").unwrap();

        let mut opts = options("t");
        opts.replace = true;

        let mut sink = MemorySink::new().with_table("t", &["id", "name"]);
        sink.begin_transaction().unwrap();
        sink.bulk_load(&first, "t", &opts).unwrap();
        sink.bulk_load(&second, "t", &opts).unwrap();
        sink.commit().unwrap();

        let names: Vec<_> = sink
            .rows("t")
            .unwrap()
            .iter()
            .map(|r| r[1].clone().unwrap())
            .collect();
        assert_eq!(names, vec!["keep", "new"]);
    }

    #[test]
    fn test_too_many_fields_fails() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("rows.csv");
        fs::write(&file, "1,a,b\n").unwrap();

        let mut sink = MemorySink::new().with_table("t", &["id", "name"]);
        sink.begin_transaction().unwrap();
        let result = sink.bulk_load(&file, "t", &options("t"));
        assert!(matches!(result, Err(SinkError::LoadFailed { .. })));
    }

    #[test]
    fn test_unknown_table() {
        let mut sink = MemorySink::new();
        sink.begin_transaction().unwrap();
        assert!(matches!(
            sink.truncate("nope"),
            Err(SinkError::UnknownTable(_))
        ));
    }

    #[test]
    fn test_nested_transaction_rejected() {
        let mut sink = MemorySink::new();
        sink.begin_transaction().unwrap();
        assert!(matches!(
            sink.begin_transaction(),
            Err(SinkError::TransactionInProgress)
        ));
    }
}
