//! DuckDB sink implementation
//!
//! Loads delimited files with DuckDB's `COPY ... FROM` statement inside an
//! explicit transaction. Supports both file-based persistence and in-memory
//! mode.

use std::path::{Path, PathBuf};

use super::{BulkLoadSink, SinkError, SinkResult};
use crate::processor::BulkLoadOptions;

/// Staging table used by replace-mode loads
const STAGE_TABLE: &str = "__etl_stage";

/// DuckDB sink
pub struct DuckDbSink {
    /// Path to the database file (None for in-memory)
    db_path: Option<PathBuf>,
    connection: duckdb::Connection,
    table_prefix: Option<String>,
}

impl DuckDbSink {
    /// Open (or create) a file-based DuckDB database
    pub fn new(db_path: impl AsRef<Path>) -> SinkResult<Self> {
        let path = db_path.as_ref().to_path_buf();
        let connection = duckdb::Connection::open(&path)
            .map_err(|e| SinkError::ConnectionFailed(format!("Failed to open DuckDB: {}", e)))?;

        Ok(Self {
            db_path: Some(path),
            connection,
            table_prefix: None,
        })
    }

    /// Create an in-memory DuckDB database
    pub fn in_memory() -> SinkResult<Self> {
        let connection = duckdb::Connection::open_in_memory().map_err(|e| {
            SinkError::ConnectionFailed(format!("Failed to create in-memory DuckDB: {}", e))
        })?;

        Ok(Self {
            db_path: None,
            connection,
            table_prefix: None,
        })
    }

    /// Prefix applied when resolving logical table names
    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = Some(prefix.into());
        self
    }

    /// Get the database file path (None for in-memory)
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Underlying connection, for schema setup and queries
    pub fn connection(&self) -> &duckdb::Connection {
        &self.connection
    }

    fn execute_batch(&self, sql: &str) -> Result<(), duckdb::Error> {
        tracing::debug!(sql, "Executing");
        self.connection.execute_batch(sql)
    }

    fn transaction_statement(&self, sql: &str) -> SinkResult<()> {
        self.execute_batch(sql)
            .map_err(|e| SinkError::TransactionFailed(format!("{}: {}", sql, e)))
    }
}

impl BulkLoadSink for DuckDbSink {
    fn begin_transaction(&mut self) -> SinkResult<()> {
        self.transaction_statement("BEGIN TRANSACTION")
    }

    fn commit(&mut self) -> SinkResult<()> {
        self.transaction_statement("COMMIT")
    }

    fn rollback(&mut self) -> SinkResult<()> {
        self.transaction_statement("ROLLBACK")
    }

    fn truncate(&mut self, table: &str) -> SinkResult<()> {
        let sql = format!("DELETE FROM {}", quote_identifier(table));
        self.execute_batch(&sql)
            .map_err(|e| SinkError::TruncateFailed {
                table: table.to_string(),
                message: e.to_string(),
            })
    }

    fn bulk_load(
        &mut self,
        file: &Path,
        table: &str,
        options: &BulkLoadOptions,
    ) -> SinkResult<()> {
        if !matches!(options.line_separator.as_str(), "\n" | "\r\n") {
            return Err(SinkError::Unsupported(format!(
                "DuckDB only reads \\n or \\r\\n line separators, got {:?}",
                options.line_separator
            )));
        }
        if options.disable_keys {
            tracing::debug!("disable_keys has no DuckDB equivalent, ignoring");
        }

        let load_failed = |e: duckdb::Error| SinkError::LoadFailed {
            file: file.to_path_buf(),
            table: table.to_string(),
            message: e.to_string(),
        };

        if options.replace {
            let stage = quote_identifier(STAGE_TABLE);
            let sql = format!(
                "CREATE TEMP TABLE {stage} AS SELECT * FROM {target} LIMIT 0;\n\
                 {copy};\n\
                 INSERT OR REPLACE INTO {target} SELECT * FROM {stage};\n\
                 DROP TABLE {stage};",
                stage = stage,
                target = quote_identifier(table),
                copy = copy_statement(file, STAGE_TABLE, options),
            );
            self.execute_batch(&sql).map_err(load_failed)
        } else {
            self.execute_batch(&copy_statement(file, table, options))
                .map_err(load_failed)
        }
    }

    fn resolve_table_name(&self, logical: &str) -> String {
        match &self.table_prefix {
            Some(prefix) => format!("{}{}", prefix, logical),
            None => logical.to_string(),
        }
    }

    fn backend_type(&self) -> &'static str {
        "duckdb"
    }
}

/// Build the `COPY` statement loading `file` into `table`
fn copy_statement(file: &Path, table: &str, options: &BulkLoadOptions) -> String {
    let columns = if options.columns.is_empty() {
        String::new()
    } else {
        let quoted: Vec<String> = options.columns.iter().map(|c| quote_identifier(c)).collect();
        format!(" ({})", quoted.join(", "))
    };

    let mut settings = vec![
        "FORMAT csv".to_string(),
        "HEADER false".to_string(),
        format!("DELIMITER {}", quote_literal(&options.field_separator)),
        format!("NULLSTR {}", quote_literal(&options.null_string)),
    ];
    if let Some(enclosure) = &options.field_enclosure {
        settings.push(format!("QUOTE {}", quote_literal(enclosure)));
        settings.push(format!("ESCAPE {}", quote_literal(enclosure)));
    }

    format!(
        "COPY {}{} FROM {} ({})",
        quote_identifier(table),
        columns,
        quote_literal(&file.display().to_string()),
        settings.join(", ")
    )
}

/// Quote a possibly schema-qualified identifier
fn quote_identifier(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
