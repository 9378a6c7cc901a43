//! Job file support
//!
//! A job file is a TOML document declaring which stages to run and how. Every
//! stage section is optional; [`JobConfig::run`] runs the declared ones in the
//! order parse, escape, bulk import. Relative paths are resolved against the
//! directory of the job file.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::parser::{self, ApacheCombinedLogParser, ParseSummary, ParserError};
use crate::processor::escape_csv::{DEFAULT_BUFFER_SIZE, RewriteStats};
use crate::processor::{
    BulkImportProcessor, BulkLoadOptions, EscapeCsvProcessor, FilterRule, LoadContext,
    LoadReport, Processor, ProcessorError,
};
use crate::sink::BulkLoadSink;

/// Default database filename for DuckDB
pub const DEFAULT_DUCKDB_FILENAME: &str = "warehouse.duckdb";

/// Environment variable that disables the bulk import stage
pub const ENV_SKIP_BULK_IMPORT: &str = "ETL_SKIP_BULK_IMPORT";

/// Environment variable for DuckDB path
pub const ENV_DUCKDB_PATH: &str = "ETL_DUCKDB_PATH";

/// Environment variable for the table name prefix
pub const ENV_TABLE_PREFIX: &str = "ETL_TABLE_PREFIX";

/// Error type for job configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Failed to parse job file: {0}")]
    ParseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A section is missing a required setting
    #[error("Configuration error: {0}")]
    Invalid(String),

    #[error(transparent)]
    Parser(#[from] ParserError),

    #[error(transparent)]
    Processor(#[from] ProcessorError),
}

/// Result type for job configuration
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Database configuration section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSection {
    /// Path to DuckDB database file (relative to the job file, or absolute)
    #[serde(default = "default_duckdb_path")]
    pub path: String,

    /// Prefix applied to logical table names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_prefix: Option<String>,
}

fn default_duckdb_path() -> String {
    DEFAULT_DUCKDB_FILENAME.to_string()
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_duckdb_path(),
            table_prefix: None,
        }
    }
}

/// Log parsing stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseSection {
    /// Glob pattern of the access logs
    pub pattern: String,
    /// JSON lines output file
    pub output: String,
}

/// One `(replace, result)` filter of the escape stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSection {
    /// Regular expression to match
    pub replace: String,
    /// Replacement text, `$1` refers to capture groups
    pub result: String,
}

/// Filter rewrite stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscapeSection {
    /// Rewrite this file in place
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_file: Option<String>,

    /// Read chunk size in bytes
    #[serde(default = "default_buffer")]
    pub buffer: usize,

    /// Filters in application order; empty means CSV quote escaping
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<FilterSection>,
}

fn default_buffer() -> usize {
    DEFAULT_BUFFER_SIZE
}

impl EscapeSection {
    /// Build the processor, resolving relative paths against `base`
    pub fn build(&self, base: &Path) -> ConfigResult<EscapeCsvProcessor> {
        let processor = match (&self.file, &self.source_file, &self.target_file) {
            (Some(file), None, None) => EscapeCsvProcessor::in_place(resolve(base, file))?,
            (Some(_), _, _) => {
                return Err(ConfigError::Invalid(
                    "Use either file or source_file and target_file".to_string(),
                ));
            }
            (None, Some(source), Some(target)) => {
                EscapeCsvProcessor::new(resolve(base, source), resolve(base, target))?
            }
            (None, None, _) => {
                return Err(ConfigError::Invalid(
                    "Source file must be specified".to_string(),
                ));
            }
            (None, Some(_), None) => {
                return Err(ConfigError::Invalid(
                    "Target file must be specified".to_string(),
                ));
            }
        };

        let processor = if self.filters.is_empty() {
            processor
        } else {
            let filters = self
                .filters
                .iter()
                .map(|f| FilterRule::new(&f.replace, f.result.clone()))
                .collect::<Result<Vec<_>, _>>()?;
            processor.with_filters(filters)
        };

        Ok(processor.with_buffer_size(self.buffer)?)
    }
}

/// Bulk import stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkImportSection {
    /// Delimited file to load
    pub file: String,

    /// Name of the target store, used in logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,

    #[serde(default)]
    pub columns: Vec<String>,

    #[serde(default = "default_field_separator")]
    pub field_separator: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_enclosure: Option<String>,

    #[serde(default = "default_line_separator")]
    pub line_separator: String,

    #[serde(default)]
    pub null_string: String,

    #[serde(default)]
    pub truncate: bool,

    #[serde(default)]
    pub replace: bool,

    #[serde(default)]
    pub disable_keys: bool,

    /// Lines per transaction; 0 loads the whole file at once
    #[serde(default)]
    pub commit_every: i64,

    /// Index of the first chunk to load
    #[serde(default)]
    pub resume_from: usize,
}

fn default_field_separator() -> String {
    ",".to_string()
}

fn default_line_separator() -> String {
    "\n".to_string()
}

impl BulkImportSection {
    /// Load options of this section
    pub fn options(&self) -> ConfigResult<BulkLoadOptions> {
        if self.target.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::Invalid("Target must be specified".to_string()));
        }
        let table = match self.table.as_deref() {
            Some(table) if !table.is_empty() => table,
            _ => return Err(ConfigError::Invalid("Table must be specified".to_string())),
        };

        Ok(BulkLoadOptions {
            table: table.to_string(),
            columns: self.columns.clone(),
            field_separator: self.field_separator.clone(),
            field_enclosure: self.field_enclosure.clone(),
            line_separator: self.line_separator.clone(),
            null_string: self.null_string.clone(),
            truncate: self.truncate,
            replace: self.replace,
            disable_keys: self.disable_keys,
            commit_every: self.commit_every,
            resume_from: self.resume_from,
        })
    }

    /// Build the loader, resolving the file against `base`
    pub fn build<S: BulkLoadSink>(
        &self,
        base: &Path,
        sink: S,
        context: LoadContext,
    ) -> ConfigResult<BulkImportProcessor<S>> {
        let options = self.options()?;
        Ok(BulkImportProcessor::new(
            options,
            resolve(base, &self.file),
            sink,
            context,
        )?)
    }
}

/// Outcome of [`JobConfig::run`], one entry per stage that ran
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobReport {
    pub parse: Option<ParseSummary>,
    pub escape: Option<RewriteStats>,
    pub bulk_import: Option<LoadReport>,
}

/// Main job structure
///
/// Represents the TOML job file format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobConfig {
    /// Skip the bulk import stage
    #[serde(default)]
    pub skip_bulk_import: bool,

    #[serde(default)]
    pub database: DatabaseSection,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse: Option<ParseSection>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escape: Option<EscapeSection>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bulk_import: Option<BulkImportSection>,

    /// Directory relative paths are resolved against
    #[serde(skip)]
    base_dir: PathBuf,
}

impl JobConfig {
    /// Load a job file and apply environment variable overrides
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::IoError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let mut config = Self::parse(&content)?;
        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        config.apply_env_overrides();

        Ok(config)
    }

    /// Parse a job from TOML string
    pub fn parse(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Convert job to TOML string
    pub fn to_toml(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| {
            ConfigError::SerializationError(format!("Failed to serialize job: {}", e))
        })
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(skip) = std::env::var(ENV_SKIP_BULK_IMPORT) {
            self.skip_bulk_import = parse_flag(&skip);
        }

        if let Ok(path) = std::env::var(ENV_DUCKDB_PATH) {
            self.database.path = path;
        }

        if let Ok(prefix) = std::env::var(ENV_TABLE_PREFIX) {
            self.database.table_prefix = Some(prefix).filter(|p| !p.is_empty());
        }
    }

    /// Directory relative paths are resolved against
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    /// Resolve a path from the job file
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        resolve(&self.base_dir, path)
    }

    /// Get the DuckDB database path
    pub fn duckdb_path(&self) -> PathBuf {
        if self.database.path.is_empty() {
            self.base_dir.join(DEFAULT_DUCKDB_FILENAME)
        } else {
            self.resolve_path(&self.database.path)
        }
    }

    /// Job-level flags for the loader
    pub fn load_context(&self) -> LoadContext {
        LoadContext {
            skip_bulk_import: self.skip_bulk_import,
        }
    }

    /// Check every declared stage without touching any file
    ///
    /// [`JobConfig::run`] does the same before its first stage, so a bad
    /// later section never leaves the earlier stages half applied.
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(section) = &self.parse {
            self.parse_stage(section)?;
        }
        if let Some(section) = &self.escape {
            section.build(&self.base_dir)?;
        }
        if let Some(section) = &self.bulk_import {
            section.options()?;
            if section.file.is_empty() {
                return Err(ConfigError::Invalid("File must be specified".to_string()));
            }
        }
        Ok(())
    }

    /// Run the declared stages in order
    ///
    /// `sink` is only used by the bulk import stage. All stages are built
    /// before the first one runs.
    pub fn run<S: BulkLoadSink>(&self, sink: S) -> ConfigResult<JobReport> {
        let parse = self
            .parse
            .as_ref()
            .map(|section| self.parse_stage(section))
            .transpose()?;
        let escape = self
            .escape
            .as_ref()
            .map(|section| section.build(&self.base_dir))
            .transpose()?;
        let bulk_import = match &self.bulk_import {
            Some(section) => Some((
                section,
                section.build(&self.base_dir, sink, self.load_context())?,
            )),
            None => None,
        };

        let mut report = JobReport::default();

        if let Some(stage) = parse {
            report.parse = Some(stage.run()?);
        }

        if let Some(mut processor) = escape {
            tracing::info!(stage = processor.name(), "Running stage");
            processor.process()?;
            report.escape = Some(processor.last_stats());
        }

        if let Some((section, mut processor)) = bulk_import {
            tracing::info!(
                stage = processor.name(),
                target = section.target.as_deref().unwrap_or_default(),
                "Running stage"
            );
            processor.process()?;
            report.bulk_import = Some(processor.report().clone());
        }

        Ok(report)
    }

    fn parse_stage(&self, section: &ParseSection) -> ConfigResult<ParseStage> {
        if section.pattern.is_empty() {
            return Err(ConfigError::Invalid("Pattern must be specified".to_string()));
        }
        if section.output.is_empty() {
            return Err(ConfigError::Invalid("Output must be specified".to_string()));
        }

        let pattern = self.resolve_path(&section.pattern).to_string_lossy().into_owned();
        glob::Pattern::new(&pattern).map_err(|e| ParserError::InvalidPattern {
            pattern: pattern.clone(),
            message: e.to_string(),
        })?;

        Ok(ParseStage {
            parser: ApacheCombinedLogParser::new(pattern),
            output: self.resolve_path(&section.output),
        })
    }
}

/// Parse stage resolved from its section
struct ParseStage {
    parser: ApacheCombinedLogParser,
    output: PathBuf,
}

impl ParseStage {
    fn run(&self) -> ConfigResult<ParseSummary> {
        tracing::info!(stage = "parse", pattern = %self.parser.pattern(), "Running stage");

        if let Some(dir) = self.output.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir).map_err(|e| {
                ConfigError::IoError(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }
        let file = File::create(&self.output).map_err(|e| {
            ConfigError::IoError(format!("Failed to create {}: {}", self.output.display(), e))
        })?;

        let summary = parser::write_json_lines(self.parser.records()?, BufWriter::new(file))?;
        Ok(summary)
    }
}

fn resolve(base: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Whether `ETL_SKIP_BULK_IMPORT` is set to a true value
pub fn skip_bulk_import_from_env() -> bool {
    std::env::var(ENV_SKIP_BULK_IMPORT).is_ok_and(|v| parse_flag(&v))
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Generate a sample job file
pub fn sample_config() -> &'static str {
    r#"# ETL stages job file
# Stages run in order: parse, escape, bulk_import. Omit a section to skip it.
# Relative paths are resolved against the directory of this file.

# Skip the bulk import stage (also ETL_SKIP_BULK_IMPORT=1)
skip_bulk_import = false

[database]
# Path to DuckDB database file (also ETL_DUCKDB_PATH)
path = "warehouse.duckdb"
# Prefix for table names (also ETL_TABLE_PREFIX)
# table_prefix = "staging_"

[parse]
# Glob pattern of Apache combined access logs
pattern = "logs/access*.log"
# One JSON object per line
output = "out/access.jsonl"

[escape]
# Rewrite a file in place, or set source_file and target_file instead
file = "out/access.csv"
buffer = 8192

# Filters run in order; without any, double quotes are doubled
[[escape.filters]]
replace = '"'
result = '""'

[bulk_import]
file = "out/access.csv"
target = "warehouse"
table = "access_log"
columns = ["ip_address", "user", "path"]
field_separator = ","
field_enclosure = '"'
line_separator = "\n"
null_string = ""
truncate = true
replace = false
disable_keys = false
# Lines per transaction, 0 loads the whole file in one transaction
commit_every = 10000
"#
}
