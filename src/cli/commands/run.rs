//! Run command
//!
//! Runs the stages declared in a job file.

use std::path::PathBuf;

use crate::cli::error::CliError;
use crate::config::{JobConfig, JobReport};

/// Run command arguments
#[derive(Debug, Clone)]
pub struct RunArgs {
    /// Job file
    pub job: PathBuf,
}

/// Run a job file
pub fn handle_run(args: &RunArgs) -> Result<(), CliError> {
    if !args.job.exists() {
        return Err(CliError::FileNotFound(args.job.clone()));
    }

    let config = JobConfig::load(&args.job)?;
    let report = run_job(&config)?;

    let summary = serde_json::to_string_pretty(&report)
        .map_err(|e| CliError::IoError(format!("Failed to serialize report: {}", e)))?;
    println!("{}", summary);
    Ok(())
}

#[cfg(feature = "duckdb-backend")]
fn run_job(config: &JobConfig) -> Result<JobReport, CliError> {
    use crate::sink::DuckDbSink;

    if config.bulk_import.is_none() || config.skip_bulk_import {
        return Ok(config.run(crate::sink::MemorySink::new())?);
    }

    config.validate()?;
    let mut sink = DuckDbSink::new(config.duckdb_path())?;
    if let Some(prefix) = &config.database.table_prefix {
        sink = sink.with_table_prefix(prefix.clone());
    }
    Ok(config.run(sink)?)
}

#[cfg(not(feature = "duckdb-backend"))]
fn run_job(config: &JobConfig) -> Result<JobReport, CliError> {
    if config.bulk_import.is_some() && !config.skip_bulk_import {
        return Err(CliError::InvalidArgument(
            "Job declares a bulk import but DuckDB support is not enabled. Build with --features duckdb-backend"
                .to_string(),
        ));
    }
    Ok(config.run(crate::sink::MemorySink::new())?)
}
