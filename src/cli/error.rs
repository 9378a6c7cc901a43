//! CLI-specific error types

use crate::config::ConfigError;
use crate::parser::ParserError;
use crate::processor::ProcessorError;
use crate::sink::SinkError;
use std::path::PathBuf;
use thiserror::Error;

/// CLI-specific error type
#[derive(Error, Debug)]
pub enum CliError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to write file {0}: {1}")]
    FileWriteError(PathBuf, String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Parse error: {0}")]
    ParserError(#[from] ParserError),

    #[error("{0}")]
    ProcessorError(#[from] ProcessorError),

    #[error("Database error: {0}")]
    DatabaseError(#[from] SinkError),

    #[error("Job error: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("IO error: {0}")]
    IoError(String),
}
