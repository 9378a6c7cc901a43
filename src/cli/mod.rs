//! Command line interface for the `etl-stages` binary

pub mod commands;
pub mod error;
