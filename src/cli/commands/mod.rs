//! CLI command implementations

pub mod escape;
pub mod load;
pub mod parse;
pub mod run;
