//! CLI binary entry point for etl-stages

#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
#[cfg(feature = "cli")]
use etl_stages::cli::commands::escape::{EscapeArgs, handle_escape};
#[cfg(feature = "cli")]
use etl_stages::cli::commands::load::{LoadArgs, handle_load};
#[cfg(feature = "cli")]
use etl_stages::cli::commands::parse::{ParseArgs, handle_parse};
#[cfg(feature = "cli")]
use etl_stages::cli::commands::run::{RunArgs, handle_run};
#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "etl-stages")]
#[command(about = "Parse access logs, escape delimited files and bulk load them")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Commands {
    /// Parse Apache combined logs into JSON lines
    Parse {
        /// Glob pattern of the log files
        pattern: String,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Rewrite a file through regex filters
    Escape {
        /// Rewrite this file in place
        #[arg(long, conflicts_with_all = ["source", "target"])]
        file: Option<PathBuf>,
        /// Source file
        #[arg(long, requires = "target")]
        source: Option<PathBuf>,
        /// Target file
        #[arg(long, requires = "source")]
        target: Option<PathBuf>,
        /// Read chunk size in bytes
        #[arg(long, default_value_t = 8192)]
        buffer: usize,
        /// Filter as PATTERN=REPLACEMENT (repeatable, applied in order)
        #[arg(long = "filter")]
        filters: Vec<String>,
    },
    /// Bulk load a delimited file into a DuckDB table
    Load {
        /// Delimited file to load
        #[arg(long)]
        file: PathBuf,
        /// Target table
        #[arg(long)]
        table: String,
        /// DuckDB database file
        #[arg(long, default_value = "warehouse.duckdb", env = "ETL_DUCKDB_PATH")]
        database: PathBuf,
        /// Prefix for the table name
        #[arg(long, env = "ETL_TABLE_PREFIX")]
        table_prefix: Option<String>,
        /// Target columns in file order (comma-separated)
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,
        #[arg(long, default_value = ",")]
        field_separator: String,
        #[arg(long)]
        field_enclosure: Option<String>,
        #[arg(long, default_value = r"\n")]
        line_separator: String,
        /// Value read as NULL
        #[arg(long, default_value = "")]
        null_string: String,
        /// Clear the table before loading
        #[arg(long)]
        truncate: bool,
        /// Replace rows with an equal key
        #[arg(long)]
        replace: bool,
        #[arg(long)]
        disable_keys: bool,
        /// Lines per transaction (0 = single transaction)
        #[arg(long, default_value_t = 0)]
        commit_every: i64,
        /// First chunk to load after a failed run
        #[arg(long, default_value_t = 0)]
        resume_from: usize,
        /// Skip the load
        #[arg(long)]
        skip: bool,
    },
    /// Run the stages of a job file
    Run {
        /// Job file (TOML)
        job: PathBuf,
    },
}

#[cfg(feature = "cli")]
fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("etl_stages=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(feature = "cli")]
fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Parse { pattern, output } => handle_parse(&ParseArgs { pattern, output }),
        Commands::Escape {
            file,
            source,
            target,
            buffer,
            filters,
        } => handle_escape(&EscapeArgs {
            file,
            source,
            target,
            buffer,
            filters,
        }),
        Commands::Load {
            file,
            table,
            database,
            table_prefix,
            columns,
            field_separator,
            field_enclosure,
            line_separator,
            null_string,
            truncate,
            replace,
            disable_keys,
            commit_every,
            resume_from,
            skip,
        } => handle_load(&LoadArgs {
            file,
            table,
            database,
            table_prefix,
            columns,
            field_separator,
            field_enclosure,
            line_separator,
            null_string,
            truncate,
            replace,
            disable_keys,
            commit_every,
            resume_from,
            skip,
        }),
        Commands::Run { job } => handle_run(&RunArgs { job }),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature is not enabled. Build with --features cli");
    std::process::exit(1);
}
