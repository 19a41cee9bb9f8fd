//! Command-line argument parsing with clap.

use std::path::PathBuf;

use chrono::{DateTime, NaiveDateTime};
use clap::{Args, Parser, Subcommand, ValueEnum};
use logdex::LogLevel;

/// logdex - index and search directories of multi-line log files.
#[derive(Parser, Debug, Clone)]
#[command(name = "logdex")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Directory holding the log files.
    #[arg(short, long, env = "LOGDEX_LOG_DIR", global = true)]
    pub log_dir: Option<PathBuf>,

    /// Directory holding the index.
    #[arg(short, long, env = "LOGDEX_INDEX_DIR", global = true)]
    pub index_dir: Option<PathBuf>,

    /// JSON configuration file; flags override its directories.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = Format::Table, global = true)]
    pub format: Format,

    /// Emit diagnostics as JSON lines.
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Format {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON output for scripting.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Bring the index up to date.
    Index {
        /// Keep watching the directory after the index is ready.
        #[arg(long)]
        follow: bool,
    },

    /// Discard the index and rebuild it from scratch.
    Rebuild,

    /// List indexed files.
    Files,

    /// Search indexed entries.
    Search(SearchArgs),

    /// Count matches per level.
    Levels {
        /// Report the levels present in each file instead.
        #[arg(long)]
        per_file: bool,

        /// Filter options.
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Print one entry, or the entries around it.
    Show {
        /// File name relative to the log directory.
        file: String,

        /// Byte offset of the entry.
        entry_id: u64,

        /// Also print entries starting within this many bytes.
        #[arg(long, value_name = "BYTES")]
        nearby: Option<u64>,
    },
}

/// Arguments for the search command.
#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    /// Filter options.
    #[command(flatten)]
    pub filter: FilterArgs,

    /// Print full entries ordered by time.
    #[arg(long)]
    pub sorted: bool,

    /// Maximum number of results; pages when not sorted.
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,

    /// Resume after a cursor printed by a previous page.
    #[arg(long, conflicts_with = "sorted")]
    pub cursor: Option<String>,
}

/// Filter options shared by the query commands.
#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Earliest entry time (RFC 3339 or `YYYY-MM-DD HH:MM:SS`, UTC).
    #[arg(long, value_parser = parse_time)]
    pub since: Option<i64>,

    /// Entries strictly before this time.
    #[arg(long, value_parser = parse_time)]
    pub until: Option<i64>,

    /// Levels to include (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub level: Vec<LogLevel>,

    /// Exact module name.
    #[arg(long)]
    pub module: Option<String>,

    /// Exact class name.
    #[arg(long)]
    pub class: Option<String>,

    /// Exact exception name.
    #[arg(long)]
    pub exception: Option<String>,

    /// Restrict to one file.
    #[arg(long)]
    pub file: Option<String>,

    /// Words that must all appear in the message.
    #[arg(long)]
    pub contains: Option<String>,
}

/// Parses a time argument into ms since the epoch.
fn parse_time(value: &str) -> Result<i64, String> {
    if let Ok(ms) = value.parse::<i64>() {
        return Ok(ms);
    }
    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Ok(time.timestamp_millis());
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .map(|time| time.and_utc().timestamp_millis())
        .map_err(|_| format!("unrecognised time: {value}"))
}
