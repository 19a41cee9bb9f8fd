//! # logdex-cli
//!
//! Command-line front end for the `logdex` indexer.
//!
//! Provides commands for:
//! - Bringing an index up to date, once or continuously (`index`, `rebuild`)
//! - Listing indexed files with their time spans and levels (`files`)
//! - Searching entries grouped, sorted or page by page (`search`)
//! - Level histograms and per-file level sets (`levels`)
//! - Printing single entries and their neighbours (`show`)
//!
//! Every command opens the index directory itself; the worker only runs for
//! `index` and `rebuild`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;

pub use cli::{Cli, Commands, FilterArgs, Format, SearchArgs};
pub use commands::{execute, resolve_config};
pub use error::CliError;
pub use output::OutputFormat;
