//! logdex binary entrypoint.

use std::io;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use logdex_cli::cli::{Cli, Commands};

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Diagnostics go to stderr so stdout stays parseable
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(io::stderr)
            .init();
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let mut stdout = io::stdout().lock();
    let action = match cli.command {
        Commands::Index { .. } => "index",
        Commands::Rebuild => "rebuild",
        Commands::Files => "files",
        Commands::Search(_) => "search",
        Commands::Levels { .. } => "levels",
        Commands::Show { .. } => "show",
    };
    logdex_cli::execute(cli, &mut stdout).with_context(|| format!("`{action}` failed"))
}
