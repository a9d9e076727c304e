mod cli;
mod commands;
mod error;
mod fetcher;

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

/// Logs go to stderr; stdout is reserved for command output.
fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let path: PathBuf = cli
        .global
        .config
        .clone()
        .unwrap_or_else(boxpoll_config::config_path);
    let cfg = boxpoll_config::load_config_from(&path).map_err(|e| CliError::config(&path, e))?;
    tracing::debug!(path = %path.display(), streams = cfg.streams.len(), "config loaded");

    match cli.command {
        Command::Check => commands::check::handle(&cfg, &path),
        Command::Watch(args) => commands::watch::handle(args, &cfg, &path).await,
    }
}
