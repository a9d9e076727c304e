//! Clap derive structures for the `boxpoll` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// boxpoll -- watch a router's JSON API without hammering it
#[derive(Debug, Parser)]
#[command(
    name = "boxpoll",
    version,
    about = "Poll a router's JSON API on an adaptive schedule",
    long_about = "Polls each configured endpoint at a slow normal rate, serving repeat\n\
        reads from a TTL cache, and switches individual streams to a fast\n\
        rate for a bounded window on request.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, short = 'c', env = "BOXPOLL_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Validate the configuration and show each stream's effective timings
    Check,

    /// Poll the configured streams and print every update as a JSON line
    #[command(
        long_about = "Poll the configured streams and print every update as a JSON line.\n\n\
            While running, these commands are read from stdin:\n  \
            fast <stream> [duration]   poll <stream> fast (e.g. `fast devices 90s`)\n  \
            normal <stream>            return <stream> to its normal rate\n  \
            refresh <stream>           fetch <stream> now, bypassing its cache\n  \
            stats                      print per-stream statistics\n  \
            quit                       stop polling and exit"
    )]
    Watch(WatchArgs),
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Only watch these streams (repeatable; default: all)
    #[arg(long = "stream", short = 's', value_name = "ID")]
    pub streams: Vec<String>,

    /// Print only the value at this dotted path, e.g. `0.primary_name`
    #[arg(long, value_name = "PATH")]
    pub select: Option<String>,
}
