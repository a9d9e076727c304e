//! `boxpoll watch`: run the scheduler and print updates as JSON lines.
//!
//! stdout carries one JSON object per notification (and per `stats`
//! request); command feedback and logs go to stderr.

use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use boxpoll_config::{Config, ResolvedStream};
use boxpoll_core::access::split_path;
use boxpoll_core::{
    Activation, DEFAULT_SHUTDOWN_GRACE, NotifierError, PollScheduler, TickOutcome, lookup,
    notifier_fn,
};

use crate::cli::WatchArgs;
use crate::error::CliError;
use crate::fetcher::HttpFetcher;

// ── Console commands ─────────────────────────────────────────────────

/// A line read from stdin while watching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Fast {
        stream: String,
        duration: Option<Duration>,
    },
    Normal {
        stream: String,
    },
    Refresh {
        stream: String,
    },
    Stats,
    Quit,
}

const USAGE: &str = "commands: fast <stream> [duration] | normal <stream> | refresh <stream> | stats | quit";

impl ConsoleCommand {
    /// Parse one input line. `Ok(None)` for a blank line.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };
        let id = words.next();
        let arg = words.next();
        let stream = || {
            id.map(str::to_owned)
                .ok_or_else(|| format!("'{verb}' needs a stream id"))
        };

        let command = match verb {
            "fast" => Self::Fast {
                stream: stream()?,
                duration: arg.map(parse_duration).transpose()?,
            },
            "normal" => Self::Normal { stream: stream()? },
            "refresh" => Self::Refresh { stream: stream()? },
            "stats" => Self::Stats,
            "quit" | "exit" => Self::Quit,
            other => return Err(format!("unknown command '{other}'; {USAGE}")),
        };
        Ok(Some(command))
    }
}

/// Whole seconds (`90`) or a humantime span (`90s`, `2m`).
fn parse_duration(text: &str) -> Result<Duration, String> {
    if let Ok(secs) = text.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(text).map_err(|e| format!("invalid duration '{text}': {e}"))
}

// ── Output ───────────────────────────────────────────────────────────

/// The JSON line printed for one notification.
pub fn render_update(stream: &str, value: &Value, cache_hit: bool, select: Option<&str>) -> Value {
    let value = match select {
        Some(path) => lookup(value, split_path(path)).cloned().unwrap_or(Value::Null),
        None => value.clone(),
    };
    json!({
        "stream": stream,
        "cache_hit": cache_hit,
        "at": humantime::format_rfc3339_seconds(SystemTime::now()).to_string(),
        "value": value,
    })
}

fn print_line(line: &Value) -> Result<(), NotifierError> {
    let mut out = std::io::stdout().lock();
    writeln!(out, "{line}")
        .and_then(|()| out.flush())
        .map_err(|e| NotifierError(format!("stdout: {e}")))
}

// ── Command ──────────────────────────────────────────────────────────

pub async fn handle(args: WatchArgs, cfg: &Config, path: &Path) -> Result<(), CliError> {
    let timeout = cfg.router_timeout().map_err(|e| CliError::config(path, e))?;
    let streams = select_streams(cfg, path, &args.streams)?;

    let select: Option<Arc<str>> = args.select.as_deref().map(Arc::from);
    let scheduler = PollScheduler::new(notifier_fn(
        move |stream: &str, value: &Arc<Value>, cache_hit: bool| {
            print_line(&render_update(stream, value, cache_hit, select.as_deref()))
        },
    ));

    let http = HttpFetcher::client(timeout)?;
    for stream in streams {
        let fetcher = HttpFetcher::new(http.clone(), stream.endpoint, timeout);
        debug!(stream = %stream.config.id, endpoint = %fetcher.endpoint(), "adding stream");
        scheduler.add_stream(stream.config, fetcher)?;
    }
    scheduler.start()?;
    info!(streams = ?scheduler.stream_ids(), "watching; type `quit` or press Ctrl-C to stop");

    let result = run_console(&scheduler).await;

    scheduler.shutdown(DEFAULT_SHUTDOWN_GRACE).await;
    info!("stopped");
    result
}

fn select_streams(
    cfg: &Config,
    path: &Path,
    wanted: &[String],
) -> Result<Vec<ResolvedStream>, CliError> {
    if cfg.streams.is_empty() {
        return Err(CliError::NoStreams {
            path: path.display().to_string(),
        });
    }
    if wanted.is_empty() {
        return cfg.resolve_streams().map_err(|e| CliError::config(path, e));
    }
    wanted
        .iter()
        .map(|id| {
            if !cfg.streams.contains_key(id) {
                return Err(CliError::UnknownStream {
                    id: id.clone(),
                    available: cfg.streams.keys().cloned().collect::<Vec<_>>().join(", "),
                });
            }
            cfg.resolve_stream(id).map_err(|e| CliError::config(path, e))
        })
        .collect()
}

/// Read stdin commands until `quit`, Ctrl-C, or a fatal IO error.
/// Closing stdin leaves the watch running until Ctrl-C.
async fn run_console(scheduler: &PollScheduler<Value>) -> Result<(), CliError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                res?;
                info!("interrupted, shutting down");
                return Ok(());
            }
            line = lines.next_line(), if stdin_open => {
                let Some(line) = line? else {
                    debug!("stdin closed; polling continues until interrupted");
                    stdin_open = false;
                    continue;
                };
                match ConsoleCommand::parse(&line) {
                    Ok(Some(ConsoleCommand::Quit)) => return Ok(()),
                    Ok(Some(command)) => execute(scheduler, command)?,
                    Ok(None) => {}
                    Err(usage) => eprintln!("{usage}"),
                }
            }
        }
    }
}

fn execute(scheduler: &PollScheduler<Value>, command: ConsoleCommand) -> Result<(), CliError> {
    match command {
        ConsoleCommand::Fast { stream, duration } => match scheduler.activate(&stream, duration) {
            Ok(activation) => {
                let remaining = activation
                    .deadline()
                    .saturating_duration_since(tokio::time::Instant::now());
                let verb = match activation {
                    Activation::Entered { .. } => "fast polling",
                    Activation::Extended { .. } => "fast polling extended",
                };
                eprintln!(
                    "{stream}: {verb} for {}",
                    humantime::format_duration(Duration::from_secs(remaining.as_secs()))
                );
            }
            Err(e) => eprintln!("{e}"),
        },
        ConsoleCommand::Normal { stream } => match scheduler.deactivate(&stream) {
            Ok(true) => eprintln!("{stream}: back to normal polling"),
            Ok(false) => eprintln!("{stream}: already polling normally"),
            Err(e) => eprintln!("{e}"),
        },
        ConsoleCommand::Refresh { stream } => {
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                match scheduler.refresh(&stream).await {
                    Ok(TickOutcome::Skipped) => eprintln!("{stream}: fetch already in flight"),
                    Ok(TickOutcome::Failed(e)) => warn!(stream = %stream, error = %e, "refresh failed"),
                    Ok(_) => {}
                    Err(e) => eprintln!("{e}"),
                }
            });
        }
        ConsoleCommand::Stats => {
            let stats = serde_json::to_value(scheduler.stats_all())?;
            print_line(&json!({ "stats": stats }))
                .map_err(|e| CliError::Io(std::io::Error::other(e.0)))?;
        }
        ConsoleCommand::Quit => {}
    }
    Ok(())
}
