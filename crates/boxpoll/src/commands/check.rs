//! `boxpoll check`: validate the config and show effective timings.

use std::fmt::Write as _;
use std::path::Path;

use humantime::format_duration;

use boxpoll_config::{Config, ResolvedStream};

use crate::error::CliError;

pub fn handle(cfg: &Config, path: &Path) -> Result<(), CliError> {
    cfg.validate().map_err(|e| CliError::config(path, e))?;
    let streams = cfg.resolve_streams().map_err(|e| CliError::config(path, e))?;
    if streams.is_empty() {
        return Err(CliError::NoStreams {
            path: path.display().to_string(),
        });
    }

    println!("config: {}", path.display());
    for stream in &streams {
        println!("{}", describe(stream));
    }
    Ok(())
}

/// One line per stream, e.g.
/// `devices  normal 30s  fast 2s for 2m  ttl 2m  http://…/lan/browser/pub/`.
pub fn describe(stream: &ResolvedStream) -> String {
    let c = &stream.config;
    let mut line = format!(
        "{}  normal {}  fast {} for {}  ttl {}",
        c.id,
        format_duration(c.normal_period),
        format_duration(c.fast_period),
        format_duration(c.fast_window),
        format_duration(c.ttl),
    );
    if let Some(settle) = c.settle_after {
        let _ = write!(line, "  settle {}", format_duration(settle));
    }
    if c.refetch_on_activate {
        line.push_str("  refetch-on-activate");
    }
    let _ = write!(line, "  {}", stream.endpoint);
    line
}
