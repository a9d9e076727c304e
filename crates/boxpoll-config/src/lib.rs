//! Configuration for boxpoll.
//!
//! A TOML file plus `BOXPOLL_` environment overrides, resolved into
//! validated `boxpoll_core::StreamConfig`s and the router endpoint each
//! stream polls. Hosts build their scheduler from [`ResolvedStream`]s and
//! never see the raw file shape.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use boxpoll_core::{CoreError, StreamConfig};

/// Bounds on `router.timeout_secs`.
pub const ROUTER_TIMEOUT_SECS: std::ops::RangeInclusive<u64> = 1..=120;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("stream '{stream}': {source}")]
    Stream {
        stream: String,
        #[source]
        source: CoreError,
    },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub router: RouterSettings,

    /// Timings applied to every stream unless overridden.
    #[serde(default)]
    pub defaults: PollDefaults,

    /// Streams by id.
    #[serde(default)]
    pub streams: BTreeMap<String, StreamSettings>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RouterSettings {
    /// API base URL; stream paths are joined onto it.
    #[serde(default = "default_router_url")]
    pub url: String,

    #[serde(default = "default_router_timeout")]
    pub timeout_secs: u64,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            url: default_router_url(),
            timeout_secs: default_router_timeout(),
        }
    }
}

fn default_router_url() -> String {
    "http://mafreebox.freebox.fr/api/v6/".into()
}
fn default_router_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PollDefaults {
    #[serde(default = "default_normal_period")]
    pub normal_period_secs: u64,

    #[serde(default = "default_fast_period")]
    pub fast_period_secs: u64,

    #[serde(default = "default_fast_window")]
    pub fast_window_secs: u64,

    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,

    #[serde(default = "default_warn_threshold")]
    pub warn_threshold_ms: u64,

    #[serde(default = "default_failure_warn_after")]
    pub failure_warn_after: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settle_after_secs: Option<u64>,

    #[serde(default)]
    pub refetch_on_activate: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_timeout_secs: Option<u64>,
}

impl Default for PollDefaults {
    fn default() -> Self {
        Self {
            normal_period_secs: default_normal_period(),
            fast_period_secs: default_fast_period(),
            fast_window_secs: default_fast_window(),
            ttl_secs: default_ttl(),
            warn_threshold_ms: default_warn_threshold(),
            failure_warn_after: default_failure_warn_after(),
            settle_after_secs: None,
            refetch_on_activate: false,
            fetch_timeout_secs: None,
        }
    }
}

fn default_normal_period() -> u64 {
    boxpoll_core::config::DEFAULT_NORMAL_PERIOD.as_secs()
}
fn default_fast_period() -> u64 {
    boxpoll_core::config::DEFAULT_FAST_PERIOD.as_secs()
}
fn default_fast_window() -> u64 {
    boxpoll_core::config::DEFAULT_FAST_WINDOW.as_secs()
}
fn default_ttl() -> u64 {
    boxpoll_core::config::DEFAULT_TTL.as_secs()
}
fn default_warn_threshold() -> u64 {
    u64::try_from(boxpoll_core::config::DEFAULT_WARN_THRESHOLD.as_millis()).unwrap_or(u64::MAX)
}
fn default_failure_warn_after() -> u32 {
    boxpoll_core::config::DEFAULT_FAILURE_WARN_AFTER
}

/// One `[streams.<id>]` table. Unset fields fall back to `[defaults]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct StreamSettings {
    /// Endpoint path relative to `router.url`, e.g. `"lan/browser/pub/"`.
    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normal_period_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fast_period_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fast_window_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warn_threshold_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_warn_after: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settle_after_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refetch_on_activate: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_timeout_secs: Option<u64>,
}

impl StreamSettings {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

// ── Resolution ──────────────────────────────────────────────────────

/// A stream ready to hand to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStream {
    pub config: StreamConfig,
    /// Absolute URL the stream's fetcher polls.
    pub endpoint: Url,
}

impl Config {
    pub fn router_url(&self) -> Result<Url, ConfigError> {
        let url: Url = self
            .router
            .url
            .parse()
            .map_err(|e| invalid("router.url", format!("'{}': {e}", self.router.url)))?;
        if url.cannot_be_a_base() {
            return Err(invalid(
                "router.url",
                format!("'{}' cannot be used as a base URL", self.router.url),
            ));
        }
        Ok(url)
    }

    pub fn router_timeout(&self) -> Result<Duration, ConfigError> {
        let secs = self.router.timeout_secs;
        if ROUTER_TIMEOUT_SECS.contains(&secs) {
            Ok(Duration::from_secs(secs))
        } else {
            Err(invalid(
                "router.timeout_secs",
                format!(
                    "must be between {}s and {}s, got {secs}s",
                    ROUTER_TIMEOUT_SECS.start(),
                    ROUTER_TIMEOUT_SECS.end()
                ),
            ))
        }
    }

    /// Merge `[defaults]` with `[streams.<id>]` and validate the result.
    pub fn resolve_stream(&self, id: &str) -> Result<ResolvedStream, ConfigError> {
        let settings = self
            .streams
            .get(id)
            .ok_or_else(|| invalid("streams", format!("no stream named '{id}'")))?;
        self.resolve(id, settings, &self.router_url()?)
    }

    /// Every configured stream, in id order. Fails on the first invalid one.
    pub fn resolve_streams(&self) -> Result<Vec<ResolvedStream>, ConfigError> {
        let base = self.router_url()?;
        self.streams
            .iter()
            .map(|(id, settings)| self.resolve(id, settings, &base))
            .collect()
    }

    /// Check the router settings and every stream without building anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.router_timeout()?;
        self.resolve_streams().map(|_| ())
    }

    fn resolve(
        &self,
        id: &str,
        settings: &StreamSettings,
        base: &Url,
    ) -> Result<ResolvedStream, ConfigError> {
        let d = &self.defaults;
        let path = settings.path.trim();
        if path.is_empty() {
            return Err(invalid(format!("streams.{id}.path"), "must not be empty"));
        }
        let endpoint = base
            .join(path.trim_start_matches('/'))
            .map_err(|e| invalid(format!("streams.{id}.path"), format!("'{path}': {e}")))?;

        let config = StreamConfig::new(id)
            .normal_period(secs(settings.normal_period_secs, d.normal_period_secs))
            .fast_period(secs(settings.fast_period_secs, d.fast_period_secs))
            .fast_window(secs(settings.fast_window_secs, d.fast_window_secs))
            .ttl(secs(settings.ttl_secs, d.ttl_secs))
            .warn_threshold(Duration::from_millis(
                settings.warn_threshold_ms.unwrap_or(d.warn_threshold_ms),
            ))
            .failure_warn_after(settings.failure_warn_after.unwrap_or(d.failure_warn_after))
            .settle_after(
                settings
                    .settle_after_secs
                    .or(d.settle_after_secs)
                    .map(Duration::from_secs),
            )
            .refetch_on_activate(settings.refetch_on_activate.unwrap_or(d.refetch_on_activate))
            .fetch_timeout(
                settings
                    .fetch_timeout_secs
                    .or(d.fetch_timeout_secs)
                    .map(Duration::from_secs),
            );

        config.validate().map_err(|source| ConfigError::Stream {
            stream: id.to_owned(),
            source,
        })?;
        Ok(ResolvedStream { config, endpoint })
    }
}

fn secs(value: Option<u64>, default: u64) -> Duration {
    Duration::from_secs(value.unwrap_or(default))
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "boxpoll", "boxpoll").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("boxpoll");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load config from `path` + environment. A missing file yields defaults.
///
/// Environment variables use the `BOXPOLL_` prefix with `__` between
/// nesting levels: `BOXPOLL_ROUTER__TIMEOUT_SECS=20`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("BOXPOLL_").ignore(&["config"]).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to pretty TOML at `path`, creating parent directories.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}
