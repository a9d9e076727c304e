// ── Poll stream configuration ──
//
// These types describe *how often* and *how long* a stream polls.
// They never touch disk: `boxpoll-config` (or any other host) builds a
// `StreamConfig` and hands it in. Bounds are checked once, at
// construction, never while polling.

use std::ops::RangeInclusive;
use std::time::Duration;

use serde::Serialize;

use crate::error::CoreError;

/// Inclusive bounds every stream configuration is validated against.
pub mod bounds {
    use std::ops::RangeInclusive;
    use std::time::Duration;

    pub const NORMAL_PERIOD: RangeInclusive<Duration> =
        Duration::from_secs(10)..=Duration::from_secs(300);
    pub const FAST_PERIOD: RangeInclusive<Duration> =
        Duration::from_secs(1)..=Duration::from_secs(5);
    pub const FAST_WINDOW: RangeInclusive<Duration> =
        Duration::from_secs(30)..=Duration::from_secs(120);
    pub const TTL: RangeInclusive<Duration> = Duration::from_secs(1)..=Duration::from_secs(3600);
    pub const WARN_THRESHOLD: RangeInclusive<Duration> =
        Duration::from_millis(1)..=Duration::from_secs(60);
    pub const SETTLE_AFTER: RangeInclusive<Duration> =
        Duration::from_secs(5)..=Duration::from_secs(120);
    pub const FETCH_TIMEOUT: RangeInclusive<Duration> =
        Duration::from_secs(1)..=Duration::from_secs(120);
}

pub const DEFAULT_NORMAL_PERIOD: Duration = Duration::from_secs(30);
pub const DEFAULT_FAST_PERIOD: Duration = Duration::from_secs(2);
pub const DEFAULT_FAST_WINDOW: Duration = Duration::from_secs(120);
pub const DEFAULT_TTL: Duration = Duration::from_secs(120);
pub const DEFAULT_WARN_THRESHOLD: Duration = Duration::from_millis(1000);
pub const DEFAULT_FAILURE_WARN_AFTER: u32 = 5;

/// Timing parameters for one poll stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamConfig {
    /// Unique stream name, e.g. `"devices"` or `"home-nodes"`.
    pub id: String,
    /// Baseline poll interval.
    pub normal_period: Duration,
    /// Poll interval while fast mode is active.
    pub fast_period: Duration,
    /// How long fast mode lasts when activated without an explicit duration.
    pub fast_window: Duration,
    /// Lifetime of a fetched value in the stream's cache.
    pub ttl: Duration,
    /// Fetches slower than this are logged at warn level.
    pub warn_threshold: Duration,
    /// Revert fast mode early once fetched values stop changing for this long.
    pub settle_after: Option<Duration>,
    /// Drop the cached value on activation so the first fast tick fetches.
    pub refetch_on_activate: bool,
    /// Upper bound on a single fetch, enforced by the scheduler.
    pub fetch_timeout: Option<Duration>,
    /// Emit a liveness warning after this many consecutive failures (0 = never).
    pub failure_warn_after: u32,
}

impl StreamConfig {
    /// A configuration with default timings.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            normal_period: DEFAULT_NORMAL_PERIOD,
            fast_period: DEFAULT_FAST_PERIOD,
            fast_window: DEFAULT_FAST_WINDOW,
            ttl: DEFAULT_TTL,
            warn_threshold: DEFAULT_WARN_THRESHOLD,
            settle_after: None,
            refetch_on_activate: false,
            fetch_timeout: None,
            failure_warn_after: DEFAULT_FAILURE_WARN_AFTER,
        }
    }

    pub fn normal_period(mut self, period: Duration) -> Self {
        self.normal_period = period;
        self
    }

    pub fn fast_period(mut self, period: Duration) -> Self {
        self.fast_period = period;
        self
    }

    pub fn fast_window(mut self, window: Duration) -> Self {
        self.fast_window = window;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn warn_threshold(mut self, threshold: Duration) -> Self {
        self.warn_threshold = threshold;
        self
    }

    pub fn settle_after(mut self, settle_after: Option<Duration>) -> Self {
        self.settle_after = settle_after;
        self
    }

    pub fn refetch_on_activate(mut self, refetch: bool) -> Self {
        self.refetch_on_activate = refetch;
        self
    }

    pub fn fetch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn failure_warn_after(mut self, count: u32) -> Self {
        self.failure_warn_after = count;
        self
    }

    /// Check every parameter against [`bounds`].
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.id.trim().is_empty() {
            return Err(CoreError::config("id", "stream id must not be empty"));
        }
        check("normal_period", self.normal_period, &bounds::NORMAL_PERIOD)?;
        check("fast_period", self.fast_period, &bounds::FAST_PERIOD)?;
        check("fast_window", self.fast_window, &bounds::FAST_WINDOW)?;
        check("ttl", self.ttl, &bounds::TTL)?;
        check("warn_threshold", self.warn_threshold, &bounds::WARN_THRESHOLD)?;
        if let Some(settle) = self.settle_after {
            check("settle_after", settle, &bounds::SETTLE_AFTER)?;
        }
        if let Some(timeout) = self.fetch_timeout {
            check("fetch_timeout", timeout, &bounds::FETCH_TIMEOUT)?;
        }
        Ok(())
    }

    /// Clamp a requested fast-mode duration into [`bounds::FAST_WINDOW`].
    pub(crate) fn clamp_fast_window(requested: Duration) -> Duration {
        requested.clamp(*bounds::FAST_WINDOW.start(), *bounds::FAST_WINDOW.end())
    }
}

fn check(field: &str, value: Duration, range: &RangeInclusive<Duration>) -> Result<(), CoreError> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(CoreError::config(
            field,
            format!(
                "must be between {} and {}, got {}",
                fmt_duration(*range.start()),
                fmt_duration(*range.end()),
                fmt_duration(value),
            ),
        ))
    }
}

fn fmt_duration(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}
