//! Adaptive polling and caching between a rate-sensitive router API and
//! the things that display its data.
//!
//! - **[`PollScheduler`]**: Owns named poll streams (`"devices"`,
//!   `"home-nodes"`, …). Each stream ticks on its own task: read the
//!   stream's cache, fetch on a miss, notify dependents. At most one
//!   fetch per stream is ever in flight; failures keep the last known
//!   value and retry on the next tick.
//!
//! - **Rate modes** ([`RateMode`]): [`activate()`](PollScheduler::activate)
//!   switches a stream to its fast period for a bounded window (after a
//!   user action, say). The stream reverts to its normal period on its
//!   own, fetching once more as it does.
//!
//! - **[`TtlCache<V>`]**: Single-value cache with a fixed lifetime,
//!   lock-free for readers.
//!
//! - **[`PerformanceTimer`]**: Times an operation with named
//!   checkpoints and warns when it runs past a threshold.
//!
//! - **[`access`]**: Default-on-failure lookups into nested JSON.
//!
//! The fetch function and the change notifier are supplied by the host
//! through the [`Fetcher`] and [`ChangeNotifier`] traits.

pub mod access;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod notify;
pub mod rate;
pub mod scheduler;
pub mod timer;

// ── Primary re-exports ──────────────────────────────────────────────
pub use access::{PathSegment, lookup, safe_get};
pub use cache::{CacheStats, TtlCache};
pub use clock::{Clock, ManualClock, TokioClock};
pub use config::StreamConfig;
pub use error::{CoreError, FetchError, NotifierError};
pub use notify::{
    BroadcastNotifier, ChangeNotifier, Fetcher, FnNotifier, StreamContext, StreamUpdate,
    notifier_fn,
};
pub use rate::{Activation, RateMode, Reversion};
pub use scheduler::{DEFAULT_SHUTDOWN_GRACE, PollScheduler, StreamStats, TickOutcome};
pub use timer::{PerformanceTimer, TimingReport};
