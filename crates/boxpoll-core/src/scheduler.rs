// ── Adaptive poll scheduler ──
//
// One task per stream. Each task sleeps until its next tick, runs the
// tick (cache read, fetch on miss, notify), then picks the next period
// from the stream's rate mode. Activation wakes the task so a slower
// pending tick is pulled forward to the fast period.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::cache::{CacheStats, TtlCache};
use crate::clock::{Clock, default_clock};
use crate::config::StreamConfig;
use crate::error::{CoreError, FetchError};
use crate::notify::{ChangeNotifier, Fetcher, StreamContext};
use crate::rate::{Activation, RateMode, RateState, Reversion};
use crate::timer::PerformanceTimer;

/// Grace period hosts pass to [`PollScheduler::shutdown`] unless configured otherwise.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ── TickOutcome ──────────────────────────────────────────────────

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Served from cache; dependents notified with `cache_hit = true`.
    Hit,
    /// Fetched, cached, dependents notified with `cache_hit = false`.
    Fetched,
    /// The fetch failed; cache untouched, dependents not notified.
    Failed(FetchError),
    /// A previous tick for the same stream was still running.
    Skipped,
}

// ── StreamStats ──────────────────────────────────────────────────

/// Point-in-time diagnostics for one stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamStats {
    pub id: String,
    pub mode: RateMode,
    /// Time left in fast mode, if active.
    pub fast_remaining: Option<Duration>,
    pub fetches: u64,
    pub fetch_errors: u64,
    pub consecutive_failures: u32,
    pub skipped_ticks: u64,
    pub cache: CacheStats,
    pub mean_fetch_time: Option<Duration>,
    pub last_update: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct Counters {
    fetches: u64,
    fetch_errors: u64,
    consecutive_failures: u32,
    skipped_ticks: u64,
    total_fetch_time: Duration,
    last_update: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

// ── PollStream ───────────────────────────────────────────────────

struct PollStream<V> {
    id: Arc<str>,
    config: StreamConfig,
    cache: TtlCache<V>,
    fetcher: Box<dyn Fetcher<V>>,
    rate: Mutex<RateState>,
    wake: Notify,
    in_flight: AtomicBool,
    spawned: AtomicBool,
    counters: Mutex<Counters>,
}

impl<V> PollStream<V> {
    fn rate(&self) -> MutexGuard<'_, RateState> {
        self.rate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn counters(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_period(&self) -> Duration {
        self.rate().period(&self.config)
    }
}

/// Clears the in-flight flag however the tick ends, including when the
/// tick future is dropped mid-fetch.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ── PollScheduler ────────────────────────────────────────────────

/// Owns every poll stream, its cache and its timer.
///
/// Cheaply cloneable via `Arc<SchedulerInner>`. Streams are registered
/// with [`add_stream`](Self::add_stream), start ticking on
/// [`start`](Self::start), and stop on [`shutdown`](Self::shutdown).
pub struct PollScheduler<V> {
    inner: Arc<SchedulerInner<V>>,
}

impl<V> Clone for PollScheduler<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct SchedulerInner<V> {
    streams: DashMap<String, Arc<PollStream<V>>>,
    notifier: Box<dyn ChangeNotifier<V>>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl<V> PollScheduler<V>
where
    V: PartialEq + Send + Sync + 'static,
{
    pub fn new(notifier: impl ChangeNotifier<V>) -> Self {
        Self::with_clock(notifier, default_clock())
    }

    /// Build a scheduler reading time from `clock`.
    ///
    /// Background tasks always sleep on tokio's timer; a non-tokio clock
    /// is only meaningful when ticks are driven by hand via
    /// [`refresh`](Self::refresh) or [`tick`](Self::tick).
    pub fn with_clock(notifier: impl ChangeNotifier<V>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                streams: DashMap::new(),
                notifier: Box::new(notifier),
                clock,
                cancel: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
                started: AtomicBool::new(false),
            }),
        }
    }

    // ── Stream registration ──────────────────────────────────────

    /// Validate `config` and register a stream fetched by `fetcher`.
    ///
    /// Out-of-range timings fail here with [`CoreError::Config`]; the
    /// stream is not created and no timer starts. If the scheduler is
    /// already running, the stream's task is spawned immediately.
    pub fn add_stream(
        &self,
        config: StreamConfig,
        fetcher: impl Fetcher<V>,
    ) -> Result<(), CoreError> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::ShutDown);
        }
        config.validate()?;

        let id = config.id.clone();
        let stream = Arc::new(PollStream {
            id: Arc::from(id.as_str()),
            cache: TtlCache::with_clock(Arc::clone(&self.inner.clock)),
            fetcher: Box::new(fetcher),
            rate: Mutex::new(RateState::default()),
            wake: Notify::new(),
            in_flight: AtomicBool::new(false),
            spawned: AtomicBool::new(false),
            counters: Mutex::new(Counters::default()),
            config,
        });

        match self.inner.streams.entry(id.clone()) {
            Entry::Occupied(_) => return Err(CoreError::DuplicateStream { id }),
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&stream));
            }
        }
        debug!(stream = %id, "stream registered");

        if self.inner.started.load(Ordering::Acquire) {
            self.spawn_stream(stream);
        }
        Ok(())
    }

    pub fn stream_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.streams.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Spawn one polling task per registered stream. The first tick of
    /// each stream runs immediately. Calling `start` twice is a no-op.
    pub fn start(&self) -> Result<(), CoreError> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::ShutDown);
        }
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let streams: Vec<Arc<PollStream<V>>> = self
            .inner
            .streams
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        for stream in streams {
            self.spawn_stream(stream);
        }
        info!(streams = self.inner.streams.len(), "poll scheduler started");
        Ok(())
    }

    fn spawn_stream(&self, stream: Arc<PollStream<V>>) {
        if stream.spawned.swap(true, Ordering::AcqRel) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let cancel = self.inner.cancel.child_token();
        let handle = tokio::spawn(stream_task(inner, stream, cancel));
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Cancel every stream timer and wait up to `grace` for in-flight
    /// fetches. Tasks still running after `grace` are aborted.
    pub async fn shutdown(&self, grace: Duration) {
        self.inner.cancel.cancel();
        let mut handles: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self
                .inner
                .tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        let joined = tokio::time::timeout(grace, join_all(handles.iter_mut())).await;
        if joined.is_err() {
            warn!(
                grace_ms = grace.as_millis(),
                "stream tasks still busy after grace period, aborting"
            );
            for handle in &handles {
                handle.abort();
            }
        }
        debug!("poll scheduler shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    // ── Rate mode control ────────────────────────────────────────

    /// Switch `id` to fast polling for `duration` (or the stream's
    /// configured window), clamped to the fast-window bounds.
    ///
    /// Activating an already-fast stream moves its deadline to the later
    /// of the current and requested deadlines; it never adds a timer.
    pub fn activate(&self, id: &str, duration: Option<Duration>) -> Result<Activation, CoreError> {
        let stream = self.stream(id)?;
        let window = StreamConfig::clamp_fast_window(duration.unwrap_or(stream.config.fast_window));
        let now = self.inner.clock.now();
        let activation = stream.rate().activate(now, window);

        match activation {
            Activation::Entered { .. } => {
                if stream.config.refetch_on_activate {
                    stream.cache.invalidate();
                }
                info!(
                    stream = %stream.id,
                    window_secs = window.as_secs(),
                    period_secs = stream.config.fast_period.as_secs(),
                    "fast polling activated"
                );
                stream.wake.notify_one();
            }
            Activation::Extended { deadline } => {
                debug!(
                    stream = %stream.id,
                    remaining_secs = deadline.saturating_duration_since(now).as_secs(),
                    "fast polling extended"
                );
            }
        }
        Ok(activation)
    }

    /// Return `id` to normal polling now. `Ok(false)` if it was not fast.
    pub fn deactivate(&self, id: &str) -> Result<bool, CoreError> {
        let stream = self.stream(id)?;
        let reverted = stream.rate().revert();
        if reverted {
            info!(stream = %stream.id, reason = %Reversion::Manual, "fast polling ended");
            stream.wake.notify_one();
        }
        Ok(reverted)
    }

    pub fn mode(&self, id: &str) -> Result<RateMode, CoreError> {
        Ok(self.stream(id)?.rate().mode())
    }

    /// The period the stream's next tick will be scheduled with.
    pub fn current_period(&self, id: &str) -> Result<Duration, CoreError> {
        Ok(self.stream(id)?.current_period())
    }

    // ── Reads ────────────────────────────────────────────────────

    /// The stream's cached value if still within its TTL.
    pub fn cached(&self, id: &str) -> Result<Option<Arc<V>>, CoreError> {
        Ok(self.stream(id)?.cache.get())
    }

    /// The most recent successfully fetched value, however old.
    pub fn last_known(&self, id: &str) -> Result<Option<Arc<V>>, CoreError> {
        Ok(self.stream(id)?.cache.last_known())
    }

    /// Drop the stream's cached value so the next tick fetches.
    pub fn invalidate(&self, id: &str) -> Result<(), CoreError> {
        self.stream(id)?.cache.invalidate();
        Ok(())
    }

    pub fn stats(&self, id: &str) -> Result<StreamStats, CoreError> {
        let stream = self.stream(id)?;
        Ok(self.snapshot_stats(&stream))
    }

    pub fn stats_all(&self) -> Vec<StreamStats> {
        self.stream_ids()
            .iter()
            .filter_map(|id| self.stats(id).ok())
            .collect()
    }

    // ── Ticks ────────────────────────────────────────────────────

    /// Run one regular tick of `id` now.
    pub async fn tick(&self, id: &str) -> Result<TickOutcome, CoreError> {
        let stream = self.stream(id)?;
        Ok(run_tick(&self.inner, &stream, false).await)
    }

    /// Run one tick of `id` now, bypassing the cache.
    pub async fn refresh(&self, id: &str) -> Result<TickOutcome, CoreError> {
        let stream = self.stream(id)?;
        Ok(run_tick(&self.inner, &stream, true).await)
    }

    // ── Private helpers ──────────────────────────────────────────

    fn stream(&self, id: &str) -> Result<Arc<PollStream<V>>, CoreError> {
        self.inner
            .streams
            .get(id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| CoreError::unknown_stream(id))
    }

    fn snapshot_stats(&self, stream: &PollStream<V>) -> StreamStats {
        let now = self.inner.clock.now();
        let (mode, deadline) = {
            let rate = stream.rate();
            (rate.mode(), rate.fast_deadline())
        };
        let counters = stream.counters();
        let mean_fetch_time = u32::try_from(counters.fetches)
            .ok()
            .filter(|n| *n > 0)
            .map(|n| counters.total_fetch_time / n);

        StreamStats {
            id: stream.id.to_string(),
            mode,
            fast_remaining: deadline.map(|d| d.saturating_duration_since(now)),
            fetches: counters.fetches,
            fetch_errors: counters.fetch_errors,
            consecutive_failures: counters.consecutive_failures,
            skipped_ticks: counters.skipped_ticks,
            cache: stream.cache.stats(),
            mean_fetch_time,
            last_update: counters.last_update,
            last_error: counters.last_error.clone(),
        }
    }
}

// ── Tick ─────────────────────────────────────────────────────────

/// One tick: read the cache, fetch on miss, notify, then apply any
/// Fast -> Normal transition that this tick has earned.
///
/// A tick that reaches the fast deadline always fetches, so dependents
/// see fresh state at the moment polling slows down.
async fn run_tick<V>(inner: &SchedulerInner<V>, stream: &PollStream<V>, force: bool) -> TickOutcome
where
    V: PartialEq + Send + Sync + 'static,
{
    let Some(_guard) = InFlightGuard::acquire(&stream.in_flight) else {
        stream.counters().skipped_ticks += 1;
        debug!(stream = %stream.id, "previous tick still in flight, skipping");
        return TickOutcome::Skipped;
    };

    let started = inner.clock.now();
    let (mode, reverting) = {
        let rate = stream.rate();
        (rate.mode(), rate.deadline_reached(started))
    };
    let force = force || reverting;

    let cached = if force { None } else { stream.cache.get() };
    let outcome = if let Some(value) = cached {
        trace!(stream = %stream.id, "cache hit");
        notify(inner, stream, &value, true);
        TickOutcome::Hit
    } else {
        let ctx = StreamContext {
            stream: Arc::clone(&stream.id),
            mode,
            forced: force,
        };
        match fetch(inner, stream, ctx).await {
            Ok(value) => {
                let value = Arc::new(value);
                let changed = stream
                    .cache
                    .last_known()
                    .is_none_or(|previous| *previous != *value);
                stream.cache.set_arc(Arc::clone(&value), stream.config.ttl);
                stream.rate().observe_fetch(inner.clock.now(), changed);
                notify(inner, stream, &value, false);
                TickOutcome::Fetched
            }
            Err(err) => TickOutcome::Failed(err),
        }
    };

    let reversion = stream.rate().after_tick(
        started,
        outcome == TickOutcome::Fetched,
        stream.config.settle_after,
    );
    if let Some(reason) = reversion {
        info!(stream = %stream.id, reason = %reason, "fast polling ended");
    }

    outcome
}

async fn fetch<V>(
    inner: &SchedulerInner<V>,
    stream: &PollStream<V>,
    ctx: StreamContext,
) -> Result<V, FetchError>
where
    V: Send + Sync + 'static,
{
    let mut timer = PerformanceTimer::start_with_clock(
        format!("{}.fetch", stream.id),
        stream.config.warn_threshold,
        Arc::clone(&inner.clock),
    );

    let pending = stream.fetcher.fetch(ctx);
    let result = match stream.config.fetch_timeout {
        Some(timeout) => tokio::time::timeout(timeout, pending)
            .await
            .unwrap_or(Err(FetchError::Timeout { timeout })),
        None => pending.await,
    };
    timer.checkpoint(if result.is_ok() { "fetched" } else { "failed" });
    let report = timer.stop();

    let mut counters = stream.counters();
    counters.fetches += 1;
    counters.total_fetch_time += report.total;
    match &result {
        Ok(_) => {
            counters.consecutive_failures = 0;
            counters.last_update = Some(Utc::now());
            counters.last_error = None;
        }
        Err(err) => {
            counters.fetch_errors += 1;
            counters.consecutive_failures = counters.consecutive_failures.saturating_add(1);
            counters.last_error = Some(err.to_string());
            warn!(
                stream = %stream.id,
                error = %err,
                consecutive = counters.consecutive_failures,
                "fetch failed, keeping last known value"
            );
            let every = stream.config.failure_warn_after;
            if every > 0 && counters.consecutive_failures % every == 0 {
                warn!(
                    stream = %stream.id,
                    consecutive = counters.consecutive_failures,
                    last_update = ?counters.last_update,
                    "stream keeps failing to fetch"
                );
            }
        }
    }
    result
}

fn notify<V>(inner: &SchedulerInner<V>, stream: &PollStream<V>, value: &Arc<V>, cache_hit: bool)
where
    V: Send + Sync + 'static,
{
    if let Err(err) = inner.notifier.notify(&stream.id, value, cache_hit) {
        warn!(stream = %stream.id, error = %err, "change notifier failed");
    }
}

// ── Stream task ──────────────────────────────────────────────────

async fn stream_task<V>(
    inner: Arc<SchedulerInner<V>>,
    stream: Arc<PollStream<V>>,
    cancel: CancellationToken,
) where
    V: PartialEq + Send + Sync + 'static,
{
    debug!(stream = %stream.id, "stream task started");
    let mut next = Instant::now();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = stream.wake.notified() => {
                // Mode changed: a fast period may call for an earlier tick.
                let candidate = Instant::now() + stream.current_period();
                if candidate < next {
                    trace!(stream = %stream.id, "tick rescheduled earlier");
                    next = candidate;
                }
                continue;
            }
            () = tokio::time::sleep_until(next) => {}
        }

        let outcome = run_tick(&inner, &stream, false).await;
        trace!(stream = %stream.id, outcome = ?outcome, "tick finished");

        // Ticks are spaced from their scheduled time. Ticks whose slot
        // passed while this one was running are skipped, not queued; a
        // slot landing exactly as the fetch finishes still runs.
        let period = stream.current_period();
        next += period;
        let now = Instant::now();
        if next < now {
            let behind = now.saturating_duration_since(next);
            let missed = behind.as_nanos() / period.as_nanos().max(1) + 1;
            stream.counters().skipped_ticks += u64::try_from(missed).unwrap_or(u64::MAX);
            debug!(stream = %stream.id, missed = %missed, "tick overran its period");
            next = now + period;
        }
    }
    debug!(stream = %stream.id, "stream task stopped");
}
