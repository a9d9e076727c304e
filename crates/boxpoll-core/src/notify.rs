// ── Collaborator seams ──
//
// The scheduler talks to the outside world through exactly two traits:
// `Fetcher` pulls a fresh value for a stream, `ChangeNotifier` pushes a
// fresh-or-cached value to dependents.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use tokio::sync::broadcast;

use crate::error::{FetchError, NotifierError};
use crate::rate::RateMode;

/// What a fetcher is told about the tick it serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamContext {
    pub stream: Arc<str>,
    pub mode: RateMode,
    /// True when the tick bypassed the cache (fast-mode exit, manual refresh).
    pub forced: bool,
}

/// Pulls a fresh value for one stream. At most one call per stream is
/// in flight at a time.
pub trait Fetcher<V>: Send + Sync + 'static {
    fn fetch(&self, ctx: StreamContext) -> BoxFuture<'static, Result<V, FetchError>>;
}

impl<V, F, Fut> Fetcher<V> for F
where
    F: Fn(StreamContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
{
    fn fetch(&self, ctx: StreamContext) -> BoxFuture<'static, Result<V, FetchError>> {
        Box::pin(self(ctx))
    }
}

/// Receives every value a tick produced. Runs on the scheduling path,
/// so implementations must return quickly.
pub trait ChangeNotifier<V>: Send + Sync + 'static {
    fn notify(&self, stream: &str, value: &Arc<V>, cache_hit: bool) -> Result<(), NotifierError>;
}

impl<V, N: ChangeNotifier<V> + ?Sized> ChangeNotifier<V> for Arc<N> {
    fn notify(&self, stream: &str, value: &Arc<V>, cache_hit: bool) -> Result<(), NotifierError> {
        (**self).notify(stream, value, cache_hit)
    }
}

/// A notifier backed by a closure. Build one with [`notifier_fn`].
pub struct FnNotifier<F>(F);

/// Wrap a closure as a [`ChangeNotifier`].
pub fn notifier_fn<V, F>(f: F) -> FnNotifier<F>
where
    F: Fn(&str, &Arc<V>, bool) -> Result<(), NotifierError> + Send + Sync + 'static,
{
    FnNotifier(f)
}

impl<V, F> ChangeNotifier<V> for FnNotifier<F>
where
    F: Fn(&str, &Arc<V>, bool) -> Result<(), NotifierError> + Send + Sync + 'static,
{
    fn notify(&self, stream: &str, value: &Arc<V>, cache_hit: bool) -> Result<(), NotifierError> {
        (self.0)(stream, value, cache_hit)
    }
}

/// One notification, as delivered by [`BroadcastNotifier`].
#[derive(Debug)]
pub struct StreamUpdate<V> {
    pub stream: Arc<str>,
    pub value: Arc<V>,
    pub cache_hit: bool,
    pub at: DateTime<Utc>,
}

impl<V> Clone for StreamUpdate<V> {
    fn clone(&self) -> Self {
        Self {
            stream: Arc::clone(&self.stream),
            value: Arc::clone(&self.value),
            cache_hit: self.cache_hit,
            at: self.at,
        }
    }
}

/// Fans updates out to any number of subscribers.
///
/// Sending with no subscribers is not an error; lagging subscribers
/// lose the oldest updates.
pub struct BroadcastNotifier<V> {
    tx: broadcast::Sender<StreamUpdate<V>>,
}

impl<V: Send + Sync + 'static> BroadcastNotifier<V> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamUpdate<V>> {
        self.tx.subscribe()
    }
}

impl<V: Send + Sync + 'static> ChangeNotifier<V> for BroadcastNotifier<V> {
    fn notify(&self, stream: &str, value: &Arc<V>, cache_hit: bool) -> Result<(), NotifierError> {
        let _ = self.tx.send(StreamUpdate {
            stream: Arc::from(stream),
            value: Arc::clone(value),
            cache_hit,
            at: Utc::now(),
        });
        Ok(())
    }
}
