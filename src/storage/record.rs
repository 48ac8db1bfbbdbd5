//! Expiry Records and Queue Entries
//!
//! An [`ExpiryRecord`] is the authoritative per-key timer state. A
//! [`QueueEntry`] is what lives in the ordering structure; it may go stale
//! when its key is rescheduled or unregistered, in which case the record
//! lookup at dequeue time decides what happens to it.

use crate::error::CallbackError;
use std::cmp::Ordering;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// The outcome of a single callback invocation.
pub type CallbackResult = Result<(), CallbackError>;

/// A boxed callback future, as spawned by the expiry driver.
pub type CallbackFuture = Pin<Box<dyn Future<Output = CallbackResult> + Send + 'static>>;

/// A zero-argument action invoked when a key's expiry elapses.
///
/// Cloning a `Callback` is cheap and shares the same closure. The closure is
/// immutable, so a cloned record never aliases mutable driver state.
///
/// # Example
///
/// ```
/// use tickermap::Callback;
///
/// // Asynchronous work
/// let flush = Callback::new(|| async {
///     tokio::task::yield_now().await;
///     Ok(())
/// });
///
/// // Plain synchronous closure
/// let log = Callback::from_fn(|| {
///     println!("expired");
///     Ok(())
/// });
/// # let _ = (flush, log);
/// ```
#[derive(Clone)]
pub struct Callback {
    inner: Arc<dyn Fn() -> CallbackFuture + Send + Sync>,
}

impl Callback {
    /// Creates a callback from a closure returning a future.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        Self {
            inner: Arc::new(move || Box::pin(f()) as CallbackFuture),
        }
    }

    /// Creates a callback from a synchronous closure.
    ///
    /// The closure body runs inside the callback task, not on the caller of
    /// [`invoke`](Self::invoke).
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> CallbackResult + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::new(move || {
            let f = Arc::clone(&f);
            async move { f() }
        })
    }

    /// A callback that does nothing.
    pub fn noop() -> Self {
        Self::from_fn(|| Ok(()))
    }

    /// Produces the future for one invocation.
    pub fn invoke(&self) -> CallbackFuture {
        (self.inner)()
    }

    /// Returns `true` if both handles share the same closure.
    pub fn ptr_eq(&self, other: &Callback) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback").finish_non_exhaustive()
    }
}

/// Per-key timer state.
#[derive(Debug, Clone)]
pub struct ExpiryRecord {
    /// Milliseconds from registration to expiry. Zero or negative when the
    /// timer was registered for a timestamp already in the past.
    pub ttl_ms: i64,
    /// When the callback becomes due (authoritative)
    pub expires_at: Instant,
    /// What to run once due
    pub callback: Callback,
}

impl ExpiryRecord {
    /// Creates a record for `expires_at`, deriving the TTL relative to `now`.
    pub fn new(expires_at: Instant, now: Instant, callback: Callback) -> Self {
        Self {
            ttl_ms: signed_millis(now, expires_at),
            expires_at,
            callback,
        }
    }

    /// Checks if this record is due at `now`.
    #[inline]
    pub fn is_due(&self, now: Instant) -> bool {
        self.expires_at <= now
    }

    /// Time left until the record is due, zero once it is.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}

/// Signed milliseconds from `from` to `to`, saturating at the `i64` range.
fn signed_millis(from: Instant, to: Instant) -> i64 {
    if to >= from {
        i64::try_from((to - from).as_millis()).unwrap_or(i64::MAX)
    } else {
        i64::try_from((from - to).as_millis())
            .map(|ms| -ms)
            .unwrap_or(i64::MIN)
    }
}

/// A (key, priority) pair in the ordering structure.
///
/// Ordering only considers the priority and the insertion sequence, so the
/// key type needs no `Ord`. Equal priorities pop in insertion order.
#[derive(Debug, Clone)]
pub struct QueueEntry<K> {
    /// The key this entry schedules
    pub key: K,
    /// Expiry timestamp at the time the entry was pushed
    pub priority: Instant,
    /// Insertion sequence, used as the tie-break
    pub seq: u64,
}

impl<K> PartialEq for QueueEntry<K> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<K> Eq for QueueEntry<K> {}

impl<K> PartialOrd for QueueEntry<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> Ord for QueueEntry<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}
