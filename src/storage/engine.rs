//! Key-Value Map with Expiry Callbacks
//!
//! [`TickerMap`] is an associative container that owns its values plus a
//! [`TimerIndex`] and the [`ExpiryDriver`] draining it.
//!
//! ## Design Decisions
//!
//! 1. **Composition**: the map wraps a `HashMap` instead of extending one.
//!    Value operations are plain pass-throughs.
//! 2. **Deletion purges timers**: `remove`, `delete` and `clear` also drop the
//!    key's expiry record so a removed key never fires.
//! 3. **Timers are independent of values**: a timer can be set for a key that
//!    holds no value, and inserting a value never touches its timer.
//! 4. **Callbacks decide what expiry means**: nothing is removed
//!    automatically; a callback that wants the key gone deletes it.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     TickerMap                        │
//! │  ┌──────────────────┐    ┌────────────────────────┐  │
//! │  │ RwLock<HashMap>  │    │ TimerIndex             │  │
//! │  │ key -> value     │    │ key -> ExpiryRecord    │  │
//! │  └──────────────────┘    │ min-heap of QueueEntry │  │
//! │                          └───────────▲────────────┘  │
//! │                                      │ tick          │
//! │                          ┌───────────┴────────────┐  │
//! │                          │ ExpiryDriver (task)    │  │
//! │                          └────────────────────────┘  │
//! └──────────────────────────────────────────────────────┘
//! ```

use crate::error::ConfigError;
use crate::storage::expiry::{ExpiryConfig, ExpiryDriver, ExpiryStats, TickSummary};
use crate::storage::index::TimerIndex;
use crate::storage::record::{Callback, ExpiryRecord};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::Instant;

/// A key-value map whose keys can carry an expiry callback.
///
/// # Thread Safety
///
/// All operations take `&self`; the map can be wrapped in an `Arc` and shared
/// with callbacks and other tasks.
///
/// # Example
///
/// ```
/// use tickermap::{Callback, TickerMap};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let map = TickerMap::new();
///
/// map.insert("name", "alice");
/// assert_eq!(map.get("name"), Some("alice"));
///
/// map.set_timer_in("name", Duration::from_secs(60), Callback::noop());
/// assert!(map.get_timeout("name").is_some());
///
/// // Deleting the key also cancels its timer
/// assert!(map.delete("name"));
/// assert!(map.get_timeout("name").is_none());
/// # }
/// ```
pub struct TickerMap<K, V> {
    data: RwLock<HashMap<K, V>>,
    timers: Arc<TimerIndex<K>>,
    driver: ExpiryDriver<K>,

    /// Statistics: total get operations
    get_count: AtomicU64,

    /// Statistics: total insert operations
    set_count: AtomicU64,

    /// Statistics: total delete/remove operations
    del_count: AtomicU64,
}

impl<K, V> Debug for TickerMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickerMap")
            .field("driver", &self.driver)
            .field("get_count", &self.get_count.load(Ordering::Relaxed))
            .field("set_count", &self.set_count.load(Ordering::Relaxed))
            .field("del_count", &self.del_count.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<K, V> Default for TickerMap<K, V>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> TickerMap<K, V>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
{
    /// Creates an empty map polling for expiries once per second.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn new() -> Self {
        Self::from_driver_config(ExpiryConfig::default())
    }

    /// Creates an empty map with a custom driver configuration.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn with_config(config: ExpiryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_driver_config(config))
    }

    fn from_driver_config(config: ExpiryConfig) -> Self {
        let timers = Arc::new(TimerIndex::new());
        let driver = ExpiryDriver::spawn(Arc::clone(&timers), config);

        Self {
            data: RwLock::new(HashMap::new()),
            timers,
            driver,
            get_count: AtomicU64::new(0),
            set_count: AtomicU64::new(0),
            del_count: AtomicU64::new(0),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<K, V>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<K, V>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // Value operations
    // ========================================================================

    /// Inserts a value, returning the previous one.
    ///
    /// The key's timer, if any, is left untouched.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.set_count.fetch_add(1, Ordering::Relaxed);
        self.write().insert(key, value)
    }

    /// Gets a clone of the value for a key.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.get_count.fetch_add(1, Ordering::Relaxed);
        self.read().get(key).cloned()
    }

    /// Runs `f` against the value for a key without cloning it.
    pub fn get_with<Q, R>(&self, key: &Q, f: impl FnOnce(&V) -> R) -> Option<R>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get_count.fetch_add(1, Ordering::Relaxed);
        self.read().get(key).map(f)
    }

    /// Checks if a key holds a value.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.read().contains_key(key)
    }

    /// Removes a key, returning its value. Also cancels the key's timer.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.del_count.fetch_add(1, Ordering::Relaxed);
        self.timers.unregister(key);
        self.write().remove(key)
    }

    /// Deletes a key. Also cancels the key's timer.
    ///
    /// # Returns
    ///
    /// Returns `true` if the key held a value.
    pub fn delete<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.remove(key).is_some()
    }

    /// Number of keys holding a value.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns `true` if no key holds a value.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Returns every key holding a value, in arbitrary order.
    pub fn keys(&self) -> Vec<K> {
        self.read().keys().cloned().collect()
    }

    /// Returns a copy of every key-value pair, in arbitrary order.
    pub fn entries(&self) -> Vec<(K, V)>
    where
        V: Clone,
    {
        self.read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Removes every value and every timer.
    pub fn clear(&self) {
        self.write().clear();
        self.timers.clear();
    }

    // ========================================================================
    // Timer operations
    // ========================================================================

    /// Sets the expiry timestamp and callback for a key.
    ///
    /// Replaces any previous timer for the key. A timestamp in the past fires
    /// on the next tick.
    pub fn set_timer(&self, key: K, expires_at: Instant, callback: Callback) {
        self.timers.register(key, expires_at, callback);
    }

    /// Sets a timer that expires `delay` from now.
    pub fn set_timer_in(&self, key: K, delay: Duration, callback: Callback) {
        self.timers.register_in(key, delay, callback);
    }

    /// Cancels a key's timer without touching its value.
    ///
    /// # Returns
    ///
    /// Returns `true` if a timer existed.
    pub fn clear_timer<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.timers.unregister(key)
    }

    /// Returns a copy of the key's expiry record.
    pub fn get_timeout<Q>(&self, key: &Q) -> Option<ExpiryRecord>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.timers.lookup(key)
    }

    /// Returns an independent copy of every expiry record.
    pub fn get_timeouts(&self) -> HashMap<K, ExpiryRecord> {
        self.timers.snapshot()
    }

    /// Runs one expiry tick right away.
    pub async fn tick(&self) -> TickSummary {
        self.driver.tick().await
    }

    /// Stops the background driver. Idempotent.
    ///
    /// Values and timers stay in place; [`tick`](Self::tick) still works.
    pub fn stop(&self) {
        self.driver.stop();
    }

    /// Returns `true` once the driver has been stopped.
    pub fn is_stopped(&self) -> bool {
        self.driver.is_stopped()
    }

    /// The timer index backing this map.
    pub fn timers(&self) -> &Arc<TimerIndex<K>> {
        &self.timers
    }

    /// Returns map and driver statistics.
    pub fn stats(&self) -> MapStats {
        MapStats {
            keys: self.len(),
            timers: self.timers.len(),
            queued: self.timers.queue_len(),
            get_ops: self.get_count.load(Ordering::Relaxed),
            set_ops: self.set_count.load(Ordering::Relaxed),
            del_ops: self.del_count.load(Ordering::Relaxed),
            expiry: self.driver.stats(),
        }
    }
}

/// Map statistics.
#[derive(Debug, Clone, Copy)]
pub struct MapStats {
    pub keys: usize,
    pub timers: usize,
    /// Entries in the ordering structure, stale ones included
    pub queued: usize,
    pub get_ops: u64,
    pub set_ops: u64,
    pub del_ops: u64,
    pub expiry: ExpiryStats,
}
