//! Background Expiry Driver
//!
//! This module implements the task that periodically drains due timers from
//! a [`TimerIndex`] and runs their callbacks.
//!
//! ## Tick Algorithm
//!
//! A tick reads the clock and the index's sequence counter once, then pops
//! entries from the ordering structure, earliest first:
//!
//! 1. Empty heap, or an entry pushed after the tick began: the tick is over.
//!    Registrations made by callbacks wait for the next tick.
//! 2. No live record for the key: a stale entry, dropped without firing.
//! 3. Entry priority older than the record's timestamp: the key is moved to
//!    its timestamp and the tick continues, so it fires in its corrected
//!    position (possibly later in this same tick).
//! 4. Record not due yet: the key is re-enqueued and the tick ends.
//! 5. Record due: the callback runs in its own task, the tick awaits it, and
//!    the record is cleared afterwards.
//!
//! A failing, panicking or slow callback is logged and never aborts the tick.
//! If the tick itself is dropped mid-callback, the fired record is still
//! cleared.
//!
//! ## Shutdown
//!
//! [`ExpiryDriver::stop`] (or dropping the driver) prevents new ticks from
//! starting. Callbacks that are already running are neither cancelled nor
//! awaited.

use crate::error::{CallbackError, ConfigError};
use crate::storage::index::{Dequeued, DueTimer, TimerIndex};
use std::any::Any;
use std::fmt::{self, Debug};
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// Default period between ticks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(crate::DEFAULT_POLL_INTERVAL_MS);

/// Default number of stale heap entries that triggers a compaction.
pub const DEFAULT_COMPACTION_THRESHOLD: usize = 1024;

/// Configuration for the expiry driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiryConfig {
    /// Interval between ticks (default: 1s)
    pub poll_interval: Duration,

    /// Upper bound on how long a tick waits for one callback (default: none).
    /// A callback that exceeds it keeps running detached.
    pub callback_timeout: Option<Duration>,

    /// Compact the index once this many stale entries accumulate
    /// (default: 1024, `None` disables compaction)
    pub compaction_threshold: Option<usize>,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            callback_timeout: None,
            compaction_threshold: Some(DEFAULT_COMPACTION_THRESHOLD),
        }
    }
}

impl ExpiryConfig {
    /// Default configuration with the poll interval given in milliseconds.
    pub fn from_poll_interval_ms(poll_interval_ms: u64) -> Self {
        Self::default().with_poll_interval(Duration::from_millis(poll_interval_ms))
    }

    /// Sets the interval between ticks.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Bounds how long a tick waits for a single callback.
    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = Some(timeout);
        self
    }

    /// Sets (or disables, with `None`) the compaction threshold.
    pub fn with_compaction_threshold(mut self, threshold: Option<usize>) -> Self {
        self.compaction_threshold = threshold;
        self
    }

    /// Checks the configuration for values the driver cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.callback_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::ZeroCallbackTimeout);
        }
        if self.compaction_threshold == Some(0) {
            return Err(ConfigError::ZeroCompactionThreshold);
        }
        Ok(())
    }
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Callbacks that completed successfully
    pub fired: u64,
    /// Callbacks that returned an error, panicked or were cancelled
    pub failed: u64,
    /// Callbacks abandoned after the configured timeout
    pub timed_out: u64,
    /// Entries dropped because their key had no live record
    pub stale: u64,
    /// Entries re-enqueued at a corrected, later priority
    pub rescheduled: u64,
    /// Entries removed by compaction at the end of the tick
    pub compacted: u64,
}

impl TickSummary {
    /// Number of callbacks invoked, whatever their outcome.
    pub fn invoked(&self) -> u64 {
        self.fired + self.failed + self.timed_out
    }
}

/// Cumulative driver statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpiryStats {
    pub ticks: u64,
    pub fired: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub stale: u64,
    pub rescheduled: u64,
    pub compacted: u64,
}

#[derive(Debug, Default)]
struct Counters {
    ticks: AtomicU64,
    fired: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    stale: AtomicU64,
    rescheduled: AtomicU64,
    compacted: AtomicU64,
}

impl Counters {
    fn record(&self, summary: &TickSummary) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.fired.fetch_add(summary.fired, Ordering::Relaxed);
        self.failed.fetch_add(summary.failed, Ordering::Relaxed);
        self.timed_out.fetch_add(summary.timed_out, Ordering::Relaxed);
        self.stale.fetch_add(summary.stale, Ordering::Relaxed);
        self.rescheduled
            .fetch_add(summary.rescheduled, Ordering::Relaxed);
        self.compacted.fetch_add(summary.compacted, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ExpiryStats {
        ExpiryStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            fired: self.fired.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            rescheduled: self.rescheduled.load(Ordering::Relaxed),
            compacted: self.compacted.load(Ordering::Relaxed),
        }
    }
}

/// State shared between the driver handle and its background task.
struct Shared<K> {
    index: Arc<TimerIndex<K>>,
    config: ExpiryConfig,
    counters: Counters,
}

impl<K> Shared<K>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
{
    async fn tick(&self) -> TickSummary {
        let summary = run_tick(&self.index, &self.config).await;
        self.counters.record(&summary);

        if summary.invoked() > 0 || summary.compacted > 0 {
            debug!(
                fired = summary.fired,
                failed = summary.failed,
                timed_out = summary.timed_out,
                stale = summary.stale,
                compacted = summary.compacted,
                pending = self.index.len(),
                "Expiry tick completed"
            );
        } else {
            trace!(stale = summary.stale, "Expiry tick found nothing due");
        }

        summary
    }
}

/// A handle to the running expiry driver.
///
/// When this handle is dropped, the driver task will be stopped.
pub struct ExpiryDriver<K> {
    shared: Arc<Shared<K>>,
    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,
    stopped: AtomicBool,
}

impl<K> Debug for ExpiryDriver<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpiryDriver")
            .field("config", &self.shared.config)
            .field("stats", &self.shared.counters.snapshot())
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish()
    }
}

impl<K> ExpiryDriver<K>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
{
    /// Starts the expiry driver as a background task.
    ///
    /// # Arguments
    ///
    /// * `index` - The timer index to drain
    /// * `config` - Configuration for the driver
    ///
    /// # Returns
    ///
    /// Returns a handle that can be used to stop the driver, or the reason the
    /// configuration was rejected.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    ///
    /// # Example
    ///
    /// ```
    /// use tickermap::{ExpiryConfig, ExpiryDriver, TimerIndex};
    /// use std::sync::Arc;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let index: Arc<TimerIndex<String>> = Arc::new(TimerIndex::new());
    /// let driver = ExpiryDriver::start(Arc::clone(&index), ExpiryConfig::default()).unwrap();
    ///
    /// // Driver runs in the background...
    ///
    /// driver.stop();
    /// # }
    /// ```
    pub fn start(index: Arc<TimerIndex<K>>, config: ExpiryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::spawn(index, config))
    }

    /// Spawns the driver task without validating `config`.
    pub(crate) fn spawn(index: Arc<TimerIndex<K>>, config: ExpiryConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let poll_interval = config.poll_interval;

        let shared = Arc::new(Shared {
            index,
            config,
            counters: Counters::default(),
        });

        tokio::spawn(driver_loop(Arc::clone(&shared), shutdown_rx));

        info!(
            poll_interval_ms = millis(poll_interval),
            "Expiry driver started"
        );

        Self {
            shared,
            shutdown_tx,
            stopped: AtomicBool::new(false),
        }
    }

    /// Runs one tick right away, outside the periodic schedule.
    ///
    /// Waits for any tick already in progress on the same index.
    pub async fn tick(&self) -> TickSummary {
        self.shared.tick().await
    }

    /// Cumulative statistics since the driver started.
    pub fn stats(&self) -> ExpiryStats {
        self.shared.counters.snapshot()
    }

    /// The configuration the driver was started with.
    pub fn config(&self) -> &ExpiryConfig {
        &self.shared.config
    }
}

impl<K> ExpiryDriver<K> {
    /// Stops the expiry driver.
    ///
    /// Idempotent. This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        info!("Expiry driver stopped");
    }

    /// Returns `true` once [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl<K> Drop for ExpiryDriver<K> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The main driver loop.
async fn driver_loop<K>(shared: Arc<Shared<K>>, mut shutdown_rx: watch::Receiver<bool>)
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
{
    let period = shared.config.poll_interval;
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // Wait for the next tick or shutdown signal
        tokio::select! {
            biased;
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry driver received shutdown signal");
                    return;
                }
            }
            _ = ticker.tick() => {
                shared.tick().await;
            }
        }
    }
}

/// Drains every timer that was due when the tick started, firing callbacks in
/// timestamp order.
///
/// Ticks on the same index are serialized. Timers registered while the tick
/// runs are left for the next one.
pub async fn run_tick<K>(index: &TimerIndex<K>, config: &ExpiryConfig) -> TickSummary
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
{
    let _guard = index.tick_guard.lock().await;
    let mut summary = TickSummary::default();

    let now = Instant::now();
    let cutoff = index.seq_cutoff();

    loop {
        match index.dequeue(now, cutoff) {
            Dequeued::Exhausted | Dequeued::Deferred => break,
            Dequeued::Stale => {
                summary.stale += 1;
            }
            Dequeued::NotDue { rescheduled: true } => {
                summary.rescheduled += 1;
            }
            // Min-ordered: nothing behind this entry is due either
            Dequeued::NotDue { rescheduled: false } => break,
            Dequeued::Due(timer) => {
                let firing = Firing::new(index, &timer);
                match fire(&timer, config.callback_timeout).await {
                    Ok(()) => {
                        trace!(
                            key = ?firing.key,
                            late_ms = millis(timer.expires_at.elapsed()),
                            "Expiry callback fired"
                        );
                        summary.fired += 1;
                    }
                    Err(err @ CallbackError::TimedOut(_)) => {
                        warn!(key = ?firing.key, error = %err, "Expiry callback timed out");
                        summary.timed_out += 1;
                    }
                    Err(err) => {
                        error!(key = ?firing.key, error = %err, "Expiry callback failed");
                        summary.failed += 1;
                    }
                }
            }
        }
    }

    if let Some(threshold) = config.compaction_threshold {
        if index.stale_entries() >= threshold {
            summary.compacted = index.compact() as u64;
        }
    }

    summary
}

/// Clears a fired record when dropped, whether the callback finished or the
/// tick was cancelled while waiting for it.
struct Firing<'a, K>
where
    K: Hash + Eq + Clone,
{
    index: &'a TimerIndex<K>,
    key: K,
    generation: u64,
}

impl<'a, K> Firing<'a, K>
where
    K: Hash + Eq + Clone,
{
    fn new(index: &'a TimerIndex<K>, timer: &DueTimer<K>) -> Self {
        Self {
            index,
            key: timer.key.clone(),
            generation: timer.generation,
        }
    }
}

impl<K> Drop for Firing<'_, K>
where
    K: Hash + Eq + Clone,
{
    fn drop(&mut self) {
        self.index.complete(&self.key, self.generation);
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Runs one callback in its own task and waits for it.
async fn fire<K>(timer: &DueTimer<K>, timeout: Option<Duration>) -> Result<(), CallbackError> {
    let callback = timer.callback.clone();
    let handle = tokio::spawn(async move { callback.invoke().await });

    let joined = match timeout {
        Some(limit) => match time::timeout(limit, handle).await {
            Ok(joined) => joined,
            // Dropping the handle detaches the task; it is not cancelled
            Err(_) => return Err(CallbackError::TimedOut(limit)),
        },
        None => handle.await,
    };

    match joined {
        Ok(result) => result,
        Err(err) if err.is_panic() => Err(CallbackError::Panicked(panic_message(err.into_panic()))),
        Err(_) => Err(CallbackError::Cancelled),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::record::Callback;
    use std::sync::{Mutex, Weak};

    type Log = Arc<Mutex<Vec<&'static str>>>;

    fn recorder(log: &Log, name: &'static str) -> Callback {
        let log = Arc::clone(log);
        Callback::from_fn(move || {
            log.lock().unwrap().push(name);
            Ok(())
        })
    }

    fn fired(log: &Log) -> Vec<&'static str> {
        log.lock().unwrap().clone()
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_in_timestamp_order() {
        let index = TimerIndex::new();
        let log = Log::default();
        let now = Instant::now();

        // Registered out of order, all in the past
        index.register("t3", now - ms(100), recorder(&log, "t3"));
        index.register("t1", now - ms(300), recorder(&log, "t1"));
        index.register("t4", now - ms(50), recorder(&log, "t4"));
        index.register("t2", now - ms(200), recorder(&log, "t2"));

        let summary = run_tick(&index, &ExpiryConfig::default()).await;

        assert_eq!(summary.fired, 4);
        assert_eq!(fired(&log), vec!["t1", "t2", "t3", "t4"]);
        assert!(index.is_empty());
        assert_eq!(index.queue_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_at_first_entry_not_due() {
        let index = TimerIndex::new();
        let log = Log::default();
        let now = Instant::now();

        index.register("due", now, recorder(&log, "due"));
        index.register("later", now + ms(500), recorder(&log, "later"));

        let summary = run_tick(&index, &ExpiryConfig::default()).await;
        assert_eq!(summary.fired, 1);
        assert_eq!(fired(&log), vec!["due"]);
        assert_eq!(index.len(), 1);
        assert_eq!(index.queue_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_later_fires_once_at_new_time() {
        let index = TimerIndex::new();
        let log = Log::default();
        let now = Instant::now();

        index.register("k", now + ms(100), recorder(&log, "old"));
        index.register("k", now + ms(1000), recorder(&log, "new"));

        time::advance(ms(500)).await;
        let summary = run_tick(&index, &ExpiryConfig::default()).await;
        assert_eq!(summary.rescheduled, 1);
        assert!(fired(&log).is_empty());

        time::advance(ms(600)).await;
        run_tick(&index, &ExpiryConfig::default()).await;
        run_tick(&index, &ExpiryConfig::default()).await;
        assert_eq!(fired(&log), vec!["new"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_priority_does_not_hide_due_entries() {
        let index = TimerIndex::new();
        let log = Log::default();
        let now = Instant::now();

        index.register("moved", now + ms(10), recorder(&log, "moved"));
        index.register("moved", now + ms(5000), recorder(&log, "moved"));
        index.register("due", now + ms(20), recorder(&log, "due"));

        time::advance(ms(100)).await;
        let summary = run_tick(&index, &ExpiryConfig::default()).await;

        assert_eq!(summary.rescheduled, 1);
        assert_eq!(fired(&log), vec!["due"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_reschedule_fires_after_earlier_keys() {
        let index = TimerIndex::new();
        let log = Log::default();
        let now = Instant::now();

        index.register("a", now + ms(100), recorder(&log, "a"));
        index.register("b", now + ms(500), recorder(&log, "b"));
        index.register("a", now + ms(600), recorder(&log, "a"));

        // Both are due, "a" only after "b"
        time::advance(ms(1000)).await;
        let summary = run_tick(&index, &ExpiryConfig::default()).await;

        assert_eq!(summary.fired, 2);
        assert_eq!(summary.rescheduled, 1);
        assert_eq!(fired(&log), vec!["b", "a"]);
        assert!(index.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_during_tick_waits_for_next_tick() {
        fn rearm(index: Weak<TimerIndex<&'static str>>, count: Arc<AtomicU64>) -> Callback {
            Callback::from_fn(move || {
                count.fetch_add(1, Ordering::SeqCst);
                if let Some(strong) = index.upgrade() {
                    strong.register_in(
                        "loop",
                        Duration::ZERO,
                        rearm(index.clone(), Arc::clone(&count)),
                    );
                }
                Ok(())
            })
        }

        let index = Arc::new(TimerIndex::new());
        let count = Arc::new(AtomicU64::new(0));
        index.register_in(
            "loop",
            Duration::ZERO,
            rearm(Arc::downgrade(&index), Arc::clone(&count)),
        );

        let config = ExpiryConfig::default();
        let summary = time::timeout(Duration::from_secs(5), run_tick(&index, &config))
            .await
            .unwrap();

        assert_eq!(summary.fired, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(index.lookup("loop").is_some());

        let summary = run_tick(&index, &config).await;
        assert_eq!(summary.fired, 1);
        assert_eq!(count.load(Ordering::SeqCst), 2);

        index.clear();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_tick_clears_fired_record() {
        let index = TimerIndex::new();
        let log = Log::default();

        index.register_in(
            "k",
            Duration::ZERO,
            Callback::new(|| async {
                time::sleep(Duration::from_secs(10)).await;
                Ok(())
            }),
        );

        let config = ExpiryConfig::default();
        let cancelled = time::timeout(ms(10), run_tick(&index, &config)).await;
        assert!(cancelled.is_err());
        assert!(index.lookup("k").is_none());
        assert!(index.is_empty());

        // The key can be scheduled again and fires normally
        index.register_in("k", Duration::ZERO, recorder(&log, "k"));
        let summary = run_tick(&index, &config).await;
        assert_eq!(summary.fired, 1);
        assert_eq!(fired(&log), vec!["k"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_isolated() {
        let index = TimerIndex::new();
        let log = Log::default();
        let now = Instant::now();

        index.register(
            "err",
            now - ms(30),
            Callback::new(|| async { Err(CallbackError::msg("boom")) }),
        );
        index.register(
            "panic",
            now - ms(20),
            Callback::from_fn(|| panic!("callback exploded")),
        );
        index.register("ok", now - ms(10), recorder(&log, "ok"));

        let summary = run_tick(&index, &ExpiryConfig::default()).await;

        assert_eq!(summary.failed, 2);
        assert_eq!(summary.fired, 1);
        assert_eq!(fired(&log), vec!["ok"]);
        // Failed callbacks are cleared too
        assert!(index.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_callback_times_out() {
        let index = TimerIndex::new();
        let log = Log::default();
        let now = Instant::now();

        index.register(
            "slow",
            now - ms(20),
            Callback::new(|| async {
                time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }),
        );
        index.register("fast", now - ms(10), recorder(&log, "fast"));

        let config = ExpiryConfig::default().with_callback_timeout(ms(100));
        let summary = run_tick(&index, &config).await;

        assert_eq!(summary.timed_out, 1);
        assert_eq!(summary.fired, 1);
        assert_eq!(fired(&log), vec!["fast"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_async_callback_is_awaited() {
        let index = TimerIndex::new();
        let log = Log::default();
        let now = Instant::now();

        let slow_log = Arc::clone(&log);
        index.register(
            "first",
            now - ms(20),
            Callback::new(move || {
                let log = Arc::clone(&slow_log);
                async move {
                    time::sleep(ms(300)).await;
                    log.lock().unwrap().push("first");
                    Ok(())
                }
            }),
        );
        index.register("second", now - ms(10), recorder(&log, "second"));

        run_tick(&index, &ExpiryConfig::default()).await;
        assert_eq!(fired(&log), vec!["first", "second"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_compaction_after_tick() {
        let index = TimerIndex::new();
        let now = Instant::now();

        // Churn lands behind the live entry, so the tick never reaches it
        for _ in 0..10 {
            index.register("churn", now + ms(20_000), Callback::noop());
            index.unregister("churn");
        }
        index.register("keep", now + ms(10_000), Callback::noop());

        let config = ExpiryConfig::default().with_compaction_threshold(Some(5));
        let summary = run_tick(&index, &config).await;

        assert_eq!(summary.compacted, 10);
        assert_eq!(index.queue_len(), 1);
        assert_eq!(index.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_ticks_on_interval() {
        let index = Arc::new(TimerIndex::new());
        let log = Log::default();
        let now = Instant::now();

        index.register("a", now + ms(500), recorder(&log, "a"));
        index.register("b", now + ms(1500), recorder(&log, "b"));

        let driver = ExpiryDriver::start(Arc::clone(&index), ExpiryConfig::default()).unwrap();

        time::sleep(ms(1050)).await;
        assert_eq!(fired(&log), vec!["a"]);

        time::sleep(ms(1000)).await;
        assert_eq!(fired(&log), vec!["a", "b"]);
        assert!(driver.stats().ticks >= 2);
        assert_eq!(driver.stats().fired, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let index = Arc::new(TimerIndex::new());
        let log = Log::default();

        let driver = ExpiryDriver::start(
            Arc::clone(&index),
            ExpiryConfig::from_poll_interval_ms(100),
        )
        .unwrap();

        driver.stop();
        driver.stop();
        assert!(driver.is_stopped());

        index.register("k", Instant::now(), recorder(&log, "k"));
        time::sleep(ms(1000)).await;

        assert!(fired(&log).is_empty());
        assert_eq!(driver.stats().ticks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_stops_on_drop() {
        let index = Arc::new(TimerIndex::new());
        let log = Log::default();

        {
            let _driver = ExpiryDriver::start(
                Arc::clone(&index),
                ExpiryConfig::from_poll_interval_ms(10),
            )
            .unwrap();
            time::sleep(ms(50)).await;
            // Driver is dropped here
        }

        index.register("k", Instant::now(), recorder(&log, "k"));
        time::sleep(ms(100)).await;

        assert!(fired(&log).is_empty());
        assert!(index.contains("k"));
    }

    #[test]
    fn test_config_validation() {
        assert_eq!(ExpiryConfig::default().validate(), Ok(()));
        assert_eq!(
            ExpiryConfig::from_poll_interval_ms(0).validate(),
            Err(ConfigError::ZeroPollInterval)
        );
        assert_eq!(
            ExpiryConfig::default()
                .with_callback_timeout(Duration::ZERO)
                .validate(),
            Err(ConfigError::ZeroCallbackTimeout)
        );
        assert_eq!(
            ExpiryConfig::default()
                .with_compaction_threshold(Some(0))
                .validate(),
            Err(ConfigError::ZeroCompactionThreshold)
        );
        assert_eq!(
            ExpiryConfig::default()
                .with_compaction_threshold(None)
                .validate(),
            Ok(())
        );
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let index: Arc<TimerIndex<u64>> = Arc::new(TimerIndex::new());
        let result = ExpiryDriver::start(index, ExpiryConfig::from_poll_interval_ms(0));
        assert!(matches!(result, Err(ConfigError::ZeroPollInterval)));
    }
}
