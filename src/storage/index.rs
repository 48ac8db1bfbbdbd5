//! Timer Index
//!
//! The timer index owns two structures:
//!
//! 1. A map from key to its current [`ExpiryRecord`]. This is the single
//!    source of truth for whether (and when) a key is due.
//! 2. A min-ordered [`BinaryHeap`] of [`QueueEntry`] values answering
//!    "what is the earliest thing that might be due".
//!
//! ## Lazy Duplicate Cleanup
//!
//! A binary heap cannot update the priority of an arbitrary element, so the
//! heap is allowed to hold superseded entries:
//!
//! - Rescheduling to a **later** time pushes nothing. The old entry surfaces
//!   first, the dequeue step sees that the record's timestamp is later and
//!   re-enqueues the key at the corrected priority.
//! - Rescheduling to an **earlier** time removes the old entry with a linear
//!   scan, then pushes the new one: `O(n + log n)`.
//! - Unregistering only drops the record. The orphaned entry is discarded
//!   when it reaches the top of the heap.
//!
//! Churn that never lets entries reach the top (unregister followed by
//! register, over and over) grows the heap, which [`TimerIndex::compact`]
//! bounds.
//!
//! ## Concurrency
//!
//! Both structures sit behind one mutex, so every operation observes them in
//! a consistent state. The lock is never held while a callback runs.

use crate::storage::record::{Callback, ExpiryRecord, QueueEntry};
use std::borrow::Borrow;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// The live record for a key, plus bookkeeping the driver needs.
#[derive(Debug)]
struct Slot {
    record: ExpiryRecord,
    /// Distinguishes this registration from any later one for the same key
    generation: u64,
    /// The driver has dequeued this record and is running its callback.
    /// A firing record has no entry left in the heap.
    firing: bool,
}

#[derive(Debug)]
struct Inner<K> {
    slots: HashMap<K, Slot>,
    queue: BinaryHeap<Reverse<QueueEntry<K>>>,
    next_seq: u64,
    next_generation: u64,
}

impl<K> Inner<K> {
    fn push(&mut self, key: K, priority: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Reverse(QueueEntry { key, priority, seq }));
    }

    /// Puts a popped entry back at `priority`, keeping its sequence number.
    fn requeue(&mut self, entry: QueueEntry<K>, priority: Instant) {
        self.queue.push(Reverse(QueueEntry { priority, ..entry }));
    }

    fn queued_records(&self) -> usize {
        self.slots.values().filter(|slot| !slot.firing).count()
    }
}

/// A due timer handed from the index to the driver.
#[derive(Debug)]
pub(crate) struct DueTimer<K> {
    pub key: K,
    pub callback: Callback,
    pub generation: u64,
    pub expires_at: Instant,
}

/// Result of one dequeue step.
#[derive(Debug)]
pub(crate) enum Dequeued<K> {
    /// The heap is empty
    Exhausted,
    /// The minimum entry was pushed after the tick began; it stays queued
    /// for the next tick
    Deferred,
    /// The entry had no live record and was dropped
    Stale,
    /// The entry was re-enqueued at its record's timestamp. `rescheduled` is
    /// set when the entry's priority was stale (the key was pushed later);
    /// otherwise the record is simply not due yet.
    NotDue { rescheduled: bool },
    /// The record is due; it is now marked as firing
    Due(DueTimer<K>),
}

/// Ordering structure plus per-key expiry records.
///
/// # Example
///
/// ```
/// use tickermap::{Callback, TimerIndex};
/// use std::time::Duration;
/// use tokio::time::Instant;
///
/// let index = TimerIndex::new();
/// let at = Instant::now() + Duration::from_secs(30);
///
/// index.register("session:1", at, Callback::noop());
/// assert_eq!(index.lookup("session:1").map(|r| r.expires_at), Some(at));
///
/// assert!(index.unregister("session:1"));
/// assert!(index.lookup("session:1").is_none());
/// ```
#[derive(Debug)]
pub struct TimerIndex<K> {
    inner: Mutex<Inner<K>>,
    /// Serializes ticks so two drains never interleave on one index
    pub(crate) tick_guard: tokio::sync::Mutex<()>,
}

impl<K> Default for TimerIndex<K>
where
    K: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> TimerIndex<K>
where
    K: Hash + Eq + Clone,
{
    /// Creates an empty timer index.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: HashMap::new(),
                queue: BinaryHeap::new(),
                next_seq: 0,
                next_generation: 0,
            }),
            tick_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// No user code runs under this lock, so a poisoned guard still holds
    /// consistent state.
    fn lock(&self) -> MutexGuard<'_, Inner<K>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers (or replaces) the timer for `key`.
    ///
    /// Overwrites any previous record. Complexity is `O(log n)` unless the new
    /// timestamp is earlier than the previous one, which costs an extra
    /// linear scan to remove the old entry.
    pub fn register(&self, key: K, expires_at: Instant, callback: Callback) {
        let record = ExpiryRecord::new(expires_at, Instant::now(), callback);

        let mut guard = self.lock();
        let inner = &mut *guard;

        // A firing record has already left the heap; treat it as absent
        let prior = inner
            .slots
            .get(&key)
            .filter(|slot| !slot.firing)
            .map(|slot| slot.record.expires_at);

        match prior {
            Some(prior_at) if prior_at <= expires_at => {
                trace!(ttl_ms = record.ttl_ms, "Later reschedule, keeping queued entry");
            }
            Some(_) => {
                let before = inner.queue.len();
                inner.queue.retain(|Reverse(entry)| entry.key != key);
                if inner.queue.len() == before {
                    debug!("Earlier reschedule found no queued entry to remove");
                }
                inner.push(key.clone(), expires_at);
                trace!(ttl_ms = record.ttl_ms, "Earlier reschedule, entry replaced");
            }
            None => {
                inner.push(key.clone(), expires_at);
                trace!(ttl_ms = record.ttl_ms, "Timer registered");
            }
        }

        let generation = inner.next_generation;
        inner.next_generation += 1;

        inner.slots.insert(
            key,
            Slot {
                record,
                generation,
                firing: false,
            },
        );
    }

    /// Registers a timer that expires `delay` from now.
    pub fn register_in(&self, key: K, delay: Duration, callback: Callback) {
        self.register(key, Instant::now() + delay, callback);
    }

    /// Removes the record for `key`.
    ///
    /// The queued entry stays in the heap and is discarded when dequeued.
    ///
    /// # Returns
    ///
    /// Returns `true` if a record existed.
    pub fn unregister<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().slots.remove(key).is_some()
    }

    /// Returns a copy of the record for `key`.
    pub fn lookup<Q>(&self, key: &Q) -> Option<ExpiryRecord>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().slots.get(key).map(|slot| slot.record.clone())
    }

    /// Checks if `key` has a live record.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().slots.contains_key(key)
    }

    /// Returns an independent copy of every record.
    pub fn snapshot(&self) -> HashMap<K, ExpiryRecord> {
        self.lock()
            .slots
            .iter()
            .map(|(key, slot)| (key.clone(), slot.record.clone()))
            .collect()
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    /// Returns `true` if no key has a live record.
    pub fn is_empty(&self) -> bool {
        self.lock().slots.is_empty()
    }

    /// Number of entries in the ordering structure, stale ones included.
    pub fn queue_len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Number of queued entries beyond one per live, queued record.
    pub fn stale_entries(&self) -> usize {
        let inner = self.lock();
        inner.queue.len().saturating_sub(inner.queued_records())
    }

    /// Priority of the heap minimum.
    ///
    /// This is a lower bound: the entry may be stale, in which case the real
    /// next expiry is later.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.lock().queue.peek().map(|Reverse(entry)| entry.priority)
    }

    /// Drops every record and every queued entry.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.slots.clear();
        inner.queue.clear();
    }

    /// Rebuilds the heap with exactly one entry per live, queued record.
    ///
    /// # Returns
    ///
    /// Returns the number of entries dropped.
    pub fn compact(&self) -> usize {
        let mut guard = self.lock();
        let inner = &mut *guard;

        let before = inner.queue.len();
        let live: Vec<(K, Instant)> = inner
            .slots
            .iter()
            .filter(|(_, slot)| !slot.firing)
            .map(|(key, slot)| (key.clone(), slot.record.expires_at))
            .collect();

        inner.queue.clear();
        for (key, at) in live {
            inner.push(key, at);
        }

        let dropped = before.saturating_sub(inner.queue.len());
        debug!(dropped, remaining = inner.queue.len(), "Timer index compacted");
        dropped
    }

    /// Sequence number the next pushed entry will get. Entries at or past
    /// this value were pushed after the caller sampled it.
    pub(crate) fn seq_cutoff(&self) -> u64 {
        self.lock().next_seq
    }

    /// Pops the heap minimum and decides what to do with it.
    ///
    /// The record's timestamp, not the entry's priority, decides due-ness.
    /// An entry whose priority is older than its record is moved to the
    /// record's timestamp first, so it fires in its corrected position.
    pub(crate) fn dequeue(&self, now: Instant, cutoff: u64) -> Dequeued<K> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        let Some(Reverse(entry)) = inner.queue.pop() else {
            return Dequeued::Exhausted;
        };

        if entry.seq >= cutoff {
            inner.queue.push(Reverse(entry));
            return Dequeued::Deferred;
        }

        let Some(slot) = inner.slots.get_mut(&entry.key) else {
            return Dequeued::Stale;
        };

        if slot.firing {
            return Dequeued::Stale;
        }

        let at = slot.record.expires_at;
        if entry.priority < at {
            inner.requeue(entry, at);
            return Dequeued::NotDue { rescheduled: true };
        }

        if !slot.record.is_due(now) {
            inner.requeue(entry, at);
            return Dequeued::NotDue { rescheduled: false };
        }

        slot.firing = true;
        Dequeued::Due(DueTimer {
            key: entry.key,
            callback: slot.record.callback.clone(),
            generation: slot.generation,
            expires_at: slot.record.expires_at,
        })
    }

    /// Clears the record for `key` if it is still the registration that
    /// fired. A re-registration made while the callback ran is kept.
    pub(crate) fn complete(&self, key: &K, generation: u64) -> bool {
        let mut inner = self.lock();
        let same = inner
            .slots
            .get(key)
            .is_some_and(|slot| slot.generation == generation);
        if same {
            inner.slots.remove(key);
        }
        same
    }
}
