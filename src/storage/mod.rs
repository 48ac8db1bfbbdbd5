//! Storage Module
//!
//! This module provides the key-value map and the expiry machinery behind it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        TickerMap                            │
//! │   values: RwLock<HashMap<K, V>>   timers: Arc<TimerIndex>   │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │ run_tick
//!              ┌─────────────┴─────────────┐
//!              │       ExpiryDriver        │
//!              │  (Background Tokio Task)  │
//!              └───────────────────────────┘
//! ```
//!
//! - [`record`]: callbacks, expiry records and heap entries
//! - [`index`]: the timer index (record map + min-heap)
//! - [`expiry`]: the periodic driver and the tick algorithm
//! - [`engine`]: the map wrapper tying values and timers together
//!
//! ## Example
//!
//! ```
//! use tickermap::storage::{Callback, TickerMap};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let map = Arc::new(TickerMap::new());
//! map.insert("session".to_string(), "token123".to_string());
//!
//! // Delete the session once it expires
//! let weak = Arc::downgrade(&map);
//! map.set_timer_in(
//!     "session".to_string(),
//!     Duration::from_secs(3600),
//!     Callback::from_fn(move || {
//!         if let Some(map) = weak.upgrade() {
//!             map.delete("session");
//!         }
//!         Ok(())
//!     }),
//! );
//! # }
//! ```

pub mod engine;
pub mod expiry;
pub mod index;
pub mod record;

// Re-export commonly used types
pub use engine::{MapStats, TickerMap};
pub use expiry::{run_tick, ExpiryConfig, ExpiryDriver, ExpiryStats, TickSummary};
pub use index::TimerIndex;
pub use record::{Callback, CallbackFuture, CallbackResult, ExpiryRecord, QueueEntry};
