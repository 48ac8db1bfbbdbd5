//! # tickermap - A Key-Value Map with Expiry Callbacks
//!
//! tickermap is an in-memory associative container where every key can carry
//! an absolute expiry timestamp and a callback to run once that timestamp
//! elapses.
//!
//! ## Features
//!
//! - **Ordered Firing**: due callbacks run in non-decreasing timestamp order
//! - **Cheap Rescheduling**: pushing a timer later is `O(log n)`; stale heap
//!   entries are corrected lazily when they surface
//! - **At Most Once**: a registration fires at most once, and never after the
//!   key was deleted or its timer cancelled
//! - **Isolated Callbacks**: each callback runs in its own Tokio task; errors,
//!   panics and timeouts are logged without stopping the tick
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              TickerMap                                  │
//! │                                                                         │
//! │  ┌─────────────────┐          ┌──────────────────────────────────────┐  │
//! │  │ Values          │          │ TimerIndex (one mutex)               │  │
//! │  │ RwLock<HashMap> │          │  key -> ExpiryRecord                 │  │
//! │  └─────────────────┘          │  BinaryHeap<Reverse<QueueEntry>>     │  │
//! │                               └──────────────────▲───────────────────┘  │
//! │                                                  │ dequeue / complete   │
//! │                               ┌──────────────────┴───────────────────┐  │
//! │                               │ ExpiryDriver                         │  │
//! │                               │ (Background Tokio Task, 1 tick/sec)  │  │
//! │                               └──────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use tickermap::{Callback, TickerMap};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let map = TickerMap::new();
//!
//! map.insert("user:42", "online");
//! map.set_timer_in(
//!     "user:42",
//!     Duration::from_secs(30),
//!     Callback::new(|| async {
//!         tracing::info!("user:42 went idle");
//!         Ok(())
//!     }),
//! );
//!
//! let record = map.get_timeout("user:42").unwrap();
//! assert!(record.ttl_ms <= 30_000);
//!
//! map.stop();
//! # }
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: the map, the timer index and the expiry driver
//! - [`error`]: callback and configuration errors

pub mod error;
pub mod storage;

// Re-export commonly used types for convenience
pub use error::{CallbackError, ConfigError};
pub use storage::{
    run_tick, Callback, CallbackResult, ExpiryConfig, ExpiryDriver, ExpiryRecord, ExpiryStats,
    MapStats, TickSummary, TickerMap, TimerIndex,
};

/// The default poll interval in milliseconds (one tick per second)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Version of tickermap
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
