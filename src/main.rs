//! tickermap demo - a session store whose entries delete themselves on expiry.
//!
//! Starts a map of `Bytes` sessions, schedules each one to expire, then
//! exercises rescheduling, logout and a failing callback while the driver
//! drains the timers.

use anyhow::Context;
use bytes::Bytes;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tickermap::{Callback, CallbackError, ExpiryConfig, TickerMap};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

type Sessions = TickerMap<Bytes, Bytes>;

/// Demo configuration
struct Config {
    /// Milliseconds between expiry ticks
    poll_ms: u64,
    /// Number of sessions to create
    sessions: usize,
    /// Gap between consecutive session expiries, in milliseconds
    spread_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_ms: tickermap::DEFAULT_POLL_INTERVAL_MS,
            sessions: 6,
            spread_ms: 700,
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> anyhow::Result<Self> {
        let mut config = Config::default();
        let mut args = std::env::args().skip(1);

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--poll-ms" => {
                    config.poll_ms = parse_value(&arg, args.next())?;
                }
                "--sessions" | "-n" => {
                    config.sessions = parse_value(&arg, args.next())?;
                }
                "--spread-ms" => {
                    config.spread_ms = parse_value(&arg, args.next())?;
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("tickermap version {}", tickermap::VERSION);
                    std::process::exit(0);
                }
                other => {
                    print_help();
                    anyhow::bail!("unknown argument: {other}");
                }
            }
        }

        Ok(config)
    }
}

fn parse_value<T>(flag: &str, value: Option<String>) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = value.with_context(|| format!("{flag} requires a value"))?;
    value
        .parse()
        .with_context(|| format!("invalid value for {flag}: {value}"))
}

fn print_help() {
    println!(
        r#"
tickermap - key-value map with expiry callbacks (demo)

USAGE:
    tickermap [OPTIONS]

OPTIONS:
        --poll-ms <MS>      Milliseconds between expiry ticks (default: 1000)
    -n, --sessions <N>      Number of sessions to create (default: 6)
        --spread-ms <MS>    Gap between session expiries (default: 700)
    -v, --version           Print version information
    -h, --help              Print this help message

LOGGING:
    Set RUST_LOG to change verbosity, e.g. RUST_LOG=tickermap=debug
"#
    );
}

/// Builds the callback that removes a session once its timer fires.
fn expire_session(sessions: Weak<Sessions>, key: Bytes) -> Callback {
    Callback::from_fn(move || {
        let Some(sessions) = sessions.upgrade() else {
            return Ok(());
        };
        if sessions.delete(&key) {
            info!(
                session = %String::from_utf8_lossy(&key),
                remaining = sessions.len(),
                "Session expired"
            );
        }
        Ok(())
    })
}

fn session_key(i: usize) -> Bytes {
    Bytes::from(format!("session:{i}"))
}

/// Delay before the session at `position` expires: one `spread` per slot.
fn expiry_offset(spread: Duration, position: usize) -> anyhow::Result<Duration> {
    position
        .checked_add(1)
        .and_then(|slot| u32::try_from(slot).ok())
        .and_then(|slot| spread.checked_mul(slot))
        .with_context(|| format!("expiry for session {position} overflows"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_args()?;

    // Set up logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let expiry = ExpiryConfig::from_poll_interval_ms(config.poll_ms)
        .with_callback_timeout(Duration::from_secs(5));
    let sessions: Arc<Sessions> =
        Arc::new(TickerMap::with_config(expiry).context("invalid expiry configuration")?);

    let spread = Duration::from_millis(config.spread_ms);
    for i in 0..config.sessions {
        let key = session_key(i);
        sessions.insert(key.clone(), Bytes::from(format!("token-{i:04}")));
        sessions.set_timer_in(
            key.clone(),
            expiry_offset(spread, i)?,
            expire_session(Arc::downgrade(&sessions), key),
        );
    }
    info!(sessions = config.sessions, "Sessions created");

    if config.sessions >= 3 {
        // Activity on session 0 pushes its expiry past everyone else's
        let key = session_key(0);
        sessions.set_timer_in(
            key.clone(),
            expiry_offset(spread, config.sessions)?,
            expire_session(Arc::downgrade(&sessions), key),
        );
        info!("session:0 extended");

        // Session 1 logs out explicitly; its timer must never fire
        sessions.delete(&session_key(1));
        info!("session:1 logged out");

        // The last session is revoked and expires on the next tick
        let key = session_key(config.sessions - 1);
        sessions.set_timer_in(
            key.clone(),
            Duration::ZERO,
            expire_session(Arc::downgrade(&sessions), key),
        );
        info!(session = config.sessions - 1, "Last session revoked");
    }

    // A timer without a value whose callback fails
    sessions.set_timer_in(
        Bytes::from_static(b"audit:flush"),
        spread,
        Callback::new(|| async { Err(CallbackError::msg("audit sink unavailable")) }),
    );

    let poll = Duration::from_millis(config.poll_ms);
    let drained = async {
        while !sessions.timers().is_empty() {
            tokio::time::sleep(poll).await;
        }
    };

    tokio::select! {
        _ = drained => {
            info!("All timers fired");
        }
        result = signal::ctrl_c() => {
            result.context("failed to listen for Ctrl+C")?;
            info!("Shutdown signal received, stopping...");
        }
    }

    sessions.stop();

    let stats = sessions.stats();
    info!(
        remaining = stats.keys,
        ticks = stats.expiry.ticks,
        fired = stats.expiry.fired,
        failed = stats.expiry.failed,
        stale = stats.expiry.stale,
        rescheduled = stats.expiry.rescheduled,
        "Demo complete"
    );

    Ok(())
}
