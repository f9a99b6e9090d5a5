//! Logging and tracing initialization for fcad.
//!
//! Pretty console output for interactive use, JSON for log aggregation when
//! the daemon runs unattended. `RUST_LOG` always overrides the default level.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::AppConfig;

/// Configuration for the logging system.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogConfig {
    /// Output logs as JSON (for machine parsing)
    pub json: bool,
    /// Enable verbose logging (sets default level to DEBUG)
    pub verbose: bool,
}

impl From<&AppConfig> for LogConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            json: config.json_logs,
            verbose: config.verbose,
        }
    }
}

fn default_filter(verbose: bool) -> EnvFilter {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("fcad={}", level.as_str().to_lowercase()))
    })
}

/// Install the global subscriber. Call once, after configuration is loaded.
///
/// A second call is a no-op apart from the returned error, so tests and
/// embedding applications may install their own subscriber first.
pub fn init(config: LogConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let registry = tracing_subscriber::registry().with(default_filter(config.verbose));

    if config.json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE)
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init()
    }
}

/// A rate limiter for throttling log messages.
///
/// Tier progress on a card with thousands of files would otherwise flood the
/// log.
///
/// # Example
///
/// ```ignore
/// let throttle = LogThrottle::new(Duration::from_secs(2));
///
/// for file in files {
///     if throttle.should_log() {
///         tracing::debug!(processed, total, "Tier progress");
///     }
/// }
/// ```
pub struct LogThrottle {
    interval_ms: u64,
    /// Last log time in ms since `start`, or `NEVER_LOGGED`
    last_log_ms: AtomicU64,
    start: Instant,
}

const NEVER_LOGGED: u64 = u64::MAX;

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            last_log_ms: AtomicU64::new(NEVER_LOGGED),
            start: Instant::now(),
        }
    }

    /// Returns true if enough time has passed since the last log.
    pub fn should_log(&self) -> bool {
        let now_ms = self.start.elapsed().as_millis() as u64;
        let last = self.last_log_ms.load(Ordering::Relaxed);

        let due = last == NEVER_LOGGED || now_ms.saturating_sub(last) >= self.interval_ms;
        // Losing the race means another thread just logged.
        due && self
            .last_log_ms
            .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_allows_first_log_then_blocks() {
        let throttle = LogThrottle::new(Duration::from_secs(1));
        assert!(throttle.should_log());
        assert!(!throttle.should_log());
    }

    #[test]
    fn zero_interval_always_logs() {
        let throttle = LogThrottle::new(Duration::ZERO);
        assert!(throttle.should_log());
        assert!(throttle.should_log());
    }

    #[test]
    fn log_config_follows_app_config() {
        let config = AppConfig {
            verbose: true,
            json_logs: true,
            ..AppConfig::default()
        };
        let log = LogConfig::from(&config);
        assert!(log.verbose && log.json);
    }
}
