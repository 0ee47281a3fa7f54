//! Shared tracing/logging initialization.
//!
//! The daemon binary and the integration harnesses set up `tracing_subscriber`
//! the same way: an env-filter plus either the human-readable or the JSON
//! formatter.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogConfig;

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (e.g. `"hidmux_daemon=info"`).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    );
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Initialise tracing from the `[log]` section of a loaded [`Config`].
///
/// The level applies to every `hidmux` crate; other targets stay at `warn`.
///
/// [`Config`]: crate::config::Config
pub fn init_from_config(log: &LogConfig) {
    init_tracing(&default_filter(&log.level), log.json);
}

/// Build the default filter directive for a log level.
pub fn default_filter(level: &str) -> String {
    format!("warn,hidmux_core={level},hidmux_daemon={level}")
}
