//! Utilities for configuring logging.

use tracing_subscriber::filter::EnvFilter;

/// Output format for emitted log events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Pretty printed and human readable, suited for terminals.
    #[default]
    HumanReadable,

    /// Newline-delimited JSON, suited for log collectors.
    Json,
}

/// Configure the global tracing subscriber.
///
/// `default_level` applies when `RUST_LOG` is unset; otherwise the env filter
/// takes precedence. May only be called once per process.
pub fn configure_global_logger(default_level: tracing::Level, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match format {
        LogFormat::HumanReadable => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
