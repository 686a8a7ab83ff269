//! Structured logging bootstrap.

use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;

/// Initialize the global `tracing` subscriber once at process startup.
///
/// `log_level` seeds the `EnvFilter` default directive (overridable at
/// runtime via `RUST_LOG`); `format` selects pretty vs. JSON line output.
pub fn init(log_level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{log_level},aigateway=debug")));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Pretty => subscriber.init(),
    }
}
