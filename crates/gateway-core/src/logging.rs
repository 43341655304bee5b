//! Tracing subscriber setup for processes embedding the gateway core.

use crate::config::LoggingConfig;
use tracing_subscriber::{
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter, Layer, Registry,
};

/// Filter used when `RUST_LOG` is unset or unparseable.
fn default_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_new(format!("warn,gateway_core={}", config.level))
        .unwrap_or_else(|_| EnvFilter::new("warn,gateway_core=info"))
}

fn filter(config: &LoggingConfig) -> EnvFilter {
    match std::env::var("RUST_LOG") {
        Ok(directives) => EnvFilter::try_new(directives).unwrap_or_else(|_| default_filter(config)),
        Err(_) => default_filter(config),
    }
}

fn fmt_layer(config: &LoggingConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    if config.format == "json" {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        // "pretty" and anything validation let through
        tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .with_target(false)
            .boxed()
    }
}

/// Installs the global subscriber. Panics if one is already set.
pub fn init_logging(config: &LoggingConfig) {
    tracing_subscriber::registry().with(fmt_layer(config)).with(filter(config)).init();
}

/// Installs the global subscriber unless one is already set.
///
/// # Errors
///
/// Returns [`TryInitError`] if a global subscriber exists.
pub fn try_init_logging(config: &LoggingConfig) -> Result<(), TryInitError> {
    tracing_subscriber::registry().with(fmt_layer(config)).with(filter(config)).try_init()
}
