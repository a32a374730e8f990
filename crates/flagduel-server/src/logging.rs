//! Structured logging setup.
//!
//! Console output through the `tracing` ecosystem with environment-based
//! filtering: `RUST_LOG` wins, otherwise the configured default level.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the global tracing subscriber.
///
/// Safe to call more than once; later calls are no-ops (useful in tests).
pub fn init_logging(default_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(fmt::time::uptime());

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filters_parse() {
        for level in ["error", "warn", "info", "debug", "trace"] {
            assert!(EnvFilter::try_new(level).is_ok(), "level {level:?}");
        }
    }

    #[test]
    fn test_module_filter_parses() {
        let filter = EnvFilter::try_new("info,flagduel_server=debug").unwrap();
        let rendered = format!("{filter}");
        assert!(rendered.contains("flagduel_server=debug"));
    }

    #[test]
    fn test_double_init_is_harmless() {
        init_logging("info");
        init_logging("debug");
    }
}
