//! Logging setup for hosts and tests.
//!
//! The crate only emits `tracing` events; installing a subscriber is left to
//! the host. These helpers cover the common case of logging to stderr.

use crate::api::HostConfig;
use crate::errors::{ApiError, ApiResult};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Build the filter: `RUST_LOG` if set, otherwise `level`.
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize the global subscriber
///
/// Fails if a subscriber is already installed.
pub fn init(config: &HostConfig) -> ApiResult<()> {
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter(&config.log_level))
        .with(layer)
        .try_init()
        .map_err(|e| ApiError::configuration("log_level", e.to_string()))?;

    tracing::info!(level = %config.log_level, "Logging initialized");
    Ok(())
}

/// Initialize logging for tests (logs to stdout)
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_test_is_idempotent() {
        init_test();
        init_test();
        tracing::debug!("still fine");
    }

    #[test]
    fn test_env_filter_accepts_directives() {
        let filter = env_filter("roo_code_contracts=debug,warn");
        assert!(!filter.to_string().is_empty());
    }
}
