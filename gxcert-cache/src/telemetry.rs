//! Tracing subscriber setup.

use gxcert_core::{ConfigError, GxCertResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "gxcert_cache=info";

/// Install a global subscriber emitting JSON lines.
///
/// `RUST_LOG` takes precedence over `default_filter`. Fails when a global
/// subscriber is already installed.
pub fn init_tracing(default_filter: &str) -> GxCertResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .try_init()
        .map_err(|e| ConfigError::Telemetry {
            reason: format!("Failed to init subscriber: {}", e),
        })?;

    tracing::info!(filter = default_filter, "Telemetry initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        // Another test may have installed the subscriber first; either way the
        // second attempt in this process must be rejected.
        let _ = init_tracing(DEFAULT_FILTER);
        let err = init_tracing(DEFAULT_FILTER).unwrap_err();
        assert!(err.to_string().contains("Telemetry initialization failed"));
    }
}
