//! Process-wide tracing setup for hosts that do not install their own
//! subscriber.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::BridgeConfig;

const FALLBACK_FILTER: &str = "info";

/// Parses `directives`, falling back to `info` when they are invalid.
pub fn log_filter(directives: &str) -> EnvFilter {
    EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new(FALLBACK_FILTER))
}

/// Installs a global fmt subscriber filtered by [`BridgeConfig::log_filter`].
/// Fails if a global subscriber is already set.
pub fn init_tracing(config: &BridgeConfig) -> Result<(), TryInitError> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_names(true);
    Registry::default()
        .with(log_filter(&config.log_filter))
        .with(fmt_layer)
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_filter_falls_back_to_info() {
        let fallback = log_filter("openconnect_bridge=loud").to_string();
        assert!(fallback.eq_ignore_ascii_case("info"), "got {fallback}");
        let kept = log_filter("openconnect_bridge=trace").to_string();
        assert!(kept.eq_ignore_ascii_case("openconnect_bridge=trace"), "got {kept}");
    }

    #[test]
    fn second_install_is_refused() {
        let config = BridgeConfig {
            log_filter: "not a ==== filter".to_string(),
            ..BridgeConfig::default()
        };
        assert!(init_tracing(&config).is_ok());
        assert!(init_tracing(&BridgeConfig::default()).is_err());
    }
}
