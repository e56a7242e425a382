// Logging
// Logging setup for embedders and tests.
//
// The library itself only emits `tracing` events; nothing is printed until a
// subscriber is installed.

use crate::config::BridgeConfig;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "sald_bridge=warn";

/// Installs a compact stderr subscriber.
///
/// `config.log_filter` takes precedence over `RUST_LOG`. Calling this again,
/// or after another subscriber was installed, does nothing.
pub fn init_logging(config: &BridgeConfig) {
    fmt()
        .with_env_filter(env_filter(config.log_filter.as_deref()))
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .ok();
}

fn env_filter(directives: Option<&str>) -> EnvFilter {
    let filter = match directives {
        Some(directives) => EnvFilter::try_new(directives).ok(),
        None => EnvFilter::try_from_default_env().ok(),
    };
    filter.unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}
