//! Structured logging setup
//!
//! Slow-query warnings and execution failures are emitted as `tracing`
//! events with `query_id`, `execution_time_ms`, `threshold_ms` and `error`
//! fields; whatever subscriber the host installs receives them. This module
//! installs a default `fmt` subscriber for binaries and tests.

use crate::config::LoggingConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Build the filter directive string from the configured levels
pub fn filter_directives(config: &LoggingConfig) -> String {
    let mut directives = vec![config.level.clone()];
    let mut modules: Vec<_> = config.module_levels.iter().collect();
    modules.sort();
    for (module, level) in modules {
        directives.push(format!("{}={}", module, level));
    }
    directives.join(",")
}

/// Install the global subscriber writing to stderr. Returns false if one
/// was already set.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(config)));

    if config.json_format {
        Registry::default()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
            .try_init()
            .is_ok()
    } else {
        Registry::default()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init()
            .is_ok()
    }
}
