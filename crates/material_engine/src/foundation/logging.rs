//! Logging setup on top of `env_logger`

pub use log::{debug, error, info, trace, warn};

use crate::config::LoggingConfig;

/// Initialize logging with the `info` default filter
///
/// `RUST_LOG` overrides the default when set. Calling this more than once is
/// harmless; later calls are ignored.
pub fn init() {
    init_with_level("info");
}

/// Initialize logging with `filter` as the default, e.g. `"material_engine=debug"`
pub fn init_with_level(filter: &str) {
    let env = env_logger::Env::default().default_filter_or(filter);
    if env_logger::Builder::from_env(env).format_timestamp_millis().try_init().is_err() {
        debug!("Logger already initialized, keeping the existing one");
    }
}

/// Initialize logging from configuration
pub fn init_from_config(config: &LoggingConfig) {
    init_with_level(&config.filter);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_init_is_harmless() {
        init_from_config(&LoggingConfig {
            filter: "debug".to_string(),
        });
        init();
        info!("still logging");
    }
}
