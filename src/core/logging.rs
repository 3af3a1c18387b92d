//! Logging setup for binaries
//!
//! The library only emits through the `log` facade; binaries pick the
//! backend. `RUST_LOG` always overrides the default filter.
//!
//! ```no_run
//! geomip::core::logging::init();
//! log::info!("Landscape tools started");
//! ```

/// Initialize env_logger with an `info` default filter
pub fn init() {
    init_with_default("info");
}

/// Initialize env_logger with a custom default filter such as
/// `"geomip=debug"`. Calls after the first are ignored.
pub fn init_with_default(filter: &str) {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format_timestamp_millis()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_init_is_harmless() {
        init_with_default("warn");
        init();
        log::debug!("logging initialised twice");
    }
}
