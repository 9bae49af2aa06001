//! Console logging through `env_logger`.

pub mod config;

pub use config::LoggingConfig;

use std::io::Write;

/// Installs the global logger. Later calls are no-ops, so tests and
/// embedding applications may call it freely.
pub fn init(config: &LoggingConfig) {
    let mut builder = env_logger::Builder::new();
    builder.parse_filters(&config.filter_spec());
    if !config.include_timestamp {
        builder.format(|buf, record| {
            writeln!(buf, "[{} {}] {}", record.level(), record.target(), record.args())
        });
    }
    if builder.try_init().is_ok() {
        log::debug!("Logger initialised with filter '{}'", config.filter_spec());
    }
}
