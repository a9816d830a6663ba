//! Logging initialization and configuration.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable consulted for filter directives. Directives set
/// here override the `level` argument of [`init_logging`], e.g.
/// `RINGLB_LOG=ringlb::ring=trace,ringlb=debug`.
pub const LOG_ENV_VAR: &str = "RINGLB_LOG";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Initialize the logging system.
///
/// The `level` argument is scoped to this crate's spans and events: an
/// embedding application keeps its own global filter and can still raise or
/// lower this policy's verbosity through [`LOG_ENV_VAR`]. The pick path logs
/// nothing below `debug`, so `info` is safe for production data planes.
///
/// # Arguments
///
/// * `level` - Log level filter for `ringlb` targets (e.g., "info", "debug")
/// * `format` - Log output format (json or pretty)
pub fn init_logging(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(crate_directive(level)));

    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => {
            registry.with(fmt::layer().json()).init();
        }
        LogFormat::Pretty => {
            registry.with(fmt::layer().pretty()).init();
        }
    }
}

/// Filter directive enabling `level` for this crate's targets only.
fn crate_directive(level: &str) -> String {
    format!("{}={level}", env!("CARGO_PKG_NAME"))
}
