//! Logging setup shared by the audit binary and tests.

use crate::error::AuditError;
use crate::Result;
use tracing_subscriber::EnvFilter;

/// Maps CLI verbosity onto a level: quiet wins, then 0=INFO, 1=DEBUG,
/// 2+=TRACE.
pub fn level_for(verbose: u8, quiet: bool) -> tracing::Level {
    match (quiet, verbose) {
        (true, _) => tracing::Level::ERROR,
        (false, 0) => tracing::Level::INFO,
        (false, 1) => tracing::Level::DEBUG,
        (false, _) => tracing::Level::TRACE,
    }
}

/// Initializes structured logging to stderr.
///
/// `RUST_LOG`, when set, overrides the verbosity flags. With `json` every
/// event is emitted as one JSON object per line, including span fields.
///
/// # Errors
/// Returns a configuration error if a global subscriber is already set
pub fn init_logging(verbose: u8, quiet: bool, json: bool) -> Result<()> {
    let default_level = level_for(verbose, quiet);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.as_str().to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let initialized = if json {
        builder.json().with_current_span(true).try_init()
    } else {
        builder.try_init()
    };

    initialized.map_err(|e| {
        AuditError::configuration(format!("Failed to initialize logging: {}", e))
    })
}
