//! Log subscriber initialization.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use capsa_common::constants::DEFAULT_LOG_LEVEL;
use tracing_subscriber::EnvFilter;

/// Installs the global JSON subscriber writing to `path`.
///
/// The level comes from `RUST_LOG`, defaulting to `debug`. When the file
/// cannot be opened, logs go to standard error instead.
pub fn init(path: &Path) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));
    let builder = tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_file(true)
        .with_line_number(true);

    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => {
            let _ = builder.with_writer(Mutex::new(file)).try_init();
        }
        Err(e) => {
            let _ = builder.with_writer(std::io::stderr).try_init();
            tracing::info!(
                path = %path.display(),
                error = %e,
                "cannot open log file, logging to stderr"
            );
        }
    }
}
