//! Utilities for logging.
//!
//! Filtering follows `RUST_LOG`, falling back to `warn`.

use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn env_filter(default: Level) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(default.into())
        .from_env_lossy()
}

/// Install a global subscriber writing to stderr.
///
/// Does nothing if a global subscriber is already set.
pub fn init() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter(Level::WARN))
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Install a subscriber whose output is captured by the test harness.
///
/// Safe to call from every test.
pub fn init_test() {
    let subscriber = FmtSubscriber::builder()
        .with_test_writer()
        .with_env_filter(env_filter(Level::WARN))
        .with_file(true)
        .with_line_number(true)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
