//! Shared helpers for tests across this workspace.
#![warn(missing_docs)]

use std::sync::Once;

// Workaround for "unused crate" lint false positives.
use workspace_hack as _;

static LOG_SETUP: Once = Once::new();

/// Enables debug logging regardless of the value of the `RUST_LOG`
/// environment variable.
pub fn start_logging() {
    LOG_SETUP.call_once(|| {
        if std::env::var("RUST_LOG").is_err() {
            std::env::set_var("RUST_LOG", "debug");
        }

        // Forward anything emitted through the `log` facade as well.
        let _ = tracing_log::LogTracer::init();

        let subscriber = tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .finish();
        let _ = observability_deps::tracing::subscriber::set_global_default(subscriber);
    });
}

/// Enables debug logging if the `RUST_LOG` environment variable is set.
///
/// Tests call this first so `RUST_LOG=debug cargo test` shows what the code
/// under test logged, while plain `cargo test` stays quiet.
pub fn maybe_start_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        start_logging()
    }
}
