//! Shared helpers for unit tests

use tracing_subscriber::EnvFilter;

/// Initialize tracing output for a test
///
/// Safe to call from every test; only the first call installs the
/// subscriber. Respects `RUST_LOG` for filtering.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
