//! Helpers shared by the test suites of the workspace crates.

use std::io::Result;
use tempfile::TempDir;

/// A scratch directory that is deleted when dropped.
pub fn tmp_dir() -> Result<TempDir> {
    tempfile::Builder::new().prefix("ledger_worker").tempdir()
}

/// Install a terse tracing subscriber if `RUST_LOG` is set in the
/// environment, so failing tests can be re-run with log output.
pub fn maybe_start_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        start_logging()
    }
}

/// Install a tracing subscriber honoring `RUST_LOG`. Safe to call from every
/// test; only the first call per process wins.
pub fn start_logging() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Assert that `haystack` (anything `ToString`) contains `needle`.
#[macro_export]
macro_rules! assert_contains {
    ($haystack:expr, $needle:expr) => {
        let haystack_value: String = $haystack.to_string();
        let needle_value: String = $needle.to_string();
        assert!(
            haystack_value.contains(&needle_value),
            "did not find expected value.\n\nneedle:\n{}\n\nhaystack:\n{}",
            needle_value,
            haystack_value
        );
    };
}

/// Assert that `haystack` (anything `ToString`) does not contain `needle`.
#[macro_export]
macro_rules! assert_not_contains {
    ($haystack:expr, $needle:expr) => {
        let haystack_value: String = $haystack.to_string();
        let needle_value: String = $needle.to_string();
        assert!(
            !haystack_value.contains(&needle_value),
            "found unexpected value.\n\nneedle:\n{}\n\nhaystack:\n{}",
            needle_value,
            haystack_value
        );
    };
}
