//! Tracing setup shared by binaries and test suites.

/// Initialize process-wide tracing (JSON lines, `RUST_LOG` aware).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Initialize tracing for tests: human-readable output captured by the
/// test harness. Idempotent.
pub fn init_for_tests() {
    tracing::init_for_tests();
}

/// Subscriber configuration (filters, formats).
pub mod tracing;
