//! Test logging.

/// Installs a test-friendly tracing subscriber.
///
/// The filter comes from `RUST_LOG`, defaulting to `entigrid_core=debug`.
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("entigrid_core=debug"));
    let _ = fmt().with_env_filter(filter).with_test_writer().try_init();
}
