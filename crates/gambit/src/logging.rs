//! Log output for binaries embedding the server.

use tracing_subscriber::EnvFilter;

/// Installs a `tracing` fmt subscriber filtered by `RUST_LOG`, falling
/// back to `info`.
///
/// Safe to call more than once; only the first call installs anything.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
