//! Tracing setup shared by the Termite binaries.

use tracing_subscriber::EnvFilter;

/// Initialize tracing from the `TERMITE_LOG` environment variable,
/// defaulting to `info`. Call once at startup.
pub fn init() {
    let filter = EnvFilter::try_from_env("TERMITE_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Variant for tests and embedders that must tolerate an already
/// installed subscriber.
pub fn try_init() {
    let filter = EnvFilter::try_from_env("TERMITE_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
