//! # Telemetry
//!
//! Tracing initialization helper, mirroring the corpus's
//! `tracing_subscriber::fmt().with_env_filter(...)` bootstrap in `main.rs`. This
//! crate has no binary of its own, so embedders call this once at process
//! startup rather than it happening implicitly.

use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber reading `RUST_LOG` (falling back to
/// `default_filter` when unset). Safe to call at most once per process; a second
/// call is a logic error in the embedder, not something this crate guards
/// against.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
