//! Logging setup and segment prefixes.
//!
//! Every pipeline stage logs through `tracing`; hosts call [`init`] once.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing with the default `info` filter.
///
/// Sets up tracing-subscriber with:
/// - Environment filter (RUST_LOG)
/// - Compact format suitable for terminal output
pub fn init() {
    init_with_filter("info");
}

/// Initialize tracing with a custom default filter.
///
/// `RUST_LOG` still wins when it is set. Calling this twice is harmless; the
/// second registration is ignored.
pub fn init_with_filter(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}

/// Segment prefixes for log lines.
pub mod prefix {
    /// Model loading and inference
    pub const ENGINE: &str = "⚙";
    /// Camera binding and frame capture
    pub const CAMERA: &str = "◉";
    /// Session lifecycle
    pub const SESSION: &str = "▣";
    /// Result delivery to the host
    pub const DELIVERY: &str = "⇢";
}
