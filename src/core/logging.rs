//! Logging setup with `tracing-subscriber`
//!
//! `RUST_LOG` takes precedence; otherwise the level follows the `-v` count.
//! Structural corruption is reported on the `tbom::alert` target so operators
//! can route it separately.

use tracing_subscriber::{fmt, EnvFilter};

/// Target used for events that need operator attention
pub const ALERT_TARGET: &str = "tbom::alert";

/// Map a `-v` count to a default filter
fn default_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber (stderr, no colour when piped)
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Verbose subscriber for tests; safe to call repeatedly
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
