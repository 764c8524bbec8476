//! Logging initialization.
//!
//! Logs go to stderr as plain text (no ANSI colours) with RFC 3339
//! timestamps. `--debug` lowers the default level from `info` to `debug`;
//! `RUST_LOG` overrides both:
//!
//! ```bash
//! RUST_LOG=sqlprobe=trace sqlprobe --username sa --password ...
//! ```

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter directive for the given verbosity.
pub fn default_directive(debug: bool) -> &'static str {
    if debug {
        "debug"
    } else {
        "info"
    }
}

/// Install the global subscriber.
///
/// Calling it again is harmless: the first subscriber stays in place.
pub fn init(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug)));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .try_init();
}
