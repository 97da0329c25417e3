//! Logging setup for binaries and tests embedding the pipeline.

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Install a global `tracing` subscriber.
///
/// `RUST_LOG` selects the filter (default `info`) and `TF_LOG_FORMAT=json`
/// switches to JSON lines. The library logs through the `log` facade, which
/// the subscriber picks up. Calling this again after a subscriber is
/// installed does nothing.
pub fn init_tracing() {
    let log_format = std::env::var("TF_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .try_init()
    };

    if installed.is_err() {
        log::debug!("Tracing subscriber already installed");
    }
}
