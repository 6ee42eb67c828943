//! Process-wide tracing setup, shared by the `cli` and `app` entry points.

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global tracing subscriber. `json` selects structured
/// output for production; otherwise a human-readable pretty format is used.
pub fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let base = fmt::layer().with_target(true).with_thread_ids(true).with_line_number(true).with_file(true);

    if json {
        tracing_subscriber::registry().with(env_filter).with(base.json()).init();
    } else {
        tracing_subscriber::registry().with(env_filter).with(base.pretty()).init();
    }
}
