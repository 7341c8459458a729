//! Tracing subscriber setup for the `tender` binary.
//!
//! Logs go to stderr so stdout stays parseable (JSON feeds, raw documents).
//! `RUST_LOG` overrides the configured filter when set.

use std::io;

use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

pub fn init_logging(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let stderr_log = fmt::layer()
        .with_writer(io::stderr)
        .with_target(true)
        .with_filter(filter);

    // A second init (tests, embedding callers) keeps the first subscriber.
    let _ = tracing_subscriber::registry().with(stderr_log).try_init();
}
