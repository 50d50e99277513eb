//! Logging and tracing configuration
//!
//! Output goes to stderr so the JSON report on stdout stays clean.
//!
//! # Environment Variable Control
//!
//! Set `RUST_LOG` to control log levels at runtime:
//! ```bash
//! RUST_LOG=debug pshistory-extract extract disk.E01
//! RUST_LOG=pshistory_lib::fs=trace pshistory-extract extract disk.dd
//! RUST_LOG=pshistory_lib::image=debug,pshistory_lib::walker=trace pshistory-extract extract disk.dd
//! ```

use std::io;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn default_filter() -> EnvFilter {
    if cfg!(debug_assertions) {
        EnvFilter::new("pshistory_extract=debug,pshistory_lib=debug")
    } else {
        EnvFilter::new("pshistory_extract=info,pshistory_lib=info")
    }
}

/// Initialize the logging/tracing system
///
/// Call this once at startup (in main.rs)
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter());

    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_writer(io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact(),
    );

    // Ignore the error if a subscriber is already installed
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Verbose output with file:line, useful when chasing a corrupt image
pub fn init_verbose() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trace"));

    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_writer(io::stderr)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .pretty(),
    );

    let _ = tracing::subscriber::set_global_default(subscriber);
}
