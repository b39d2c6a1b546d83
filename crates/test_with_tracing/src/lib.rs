// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Test attribute that routes `tracing` output of a test through the test
//! harness writer.
//!
//! Use `#[test_with_tracing::test]` (or `use test_with_tracing::test;`) in
//! place of the built-in `#[test]`. The subscriber is installed once per test
//! binary; `RUST_LOG` selects targets, defaulting to `DEBUG` for all of them.

// This is only used by test code and is not a critical part of the client
// library; we allow `expect` usage (but not `unwrap`) here.
#![allow(clippy::expect_used)]

#[cfg(test)]
extern crate self as test_with_tracing;

pub use test_with_tracing_macro::test;
use tracing::metadata::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::prelude::*;

#[doc(hidden)]
/// Initializes `tracing` for tests.
pub fn init() {
    static ONCE: std::sync::Once = std::sync::Once::new();

    ONCE.call_once(|| {
        let targets = if let Ok(var) = std::env::var("RUST_LOG") {
            var.parse()
                .expect("Failed to parse RUST_LOG environment variable")
        } else {
            Targets::new().with_default(LevelFilter::DEBUG)
        };
        tracing_subscriber::fmt()
            .pretty()
            .with_ansi(false) // avoid polluting logs with escape sequences
            .log_internal_errors(true)
            .with_test_writer()
            .with_max_level(LevelFilter::TRACE)
            .with_thread_ids(true)
            .finish()
            .with(targets)
            .init();
    });
}

#[cfg(test)]
mod tests {
    use super::test;

    #[test]
    fn test_tracing_and_log_events() {
        tracing::info!(handle = 7, "queued cipher context");
        log::info!("log records are bridged into the subscriber");
    }

    #[test]
    fn test_with_return() -> Result<(), Box<dyn std::error::Error>> {
        tracing::debug!(bytes = 16, "finalized");
        Ok(())
    }

    #[test]
    fn test_init_is_idempotent() {
        super::init();
        super::init();
        tracing::trace!("subscriber installed once");
    }
}
