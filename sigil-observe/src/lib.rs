//! Logging setup for hosts embedding sigil.
//!
//! The attribution library only emits `tracing` events. This crate installs
//! the global subscriber that renders them:
//! - human-readable or JSON output
//! - `RUST_LOG` overrides the configured filter when set

pub mod logging;

pub use logging::{LogConfig, LogFormat, ObserveError, init_logging};
