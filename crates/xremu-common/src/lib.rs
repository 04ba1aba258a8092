//! Shared utilities for xremu: settings, logging, error types.
//!
//! This crate provides the infrastructure shared by the device runtime and
//! the command line driver: the control protocol spoken by the devtool side,
//! the persisted emulator settings and the key-value store they live in.

#![forbid(unsafe_code)]

pub mod error;
pub mod protocol;
pub mod settings;
pub mod storage;

pub use error::{Error, Result};
pub use protocol::*;
pub use settings::EmulatorSettings;
pub use storage::{JsonFileStore, KeyValueStore, MemoryStore};

/// Initialize tracing with sensible defaults.
///
/// Log level is controlled by the `RUST_LOG` environment variable.
/// Defaults to `info` if not set.
pub fn init_tracing() {
    init_tracing_with_default("info");
}

/// Initialize tracing with a specific default level.
pub fn init_tracing_with_default(default_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // Logs go to stderr so stdout stays free for the client protocol.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}
