//! Mirrorsync - directory mirroring over HTTP
//!
//! A watcher process debounces filesystem changes and pushes file contents,
//! with SHA-256 checksums, to a receiver process that verifies them and
//! writes them atomically into a mirror tree.

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;
pub mod receiver;
pub mod server;
pub mod sync;
pub mod types;

pub use error::{MirrorError, Result};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
