//! Framewright Common Utilities
//!
//! Shared infrastructure for all Framewright crates:
//! - Error types and result aliases
//! - Frame quantization and the shared playback clock
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
