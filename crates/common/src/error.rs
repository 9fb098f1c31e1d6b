//! Error types shared across Framewright crates.

use std::path::PathBuf;

/// Top-level error type for Framewright operations.
#[derive(Debug, thiserror::Error)]
pub enum FramewrightError {
    #[error("Decode error: {message}")]
    Decode { message: String },

    #[error("Render error: {message}")]
    Render { message: String },

    #[error("Project error: {message}")]
    Project { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Media item not found: {id}")]
    MediaNotFound { id: String },

    #[error("No decoding backend available: {message}")]
    BackendUnavailable { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using FramewrightError.
pub type FramewrightResult<T> = Result<T, FramewrightError>;

impl FramewrightError {
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode {
            message: msg.into(),
        }
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    pub fn project(msg: impl Into<String>) -> Self {
        Self::Project {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn backend_unavailable(msg: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }

    /// Whether the failure is local to one frame or layer and may succeed on retry.
    ///
    /// Only a missing backend is treated as a setup failure.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::BackendUnavailable { .. } | Self::Config { .. })
    }
}
