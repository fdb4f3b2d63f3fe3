//! Error types shared by every vkinterop crate.

use thiserror::Error;

/// Top-level error for configuration, windowing and I/O concerns.
#[derive(Error, Debug)]
pub enum Error {
    /// Window creation or surface hookup failed.
    #[error("Window error: {0}")]
    Window(String),

    /// Vulkan surface creation failed.
    #[error("Surface error: {0}")]
    Surface(String),

    /// A configuration value was missing, malformed or out of range.
    #[error("Config error: {key}: {message}")]
    Config {
        /// Name of the offending setting.
        key: &'static str,
        /// What was wrong with it.
        message: String,
    },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a configuration error.
    pub fn config(key: &'static str, message: impl Into<String>) -> Self {
        Self::Config {
            key,
            message: message.into(),
        }
    }
}

/// Result type alias using the shared [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
