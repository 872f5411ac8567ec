//! Error type for plug-in start callbacks

use thiserror::Error;

/// Errors a plug-in start function can report.
///
/// The host only sees a numeric failure status across the ABI; this type
/// exists so plug-in code can use `?` internally and still produce a
/// readable message on the plug-in side of the boundary.
#[derive(Error, Debug)]
pub enum StartError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A resource the plug-in needs is unavailable
    #[error("Resource unavailable: {0}")]
    Unavailable(String),

    /// Custom error with message
    #[error("{0}")]
    Custom(String),
}

impl StartError {
    /// Create a custom error with a message
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
