//! Framework error types and stable status codes

use std::path::PathBuf;
use thiserror::Error;

/// Stable numeric status codes, for hosts that map results onto a C-style
/// status word. `0` is success; every error kind has its own small negative
/// value, exposed through [`MosaicError::code`].
pub mod status {
    /// Operation succeeded.
    pub const OK: i32 = 0;
    /// An allocation or other system resource was exhausted.
    pub const RESOURCE: i32 = -1;
    /// An identifier did not name a registered plug-in.
    pub const UNKNOWN: i32 = -2;
    /// An input/output error occurred.
    pub const IO: i32 = -3;
    /// A descriptor was malformed.
    pub const MALFORMED: i32 = -4;
    /// A plug-in or extension point identifier collided.
    pub const CONFLICT: i32 = -5;
    /// A required import was missing or version-incompatible.
    pub const DEPENDENCY: i32 = -6;
    /// A runtime library failed to load, a symbol was missing, or a start
    /// callback reported failure.
    pub const RUNTIME: i32 = -7;
    /// The operation was invoked from a callback that forbids it.
    pub const INVALID_INVOCATION: i32 = -8;
}

/// Errors surfaced by framework and context operations.
#[derive(Error, Debug)]
pub enum MosaicError {
    /// A system resource was exhausted. Kept for status-code parity; no core
    /// path currently raises it.
    #[error("Insufficient system resources")]
    ResourceExhaustion,

    /// No plug-in with the given identifier is registered
    #[error("Unknown plug-in: {id}")]
    Unknown { id: String },

    /// IO error while scanning or reading a descriptor
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The descriptor is not a valid plug-in description
    #[error("Malformed plug-in descriptor: {reason}")]
    Malformed { reason: String },

    /// A plug-in with the same identifier is already installed
    #[error("Plug-in {id} is already installed")]
    PluginConflict { id: String },

    /// An extension point with the same global identifier is already
    /// registered
    #[error(
        "Extension point {point} of plug-in {plugin} conflicts with an already registered extension point"
    )]
    ExtensionPointConflict { plugin: String, point: String },

    /// A required import does not name an installed plug-in
    #[error("Plug-in {plugin} depends on plug-in {import} which is not installed")]
    DependencyMissing { plugin: String, import: String },

    /// A required import is installed but its version does not satisfy the
    /// match rule
    #[error("Plug-in {plugin} is version-incompatible with plug-in {import}")]
    DependencyVersionMismatch { plugin: String, import: String },

    /// The plug-in's runtime library could not be opened
    #[error("Runtime library {library} of plug-in {plugin} could not be opened: {detail}")]
    RuntimeLoadFailure {
        plugin: String,
        library: PathBuf,
        detail: String,
    },

    /// A start or stop symbol named by the descriptor was not found in the
    /// runtime library
    #[error("Symbol {symbol} of plug-in {plugin} could not be resolved")]
    RuntimeSymbolMissing { plugin: String, symbol: String },

    /// The plug-in's start callback reported failure
    #[error("Plug-in {plugin} failed to start due to runtime error")]
    RuntimeFailure { plugin: String },

    /// The operation is forbidden from inside a start or stop callback
    #[error("Operation {operation} is not allowed from a plug-in start or stop callback")]
    InvalidInvocation { operation: &'static str },
}

impl MosaicError {
    /// The stable status code for this error kind (see [`status`]).
    pub fn code(&self) -> i32 {
        match self {
            Self::ResourceExhaustion => status::RESOURCE,
            Self::Unknown { .. } => status::UNKNOWN,
            Self::Io(_) => status::IO,
            Self::Malformed { .. } => status::MALFORMED,
            Self::PluginConflict { .. } | Self::ExtensionPointConflict { .. } => status::CONFLICT,
            Self::DependencyMissing { .. } | Self::DependencyVersionMismatch { .. } => {
                status::DEPENDENCY
            }
            Self::RuntimeLoadFailure { .. }
            | Self::RuntimeSymbolMissing { .. }
            | Self::RuntimeFailure { .. } => status::RUNTIME,
            Self::InvalidInvocation { .. } => status::INVALID_INVOCATION,
        }
    }

    /// Create a malformed-descriptor error with a reason
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}
