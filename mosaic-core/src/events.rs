//! Plug-in states, state-change events and bus identifiers

use std::fmt;

/// Lifecycle state of a registered plug-in.
///
/// The variant order is the state order: comparisons such as
/// `state >= PluginState::Resolved` follow the lifecycle diagram, with
/// `Starting` and `Stopping` sitting between `Resolved` and `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PluginState {
    /// Not registered in the context (terminal)
    Uninstalled,
    /// Registered; imports not bound
    Installed,
    /// Imports bound and runtime library loaded
    Resolved,
    /// Start callback in progress
    Starting,
    /// Stop callback in progress
    Stopping,
    /// Started and running
    Active,
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninstalled => "UNINSTALLED",
            Self::Installed => "INSTALLED",
            Self::Resolved => "RESOLVED",
            Self::Starting => "STARTING",
            Self::Stopping => "STOPPING",
            Self::Active => "ACTIVE",
        };
        f.write_str(name)
    }
}

/// A plug-in state transition, delivered synchronously to context listeners
/// while the context lock is held.
///
/// Listeners observe the post-transition state of the subject plug-in. They
/// must return promptly and should not call mutating operations on the same
/// context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginEvent {
    /// Identifier of the plug-in that changed state
    pub plugin_id: String,
    /// State before the transition
    pub old_state: PluginState,
    /// State after the transition
    pub new_state: PluginState,
}

/// Identifies a registered event listener for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

/// Identifies a registered logger for later update or removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoggerId(pub(crate) u64);

/// Severity of a framework log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogSeverity {
    /// Detailed tracing of framework activity
    Debug,
    /// Noteworthy but expected activity
    Info,
    /// Recoverable problems, such as operations on unknown identifiers
    Warning,
    /// Failed operations
    Error,
}

impl fmt::Display for LogSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}
