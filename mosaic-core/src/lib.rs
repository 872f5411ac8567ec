//! mosaic-core: a plug-in framework for native, process-embedded
//! extensibility
//!
//! A host creates one or more isolated [`Context`]s, registers plug-in
//! directories, installs the descriptors found there, and drives each
//! plug-in through its lifecycle:
//!
//! ```text
//! UNINSTALLED → INSTALLED → RESOLVED → STARTING → ACTIVE
//!                   ↑           ↑                    │
//!                   └───────────┴─── STOPPING ◄──────┘
//! ```
//!
//! Resolution binds a plug-in's imports (tolerating cyclic import graphs)
//! and loads its native runtime library; starting activates dependencies
//! first; stopping drains dependents first. Plug-ins contribute extension
//! points and extensions other plug-ins and the host can query.
//!
//! # Quick start
//!
//! ```no_run
//! use mosaic_core::{Context, ContextConfig, ScanFlags, framework};
//!
//! fn example() -> Result<(), mosaic_core::MosaicError> {
//!     framework::init()?;
//!     let context = Context::new(ContextConfig::default());
//!     context.add_plugin_dir("/usr/lib/myapp/plugins");
//!     context.scan(ScanFlags::NONE)?;
//!     context.start("org.example.filter")?;
//!     // ...
//!     context.destroy()?;
//!     framework::destroy();
//!     Ok(())
//! }
//! ```
//!
//! # Concurrency
//!
//! Any thread may call into a context; each context serializes its work
//! through one re-entrant lock. State-change events and log messages are
//! delivered synchronously while that lock is held, so listeners must be
//! short and should not mutate the same context. The framework starts no
//! threads of its own.

pub mod context;
pub mod descriptor;
pub mod error;
pub mod events;
pub mod framework;
mod lifecycle;
pub mod loader;
pub mod parser;
mod resolver;
pub mod scan;
pub mod version;

pub use context::{Context, ContextConfig, ContextId, ExtensionInfo, ExtensionPointInfo};
pub use descriptor::{
    ConfigElement, DescriptorRef, Extension, ExtensionPoint, MAX_IDENTIFIER_LEN, PluginDescriptor,
    PluginImport, RuntimeSpec,
};
pub use error::{MosaicError, status};
pub use events::{ListenerId, LogSeverity, LoggerId, PluginEvent, PluginState};
pub use framework::{ImplementationInfo, implementation_info};
pub use loader::{DynLoader, LoaderError, PluginRuntime, RuntimeLoader, StartFn, StopFn};
pub use parser::{DESCRIPTOR_FILE, DescriptorParser, TomlDescriptorParser};
pub use scan::ScanFlags;
pub use version::{Version, VersionMatch};
