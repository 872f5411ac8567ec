//! Runtime-library loading
//!
//! The core never opens native libraries itself; it goes through the
//! [`RuntimeLoader`] trait so hosts and tests can substitute their own
//! loading strategy. [`DynLoader`] is the default implementation, backed by
//! `libloading`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use mosaic_plugin_api::{START_OK, StartSymbol, StopSymbol};

/// A resolved start entry point. Returns `true` when the plug-in started.
pub type StartFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// A resolved stop entry point.
pub type StopFn = Arc<dyn Fn() + Send + Sync>;

/// Failure to open a runtime library.
#[derive(Error, Debug)]
pub enum LoaderError {
    /// The native loader rejected the library
    #[error(transparent)]
    Native(#[from] libloading::Error),

    /// Any other loader-specific failure
    #[error("{0}")]
    Other(String),
}

/// Opens plug-in runtime libraries.
pub trait RuntimeLoader: Send + Sync {
    /// Open the library at `path` and return a handle that can resolve its
    /// entry points. `path` is the descriptor's library path joined onto the
    /// plug-in's install path.
    fn open(&self, path: &Path) -> Result<Box<dyn PluginRuntime>, LoaderError>;
}

/// An open runtime library.
///
/// Dropping the handle closes the library. The registered plug-in record
/// owns the handle and drops the resolved entry points first, so a resolved
/// function never outlives its library.
pub trait PluginRuntime: Send {
    /// Resolve a start entry point by symbol name.
    fn start_fn(&self, symbol: &str) -> Option<StartFn>;

    /// Resolve a stop entry point by symbol name.
    fn stop_fn(&self, symbol: &str) -> Option<StopFn>;
}

/// The default loader: `libloading` over the platform dynamic linker.
#[derive(Debug, Default)]
pub struct DynLoader;

impl RuntimeLoader for DynLoader {
    fn open(&self, path: &Path) -> Result<Box<dyn PluginRuntime>, LoaderError> {
        let path = with_platform_suffix(path);
        // SAFETY: the host asked for this library by installing a descriptor
        // that names it; initializers run on load as for any dynamic library.
        let library = unsafe { libloading::Library::new(&path)? };
        Ok(Box::new(DynRuntime { library }))
    }
}

struct DynRuntime {
    library: libloading::Library,
}

impl PluginRuntime for DynRuntime {
    fn start_fn(&self, symbol: &str) -> Option<StartFn> {
        // SAFETY: the symbol is declared by the descriptor as a start entry
        // point with the `StartSymbol` signature.
        let sym: libloading::Symbol<'_, StartSymbol> =
            unsafe { self.library.get(symbol.as_bytes()).ok()? };
        let f: StartSymbol = *sym;
        // SAFETY: the raw pointer stays valid while the library is open; the
        // registered record drops this closure before closing the library.
        Some(Arc::new(move || unsafe { f() == START_OK }))
    }

    fn stop_fn(&self, symbol: &str) -> Option<StopFn> {
        // SAFETY: as for `start_fn`, with the `StopSymbol` signature.
        let sym: libloading::Symbol<'_, StopSymbol> =
            unsafe { self.library.get(symbol.as_bytes()).ok()? };
        let f: StopSymbol = *sym;
        Some(Arc::new(move || unsafe { f() }))
    }
}

/// Append the platform dynamic-library suffix when the declared path has no
/// extension, so descriptors can stay platform-neutral.
fn with_platform_suffix(path: &Path) -> PathBuf {
    if path.extension().is_some() {
        return path.to_path_buf();
    }
    let mut name = path.as_os_str().to_os_string();
    name.push(std::env::consts::DLL_SUFFIX);
    PathBuf::from(name)
}
