//! Plug-in contexts
//!
//! A [`Context`] is an isolated registry of plug-ins, extension points and
//! extensions with its own re-entrant lock. Contexts do not share state;
//! operations on different contexts never order against each other.
//!
//! Locking discipline: every mutating operation acquires the context lock on
//! entry and holds it until it returns. State-change events and log messages
//! are delivered while the lock is held; re-acquisition by the lock-owning
//! thread is counted, so listeners and plug-in callbacks may call back into
//! the same context. Mutable state lives in a `RefCell` inside the lock and
//! is only borrowed for short, callback-free sections, which is what makes
//! that re-entry safe.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::descriptor::{ConfigElement, DescriptorRef};
use crate::error::MosaicError;
use crate::events::{ListenerId, LogSeverity, PluginEvent, PluginState};
use crate::framework;
use crate::lifecycle;
use crate::loader::{DynLoader, PluginRuntime, RuntimeLoader, StartFn, StopFn};
use crate::parser::{DescriptorParser, TomlDescriptorParser};
use crate::scan::ScanFlags;

/// Identifies a context, for logger filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub(crate) u64);

/// A state-change listener.
pub(crate) type ListenerFn = Arc<dyn Fn(&PluginEvent) + Send + Sync>;

/// Collaborators a context is created with.
///
/// The defaults cover the common case: native libraries through the platform
/// dynamic linker and descriptors from `plugin.toml` documents. Tests and
/// embedders with their own packaging substitute both.
#[derive(Clone)]
pub struct ContextConfig {
    /// Opens plug-in runtime libraries
    pub loader: Arc<dyn RuntimeLoader>,
    /// Turns plug-in directories into descriptors
    pub parser: Arc<dyn DescriptorParser>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            loader: Arc::new(DynLoader),
            parser: Arc::new(TomlDescriptorParser),
        }
    }
}

/// Per-context state of one installed plug-in.
pub(crate) struct RegisteredPlugin {
    pub(crate) descriptor: DescriptorRef,
    pub(crate) state: PluginState,
    /// Arena slots of the plug-ins this one imports (outgoing edges)
    pub(crate) imported: Vec<usize>,
    /// Arena slots of the plug-ins importing this one (incoming edges)
    pub(crate) importing: Vec<usize>,
    pub(crate) start_fn: Option<StartFn>,
    pub(crate) stop_fn: Option<StopFn>,
    /// Open runtime library, while resolved. Declared after the resolved
    /// entry points so they are dropped before the library closes.
    pub(crate) runtime: Option<Box<dyn PluginRuntime>>,
}

impl RegisteredPlugin {
    fn new(descriptor: DescriptorRef) -> Self {
        Self {
            descriptor,
            state: PluginState::Installed,
            imported: Vec::new(),
            importing: Vec::new(),
            start_fn: None,
            stop_fn: None,
            runtime: None,
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.descriptor.identifier
    }
}

struct ExtensionPointEntry {
    descriptor: DescriptorRef,
    /// Index into `descriptor.extension_points`
    index: usize,
}

struct ExtensionEntry {
    descriptor: DescriptorRef,
    /// Index into `descriptor.extensions`
    index: usize,
}

/// The mutable state behind the context lock.
pub(crate) struct ContextState {
    /// Arena of registered plug-ins; edges are arena indices
    plugins: Vec<Option<RegisteredPlugin>>,
    free_slots: Vec<usize>,
    by_id: HashMap<String, usize>,
    ext_points: HashMap<String, ExtensionPointEntry>,
    extensions: HashMap<String, Vec<ExtensionEntry>>,
    /// Slots of ACTIVE plug-ins, in the order they entered ACTIVE
    pub(crate) started: Vec<usize>,
    dirs: Vec<PathBuf>,
    listeners: Vec<(ListenerId, ListenerFn)>,
    next_listener_id: u64,
    pub(crate) start_invocations: u32,
    pub(crate) stop_invocations: u32,
    destroyed: bool,
}

impl ContextState {
    fn new() -> Self {
        Self {
            plugins: Vec::new(),
            free_slots: Vec::new(),
            by_id: HashMap::new(),
            ext_points: HashMap::new(),
            extensions: HashMap::new(),
            started: Vec::new(),
            dirs: Vec::new(),
            listeners: Vec::new(),
            next_listener_id: 0,
            start_invocations: 0,
            stop_invocations: 0,
            destroyed: false,
        }
    }

    pub(crate) fn slot_of(&self, id: &str) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    /// The record in `slot`. A vacant slot here means the registry broke an
    /// invariant, which is unrecoverable.
    pub(crate) fn plugin(&self, slot: usize) -> &RegisteredPlugin {
        match self.plugins.get(slot).and_then(Option::as_ref) {
            Some(plugin) => plugin,
            None => framework::fatal("plug-in registry refers to a vacant arena slot"),
        }
    }

    pub(crate) fn plugin_mut(&mut self, slot: usize) -> &mut RegisteredPlugin {
        match self.plugins.get_mut(slot).and_then(Option::as_mut) {
            Some(plugin) => plugin,
            None => framework::fatal("plug-in registry refers to a vacant arena slot"),
        }
    }

    /// Whether `slot` still holds a live record. Stale indices can appear
    /// when a listener mutates the context mid-traversal.
    pub(crate) fn is_live(&self, slot: usize) -> bool {
        self.plugins.get(slot).is_some_and(Option::is_some)
    }

    pub(crate) fn slots(&self) -> Vec<usize> {
        (0..self.plugins.len())
            .filter(|&slot| self.plugins[slot].is_some())
            .collect()
    }

    fn insert(&mut self, plugin: RegisteredPlugin) -> usize {
        let id = plugin.id().to_string();
        let slot = match self.free_slots.pop() {
            Some(slot) => {
                self.plugins[slot] = Some(plugin);
                slot
            }
            None => {
                self.plugins.push(Some(plugin));
                self.plugins.len() - 1
            }
        };
        self.by_id.insert(id, slot);
        slot
    }

    pub(crate) fn remove(&mut self, slot: usize) -> RegisteredPlugin {
        let Some(plugin) = self.plugins.get_mut(slot).and_then(Option::take) else {
            framework::fatal("removing a vacant plug-in arena slot")
        };
        self.by_id.remove(plugin.id());
        self.free_slots.push(slot);
        plugin
    }

    /// Drop every extension point and extension registered by the plug-in
    /// in `slot`. Only entries still owned by this plug-in's descriptor are
    /// touched.
    pub(crate) fn unregister_extensions(&mut self, slot: usize) {
        let descriptor = Arc::clone(&self.plugin(slot).descriptor);
        for point in &descriptor.extension_points {
            let global = point.global_id(&descriptor.identifier);
            if let Some(entry) = self.ext_points.get(&global)
                && Arc::ptr_eq(&entry.descriptor, &descriptor)
            {
                self.ext_points.remove(&global);
            }
        }
        for ext in &descriptor.extensions {
            let drained = self.extensions.get_mut(&ext.point).map(|list| {
                list.retain(|entry| !Arc::ptr_eq(&entry.descriptor, &descriptor));
                list.is_empty()
            });
            if drained == Some(true) {
                self.extensions.remove(&ext.point);
            }
        }
    }
}

struct ContextInner {
    id: ContextId,
    loader: Arc<dyn RuntimeLoader>,
    parser: Arc<dyn DescriptorParser>,
    lock: ReentrantMutex<RefCell<ContextState>>,
}

/// Handle on a plug-in context. Cheap to clone; all clones refer to the same
/// context. Destruction is explicit through [`Context::destroy`]; contexts
/// left behind are destroyed by the final `framework::destroy()`.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context").field("id", &self.inner.id.0).finish()
    }
}

/// Information about a registered extension point.
#[derive(Debug, Clone)]
pub struct ExtensionPointInfo {
    /// Plug-in that declared the point
    pub plugin_id: String,
    /// Context-wide identifier
    pub global_id: String,
    /// Display name, if any
    pub name: Option<String>,
    /// Schema path relative to the declaring plug-in's install path
    pub schema_path: Option<PathBuf>,
}

/// Information about a registered extension.
#[derive(Debug, Clone)]
pub struct ExtensionInfo {
    /// Plug-in that contributed the extension
    pub plugin_id: String,
    /// Context-wide identifier, when the extension declared a local id
    pub global_id: Option<String>,
    /// Global identifier of the target extension point
    pub point: String,
    /// Display name, if any
    pub name: Option<String>,
    /// The extension's configuration tree
    pub configuration: ConfigElement,
}

impl Context {
    /// Create a context with the given collaborators. The context is empty:
    /// no directories, no plug-ins, no listeners.
    pub fn new(config: ContextConfig) -> Self {
        let context = Self {
            inner: Arc::new(ContextInner {
                id: framework::next_context_id(),
                loader: config.loader,
                parser: config.parser,
                lock: ReentrantMutex::new(RefCell::new(ContextState::new())),
            }),
        };
        framework::register_context(context.clone());
        context.log(LogSeverity::Debug, format_args!("plug-in context created"));
        context
    }

    /// This context's identifier, usable as a logger filter.
    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    /// Destroy the context: stop and uninstall every plug-in, then drop the
    /// framework's handle on it. Not allowed from a start or stop callback.
    pub fn destroy(&self) -> Result<(), MosaicError> {
        let _guard = self.lock();
        self.check_invocation("destroy")?;
        if self.with_state(|st| std::mem::replace(&mut st.destroyed, true)) {
            return Ok(());
        }
        lifecycle::uninstall_all(self);
        framework::deregister_context(self.inner.id);
        self.log(LogSeverity::Debug, format_args!("plug-in context destroyed"));
        Ok(())
    }

    /// Teardown path used by the final `framework::destroy()`.
    pub(crate) fn shut_down(&self) {
        let _guard = self.lock();
        if self.with_state(|st| std::mem::replace(&mut st.destroyed, true)) {
            return;
        }
        lifecycle::uninstall_all(self);
    }

    // ─── Directories ─────────────────────────────────────────────────

    /// Register a directory to scan for plug-ins. Adding the same path twice
    /// is idempotent; paths are kept verbatim.
    pub fn add_plugin_dir(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let _guard = self.lock();
        self.with_state(|st| {
            if !st.dirs.contains(&path) {
                st.dirs.push(path);
            }
        });
    }

    /// Remove a registered plug-in directory. Unknown paths are ignored.
    pub fn remove_plugin_dir(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let _guard = self.lock();
        self.with_state(|st| st.dirs.retain(|d| d != path));
    }

    pub(crate) fn plugin_dirs(&self) -> Vec<PathBuf> {
        let _guard = self.lock();
        self.with_state(|st| st.dirs.clone())
    }

    // ─── Descriptors and installation ────────────────────────────────

    /// Parse the plug-in descriptor in `path` without installing it. The
    /// returned handle stays valid until dropped, independent of any later
    /// install or uninstall.
    pub fn load_descriptor(&self, path: impl AsRef<Path>) -> Result<DescriptorRef, MosaicError> {
        let path = path.as_ref();
        let descriptor = self.inner.parser.parse(path).map_err(|err| {
            self.log(
                LogSeverity::Error,
                format_args!("failed to load plug-in descriptor from {}: {err}", path.display()),
            );
            err
        })?;
        descriptor.validate()?;
        let descriptor: DescriptorRef = Arc::new(descriptor);
        framework::track_descriptor(&descriptor);
        Ok(descriptor)
    }

    /// Install a plug-in from its descriptor. The new plug-in enters
    /// INSTALLED; its extension points and extensions are registered with
    /// the context. On any failure the context is left exactly as it was.
    pub fn install(&self, descriptor: DescriptorRef) -> Result<(), MosaicError> {
        let _guard = self.lock();
        descriptor.validate()?;
        framework::track_descriptor(&descriptor);
        let id = descriptor.identifier.clone();

        let installed = self.with_state(|st| {
            if st.by_id.contains_key(&id) {
                return Err(MosaicError::PluginConflict { id: id.clone() });
            }
            let slot = st.insert(RegisteredPlugin::new(Arc::clone(&descriptor)));

            // Register extension points; a global-id collision aborts the
            // whole install and rolls back everything registered so far.
            for (index, point) in descriptor.extension_points.iter().enumerate() {
                let global = point.global_id(&id);
                if st.ext_points.contains_key(&global) {
                    for earlier in &descriptor.extension_points[..index] {
                        st.ext_points.remove(&earlier.global_id(&id));
                    }
                    st.remove(slot);
                    return Err(MosaicError::ExtensionPointConflict {
                        plugin: id.clone(),
                        point: global,
                    });
                }
                st.ext_points.insert(
                    global,
                    ExtensionPointEntry {
                        descriptor: Arc::clone(&descriptor),
                        index,
                    },
                );
            }

            // Extensions may target points that are not registered yet; the
            // contribution is recorded either way.
            for (index, ext) in descriptor.extensions.iter().enumerate() {
                st.extensions
                    .entry(ext.point.clone())
                    .or_default()
                    .push(ExtensionEntry {
                        descriptor: Arc::clone(&descriptor),
                        index,
                    });
            }
            Ok(())
        });

        match installed {
            Ok(()) => {
                self.deliver_event(PluginEvent {
                    plugin_id: id,
                    old_state: PluginState::Uninstalled,
                    new_state: PluginState::Installed,
                });
                Ok(())
            }
            Err(err) => {
                self.log(
                    LogSeverity::Error,
                    format_args!("plug-in {id} could not be installed: {err}"),
                );
                Err(err)
            }
        }
    }

    /// Scan the registered plug-in directories and install what they
    /// contain, honoring `flags`.
    pub fn scan(&self, flags: ScanFlags) -> Result<(), MosaicError> {
        crate::scan::scan(self, flags)
    }

    // ─── Lifecycle operations ────────────────────────────────────────

    /// Start a plug-in, resolving and starting its imports first.
    pub fn start(&self, id: &str) -> Result<(), MosaicError> {
        let _guard = self.lock();
        let Some(slot) = self.with_state(|st| st.slot_of(id)) else {
            self.log(
                LogSeverity::Warning,
                format_args!("unknown plug-in {id} could not be started"),
            );
            return Err(MosaicError::Unknown { id: id.to_string() });
        };
        lifecycle::start_plugin(self, slot)
    }

    /// Stop a plug-in, stopping its dependents first. Stopping never fails;
    /// the only error is an unknown identifier.
    pub fn stop(&self, id: &str) -> Result<(), MosaicError> {
        let _guard = self.lock();
        let Some(slot) = self.with_state(|st| st.slot_of(id)) else {
            self.log(
                LogSeverity::Warning,
                format_args!("unknown plug-in {id} could not be stopped"),
            );
            return Err(MosaicError::Unknown { id: id.to_string() });
        };
        lifecycle::stop_plugin(self, slot);
        Ok(())
    }

    /// Stop every active plug-in, dependents before their dependencies.
    pub fn stop_all(&self) {
        let _guard = self.lock();
        lifecycle::stop_all(self);
    }

    /// Stop, unresolve and remove a plug-in. Not allowed from a start or
    /// stop callback.
    pub fn uninstall(&self, id: &str) -> Result<(), MosaicError> {
        let _guard = self.lock();
        self.check_invocation("uninstall")?;
        let Some(slot) = self.with_state(|st| st.slot_of(id)) else {
            self.log(
                LogSeverity::Warning,
                format_args!("unknown plug-in {id} could not be uninstalled"),
            );
            return Err(MosaicError::Unknown { id: id.to_string() });
        };
        lifecycle::uninstall_plugin(self, slot);
        Ok(())
    }

    /// Stop and uninstall every plug-in. Not allowed from a start or stop
    /// callback.
    pub fn uninstall_all(&self) -> Result<(), MosaicError> {
        let _guard = self.lock();
        self.check_invocation("uninstall_all")?;
        lifecycle::uninstall_all(self);
        Ok(())
    }

    // ─── Queries ─────────────────────────────────────────────────────

    /// Current state of a plug-in.
    pub fn plugin_state(&self, id: &str) -> Result<PluginState, MosaicError> {
        let _guard = self.lock();
        self.with_state(|st| {
            st.slot_of(id)
                .map(|slot| st.plugin(slot).state)
                .ok_or_else(|| MosaicError::Unknown { id: id.to_string() })
        })
    }

    /// A counted handle on an installed plug-in's descriptor. The handle
    /// stays valid after uninstall, until dropped.
    pub fn plugin_info(&self, id: &str) -> Result<DescriptorRef, MosaicError> {
        let _guard = self.lock();
        let descriptor = self.with_state(|st| {
            st.slot_of(id)
                .map(|slot| Arc::clone(&st.plugin(slot).descriptor))
                .ok_or_else(|| MosaicError::Unknown { id: id.to_string() })
        })?;
        framework::track_descriptor(&descriptor);
        Ok(descriptor)
    }

    /// Handles on every installed plug-in's descriptor. The list is built
    /// atomically under the context lock.
    pub fn plugin_infos(&self) -> Vec<DescriptorRef> {
        let _guard = self.lock();
        let descriptors = self.with_state(|st| {
            st.slots()
                .into_iter()
                .map(|slot| Arc::clone(&st.plugin(slot).descriptor))
                .collect::<Vec<_>>()
        });
        for descriptor in &descriptors {
            framework::track_descriptor(descriptor);
        }
        descriptors
    }

    /// Look up a registered extension point by global identifier.
    pub fn extension_point(&self, global_id: &str) -> Option<ExtensionPointInfo> {
        let _guard = self.lock();
        self.with_state(|st| {
            st.ext_points.get(global_id).map(|entry| {
                let point = &entry.descriptor.extension_points[entry.index];
                ExtensionPointInfo {
                    plugin_id: entry.descriptor.identifier.clone(),
                    global_id: global_id.to_string(),
                    name: point.name.clone(),
                    schema_path: point.schema_path.clone(),
                }
            })
        })
    }

    /// Every registered extension point, in no particular order.
    pub fn extension_points(&self) -> Vec<ExtensionPointInfo> {
        let _guard = self.lock();
        self.with_state(|st| {
            st.ext_points
                .iter()
                .map(|(global_id, entry)| {
                    let point = &entry.descriptor.extension_points[entry.index];
                    ExtensionPointInfo {
                        plugin_id: entry.descriptor.identifier.clone(),
                        global_id: global_id.clone(),
                        name: point.name.clone(),
                        schema_path: point.schema_path.clone(),
                    }
                })
                .collect()
        })
    }

    /// The extensions attached to an extension point, in installation
    /// order. Extensions recorded before their target point registers are
    /// included.
    pub fn extensions_for(&self, point_global_id: &str) -> Vec<ExtensionInfo> {
        let _guard = self.lock();
        self.with_state(|st| {
            st.extensions
                .get(point_global_id)
                .map(|list| list.iter().map(extension_info).collect())
                .unwrap_or_default()
        })
    }

    /// Every recorded extension.
    pub fn extensions(&self) -> Vec<ExtensionInfo> {
        let _guard = self.lock();
        self.with_state(|st| {
            st.extensions
                .values()
                .flat_map(|list| list.iter().map(extension_info))
                .collect()
        })
    }

    // ─── Listeners ───────────────────────────────────────────────────

    /// Register a state-change listener. Listeners run synchronously, in
    /// registration order, on the thread that caused the transition, while
    /// the context lock is held.
    pub fn add_listener(
        &self,
        listener: impl Fn(&PluginEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        let _guard = self.lock();
        self.with_state(|st| {
            st.next_listener_id += 1;
            let id = ListenerId(st.next_listener_id);
            st.listeners.push((id, Arc::new(listener)));
            id
        })
    }

    /// Remove a state-change listener. Unknown ids are ignored.
    pub fn remove_listener(&self, id: ListenerId) {
        let _guard = self.lock();
        self.with_state(|st| st.listeners.retain(|(lid, _)| *lid != id));
    }

    // ─── Internal plumbing ───────────────────────────────────────────

    pub(crate) fn lock(&self) -> ReentrantMutexGuard<'_, RefCell<ContextState>> {
        self.inner.lock.lock()
    }

    /// Run `f` over the locked state. The borrow lasts exactly for `f`;
    /// never invoke listeners, plug-in callbacks or the loader from inside.
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut ContextState) -> R) -> R {
        let guard = self.inner.lock.lock();
        let result = f(&mut guard.borrow_mut());
        result
    }

    pub(crate) fn loader(&self) -> &Arc<dyn RuntimeLoader> {
        &self.inner.loader
    }

    pub(crate) fn parser(&self) -> &Arc<dyn DescriptorParser> {
        &self.inner.parser
    }

    /// Reject operations that must not run from inside a plug-in's start or
    /// stop callback. Only the lock-owning thread can observe the counters
    /// non-zero, which scopes the check to the current executor.
    fn check_invocation(&self, operation: &'static str) -> Result<(), MosaicError> {
        let in_callback =
            self.with_state(|st| st.start_invocations > 0 || st.stop_invocations > 0);
        if in_callback {
            self.log(
                LogSeverity::Error,
                format_args!("{operation} called from a plug-in start or stop callback"),
            );
            return Err(MosaicError::InvalidInvocation { operation });
        }
        Ok(())
    }

    /// Move the plug-in in `slot` to `new_state` and deliver the event.
    pub(crate) fn transition(&self, slot: usize, new_state: PluginState) {
        let (plugin_id, old_state) = self.with_state(|st| {
            let plugin = st.plugin_mut(slot);
            let old = std::mem::replace(&mut plugin.state, new_state);
            (plugin.id().to_string(), old)
        });
        self.deliver_event(PluginEvent {
            plugin_id,
            old_state,
            new_state,
        });
    }

    /// Deliver an event to the registered listeners, in registration order,
    /// with the lock held but no state borrow active.
    pub(crate) fn deliver_event(&self, event: PluginEvent) {
        let _guard = self.lock();
        tracing::debug!(
            plugin = %event.plugin_id,
            from = %event.old_state,
            to = %event.new_state,
            "plug-in state changed"
        );
        let listeners: Vec<ListenerFn> = self.with_state(|st| {
            st.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
        });
        for listener in listeners {
            listener(&event);
        }
    }

    /// Invoke the plug-in's start function, if any, under the start
    /// invocation counter. Returns whether the plug-in may enter ACTIVE.
    pub(crate) fn call_start(&self, slot: usize) -> bool {
        let Some(start) = self.with_state(|st| st.plugin(slot).start_fn.clone()) else {
            return true;
        };
        self.with_state(|st| st.start_invocations += 1);
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| start()));
        self.with_state(|st| st.start_invocations -= 1);
        match outcome {
            Ok(ok) => ok,
            Err(_) => {
                let id = self.with_state(|st| st.plugin(slot).id().to_string());
                self.log(
                    LogSeverity::Error,
                    format_args!("plug-in {id} panicked in its start function"),
                );
                false
            }
        }
    }

    /// Invoke the plug-in's stop function, if any, under the stop invocation
    /// counter. Stop cannot veto the transition; panics are contained.
    pub(crate) fn call_stop(&self, slot: usize) {
        let Some(stop) = self.with_state(|st| st.plugin(slot).stop_fn.clone()) else {
            return;
        };
        self.with_state(|st| st.stop_invocations += 1);
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| stop()));
        self.with_state(|st| st.stop_invocations -= 1);
        if outcome.is_err() {
            let id = self.with_state(|st| st.plugin(slot).id().to_string());
            self.log(
                LogSeverity::Error,
                format_args!("plug-in {id} panicked in its stop function"),
            );
        }
    }

    pub(crate) fn log(&self, severity: LogSeverity, args: std::fmt::Arguments<'_>) {
        framework::logf(Some(self.inner.id), severity, args);
    }
}

fn extension_info(entry: &ExtensionEntry) -> ExtensionInfo {
    let ext = &entry.descriptor.extensions[entry.index];
    ExtensionInfo {
        plugin_id: entry.descriptor.identifier.clone(),
        global_id: ext.global_id(&entry.descriptor.identifier),
        point: ext.point.clone(),
        name: ext.name.clone(),
        configuration: ext.configuration.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Extension, ExtensionPoint, PluginDescriptor};
    use std::sync::Mutex;

    fn descriptor(id: &str) -> PluginDescriptor {
        PluginDescriptor {
            identifier: id.to_string(),
            version: None,
            provider_name: None,
            install_path: PathBuf::from("/plugins").join(id),
            imports: Vec::new(),
            runtime: None,
            extension_points: Vec::new(),
            extensions: Vec::new(),
        }
    }

    fn point(local_id: &str) -> ExtensionPoint {
        ExtensionPoint {
            local_id: local_id.to_string(),
            name: None,
            schema_path: None,
        }
    }

    fn extension(target: &str) -> Extension {
        Extension {
            local_id: None,
            point: target.to_string(),
            name: None,
            configuration: ConfigElement::default(),
        }
    }

    fn new_context() -> Context {
        Context::new(ContextConfig::default())
    }

    #[test]
    fn install_registers_plugin_and_extensions() {
        let ctx = new_context();
        let mut desc = descriptor("org.example.a");
        desc.extension_points = vec![point("sinks")];
        desc.extensions = vec![extension("org.example.a.sinks")];
        ctx.install(Arc::new(desc)).unwrap();

        assert_eq!(
            ctx.plugin_state("org.example.a").unwrap(),
            PluginState::Installed
        );
        let info = ctx.extension_point("org.example.a.sinks").unwrap();
        assert_eq!(info.plugin_id, "org.example.a");
        assert_eq!(ctx.extensions_for("org.example.a.sinks").len(), 1);
        ctx.destroy().unwrap();
    }

    #[test]
    fn duplicate_id_is_a_conflict() {
        let ctx = new_context();
        ctx.install(Arc::new(descriptor("org.example.a"))).unwrap();
        let err = ctx.install(Arc::new(descriptor("org.example.a"))).unwrap_err();
        assert!(matches!(err, MosaicError::PluginConflict { .. }));
        ctx.destroy().unwrap();
    }

    #[test]
    fn extension_point_conflict_rolls_back_whole_install() {
        let ctx = new_context();
        let mut first = descriptor("org.example.a");
        first.extension_points = vec![point("shared")];
        ctx.install(Arc::new(first)).unwrap();

        // Same global id: "org.example.a.shared" cannot collide with another
        // plug-in's point, so collide through the declaring plug-in id.
        let mut second = descriptor("org.example.a");
        second.extension_points = vec![point("other"), point("shared")];
        let err = ctx.install(Arc::new(second)).unwrap_err();
        assert!(matches!(err, MosaicError::PluginConflict { .. }));

        // A genuinely conflicting point from a different plug-in: register a
        // point whose global id equals an existing one by crafting ids.
        let mut third = descriptor("org.example");
        third.extension_points = vec![point("a.shared")];
        let err = ctx.install(Arc::new(third)).unwrap_err();
        assert!(matches!(err, MosaicError::ExtensionPointConflict { .. }));
        // Rollback: the conflicting plug-in is not registered at all.
        assert!(ctx.plugin_state("org.example").is_err());
        assert!(ctx.extension_point("org.example.a.shared").is_some());
        ctx.destroy().unwrap();
    }

    #[test]
    fn late_bound_extensions_are_recorded() {
        let ctx = new_context();
        let mut contributor = descriptor("org.example.b");
        contributor.extensions = vec![extension("org.example.a.sinks")];
        ctx.install(Arc::new(contributor)).unwrap();

        // Target point not registered yet; the contribution is visible.
        assert_eq!(ctx.extensions_for("org.example.a.sinks").len(), 1);
        assert!(ctx.extension_point("org.example.a.sinks").is_none());

        let mut provider = descriptor("org.example.a");
        provider.extension_points = vec![point("sinks")];
        ctx.install(Arc::new(provider)).unwrap();
        assert!(ctx.extension_point("org.example.a.sinks").is_some());
        ctx.destroy().unwrap();
    }

    #[test]
    fn uninstall_restores_prior_maps() {
        let ctx = new_context();
        let mut desc = descriptor("org.example.a");
        desc.extension_points = vec![point("sinks")];
        desc.extensions = vec![extension("org.example.elsewhere.stages")];
        ctx.install(Arc::new(desc)).unwrap();
        ctx.uninstall("org.example.a").unwrap();

        assert!(ctx.plugin_state("org.example.a").is_err());
        assert!(ctx.extension_point("org.example.a.sinks").is_none());
        assert!(ctx.extensions_for("org.example.elsewhere.stages").is_empty());
        assert!(ctx.plugin_infos().is_empty());
        ctx.destroy().unwrap();
    }

    #[test]
    fn install_event_is_delivered_in_order() {
        let ctx = new_context();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener = ctx.add_listener(move |event| {
            sink.lock().unwrap().push((
                event.plugin_id.clone(),
                event.old_state,
                event.new_state,
            ));
        });

        ctx.install(Arc::new(descriptor("org.example.a"))).unwrap();
        ctx.remove_listener(listener);
        ctx.install(Arc::new(descriptor("org.example.b"))).unwrap();

        let events = seen.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![(
                "org.example.a".to_string(),
                PluginState::Uninstalled,
                PluginState::Installed
            )]
        );
        ctx.destroy().unwrap();
    }

    #[test]
    fn directories_are_deduplicated() {
        let ctx = new_context();
        ctx.add_plugin_dir("/tmp/plugins");
        ctx.add_plugin_dir("/tmp/plugins");
        ctx.add_plugin_dir("/tmp/other");
        assert_eq!(ctx.plugin_dirs().len(), 2);
        ctx.remove_plugin_dir("/tmp/plugins");
        assert_eq!(ctx.plugin_dirs(), vec![PathBuf::from("/tmp/other")]);
        ctx.destroy().unwrap();
    }

    #[test]
    fn descriptor_handle_survives_uninstall() {
        let ctx = new_context();
        ctx.install(Arc::new(descriptor("org.example.a"))).unwrap();
        let handle = ctx.plugin_info("org.example.a").unwrap();
        ctx.uninstall("org.example.a").unwrap();

        assert!(matches!(
            ctx.plugin_info("org.example.a"),
            Err(MosaicError::Unknown { .. })
        ));
        assert_eq!(handle.identifier, "org.example.a");
        ctx.destroy().unwrap();
    }

    #[test]
    fn destroy_is_idempotent() {
        let ctx = new_context();
        ctx.install(Arc::new(descriptor("org.example.a"))).unwrap();
        ctx.destroy().unwrap();
        ctx.destroy().unwrap();
    }
}
