//! Framework-wide state: initialization counting, the logger bus, the
//! fatal-error handler and implementation information
//!
//! Everything here is process-wide. It is reachable without `init()`, but
//! the final matching `destroy()` is what tears contexts down, so hosts are
//! expected to bracket framework use with `init()`/`destroy()` pairs.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;

use crate::context::{Context, ContextId};
use crate::descriptor::{DescriptorRef, PluginDescriptor};
use crate::error::MosaicError;
use crate::events::{LogSeverity, LoggerId};

/// Version of the embedding API.
pub const API_VERSION: u32 = 2;
/// Revision of the embedding API within [`API_VERSION`].
pub const API_REVISION: u32 = 0;
/// How many previous API versions this release is compatible with.
pub const API_AGE: u32 = 0;

/// A logger callback: severity, message, originating context (if any).
pub type LoggerFn = Arc<dyn Fn(LogSeverity, &str, Option<ContextId>) + Send + Sync>;

/// Severity floor meaning "no logger wants anything".
const SEVERITY_NONE: u8 = 4;

struct LoggerEntry {
    id: LoggerId,
    callback: LoggerFn,
    min_severity: LogSeverity,
    context: Option<ContextId>,
}

#[derive(Default)]
struct FrameworkState {
    init_count: u32,
    loggers: Vec<LoggerEntry>,
    next_logger_id: u64,
    next_context_id: u64,
    contexts: Vec<Context>,
    issued: Vec<Weak<PluginDescriptor>>,
    fatal_handler: Option<Box<dyn Fn(&str) + Send + Sync>>,
}

fn state() -> &'static Mutex<FrameworkState> {
    static STATE: OnceLock<Mutex<FrameworkState>> = OnceLock::new();
    STATE.get_or_init(|| Mutex::new(FrameworkState::default()))
}

/// Cache of the lowest registered logger severity, so filtered-out messages
/// skip formatting without taking the framework lock.
static LOG_FLOOR: AtomicU8 = AtomicU8::new(SEVERITY_NONE);

/// Information about this framework build.
#[derive(Debug, Clone)]
pub struct ImplementationInfo {
    /// Crate release version
    pub release_version: &'static str,
    /// Embedding API version
    pub api_version: u32,
    /// Revision within the API version
    pub api_revision: u32,
    /// Number of previous API versions still supported
    pub api_age: u32,
    /// Host platform, `<arch>-<os>`
    pub host: String,
    /// Threading model
    pub threading: &'static str,
}

/// Query release and API version information.
pub fn implementation_info() -> ImplementationInfo {
    ImplementationInfo {
        release_version: env!("CARGO_PKG_VERSION"),
        api_version: API_VERSION,
        api_revision: API_REVISION,
        api_age: API_AGE,
        host: format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS),
        threading: "reentrant-mutex",
    }
}

/// Initialize the framework. Counted: every call must be matched by a
/// [`destroy`] call, and only the last `destroy` tears anything down.
pub fn init() -> Result<(), MosaicError> {
    let mut st = state().lock();
    st.init_count += 1;
    Ok(())
}

/// Release one [`init`] reference. The final release stops and uninstalls
/// every plug-in in every remaining context, destroys the contexts, reports
/// descriptors the host never released, and clears the logger registry.
pub fn destroy() {
    let contexts = {
        let mut st = state().lock();
        if st.init_count == 0 {
            tracing::warn!("framework destroy without matching init");
            return;
        }
        st.init_count -= 1;
        if st.init_count > 0 {
            return;
        }
        std::mem::take(&mut st.contexts)
    };

    logf(
        None,
        LogSeverity::Info,
        format_args!("The plug-in framework is being shut down"),
    );
    // Tear contexts down outside the framework lock: their listeners and
    // loggers re-enter it.
    for context in contexts {
        context.shut_down();
    }

    let mut st = state().lock();
    let leaked: Vec<String> = st
        .issued
        .drain(..)
        .filter_map(|weak| weak.upgrade())
        .map(|desc| desc.identifier.clone())
        .collect();
    st.loggers.clear();
    st.fatal_handler = None;
    drop(st);
    LOG_FLOOR.store(SEVERITY_NONE, Ordering::Relaxed);

    for id in leaked {
        tracing::error!(
            plugin = %id,
            "plug-in descriptor still referenced by the host at framework shutdown"
        );
    }
}

/// Install or clear the fatal-error handler. The handler is invoked for
/// unrecoverable conditions; the process aborts when it returns.
pub fn set_fatal_error_handler(handler: Option<Box<dyn Fn(&str) + Send + Sync>>) {
    state().lock().fatal_handler = handler;
}

/// Report an unrecoverable internal condition and abort the process.
pub(crate) fn fatal(msg: &str) -> ! {
    {
        let st = state().lock();
        if let Some(handler) = st.fatal_handler.as_ref() {
            handler(msg);
        } else {
            eprintln!("mosaic: FATAL ERROR: {msg}");
        }
    }
    std::process::abort();
}

fn recompute_log_floor(st: &FrameworkState) {
    let floor = st
        .loggers
        .iter()
        .map(|l| l.min_severity as u8)
        .min()
        .unwrap_or(SEVERITY_NONE);
    LOG_FLOOR.store(floor, Ordering::Relaxed);
}

/// Register a logger. Messages below `min_severity`, and messages from
/// contexts other than `context` when a filter is given, are not delivered.
pub fn add_logger(
    callback: LoggerFn,
    min_severity: LogSeverity,
    context: Option<ContextId>,
) -> LoggerId {
    let mut st = state().lock();
    st.next_logger_id += 1;
    let id = LoggerId(st.next_logger_id);
    st.loggers.push(LoggerEntry {
        id,
        callback,
        min_severity,
        context,
    });
    recompute_log_floor(&st);
    tracing::debug!(logger = id.0, min_severity = %min_severity, "logger registered");
    id
}

/// Update a registered logger's severity and context filter in place.
/// Returns `false` if the id is no longer registered.
pub fn update_logger(
    id: LoggerId,
    min_severity: LogSeverity,
    context: Option<ContextId>,
) -> bool {
    let mut st = state().lock();
    let Some(entry) = st.loggers.iter_mut().find(|l| l.id == id) else {
        return false;
    };
    entry.min_severity = min_severity;
    entry.context = context;
    recompute_log_floor(&st);
    true
}

/// Remove a registered logger. Unknown ids are ignored.
pub fn remove_logger(id: LoggerId) {
    let mut st = state().lock();
    st.loggers.retain(|l| l.id != id);
    recompute_log_floor(&st);
    tracing::debug!(logger = id.0, "logger removed");
}

/// Whether any registered logger wants messages of this severity.
pub(crate) fn is_logged(severity: LogSeverity) -> bool {
    severity as u8 >= LOG_FLOOR.load(Ordering::Relaxed)
}

/// Dispatch a framework message: mirrored to `tracing`, then delivered to
/// every registered logger whose severity and context filter accept it.
/// Formatting is deferred, so callers can pass `format_args!` unconditionally.
pub(crate) fn logf(context: Option<ContextId>, severity: LogSeverity, args: std::fmt::Arguments<'_>) {
    match severity {
        LogSeverity::Debug => tracing::debug!("{args}"),
        LogSeverity::Info => tracing::info!("{args}"),
        LogSeverity::Warning => tracing::warn!("{args}"),
        LogSeverity::Error => tracing::error!("{args}"),
    }
    if !is_logged(severity) {
        return;
    }
    let msg = args.to_string();
    let st = state().lock();
    for logger in &st.loggers {
        if severity < logger.min_severity {
            continue;
        }
        if let Some(filter) = logger.context
            && context != Some(filter)
        {
            continue;
        }
        (logger.callback)(severity, &msg, context);
    }
}

/// Allocate a context identifier.
pub(crate) fn next_context_id() -> ContextId {
    let mut st = state().lock();
    st.next_context_id += 1;
    ContextId(st.next_context_id)
}

/// Keep a strong handle so the final [`destroy`] can tear the context down.
pub(crate) fn register_context(context: Context) {
    state().lock().contexts.push(context);
}

/// Forget a context that was destroyed explicitly.
pub(crate) fn deregister_context(id: ContextId) {
    state().lock().contexts.retain(|c| c.id() != id);
}

/// Remember a descriptor handed to the host, for the shutdown leak report.
pub(crate) fn track_descriptor(descriptor: &DescriptorRef) {
    let mut st = state().lock();
    st.issued.retain(|weak| weak.strong_count() > 0);
    let already = st
        .issued
        .iter()
        .any(|weak| weak.as_ptr() == Arc::as_ptr(descriptor));
    if !already {
        st.issued.push(Arc::downgrade(descriptor));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::AtomicUsize;

    // The logger registry and severity floor are process-wide; serialize the
    // tests that touch them.
    static SERIAL: StdMutex<()> = StdMutex::new(());

    #[test]
    fn implementation_info_is_populated() {
        let info = implementation_info();
        assert!(!info.release_version.is_empty());
        assert_eq!(info.api_version, API_VERSION);
        assert!(info.host.contains('-'));
    }

    #[test]
    fn logger_receives_matching_severity_only() {
        let _guard = SERIAL.lock().unwrap();
        // Filter on a context id no real context can have, so concurrent
        // tests' log traffic cannot reach this logger.
        let scope = ContextId(u64::MAX - 3);
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        let id = add_logger(
            Arc::new(move |severity, _msg, _ctx| {
                assert!(severity >= LogSeverity::Warning);
                hits2.fetch_add(1, Ordering::SeqCst);
            }),
            LogSeverity::Warning,
            Some(scope),
        );

        logf(Some(scope), LogSeverity::Debug, format_args!("quiet"));
        logf(Some(scope), LogSeverity::Warning, format_args!("loud"));
        logf(Some(scope), LogSeverity::Error, format_args!("louder"));
        remove_logger(id);
        logf(Some(scope), LogSeverity::Error, format_args!("after removal"));

        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn severity_floor_tracks_registrations() {
        let _guard = SERIAL.lock().unwrap();
        assert!(!is_logged(LogSeverity::Error));

        let id = add_logger(Arc::new(|_, _, _| {}), LogSeverity::Info, None);
        assert!(is_logged(LogSeverity::Info));
        assert!(!is_logged(LogSeverity::Debug));

        assert!(update_logger(id, LogSeverity::Debug, None));
        assert!(is_logged(LogSeverity::Debug));

        remove_logger(id);
        assert!(!is_logged(LogSeverity::Error));
    }

    #[test]
    fn update_of_removed_logger_reports_false() {
        let _guard = SERIAL.lock().unwrap();
        let id = add_logger(Arc::new(|_, _, _| {}), LogSeverity::Error, None);
        remove_logger(id);
        assert!(!update_logger(id, LogSeverity::Debug, None));
    }

    #[test]
    fn context_filtered_logger_ignores_other_contexts() {
        let _guard = SERIAL.lock().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        let watched = ContextId(u64::MAX - 1);
        let other = ContextId(u64::MAX - 2);
        let id = add_logger(
            Arc::new(move |_, _, ctx| {
                assert_eq!(ctx, Some(watched));
                hits2.fetch_add(1, Ordering::SeqCst);
            }),
            LogSeverity::Debug,
            Some(watched),
        );

        logf(Some(watched), LogSeverity::Info, format_args!("seen"));
        logf(Some(other), LogSeverity::Info, format_args!("unseen"));
        logf(None, LogSeverity::Info, format_args!("unseen too"));
        remove_logger(id);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    // Counted init/destroy is covered by the framework_shutdown
    // integration test, which owns its process: the final destroy tears
    // down every context in the registry and would race the other module
    // tests here.
}
