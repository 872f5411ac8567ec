//! Dependency resolution
//!
//! Resolution is two-phase so that plug-ins with cyclic imports commit or
//! roll back together. Phase one walks the import graph depth-first,
//! recording edges and binding runtime libraries; a plug-in that reaches an
//! ancestor of the walk stays *preliminary*. Phase two commits every
//! preliminary plug-in (dependencies first) once the whole walk has
//! succeeded. On failure the walk is undone: edges recorded for still
//! unresolved plug-ins are removed and their runtime libraries closed.
//!
//! The walk state lives in a per-traversal visited set rather than in the
//! records themselves, so traversals of different contexts never alias.

use std::collections::HashSet;
use std::sync::Arc;

use crate::context::Context;
use crate::error::MosaicError;
use crate::events::{LogSeverity, PluginState};

/// Bring the plug-in in `slot` and its transitive imports to RESOLVED.
/// Idempotent for plug-ins that are already resolved or active.
pub(crate) fn resolve_plugin(ctx: &Context, slot: usize) -> Result<(), MosaicError> {
    let mut visited = HashSet::new();
    match phase1(ctx, slot, &mut visited) {
        Ok(_) => {
            commit(ctx, slot, &mut visited);
            Ok(())
        }
        Err(err) => {
            rollback(ctx, &visited);
            Err(err)
        }
    }
}

/// Depth-first preliminary resolution. Returns whether the plug-in was
/// fully resolved; `false` means it stays preliminary until phase two.
fn phase1(ctx: &Context, slot: usize, visited: &mut HashSet<usize>) -> Result<bool, MosaicError> {
    if ctx.with_state(|st| st.plugin(slot).state) >= PluginState::Resolved {
        return Ok(true);
    }
    if !visited.insert(slot) {
        // Import cycle back to an ancestor of this walk.
        return Ok(false);
    }

    let descriptor = ctx.with_state(|st| Arc::clone(&st.plugin(slot).descriptor));
    let plugin_id = descriptor.identifier.as_str();
    let mut fully_resolved = true;

    for import in &descriptor.imports {
        let target = ctx.with_state(|st| st.slot_of(&import.plugin_id));
        let Some(target) = target else {
            if import.optional {
                continue;
            }
            ctx.log(
                LogSeverity::Error,
                format_args!(
                    "plug-in {plugin_id} could not be resolved because it depends on plug-in {} which is not installed",
                    import.plugin_id
                ),
            );
            return Err(MosaicError::DependencyMissing {
                plugin: plugin_id.to_string(),
                import: import.plugin_id.clone(),
            });
        };

        if let Some(required) = &import.version {
            let provided = ctx.with_state(|st| st.plugin(target).descriptor.version);
            if !import.match_rule.satisfied_by(provided.as_ref(), required) {
                ctx.log(
                    LogSeverity::Error,
                    format_args!(
                        "plug-in {plugin_id} could not be resolved because of version incompatibility with plug-in {}",
                        import.plugin_id
                    ),
                );
                return Err(MosaicError::DependencyVersionMismatch {
                    plugin: plugin_id.to_string(),
                    import: import.plugin_id.clone(),
                });
            }
        }

        // Record both halves of the edge before recursing, so a failing
        // walk can be undone uniformly and cycles see their back edge.
        ctx.with_state(|st| {
            st.plugin_mut(slot).imported.push(target);
            let importing = &mut st.plugin_mut(target).importing;
            if !importing.contains(&slot) {
                importing.push(slot);
            }
        });

        match phase1(ctx, target, visited) {
            Ok(true) => {}
            Ok(false) => fully_resolved = false,
            Err(err) => {
                ctx.log(
                    LogSeverity::Error,
                    format_args!(
                        "plug-in {plugin_id} could not be resolved because it depends on plug-in {} which could not be resolved",
                        import.plugin_id
                    ),
                );
                return Err(err);
            }
        }
    }

    bind_runtime(ctx, slot)?;

    if fully_resolved {
        ctx.transition(slot, PluginState::Resolved);
    }
    Ok(fully_resolved)
}

/// Load the runtime library and resolve the entry points the descriptor
/// names. A plug-in without a runtime library binds trivially.
fn bind_runtime(ctx: &Context, slot: usize) -> Result<(), MosaicError> {
    let (descriptor, already_bound) = ctx.with_state(|st| {
        let plugin = st.plugin(slot);
        (Arc::clone(&plugin.descriptor), plugin.runtime.is_some())
    });
    let Some(spec) = descriptor.runtime.as_ref() else {
        return Ok(());
    };
    if already_bound {
        return Ok(());
    }

    let plugin_id = descriptor.identifier.as_str();
    let library_path = descriptor.install_path.join(&spec.library);
    let runtime = ctx.loader().open(&library_path).map_err(|err| {
        ctx.log(
            LogSeverity::Error,
            format_args!(
                "runtime library {} of plug-in {plugin_id} could not be opened: {err}",
                spec.library.display()
            ),
        );
        MosaicError::RuntimeLoadFailure {
            plugin: plugin_id.to_string(),
            library: spec.library.clone(),
            detail: err.to_string(),
        }
    })?;

    let resolve_symbol_err = |symbol: &str| {
        ctx.log(
            LogSeverity::Error,
            format_args!("symbol {symbol} of plug-in {plugin_id} could not be resolved"),
        );
        MosaicError::RuntimeSymbolMissing {
            plugin: plugin_id.to_string(),
            symbol: symbol.to_string(),
        }
    };
    let start_fn = match spec.start_symbol.as_deref() {
        Some(symbol) => Some(
            runtime
                .start_fn(symbol)
                .ok_or_else(|| resolve_symbol_err(symbol))?,
        ),
        None => None,
    };
    let stop_fn = match spec.stop_symbol.as_deref() {
        Some(symbol) => Some(
            runtime
                .stop_fn(symbol)
                .ok_or_else(|| resolve_symbol_err(symbol))?,
        ),
        None => None,
    };

    ctx.with_state(|st| {
        let plugin = st.plugin_mut(slot);
        plugin.runtime = Some(runtime);
        plugin.start_fn = start_fn;
        plugin.stop_fn = stop_fn;
    });
    Ok(())
}

/// Commit every plug-in the walk left preliminary, dependencies first, and
/// drain the visited set.
fn commit(ctx: &Context, slot: usize, visited: &mut HashSet<usize>) {
    if !visited.remove(&slot) {
        return;
    }
    let preliminary = ctx.with_state(|st| {
        st.is_live(slot) && st.plugin(slot).state < PluginState::Resolved
    });
    if preliminary {
        let imported = ctx.with_state(|st| st.plugin(slot).imported.clone());
        for target in imported {
            commit(ctx, target, visited);
        }
        ctx.transition(slot, PluginState::Resolved);
    }
}

/// Undo a failed walk: plug-ins that stayed preliminary lose their recorded
/// edges and any runtime library opened on the way is closed. Plug-ins that
/// were already resolved keep everything.
fn rollback(ctx: &Context, visited: &HashSet<usize>) {
    for &slot in visited {
        ctx.with_state(|st| {
            if !st.is_live(slot) || st.plugin(slot).state >= PluginState::Resolved {
                return;
            }
            let imported = std::mem::take(&mut st.plugin_mut(slot).imported);
            for target in imported {
                if st.is_live(target) {
                    st.plugin_mut(target).importing.retain(|&s| s != slot);
                }
            }
            let plugin = st.plugin_mut(slot);
            plugin.start_fn = None;
            plugin.stop_fn = None;
            plugin.runtime = None;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Context, ContextConfig};
    use crate::descriptor::{PluginDescriptor, PluginImport};
    use crate::events::PluginEvent;
    use crate::version::VersionMatch;
    use std::path::PathBuf;
    use std::sync::Mutex;

    fn descriptor(id: &str, imports: Vec<PluginImport>) -> PluginDescriptor {
        PluginDescriptor {
            identifier: id.to_string(),
            version: None,
            provider_name: None,
            install_path: PathBuf::from("/plugins").join(id),
            imports,
            runtime: None,
            extension_points: Vec::new(),
            extensions: Vec::new(),
        }
    }

    fn import(id: &str) -> PluginImport {
        PluginImport {
            plugin_id: id.to_string(),
            version: None,
            match_rule: VersionMatch::None,
            optional: false,
        }
    }

    fn resolve(ctx: &Context, id: &str) -> Result<(), MosaicError> {
        let slot = ctx.with_state(|st| st.slot_of(id)).expect("installed");
        resolve_plugin(ctx, slot)
    }

    fn state_of(ctx: &Context, id: &str) -> PluginState {
        ctx.plugin_state(id).unwrap()
    }

    #[test]
    fn chain_resolves_transitively() {
        let ctx = Context::new(ContextConfig::default());
        ctx.install(Arc::new(descriptor("a", vec![]))).unwrap();
        ctx.install(Arc::new(descriptor("b", vec![import("a")]))).unwrap();
        ctx.install(Arc::new(descriptor("c", vec![import("b")]))).unwrap();

        resolve(&ctx, "c").unwrap();
        assert_eq!(state_of(&ctx, "a"), PluginState::Resolved);
        assert_eq!(state_of(&ctx, "b"), PluginState::Resolved);
        assert_eq!(state_of(&ctx, "c"), PluginState::Resolved);
        ctx.destroy().unwrap();
    }

    #[test]
    fn resolve_is_idempotent_without_new_events() {
        let ctx = Context::new(ContextConfig::default());
        ctx.install(Arc::new(descriptor("a", vec![]))).unwrap();
        resolve(&ctx, "a").unwrap();

        let events: Arc<Mutex<Vec<PluginEvent>>> = Arc::default();
        let sink = Arc::clone(&events);
        ctx.add_listener(move |event| sink.lock().unwrap().push(event.clone()));
        resolve(&ctx, "a").unwrap();
        assert!(events.lock().unwrap().is_empty());
        ctx.destroy().unwrap();
    }

    #[test]
    fn cycle_members_resolve_together() {
        let ctx = Context::new(ContextConfig::default());
        ctx.install(Arc::new(descriptor("a", vec![import("b")]))).unwrap();
        ctx.install(Arc::new(descriptor("b", vec![import("a")]))).unwrap();

        let events: Arc<Mutex<Vec<PluginEvent>>> = Arc::default();
        let sink = Arc::clone(&events);
        ctx.add_listener(move |event| sink.lock().unwrap().push(event.clone()));

        resolve(&ctx, "a").unwrap();
        assert_eq!(state_of(&ctx, "a"), PluginState::Resolved);
        assert_eq!(state_of(&ctx, "b"), PluginState::Resolved);

        // Exactly one INSTALLED→RESOLVED event per member.
        let events = events.lock().unwrap();
        let resolved: Vec<&str> = events
            .iter()
            .filter(|e| e.new_state == PluginState::Resolved)
            .map(|e| e.plugin_id.as_str())
            .collect();
        assert_eq!(resolved.len(), 2);
        assert!(resolved.contains(&"a") && resolved.contains(&"b"));
        drop(events);
        ctx.destroy().unwrap();
    }

    #[test]
    fn missing_required_import_fails_and_rolls_back() {
        let ctx = Context::new(ContextConfig::default());
        ctx.install(Arc::new(descriptor("a", vec![]))).unwrap();
        ctx.install(Arc::new(descriptor(
            "b",
            vec![import("a"), import("ghost")],
        )))
        .unwrap();

        let err = resolve(&ctx, "b").unwrap_err();
        assert!(matches!(err, MosaicError::DependencyMissing { .. }));
        assert_eq!(state_of(&ctx, "b"), PluginState::Installed);
        // The a edge recorded before the failure is gone again.
        ctx.with_state(|st| {
            let b = st.plugin(st.slot_of("b").unwrap());
            assert!(b.imported.is_empty());
            let a = st.plugin(st.slot_of("a").unwrap());
            assert!(a.importing.is_empty());
        });
        ctx.destroy().unwrap();
    }

    #[test]
    fn missing_optional_import_is_skipped() {
        let ctx = Context::new(ContextConfig::default());
        let mut ghost = import("ghost");
        ghost.optional = true;
        ctx.install(Arc::new(descriptor("b", vec![ghost]))).unwrap();

        resolve(&ctx, "b").unwrap();
        assert_eq!(state_of(&ctx, "b"), PluginState::Resolved);
        ctx.with_state(|st| {
            let b = st.plugin(st.slot_of("b").unwrap());
            assert!(b.imported.is_empty());
        });
        ctx.destroy().unwrap();
    }

    #[test]
    fn cycle_fails_as_a_unit() {
        let ctx = Context::new(ContextConfig::default());
        // a <-> b, and b also needs a plug-in that is not there.
        ctx.install(Arc::new(descriptor("a", vec![import("b")]))).unwrap();
        ctx.install(Arc::new(descriptor(
            "b",
            vec![import("a"), import("ghost")],
        )))
        .unwrap();

        let err = resolve(&ctx, "a").unwrap_err();
        assert!(matches!(err, MosaicError::DependencyMissing { .. }));
        assert_eq!(state_of(&ctx, "a"), PluginState::Installed);
        assert_eq!(state_of(&ctx, "b"), PluginState::Installed);
        ctx.with_state(|st| {
            for id in ["a", "b"] {
                let plugin = st.plugin(st.slot_of(id).unwrap());
                assert!(plugin.imported.is_empty(), "{id} kept imported edges");
                assert!(plugin.importing.is_empty(), "{id} kept importing edges");
            }
        });
        ctx.destroy().unwrap();
    }

    #[test]
    fn version_mismatch_reports_dependency_error() {
        let ctx = Context::new(ContextConfig::default());
        let mut a = descriptor("a", vec![]);
        a.version = Some("1.2.3.4".parse().unwrap());
        ctx.install(Arc::new(a)).unwrap();

        let mut needs_a = import("a");
        needs_a.version = Some("1.3".parse().unwrap());
        needs_a.match_rule = VersionMatch::Equivalent;
        ctx.install(Arc::new(descriptor("b", vec![needs_a]))).unwrap();

        let err = resolve(&ctx, "b").unwrap_err();
        assert!(matches!(err, MosaicError::DependencyVersionMismatch { .. }));
        assert_eq!(state_of(&ctx, "a"), PluginState::Installed);
        assert_eq!(state_of(&ctx, "b"), PluginState::Installed);
        ctx.destroy().unwrap();
    }
}
