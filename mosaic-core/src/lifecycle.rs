//! Plug-in activation, deactivation and uninstallation
//!
//! Start walks the import graph dependencies-first; stop and unresolve walk
//! the inverse graph dependents-first. Every walk carries its own visited
//! set, so cyclic import graphs terminate and concurrent contexts never
//! interfere.

use std::collections::HashSet;

use crate::context::Context;
use crate::error::MosaicError;
use crate::events::{LogSeverity, PluginState};
use crate::framework;
use crate::resolver;

/// Start the plug-in in `slot`, resolving it and starting its imports
/// first. Already active plug-ins are left alone.
pub(crate) fn start_plugin(ctx: &Context, slot: usize) -> Result<(), MosaicError> {
    resolver::resolve_plugin(ctx, slot)?;
    let mut visited = HashSet::new();
    start_rec(ctx, slot, &mut visited)
}

fn start_rec(ctx: &Context, slot: usize, visited: &mut HashSet<usize>) -> Result<(), MosaicError> {
    if ctx.with_state(|st| st.plugin(slot).state) >= PluginState::Active {
        return Ok(());
    }
    if !visited.insert(slot) {
        // Cycle member already being started higher up this walk.
        return Ok(());
    }

    let imported = ctx.with_state(|st| st.plugin(slot).imported.clone());
    for target in imported {
        start_rec(ctx, target, visited)?;
    }
    start_runtime(ctx, slot)
}

/// Run the start protocol for one resolved plug-in, dependencies already
/// active. A failing start callback rolls the plug-in back to RESOLVED.
fn start_runtime(ctx: &Context, slot: usize) -> Result<(), MosaicError> {
    ctx.transition(slot, PluginState::Starting);

    if !ctx.call_start(slot) {
        ctx.transition(slot, PluginState::Stopping);
        ctx.call_stop(slot);
        ctx.transition(slot, PluginState::Resolved);
        let plugin_id = ctx.with_state(|st| st.plugin(slot).id().to_string());
        ctx.log(
            LogSeverity::Error,
            format_args!("plug-in {plugin_id} failed to start due to runtime error"),
        );
        return Err(MosaicError::RuntimeFailure { plugin: plugin_id });
    }

    ctx.with_state(|st| st.started.push(slot));
    ctx.transition(slot, PluginState::Active);
    Ok(())
}

/// Stop the plug-in in `slot`, stopping its dependents first. Stopping
/// never fails.
pub(crate) fn stop_plugin(ctx: &Context, slot: usize) {
    let mut visited = HashSet::new();
    stop_rec(ctx, slot, &mut visited);
}

fn stop_rec(ctx: &Context, slot: usize, visited: &mut HashSet<usize>) {
    let active = ctx.with_state(|st| {
        st.is_live(slot) && st.plugin(slot).state >= PluginState::Active
    });
    if !active || !visited.insert(slot) {
        return;
    }

    let importing = ctx.with_state(|st| st.plugin(slot).importing.clone());
    for dependent in importing {
        stop_rec(ctx, dependent, visited);
    }
    stop_runtime(ctx, slot);
}

fn stop_runtime(ctx: &Context, slot: usize) {
    ctx.transition(slot, PluginState::Stopping);
    ctx.call_stop(slot);
    ctx.with_state(|st| st.started.retain(|&s| s != slot));
    ctx.transition(slot, PluginState::Resolved);
}

/// Stop every active plug-in by repeatedly stopping the most recently
/// started one, which drains dependents before their dependencies.
pub(crate) fn stop_all(ctx: &Context) {
    loop {
        let Some(last) = ctx.with_state(|st| st.started.last().copied()) else {
            return;
        };
        stop_plugin(ctx, last);
        let stuck = ctx.with_state(|st| st.started.last().copied() == Some(last));
        if stuck {
            framework::fatal("stopped plug-in still on the started list");
        }
    }
}

/// Bring the plug-in in `slot` and its dependents back to INSTALLED:
/// dependents are unresolved first, then this plug-in's edges are removed
/// and its runtime library closed.
fn unresolve_rec(ctx: &Context, slot: usize, visited: &mut HashSet<usize>) {
    let resolved = ctx.with_state(|st| {
        st.is_live(slot) && st.plugin(slot).state >= PluginState::Resolved
    });
    if !resolved || !visited.insert(slot) {
        return;
    }

    let importing = ctx.with_state(|st| st.plugin(slot).importing.clone());
    for dependent in importing {
        unresolve_rec(ctx, dependent, visited);
    }

    ctx.with_state(|st| {
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
    ctx.transition(slot, PluginState::Installed);
}

/// Stop, unresolve, deregister and remove the plug-in in `slot`.
pub(crate) fn uninstall_plugin(ctx: &Context, slot: usize) {
    if !ctx.with_state(|st| st.is_live(slot)) {
        return;
    }
    stop_plugin(ctx, slot);
    let mut visited = HashSet::new();
    unresolve_rec(ctx, slot, &mut visited);

    ctx.transition(slot, PluginState::Uninstalled);
    ctx.with_state(|st| {
        st.unregister_extensions(slot);
        let record = st.remove(slot);
        // The record's descriptor share is released here; handles the host
        // still holds keep the descriptor itself alive.
        drop(record);
    });
}

/// Stop everything, then uninstall plug-ins until the registry is empty.
pub(crate) fn uninstall_all(ctx: &Context) {
    stop_all(ctx);
    loop {
        let Some(slot) = ctx.with_state(|st| st.slots().first().copied()) else {
            return;
        };
        uninstall_plugin(ctx, slot);
    }
}
