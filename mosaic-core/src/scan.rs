//! Directory scanning
//!
//! `scan` walks the context's registered directories, parses every plug-in
//! directory it finds and installs the result. Failures are per plug-in: a
//! malformed descriptor or unreadable directory is logged and skipped, the
//! rest of the scan proceeds, and the first error is reported at the end.

use std::collections::HashMap;
use std::ops::BitOr;

use crate::context::Context;
use crate::descriptor::DescriptorRef;
use crate::error::MosaicError;
use crate::events::{LogSeverity, PluginState};
use crate::lifecycle;
use crate::parser::DESCRIPTOR_FILE;
use crate::version::Version;

/// Flag bits steering a [`Context::scan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanFlags(u32);

impl ScanFlags {
    /// No special behavior: install new plug-ins only.
    pub const NONE: ScanFlags = ScanFlags(0);
    /// Replace an installed plug-in when a scanned one has a greater
    /// version.
    pub const UPGRADE: ScanFlags = ScanFlags(0x01);
    /// Stop every active plug-in before performing any upgrade.
    pub const STOP_ALL_ON_UPGRADE: ScanFlags = ScanFlags(0x02);
    /// Stop every active plug-in before performing any install.
    pub const STOP_ALL_ON_INSTALL: ScanFlags = ScanFlags(0x04);
    /// After installs and upgrades, restart the plug-ins that were active
    /// when the scan began.
    pub const RESTART_ACTIVE: ScanFlags = ScanFlags(0x08);

    /// Whether every bit of `other` is set in `self`.
    pub fn contains(self, other: ScanFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// The raw bit field.
    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for ScanFlags {
    type Output = ScanFlags;

    fn bitor(self, rhs: ScanFlags) -> ScanFlags {
        ScanFlags(self.0 | rhs.0)
    }
}

/// Whether `candidate` is strictly newer than `installed`. A version always
/// beats no version; no version never upgrades.
fn is_newer(candidate: Option<&Version>, installed: Option<&Version>) -> bool {
    match (candidate, installed) {
        (Some(c), Some(i)) => c.cmp_components(i, 4) == std::cmp::Ordering::Greater,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

pub(crate) fn scan(ctx: &Context, flags: ScanFlags) -> Result<(), MosaicError> {
    let _guard = ctx.lock();
    let mut first_error: Option<MosaicError> = None;
    let record_error = |err: MosaicError, first: &mut Option<MosaicError>| {
        if first.is_none() {
            *first = Some(err);
        }
    };

    // Collect one candidate per identifier across all directories, keeping
    // the greatest version when an id shows up more than once.
    let mut candidates: HashMap<String, DescriptorRef> = HashMap::new();
    for dir in ctx.plugin_dirs() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                ctx.log(
                    LogSeverity::Error,
                    format_args!("failed to scan plug-in directory {}: {err}", dir.display()),
                );
                record_error(err.into(), &mut first_error);
                continue;
            }
        };
        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(err) => {
                    record_error(err.into(), &mut first_error);
                    continue;
                }
            };
            if !path.is_dir() || !path.join(DESCRIPTOR_FILE).is_file() {
                continue;
            }
            match ctx.parser().parse(&path) {
                Ok(descriptor) => {
                    let descriptor: DescriptorRef = std::sync::Arc::new(descriptor);
                    let id = descriptor.identifier.clone();
                    let replace = match candidates.get(&id) {
                        Some(existing) => {
                            is_newer(descriptor.version.as_ref(), existing.version.as_ref())
                        }
                        None => true,
                    };
                    if replace {
                        candidates.insert(id, descriptor);
                    }
                }
                Err(err) => {
                    ctx.log(
                        LogSeverity::Error,
                        format_args!(
                            "failed to load plug-in descriptor from {}: {err}",
                            path.display()
                        ),
                    );
                    record_error(err, &mut first_error);
                }
            }
        }
    }

    // Split candidates into fresh installs and (when allowed) upgrades.
    let mut to_install = Vec::new();
    let mut to_upgrade = Vec::new();
    for (id, descriptor) in candidates {
        match ctx.plugin_info(&id) {
            Err(_) => to_install.push(descriptor),
            Ok(installed) => {
                if flags.contains(ScanFlags::UPGRADE)
                    && is_newer(descriptor.version.as_ref(), installed.version.as_ref())
                {
                    to_upgrade.push(descriptor);
                }
            }
        }
    }
    if to_install.is_empty() && to_upgrade.is_empty() {
        return first_error.map_or(Ok(()), Err);
    }

    // Who was running before the scan touched anything.
    let previously_active: Vec<String> = if flags.contains(ScanFlags::RESTART_ACTIVE) {
        ctx.plugin_infos()
            .iter()
            .filter(|d| {
                ctx.plugin_state(&d.identifier)
                    .is_ok_and(|s| s == PluginState::Active)
            })
            .map(|d| d.identifier.clone())
            .collect()
    } else {
        Vec::new()
    };

    if !to_upgrade.is_empty() && flags.contains(ScanFlags::STOP_ALL_ON_UPGRADE) {
        lifecycle::stop_all(ctx);
    }
    if !to_install.is_empty() && flags.contains(ScanFlags::STOP_ALL_ON_INSTALL) {
        lifecycle::stop_all(ctx);
    }

    for descriptor in to_upgrade {
        let id = descriptor.identifier.clone();
        let version = descriptor
            .version
            .map(|v| v.to_string())
            .unwrap_or_else(|| "unversioned".to_string());
        if let Some(slot) = ctx.with_state(|st| st.slot_of(&id)) {
            lifecycle::uninstall_plugin(ctx, slot);
        }
        match ctx.install(descriptor) {
            Ok(()) => ctx.log(
                LogSeverity::Info,
                format_args!("plug-in {id} upgraded to version {version}"),
            ),
            Err(err) => record_error(err, &mut first_error),
        }
    }

    for descriptor in to_install {
        if let Err(err) = ctx.install(descriptor) {
            record_error(err, &mut first_error);
        }
    }

    for id in previously_active {
        if ctx.with_state(|st| st.slot_of(&id)).is_none() {
            // Upgraded away or failed to reinstall.
            continue;
        }
        if let Err(err) = ctx.start(&id) {
            record_error(err, &mut first_error);
        }
    }

    first_error.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_combine_and_query() {
        let flags = ScanFlags::UPGRADE | ScanFlags::RESTART_ACTIVE;
        assert!(flags.contains(ScanFlags::UPGRADE));
        assert!(flags.contains(ScanFlags::RESTART_ACTIVE));
        assert!(!flags.contains(ScanFlags::STOP_ALL_ON_UPGRADE));
        assert_eq!(flags.bits(), 0x09);
        assert!(flags.contains(ScanFlags::NONE));
    }

    #[test]
    fn newer_prefers_versions_over_nothing() {
        let v1: Version = "1.0".parse().unwrap();
        let v2: Version = "1.0.1".parse().unwrap();
        assert!(is_newer(Some(&v2), Some(&v1)));
        assert!(!is_newer(Some(&v1), Some(&v2)));
        assert!(!is_newer(Some(&v1), Some(&v1)));
        assert!(is_newer(Some(&v1), None));
        assert!(!is_newer(None, Some(&v1)));
        assert!(!is_newer(None, None));
    }
}
