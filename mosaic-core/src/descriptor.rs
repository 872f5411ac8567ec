//! Immutable plug-in descriptor model
//!
//! A descriptor is produced by a [`DescriptorParser`](crate::parser::DescriptorParser)
//! and never changes afterwards; contexts and the host share it through
//! [`DescriptorRef`] handles.

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::MosaicError;
use crate::version::{Version, VersionMatch};

/// Maximum length of a plug-in identifier, in bytes.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// A counted handle on a descriptor. The handle stays valid after the
/// plug-in is uninstalled; dropping it is the release.
pub type DescriptorRef = Arc<PluginDescriptor>;

/// Immutable metadata record for one plug-in.
#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    /// Unique identifier, at most [`MAX_IDENTIFIER_LEN`] bytes of printable
    /// ASCII
    pub identifier: String,
    /// Declared version, if any
    pub version: Option<Version>,
    /// Provider (author or vendor) name, if any
    pub provider_name: Option<String>,
    /// Directory the plug-in was loaded from
    pub install_path: PathBuf,
    /// Imports, in declaration order
    pub imports: Vec<PluginImport>,
    /// Native runtime library and entry points, if the plug-in has one
    pub runtime: Option<RuntimeSpec>,
    /// Extension points this plug-in exposes, in declaration order
    pub extension_points: Vec<ExtensionPoint>,
    /// Extensions this plug-in contributes, in declaration order
    pub extensions: Vec<Extension>,
}

/// A declared dependency on another plug-in.
#[derive(Debug, Clone)]
pub struct PluginImport {
    /// Identifier of the imported plug-in
    pub plugin_id: String,
    /// Version the match rule is applied against, if any
    pub version: Option<Version>,
    /// How the provider's version must relate to [`Self::version`]
    pub match_rule: VersionMatch,
    /// Whether resolution may proceed without the imported plug-in
    pub optional: bool,
}

/// The native runtime library of a plug-in.
#[derive(Debug, Clone)]
pub struct RuntimeSpec {
    /// Library path relative to the install path; the loader appends the
    /// platform suffix when the path has no extension
    pub library: PathBuf,
    /// Name of the start symbol, if any
    pub start_symbol: Option<String>,
    /// Name of the stop symbol, if any
    pub stop_symbol: Option<String>,
}

/// An extension point exposed by a plug-in.
#[derive(Debug, Clone)]
pub struct ExtensionPoint {
    /// Identifier unique within the declaring descriptor
    pub local_id: String,
    /// Display name, if any
    pub name: Option<String>,
    /// Path of a schema describing valid extensions, relative to the install
    /// path
    pub schema_path: Option<PathBuf>,
}

impl ExtensionPoint {
    /// The context-wide identifier: `<plugin id>.<local id>`.
    pub fn global_id(&self, plugin_id: &str) -> String {
        format!("{plugin_id}.{}", self.local_id)
    }
}

/// A contribution to an extension point.
#[derive(Debug, Clone)]
pub struct Extension {
    /// Identifier unique within the declaring descriptor, if any
    pub local_id: Option<String>,
    /// Global identifier of the target extension point
    pub point: String,
    /// Display name, if any
    pub name: Option<String>,
    /// Configuration tree rooted at an anonymous element
    pub configuration: ConfigElement,
}

impl Extension {
    /// The context-wide identifier, when the extension has a local id.
    pub fn global_id(&self, plugin_id: &str) -> Option<String> {
        self.local_id
            .as_deref()
            .map(|local| format!("{plugin_id}.{local}"))
    }
}

/// One element of an extension's configuration tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigElement {
    /// Element name
    pub name: String,
    /// Attribute key/value pairs, in document order
    pub attributes: Vec<(String, String)>,
    /// Text value, if any
    pub value: Option<String>,
    /// Child elements, in document order
    pub children: Vec<ConfigElement>,
}

impl ConfigElement {
    /// Look up an attribute by key.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// First child with the given element name.
    pub fn child(&self, name: &str) -> Option<&ConfigElement> {
        self.children.iter().find(|c| c.name == name)
    }
}

fn check_identifier(what: &str, id: &str) -> Result<(), MosaicError> {
    if id.is_empty() {
        return Err(MosaicError::malformed(format!("{what} must not be empty")));
    }
    if id.len() > MAX_IDENTIFIER_LEN {
        return Err(MosaicError::malformed(format!(
            "{what} {id:?} exceeds {MAX_IDENTIFIER_LEN} bytes"
        )));
    }
    if let Some(c) = id.chars().find(|c| !c.is_ascii_graphic()) {
        return Err(MosaicError::malformed(format!(
            "{what} {id:?} contains non-printable character {c:?}"
        )));
    }
    Ok(())
}

impl PluginDescriptor {
    /// Check the structural rules a descriptor must satisfy before it can be
    /// installed: identifier shape, extension-point local-id uniqueness,
    /// non-empty extension targets.
    pub fn validate(&self) -> Result<(), MosaicError> {
        check_identifier("plug-in identifier", &self.identifier)?;
        for (i, point) in self.extension_points.iter().enumerate() {
            check_identifier("extension point id", &point.local_id)?;
            if self.extension_points[..i]
                .iter()
                .any(|p| p.local_id == point.local_id)
            {
                return Err(MosaicError::malformed(format!(
                    "duplicate extension point id {:?}",
                    point.local_id
                )));
            }
        }
        for ext in &self.extensions {
            if ext.point.is_empty() {
                return Err(MosaicError::malformed(
                    "extension is missing its target extension point",
                ));
            }
            if let Some(local) = ext.local_id.as_deref() {
                check_identifier("extension id", local)?;
            }
        }
        Ok(())
    }
}
