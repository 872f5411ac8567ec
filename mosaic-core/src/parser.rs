//! Descriptor parsing
//!
//! The core consumes descriptors through the [`DescriptorParser`] trait;
//! [`TomlDescriptorParser`] is the built-in implementation, reading a
//! `plugin.toml` document from the plug-in directory. Hosts with their own
//! packaging format substitute the parser through
//! [`ContextConfig`](crate::context::ContextConfig).

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::descriptor::{
    ConfigElement, Extension, ExtensionPoint, PluginDescriptor, PluginImport, RuntimeSpec,
};
use crate::error::MosaicError;
use crate::version::VersionMatch;

/// Name of the descriptor document inside a plug-in directory.
pub const DESCRIPTOR_FILE: &str = "plugin.toml";

/// Turns a plug-in directory into a descriptor.
pub trait DescriptorParser: Send + Sync {
    /// Parse the descriptor of the plug-in installed in `dir`. The returned
    /// descriptor's install path is `dir` itself.
    fn parse(&self, dir: &Path) -> Result<PluginDescriptor, MosaicError>;
}

/// The built-in `plugin.toml` parser.
#[derive(Debug, Default)]
pub struct TomlDescriptorParser;

impl DescriptorParser for TomlDescriptorParser {
    fn parse(&self, dir: &Path) -> Result<PluginDescriptor, MosaicError> {
        let text = std::fs::read_to_string(dir.join(DESCRIPTOR_FILE))?;
        let raw: RawDescriptor = toml::from_str(&text)
            .map_err(|err| MosaicError::malformed(err.to_string()))?;
        raw.into_descriptor(dir)
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDescriptor {
    plugin: RawPlugin,
    runtime: Option<RawRuntime>,
    #[serde(default, rename = "extension-point")]
    extension_points: Vec<RawExtensionPoint>,
    #[serde(default, rename = "extension")]
    extensions: Vec<RawExtension>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPlugin {
    id: String,
    version: Option<String>,
    provider: Option<String>,
    #[serde(default, rename = "import")]
    imports: Vec<RawImport>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawImport {
    plugin: String,
    version: Option<String>,
    #[serde(rename = "match")]
    match_rule: Option<String>,
    #[serde(default)]
    optional: bool,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRuntime {
    library: String,
    start: Option<String>,
    stop: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawExtensionPoint {
    id: String,
    name: Option<String>,
    schema: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawExtension {
    point: String,
    id: Option<String>,
    name: Option<String>,
    config: Option<toml::Table>,
}

impl RawDescriptor {
    fn into_descriptor(self, dir: &Path) -> Result<PluginDescriptor, MosaicError> {
        let version = self.plugin.version.as_deref().map(str::parse).transpose()?;
        let imports = self
            .plugin
            .imports
            .into_iter()
            .map(|raw| {
                Ok(PluginImport {
                    plugin_id: raw.plugin,
                    version: raw.version.as_deref().map(str::parse).transpose()?,
                    match_rule: raw
                        .match_rule
                        .as_deref()
                        .map(str::parse)
                        .transpose()?
                        .unwrap_or(VersionMatch::None),
                    optional: raw.optional,
                })
            })
            .collect::<Result<Vec<_>, MosaicError>>()?;
        let runtime = self.runtime.map(|raw| RuntimeSpec {
            library: PathBuf::from(raw.library),
            start_symbol: raw.start,
            stop_symbol: raw.stop,
        });
        let extension_points = self
            .extension_points
            .into_iter()
            .map(|raw| ExtensionPoint {
                local_id: raw.id,
                name: raw.name,
                schema_path: raw.schema.map(PathBuf::from),
            })
            .collect();
        let extensions = self
            .extensions
            .into_iter()
            .map(|raw| {
                let configuration = match raw.config {
                    Some(table) => config_tree("config", &table)?,
                    None => ConfigElement {
                        name: "config".to_string(),
                        ..ConfigElement::default()
                    },
                };
                Ok(Extension {
                    local_id: raw.id,
                    point: raw.point,
                    name: raw.name,
                    configuration,
                })
            })
            .collect::<Result<Vec<_>, MosaicError>>()?;

        let descriptor = PluginDescriptor {
            identifier: self.plugin.id,
            version,
            provider_name: self.plugin.provider,
            install_path: dir.to_path_buf(),
            imports,
            runtime,
            extension_points,
            extensions,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }
}

/// Map a TOML table onto a configuration element: scalars become attributes
/// (the reserved key `#text` becomes the text value), tables become child
/// elements and arrays of tables become repeated child elements.
fn config_tree(name: &str, table: &toml::Table) -> Result<ConfigElement, MosaicError> {
    let mut element = ConfigElement {
        name: name.to_string(),
        ..ConfigElement::default()
    };
    for (key, value) in table {
        match value {
            toml::Value::Table(child) => element.children.push(config_tree(key, child)?),
            toml::Value::Array(items) => {
                for item in items {
                    let toml::Value::Table(child) = item else {
                        return Err(MosaicError::malformed(format!(
                            "configuration array {key:?} may only contain tables"
                        )));
                    };
                    element.children.push(config_tree(key, child)?);
                }
            }
            scalar => {
                let text = scalar_text(scalar);
                if key == "#text" {
                    element.value = Some(text);
                } else {
                    element.attributes.push((key.clone(), text));
                }
            }
        }
    }
    Ok(element)
}

fn scalar_text(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
