// src/config/mod.rs

//! Layered configuration
//!
//! Settings are merged from an ordered chain of `stowage.config` files:
//!
//! 1. every ancestor directory of the working directory, root first
//! 2. the user-level file (created when missing)
//! 3. machine-wide files supplied by a [`MachineWideSettings`] provider
//!
//! The chain is kept as an arena in construction order. The head is the
//! last layer and each layer's `next` is the one constructed before it, so
//! walking the chain means walking the arena backwards.

pub mod defaults;
pub mod layer;
pub mod machine;

pub use defaults::ConfigurationDefaults;
pub use layer::{ConfigLayer, LayerAccess};
pub use machine::{DirectoryMachineWideSettings, MachineWideSettings};

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File name looked up in every directory of the walk
pub const CONFIG_FILE_NAME: &str = "stowage.config";

/// Section holding general client settings
pub const CONFIG_SECTION: &str = "config";

/// Install root configured for a directory tree (path-valued)
pub const REPOSITORY_PATH_KEY: &str = "repositoryPath";

/// Section and key granting package restore consent
pub const PACKAGE_RESTORE_SECTION: &str = "packageRestore";
pub const PACKAGE_RESTORE_ENABLED_KEY: &str = "enabled";

/// One value read by a bulk query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingValue {
    pub key: String,
    pub value: String,
    pub is_machine_wide: bool,
}

/// The merged view over every loaded configuration layer
#[derive(Debug, Clone, Default)]
pub struct Settings {
    layers: Vec<ConfigLayer>,
}

impl Settings {
    /// Configuration that answers every query with "absent" and rejects writes
    pub fn null() -> Self {
        Self { layers: Vec::new() }
    }

    /// Build a chain from layers in construction order; the last one is the head
    pub fn from_layers(layers: Vec<ConfigLayer>) -> Self {
        Self { layers }
    }

    /// Load a single writable file, creating it when missing
    pub fn from_file(path: &Path) -> Result<Self> {
        Ok(Self::from_layers(vec![ConfigLayer::load_or_create(path)?]))
    }

    pub fn is_null(&self) -> bool {
        self.layers.is_empty()
    }

    /// Layers in construction order (tail first, head last)
    pub fn layers(&self) -> &[ConfigLayer] {
        &self.layers
    }

    /// Walk order: head first, following `next` to the tail
    fn chain(&self) -> impl Iterator<Item = (usize, &ConfigLayer)> {
        self.layers.iter().enumerate().rev()
    }

    /// Index of the layer a write lands on
    fn writable_index(&self) -> Result<usize> {
        self.chain()
            .find(|(_, layer)| layer.access() == LayerAccess::Writable)
            .map(|(index, _)| index)
            .ok_or(Error::NoWritableConfiguration)
    }

    fn writable_layer(&mut self) -> Result<&mut ConfigLayer> {
        let index = self.writable_index()?;
        debug!("Writing to configuration file {}", self.layers[index].path().display());
        Ok(&mut self.layers[index])
    }

    /// Path of the file writes currently go to, if any
    pub fn writable_path(&self) -> Option<&Path> {
        self.writable_index().ok().map(|index| self.layers[index].path())
    }

    /// Look up a single value
    ///
    /// Each layer is asked for its match given the previous one. Whenever a
    /// layer changes the match (a later `add` of the key, or a `clear`), the
    /// value is recomputed against that layer. The walk runs head to tail, so
    /// the layers visited last (the directory walk) have the final say.
    pub fn get_value(&self, section: &str, key: &str, is_path: bool) -> Result<Option<String>> {
        require_name("section", section)?;
        require_name("key", key)?;

        let mut matched: Option<(usize, usize)> = None;
        let mut result = None;

        for (layer_index, layer) in self.chain() {
            let next = match layer.lookup(section, key) {
                layer::Lookup::Untouched => matched,
                layer::Lookup::Cleared => None,
                layer::Lookup::Found(entry) => Some((layer_index, entry)),
            };

            if next != matched {
                matched = next;
                result = next.and_then(|(l, e)| self.layers[l].value_at(section, e, is_path));
            }
        }

        Ok(result)
    }

    /// All `(key, value)` pairs of a section, each layer contributing its own list
    pub fn get_values(&self, section: &str, is_path: bool) -> Result<Vec<(String, String)>> {
        Ok(self
            .get_setting_values(section, is_path)?
            .into_iter()
            .map(|v| (v.key, v.value))
            .collect())
    }

    /// Like [`Settings::get_values`], keeping machine-wide provenance
    pub fn get_setting_values(&self, section: &str, is_path: bool) -> Result<Vec<SettingValue>> {
        require_name("section", section)?;

        Ok(self
            .chain()
            .flat_map(|(_, layer)| {
                let is_machine_wide = layer.is_machine_wide();
                layer
                    .values(section, is_path)
                    .into_iter()
                    .map(move |(key, value)| SettingValue {
                        key,
                        value,
                        is_machine_wide,
                    })
            })
            .collect())
    }

    /// Values of `section/subsection`, concatenated in chain order
    pub fn get_nested_values(&self, section: &str, subsection: &str) -> Result<Vec<(String, String)>> {
        require_name("section", section)?;
        require_name("subsection", subsection)?;

        Ok(self
            .chain()
            .flat_map(|(_, layer)| layer.nested_values(section, subsection))
            .collect())
    }

    pub fn set_value(&mut self, section: &str, key: &str, value: &str) -> Result<()> {
        require_name("section", section)?;
        require_name("key", key)?;
        self.writable_layer()?.set_value(section, key, value)
    }

    pub fn set_values(&mut self, section: &str, values: &[(String, String)]) -> Result<()> {
        require_name("section", section)?;
        for (key, _) in values {
            require_name("key", key)?;
        }
        self.writable_layer()?.set_values(section, values)
    }

    pub fn set_nested_values(
        &mut self,
        section: &str,
        subsection: &str,
        values: &[(String, String)],
    ) -> Result<()> {
        require_name("section", section)?;
        require_name("subsection", subsection)?;
        for (key, _) in values {
            require_name("key", key)?;
        }
        self.writable_layer()?.set_nested_values(section, subsection, values)
    }

    /// Remove a key from the writable layer; returns whether anything was removed
    pub fn delete_value(&mut self, section: &str, key: &str) -> Result<bool> {
        require_name("section", section)?;
        require_name("key", key)?;
        self.writable_layer()?.delete_value(section, key)
    }

    /// Remove a whole section from the writable layer
    pub fn delete_section(&mut self, section: &str) -> Result<bool> {
        require_name("section", section)?;
        self.writable_layer()?.delete_section(section)
    }
}

fn require_name(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidArgument(format!("{} name cannot be empty", what)));
    }
    Ok(())
}

/// Conventional per-user configuration file location
pub fn default_user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("stowage").join(CONFIG_FILE_NAME))
}

/// Build the configuration chain for `working_dir`
///
/// `user_config` overrides the conventional per-user file. A parse error in
/// a walked or machine-wide file drops that layer; a parse error in the user
/// file is returned since writes would otherwise land somewhere unexpected.
pub fn load_default_settings(
    working_dir: &Path,
    user_config: Option<&Path>,
    machine_wide: Option<&dyn MachineWideSettings>,
) -> Result<Settings> {
    let working_dir = std::path::absolute(working_dir)?;
    let user_path = user_config
        .map(Path::to_path_buf)
        .or_else(default_user_config_path);

    let mut layers = Vec::new();

    let mut ancestors: Vec<&Path> = working_dir.ancestors().collect();
    ancestors.reverse();
    for dir in ancestors {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if !candidate.is_file() || user_path.as_deref() == Some(candidate.as_path()) {
            continue;
        }

        match ConfigLayer::load(&candidate, LayerAccess::Writable) {
            Ok(layer) => {
                debug!("Loaded configuration file {}", candidate.display());
                layers.push(layer);
            }
            Err(e) => warn!("Ignoring configuration file {}: {}", candidate.display(), e),
        }
    }

    if let Some(path) = user_path {
        match ConfigLayer::load_or_create(&path) {
            Ok(layer) => layers.push(layer),
            Err(e @ Error::ConfigurationParse { .. }) => return Err(e),
            Err(e) => warn!("Unable to load user configuration {}: {}", path.display(), e),
        }
    }

    if let Some(provider) = machine_wide {
        layers.extend(provider.settings());
    }

    if layers.is_empty() {
        debug!("No configuration files loaded; using null configuration");
        return Ok(Settings::null());
    }

    Ok(Settings::from_layers(layers))
}
