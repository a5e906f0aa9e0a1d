// src/config/defaults.rs

//! Centrally managed defaults (`StowageDefaults.config`)
//!
//! The defaults file has the same shape as any other configuration file but
//! is never part of the override chain. It only seeds the source registry
//! with curated default sources.

use super::layer::{ConfigLayer, LayerAccess};
use super::{CONFIG_SECTION, Settings};
use crate::sources::{DISABLED_SOURCES_SECTION, PACKAGE_SOURCES_SECTION, PackageSource};
use std::path::Path;
use tracing::{debug, warn};

/// Conventional defaults file name
pub const DEFAULTS_FILE_NAME: &str = "StowageDefaults.config";

const DEFAULT_PUSH_SOURCE_KEY: &str = "DefaultPushSource";

#[derive(Debug, Clone, Default)]
pub struct ConfigurationDefaults {
    settings: Settings,
}

impl ConfigurationDefaults {
    /// Read defaults from `path`; a missing or unreadable file means no defaults
    pub fn load(path: &Path) -> Self {
        if !path.is_file() {
            debug!("No configuration defaults at {}", path.display());
            return Self::default();
        }

        match ConfigLayer::load(path, LayerAccess::ReadOnly) {
            Ok(layer) => Self {
                settings: Settings::from_layers(vec![layer]),
            },
            Err(e) => {
                warn!("Ignoring configuration defaults {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Curated sources, disabled when listed under `disabledPackageSources`
    pub fn default_package_sources(&self) -> Vec<PackageSource> {
        let disabled = self
            .settings
            .get_values(DISABLED_SOURCES_SECTION, false)
            .unwrap_or_default();

        self.settings
            .get_values(PACKAGE_SOURCES_SECTION, false)
            .unwrap_or_default()
            .into_iter()
            .map(|(name, location)| {
                let is_enabled = !disabled.iter().any(|(n, _)| n.eq_ignore_ascii_case(&name));
                PackageSource::new(name, location).with_enabled(is_enabled)
            })
            .collect()
    }

    pub fn default_push_source(&self) -> Option<String> {
        self.settings
            .get_value(CONFIG_SECTION, DEFAULT_PUSH_SOURCE_KEY, false)
            .ok()
            .flatten()
    }
}
