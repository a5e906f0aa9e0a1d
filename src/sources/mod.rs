// src/sources/mod.rs

//! Package source registry
//!
//! Sources live in three configuration sections:
//! - `packageSources`: `name -> location`
//! - `disabledPackageSources`: `name -> "true"` for every disabled source
//! - `packageSourceCredentials/<name>`: `Username` plus `Password`
//!   (encrypted) or `ClearTextPassword`
//!
//! Enablement and credentials are kept apart from the source list so they
//! survive rewrites of it.

pub mod credentials;

pub use credentials::PasswordProtector;

use crate::config::Settings;
use crate::error::Result;
use std::fmt;
use tracing::{debug, info, warn};

pub const PACKAGE_SOURCES_SECTION: &str = "packageSources";
pub const DISABLED_SOURCES_SECTION: &str = "disabledPackageSources";
pub const CREDENTIALS_SECTION: &str = "packageSourceCredentials";
pub const ACTIVE_SOURCE_SECTION: &str = "activePackageSource";

const USERNAME_KEY: &str = "Username";
const PASSWORD_KEY: &str = "Password";
const CLEAR_TEXT_PASSWORD_KEY: &str = "ClearTextPassword";

/// Stored credentials for a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user_name: String,
    pub password: String,
    pub is_password_clear_text: bool,
}

/// A named package source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSource {
    pub name: String,
    /// URL or filesystem path
    pub location: String,
    pub is_enabled: bool,
    /// Loaded from a machine-wide file; never written back by a save
    pub is_machine_wide: bool,
    /// Matches a curated default by both name and location
    pub is_official: bool,
    pub credentials: Option<Credentials>,
}

impl PackageSource {
    pub fn new(name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            is_enabled: true,
            is_machine_wide: false,
            is_official: false,
            credentials: None,
        }
    }

    pub fn with_enabled(mut self, is_enabled: bool) -> Self {
        self.is_enabled = is_enabled;
        self
    }

    pub fn with_machine_wide(mut self, is_machine_wide: bool) -> Self {
        self.is_machine_wide = is_machine_wide;
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    pub fn has_location(&self, location: &str) -> bool {
        self.location.eq_ignore_ascii_case(location)
    }

    /// Same name and same location
    pub fn same_as(&self, other: &PackageSource) -> bool {
        self.has_name(&other.name) && self.has_location(&other.location)
    }
}

impl fmt::Display for PackageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.location)
    }
}

/// Loads, reconciles and saves package sources through a [`Settings`] chain
#[derive(Debug)]
pub struct PackageSourceProvider {
    settings: Settings,
    provider_defaults: Vec<PackageSource>,
    configuration_defaults: Vec<PackageSource>,
    migrations: Vec<(PackageSource, PackageSource)>,
    protector: PasswordProtector,
}

impl PackageSourceProvider {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            provider_defaults: Vec::new(),
            configuration_defaults: Vec::new(),
            migrations: Vec::new(),
            protector: PasswordProtector::for_current_user(),
        }
    }

    /// Sources supplied by the caller, used when configuration has no defaults
    pub fn with_provider_defaults(mut self, sources: Vec<PackageSource>) -> Self {
        self.provider_defaults = sources;
        self
    }

    /// Curated defaults (usually from `StowageDefaults.config`)
    pub fn with_configuration_defaults(mut self, sources: Vec<PackageSource>) -> Self {
        self.configuration_defaults = sources;
        self
    }

    /// `(old, new)` rewrites applied when a loaded source matches `old` by name and location
    pub fn with_migrations(mut self, migrations: Vec<(PackageSource, PackageSource)>) -> Self {
        self.migrations = migrations;
        self
    }

    pub fn with_protector(mut self, protector: PasswordProtector) -> Self {
        self.protector = protector;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Load the ordered, de-duplicated and reconciled list of sources
    pub fn load_package_sources(&mut self) -> Result<Vec<PackageSource>> {
        let values = self.settings.get_setting_values(PACKAGE_SOURCES_SECTION, true)?;

        // Last occurrence of a name wins and keeps its own position.
        let mut unique: Vec<(String, String, bool)> = Vec::new();
        for value in values.into_iter().rev() {
            if !unique.iter().any(|(name, _, _)| name.eq_ignore_ascii_case(&value.key)) {
                unique.push((value.key, value.value, value.is_machine_wide));
            }
        }
        unique.reverse();

        let mut sources = Vec::with_capacity(unique.len());
        for (name, location, is_machine_wide) in unique {
            let is_enabled = self.is_enabled_by_name(&name)?;
            let credentials = self.read_credentials(&name)?;
            sources.push(PackageSource {
                credentials,
                ..PackageSource::new(name, location)
                    .with_enabled(is_enabled)
                    .with_machine_wide(is_machine_wide)
            });
        }

        if !self.migrations.is_empty() {
            self.migrate(&mut sources)?;
        }

        if !self.configuration_defaults.is_empty() {
            reconcile_defaults(&mut sources, &self.configuration_defaults);
        } else if !self.provider_defaults.is_empty() {
            debug!("No configuration defaults; using provider default sources");
            return Ok(self.provider_defaults.clone());
        }

        if sources.is_empty() {
            return Ok(self.provider_defaults.clone());
        }

        Ok(sources)
    }

    /// Rewrite the source sections of the writable configuration layer
    pub fn save_package_sources(&mut self, sources: &[PackageSource]) -> Result<()> {
        self.settings.delete_section(PACKAGE_SOURCES_SECTION)?;
        let entries: Vec<(String, String)> = sources
            .iter()
            .filter(|s| !s.is_machine_wide)
            .map(|s| (s.name.clone(), s.location.clone()))
            .collect();
        if !entries.is_empty() {
            self.settings.set_values(PACKAGE_SOURCES_SECTION, &entries)?;
        }

        self.settings.delete_section(DISABLED_SOURCES_SECTION)?;
        let disabled: Vec<(String, String)> = sources
            .iter()
            .filter(|s| !s.is_enabled)
            .map(|s| (s.name.clone(), "true".to_string()))
            .collect();
        if !disabled.is_empty() {
            self.settings.set_values(DISABLED_SOURCES_SECTION, &disabled)?;
        }

        self.settings.delete_section(CREDENTIALS_SECTION)?;
        for source in sources {
            let Some(credentials) = &source.credentials else {
                continue;
            };
            if credentials.user_name.is_empty() || credentials.password.is_empty() {
                continue;
            }

            let password_entry = if credentials.is_password_clear_text {
                (CLEAR_TEXT_PASSWORD_KEY.to_string(), credentials.password.clone())
            } else {
                (PASSWORD_KEY.to_string(), self.protector.encrypt(&credentials.password)?)
            };
            self.settings.set_nested_values(
                CREDENTIALS_SECTION,
                &source.name,
                &[
                    (USERNAME_KEY.to_string(), credentials.user_name.clone()),
                    password_entry,
                ],
            )?;
        }

        info!("Saved {} package source(s)", sources.len());
        Ok(())
    }

    pub fn is_package_source_enabled(&self, source: &PackageSource) -> Result<bool> {
        self.is_enabled_by_name(&source.name)
    }

    /// Record a source as disabled; machine-wide sources are recorded in the writable layer
    pub fn disable_package_source(&mut self, source: &PackageSource) -> Result<()> {
        self.settings.set_value(DISABLED_SOURCES_SECTION, &source.name, "true")?;
        info!("Disabled package source '{}'", source.name);
        Ok(())
    }

    pub fn enable_package_source(&mut self, source: &PackageSource) -> Result<()> {
        self.settings.delete_value(DISABLED_SOURCES_SECTION, &source.name)?;
        info!("Enabled package source '{}'", source.name);
        Ok(())
    }

    /// Location of the first enabled source matching by name or location
    ///
    /// Anything unknown is returned unchanged and treated as a literal source.
    pub fn resolve_source(&mut self, name_or_location: &str) -> Result<String> {
        let sources = self.load_package_sources()?;
        Ok(resolve_in(&sources, name_or_location))
    }

    /// First entry of `activePackageSource`, when configured
    pub fn active_package_source(&self) -> Result<Option<PackageSource>> {
        Ok(self
            .settings
            .get_values(ACTIVE_SOURCE_SECTION, false)?
            .into_iter()
            .next()
            .map(|(name, location)| PackageSource::new(name, location)))
    }

    fn is_enabled_by_name(&self, name: &str) -> Result<bool> {
        Ok(self.settings.get_value(DISABLED_SOURCES_SECTION, name, false)?.is_none())
    }

    fn read_credentials(&self, name: &str) -> Result<Option<Credentials>> {
        let values = self.settings.get_nested_values(CREDENTIALS_SECTION, name)?;
        let lookup = |key: &str| {
            values
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v.clone())
                .filter(|v| !v.is_empty())
        };

        let Some(user_name) = lookup(USERNAME_KEY) else {
            return Ok(None);
        };

        let (password, is_password_clear_text) = if let Some(encrypted) = lookup(PASSWORD_KEY) {
            match self.protector.decrypt(&encrypted) {
                Ok(password) => (password, false),
                Err(e) => {
                    warn!("Ignoring stored credentials for source '{}': {}", name, e);
                    return Ok(None);
                }
            }
        } else if let Some(password) = lookup(CLEAR_TEXT_PASSWORD_KEY) {
            (password, true)
        } else {
            return Ok(None);
        };

        if password.is_empty() {
            return Ok(None);
        }

        Ok(Some(Credentials {
            user_name,
            password,
            is_password_clear_text,
        }))
    }

    fn migrate(&mut self, sources: &mut Vec<PackageSource>) -> Result<()> {
        let mut changed = false;
        let mut index = 0;
        while index < sources.len() {
            let Some((_, target)) = self
                .migrations
                .iter()
                .find(|(old, _)| old.same_as(&sources[index]))
            else {
                index += 1;
                continue;
            };

            changed = true;
            if sources.iter().any(|s| s.same_as(target)) {
                debug!("Dropping migrated source '{}', target already present", sources[index].name);
                sources.remove(index);
                continue;
            }

            info!("Migrating package source {} to {}", sources[index], target);
            let migrated = PackageSource {
                is_enabled: sources[index].is_enabled,
                is_machine_wide: sources[index].is_machine_wide,
                ..target.clone()
            };
            sources[index] = migrated;
            index += 1;
        }

        if changed {
            self.save_package_sources(sources)?;
        }
        Ok(())
    }
}

/// Resolve a name or location against an already loaded list
pub fn resolve_in(sources: &[PackageSource], name_or_location: &str) -> String {
    sources
        .iter()
        .filter(|s| s.is_enabled)
        .find(|s| s.has_name(name_or_location) || s.has_location(name_or_location))
        .map(|s| s.location.clone())
        .unwrap_or_else(|| name_or_location.to_string())
}

/// Merge curated defaults into loaded sources
///
/// - same name and location: marked official
/// - same location, other name: left alone
/// - same name, other location: location replaced, marked official
/// - no match: appended as official
fn reconcile_defaults(sources: &mut Vec<PackageSource>, defaults: &[PackageSource]) {
    for default in defaults {
        if let Some(existing) = sources.iter_mut().find(|s| s.same_as(default)) {
            existing.is_official = true;
        } else if sources.iter().any(|s| s.has_location(&default.location)) {
            debug!("Default source {} already present under another name", default);
        } else if let Some(existing) = sources.iter_mut().find(|s| s.has_name(&default.name)) {
            existing.location = default.location.clone();
            existing.is_official = true;
        } else {
            sources.push(PackageSource {
                is_official: true,
                ..default.clone()
            });
        }
    }
}
