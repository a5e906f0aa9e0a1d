// src/install/consent.rs

//! Package restore consent

use crate::config::{PACKAGE_RESTORE_ENABLED_KEY, PACKAGE_RESTORE_SECTION, Settings};
use tracing::warn;

/// Environment variable that grants restore consent when set to `true`
pub const CONSENT_ENV_VAR: &str = "STOWAGE_ENABLE_PACKAGE_RESTORE";

/// Whether restore consent has been granted
pub fn is_granted(settings: &Settings) -> bool {
    is_granted_with(settings, std::env::var(CONSENT_ENV_VAR).ok().as_deref())
}

fn is_granted_with(settings: &Settings, env_value: Option<&str>) -> bool {
    if env_value.is_some_and(is_true) {
        return true;
    }

    match settings.get_value(PACKAGE_RESTORE_SECTION, PACKAGE_RESTORE_ENABLED_KEY, false) {
        Ok(value) => value.as_deref().is_some_and(is_true),
        Err(e) => {
            warn!("Unable to read package restore consent: {}", e);
            false
        }
    }
}

fn is_true(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigLayer;
    use tempfile::TempDir;

    fn settings_with(value: Option<&str>) -> (TempDir, Settings) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stowage.config");
        let mut settings = Settings::from_layers(vec![ConfigLayer::load_or_create(&path).unwrap()]);
        if let Some(value) = value {
            settings
                .set_value(PACKAGE_RESTORE_SECTION, PACKAGE_RESTORE_ENABLED_KEY, value)
                .unwrap();
        }
        (dir, settings)
    }

    #[test]
    fn test_consent_from_configuration() {
        let (_dir, settings) = settings_with(Some("True"));
        assert!(is_granted_with(&settings, None));

        let (_dir, settings) = settings_with(Some("false"));
        assert!(!is_granted_with(&settings, None));

        let (_dir, settings) = settings_with(None);
        assert!(!is_granted_with(&settings, None));
        assert!(!is_granted_with(&Settings::null(), None));
    }

    #[test]
    fn test_consent_from_environment() {
        let (_dir, settings) = settings_with(Some("false"));
        assert!(is_granted_with(&settings, Some("true")));
        assert!(!is_granted_with(&settings, Some("yes")));
    }
}
