// src/packages/manifest.rs

//! Package manifest (`stowage.json`) and identity helpers

use crate::error::{Error, Result};
use semver::{Op, Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Extension of package archives in folder and cache repositories
pub const ARCHIVE_EXTENSION: &str = ".tar.gz";

/// A dependency on another package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDependency {
    pub id: String,
    #[serde(default = "any_version")]
    pub version: VersionReq,
}

fn any_version() -> VersionReq {
    VersionReq::STAR
}

/// Metadata shipped inside every package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    pub id: String,
    pub version: Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<PackageDependency>,
    /// Culture of a localization package (e.g. `fr`, `de-DE`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_client_version: Option<Version>,
    /// Supported target frameworks; empty means any
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub frameworks: Vec<String>,
    #[serde(default)]
    pub development_dependency: bool,
}

impl PackageManifest {
    pub fn new(id: impl Into<String>, version: Version) -> Self {
        Self {
            id: id.into(),
            version,
            description: None,
            dependencies: Vec::new(),
            language: None,
            min_client_version: None,
            frameworks: Vec::new(),
            development_dependency: false,
        }
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let manifest: Self = serde_json::from_slice(bytes)?;
        if manifest.id.trim().is_empty() {
            return Err(Error::InvalidManifest("package id cannot be empty".to_string()));
        }
        Ok(manifest)
    }

    /// Runtime package this localization package augments
    ///
    /// A satellite has a language, an id ending in `.<language>`, and an
    /// exact dependency on the runtime id at its own version.
    pub fn satellite_of(&self) -> Option<(String, Version)> {
        let language = self.language.as_deref().filter(|l| !l.is_empty())?;
        let suffix = format!(".{}", language).to_ascii_lowercase();
        let lowered = self.id.to_ascii_lowercase();
        if lowered.len() <= suffix.len() || !lowered.ends_with(&suffix) {
            return None;
        }

        let runtime_id = self.id.get(..self.id.len() - suffix.len())?;
        let dependency = self
            .dependencies
            .iter()
            .find(|d| d.id.eq_ignore_ascii_case(runtime_id))?;

        is_exact(&dependency.version, &self.version)
            .then(|| (runtime_id.to_string(), self.version.clone()))
    }

    pub fn supports_framework(&self, framework: Option<&str>) -> bool {
        match framework {
            Some(framework) if !self.frameworks.is_empty() => self
                .frameworks
                .iter()
                .any(|f| f.eq_ignore_ascii_case(framework)),
            _ => true,
        }
    }

    /// Reject packages this client cannot install for `framework`
    pub fn check_installable(&self, framework: Option<&str>, client_version: &Version) -> Result<()> {
        if let Some(required) = &self.min_client_version {
            if required > client_version {
                return Err(Error::MinClientVersion {
                    id: self.id.clone(),
                    required: required.to_string(),
                    current: client_version.to_string(),
                });
            }
        }

        if !self.supports_framework(framework) {
            return Err(Error::IncompatibleFramework {
                id: self.id.clone(),
                version: self.version.to_string(),
                framework: framework.unwrap_or_default().to_string(),
            });
        }

        Ok(())
    }
}

/// Whether `req` pins exactly `version`
fn is_exact(req: &VersionReq, version: &Version) -> bool {
    match req.comparators.as_slice() {
        [c] => {
            c.op == Op::Exact
                && c.major == version.major
                && c.minor == Some(version.minor)
                && c.patch == Some(version.patch)
                && c.pre == version.pre
        }
        _ => false,
    }
}

/// A resolved package ready to be extracted
#[derive(Debug, Clone)]
pub struct PackageHandle {
    pub manifest: PackageManifest,
    /// Local path of the package archive
    pub archive: PathBuf,
    /// Repository the package was found in
    pub source: String,
}

impl PackageHandle {
    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    pub fn version(&self) -> &Version {
        &self.manifest.version
    }
}

impl fmt::Display for PackageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.manifest.id, self.manifest.version)
    }
}

/// `<id>.<version>.tar.gz`
pub fn archive_file_name(id: &str, version: &Version) -> String {
    format!("{}.{}{}", id, version, ARCHIVE_EXTENSION)
}

/// Split an archive file name back into id and version
///
/// Ids may contain dots, so the first split whose remainder parses as a
/// version wins.
pub fn parse_archive_file_name(file_name: &str) -> Option<(String, Version)> {
    let stem = file_name.strip_suffix(ARCHIVE_EXTENSION)?;
    stem.match_indices('.').find_map(|(index, _)| {
        let id = &stem[..index];
        let version = Version::parse(&stem[index + 1..]).ok()?;
        (!id.is_empty()).then(|| (id.to_string(), version))
    })
}

/// Whether a package-relative path is culture-specific content for `language`
///
/// Only files under `lib/` with a path segment equal to the culture qualify.
pub fn is_culture_file(relative_path: &str, language: &str) -> bool {
    let path = Path::new(relative_path);
    let mut components = path.components().map(|c| c.as_os_str().to_string_lossy());

    let in_lib = components
        .next()
        .is_some_and(|first| first.eq_ignore_ascii_case("lib"));
    let parent_segments: Vec<_> = path
        .parent()
        .map(|p| {
            p.components()
                .skip(1)
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();

    in_lib && parent_segments.iter().any(|s| s.eq_ignore_ascii_case(language))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn satellite(id: &str, language: &str, dep_id: &str, req: &str) -> PackageManifest {
        let mut manifest = PackageManifest::new(id, v("1.0.0"));
        manifest.language = Some(language.to_string());
        manifest.dependencies.push(PackageDependency {
            id: dep_id.to_string(),
            version: VersionReq::parse(req).unwrap(),
        });
        manifest
    }

    #[test]
    fn test_manifest_json() {
        let manifest = PackageManifest::from_json(
            br#"{
                "id": "Widgets",
                "version": "1.2.3-beta.1",
                "dependencies": [{ "id": "Core", "version": ">=1.0.0" }, { "id": "Any" }],
                "minClientVersion": "0.1.0",
                "frameworks": ["net45"]
            }"#,
        )
        .unwrap();

        assert_eq!(manifest.id, "Widgets");
        assert_eq!(manifest.version, v("1.2.3-beta.1"));
        assert_eq!(manifest.dependencies[1].version, VersionReq::STAR);
        assert_eq!(manifest.min_client_version, Some(v("0.1.0")));

        assert!(PackageManifest::from_json(br#"{ "id": " ", "version": "1.0.0" }"#).is_err());
    }

    #[test]
    fn test_satellite_detection() {
        let manifest = satellite("Widgets.fr", "fr", "Widgets", "=1.0.0");
        assert_eq!(manifest.satellite_of(), Some(("Widgets".to_string(), v("1.0.0"))));

        // Not exact
        assert!(satellite("Widgets.fr", "fr", "Widgets", ">=1.0.0").satellite_of().is_none());
        // Wrong version
        assert!(satellite("Widgets.fr", "fr", "Widgets", "=2.0.0").satellite_of().is_none());
        // Id does not carry the culture
        assert!(satellite("Widgets", "fr", "Core", "=1.0.0").satellite_of().is_none());
        // No language
        let mut plain = satellite("Widgets.fr", "fr", "Widgets", "=1.0.0");
        plain.language = None;
        assert!(plain.satellite_of().is_none());
    }

    #[test]
    fn test_check_installable() {
        let client = v("1.0.0");
        let mut manifest = PackageManifest::new("A", v("1.0.0"));
        assert!(manifest.check_installable(Some("net45"), &client).is_ok());

        manifest.frameworks = vec!["NET45".to_string()];
        assert!(manifest.check_installable(Some("net45"), &client).is_ok());
        assert!(manifest.check_installable(None, &client).is_ok());
        assert!(matches!(
            manifest.check_installable(Some("net20"), &client),
            Err(Error::IncompatibleFramework { .. })
        ));

        manifest.min_client_version = Some(v("2.0.0"));
        assert!(matches!(
            manifest.check_installable(Some("net45"), &client),
            Err(Error::MinClientVersion { .. })
        ));
    }

    #[test]
    fn test_archive_file_names() {
        assert_eq!(archive_file_name("My.Pkg", &v("1.0.0")), "My.Pkg.1.0.0.tar.gz");
        assert_eq!(
            parse_archive_file_name("My.Pkg.1.0.0.tar.gz"),
            Some(("My.Pkg".to_string(), v("1.0.0")))
        );
        assert_eq!(
            parse_archive_file_name("Pkg.2.1.0.0-rc.1.tar.gz"),
            Some(("Pkg.2".to_string(), v("1.0.0-rc.1")))
        );
        assert_eq!(parse_archive_file_name("readme.txt"), None);
        assert_eq!(parse_archive_file_name("noversion.tar.gz"), None);
    }

    #[test]
    fn test_culture_files() {
        assert!(is_culture_file("lib/net45/fr/Widgets.resources.dll", "fr"));
        assert!(is_culture_file("lib/FR/strings.res", "fr"));
        assert!(!is_culture_file("lib/net45/Widgets.dll", "fr"));
        assert!(!is_culture_file("content/fr/readme.txt", "fr"));
        assert!(!is_culture_file("fr/lib/x.dll", "fr"));
        assert!(!is_culture_file("lib/fr", "fr"));
    }
}
