// src/repository/local.rs

//! The install root seen as a repository of installed packages
//!
//! Side-by-side installs live in `<id>.<version>/`, exclusive installs in
//! `<id>/`. A directory counts as installed once its `stowage.json` exists,
//! which is the last thing extraction publishes.

use crate::db::STATE_DIR;
use crate::error::Result;
use crate::packages::archive::{MANIFEST_FILE_NAME, read_installed_manifest};
use crate::packages::manifest::PackageManifest;
use semver::Version;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct LocalPackageRepository {
    root: PathBuf,
    side_by_side: bool,
}

impl LocalPackageRepository {
    pub fn new(root: impl Into<PathBuf>, side_by_side: bool) -> Self {
        Self {
            root: root.into(),
            side_by_side,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_side_by_side(&self) -> bool {
        self.side_by_side
    }

    /// Directory a package is (or would be) installed into
    pub fn package_dir(&self, id: &str, version: &Version) -> PathBuf {
        if self.side_by_side {
            self.root.join(format!("{}.{}", id, version))
        } else {
            self.root.join(id)
        }
    }

    /// Cheap presence check by directory, without reading metadata
    pub fn is_present(&self, id: &str, version: &Version) -> bool {
        self.package_dir(id, version).join(MANIFEST_FILE_NAME).is_file()
    }

    /// Whether `id` is installed; `None` asks for any version
    pub fn exists(&self, id: &str, version: Option<&Version>) -> Result<bool> {
        if let (true, Some(version)) = (self.side_by_side, version) {
            return Ok(self.is_present(id, version));
        }
        Ok(self
            .find_installed(id)?
            .iter()
            .any(|(manifest, _)| version.is_none_or(|v| &manifest.version == v)))
    }

    /// Installed copies of `id` with their directories, lowest version first
    pub fn find_installed(&self, id: &str) -> Result<Vec<(PackageManifest, PathBuf)>> {
        let mut found: Vec<_> = self
            .installed()?
            .into_iter()
            .filter(|(manifest, _)| manifest.id.eq_ignore_ascii_case(id))
            .collect();
        found.sort_by(|a, b| a.0.version.cmp(&b.0.version));
        Ok(found)
    }

    /// Every installed package in the root
    pub fn installed(&self) -> Result<Vec<(PackageManifest, PathBuf)>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut packages = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') || name == STATE_DIR || !entry.file_type()?.is_dir() {
                continue;
            }

            let dir = entry.path();
            if !dir.join(MANIFEST_FILE_NAME).is_file() {
                continue;
            }
            match read_installed_manifest(&dir) {
                Ok(manifest) => packages.push((manifest, dir)),
                Err(e) => warn!("Ignoring unreadable package in {}: {}", dir.display(), e),
            }
        }
        Ok(packages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn install(dir: &Path, id: &str, version: &str) {
        fs::create_dir_all(dir).unwrap();
        let manifest = PackageManifest::new(id, v(version));
        fs::write(
            dir.join(MANIFEST_FILE_NAME),
            serde_json::to_vec(&manifest).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn test_side_by_side_layout() {
        let root = TempDir::new().unwrap();
        let local = LocalPackageRepository::new(root.path(), true);

        assert_eq!(
            local.package_dir("Widgets", &v("1.0.0")),
            root.path().join("Widgets.1.0.0")
        );
        install(&root.path().join("Widgets.1.0.0"), "Widgets", "1.0.0");
        install(&root.path().join("Widgets.2.0.0"), "Widgets", "2.0.0");
        // Half-written directory without a manifest
        fs::create_dir_all(root.path().join("Widgets.3.0.0/lib")).unwrap();

        assert!(local.exists("Widgets", Some(&v("1.0.0"))).unwrap());
        assert!(!local.exists("Widgets", Some(&v("3.0.0"))).unwrap());
        assert!(local.exists("widgets", None).unwrap());

        let versions: Vec<_> = local
            .find_installed("Widgets")
            .unwrap()
            .into_iter()
            .map(|(m, _)| m.version)
            .collect();
        assert_eq!(versions, vec![v("1.0.0"), v("2.0.0")]);
    }

    #[test]
    fn test_exclusive_layout() {
        let root = TempDir::new().unwrap();
        let local = LocalPackageRepository::new(root.path(), false);

        assert_eq!(local.package_dir("Widgets", &v("1.0.0")), root.path().join("Widgets"));
        install(&root.path().join("Widgets"), "Widgets", "1.0.0");
        fs::create_dir_all(root.path().join(STATE_DIR)).unwrap();

        assert!(local.exists("Widgets", None).unwrap());
        assert!(local.exists("Widgets", Some(&v("1.0.0"))).unwrap());
        assert!(!local.exists("Widgets", Some(&v("2.0.0"))).unwrap());
        assert_eq!(local.installed().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_root_is_empty() {
        let root = TempDir::new().unwrap();
        let local = LocalPackageRepository::new(root.path().join("absent"), true);
        assert!(local.installed().unwrap().is_empty());
        assert!(!local.exists("Widgets", None).unwrap());
    }
}
