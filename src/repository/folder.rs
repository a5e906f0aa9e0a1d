// src/repository/folder.rs

//! Repository backed by a directory of package archives

use super::PackageRepository;
use crate::error::Result;
use crate::packages::archive::read_manifest;
use crate::packages::manifest::{PackageHandle, archive_file_name, parse_archive_file_name};
use semver::Version;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A flat directory of `<id>.<version>.tar.gz` archives
///
/// Used for file-system sources and for the machine-wide package cache.
#[derive(Debug, Clone)]
pub struct FolderRepository {
    root: PathBuf,
    source: String,
}

impl FolderRepository {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            source: root.to_string_lossy().into_owned(),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path an archive for this identity would have
    pub fn archive_path(&self, id: &str, version: &Version) -> PathBuf {
        self.root.join(archive_file_name(id, version))
    }

    /// Archives in the folder as (id, version, path); a missing folder is empty
    fn archives(&self) -> Result<Vec<(String, Version, PathBuf)>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut archives = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            if let Some((id, version)) = parse_archive_file_name(&name.to_string_lossy()) {
                archives.push((id, version, entry.path()));
            }
        }
        Ok(archives)
    }

    /// Case-insensitive lookup of an exact archive
    fn locate(&self, id: &str, version: &Version) -> Result<Option<PathBuf>> {
        let direct = self.archive_path(id, version);
        if direct.is_file() {
            return Ok(Some(direct));
        }

        Ok(self
            .archives()?
            .into_iter()
            .find(|(found_id, found_version, _)| found_id.eq_ignore_ascii_case(id) && found_version == version)
            .map(|(_, _, path)| path))
    }
}

impl PackageRepository for FolderRepository {
    fn source(&self) -> &str {
        &self.source
    }

    fn exists(&self, id: &str, version: Option<&Version>) -> Result<bool> {
        match version {
            Some(version) => Ok(self.locate(id, version)?.is_some()),
            None => Ok(!self.find_all_versions(id)?.is_empty()),
        }
    }

    fn find_package(&self, id: &str, version: &Version) -> Result<Option<PackageHandle>> {
        let Some(archive) = self.locate(id, version)? else {
            return Ok(None);
        };

        debug!("Found {} {} in {}", id, version, self.source);
        let manifest = read_manifest(&archive)?;
        Ok(Some(PackageHandle {
            manifest,
            archive,
            source: self.source.clone(),
        }))
    }

    fn find_all_versions(&self, id: &str) -> Result<Vec<Version>> {
        let mut versions: Vec<Version> = self
            .archives()?
            .into_iter()
            .filter(|(found_id, _, _)| found_id.eq_ignore_ascii_case(id))
            .map(|(_, version, _)| version)
            .collect();
        versions.sort();
        versions.dedup();
        Ok(versions)
    }
}
