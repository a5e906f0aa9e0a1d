// src/packages/archive.rs

//! Default package archive support
//!
//! A package archive is a gzip-compressed tarball with the manifest stored
//! as `stowage.json` at its root. Everything else is package content.

use super::manifest::{PackageHandle, PackageManifest, archive_file_name};
use super::traits::{Extraction, PackageExtractor, PackageFile};
use crate::error::{Error, Result};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Manifest file name inside archives and install directories
pub const MANIFEST_FILE_NAME: &str = "stowage.json";

/// Read only the manifest of an archive
pub fn read_manifest(archive_path: &Path) -> Result<PackageManifest> {
    let file = File::open(archive_path)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));

    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.path()?.as_ref() == Path::new(MANIFEST_FILE_NAME) {
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes)?;
            return PackageManifest::from_json(&bytes);
        }
    }

    Err(Error::InvalidManifest(format!(
        "{} has no {}",
        archive_path.display(),
        MANIFEST_FILE_NAME
    )))
}

/// Read the manifest stored in an install directory
pub fn read_installed_manifest(package_dir: &Path) -> Result<PackageManifest> {
    let bytes = fs::read(package_dir.join(MANIFEST_FILE_NAME))?;
    PackageManifest::from_json(&bytes)
}

/// SHA-256 of a file as lowercase hex
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Builds package archives
#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    manifest: PackageManifest,
    files: Vec<(String, Vec<u8>)>,
}

impl ArchiveBuilder {
    pub fn new(manifest: PackageManifest) -> Self {
        Self {
            manifest,
            files: Vec::new(),
        }
    }

    pub fn file(mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.files.push((path.into(), content.into()));
        self
    }

    /// Write `<id>.<version>.tar.gz` into `dir` and return its path
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(archive_file_name(&self.manifest.id, &self.manifest.version));

        let encoder = GzEncoder::new(File::create(&path)?, Compression::default());
        let mut builder = tar::Builder::new(encoder);

        let manifest = serde_json::to_vec_pretty(&self.manifest)?;
        append(&mut builder, MANIFEST_FILE_NAME, &manifest)?;
        for (name, content) in &self.files {
            append(&mut builder, name, content)?;
        }

        builder.into_inner()?.finish()?;
        debug!("Wrote package archive {}", path.display());
        Ok(path)
    }
}

fn append<W: io::Write>(builder: &mut tar::Builder<W>, path: &str, content: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, path, content)?;
    Ok(())
}

/// Extracts archives through a staging directory next to the target
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveExtractor;

impl PackageExtractor for ArchiveExtractor {
    fn extract(&self, package: &PackageHandle, target: &Path) -> Result<Extraction> {
        if target.join(MANIFEST_FILE_NAME).is_file() {
            debug!("{} already present at {}", package, target.display());
            return Ok(Extraction {
                files: Vec::new(),
                already_present: true,
            });
        }

        let parent = target
            .parent()
            .ok_or_else(|| Error::InitError(format!("Invalid install path {}", target.display())))?;
        fs::create_dir_all(parent)?;

        let staging = tempfile::Builder::new()
            .prefix(".stowage-staging-")
            .tempdir_in(parent)?;

        let mut archive = tar::Archive::new(GzDecoder::new(File::open(&package.archive)?));
        let mut files = Vec::new();
        for entry in archive.entries()? {
            let mut entry = entry?;
            let relative = entry.path()?.to_string_lossy().replace('\\', "/");
            let is_file = entry.header().entry_type().is_file();

            if !entry.unpack_in(staging.path())? {
                return Err(Error::InvalidManifest(format!(
                    "{} contains an unsafe path '{}'",
                    package, relative
                )));
            }

            if is_file {
                let written = staging.path().join(&relative);
                files.push(PackageFile {
                    size: fs::metadata(&written)?.len() as i64,
                    sha256: sha256_file(&written)?,
                    path: relative,
                });
            }
        }

        if !staging.path().join(MANIFEST_FILE_NAME).is_file() {
            return Err(Error::InvalidManifest(format!(
                "{} has no {}",
                package.archive.display(),
                MANIFEST_FILE_NAME
            )));
        }

        // The rename publishes the whole directory at once; losing a race to
        // another writer of the same package is fine.
        if let Err(e) = fs::rename(staging.path(), target) {
            if target.join(MANIFEST_FILE_NAME).is_file() {
                debug!("{} was installed concurrently at {}", package, target.display());
                return Ok(Extraction {
                    files: Vec::new(),
                    already_present: true,
                });
            }
            return Err(e.into());
        }

        info!("Extracted {} ({} files) to {}", package, files.len(), target.display());
        Ok(Extraction {
            files,
            already_present: false,
        })
    }
}
