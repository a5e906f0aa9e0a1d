// src/config/machine.rs

//! Machine-wide configuration providers

use super::layer::{ConfigLayer, LayerAccess};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Source of centrally provisioned, read-only configuration layers
pub trait MachineWideSettings: Send + Sync {
    /// Layers in the order they are appended to the chain
    fn settings(&self) -> Vec<ConfigLayer>;
}

/// Loads `*.config` files below `<root>/Config/<segment>/...`
///
/// The deepest directory is read first, then each parent up to
/// `<root>/Config`. Files inside one directory are read in name order.
#[derive(Debug, Clone)]
pub struct DirectoryMachineWideSettings {
    root: PathBuf,
    segments: Vec<String>,
}

impl DirectoryMachineWideSettings {
    pub fn new(root: impl Into<PathBuf>, segments: &[&str]) -> Self {
        Self {
            root: root.into(),
            segments: segments.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Directories to scan, most specific first
    fn directories(&self) -> Vec<PathBuf> {
        let base = self.root.join("Config");
        let mut dirs = Vec::with_capacity(self.segments.len() + 1);
        for depth in (0..=self.segments.len()).rev() {
            let mut dir = base.clone();
            for segment in &self.segments[..depth] {
                dir.push(segment);
            }
            dirs.push(dir);
        }
        dirs
    }
}

impl MachineWideSettings for DirectoryMachineWideSettings {
    fn settings(&self) -> Vec<ConfigLayer> {
        self.directories()
            .iter()
            .flat_map(|dir| config_files(dir))
            .filter_map(|path| match ConfigLayer::load(&path, LayerAccess::ReadOnly) {
                Ok(layer) => {
                    debug!("Loaded machine-wide configuration {}", path.display());
                    Some(layer)
                }
                Err(e) => {
                    warn!("Ignoring machine-wide configuration {}: {}", path.display(), e);
                    None
                }
            })
            .collect()
    }
}

fn config_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("config"))
        })
        .collect();
    files.sort();
    files
}
