// src/repository/remote.rs

//! HTTP repository with a JSON package index
//!
//! The source URL serves `index.json`:
//!
//! ```json
//! { "packages": [ { "id": "Widgets", "version": "1.0.0", ...,
//!                   "download_url": "Widgets.1.0.0.tar.gz",
//!                   "checksum": "<sha256>", "size": 1234 } ] }
//! ```
//!
//! Relative download URLs resolve against the source URL. Archives are
//! downloaded into a local directory and verified before use.

use super::client::{RepositoryClient, verify_checksum};
use super::{CredentialProvider, PackageRepository};
use crate::error::{Error, Result};
use crate::packages::manifest::{PackageHandle, PackageManifest, archive_file_name};
use crate::sources::Credentials;
use reqwest::StatusCode;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Index file name under the source URL
pub const INDEX_FILE_NAME: &str = "index.json";

/// Repository index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoryIndex {
    pub packages: Vec<IndexEntry>,
}

/// Package entry in the repository index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    #[serde(flatten)]
    pub manifest: PackageManifest,
    pub download_url: String,
    pub checksum: String,
    #[serde(default)]
    pub size: i64,
}

pub struct RemoteRepository {
    base_url: String,
    download_dir: PathBuf,
    client: RepositoryClient,
    credentials: Mutex<Option<Credentials>>,
    credential_provider: Option<Arc<dyn CredentialProvider>>,
    index: Mutex<Option<Arc<RepositoryIndex>>>,
}

impl RemoteRepository {
    pub fn new(base_url: &str, download_dir: &Path) -> Result<Self> {
        Ok(Self {
            base_url: base_url.to_string(),
            download_dir: download_dir.to_path_buf(),
            client: RepositoryClient::new()?,
            credentials: Mutex::new(None),
            credential_provider: None,
            index: Mutex::new(None),
        })
    }

    pub fn with_credentials(self, credentials: Option<Credentials>) -> Self {
        if let Ok(mut slot) = self.credentials.lock() {
            *slot = credentials;
        }
        self
    }

    pub fn with_credential_provider(mut self, provider: Option<Arc<dyn CredentialProvider>>) -> Self {
        self.credential_provider = provider;
        self
    }

    pub fn with_client(mut self, client: RepositoryClient) -> Self {
        self.client = client;
        self
    }

    /// Resolve a possibly relative URL against the source URL
    pub fn resolve_url(&self, url: &str) -> String {
        if url.contains("://") {
            return url.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            url.trim_start_matches('/')
        )
    }

    fn current_credentials(&self) -> Option<Credentials> {
        self.credentials.lock().ok().and_then(|c| c.clone())
    }

    /// GET with stored credentials, asking the provider once on a 401
    fn get(&self, url: &str) -> Result<reqwest::blocking::Response> {
        let credentials = self.current_credentials();
        let response = self.client.get(url, credentials.as_ref())?;

        if response.status() != StatusCode::UNAUTHORIZED || credentials.is_some() {
            return check_status(response, url);
        }

        let Some(provider) = &self.credential_provider else {
            return check_status(response, url);
        };
        let Some(prompted) = provider.get_credentials(&self.base_url) else {
            return check_status(response, url);
        };

        debug!("Retrying {} with supplied credentials", url);
        let retried = self.client.get(url, Some(&prompted))?;
        if retried.status().is_success() {
            if let Ok(mut slot) = self.credentials.lock() {
                *slot = Some(prompted);
            }
        }
        check_status(retried, url)
    }

    /// The index, fetched once per repository instance
    pub fn index(&self) -> Result<Arc<RepositoryIndex>> {
        let mut slot = self
            .index
            .lock()
            .map_err(|_| Error::DownloadError("index cache poisoned".to_string()))?;
        if let Some(index) = slot.as_ref() {
            return Ok(Arc::clone(index));
        }

        let url = self.resolve_url(INDEX_FILE_NAME);
        info!("Fetching repository index from {}", url);
        let index: RepositoryIndex = self
            .get(&url)?
            .json()
            .map_err(|e| Error::DownloadError(format!("Failed to parse index JSON: {}", e)))?;
        info!("Index of {} lists {} packages", self.base_url, index.packages.len());

        let index = Arc::new(index);
        *slot = Some(Arc::clone(&index));
        Ok(index)
    }

    fn entries_for(&self, id: &str) -> Result<Vec<IndexEntry>> {
        Ok(self
            .index()?
            .packages
            .iter()
            .filter(|e| e.manifest.id.eq_ignore_ascii_case(id))
            .cloned()
            .collect())
    }
}

fn check_status(
    response: reqwest::blocking::Response,
    url: &str,
) -> Result<reqwest::blocking::Response> {
    if !response.status().is_success() {
        return Err(Error::DownloadError(format!(
            "HTTP {} from {}",
            response.status(),
            url
        )));
    }
    Ok(response)
}

impl PackageRepository for RemoteRepository {
    fn source(&self) -> &str {
        &self.base_url
    }

    fn exists(&self, id: &str, version: Option<&Version>) -> Result<bool> {
        Ok(self
            .entries_for(id)?
            .iter()
            .any(|e| version.is_none_or(|v| &e.manifest.version == v)))
    }

    fn find_package(&self, id: &str, version: &Version) -> Result<Option<PackageHandle>> {
        let Some(entry) = self
            .entries_for(id)?
            .into_iter()
            .find(|e| &e.manifest.version == version)
        else {
            return Ok(None);
        };

        let dest = self
            .download_dir
            .join(archive_file_name(&entry.manifest.id, &entry.manifest.version));

        // A previous download that still verifies is reused
        if !(dest.is_file() && verify_checksum(&dest, &entry.checksum).is_ok()) {
            let url = self.resolve_url(&entry.download_url);
            info!("Downloading {} {} from {}", entry.manifest.id, version, url);
            let response = self.get(&url)?;
            self.client.save_response(response, &dest)?;

            if let Err(e) = verify_checksum(&dest, &entry.checksum) {
                let _ = std::fs::remove_file(&dest);
                return Err(e);
            }
        }

        Ok(Some(PackageHandle {
            manifest: entry.manifest,
            archive: dest,
            source: self.base_url.clone(),
        }))
    }

    fn find_all_versions(&self, id: &str) -> Result<Vec<Version>> {
        let mut versions: Vec<Version> = self
            .entries_for(id)?
            .into_iter()
            .map(|e| e.manifest.version)
            .collect();
        versions.sort();
        versions.dedup();
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_index_entry_json() {
        let index: RepositoryIndex = serde_json::from_str(
            r#"{
                "packages": [{
                    "id": "Widgets",
                    "version": "1.0.0",
                    "dependencies": [{ "id": "Core", "version": ">=1.0.0" }],
                    "download_url": "Widgets.1.0.0.tar.gz",
                    "checksum": "abc",
                    "size": 10
                }]
            }"#,
        )
        .unwrap();

        let entry = &index.packages[0];
        assert_eq!(entry.manifest.id, "Widgets");
        assert_eq!(entry.manifest.dependencies.len(), 1);
        assert_eq!(entry.download_url, "Widgets.1.0.0.tar.gz");
    }

    #[test]
    fn test_resolve_url() {
        let dir = TempDir::new().unwrap();
        let repo = RemoteRepository::new("https://example.com/feed/", dir.path()).unwrap();

        assert_eq!(repo.resolve_url("index.json"), "https://example.com/feed/index.json");
        assert_eq!(
            repo.resolve_url("/pkgs/A.1.0.0.tar.gz"),
            "https://example.com/feed/pkgs/A.1.0.0.tar.gz"
        );
        assert_eq!(
            repo.resolve_url("https://cdn.example.com/A.1.0.0.tar.gz"),
            "https://cdn.example.com/A.1.0.0.tar.gz"
        );
    }

    #[test]
    fn test_unreachable_source_fails_lookup() {
        let dir = TempDir::new().unwrap();
        let repo = RemoteRepository::new("http://127.0.0.1:1/feed", dir.path())
            .unwrap()
            .with_client(
                RepositoryClient::new()
                    .unwrap()
                    .with_retry(1, std::time::Duration::from_millis(1)),
            );

        assert!(matches!(repo.exists("Widgets", None), Err(Error::DownloadError(_))));
    }
}
