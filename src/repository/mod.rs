// src/repository/mod.rs

//! Package repositories
//!
//! This module provides:
//! - The `PackageRepository` seam every source is reached through
//! - Folder and HTTP repository implementations behind a factory
//! - The aggregate that presents many repositories as one
//! - The view of the install root as the local repository

pub mod aggregate;
pub mod client;
pub mod folder;
pub mod local;
pub mod remote;

pub use aggregate::AggregateRepository;
pub use folder::FolderRepository;
pub use local::LocalPackageRepository;
pub use remote::RemoteRepository;

use crate::error::{Error, Result};
use crate::packages::manifest::PackageHandle;
use crate::sources::{Credentials, PackageSource};
use semver::{Version, VersionReq};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// A place packages can be found in
pub trait PackageRepository: Send + Sync {
    /// Location this repository was created from
    fn source(&self) -> &str;

    /// Whether the package exists; `None` asks for any version
    fn exists(&self, id: &str, version: Option<&Version>) -> Result<bool>;

    /// Fetch one exact package, making its archive available locally
    fn find_package(&self, id: &str, version: &Version) -> Result<Option<PackageHandle>>;

    /// Every version of `id` this repository carries, ascending
    fn find_all_versions(&self, id: &str) -> Result<Vec<Version>>;
}

/// Builds a repository for a package source
pub trait RepositoryFactory: Send + Sync {
    fn create(&self, source: &PackageSource) -> Result<Arc<dyn PackageRepository>>;
}

/// Supplies credentials when a source demands authentication
pub trait CredentialProvider: Send + Sync {
    fn get_credentials(&self, source: &str) -> Option<Credentials>;
}

/// Whether `version` satisfies `req` under the prerelease policy
///
/// semver only matches a prerelease when a comparator names it; allowing
/// prereleases additionally opens the unconstrained requirement to them.
pub fn satisfies(req: &VersionReq, version: &Version, allow_prerelease: bool) -> bool {
    req.matches(version) || (allow_prerelease && !version.pre.is_empty() && *req == VersionReq::STAR)
}

/// Creates folder repositories for directories and HTTP repositories for URLs
pub struct DefaultRepositoryFactory {
    download_dir: PathBuf,
    credential_provider: Option<Arc<dyn CredentialProvider>>,
}

impl DefaultRepositoryFactory {
    /// `download_dir` receives archives fetched from remote sources
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
            credential_provider: None,
        }
    }

    pub fn with_credential_provider(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.credential_provider = Some(provider);
        self
    }
}

impl RepositoryFactory for DefaultRepositoryFactory {
    fn create(&self, source: &PackageSource) -> Result<Arc<dyn PackageRepository>> {
        let location = source.location.as_str();
        let lowered = location.to_ascii_lowercase();

        if lowered.starts_with("http://") || lowered.starts_with("https://") {
            debug!("Creating remote repository for {}", source);
            let repository = RemoteRepository::new(location, &self.download_dir)?
                .with_credentials(source.credentials.clone())
                .with_credential_provider(self.credential_provider.clone());
            return Ok(Arc::new(repository));
        }

        let path = Path::new(location);
        if path.is_dir() {
            debug!("Creating folder repository for {}", source);
            return Ok(Arc::new(FolderRepository::new(path)));
        }

        Err(Error::SourceConstruction {
            source_name: source.name.clone(),
            message: format!("'{}' is neither an HTTP URL nor an existing directory", location),
        })
    }
}
