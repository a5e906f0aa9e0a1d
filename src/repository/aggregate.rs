// src/repository/aggregate.rs

//! Many repositories queried as one
//!
//! Members are queried in order (the local cache first when present) and
//! lookups stop at the first definitive answer. With `ignore_failing` set, a
//! member that fails is logged and skipped; otherwise its error propagates.

use super::{PackageRepository, RepositoryFactory, satisfies};
use crate::error::Result;
use crate::packages::manifest::PackageHandle;
use crate::sources::PackageSource;
use semver::{Version, VersionReq};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct AggregateRepository {
    repositories: Vec<Arc<dyn PackageRepository>>,
    ignore_failing: bool,
}

impl AggregateRepository {
    pub fn new(repositories: Vec<Arc<dyn PackageRepository>>, ignore_failing: bool) -> Self {
        Self {
            repositories,
            ignore_failing,
        }
    }

    /// One repository per enabled source, the cache ahead of all of them
    pub fn get_aggregate(
        factory: &dyn RepositoryFactory,
        sources: &[PackageSource],
        ignore_failing: bool,
        cache: Option<Arc<dyn PackageRepository>>,
    ) -> Result<Self> {
        let mut repositories = Vec::with_capacity(sources.len() + 1);
        repositories.extend(cache);

        for source in sources.iter().filter(|s| s.is_enabled) {
            match factory.create(source) {
                Ok(repository) => repositories.push(repository),
                Err(e) if ignore_failing => {
                    warn!("Skipping package source {}: {}", source, e);
                }
                Err(e) => return Err(e),
            }
        }

        debug!("Aggregate built over {} repositories", repositories.len());
        Ok(Self::new(repositories, ignore_failing))
    }

    pub fn repositories(&self) -> &[Arc<dyn PackageRepository>] {
        &self.repositories
    }

    /// First `Some` answer across members
    fn first<T>(
        &self,
        mut query: impl FnMut(&dyn PackageRepository) -> Result<Option<T>>,
    ) -> Result<Option<T>> {
        for repository in &self.repositories {
            match query(repository.as_ref()) {
                Ok(Some(found)) => return Ok(Some(found)),
                Ok(None) => {}
                Err(e) if self.ignore_failing => {
                    warn!("Repository {} failed: {}", repository.source(), e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Highest version of `id`, prereleases only when allowed
    pub fn find_latest(&self, id: &str, allow_prerelease: bool) -> Result<Option<PackageHandle>> {
        let versions = self.find_all_versions(id)?;
        let Some(latest) = versions
            .into_iter()
            .rev()
            .find(|v| allow_prerelease || v.pre.is_empty())
        else {
            return Ok(None);
        };
        self.find_package(id, &latest)
    }

    /// Lowest version of `id` satisfying `req`
    pub fn find_lowest_matching(
        &self,
        id: &str,
        req: &VersionReq,
        allow_prerelease: bool,
    ) -> Result<Option<PackageHandle>> {
        let versions = self.find_all_versions(id)?;
        for version in versions.iter().filter(|v| satisfies(req, v, allow_prerelease)) {
            if let Some(handle) = self.find_package(id, version)? {
                return Ok(Some(handle));
            }
        }
        Ok(None)
    }
}

impl PackageRepository for AggregateRepository {
    fn source(&self) -> &str {
        "(aggregate)"
    }

    fn exists(&self, id: &str, version: Option<&Version>) -> Result<bool> {
        Ok(self
            .first(|repository| Ok(repository.exists(id, version)?.then_some(())))?
            .is_some())
    }

    fn find_package(&self, id: &str, version: &Version) -> Result<Option<PackageHandle>> {
        self.first(|repository| repository.find_package(id, version))
    }

    fn find_all_versions(&self, id: &str) -> Result<Vec<Version>> {
        let mut versions = Vec::new();
        for repository in &self.repositories {
            match repository.find_all_versions(id) {
                Ok(found) => versions.extend(found),
                Err(e) if self.ignore_failing => {
                    warn!("Repository {} failed: {}", repository.source(), e);
                }
                Err(e) => return Err(e),
            }
        }
        versions.sort();
        versions.dedup();
        Ok(versions)
    }
}
