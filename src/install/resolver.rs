// src/install/resolver.rs

//! Dependency resolution
//!
//! Builds the full install plan for one package before anything is written.
//! Each dependency resolves to the lowest available version satisfying its
//! requirement; dependencies already installed in a satisfying version are
//! left out of the plan. The plan is ordered dependencies first.

use crate::error::{Error, Result};
use crate::packages::manifest::PackageHandle;
use crate::repository::{AggregateRepository, LocalPackageRepository, satisfies};
use semver::Version;
use std::collections::HashMap;
use tracing::debug;

pub struct Resolver<'a> {
    aggregate: &'a AggregateRepository,
    local: &'a LocalPackageRepository,
    framework: Option<&'a str>,
    client_version: &'a Version,
    allow_prerelease: bool,
    ignore_dependencies: bool,
}

impl<'a> Resolver<'a> {
    pub fn new(
        aggregate: &'a AggregateRepository,
        local: &'a LocalPackageRepository,
        client_version: &'a Version,
    ) -> Self {
        Self {
            aggregate,
            local,
            framework: None,
            client_version,
            allow_prerelease: false,
            ignore_dependencies: false,
        }
    }

    pub fn framework(mut self, framework: Option<&'a str>) -> Self {
        self.framework = framework;
        self
    }

    pub fn allow_prerelease(mut self, allow: bool) -> Self {
        self.allow_prerelease = allow;
        self
    }

    pub fn ignore_dependencies(mut self, ignore: bool) -> Self {
        self.ignore_dependencies = ignore;
        self
    }

    /// Install plan for `root`, dependencies before dependents, `root` last
    pub fn resolve(&self, root: PackageHandle) -> Result<Vec<PackageHandle>> {
        let mut walk = Walk::default();
        self.visit(root, &mut walk)?;
        debug!(
            "Resolved plan: {}",
            walk.plan.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(", ")
        );
        Ok(walk.plan)
    }

    fn visit(&self, package: PackageHandle, walk: &mut Walk) -> Result<()> {
        package
            .manifest
            .check_installable(self.framework, self.client_version)?;

        let key = package.id().to_ascii_lowercase();
        walk.stack.push(package.id().to_string());
        walk.chosen.insert(key, package.version().clone());

        if !self.ignore_dependencies {
            for dependency in &package.manifest.dependencies {
                let dep_key = dependency.id.to_ascii_lowercase();

                if walk.stack.iter().any(|id| id.eq_ignore_ascii_case(&dependency.id)) {
                    return Err(Error::DependencyResolution(format!(
                        "circular dependency: {} -> {}",
                        walk.stack.join(" -> "),
                        dependency.id
                    )));
                }

                if let Some(chosen) = walk.chosen.get(&dep_key) {
                    if satisfies(&dependency.version, chosen, true) {
                        continue;
                    }
                    return Err(Error::DependencyResolution(format!(
                        "{} requires {} {}, but {} is already selected",
                        package, dependency.id, dependency.version, chosen
                    )));
                }

                let installed = self.local.find_installed(&dependency.id)?;
                if installed
                    .iter()
                    .any(|(manifest, _)| satisfies(&dependency.version, &manifest.version, true))
                {
                    debug!("{} {} already installed", dependency.id, dependency.version);
                    continue;
                }

                if let (false, Some((manifest, _))) = (self.local.is_side_by_side(), installed.first()) {
                    return Err(Error::DependencyResolution(format!(
                        "{} requires {} {}, but {} is installed",
                        package, dependency.id, dependency.version, manifest.version
                    )));
                }

                let resolved = self
                    .aggregate
                    .find_lowest_matching(&dependency.id, &dependency.version, self.allow_prerelease)?
                    .ok_or_else(|| {
                        Error::DependencyResolution(format!(
                            "{} requires {} {}, which was not found in any source",
                            package, dependency.id, dependency.version
                        ))
                    })?;

                self.visit(resolved, walk)?;
            }
        }

        walk.stack.pop();
        walk.plan.push(package);
        Ok(())
    }
}

/// Check that every dependency of the plan is installed right now
///
/// Resolution skips dependencies that were installed when it ran; one of
/// those may belong to a concurrent operation that has since rolled back.
pub fn verify_installed(local: &LocalPackageRepository, plan: &[PackageHandle]) -> Result<()> {
    for package in plan {
        for dependency in &package.manifest.dependencies {
            let present = local
                .find_installed(&dependency.id)?
                .iter()
                .any(|(manifest, _)| satisfies(&dependency.version, &manifest.version, true));
            if !present {
                return Err(Error::DependencyResolution(format!(
                    "{} requires {} {}, which is no longer installed",
                    package, dependency.id, dependency.version
                )));
            }
        }
    }
    Ok(())
}

#[derive(Default)]
struct Walk {
    /// Ids currently being visited, for cycle detection
    stack: Vec<String>,
    /// Version selected per lowercase id
    chosen: HashMap<String, Version>,
    plan: Vec<PackageHandle>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::archive::ArchiveBuilder;
    use crate::packages::manifest::{PackageDependency, PackageManifest};
    use crate::repository::{FolderRepository, PackageRepository};
    use semver::VersionReq;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn publish(dir: &Path, id: &str, version: &str, deps: &[(&str, &str)]) {
        let mut manifest = PackageManifest::new(id, v(version));
        for (dep, req) in deps {
            manifest.dependencies.push(PackageDependency {
                id: dep.to_string(),
                version: VersionReq::parse(req).unwrap(),
            });
        }
        ArchiveBuilder::new(manifest).write_to(dir).unwrap();
    }

    fn aggregate(dir: &Path) -> AggregateRepository {
        AggregateRepository::new(
            vec![Arc::new(FolderRepository::new(dir)) as Arc<dyn PackageRepository>],
            false,
        )
    }

    fn plan_of(plan: &[PackageHandle]) -> Vec<String> {
        plan.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_lowest_matching_dependencies_first() {
        let feed = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        publish(feed.path(), "App", "1.0.0", &[("Lib", ">=1.1.0")]);
        publish(feed.path(), "Lib", "1.0.0", &[]);
        publish(feed.path(), "Lib", "1.2.0", &[("Core", "*")]);
        publish(feed.path(), "Lib", "2.0.0", &[]);
        publish(feed.path(), "Core", "1.0.0", &[]);

        let aggregate = aggregate(feed.path());
        let local = LocalPackageRepository::new(root.path(), true);
        let client = v("1.0.0");
        let app = aggregate.find_package("App", &v("1.0.0")).unwrap().unwrap();

        let plan = Resolver::new(&aggregate, &local, &client).resolve(app).unwrap();
        assert_eq!(plan_of(&plan), vec!["Core 1.0.0", "Lib 1.2.0", "App 1.0.0"]);
    }

    #[test]
    fn test_missing_dependency_and_cycle() {
        let feed = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        publish(feed.path(), "Lonely", "1.0.0", &[("Ghost", "*")]);
        publish(feed.path(), "A", "1.0.0", &[("B", "*")]);
        publish(feed.path(), "B", "1.0.0", &[("A", "*")]);

        let aggregate = aggregate(feed.path());
        let local = LocalPackageRepository::new(root.path(), true);
        let client = v("1.0.0");
        let resolver = Resolver::new(&aggregate, &local, &client);

        let lonely = aggregate.find_package("Lonely", &v("1.0.0")).unwrap().unwrap();
        assert!(matches!(resolver.resolve(lonely), Err(Error::DependencyResolution(_))));

        let a = aggregate.find_package("A", &v("1.0.0")).unwrap().unwrap();
        let err = resolver.resolve(a).unwrap_err();
        assert!(err.to_string().contains("circular"));

        let lonely = aggregate.find_package("Lonely", &v("1.0.0")).unwrap().unwrap();
        let plan = Resolver::new(&aggregate, &local, &client)
            .ignore_dependencies(true)
            .resolve(lonely)
            .unwrap();
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn test_installed_dependency_is_skipped() {
        let feed = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        publish(feed.path(), "App", "1.0.0", &[("Lib", ">=1.0.0")]);
        publish(feed.path(), "Lib", "1.0.0", &[]);

        let installed = root.path().join("Lib.1.5.0");
        std::fs::create_dir_all(&installed).unwrap();
        std::fs::write(
            installed.join("stowage.json"),
            serde_json::to_vec(&PackageManifest::new("Lib", v("1.5.0"))).unwrap(),
        )
        .unwrap();

        let aggregate = aggregate(feed.path());
        let local = LocalPackageRepository::new(root.path(), true);
        let client = v("1.0.0");
        let app = aggregate.find_package("App", &v("1.0.0")).unwrap().unwrap();

        let plan = Resolver::new(&aggregate, &local, &client).resolve(app).unwrap();
        assert_eq!(plan_of(&plan), vec!["App 1.0.0"]);
    }

    #[test]
    fn test_verify_installed_detects_vanished_dependency() {
        let feed = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        publish(feed.path(), "App", "1.0.0", &[("Lib", ">=1.0.0")]);

        let installed = root.path().join("Lib.1.5.0");
        std::fs::create_dir_all(&installed).unwrap();
        std::fs::write(
            installed.join("stowage.json"),
            serde_json::to_vec(&PackageManifest::new("Lib", v("1.5.0"))).unwrap(),
        )
        .unwrap();

        let aggregate = aggregate(feed.path());
        let local = LocalPackageRepository::new(root.path(), true);
        let client = v("1.0.0");
        let app = aggregate.find_package("App", &v("1.0.0")).unwrap().unwrap();

        let plan = Resolver::new(&aggregate, &local, &client).resolve(app).unwrap();
        assert_eq!(plan_of(&plan), vec!["App 1.0.0"]);
        verify_installed(&local, &plan).unwrap();

        // Another operation removes the dependency before this one commits
        std::fs::remove_dir_all(&installed).unwrap();
        let err = verify_installed(&local, &plan).unwrap_err();
        assert!(matches!(err, Error::DependencyResolution(_)));
        assert!(err.to_string().contains("no longer installed"));
    }

    #[test]
    fn test_incompatible_dependency_fails_resolution() {
        let feed = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        publish(feed.path(), "App", "1.0.0", &[("Lib", "*")]);

        let mut lib = PackageManifest::new("Lib", v("1.0.0"));
        lib.frameworks = vec!["net20".to_string()];
        ArchiveBuilder::new(lib).write_to(feed.path()).unwrap();

        let aggregate = aggregate(feed.path());
        let local = LocalPackageRepository::new(root.path(), true);
        let client = v("1.0.0");
        let app = aggregate.find_package("App", &v("1.0.0")).unwrap().unwrap();

        let result = Resolver::new(&aggregate, &local, &client)
            .framework(Some("net45"))
            .resolve(app);
        assert!(matches!(result, Err(Error::IncompatibleFramework { .. })));
    }
}
