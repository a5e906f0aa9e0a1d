// src/install/mod.rs

//! Installation orchestration
//!
//! Installs a single package or restores every package a reference manifest
//! lists, resolving through the configured sources and writing into the
//! install root under an operation scope so failures never leave a
//! half-installed package behind.

pub mod consent;
pub mod references;
pub mod resolver;
pub mod satellite;
pub mod scope;
pub mod uninstall;

pub use references::PackageReference;
pub use resolver::Resolver;

use crate::config::{CONFIG_FILE_NAME, CONFIG_SECTION, ConfigLayer, LayerAccess, REPOSITORY_PATH_KEY, Settings};
use crate::db::{self, STATE_DIR, models::OperationKind};
use crate::error::{Error, Result};
use crate::packages::archive::ArchiveExtractor;
use crate::packages::manifest::PackageHandle;
use crate::packages::traits::PackageExtractor;
use crate::repository::{
    AggregateRepository, LocalPackageRepository, PackageRepository, RepositoryFactory,
};
use crate::sources::{PackageSource, PackageSourceProvider, resolve_in};
use rayon::prelude::*;
use scope::OperationScope;
use semver::Version;
use std::path::{Path, PathBuf};
use std::sync::{Arc, mpsc};
use tracing::{debug, info, warn};

/// Upper bound on concurrently restored references
pub const MAX_PARALLEL_RESTORES: usize = 10;

/// Conventional install root under a solution directory
pub const DEFAULT_PACKAGES_DIR: &str = "packages";

/// Version of this client, checked against `minClientVersion`
pub fn client_version() -> Version {
    Version::parse(env!("CARGO_PKG_VERSION")).unwrap_or_else(|_| Version::new(0, 0, 0))
}

#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// Explicit install root; wins over every configured location
    pub output_directory: Option<PathBuf>,
    /// Solution directory, for solution-scoped config and `packages/`
    pub solution_directory: Option<PathBuf>,
    /// Install each version into `<id>.<version>/`; otherwise `<id>/`
    pub allow_side_by_side: bool,
    pub allow_prerelease: bool,
    pub target_framework: Option<String>,
    pub disable_parallel: bool,
    pub require_consent: bool,
    pub ignore_failing_repositories: bool,
    /// Source names or locations; empty means every enabled configured source
    pub sources: Vec<String>,
    /// Skip the local package cache
    pub no_cache: bool,
    pub client_version: Version,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            output_directory: None,
            solution_directory: None,
            allow_side_by_side: true,
            allow_prerelease: false,
            target_framework: None,
            disable_parallel: false,
            require_consent: false,
            ignore_failing_repositories: false,
            sources: Vec::new(),
            no_cache: false,
            client_version: client_version(),
        }
    }
}

/// A package ready to be installed, and how
#[derive(Debug, Clone)]
pub struct InstallUnit {
    pub package: PackageHandle,
    pub kind: UnitKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitKind {
    Normal,
    Satellite {
        runtime_id: String,
        runtime_version: Version,
    },
}

impl InstallUnit {
    pub fn classify(package: PackageHandle) -> Self {
        let kind = match package.manifest.satellite_of() {
            Some((runtime_id, runtime_version)) => UnitKind::Satellite {
                runtime_id,
                runtime_version,
            },
            None => UnitKind::Normal,
        };
        Self { package, kind }
    }
}

/// Outcome of a restore
#[derive(Debug, Default)]
pub struct RestoreSummary {
    /// References that installed at least one package
    pub installed: Vec<String>,
    /// Satellite packages found during dispatch and installed afterwards
    pub satellites: Vec<String>,
    /// References already satisfied by the install root
    pub skipped: Vec<String>,
    /// Satellite references handed off to the post-join phase
    pub deferred: usize,
    pub failures: Vec<(String, Error)>,
}

impl RestoreSummary {
    /// Whether the restore did anything
    pub fn any_installed(&self) -> bool {
        !self.installed.is_empty() || !self.satellites.is_empty() || self.deferred > 0
    }
}

enum ReferenceOutcome {
    Installed,
    AlreadySatisfied,
    Deferred,
}

pub struct InstallationOrchestrator {
    provider: PackageSourceProvider,
    factory: Arc<dyn RepositoryFactory>,
    extractor: Arc<dyn PackageExtractor>,
    cache: Option<Arc<dyn PackageRepository>>,
    working_dir: PathBuf,
}

impl InstallationOrchestrator {
    pub fn new(provider: PackageSourceProvider, factory: Arc<dyn RepositoryFactory>) -> Self {
        Self {
            provider,
            factory,
            extractor: Arc::new(ArchiveExtractor),
            cache: None,
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn PackageExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Repository queried ahead of every source unless `no_cache` is set
    pub fn with_cache(mut self, cache: Arc<dyn PackageRepository>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_working_dir(mut self, working_dir: impl Into<PathBuf>) -> Self {
        self.working_dir = working_dir.into();
        self
    }

    pub fn settings(&self) -> &Settings {
        self.provider.settings()
    }

    /// Where packages go, most specific setting first
    pub fn resolve_install_root(&self, options: &InstallOptions) -> Result<PathBuf> {
        if let Some(output) = &options.output_directory {
            return Ok(self.working_dir.join(output));
        }

        if let Some(solution) = &options.solution_directory {
            let solution = self.working_dir.join(solution);
            let solution_config = solution.join(STATE_DIR).join(CONFIG_FILE_NAME);
            if solution_config.is_file() {
                let layer = ConfigLayer::load(&solution_config, LayerAccess::ReadOnly)?;
                let settings = Settings::from_layers(vec![layer]);
                if let Some(path) = settings.get_value(CONFIG_SECTION, REPOSITORY_PATH_KEY, true)? {
                    return Ok(PathBuf::from(path));
                }
            }
        }

        if let Some(path) = self
            .settings()
            .get_value(CONFIG_SECTION, REPOSITORY_PATH_KEY, true)?
        {
            return Ok(PathBuf::from(path));
        }

        if let Some(solution) = &options.solution_directory {
            return Ok(self.working_dir.join(solution).join(DEFAULT_PACKAGES_DIR));
        }

        Ok(self.working_dir.clone())
    }

    /// Sources for one run, loaded once
    fn sources_snapshot(&mut self, options: &InstallOptions) -> Result<Vec<PackageSource>> {
        let configured = self.provider.load_package_sources()?;
        if options.sources.is_empty() {
            return Ok(configured);
        }

        Ok(options
            .sources
            .iter()
            .map(|requested| {
                let location = resolve_in(&configured, requested);
                configured
                    .iter()
                    .find(|s| s.location == location)
                    .map(|s| s.clone().with_enabled(true))
                    .unwrap_or_else(|| PackageSource::new(requested.as_str(), location))
            })
            .collect())
    }

    fn build_aggregate(&mut self, options: &InstallOptions) -> Result<AggregateRepository> {
        let sources = self.sources_snapshot(options)?;
        let cache = if options.no_cache { None } else { self.cache.clone() };
        AggregateRepository::get_aggregate(
            self.factory.as_ref(),
            &sources,
            options.ignore_failing_repositories,
            cache,
        )
    }

    /// Install one package and its dependencies
    ///
    /// Returns `false` when the request was already satisfied.
    pub fn install_single(
        &mut self,
        id: &str,
        version: Option<&Version>,
        options: &InstallOptions,
    ) -> Result<bool> {
        if id.trim().is_empty() {
            return Err(Error::InvalidArgument("package id cannot be empty".to_string()));
        }

        let root = self.resolve_install_root(options)?;
        db::open_for_root(&root)?;
        let local = LocalPackageRepository::new(&root, options.allow_side_by_side);

        let previous = if options.allow_side_by_side {
            None
        } else {
            local.find_installed(id)?.pop()
        };

        if let Some((installed, _)) = &previous {
            match version {
                Some(requested) if requested > &installed.version => {}
                _ => {
                    info!("{} {} is already installed", installed.id, installed.version);
                    return Ok(false);
                }
            }
        }

        if let Some(requested) = version {
            if options.allow_side_by_side && local.is_present(id, requested) {
                info!("{} {} is already installed", id, requested);
                return Ok(false);
            }
        }

        let aggregate = self.build_aggregate(options)?;
        let package = match version {
            Some(requested) => aggregate.find_package(id, requested)?,
            None => aggregate.find_latest(id, options.allow_prerelease)?,
        }
        .ok_or_else(|| {
            Error::PackageNotFound(match version {
                Some(requested) => format!("{} {}", id, requested),
                None => id.to_string(),
            })
        })?;

        if local.exists(package.id(), Some(package.version()))? {
            info!("{} is already installed", package);
            return Ok(false);
        }

        if let Some((installed, _)) = previous {
            let description = format!("Uninstall {} {}", installed.id, installed.version);
            scope::run(&root, OperationKind::Uninstall, &description, |scope| {
                uninstall::uninstall(scope, &local, &installed.id, &installed.version, true)
            })?;
        }

        let description = format!("Install {}", package);
        let extractor = Arc::clone(&self.extractor);
        scope::run(&root, OperationKind::Install, &description, |scope| {
            let plan = Resolver::new(&aggregate, &local, &options.client_version)
                .framework(options.target_framework.as_deref())
                .allow_prerelease(options.allow_prerelease)
                .resolve(package)?;

            let mut installed = false;
            for package in &plan {
                installed |= install_package(scope, extractor.as_ref(), &local, package)?;
            }
            scope.confirm(|| resolver::verify_installed(&local, &plan))?;
            Ok(installed)
        })
    }

    /// Restore a reference manifest, returning whether anything was installed
    ///
    /// A reference that fails is logged and does not fail the call; use
    /// [`InstallationOrchestrator::restore`] to inspect failures.
    pub fn install_from_manifest(&mut self, manifest: &Path, options: &InstallOptions) -> Result<bool> {
        let summary = self.restore(manifest, options)?;
        for (reference, error) in &summary.failures {
            warn!("{} was not restored: {}", reference, error);
        }
        Ok(summary.any_installed())
    }

    /// Restore every reference of a manifest
    pub fn restore(&mut self, manifest: &Path, options: &InstallOptions) -> Result<RestoreSummary> {
        let references = references::read_references(manifest)?;
        if let Some(reference) = references.iter().find(|r| r.version.is_none()) {
            return Err(Error::InvalidManifest(format!(
                "'{}' has no version; restore requires one",
                reference.id
            )));
        }

        let root = self.resolve_install_root(options)?;
        db::open_for_root(&root)?;
        let local = LocalPackageRepository::new(&root, options.allow_side_by_side);

        let mut summary = RestoreSummary::default();
        let mut missing = Vec::new();
        for reference in references {
            if is_restored(&local, &reference)? {
                debug!("{} already installed", reference);
                summary.skipped.push(reference.to_string());
            } else {
                missing.push(reference);
            }
        }

        if missing.is_empty() {
            info!("All packages listed in {} are already installed", manifest.display());
            return Ok(summary);
        }

        if options.require_consent && !consent::is_granted(self.settings()) {
            return Err(Error::ConsentRequired);
        }

        let context = RestoreContext {
            root,
            local,
            aggregate: Arc::new(self.build_aggregate(options)?),
            extractor: Arc::clone(&self.extractor),
            options: options.clone(),
        };

        let (satellite_tx, satellite_rx) = mpsc::channel();
        let sequential = options.disable_parallel
            || missing.len() == 1
            || std::thread::available_parallelism().map_or(true, |n| n.get() == 1);

        let outcomes: Vec<(String, Result<ReferenceOutcome>)> = if sequential {
            missing
                .iter()
                .map(|r| (r.to_string(), context.restore_reference(r, &satellite_tx)))
                .collect()
        } else {
            let workers = missing.len().min(MAX_PARALLEL_RESTORES);
            info!("Restoring {} packages with {} workers", missing.len(), workers);
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .build()
                .map_err(|e| Error::InitError(format!("Failed to create restore pool: {}", e)))?;
            pool.install(|| {
                missing
                    .par_iter()
                    .map(|r| (r.to_string(), context.restore_reference(r, &satellite_tx)))
                    .collect()
            })
        };
        drop(satellite_tx);

        for (reference, outcome) in outcomes {
            match outcome {
                Ok(ReferenceOutcome::Installed) => summary.installed.push(reference),
                Ok(ReferenceOutcome::AlreadySatisfied) => summary.skipped.push(reference),
                Ok(ReferenceOutcome::Deferred) => summary.deferred += 1,
                Err(e) => {
                    warn!("Failed to restore {}: {}", reference, e);
                    summary.failures.push((reference, e));
                }
            }
        }

        for unit in satellite_rx.iter() {
            let name = unit.package.to_string();
            match context.install_satellite(&unit) {
                Ok(true) => summary.satellites.push(name),
                Ok(false) => summary.skipped.push(name),
                Err(e) => {
                    warn!("Failed to install satellite {}: {}", name, e);
                    summary.failures.push((name, e));
                }
            }
        }

        info!(
            "Restore finished: {} installed, {} satellites, {} skipped, {} failed",
            summary.installed.len(),
            summary.satellites.len(),
            summary.skipped.len(),
            summary.failures.len()
        );
        Ok(summary)
    }
}

/// Cheap installed check for a restore reference
///
/// Exclusive installs have a single copy, so any version counts; side-by-side
/// installs check the expected directory without reading metadata.
fn is_restored(local: &LocalPackageRepository, reference: &PackageReference) -> Result<bool> {
    match (&reference.version, local.is_side_by_side()) {
        (Some(version), true) => Ok(local.is_present(&reference.id, version)),
        _ => local.exists(&reference.id, None),
    }
}

/// Extract one package and record it under the scope
fn install_package(
    scope: &mut OperationScope,
    extractor: &dyn PackageExtractor,
    local: &LocalPackageRepository,
    package: &PackageHandle,
) -> Result<bool> {
    let target = local.package_dir(package.id(), package.version());
    let extraction = extractor.extract(package, &target)?;
    if !extraction.already_present {
        scope.track_dir(target.clone());
    }
    scope.record_package(package, &target, &extraction, false)?;
    Ok(!extraction.already_present)
}

/// State shared read-only by restore workers
struct RestoreContext {
    root: PathBuf,
    local: LocalPackageRepository,
    aggregate: Arc<AggregateRepository>,
    extractor: Arc<dyn PackageExtractor>,
    options: InstallOptions,
}

impl RestoreContext {
    fn restore_reference(
        &self,
        reference: &PackageReference,
        satellites: &mpsc::Sender<InstallUnit>,
    ) -> Result<ReferenceOutcome> {
        let version = reference
            .version
            .as_ref()
            .ok_or_else(|| Error::InvalidManifest(format!("'{}' has no version", reference.id)))?;

        let package = self
            .aggregate
            .find_package(&reference.id, version)?
            .ok_or_else(|| Error::PackageNotFound(reference.to_string()))?;

        let unit = InstallUnit::classify(package);
        if let UnitKind::Satellite { .. } = unit.kind {
            debug!("Deferring satellite {}", unit.package);
            satellites
                .send(unit)
                .map_err(|e| Error::InitError(format!("Satellite queue closed: {}", e)))?;
            return Ok(ReferenceOutcome::Deferred);
        }

        let framework = reference
            .target_framework
            .as_deref()
            .or(self.options.target_framework.as_deref());

        let description = format!("Restore {}", unit.package);
        scope::run(&self.root, OperationKind::Restore, &description, |scope| {
            let plan = Resolver::new(&self.aggregate, &self.local, &self.options.client_version)
                .framework(framework)
                .allow_prerelease(self.options.allow_prerelease)
                .resolve(unit.package)?;

            let mut installed = false;
            for package in &plan {
                installed |= install_package(scope, self.extractor.as_ref(), &self.local, package)?;
            }
            scope.confirm(|| resolver::verify_installed(&self.local, &plan))?;
            Ok(if installed {
                ReferenceOutcome::Installed
            } else {
                ReferenceOutcome::AlreadySatisfied
            })
        })
    }

    fn install_satellite(&self, unit: &InstallUnit) -> Result<bool> {
        let UnitKind::Satellite {
            runtime_id,
            runtime_version,
        } = &unit.kind
        else {
            return Ok(false);
        };

        let description = format!("Restore satellite {}", unit.package);
        scope::run(&self.root, OperationKind::Restore, &description, |scope| {
            satellite::install_satellite(
                scope,
                self.extractor.as_ref(),
                &self.local,
                &unit.package,
                runtime_id,
                runtime_version,
            )
        })
    }
}
