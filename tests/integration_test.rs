// tests/integration_test.rs

//! Integration tests for Stowage
//!
//! These tests drive installs and restores end to end: configuration files
//! on disk, a folder feed of package archives, and a real install root.

use semver::{Version, VersionReq};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stowage::Error;
use stowage::config::Settings;
use stowage::db::{self, models::InstalledPackage, models::Operation, models::OperationStatus};
use stowage::install::{InstallOptions, InstallationOrchestrator};
use stowage::packages::{
    ArchiveBuilder, ArchiveExtractor, Extraction, PackageDependency, PackageExtractor, PackageHandle,
    PackageManifest,
};
use stowage::repository::DefaultRepositoryFactory;
use stowage::sources::PackageSourceProvider;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    feed: PathBuf,
    work: PathBuf,
    root: PathBuf,
    downloads: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let feed = dir.path().join("feed");
        let work = dir.path().join("work");
        let root = dir.path().join("root");
        let downloads = dir.path().join("downloads");
        for path in [&feed, &work, &downloads] {
            fs::create_dir_all(path).unwrap();
        }
        Self {
            _dir: dir,
            feed,
            work,
            root,
            downloads,
        }
    }

    fn publish(&self, manifest: PackageManifest, files: &[(&str, &str)]) {
        let mut builder = ArchiveBuilder::new(manifest);
        for (path, content) in files {
            builder = builder.file(*path, *content);
        }
        builder.write_to(&self.feed).unwrap();
    }

    /// Configuration with the feed registered plus `extra` sections
    fn write_config(&self, extra: &str) -> PathBuf {
        let path = self.work.join("stowage.config");
        fs::write(
            &path,
            format!(
                r#"<configuration>
                     <packageSources><add key="feed" value="{}" /></packageSources>
                     {}
                   </configuration>"#,
                self.feed.display(),
                extra
            ),
        )
        .unwrap();
        path
    }

    fn orchestrator(&self, extra: &str) -> InstallationOrchestrator {
        let settings = Settings::from_file(&self.write_config(extra)).unwrap();
        let factory = DefaultRepositoryFactory::new(&self.downloads);
        InstallationOrchestrator::new(PackageSourceProvider::new(settings), Arc::new(factory))
            .with_working_dir(&self.work)
    }

    fn options(&self) -> InstallOptions {
        InstallOptions {
            output_directory: Some(self.root.clone()),
            ..InstallOptions::default()
        }
    }

    fn exclusive(&self) -> InstallOptions {
        InstallOptions {
            allow_side_by_side: false,
            ..self.options()
        }
    }

    fn write_references(&self, content: &str) -> PathBuf {
        let path = self.work.join("packages.config");
        fs::write(&path, content).unwrap();
        path
    }

    fn operations(&self) -> Vec<Operation> {
        let conn = db::open(&db::db_path(&self.root)).unwrap();
        Operation::list_all(&conn).unwrap()
    }

    /// Visible entries of the install root, sorted
    fn installed_dirs(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| !name.starts_with('.'))
            .collect();
        names.sort();
        names
    }
}

fn v(s: &str) -> Version {
    Version::parse(s).unwrap()
}

fn manifest(id: &str, version: &str, dependencies: &[(&str, &str)]) -> PackageManifest {
    let mut manifest = PackageManifest::new(id, v(version));
    manifest.dependencies = dependencies
        .iter()
        .map(|(id, req)| PackageDependency {
            id: id.to_string(),
            version: VersionReq::parse(req).unwrap(),
        })
        .collect();
    manifest
}

fn manifest_version(dir: &Path) -> Version {
    stowage::packages::archive::read_installed_manifest(dir).unwrap().version
}

#[test]
fn test_install_with_dependencies_from_folder_feed() {
    let fixture = Fixture::new();
    fixture.publish(manifest("Gears", "1.0.0", &[]), &[("lib/gears.txt", "gears 1.0")]);
    fixture.publish(manifest("Gears", "1.5.0", &[]), &[("lib/gears.txt", "gears 1.5")]);
    fixture.publish(
        manifest("Widgets", "2.0.0", &[("Gears", "^1.0")]),
        &[("lib/widgets.txt", "widgets")],
    );

    let mut orchestrator = fixture.orchestrator("");
    let installed = orchestrator
        .install_single("Widgets", None, &fixture.options())
        .unwrap();

    assert!(installed);
    // Dependencies resolve to the lowest matching version
    assert_eq!(fixture.installed_dirs(), vec!["Gears.1.0.0", "Widgets.2.0.0"]);
    assert_eq!(
        fs::read_to_string(fixture.root.join("Widgets.2.0.0/lib/widgets.txt")).unwrap(),
        "widgets"
    );

    let operations = fixture.operations();
    assert_eq!(operations.len(), 1);
    assert_eq!(operations[0].status, OperationStatus::Applied);
}

#[test]
fn test_side_by_side_install_is_idempotent() {
    let fixture = Fixture::new();
    fixture.publish(manifest("Widgets", "1.0.0", &[]), &[]);

    let mut orchestrator = fixture.orchestrator("");
    let options = fixture.options();
    assert!(orchestrator.install_single("Widgets", Some(&v("1.0.0")), &options).unwrap());
    assert!(!orchestrator.install_single("Widgets", Some(&v("1.0.0")), &options).unwrap());
    assert!(!orchestrator.install_single("widgets", None, &options).unwrap());

    assert_eq!(fixture.installed_dirs(), vec!["Widgets.1.0.0"]);
    assert_eq!(fixture.operations().len(), 1);
}

#[test]
fn test_exclusive_upgrade_removes_orphaned_dependencies() {
    let fixture = Fixture::new();
    fixture.publish(manifest("Gears", "1.0.0", &[]), &[]);
    fixture.publish(manifest("Widgets", "1.0.0", &[("Gears", "^1.0")]), &[]);
    fixture.publish(manifest("Widgets", "2.0.0", &[]), &[]);

    let mut orchestrator = fixture.orchestrator("");
    let options = fixture.exclusive();
    orchestrator
        .install_single("Widgets", Some(&v("1.0.0")), &options)
        .unwrap();
    assert_eq!(fixture.installed_dirs(), vec!["Gears", "Widgets"]);

    // No version requested with something installed is a no-op
    assert!(!orchestrator.install_single("Widgets", None, &options).unwrap());

    assert!(orchestrator
        .install_single("Widgets", Some(&v("2.0.0")), &options)
        .unwrap());
    assert_eq!(fixture.installed_dirs(), vec!["Widgets"]);
    assert_eq!(manifest_version(&fixture.root.join("Widgets")), v("2.0.0"));
}

#[test]
fn test_exclusive_downgrade_is_a_no_op() {
    let fixture = Fixture::new();
    fixture.publish(manifest("Widgets", "1.0.0", &[]), &[("lib/widgets.txt", "widgets 1.0")]);
    fixture.publish(manifest("Widgets", "2.0.0", &[]), &[("lib/widgets.txt", "widgets 2.0")]);

    let mut orchestrator = fixture.orchestrator("");
    let options = fixture.exclusive();
    assert!(orchestrator
        .install_single("Widgets", Some(&v("2.0.0")), &options)
        .unwrap());

    assert!(!orchestrator
        .install_single("Widgets", Some(&v("1.0.0")), &options)
        .unwrap());

    assert_eq!(fixture.installed_dirs(), vec!["Widgets"]);
    assert_eq!(manifest_version(&fixture.root.join("Widgets")), v("2.0.0"));
    assert_eq!(
        fs::read_to_string(fixture.root.join("Widgets/lib/widgets.txt")).unwrap(),
        "widgets 2.0"
    );

    let operations = fixture.operations();
    assert_eq!(operations.len(), 1);
    assert_eq!(operations[0].description, "Install Widgets 2.0.0");
}

#[test]
fn test_exclusive_upgrade_refuses_package_in_use() {
    let fixture = Fixture::new();
    fixture.publish(manifest("Gears", "1.0.0", &[]), &[]);
    fixture.publish(manifest("Gears", "2.0.0", &[]), &[]);
    fixture.publish(manifest("Widgets", "1.0.0", &[("Gears", "^1.0")]), &[]);

    let mut orchestrator = fixture.orchestrator("");
    let options = fixture.exclusive();
    orchestrator
        .install_single("Widgets", Some(&v("1.0.0")), &options)
        .unwrap();

    let result = orchestrator.install_single("Gears", Some(&v("2.0.0")), &options);
    assert!(matches!(result, Err(Error::PackageInUse { .. })));
    assert_eq!(manifest_version(&fixture.root.join("Gears")), v("1.0.0"));
}

#[test]
fn test_missing_dependency_rolls_back() {
    let fixture = Fixture::new();
    fixture.publish(manifest("Widgets", "1.0.0", &[("Missing", "^1.0")]), &[]);

    let mut orchestrator = fixture.orchestrator("");
    let result = orchestrator.install_single("Widgets", None, &fixture.options());

    assert!(matches!(result, Err(Error::DependencyResolution(_))));
    assert!(fixture.installed_dirs().is_empty());

    let operations = fixture.operations();
    assert_eq!(operations.len(), 1);
    assert_eq!(operations[0].status, OperationStatus::RolledBack);
}

#[test]
fn test_min_client_version_fails_before_writes() {
    let fixture = Fixture::new();
    let mut future = manifest("Widgets", "1.0.0", &[]);
    future.min_client_version = Some(v("99.0.0"));
    fixture.publish(future, &[("lib/widgets.txt", "widgets")]);

    let mut orchestrator = fixture.orchestrator("");
    let result = orchestrator.install_single("Widgets", None, &fixture.options());

    assert!(matches!(result, Err(Error::MinClientVersion { .. })));
    assert!(fixture.installed_dirs().is_empty());
}

#[test]
fn test_unknown_package_is_not_found() {
    let fixture = Fixture::new();
    let mut orchestrator = fixture.orchestrator("");
    let result = orchestrator.install_single("Nothing", None, &fixture.options());
    assert!(matches!(result, Err(Error::PackageNotFound(_))));
}

#[test]
fn test_failing_source_tolerated_only_when_ignored() {
    let fixture = Fixture::new();
    fixture.publish(manifest("Widgets", "1.0.0", &[]), &[]);
    let broken = fixture.work.join("does-not-exist");

    let mut orchestrator = fixture.orchestrator("");
    let strict = InstallOptions {
        sources: vec![broken.display().to_string(), "feed".to_string()],
        ..fixture.options()
    };
    let result = orchestrator.install_single("Widgets", None, &strict);
    assert!(matches!(result, Err(Error::SourceConstruction { .. })));

    let tolerant = InstallOptions {
        ignore_failing_repositories: true,
        ..strict
    };
    assert!(orchestrator.install_single("Widgets", None, &tolerant).unwrap());
}

#[test]
fn test_disabled_source_is_not_queried() {
    let fixture = Fixture::new();
    fixture.publish(manifest("Widgets", "1.0.0", &[]), &[]);

    let mut orchestrator =
        fixture.orchestrator(r#"<disabledPackageSources><add key="feed" value="true" /></disabledPackageSources>"#);
    let result = orchestrator.install_single("Widgets", None, &fixture.options());
    assert!(matches!(result, Err(Error::PackageNotFound(_))));

    // Naming a disabled source by location still uses it
    let explicit = InstallOptions {
        sources: vec![fixture.feed.display().to_string()],
        ..fixture.options()
    };
    assert!(orchestrator.install_single("Widgets", None, &explicit).unwrap());
}

#[test]
fn test_repository_path_from_configuration() {
    let fixture = Fixture::new();
    fixture.publish(manifest("Widgets", "1.0.0", &[]), &[]);

    let mut orchestrator =
        fixture.orchestrator(r#"<config><add key="repositoryPath" value="vendor" /></config>"#);
    let options = InstallOptions::default();
    assert_eq!(
        orchestrator.resolve_install_root(&options).unwrap(),
        fixture.work.join("vendor")
    );

    orchestrator.install_single("Widgets", None, &options).unwrap();
    assert!(fixture.work.join("vendor/Widgets.1.0.0/stowage.json").is_file());
}

#[test]
fn test_restore_parallel_and_sequential() {
    for disable_parallel in [false, true] {
        let fixture = Fixture::new();
        fixture.publish(manifest("Alpha", "1.0.0", &[]), &[]);
        fixture.publish(manifest("Beta", "1.0.0", &[("Alpha", "^1.0")]), &[]);
        fixture.publish(manifest("Gamma", "2.1.0", &[]), &[]);
        let references = fixture.write_references(
            r#"<packages>
                 <package id="Alpha" version="1.0" />
                 <package id="Beta" version="1.0.0" />
                 <package id="Gamma" version="2.1" />
               </packages>"#,
        );

        let mut orchestrator = fixture.orchestrator("");
        let options = InstallOptions {
            disable_parallel,
            ..fixture.options()
        };
        let summary = orchestrator.restore(&references, &options).unwrap();

        assert!(summary.failures.is_empty());
        assert!(summary.any_installed());
        assert_eq!(
            fixture.installed_dirs(),
            vec!["Alpha.1.0.0", "Beta.1.0.0", "Gamma.2.1.0"]
        );

        // A second restore finds everything in place
        let again = orchestrator.restore(&references, &options).unwrap();
        assert!(!again.any_installed());
        assert_eq!(again.skipped.len(), 3);
    }
}

#[test]
fn test_restore_skips_installed_and_isolates_failures() {
    let fixture = Fixture::new();
    fixture.publish(manifest("Alpha", "1.0.0", &[]), &[]);
    fixture.publish(manifest("Beta", "1.0.0", &[]), &[]);
    let references = fixture.write_references(
        r#"<packages>
             <package id="Alpha" version="1.0.0" />
             <package id="Beta" version="1.0.0" />
             <package id="Ghost" version="3.0.0" />
           </packages>"#,
    );

    let mut orchestrator = fixture.orchestrator("");
    let options = fixture.options();
    orchestrator
        .install_single("Alpha", Some(&v("1.0.0")), &options)
        .unwrap();

    let summary = orchestrator.restore(&references, &options).unwrap();
    assert_eq!(summary.skipped, vec!["Alpha 1.0.0".to_string()]);
    assert_eq!(summary.installed, vec!["Beta 1.0.0".to_string()]);
    assert_eq!(summary.failures.len(), 1);
    assert!(matches!(summary.failures[0].1, Error::PackageNotFound(_)));

    // The manifest form reports success from the references that did install
    fs::remove_dir_all(fixture.root.join("Beta.1.0.0")).unwrap();
    assert!(orchestrator.install_from_manifest(&references, &options).unwrap());
    assert!(fixture.root.join("Beta.1.0.0/stowage.json").is_file());

    // Only the failing reference left: nothing installed, still not an error
    assert!(!orchestrator.install_from_manifest(&references, &options).unwrap());
}

/// Extracts normally except for one package id, which fails after nothing
/// has been written for it
struct FailingExtractor {
    fail_id: &'static str,
}

impl PackageExtractor for FailingExtractor {
    fn extract(&self, package: &PackageHandle, target: &Path) -> stowage::Result<Extraction> {
        if package.id() == self.fail_id {
            return Err(Error::ChecksumMismatch {
                expected: "0000".to_string(),
                actual: "ffff".to_string(),
            });
        }
        ArchiveExtractor.extract(package, target)
    }
}

#[test]
fn test_restore_rolls_back_partially_installed_dependencies() {
    let fixture = Fixture::new();
    fixture.publish(manifest("Base", "1.0.0", &[]), &[("lib/base.txt", "base")]);
    fixture.publish(manifest("Broken", "1.0.0", &[]), &[("lib/broken.txt", "broken")]);
    fixture.publish(
        manifest("Shell", "1.0.0", &[("Base", "^1.0"), ("Broken", "^1.0")]),
        &[],
    );
    fixture.publish(manifest("Solo", "1.0.0", &[]), &[("lib/solo.txt", "solo")]);
    let references = fixture.write_references(
        r#"<packages>
             <package id="Shell" version="1.0.0" />
             <package id="Solo" version="1.0.0" />
           </packages>"#,
    );

    let mut orchestrator = fixture
        .orchestrator("")
        .with_extractor(Arc::new(FailingExtractor { fail_id: "Broken" }));
    let summary = orchestrator.restore(&references, &fixture.options()).unwrap();

    assert_eq!(summary.installed, vec!["Solo 1.0.0".to_string()]);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].0, "Shell 1.0.0");
    assert!(matches!(summary.failures[0].1, Error::ChecksumMismatch { .. }));

    // Base was extracted and recorded before Broken failed; none of it survives
    assert_eq!(fixture.installed_dirs(), vec!["Solo.1.0.0"]);
    let conn = db::open(&db::db_path(&fixture.root)).unwrap();
    assert!(InstalledPackage::find(&conn, "Base", "1.0.0").unwrap().is_none());
    assert!(InstalledPackage::find(&conn, "Shell", "1.0.0").unwrap().is_none());
    assert!(InstalledPackage::find(&conn, "Solo", "1.0.0").unwrap().is_some());

    let mut statuses: Vec<(String, OperationStatus)> = fixture
        .operations()
        .into_iter()
        .map(|op| (op.description, op.status))
        .collect();
    statuses.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        statuses,
        vec![
            ("Restore Shell 1.0.0".to_string(), OperationStatus::RolledBack),
            ("Restore Solo 1.0.0".to_string(), OperationStatus::Applied),
        ]
    );
}

#[test]
fn test_restore_requires_versions() {
    let fixture = Fixture::new();
    let references = fixture.write_references(r#"<packages><package id="Alpha" /></packages>"#);

    let mut orchestrator = fixture.orchestrator("");
    let result = orchestrator.restore(&references, &fixture.options());
    assert!(matches!(result, Err(Error::InvalidManifest(_))));
}

#[test]
fn test_restore_consent_gate() {
    let fixture = Fixture::new();
    fixture.publish(manifest("Alpha", "1.0.0", &[]), &[]);
    let references =
        fixture.write_references(r#"<packages><package id="Alpha" version="1.0.0" /></packages>"#);
    let options = InstallOptions {
        require_consent: true,
        ..fixture.options()
    };

    let mut orchestrator =
        fixture.orchestrator(r#"<packageRestore><add key="enabled" value="false" /></packageRestore>"#);
    let result = orchestrator.install_from_manifest(&references, &options);
    assert!(matches!(result, Err(Error::ConsentRequired)));
    assert!(fixture.installed_dirs().is_empty());

    let mut orchestrator =
        fixture.orchestrator(r#"<packageRestore><add key="enabled" value="True" /></packageRestore>"#);
    assert!(orchestrator.install_from_manifest(&references, &options).unwrap());

    // Nothing missing means no consent check at all
    let mut orchestrator = fixture.orchestrator("");
    assert!(!orchestrator.install_from_manifest(&references, &options).unwrap());
}

#[test]
fn test_restore_merges_satellite_into_runtime_package() {
    let fixture = Fixture::new();
    fixture.publish(
        manifest("Widgets", "1.0.0", &[]),
        &[
            ("lib/net45/Widgets.dll", "runtime"),
            ("lib/net45/fr/Widgets.resources.dll", "keep me"),
        ],
    );
    let mut satellite = manifest("Widgets.fr", "1.0.0", &[("Widgets", "=1.0.0")]);
    satellite.language = Some("fr".to_string());
    fixture.publish(
        satellite,
        &[
            ("lib/net45/fr/Widgets.resources.dll", "satellite copy"),
            ("lib/net45/fr/Extra.resources.dll", "extra"),
            ("content/readme.txt", "not merged"),
        ],
    );
    let references = fixture.write_references(
        r#"<packages>
             <package id="Widgets.fr" version="1.0.0" />
             <package id="Widgets" version="1.0.0" />
           </packages>"#,
    );

    let mut orchestrator = fixture.orchestrator("");
    let summary = orchestrator.restore(&references, &fixture.options()).unwrap();

    assert!(summary.failures.is_empty());
    assert_eq!(summary.deferred, 1);
    assert_eq!(summary.satellites, vec!["Widgets.fr 1.0.0".to_string()]);

    let runtime = fixture.root.join("Widgets.1.0.0");
    assert_eq!(
        fs::read_to_string(runtime.join("lib/net45/fr/Widgets.resources.dll")).unwrap(),
        "keep me"
    );
    assert_eq!(
        fs::read_to_string(runtime.join("lib/net45/fr/Extra.resources.dll")).unwrap(),
        "extra"
    );
    assert!(!runtime.join("content/readme.txt").exists());
    assert!(fixture.root.join("Widgets.fr.1.0.0/stowage.json").is_file());
}

#[test]
fn test_sources_loaded_through_configuration_chain() {
    let fixture = Fixture::new();
    let user = fixture.work.join("user.config");
    fs::write(
        &user,
        format!(
            r#"<configuration>
                 <packageSources>
                   <add key="feed" value="https://stale.example" />
                   <add key="other" value="https://other.example" />
                   <add key="feed" value="{}" />
                 </packageSources>
               </configuration>"#,
            fixture.feed.display()
        ),
    )
    .unwrap();

    let settings = stowage::config::load_default_settings(&fixture.work, Some(&user), None).unwrap();
    let mut provider = PackageSourceProvider::new(settings);
    let sources = provider.load_package_sources().unwrap();

    let names: Vec<_> = sources.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["other", "feed"]);
    assert_eq!(sources[1].location, fixture.feed.display().to_string());
    assert_eq!(
        provider.resolve_source("FEED").unwrap(),
        fixture.feed.display().to_string()
    );
}

#[test]
fn test_history_records_each_operation() {
    let fixture = Fixture::new();
    fixture.publish(manifest("Widgets", "1.0.0", &[]), &[]);
    fixture.publish(manifest("Widgets", "2.0.0", &[]), &[]);

    let mut orchestrator = fixture.orchestrator("");
    let options = fixture.exclusive();
    orchestrator
        .install_single("Widgets", Some(&v("1.0.0")), &options)
        .unwrap();
    orchestrator
        .install_single("Widgets", Some(&v("2.0.0")), &options)
        .unwrap();

    let descriptions: Vec<_> = fixture
        .operations()
        .into_iter()
        .map(|op| op.description)
        .collect();
    assert_eq!(
        descriptions,
        vec![
            "Install Widgets 2.0.0".to_string(),
            "Uninstall Widgets 1.0.0".to_string(),
            "Install Widgets 1.0.0".to_string(),
        ]
    );
}
