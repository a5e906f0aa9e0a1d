// src/main.rs

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use semver::Version;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stowage::config::{
    CONFIG_SECTION, ConfigurationDefaults, DirectoryMachineWideSettings, MachineWideSettings, Settings,
    defaults::DEFAULTS_FILE_NAME, load_default_settings,
};
use stowage::install::{InstallOptions, InstallationOrchestrator, references::parse_version};
use stowage::repository::{CredentialProvider, DefaultRepositoryFactory, FolderRepository, LocalPackageRepository};
use stowage::sources::{Credentials, PackageSource, PackageSourceProvider};
use tracing::info;

/// Overrides the machine-wide configuration root
const MACHINE_ROOT_ENV_VAR: &str = "STOWAGE_MACHINE_CONFIG_ROOT";
const DEFAULT_MACHINE_ROOT: &str = "/etc/stowage";

const USERNAME_ENV_VAR: &str = "STOWAGE_SOURCE_USERNAME";
const PASSWORD_ENV_VAR: &str = "STOWAGE_SOURCE_PASSWORD";

#[derive(Parser)]
#[command(name = "stowage")]
#[command(author, version, about = "Package restore client with layered configuration and transactional installs", long_about = None)]
struct Cli {
    /// Configuration file used instead of the per-user one
    #[arg(long, global = true)]
    config_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Read and write configuration values
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
    /// Manage package sources
    Sources {
        #[command(subcommand)]
        action: SourcesCommands,
    },
    /// Install a package and its dependencies
    Install {
        /// Package id
        id: String,
        /// Exact version (latest when omitted)
        #[arg(short, long)]
        version: Option<String>,
        #[command(flatten)]
        args: InstallArgs,
    },
    /// Install every package listed in a reference manifest
    Restore {
        /// Path to the reference manifest
        manifest: PathBuf,
        /// Restore one package at a time
        #[arg(long)]
        disable_parallel: bool,
        /// Refuse to restore unless consent has been granted
        #[arg(long)]
        require_consent: bool,
        #[command(flatten)]
        args: InstallArgs,
    },
    /// List installed packages
    List {
        #[command(flatten)]
        root: RootArgs,
        /// Install each package into a version-less directory
        #[arg(short = 'x', long)]
        exclude_version: bool,
    },
    /// Show install, restore and uninstall history
    History {
        #[command(flatten)]
        root: RootArgs,
    },
    /// Generate shell completions
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print a value
    Get {
        key: String,
        #[arg(long, default_value = CONFIG_SECTION)]
        section: String,
        /// Resolve the value as a path relative to its configuration file
        #[arg(long)]
        as_path: bool,
    },
    /// Set a value in the nearest writable configuration file
    Set {
        key: String,
        value: String,
        #[arg(long, default_value = CONFIG_SECTION)]
        section: String,
    },
    /// Remove a value
    Unset {
        key: String,
        #[arg(long, default_value = CONFIG_SECTION)]
        section: String,
    },
    /// Print every value of a section
    List {
        #[arg(long, default_value = CONFIG_SECTION)]
        section: String,
    },
}

#[derive(Subcommand)]
enum SourcesCommands {
    /// List configured sources
    List,
    /// Add a source
    Add {
        name: String,
        /// URL or directory
        #[arg(short, long)]
        source: String,
        #[command(flatten)]
        credentials: CredentialArgs,
    },
    /// Remove a source
    Remove { name: String },
    /// Enable a source
    Enable { name: String },
    /// Disable a source
    Disable { name: String },
    /// Change a source's location or credentials
    Update {
        name: String,
        #[arg(short, long)]
        source: Option<String>,
        #[command(flatten)]
        credentials: CredentialArgs,
    },
}

#[derive(Args)]
struct CredentialArgs {
    #[arg(long)]
    username: Option<String>,
    #[arg(long, requires = "username")]
    password: Option<String>,
    /// Store the password unencrypted
    #[arg(long)]
    store_password_in_clear_text: bool,
}

impl CredentialArgs {
    fn into_credentials(self) -> Result<Option<Credentials>> {
        match (self.username, self.password) {
            (Some(user_name), Some(password)) => Ok(Some(Credentials {
                user_name,
                password,
                is_password_clear_text: self.store_password_in_clear_text,
            })),
            (Some(_), None) => anyhow::bail!("--username requires --password"),
            _ => Ok(None),
        }
    }
}

#[derive(Args)]
struct RootArgs {
    /// Directory packages are installed into
    #[arg(short, long)]
    output_directory: Option<PathBuf>,
    /// Solution directory (packages go to `<dir>/packages` by default)
    #[arg(long)]
    solution_directory: Option<PathBuf>,
}

#[derive(Args)]
struct InstallArgs {
    #[command(flatten)]
    root: RootArgs,
    /// Source name or location; repeatable
    #[arg(short, long)]
    source: Vec<String>,
    /// Install into a version-less directory, replacing older versions
    #[arg(short = 'x', long)]
    exclude_version: bool,
    /// Allow prerelease versions
    #[arg(long)]
    prerelease: bool,
    /// Target framework packages must support
    #[arg(long)]
    framework: Option<String>,
    /// Skip the local package cache
    #[arg(long)]
    no_cache: bool,
    /// Continue when a source cannot be reached
    #[arg(long)]
    ignore_failing_sources: bool,
}

impl InstallArgs {
    fn into_options(self) -> InstallOptions {
        InstallOptions {
            output_directory: self.root.output_directory,
            solution_directory: self.root.solution_directory,
            allow_side_by_side: !self.exclude_version,
            allow_prerelease: self.prerelease,
            target_framework: self.framework,
            ignore_failing_repositories: self.ignore_failing_sources,
            sources: self.source,
            no_cache: self.no_cache,
            ..InstallOptions::default()
        }
    }
}

/// Credentials for authenticated sources, read from the environment
struct EnvCredentialProvider;

impl CredentialProvider for EnvCredentialProvider {
    fn get_credentials(&self, source: &str) -> Option<Credentials> {
        let user_name = std::env::var(USERNAME_ENV_VAR).ok()?;
        let password = std::env::var(PASSWORD_ENV_VAR).ok()?;
        info!("Using credentials from the environment for {}", source);
        Some(Credentials {
            user_name,
            password,
            is_password_clear_text: true,
        })
    }
}

fn machine_root() -> PathBuf {
    std::env::var_os(MACHINE_ROOT_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MACHINE_ROOT))
}

fn load_settings(config_file: Option<&Path>) -> Result<Settings> {
    let working_dir = std::env::current_dir()?;
    let machine_wide = DirectoryMachineWideSettings::new(machine_root(), &[]);
    let settings = load_default_settings(
        &working_dir,
        config_file,
        Some(&machine_wide as &dyn MachineWideSettings),
    )
        .context("Failed to load configuration")?;
    Ok(settings)
}

fn configuration_defaults() -> ConfigurationDefaults {
    ConfigurationDefaults::load(&machine_root().join(DEFAULTS_FILE_NAME))
}

fn source_provider(settings: Settings) -> PackageSourceProvider {
    PackageSourceProvider::new(settings)
        .with_configuration_defaults(configuration_defaults().default_package_sources())
}

fn orchestrator(settings: Settings) -> Result<InstallationOrchestrator> {
    let download_dir = dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("stowage")
        .join("packages");
    std::fs::create_dir_all(&download_dir)
        .with_context(|| format!("Failed to create package cache {}", download_dir.display()))?;

    let factory = DefaultRepositoryFactory::new(&download_dir)
        .with_credential_provider(Arc::new(EnvCredentialProvider));

    Ok(InstallationOrchestrator::new(source_provider(settings), Arc::new(factory))
        .with_cache(Arc::new(FolderRepository::new(&download_dir))))
}

fn parse_requested_version(text: &str) -> Result<Version> {
    parse_version(text).ok_or_else(|| anyhow::anyhow!("'{}' is not a valid version", text))
}

fn find_source<'a>(sources: &'a mut [PackageSource], name: &str) -> Result<&'a mut PackageSource> {
    sources
        .iter_mut()
        .find(|s| s.has_name(name))
        .ok_or_else(|| anyhow::anyhow!("Unknown package source '{}'", name))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config_file = cli.config_file.as_deref();

    match cli.command {
        Some(Commands::Config { action }) => {
            let mut settings = load_settings(config_file)?;
            match action {
                ConfigCommands::Get { key, section, as_path } => {
                    match settings.get_value(&section, &key, as_path)? {
                        Some(value) => println!("{}", value),
                        None => println!("{} is not set", key),
                    }
                }
                ConfigCommands::Set { key, value, section } => {
                    settings.set_value(&section, &key, &value)?;
                    println!("Set {} in {}", key, display_writable(&settings));
                }
                ConfigCommands::Unset { key, section } => {
                    if settings.delete_value(&section, &key)? {
                        println!("Removed {} from {}", key, display_writable(&settings));
                    } else {
                        println!("{} is not set", key);
                    }
                }
                ConfigCommands::List { section } => {
                    let values = settings.get_values(&section, false)?;
                    if values.is_empty() {
                        println!("No values in section '{}'.", section);
                    }
                    for (key, value) in values {
                        println!("{} = {}", key, value);
                    }
                }
            }
            Ok(())
        }
        Some(Commands::Sources { action }) => {
            let mut provider = source_provider(load_settings(config_file)?);
            let mut sources = provider.load_package_sources()?;

            match action {
                SourcesCommands::List => {
                    if sources.is_empty() {
                        println!("No package sources configured.");
                    }
                    for (index, source) in sources.iter().enumerate() {
                        let state = if source.is_enabled { "Enabled" } else { "Disabled" };
                        print!("  {}. {} [{}]", index + 1, source.name, state);
                        if source.is_machine_wide {
                            print!(" (machine-wide)");
                        }
                        if source.is_official {
                            print!(" (official)");
                        }
                        println!();
                        println!("      {}", source.location);
                    }
                    if let Some(active) = provider.active_package_source()? {
                        println!("Active source: {}", active);
                    }
                    if let Some(push) = configuration_defaults().default_push_source() {
                        println!("Default push source: {}", push);
                    }
                    return Ok(());
                }
                SourcesCommands::Add { name, source, credentials } => {
                    if name.trim().is_empty() || source.trim().is_empty() {
                        anyhow::bail!("Source name and location cannot be empty");
                    }
                    if sources.iter().any(|s| s.has_name(&name)) {
                        anyhow::bail!("A source named '{}' already exists", name);
                    }
                    if sources.iter().any(|s| s.has_location(&source)) {
                        anyhow::bail!("A source with location '{}' already exists", source);
                    }
                    let mut added = PackageSource::new(name.as_str(), source.as_str());
                    added.credentials = credentials.into_credentials()?;
                    sources.push(added);
                    provider.save_package_sources(&sources)?;
                    println!("Added package source '{}'", name);
                }
                SourcesCommands::Remove { name } => {
                    let before = sources.len();
                    sources.retain(|s| !s.has_name(&name));
                    if sources.len() == before {
                        anyhow::bail!("Unknown package source '{}'", name);
                    }
                    provider.save_package_sources(&sources)?;
                    println!("Removed package source '{}'", name);
                }
                SourcesCommands::Enable { name } => {
                    let source = find_source(&mut sources, &name)?.clone();
                    provider.enable_package_source(&source)?;
                    println!("Enabled package source '{}'", source.name);
                }
                SourcesCommands::Disable { name } => {
                    let source = find_source(&mut sources, &name)?.clone();
                    provider.disable_package_source(&source)?;
                    println!("Disabled package source '{}'", source.name);
                }
                SourcesCommands::Update { name, source, credentials } => {
                    let credentials = credentials.into_credentials()?;
                    let existing = find_source(&mut sources, &name)?;
                    if existing.is_machine_wide {
                        anyhow::bail!("'{}' is machine-wide and cannot be updated", name);
                    }
                    if let Some(location) = source {
                        existing.location = location;
                    }
                    if credentials.is_some() {
                        existing.credentials = credentials;
                    }
                    provider.save_package_sources(&sources)?;
                    println!("Updated package source '{}'", name);
                }
            }
            Ok(())
        }
        Some(Commands::Install { id, version, args }) => {
            let version = version.as_deref().map(parse_requested_version).transpose()?;
            let options = args.into_options();
            let mut orchestrator = orchestrator(load_settings(config_file)?)?;

            info!("Installing {}", id);
            if orchestrator.install_single(&id, version.as_ref(), &options)? {
                println!("Installed {} into {}", id, orchestrator.resolve_install_root(&options)?.display());
            } else {
                println!("{} is already installed", id);
            }
            Ok(())
        }
        Some(Commands::Restore {
            manifest,
            disable_parallel,
            require_consent,
            args,
        }) => {
            let options = InstallOptions {
                disable_parallel,
                require_consent,
                ..args.into_options()
            };
            let mut orchestrator = orchestrator(load_settings(config_file)?)?;

            let summary = orchestrator.restore(&manifest, &options)?;
            for reference in &summary.installed {
                println!("  Installed {}", reference);
            }
            for satellite in &summary.satellites {
                println!("  Installed satellite {}", satellite);
            }
            if !summary.skipped.is_empty() {
                println!("  {} package(s) already installed", summary.skipped.len());
            }
            for (reference, error) in &summary.failures {
                eprintln!("  Failed {}: {}", reference, error);
            }

            if !summary.failures.is_empty() {
                anyhow::bail!("{} package(s) failed to restore", summary.failures.len());
            }
            if !summary.any_installed() {
                println!("All packages listed in {} are already installed.", manifest.display());
            }
            Ok(())
        }
        Some(Commands::List { root, exclude_version }) => {
            let options = InstallOptions {
                output_directory: root.output_directory,
                solution_directory: root.solution_directory,
                ..InstallOptions::default()
            };
            let orchestrator = orchestrator(load_settings(config_file)?)?;
            let install_root = orchestrator.resolve_install_root(&options)?;
            let installed = LocalPackageRepository::new(&install_root, !exclude_version).installed()?;

            if installed.is_empty() {
                println!("No packages installed in {}.", install_root.display());
            } else {
                println!("Installed packages:");
                for (manifest, path) in &installed {
                    println!("  {} {} ({})", manifest.id, manifest.version, path.display());
                }
                println!("\nTotal: {} package(s)", installed.len());
            }
            Ok(())
        }
        Some(Commands::History { root }) => {
            let options = InstallOptions {
                output_directory: root.output_directory,
                solution_directory: root.solution_directory,
                ..InstallOptions::default()
            };
            let orchestrator = orchestrator(load_settings(config_file)?)?;
            let install_root = orchestrator.resolve_install_root(&options)?;
            let conn = stowage::db::open(&stowage::db::db_path(&install_root))?;
            let operations = stowage::db::models::Operation::list_all(&conn)?;

            if operations.is_empty() {
                println!("No operations recorded.");
            } else {
                println!("Operation history:");
                for operation in &operations {
                    let timestamp = operation
                        .applied_at
                        .as_ref()
                        .or(operation.rolled_back_at.as_ref())
                        .or(operation.created_at.as_ref())
                        .map(|s| s.as_str())
                        .unwrap_or("pending");
                    println!(
                        "  [{}] {} {} - {} ({})",
                        operation.id.unwrap_or(0),
                        timestamp,
                        operation.kind.as_str(),
                        operation.description,
                        operation.status.as_str()
                    );
                }
                println!("\nTotal: {} operation(s)", operations.len());
            }
            Ok(())
        }
        Some(Commands::Completions { shell }) => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "stowage", &mut std::io::stdout());
            Ok(())
        }
        None => {
            println!("Stowage Package Client v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'stowage --help' for usage information");
            Ok(())
        }
    }
}

fn display_writable(settings: &Settings) -> String {
    settings
        .writable_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "configuration".to_string())
}
