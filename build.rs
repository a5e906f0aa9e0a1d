// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn root_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("output_directory")
            .short('o')
            .long("output-directory")
            .value_name("DIR")
            .help("Directory packages are installed into"),
    )
    .arg(
        Arg::new("solution_directory")
            .long("solution-directory")
            .value_name("DIR")
            .help("Solution directory (packages go to <dir>/packages by default)"),
    )
}

fn install_args(cmd: Command) -> Command {
    root_args(cmd)
        .arg(
            Arg::new("source")
                .short('s')
                .long("source")
                .value_name("SOURCE")
                .action(ArgAction::Append)
                .help("Source name or location; repeatable"),
        )
        .arg(
            Arg::new("exclude_version")
                .short('x')
                .long("exclude-version")
                .action(ArgAction::SetTrue)
                .help("Install into a version-less directory, replacing older versions"),
        )
        .arg(
            Arg::new("prerelease")
                .long("prerelease")
                .action(ArgAction::SetTrue)
                .help("Allow prerelease versions"),
        )
        .arg(
            Arg::new("framework")
                .long("framework")
                .value_name("FRAMEWORK")
                .help("Target framework packages must support"),
        )
        .arg(
            Arg::new("no_cache")
                .long("no-cache")
                .action(ArgAction::SetTrue)
                .help("Skip the local package cache"),
        )
        .arg(
            Arg::new("ignore_failing_sources")
                .long("ignore-failing-sources")
                .action(ArgAction::SetTrue)
                .help("Continue when a source cannot be reached"),
        )
}

fn section_arg() -> Arg {
    Arg::new("section")
        .long("section")
        .value_name("SECTION")
        .default_value("config")
}

fn credential_args(cmd: Command) -> Command {
    cmd.arg(Arg::new("username").long("username").value_name("USER"))
        .arg(
            Arg::new("password")
                .long("password")
                .value_name("PASSWORD")
                .requires("username"),
        )
        .arg(
            Arg::new("store_password_in_clear_text")
                .long("store-password-in-clear-text")
                .action(ArgAction::SetTrue)
                .help("Store the password unencrypted"),
        )
}

fn build_cli() -> Command {
    Command::new("stowage")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Stowage Contributors")
        .about("Package restore client with layered configuration and transactional installs")
        .subcommand_required(false)
        .arg(
            Arg::new("config_file")
                .long("config-file")
                .value_name("PATH")
                .global(true)
                .help("Configuration file used instead of the per-user one"),
        )
        .subcommand(
            Command::new("config")
                .about("Read and write configuration values")
                .subcommand(
                    Command::new("get")
                        .about("Print a value")
                        .arg(Arg::new("key").required(true))
                        .arg(section_arg())
                        .arg(
                            Arg::new("as_path")
                                .long("as-path")
                                .action(ArgAction::SetTrue)
                                .help("Resolve the value as a path relative to its configuration file"),
                        ),
                )
                .subcommand(
                    Command::new("set")
                        .about("Set a value in the nearest writable configuration file")
                        .arg(Arg::new("key").required(true))
                        .arg(Arg::new("value").required(true))
                        .arg(section_arg()),
                )
                .subcommand(
                    Command::new("unset")
                        .about("Remove a value")
                        .arg(Arg::new("key").required(true))
                        .arg(section_arg()),
                )
                .subcommand(
                    Command::new("list")
                        .about("Print every value of a section")
                        .arg(section_arg()),
                ),
        )
        .subcommand(
            Command::new("sources")
                .about("Manage package sources")
                .subcommand(Command::new("list").about("List configured sources"))
                .subcommand(credential_args(
                    Command::new("add")
                        .about("Add a source")
                        .arg(Arg::new("name").required(true))
                        .arg(
                            Arg::new("source")
                                .short('s')
                                .long("source")
                                .required(true)
                                .help("URL or directory"),
                        ),
                ))
                .subcommand(
                    Command::new("remove")
                        .about("Remove a source")
                        .arg(Arg::new("name").required(true)),
                )
                .subcommand(
                    Command::new("enable")
                        .about("Enable a source")
                        .arg(Arg::new("name").required(true)),
                )
                .subcommand(
                    Command::new("disable")
                        .about("Disable a source")
                        .arg(Arg::new("name").required(true)),
                )
                .subcommand(credential_args(
                    Command::new("update")
                        .about("Change a source's location or credentials")
                        .arg(Arg::new("name").required(true))
                        .arg(Arg::new("source").short('s').long("source")),
                )),
        )
        .subcommand(install_args(
            Command::new("install")
                .about("Install a package and its dependencies")
                .arg(Arg::new("id").required(true).help("Package id"))
                .arg(
                    Arg::new("version")
                        .short('v')
                        .long("version")
                        .value_name("VERSION")
                        .help("Exact version (latest when omitted)"),
                ),
        ))
        .subcommand(install_args(
            Command::new("restore")
                .about("Install every package listed in a reference manifest")
                .arg(Arg::new("manifest").required(true).help("Path to the reference manifest"))
                .arg(
                    Arg::new("disable_parallel")
                        .long("disable-parallel")
                        .action(ArgAction::SetTrue)
                        .help("Restore one package at a time"),
                )
                .arg(
                    Arg::new("require_consent")
                        .long("require-consent")
                        .action(ArgAction::SetTrue)
                        .help("Refuse to restore unless consent has been granted"),
                ),
        ))
        .subcommand(root_args(
            Command::new("list").about("List installed packages").arg(
                Arg::new("exclude_version")
                    .short('x')
                    .long("exclude-version")
                    .action(ArgAction::SetTrue),
            ),
        ))
        .subcommand(root_args(
            Command::new("history").about("Show install, restore and uninstall history"),
        ))
        .subcommand(
            Command::new("completions")
                .about("Generate shell completions")
                .arg(Arg::new("shell").required(true)),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("stowage.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");

    println!("cargo:warning=Man page generated at {}", man_path.display());
}
