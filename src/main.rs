// src/main.rs

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use depot::config::StoreConfig;
use depot::install::{Installer, topological_sort};
use depot::store::{Store, is_valid_store_name};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "depot")]
#[command(author, version, about = "Index, resolve and install content-addressed store packages", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Index every package in a store
    Index {
        /// Store directory or http(s) URL
        store: String,
        /// Print every indexed package
        #[arg(short, long)]
        list: bool,
    },
    /// Show the dependencies of a package
    Deps {
        /// Store directory or http(s) URL
        store: String,
        /// Store name (`<hash>-<name>`) or catalog attribute
        package: String,
        /// Show the whole closure in install order
        #[arg(short, long)]
        recursive: bool,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Install a package and its dependencies into a local store
    Install {
        /// Store directory or http(s) URL to install from
        store: String,
        /// Store name (`<hash>-<name>`) or catalog attribute
        package: String,
        /// Destination store directory
        #[arg(short, long)]
        dest: PathBuf,
        /// Group ID for installed files
        #[arg(short, long)]
        build_group: Option<u32>,
        /// Skip NarHash/NarSize checks
        #[arg(long)]
        no_verify: bool,
        /// Print the install report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write a package as a NAR archive
    Dump {
        /// Store directory or http(s) URL
        store: String,
        /// Store name (`<hash>-<name>`) or catalog attribute
        package: String,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Look up a catalog attribute, or list the catalog
    Lookup {
        attr: Option<String>,
    },
    /// Generate shell completion scripts
    Completions {
        shell: Shell,
    },
}

#[derive(Serialize)]
struct PackageInfo {
    store_name: String,
    dependencies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    archive: Option<String>,
}

/// Accept either a store name or a catalog attribute
fn resolve_name(package: &str) -> Result<String> {
    if is_valid_store_name(package) {
        return Ok(package.to_string());
    }
    depot::catalog::lookup(package)?
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("'{}' is neither a store name nor a catalog attribute", package))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing subscriber for logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let config = match &cli.config {
        Some(path) => StoreConfig::load(path)?,
        None => StoreConfig::default(),
    };

    match cli.command {
        Some(Commands::Index { store, list }) => {
            let mut store = Store::open(&store, config)?;
            store.build_index()?;

            if list {
                let mut names: Vec<&str> = store.packages().iter().map(|p| p.store_name()).collect();
                names.sort_unstable();
                for name in names {
                    println!("{}", name);
                }
            }
            println!("Total: {} package(s)", store.len());
            Ok(())
        }
        Some(Commands::Deps {
            store,
            package,
            recursive,
            json,
        }) => {
            let name = resolve_name(&package)?;
            let mut store = Store::open(&store, config)?;
            let id = store.package(&name)?;

            let ids = if recursive {
                topological_sort(&store, id)
            } else {
                store.direct_dependencies(id)?.iter().copied().collect()
            };

            if json {
                let infos: Vec<PackageInfo> = ids
                    .iter()
                    .map(|&dep| {
                        let pkg = store.get(dep);
                        PackageInfo {
                            store_name: pkg.store_name().to_string(),
                            dependencies: pkg
                                .direct_dependencies()
                                .map(|deps| deps.iter().map(|&d| store.get(d).store_name().to_string()).collect())
                                .unwrap_or_default(),
                            archive: pkg.archive().map(|a| a.url.clone()),
                        }
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&infos)?);
            } else if ids.is_empty() {
                println!("{} has no dependencies", name);
            } else {
                for dep in ids {
                    println!("{}", store.get(dep));
                }
            }
            Ok(())
        }
        Some(Commands::Install {
            store,
            package,
            dest,
            build_group,
            no_verify,
            json,
        }) => {
            let mut config = config;
            if build_group.is_some() {
                config.build_group = build_group;
            }
            if no_verify {
                config.verify_nar_hash = false;
            }
            config.validate()?;

            let name = resolve_name(&package)?;
            info!("Installing {} into {}", name, dest.display());
            let mut store = Store::open(&store, config.clone())?;
            let id = store.index_package(&name)?;

            let installer = Installer::new(dest, config);
            let report = installer.install(&mut store, id)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }
            for name in &report.installed {
                println!("Installed: {}", name);
            }
            println!(
                "\n{} installed, {} already present",
                report.installed.len(),
                report.skipped.len()
            );
            Ok(())
        }
        Some(Commands::Dump {
            store,
            package,
            output,
        }) => {
            let name = resolve_name(&package)?;
            let store = Store::open(&store, config)?;
            let backend = store.backend().as_ref();

            match output {
                Some(path) => {
                    let file = File::create(&path)
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                    depot::nar::dump(backend, &name, BufWriter::new(file))?;
                    info!("Wrote {} to {}", name, path.display());
                }
                None => {
                    depot::nar::dump(backend, &name, BufWriter::new(io::stdout().lock()))?;
                }
            }
            Ok(())
        }
        Some(Commands::Lookup { attr }) => {
            match attr {
                Some(attr) => match depot::catalog::lookup(&attr)? {
                    Some(name) => println!("{}", name),
                    None => return Err(anyhow::anyhow!("'{}' is not in the catalog", attr)),
                },
                None => {
                    for (attr, name) in depot::catalog::builtin()?.iter() {
                        println!("{}\t{}", attr, name);
                    }
                }
            }
            Ok(())
        }
        Some(Commands::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "depot", &mut io::stdout());
            Ok(())
        }
        None => {
            Cli::command().print_help()?;
            io::stdout().flush()?;
            Ok(())
        }
    }
}
