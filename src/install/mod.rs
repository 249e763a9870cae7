// src/install/mod.rs

//! Package installation
//!
//! Installs a package and its dependency closure into a destination store
//! directory. Dependencies are installed before their dependents, and each
//! package is unpacked into a staging directory inside the destination and
//! then renamed into place, so a package's final path either doesn't exist
//! or holds a complete copy.
//!
//! A staging directory whose package never reaches its final path is left
//! where it is. Removing it is up to whoever garbage collects the store.

mod archive;
mod extract;

pub use archive::{Verifier, decompress};
pub use extract::{DIR_MODE, EXECUTABLE_MODE, ExtractPolicy, FILE_MODE, extract};

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::nar;
use crate::store::{ArchiveSource, Package, PackageId, Store};
use serde::Serialize;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Order `root`'s dependency closure so that every package comes after
/// everything it depends on. `root` is last.
///
/// Unresolved packages are treated as having no dependencies.
pub fn topological_sort(store: &Store, root: PackageId) -> Vec<PackageId> {
    fn visit(store: &Store, id: PackageId, seen: &mut HashSet<PackageId>, order: &mut Vec<PackageId>) {
        if !seen.insert(id) {
            return;
        }
        if let Some(deps) = store.get(id).direct_dependencies() {
            for &dep in deps {
                visit(store, dep, seen, order);
            }
        }
        order.push(id);
    }

    let mut seen = HashSet::new();
    let mut order = Vec::new();
    visit(store, root, &mut seen, &mut order);
    order
}

/// Outcome of [`Installer::install`], as store names in install order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    pub installed: Vec<String>,
    /// Packages that were already present
    pub skipped: Vec<String>,
}

/// Installs packages into a local destination store
#[derive(Debug, Clone)]
pub struct Installer {
    dest: PathBuf,
    config: StoreConfig,
}

impl Installer {
    pub fn new(dest: impl Into<PathBuf>, config: StoreConfig) -> Self {
        Self {
            dest: dest.into(),
            config,
        }
    }

    pub fn dest(&self) -> &Path {
        &self.dest
    }

    /// Where `package` lives once installed
    pub fn final_path(&self, package: &Package) -> PathBuf {
        self.dest.join(package.store_name())
    }

    /// Whether `package` is already present in the destination
    pub fn is_installed(&self, package: &Package) -> bool {
        fs::symlink_metadata(self.final_path(package)).is_ok()
    }

    /// Install `id` and everything it depends on, skipping packages that
    /// are already present. Resolves dependencies first if needed.
    ///
    /// Stops at the first failure; packages installed before it stay
    /// installed.
    pub fn install(&self, store: &mut Store, id: PackageId) -> Result<InstallReport> {
        store.resolve(id)?;
        let order = topological_sort(store, id);
        info!(
            "Installing {} ({} packages in closure) into {}",
            store.get(id),
            order.len(),
            self.dest.display()
        );

        let mut report = InstallReport::default();
        for dep in order {
            let package = store.get(dep);
            if self.is_installed(package) {
                debug!("{} is already installed", package);
                report.skipped.push(package.store_name().to_string());
                continue;
            }

            let staged = self.stage(store, dep)?;
            if staged.commit()? {
                report.installed.push(package.store_name().to_string());
            } else {
                report.skipped.push(package.store_name().to_string());
            }
        }

        info!(
            "Installed {} packages, {} already present",
            report.installed.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    /// Unpack a single package into a fresh staging directory without
    /// touching its final path
    pub fn stage(&self, store: &Store, id: PackageId) -> Result<Staged> {
        let package = store.get(id);
        let staging_root = self.dest.join(&self.config.staging_dir);
        fs::create_dir_all(&staging_root).map_err(|e| Error::Backend {
            op: "mkdir",
            path: staging_root.display().to_string(),
            source: e,
        })?;

        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", package.hash()))
            .tempdir_in(&staging_root)?
            .keep();
        let root = dir.join(package.store_name());
        debug!("Staging {} in {}", package, dir.display());

        let (archive, result) = match package.archive() {
            Some(source) => {
                let archive = store.backend().describe(&source.url);
                let result = self.unpack_archive(store, source, &archive, &root);
                (archive, result)
            }
            None => {
                let archive = format!("archive of {}", store.backend().describe(package.store_name()));
                let result = self.unpack_synthesized(store, package, &dir, &root);
                (archive, result)
            }
        };
        result.map_err(|e| Error::Archive {
            archive,
            package: package.store_name().to_string(),
            source: Box::new(e),
        })?;

        Ok(Staged {
            package: package.store_name().to_string(),
            root,
            final_path: self.final_path(package),
            dir,
        })
    }

    /// Unpack the archive named by the package's sidecar
    fn unpack_archive(&self, store: &Store, source: &ArchiveSource, archive: &str, root: &Path) -> Result<()> {
        let raw = store.backend().open(&source.url)?;
        let mut reader = Verifier::new(decompress(raw, &source.compression, archive)?);
        extract(&mut reader, root, &ExtractPolicy::from_config(&self.config))?;

        if self.config.verify_nar_hash {
            reader.finish(archive, source.nar_hash.as_deref(), source.nar_size)?;
        }
        Ok(())
    }

    /// Serialize the package's files from the source store and unpack that
    fn unpack_synthesized(&self, store: &Store, package: &Package, spool_dir: &Path, root: &Path) -> Result<()> {
        let mut spool: File = tempfile::tempfile_in(spool_dir)?;
        nar::dump(store.backend().as_ref(), package.store_name(), &mut spool)?;
        spool.seek(SeekFrom::Start(0))?;
        extract(BufReader::new(spool), root, &ExtractPolicy::from_config(&self.config))
    }
}

/// A fully unpacked package waiting to be moved into the destination
#[derive(Debug)]
pub struct Staged {
    package: String,
    root: PathBuf,
    final_path: PathBuf,
    /// Per-package directory inside the staging area holding `root`
    dir: PathBuf,
}

impl Staged {
    /// Location of the unpacked package inside the staging area
    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Atomically rename the package into place.
    ///
    /// Returns `false` if the final path appeared while staging, in which
    /// case the staged copy stays behind untouched.
    pub fn commit(self) -> Result<bool> {
        match fs::rename(&self.root, &self.final_path) {
            Ok(()) => {
                // Empty now that its only entry has moved
                fs::remove_dir(&self.dir).ok();
                if let Some(parent) = self.final_path.parent() {
                    // Best effort: make the new directory entry durable
                    File::open(parent).and_then(|d| d.sync_all()).ok();
                }
                info!("Installed {}", self.package);
                Ok(true)
            }
            Err(_) if fs::symlink_metadata(&self.final_path).is_ok() => {
                debug!(
                    "{} was installed concurrently, abandoning {}",
                    self.package,
                    self.dir.display()
                );
                Ok(false)
            }
            Err(e) => Err(Error::Backend {
                op: "rename",
                path: self.final_path.display().to_string(),
                source: e,
            }),
        }
    }
}
