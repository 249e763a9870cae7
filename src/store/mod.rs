// src/store/mod.rs

//! Package index and dependency resolution
//!
//! A [`Store`] owns every [`Package`] it has seen, in an arena indexed by
//! [`PackageId`]. Packages are only ever added, never replaced, so a given
//! hash maps to the same package for the lifetime of the store, and packages
//! refer to each other by id rather than by pointer.
//!
//! Dependencies are resolved on demand and memoized. Two strategies are
//! tried in order:
//!
//! 1. **Sidecar**: `<hash>.narinfo` at the store root lists the package's
//!    references and where its archive lives.
//! 2. **Content scan**: every regular file in the package is searched for
//!    the hashes of all known packages, and every symlink's destination is
//!    matched against them.

pub mod name;
pub mod package;

pub use name::{HASH_LEN, is_valid_store_name, parse_store_name};
pub use package::{ArchiveSource, Package, PackageId};

use crate::backend::{Backend, FileType, LocalBackend, RemoteBackend, SubBackend, walk};
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::narinfo::{MAX_NARINFO_SIZE, NarInfo, sidecar_name};
use crate::scanner::DependencyScanner;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// An index of the packages in one backend
#[derive(Debug)]
pub struct Store {
    backend: Arc<dyn Backend>,
    config: StoreConfig,

    packages: Vec<Package>,
    by_hash: HashMap<String, PackageId>,

    /// Hash of every package, in id order; the scanner's pattern list
    hashes: Vec<String>,

    /// Built lazily and dropped whenever a package is added
    scanner: Option<DependencyScanner>,

    /// Whether `build_index` has completed at least once
    indexed: bool,

    /// Packages whose resolution is in progress, to cut reference cycles
    resolving: HashSet<PackageId>,
}

impl Store {
    pub fn new(backend: Arc<dyn Backend>, config: StoreConfig) -> Self {
        Self {
            backend,
            config,
            packages: Vec::new(),
            by_hash: HashMap::new(),
            hashes: Vec::new(),
            scanner: None,
            indexed: false,
            resolving: HashSet::new(),
        }
    }

    /// A store in a local directory such as `/nix/store`
    pub fn local(root: impl Into<PathBuf>, config: StoreConfig) -> Self {
        Self::new(Arc::new(LocalBackend::new(root)), config)
    }

    /// A store served over HTTP, such as a binary cache or S3 bucket
    pub fn remote(base_url: &str, config: StoreConfig) -> Result<Self> {
        let backend = RemoteBackend::new(base_url, config.http_timeout())?;
        Ok(Self::new(Arc::new(backend), config))
    }

    /// Open `location` as a remote store if it is an `http(s)://` URL and
    /// as a local directory otherwise
    pub fn open(location: &str, config: StoreConfig) -> Result<Self> {
        if location.starts_with("http://") || location.starts_with("https://") {
            Self::remote(location, config)
        } else {
            Ok(Self::local(location, config))
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Every package indexed so far, in id order
    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    /// Look up a package by id.
    ///
    /// # Panics
    ///
    /// Panics if `id` came from a different store.
    pub fn get(&self, id: PackageId) -> &Package {
        &self.packages[id.0]
    }

    pub fn lookup_hash(&self, hash: &str) -> Option<PackageId> {
        self.by_hash.get(hash).copied()
    }

    /// Look up a package by store name, adding it to the index if needed.
    ///
    /// The name is validated but the package's existence is not checked. A
    /// name whose hash is already indexed returns the existing package.
    pub fn index_package(&mut self, name: &str) -> Result<PackageId> {
        let (hash, _) = parse_store_name(name)?;
        if let Some(&id) = self.by_hash.get(hash) {
            return Ok(id);
        }

        let id = PackageId(self.packages.len());
        let files = SubBackend::new(Arc::clone(&self.backend), name)?;
        self.packages.push(Package::new(id, name.to_string(), files));
        self.by_hash.insert(hash.to_string(), id);
        self.hashes.push(hash.to_string());
        self.scanner = None;
        Ok(id)
    }

    /// Look up a package by store name and resolve its dependencies
    pub fn package(&mut self, name: &str) -> Result<PackageId> {
        let id = self.index_package(name)?;
        self.resolve(id)?;
        Ok(id)
    }

    /// Index every entry at the store root with a valid store name.
    ///
    /// Other entries (`.links`, sidecar files, lock files) are skipped.
    /// Returns the number of packages that were not indexed before.
    pub fn build_index(&mut self) -> Result<usize> {
        let entries = self.backend.list_directory("")?;
        let before = self.packages.len();

        for entry in entries {
            if !is_valid_store_name(&entry.name) {
                debug!("Skipping {}: not a store entry", entry.name);
                continue;
            }
            self.index_package(&entry.name)?;
        }

        self.indexed = true;
        let added = self.packages.len() - before;
        info!(
            "Indexed {} packages in {} ({} new)",
            self.packages.len(),
            self.backend.describe(""),
            added
        );
        Ok(added)
    }

    /// Resolve the direct dependencies of `id` and, recursively, of
    /// everything it depends on. Already-resolved packages are not revisited.
    pub fn resolve(&mut self, id: PackageId) -> Result<()> {
        if self.packages[id.0].is_resolved() || self.resolving.contains(&id) {
            return Ok(());
        }

        self.resolving.insert(id);
        let result = self.resolve_uncached(id);
        self.resolving.remove(&id);

        result.map_err(|e| Error::Resolve {
            package: self.packages[id.0].store_name().to_string(),
            source: Box::new(e),
        })
    }

    /// Direct dependencies of `id`, resolving them first if needed
    pub fn direct_dependencies(&mut self, id: PackageId) -> Result<&BTreeSet<PackageId>> {
        self.resolve(id)?;
        // Resolved unless `id` is mid-resolution further up the stack
        Ok(self.packages[id.0]
            .direct_dependencies
            .get_or_insert_with(BTreeSet::new))
    }

    fn resolve_uncached(&mut self, id: PackageId) -> Result<()> {
        let (deps, archive) = match self.read_sidecar(id)? {
            Some(info) => {
                let deps = self.sidecar_dependencies(id, &info)?;
                (deps, Some(ArchiveSource::from(&info)))
            }
            None => (self.scan_dependencies(id)?, None),
        };

        debug!(
            "{} has {} direct dependencies",
            self.packages[id.0],
            deps.len()
        );
        for &dep in &deps {
            self.resolve(dep)?;
        }

        let package = &mut self.packages[id.0];
        package.archive = archive;
        package.direct_dependencies = Some(deps);
        Ok(())
    }

    /// Fetch and parse the package's sidecar. A missing sidecar is `None`;
    /// any other failure is an error.
    fn read_sidecar(&self, id: PackageId) -> Result<Option<NarInfo>> {
        let package = &self.packages[id.0];
        let path = sidecar_name(package.hash())?;

        let reader = match self.backend.open(&path) {
            Ok(reader) => reader,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        let mut content = String::new();
        reader
            .take(MAX_NARINFO_SIZE + 1)
            .read_to_string(&mut content)
            .map_err(|e| read_error(self.backend.as_ref(), &path, e))?;
        if content.len() as u64 > MAX_NARINFO_SIZE {
            return Err(Error::ParseError(format!(
                "{} exceeds {} bytes",
                self.backend.describe(&path),
                MAX_NARINFO_SIZE
            )));
        }

        let info = NarInfo::parse(&content)
            .map_err(|e| Error::ParseError(format!("{}: {}", self.backend.describe(&path), e)))?;
        if info.store_name() != package.store_name() {
            return Err(Error::ParseError(format!(
                "{} describes {}, not {}",
                self.backend.describe(&path),
                info.store_path,
                package
            )));
        }
        debug!("Using sidecar {} for {}", path, package);
        Ok(Some(info))
    }

    fn sidecar_dependencies(&mut self, id: PackageId, info: &NarInfo) -> Result<BTreeSet<PackageId>> {
        let own_hash = self.packages[id.0].hash().to_string();
        let mut deps = BTreeSet::new();
        for reference in &info.references {
            let (hash, _) = parse_store_name(reference)?;
            if hash == own_hash {
                continue;
            }
            deps.insert(self.index_package(reference)?);
        }
        Ok(deps)
    }

    fn scan_dependencies(&mut self, id: PackageId) -> Result<BTreeSet<PackageId>> {
        if !self.indexed {
            self.build_index()?;
        }
        let mut scanner = match self.scanner.take() {
            Some(scanner) => scanner,
            None => {
                debug!("Building dependency scanner for {} hashes", self.hashes.len());
                DependencyScanner::with_buffer_size(&self.hashes, self.config.scan_buffer_size)?
            }
        };

        let result = self.scan_with(&mut scanner, id);
        self.scanner = Some(scanner);
        let mut deps = result?;
        deps.remove(&id);
        Ok(deps)
    }

    fn scan_with(&self, scanner: &mut DependencyScanner, id: PackageId) -> Result<BTreeSet<PackageId>> {
        let files = self.packages[id.0].files();
        let mut deps = BTreeSet::new();

        walk(files, "", &mut |path, file_type| {
            match file_type {
                FileType::Regular => {
                    let mut file = files.open(path)?;
                    let found = scanner.scan(&mut file).map_err(|e| match e {
                        Error::Io(source) => read_error(files, path, source),
                        other => other,
                    })?;
                    deps.extend(found.iter().map(|&i| PackageId(i)));
                }
                FileType::Symlink => {
                    let target = files.read_link(path)?;
                    if target.len() > HASH_LEN {
                        let dep = target
                            .get(..HASH_LEN)
                            .and_then(|hash| self.by_hash.get(hash))
                            .ok_or_else(|| Error::MissingReference {
                                path: files.describe(path),
                                target: target.clone(),
                            })?;
                        deps.insert(*dep);
                    }
                }
                FileType::Directory | FileType::Other => {}
            }
            Ok(())
        })?;

        Ok(deps)
    }
}

fn read_error(backend: &dyn Backend, path: &str, source: std::io::Error) -> Error {
    Error::Backend {
        op: "read",
        path: backend.describe(path),
        source,
    }
}
