// src/store/package.rs

use crate::backend::SubBackend;
use crate::narinfo::{Compression, NarInfo};
use crate::store::name::HASH_LEN;
use std::collections::BTreeSet;
use std::fmt;

/// Identity of a package within one [`Store`](super::Store).
///
/// Ids are dense indexes in insertion order, so they double as the pattern
/// index of the package's hash in the store's dependency scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageId(pub(crate) usize);

impl PackageId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Where to fetch a package's archive, taken from its sidecar metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSource {
    /// Path of the archive relative to the store root
    pub url: String,
    pub compression: Compression,
    pub nar_hash: Option<String>,
    pub nar_size: Option<u64>,
}

impl From<&NarInfo> for ArchiveSource {
    fn from(info: &NarInfo) -> Self {
        Self {
            url: info.url.clone(),
            compression: info.compression.clone(),
            nar_hash: info.nar_hash.clone(),
            nar_size: info.nar_size,
        }
    }
}

/// A single store entry
#[derive(Debug, Clone)]
pub struct Package {
    id: PackageId,
    store_name: String,
    files: SubBackend,

    /// `None` until resolved; afterwards the (possibly empty) set of packages
    /// this one refers to, never including itself
    pub(crate) direct_dependencies: Option<BTreeSet<PackageId>>,

    /// Set when resolution found a sidecar
    pub(crate) archive: Option<ArchiveSource>,
}

impl Package {
    pub(crate) fn new(id: PackageId, store_name: String, files: SubBackend) -> Self {
        Self {
            id,
            store_name,
            files,
            direct_dependencies: None,
            archive: None,
        }
    }

    pub fn id(&self) -> PackageId {
        self.id
    }

    /// Full `<hash>-<name>` store name
    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    pub fn hash(&self) -> &str {
        &self.store_name[..HASH_LEN]
    }

    /// Human-readable part of the store name
    pub fn name(&self) -> &str {
        &self.store_name[HASH_LEN + 1..]
    }

    /// The package's files, rooted at its store directory
    pub fn files(&self) -> &SubBackend {
        &self.files
    }

    pub fn is_resolved(&self) -> bool {
        self.direct_dependencies.is_some()
    }

    pub fn direct_dependencies(&self) -> Option<&BTreeSet<PackageId>> {
        self.direct_dependencies.as_ref()
    }

    pub fn archive(&self) -> Option<&ArchiveSource> {
        self.archive.as_ref()
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.store_name)
    }
}
