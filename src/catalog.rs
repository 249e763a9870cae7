// src/catalog.rs

//! Built-in catalog of well-known packages
//!
//! Maps attribute names such as `hello` or `python39Packages.numpy` to
//! store names. The table ships inside the binary as xz-compressed TSV
//! (`attribute<TAB>store name` per line, `#` comments) and is decoded the
//! first time it's needed.

use crate::error::{Error, Result};
use crate::store::name::parse_store_name;
use std::collections::BTreeMap;
use std::io::Read;
use std::sync::LazyLock;
use tracing::debug;
use xz2::read::XzDecoder;

static EMBEDDED: &[u8] = include_bytes!("../data/catalog.tsv.xz");

static CATALOG: LazyLock<std::result::Result<Catalog, String>> =
    LazyLock::new(|| Catalog::decode(EMBEDDED).map_err(|e| e.to_string()));

/// Attribute name to store name table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    entries: BTreeMap<String, String>,
}

impl Catalog {
    /// Decode an xz-compressed catalog
    pub fn decode(compressed: &[u8]) -> Result<Self> {
        let mut content = String::new();
        XzDecoder::new(compressed)
            .read_to_string(&mut content)
            .map_err(|e| Error::ParseError(format!("Failed to decompress catalog: {}", e)))?;
        Self::parse(&content)
    }

    /// Parse the uncompressed TSV form
    pub fn parse(content: &str) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for (number, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (attr, store_name) = line.split_once('\t').ok_or_else(|| {
                Error::ParseError(format!("catalog line {}: expected two tab-separated fields", number + 1))
            })?;
            let store_name = store_name.trim();
            parse_store_name(store_name)?;
            entries.insert(attr.trim().to_string(), store_name.to_string());
        }
        debug!("Loaded catalog with {} entries", entries.len());
        Ok(Self { entries })
    }

    pub fn get(&self, attr: &str) -> Option<&str> {
        self.entries.get(attr).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in attribute order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// The catalog built into this binary
pub fn builtin() -> Result<&'static Catalog> {
    CATALOG.as_ref().map_err(|e| Error::ParseError(e.clone()))
}

/// Store name for `attr` in the built-in catalog
pub fn lookup(attr: &str) -> Result<Option<&'static str>> {
    Ok(builtin()?.get(attr))
}
