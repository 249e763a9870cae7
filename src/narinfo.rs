// src/narinfo.rs

//! Narinfo sidecar files
//!
//! Binary caches publish a `<hash>.narinfo` file next to every package. It is
//! a list of `Key: value` lines naming the package's compressed archive and
//! its references, which lets dependencies be resolved without downloading or
//! scanning anything:
//!
//! ```text
//! StorePath: /nix/store/yx99qh8pqwaqkb1n3dv7w2nf42mykkmh-hello-2.12.1
//! URL: nar/1fmj8xjb7kbjw4n0pf8h4nrk2ssdbgr10fwi4qqyf4cdcwybksf4.nar.xz
//! Compression: xz
//! NarHash: sha256:0b8qqd1zqf9ai2nxmgwbvaffk0jawanfvhqd6dxwk7bzqwv7iqfp
//! NarSize: 226560
//! References: 3n58xw4373jp0ljirf06d8077j15pc4j-glibc-2.37-8 yx99qh8pqwaqkb1n3dv7w2nf42mykkmh-hello-2.12.1
//! ```

use crate::error::{Error, Result};
use crate::store::name::{is_valid_hash, nix_base32_encode};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// Largest sidecar file accepted, far above anything a real cache serves
pub const MAX_NARINFO_SIZE: u64 = 1 << 20;

/// Compression applied to an archive
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Compression {
    None,
    Xz,
    Zstd,
    Gzip,
    /// Nix's default when a sidecar doesn't say
    #[default]
    Bzip2,
    /// Anything else a cache might advertise (e.g. `br`)
    Other(String),
}

impl Compression {
    pub fn as_str(&self) -> &str {
        match self {
            Compression::None => "none",
            Compression::Xz => "xz",
            Compression::Zstd => "zstd",
            Compression::Gzip => "gzip",
            Compression::Bzip2 => "bzip2",
            Compression::Other(name) => name,
        }
    }
}

impl FromStr for Compression {
    type Err = Error;

    /// Never fails: unknown schemes are kept so that a package's references
    /// can still be used even if its archive can't be decoded.
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "" | "none" => Compression::None,
            "xz" => Compression::Xz,
            "zstd" => Compression::Zstd,
            "gzip" => Compression::Gzip,
            "bzip2" => Compression::Bzip2,
            other => Compression::Other(other.to_string()),
        })
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed contents of a `.narinfo` file
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NarInfo {
    pub store_path: String,
    pub url: String,
    pub compression: Compression,
    pub file_hash: Option<String>,
    pub file_size: Option<u64>,
    pub nar_hash: Option<String>,
    pub nar_size: Option<u64>,
    /// Store names of referenced packages, possibly including this one
    pub references: Vec<String>,
    pub deriver: Option<String>,
    pub system: Option<String>,
    pub signatures: Vec<String>,
    pub ca: Option<String>,
}

impl NarInfo {
    /// Parse a sidecar file. `StorePath` and `URL` are required; unknown
    /// keys are ignored.
    pub fn parse(content: &str) -> Result<Self> {
        let mut info = NarInfo::default();
        let mut compression = None;

        for (number, line) in content.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let (key, value) = line.split_once(':').ok_or_else(|| {
                Error::ParseError(format!("narinfo line {}: expected 'Key: value'", number + 1))
            })?;
            let value = value.trim();

            match key.trim() {
                "StorePath" => info.store_path = value.to_string(),
                "URL" => info.url = value.to_string(),
                "Compression" => compression = Some(value.parse::<Compression>()?),
                "FileHash" => info.file_hash = Some(value.to_string()),
                "FileSize" => info.file_size = Some(parse_size("FileSize", value)?),
                "NarHash" => info.nar_hash = Some(value.to_string()),
                "NarSize" => info.nar_size = Some(parse_size("NarSize", value)?),
                "References" => {
                    info.references = value.split_whitespace().map(str::to_string).collect();
                }
                "Deriver" if value != "unknown-deriver" => info.deriver = Some(value.to_string()),
                "System" => info.system = Some(value.to_string()),
                "Sig" => info.signatures.push(value.to_string()),
                "CA" => info.ca = Some(value.to_string()),
                other => debug!("Ignoring narinfo field {}", other),
            }
        }

        if info.store_path.is_empty() {
            return Err(Error::ParseError("narinfo has no StorePath".to_string()));
        }
        if info.url.is_empty() {
            return Err(Error::ParseError("narinfo has no URL".to_string()));
        }
        info.compression = compression.unwrap_or_default();
        Ok(info)
    }

    /// The `<hash>-<name>` part of `StorePath`
    pub fn store_name(&self) -> &str {
        self.store_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.store_path)
    }
}

fn parse_size(key: &str, value: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|_| Error::ParseError(format!("narinfo {} is not a number: {:?}", key, value)))
}

/// Compare a `sha256:<digest>` string against a computed SHA-256 digest.
///
/// Digests may be written in Nix base-32 (52 characters) or hex (64
/// characters). Returns `Ok(None)` when the expectation uses an algorithm
/// other than SHA-256 and can't be checked, otherwise whether it matched.
pub fn sha256_matches(expected: &str, digest: &[u8]) -> Result<Option<bool>> {
    let Some((algorithm, encoded)) = expected.split_once(':') else {
        return Err(Error::ParseError(format!("hash has no algorithm prefix: {}", expected)));
    };
    if algorithm != "sha256" {
        warn!("Can't verify {} hash, skipping check", algorithm);
        return Ok(None);
    }

    match encoded.len() {
        52 => Ok(Some(encoded == nix_base32_encode(digest))),
        64 => {
            let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
            Ok(Some(encoded.eq_ignore_ascii_case(&hex)))
        }
        _ => Err(Error::ParseError(format!("malformed sha256 hash: {}", expected))),
    }
}

/// Name of the sidecar file describing the package with `hash`
pub fn sidecar_name(hash: &str) -> Result<String> {
    if !is_valid_hash(hash) {
        return Err(Error::InvalidName {
            name: hash.to_string(),
            reason: "not a store hash".to_string(),
        });
    }
    Ok(format!("{}.narinfo", hash))
}
