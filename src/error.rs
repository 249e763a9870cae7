// src/error.rs

use thiserror::Error;

/// Core error types for Depot
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A store name or hash that doesn't follow the `<hash>-<name>` convention
    #[error("Invalid package name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    /// A path that doesn't exist in a backend
    #[error("Not found: {0}")]
    NotFound(String),

    /// A backend refused access to a path
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Any other backend failure, with the operation and path that caused it
    #[error("{op} {path}: {source}")]
    Backend {
        op: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A symlink or path that resolves outside of the backend root
    #[error("{path} evaluates to a path outside of the root: {target}")]
    PathEscape { path: String, target: String },

    /// Unexpected HTTP status from a remote store
    #[error("HTTP {status} from {url}{}", remote_detail(.code, .message))]
    Remote {
        url: String,
        status: u16,
        code: Option<String>,
        message: Option<String>,
    },

    /// Transport-level HTTP failure
    #[error("Download error: {0}")]
    DownloadError(String),

    /// A symlink pointing into a package the store doesn't know about
    #[error("Symlink at {path} points to a missing package: {target}")]
    MissingReference { path: String, target: String },

    /// Dependency resolution failed for a package
    #[error("Error resolving dependencies of {package}: {source}")]
    Resolve {
        package: String,
        #[source]
        source: Box<Error>,
    },

    /// Malformed sidecar metadata
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Malformed NAR stream
    #[error("Invalid archive: {0}")]
    Nar(String),

    /// Extraction of a package archive failed
    #[error("Failed to extract {archive} for {package}: {source}")]
    Archive {
        archive: String,
        package: String,
        #[source]
        source: Box<Error>,
    },

    /// Decompressor could not be set up for an archive
    #[error("Failed to decompress {archive} ({compression}): {source}")]
    Decompress {
        archive: String,
        compression: String,
        #[source]
        source: std::io::Error,
    },

    /// Compression scheme this build can't decode
    #[error("Unsupported compression: {0}")]
    UnsupportedCompression(String),

    /// Archive contents don't match the digest or size in its sidecar
    #[error("Checksum mismatch for {archive}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        archive: String,
        expected: String,
        actual: String,
    },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Returns true if the error means the requested path doesn't exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

fn remote_detail(code: &Option<String>, message: &Option<String>) -> String {
    match (code, message) {
        (Some(code), Some(message)) => format!(": {}: {}", code, message),
        (Some(code), None) => format!(": {}", code),
        (None, Some(message)) => format!(": {}", message),
        (None, None) => String::new(),
    }
}

/// Result type alias using Depot's Error type
pub type Result<T> = std::result::Result<T, Error>;
