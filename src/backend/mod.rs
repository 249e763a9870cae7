// src/backend/mod.rs

//! Store backends
//!
//! A backend is "a directory of files" addressed by slash-separated paths
//! relative to its root (`""` is the root itself). Two implementations exist:
//!
//! - [`LocalBackend`]: the OS filesystem, e.g. `/nix/store`
//! - [`RemoteBackend`]: an HTTP or S3-compatible bucket
//!
//! Path handling that has to be identical for both (normalization, symlink
//! containment) lives in this module so neither backend re-implements it.

pub mod local;
pub mod remote;

pub use local::LocalBackend;
pub use remote::RemoteBackend;

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::fmt;
use std::io::Read;
use std::sync::Arc;

/// Kind of a backend entry. Symlinks are reported as symlinks, never followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
    Other,
}

/// Metadata for a single entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub file_type: FileType,
    pub len: u64,
    pub executable: bool,
    pub modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub content_type: Option<String>,
}

impl Metadata {
    pub fn new(file_type: FileType, len: u64) -> Self {
        Self {
            file_type,
            len,
            executable: false,
            modified: None,
            etag: None,
            content_type: None,
        }
    }
}

/// One entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub file_type: FileType,
}

/// Uniform read-only access to a tree of files
pub trait Backend: fmt::Debug + Send + Sync {
    /// Open a file for reading
    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>>;

    /// Get an entry's metadata without following symlinks
    fn stat(&self, path: &str) -> Result<Metadata>;

    /// List a directory in no particular order
    fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>>;

    /// Read a symlink's destination as a path relative to the backend root.
    /// Destinations that resolve outside of the root are an error.
    fn read_link(&self, path: &str) -> Result<String>;

    /// Human-readable location of `path`, used in logs and error messages
    fn describe(&self, path: &str) -> String;
}

/// A view of a backend scoped to one of its subdirectories
///
/// Every package gets one of these rooted at its store name. Paths passed to
/// it are relative to the subdirectory, but [`Backend::read_link`] still
/// returns destinations relative to the *underlying* backend's root so they
/// can be matched against store names.
#[derive(Debug, Clone)]
pub struct SubBackend {
    inner: Arc<dyn Backend>,
    prefix: String,
}

impl SubBackend {
    pub fn new(inner: Arc<dyn Backend>, prefix: &str) -> Result<Self> {
        let prefix = clean_path(prefix)?;
        if prefix.is_empty() {
            return Err(Error::InvalidName {
                name: prefix,
                reason: "sub-backend prefix is empty".to_string(),
            });
        }
        Ok(Self { inner, prefix })
    }

    /// The subdirectory this view is rooted at
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Translate a path in this view to a path in the underlying backend
    pub fn full_path(&self, path: &str) -> Result<String> {
        Ok(join(&self.prefix, &clean_path(path)?))
    }
}

impl Backend for SubBackend {
    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        self.inner.open(&self.full_path(path)?)
    }

    fn stat(&self, path: &str) -> Result<Metadata> {
        self.inner.stat(&self.full_path(path)?)
    }

    fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>> {
        self.inner.list_directory(&self.full_path(path)?)
    }

    fn read_link(&self, path: &str) -> Result<String> {
        self.inner.read_link(&self.full_path(path)?)
    }

    fn describe(&self, path: &str) -> String {
        match self.full_path(path) {
            Ok(full) => self.inner.describe(&full),
            Err(_) => format!("{}/{}", self.inner.describe(&self.prefix), path),
        }
    }
}

/// Normalize a relative, slash-separated path.
///
/// `.` components and empty components are dropped and `..` is applied
/// lexically. The root is returned as `""`. Absolute paths and paths that
/// climb above the root are rejected.
pub fn clean_path(path: &str) -> Result<String> {
    if path.starts_with('/') {
        return Err(Error::PathEscape {
            path: path.to_string(),
            target: path.to_string(),
        });
    }
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(Error::PathEscape {
                        path: path.to_string(),
                        target: path.to_string(),
                    });
                }
            }
            other => parts.push(other),
        }
    }
    Ok(parts.join("/"))
}

/// Join a relative directory and a relative path
pub fn join(dir: &str, path: &str) -> String {
    match (dir.is_empty(), path.is_empty()) {
        (true, _) => path.to_string(),
        (false, true) => dir.to_string(),
        (false, false) => format!("{}/{}", dir, path),
    }
}

/// Parent directory of a relative path (`""` for top-level entries)
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[..i],
        None => "",
    }
}

/// Resolve the raw destination of the symlink at `link` (relative to the
/// backend root) into a root-relative path.
///
/// Relative destinations are interpreted from the link's directory. Absolute
/// destinations must live under `root`, the backend's absolute location, and
/// are translated to be relative to it. Anything that ends up outside of the
/// root is rejected.
pub fn resolve_link_target(link: &str, target: &str, root: &str) -> Result<String> {
    let escape = || Error::PathEscape {
        path: link.to_string(),
        target: target.to_string(),
    };

    let relative = if target.starts_with('/') {
        let root = root.trim_end_matches('/');
        let rest = target.strip_prefix(root).ok_or_else(escape)?;
        if !rest.is_empty() && !rest.starts_with('/') {
            // A sibling like /nix/store-other, not something under the root.
            return Err(escape());
        }
        rest.trim_start_matches('/').to_string()
    } else {
        join(parent(link), target)
    };
    clean_path(&relative).map_err(|_| escape())
}

/// Express the root-relative path `target` relative to the directory holding
/// the root-relative path `link`, i.e. the inverse of [`resolve_link_target`]
/// for relative destinations.
pub fn relative_link(link: &str, target: &str) -> String {
    let from: Vec<&str> = parent(link).split('/').filter(|c| !c.is_empty()).collect();
    let to: Vec<&str> = target.split('/').filter(|c| !c.is_empty()).collect();
    let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();

    let mut parts: Vec<&str> = vec![".."; from.len() - common];
    parts.extend(&to[common..]);
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

/// Depth-first walk over `root` and everything beneath it.
///
/// `visit` receives each entry's path (relative to the backend root) and its
/// type. Directory entries are visited in name order so walks are
/// reproducible; symlinks are reported, not followed.
pub fn walk<F>(backend: &dyn Backend, root: &str, visit: &mut F) -> Result<()>
where
    F: FnMut(&str, FileType) -> Result<()>,
{
    let root = clean_path(root)?;
    let file_type = backend.stat(&root)?.file_type;
    walk_entry(backend, &root, file_type, visit)
}

fn walk_entry<F>(backend: &dyn Backend, path: &str, file_type: FileType, visit: &mut F) -> Result<()>
where
    F: FnMut(&str, FileType) -> Result<()>,
{
    visit(path, file_type)?;
    if file_type != FileType::Directory {
        return Ok(());
    }

    let mut entries = backend.list_directory(path)?;
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    for entry in entries {
        walk_entry(backend, &join(path, &entry.name), entry.file_type, visit)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path("").unwrap(), "");
        assert_eq!(clean_path(".").unwrap(), "");
        assert_eq!(clean_path("a/./b//c/").unwrap(), "a/b/c");
        assert_eq!(clean_path("a/b/../c").unwrap(), "a/c");
        assert!(matches!(clean_path("../a"), Err(Error::PathEscape { .. })));
        assert!(matches!(clean_path("a/../../b"), Err(Error::PathEscape { .. })));
        assert!(matches!(clean_path("/etc/passwd"), Err(Error::PathEscape { .. })));
    }

    #[test]
    fn test_resolve_relative_link() {
        let target = resolve_link_target("pkg/lib/libfoo.so", "libfoo.so.1", "/nix/store").unwrap();
        assert_eq!(target, "pkg/lib/libfoo.so.1");

        let target = resolve_link_target("pkg/bin/sh", "../../dep/bin/bash", "/nix/store").unwrap();
        assert_eq!(target, "dep/bin/bash");
    }

    #[test]
    fn test_resolve_absolute_link() {
        let target =
            resolve_link_target("pkg/bin/sh", "/nix/store/dep/bin/bash", "/nix/store/").unwrap();
        assert_eq!(target, "dep/bin/bash");
    }

    #[test]
    fn test_resolve_link_outside_root() {
        assert!(matches!(
            resolve_link_target("pkg/bin/env", "/usr/bin/env", "/nix/store"),
            Err(Error::PathEscape { .. })
        ));
        assert!(matches!(
            resolve_link_target("pkg/up", "../../etc", "/nix/store"),
            Err(Error::PathEscape { .. })
        ));
        // Shares a string prefix with the root but is a different directory
        assert!(matches!(
            resolve_link_target("pkg/x", "/nix/store-other/y", "/nix/store"),
            Err(Error::PathEscape { .. })
        ));
    }

    #[test]
    fn test_relative_link() {
        assert_eq!(relative_link("pkg/bin/sh", "dep/bin/bash"), "../../dep/bin/bash");
        assert_eq!(relative_link("pkg/lib/a.so", "pkg/lib/a.so.1"), "a.so.1");
        assert_eq!(relative_link("pkg/lib/a.so", "pkg/lib"), ".");
        assert_eq!(relative_link("top", "dep"), "dep");
    }

    #[test]
    fn test_relative_link_round_trips() {
        let link = "pkg/share/doc/x";
        let target = "other/share/doc";
        let raw = relative_link(link, target);
        assert_eq!(resolve_link_target(link, &raw, "/store").unwrap(), target);
    }

    #[test]
    fn test_join_and_parent() {
        assert_eq!(join("", "a"), "a");
        assert_eq!(join("a", ""), "a");
        assert_eq!(join("a", "b/c"), "a/b/c");
        assert_eq!(parent("a/b/c"), "a/b");
        assert_eq!(parent("a"), "");
    }
}
