// src/backend/local.rs

//! Local filesystem backend

use super::{Backend, DirEntry, FileType, Metadata, clean_path, resolve_link_target};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io::{self, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// A store rooted at a directory on the local filesystem, typically `/nix/store`
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn os_path(&self, path: &str) -> Result<PathBuf> {
        let cleaned = clean_path(path)?;
        if cleaned.is_empty() {
            Ok(self.root.clone())
        } else {
            Ok(self.root.join(cleaned))
        }
    }

    fn map_io(&self, op: &'static str, path: &str, err: io::Error) -> Error {
        let location = self.describe(path);
        match err.kind() {
            io::ErrorKind::NotFound => Error::NotFound(location),
            io::ErrorKind::PermissionDenied => Error::PermissionDenied(location),
            _ => Error::Backend {
                op,
                path: location,
                source: err,
            },
        }
    }
}

fn file_type_of(ft: fs::FileType) -> FileType {
    if ft.is_symlink() {
        FileType::Symlink
    } else if ft.is_dir() {
        FileType::Directory
    } else if ft.is_file() {
        FileType::Regular
    } else {
        FileType::Other
    }
}

impl Backend for LocalBackend {
    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        let os_path = self.os_path(path)?;
        let file = File::open(&os_path).map_err(|e| self.map_io("open", path, e))?;
        Ok(Box::new(file))
    }

    fn stat(&self, path: &str) -> Result<Metadata> {
        let os_path = self.os_path(path)?;
        let meta = fs::symlink_metadata(&os_path).map_err(|e| self.map_io("stat", path, e))?;

        let mut metadata = Metadata::new(file_type_of(meta.file_type()), meta.len());
        metadata.executable = meta.permissions().mode() & 0o111 != 0;
        metadata.modified = meta.modified().ok().map(DateTime::<Utc>::from);
        Ok(metadata)
    }

    fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>> {
        let os_path = self.os_path(path)?;
        let reader = fs::read_dir(&os_path).map_err(|e| self.map_io("readdir", path, e))?;

        let mut entries = Vec::new();
        for entry in reader {
            let entry = entry.map_err(|e| self.map_io("readdir", path, e))?;
            let file_type = entry
                .file_type()
                .map_err(|e| self.map_io("readdir", path, e))?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                file_type: file_type_of(file_type),
            });
        }
        Ok(entries)
    }

    fn read_link(&self, path: &str) -> Result<String> {
        let link = clean_path(path)?;
        let os_path = self.os_path(&link)?;
        let target = fs::read_link(&os_path).map_err(|e| self.map_io("readlink", path, e))?;
        let target = target.to_str().ok_or_else(|| Error::Backend {
            op: "readlink",
            path: self.describe(path),
            source: io::Error::new(io::ErrorKind::InvalidData, "symlink target is not UTF-8"),
        })?;
        resolve_link_target(&link, target, &self.root.to_string_lossy())
    }

    fn describe(&self, path: &str) -> String {
        if path.is_empty() {
            self.root.display().to_string()
        } else {
            self.root.join(path).display().to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::tempdir;

    fn fixture() -> (tempfile::TempDir, LocalBackend) {
        let dir = tempdir().unwrap();
        let pkg = dir.path().join("pkg");
        fs::create_dir_all(pkg.join("bin")).unwrap();
        fs::write(pkg.join("bin/tool"), b"#!/bin/sh\n").unwrap();
        fs::set_permissions(pkg.join("bin/tool"), fs::Permissions::from_mode(0o755)).unwrap();
        fs::write(pkg.join("README"), b"hello").unwrap();
        fs::create_dir_all(dir.path().join("dep/lib")).unwrap();
        let backend = LocalBackend::new(dir.path());
        (dir, backend)
    }

    #[test]
    fn test_open_and_stat() {
        let (_dir, backend) = fixture();

        let mut content = String::new();
        backend.open("pkg/README").unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "hello");

        let meta = backend.stat("pkg/bin/tool").unwrap();
        assert_eq!(meta.file_type, FileType::Regular);
        assert!(meta.executable);
        assert!(meta.modified.is_some());

        let meta = backend.stat("pkg").unwrap();
        assert_eq!(meta.file_type, FileType::Directory);
    }

    #[test]
    fn test_missing_path_is_not_found() {
        let (_dir, backend) = fixture();
        assert!(matches!(backend.open("pkg/nope"), Err(e) if e.is_not_found()));
        assert!(backend.stat("nope").unwrap_err().is_not_found());
    }

    #[test]
    fn test_list_directory() {
        let (_dir, backend) = fixture();
        let mut entries = backend.list_directory("pkg").unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(
            entries,
            vec![
                DirEntry { name: "README".to_string(), file_type: FileType::Regular },
                DirEntry { name: "bin".to_string(), file_type: FileType::Directory },
            ]
        );
    }

    #[test]
    fn test_read_link_relative_and_absolute() {
        let (dir, backend) = fixture();
        symlink("../../dep/lib", dir.path().join("pkg/bin/rel")).unwrap();
        symlink(dir.path().join("dep/lib"), dir.path().join("pkg/abs")).unwrap();

        assert_eq!(backend.read_link("pkg/bin/rel").unwrap(), "dep/lib");
        assert_eq!(backend.read_link("pkg/abs").unwrap(), "dep/lib");
        assert_eq!(backend.stat("pkg/abs").unwrap().file_type, FileType::Symlink);
    }

    #[test]
    fn test_read_link_escaping_root() {
        let (dir, backend) = fixture();
        symlink("/usr/bin/env", dir.path().join("pkg/env")).unwrap();
        symlink("../../..", dir.path().join("pkg/bin/up")).unwrap();

        assert!(matches!(backend.read_link("pkg/env"), Err(Error::PathEscape { .. })));
        assert!(matches!(backend.read_link("pkg/bin/up"), Err(Error::PathEscape { .. })));
    }

    #[test]
    fn test_rejects_escaping_request_paths() {
        let (_dir, backend) = fixture();
        assert!(matches!(backend.open("../etc/passwd"), Err(Error::PathEscape { .. })));
    }
}
