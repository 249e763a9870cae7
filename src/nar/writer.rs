// src/nar/writer.rs

use super::{MAGIC, padding, validate_name};
use crate::backend::{Backend, FileType, join, relative_link};
use crate::error::{Error, Result};
use std::io::{self, Read, Write};

/// Low-level NAR token writer
#[derive(Debug)]
pub struct NarWriter<W> {
    out: W,
}

impl<W: Write> NarWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Write one length-prefixed, padded string
    pub fn token(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.out.write_all(&(bytes.len() as u64).to_le_bytes())?;
        self.out.write_all(bytes)?;
        self.pad(bytes.len() as u64)
    }

    fn tokens(&mut self, tokens: &[&str]) -> io::Result<()> {
        tokens.iter().try_for_each(|t| self.token(t.as_bytes()))
    }

    fn pad(&mut self, len: u64) -> io::Result<()> {
        self.out.write_all(&[0u8; 8][..padding(len)])
    }

    /// Write a regular file's contents as a string of exactly `size` bytes
    fn contents(&mut self, size: u64, reader: &mut dyn Read) -> Result<u64> {
        self.out.write_all(&size.to_le_bytes())?;
        let copied = io::copy(&mut reader.take(size), &mut self.out)?;
        self.pad(size)?;
        Ok(copied)
    }
}

/// Serialize `path` and everything beneath it as a NAR.
///
/// `path` is relative to the backend root. Symlink destinations are written
/// relative to the link, so the archive stays valid wherever it's unpacked
/// as long as its references sit next to it.
pub fn dump<W: Write>(backend: &dyn Backend, path: &str, out: W) -> Result<W> {
    let mut writer = NarWriter::new(out);
    writer.token(MAGIC.as_bytes())?;
    dump_node(backend, path, &mut writer)?;
    writer.out.flush()?;
    Ok(writer.into_inner())
}

fn dump_node<W: Write>(backend: &dyn Backend, path: &str, writer: &mut NarWriter<W>) -> Result<()> {
    let meta = backend.stat(path)?;
    writer.tokens(&["(", "type"])?;

    match meta.file_type {
        FileType::Regular => {
            writer.token(b"regular")?;
            if meta.executable {
                writer.tokens(&["executable", ""])?;
            }
            writer.token(b"contents")?;
            let mut file = backend.open(path)?;
            let copied = writer.contents(meta.len, &mut file)?;
            if copied != meta.len {
                return Err(Error::Nar(format!(
                    "{} shrank from {} to {} bytes while archiving",
                    backend.describe(path),
                    meta.len,
                    copied
                )));
            }
        }
        FileType::Symlink => {
            let target = backend.read_link(path)?;
            writer.tokens(&["symlink", "target"])?;
            writer.token(relative_link(path, &target).as_bytes())?;
        }
        FileType::Directory => {
            writer.token(b"directory")?;
            let mut entries = backend.list_directory(path)?;
            entries.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
            for entry in entries {
                validate_name(&entry.name).map_err(Error::Nar)?;
                writer.tokens(&["entry", "(", "name"])?;
                writer.token(entry.name.as_bytes())?;
                writer.token(b"node")?;
                dump_node(backend, &join(path, &entry.name), writer)?;
                writer.token(b")")?;
            }
        }
        FileType::Other => {
            return Err(Error::Nar(format!(
                "{} is not a regular file, directory or symlink",
                backend.describe(path)
            )));
        }
    }

    writer.token(b")")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalBackend;
    use crate::nar::{EntryKind, NarReader};
    use std::fs;
    use std::io::Cursor;
    use std::os::unix::fs::{PermissionsExt, symlink};
    use tempfile::tempdir;

    #[test]
    fn test_single_file_layout() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("f"), b"hi").unwrap();
        fs::set_permissions(dir.path().join("f"), fs::Permissions::from_mode(0o755)).unwrap();

        let out = dump(&LocalBackend::new(dir.path()), "f", Vec::new()).unwrap();

        let mut expected = Vec::new();
        let mut writer = NarWriter::new(&mut expected);
        for token in ["nix-archive-1", "(", "type", "regular", "executable", "", "contents", "hi", ")"] {
            writer.token(token.as_bytes()).unwrap();
        }
        assert_eq!(out, expected);
        // 13-byte magic padded to 16, plus its 8-byte length
        assert_eq!(&out[..8], &13u64.to_le_bytes());
        assert_eq!(&out[21..24], &[0, 0, 0]);
    }

    #[test]
    fn test_dump_tree() {
        let dir = tempdir().unwrap();
        let pkg = dir.path().join("pkg");
        fs::create_dir_all(pkg.join("bin")).unwrap();
        fs::create_dir_all(pkg.join("empty")).unwrap();
        fs::write(pkg.join("bin/tool"), b"#!/bin/sh\necho hi\n").unwrap();
        fs::write(pkg.join("README"), b"read me").unwrap();
        fs::create_dir_all(dir.path().join("dep/lib")).unwrap();
        // An absolute link into a sibling package is made relative
        symlink(dir.path().join("dep/lib"), pkg.join("lib")).unwrap();

        let data = dump(&LocalBackend::new(dir.path()), "pkg", Vec::new()).unwrap();
        let mut nar = NarReader::new(Cursor::new(data));
        let mut seen = Vec::new();
        while let Some(entry) = nar.next_entry().unwrap() {
            if let EntryKind::Regular { .. } = entry.kind {
                let mut contents = String::new();
                nar.read_to_string(&mut contents).unwrap();
                seen.push((entry.path, format!("file:{}", contents)));
            } else {
                seen.push((entry.path, format!("{:?}", entry.kind)));
            }
        }

        let paths: Vec<&str> = seen.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["", "README", "bin", "bin/tool", "empty", "lib"]);
        assert_eq!(seen[1].1, "file:read me");
        assert_eq!(
            seen[5].1,
            format!("{:?}", EntryKind::Symlink { target: "../dep/lib".to_string() })
        );
    }

    #[test]
    fn test_dump_missing_path() {
        let dir = tempdir().unwrap();
        let result = dump(&LocalBackend::new(dir.path()), "nope", Vec::new());
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
