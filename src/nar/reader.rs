// src/nar/reader.rs

use super::{MAGIC, MAX_STRING_LEN, padding, validate_name};
use crate::backend::join;
use crate::error::{Error, Result};
use std::io::{self, Read};

/// What a NAR entry is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Regular { size: u64, executable: bool },
    Directory,
    Symlink { target: String },
}

/// One node of the archive, in the order it appears
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Slash-separated path relative to the archive root; `""` is the root
    pub path: String,
    pub kind: EntryKind,
}

#[derive(Debug)]
struct Frame {
    path: String,
    last_name: Option<String>,
}

/// Streaming NAR parser.
///
/// Call [`next_entry`](Self::next_entry) repeatedly; after it returns a
/// regular file, the reader itself yields that file's contents through
/// [`Read`]. Contents that aren't read are skipped on the next call.
#[derive(Debug)]
pub struct NarReader<R> {
    inner: R,
    /// Open directories, innermost last
    stack: Vec<Frame>,
    started: bool,
    done: bool,

    in_file: bool,
    file_size: u64,
    remaining: u64,
}

impl<R: Read> NarReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            stack: Vec::new(),
            started: false,
            done: false,
            in_file: false,
            file_size: 0,
            remaining: 0,
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Advance to the next entry, or `None` once the root node is closed
    pub fn next_entry(&mut self) -> Result<Option<Entry>> {
        if self.in_file {
            self.finish_file()?;
        }
        if self.done {
            return Ok(None);
        }
        if !self.started {
            self.started = true;
            self.expect(MAGIC)?;
            return self.read_node(String::new()).map(Some);
        }

        loop {
            let token = self.read_bytes(MAX_STRING_LEN)?;
            match token.as_slice() {
                b"entry" => {
                    self.expect("(")?;
                    self.expect("name")?;
                    let name = self.read_string()?;
                    validate_name(&name).map_err(Error::Nar)?;

                    let frame = self
                        .stack
                        .last_mut()
                        .ok_or_else(|| Error::Nar("entry outside of a directory".to_string()))?;
                    if let Some(last) = &frame.last_name {
                        if name.as_bytes() <= last.as_bytes() {
                            return Err(Error::Nar(format!(
                                "entry {:?} in {:?} is out of order or duplicated",
                                name, frame.path
                            )));
                        }
                    }
                    let path = join(&frame.path, &name);
                    frame.last_name = Some(name);

                    self.expect("node")?;
                    return self.read_node(path).map(Some);
                }
                b")" => {
                    self.stack.pop();
                    self.close_node()?;
                    if self.done {
                        return Ok(None);
                    }
                }
                other => {
                    return Err(Error::Nar(format!(
                        "expected \"entry\" or \")\", got {:?}",
                        String::from_utf8_lossy(other)
                    )));
                }
            }
        }
    }

    fn read_node(&mut self, path: String) -> Result<Entry> {
        self.expect("(")?;
        self.expect("type")?;
        let node_type = self.read_bytes(MAX_STRING_LEN)?;

        let kind = match node_type.as_slice() {
            b"regular" => {
                let mut executable = false;
                let mut token = self.read_bytes(MAX_STRING_LEN)?;
                if token == b"executable" {
                    self.expect("")?;
                    executable = true;
                    token = self.read_bytes(MAX_STRING_LEN)?;
                }
                if token != b"contents" {
                    return Err(Error::Nar(format!(
                        "expected \"contents\", got {:?}",
                        String::from_utf8_lossy(&token)
                    )));
                }
                let size = self.read_u64()?;
                self.in_file = true;
                self.file_size = size;
                self.remaining = size;
                EntryKind::Regular { size, executable }
            }
            b"symlink" => {
                self.expect("target")?;
                let target = self.read_string()?;
                if target.is_empty() || target.contains('\0') {
                    return Err(Error::Nar(format!("invalid symlink target at {:?}", path)));
                }
                self.expect(")")?;
                self.close_node()?;
                EntryKind::Symlink { target }
            }
            b"directory" => {
                self.stack.push(Frame {
                    path: path.clone(),
                    last_name: None,
                });
                EntryKind::Directory
            }
            other => {
                return Err(Error::Nar(format!(
                    "unknown node type {:?}",
                    String::from_utf8_lossy(other)
                )));
            }
        };
        Ok(Entry { path, kind })
    }

    fn finish_file(&mut self) -> Result<()> {
        if self.remaining > 0 {
            let skipped = io::copy(&mut (&mut self.inner).take(self.remaining), &mut io::sink())?;
            if skipped != self.remaining {
                return Err(truncated());
            }
            self.remaining = 0;
        }
        self.in_file = false;
        self.read_padding(self.file_size)?;
        self.expect(")")?;
        self.close_node()
    }

    /// After a node's closing paren: close the enclosing entry, or finish
    /// the archive if this was the root
    fn close_node(&mut self) -> Result<()> {
        if self.stack.is_empty() {
            self.done = true;
            Ok(())
        } else {
            self.expect(")")
        }
    }

    fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.inner.read_exact(&mut buf).map_err(eof_as_truncated)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn read_padding(&mut self, len: u64) -> Result<()> {
        let mut buf = [0u8; 8];
        let pad = &mut buf[..padding(len)];
        self.inner.read_exact(pad).map_err(eof_as_truncated)?;
        if pad.iter().any(|&b| b != 0) {
            return Err(Error::Nar("non-zero padding".to_string()));
        }
        Ok(())
    }

    fn read_bytes(&mut self, max: u64) -> Result<Vec<u8>> {
        let len = self.read_u64()?;
        if len > max {
            return Err(Error::Nar(format!("string of {} bytes exceeds limit of {}", len, max)));
        }
        let mut buf = vec![0u8; len as usize];
        self.inner.read_exact(&mut buf).map_err(eof_as_truncated)?;
        self.read_padding(len)?;
        Ok(buf)
    }

    fn read_string(&mut self) -> Result<String> {
        String::from_utf8(self.read_bytes(MAX_STRING_LEN)?)
            .map_err(|_| Error::Nar("string is not valid UTF-8".to_string()))
    }

    fn expect(&mut self, token: &str) -> Result<()> {
        let got = self.read_bytes(MAX_STRING_LEN)?;
        if got != token.as_bytes() {
            return Err(Error::Nar(format!(
                "expected {:?}, got {:?}",
                token,
                String::from_utf8_lossy(&got)
            )));
        }
        Ok(())
    }
}

impl<R: Read> Read for NarReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.in_file || self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let n = self.inner.read(&mut buf[..max])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "archive ends inside file contents",
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

fn truncated() -> Error {
    Error::Nar("archive is truncated".to_string())
}

fn eof_as_truncated(err: io::Error) -> Error {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        truncated()
    } else {
        Error::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Encode tokens the way the archive format frames strings
    fn encode(tokens: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for token in tokens {
            out.extend_from_slice(&(token.len() as u64).to_le_bytes());
            out.extend_from_slice(token);
            out.resize(out.len() + padding(token.len() as u64), 0);
        }
        out
    }

    #[rustfmt::skip]
    fn sample() -> Vec<u8> {
        encode(&[
            b"nix-archive-1", b"(", b"type", b"directory",
            b"entry", b"(", b"name", b"bin", b"node",
                b"(", b"type", b"directory",
                b"entry", b"(", b"name", b"hello", b"node",
                    b"(", b"type", b"regular", b"executable", b"", b"contents", b"#!/bin/sh\n", b")",
                b")",
                b")",
            b")",
            b"entry", b"(", b"name", b"lib", b"node",
                b"(", b"type", b"symlink", b"target", b"bin", b")",
            b")",
            b"entry", b"(", b"name", b"share", b"node",
                b"(", b"type", b"regular", b"contents", b"data", b")",
            b")",
            b")",
        ])
    }

    #[test]
    fn test_read_entries_in_order() {
        let mut nar = NarReader::new(Cursor::new(sample()));

        let root = nar.next_entry().unwrap().unwrap();
        assert_eq!(root, Entry { path: String::new(), kind: EntryKind::Directory });

        assert_eq!(nar.next_entry().unwrap().unwrap().path, "bin");

        let hello = nar.next_entry().unwrap().unwrap();
        assert_eq!(hello.path, "bin/hello");
        assert_eq!(hello.kind, EntryKind::Regular { size: 10, executable: true });
        let mut contents = String::new();
        nar.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "#!/bin/sh\n");

        let lib = nar.next_entry().unwrap().unwrap();
        assert_eq!(lib.kind, EntryKind::Symlink { target: "bin".to_string() });

        // Contents of "share" are skipped, not read
        let share = nar.next_entry().unwrap().unwrap();
        assert_eq!(share.kind, EntryKind::Regular { size: 4, executable: false });

        assert!(nar.next_entry().unwrap().is_none());
        assert!(nar.next_entry().unwrap().is_none());
    }

    #[test]
    fn test_single_file_archive() {
        let data = encode(&[b"nix-archive-1", b"(", b"type", b"regular", b"contents", b"x", b")"]);
        let mut nar = NarReader::new(Cursor::new(data));
        let entry = nar.next_entry().unwrap().unwrap();
        assert_eq!(entry.path, "");
        assert!(nar.next_entry().unwrap().is_none());
    }

    #[test]
    fn test_truncated_archive() {
        let data = sample();
        for cut in [0, 8, 20, data.len() / 2, data.len() - 8] {
            let mut nar = NarReader::new(Cursor::new(&data[..cut]));
            let result = (|| -> Result<()> {
                while nar.next_entry()?.is_some() {}
                Ok(())
            })();
            assert!(matches!(result, Err(Error::Nar(_))), "cut at {}", cut);
        }
    }

    #[test]
    fn test_truncated_contents_fail_reads() {
        let mut data = encode(&[b"nix-archive-1", b"(", b"type", b"regular", b"contents"]);
        data.extend_from_slice(&100u64.to_le_bytes());
        data.extend_from_slice(b"short");

        let mut nar = NarReader::new(Cursor::new(data));
        nar.next_entry().unwrap();
        let mut contents = Vec::new();
        let err = nar.read_to_end(&mut contents).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_rejects_bad_magic() {
        let data = encode(&[b"nix-archive-2", b"(", b"type", b"directory", b")"]);
        let mut nar = NarReader::new(Cursor::new(data));
        assert!(matches!(nar.next_entry(), Err(Error::Nar(_))));
    }

    #[test]
    fn test_rejects_unsafe_names() {
        for name in [&b".."[..], b".", b"a/b", b""] {
            let data = encode(&[
                b"nix-archive-1", b"(", b"type", b"directory",
                b"entry", b"(", b"name", name, b"node",
                b"(", b"type", b"regular", b"contents", b"", b")",
                b")", b")",
            ]);
            let mut nar = NarReader::new(Cursor::new(data));
            nar.next_entry().unwrap();
            assert!(matches!(nar.next_entry(), Err(Error::Nar(_))), "{:?}", name);
        }
    }

    #[test]
    fn test_rejects_unsorted_entries() {
        let data = encode(&[
            b"nix-archive-1", b"(", b"type", b"directory",
            b"entry", b"(", b"name", b"b", b"node", b"(", b"type", b"directory", b")", b")",
            b"entry", b"(", b"name", b"a", b"node", b"(", b"type", b"directory", b")", b")",
            b")",
        ]);
        let mut nar = NarReader::new(Cursor::new(data));
        nar.next_entry().unwrap();
        nar.next_entry().unwrap();
        assert!(matches!(nar.next_entry(), Err(Error::Nar(_))));
    }

    #[test]
    fn test_rejects_nonzero_padding() {
        let mut data = encode(&[b"nix-archive-1"]);
        data[8 + 13] = 1;
        let mut nar = NarReader::new(Cursor::new(data));
        assert!(matches!(nar.next_entry(), Err(Error::Nar(_))));
    }

    #[test]
    fn test_rejects_oversized_strings() {
        let mut data = encode(&[b"nix-archive-1", b"(", b"type"]);
        data.extend_from_slice(&(MAX_STRING_LEN + 1).to_le_bytes());
        let mut nar = NarReader::new(Cursor::new(data));
        assert!(matches!(nar.next_entry(), Err(Error::Nar(_))));
    }
}
