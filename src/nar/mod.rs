// src/nar/mod.rs

//! Nix archive (NAR) format
//!
//! A NAR is a deterministic serialization of a file tree. Everything in it
//! is a *string*: a little-endian `u64` length, the bytes, then zero padding
//! up to a multiple of 8. A node is a parenthesized list of tokens:
//!
//! ```text
//! archive   = "nix-archive-1" node
//! node      = "(" "type" ( regular | symlink | directory ) ")"
//! regular   = "regular" [ "executable" "" ] "contents" <string>
//! symlink   = "symlink" "target" <string>
//! directory = "directory" { "entry" "(" "name" <string> "node" node ")" }
//! ```
//!
//! Directory entries appear in strictly increasing byte order of their
//! names, which makes the encoding of a tree unique.

mod reader;
mod writer;

pub use reader::{Entry, EntryKind, NarReader};
pub use writer::{NarWriter, dump};

/// First string of every archive
pub const MAGIC: &str = "nix-archive-1";

/// Upper bound for any string other than file contents
pub const MAX_STRING_LEN: u64 = 4096;

/// Bytes of zero padding following a string of `len` bytes
pub(crate) fn padding(len: u64) -> usize {
    ((8 - len % 8) % 8) as usize
}

/// Check a directory entry name the way Nix does
pub(crate) fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("empty entry name".to_string());
    }
    if name == "." || name == ".." {
        return Err(format!("invalid entry name {:?}", name));
    }
    if name.contains('/') || name.contains('\0') {
        return Err(format!("entry name {:?} contains a separator or NUL", name));
    }
    Ok(())
}
