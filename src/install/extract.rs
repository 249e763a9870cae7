// src/install/extract.rs

//! Unpack a NAR stream onto the local filesystem

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::nar::{EntryKind, NarReader};
use filetime::FileTime;
use std::fs::{self, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::{PermissionsExt, lchown, symlink};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Mode of extracted directories. They stay writable by the owner so the
/// staged tree can be renamed into place and later garbage collected.
pub const DIR_MODE: u32 = 0o755;
pub const FILE_MODE: u32 = 0o444;
pub const EXECUTABLE_MODE: u32 = 0o555;

/// Ownership and timestamps applied to every extracted entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractPolicy {
    /// `(uid, gid)` to assign, or `None` to keep what the process creates
    pub owner: Option<(u32, u32)>,
    /// Modification and access time, in Unix seconds
    pub mtime: i64,
}

impl ExtractPolicy {
    /// Owner is the current user and the configured build group, if any
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            owner: config
                .build_group
                .map(|gid| (nix::unistd::getuid().as_raw(), gid)),
            mtime: config.mtime_epoch,
        }
    }

    fn apply_owner(&self, path: &Path) -> Result<()> {
        if let Some((uid, gid)) = self.owner {
            lchown(path, Some(uid), Some(gid)).map_err(|e| fs_error("chown", path, e))?;
        }
        Ok(())
    }

    fn apply_mtime(&self, path: &Path) -> Result<()> {
        let time = FileTime::from_unix_time(self.mtime, 0);
        filetime::set_symlink_file_times(path, time, time).map_err(|e| fs_error("utimes", path, e))
    }
}

/// Extract the archive in `reader` so that its root becomes `root`.
///
/// `root` must not exist; its parent must. Files become read-only
/// (executable if the archive says so). Directories get their timestamps
/// last, after all of their children have been written.
pub fn extract<R: Read>(reader: R, root: &Path, policy: &ExtractPolicy) -> Result<()> {
    let mut nar = NarReader::new(reader);
    let mut directories: Vec<PathBuf> = Vec::new();
    let mut files = 0usize;

    while let Some(entry) = nar.next_entry()? {
        let path = if entry.path.is_empty() {
            root.to_path_buf()
        } else {
            root.join(&entry.path)
        };

        match entry.kind {
            EntryKind::Directory => {
                fs::create_dir(&path).map_err(|e| fs_error("mkdir", &path, e))?;
                fs::set_permissions(&path, fs::Permissions::from_mode(DIR_MODE))
                    .map_err(|e| fs_error("chmod", &path, e))?;
                policy.apply_owner(&path)?;
                directories.push(path);
            }
            EntryKind::Regular { size, executable } => {
                let mut file = OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&path)
                    .map_err(|e| fs_error("create", &path, e))?;
                let written = io::copy(&mut nar, &mut file).map_err(|e| match e.kind() {
                    io::ErrorKind::UnexpectedEof => Error::Nar(format!("archive is truncated in {}", entry.path)),
                    _ => fs_error("write", &path, e),
                })?;
                if written != size {
                    return Err(Error::Nar(format!(
                        "{} is {} bytes but the archive declared {}",
                        entry.path, written, size
                    )));
                }
                file.sync_all().map_err(|e| fs_error("fsync", &path, e))?;
                drop(file);

                let mode = if executable { EXECUTABLE_MODE } else { FILE_MODE };
                fs::set_permissions(&path, fs::Permissions::from_mode(mode))
                    .map_err(|e| fs_error("chmod", &path, e))?;
                policy.apply_owner(&path)?;
                policy.apply_mtime(&path)?;
                files += 1;
            }
            EntryKind::Symlink { target } => {
                symlink(&target, &path).map_err(|e| fs_error("symlink", &path, e))?;
                policy.apply_owner(&path)?;
                policy.apply_mtime(&path)?;
            }
        }
    }

    for dir in directories.iter().rev() {
        policy.apply_mtime(dir)?;
    }
    debug!(
        "Extracted {} files and {} directories into {}",
        files,
        directories.len(),
        root.display()
    );
    Ok(())
}

fn fs_error(op: &'static str, path: &Path, source: io::Error) -> Error {
    Error::Backend {
        op,
        path: path.display().to_string(),
        source,
    }
}
