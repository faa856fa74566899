//! Depth-first file traversal for partition directories.
//!
//! The walker yields every regular file under a partition root together with
//! its manifest path (partition-relative, forward-slash separated). The
//! partition's own manifest file, its temporary sibling, and a configurable
//! set of incidental OS artifact file names are excluded. Traversal is
//! read-only and aborts on the first error.

use crate::manifest_file::{MANIFEST_FILE_NAME, MANIFEST_TMP_FILE_NAME};
use crate::pool::CancelToken;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum WalkError {
    #[error("IO error: {0}")]
    Io(std::io::Error),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("File name is not valid UTF-8: {0}")]
    NonUtf8Name(PathBuf),
    #[error("Walk cancelled")]
    Cancelled,
}

/// File names skipped during traversal, matched against the base name of
/// every file anywhere under the partition root.
///
/// The default set covers files desktop OSes sprinkle into directories
/// behind the user's back. It is an explicit set rather than a built-in so
/// callers can extend it (the CLI exposes `--ignore`).
#[derive(Debug, Clone)]
pub struct IgnoreList {
    names: BTreeSet<String>,
}

/// macOS junk files, from the github/gitignore Global/macOS list.
///
/// `._*` and `Icon` are deliberately left out as they are too generic and
/// could match real user files.
const OS_ARTIFACT_NAMES: &[&str] = &[
    ".DS_Store",
    "._.DS_Store",
    "__MACOSX",
    ".AppleDouble",
    ".LSOverride",
    ".DocumentRevisions-V100",
    ".fseventsd",
    ".Spotlight-V100",
    ".TemporaryItems",
    ".Trashes",
    ".VolumeIcon.icns",
    ".com.apple.timemachine.donotpresent",
    ".AppleDB",
    ".AppleDesktop",
    "Network Trash Folder",
    "Temporary Items",
    ".apdisk",
];

impl Default for IgnoreList {
    fn default() -> Self {
        IgnoreList {
            names: OS_ARTIFACT_NAMES.iter().map(|n| n.to_string()).collect(),
        }
    }
}

impl IgnoreList {
    /// An ignore list with no entries at all (not even the OS artifact set).
    pub fn empty() -> Self {
        IgnoreList {
            names: BTreeSet::new(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>) {
        self.names.insert(name.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}

/// Walks all regular files under `root` depth-first, in lexical order.
///
/// `callback` receives the absolute path and the manifest path of each file.
/// The first error (from the traversal itself or from the callback) aborts
/// the walk. The cancellation token is checked before each directory entry
/// is consumed; a cancelled walk fails with `WalkError::Cancelled`.
pub fn walk_partition<E, F>(
    root: &Path,
    ignore: &IgnoreList,
    cancel: &CancelToken,
    callback: &mut F,
) -> Result<(), E>
where
    E: From<WalkError>,
    F: FnMut(&Path, &str) -> Result<(), E>,
{
    walk_dir(root, "", ignore, cancel, callback)
}

fn walk_dir<E, F>(
    dir: &Path,
    rel_prefix: &str,
    ignore: &IgnoreList,
    cancel: &CancelToken,
    callback: &mut F,
) -> Result<(), E>
where
    E: From<WalkError>,
    F: FnMut(&Path, &str) -> Result<(), E>,
{
    let read_dir = std::fs::read_dir(dir).map_err(|e| map_io_error(e, dir))?;

    let mut entries = Vec::new();

    for entry in read_dir {
        let entry = entry.map_err(|e| E::from(WalkError::Io(e)))?;
        entries.push(entry);
    }

    entries.sort_by_key(std::fs::DirEntry::file_name);

    for entry in entries {
        if cancel.is_cancelled() {
            return Err(E::from(WalkError::Cancelled));
        }

        let path = entry.path();

        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(_) => return Err(E::from(WalkError::NonUtf8Name(path))),
        };

        let file_type = entry.file_type().map_err(|e| map_io_error(e, &path))?;

        if file_type.is_dir() {
            let child_prefix = format!("{rel_prefix}{name}/");
            walk_dir(&path, &child_prefix, ignore, cancel, callback)?;
            continue;
        }

        // Symlinks and other non-regular files are not tracked.
        if !file_type.is_file() {
            continue;
        }

        if name == MANIFEST_FILE_NAME || name == MANIFEST_TMP_FILE_NAME || ignore.contains(&name) {
            continue;
        }

        let manifest_path = format!("{rel_prefix}{name}");
        callback(&path, &manifest_path)?;
    }

    Ok(())
}

fn map_io_error<E: From<WalkError>>(e: std::io::Error, path: &Path) -> E {
    if e.kind() == std::io::ErrorKind::PermissionDenied {
        E::from(WalkError::PermissionDenied(path.to_path_buf()))
    } else {
        E::from(WalkError::Io(e))
    }
}
