//! In-memory manifest model and the change applicator.
//!
//! A manifest maps partition-relative paths (forward-slash separated) to the
//! hash and mtime recorded at the last successful hash pass. Changes computed
//! by a diff pass are applied strictly after the pass completes, never
//! interleaved with the walk that produced them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// `{}`, `null` and an absent key all deserialize to an empty map,
    /// meaning "no files were recorded at the last hash".
    #[serde(default, deserialize_with = "nullable_files")]
    pub files: BTreeMap<String, FileEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Lowercase hex SHA-1 of the file contents.
    pub hash: String,
    /// Modification time in whole seconds since the Unix epoch.
    pub mtime: i64,
}

fn nullable_files<'de, D>(deserializer: D) -> Result<BTreeMap<String, FileEntry>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let files: Option<BTreeMap<String, FileEntry>> = Option::deserialize(deserializer)?;
    Ok(files.unwrap_or_default())
}

/// A single difference between a partition's files and its manifest, as
/// computed by a hash pass. Applying the change brings the manifest in sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestChange {
    FileAdded {
        path: String,
        hash: String,
        mtime: i64,
    },
    FileModified {
        path: String,
        hash: String,
        mtime: i64,
    },
    FileRemoved {
        path: String,
    },
    /// The mtime moved but the contents did not. Recorded so the next hash
    /// pass does not re-hash the file.
    SpuriousMtimeChange {
        path: String,
        mtime: i64,
    },
}

impl ManifestChange {
    pub fn path(&self) -> &str {
        match self {
            ManifestChange::FileAdded { path, .. }
            | ManifestChange::FileModified { path, .. }
            | ManifestChange::FileRemoved { path }
            | ManifestChange::SpuriousMtimeChange { path, .. } => path,
        }
    }
}

/// A single discrepancy between a partition's files and its manifest, as
/// reported by a check pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestMismatch {
    /// Present on disk, absent from the manifest.
    FileNotHashed { path: String },
    /// Present in the manifest, absent on disk.
    FileMissing { path: String },
    /// Present in both, contents differ.
    HashDoesNotMatch {
        path: String,
        actual_hash: String,
        expected_hash: String,
    },
}

impl Manifest {
    /// Applies `changes` in order, mutating the file map.
    ///
    /// Changes are expected to have been computed against this exact
    /// manifest, which implies the invariants:
    ///
    /// - `FileAdded` never targets a path already in the manifest
    /// - `FileModified`, `FileRemoved` and `SpuriousMtimeChange` never
    ///   target a path absent from the manifest
    ///
    /// A violated invariant is a logic bug upstream (for example a change
    /// set computed against a different manifest snapshot), not a user-facing
    /// error. **Panics** naming the violating change's index; this panic is
    /// never caught.
    pub fn apply_changes(&mut self, changes: &[ManifestChange]) {
        for (index, change) in changes.iter().enumerate() {
            if let Err(violation) = self.apply(change) {
                panic!("invariant violated while applying change index={index}: {violation}");
            }
        }
    }

    fn apply(&mut self, change: &ManifestChange) -> Result<(), String> {
        match change {
            ManifestChange::FileAdded { path, hash, mtime } => {
                if self.files.contains_key(path) {
                    return Err(format!(
                        "cannot apply FileAdded: file {path} already exists in manifest"
                    ));
                }

                self.files.insert(
                    path.clone(),
                    FileEntry {
                        hash: hash.clone(),
                        mtime: *mtime,
                    },
                );
            }
            ManifestChange::FileModified { path, hash, mtime } => {
                let Some(entry) = self.files.get_mut(path) else {
                    return Err(format!(
                        "cannot apply FileModified: file {path} does not exist in manifest"
                    ));
                };

                entry.hash = hash.clone();
                entry.mtime = *mtime;
            }
            ManifestChange::FileRemoved { path } => {
                if self.files.remove(path).is_none() {
                    return Err(format!(
                        "cannot apply FileRemoved: file {path} does not exist in manifest"
                    ));
                }
            }
            ManifestChange::SpuriousMtimeChange { path, mtime } => {
                let Some(entry) = self.files.get_mut(path) else {
                    return Err(format!(
                        "cannot apply SpuriousMtimeChange: file {path} does not exist in manifest"
                    ));
                };

                entry.mtime = *mtime;
            }
        }

        Ok(())
    }
}
