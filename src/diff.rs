//! The incremental hash pass: diffing a partition against its manifest.

use crate::checksum::{self, ChecksumError};
use crate::manifest::{Manifest, ManifestChange};
use crate::partition::Partition;
use crate::pool::CancelToken;
use crate::walk::{IgnoreList, WalkError, walk_partition};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("Walk error: {0}")]
    Walk(#[from] WalkError),
    #[error("Checksum error: {0}")]
    Checksum(#[from] ChecksumError),
    #[error("Failed to stat {path}: {source}")]
    Stat {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Reads a file's modification time as whole seconds since the Unix epoch.
/// Sub-second precision is deliberately dropped; the manifest stores whole
/// seconds and comparisons must match what was stored.
pub(crate) fn mtime_seconds(metadata: &std::fs::Metadata) -> std::io::Result<i64> {
    let modified = metadata.modified()?;

    Ok(match modified.duration_since(std::time::UNIX_EPOCH) {
        Ok(since) => since.as_secs() as i64,
        // Pre-epoch mtimes are negative and rejected at load time, but we
        // still report them faithfully here.
        Err(e) => -(e.duration().as_secs() as i64),
    })
}

impl Partition {
    /// Walks the partition and computes the change set against the loaded
    /// manifest, without mutating it.
    ///
    /// For each file the mtime is compared first: an unchanged mtime is
    /// taken to mean unchanged contents and the file is not re-hashed
    /// (hashing is the expensive operation; the mtime read is near-free).
    /// When the mtime moved but the hash did not, a
    /// [`ManifestChange::SpuriousMtimeChange`] records the new mtime so the
    /// next pass skips the file again. Files in the manifest but not seen on
    /// disk are emitted as [`ManifestChange::FileRemoved`] after the walk.
    ///
    /// Mutation is deferred to [`Partition::apply_changes`] so a pass never
    /// writes the map it is concurrently reading. The first error aborts the
    /// remaining walk; the caller must discard the partial change set.
    pub fn hash(
        &self,
        ignore: &IgnoreList,
        cancel: &CancelToken,
    ) -> Result<Vec<ManifestChange>, HashError> {
        let empty = Manifest::default();
        let manifest = self.manifest().unwrap_or(&empty);

        let mut changes = Vec::new();
        let mut seen = BTreeSet::new();

        walk_partition::<HashError, _>(
            self.root(),
            ignore,
            cancel,
            &mut |absolute_path, manifest_path| {
                seen.insert(manifest_path.to_string());

                let metadata = std::fs::metadata(absolute_path).map_err(|source| {
                    HashError::Stat {
                        path: absolute_path.to_path_buf(),
                        source,
                    }
                })?;
                let mtime = mtime_seconds(&metadata).map_err(|source| HashError::Stat {
                    path: absolute_path.to_path_buf(),
                    source,
                })?;

                let Some(entry) = manifest.files.get(manifest_path) else {
                    let hash = checksum::hash_file(absolute_path)?;

                    changes.push(ManifestChange::FileAdded {
                        path: manifest_path.to_string(),
                        hash,
                        mtime,
                    });

                    return Ok(());
                };

                if entry.mtime == mtime {
                    // Assume unchanged; skip hashing.
                    return Ok(());
                }

                let hash = checksum::hash_file(absolute_path)?;

                if hash == entry.hash {
                    debug!("Spurious mtime change for {manifest_path}");

                    changes.push(ManifestChange::SpuriousMtimeChange {
                        path: manifest_path.to_string(),
                        mtime,
                    });

                    return Ok(());
                }

                changes.push(ManifestChange::FileModified {
                    path: manifest_path.to_string(),
                    hash,
                    mtime,
                });

                Ok(())
            },
        )?;

        // Manifest paths not seen on disk were removed.
        for path in manifest.files.keys() {
            if !seen.contains(path) {
                changes.push(ManifestChange::FileRemoved { path: path.clone() });
            }
        }

        Ok(changes)
    }
}
