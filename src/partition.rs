//! Partition lifecycle: loading, saving, and applying changes.
//!
//! A partition is a directory tree tracked as a unit with one manifest. The
//! manifest, if present on disk, is loaded once at open time and held in
//! memory until explicitly saved. It is mutated only by `apply_changes`,
//! strictly after a full hash pass has completed.

use crate::manifest::{Manifest, ManifestChange};
use crate::manifest_file::{self, ManifestFileError};
use std::path::{Path, PathBuf};

pub struct Partition {
    root: PathBuf,
    /// `None` until the partition is hashed for the first time.
    manifest: Option<Manifest>,
}

impl Partition {
    /// Opens the partition at `dir`, loading its manifest if one exists.
    pub fn load(dir: &Path) -> Result<Self, ManifestFileError> {
        let manifest = manifest_file::load_manifest(dir)?;

        Ok(Partition {
            root: dir.to_path_buf(),
            manifest,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest(&self) -> Option<&Manifest> {
        self.manifest.as_ref()
    }

    /// Applies a change set produced by a completed hash pass.
    ///
    /// Initializes an empty manifest for a never-hashed partition.
    /// **Panics** on change sets inconsistent with the loaded manifest; see
    /// [`Manifest::apply_changes`].
    pub fn apply_changes(&mut self, changes: &[ManifestChange]) {
        self.manifest
            .get_or_insert_with(Manifest::default)
            .apply_changes(changes);
    }

    /// Atomically persists the in-memory manifest.
    pub fn save(&self) -> Result<(), ManifestFileError> {
        let empty = Manifest::default();
        let manifest = self.manifest.as_ref().unwrap_or(&empty);

        manifest_file::save_manifest(&self.root, manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest_file::MANIFEST_FILE_NAME;
    use tempfile::TempDir;

    #[test]
    fn test_load_without_manifest_file() {
        let temp = TempDir::new().unwrap();

        let partition = Partition::load(temp.path()).unwrap();

        assert!(partition.manifest().is_none());
        assert_eq!(partition.root(), temp.path());
    }

    #[test]
    fn test_apply_changes_initializes_manifest() {
        let temp = TempDir::new().unwrap();
        let mut partition = Partition::load(temp.path()).unwrap();

        partition.apply_changes(&[ManifestChange::FileAdded {
            path: "a".to_string(),
            hash: "abc".to_string(),
            mtime: 100,
        }]);

        let manifest = partition.manifest().unwrap();
        assert_eq!(manifest.files.len(), 1);
    }

    #[test]
    fn test_save_then_load_round_trips_manifest() {
        let temp = TempDir::new().unwrap();
        let mut partition = Partition::load(temp.path()).unwrap();

        partition.apply_changes(&[
            ManifestChange::FileAdded {
                path: "a".to_string(),
                hash: "h1".to_string(),
                mtime: 1,
            },
            ManifestChange::FileAdded {
                path: "c/d".to_string(),
                hash: "h2".to_string(),
                mtime: 2,
            },
        ]);
        partition.save().unwrap();

        let reloaded = Partition::load(temp.path()).unwrap();

        assert_eq!(reloaded.manifest(), partition.manifest());
    }

    #[test]
    fn test_save_never_hashed_partition_writes_empty_manifest() {
        let temp = TempDir::new().unwrap();
        let partition = Partition::load(temp.path()).unwrap();

        partition.save().unwrap();

        assert!(temp.path().join(MANIFEST_FILE_NAME).exists());
        let reloaded = Partition::load(temp.path()).unwrap();
        assert_eq!(reloaded.manifest(), Some(&Manifest::default()));
    }

    #[test]
    fn test_load_corrupt_manifest_fails() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(MANIFEST_FILE_NAME), "not json").unwrap();

        let result = Partition::load(temp.path());

        assert!(matches!(result, Err(ManifestFileError::EnvelopeParse(_))));
    }
}
