//! The check pass: verifying a partition against its manifest.

use crate::checksum::{self, ChecksumError};
use crate::manifest::ManifestMismatch;
use crate::partition::Partition;
use crate::pool::CancelToken;
use crate::walk::{IgnoreList, WalkError, walk_partition};
use std::collections::BTreeSet;

#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("Partition has not been hashed yet (no manifest file)")]
    NotHashed,
    #[error("Walk error: {0}")]
    Walk(#[from] WalkError),
    #[error("Checksum error: {0}")]
    Checksum(#[from] ChecksumError),
}

impl Partition {
    /// Walks the partition and reports every discrepancy with the manifest.
    ///
    /// Unlike [`Partition::hash`] there is no mtime shortcut: every file is
    /// re-hashed. Check exists to catch exactly the cases the shortcut
    /// cannot see, such as contents changing under an unchanged or forged
    /// mtime. Per-file mismatches come first in walk order, followed by one
    /// [`ManifestMismatch::FileMissing`] per manifest path absent on disk.
    ///
    /// Fails with [`CheckError::NotHashed`] if the partition has no
    /// manifest.
    pub fn check(
        &self,
        ignore: &IgnoreList,
        cancel: &CancelToken,
    ) -> Result<Vec<ManifestMismatch>, CheckError> {
        let Some(manifest) = self.manifest() else {
            return Err(CheckError::NotHashed);
        };

        let mut mismatches = Vec::new();
        let mut seen = BTreeSet::new();

        walk_partition::<CheckError, _>(
            self.root(),
            ignore,
            cancel,
            &mut |absolute_path, manifest_path| {
                seen.insert(manifest_path.to_string());

                let Some(entry) = manifest.files.get(manifest_path) else {
                    mismatches.push(ManifestMismatch::FileNotHashed {
                        path: manifest_path.to_string(),
                    });

                    return Ok(());
                };

                let actual_hash = checksum::hash_file(absolute_path)?;

                if actual_hash != entry.hash {
                    mismatches.push(ManifestMismatch::HashDoesNotMatch {
                        path: manifest_path.to_string(),
                        actual_hash,
                        expected_hash: entry.hash.clone(),
                    });
                }

                Ok(())
            },
        )?;

        for path in manifest.files.keys() {
            if !seen.contains(path) {
                mismatches.push(ManifestMismatch::FileMissing { path: path.clone() });
            }
        }

        Ok(mismatches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{FileTime, set_file_mtime};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn setup_hashed_partition(root: &Path) -> Partition {
        fs::write(root.join("a"), "A").unwrap();
        fs::write(root.join("b"), "B").unwrap();
        fs::create_dir(root.join("c")).unwrap();
        fs::write(root.join("c/d"), "D").unwrap();

        let mut partition = Partition::load(root).unwrap();
        let changes = partition
            .hash(&IgnoreList::default(), &CancelToken::new())
            .unwrap();
        partition.apply_changes(&changes);
        partition.save().unwrap();

        partition
    }

    fn check_mismatches(partition: &Partition) -> Vec<ManifestMismatch> {
        partition
            .check(&IgnoreList::default(), &CancelToken::new())
            .unwrap()
    }

    #[test]
    fn test_check_without_manifest_fails() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a"), "A").unwrap();

        let partition = Partition::load(temp.path()).unwrap();
        let result = partition.check(&IgnoreList::default(), &CancelToken::new());

        assert!(matches!(result, Err(CheckError::NotHashed)));
    }

    #[test]
    fn test_clean_partition_has_no_mismatches() {
        let temp = TempDir::new().unwrap();
        let partition = setup_hashed_partition(temp.path());

        assert_eq!(check_mismatches(&partition), vec![]);
    }

    #[test]
    fn test_detects_unhashed_file() {
        let temp = TempDir::new().unwrap();
        let partition = setup_hashed_partition(temp.path());

        fs::write(temp.path().join("e"), "E").unwrap();

        assert_eq!(
            check_mismatches(&partition),
            vec![ManifestMismatch::FileNotHashed {
                path: "e".to_string()
            }]
        );
    }

    #[test]
    fn test_detects_missing_files() {
        let temp = TempDir::new().unwrap();
        let partition = setup_hashed_partition(temp.path());

        fs::remove_file(temp.path().join("b")).unwrap();
        fs::remove_dir_all(temp.path().join("c")).unwrap();

        let mismatches = check_mismatches(&partition);

        // FileMissing entries come from map iteration; treat them as a set.
        let missing: BTreeSet<&str> = mismatches
            .iter()
            .map(|m| match m {
                ManifestMismatch::FileMissing { path } => path.as_str(),
                other => panic!("Expected only FileMissing, got {other:?}"),
            })
            .collect();

        assert_eq!(missing, BTreeSet::from(["b", "c/d"]));
    }

    #[test]
    fn test_detects_hash_mismatch_even_with_unchanged_mtime() {
        let temp = TempDir::new().unwrap();
        let partition = setup_hashed_partition(temp.path());

        let path = temp.path().join("a");
        let recorded_mtime = partition.manifest().unwrap().files["a"].mtime;

        fs::write(&path, "Z").unwrap();
        set_file_mtime(&path, FileTime::from_unix_time(recorded_mtime, 0)).unwrap();

        let mismatches = check_mismatches(&partition);

        assert_eq!(mismatches.len(), 1);
        match &mismatches[0] {
            ManifestMismatch::HashDoesNotMatch {
                path,
                actual_hash,
                expected_hash,
            } => {
                assert_eq!(path, "a");
                assert_eq!(actual_hash, &checksum::hash_str("Z"));
                assert_eq!(expected_hash, &checksum::hash_str("A"));
            }
            other => panic!("Expected HashDoesNotMatch, got {other:?}"),
        }
    }

    #[test]
    fn test_mtime_only_change_is_not_a_mismatch() {
        let temp = TempDir::new().unwrap();
        let partition = setup_hashed_partition(temp.path());

        let metadata = fs::metadata(temp.path().join("a")).unwrap();
        let mtime = FileTime::from_last_modification_time(&metadata);
        let shifted = FileTime::from_unix_time(mtime.unix_seconds() + 100, 0);
        set_file_mtime(temp.path().join("a"), shifted).unwrap();

        assert_eq!(check_mismatches(&partition), vec![]);
    }

    #[test]
    fn test_drift_scenario_reports_all_mismatch_kinds() {
        let temp = TempDir::new().unwrap();
        let partition = setup_hashed_partition(temp.path());

        fs::write(temp.path().join("e"), "E").unwrap();
        fs::remove_file(temp.path().join("b")).unwrap();
        fs::remove_dir_all(temp.path().join("c")).unwrap();
        fs::write(temp.path().join("a"), "A2").unwrap();

        let mismatches = check_mismatches(&partition);

        // Walk-order mismatches first.
        assert!(matches!(
            &mismatches[0],
            ManifestMismatch::HashDoesNotMatch { path, .. } if path == "a"
        ));
        assert!(matches!(
            &mismatches[1],
            ManifestMismatch::FileNotHashed { path } if path == "e"
        ));

        let missing: BTreeSet<&str> = mismatches[2..]
            .iter()
            .map(|m| match m {
                ManifestMismatch::FileMissing { path } => path.as_str(),
                other => panic!("Expected FileMissing, got {other:?}"),
            })
            .collect();

        assert_eq!(missing, BTreeSet::from(["b", "c/d"]));
    }

    #[test]
    fn test_cancelled_check_fails() {
        let temp = TempDir::new().unwrap();
        let partition = setup_hashed_partition(temp.path());

        let cancel = CancelToken::new();
        cancel.cancel();

        let result = partition.check(&IgnoreList::default(), &cancel);

        assert!(matches!(
            result,
            Err(CheckError::Walk(WalkError::Cancelled))
        ));
    }
}
