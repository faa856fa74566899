//! Durable, self-verifying manifest persistence.
//!
//! The on-disk manifest is a two-level JSON document: an outer envelope
//! `{"dataHash": "<hex>", "dataJson": "<escaped JSON>"}` whose `dataHash` is
//! the SHA-1 of `dataJson`, and the inner manifest parsed out of `dataJson`.
//! The envelope lets a load distinguish "the file is corrupt" from "the
//! manifest legitimately changed", and the key names are stable for
//! interoperability.
//!
//! Saves go through an atomic replace: write a temp file in the same
//! directory, sync it, rename it over the target, then sync the directory.

use crate::checksum;
use crate::manifest::Manifest;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE_NAME: &str = ".manifest.json";
pub const MANIFEST_TMP_FILE_NAME: &str = ".manifest.json.tmp";

#[derive(Debug, thiserror::Error)]
pub enum ManifestFileError {
    #[error("IO error: {0}")]
    Io(std::io::Error),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("While parsing manifest envelope: {0}")]
    EnvelopeParse(#[source] serde_json::Error),
    #[error("Manifest envelope field .{field} must not be empty")]
    EmptyEnvelopeField { field: &'static str },
    #[error("Manifest hash mismatch. Actual: ({actual}). Expected: ({expected})")]
    HashMismatch { actual: String, expected: String },
    #[error("While parsing .dataJson: {0}")]
    DataJsonParse(#[source] serde_json::Error),
    #[error("Error in entry {path}: {reason}")]
    InvalidEntry { path: String, reason: &'static str },
    #[error("JSON serialization error: {0}")]
    Serialize(#[source] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    data_hash: String,
    data_json: String,
}

/// Reads and validates the manifest of the partition at `dir`.
///
/// A missing manifest file is not an error; it means the partition has never
/// been hashed and yields `Ok(None)`.
pub fn load_manifest(dir: &Path) -> Result<Option<Manifest>, ManifestFileError> {
    let path = dir.join(MANIFEST_FILE_NAME);

    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(ManifestFileError::PermissionDenied(path));
        }
        Err(e) => return Err(ManifestFileError::Io(e)),
    };

    Ok(Some(deserialize_manifest(&bytes)?))
}

/// Serializes `manifest` and atomically replaces the manifest file of the
/// partition at `dir`.
pub fn save_manifest(dir: &Path, manifest: &Manifest) -> Result<(), ManifestFileError> {
    let bytes = serialize_manifest(manifest)?;

    let target = dir.join(MANIFEST_FILE_NAME);
    let tmp = dir.join(MANIFEST_TMP_FILE_NAME);

    overwrite(&target, &tmp, &bytes).map_err(|e| {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            ManifestFileError::PermissionDenied(target.clone())
        } else {
            ManifestFileError::Io(e)
        }
    })
}

pub(crate) fn deserialize_manifest(bytes: &[u8]) -> Result<Manifest, ManifestFileError> {
    let envelope: Envelope =
        serde_json::from_slice(bytes).map_err(ManifestFileError::EnvelopeParse)?;

    if envelope.data_hash.is_empty() {
        return Err(ManifestFileError::EmptyEnvelopeField { field: "dataHash" });
    }

    if envelope.data_json.is_empty() {
        return Err(ManifestFileError::EmptyEnvelopeField { field: "dataJson" });
    }

    let actual = checksum::hash_str(&envelope.data_json);

    if actual != envelope.data_hash {
        return Err(ManifestFileError::HashMismatch {
            actual,
            expected: envelope.data_hash,
        });
    }

    let manifest: Manifest =
        serde_json::from_str(&envelope.data_json).map_err(ManifestFileError::DataJsonParse)?;

    validate_manifest(&manifest)?;

    Ok(manifest)
}

pub(crate) fn serialize_manifest(manifest: &Manifest) -> Result<Vec<u8>, ManifestFileError> {
    let data_json = serde_json::to_string(manifest).map_err(ManifestFileError::Serialize)?;

    let envelope = Envelope {
        data_hash: checksum::hash_str(&data_json),
        data_json,
    };

    serde_json::to_vec(&envelope).map_err(ManifestFileError::Serialize)
}

fn validate_manifest(manifest: &Manifest) -> Result<(), ManifestFileError> {
    for (path, entry) in &manifest.files {
        if path.is_empty() {
            return Err(ManifestFileError::InvalidEntry {
                path: path.clone(),
                reason: "path must not be empty",
            });
        }

        if entry.hash.is_empty() {
            return Err(ManifestFileError::InvalidEntry {
                path: path.clone(),
                reason: ".hash must not be empty",
            });
        }

        if entry.mtime < 0 {
            return Err(ManifestFileError::InvalidEntry {
                path: path.clone(),
                reason: ".mtime must be non-negative",
            });
        }
    }

    Ok(())
}

/// Atomically replaces `target` with `data`, via `tmp`.
///
/// `tmp` must live in the same directory as `target` so the rename stays on
/// one filesystem. Guarantees, assuming only the process or OS crashes (not
/// the storage hardware):
///
/// - P1 (atomicity): at any point, `target` holds either its complete prior
///   contents or the complete new contents. The temp file is fully synced
///   before the rename is issued, and rename is atomic with respect to
///   concurrent readers.
/// - P2 (durability): once this returns Ok, the new contents survive a
///   crash. The rename's directory entry change is itself not durable until
///   the directory is synced, hence the final directory sync.
///
/// On a mid-sequence failure the temp file is removed best-effort and
/// `target` is left under P1.
pub(crate) fn overwrite(target: &Path, tmp: &Path, data: &[u8]) -> std::io::Result<()> {
    let result = write_tmp_and_rename(target, tmp, data);

    if result.is_err() {
        let _ = std::fs::remove_file(tmp);
    }

    result
}

fn write_tmp_and_rename(target: &Path, tmp: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut tmp_file = File::create(tmp)?;
    tmp_file.write_all(data)?;
    tmp_file.sync_all()?;
    drop(tmp_file);

    std::fs::rename(tmp, target)?;

    let dir = target.parent().unwrap_or(Path::new("."));
    sync_dir(dir)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    // Directories cannot be opened for syncing on this platform; the rename
    // itself is still atomic.
    Ok(())
}
