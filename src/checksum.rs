use sha1::{Digest, Sha1};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ChecksumError {
    #[error("IO error: {0}")]
    Io(std::io::Error),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
}

/// Computes the SHA-1 digest of everything `reader` yields, as lowercase hex.
pub fn hash_reader<R: Read>(mut reader: R) -> Result<String, std::io::Error> {
    let mut hasher = Sha1::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Computes the SHA-1 digest of a string, as lowercase hex.
///
/// This is what the manifest envelope uses to checksum its serialized
/// payload, so the encoding must stay stable.
pub fn hash_str(s: &str) -> String {
    let digest = Sha1::digest(s.as_bytes());
    format!("{:x}", digest)
}

/// Computes the SHA-1 digest of a file's contents, as lowercase hex.
///
/// Hashing is the expensive operation of this tool; callers are expected to
/// avoid it whenever file metadata says the contents cannot have changed.
pub fn hash_file(path: &Path) -> Result<String, ChecksumError> {
    debug!("Hashing {}", path.display());

    let file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            ChecksumError::PermissionDenied(path.to_path_buf())
        } else {
            ChecksumError::Io(e)
        }
    })?;

    let hash = hash_reader(file).map_err(ChecksumError::Io)?;

    debug!("Hash of {} is {}", path.display(), hash);

    Ok(hash)
}
