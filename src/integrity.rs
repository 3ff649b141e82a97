use sha2::{Digest, Sha256};
use std::path::Path;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, BufReader};

const CHUNK: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    Mismatch { expected: String, actual: String },
}

/// Lowercase hex SHA-256 digest of a downloaded asset.
pub async fn sha256_sum(path: &Path) -> Result<String, IntegrityError> {
    let mut reader = BufReader::with_capacity(CHUNK, File::open(path).await?);
    let mut hasher = Sha256::new();
    let mut chunk = vec![0u8; CHUNK];
    while let n @ 1.. = reader.read(&mut chunk).await? {
        hasher.update(&chunk[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Checks `path` against a hex-encoded SHA-256 digest, ignoring case.
pub async fn verify_sha256(path: &Path, expected: &str) -> Result<(), IntegrityError> {
    let actual = sha256_sum(path).await?;
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(IntegrityError::Mismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // sha256("hello")
    const HELLO: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[tokio::test]
    async fn hashes_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"hello").unwrap();
        assert_eq!(sha256_sum(&path).await.unwrap(), HELLO);
        verify_sha256(&path, &HELLO.to_uppercase()).await.unwrap();
    }

    #[tokio::test]
    async fn reports_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.txt");
        std::fs::write(&path, b"other").unwrap();
        let err = verify_sha256(&path, HELLO).await.unwrap_err();
        assert!(matches!(err, IntegrityError::Mismatch { .. }));
    }
}
