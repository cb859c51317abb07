//! Deterministic content hashing over glob-matched files

use crate::globber::Globber;
use crate::roots::PathRoots;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::io::AsyncReadExt;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Fingerprint and size summary of a set of files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentHash {
    /// Hex-encoded SHA-256 over normalized names and contents
    pub hash: String,
    /// Number of regular files hashed
    pub file_count: u64,
    /// Sum of file sizes in bytes
    pub total_bytes: u64,
}

/// Hashes the files matched by a pattern list.
///
/// Files are visited in lexicographic path order and each contributes its
/// normalized name (see [`PathRoots::hash_key`]), a NUL byte, its length as
/// a little-endian `u64` and then its raw bytes
/// to a single SHA-256 stream, so the result does not depend on discovery
/// order or on the absolute location of the workspace and home directory.
pub struct ContentHasher {
    globber: Arc<dyn Globber>,
    roots: PathRoots,
}

impl ContentHasher {
    /// Create a hasher over `globber` normalizing against `roots`
    #[must_use]
    pub fn new(globber: Arc<dyn Globber>, roots: PathRoots) -> Self {
        Self { globber, roots }
    }

    /// Hash every file matched by `patterns`
    pub async fn hash(&self, patterns: &[String]) -> Result<ContentHash> {
        let mut files = self.globber.expand(patterns).await?;
        files.sort_by(|a, b| a.as_os_str().cmp(b.as_os_str()));
        files.dedup();

        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut file_count = 0u64;
        let mut total_bytes = 0u64;

        for path in &files {
            let metadata = tokio::fs::metadata(path)
                .await
                .map_err(|e| Error::io(e, path, "stat"))?;
            if metadata.is_dir() {
                continue;
            }
            file_count += 1;
            total_bytes += metadata.len();

            // Name, NUL terminator and byte length frame the contents
            hasher.update(self.roots.hash_key(path).as_bytes());
            hasher.update([0u8]);
            hasher.update(metadata.len().to_le_bytes());

            let mut file = tokio::fs::File::open(path)
                .await
                .map_err(|e| Error::io(e, path, "open"))?;
            loop {
                let n = file
                    .read(&mut buf)
                    .await
                    .map_err(|e| Error::io(e, path, "read"))?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
        }

        let hash = hex::encode(hasher.finalize());
        tracing::debug!(
            hash = %hash,
            file_count,
            total_bytes,
            "Hashed cache contents"
        );
        Ok(ContentHash {
            hash,
            file_count,
            total_bytes,
        })
    }
}
