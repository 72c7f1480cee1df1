// src/core/hash.rs

use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{OtaError, Result};

/// Default read buffer for streaming digests.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Computes the SHA256 hash of the given data.
pub fn sha256_hash(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// Computes the SHA256 hash of the given data as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256_hash(data))
}

/// Streaming SHA-256 file hasher.
///
/// Files are read through a fixed-size buffer, so memory use does not depend
/// on file size.
#[derive(Debug, Clone, Copy)]
pub struct Hasher {
    chunk_size: usize,
}

impl Hasher {
    /// Creates a hasher with the default 4 KiB buffer.
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    /// Creates a hasher reading `chunk_size` bytes at a time (minimum 1).
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    /// The configured buffer size.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Raw SHA-256 digest of the file at `path`.
    ///
    /// # Errors
    ///
    /// [`OtaError::FileIo`] if the file cannot be opened or a read fails
    /// part-way. A read failure is never reported as a digest.
    pub fn digest_bytes(&self, path: &Path) -> Result<[u8; 32]> {
        let mut file = File::open(path).map_err(|e| OtaError::file_io(path, e))?;
        let mut hasher = Sha256::new();

        let mut buffer = vec![0u8; self.chunk_size];
        loop {
            let bytes_read = match file.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(OtaError::file_io(path, e)),
            };
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(hasher.finalize().into())
    }

    /// Lowercase hex SHA-256 digest of the file at `path`.
    pub fn digest(&self, path: &Path) -> Result<String> {
        self.digest_bytes(path).map(hex::encode)
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}
