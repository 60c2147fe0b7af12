//! Content identities for context entries.
//!
//! A file's identity is the hex-encoded SHA256 of its bytes, streamed from
//! disk. Directories carry the empty identity: only their presence matters.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use kontext_core::error::{KontextError, Result};
use sha2::{Digest, Sha256};

/// Identity recorded for directories.
pub const DIRECTORY_IDENTITY: &str = "";

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Computes content identities for files and directories.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentHasher;

impl ContentHasher {
    pub fn new() -> Self {
        Self
    }

    /// Identity for the entry at `path`, dereferencing symlinks.
    pub fn identity(&self, path: &Path) -> Result<String> {
        let metadata = std::fs::metadata(path).map_err(|e| KontextError::WalkError {
            path: path.display().to_string(),
            message: format!("Failed to stat: {}", e),
        })?;
        if metadata.is_dir() {
            return Ok(DIRECTORY_IDENTITY.to_string());
        }
        self.file_digest(path)
    }

    /// SHA256 of a regular file's full content.
    pub fn file_digest(&self, path: &Path) -> Result<String> {
        let file = File::open(path).map_err(|e| KontextError::WalkError {
            path: path.display().to_string(),
            message: format!("Failed to open for hashing: {}", e),
        })?;
        sha256_reader(BufReader::with_capacity(READ_BUFFER_SIZE, file)).map_err(|e| {
            KontextError::WalkError {
                path: path.display().to_string(),
                message: format!("Failed to read for hashing: {}", e),
            }
        })
    }
}

/// Stream a reader through SHA256 and return the hex digest.
pub fn sha256_reader<R: Read>(mut reader: R) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Reader that hashes and counts everything read through it.
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
    count: u64,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            count: 0,
        }
    }

    /// Bytes read so far and the hex digest over them.
    pub fn finish(self) -> (u64, String) {
        (self.count, hex::encode(self.hasher.finalize()))
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.count += n as u64;
        Ok(n)
    }
}

/// Compute SHA256 digest of raw bytes.
pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
