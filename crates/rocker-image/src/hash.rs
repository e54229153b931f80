//! SHA-256 content verification.
//!
//! Blobs are hashed while they stream to disk, so verification costs no
//! second read of the file.

use std::io::{self, Write};

use rocker_common::error::{Result, RockerError};
use sha2::{Digest, Sha256};

/// Algorithm prefix of digests this module can verify.
const SHA256_PREFIX: &str = "sha256:";

/// Writer adapter that hashes every byte passed through to `inner`.
#[derive(Debug)]
pub struct DigestWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> DigestWriter<W> {
    /// Wraps `inner`.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// Number of bytes written so far.
    pub const fn written(&self) -> u64 {
        self.written
    }

    /// Returns the inner writer and the hex-encoded SHA-256 of everything written.
    pub fn finalize(self) -> (W, String) {
        let hex = format!("{:x}", self.hasher.finalize());
        (self.inner, hex)
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Checks a computed SHA-256 hex string against a content digest.
///
/// Digests using another algorithm are accepted unverified.
///
/// # Errors
///
/// Returns `RockerError::HashMismatch` if a `sha256:` digest does not match.
pub fn verify_digest(expected: &str, actual_hex: &str) -> Result<()> {
    let Some(expected_hex) = expected.strip_prefix(SHA256_PREFIX) else {
        tracing::debug!(digest = expected, "unsupported digest algorithm, skipping verification");
        return Ok(());
    };
    if !expected_hex.eq_ignore_ascii_case(actual_hex) {
        return Err(RockerError::HashMismatch {
            resource: expected.to_string(),
            expected: expected_hex.to_string(),
            actual: actual_hex.to_string(),
        });
    }
    Ok(())
}
