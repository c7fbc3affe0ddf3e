//! Unencrypted container metadata: constraints plus the file manifest.
//!
//! Metadata is readable without decryption so a loader can reject an
//! ineligible artifact cheaply, but it is covered by the frame tag and is
//! only trusted once that tag verifies.

use std::collections::BTreeSet;

use phob_crypto::{NONCE_SIZE, TAG_SIZE};
use phob_license::Constraints;
use serde::{Deserialize, Serialize};

use crate::ContainerError;

/// One protected file inside the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Relative path with `/` separators.
    pub path: String,
    /// Plaintext size in bytes.
    pub size: u64,
    /// Hex SHA-256 of the plaintext.
    pub sha256: String,
    /// Offset of the sealed segment within the ciphertext region.
    pub offset: u64,
    /// Length of the sealed segment (plaintext + AEAD tag).
    pub length: u64,
    /// Hex nonce used to seal the segment.
    pub nonce: String,
}

impl ManifestEntry {
    /// Decodes the segment nonce.
    pub fn nonce_bytes(&self) -> Result<[u8; NONCE_SIZE], ContainerError> {
        let bytes = hex::decode(&self.nonce)
            .map_err(|e| ContainerError::Tampered(format!("invalid nonce for {}: {e}", self.path)))?;
        bytes.try_into().map_err(|_| {
            ContainerError::Tampered(format!("invalid nonce length for {}", self.path))
        })
    }
}

/// Container metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Engine that produced the container (informational).
    pub engine: String,
    /// License constraints evaluated at load time.
    pub constraints: Constraints,
    /// Relative path of the file handed to the executor.
    pub entry: String,
    /// Protected files, sorted by path.
    pub manifest: Vec<ManifestEntry>,
}

impl Metadata {
    /// Returns the manifest entry for `path`.
    pub fn entry_for(&self, path: &str) -> Option<&ManifestEntry> {
        self.manifest.iter().find(|e| e.path == path)
    }

    /// Checks that the manifest describes `ciphertext_len` bytes exactly.
    ///
    /// Segments must be contiguous and in order, paths unique, and the
    /// entry point must be one of the manifest paths.
    pub fn check_layout(&self, ciphertext_len: u64) -> Result<(), ContainerError> {
        let mut paths = BTreeSet::new();
        let mut cursor = 0u64;

        for entry in &self.manifest {
            if !paths.insert(entry.path.as_str()) {
                return Err(ContainerError::Tampered(format!(
                    "duplicate manifest path {}",
                    entry.path
                )));
            }
            let expected_length = entry.size.checked_add(TAG_SIZE as u64);
            if entry.offset != cursor || expected_length != Some(entry.length) {
                return Err(ContainerError::Tampered(format!(
                    "segment bounds for {} are inconsistent",
                    entry.path
                )));
            }
            cursor = cursor
                .checked_add(entry.length)
                .ok_or_else(|| ContainerError::Tampered("segment overflow".to_string()))?;
        }

        if cursor != ciphertext_len {
            return Err(ContainerError::Tampered(format!(
                "manifest covers {cursor} bytes, ciphertext has {ciphertext_len}"
            )));
        }
        if !paths.contains(self.entry.as_str()) {
            return Err(ContainerError::Tampered(format!(
                "entry point {} is not in the manifest",
                self.entry
            )));
        }
        Ok(())
    }
}
