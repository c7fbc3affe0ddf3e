//! Error types for the container crate.

use phob_crypto::CryptoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The bytes are not a PHOB container at all (bad magic or too short).
    #[error("not a PHOB container: {0}")]
    Malformed(String),

    #[error("unsupported container version {0}")]
    UnsupportedVersion(u16),

    /// Structure, integrity tag or authenticated contents are inconsistent.
    #[error("container integrity check failed: {0}")]
    Tampered(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}
