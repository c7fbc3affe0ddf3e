//! PHOB container (`.phob`) format.
//!
//! A container is a single self-describing file:
//! - a fixed header (magic, version, KDF parameters, salt)
//! - unencrypted JSON metadata: license constraints and the file manifest
//! - the ciphertext region: one ChaCha20-Poly1305 segment per protected file
//! - an HMAC-SHA256 tag over everything before it
//!
//! The tag is verified before metadata is trusted and before any segment is
//! decrypted. Constraints can therefore be read cheaply but cannot be
//! stripped or altered without detection.

mod error;
mod frame;
mod metadata;

pub use error::ContainerError;
pub use frame::{
    SealedContainer, FORMAT_VERSION, MAGIC, MAX_METADATA_LEN, SUPPORTED_VERSIONS,
};
pub use metadata::{ManifestEntry, Metadata};

/// Default file name of a container inside a build output directory.
pub const DEFAULT_CONTAINER_NAME: &str = "app.phob";

/// Engine identifier recorded in metadata.
pub const ENGINE_ID: &str = concat!("phob/", env!("CARGO_PKG_VERSION"));
