//! Cryptographic primitives for PHOB containers.
//!
//! - [`derive_keys`]: Argon2id over `key` + `pass` into an encryption key and a MAC key
//! - [`seal`] / [`open`]: ChaCha20-Poly1305 per-file segments
//! - [`compute_tag`] / [`verify_tag`]: HMAC-SHA256 over the whole container frame
//! - [`SecretString`]: zeroizing holder for build and load secrets

mod cipher;
mod error;
mod key;
mod secret;
mod tag;

pub use cipher::{open, random_nonce, seal, NONCE_SIZE, TAG_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use key::{
    derive_keys, generate_random_key, ContainerKeys, DerivedKey, KdfParams, Salt, KEY_SIZE,
    MAX_MEMORY_COST, MAX_PARALLELISM, MAX_TIME_COST, SALT_SIZE,
};
pub use secret::SecretString;
pub use tag::{compute_tag, derive_nonce, verify_tag, MAC_SIZE};
