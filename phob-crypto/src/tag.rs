//! HMAC-SHA256 integrity tags.
//!
//! The container tag covers the full frame (header, metadata and
//! ciphertext) and is checked before anything inside the frame is trusted.

use crate::cipher::NONCE_SIZE;
use crate::error::{CryptoError, CryptoResult};
use crate::key::DerivedKey;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Size of an integrity tag in bytes.
pub const MAC_SIZE: usize = 32;

fn new_mac(key: &DerivedKey) -> CryptoResult<HmacSha256> {
    <HmacSha256 as Mac>::new_from_slice(key.as_bytes()).map_err(|_| {
        CryptoError::InvalidKeyLength {
            expected: crate::key::KEY_SIZE,
            actual: key.as_bytes().len(),
        }
    })
}

/// Computes the tag over `data`.
pub fn compute_tag(key: &DerivedKey, data: &[u8]) -> CryptoResult<[u8; MAC_SIZE]> {
    let mut mac = new_mac(key)?;
    mac.update(data);
    let digest = mac.finalize().into_bytes();
    let mut tag = [0u8; MAC_SIZE];
    tag.copy_from_slice(&digest);
    Ok(tag)
}

/// Verifies `tag` over `data` in constant time.
pub fn verify_tag(key: &DerivedKey, data: &[u8], tag: &[u8]) -> CryptoResult<()> {
    let mut mac = new_mac(key)?;
    mac.update(data);
    mac.verify_slice(tag).map_err(|_| CryptoError::TagMismatch)
}

/// Derives a nonce from the MAC key and a list of inputs.
///
/// Used by deterministic builds: the nonce only repeats when every input
/// (and therefore the plaintext) repeats. Inputs are length-prefixed.
pub fn derive_nonce(key: &DerivedKey, parts: &[&[u8]]) -> CryptoResult<[u8; NONCE_SIZE]> {
    let mut mac = new_mac(key)?;
    mac.update(b"phob-nonce");
    for part in parts {
        mac.update(&(part.len() as u64).to_le_bytes());
        mac.update(part);
    }
    let digest = mac.finalize().into_bytes();
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&digest[..NONCE_SIZE]);
    Ok(nonce)
}
