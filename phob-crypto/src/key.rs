//! Key derivation and management.
//!
//! Uses Argon2id to turn the build-time `key` and `pass` secrets into two
//! independent 256-bit keys: one for sealing segments, one for the container
//! integrity tag. Neither secret is ever used directly as key bytes.

use crate::error::{CryptoError, CryptoResult};
use crate::secret::SecretString;
use argon2::{Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Size of encryption keys in bytes (256 bits for ChaCha20).
pub const KEY_SIZE: usize = 32;

/// Size of salt in bytes.
pub const SALT_SIZE: usize = 16;

/// Upper bound on accepted memory cost (64 MiB, in KiB).
///
/// Parameters are read from the header before the tag can be checked, so a
/// forged header makes a loader spend up to this much memory, times
/// [`MAX_TIME_COST`] passes, before the load fails as tampered.
pub const MAX_MEMORY_COST: u32 = 64 * 1024;

/// Upper bound on accepted time cost.
pub const MAX_TIME_COST: u32 = 8;

/// Upper bound on accepted parallelism.
pub const MAX_PARALLELISM: u32 = 16;

/// A derived key with automatic zeroization on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    /// Creates a key from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Returns the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// The key pair used for one container: segment encryption and frame MAC.
#[derive(Clone, Debug)]
pub struct ContainerKeys {
    /// ChaCha20-Poly1305 key for file segments.
    pub encryption: DerivedKey,
    /// HMAC-SHA256 key for the frame integrity tag.
    pub mac: DerivedKey,
}

/// Salt for key derivation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Salt {
    bytes: [u8; SALT_SIZE],
}

impl Salt {
    /// Generates a random salt.
    pub fn random() -> Self {
        let mut bytes = [0u8; SALT_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a salt from raw bytes.
    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self { bytes }
    }

    /// Returns the salt bytes.
    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.bytes
    }
}

/// Key derivation parameters.
///
/// These travel in the container header so a loader derives keys with the
/// same cost the builder used.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_cost: u32,
    /// Time cost (iterations).
    pub time_cost: u32,
    /// Parallelism factor.
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        // OWASP recommendations for Argon2id (2023)
        Self {
            memory_cost: 19 * 1024, // 19 MiB
            time_cost: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Checks the parameters against the accepted ceiling.
    ///
    /// Loaders call this before deriving so a forged header cannot request
    /// unbounded memory.
    pub fn validate(&self) -> CryptoResult<()> {
        if self.memory_cost > MAX_MEMORY_COST {
            return Err(CryptoError::InvalidParams(format!(
                "memory cost {} KiB exceeds {} KiB",
                self.memory_cost, MAX_MEMORY_COST
            )));
        }
        if self.time_cost == 0 || self.time_cost > MAX_TIME_COST {
            return Err(CryptoError::InvalidParams(format!(
                "time cost must be in 1..={MAX_TIME_COST}"
            )));
        }
        if self.parallelism == 0 || self.parallelism > MAX_PARALLELISM {
            return Err(CryptoError::InvalidParams(format!(
                "parallelism must be in 1..={MAX_PARALLELISM}"
            )));
        }
        Ok(())
    }
}

/// Derives the container keys from `key` and `pass` using Argon2id.
///
/// The password input is `len(key) || key || pass` so that moving bytes
/// between the two secrets changes the result.
pub fn derive_keys(
    key: &SecretString,
    pass: &SecretString,
    salt: &Salt,
    params: &KdfParams,
) -> CryptoResult<ContainerKeys> {
    params.validate()?;

    let argon2_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(KEY_SIZE * 2),
    )
    .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, argon2_params);

    let key_bytes = key.expose();
    let pass_bytes = pass.expose();
    let mut password = Zeroizing::new(Vec::with_capacity(4 + key_bytes.len() + pass_bytes.len()));
    password.extend_from_slice(&(key_bytes.len() as u32).to_le_bytes());
    password.extend_from_slice(key_bytes);
    password.extend_from_slice(pass_bytes);

    let mut output = Zeroizing::new([0u8; KEY_SIZE * 2]);
    argon2
        .hash_password_into(&password, salt.as_bytes(), output.as_mut())
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    let mut encryption = [0u8; KEY_SIZE];
    let mut mac = [0u8; KEY_SIZE];
    encryption.copy_from_slice(&output[..KEY_SIZE]);
    mac.copy_from_slice(&output[KEY_SIZE..]);

    Ok(ContainerKeys {
        encryption: DerivedKey::from_bytes(encryption),
        mac: DerivedKey::from_bytes(mac),
    })
}

/// Generates a random key (tests and tooling, not password-derived).
pub fn generate_random_key() -> DerivedKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    DerivedKey::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> KdfParams {
        KdfParams {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn encryption_and_mac_keys_differ() {
        let keys = derive_keys(
            &"k".into(),
            &"p".into(),
            &Salt::from_bytes([3; SALT_SIZE]),
            &fast(),
        )
        .unwrap();
        assert_ne!(keys.encryption.as_bytes(), keys.mac.as_bytes());
    }

    #[test]
    fn shifting_bytes_between_secrets_changes_keys() {
        let salt = Salt::from_bytes([3; SALT_SIZE]);
        let a = derive_keys(&"ab".into(), &"c".into(), &salt, &fast()).unwrap();
        let b = derive_keys(&"a".into(), &"bc".into(), &salt, &fast()).unwrap();
        assert_ne!(a.encryption.as_bytes(), b.encryption.as_bytes());
    }

    #[test]
    fn ceiling_admits_default_and_its_limits() {
        KdfParams::default().validate().unwrap();
        KdfParams {
            memory_cost: MAX_MEMORY_COST,
            time_cost: MAX_TIME_COST,
            parallelism: MAX_PARALLELISM,
        }
        .validate()
        .unwrap();
    }

    #[test]
    fn one_byte_header_forgery_exceeds_ceiling() {
        // 19 MiB default with its third byte set, as a flipped header byte would.
        let params = KdfParams {
            memory_cost: 0x0F4C00,
            ..KdfParams::default()
        };
        assert!(matches!(
            params.validate(),
            Err(CryptoError::InvalidParams(_))
        ));
    }

    #[test]
    fn oversized_memory_cost_rejected() {
        let params = KdfParams {
            memory_cost: MAX_MEMORY_COST + 1,
            ..fast()
        };
        assert!(matches!(
            params.validate(),
            Err(CryptoError::InvalidParams(_))
        ));
    }
}
