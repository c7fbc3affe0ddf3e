//! Binary framing of a `.phob` container.
//!
//! ```text
//! magic      4   b"PHOB"
//! version    2   u16 LE
//! kdf        12  memory_cost, time_cost, parallelism (u32 LE each)
//! salt       16
//! meta_len   4   u32 LE
//! metadata   meta_len bytes (JSON)
//! ct_len     8   u64 LE
//! ciphertext ct_len bytes
//! tag        32  HMAC-SHA256 over every preceding byte
//! ```

use std::path::Path;

use phob_crypto::{
    compute_tag, verify_tag, ContainerKeys, DerivedKey, KdfParams, Salt, MAC_SIZE, SALT_SIZE,
};

use crate::metadata::Metadata;
use crate::ContainerError;

/// File magic.
pub const MAGIC: [u8; 4] = *b"PHOB";

/// Version written by this engine.
pub const FORMAT_VERSION: u16 = 1;

/// Versions this engine can read.
pub const SUPPORTED_VERSIONS: &[u16] = &[FORMAT_VERSION];

/// Largest metadata block accepted (16 MiB).
pub const MAX_METADATA_LEN: usize = 16 * 1024 * 1024;

const HEADER_LEN: usize = 4 + 2 + 12 + SALT_SIZE;

/// A parsed but not yet authenticated container.
///
/// Holding a `SealedContainer` only means the frame is structurally sound.
/// Nothing inside it is trusted until [`SealedContainer::authenticate`]
/// succeeds.
#[derive(Debug, Clone)]
pub struct SealedContainer {
    bytes: Vec<u8>,
    version: u16,
    kdf: KdfParams,
    salt: Salt,
    metadata: std::ops::Range<usize>,
    ciphertext: std::ops::Range<usize>,
}

impl SealedContainer {
    /// Assembles a container and appends its tag.
    ///
    /// The tag is computed last, after the ciphertext is final.
    pub fn encode(
        kdf: &KdfParams,
        salt: &Salt,
        metadata: &Metadata,
        ciphertext: &[u8],
        mac_key: &DerivedKey,
    ) -> Result<Vec<u8>, ContainerError> {
        let metadata_json = serde_json::to_vec(metadata)?;
        if metadata_json.len() > MAX_METADATA_LEN {
            return Err(ContainerError::Malformed(format!(
                "metadata exceeds {MAX_METADATA_LEN} bytes"
            )));
        }

        let mut out = Vec::with_capacity(
            HEADER_LEN + 4 + metadata_json.len() + 8 + ciphertext.len() + MAC_SIZE,
        );
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&kdf.memory_cost.to_le_bytes());
        out.extend_from_slice(&kdf.time_cost.to_le_bytes());
        out.extend_from_slice(&kdf.parallelism.to_le_bytes());
        out.extend_from_slice(salt.as_bytes());
        out.extend_from_slice(&(metadata_json.len() as u32).to_le_bytes());
        out.extend_from_slice(&metadata_json);
        out.extend_from_slice(&(ciphertext.len() as u64).to_le_bytes());
        out.extend_from_slice(ciphertext);

        let tag = compute_tag(mac_key, &out)?;
        out.extend_from_slice(&tag);
        Ok(out)
    }

    /// Reads and parses a container file.
    pub fn read(path: &Path) -> Result<Self, ContainerError> {
        Self::parse(std::fs::read(path)?)
    }

    /// Parses the frame structure.
    ///
    /// Bad magic is [`ContainerError::Malformed`], an unknown version is
    /// [`ContainerError::UnsupportedVersion`], and any inconsistency after
    /// the version field is [`ContainerError::Tampered`].
    pub fn parse(bytes: Vec<u8>) -> Result<Self, ContainerError> {
        if bytes.len() < MAGIC.len() + 2 || bytes[..MAGIC.len()] != MAGIC {
            return Err(ContainerError::Malformed("missing PHOB magic".to_string()));
        }

        let mut reader = FrameReader::new(&bytes, MAGIC.len());
        let version = u16::from_le_bytes(reader.array()?);
        if !SUPPORTED_VERSIONS.contains(&version) {
            return Err(ContainerError::UnsupportedVersion(version));
        }

        let kdf = KdfParams {
            memory_cost: u32::from_le_bytes(reader.array()?),
            time_cost: u32::from_le_bytes(reader.array()?),
            parallelism: u32::from_le_bytes(reader.array()?),
        };
        kdf.validate()
            .map_err(|e| ContainerError::Tampered(e.to_string()))?;
        let salt = Salt::from_bytes(reader.array()?);

        let metadata_len = u32::from_le_bytes(reader.array()?) as usize;
        if metadata_len > MAX_METADATA_LEN {
            return Err(ContainerError::Tampered("metadata length out of range".to_string()));
        }
        let metadata = reader.range(metadata_len)?;

        let ciphertext_len = usize::try_from(u64::from_le_bytes(reader.array()?))
            .map_err(|_| ContainerError::Tampered("ciphertext length out of range".to_string()))?;
        let ciphertext = reader.range(ciphertext_len)?;

        if bytes.len() - reader.position() != MAC_SIZE {
            return Err(ContainerError::Tampered(
                "frame length does not match its length fields".to_string(),
            ));
        }

        Ok(Self {
            bytes,
            version,
            kdf,
            salt,
            metadata,
            ciphertext,
        })
    }

    /// Format version.
    pub fn version(&self) -> u16 {
        self.version
    }

    /// KDF parameters recorded by the builder.
    pub fn kdf(&self) -> &KdfParams {
        &self.kdf
    }

    /// Salt recorded by the builder.
    pub fn salt(&self) -> &Salt {
        &self.salt
    }

    /// Total size of the container in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false for a parsed container.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The ciphertext region.
    pub fn ciphertext(&self) -> &[u8] {
        &self.bytes[self.ciphertext.clone()]
    }

    /// Verifies the frame tag, then parses and checks the metadata.
    pub fn authenticate(&self, keys: &ContainerKeys) -> Result<Metadata, ContainerError> {
        let tagged_len = self.bytes.len() - MAC_SIZE;
        verify_tag(&keys.mac, &self.bytes[..tagged_len], &self.bytes[tagged_len..])
            .map_err(|_| ContainerError::Tampered("integrity tag mismatch".to_string()))?;

        let metadata: Metadata = serde_json::from_slice(&self.bytes[self.metadata.clone()])
            .map_err(|e| ContainerError::Tampered(format!("metadata unreadable: {e}")))?;
        metadata.check_layout(self.ciphertext.len() as u64)?;
        Ok(metadata)
    }

    /// Parses the metadata WITHOUT verifying the tag.
    ///
    /// For diagnostics only; the result may be forged.
    pub fn metadata_unverified(&self) -> Result<Metadata, ContainerError> {
        Ok(serde_json::from_slice(&self.bytes[self.metadata.clone()])?)
    }
}

struct FrameReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    fn new(bytes: &'a [u8], pos: usize) -> Self {
        Self { bytes, pos }
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn range(&mut self, len: usize) -> Result<std::ops::Range<usize>, ContainerError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| ContainerError::Tampered("truncated frame".to_string()))?;
        let range = self.pos..end;
        self.pos = end;
        Ok(range)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ContainerError> {
        let range = self.range(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[range]);
        Ok(out)
    }
}
