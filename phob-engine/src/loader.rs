//! Opening, validating, decrypting and running a container.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use phob_container::{Metadata, SealedContainer};
use phob_crypto::{derive_keys, open, ContainerKeys, SecretString};
use phob_license::{DeviceFingerprint, DeviceSource, LicenseId};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::executor::{ExecReport, Executor, SourceBundle};
use crate::validator::LicenseValidator;
use crate::LoadError;

/// The secrets a container was built with.
///
/// Containers never carry these; the loader must be given them.
#[derive(Debug, Clone)]
pub struct LoadSecrets {
    pub key: SecretString,
    pub pass: SecretString,
}

impl LoadSecrets {
    pub fn new(key: impl Into<SecretString>, pass: impl Into<SecretString>) -> Self {
        Self {
            key: key.into(),
            pass: pass.into(),
        }
    }
}

/// Progress of a single load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Unopened,
    MetadataParsed,
    Validated,
    Decrypted,
    Executed,
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unopened => "unopened",
            Self::MetadataParsed => "metadata-parsed",
            Self::Validated => "validated",
            Self::Decrypted => "decrypted",
            Self::Executed => "executed",
        })
    }
}

/// Result of a successful load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub container: PathBuf,
    pub entry: String,
    pub files: usize,
    pub license: LicenseId,
    pub report: ExecReport,
}

/// Loads and runs containers.
#[derive(Clone)]
pub struct Loader {
    secrets: LoadSecrets,
    device: Arc<dyn DeviceSource>,
    executor: Arc<dyn Executor>,
    validator: LicenseValidator,
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("validator", &self.validator)
            .finish_non_exhaustive()
    }
}

impl Loader {
    /// Creates a loader that fingerprints the current machine.
    pub fn new(secrets: LoadSecrets, executor: Arc<dyn Executor>) -> Self {
        Self {
            secrets,
            device: Arc::new(DeviceFingerprint),
            executor,
            validator: LicenseValidator::default(),
        }
    }

    pub fn with_device(mut self, device: Arc<dyn DeviceSource>) -> Self {
        self.device = device;
        self
    }

    pub fn with_validator(mut self, validator: LicenseValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Loads `path` and hands its sources to the executor.
    pub fn execute(&self, path: &Path) -> Result<ExecutionOutcome, LoadError> {
        self.execute_at(path, Utc::now())
    }

    /// Like [`Loader::execute`], with an explicit clock for expiry checks.
    pub fn execute_at(
        &self,
        path: &Path,
        now: DateTime<Utc>,
    ) -> Result<ExecutionOutcome, LoadError> {
        if self.secrets.key.is_blank() || self.secrets.pass.is_blank() {
            return Err(LoadError::NotConfigured("key and pass are required".to_string()));
        }

        let mut state = LoadState::Unopened;
        debug!(path = %path.display(), %state, "Opening container");

        let container = SealedContainer::read(path)?;
        state = LoadState::MetadataParsed;
        debug!(version = container.version(), bytes = container.len(), %state, "Frame parsed");

        // A header that passed parsing carries in-range KDF parameters, so a
        // failure here means the header lies.
        let keys = derive_keys(
            &self.secrets.key,
            &self.secrets.pass,
            container.salt(),
            container.kdf(),
        )
        .map_err(|e| LoadError::Tampered(format!("key derivation failed: {e}")))?;

        let metadata = self
            .validator
            .validate(&container, &keys, self.device.as_ref(), now)?;
        state = LoadState::Validated;
        debug!(license = %metadata.constraints.license, %state, "Container accepted");

        let bundle = decrypt(&container, &metadata, &keys, container_root(path)?)?;
        state = LoadState::Decrypted;
        debug!(files = bundle.len(), %state, "Sources recovered");

        let report = self.executor.execute(&bundle).map_err(LoadError::Execution)?;
        state = LoadState::Executed;
        debug!(exit_code = report.exit_code, %state, "Execution finished");

        info!(
            container = %path.display(),
            entry = %metadata.entry,
            license = %metadata.constraints.license,
            "Container executed"
        );

        Ok(ExecutionOutcome {
            container: path.to_path_buf(),
            entry: metadata.entry.clone(),
            files: bundle.len(),
            license: metadata.constraints.license.clone(),
            report,
        })
    }
}

/// Absolute directory of the container file.
fn container_root(path: &Path) -> Result<PathBuf, LoadError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    parent.canonicalize().map_err(LoadError::Unreadable)
}

/// Opens every segment and checks it against the manifest.
///
/// Plaintext goes straight into the bundle so it is wiped if a later
/// segment fails.
fn decrypt(
    container: &SealedContainer,
    metadata: &Metadata,
    keys: &ContainerKeys,
    root: PathBuf,
) -> Result<SourceBundle, LoadError> {
    let ciphertext = container.ciphertext();
    let mut bundle = SourceBundle::new(metadata.entry.clone(), root, BTreeMap::new());

    for entry in &metadata.manifest {
        let fail =
            |reason: String| LoadError::DecryptionFailure(format!("{}: {reason}", entry.path));

        let range = entry
            .offset
            .checked_add(entry.length)
            .and_then(|end| Some(usize::try_from(entry.offset).ok()?..usize::try_from(end).ok()?))
            .ok_or_else(|| fail("segment bounds out of range".to_string()))?;
        let segment = ciphertext
            .get(range)
            .ok_or_else(|| fail("segment outside ciphertext".to_string()))?;

        let nonce = entry.nonce_bytes().map_err(|e| fail(e.to_string()))?;
        let plaintext = open(&keys.encryption, &nonce, entry.path.as_bytes(), segment)
            .map_err(|e| fail(e.to_string()))?;
        let plaintext = bundle.insert(entry.path.clone(), plaintext);

        if plaintext.len() as u64 != entry.size {
            return Err(fail(format!(
                "size {} does not match manifest size {}",
                plaintext.len(),
                entry.size
            )));
        }
        if hex::encode(Sha256::digest(plaintext)) != entry.sha256 {
            return Err(fail("checksum mismatch".to_string()));
        }
    }

    Ok(bundle)
}
