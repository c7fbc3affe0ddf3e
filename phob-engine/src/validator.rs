//! Load-time acceptance of a container.

use chrono::{DateTime, Utc};
use phob_container::{Metadata, SealedContainer, SUPPORTED_VERSIONS};
use phob_crypto::ContainerKeys;
use phob_license::{DeviceSource, RevocationPolicy};
use tracing::debug;

use crate::LoadError;

/// Decides whether a container may run here and now.
///
/// Checks run in a fixed order and stop at the first failure:
/// format version, integrity tag, expiry, device binding, revocation.
/// Nothing is decrypted until every check has passed.
#[derive(Debug, Clone, Default)]
pub struct LicenseValidator {
    revocation: RevocationPolicy,
}

impl LicenseValidator {
    pub fn new(revocation: RevocationPolicy) -> Self {
        Self { revocation }
    }

    pub fn revocation(&self) -> &RevocationPolicy {
        &self.revocation
    }

    /// Returns the authenticated metadata if the container is acceptable.
    pub fn validate(
        &self,
        container: &SealedContainer,
        keys: &ContainerKeys,
        device: &dyn DeviceSource,
        now: DateTime<Utc>,
    ) -> Result<Metadata, LoadError> {
        if !SUPPORTED_VERSIONS.contains(&container.version()) {
            return Err(LoadError::UnsupportedVersion(container.version()));
        }

        let metadata = container.authenticate(keys)?;
        debug!(
            license = %metadata.constraints.license,
            files = metadata.manifest.len(),
            "Integrity tag verified"
        );

        metadata
            .constraints
            .evaluate(device, now, &self.revocation)?;
        Ok(metadata)
    }
}
