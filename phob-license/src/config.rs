//! Build-time license policy and the constraints embedded in containers.

use crate::error::{LicenseError, LicenseResult};
use crate::identity::{DeviceBinding, DeviceConstraint, DeviceIdentity, DeviceSource};
use crate::revocation::RevocationPolicy;
use chrono::{DateTime, Utc};
use phob_crypto::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of a license identifier.
pub const MAX_LICENSE_ID_LEN: usize = 128;

/// An opaque license identifier issued by an external system.
///
/// Accepted characters: ASCII letters, digits, `.`, `_`, `:` and `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LicenseId(String);

impl LicenseId {
    /// Parses and validates a license identifier.
    pub fn parse(value: &str) -> LicenseResult<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Err(LicenseError::InvalidLicenseId("empty".to_string()));
        }
        if value.len() > MAX_LICENSE_ID_LEN {
            return Err(LicenseError::InvalidLicenseId(format!(
                "longer than {MAX_LICENSE_ID_LEN} characters"
            )));
        }
        if let Some(c) = value
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-')))
        {
            return Err(LicenseError::InvalidLicenseId(format!(
                "unsupported character {c:?}"
            )));
        }
        Ok(Self(value.to_string()))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LicenseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for LicenseId {
    type Error = LicenseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<LicenseId> for String {
    fn from(value: LicenseId) -> Self {
        value.0
    }
}

/// The protection policy chosen at build time.
///
/// `key` and `pass` only ever feed key derivation; they are never written
/// into a container.
#[derive(Debug, Clone, Deserialize)]
pub struct LicenseConfig {
    /// Primary key material.
    pub key: SecretString,
    /// Secondary secret.
    pub pass: SecretString,
    /// License identifier embedded in the container.
    pub license: LicenseId,
    /// Device the artifact is bound to.
    pub device: DeviceBinding,
    /// Absolute time after which execution must fail.
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
    /// Permits building an artifact whose expiry already passed.
    #[serde(default)]
    pub allow_expired: bool,
}

impl LicenseConfig {
    /// Checks the policy before any work is done.
    pub fn validate(&self, now: DateTime<Utc>) -> LicenseResult<()> {
        if self.key.is_blank() {
            return Err(LicenseError::InvalidConfig("key is missing".to_string()));
        }
        if self.pass.is_blank() {
            return Err(LicenseError::InvalidConfig("pass is missing".to_string()));
        }
        if let Some(expiry) = self.expiry
            && expiry <= now
            && !self.allow_expired
        {
            return Err(LicenseError::InvalidConfig(format!(
                "expiry {} is not in the future",
                expiry.to_rfc3339()
            )));
        }
        Ok(())
    }

    /// Resolves the policy into the constraints embedded in a container.
    pub fn constraints(&self, device: &dyn DeviceSource) -> LicenseResult<Constraints> {
        Ok(Constraints {
            license: self.license.clone(),
            device: self.device.resolve(device)?,
            expiry: self.expiry,
        })
    }
}

/// The subset of [`LicenseConfig`] a loader needs to accept or reject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraints {
    /// License identifier.
    pub license: LicenseId,
    /// Device constraint.
    pub device: DeviceConstraint,
    /// Expiry, if any.
    pub expiry: Option<DateTime<Utc>>,
}

impl Constraints {
    /// Evaluates the constraints against runtime facts.
    ///
    /// Order: expiry, device, revocation. Local checks run before the
    /// revocation lookup, which may need the network.
    pub fn evaluate(
        &self,
        device: &dyn DeviceSource,
        now: DateTime<Utc>,
        revocation: &RevocationPolicy,
    ) -> LicenseResult<()> {
        if let Some(expiry) = self.expiry
            && expiry <= now
        {
            return Err(LicenseError::Expired(expiry.to_rfc3339()));
        }

        if let DeviceConstraint::Device(bound) = &self.device {
            let current: DeviceIdentity = device.identity()?;
            if !bound.matches(&current) {
                return Err(LicenseError::DeviceMismatch);
            }
        }

        revocation.evaluate(&self.license)
    }
}
