//! Error types for building and loading containers.
//!
//! No variant carries key material; reasons are plain descriptions.

use phob_container::ContainerError;
use phob_license::{DeviceError, LicenseError};
use thiserror::Error;

/// Errors that abort a build. No output is left behind when one occurs.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Source path missing, unreadable, or a file failed its syntax check.
    #[error("invalid source: {0}")]
    InvalidSource(String),

    /// The build configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The output could not be written.
    #[error("write failure: {0}")]
    WriteFailure(String),

    /// Binding to this device needs a fingerprint that could not be read.
    #[error(transparent)]
    Device(#[from] DeviceError),
}

impl From<LicenseError> for BuildError {
    fn from(err: LicenseError) -> Self {
        match err {
            LicenseError::Device(e) => Self::Device(e),
            other => Self::InvalidConfig(other.to_string()),
        }
    }
}

/// Stage of a load at which it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// The engine handle lacks what a load needs.
    Setup,
    /// The file could not be read or is not a supported container.
    Format,
    /// Integrity or license checks rejected the container.
    Validation,
    /// Segments failed to decrypt or did not match the manifest.
    Decryption,
    /// The recovered source raised an error while executing.
    Runtime,
}

/// Errors that end a load. Loads are never retried.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("engine not configured: {0}")]
    NotConfigured(String),

    #[error("cannot read container: {0}")]
    Unreadable(#[source] std::io::Error),

    #[error("not a PHOB container: {0}")]
    Malformed(String),

    #[error("unsupported container version {0}")]
    UnsupportedVersion(u16),

    #[error("container is corrupt or has been tampered with: {0}")]
    Tampered(String),

    #[error("license expired on {0}")]
    Expired(String),

    #[error("license is bound to a different device")]
    DeviceMismatch,

    #[error("license rejected: {0}")]
    LicenseRevoked(String),

    #[error("decryption failed: {0}")]
    DecryptionFailure(String),

    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Raised by the executor; passed through unchanged.
    #[error("execution failed: {0:#}")]
    Execution(#[source] anyhow::Error),
}

impl LoadError {
    /// Returns the stage that failed.
    pub fn stage(&self) -> Stage {
        match self {
            Self::NotConfigured(_) => Stage::Setup,
            Self::Unreadable(_) | Self::Malformed(_) | Self::UnsupportedVersion(_) => Stage::Format,
            Self::Tampered(_)
            | Self::Expired(_)
            | Self::DeviceMismatch
            | Self::LicenseRevoked(_)
            | Self::Device(_) => Stage::Validation,
            Self::DecryptionFailure(_) => Stage::Decryption,
            Self::Execution(_) => Stage::Runtime,
        }
    }
}

impl From<ContainerError> for LoadError {
    fn from(err: ContainerError) -> Self {
        match err {
            ContainerError::Io(e) => Self::Unreadable(e),
            ContainerError::Malformed(reason) => Self::Malformed(reason),
            ContainerError::UnsupportedVersion(v) => Self::UnsupportedVersion(v),
            ContainerError::Tampered(reason) => Self::Tampered(reason),
            ContainerError::Json(e) => Self::Tampered(format!("metadata unreadable: {e}")),
            ContainerError::Crypto(e) => Self::Tampered(e.to_string()),
        }
    }
}

impl From<LicenseError> for LoadError {
    fn from(err: LicenseError) -> Self {
        match err {
            LicenseError::Expired(at) => Self::Expired(at),
            LicenseError::DeviceMismatch => Self::DeviceMismatch,
            LicenseError::Device(e) => Self::Device(e),
            LicenseError::Revoked => Self::LicenseRevoked("license has been revoked".to_string()),
            other => Self::LicenseRevoked(other.to_string()),
        }
    }
}
