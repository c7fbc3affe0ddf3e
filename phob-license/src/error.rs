//! Error types for device identity and license constraints.

use thiserror::Error;

/// Device fingerprinting errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// No attribute source could be read (sandboxed or restricted host).
    #[error("device identity unavailable: {0}")]
    Unavailable(String),

    /// A device identity string is malformed.
    #[error("invalid device identity: {0}")]
    InvalidIdentity(String),
}

/// Licensing-specific errors.
#[derive(Debug, Error)]
pub enum LicenseError {
    /// License identifier is empty, too long, or contains unsupported characters.
    #[error("invalid license id: {0}")]
    InvalidLicenseId(String),

    /// Build-time license configuration is unusable.
    #[error("invalid license configuration: {0}")]
    InvalidConfig(String),

    /// License has expired.
    #[error("license expired on {0}")]
    Expired(String),

    /// The artifact is bound to a different device.
    #[error("license is bound to a different device")]
    DeviceMismatch,

    /// License revoked.
    #[error("license has been revoked")]
    Revoked,

    /// Revocation lookup failed and offline operation is not allowed.
    #[error("revocation check unavailable: {0}")]
    RevocationUnavailable(String),

    /// Network error during a revocation lookup.
    #[error("network error: {0}")]
    Network(String),

    /// Device identity could not be determined.
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Result type for license operations.
pub type LicenseResult<T> = Result<T, LicenseError>;
