//! Device binding and license constraints for PHOB.
//!
//! This crate handles:
//! - Hardware fingerprinting ([`DeviceFingerprint`]) with a per-process cache
//! - Device identities and bindings, including the explicit `any` wildcard
//! - Build-time license policy ([`LicenseConfig`]) and the [`Constraints`]
//!   it embeds into a container
//! - Optional revocation lookups that fail closed
//!
//! # Design Principles
//!
//! - **No implicit wildcard**: a missing device binding is an error, not "any"
//! - **Local checks first**: expiry and device are checked before revocation
//! - **Fail closed**: an unreachable revocation source rejects the license
//!   unless offline operation is explicitly allowed

mod config;
mod device;
mod error;
mod identity;
mod revocation;

pub use config::{Constraints, LicenseConfig, LicenseId, MAX_LICENSE_ID_LEN};
pub use device::{DeviceAttributes, DeviceFingerprint, DeviceInfo};
pub use error::{DeviceError, LicenseError, LicenseResult};
pub use identity::{
    DeviceBinding, DeviceConstraint, DeviceIdentity, DeviceSource, IDENTITY_LEN, MATCH_QUORUM,
    SLOT_COUNT, SLOT_SIZE,
};
pub use revocation::{RevocationCheck, RevocationList, RevocationPolicy};

#[cfg(feature = "online")]
pub use revocation::HttpRevocationCheck;
