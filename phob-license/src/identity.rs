//! Device identity strings and the bindings that reference them.
//!
//! An identity has three slots, one per attribute class:
//!
//! ```text
//! v1-<machine:16 hex>-<network:16 hex>-<host:16 hex>
//! ```
//!
//! A slot of all zeros means the class could not be read on that machine.

use crate::error::DeviceError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Number of attribute slots in an identity.
pub const SLOT_COUNT: usize = 3;

/// Bytes per slot.
pub const SLOT_SIZE: usize = 8;

/// Minimum number of agreeing slots for two different identities to match.
pub const MATCH_QUORUM: usize = 2;

const PREFIX: &str = "v1";

/// Printed length of an identity string.
pub const IDENTITY_LEN: usize = PREFIX.len() + SLOT_COUNT * (1 + SLOT_SIZE * 2);

/// A deterministic fingerprint of one machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    slots: [[u8; SLOT_SIZE]; SLOT_COUNT],
}

impl DeviceIdentity {
    /// Creates an identity from raw slots.
    pub fn from_slots(slots: [[u8; SLOT_SIZE]; SLOT_COUNT]) -> Result<Self, DeviceError> {
        let identity = Self { slots };
        if identity.populated_slots() == 0 {
            return Err(DeviceError::Unavailable(
                "no device attribute could be read".to_string(),
            ));
        }
        Ok(identity)
    }

    /// Returns the raw slots.
    pub fn slots(&self) -> &[[u8; SLOT_SIZE]; SLOT_COUNT] {
        &self.slots
    }

    /// Number of slots backed by a readable attribute.
    pub fn populated_slots(&self) -> usize {
        self.slots.iter().filter(|s| **s != [0u8; SLOT_SIZE]).count()
    }

    /// Returns true if `other` identifies the same machine.
    ///
    /// Identical identities always match. Otherwise at least
    /// [`MATCH_QUORUM`] populated slots must agree, so one replaced
    /// component keeps the binding while a hardware swap breaks it.
    pub fn matches(&self, other: &DeviceIdentity) -> bool {
        if self == other {
            return true;
        }
        let agreeing = self
            .slots
            .iter()
            .zip(other.slots.iter())
            .filter(|(a, b)| **a != [0u8; SLOT_SIZE] && a == b)
            .count();
        agreeing >= MATCH_QUORUM
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(PREFIX)?;
        for slot in &self.slots {
            write!(f, "-{}", hex::encode(slot))?;
        }
        Ok(())
    }
}

impl FromStr for DeviceIdentity {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut parts = s.split('-');
        if parts.next() != Some(PREFIX) {
            return Err(DeviceError::InvalidIdentity(format!(
                "expected '{PREFIX}-' prefix"
            )));
        }

        let mut slots = [[0u8; SLOT_SIZE]; SLOT_COUNT];
        for slot in slots.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| DeviceError::InvalidIdentity("missing slot".to_string()))?;
            let bytes = hex::decode(part)
                .map_err(|e| DeviceError::InvalidIdentity(format!("invalid slot hex: {e}")))?;
            if bytes.len() != SLOT_SIZE {
                return Err(DeviceError::InvalidIdentity(format!(
                    "slot must be {} hex chars",
                    SLOT_SIZE * 2
                )));
            }
            slot.copy_from_slice(&bytes);
        }
        if parts.next().is_some() {
            return Err(DeviceError::InvalidIdentity("too many slots".to_string()));
        }

        Self::from_slots(slots).map_err(|_| {
            DeviceError::InvalidIdentity("identity has no populated slot".to_string())
        })
    }
}

impl Serialize for DeviceIdentity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeviceIdentity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Source of the current machine's identity.
///
/// [`crate::DeviceFingerprint`] reads the real machine; a fixed
/// [`DeviceIdentity`] stands in for another machine in tests and tooling.
pub trait DeviceSource: Send + Sync {
    /// Returns the identity of the machine this source describes.
    fn identity(&self) -> Result<DeviceIdentity, DeviceError>;
}

impl DeviceSource for DeviceIdentity {
    fn identity(&self) -> Result<DeviceIdentity, DeviceError> {
        Ok(*self)
    }
}

/// Device binding requested at build time.
///
/// Spelled `"any"`, `"this"` or an identity string in configuration.
/// There is no implicit wildcard: the field must be present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceBinding {
    /// Runs on any device.
    Any,
    /// Bound to the machine running the build.
    ThisDevice,
    /// Bound to an explicit identity.
    Device(DeviceIdentity),
}

impl DeviceBinding {
    /// Resolves the binding into the constraint embedded in a container.
    pub fn resolve(&self, source: &dyn DeviceSource) -> Result<DeviceConstraint, DeviceError> {
        match self {
            Self::Any => Ok(DeviceConstraint::Any),
            Self::ThisDevice => source.identity().map(DeviceConstraint::Device),
            Self::Device(id) => Ok(DeviceConstraint::Device(*id)),
        }
    }
}

impl fmt::Display for DeviceBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::ThisDevice => f.write_str("this"),
            Self::Device(id) => fmt::Display::fmt(id, f),
        }
    }
}

impl FromStr for DeviceBinding {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "any" | "*" => Ok(Self::Any),
            "this" => Ok(Self::ThisDevice),
            other => other.parse().map(Self::Device),
        }
    }
}

impl Serialize for DeviceBinding {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeviceBinding {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Device constraint embedded in a container (a resolved [`DeviceBinding`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceConstraint {
    /// Wildcard: any device may run the artifact.
    Any,
    /// Only a matching device may run the artifact.
    Device(DeviceIdentity),
}

impl DeviceConstraint {
    /// Returns true if the constraint accepts `current`.
    pub fn accepts(&self, current: &DeviceIdentity) -> bool {
        match self {
            Self::Any => true,
            Self::Device(bound) => bound.matches(current),
        }
    }
}

impl fmt::Display for DeviceConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::Device(id) => fmt::Display::fmt(id, f),
        }
    }
}

impl Serialize for DeviceConstraint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeviceConstraint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s == "any" {
            return Ok(Self::Any);
        }
        s.parse()
            .map(Self::Device)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(a: u8, b: u8, c: u8) -> DeviceIdentity {
        DeviceIdentity::from_slots([[a; SLOT_SIZE], [b; SLOT_SIZE], [c; SLOT_SIZE]]).unwrap()
    }

    #[test]
    fn display_parse_roundtrip() {
        let identity = id(1, 2, 3);
        let printed = identity.to_string();
        assert_eq!(printed.len(), IDENTITY_LEN);
        assert_eq!(printed.parse::<DeviceIdentity>().unwrap(), identity);
    }

    #[test]
    fn one_changed_slot_still_matches() {
        assert!(id(1, 2, 3).matches(&id(9, 2, 3)));
    }

    #[test]
    fn two_changed_slots_do_not_match() {
        assert!(!id(1, 2, 3).matches(&id(9, 8, 3)));
    }

    #[test]
    fn empty_slots_do_not_count_towards_quorum() {
        let a = id(1, 0, 0);
        let b = id(1, 0, 7);
        assert!(!a.matches(&b));
        assert!(a.matches(&a));
    }

    #[test]
    fn all_zero_identity_rejected() {
        assert!(DeviceIdentity::from_slots([[0; SLOT_SIZE]; SLOT_COUNT]).is_err());
    }

    #[test]
    fn binding_spellings() {
        assert_eq!("any".parse::<DeviceBinding>().unwrap(), DeviceBinding::Any);
        assert_eq!("this".parse::<DeviceBinding>().unwrap(), DeviceBinding::ThisDevice);
        let explicit = id(4, 5, 6);
        assert_eq!(
            explicit.to_string().parse::<DeviceBinding>().unwrap(),
            DeviceBinding::Device(explicit)
        );
        assert!("".parse::<DeviceBinding>().is_err());
    }
}
