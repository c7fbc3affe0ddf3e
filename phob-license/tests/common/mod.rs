//! Shared test helpers for license tests.

#![allow(dead_code)]

use phob_license::{DeviceIdentity, LicenseId, SLOT_COUNT, SLOT_SIZE};

/// Returns an identity whose three slots are filled with the given bytes.
pub fn identity(machine: u8, network: u8, host: u8) -> DeviceIdentity {
    let slots: [[u8; SLOT_SIZE]; SLOT_COUNT] =
        [[machine; SLOT_SIZE], [network; SLOT_SIZE], [host; SLOT_SIZE]];
    DeviceIdentity::from_slots(slots).unwrap()
}

/// Returns a validated license id.
pub fn license(id: &str) -> LicenseId {
    LicenseId::parse(id).unwrap()
}
