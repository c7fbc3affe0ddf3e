use phob_license::{DeviceError, LicenseError};

#[test]
fn error_display_invalid_license_id() {
    let err = LicenseError::InvalidLicenseId("empty".into());
    assert!(format!("{err}").contains("invalid license id"));
}

#[test]
fn error_display_expired() {
    let err = LicenseError::Expired("2025-01-01T00:00:00+00:00".into());
    assert!(format!("{err}").contains("expired"));
}

#[test]
fn error_display_device_mismatch() {
    assert!(format!("{}", LicenseError::DeviceMismatch).contains("different device"));
}

#[test]
fn error_display_revoked() {
    assert!(format!("{}", LicenseError::Revoked).contains("revoked"));
}

#[test]
fn error_display_revocation_unavailable() {
    let err = LicenseError::RevocationUnavailable("timeout".into());
    let msg = format!("{err}");
    assert!(msg.contains("revocation"));
    assert!(msg.contains("timeout"));
}

#[test]
fn error_from_device_error_is_transparent() {
    let err: LicenseError = DeviceError::Unavailable("sandbox".into()).into();
    assert_eq!(format!("{err}"), "device identity unavailable: sandbox");
}

#[test]
fn error_is_debug() {
    let _ = format!("{:?}", LicenseError::Revoked);
}
