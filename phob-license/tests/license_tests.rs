mod common;

use chrono::{Duration, Utc};
use common::{identity, license};
use phob_license::{
    Constraints, DeviceBinding, DeviceConstraint, DeviceError, DeviceIdentity, DeviceSource,
    LicenseConfig, LicenseError, LicenseId, RevocationList, RevocationPolicy,
};
use std::sync::Arc;

struct NoDevice;

impl DeviceSource for NoDevice {
    fn identity(&self) -> Result<DeviceIdentity, DeviceError> {
        Err(DeviceError::Unavailable("sandboxed".into()))
    }
}

fn config_toml(extra: &str) -> String {
    format!(
        r#"
key = "0123456789"
pass = "correct horse"
license = "ACME-2024-0001"
device = "any"
{extra}
"#
    )
}

#[test]
fn license_config_from_toml() {
    let config: LicenseConfig = toml::from_str(&config_toml(
        r#"expiry = "2099-01-01T00:00:00Z""#,
    ))
    .unwrap();
    assert_eq!(config.license.as_str(), "ACME-2024-0001");
    assert_eq!(config.device, DeviceBinding::Any);
    assert!(config.expiry.is_some());
    assert!(!config.allow_expired);
    assert!(config.validate(Utc::now()).is_ok());
}

#[test]
fn license_config_requires_device() {
    let toml_src = r#"
key = "k"
pass = "p"
license = "L-1"
"#;
    assert!(toml::from_str::<LicenseConfig>(toml_src).is_err());
}

#[test]
fn license_config_debug_hides_secrets() {
    let config: LicenseConfig = toml::from_str(&config_toml("")).unwrap();
    let dbg = format!("{config:?}");
    assert!(!dbg.contains("0123456789"));
    assert!(!dbg.contains("correct horse"));
}

#[test]
fn blank_key_rejected() {
    let mut config: LicenseConfig = toml::from_str(&config_toml("")).unwrap();
    config.key = "   ".into();
    assert!(matches!(
        config.validate(Utc::now()),
        Err(LicenseError::InvalidConfig(_))
    ));
}

#[test]
fn past_expiry_rejected_unless_allowed() {
    let mut config: LicenseConfig = toml::from_str(&config_toml("")).unwrap();
    config.expiry = Some(Utc::now() - Duration::days(1));
    assert!(config.validate(Utc::now()).is_err());
    config.allow_expired = true;
    assert!(config.validate(Utc::now()).is_ok());
}

#[test]
fn license_id_validation() {
    assert!(LicenseId::parse("ACME:2024.0001_x-y").is_ok());
    assert!(LicenseId::parse("").is_err());
    assert!(LicenseId::parse("has space").is_err());
    assert!(LicenseId::parse(&"a".repeat(129)).is_err());
    assert!(serde_json::from_str::<LicenseId>("\"bad/id\"").is_err());
}

#[test]
fn this_device_binding_needs_fingerprint() {
    let mut config: LicenseConfig = toml::from_str(&config_toml("")).unwrap();
    config.device = DeviceBinding::ThisDevice;
    assert!(matches!(
        config.constraints(&NoDevice),
        Err(LicenseError::Device(DeviceError::Unavailable(_)))
    ));
    let constraints = config.constraints(&identity(1, 2, 3)).unwrap();
    assert_eq!(constraints.device, DeviceConstraint::Device(identity(1, 2, 3)));
}

fn constraints(device: DeviceConstraint, expiry_in: Option<Duration>) -> Constraints {
    Constraints {
        license: license("ACME-1"),
        device,
        expiry: expiry_in.map(|d| Utc::now() + d),
    }
}

#[test]
fn valid_constraints_pass() {
    let c = constraints(DeviceConstraint::Device(identity(1, 2, 3)), Some(Duration::days(1)));
    assert!(c.evaluate(&identity(1, 2, 3), Utc::now(), &RevocationPolicy::none()).is_ok());
}

#[test]
fn expired_constraints_fail() {
    let c = constraints(DeviceConstraint::Any, Some(Duration::seconds(-1)));
    assert!(matches!(
        c.evaluate(&identity(1, 2, 3), Utc::now(), &RevocationPolicy::none()),
        Err(LicenseError::Expired(_))
    ));
}

#[test]
fn expiry_is_exclusive() {
    let now = Utc::now();
    let c = Constraints {
        license: license("ACME-1"),
        device: DeviceConstraint::Any,
        expiry: Some(now),
    };
    assert!(matches!(
        c.evaluate(&identity(1, 2, 3), now, &RevocationPolicy::none()),
        Err(LicenseError::Expired(_))
    ));
}

#[test]
fn expiry_checked_before_device() {
    let c = constraints(DeviceConstraint::Device(identity(1, 2, 3)), Some(Duration::seconds(-1)));
    assert!(matches!(
        c.evaluate(&identity(9, 8, 7), Utc::now(), &RevocationPolicy::none()),
        Err(LicenseError::Expired(_))
    ));
}

#[test]
fn wrong_device_fails() {
    let c = constraints(DeviceConstraint::Device(identity(1, 2, 3)), None);
    assert!(matches!(
        c.evaluate(&identity(9, 8, 7), Utc::now(), &RevocationPolicy::none()),
        Err(LicenseError::DeviceMismatch)
    ));
}

#[test]
fn wildcard_device_skips_fingerprint() {
    let c = constraints(DeviceConstraint::Any, None);
    assert!(c.evaluate(&NoDevice, Utc::now(), &RevocationPolicy::none()).is_ok());
}

#[test]
fn revoked_license_fails_after_local_checks() {
    let policy = RevocationPolicy::with_check(Arc::new(RevocationList::new(["ACME-1"])));
    let c = constraints(DeviceConstraint::Device(identity(1, 2, 3)), None);
    assert!(matches!(
        c.evaluate(&identity(1, 2, 3), Utc::now(), &policy),
        Err(LicenseError::Revoked)
    ));
    assert!(matches!(
        c.evaluate(&identity(9, 8, 7), Utc::now(), &policy),
        Err(LicenseError::DeviceMismatch)
    ));
}

#[test]
fn revocation_list_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("revoked.txt");
    std::fs::write(&path, "ACME-1\n# comment\nACME-2\n").unwrap();
    let list = RevocationList::from_file(&path).unwrap();
    assert_eq!(list.len(), 2);
    assert!(RevocationList::from_file(&dir.path().join("missing.txt")).is_err());
}
