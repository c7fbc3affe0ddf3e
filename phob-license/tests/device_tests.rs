use phob_license::{DeviceAttributes, DeviceError, DeviceFingerprint, DeviceInfo, IDENTITY_LEN};

fn attrs(machine: Option<&str>, mac: Option<&str>, host: Option<&str>) -> DeviceAttributes {
    DeviceAttributes {
        machine_id: machine.map(String::from),
        mac_address: mac.map(String::from),
        hostname: host.map(String::from),
    }
}

#[test]
fn device_info_collection() {
    let info = DeviceInfo::collect();
    assert!(!info.os_name.is_empty());
    assert!(!info.arch.is_empty());
    assert!(!info.hostname.is_empty());
}

#[test]
fn device_info_serde() {
    let info = DeviceInfo::collect();
    let json = serde_json::to_string(&info).unwrap();
    let parsed: DeviceInfo = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.os_name, info.os_name);
    assert_eq!(parsed.arch, info.arch);
}

#[test]
fn fingerprint_stability() {
    // Hosts without any readable attribute fail consistently too.
    let first = DeviceFingerprint::generate();
    let second = DeviceFingerprint::generate();
    assert_eq!(first, second);
}

#[test]
fn cached_fingerprint_matches_fresh() {
    assert_eq!(DeviceFingerprint::current(), DeviceFingerprint::generate());
    assert_eq!(DeviceFingerprint::current(), DeviceFingerprint::current());
}

#[test]
fn fingerprint_is_fixed_length() {
    if let Ok(id) = DeviceFingerprint::current() {
        assert_eq!(id.to_string().len(), IDENTITY_LEN);
    }
}

#[test]
fn from_attributes_is_deterministic() {
    let a = attrs(Some("abc123"), Some("52:54:00:12:34:56"), Some("build-01"));
    let id1 = DeviceFingerprint::from_attributes(&a).unwrap();
    let id2 = DeviceFingerprint::from_attributes(&a.clone()).unwrap();
    assert_eq!(id1, id2);
    assert_eq!(id1.populated_slots(), 3);
}

#[test]
fn no_attributes_is_unavailable() {
    let result = DeviceFingerprint::from_attributes(&attrs(None, None, Some("  ")));
    assert!(matches!(result, Err(DeviceError::Unavailable(_))));
}

#[test]
fn reinstalled_os_keeps_binding() {
    let before = attrs(Some("old-machine-id"), Some("52:54:00:12:34:56"), Some("build-01"));
    let after = attrs(Some("new-machine-id"), Some("52:54:00:12:34:56"), Some("build-01"));
    let a = DeviceFingerprint::from_attributes(&before).unwrap();
    let b = DeviceFingerprint::from_attributes(&after).unwrap();
    assert_ne!(a, b);
    assert!(a.matches(&b));
}

#[test]
fn hardware_swap_breaks_binding() {
    let before = attrs(Some("machine-a"), Some("52:54:00:12:34:56"), Some("build-01"));
    let after = attrs(Some("machine-b"), Some("52:54:00:aa:bb:cc"), Some("build-01"));
    let a = DeviceFingerprint::from_attributes(&before).unwrap();
    let b = DeviceFingerprint::from_attributes(&after).unwrap();
    assert!(!a.matches(&b));
}
