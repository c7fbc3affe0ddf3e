//! Device fingerprinting for license binding.
//!
//! Generates a stable identity from three low-volatility attribute classes:
//! the platform machine id, the primary network interface's hardware
//! address, and the hostname together with OS and architecture. Nothing
//! derived from time, process state or the working directory is used.

use crate::error::DeviceError;
use crate::identity::{DeviceIdentity, DeviceSource, SLOT_COUNT, SLOT_SIZE};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::env;
use std::sync::OnceLock;

/// Information about the current device, for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Operating system name.
    pub os_name: String,
    /// Operating system version.
    pub os_version: String,
    /// Hostname.
    pub hostname: String,
    /// CPU architecture.
    pub arch: String,
}

impl DeviceInfo {
    /// Collects information about the current device.
    #[must_use]
    pub fn collect() -> Self {
        Self {
            os_name: env::consts::OS.to_string(),
            os_version: get_os_version(),
            hostname: get_hostname().unwrap_or_else(|| "unknown".to_string()),
            arch: env::consts::ARCH.to_string(),
        }
    }
}

/// Raw attributes an identity is computed from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceAttributes {
    /// Platform machine identifier.
    pub machine_id: Option<String>,
    /// Hardware address of the primary network interface.
    pub mac_address: Option<String>,
    /// Hostname.
    pub hostname: Option<String>,
}

impl DeviceAttributes {
    /// Reads the attributes of the current machine.
    #[must_use]
    pub fn collect() -> Self {
        Self {
            machine_id: get_machine_id(),
            mac_address: get_primary_mac(),
            hostname: get_hostname(),
        }
    }
}

/// Fingerprint of the machine this process runs on.
///
/// [`DeviceFingerprint::current`] computes the identity once per process and
/// caches it; the cache is never written to disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceFingerprint;

static CURRENT: OnceLock<Result<DeviceIdentity, DeviceError>> = OnceLock::new();

impl DeviceFingerprint {
    /// Returns the cached identity of the current machine.
    pub fn current() -> Result<DeviceIdentity, DeviceError> {
        CURRENT.get_or_init(Self::generate).clone()
    }

    /// Computes the identity of the current machine without the cache.
    pub fn generate() -> Result<DeviceIdentity, DeviceError> {
        Self::from_attributes(&DeviceAttributes::collect())
    }

    /// Computes an identity from explicit attributes.
    ///
    /// Fails with [`DeviceError::Unavailable`] if every attribute is missing.
    pub fn from_attributes(attrs: &DeviceAttributes) -> Result<DeviceIdentity, DeviceError> {
        let mut slots = [[0u8; SLOT_SIZE]; SLOT_COUNT];

        if let Some(machine_id) = non_empty(&attrs.machine_id) {
            slots[0] = slot_digest("machine", &[machine_id]);
        }
        if let Some(mac) = non_empty(&attrs.mac_address) {
            let mac = mac.to_ascii_lowercase();
            slots[1] = slot_digest("network", &[mac.as_str()]);
        }
        if let Some(hostname) = non_empty(&attrs.hostname) {
            slots[2] = slot_digest("host", &[hostname, env::consts::OS, env::consts::ARCH]);
        }

        DeviceIdentity::from_slots(slots).map_err(|_| {
            DeviceError::Unavailable(
                "no machine id, network address or hostname could be read".to_string(),
            )
        })
    }
}

impl DeviceSource for DeviceFingerprint {
    fn identity(&self) -> Result<DeviceIdentity, DeviceError> {
        Self::current()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn slot_digest(domain: &str, parts: &[&str]) -> [u8; SLOT_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(domain.as_bytes());
    for part in parts {
        hasher.update([0u8]);
        hasher.update(part.as_bytes());
    }
    let hash = hasher.finalize();

    let mut slot = [0u8; SLOT_SIZE];
    slot.copy_from_slice(&hash[..SLOT_SIZE]);
    slot
}

/// Gets the machine hostname.
fn get_hostname() -> Option<String> {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
}

/// Gets the OS version string.
fn get_os_version() -> String {
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("sw_vers")
            .arg("-productVersion")
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/etc/os-release")
            .ok()
            .and_then(|content| {
                content
                    .lines()
                    .find(|l| l.starts_with("VERSION_ID="))
                    .map(|l| {
                        l.trim_start_matches("VERSION_ID=")
                            .trim_matches('"')
                            .to_string()
                    })
            })
            .unwrap_or_else(|| "unknown".to_string())
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        env::consts::OS.to_string()
    }
}

/// Gets the machine ID (platform-specific unique identifier).
fn get_machine_id() -> Option<String> {
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("ioreg")
            .args(["-rd1", "-c", "IOPlatformExpertDevice"])
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .and_then(|output| {
                output
                    .lines()
                    .find(|l| l.contains("IOPlatformUUID"))
                    .and_then(|l| l.split('"').nth(3))
                    .map(String::from)
            })
    }

    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/etc/machine-id")
            .or_else(|_| std::fs::read_to_string("/var/lib/dbus/machine-id"))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("reg")
            .args([
                "query",
                r"HKLM\SOFTWARE\Microsoft\Cryptography",
                "/v",
                "MachineGuid",
            ])
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .and_then(|output| {
                output
                    .lines()
                    .find(|l| l.contains("MachineGuid"))
                    .and_then(|l| l.split_whitespace().last())
                    .map(String::from)
            })
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
    {
        None
    }
}

/// Gets the hardware address of the primary physical interface.
fn get_primary_mac() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        // Physical interfaces expose a `device` link; virtual ones do not.
        let mut names: Vec<String> = std::fs::read_dir("/sys/class/net")
            .ok()?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name != "lo")
            .collect();
        names.sort();

        names.into_iter().find_map(|name| {
            let base = std::path::Path::new("/sys/class/net").join(&name);
            if !base.join("device").exists() {
                return None;
            }
            std::fs::read_to_string(base.join("address"))
                .ok()
                .map(|a| a.trim().to_string())
                .filter(|a| is_usable_mac(a))
        })
    }

    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("ifconfig")
            .arg("en0")
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .and_then(|output| {
                output
                    .lines()
                    .map(str::trim)
                    .find(|l| l.starts_with("ether "))
                    .and_then(|l| l.split_whitespace().nth(1))
                    .map(String::from)
            })
            .filter(|a| is_usable_mac(a))
    }

    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("getmac")
            .args(["/fo", "csv", "/nh"])
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .and_then(|output| {
                output
                    .lines()
                    .filter_map(|l| l.split(',').next())
                    .map(|a| a.trim_matches('"').replace('-', ":"))
                    .find(|a| is_usable_mac(a))
            })
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
    {
        None
    }
}

#[cfg_attr(
    not(any(target_os = "macos", target_os = "windows", target_os = "linux")),
    allow(dead_code)
)]
fn is_usable_mac(address: &str) -> bool {
    address.len() == 17 && address.chars().any(|c| c != '0' && c != ':')
}
