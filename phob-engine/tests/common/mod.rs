//! Shared test helpers for engine tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use phob_crypto::{KdfParams, SecretString};
use phob_engine::{BuildConfig, ExecReport, Executor, LoadSecrets, Loader, SourceBundle};
use phob_license::{
    DeviceBinding, DeviceError, DeviceIdentity, DeviceSource, LicenseConfig, LicenseId,
    SLOT_COUNT, SLOT_SIZE,
};

pub const KEY: &str = "0123456789abcdef";
pub const PASS: &str = "correct horse battery staple";
pub const LICENSE: &str = "ACME-2024-0001";

pub const INDEX_PHP: &str = "<?php\nrequire 'lib/util.php';\necho greet('world'); // SECRET_MARKER\n";
pub const UTIL_PHP: &str = "<?php\nfunction greet($who) { return \"hello {$who}\"; }\n";
pub const CONFIG_PHP: &str = "<?php\nreturn ['db' => 'sqlite'];\n";
pub const LOGO_PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0xff];

/// Cheap Argon2 parameters so tests stay fast.
pub fn fast_kdf() -> KdfParams {
    KdfParams {
        memory_cost: 64,
        time_cost: 1,
        parallelism: 1,
    }
}

pub fn identity(machine: u8, network: u8, host: u8) -> DeviceIdentity {
    let slots: [[u8; SLOT_SIZE]; SLOT_COUNT] =
        [[machine; SLOT_SIZE], [network; SLOT_SIZE], [host; SLOT_SIZE]];
    DeviceIdentity::from_slots(slots).unwrap()
}

pub fn device(machine: u8, network: u8, host: u8) -> Arc<dyn DeviceSource> {
    Arc::new(identity(machine, network, host))
}

/// A machine whose fingerprint cannot be read.
pub struct NoDevice;

impl DeviceSource for NoDevice {
    fn identity(&self) -> Result<DeviceIdentity, DeviceError> {
        Err(DeviceError::Unavailable("sandboxed".into()))
    }
}

pub fn license_config(device: DeviceBinding, expiry: Option<DateTime<Utc>>) -> LicenseConfig {
    LicenseConfig {
        key: SecretString::from(KEY),
        pass: SecretString::from(PASS),
        license: LicenseId::parse(LICENSE).unwrap(),
        device,
        expiry,
        allow_expired: false,
    }
}

pub fn build_config(device: DeviceBinding) -> BuildConfig {
    BuildConfig::new(license_config(device, None)).with_kdf(fast_kdf())
}

pub fn secrets() -> LoadSecrets {
    LoadSecrets::new(KEY, PASS)
}

pub fn write_file(root: &Path, relative: &str, contents: &[u8]) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

/// index.php, lib/util.php, config.php and assets/logo.png.
pub fn sample_tree(root: &Path) {
    write_file(root, "index.php", INDEX_PHP.as_bytes());
    write_file(root, "lib/util.php", UTIL_PHP.as_bytes());
    write_file(root, "config.php", CONFIG_PHP.as_bytes());
    write_file(root, "assets/logo.png", LOGO_PNG);
}

/// One call to [`Recording::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRun {
    pub entry: String,
    pub entry_source: Vec<u8>,
    pub root: PathBuf,
    pub files: BTreeMap<String, Vec<u8>>,
}

impl RecordedRun {
    pub fn paths(&self) -> Vec<&str> {
        self.files.keys().map(String::as_str).collect()
    }
}

/// Executor that records what it was given instead of running it.
#[derive(Default)]
pub struct Recording {
    runs: Mutex<Vec<RecordedRun>>,
}

impl Recording {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn runs(&self) -> Vec<RecordedRun> {
        self.runs.lock().unwrap().clone()
    }
}

impl Executor for Recording {
    fn execute(&self, bundle: &SourceBundle) -> anyhow::Result<ExecReport> {
        self.runs.lock().unwrap().push(RecordedRun {
            entry: bundle.entry().to_string(),
            entry_source: bundle.entry_source().to_vec(),
            root: bundle.root().to_path_buf(),
            files: bundle
                .files()
                .map(|(path, contents)| (path.to_string(), contents.to_vec()))
                .collect(),
        });
        Ok(ExecReport { exit_code: 0 })
    }
}

pub fn loader(device: Arc<dyn DeviceSource>, executor: Arc<Recording>) -> Loader {
    Loader::new(secrets(), executor).with_device(device)
}

/// Files directly under `dir`, sorted, for checking that nothing leaked.
pub fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
