//! The `Phob` handle: one configured engine instance.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use phob_container::{Metadata, SealedContainer};
use phob_crypto::KdfParams;
use phob_license::{DeviceError, DeviceFingerprint, DeviceIdentity, DeviceSource, RevocationPolicy};
use tracing::{debug, warn};

use crate::builder::{BuildConfig, BuildReport, Builder};
use crate::executor::{Executor, ProcessExecutor};
use crate::loader::{ExecutionOutcome, LoadSecrets, Loader};
use crate::syntax::{ScriptSyntax, SourceCheck};
use crate::validator::LicenseValidator;
use crate::{BuildError, LoadError};

/// Runtime settings for loading containers.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Secrets used to open containers. Required by [`Phob::run`].
    pub secrets: Option<LoadSecrets>,
    /// Revocation enforcement.
    pub revocation: RevocationPolicy,
}

/// Outcome of [`Phob::probe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Ready { device: DeviceIdentity },
    Unavailable { reason: String },
}

impl Availability {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

/// A container read without checking its tag.
///
/// Everything here may be forged; use it for diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inspection {
    pub version: u16,
    pub kdf: KdfParams,
    pub bytes: u64,
    pub metadata: Metadata,
}

/// Engine handle.
///
/// ```no_run
/// use phob_engine::{EngineConfig, LoadSecrets, Phob};
///
/// let phob = Phob::new(EngineConfig {
///     secrets: Some(LoadSecrets::new("key", "pass")),
///     ..Default::default()
/// });
/// if phob.probe().is_ready() {
///     phob.run("dist/app.phob".as_ref()).ok();
/// }
/// ```
#[derive(Clone)]
pub struct Phob {
    config: EngineConfig,
    device: Arc<dyn DeviceSource>,
    executor: Arc<dyn Executor>,
    check: Arc<dyn SourceCheck>,
}

impl std::fmt::Debug for Phob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Phob")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Phob {
    /// Creates an engine using this machine's fingerprint and the default
    /// PHP interpreter.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            device: Arc::new(DeviceFingerprint),
            executor: Arc::new(ProcessExecutor::default()),
            check: Arc::new(ScriptSyntax),
        }
    }

    pub fn with_device(mut self, device: Arc<dyn DeviceSource>) -> Self {
        self.device = device;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_check(mut self, check: Arc<dyn SourceCheck>) -> Self {
        self.check = check;
        self
    }

    /// Checks that the device fingerprint and the runtime are usable.
    pub fn probe(&self) -> Availability {
        let device = match self.device.identity() {
            Ok(device) => device,
            Err(e) => {
                warn!(error = %e, "Device fingerprint unavailable");
                return Availability::Unavailable {
                    reason: e.to_string(),
                };
            }
        };
        if let Err(reason) = self.executor.available() {
            warn!(%reason, "Executor unavailable");
            return Availability::Unavailable { reason };
        }
        debug!(%device, "Engine ready");
        Availability::Ready { device }
    }

    /// This machine's device identity string.
    pub fn device_id(&self) -> Result<String, DeviceError> {
        Ok(self.device.identity()?.to_string())
    }

    pub fn build(
        &self,
        input: &Path,
        output: &Path,
        config: &BuildConfig,
    ) -> Result<BuildReport, BuildError> {
        self.builder().build(input, output, config)
    }

    pub fn build_at(
        &self,
        input: &Path,
        output: &Path,
        config: &BuildConfig,
        now: DateTime<Utc>,
    ) -> Result<BuildReport, BuildError> {
        self.builder().build_at(input, output, config, now)
    }

    pub fn run(&self, input: &Path) -> Result<ExecutionOutcome, LoadError> {
        self.run_at(input, Utc::now())
    }

    pub fn run_at(&self, input: &Path, now: DateTime<Utc>) -> Result<ExecutionOutcome, LoadError> {
        self.loader()?.execute_at(input, now)
    }

    /// Reads container metadata without authenticating it.
    pub fn inspect(&self, input: &Path) -> Result<Inspection, LoadError> {
        let container = SealedContainer::read(input)?;
        Ok(Inspection {
            version: container.version(),
            kdf: *container.kdf(),
            bytes: container.len() as u64,
            metadata: container.metadata_unverified()?,
        })
    }

    fn builder(&self) -> Builder {
        Builder::new(Arc::clone(&self.device)).with_check(Arc::clone(&self.check))
    }

    fn loader(&self) -> Result<Loader, LoadError> {
        let secrets = self
            .config
            .secrets
            .clone()
            .ok_or_else(|| LoadError::NotConfigured("no key/pass configured".to_string()))?;
        Ok(Loader::new(secrets, Arc::clone(&self.executor))
            .with_device(Arc::clone(&self.device))
            .with_validator(LicenseValidator::new(self.config.revocation.clone())))
    }
}
