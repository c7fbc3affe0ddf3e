//! Loading `phob.toml` and the runtime options of `phob run`.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use phob_crypto::SecretString;
use phob_engine::{BuildConfig, EngineConfig, LoadSecrets, NoncePolicy, SkipList};
use phob_license::{RevocationList, RevocationPolicy};
use tracing::debug;

/// Default build configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "phob.toml";

/// Reads a build configuration and applies command-line overrides.
pub fn load_build_config(
    path: &Path,
    extra_skip: &[String],
    deterministic: bool,
) -> Result<BuildConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut config = parse_build_config(&content)
        .with_context(|| format!("invalid configuration in {}", path.display()))?;

    if !extra_skip.is_empty() {
        let merged = config
            .skip
            .iter()
            .map(str::to_string)
            .chain(extra_skip.iter().cloned())
            .collect::<Vec<_>>();
        config.skip = SkipList::new(merged)?;
    }
    if deterministic {
        config.nonce_policy = NoncePolicy::Deterministic;
    }

    debug!(
        path = %path.display(),
        license = %config.license.license,
        device = %config.license.device,
        skip = config.skip.len(),
        "Loaded build configuration"
    );
    Ok(config)
}

/// Parses the TOML text of a build configuration.
pub fn parse_build_config(content: &str) -> Result<BuildConfig> {
    Ok(toml::from_str(content)?)
}

/// Options controlling how containers are opened.
#[derive(Debug, Default)]
pub struct RunOptions {
    pub key: Option<String>,
    pub pass: Option<String>,
    pub revocation_list: Option<std::path::PathBuf>,
    pub revocation_url: Option<String>,
    pub offline_tolerant: bool,
}

impl RunOptions {
    /// Turns the options into an engine configuration.
    pub fn engine_config(self) -> Result<EngineConfig> {
        let key = self.key.map(SecretString::from).unwrap_or_default();
        let pass = self.pass.map(SecretString::from).unwrap_or_default();
        let secrets = (!key.is_blank() && !pass.is_blank()).then(|| LoadSecrets { key, pass });

        let revocation = match (self.revocation_list, self.revocation_url) {
            (Some(_), Some(_)) => {
                anyhow::bail!("--revocation-list and --revocation-url are mutually exclusive")
            }
            (Some(path), None) => {
                let list = RevocationList::from_file(&path)
                    .with_context(|| format!("failed to load {}", path.display()))?;
                RevocationPolicy::with_check(Arc::new(list))
            }
            (None, Some(url)) => http_revocation(url)?,
            (None, None) => RevocationPolicy::none(),
        };

        Ok(EngineConfig {
            secrets,
            revocation: revocation.offline_tolerant(self.offline_tolerant),
        })
    }
}

#[cfg(feature = "online")]
fn http_revocation(url: String) -> Result<RevocationPolicy> {
    let check = phob_license::HttpRevocationCheck::new(url)?;
    Ok(RevocationPolicy::with_check(Arc::new(check)))
}

#[cfg(not(feature = "online"))]
fn http_revocation(_url: String) -> Result<RevocationPolicy> {
    anyhow::bail!("online revocation checks need phob built with the `online` feature")
}
