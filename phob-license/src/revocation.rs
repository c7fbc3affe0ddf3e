//! License revocation lookups.
//!
//! Revocation is optional. When a check is configured, lookup failures fail
//! closed unless the policy explicitly tolerates offline operation.

use crate::config::LicenseId;
use crate::error::{LicenseError, LicenseResult};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// A source of truth for revoked license identifiers.
pub trait RevocationCheck: Send + Sync {
    /// Returns `Ok(true)` if the license is revoked.
    ///
    /// Returns an error if the source could not be consulted.
    fn is_revoked(&self, license: &LicenseId) -> LicenseResult<bool>;
}

/// A fixed set of revoked license identifiers.
#[derive(Debug, Clone, Default)]
pub struct RevocationList {
    revoked: HashSet<String>,
}

impl RevocationList {
    /// Creates a list from identifiers.
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            revoked: ids.into_iter().map(Into::into).collect(),
        }
    }

    /// Parses a newline-separated list. Blank lines and `#` comments are skipped.
    pub fn parse(content: &str) -> Self {
        Self::new(
            content
                .lines()
                .map(|l| l.split('#').next().unwrap_or("").trim())
                .filter(|l| !l.is_empty()),
        )
    }

    /// Loads a list from a file.
    pub fn from_file(path: &Path) -> LicenseResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            LicenseError::RevocationUnavailable(format!(
                "cannot read {}: {e}",
                path.display()
            ))
        })?;
        Ok(Self::parse(&content))
    }

    /// Number of revoked identifiers.
    pub fn len(&self) -> usize {
        self.revoked.len()
    }

    /// Returns true if the list is empty.
    pub fn is_empty(&self) -> bool {
        self.revoked.is_empty()
    }
}

impl RevocationCheck for RevocationList {
    fn is_revoked(&self, license: &LicenseId) -> LicenseResult<bool> {
        Ok(self.revoked.contains(license.as_str()))
    }
}

/// How revocation is enforced at load time.
#[derive(Clone, Default)]
pub struct RevocationPolicy {
    check: Option<Arc<dyn RevocationCheck>>,
    offline_tolerant: bool,
}

impl RevocationPolicy {
    /// No revocation check is configured.
    pub fn none() -> Self {
        Self::default()
    }

    /// Uses `check` for every load.
    pub fn with_check(check: Arc<dyn RevocationCheck>) -> Self {
        Self {
            check: Some(check),
            offline_tolerant: false,
        }
    }

    /// Lets loads proceed when the check cannot be consulted.
    #[must_use]
    pub fn offline_tolerant(mut self, tolerant: bool) -> Self {
        self.offline_tolerant = tolerant;
        self
    }

    /// Returns true if a check is configured.
    pub fn is_configured(&self) -> bool {
        self.check.is_some()
    }

    /// Applies the policy to `license`.
    pub fn evaluate(&self, license: &LicenseId) -> LicenseResult<()> {
        let Some(check) = &self.check else {
            return Ok(());
        };

        match check.is_revoked(license) {
            Ok(false) => {
                debug!(license = %license, "License not revoked");
                Ok(())
            }
            Ok(true) => Err(LicenseError::Revoked),
            Err(e) if self.offline_tolerant => {
                warn!(license = %license, error = %e, "Revocation check unavailable, continuing offline");
                Ok(())
            }
            Err(e) => Err(LicenseError::RevocationUnavailable(e.to_string())),
        }
    }
}

impl std::fmt::Debug for RevocationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevocationPolicy")
            .field("configured", &self.check.is_some())
            .field("offline_tolerant", &self.offline_tolerant)
            .finish()
    }
}

#[cfg(feature = "online")]
pub use online::HttpRevocationCheck;

#[cfg(feature = "online")]
mod online {
    use super::*;
    use serde::Deserialize;
    use std::time::Duration;

    /// Default lookup timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    #[derive(Debug, Deserialize)]
    struct RevocationResponse {
        revoked: bool,
    }

    /// Revocation lookup against `GET {endpoint}/{license}`.
    ///
    /// `200 {"revoked": bool}` is authoritative, `404` means unknown (not
    /// revoked); anything else, including a timeout, is an error.
    pub struct HttpRevocationCheck {
        client: reqwest::blocking::Client,
        endpoint: String,
    }

    impl HttpRevocationCheck {
        /// Creates a check with [`DEFAULT_TIMEOUT`].
        pub fn new(endpoint: impl Into<String>) -> LicenseResult<Self> {
            Self::with_timeout(endpoint, DEFAULT_TIMEOUT)
        }

        /// Creates a check with an explicit timeout.
        pub fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> LicenseResult<Self> {
            let client = reqwest::blocking::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| LicenseError::Network(e.to_string()))?;
            Ok(Self {
                client,
                endpoint: endpoint.into().trim_end_matches('/').to_string(),
            })
        }
    }

    impl RevocationCheck for HttpRevocationCheck {
        fn is_revoked(&self, license: &LicenseId) -> LicenseResult<bool> {
            let url = format!("{}/{}", self.endpoint, license);
            let response = self
                .client
                .get(&url)
                .send()
                .map_err(|e| LicenseError::Network(e.to_string()))?;

            match response.status() {
                reqwest::StatusCode::NOT_FOUND => Ok(false),
                status if status.is_success() => response
                    .json::<RevocationResponse>()
                    .map(|r| r.revoked)
                    .map_err(|e| LicenseError::Network(e.to_string())),
                status => Err(LicenseError::Network(format!("unexpected status {status}"))),
            }
        }
    }
}
