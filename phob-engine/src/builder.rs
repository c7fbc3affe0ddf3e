//! Turns a source tree into a protected output directory.
//!
//! Files are read, checked and sealed in parallel; the manifest and frame
//! are assembled on the calling thread, and the tag is computed last. The
//! output is staged beside its final location and renamed into place only
//! once everything has been written.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use phob_container::{ManifestEntry, Metadata, SealedContainer, DEFAULT_CONTAINER_NAME, ENGINE_ID};
use phob_crypto::{
    derive_keys, derive_nonce, random_nonce, seal, ContainerKeys, KdfParams, Salt, NONCE_SIZE,
    SALT_SIZE,
};
use phob_license::{Constraints, DeviceFingerprint, DeviceSource, LicenseConfig};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::source::{normalize_relative, SkipList, SourceFile, SourceTree};
use crate::syntax::{ScriptSyntax, SourceCheck};
use crate::BuildError;

/// Entry point picked when a tree has several files and none is configured.
pub const DEFAULT_ENTRY: &str = "index.php";

const STAGING_PREFIX: &str = ".phob-staging-";

/// How salts and nonces are chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoncePolicy {
    /// Fresh salt and nonces on every build.
    #[default]
    Random,
    /// Salt and nonces derived from the inputs; identical inputs produce
    /// byte-identical containers.
    Deterministic,
}

fn default_container_name() -> String {
    DEFAULT_CONTAINER_NAME.to_string()
}

/// Everything a build needs besides the source and output paths.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildConfig {
    #[serde(flatten)]
    pub license: LicenseConfig,
    #[serde(default)]
    pub skip: SkipList,
    #[serde(default)]
    pub entry: Option<String>,
    #[serde(default = "default_container_name")]
    pub container_name: String,
    #[serde(default)]
    pub nonce_policy: NoncePolicy,
    #[serde(default)]
    pub kdf: KdfParams,
}

impl BuildConfig {
    pub fn new(license: LicenseConfig) -> Self {
        Self {
            license,
            skip: SkipList::default(),
            entry: None,
            container_name: default_container_name(),
            nonce_policy: NoncePolicy::default(),
            kdf: KdfParams::default(),
        }
    }

    pub fn with_skip(mut self, skip: SkipList) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = Some(entry.into());
        self
    }

    pub fn with_container_name(mut self, name: impl Into<String>) -> Self {
        self.container_name = name.into();
        self
    }

    pub fn with_nonce_policy(mut self, policy: NoncePolicy) -> Self {
        self.nonce_policy = policy;
        self
    }

    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    fn validate(&self, now: DateTime<Utc>) -> Result<(), BuildError> {
        self.license.validate(now)?;
        self.kdf
            .validate()
            .map_err(|e| BuildError::InvalidConfig(e.to_string()))?;

        let name = self.container_name.as_str();
        if normalize_relative(name).as_deref() != Some(name) || name.contains('/') {
            return Err(BuildError::InvalidConfig(format!(
                "container name {name:?} must be a plain file name"
            )));
        }
        if self.skip.contains(name) {
            return Err(BuildError::InvalidConfig(format!(
                "skipped file {name} would overwrite the container"
            )));
        }
        Ok(())
    }
}

/// Summary of a successful build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    /// Path of the container file.
    pub container: PathBuf,
    /// Output directory.
    pub output: PathBuf,
    /// Protected files, sorted.
    pub protected: Vec<String>,
    /// Files copied verbatim, sorted.
    pub skipped: Vec<String>,
    /// Entry point recorded in the container.
    pub entry: String,
    /// Constraints embedded in the container.
    pub constraints: Constraints,
    /// Container size in bytes.
    pub bytes: u64,
}

/// A file after it has been checked and sealed.
struct SealedFile {
    path: String,
    size: u64,
    sha256: String,
    nonce: [u8; NONCE_SIZE],
    segment: Vec<u8>,
}

/// Builds protected containers.
#[derive(Clone)]
pub struct Builder {
    device: Arc<dyn DeviceSource>,
    check: Arc<dyn SourceCheck>,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new(Arc::new(DeviceFingerprint))
    }
}

impl std::fmt::Debug for Builder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder").finish_non_exhaustive()
    }
}

impl Builder {
    /// Creates a builder that resolves `this` bindings through `device`.
    pub fn new(device: Arc<dyn DeviceSource>) -> Self {
        Self {
            device,
            check: Arc::new(ScriptSyntax),
        }
    }

    /// Replaces the per-file source check.
    pub fn with_check(mut self, check: Arc<dyn SourceCheck>) -> Self {
        self.check = check;
        self
    }

    /// Protects `source` into the directory `output`.
    pub fn build(
        &self,
        source: &Path,
        output: &Path,
        config: &BuildConfig,
    ) -> Result<BuildReport, BuildError> {
        self.build_at(source, output, config, Utc::now())
    }

    /// Like [`Builder::build`], with an explicit clock for expiry checks.
    pub fn build_at(
        &self,
        source: &Path,
        output: &Path,
        config: &BuildConfig,
        now: DateTime<Utc>,
    ) -> Result<BuildReport, BuildError> {
        config.validate(now)?;

        let tree = SourceTree::scan(source)?;

        let (protected, skipped) = tree.partition(&config.skip);
        let present: BTreeSet<&str> = tree.files().iter().map(|f| f.relative.as_str()).collect();
        for missing in config.skip.iter().filter(|p| !present.contains(p)) {
            warn!(path = %missing, "Skip entry not found in source tree");
        }
        if protected.is_empty() {
            return Err(BuildError::InvalidSource(
                "no files left to protect after applying the skip list".to_string(),
            ));
        }

        let entry = resolve_entry(config.entry.as_deref(), &protected, &skipped)?;
        let constraints = config.license.constraints(self.device.as_ref())?;
        let (output, parent) = prepare_output(&tree, output)?;

        info!(
            source = %source.display(),
            output = %output.display(),
            protected = protected.len(),
            skipped = skipped.len(),
            license = %constraints.license,
            device = %constraints.device,
            "Building container"
        );

        let salt = match config.nonce_policy {
            NoncePolicy::Random => Salt::random(),
            NoncePolicy::Deterministic => deterministic_salt(&constraints)?,
        };
        let keys = derive_keys(&config.license.key, &config.license.pass, &salt, &config.kdf)
            .map_err(|e| BuildError::InvalidConfig(format!("key derivation failed: {e}")))?;

        let sealed = self.seal_all(&protected, &keys, config.nonce_policy)?;

        // Single writer: segments are laid out in manifest order.
        let mut manifest = Vec::with_capacity(sealed.len());
        let mut ciphertext = Vec::new();
        for file in sealed {
            manifest.push(ManifestEntry {
                path: file.path,
                size: file.size,
                sha256: file.sha256,
                offset: ciphertext.len() as u64,
                length: file.segment.len() as u64,
                nonce: hex::encode(file.nonce),
            });
            ciphertext.extend_from_slice(&file.segment);
        }

        let metadata = Metadata {
            engine: ENGINE_ID.to_string(),
            constraints: constraints.clone(),
            entry: entry.clone(),
            manifest,
        };
        let frame = SealedContainer::encode(&config.kdf, &salt, &metadata, &ciphertext, &keys.mac)
            .map_err(|e| BuildError::WriteFailure(format!("cannot encode container: {e}")))?;

        write_output(&parent, &output, &config.container_name, &frame, &skipped)?;

        let container = output.join(&config.container_name);
        info!(
            container = %container.display(),
            bytes = frame.len(),
            entry = %entry,
            "Container built"
        );

        Ok(BuildReport {
            container,
            output,
            protected: metadata.manifest.iter().map(|e| e.path.clone()).collect(),
            skipped: skipped.into_iter().map(|f| f.relative).collect(),
            entry,
            constraints,
            bytes: frame.len() as u64,
        })
    }

    /// Reads, checks and seals every protected file on a bounded set of
    /// scoped workers. Results come back in input order.
    fn seal_all(
        &self,
        files: &[SourceFile],
        keys: &ContainerKeys,
        policy: NoncePolicy,
    ) -> Result<Vec<SealedFile>, BuildError> {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(files.len())
            .max(1);
        let chunk_size = files.len().div_ceil(workers);
        let check = self.check.as_ref();

        let results: Vec<Result<SealedFile, BuildError>> = std::thread::scope(|s| {
            let handles: Vec<_> = files
                .chunks(chunk_size)
                .map(|chunk| {
                    s.spawn(move || {
                        chunk
                            .iter()
                            .map(|file| seal_file(file, keys, check, policy))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|h| {
                    h.join().unwrap_or_else(|_| {
                        vec![Err(BuildError::WriteFailure(
                            "sealing worker panicked".to_string(),
                        ))]
                    })
                })
                .collect()
        });

        results.into_iter().collect()
    }
}

fn seal_file(
    file: &SourceFile,
    keys: &ContainerKeys,
    check: &dyn SourceCheck,
    policy: NoncePolicy,
) -> Result<SealedFile, BuildError> {
    let contents = fs::read(&file.absolute)
        .map_err(|e| BuildError::InvalidSource(format!("{}: {e}", file.relative)))?;

    check
        .check(&file.relative, &contents)
        .map_err(|reason| BuildError::InvalidSource(format!("{}: {reason}", file.relative)))?;

    let nonce = match policy {
        NoncePolicy::Random => random_nonce(),
        NoncePolicy::Deterministic => {
            derive_nonce(&keys.mac, &[file.relative.as_bytes(), contents.as_slice()])
                .map_err(|e| BuildError::WriteFailure(e.to_string()))?
        }
    };
    let segment = seal(&keys.encryption, &nonce, file.relative.as_bytes(), &contents)
        .map_err(|e| BuildError::WriteFailure(format!("{}: {e}", file.relative)))?;

    debug!(path = %file.relative, size = contents.len(), "Sealed file");

    Ok(SealedFile {
        path: file.relative.clone(),
        size: contents.len() as u64,
        sha256: hex::encode(Sha256::digest(&contents)),
        nonce,
        segment,
    })
}

/// Salt for deterministic builds: a hash of the public constraints.
fn deterministic_salt(constraints: &Constraints) -> Result<Salt, BuildError> {
    let encoded = serde_json::to_vec(constraints)
        .map_err(|e| BuildError::InvalidConfig(e.to_string()))?;
    let mut hasher = Sha256::new();
    hasher.update(b"phob.salt.v1");
    hasher.update([0u8]);
    hasher.update(&encoded);
    let digest = hasher.finalize();

    let mut bytes = [0u8; SALT_SIZE];
    bytes.copy_from_slice(&digest[..SALT_SIZE]);
    Ok(Salt::from_bytes(bytes))
}

fn resolve_entry(
    configured: Option<&str>,
    protected: &[SourceFile],
    skipped: &[SourceFile],
) -> Result<String, BuildError> {
    let is_protected = |path: &str| protected.iter().any(|f| f.relative == path);

    if let Some(raw) = configured {
        let entry = normalize_relative(raw).ok_or_else(|| {
            BuildError::InvalidConfig(format!("entry {raw:?} is not a relative path"))
        })?;
        if is_protected(&entry) {
            return Ok(entry);
        }
        if skipped.iter().any(|f| f.relative == entry) {
            return Err(BuildError::InvalidConfig(format!(
                "entry {entry} is in the skip list"
            )));
        }
        return Err(BuildError::InvalidConfig(format!(
            "entry {entry} not found in source tree"
        )));
    }

    if let [only] = protected {
        return Ok(only.relative.clone());
    }
    if is_protected(DEFAULT_ENTRY) {
        return Ok(DEFAULT_ENTRY.to_string());
    }
    Err(BuildError::InvalidConfig(format!(
        "cannot pick an entry point among {} files and no {DEFAULT_ENTRY}; set `entry`",
        protected.len()
    )))
}

/// Resolves the absolute output path and its parent, and checks that the
/// output may be written. Nothing is created here.
fn prepare_output(tree: &SourceTree, output: &Path) -> Result<(PathBuf, PathBuf), BuildError> {
    let name = output
        .file_name()
        .ok_or_else(|| {
            BuildError::InvalidConfig(format!("{} is not a usable output path", output.display()))
        })?
        .to_os_string();
    let parent = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let parent = resolve_existing(&parent)?;
    let output = parent.join(name);

    if !tree.is_single_file() {
        let root = tree
            .root()
            .canonicalize()
            .map_err(|e| BuildError::InvalidSource(format!("{}: {e}", tree.root().display())))?;
        if output.starts_with(&root) {
            return Err(BuildError::InvalidConfig(format!(
                "output {} is inside the source tree",
                output.display()
            )));
        }
    }

    match fs::symlink_metadata(&output) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(BuildError::WriteFailure(format!("{}: {e}", output.display()))),
        Ok(meta) if meta.is_dir() => {
            let mut entries = fs::read_dir(&output)
                .map_err(|e| BuildError::WriteFailure(format!("{}: {e}", output.display())))?;
            if entries.next().is_some() {
                return Err(BuildError::InvalidConfig(format!(
                    "output {} exists and is not empty",
                    output.display()
                )));
            }
        }
        Ok(_) => {
            return Err(BuildError::InvalidConfig(format!(
                "output {} exists and is not a directory",
                output.display()
            )));
        }
    }

    Ok((output, parent))
}

/// Canonicalizes the longest existing ancestor of `path` and appends the
/// missing rest.
fn resolve_existing(path: &Path) -> Result<PathBuf, BuildError> {
    let absolute = std::path::absolute(path)
        .map_err(|e| BuildError::WriteFailure(format!("{}: {e}", path.display())))?;
    for ancestor in absolute.ancestors() {
        if let Ok(real) = ancestor.canonicalize() {
            let rest = absolute
                .strip_prefix(ancestor)
                .map_err(|e| BuildError::WriteFailure(format!("{}: {e}", path.display())))?;
            return Ok(real.join(rest));
        }
    }
    Err(BuildError::WriteFailure(format!(
        "{}: no existing parent directory",
        path.display()
    )))
}

/// Creates `parent` if needed and writes the output below it. Directories
/// created here are removed again if the write fails.
fn write_output(
    parent: &Path,
    output: &Path,
    container_name: &str,
    frame: &[u8],
    skipped: &[SourceFile],
) -> Result<(), BuildError> {
    let created = parent
        .ancestors()
        .take_while(|dir| !dir.exists())
        .last()
        .map(Path::to_path_buf);

    let result = fs::create_dir_all(parent)
        .map_err(|e| BuildError::WriteFailure(format!("{}: {e}", parent.display())))
        .and_then(|()| stage_output(parent, output, container_name, frame, skipped));

    if result.is_err()
        && let Some(dir) = created
    {
        let _ = fs::remove_dir_all(&dir);
    }
    result
}

/// Writes the container and skipped files into a staging directory, then
/// renames it to `output`. On error the staging directory is removed and
/// `output` is left as it was.
fn stage_output(
    parent: &Path,
    output: &Path,
    container_name: &str,
    frame: &[u8],
    skipped: &[SourceFile],
) -> Result<(), BuildError> {
    let write_err = |path: &Path, e: std::io::Error| {
        BuildError::WriteFailure(format!("{}: {e}", path.display()))
    };

    let staging = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir_in(parent)
        .map_err(|e| write_err(parent, e))?;

    let container = staging.path().join(container_name);
    fs::write(&container, frame).map_err(|e| write_err(&container, e))?;

    for file in skipped {
        let target = staging.path().join(&file.relative);
        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir).map_err(|e| write_err(dir, e))?;
        }
        fs::copy(&file.absolute, &target).map_err(|e| write_err(&file.absolute, e))?;
        debug!(path = %file.relative, "Copied skipped file");
    }

    if output.is_dir() {
        fs::remove_dir(output).map_err(|e| write_err(output, e))?;
    }
    fs::rename(staging.path(), output).map_err(|e| write_err(output, e))?;
    let _ = staging.keep();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(paths: &[&str]) -> Vec<SourceFile> {
        paths
            .iter()
            .map(|p| SourceFile {
                relative: p.to_string(),
                absolute: PathBuf::from(p),
            })
            .collect()
    }

    #[test]
    fn entry_defaults() {
        assert_eq!(resolve_entry(None, &files(&["app.php"]), &[]).unwrap(), "app.php");
        assert_eq!(
            resolve_entry(None, &files(&["a.php", "index.php"]), &[]).unwrap(),
            "index.php"
        );
        assert!(resolve_entry(None, &files(&["a.php", "b.php"]), &[]).is_err());
    }

    #[test]
    fn explicit_entry_must_be_protected() {
        let protected = files(&["a.php", "lib/b.php"]);
        let skipped = files(&["config.php"]);
        assert_eq!(
            resolve_entry(Some("./lib/b.php"), &protected, &skipped).unwrap(),
            "lib/b.php"
        );
        assert!(matches!(
            resolve_entry(Some("config.php"), &protected, &skipped),
            Err(BuildError::InvalidConfig(msg)) if msg.contains("skip list")
        ));
        assert!(resolve_entry(Some("missing.php"), &protected, &skipped).is_err());
    }

    #[test]
    fn nonce_policy_names() {
        let p: NoncePolicy = serde_json::from_str("\"deterministic\"").unwrap();
        assert_eq!(p, NoncePolicy::Deterministic);
        assert_eq!(NoncePolicy::default(), NoncePolicy::Random);
    }
}
