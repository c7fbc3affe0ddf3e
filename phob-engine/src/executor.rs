//! Hand-off of recovered sources to a runtime.

use std::collections::BTreeMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{bail, Context};
use tracing::debug;
use zeroize::{Zeroize, Zeroizing};

use crate::bootstrap;

/// Default interpreter for [`ProcessExecutor`].
pub const DEFAULT_INTERPRETER: &str = "php";

/// Decrypted sources of one container. Plaintext is wiped on drop.
pub struct SourceBundle {
    entry: String,
    root: PathBuf,
    files: BTreeMap<String, Vec<u8>>,
}

impl SourceBundle {
    pub(crate) fn new(entry: String, root: PathBuf, files: BTreeMap<String, Vec<u8>>) -> Self {
        Self { entry, root, files }
    }

    pub(crate) fn insert(&mut self, path: String, contents: Vec<u8>) -> &[u8] {
        self.files.entry(path).or_insert(contents).as_slice()
    }

    /// Relative path of the entry point.
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Directory holding the container and its skipped files. Protected
    /// paths are relative to it.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Contents of the entry point.
    pub fn entry_source(&self) -> &[u8] {
        self.files.get(&self.entry).map(Vec::as_slice).unwrap_or_default()
    }

    /// Contents of `path`, if it was protected.
    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    /// Protected paths, sorted.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// Protected paths with their contents, sorted by path.
    pub fn files(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.files
            .iter()
            .map(|(path, contents)| (path.as_str(), contents.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl std::fmt::Debug for SourceBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceBundle")
            .field("entry", &self.entry)
            .field("root", &self.root)
            .field("files", &self.files.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Drop for SourceBundle {
    fn drop(&mut self) {
        for contents in self.files.values_mut() {
            contents.zeroize();
        }
    }
}

/// What an executor reports back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecReport {
    pub exit_code: i32,
}

/// Runs a decrypted bundle.
///
/// Errors are surfaced unchanged to the caller as runtime failures.
pub trait Executor: Send + Sync {
    fn execute(&self, bundle: &SourceBundle) -> anyhow::Result<ExecReport>;

    /// Reports whether the runtime can be used at all.
    fn available(&self) -> Result<(), String> {
        Ok(())
    }
}

impl<F> Executor for F
where
    F: Fn(&SourceBundle) -> anyhow::Result<ExecReport> + Send + Sync,
{
    fn execute(&self, bundle: &SourceBundle) -> anyhow::Result<ExecReport> {
        self(bundle)
    }
}

/// How a bundle is handed to the interpreter's stdin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandOff {
    /// Only the entry point is piped. Other protected files are not
    /// reachable, so this suits single-file scripts and non-PHP runtimes.
    Entry,
    /// A PHP prelude mounts every protected file in memory and then
    /// requires the entry point.
    Php,
}

impl HandOff {
    /// [`HandOff::Php`] for programs named like `php`, `php8.3` or
    /// `php.exe`, [`HandOff::Entry`] otherwise.
    pub fn for_program(program: &str) -> Self {
        let stem = Path::new(program)
            .file_stem()
            .map(|s| s.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if stem.starts_with("php") {
            Self::Php
        } else {
            Self::Entry
        }
    }

    fn script(self, bundle: &SourceBundle) -> Zeroizing<Vec<u8>> {
        match self {
            Self::Entry => Zeroizing::new(bundle.entry_source().to_vec()),
            Self::Php => bootstrap::render_php(bundle),
        }
    }
}

/// Runs a bundle in an external interpreter that reads its script from
/// stdin, with the bundle root as working directory.
///
/// The plaintext never touches the file system.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    program: String,
    args: Vec<String>,
    hand_off: HandOff,
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_INTERPRETER)
    }
}

impl ProcessExecutor {
    pub fn new(program: impl Into<String>) -> Self {
        let program = program.into();
        Self {
            hand_off: HandOff::for_program(&program),
            program,
            args: Vec::new(),
        }
    }

    /// Extra arguments passed before the script is read from stdin.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_hand_off(mut self, hand_off: HandOff) -> Self {
        self.hand_off = hand_off;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn hand_off(&self) -> HandOff {
        self.hand_off
    }
}

impl Executor for ProcessExecutor {
    fn execute(&self, bundle: &SourceBundle) -> anyhow::Result<ExecReport> {
        debug!(
            program = %self.program,
            entry = %bundle.entry(),
            root = %bundle.root().display(),
            hand_off = ?self.hand_off,
            "Starting interpreter"
        );

        let script = self.hand_off.script(bundle);
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(bundle.root())
            .stdin(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to start {}", self.program))?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(&script) {
                Ok(()) => {}
                // The interpreter may exit before reading everything.
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {}
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(e).context("failed to write script to interpreter");
                }
            }
        }

        let status = child
            .wait()
            .with_context(|| format!("failed to wait for {}", self.program))?;

        match status.code() {
            Some(0) => Ok(ExecReport { exit_code: 0 }),
            Some(code) => bail!("{} exited with status {code}", self.program),
            None => bail!("{} was terminated by a signal", self.program),
        }
    }

    fn available(&self) -> Result<(), String> {
        let status = Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| format!("interpreter {} not found: {e}", self.program))?;
        if status.success() {
            Ok(())
        } else {
            Err(format!("interpreter {} is not usable ({status})", self.program))
        }
    }
}
