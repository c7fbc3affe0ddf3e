//! Source tree enumeration and the skip list.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use walkdir::WalkDir;

use crate::BuildError;

/// Normalizes a relative path to `/` separators without `.` components.
///
/// Returns `None` for absolute paths or paths that escape the root.
pub fn normalize_relative(path: &str) -> Option<String> {
    let unified = path.trim().replace('\\', "/");
    let mut parts = Vec::new();
    for part in unified.split('/') {
        match part {
            "" | "." => {}
            ".." => return None,
            other => parts.push(other),
        }
    }
    if unified.starts_with('/') || parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Files copied verbatim instead of being protected.
///
/// Matching is by exact relative path after normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "Vec<String>")]
pub struct SkipList {
    paths: BTreeSet<String>,
}

impl SkipList {
    /// Creates a skip list, rejecting absolute or escaping paths.
    pub fn new<I, S>(paths: I) -> Result<Self, BuildError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = BTreeSet::new();
        for path in paths {
            let path = path.as_ref();
            let normalized = normalize_relative(path).ok_or_else(|| {
                BuildError::InvalidConfig(format!("skip entry {path:?} is not a relative path"))
            })?;
            set.insert(normalized);
        }
        Ok(Self { paths: set })
    }

    /// Returns true if `relative` is skipped.
    pub fn contains(&self, relative: &str) -> bool {
        self.paths.contains(relative)
    }

    /// Iterates over the normalized entries.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Returns true if nothing is skipped.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl TryFrom<Vec<String>> for SkipList {
    type Error = BuildError;

    fn try_from(paths: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(paths)
    }
}

/// A regular file found under the source root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Path relative to the root, `/`-separated.
    pub relative: String,
    /// Path on disk.
    pub absolute: PathBuf,
}

/// The files of a source root, sorted by relative path.
#[derive(Debug, Clone)]
pub struct SourceTree {
    root: PathBuf,
    single_file: bool,
    files: Vec<SourceFile>,
}

impl SourceTree {
    /// Enumerates every regular file under `root`.
    ///
    /// A file as `root` yields a one-file tree. Symlinks are not followed.
    pub fn scan(root: &Path) -> Result<Self, BuildError> {
        let meta = std::fs::metadata(root).map_err(|e| {
            BuildError::InvalidSource(format!("{}: {e}", root.display()))
        })?;

        if meta.is_file() {
            let name = root
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| {
                    BuildError::InvalidSource(format!("{}: unsupported file name", root.display()))
                })?;
            return Ok(Self {
                root: root.to_path_buf(),
                single_file: true,
                files: vec![SourceFile {
                    relative: name.to_string(),
                    absolute: root.to_path_buf(),
                }],
            });
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| BuildError::InvalidSource(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = relative_path(root, entry.path())?;
            files.push(SourceFile {
                relative,
                absolute: entry.into_path(),
            });
        }
        files.sort_by(|a, b| a.relative.cmp(&b.relative));

        Ok(Self {
            root: root.to_path_buf(),
            single_file: false,
            files,
        })
    }

    /// The scanned root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True if the root is a single file.
    pub fn is_single_file(&self) -> bool {
        self.single_file
    }

    /// All files, sorted by relative path.
    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }

    /// Splits the tree into (protected, skipped) by exact relative path.
    pub fn partition(&self, skip: &SkipList) -> (Vec<SourceFile>, Vec<SourceFile>) {
        self.files
            .iter()
            .cloned()
            .partition(|f| !skip.contains(&f.relative))
    }
}

fn relative_path(root: &Path, path: &Path) -> Result<String, BuildError> {
    let rel = path
        .strip_prefix(root)
        .map_err(|_| BuildError::InvalidSource(format!("{} escapes the root", path.display())))?;

    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str().ok_or_else(|| {
                BuildError::InvalidSource(format!("{}: path is not UTF-8", path.display()))
            })?),
            _ => {
                return Err(BuildError::InvalidSource(format!(
                    "{}: unexpected path component",
                    path.display()
                )));
            }
        }
    }
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_paths() {
        assert_eq!(normalize_relative("./a/b.php").as_deref(), Some("a/b.php"));
        assert_eq!(normalize_relative("a\\b.php").as_deref(), Some("a/b.php"));
        assert_eq!(normalize_relative("a//b.php").as_deref(), Some("a/b.php"));
        assert_eq!(normalize_relative("/etc/passwd"), None);
        assert_eq!(normalize_relative("../x.php"), None);
        assert_eq!(normalize_relative("."), None);
    }

    #[test]
    fn skip_list_rejects_escaping_entries() {
        assert!(SkipList::new(["../secret.php"]).is_err());
        let skip = SkipList::new(["./config.php", "assets/logo.png"]).unwrap();
        assert!(skip.contains("config.php"));
        assert!(!skip.contains("assets"));
        assert_eq!(skip.len(), 2);
    }
}
