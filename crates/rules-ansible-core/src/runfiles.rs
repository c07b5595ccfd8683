//! Bazel runfile index
//!
//! Inside a build action or test, declared inputs are exposed through either a
//! manifest file (`<key> <path>` per line) or a runfiles directory tree. Keys
//! are workspace-qualified paths such as `my_workspace/pkg/site.yml`.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::error::{CoreError, Result};

pub const RUNFILES_MANIFEST_FILE: &str = "RUNFILES_MANIFEST_FILE";
pub const RUNFILES_DIR: &str = "RUNFILES_DIR";
pub const TEST_SRCDIR: &str = "TEST_SRCDIR";

/// A build-provided mapping from runfile keys to on-disk paths
#[derive(Debug, Clone)]
pub enum Runfiles {
    Manifest(HashMap<String, PathBuf>),
    Directory(PathBuf),
}

impl Runfiles {
    pub fn from_env() -> Result<Self> {
        let argv0 = std::env::args_os().next().map(PathBuf::from);
        Self::from_lookup(|name| std::env::var(name).ok(), argv0.as_deref())
    }

    /// Discover the index from the environment, then from next to the binary
    pub fn from_lookup<F>(lookup: F, argv0: Option<&Path>) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |name: &str| lookup(name).filter(|value| !value.is_empty());

        if let Some(manifest) = set(RUNFILES_MANIFEST_FILE) {
            return Self::from_manifest(Path::new(&manifest));
        }

        if let Some(dir) = set(RUNFILES_DIR).or_else(|| set(TEST_SRCDIR)) {
            return Ok(Self::Directory(PathBuf::from(dir)));
        }

        if let Some(argv0) = argv0 {
            let manifest = with_suffix(argv0, ".runfiles_manifest");
            if manifest.is_file() {
                return Self::from_manifest(&manifest);
            }
            let dir = with_suffix(argv0, ".runfiles");
            if dir.is_dir() {
                return Ok(Self::Directory(dir));
            }
        }

        Err(CoreError::NoRunfiles)
    }

    /// Parse a runfiles manifest
    pub fn from_manifest(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let entries = content
            .lines()
            .filter(|line| !line.is_empty())
            .map(|line| match line.split_once(' ') {
                Some((key, value)) => (key.to_string(), PathBuf::from(value)),
                None => (line.to_string(), PathBuf::new()),
            })
            .collect::<HashMap<_, _>>();

        debug!("Loaded {} runfile entries from {}", entries.len(), path.display());
        Ok(Self::Manifest(entries))
    }

    pub fn from_directory(path: impl Into<PathBuf>) -> Self {
        Self::Directory(path.into())
    }

    /// Look up a workspace-qualified key
    pub fn rlocation(&self, key: &str) -> Result<PathBuf> {
        let key_path = Path::new(key);
        if key_path.is_absolute() {
            return Ok(key_path.to_path_buf());
        }

        if key.is_empty()
            || key_path
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(CoreError::NotFound(format!("invalid runfile key: {}", key)));
        }

        match self {
            Self::Manifest(entries) => lookup_manifest(entries, key_path)
                .ok_or_else(|| CoreError::NotFound(format!("runfile: {}", key))),
            Self::Directory(dir) => {
                let path = dir.join(key_path);
                if path.exists() {
                    Ok(path)
                } else {
                    Err(CoreError::NotFound(format!("runfile: {}", key)))
                }
            }
        }
    }
}

/// Exact match first, then the longest directory prefix present in the manifest
fn lookup_manifest(entries: &HashMap<String, PathBuf>, key: &Path) -> Option<PathBuf> {
    let mut prefix = Some(key);
    while let Some(candidate) = prefix {
        let lookup_key = candidate.to_string_lossy();
        if let Some(value) = entries.get(lookup_key.as_ref()) {
            if value.as_os_str().is_empty() {
                return None;
            }
            let rest = key.strip_prefix(candidate).ok()?;
            return Some(if rest.as_os_str().is_empty() {
                value.clone()
            } else {
                value.join(rest)
            });
        }
        prefix = candidate.parent().filter(|p| !p.as_os_str().is_empty());
    }
    None
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw: OsString = path.as_os_str().to_owned();
    raw.push(suffix);
    PathBuf::from(raw)
}
