//! Shim sandbox
//!
//! A throwaway directory holding one executable per impersonated tool plus an
//! interpreter alias. Prepending it to `PATH` makes every lookup of those
//! names land on the shims instead of a system installation.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use rules_ansible_core::process::HOME;
use rules_ansible_core::{CoreError, ProcessEnvironment};
use tempfile::TempDir;
use thiserror::Error;
use tracing::debug;

/// Name of the shim directory inside the sandbox
pub const SHIM_DIR: &str = "_fakepath";

/// Names the running interpreter is also reachable as
#[cfg(not(windows))]
pub const INTERPRETER_ALIASES: &[&str] = &["python3"];
#[cfg(windows)]
pub const INTERPRETER_ALIASES: &[&str] = &["python3", "python3.exe"];

#[derive(Error, Debug)]
pub enum ShimError {
    #[error("Invalid tool name: '{0}'")]
    InvalidToolName(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A prepared shim directory, removed when dropped
#[derive(Debug)]
pub struct ShimSandbox {
    root: TempDir,
    bin_dir: PathBuf,
    tools: Vec<String>,
}

impl ShimSandbox {
    /// Create a fresh sandbox under `base` with one shim per entrypoint
    pub fn prepare(
        entrypoints: &BTreeMap<String, String>,
        interpreter: &Path,
        base: &Path,
    ) -> Result<Self, ShimError> {
        for tool in entrypoints.keys() {
            validate_tool_name(tool)?;
        }

        fs::create_dir_all(base)?;
        let root = tempfile::Builder::new()
            .prefix("ansible-shims-")
            .tempdir_in(base)?;
        let bin_dir = root.path().join(SHIM_DIR);
        fs::create_dir_all(&bin_dir)?;

        for (tool, source) in entrypoints {
            let content = format!("#!{}\n{}", interpreter.display(), source);
            write_executable(&bin_dir.join(tool), &content)?;
        }

        for alias in INTERPRETER_ALIASES {
            link_interpreter(interpreter, &bin_dir.join(alias))?;
        }

        debug!(
            "Prepared {} shims in {}",
            entrypoints.len(),
            bin_dir.display()
        );

        Ok(Self {
            root,
            bin_dir,
            tools: entrypoints.keys().cloned().collect(),
        })
    }

    /// Directory to put first on the search path
    pub fn path(&self) -> &Path {
        &self.bin_dir
    }

    /// Sandbox root containing the shim directory
    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn tools(&self) -> &[String] {
        &self.tools
    }

    pub fn shim(&self, tool: &str) -> PathBuf {
        self.bin_dir.join(tool)
    }

    /// Route tool lookups through the shims and isolate `HOME` inside them
    pub fn apply(&self, env: &mut ProcessEnvironment) -> Result<(), ShimError> {
        env.prepend_search_path(&self.bin_dir)?;
        env.set(HOME, &self.bin_dir);
        Ok(())
    }
}

fn validate_tool_name(tool: &str) -> Result<(), ShimError> {
    let valid = !tool.is_empty()
        && tool != "."
        && tool != ".."
        && !tool.contains(['/', '\\'])
        && !INTERPRETER_ALIASES.contains(&tool);
    if valid {
        Ok(())
    } else {
        Err(ShimError::InvalidToolName(tool.to_string()))
    }
}

fn write_executable(path: &Path, content: &str) -> std::io::Result<()> {
    fs::write(path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    }

    Ok(())
}

#[cfg(unix)]
fn link_interpreter(interpreter: &Path, alias: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(interpreter, alias)
}

#[cfg(windows)]
fn link_interpreter(interpreter: &Path, alias: &Path) -> std::io::Result<()> {
    // Symlinks need extra privileges on Windows; a copy resolves the same way
    std::os::windows::fs::symlink_file(interpreter, alias)
        .or_else(|_| fs::copy(interpreter, alias).map(|_| ()))
}

#[cfg(not(any(unix, windows)))]
fn link_interpreter(interpreter: &Path, alias: &Path) -> std::io::Result<()> {
    fs::copy(interpreter, alias).map(|_| ())
}
