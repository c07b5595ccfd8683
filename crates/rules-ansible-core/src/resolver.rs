//! Location resolution across sandboxed and workspace-relative execution
//!
//! `bazel test` runs inside a content-addressed sandbox where inputs are only
//! reachable through the runfile index. `bazel run` runs from the user's
//! workspace, where references are plain paths relative to the invoking
//! directory. A resolver is built once per process and passed by reference.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::env::TEST_WORKSPACE;
use crate::error::{CoreError, Result};
use crate::runfiles::Runfiles;

/// Marker for references that are already workspace-qualified
pub const PARENT_ESCAPE: &str = "../";

#[derive(Debug, Clone)]
pub enum ResolutionMode {
    /// Look references up in the runfile index of `workspace`
    Sandboxed { runfiles: Runfiles, workspace: String },
    /// Join references onto the invoking directory
    WorkspaceRelative { cwd: PathBuf },
}

#[derive(Debug, Clone)]
pub struct LocationResolver {
    mode: ResolutionMode,
}

impl LocationResolver {
    /// Select the mode from the environment: tests resolve through runfiles
    pub fn from_env() -> Result<Self> {
        match std::env::var(TEST_WORKSPACE) {
            Ok(workspace) => Ok(Self::sandboxed(Runfiles::from_env()?, workspace)),
            Err(_) => Ok(Self::workspace_relative(std::env::current_dir()?)),
        }
    }

    pub fn sandboxed(runfiles: Runfiles, workspace: impl Into<String>) -> Self {
        Self {
            mode: ResolutionMode::Sandboxed {
                runfiles,
                workspace: workspace.into(),
            },
        }
    }

    pub fn workspace_relative(cwd: impl Into<PathBuf>) -> Self {
        Self {
            mode: ResolutionMode::WorkspaceRelative { cwd: cwd.into() },
        }
    }

    pub fn mode(&self) -> &ResolutionMode {
        &self.mode
    }

    pub fn is_sandboxed(&self) -> bool {
        matches!(self.mode, ResolutionMode::Sandboxed { .. })
    }

    /// Map a logical reference to an absolute path
    pub fn resolve(&self, reference: &str) -> Result<PathBuf> {
        match &self.mode {
            ResolutionMode::Sandboxed { runfiles, workspace } => {
                let key = match reference.strip_prefix(PARENT_ESCAPE) {
                    Some(qualified) => qualified.to_string(),
                    None => format!("{}/{}", workspace, reference),
                };
                lookup(runfiles, &key)
            }
            ResolutionMode::WorkspaceRelative { cwd } => Ok(relative_to(cwd, reference)),
        }
    }

    /// Resolve a reference that is already a workspace-qualified runfile key
    pub fn resolve_qualified(&self, key: &str) -> Result<PathBuf> {
        match &self.mode {
            ResolutionMode::Sandboxed { runfiles, .. } => lookup(runfiles, key),
            ResolutionMode::WorkspaceRelative { cwd } => {
                let path = relative_to(cwd, key);
                if !path.exists() {
                    return Err(CoreError::not_found(path));
                }
                Ok(path)
            }
        }
    }
}

fn lookup(runfiles: &Runfiles, key: &str) -> Result<PathBuf> {
    let path = runfiles.rlocation(key)?;
    if !path.exists() {
        return Err(CoreError::NotFound(format!(
            "runfile does not exist: ({}) {}",
            key,
            path.display()
        )));
    }
    debug!("Resolved runfile {} -> {}", key, path.display());
    Ok(path)
}

fn relative_to(cwd: &Path, reference: &str) -> PathBuf {
    let path = Path::new(reference);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}
