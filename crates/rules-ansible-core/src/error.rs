//! Error taxonomy shared by all launchers

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("{0} is not set")]
    MissingVariable(&'static str),

    #[error("{name} is not a valid JSON list of strings: {source}")]
    InvalidJson {
        name: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Runfile index unavailable - is the process running under Bazel?")]
    NoRunfiles,

    #[error("Interrupted")]
    Interrupted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::NotFound(path.into().display().to_string())
    }

    /// Process exit code this error should surface as
    ///
    /// A tool that ran and failed is not an error here; its own exit code is
    /// returned by the launch functions.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Interrupted => 130,
            _ => 1,
        }
    }
}
