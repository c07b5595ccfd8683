//! Process plumbing for running the wrapped tools
//!
//! The playbook launcher hands its terminal over to the tool and only takes
//! back the exit code. The lint wrapper captures output instead, so sandbox
//! paths can be scrubbed before anything is shown.

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{CoreError, Result};
use crate::interrupt::Interrupt;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub const PATH: &str = "PATH";
pub const HOME: &str = "HOME";

/// The environment a child process starts with
///
/// Starts from a base (usually the inherited environment) and layers
/// overrides on top.
#[derive(Debug, Clone, Default)]
pub struct ProcessEnvironment {
    vars: BTreeMap<OsString, OsString>,
}

impl ProcessEnvironment {
    pub fn inherit() -> Self {
        Self::from_vars(std::env::vars_os())
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        Self {
            vars: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: impl AsRef<OsStr>) -> Option<&OsStr> {
        self.vars.get(key.as_ref()).map(OsString::as_os_str)
    }

    pub fn contains(&self, key: impl AsRef<OsStr>) -> bool {
        self.vars.contains_key(key.as_ref())
    }

    pub fn set(&mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> &mut Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Set only when the inherited environment does not already carry `key`
    pub fn set_if_absent(
        &mut self,
        key: impl Into<OsString>,
        value: impl Into<OsString>,
    ) -> &mut Self {
        self.vars.entry(key.into()).or_insert_with(|| value.into());
        self
    }

    /// Put `dir` in front of every other search path entry
    pub fn prepend_search_path(&mut self, dir: &Path) -> Result<&mut Self> {
        let mut entries = vec![dir.to_path_buf()];
        if let Some(existing) = self.get(PATH) {
            entries.extend(std::env::split_paths(existing));
        }
        let joined = std::env::join_paths(entries).map_err(|e| {
            CoreError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
        })?;
        Ok(self.set(PATH, joined))
    }

    pub fn search_path(&self) -> Option<&OsStr> {
        self.get(PATH)
    }

    /// Replace the command's environment with this one
    pub fn apply(&self, cmd: &mut Command) {
        cmd.env_clear();
        cmd.envs(&self.vars);
    }
}

/// Output of a child run with captured stdio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Replace every occurrence of `dir` in both streams with `placeholder`
    pub fn sanitized(&self, dir: &Path, placeholder: &str) -> Self {
        Self {
            exit_code: self.exit_code,
            stdout: sanitize(&self.stdout, dir, placeholder),
            stderr: sanitize(&self.stderr, dir, placeholder),
        }
    }
}

/// Exit code of a finished child; signal deaths map to `128 + signal`
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    1
}

fn describe(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|arg| arg.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

fn spawn_error(cmd: &Command, err: std::io::Error) -> CoreError {
    if err.kind() == std::io::ErrorKind::NotFound {
        CoreError::NotFound(cmd.get_program().to_string_lossy().into_owned())
    } else {
        CoreError::Io(err)
    }
}

/// Run a tool on this process's stdio and return its exit code
///
/// This stands in for replacing the process image: the caller releases its
/// own resources and then exits with the returned code.
pub fn launch(cmd: &mut Command) -> Result<i32> {
    debug!("Launching: {}", describe(cmd));
    let status = cmd.status().map_err(|e| spawn_error(cmd, e))?;
    let code = exit_code(status);
    debug!("Tool exited with code {}", code);
    Ok(code)
}

/// [`launch`], passing an interrupt on to the child
///
/// A signal sent to the whole process group already reaches the child. One
/// sent to this process alone would otherwise leave the child running, and
/// whatever the caller holds on disk would stay there until it finished.
/// The signal is forwarded once; after that the child's own handling applies.
pub fn launch_forwarding(cmd: &mut Command, interrupt: &Interrupt) -> Result<i32> {
    debug!("Launching: {}", describe(cmd));
    let mut child = cmd.spawn().map_err(|e| spawn_error(cmd, e))?;
    let mut forwarded = false;

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if !forwarded {
            if let Some(signal) = interrupt.signal() {
                forward_signal(&mut child, signal);
                forwarded = true;
            }
        }
        thread::sleep(POLL_INTERVAL);
    };

    let code = exit_code(status);
    debug!("Tool exited with code {}", code);
    Ok(code)
}

#[cfg(unix)]
fn forward_signal(child: &mut Child, signal: i32) {
    let Ok(pid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    debug!("Forwarding signal {} to pid {}", signal, pid);
    // SAFETY: `pid` is our own child, which has not been reaped yet
    if unsafe { libc::kill(pid, signal) } == -1 {
        warn!(
            "Failed to forward signal {}: {}",
            signal,
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn forward_signal(child: &mut Child, _signal: i32) {
    if let Err(e) = child.kill() {
        warn!("Failed to stop child: {}", e);
    }
}

/// Run a tool to completion, capturing stdout and stderr
pub fn run_captured(cmd: &mut Command) -> Result<CapturedOutput> {
    debug!("Running: {}", describe(cmd));
    let output = cmd.output().map_err(|e| spawn_error(cmd, e))?;
    Ok(CapturedOutput {
        exit_code: exit_code(output.status),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Replace a directory path (and its canonical form) with a stable token
pub fn sanitize(text: &str, dir: &Path, placeholder: &str) -> String {
    let mut forms: Vec<PathBuf> = vec![dir.to_path_buf()];
    if let Ok(canonical) = dir.canonicalize() {
        if canonical != dir {
            forms.push(canonical);
        }
    }
    // Longest first so a prefix never eats part of a longer match
    forms.sort_by_key(|form| std::cmp::Reverse(form.as_os_str().len()));

    forms
        .iter()
        .map(|form| form.to_string_lossy().into_owned())
        .filter(|form| !form.is_empty())
        .fold(text.to_string(), |acc, form| acc.replace(&form, placeholder))
}
