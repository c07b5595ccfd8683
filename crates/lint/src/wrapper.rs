//! Hermetic ansible-lint runs
//!
//! ansible-lint is started as a child with a private `PATH` and `HOME`: the
//! ansible tools it shells out to resolve to shims bound to the hermetic
//! interpreter. ansible-lint itself runs from a wrapped entrypoint in the same
//! sandbox that keeps symlinked inputs at their sandbox paths. In build
//! actions the output is captured and sandbox paths are replaced before
//! anything is reported.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use rules_ansible_core::env::{ToolEnv, ANSIBLE_CONFIG};
use rules_ansible_core::process::{launch, run_captured};
use rules_ansible_core::{CapturedOutput, LocationResolver, ProcessEnvironment};
use shim::{ansible_entrypoints, ansible_lint_entrypoint, ShimSandbox, ANSIBLE_LINT};
use std::process::Command;
use tracing::{debug, info};

use crate::cli::CheckArgs;

pub const ANSIBLE_PLAYBOOK_DIR: &str = "ANSIBLE_PLAYBOOK_DIR";

/// Token replacing the playbook directory when no package is given
pub const PLAYBOOK_DIR_PLACEHOLDER: &str = "{PLAYBOOK_DIR}";

/// How the child's output is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    Capture,
    Inherit,
}

/// A `check` invocation with every reference resolved
#[derive(Debug, Clone)]
pub struct LintRequest {
    pub package: Option<String>,
    pub playbook: PathBuf,
    pub config_file: PathBuf,
    pub lint_config_file: PathBuf,
    pub lint_args: Vec<String>,
    pub output: Option<PathBuf>,
}

impl LintRequest {
    pub fn resolve(args: CheckArgs, resolver: &LocationResolver) -> Result<Self> {
        let locate = |reference: &str, what: &str| {
            resolver
                .resolve(reference)
                .with_context(|| format!("Failed to locate {} '{}'", what, reference))
        };

        Ok(Self {
            playbook: locate(&args.playbook, "playbook")?,
            config_file: locate(&args.config_file, "config file")?,
            lint_config_file: locate(&args.lint_config_file, "lint config file")?,
            package: args.package,
            lint_args: args.lint_args,
            output: args.output,
        })
    }

    pub fn playbook_dir(&self) -> PathBuf {
        self.playbook
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    /// `--config-file <cfg> --project-dir <dir> <args...> <playbook>`
    pub fn lint_argv(&self) -> Vec<OsString> {
        let mut argv: Vec<OsString> = vec![
            "--config-file".into(),
            self.lint_config_file.clone().into(),
            "--project-dir".into(),
            self.playbook_dir().into(),
        ];
        argv.extend(self.lint_args.iter().map(OsString::from));
        argv.push(self.playbook.clone().into());
        argv
    }

    pub fn extra_env(&self) -> Vec<(&'static str, OsString)> {
        vec![
            (ANSIBLE_CONFIG, self.config_file.clone().into()),
            (ANSIBLE_PLAYBOOK_DIR, self.playbook_dir().into()),
        ]
    }

    fn placeholder(&self) -> &str {
        self.package.as_deref().unwrap_or(PLAYBOOK_DIR_PLACEHOLDER)
    }
}

/// Everything needed to start ansible-lint hermetically
pub struct LintContext {
    pub interpreter: PathBuf,
    /// Tools ansible-lint may look up on `PATH`
    pub entrypoints: BTreeMap<String, String>,
    /// Source of the ansible-lint entrypoint itself
    pub lint_source: String,
    /// Directory the shim sandbox is created in
    pub temp_base: PathBuf,
    pub base_env: ProcessEnvironment,
}

impl LintContext {
    pub fn from_env(resolver: &LocationResolver, temp_base: PathBuf) -> Result<Self> {
        let tools = ToolEnv::from_env();
        Ok(Self {
            interpreter: tools
                .interpreter(resolver)
                .context("Failed to locate the python interpreter")?,
            entrypoints: ansible_entrypoints(),
            lint_source: ansible_lint_entrypoint(),
            temp_base,
            base_env: ProcessEnvironment::inherit(),
        })
    }

    /// Build the shim sandbox and the child environment that uses it
    pub fn prepare(
        &self,
        extra_env: &[(&'static str, OsString)],
    ) -> Result<(ShimSandbox, ProcessEnvironment)> {
        let mut sources = self.entrypoints.clone();
        sources.insert(ANSIBLE_LINT.to_string(), self.lint_source.clone());

        let sandbox = ShimSandbox::prepare(&sources, &self.interpreter, &self.temp_base)
            .context("Failed to prepare tool shims")?;

        let mut env = self.base_env.clone();
        for (key, value) in extra_env {
            env.set(*key, value);
        }
        sandbox.apply(&mut env)?;

        Ok((sandbox, env))
    }

    /// Run ansible-lint inside a fresh shim sandbox
    ///
    /// With [`Output::Inherit`] the returned streams are empty.
    pub fn run_as_wrapped_tool(
        &self,
        argv: &[OsString],
        extra_env: &[(&'static str, OsString)],
        output: Output,
    ) -> Result<CapturedOutput> {
        let (sandbox, env) = self.prepare(extra_env)?;
        debug!("Linting with shims from {}", sandbox.path().display());

        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(sandbox.shim(ANSIBLE_LINT)).args(argv);
        env.apply(&mut cmd);

        let result = match output {
            Output::Capture => {
                cmd.stdin(Stdio::null());
                run_captured(&mut cmd)?
            }
            Output::Inherit => CapturedOutput {
                exit_code: launch(&mut cmd)?,
                stdout: String::new(),
                stderr: String::new(),
            },
        };

        drop(sandbox);
        Ok(result)
    }

    /// Lint for a build action or test and report a verdict
    ///
    /// Failures relay the sanitized output and return the tool's exit code.
    /// Success writes the (empty) output marker.
    pub fn check(
        &self,
        request: &LintRequest,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
    ) -> Result<i32> {
        let result = self.run_as_wrapped_tool(
            &request.lint_argv(),
            &request.extra_env(),
            Output::Capture,
        )?;

        if !result.success() {
            let clean = result.sanitized(&request.playbook_dir(), request.placeholder());
            stdout.write_all(clean.stdout.as_bytes())?;
            stderr.write_all(clean.stderr.as_bytes())?;
            info!("ansible-lint failed with exit code {}", clean.exit_code);
            return Ok(clean.exit_code);
        }

        if let Some(marker) = &request.output {
            if let Some(parent) = marker.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            fs::write(marker, b"")
                .with_context(|| format!("Failed to write {}", marker.display()))?;
        }

        Ok(0)
    }
}
