//! ansible-lint-wrapper - hermetic ansible-lint for playbook targets
//!
//! `check` lints inside build actions and tests: output is captured, sandbox
//! paths are scrubbed from it, and an empty marker file records success.
//! `run` lints from the user's workspace with the terminal attached.

mod cli;
mod wrapper;

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rules_ansible_core::env::{BUILD_WORKING_DIRECTORY, BUILD_WORKSPACE_DIRECTORY, TEST_TMPDIR};
use rules_ansible_core::{logging, CoreError, LocationResolver};
use tracing::debug;

use cli::{Cli, Commands};
use wrapper::{LintContext, LintRequest, Output};

fn main() {
    logging::init();

    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {:#}", err);
            exit_code(&err)
        }
    };

    std::process::exit(code);
}

fn run() -> Result<i32> {
    let resolver = LocationResolver::from_env().context("Failed to set up path resolution")?;
    let cli = Cli::parse_from(cli::load_argv(&resolver)?);

    match cli.command {
        Commands::Check(args) => {
            let temp_base = match std::env::var_os(TEST_TMPDIR) {
                Some(dir) if !dir.is_empty() => PathBuf::from(dir),
                _ => std::env::current_dir()?,
            };
            let ctx = LintContext::from_env(&resolver, temp_base)?;
            let request = LintRequest::resolve(args, &resolver)?;

            ctx.check(&request, &mut io::stdout(), &mut io::stderr())
        }
        Commands::Run { args } => {
            // Tools are located before leaving the runfiles tree
            let ctx = LintContext::from_env(&resolver, std::env::temp_dir())?;

            let workdir = working_directory()?;
            debug!("Linting from {}", workdir.display());
            std::env::set_current_dir(&workdir)
                .with_context(|| format!("Failed to enter {}", workdir.display()))?;

            let argv: Vec<OsString> = args.into_iter().map(OsString::from).collect();
            let result = ctx.run_as_wrapped_tool(&argv, &[], Output::Inherit)?;
            Ok(result.exit_code)
        }
    }
}

/// Directory `bazel run` was invoked from, falling back to the workspace root
fn working_directory() -> Result<PathBuf, CoreError> {
    [BUILD_WORKING_DIRECTORY, BUILD_WORKSPACE_DIRECTORY]
        .into_iter()
        .filter_map(std::env::var_os)
        .find(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .ok_or(CoreError::MissingVariable(BUILD_WORKING_DIRECTORY))
}

fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<CoreError>()
        .map(CoreError::exit_code)
        .unwrap_or(1)
}
