//! CLI definitions for the lint wrapper

use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rules_ansible_core::LocationResolver;

/// Runfile holding newline-separated `check` arguments
pub const ANSIBLE_LINT_ARGS_FILE: &str = "ANSIBLE_LINT_ARGS_FILE";

#[derive(Parser, Debug)]
#[command(name = "ansible-lint-wrapper")]
#[command(about = "Run ansible-lint hermetically for a playbook target")]
#[command(version)]
#[command(after_help = "\
EXAMPLES:
    ansible-lint-wrapper check --package //deploy:site --playbook deploy/site.yml \\
        --config_file deploy/ansible.cfg --lint_config_file .ansible-lint
    ansible-lint-wrapper run -- deploy/site.yml

ARGS FILE:
    When ANSIBLE_LINT_ARGS_FILE is set, its lines replace the command line
    and are treated as arguments to `check`.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Lint a playbook inside a build action or test
    Check(CheckArgs),

    /// Run ansible-lint from the workspace (`bazel run`)
    Run {
        /// Arguments forwarded to ansible-lint
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// An optional output file to produce on success
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Package of the playbook target, used to sanitize logs
    #[arg(long)]
    pub package: Option<String>,

    /// The ansible playbook to lint
    #[arg(long)]
    pub playbook: String,

    /// The ansible config file
    #[arg(long = "config_file")]
    pub config_file: String,

    /// The ansible-lint config file
    #[arg(long = "lint_config_file")]
    pub lint_config_file: String,

    /// Remaining arguments forwarded to ansible-lint
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub lint_args: Vec<String>,
}

/// The command line to parse, honouring `ANSIBLE_LINT_ARGS_FILE`
pub fn load_argv(resolver: &LocationResolver) -> Result<Vec<OsString>> {
    let mut argv: Vec<OsString> = std::env::args_os().collect();

    if let Some(key) = std::env::var_os(ANSIBLE_LINT_ARGS_FILE) {
        let key = key.to_string_lossy();
        let path = resolver
            .resolve_qualified(&key)
            .with_context(|| format!("Failed to locate args file {}", key))?;
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read args file {}", path.display()))?;

        let program = argv
            .first()
            .cloned()
            .unwrap_or_else(|| OsString::from("ansible-lint-wrapper"));
        argv = args_from_file(program, &content);
    }

    Ok(argv)
}

fn args_from_file(program: OsString, content: &str) -> Vec<OsString> {
    [program, OsString::from("check")]
        .into_iter()
        .chain(
            content
                .lines()
                .filter(|line| !line.is_empty())
                .map(OsString::from),
        )
        .collect()
}
