//! ansible-launcher - `bazel run` entrypoint for ansible playbooks
//!
//! "Decrypt, play, forget."
//!
//! Reads the target description from `ANSIBLE_BZL_*` variables, installs the
//! declared vault files, runs ansible-playbook, and removes the decrypted
//! files again however the run ends. The exit code is the playbook's.

mod launch;

use anyhow::{Context, Result};
use clap::Parser;
use rules_ansible_core::{
    logging, CoreError, Interrupt, LaunchEnv, LocationResolver, ProcessEnvironment,
};
use vault::VaultError;

#[derive(Parser)]
#[command(name = "ansible-launcher")]
#[command(about = "Run an ansible playbook with its vault files decrypted for the duration of the run")]
#[command(version)]
#[command(after_help = "\
ENVIRONMENT:
    ANSIBLE_BZL_PLAYBOOK          Playbook, relative to the package
    ANSIBLE_BZL_INVENTORY_HOSTS   Inventory hosts file, relative to the package
    ANSIBLE_BZL_PACKAGE           Package directory
    ANSIBLE_BZL_ARGS              JSON list of extra ansible-playbook arguments
    ANSIBLE_BZL_VAULT_FILES       JSON list of *.vaultfile names to install
    ANSIBLE_BZL_CONFIG            Optional ansible.cfg, relative to the package
    RULES_ANSIBLE_DEBUG           Enable debug logging

VAULT KEYS:
    .vault_pass/<env> (or .vault_pass) is looked up in the package, its
    parent, then the workspace root. Without one, ansible-vault uses its
    own configuration.")]
struct Cli {
    /// Arguments forwarded to ansible-playbook
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn main() {
    logging::init();
    let cli = Cli::parse();

    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {:#}", err);
            exit_code(&err)
        }
    };

    // Every guard has been dropped by now
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let env = LaunchEnv::from_env()?;
    let resolver = LocationResolver::from_env().context("Failed to set up path resolution")?;
    let interrupt = Interrupt::install().context("Failed to install signal handlers")?;

    launch::run_as_launcher(
        &env,
        &resolver,
        &cli.args,
        ProcessEnvironment::inherit(),
        interrupt,
    )
}

fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(err) = err.downcast_ref::<VaultError>() {
        return err.exit_code();
    }
    if let Some(err) = err.downcast_ref::<CoreError>() {
        return err.exit_code();
    }
    1
}
