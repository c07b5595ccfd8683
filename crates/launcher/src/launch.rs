//! Playbook launch: locate, decrypt, run, clean up

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use rules_ansible_core::env::ANSIBLE_CONFIG;
use rules_ansible_core::process::launch_forwarding;
use rules_ansible_core::{
    Interrupt, LaunchEnv, LocationResolver, ProcessEnvironment, ToolCommand,
};
use tracing::{debug, info};
use vault::{collect_secret_files, DecryptedSecrets, SecretKeyLocator, SecretLifecycleManager};

/// Directory next to the playbook holding the encrypted files
pub const VAULT_DIR: &str = "vault";

/// Build the ansible-playbook command line
///
/// `<tool> <playbook> --inventory=<dir> [--vault-password-file=<key>] <cli args> <extra args>`
pub fn playbook_command(
    tool: &ToolCommand,
    playbook: &Path,
    inventory: &Path,
    key: Option<&Path>,
    forwarded: &[String],
    extra: &[String],
) -> Command {
    let mut cmd = tool.command();
    cmd.arg(playbook)
        .arg(format!("--inventory={}", inventory.display()));

    if let Some(key) = key {
        cmd.arg(format!("--vault-password-file={}", key.display()));
    }

    cmd.args(forwarded).args(extra);
    cmd
}

/// Run the playbook described by `env` and return its exit code
///
/// Decrypted vault files only exist between decryption and the return of
/// this function.
pub fn run_as_launcher(
    env: &LaunchEnv,
    resolver: &LocationResolver,
    forwarded: &[String],
    mut process_env: ProcessEnvironment,
    interrupt: Interrupt,
) -> Result<i32> {
    let playbook = resolver.resolve(&env.playbook_reference())?;
    if !playbook.exists() {
        bail!("Requested playbook not found: {}", playbook.display());
    }

    let hosts = resolver.resolve(&env.inventory_hosts_reference())?;
    let inventory = hosts
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let config = env
        .config_reference()
        .map(|reference| resolver.resolve(&reference))
        .transpose()
        .context("Failed to locate ansible config")?;

    let key = SecretKeyLocator::new(env.package_dir(), &env.workspace_root).find_key(&hosts);
    if key.is_none() {
        debug!("No vault key found, leaving discovery to ansible");
    }

    let vault_dir = playbook
        .parent()
        .map(|dir| dir.join(VAULT_DIR))
        .unwrap_or_else(|| PathBuf::from(VAULT_DIR));
    let files = collect_secret_files(&vault_dir, &env.vault_files, env.launcher_name.as_deref())?;

    let secrets = if files.is_empty() {
        DecryptedSecrets::default()
    } else {
        let vault = env.tools.ansible_vault(resolver)?;
        SecretLifecycleManager::new(vault, key.clone())
            .with_interrupt(interrupt.clone())
            .decrypt(&files)?
    };
    info!("Installed {} vault files", secrets.paths().len());

    let tool = env.tools.ansible_playbook(resolver)?;
    let mut cmd = playbook_command(
        &tool,
        &playbook,
        &inventory,
        key.as_deref(),
        forwarded,
        &env.args,
    );

    if let Some(config) = config {
        process_env.set_if_absent(ANSIBLE_CONFIG, config);
    }
    process_env.apply(&mut cmd);

    let code = launch_forwarding(&mut cmd, &interrupt)?;
    if interrupt.is_raised() {
        info!("Playbook interrupted, exit code {}", code);
    }

    drop(secrets);
    Ok(code)
}
