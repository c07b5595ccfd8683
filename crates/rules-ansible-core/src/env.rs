//! Environment contract between the Bazel rules and the launchers
//!
//! The rules pass everything through environment variables. They are read
//! once, through a lookup function, into typed values that are then threaded
//! through the launchers.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{CoreError, Result};
use crate::resolver::LocationResolver;

pub const PLAYBOOK: &str = "ANSIBLE_BZL_PLAYBOOK";
pub const INVENTORY_HOSTS: &str = "ANSIBLE_BZL_INVENTORY_HOSTS";
pub const PACKAGE: &str = "ANSIBLE_BZL_PACKAGE";
pub const ARGS: &str = "ANSIBLE_BZL_ARGS";
pub const VAULT_FILES: &str = "ANSIBLE_BZL_VAULT_FILES";
pub const CONFIG: &str = "ANSIBLE_BZL_CONFIG";
pub const LAUNCHER_NAME: &str = "ANSIBLE_BZL_LAUNCHER_NAME";
pub const ANSIBLE: &str = "ANSIBLE_BZL_ANSIBLE";
pub const ANSIBLE_VAULT: &str = "ANSIBLE_BZL_ANSIBLE_VAULT";
pub const INTERPRETER: &str = "ANSIBLE_BZL_INTERPRETER";
pub const BUILD_WORKING_DIRECTORY: &str = "BUILD_WORKING_DIRECTORY";
pub const BUILD_WORKSPACE_DIRECTORY: &str = "BUILD_WORKSPACE_DIRECTORY";
pub const TEST_WORKSPACE: &str = "TEST_WORKSPACE";
pub const TEST_TMPDIR: &str = "TEST_TMPDIR";
pub const ANSIBLE_CONFIG: &str = "ANSIBLE_CONFIG";
pub const DEBUG: &str = "RULES_ANSIBLE_DEBUG";

/// Read a variable, treating an empty value as unset
fn optional<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).filter(|value| !value.is_empty())
}

fn required<F>(lookup: &F, name: &'static str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    optional(lookup, name).ok_or(CoreError::MissingVariable(name))
}

fn json_list<F>(lookup: &F, name: &'static str) -> Result<Vec<String>>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = required(lookup, name)?;
    serde_json::from_str(&raw).map_err(|source| CoreError::InvalidJson { name, source })
}

/// Join a logical reference onto a package directory
///
/// Absolute references and an empty package are passed through.
pub fn join_reference(package: &str, reference: &str) -> String {
    let package = package.trim_end_matches('/');
    if package.is_empty() || Path::new(reference).is_absolute() {
        return reference.to_string();
    }
    format!("{}/{}", package, reference)
}

/// Optional overrides for the external tools
#[derive(Debug, Clone, Default)]
pub struct ToolEnv {
    pub interpreter: Option<String>,
    pub ansible: Option<String>,
    pub ansible_vault: Option<String>,
}

impl ToolEnv {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            interpreter: optional(&lookup, INTERPRETER),
            ansible: optional(&lookup, ANSIBLE),
            ansible_vault: optional(&lookup, ANSIBLE_VAULT),
        }
    }

    /// The interpreter used for script entrypoints and shim shebangs
    pub fn interpreter(&self, resolver: &LocationResolver) -> Result<PathBuf> {
        match &self.interpreter {
            Some(reference) => resolver.resolve(reference),
            None => which::which("python3").map_err(|_| CoreError::NotFound("python3".to_string())),
        }
    }

    pub fn ansible_playbook(&self, resolver: &LocationResolver) -> Result<ToolCommand> {
        ToolCommand::locate("ansible-playbook", self.ansible.as_deref(), self, resolver)
    }

    pub fn ansible_vault(&self, resolver: &LocationResolver) -> Result<ToolCommand> {
        ToolCommand::locate("ansible-vault", self.ansible_vault.as_deref(), self, resolver)
    }
}

/// Everything the playbook launcher needs from its environment
#[derive(Debug, Clone)]
pub struct LaunchEnv {
    /// Playbook, relative to the package
    pub playbook: String,
    /// Inventory hosts file, relative to the package
    pub inventory_hosts: String,
    /// Package directory, relative to the workspace
    pub package: String,
    /// Extra arguments appended after the forwarded CLI arguments
    pub args: Vec<String>,
    /// Names of the encrypted files to install before running
    pub vault_files: Vec<String>,
    /// Optional ansible config file, relative to the package
    pub config: Option<String>,
    /// Qualifier segment of `<name>.<qualifier>.vaultfile`
    pub launcher_name: Option<String>,
    /// Root of the invoking workspace
    pub workspace_root: PathBuf,
    pub tools: ToolEnv,
}

impl LaunchEnv {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            playbook: required(&lookup, PLAYBOOK)?,
            inventory_hosts: required(&lookup, INVENTORY_HOSTS)?,
            package: required(&lookup, PACKAGE)?,
            args: json_list(&lookup, ARGS)?,
            vault_files: json_list(&lookup, VAULT_FILES)?,
            config: optional(&lookup, CONFIG),
            launcher_name: optional(&lookup, LAUNCHER_NAME),
            workspace_root: PathBuf::from(required(&lookup, BUILD_WORKING_DIRECTORY)?),
            tools: ToolEnv::from_lookup(&lookup),
        })
    }

    pub fn playbook_reference(&self) -> String {
        join_reference(&self.package, &self.playbook)
    }

    pub fn inventory_hosts_reference(&self) -> String {
        join_reference(&self.package, &self.inventory_hosts)
    }

    pub fn config_reference(&self) -> Option<String> {
        self.config
            .as_deref()
            .map(|config| join_reference(&self.package, config))
    }

    /// The package directory inside the invoking workspace
    pub fn package_dir(&self) -> PathBuf {
        self.workspace_root.join(&self.package)
    }
}

/// A located external tool, possibly a script run through an interpreter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub name: String,
    pub interpreter: Option<PathBuf>,
    pub program: PathBuf,
}

impl ToolCommand {
    /// Locate a tool from an explicit reference, falling back to the search path
    pub fn locate(
        name: &str,
        reference: Option<&str>,
        tools: &ToolEnv,
        resolver: &LocationResolver,
    ) -> Result<Self> {
        let program = match reference {
            Some(reference) => resolver.resolve(reference)?,
            None => which::which(name).map_err(|_| CoreError::NotFound(name.to_string()))?,
        };

        let interpreter = if is_script(&program) {
            Some(tools.interpreter(resolver)?)
        } else {
            None
        };

        Ok(Self {
            name: name.to_string(),
            interpreter,
            program,
        })
    }

    /// Build a command that runs the tool
    pub fn command(&self) -> Command {
        match &self.interpreter {
            Some(interpreter) => {
                let mut cmd = Command::new(interpreter);
                cmd.arg(&self.program);
                cmd
            }
            None => Command::new(&self.program),
        }
    }
}

fn is_script(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "py")
}
