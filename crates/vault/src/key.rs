//! Vault password discovery
//!
//! Inventories are laid out as `inventories/<environment>/hosts`. The password
//! for an environment lives in `.vault_pass/<environment>`, looked up in the
//! package, its parent, then the workspace root. Other inventory layouts use a
//! single `.vault_pass` file.

use std::path::{Path, PathBuf};

use tracing::debug;

pub const VAULT_PASS_DIR: &str = ".vault_pass";
pub const INVENTORIES_DIR: &str = "inventories";

/// Relative location of the password file for an inventory hosts file
pub fn vault_pass_subdir(inventory_hosts: &Path) -> PathBuf {
    let environment = inventory_hosts.parent();
    let grandparent = environment.and_then(Path::parent);

    let is_inventories = grandparent
        .and_then(Path::file_name)
        .is_some_and(|name| name == INVENTORIES_DIR);

    // Any other layout falls back to the plain `.vault_pass` file. Whether
    // deeper layouts should get an environment segment is still undecided.
    match environment.and_then(Path::file_name) {
        Some(env_name) if is_inventories => Path::new(VAULT_PASS_DIR).join(env_name),
        _ => PathBuf::from(VAULT_PASS_DIR),
    }
}

/// Ordered search for the vault password file
#[derive(Debug, Clone)]
pub struct SecretKeyLocator {
    package_dir: PathBuf,
    workspace_root: PathBuf,
}

impl SecretKeyLocator {
    pub fn new(package_dir: impl Into<PathBuf>, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            package_dir: package_dir.into(),
            workspace_root: workspace_root.into(),
        }
    }

    /// The three candidate locations, in search order
    pub fn candidates(&self, inventory_hosts: &Path) -> [PathBuf; 3] {
        let subdir = vault_pass_subdir(inventory_hosts);
        let package_parent = self.package_dir.parent().unwrap_or(&self.package_dir);

        [
            self.package_dir.join(&subdir),
            package_parent.join(&subdir),
            self.workspace_root.join(&subdir),
        ]
    }

    /// First existing candidate, or `None` to let ansible-vault find its own
    pub fn find_key(&self, inventory_hosts: &Path) -> Option<PathBuf> {
        for candidate in self.candidates(inventory_hosts) {
            if candidate.exists() {
                debug!("Using vault key {}", candidate.display());
                return Some(candidate);
            }
            debug!("No vault key at {}", candidate.display());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn touch(path: &Path) -> std::io::Result<()> {
        fs::create_dir_all(path.parent().unwrap())?;
        fs::write(path, "hunter2\n")
    }

    #[test]
    fn test_subdir_for_inventories_layout() {
        assert_eq!(
            vault_pass_subdir(Path::new("deploy/inventories/prod/hosts")),
            PathBuf::from(".vault_pass/prod")
        );
        assert_eq!(
            vault_pass_subdir(Path::new("inventories/staging/hosts.yml")),
            PathBuf::from(".vault_pass/staging")
        );
    }

    #[test]
    fn test_subdir_for_other_layouts() {
        assert_eq!(vault_pass_subdir(Path::new("hosts")), PathBuf::from(".vault_pass"));
        assert_eq!(
            vault_pass_subdir(Path::new("inventory/hosts")),
            PathBuf::from(".vault_pass")
        );
        assert_eq!(
            vault_pass_subdir(Path::new("inventories/hosts")),
            PathBuf::from(".vault_pass")
        );
        assert_eq!(
            vault_pass_subdir(Path::new("inventories/prod/extra/hosts")),
            PathBuf::from(".vault_pass")
        );
    }

    #[test]
    fn test_candidate_order() {
        let locator = SecretKeyLocator::new("/ws/deploy/app", "/ws");
        let candidates = locator.candidates(Path::new("inventories/prod/hosts"));
        assert_eq!(
            candidates,
            [
                PathBuf::from("/ws/deploy/app/.vault_pass/prod"),
                PathBuf::from("/ws/deploy/.vault_pass/prod"),
                PathBuf::from("/ws/.vault_pass/prod"),
            ]
        );
    }

    #[test]
    fn test_package_key_wins() -> anyhow::Result<()> {
        let ws = tempdir()?;
        let package = ws.path().join("deploy/app");
        touch(&package.join(".vault_pass/prod"))?;
        touch(&ws.path().join("deploy/.vault_pass/prod"))?;
        touch(&ws.path().join(".vault_pass/prod"))?;

        let locator = SecretKeyLocator::new(&package, ws.path());
        assert_eq!(
            locator.find_key(Path::new("inventories/prod/hosts")),
            Some(package.join(".vault_pass/prod"))
        );
        Ok(())
    }

    #[test]
    fn test_parent_key_ignores_decoy_on_wrong_branch() -> anyhow::Result<()> {
        let ws = tempdir()?;
        let package = ws.path().join("deploy/app");
        fs::create_dir_all(&package)?;
        touch(&ws.path().join("deploy/.vault_pass/prod"))?;
        // Decoys: wrong environment in the package, and a sibling package
        touch(&package.join(".vault_pass/staging"))?;
        touch(&ws.path().join("deploy/other/.vault_pass/prod"))?;
        touch(&ws.path().join(".vault_pass/prod"))?;

        let locator = SecretKeyLocator::new(&package, ws.path());
        assert_eq!(
            locator.find_key(Path::new("inventories/prod/hosts")),
            Some(ws.path().join("deploy/.vault_pass/prod"))
        );
        Ok(())
    }

    #[test]
    fn test_workspace_root_key() -> anyhow::Result<()> {
        let ws = tempdir()?;
        let package = ws.path().join("app");
        fs::create_dir_all(&package)?;
        touch(&ws.path().join(".vault_pass/prod"))?;

        // package parent is the workspace root itself here
        let locator = SecretKeyLocator::new(&package, ws.path());
        assert_eq!(
            locator.find_key(Path::new("inventories/prod/hosts")),
            Some(ws.path().join(".vault_pass/prod"))
        );
        Ok(())
    }

    #[test]
    fn test_no_key_is_not_an_error() -> anyhow::Result<()> {
        let ws = tempdir()?;
        let package = ws.path().join("app");
        fs::create_dir_all(&package)?;
        touch(&ws.path().join(".vault_pass/staging"))?;

        let locator = SecretKeyLocator::new(&package, ws.path());
        assert_eq!(locator.find_key(Path::new("inventories/prod/hosts")), None);
        Ok(())
    }

    #[test]
    fn test_plain_vault_pass_file() -> anyhow::Result<()> {
        let ws = tempdir()?;
        let package = ws.path().join("app");
        touch(&package.join(".vault_pass"))?;

        let locator = SecretKeyLocator::new(&package, ws.path());
        assert_eq!(
            locator.find_key(Path::new("hosts")),
            Some(package.join(".vault_pass"))
        );
        Ok(())
    }
}
