//! Vault - decrypt, use, clean up
//!
//! Each `<name>[.<qualifier>].vaultfile` is decrypted into `<name>` with
//! `ansible-vault decrypt`. The plaintext files are owned by a
//! [`DecryptedSecrets`] guard and removed when it drops, whether the batch
//! failed half way, the playbook failed, or a signal arrived.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use rules_ansible_core::process::exit_code;
use rules_ansible_core::{CoreError, Interrupt, ToolCommand};
use thiserror::Error;
use tracing::{debug, warn};

/// Suffix marking a file as vault-protected
pub const VAULT_SUFFIX: &str = ".vaultfile";

/// Vault-specific errors
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Not a vault file (expected suffix '{suffix}'): {path}")]
    InvalidSecretName { path: PathBuf, suffix: String },

    #[error("Failed to decrypt {path}: ansible-vault exited with code {code}")]
    DecryptFailed { path: PathBuf, code: i32 },

    #[error("Interrupted while decrypting secrets")]
    Interrupted,

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VaultError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::DecryptFailed { code, .. } => *code,
            Self::Interrupted => 130,
            Self::Core(err) => err.exit_code(),
            _ => 1,
        }
    }
}

/// An encrypted input and the plaintext path it installs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretFile {
    encrypted: PathBuf,
    plaintext: PathBuf,
}

impl SecretFile {
    /// The full suffix for an optional qualifier, e.g. `.prod.vaultfile`
    pub fn suffix(qualifier: Option<&str>) -> String {
        match qualifier.filter(|q| !q.is_empty()) {
            Some(qualifier) => format!(".{}{}", qualifier, VAULT_SUFFIX),
            None => VAULT_SUFFIX.to_string(),
        }
    }

    pub fn new(encrypted: impl Into<PathBuf>, qualifier: Option<&str>) -> Result<Self, VaultError> {
        let encrypted = encrypted.into();
        let suffix = Self::suffix(qualifier);

        let name = encrypted
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let stem = name
            .strip_suffix(&suffix)
            .filter(|stem| !stem.is_empty())
            .ok_or_else(|| VaultError::InvalidSecretName {
                path: encrypted.clone(),
                suffix: suffix.clone(),
            })?;

        let plaintext = encrypted.with_file_name(stem);
        Ok(Self {
            encrypted,
            plaintext,
        })
    }

    pub fn encrypted(&self) -> &Path {
        &self.encrypted
    }

    pub fn plaintext(&self) -> &Path {
        &self.plaintext
    }
}

/// Pick the declared vault files out of `vault_dir`
///
/// Declared names missing from the directory are skipped with a warning.
pub fn collect_secret_files(
    vault_dir: &Path,
    names: &[String],
    qualifier: Option<&str>,
) -> Result<Vec<SecretFile>, VaultError> {
    let mut files = Vec::with_capacity(names.len());

    for name in names {
        let path = vault_dir.join(name);
        if !path.is_file() {
            warn!("Declared vault file not found: {}", path.display());
            continue;
        }
        files.push(SecretFile::new(path, qualifier)?);
    }

    Ok(files)
}

/// Remove plaintext files; already-removed files are fine
pub fn cleanup(paths: &[PathBuf]) {
    for path in paths {
        match fs::remove_file(path) {
            Ok(()) => debug!("Removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove decrypted file {}: {}", path.display(), e),
        }
    }
}

/// Plaintext files created by one decrypt batch, removed on drop
#[derive(Debug, Default)]
pub struct DecryptedSecrets {
    paths: Vec<PathBuf>,
}

impl DecryptedSecrets {
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    fn track(&mut self, path: &Path) {
        if !self.paths.iter().any(|p| p == path) {
            self.paths.push(path.to_path_buf());
        }
    }

    /// Remove every plaintext file now
    pub fn cleanup(&mut self) {
        cleanup(&self.paths);
        self.paths.clear();
    }
}

impl Drop for DecryptedSecrets {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Drives `ansible-vault decrypt` over a batch of secret files
pub struct SecretLifecycleManager {
    vault: ToolCommand,
    key: Option<PathBuf>,
    interrupt: Interrupt,
}

impl SecretLifecycleManager {
    pub fn new(vault: ToolCommand, key: Option<PathBuf>) -> Self {
        Self {
            vault,
            key,
            interrupt: Interrupt::new(),
        }
    }

    /// Abort the batch when this flag is raised
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn key(&self) -> Option<&Path> {
        self.key.as_deref()
    }

    /// `ansible-vault decrypt <in> --output <out> [--vault-password-file <key>]`
    pub fn decrypt_command(&self, file: &SecretFile) -> Command {
        let mut cmd = self.vault.command();
        cmd.arg("decrypt")
            .arg(file.encrypted())
            .arg("--output")
            .arg(file.plaintext());

        // Without a key, ansible-vault falls back to its own discovery
        if let Some(key) = &self.key {
            cmd.arg("--vault-password-file").arg(key);
        }
        cmd
    }

    /// Decrypt every file, all or nothing
    ///
    /// On failure or interrupt, everything produced so far is removed before
    /// the error is returned.
    pub fn decrypt(&self, files: &[SecretFile]) -> Result<DecryptedSecrets, VaultError> {
        let mut decrypted = DecryptedSecrets::default();

        for file in files {
            self.interrupt.check().map_err(|_| VaultError::Interrupted)?;

            debug!("Decrypting {}", file.encrypted().display());
            // The vault writes into a file that is already owner-only, and
            // whatever it leaves behind is ours to remove.
            create_owner_only(file.plaintext())?;
            decrypted.track(file.plaintext());

            let mut cmd = self.decrypt_command(file);
            let status = cmd.status().map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    VaultError::Core(CoreError::not_found(&self.vault.program))
                }
                _ => VaultError::Io(e),
            })?;

            if !status.success() {
                return Err(VaultError::DecryptFailed {
                    path: file.encrypted().to_path_buf(),
                    code: exit_code(status),
                });
            }

            restrict_permissions(file.plaintext())?;
            self.interrupt.check().map_err(|_| VaultError::Interrupted)?;
        }

        Ok(decrypted)
    }
}

#[cfg(unix)]
fn create_owner_only(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // `mode` only applies to files that did not exist yet
    restrict_permissions(path)
}

#[cfg(not(unix))]
fn create_owner_only(path: &Path) -> std::io::Result<()> {
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map(|_| ())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_secret_file_paths() -> anyhow::Result<()> {
        let file = SecretFile::new("/pkg/vault/id_rsa.vaultfile", None)?;
        assert_eq!(file.encrypted(), Path::new("/pkg/vault/id_rsa.vaultfile"));
        assert_eq!(file.plaintext(), Path::new("/pkg/vault/id_rsa"));

        let file = SecretFile::new("/pkg/vault/creds.yml.prod.vaultfile", Some("prod"))?;
        assert_eq!(file.plaintext(), Path::new("/pkg/vault/creds.yml"));

        // An empty qualifier is the same as none
        let file = SecretFile::new("/pkg/vault/creds.yml.vaultfile", Some(""))?;
        assert_eq!(file.plaintext(), Path::new("/pkg/vault/creds.yml"));
        Ok(())
    }

    #[test]
    fn test_secret_file_rejects_bad_names() {
        assert!(matches!(
            SecretFile::new("/pkg/vault/id_rsa", None),
            Err(VaultError::InvalidSecretName { .. })
        ));
        assert!(SecretFile::new("/pkg/vault/.vaultfile", None).is_err());
        assert!(SecretFile::new("/pkg/vault/creds.yml.vaultfile", Some("prod")).is_err());
    }

    #[test]
    fn test_collect_skips_undeclared_and_missing() -> anyhow::Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("a.vaultfile"), "x")?;
        fs::write(dir.path().join("b.vaultfile"), "x")?;

        let files = collect_secret_files(
            dir.path(),
            &["b.vaultfile".to_string(), "missing.vaultfile".to_string()],
            None,
        )?;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].plaintext(), dir.path().join("b"));
        Ok(())
    }

    #[test]
    fn test_cleanup_is_idempotent() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("secret");
        fs::write(&path, "plain")?;

        let paths = vec![path.clone()];
        cleanup(&paths);
        assert!(!path.exists());
        cleanup(&paths);
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn test_guard_removes_on_drop() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("secret");
        fs::write(&path, "plain")?;

        {
            let mut guard = DecryptedSecrets::default();
            guard.track(&path);
            guard.track(&path);
            assert_eq!(guard.paths().len(), 1);
        }
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn test_decrypt_command_key_flag() -> anyhow::Result<()> {
        let tool = ToolCommand {
            name: "ansible-vault".to_string(),
            interpreter: None,
            program: PathBuf::from("/bin/ansible-vault"),
        };
        let file = SecretFile::new("/pkg/vault/id_rsa.vaultfile", None)?;

        let without = SecretLifecycleManager::new(tool.clone(), None);
        let args: Vec<_> = without
            .decrypt_command(&file)
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec!["decrypt", "/pkg/vault/id_rsa.vaultfile", "--output", "/pkg/vault/id_rsa"]
        );

        let with = SecretLifecycleManager::new(tool, Some(PathBuf::from("/ws/.vault_pass/prod")));
        let args: Vec<_> = with
            .decrypt_command(&file)
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "decrypt",
                "/pkg/vault/id_rsa.vaultfile",
                "--output",
                "/pkg/vault/id_rsa",
                "--vault-password-file",
                "/ws/.vault_pass/prod"
            ]
        );
        Ok(())
    }

    #[cfg(unix)]
    mod with_fake_vault {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        /// A stand-in for ansible-vault. The "cipher" is rot13, so encrypt and
        /// decrypt are the same transform. Inputs named `bad*` fail after
        /// writing a partial output.
        fn fake_vault(dir: &Path) -> anyhow::Result<(ToolCommand, PathBuf)> {
            let log = dir.join("vault.log");
            let script = dir.join("ansible-vault");
            fs::write(
                &script,
                format!(
                    r#"#!/bin/sh
echo "$@" >> '{log}'
echo "present: $(ls "$(dirname "$4")" | tr '\n' ' ')" >> '{log}'
case "$(basename "$2")" in
  bad*) echo partial > "$4"; exit 4 ;;
esac
tr 'A-Za-z' 'N-ZA-Mn-za-m' < "$2" > "$4"
"#,
                    log = log.display()
                ),
            )?;
            fs::set_permissions(&script, fs::Permissions::from_mode(0o755))?;

            let tool = ToolCommand {
                name: "ansible-vault".to_string(),
                interpreter: None,
                program: script,
            };
            Ok((tool, log))
        }

        fn rot13(text: &str) -> String {
            text.chars()
                .map(|c| match c {
                    'a'..='m' | 'A'..='M' => (c as u8 + 13) as char,
                    'n'..='z' | 'N'..='Z' => (c as u8 - 13) as char,
                    _ => c,
                })
                .collect()
        }

        /// A vault that stops to observe its output, then behaves like `cp`
        fn observing_vault(dir: &Path, body: &str) -> anyhow::Result<ToolCommand> {
            let script = dir.join("observing-vault");
            fs::write(&script, format!("#!/bin/sh\n{}\ncat \"$2\" > \"$4\"\n", body))?;
            fs::set_permissions(&script, fs::Permissions::from_mode(0o755))?;
            Ok(ToolCommand {
                name: "ansible-vault".to_string(),
                interpreter: None,
                program: script,
            })
        }

        fn secrets(dir: &Path, names: &[&str]) -> anyhow::Result<Vec<SecretFile>> {
            let vault_dir = dir.join("vault");
            fs::create_dir_all(&vault_dir)?;
            names
                .iter()
                .map(|name| -> anyhow::Result<SecretFile> {
                    let path = vault_dir.join(format!("{}.vaultfile", name));
                    fs::write(&path, rot13(&format!("Secret for {}\n", name)))?;
                    Ok(SecretFile::new(path, None)?)
                })
                .collect()
        }

        #[test]
        fn test_decrypt_and_cleanup() -> anyhow::Result<()> {
            let dir = tempdir()?;
            let (tool, log) = fake_vault(dir.path())?;
            let files = secrets(dir.path(), &["a", "b"])?;

            let manager = SecretLifecycleManager::new(tool, None);
            let mut decrypted = manager.decrypt(&files)?;

            assert_eq!(decrypted.paths().len(), 2);
            assert_eq!(fs::read_to_string(files[0].plaintext())?, "Secret for a\n");
            let mode = fs::metadata(files[1].plaintext())?.permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
            assert!(!fs::read_to_string(&log)?.contains("--vault-password-file"));

            decrypted.cleanup();
            assert!(files.iter().all(|f| !f.plaintext().exists()));
            assert!(files.iter().all(|f| f.encrypted().exists()));

            // second cleanup is a no-op
            decrypted.cleanup();
            Ok(())
        }

        #[test]
        fn test_key_is_passed_when_located() -> anyhow::Result<()> {
            let dir = tempdir()?;
            let (tool, log) = fake_vault(dir.path())?;
            let files = secrets(dir.path(), &["a"])?;
            let key = dir.path().join(".vault_pass");
            fs::write(&key, "pw")?;

            let manager = SecretLifecycleManager::new(tool, Some(key.clone()));
            let _decrypted = manager.decrypt(&files)?;

            let log = fs::read_to_string(&log)?;
            assert!(log.contains(&format!("--vault-password-file {}", key.display())));
            Ok(())
        }

        #[test]
        fn test_failure_rolls_back_every_plaintext() -> anyhow::Result<()> {
            for failing in 0..3 {
                let dir = tempdir()?;
                let (tool, log) = fake_vault(dir.path())?;
                let mut names = vec!["one", "two", "three"];
                names[failing] = "bad";
                let files = secrets(dir.path(), &names)?;

                let manager = SecretLifecycleManager::new(tool, None);
                let err = manager.decrypt(&files).unwrap_err();
                assert!(matches!(err, VaultError::DecryptFailed { code: 4, .. }));
                assert_eq!(err.exit_code(), 4);

                // nothing after the failing file was attempted
                let log = fs::read_to_string(&log)?;
                assert_eq!(log.matches("decrypt ").count(), failing + 1);

                // earlier plaintexts existed while the failing file was decrypted
                let last_listing = log.lines().last().unwrap_or_default();
                for earlier in &names[..failing] {
                    assert!(last_listing.contains(&format!("{} ", earlier)));
                }

                // and none survive, including the partial output
                assert!(files.iter().all(|f| !f.plaintext().exists()));
            }
            Ok(())
        }

        #[test]
        fn test_interrupt_aborts_before_decrypting() -> anyhow::Result<()> {
            let dir = tempdir()?;
            let (tool, log) = fake_vault(dir.path())?;
            let files = secrets(dir.path(), &["a", "b"])?;

            let interrupt = Interrupt::new();
            interrupt.raise();
            let manager = SecretLifecycleManager::new(tool, None).with_interrupt(interrupt);

            let err = manager.decrypt(&files).unwrap_err();
            assert!(matches!(err, VaultError::Interrupted));
            assert_eq!(err.exit_code(), 130);
            assert!(!log.exists());
            assert!(files.iter().all(|f| !f.plaintext().exists()));
            Ok(())
        }

        #[test]
        fn test_plaintext_is_owner_only_while_written() -> anyhow::Result<()> {
            let dir = tempdir()?;
            let modes = dir.path().join("modes.txt");
            let tool = observing_vault(
                dir.path(),
                &format!("umask 022\nls -l \"$4\" | cut -c1-10 >> '{}'", modes.display()),
            )?;
            let files = secrets(dir.path(), &["a", "b"])?;
            // a stale plaintext with loose permissions is tightened too
            fs::write(files[1].plaintext(), "stale")?;
            fs::set_permissions(files[1].plaintext(), fs::Permissions::from_mode(0o644))?;

            let decrypted = SecretLifecycleManager::new(tool, None).decrypt(&files)?;

            assert_eq!(fs::read_to_string(&modes)?, "-rw-------\n-rw-------\n");
            for file in &files {
                let mode = fs::metadata(file.plaintext())?.permissions().mode();
                assert_eq!(mode & 0o777, 0o600);
            }
            drop(decrypted);
            assert!(files.iter().all(|f| !f.plaintext().exists()));
            Ok(())
        }

        #[test]
        fn test_signal_mid_batch_rolls_back() -> anyhow::Result<()> {
            let dir = tempdir()?;
            let calls = dir.path().join("calls.txt");
            // the signal lands while `b` is being decrypted
            let tool = observing_vault(
                dir.path(),
                &format!(
                    "echo \"$2\" >> '{}'\ncase \"$(basename \"$2\")\" in b*) kill -INT $PPID; sleep 1 ;; esac",
                    calls.display()
                ),
            )?;
            let files = secrets(dir.path(), &["a", "b", "c"])?;

            let interrupt = Interrupt::install()?;
            let manager = SecretLifecycleManager::new(tool, None).with_interrupt(interrupt);

            let err = manager.decrypt(&files).unwrap_err();
            assert!(matches!(err, VaultError::Interrupted));
            assert_eq!(err.exit_code(), 130);

            // `c` was never attempted, and `a` and `b` were rolled back
            assert_eq!(fs::read_to_string(&calls)?.lines().count(), 2);
            assert!(files.iter().all(|f| !f.plaintext().exists()));
            assert!(files.iter().all(|f| f.encrypted().exists()));
            Ok(())
        }

        #[test]
        fn test_round_trip_is_byte_identical() -> anyhow::Result<()> {
            let dir = tempdir()?;
            let (tool, _log) = fake_vault(dir.path())?;
            let plain = dir.path().join("vault/creds.yml");
            fs::create_dir_all(plain.parent().unwrap())?;
            fs::write(&plain, "db_password: Correct-Horse 42\n")?;

            let encrypted = dir.path().join("vault/creds.yml.vaultfile");
            let status = tool
                .command()
                .arg("encrypt")
                .arg(&plain)
                .arg("--output")
                .arg(&encrypted)
                .status()?;
            assert!(status.success());
            let expected = fs::read(&plain)?;
            fs::remove_file(&plain)?;

            let files = vec![SecretFile::new(&encrypted, None)?];
            let decrypted = SecretLifecycleManager::new(tool, None).decrypt(&files)?;
            assert_eq!(fs::read(&decrypted.paths()[0])?, expected);
            drop(decrypted);
            assert!(!plain.exists());
            Ok(())
        }

        #[test]
        fn test_missing_vault_tool() -> anyhow::Result<()> {
            let dir = tempdir()?;
            let files = secrets(dir.path(), &["a"])?;
            let tool = ToolCommand {
                name: "ansible-vault".to_string(),
                interpreter: None,
                program: dir.path().join("no-such-vault"),
            };

            let err = SecretLifecycleManager::new(tool, None)
                .decrypt(&files)
                .unwrap_err();
            assert!(matches!(err, VaultError::Core(CoreError::NotFound(_))));
            Ok(())
        }
    }
}
