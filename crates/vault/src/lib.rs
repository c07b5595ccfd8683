//! vault - Secret handling for the ansible launchers
//!
//! "Secrets exist on disk only while the playbook runs."
//!
//! Encrypted `*.vaultfile` inputs are decrypted next to themselves with
//! `ansible-vault`, handed to the playbook, and removed again on every exit
//! path. The password file is discovered from the `.vault_pass` convention.

pub mod key;
pub mod vault;

pub use key::SecretKeyLocator;
pub use vault::{
    cleanup, collect_secret_files, DecryptedSecrets, SecretFile, SecretLifecycleManager,
    VaultError,
};
