//! shim - Tool impersonation for hermetic linting
//!
//! ansible-lint shells out to `ansible-playbook`, `ansible-config` and
//! friends by name. A shim directory placed first on `PATH` answers those
//! lookups with small scripts bound to the hermetic interpreter, so nothing
//! has to be installed system-wide.

pub mod entrypoints;
pub mod sandbox;

pub use entrypoints::{ansible_entrypoints, ansible_lint_entrypoint, ANSIBLE_LINT};
pub use sandbox::{ShimError, ShimSandbox};
