//! rules_ansible core - Shared functionality for the ansible launchers
//!
//! Build actions and tests run inside a sandbox where declared inputs are
//! only reachable through a runfile index. Interactive `bazel run` invocations
//! run in the real workspace. Everything in here hides that difference from
//! the tools built on top.

pub mod env;
pub mod error;
pub mod interrupt;
pub mod logging;
pub mod process;
pub mod resolver;
pub mod runfiles;

pub use env::{LaunchEnv, ToolCommand};
pub use error::{CoreError, Result};
pub use interrupt::Interrupt;
pub use process::{CapturedOutput, ProcessEnvironment};
pub use resolver::LocationResolver;
pub use runfiles::Runfiles;
