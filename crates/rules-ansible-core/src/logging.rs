//! Logging setup for the launcher binaries

use tracing_subscriber::EnvFilter;

use crate::env::DEBUG;

/// Install the global subscriber, writing to stderr
///
/// `RULES_ANSIBLE_DEBUG` forces debug output, otherwise `RUST_LOG` applies.
pub fn init() {
    let filter = if std::env::var_os(DEBUG).is_some() {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    // A second init (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
