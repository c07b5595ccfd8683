//! Interrupt tracking
//!
//! While installed, SIGINT and SIGTERM record the signal instead of
//! terminating the process. Children in the same process group still receive
//! a terminal's Ctrl-C; a signal aimed at this process alone is passed on by
//! [`crate::process::launch_forwarding`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::SigId;
use tracing::warn;

use crate::error::{CoreError, Result};

const NONE: usize = 0;

#[derive(Debug, Default)]
struct Registrations(Vec<SigId>);

impl Drop for Registrations {
    fn drop(&mut self) {
        for id in self.0.drain(..) {
            signal_hook::low_level::unregister(id);
        }
    }
}

/// Shared interrupt flag, optionally wired to process signals
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    /// Last signal received, `0` while none has arrived
    signal: Arc<AtomicUsize>,
    /// Kept alive for its `Drop`, which unregisters the handlers
    _registrations: Arc<Registrations>,
}

impl Interrupt {
    /// A flag that is only raised manually
    pub fn new() -> Self {
        Self::default()
    }

    /// Register SIGINT and SIGTERM; handlers stay until the last clone drops
    pub fn install() -> Result<Self> {
        let signal = Arc::new(AtomicUsize::new(NONE));
        let mut ids = Vec::with_capacity(2);
        for sig in [SIGINT, SIGTERM] {
            ids.push(signal_hook::flag::register_usize(
                sig,
                Arc::clone(&signal),
                sig as usize,
            )?);
        }

        Ok(Self {
            signal,
            _registrations: Arc::new(Registrations(ids)),
        })
    }

    /// Raise the flag as if SIGINT had arrived
    pub fn raise(&self) {
        self.signal.store(SIGINT as usize, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.signal().is_some()
    }

    /// The signal that raised the flag
    pub fn signal(&self) -> Option<i32> {
        match self.signal.load(Ordering::SeqCst) {
            NONE => None,
            sig => i32::try_from(sig).ok(),
        }
    }

    /// Fail with `Interrupted` if a signal arrived
    pub fn check(&self) -> Result<()> {
        if self.is_raised() {
            warn!("Interrupt received");
            return Err(CoreError::Interrupted);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_raise_is_shared() {
        let interrupt = Interrupt::new();
        let clone = interrupt.clone();
        assert!(interrupt.check().is_ok());
        assert_eq!(interrupt.signal(), None);

        clone.raise();
        assert!(interrupt.is_raised());
        assert_eq!(interrupt.signal(), Some(SIGINT));
        assert!(matches!(interrupt.check(), Err(CoreError::Interrupted)));
    }
}
