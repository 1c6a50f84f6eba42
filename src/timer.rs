use std::sync::{Arc, Mutex, PoisonError};

use crate::error::Result;

/// One-shot millisecond timer driving the link restore logic.
///
/// When the timer expires the owner calls `Dpnic::timer_restore`.
pub trait RestoreTimer: Send {
    /// (Re)arms the timer to fire once after `millis` milliseconds.
    fn set_millis(&mut self, millis: u32) -> Result<()>;
    fn stop(&mut self);
}

/// A timer that only remembers when it is due.
///
/// Hosts with their own scheduler poll `armed()` and fire the device
/// callback themselves; clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct ManualTimer {
    armed: Arc<Mutex<Option<u32>>>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay of the pending expiry, if any.
    pub fn armed(&self) -> Option<u32> {
        *self.armed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Consumes the pending expiry.
    pub fn take(&self) -> Option<u32> {
        self.armed.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

impl RestoreTimer for ManualTimer {
    fn set_millis(&mut self, millis: u32) -> Result<()> {
        *self.armed.lock().unwrap_or_else(PoisonError::into_inner) = Some(millis);
        Ok(())
    }

    fn stop(&mut self) {
        self.take();
    }
}
