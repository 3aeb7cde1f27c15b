use std::fmt::{Display, Formatter};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::errors::{Error, InvariantViolation};

/// Total glow time (in milliseconds) measured on the input and not yet mirrored on the output.
///
/// Shared between the [`Poller`](crate::glow::Poller), which adds to it on every deassert edge, and
/// the [`Actuator`](crate::glow::Actuator), which consumes it once the output has glowed long
/// enough. Every read-modify-write happens in a single critical section: the lock is never exposed
/// and never held across an `.await`.
#[derive(Clone, Debug, Default)]
pub struct GlowTime {
    total: Arc<Mutex<u64>>,
}

impl GlowTime {
    /// Adds `ms` to the total and returns the new total.
    ///
    /// # Errors
    /// * `InvariantViolation`: the total would overflow (the total is left unchanged).
    pub fn add_and_get(&self, ms: u64) -> Result<u64, Error> {
        let mut total = self.total.lock();
        let next = total.checked_add(ms).ok_or_else(|| InvariantViolation {
            info: format!("glow time overflow: {} + {}", *total, ms),
        })?;
        *total = next;
        Ok(next)
    }

    /// Returns the total and resets it to zero, as one atomic step.
    pub fn read_and_zero(&self) -> u64 {
        std::mem::take(&mut *self.total.lock())
    }

    /// Returns the current total.
    pub fn get(&self) -> u64 {
        *self.total.lock()
    }
}

impl Display for GlowTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "GlowTime [total={}ms]", self.get())
    }
}
