//! Monotonic time source shared by the scheduler and the inactivity tracker.

use tokio::time::Instant;

/// Time provider interface (allows driving time in tests).
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Production clock. Follows tokio's clock, so a paused runtime pauses it too.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
