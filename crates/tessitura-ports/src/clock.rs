use crate::types::Seconds;
use parking_lot::Mutex;
use std::time::Instant;

/// Injected time source. Handles get both an audio clock (authoritative,
/// coarse) and a wall clock (smooth, drifting); the remote core reads the
/// audio clock only.
pub trait Clock: Send + Sync {
    fn now(&self) -> Seconds;
}

#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Seconds {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Clock that only moves when told to. Used to drive deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Seconds>,
}

impl ManualClock {
    pub fn new(start: Seconds) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: Seconds) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, delta: Seconds) {
        *self.now.lock() += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Seconds {
        *self.now.lock()
    }
}
