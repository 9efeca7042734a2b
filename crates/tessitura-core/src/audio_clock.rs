use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tessitura_ports::clock::Clock;
use tessitura_ports::types::{SampleTime, Seconds};

/// Sample-counted clock advanced by the remote core once per rendered quantum.
/// Handles read it through the `Clock` trait.
#[derive(Debug)]
pub struct AudioClock {
    sample_time: AtomicU64,
    sample_rate_hz: AtomicU32,
}

impl AudioClock {
    pub fn new(sample_rate_hz: u32) -> Self {
        Self {
            sample_time: AtomicU64::new(0),
            sample_rate_hz: AtomicU32::new(sample_rate_hz.max(1)),
        }
    }

    pub fn set(&self, sample_time: SampleTime) {
        self.sample_time.store(sample_time, Ordering::Relaxed);
    }

    pub fn get(&self) -> SampleTime {
        self.sample_time.load(Ordering::Relaxed)
    }

    pub fn advance(&self, frames: usize) {
        self.sample_time.fetch_add(frames as u64, Ordering::Relaxed);
    }

    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz.load(Ordering::Relaxed)
    }
}

impl Default for AudioClock {
    fn default() -> Self {
        Self::new(48_000)
    }
}

impl Clock for AudioClock {
    fn now(&self) -> Seconds {
        self.get() as f64 / self.sample_rate_hz() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_moves_seconds_by_sample_rate() {
        let clock = AudioClock::new(48_000);
        clock.advance(24_000);
        assert_eq!(clock.get(), 24_000);
        assert!((clock.now() - 0.5).abs() < 1e-12);
    }
}
