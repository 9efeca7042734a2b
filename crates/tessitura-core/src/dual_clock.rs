use std::sync::Arc;
use tessitura_ports::clock::Clock;
use tessitura_ports::types::Seconds;

/// Per-read correction applied to the wall-clock estimate, scaled by the
/// playback rate and clamped to 1.
pub const HIGH_RES_SMOOTHING: f64 = 0.01;

/// Main-thread view of a sequencer's song time.
///
/// `current_time` follows the audio clock, which only moves once per render
/// quantum. `current_high_resolution_time` extrapolates with the wall clock and
/// pulls that estimate toward the audio-derived time on every read, so it is
/// smooth and still converges.
pub struct DualClock {
    audio: Arc<dyn Clock>,
    wall: Arc<dyn Clock>,
    absolute_start_time: Seconds,
    high_res_time_offset: Seconds,
    paused_time: Option<Seconds>,
    playback_rate: f64,
}

impl DualClock {
    /// Starts paused at zero.
    pub fn new(audio: Arc<dyn Clock>, wall: Arc<dyn Clock>, playback_rate: f64) -> Self {
        let mut clock = Self {
            audio,
            wall,
            absolute_start_time: 0.0,
            high_res_time_offset: 0.0,
            paused_time: Some(0.0),
            playback_rate: if playback_rate > 0.0 { playback_rate } else { 1.0 },
        };
        clock.recalculate_start_time(0.0);
        clock
    }

    pub fn is_paused(&self) -> bool {
        self.paused_time.is_some()
    }

    pub fn playback_rate(&self) -> f64 {
        self.playback_rate
    }

    pub fn absolute_start_time(&self) -> Seconds {
        self.absolute_start_time
    }

    pub fn high_res_time_offset(&self) -> Seconds {
        self.high_res_time_offset
    }

    pub fn current_time(&self) -> Seconds {
        match self.paused_time {
            Some(time) => time,
            None => (self.audio.now() - self.absolute_start_time) * self.playback_rate,
        }
    }

    pub fn current_high_resolution_time(&mut self) -> Seconds {
        if let Some(time) = self.paused_time {
            return time;
        }
        let current = self.current_time();
        let elapsed = (self.wall.now() - self.absolute_start_time) * self.playback_rate;
        let estimated = self.high_res_time_offset + elapsed;
        let factor = (HIGH_RES_SMOOTHING * self.playback_rate).min(1.0);
        self.high_res_time_offset += (current - estimated) * factor;
        self.high_res_time_offset + elapsed
    }

    /// Anchors both clocks so that `current_time()` reads `time` now.
    pub fn recalculate_start_time(&mut self, time: Seconds) {
        let audio_now = self.audio.now();
        self.absolute_start_time = audio_now - time / self.playback_rate;
        self.high_res_time_offset = (audio_now - self.wall.now()) * self.playback_rate;
        if self.paused_time.is_some() {
            self.paused_time = Some(time);
        }
    }

    pub fn pause(&mut self) {
        if self.paused_time.is_none() {
            self.paused_time = Some(self.current_time());
        }
    }

    pub fn pause_at(&mut self, time: Seconds) {
        self.paused_time = Some(time);
        self.recalculate_start_time(time);
    }

    /// Resumes from the paused position. No-op when already running.
    pub fn resume(&mut self) {
        if let Some(time) = self.paused_time.take() {
            self.recalculate_start_time(time);
        }
    }

    pub fn resume_at(&mut self, time: Seconds) {
        self.paused_time = None;
        self.recalculate_start_time(time);
    }

    /// Changes the rate without a jump in either time reading.
    pub fn set_playback_rate(&mut self, rate: f64) {
        if !(rate.is_finite() && rate > 0.0) {
            return;
        }
        let time = self.current_time();
        self.high_res_time_offset *= rate / self.playback_rate;
        self.playback_rate = rate;
        if self.paused_time.is_none() {
            self.absolute_start_time = self.audio.now() - time / rate;
        }
    }
}
