use serde::{Deserialize, Serialize};

fn default_sample_rate_hz() -> u32 {
    48_000
}

fn default_quantum_frames() -> usize {
    128
}

fn default_initial_channels() -> usize {
    16
}

fn default_true() -> bool {
    true
}

fn default_playback_rate() -> f64 {
    1.0
}

/// How a handle treats a second request of a kind whose first request is
/// still unanswered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CorrelationPolicy {
    /// Only the newest request is resolved; earlier ones observe `Superseded`.
    LatestWins,
    /// Requests are resolved first-in first-out.
    #[default]
    Queued,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    #[serde(default = "default_sample_rate_hz")]
    pub sample_rate_hz: u32,
    #[serde(default = "default_quantum_frames")]
    pub quantum_frames: usize,
    #[serde(default = "default_initial_channels")]
    pub initial_channels: usize,
    pub correlation_policy: CorrelationPolicy,
    #[serde(default = "default_true")]
    pub report_channel_properties: bool,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: default_sample_rate_hz(),
            quantum_frames: default_quantum_frames(),
            initial_channels: default_initial_channels(),
            correlation_policy: CorrelationPolicy::Queued,
            report_channel_properties: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerOptions {
    #[serde(default = "default_true")]
    pub skip_to_first_note_on: bool,
    #[serde(default = "default_true")]
    pub auto_play: bool,
    pub preserve_playback_state: bool,
    #[serde(default = "default_playback_rate")]
    pub initial_playback_rate: f64,
}

impl Default for SequencerOptions {
    fn default() -> Self {
        Self {
            skip_to_first_note_on: true,
            auto_play: true,
            preserve_playback_state: false,
            initial_playback_rate: 1.0,
        }
    }
}

fn default_queue_quanta() -> usize {
    20
}

fn default_refill_threshold() -> usize {
    10
}

fn default_idle_poll_ms() -> u64 {
    5
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    #[serde(default = "default_queue_quanta")]
    pub queue_quanta: usize,
    #[serde(default = "default_refill_threshold")]
    pub refill_threshold: usize,
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_quanta: default_queue_quanta(),
            refill_threshold: default_refill_threshold(),
            idle_poll_ms: default_idle_poll_ms(),
        }
    }
}

fn default_render_sample_rate_hz() -> u32 {
    44_100
}

fn default_tail_seconds() -> f64 {
    2.0
}

fn default_progress_interval_quanta() -> usize {
    256
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    #[serde(default = "default_render_sample_rate_hz")]
    pub sample_rate_hz: u32,
    #[serde(default = "default_tail_seconds")]
    pub tail_seconds: f64,
    #[serde(default = "default_progress_interval_quanta")]
    pub progress_interval_quanta: usize,
    pub loop_count: u32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            sample_rate_hz: default_render_sample_rate_hz(),
            tail_seconds: default_tail_seconds(),
            progress_interval_quanta: default_progress_interval_quanta(),
            loop_count: 0,
        }
    }
}
