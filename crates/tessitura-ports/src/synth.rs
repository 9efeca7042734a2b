use crate::render::BusLayout;
use crate::types::{ChannelProperty, Volume01};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum SynthError {
    #[error("sound bank load failed: {0}")]
    SoundBankLoad(String),
    #[error("unsupported sound bank format")]
    UnsupportedFormat,
    #[error("no sound bank installed")]
    NoSoundBank,
    #[error("backend error: {0}")]
    Backend(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetInfo {
    pub bank: u16,
    pub program: u8,
    pub name: String,
}

/// A decoded sound bank. Decoding belongs to the engine; the core only keeps
/// the decoded handle, its id and its bank offset.
pub trait SoundBank: Send + Sync {
    fn name(&self) -> &str;
    fn presets(&self) -> Vec<PresetInfo>;
    fn as_any(&self) -> &dyn Any;
}

#[derive(Clone)]
pub struct InstalledBank {
    pub id: String,
    pub bank_offset: u8,
    pub bank: Arc<dyn SoundBank>,
}

impl fmt::Debug for InstalledBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstalledBank")
            .field("id", &self.id)
            .field("bank_offset", &self.bank_offset)
            .field("name", &self.bank.name())
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterpolationType {
    Nearest,
    Linear,
    Hermite,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum MasterParameter {
    Volume(Volume01),
    /// -1.0 (left) ..= 1.0 (right)
    Pan(f32),
    VoiceCap(usize),
    Interpolation(InterpolationType),
    Transposition(f32),
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MasterParameters {
    pub volume: Volume01,
    pub pan: f32,
    pub voice_cap: usize,
    pub interpolation: InterpolationType,
    pub transposition: f32,
}

impl Default for MasterParameters {
    fn default() -> Self {
        Self {
            volume: Volume01::new(1.0),
            pan: 0.0,
            voice_cap: 350,
            interpolation: InterpolationType::Linear,
            transposition: 0.0,
        }
    }
}

impl MasterParameters {
    pub fn apply(&mut self, parameter: MasterParameter) {
        match parameter {
            MasterParameter::Volume(volume) => self.volume = volume,
            MasterParameter::Pan(pan) => self.pan = pan.clamp(-1.0, 1.0),
            MasterParameter::VoiceCap(cap) => self.voice_cap = cap,
            MasterParameter::Interpolation(kind) => self.interpolation = kind,
            MasterParameter::Transposition(semitones) => self.transposition = semitones,
        }
    }
}

/// Per-key override applied before a note-on reaches the engine.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyModifier {
    pub velocity: Option<u8>,
    pub velocity_gain: f32,
}

impl Default for KeyModifier {
    fn default() -> Self {
        Self {
            velocity: None,
            velocity_gain: 1.0,
        }
    }
}

impl KeyModifier {
    pub fn apply(&self, velocity: u8) -> u8 {
        let base = self.velocity.unwrap_or(velocity) as f32;
        (base * self.velocity_gain).round().clamp(1.0, 127.0) as u8
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyModifierEntry {
    pub channel: usize,
    pub note: u8,
    pub modifier: KeyModifier,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub program: u8,
    pub bank: u16,
    pub controllers: Vec<u8>,
    pub locked_controllers: Vec<u8>,
    pub pitch_bend: u16,
    pub channel_pressure: u8,
    pub is_muted: bool,
    pub is_drum: bool,
    pub transposition: f32,
}

impl ChannelSnapshot {
    pub fn new(is_drum: bool) -> Self {
        let mut controllers = vec![0; 128];
        controllers[7] = 100;
        controllers[10] = 64;
        controllers[11] = 127;
        Self {
            program: 0,
            bank: if is_drum { 128 } else { 0 },
            controllers,
            locked_controllers: Vec::new(),
            pitch_bend: 8192,
            channel_pressure: 0,
            is_muted: false,
            is_drum,
            transposition: 0.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct SynthSnapshot {
    pub channels: Vec<ChannelSnapshot>,
    pub master: MasterParameters,
    pub key_modifiers: Vec<KeyModifierEntry>,
}

/// Boundary to the external synthesis engine.
///
/// Thread model: the engine is owned by exactly one remote core and only ever
/// called from that core's context. `render` runs on the audio path and must not
/// block.
pub trait SynthEngine: Send {
    fn sample_rate_hz(&self) -> u32;
    fn channel_count(&self) -> usize;
    /// Appends a channel and returns its index.
    fn add_channel(&mut self) -> usize;

    fn decode_sound_bank(&self, data: &[u8]) -> Result<Arc<dyn SoundBank>, SynthError>;
    /// Installs banks in priority order (first = highest priority).
    fn set_sound_banks(&mut self, banks: &[InstalledBank]) -> Result<(), SynthError>;

    fn note_on(&mut self, channel: usize, note: u8, velocity: u8);
    fn note_off(&mut self, channel: usize, note: u8);
    fn poly_pressure(&mut self, channel: usize, note: u8, pressure: u8);
    fn controller_change(&mut self, channel: usize, controller: u8, value: u8);
    fn program_change(&mut self, channel: usize, program: u8);
    fn channel_pressure(&mut self, channel: usize, pressure: u8);
    fn pitch_wheel(&mut self, channel: usize, value: u16);
    fn system_exclusive(&mut self, data: &[u8], channel_offset: usize);

    fn stop_all(&mut self, force: bool);
    fn reset_controllers(&mut self);
    fn set_muted(&mut self, channel: usize, muted: bool);
    fn set_drums(&mut self, channel: usize, is_drum: bool);
    fn transpose_channel(&mut self, channel: usize, semitones: f32, force: bool);
    fn set_master_parameter(&mut self, parameter: MasterParameter);

    fn channel_property(&self, channel: usize) -> Option<ChannelProperty>;
    fn snapshot(&self) -> SynthSnapshot;
    fn apply_snapshot(&mut self, snapshot: &SynthSnapshot);

    /// Renders one quantum into `out`, laid out as described by `layout`.
    fn render(&mut self, layout: &BusLayout, out: &mut [f32]);

    /// Creates an independent engine with the same sound banks, used for
    /// offline rendering.
    fn fork_offline(&self, sample_rate_hz: u32) -> Result<Box<dyn SynthEngine>, SynthError>;
}
