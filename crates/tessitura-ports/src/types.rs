use serde::{Deserialize, Serialize};
use std::fmt;

pub type Tick = i64; // musical time, monotonic in a song
pub type SampleTime = u64; // audio sample index, monotonic while the core is alive
pub type Seconds = f64;
pub type SequencerId = usize;

pub const CHANNELS_PER_PORT: usize = 16;

/// Channel addressing of an envelope. On the wire this is a plain integer where
/// `-1` means "all channels / not channel specific".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum ChannelTarget {
    All,
    Channel(usize),
}

impl ChannelTarget {
    pub fn channel(self) -> Option<usize> {
        match self {
            ChannelTarget::All => None,
            ChannelTarget::Channel(channel) => Some(channel),
        }
    }
}

impl From<i64> for ChannelTarget {
    fn from(value: i64) -> Self {
        if value < 0 {
            ChannelTarget::All
        } else {
            ChannelTarget::Channel(value as usize)
        }
    }
}

impl From<ChannelTarget> for i64 {
    fn from(value: ChannelTarget) -> Self {
        match value {
            ChannelTarget::All => -1,
            ChannelTarget::Channel(channel) => channel as i64,
        }
    }
}

impl fmt::Display for ChannelTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelTarget::All => write!(f, "all"),
            ChannelTarget::Channel(channel) => write!(f, "{channel}"),
        }
    }
}

/// Remaining loop repetitions of a sequencer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopCount {
    Infinite,
    Finite(u32),
}

impl LoopCount {
    pub fn can_loop(self) -> bool {
        match self {
            LoopCount::Infinite => true,
            LoopCount::Finite(count) => count > 0,
        }
    }

    pub fn decrement(self) -> Self {
        match self {
            LoopCount::Infinite => LoopCount::Infinite,
            LoopCount::Finite(count) => LoopCount::Finite(count.saturating_sub(1)),
        }
    }
}

impl Default for LoopCount {
    fn default() -> Self {
        LoopCount::Infinite
    }
}

/// Read-only per-channel state mirrored on the handle side.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelProperty {
    pub voices_amount: usize,
    pub pitch_bend: u16,
    pub pitch_bend_range: f32,
    pub is_muted: bool,
    pub is_drum: bool,
    pub transposition: f32,
}

impl Default for ChannelProperty {
    fn default() -> Self {
        Self {
            voices_amount: 0,
            pitch_bend: 8192,
            pitch_bend_range: 2.0,
            is_muted: false,
            is_drum: false,
            transposition: 0.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct Volume01(pub f32);

impl Volume01 {
    pub fn new(value: f32) -> Self {
        Self(value.clamp(0.0, 1.0))
    }

    pub fn get(self) -> f32 {
        self.0
    }
}

/// Splits an absolute channel number into the in-port channel and the
/// 16-aligned port offset.
pub fn split_channel(channel: usize) -> (u8, usize) {
    let in_port = channel % CHANNELS_PER_PORT;
    (in_port as u8, channel - in_port)
}
