use crate::config::{RenderOptions, SequencerOptions};
use serde::{Deserialize, Serialize};
use tessitura_domain_song::{ParsedSong, SongMetadata, SongSource, TextKind};
use tessitura_ports::synth::{KeyModifier, MasterParameter, PresetInfo, SynthSnapshot};
use tessitura_ports::types::{ChannelProperty, ChannelTarget, LoopCount, Seconds, SequencerId};

/// Every message crossing the handle/remote boundary carries a channel target.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope<M> {
    pub channel: ChannelTarget,
    pub message: M,
}

impl<M> Envelope<M> {
    pub fn new(channel: ChannelTarget, message: M) -> Self {
        Self { channel, message }
    }

    pub fn global(message: M) -> Self {
        Self::new(ChannelTarget::All, message)
    }
}

/// When a raw MIDI message is applied on the remote side, in audio-clock seconds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "payload")]
pub enum MessageTiming {
    #[default]
    Immediate,
    At(Seconds),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Stereo float audio produced by an offline render.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RenderedAudio {
    pub sample_rate_hz: u32,
    pub left: Vec<f32>,
    pub right: Vec<f32>,
}

impl RenderedAudio {
    pub fn frames(&self) -> usize {
        self.left.len().min(self.right.len())
    }

    pub fn duration(&self) -> Seconds {
        if self.sample_rate_hz == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate_hz as f64
    }
}

/// Handle -> remote. Channel-scoped variants take their channel from the envelope.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Command {
    MidiMessage {
        data: Vec<u8>,
        channel_offset: usize,
        force: bool,
        timing: MessageTiming,
    },
    ControllerChange { controller: u8, value: u8, force: bool },
    ProgramChange { program: u8 },
    PitchWheel { value: u16 },
    ChannelPressure { pressure: u8 },
    PolyPressure { note: u8, pressure: u8 },
    StopAll { force: bool },
    ResetControllers,
    MuteChannel { muted: bool },
    SetDrums { is_drum: bool },
    TransposeChannel { semitones: f32, force: bool },
    LockController { controller: u8, locked: bool },
    SetMasterParameter(MasterParameter),
    AddSoundBank { data: Vec<u8>, id: String, bank_offset: u8 },
    DeleteSoundBank { id: String },
    RearrangeSoundBanks { order: Vec<String> },
    AddKeyModifier { note: u8, modifier: KeyModifier },
    DeleteKeyModifier { note: u8 },
    ClearKeyModifiers,
    RequestSnapshot,
    ApplySnapshot(SynthSnapshot),
    NewSequencer { id: SequencerId, options: SequencerOptions },
    Sequencer { id: SequencerId, command: SequencerCommand },
    SetLogLevel(LogLevel),
    RenderAudio { song: SongSource, options: RenderOptions },
    WriteWav { audio: RenderedAudio },
    Destroy,
}

impl Command {
    /// The response kind a correlated command waits for; `None` for fire-and-forget.
    pub fn expected_response(&self) -> Option<ResponseKind> {
        match self {
            Command::AddSoundBank { .. }
            | Command::DeleteSoundBank { .. }
            | Command::RearrangeSoundBanks { .. } => Some(ResponseKind::SoundBankOp),
            Command::RequestSnapshot => Some(ResponseKind::Snapshot),
            Command::RenderAudio { .. } => Some(ResponseKind::RenderComplete),
            Command::WriteWav { .. } => Some(ResponseKind::WriteFile),
            Command::Sequencer { command, .. } => command.expected_response(),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::MidiMessage { .. } => "MidiMessage",
            Command::ControllerChange { .. } => "ControllerChange",
            Command::ProgramChange { .. } => "ProgramChange",
            Command::PitchWheel { .. } => "PitchWheel",
            Command::ChannelPressure { .. } => "ChannelPressure",
            Command::PolyPressure { .. } => "PolyPressure",
            Command::StopAll { .. } => "StopAll",
            Command::ResetControllers => "ResetControllers",
            Command::MuteChannel { .. } => "MuteChannel",
            Command::SetDrums { .. } => "SetDrums",
            Command::TransposeChannel { .. } => "TransposeChannel",
            Command::LockController { .. } => "LockController",
            Command::SetMasterParameter(_) => "SetMasterParameter",
            Command::AddSoundBank { .. } => "AddSoundBank",
            Command::DeleteSoundBank { .. } => "DeleteSoundBank",
            Command::RearrangeSoundBanks { .. } => "RearrangeSoundBanks",
            Command::AddKeyModifier { .. } => "AddKeyModifier",
            Command::DeleteKeyModifier { .. } => "DeleteKeyModifier",
            Command::ClearKeyModifiers => "ClearKeyModifiers",
            Command::RequestSnapshot => "RequestSnapshot",
            Command::ApplySnapshot(_) => "ApplySnapshot",
            Command::NewSequencer { .. } => "NewSequencer",
            Command::Sequencer { .. } => "Sequencer",
            Command::SetLogLevel(_) => "SetLogLevel",
            Command::RenderAudio { .. } => "RenderAudio",
            Command::WriteWav { .. } => "WriteWav",
            Command::Destroy => "Destroy",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum SongChange {
    Index(usize),
    Next,
    Previous,
    ShuffleOn,
    ShuffleOff,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum SequencerCommand {
    LoadNewSongList { songs: Vec<SongSource>, auto_play: bool },
    Pause,
    Play,
    SetTime(Seconds),
    SetExternalMidiPlayback(bool),
    SetPlaybackRate(f64),
    SetLoop(bool),
    SetLoopCount(LoopCount),
    ChangeSong(SongChange),
    GetMidi,
    SetSkipToFirstNoteOn(bool),
    SetPreservePlaybackState(bool),
}

impl SequencerCommand {
    pub fn expected_response(&self) -> Option<ResponseKind> {
        match self {
            SequencerCommand::GetMidi => Some(ResponseKind::MidiData),
            _ => None,
        }
    }
}

/// Remote -> handle.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Outbound {
    Synth(SynthEvent),
    Sequencer { id: SequencerId, event: SequencerEvent },
    SequencerResponse { id: SequencerId, response: Response },
    Response(Response),
    SoundBankError(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum SynthEvent {
    NoteOn { channel: usize, note: u8, velocity: u8 },
    NoteOff { channel: usize, note: u8 },
    PitchWheel { channel: usize, value: u16 },
    ControllerChange { channel: usize, controller: u8, value: u8 },
    ProgramChange { channel: usize, program: u8 },
    ChannelPressure { channel: usize, pressure: u8 },
    PolyPressure { channel: usize, note: u8, pressure: u8 },
    DrumChange { channel: usize, is_drum: bool },
    StopAll,
    NewChannel { channel: usize },
    MuteChannel { channel: usize, muted: bool },
    PresetListChange(Vec<PresetInfo>),
    AllControllersReset { channel: ChannelTarget },
    SoundBankError(String),
    DisplayText(String),
    MasterParameterChange(MasterParameter),
    ChannelPropertyChange { channel: usize, property: ChannelProperty },
    RenderProgress { progress: f32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SynthEventKind {
    NoteOn,
    NoteOff,
    PitchWheel,
    ControllerChange,
    ProgramChange,
    ChannelPressure,
    PolyPressure,
    DrumChange,
    StopAll,
    NewChannel,
    MuteChannel,
    PresetListChange,
    AllControllersReset,
    SoundBankError,
    DisplayText,
    MasterParameterChange,
    ChannelPropertyChange,
    RenderProgress,
}

impl SynthEvent {
    pub fn kind(&self) -> SynthEventKind {
        match self {
            SynthEvent::NoteOn { .. } => SynthEventKind::NoteOn,
            SynthEvent::NoteOff { .. } => SynthEventKind::NoteOff,
            SynthEvent::PitchWheel { .. } => SynthEventKind::PitchWheel,
            SynthEvent::ControllerChange { .. } => SynthEventKind::ControllerChange,
            SynthEvent::ProgramChange { .. } => SynthEventKind::ProgramChange,
            SynthEvent::ChannelPressure { .. } => SynthEventKind::ChannelPressure,
            SynthEvent::PolyPressure { .. } => SynthEventKind::PolyPressure,
            SynthEvent::DrumChange { .. } => SynthEventKind::DrumChange,
            SynthEvent::StopAll => SynthEventKind::StopAll,
            SynthEvent::NewChannel { .. } => SynthEventKind::NewChannel,
            SynthEvent::MuteChannel { .. } => SynthEventKind::MuteChannel,
            SynthEvent::PresetListChange(_) => SynthEventKind::PresetListChange,
            SynthEvent::AllControllersReset { .. } => SynthEventKind::AllControllersReset,
            SynthEvent::SoundBankError(_) => SynthEventKind::SoundBankError,
            SynthEvent::DisplayText(_) => SynthEventKind::DisplayText,
            SynthEvent::MasterParameterChange(_) => SynthEventKind::MasterParameterChange,
            SynthEvent::ChannelPropertyChange { .. } => SynthEventKind::ChannelPropertyChange,
            SynthEvent::RenderProgress { .. } => SynthEventKind::RenderProgress,
        }
    }

    pub fn channel(&self) -> ChannelTarget {
        match self {
            SynthEvent::NoteOn { channel, .. }
            | SynthEvent::NoteOff { channel, .. }
            | SynthEvent::PitchWheel { channel, .. }
            | SynthEvent::ControllerChange { channel, .. }
            | SynthEvent::ProgramChange { channel, .. }
            | SynthEvent::ChannelPressure { channel, .. }
            | SynthEvent::PolyPressure { channel, .. }
            | SynthEvent::DrumChange { channel, .. }
            | SynthEvent::NewChannel { channel }
            | SynthEvent::MuteChannel { channel, .. }
            | SynthEvent::ChannelPropertyChange { channel, .. } => ChannelTarget::Channel(*channel),
            SynthEvent::AllControllersReset { channel } => *channel,
            _ => ChannelTarget::All,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum SequencerEvent {
    SongChange {
        metadata: SongMetadata,
        song_index: usize,
        start_time: Seconds,
        auto_play: bool,
    },
    SongEnded { time: Seconds },
    TimeChange { time: Seconds },
    /// Authoritative play/pause transition at song time `time`.
    PlaybackStateChange { paused: bool, time: Seconds },
    TextEvent { kind: TextKind, data: Vec<u8>, track: usize },
    MetaEvent { meta_type: u8, data: Vec<u8>, track: usize },
    MidiError(String),
    LoopCountChange(LoopCount),
    SongListChange(Vec<SongMetadata>),
    /// Raw bytes for an external MIDI output; the channel nibble is the in-port channel.
    ExternalMidi { data: Vec<u8>, channel_offset: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SequencerEventKind {
    SongChange,
    SongEnded,
    TimeChange,
    PlaybackStateChange,
    TextEvent,
    MetaEvent,
    MidiError,
    LoopCountChange,
    SongListChange,
    ExternalMidi,
}

impl SequencerEvent {
    pub fn kind(&self) -> SequencerEventKind {
        match self {
            SequencerEvent::SongChange { .. } => SequencerEventKind::SongChange,
            SequencerEvent::SongEnded { .. } => SequencerEventKind::SongEnded,
            SequencerEvent::TimeChange { .. } => SequencerEventKind::TimeChange,
            SequencerEvent::PlaybackStateChange { .. } => SequencerEventKind::PlaybackStateChange,
            SequencerEvent::TextEvent { .. } => SequencerEventKind::TextEvent,
            SequencerEvent::MetaEvent { .. } => SequencerEventKind::MetaEvent,
            SequencerEvent::MidiError(_) => SequencerEventKind::MidiError,
            SequencerEvent::LoopCountChange(_) => SequencerEventKind::LoopCountChange,
            SequencerEvent::SongListChange(_) => SequencerEventKind::SongListChange,
            SequencerEvent::ExternalMidi { .. } => SequencerEventKind::ExternalMidi,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum SoundBankOpStatus {
    Applied { presets: usize },
    Rejected(String),
    Failed(String),
}

impl SoundBankOpStatus {
    pub fn is_applied(&self) -> bool {
        matches!(self, SoundBankOpStatus::Applied { .. })
    }
}

/// Correlated replies. `RenderProgress` is informational and resolves nothing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Response {
    InitializationComplete,
    SoundBankOp(SoundBankOpStatus),
    Snapshot(SynthSnapshot),
    RenderProgress(f32),
    RenderComplete(Result<RenderedAudio, String>),
    WriteFile(Result<Vec<u8>, String>),
    MidiData(Option<ParsedSong>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseKind {
    InitializationComplete,
    SoundBankOp,
    Snapshot,
    RenderProgress,
    RenderComplete,
    WriteFile,
    MidiData,
}

impl Response {
    pub fn kind(&self) -> ResponseKind {
        match self {
            Response::InitializationComplete => ResponseKind::InitializationComplete,
            Response::SoundBankOp(_) => ResponseKind::SoundBankOp,
            Response::Snapshot(_) => ResponseKind::Snapshot,
            Response::RenderProgress(_) => ResponseKind::RenderProgress,
            Response::RenderComplete(_) => ResponseKind::RenderComplete,
            Response::WriteFile(_) => ResponseKind::WriteFile,
            Response::MidiData(_) => ResponseKind::MidiData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlated_commands_name_their_response() {
        let add = Command::AddSoundBank {
            data: vec![],
            id: "main".into(),
            bank_offset: 0,
        };
        assert_eq!(add.expected_response(), Some(ResponseKind::SoundBankOp));
        assert_eq!(Command::RequestSnapshot.expected_response(), Some(ResponseKind::Snapshot));
        let get_midi = Command::Sequencer {
            id: 0,
            command: SequencerCommand::GetMidi,
        };
        assert_eq!(get_midi.expected_response(), Some(ResponseKind::MidiData));
        assert_eq!(Command::StopAll { force: true }.expected_response(), None);
    }

    #[test]
    fn synth_event_channel_follows_payload() {
        let event = SynthEvent::NoteOn {
            channel: 3,
            note: 60,
            velocity: 100,
        };
        assert_eq!(event.channel(), ChannelTarget::Channel(3));
        assert_eq!(event.kind(), SynthEventKind::NoteOn);
        assert_eq!(SynthEvent::StopAll.channel(), ChannelTarget::All);
    }
}
