#![allow(dead_code)]

use midly::num::{u15, u24, u28, u4, u7};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use std::any::Any;
use std::sync::{Arc, Mutex};
use tessitura_core::{
    AudioClock, RemoteError, SequencerHandle, SynthConfig, SynthHandle, SynthRemoteCore,
};
use tessitura_ports::clock::ManualClock;
use tessitura_ports::render::BusLayout;
use tessitura_ports::synth::{
    ChannelSnapshot, InstalledBank, MasterParameter, PresetInfo, SoundBank, SynthEngine, SynthError,
    SynthSnapshot,
};
use tessitura_ports::types::ChannelProperty;

pub const SAMPLE_RATE: u32 = 48_000;
pub const QUANTUM: usize = 480;
pub const PPQ: u16 = 480;
/// At the default 120 bpm.
pub const TICKS_PER_SECOND: u32 = 960;

#[derive(Clone, Debug, PartialEq)]
pub enum EngineCall {
    NoteOn { channel: usize, note: u8, velocity: u8 },
    NoteOff { channel: usize, note: u8 },
    Controller { channel: usize, controller: u8, value: u8 },
    Program { channel: usize, program: u8 },
    PitchWheel { channel: usize, value: u16 },
    SystemExclusive(Vec<u8>),
    StopAll { force: bool },
    ResetControllers,
    SoundBanks(Vec<String>),
    Muted { channel: usize, muted: bool },
    Master(MasterParameter),
}

pub type Calls = Arc<Mutex<Vec<EngineCall>>>;

pub fn note_ons(calls: &Calls) -> Vec<EngineCall> {
    calls
        .lock()
        .unwrap()
        .iter()
        .filter(|call| matches!(call, EngineCall::NoteOn { .. }))
        .cloned()
        .collect()
}

pub struct FakeBank {
    name: String,
}

impl SoundBank for FakeBank {
    fn name(&self) -> &str {
        &self.name
    }

    fn presets(&self) -> Vec<PresetInfo> {
        vec![
            PresetInfo {
                bank: 0,
                program: 0,
                name: format!("{} piano", self.name),
            },
            PresetInfo {
                bank: 128,
                program: 0,
                name: format!("{} drums", self.name),
            },
        ]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn bank_bytes(name: &str) -> Vec<u8> {
    let mut data = b"BANK:".to_vec();
    data.extend_from_slice(name.as_bytes());
    data
}

#[derive(Clone)]
struct FakeChannel {
    held: Vec<u8>,
    program: u8,
    controllers: Vec<u8>,
    pitch_bend: u16,
    is_muted: bool,
    is_drum: bool,
}

impl FakeChannel {
    fn new(index: usize) -> Self {
        Self {
            held: Vec::new(),
            program: 0,
            controllers: ChannelSnapshot::new(index % 16 == 9).controllers,
            pitch_bend: 8192,
            is_muted: false,
            is_drum: index % 16 == 9,
        }
    }
}

/// Records every call and keeps just enough state to answer queries.
pub struct FakeEngine {
    sample_rate_hz: u32,
    channels: Vec<FakeChannel>,
    calls: Calls,
    level: f32,
}

impl FakeEngine {
    pub fn new(sample_rate_hz: u32) -> (Self, Calls) {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let engine = Self {
            sample_rate_hz,
            channels: (0..16).map(FakeChannel::new).collect(),
            calls: calls.clone(),
            level: 0.25,
        };
        (engine, calls)
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl SynthEngine for FakeEngine {
    fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn add_channel(&mut self) -> usize {
        let index = self.channels.len();
        self.channels.push(FakeChannel::new(index));
        index
    }

    fn decode_sound_bank(&self, data: &[u8]) -> Result<Arc<dyn SoundBank>, SynthError> {
        match data.strip_prefix(b"BANK:") {
            Some(name) => Ok(Arc::new(FakeBank {
                name: String::from_utf8_lossy(name).into_owned(),
            })),
            None => Err(SynthError::UnsupportedFormat),
        }
    }

    fn set_sound_banks(&mut self, banks: &[InstalledBank]) -> Result<(), SynthError> {
        self.record(EngineCall::SoundBanks(
            banks.iter().map(|bank| bank.id.clone()).collect(),
        ));
        Ok(())
    }

    fn note_on(&mut self, channel: usize, note: u8, velocity: u8) {
        self.channels[channel].held.push(note);
        self.record(EngineCall::NoteOn {
            channel,
            note,
            velocity,
        });
    }

    fn note_off(&mut self, channel: usize, note: u8) {
        self.channels[channel].held.retain(|held| *held != note);
        self.record(EngineCall::NoteOff { channel, note });
    }

    fn poly_pressure(&mut self, _channel: usize, _note: u8, _pressure: u8) {}

    fn controller_change(&mut self, channel: usize, controller: u8, value: u8) {
        self.channels[channel].controllers[controller as usize] = value;
        self.record(EngineCall::Controller {
            channel,
            controller,
            value,
        });
    }

    fn program_change(&mut self, channel: usize, program: u8) {
        self.channels[channel].program = program;
        self.record(EngineCall::Program { channel, program });
    }

    fn channel_pressure(&mut self, _channel: usize, _pressure: u8) {}

    fn pitch_wheel(&mut self, channel: usize, value: u16) {
        self.channels[channel].pitch_bend = value;
        self.record(EngineCall::PitchWheel { channel, value });
    }

    fn system_exclusive(&mut self, data: &[u8], _channel_offset: usize) {
        self.record(EngineCall::SystemExclusive(data.to_vec()));
    }

    fn stop_all(&mut self, force: bool) {
        for channel in &mut self.channels {
            channel.held.clear();
        }
        self.record(EngineCall::StopAll { force });
    }

    fn reset_controllers(&mut self) {
        for (index, channel) in self.channels.iter_mut().enumerate() {
            channel.pitch_bend = 8192;
            channel.controllers = ChannelSnapshot::new(index % 16 == 9).controllers;
        }
        self.record(EngineCall::ResetControllers);
    }

    fn set_muted(&mut self, channel: usize, muted: bool) {
        self.channels[channel].is_muted = muted;
        self.record(EngineCall::Muted { channel, muted });
    }

    fn set_drums(&mut self, channel: usize, is_drum: bool) {
        self.channels[channel].is_drum = is_drum;
    }

    fn transpose_channel(&mut self, _channel: usize, _semitones: f32, _force: bool) {}

    fn set_master_parameter(&mut self, parameter: MasterParameter) {
        self.record(EngineCall::Master(parameter));
    }

    fn channel_property(&self, channel: usize) -> Option<ChannelProperty> {
        self.channels.get(channel).map(|state| ChannelProperty {
            voices_amount: state.held.len(),
            pitch_bend: state.pitch_bend,
            is_muted: state.is_muted,
            is_drum: state.is_drum,
            ..ChannelProperty::default()
        })
    }

    fn snapshot(&self) -> SynthSnapshot {
        SynthSnapshot {
            channels: self
                .channels
                .iter()
                .map(|state| ChannelSnapshot {
                    program: state.program,
                    controllers: state.controllers.clone(),
                    pitch_bend: state.pitch_bend,
                    is_muted: state.is_muted,
                    ..ChannelSnapshot::new(state.is_drum)
                })
                .collect(),
            ..SynthSnapshot::default()
        }
    }

    fn apply_snapshot(&mut self, snapshot: &SynthSnapshot) {
        for (state, saved) in self.channels.iter_mut().zip(&snapshot.channels) {
            state.program = saved.program;
            state.controllers = saved.controllers.clone();
            state.pitch_bend = saved.pitch_bend;
            state.is_muted = saved.is_muted;
            state.is_drum = saved.is_drum;
        }
    }

    fn render(&mut self, layout: &BusLayout, out: &mut [f32]) {
        let (left, right) = layout.bus_mut(out, layout.dry_bus(0));
        left.fill(self.level);
        right.fill(self.level);
    }

    fn fork_offline(&self, sample_rate_hz: u32) -> Result<Box<dyn SynthEngine>, SynthError> {
        let (engine, _) = FakeEngine::new(sample_rate_hz);
        Ok(Box::new(engine))
    }
}

pub fn test_config() -> SynthConfig {
    SynthConfig {
        sample_rate_hz: SAMPLE_RATE,
        quantum_frames: QUANTUM,
        ..SynthConfig::default()
    }
}

/// Remote core and handle wired together, stepped one quantum at a time.
pub struct Rig {
    pub core: SynthRemoteCore,
    pub handle: SynthHandle,
    pub calls: Calls,
    pub clock: Arc<AudioClock>,
    pub wall: Arc<ManualClock>,
    buffer: Vec<f32>,
}

impl Rig {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: SynthConfig) -> Self {
        let (engine, calls) = FakeEngine::new(config.sample_rate_hz);
        let (handle_link, remote_link) = tessitura_core::connect();
        let clock = Arc::new(AudioClock::new(config.sample_rate_hz));
        let wall = Arc::new(ManualClock::new(100.0));
        let core = SynthRemoteCore::new(Box::new(engine), remote_link, clock.clone(), &config);
        let handle = SynthHandle::new(handle_link, clock.clone(), wall.clone(), &config);
        let buffer = vec![0.0; core.layout().buffer_len()];
        Self {
            core,
            handle,
            calls,
            clock,
            wall,
            buffer,
        }
    }

    /// One quantum on the remote side followed by a handle poll.
    pub fn step(&mut self) -> Result<usize, RemoteError> {
        self.core.process(&mut self.buffer);
        self.wall.advance(QUANTUM as f64 / SAMPLE_RATE as f64);
        self.handle.poll()
    }

    pub fn output(&self) -> &[f32] {
        &self.buffer
    }

    pub fn run(&mut self, seconds: f64, sequencers: &mut [&mut SequencerHandle]) {
        let quanta = (seconds * SAMPLE_RATE as f64 / QUANTUM as f64).round() as usize;
        for _ in 0..quanta {
            self.step().expect("synth poll failed");
            for sequencer in sequencers.iter_mut() {
                sequencer.poll().expect("sequencer poll failed");
            }
        }
    }

    pub fn install_bank(&mut self, id: &str) {
        let pending = self.handle.add_sound_bank(bank_bytes(id), id, 0);
        self.step().expect("synth poll failed");
        let status = pending.try_take().expect("sound bank response").expect("resolved");
        assert!(status.is_applied(), "{status:?}");
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

fn ev(delta: u32, kind: TrackEventKind<'static>) -> TrackEvent<'static> {
    TrackEvent {
        delta: u28::new(delta),
        kind,
    }
}

fn key(channel: u8, key: u8, vel: u8) -> TrackEventKind<'static> {
    TrackEventKind::Midi {
        channel: u4::new(channel),
        message: MidiMessage::NoteOn {
            key: u7::new(key),
            vel: u7::new(vel),
        },
    }
}

fn write_smf(tracks: Vec<Vec<TrackEvent<'static>>>) -> Vec<u8> {
    let format = if tracks.len() > 1 {
        Format::Parallel
    } else {
        Format::SingleTrack
    };
    let smf = Smf {
        header: Header {
            format,
            timing: Timing::Metrical(u15::new(PPQ)),
        },
        tracks,
    };
    let mut data = Vec::new();
    smf.write(&mut data).expect("midi write should succeed");
    data
}

/// One held note from tick 0 until `seconds`, at 120 bpm.
pub fn song_bytes(seconds: f64) -> Vec<u8> {
    let length = (seconds * TICKS_PER_SECOND as f64).round() as u32;
    write_smf(vec![vec![
        ev(0, TrackEventKind::Meta(MetaMessage::Tempo(u24::new(500_000)))),
        ev(0, TrackEventKind::Midi {
            channel: u4::new(0),
            message: MidiMessage::ProgramChange { program: u7::new(5) },
        }),
        ev(0, key(0, 60, 100)),
        ev(length, key(0, 60, 0)),
        ev(0, TrackEventKind::Meta(MetaMessage::EndOfTrack)),
    ]])
}

/// Notes every half second with a lyric before each one.
pub fn lyric_song(notes: u32) -> Vec<u8> {
    let mut track = vec![ev(0, TrackEventKind::Meta(MetaMessage::Tempo(u24::new(500_000))))];
    for index in 0..notes {
        let delta = if index == 0 { 0 } else { 240 };
        track.push(ev(delta, TrackEventKind::Meta(MetaMessage::Lyric(b"la"))));
        track.push(ev(0, key(0, 60 + index as u8, 90)));
        track.push(ev(240, key(0, 60 + index as u8, 0)));
    }
    track.push(ev(0, TrackEventKind::Meta(MetaMessage::EndOfTrack)));
    write_smf(vec![track])
}
