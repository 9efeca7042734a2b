use rustysynth::{SoundFont, Synthesizer, SynthesizerSettings};
use std::any::Any;
use std::io::Cursor;
use std::sync::Arc;
use tessitura_ports::render::BusLayout;
use tessitura_ports::synth::{
    ChannelSnapshot, InstalledBank, MasterParameter, MasterParameters, PresetInfo, SoundBank,
    SynthEngine, SynthError, SynthSnapshot,
};
use tessitura_ports::types::{ChannelProperty, CHANNELS_PER_PORT};

const CC_BANK_SELECT: u8 = 0;
const CC_RESET_ALL_CONTROLLERS: u8 = 121;
const PERCUSSION_CHANNEL: usize = 9;
const MIN_POLYPHONY: usize = 8;
const MAX_POLYPHONY: usize = 256;

/// A decoded SF2 file.
pub struct SoundFontBank {
    name: String,
    presets: Vec<PresetInfo>,
    font: Arc<SoundFont>,
}

impl SoundFontBank {
    pub fn decode(data: &[u8]) -> Result<Self, SynthError> {
        let font = SoundFont::new(&mut Cursor::new(data))
            .map_err(|e| SynthError::SoundBankLoad(e.to_string()))?;
        let name = match font.get_info().get_bank_name().trim() {
            "" => "SoundFont".to_string(),
            name => name.to_string(),
        };
        let mut presets: Vec<PresetInfo> = font
            .get_presets()
            .iter()
            .map(|preset| PresetInfo {
                bank: preset.get_bank_number().clamp(0, u16::MAX as i32) as u16,
                program: preset.get_patch_number().clamp(0, 127) as u8,
                name: preset.get_name().trim().to_string(),
            })
            .collect();
        presets.sort_by_key(|preset| (preset.bank, preset.program));
        Ok(Self {
            name,
            presets,
            font: Arc::new(font),
        })
    }

    pub fn font(&self) -> &Arc<SoundFont> {
        &self.font
    }
}

impl SoundBank for SoundFontBank {
    fn name(&self) -> &str {
        &self.name
    }

    fn presets(&self) -> Vec<PresetInfo> {
        self.presets.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Clone)]
struct ChannelState {
    saved: ChannelSnapshot,
    // (requested note, key actually sounding)
    held: Vec<(u8, i32)>,
}

impl ChannelState {
    fn new(channel: usize) -> Self {
        Self {
            saved: ChannelSnapshot::new(channel % CHANNELS_PER_PORT == PERCUSSION_CHANNEL),
            held: Vec::new(),
        }
    }
}

/// `SynthEngine` backed by rustysynth. One `Synthesizer` serves each block of
/// 16 channels. rustysynth plays a single SoundFont, so only the
/// highest-priority bank sounds; the others still contribute presets.
pub struct RustySynthEngine {
    sample_rate_hz: u32,
    banks: Vec<InstalledBank>,
    font: Option<Arc<SoundFont>>,
    ports: Vec<Synthesizer>,
    channels: Vec<ChannelState>,
    master: MasterParameters,
    scratch_l: Vec<f32>,
    scratch_r: Vec<f32>,
}

impl RustySynthEngine {
    pub fn new(sample_rate_hz: u32) -> Self {
        Self {
            sample_rate_hz: sample_rate_hz.max(1),
            banks: Vec::new(),
            font: None,
            ports: Vec::new(),
            channels: (0..CHANNELS_PER_PORT).map(ChannelState::new).collect(),
            master: MasterParameters::default(),
            scratch_l: Vec::new(),
            scratch_r: Vec::new(),
        }
    }

    fn port_count(&self) -> usize {
        self.channels.len().div_ceil(CHANNELS_PER_PORT)
    }

    fn settings(&self) -> SynthesizerSettings {
        let mut settings = SynthesizerSettings::new(self.sample_rate_hz as i32);
        settings.maximum_polyphony = self.master.voice_cap.clamp(MIN_POLYPHONY, MAX_POLYPHONY);
        settings
    }

    fn new_port(&self, font: &Arc<SoundFont>) -> Result<Synthesizer, SynthError> {
        let mut synth = Synthesizer::new(font, &self.settings())
            .map_err(|e| SynthError::Backend(e.to_string()))?;
        synth.set_master_volume(self.master.volume.get());
        Ok(synth)
    }

    /// Recreates every synthesizer and replays the tracked channel state.
    fn rebuild(&mut self) -> Result<(), SynthError> {
        let Some(font) = self.font.clone() else {
            self.ports.clear();
            return Ok(());
        };
        let ports = (0..self.port_count())
            .map(|_| self.new_port(&font))
            .collect::<Result<Vec<_>, _>>()?;
        self.ports = ports;
        for channel in 0..self.channels.len() {
            self.channels[channel].held.clear();
            self.restore_channel(channel);
        }
        log::debug!(
            target: "synth",
            "rebuilt {} synthesizers at {} Hz",
            self.ports.len(),
            self.sample_rate_hz
        );
        Ok(())
    }

    fn restore_channel(&mut self, channel: usize) {
        let saved = self.channels[channel].saved.clone();
        self.send(channel, 0xB0, CC_BANK_SELECT as i32, (saved.bank % 128) as i32);
        self.send(channel, 0xC0, saved.program as i32, 0);
        for (controller, value) in saved.controllers.iter().enumerate().skip(1) {
            // Data entry and (N)RPN selection are not state.
            if controller < 120 && !matches!(controller, 6 | 38 | 96..=101) {
                self.send(channel, 0xB0, controller as i32, *value as i32);
            }
        }
        self.send(
            channel,
            0xE0,
            (saved.pitch_bend & 0x7F) as i32,
            (saved.pitch_bend >> 7) as i32,
        );
    }

    fn send(&mut self, channel: usize, command: i32, data1: i32, data2: i32) {
        let port = channel / CHANNELS_PER_PORT;
        if let Some(synth) = self.ports.get_mut(port) {
            synth.process_midi_message((channel % CHANNELS_PER_PORT) as i32, command, data1, data2);
        }
    }

    fn key_for(&self, channel: usize, note: u8) -> i32 {
        let shift = self.channels[channel].saved.transposition + self.master.transposition;
        (note as i32 + shift.round() as i32).clamp(0, 127)
    }

    fn release_channel(&mut self, channel: usize, immediate: bool) {
        self.channels[channel].held.clear();
        let port = channel / CHANNELS_PER_PORT;
        if let Some(synth) = self.ports.get_mut(port) {
            synth.note_off_all_channel((channel % CHANNELS_PER_PORT) as i32, immediate);
        }
    }

    fn pan_gains(&self) -> (f32, f32) {
        let pan = self.master.pan.clamp(-1.0, 1.0);
        ((1.0 - pan).min(1.0), (1.0 + pan).min(1.0))
    }

    /// GS "use for rhythm part": F0 41 dev 42 12 40 1p 15 vv sum F7.
    fn gs_drum_part(data: &[u8]) -> Option<(usize, bool)> {
        match data {
            [0xF0, 0x41, _, 0x42, 0x12, 0x40, part, 0x15, value, ..] if part & 0xF0 == 0x10 => {
                let part = (part & 0x0F) as usize;
                let channel = match part {
                    0 => PERCUSSION_CHANNEL,
                    1..=9 => part - 1,
                    _ => part,
                };
                Some((channel, *value != 0))
            }
            _ => None,
        }
    }
}

impl Default for RustySynthEngine {
    fn default() -> Self {
        Self::new(48_000)
    }
}

impl SynthEngine for RustySynthEngine {
    fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn add_channel(&mut self) -> usize {
        let channel = self.channels.len();
        self.channels.push(ChannelState::new(channel));
        if self.ports.len() < self.port_count() {
            if let Some(font) = self.font.clone() {
                match self.new_port(&font) {
                    Ok(synth) => self.ports.push(synth),
                    Err(err) => {
                        log::error!(target: "synth", "no synthesizer for channel {channel}: {err}")
                    }
                }
            }
        }
        channel
    }

    fn decode_sound_bank(&self, data: &[u8]) -> Result<Arc<dyn SoundBank>, SynthError> {
        Ok(Arc::new(SoundFontBank::decode(data)?))
    }

    fn set_sound_banks(&mut self, banks: &[InstalledBank]) -> Result<(), SynthError> {
        let font = banks
            .iter()
            .find_map(|installed| installed.bank.as_any().downcast_ref::<SoundFontBank>())
            .map(|bank| bank.font.clone());
        let Some(font) = font else {
            return Err(if banks.is_empty() {
                SynthError::NoSoundBank
            } else {
                SynthError::UnsupportedFormat
            });
        };
        self.banks = banks.to_vec();
        let changed = self.font.as_ref().map_or(true, |current| !Arc::ptr_eq(current, &font));
        if changed {
            self.font = Some(font);
            self.rebuild()?;
        }
        Ok(())
    }

    fn note_on(&mut self, channel: usize, note: u8, velocity: u8) {
        if self.channels[channel].saved.is_muted {
            return;
        }
        let key = self.key_for(channel, note);
        self.channels[channel].held.push((note, key));
        self.send(channel, 0x90, key, velocity as i32);
    }

    fn note_off(&mut self, channel: usize, note: u8) {
        let held = &mut self.channels[channel].held;
        let Some(index) = held.iter().position(|(requested, _)| *requested == note) else {
            return;
        };
        let (_, key) = held.remove(index);
        self.send(channel, 0x80, key, 64);
    }

    fn poly_pressure(&mut self, channel: usize, note: u8, pressure: u8) {
        let key = self.key_for(channel, note);
        self.send(channel, 0xA0, key, pressure as i32);
    }

    fn controller_change(&mut self, channel: usize, controller: u8, value: u8) {
        let saved = &mut self.channels[channel].saved;
        if let Some(slot) = saved.controllers.get_mut(controller as usize) {
            *slot = value;
        }
        if controller == CC_BANK_SELECT && !saved.is_drum {
            saved.bank = value as u16;
        }
        if controller == CC_RESET_ALL_CONTROLLERS {
            let defaults = ChannelSnapshot::new(saved.is_drum);
            saved.controllers = defaults.controllers;
            saved.pitch_bend = defaults.pitch_bend;
            saved.channel_pressure = 0;
        }
        if matches!(controller, 120 | 123..=127) {
            self.channels[channel].held.clear();
        }
        self.send(channel, 0xB0, controller as i32, value as i32);
    }

    fn program_change(&mut self, channel: usize, program: u8) {
        self.channels[channel].saved.program = program;
        self.send(channel, 0xC0, program as i32, 0);
    }

    fn channel_pressure(&mut self, channel: usize, pressure: u8) {
        self.channels[channel].saved.channel_pressure = pressure;
        self.send(channel, 0xD0, pressure as i32, 0);
    }

    fn pitch_wheel(&mut self, channel: usize, value: u16) {
        let value = value.min(0x3FFF);
        self.channels[channel].saved.pitch_bend = value;
        self.send(channel, 0xE0, (value & 0x7F) as i32, (value >> 7) as i32);
    }

    fn system_exclusive(&mut self, data: &[u8], channel_offset: usize) {
        if let Some((channel, is_drum)) = Self::gs_drum_part(data) {
            let channel = channel + channel_offset;
            if channel < self.channels.len() {
                self.set_drums(channel, is_drum);
            }
            return;
        }
        if data.starts_with(&[0xF0, 0x7E, 0x7F, 0x09, 0x01]) {
            log::debug!(target: "synth", "GM system on");
            self.stop_all(true);
            self.reset_controllers();
            return;
        }
        log::trace!(target: "synth", "unhandled SysEx {data:02x?}");
    }

    fn stop_all(&mut self, force: bool) {
        for channel in &mut self.channels {
            channel.held.clear();
        }
        for synth in &mut self.ports {
            synth.note_off_all(force);
        }
    }

    fn reset_controllers(&mut self) {
        for channel in 0..self.channels.len() {
            self.controller_change(channel, CC_RESET_ALL_CONTROLLERS, 0);
        }
    }

    fn set_muted(&mut self, channel: usize, muted: bool) {
        self.channels[channel].saved.is_muted = muted;
        if muted {
            self.release_channel(channel, true);
        }
    }

    fn set_drums(&mut self, channel: usize, is_drum: bool) {
        let saved = &mut self.channels[channel].saved;
        saved.is_drum = is_drum;
        saved.bank = if is_drum { 128 } else { 0 };
        if channel % CHANNELS_PER_PORT != PERCUSSION_CHANNEL {
            log::debug!(
                target: "synth",
                "channel {channel}: drum mode is tracked but not rendered by rustysynth"
            );
        }
    }

    fn transpose_channel(&mut self, channel: usize, semitones: f32, force: bool) {
        self.channels[channel].saved.transposition = semitones;
        if force {
            self.release_channel(channel, true);
        }
    }

    fn set_master_parameter(&mut self, parameter: MasterParameter) {
        let previous_cap = self.master.voice_cap;
        self.master.apply(parameter);
        match parameter {
            MasterParameter::Volume(volume) => {
                for synth in &mut self.ports {
                    synth.set_master_volume(volume.get());
                }
            }
            MasterParameter::VoiceCap(_) if self.master.voice_cap != previous_cap => {
                if let Err(err) = self.rebuild() {
                    log::error!(target: "synth", "voice cap change failed: {err}");
                }
            }
            MasterParameter::Interpolation(kind) => {
                log::debug!(
                    target: "synth",
                    "interpolation {kind:?} recorded; rustysynth interpolates linearly"
                );
            }
            _ => {}
        }
    }

    fn channel_property(&self, channel: usize) -> Option<ChannelProperty> {
        self.channels.get(channel).map(|state| ChannelProperty {
            voices_amount: state.held.len(),
            pitch_bend: state.saved.pitch_bend,
            pitch_bend_range: 2.0,
            is_muted: state.saved.is_muted,
            is_drum: state.saved.is_drum,
            transposition: state.saved.transposition,
        })
    }

    fn snapshot(&self) -> SynthSnapshot {
        SynthSnapshot {
            channels: self.channels.iter().map(|state| state.saved.clone()).collect(),
            master: self.master,
            key_modifiers: Vec::new(),
        }
    }

    fn apply_snapshot(&mut self, snapshot: &SynthSnapshot) {
        self.stop_all(true);
        while self.channels.len() < snapshot.channels.len() {
            self.add_channel();
        }
        for (state, saved) in self.channels.iter_mut().zip(&snapshot.channels) {
            state.saved = saved.clone();
        }
        self.master = snapshot.master;
        if let Err(err) = self.rebuild() {
            log::error!(target: "synth", "could not apply snapshot: {err}");
        }
    }

    fn render(&mut self, layout: &BusLayout, out: &mut [f32]) {
        let frames = layout.quantum_frames;
        self.scratch_l.resize(frames, 0.0);
        self.scratch_r.resize(frames, 0.0);
        let (gain_l, gain_r) = self.pan_gains();
        let (left, right) = layout.bus_mut(out, layout.dry_bus(0));
        for synth in &mut self.ports {
            synth.render(&mut self.scratch_l, &mut self.scratch_r);
            for i in 0..frames {
                left[i] += self.scratch_l[i] * gain_l;
                right[i] += self.scratch_r[i] * gain_r;
            }
        }
    }

    fn fork_offline(&self, sample_rate_hz: u32) -> Result<Box<dyn SynthEngine>, SynthError> {
        let mut engine = RustySynthEngine::new(sample_rate_hz);
        engine.master = self.master;
        while engine.channels.len() < self.channels.len() {
            engine.add_channel();
        }
        if !self.banks.is_empty() {
            engine.set_sound_banks(&self.banks)?;
        }
        engine.apply_snapshot(&self.snapshot());
        Ok(Box::new(engine))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tessitura_ports::types::Volume01;

    struct ForeignBank;

    impl SoundBank for ForeignBank {
        fn name(&self) -> &str {
            "foreign"
        }

        fn presets(&self) -> Vec<PresetInfo> {
            Vec::new()
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn garbage_is_not_a_sound_font() {
        let engine = RustySynthEngine::new(44_100);
        assert!(matches!(
            engine.decode_sound_bank(b"definitely not RIFF"),
            Err(SynthError::SoundBankLoad(_))
        ));
    }

    #[test]
    fn foreign_banks_are_rejected() {
        let mut engine = RustySynthEngine::new(44_100);
        let banks = vec![InstalledBank {
            id: "x".to_string(),
            bank_offset: 0,
            bank: Arc::new(ForeignBank),
        }];
        assert!(matches!(engine.set_sound_banks(&banks), Err(SynthError::UnsupportedFormat)));
        assert!(matches!(engine.set_sound_banks(&[]), Err(SynthError::NoSoundBank)));
    }

    #[test]
    fn channel_state_is_tracked_without_a_sound_font() {
        let mut engine = RustySynthEngine::new(44_100);
        assert_eq!(engine.channel_count(), 16);
        assert!(engine.channel_property(9).is_some_and(|p| p.is_drum));

        engine.program_change(2, 40);
        engine.controller_change(2, 7, 90);
        engine.pitch_wheel(2, 1000);
        engine.note_on(2, 60, 100);
        let property = engine.channel_property(2).expect("channel exists");
        assert_eq!(property.voices_amount, 1);
        assert_eq!(property.pitch_bend, 1000);

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.channels[2].program, 40);
        assert_eq!(snapshot.channels[2].controllers[7], 90);

        engine.reset_controllers();
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.channels[2].controllers[7], 100);
        assert_eq!(snapshot.channels[2].program, 40);
        assert_eq!(snapshot.channels[2].pitch_bend, 8192);
    }

    #[test]
    fn muted_channel_ignores_note_on() {
        let mut engine = RustySynthEngine::new(44_100);
        engine.note_on(0, 60, 100);
        engine.set_muted(0, true);
        assert_eq!(engine.channel_property(0).map(|p| p.voices_amount), Some(0));
        engine.note_on(0, 62, 100);
        assert_eq!(engine.channel_property(0).map(|p| p.voices_amount), Some(0));
    }

    #[test]
    fn transposed_note_off_releases_the_sounding_key() {
        let mut engine = RustySynthEngine::new(44_100);
        engine.transpose_channel(1, 3.0, false);
        engine.note_on(1, 60, 100);
        assert_eq!(engine.channels[1].held, vec![(60, 63)]);
        engine.note_off(1, 60);
        assert!(engine.channels[1].held.is_empty());
    }

    #[test]
    fn gs_rhythm_part_sysex_toggles_drums() {
        let mut engine = RustySynthEngine::new(44_100);
        let rhythm_part = [0xF0, 0x41, 0x10, 0x42, 0x12, 0x40, 0x12, 0x15, 0x01, 0x18, 0xF7];
        engine.system_exclusive(&rhythm_part, 0);
        assert!(engine.channel_property(1).is_some_and(|p| p.is_drum));
        assert_eq!(engine.snapshot().channels[1].bank, 128);
    }

    #[test]
    fn added_channels_start_a_new_port() {
        let mut engine = RustySynthEngine::new(44_100);
        for _ in 0..16 {
            engine.add_channel();
        }
        assert_eq!(engine.channel_count(), 32);
        assert_eq!(engine.port_count(), 2);
        assert!(engine.channel_property(25).is_some_and(|p| p.is_drum));
    }

    #[test]
    fn silent_without_sound_font() {
        let mut engine = RustySynthEngine::new(44_100);
        engine.set_master_parameter(MasterParameter::Volume(Volume01::new(0.5)));
        engine.note_on(0, 60, 100);
        let layout = BusLayout::new(64);
        let mut out = vec![0.0; layout.buffer_len()];
        engine.render(&layout, &mut out);
        assert!(out.iter().all(|sample| *sample == 0.0));
        assert_eq!(engine.snapshot().master.volume, Volume01::new(0.5));
    }

    #[test]
    fn fork_keeps_channel_state() {
        let mut engine = RustySynthEngine::new(48_000);
        engine.add_channel();
        engine.program_change(3, 12);
        let fork = engine.fork_offline(22_050).expect("fork");
        assert_eq!(fork.sample_rate_hz(), 22_050);
        assert_eq!(fork.channel_count(), 17);
        assert_eq!(fork.snapshot().channels[3].program, 12);
    }
}
