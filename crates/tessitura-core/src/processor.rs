use crate::envelope::{SoundBankOpStatus, SynthEvent};
use crate::link::Outbox;
use crate::sound_banks::{BankRemoval, SoundBankRegistry};
use std::collections::HashMap;
use tessitura_ports::midi::{ChannelMessage, MidiMessage};
use tessitura_ports::render::BusLayout;
use tessitura_ports::synth::{
    KeyModifier, KeyModifierEntry, MasterParameter, MasterParameters, PresetInfo, SynthEngine,
    SynthSnapshot,
};
use tessitura_ports::types::{ChannelProperty, ChannelTarget, CHANNELS_PER_PORT};

const CC_ALL_SOUND_OFF: u8 = 120;
const CC_RESET_ALL_CONTROLLERS: u8 = 121;
const CC_ALL_NOTES_OFF: u8 = 123;

/// Remote-side wrapper around the engine: applies locks and key modifiers,
/// owns the sound-bank registry and reports what it did as synth events.
pub struct SynthProcessor {
    engine: Box<dyn SynthEngine>,
    outbox: Outbox,
    banks: SoundBankRegistry,
    // Bit n set = controller n locked.
    locked: Vec<u128>,
    key_modifiers: HashMap<(usize, u8), KeyModifier>,
    reported: Vec<Option<ChannelProperty>>,
    master: MasterParameters,
    report_properties: bool,
}

impl SynthProcessor {
    pub fn new(engine: Box<dyn SynthEngine>, outbox: Outbox, report_properties: bool) -> Self {
        let channels = engine.channel_count();
        Self {
            engine,
            outbox,
            banks: SoundBankRegistry::new(),
            locked: vec![0; channels],
            key_modifiers: HashMap::new(),
            reported: vec![None; channels],
            master: MasterParameters::default(),
            report_properties,
        }
    }

    pub fn engine(&self) -> &dyn SynthEngine {
        self.engine.as_ref()
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn channel_count(&self) -> usize {
        self.engine.channel_count()
    }

    pub fn master_parameters(&self) -> MasterParameters {
        self.master
    }

    pub fn presets(&self) -> Vec<PresetInfo> {
        self.banks.presets()
    }

    pub fn sound_bank_ids(&self) -> Vec<String> {
        self.banks.ids()
    }

    /// Grows the engine to at least `count` channels, announcing each new one.
    pub fn ensure_channels(&mut self, count: usize) {
        while self.engine.channel_count() < count {
            let channel = self.engine.add_channel();
            log::debug!(target: "remote", "added channel {channel}");
            self.outbox.synth(SynthEvent::NewChannel { channel });
        }
        let channels = self.engine.channel_count();
        self.locked.resize(channels, 0);
        self.reported.resize(channels, None);
    }

    fn has_channel(&self, channel: usize) -> bool {
        if channel < self.engine.channel_count() {
            return true;
        }
        log::debug!(target: "remote", "channel {channel} does not exist, message ignored");
        false
    }

    fn is_locked(&self, channel: usize, controller: u8) -> bool {
        controller < 128
            && self
                .locked
                .get(channel)
                .is_some_and(|mask| mask & (1u128 << controller) != 0)
    }

    pub fn apply_midi(&mut self, message: &MidiMessage, channel_offset: usize, force: bool) {
        match message {
            MidiMessage::Channel { channel, message } => {
                self.apply_channel_message(*channel as usize + channel_offset, *message, force)
            }
            MidiMessage::SystemExclusive(data) => self.system_exclusive(data, channel_offset),
            MidiMessage::SystemReset => {
                self.stop_all(true);
                self.reset_controllers(ChannelTarget::All);
            }
        }
    }

    pub fn apply_channel_message(&mut self, channel: usize, message: ChannelMessage, force: bool) {
        if !self.has_channel(channel) {
            return;
        }
        match message {
            ChannelMessage::NoteOn { note, velocity: 0 } => self.note_off(channel, note),
            ChannelMessage::NoteOn { note, velocity } => {
                let velocity = self
                    .key_modifiers
                    .get(&(channel, note))
                    .map_or(velocity, |modifier| modifier.apply(velocity));
                self.engine.note_on(channel, note, velocity);
                self.outbox.synth(SynthEvent::NoteOn {
                    channel,
                    note,
                    velocity,
                });
            }
            ChannelMessage::NoteOff { note, .. } => self.note_off(channel, note),
            ChannelMessage::PolyPressure { note, pressure } => {
                self.engine.poly_pressure(channel, note, pressure);
                self.outbox.synth(SynthEvent::PolyPressure {
                    channel,
                    note,
                    pressure,
                });
            }
            ChannelMessage::ControllerChange { controller, value } => {
                if !force && self.is_locked(channel, controller) {
                    log::debug!(
                        target: "remote",
                        "controller {controller} locked on channel {channel}"
                    );
                    return;
                }
                self.engine.controller_change(channel, controller, value);
                self.outbox.synth(SynthEvent::ControllerChange {
                    channel,
                    controller,
                    value,
                });
            }
            ChannelMessage::ProgramChange { program } => {
                self.engine.program_change(channel, program);
                self.outbox.synth(SynthEvent::ProgramChange { channel, program });
            }
            ChannelMessage::ChannelPressure { pressure } => {
                self.engine.channel_pressure(channel, pressure);
                self.outbox.synth(SynthEvent::ChannelPressure { channel, pressure });
            }
            ChannelMessage::PitchWheel { value } => {
                self.engine.pitch_wheel(channel, value);
                self.outbox.synth(SynthEvent::PitchWheel { channel, value });
            }
        }
    }

    fn note_off(&mut self, channel: usize, note: u8) {
        self.engine.note_off(channel, note);
        self.outbox.synth(SynthEvent::NoteOff { channel, note });
    }

    pub fn system_exclusive(&mut self, data: &[u8], channel_offset: usize) {
        let port_channels = channel_offset..channel_offset + CHANNELS_PER_PORT;
        let drums_before: Vec<Option<bool>> = port_channels
            .clone()
            .map(|channel| self.engine.channel_property(channel).map(|p| p.is_drum))
            .collect();

        self.engine.system_exclusive(data, channel_offset);

        for (channel, before) in port_channels.zip(drums_before) {
            let after = self.engine.channel_property(channel).map(|p| p.is_drum);
            if let (Some(before), Some(is_drum)) = (before, after) {
                if before != is_drum {
                    self.outbox.synth(SynthEvent::DrumChange { channel, is_drum });
                }
            }
        }
        if let Some(text) = display_text(data) {
            self.outbox.synth(SynthEvent::DisplayText(text));
        }
    }

    pub fn stop_all(&mut self, force: bool) {
        self.engine.stop_all(force);
        self.outbox.synth(SynthEvent::StopAll);
    }

    pub fn stop_channel(&mut self, channel: usize, force: bool) {
        if !self.has_channel(channel) {
            return;
        }
        let controller = if force { CC_ALL_SOUND_OFF } else { CC_ALL_NOTES_OFF };
        self.engine.controller_change(channel, controller, 0);
    }

    pub fn reset_controllers(&mut self, target: ChannelTarget) {
        match target {
            ChannelTarget::All => self.engine.reset_controllers(),
            ChannelTarget::Channel(channel) => {
                if !self.has_channel(channel) {
                    return;
                }
                self.engine.controller_change(channel, CC_RESET_ALL_CONTROLLERS, 0);
            }
        }
        self.outbox.synth(SynthEvent::AllControllersReset { channel: target });
    }

    pub fn set_muted(&mut self, channel: usize, muted: bool) {
        if !self.has_channel(channel) {
            return;
        }
        self.engine.set_muted(channel, muted);
        self.outbox.synth(SynthEvent::MuteChannel { channel, muted });
    }

    pub fn set_drums(&mut self, channel: usize, is_drum: bool) {
        if !self.has_channel(channel) {
            return;
        }
        self.engine.set_drums(channel, is_drum);
        self.outbox.synth(SynthEvent::DrumChange { channel, is_drum });
    }

    pub fn transpose_channel(&mut self, channel: usize, semitones: f32, force: bool) {
        if !self.has_channel(channel) {
            return;
        }
        self.engine.transpose_channel(channel, semitones, force);
    }

    pub fn lock_controller(&mut self, target: ChannelTarget, controller: u8, locked: bool) {
        if controller >= 128 {
            log::warn!(target: "remote", "cannot lock controller {controller}");
            return;
        }
        let channels = match target {
            ChannelTarget::All => 0..self.locked.len(),
            ChannelTarget::Channel(channel) => {
                if !self.has_channel(channel) {
                    return;
                }
                channel..channel + 1
            }
        };
        let bit = 1u128 << controller;
        for mask in &mut self.locked[channels] {
            if locked {
                *mask |= bit;
            } else {
                *mask &= !bit;
            }
        }
    }

    pub fn set_master_parameter(&mut self, parameter: MasterParameter) {
        self.master.apply(parameter);
        self.engine.set_master_parameter(parameter);
        self.outbox.synth(SynthEvent::MasterParameterChange(parameter));
    }

    pub fn add_key_modifier(&mut self, channel: usize, note: u8, modifier: KeyModifier) {
        self.key_modifiers.insert((channel, note & 0x7F), modifier);
    }

    pub fn delete_key_modifier(&mut self, channel: usize, note: u8) {
        if self.key_modifiers.remove(&(channel, note & 0x7F)).is_none() {
            log::debug!(target: "remote", "no key modifier for {channel}:{note}");
        }
    }

    pub fn clear_key_modifiers(&mut self) {
        self.key_modifiers.clear();
    }

    /// Installs a bank, or only updates the offset when `id` is already known.
    pub fn add_sound_bank(
        &mut self,
        data: &[u8],
        id: String,
        bank_offset: u8,
    ) -> SoundBankOpStatus {
        if self.banks.contains(&id) {
            log::info!(
                target: "sound_bank",
                "{id} already installed, updating bank offset to {bank_offset}"
            );
            self.banks.set_offset(&id, bank_offset);
            return self.install_banks();
        }
        let bank = match self.engine.decode_sound_bank(data) {
            Ok(bank) => bank,
            Err(err) => {
                let message = format!("{id}: {err}");
                log::warn!(target: "sound_bank", "failed to load sound bank {message}");
                self.outbox.sound_bank_error(message.clone());
                return SoundBankOpStatus::Failed(message);
            }
        };
        log::info!(target: "sound_bank", "loaded {id} ({})", bank.name());
        self.banks.insert(id, bank_offset, bank);
        self.install_banks()
    }

    pub fn delete_sound_bank(&mut self, id: &str) -> SoundBankOpStatus {
        match self.banks.remove(id) {
            BankRemoval::Removed => self.install_banks(),
            BankRemoval::Missing => {
                log::warn!(target: "sound_bank", "no sound bank with id {id}");
                SoundBankOpStatus::Rejected(format!("no sound bank with id {id}"))
            }
            BankRemoval::LastBank => {
                log::warn!(
                    target: "sound_bank",
                    "refusing to delete {id}, it is the only sound bank"
                );
                SoundBankOpStatus::Rejected("at least one sound bank must remain".to_string())
            }
        }
    }

    pub fn rearrange_sound_banks(&mut self, order: &[String]) -> SoundBankOpStatus {
        self.banks.rearrange(order);
        self.install_banks()
    }

    fn install_banks(&mut self) -> SoundBankOpStatus {
        if let Err(err) = self.engine.set_sound_banks(self.banks.banks()) {
            let message = err.to_string();
            log::error!(target: "sound_bank", "engine rejected sound banks: {message}");
            self.outbox.sound_bank_error(message.clone());
            return SoundBankOpStatus::Failed(message);
        }
        let presets = self.banks.presets();
        let count = presets.len();
        self.outbox.synth(SynthEvent::PresetListChange(presets));
        SoundBankOpStatus::Applied { presets: count }
    }

    pub fn snapshot(&self) -> SynthSnapshot {
        let mut snapshot = self.engine.snapshot();
        snapshot.master = self.master;
        for (channel, state) in snapshot.channels.iter_mut().enumerate() {
            let mask = self.locked.get(channel).copied().unwrap_or(0);
            state.locked_controllers = (0..128u8).filter(|cc| mask & (1u128 << cc) != 0).collect();
        }
        let mut key_modifiers: Vec<KeyModifierEntry> = self
            .key_modifiers
            .iter()
            .map(|(&(channel, note), &modifier)| KeyModifierEntry {
                channel,
                note,
                modifier,
            })
            .collect();
        key_modifiers.sort_by_key(|entry| (entry.channel, entry.note));
        snapshot.key_modifiers = key_modifiers;
        snapshot
    }

    pub fn apply_snapshot(&mut self, snapshot: &SynthSnapshot) {
        self.ensure_channels(snapshot.channels.len());
        self.engine.apply_snapshot(snapshot);
        let master = snapshot.master;
        for parameter in [
            MasterParameter::Volume(master.volume),
            MasterParameter::Pan(master.pan),
            MasterParameter::VoiceCap(master.voice_cap),
            MasterParameter::Interpolation(master.interpolation),
            MasterParameter::Transposition(master.transposition),
        ] {
            self.set_master_parameter(parameter);
        }
        for (channel, state) in snapshot.channels.iter().enumerate() {
            let mask = state
                .locked_controllers
                .iter()
                .filter(|cc| **cc < 128)
                .fold(0u128, |mask, cc| mask | (1u128 << cc));
            if let Some(slot) = self.locked.get_mut(channel) {
                *slot = mask;
            }
        }
        self.key_modifiers = snapshot
            .key_modifiers
            .iter()
            .map(|entry| ((entry.channel, entry.note), entry.modifier))
            .collect();
    }

    pub fn render(&mut self, layout: &BusLayout, out: &mut [f32]) {
        self.engine.render(layout, out);
    }

    /// Sends a `ChannelPropertyChange` for every channel whose state moved
    /// since the last report.
    pub fn report_channel_properties(&mut self) {
        if !self.report_properties {
            return;
        }
        for channel in 0..self.reported.len() {
            let Some(property) = self.engine.channel_property(channel) else {
                continue;
            };
            if self.reported[channel] != Some(property) {
                self.reported[channel] = Some(property);
                self.outbox
                    .synth(SynthEvent::ChannelPropertyChange { channel, property });
            }
        }
    }
}

/// Extracts the text of a Roland GS or Yamaha XG display SysEx.
pub fn display_text(data: &[u8]) -> Option<String> {
    let body = data.strip_prefix(&[0xF0])?;
    let body = body.strip_suffix(&[0xF7]).unwrap_or(body);
    let text = match body {
        // Roland GS: 41 dev 45 12 10 00 00 <text> <checksum>
        [0x41, _, 0x45, 0x12, 0x10, 0x00, 0x00, text @ .., _checksum] => text,
        // Yamaha XG: 43 1n 4C 06 00 <pos> <text>
        [0x43, device, 0x4C, 0x06, 0x00, _, text @ ..] if device & 0xF0 == 0x10 => text,
        _ => return None,
    };
    let text: String = text
        .iter()
        .filter(|byte| (0x20..0x7F).contains(*byte))
        .map(|&byte| byte as char)
        .collect();
    Some(text)
}
