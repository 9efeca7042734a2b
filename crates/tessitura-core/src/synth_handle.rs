use crate::config::{CorrelationPolicy, RenderOptions, SequencerOptions, SynthConfig};
use crate::correlation::{Correlations, PendingResponse};
use crate::envelope::{
    Command, Envelope, LogLevel, MessageTiming, Outbound, RenderedAudio, Response, ResponseKind,
    SoundBankOpStatus, SynthEvent, SynthEventKind,
};
use crate::error::RemoteError;
use crate::link::HandleLink;
use crate::listeners::EventListeners;
use crate::sequencer_handle::{SequencerHandle, SequencerInbound};
use crossbeam_channel::{unbounded, Sender, TryRecvError};
use std::sync::Arc;
use tessitura_domain_song::SongSource;
use tessitura_ports::clock::Clock;
use tessitura_ports::midi::{
    CHANNEL_PRESSURE, CONTROLLER_CHANGE, NOTE_OFF, NOTE_ON, PITCH_WHEEL, POLY_PRESSURE,
    PROGRAM_CHANGE,
};
use tessitura_ports::synth::{
    KeyModifier, MasterParameter, MasterParameters, PresetInfo, SynthSnapshot,
};
use tessitura_ports::types::{split_channel, ChannelProperty, ChannelTarget, SequencerId};

/// Options for `SynthHandle::send_message`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MessageOptions {
    pub force: bool,
    pub timing: MessageTiming,
}

fn wrap7(value: u32) -> u8 {
    (value % 128) as u8
}

fn sound_bank_status(response: Response) -> Option<SoundBankOpStatus> {
    match response {
        Response::SoundBankOp(status) => Some(status),
        _ => None,
    }
}

fn snapshot(response: Response) -> Option<SynthSnapshot> {
    match response {
        Response::Snapshot(snapshot) => Some(snapshot),
        _ => None,
    }
}

fn render_result(response: Response) -> Option<Result<RenderedAudio, String>> {
    match response {
        Response::RenderComplete(result) => Some(result),
        _ => None,
    }
}

fn write_result(response: Response) -> Option<Result<Vec<u8>, String>> {
    match response {
        Response::WriteFile(result) => Some(result),
        _ => None,
    }
}

fn initialized(response: Response) -> Option<()> {
    match response {
        Response::InitializationComplete => Some(()),
        _ => None,
    }
}

/// Main-thread proxy of a remote synthesizer. Every method posts an envelope;
/// state visible here only changes inside `poll()`.
pub struct SynthHandle {
    link: HandleLink,
    audio_clock: Arc<dyn Clock>,
    wall_clock: Arc<dyn Clock>,
    policy: CorrelationPolicy,
    correlations: Correlations,
    listeners: EventListeners<SynthEventKind, SynthEvent>,
    channel_properties: Vec<ChannelProperty>,
    presets: Vec<PresetInfo>,
    master: MasterParameters,
    display_text: Option<String>,
    render_progress: f32,
    sequencer_routes: Vec<Sender<SequencerInbound>>,
    initialized: bool,
    destroyed: bool,
}

impl SynthHandle {
    pub fn new(
        link: HandleLink,
        audio_clock: Arc<dyn Clock>,
        wall_clock: Arc<dyn Clock>,
        config: &SynthConfig,
    ) -> Self {
        Self {
            link,
            audio_clock,
            wall_clock,
            policy: config.correlation_policy,
            correlations: Correlations::new(config.correlation_policy),
            listeners: EventListeners::new(),
            channel_properties: Vec::new(),
            presets: Vec::new(),
            master: MasterParameters::default(),
            display_text: None,
            render_progress: 0.0,
            sequencer_routes: Vec::new(),
            initialized: false,
            destroyed: false,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.initialized
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Resolves once the remote core reported that it is initialized.
    pub fn when_ready(&mut self) -> PendingResponse<()> {
        if self.initialized {
            return PendingResponse::ready(
                ResponseKind::InitializationComplete,
                Response::InitializationComplete,
                initialized,
            );
        }
        self.correlations
            .register(ResponseKind::InitializationComplete, initialized)
    }

    pub fn channels_amount(&self) -> usize {
        self.channel_properties.len()
    }

    pub fn channel_properties(&self) -> &[ChannelProperty] {
        &self.channel_properties
    }

    pub fn voices_amount(&self) -> usize {
        self.channel_properties
            .iter()
            .map(|property| property.voices_amount)
            .sum()
    }

    pub fn presets(&self) -> &[PresetInfo] {
        &self.presets
    }

    pub fn master_parameters(&self) -> MasterParameters {
        self.master
    }

    pub fn display_text(&self) -> Option<&str> {
        self.display_text.as_deref()
    }

    pub fn render_progress(&self) -> f32 {
        self.render_progress
    }

    pub fn add_event_listener(
        &mut self,
        kind: SynthEventKind,
        id: impl Into<String>,
        callback: impl FnMut(&SynthEvent) + Send + 'static,
    ) {
        self.listeners.add(kind, id, callback);
    }

    pub fn remove_event_listener(&mut self, kind: SynthEventKind, id: &str) -> bool {
        self.listeners.remove(kind, id)
    }

    fn post(&self, channel: ChannelTarget, command: Command) {
        if self.destroyed {
            log::debug!(target: "handle", "{} dropped, synth destroyed", command.name());
            return;
        }
        if self.link.commands.send(Envelope::new(channel, command)).is_err() {
            log::warn!(target: "handle", "remote core is gone");
        }
    }

    fn request<T>(
        &mut self,
        channel: ChannelTarget,
        command: Command,
        kind: ResponseKind,
        extract: fn(Response) -> Option<T>,
    ) -> PendingResponse<T> {
        debug_assert_eq!(command.expected_response(), Some(kind));
        let pending = self.correlations.register(kind, extract);
        self.post(channel, command);
        pending
    }

    /// Sends raw MIDI bytes. The status byte's channel nibble is offset by `channel_offset`.
    pub fn send_message(&self, data: Vec<u8>, channel_offset: usize, options: MessageOptions) {
        let channel = data
            .first()
            .filter(|status| **status < 0xF0)
            .map_or(ChannelTarget::All, |status| {
                ChannelTarget::Channel((status & 0x0F) as usize + channel_offset)
            });
        self.post(
            channel,
            Command::MidiMessage {
                data,
                channel_offset,
                force: options.force,
                timing: options.timing,
            },
        );
    }

    fn channel_message(&self, channel: usize, status: u8, data: &[u8]) {
        let (in_port, offset) = split_channel(channel);
        let mut bytes = Vec::with_capacity(1 + data.len());
        bytes.push(status | in_port);
        bytes.extend_from_slice(data);
        self.send_message(bytes, offset, MessageOptions::default());
    }

    /// Note and velocity wrap modulo 128.
    pub fn note_on(&self, channel: usize, note: u32, velocity: u32) {
        self.channel_message(channel, NOTE_ON, &[wrap7(note), wrap7(velocity)]);
    }

    pub fn note_off(&self, channel: usize, note: u32) {
        self.channel_message(channel, NOTE_OFF, &[wrap7(note), 64]);
    }

    pub fn poly_pressure(&self, channel: usize, note: u32, pressure: u32) {
        self.channel_message(channel, POLY_PRESSURE, &[wrap7(note), wrap7(pressure)]);
    }

    pub fn controller_change(&self, channel: usize, controller: u32, value: u32, force: bool) {
        if force {
            self.post(
                ChannelTarget::Channel(channel),
                Command::ControllerChange {
                    controller: wrap7(controller),
                    value: wrap7(value),
                    force,
                },
            );
        } else {
            self.channel_message(channel, CONTROLLER_CHANGE, &[wrap7(controller), wrap7(value)]);
        }
    }

    pub fn program_change(&self, channel: usize, program: u32) {
        self.channel_message(channel, PROGRAM_CHANGE, &[wrap7(program)]);
    }

    pub fn channel_pressure(&self, channel: usize, pressure: u32) {
        self.channel_message(channel, CHANNEL_PRESSURE, &[wrap7(pressure)]);
    }

    pub fn pitch_wheel(&self, channel: usize, msb: u32, lsb: u32) {
        self.channel_message(channel, PITCH_WHEEL, &[wrap7(lsb), wrap7(msb)]);
    }

    pub fn system_exclusive(&self, data: Vec<u8>, channel_offset: usize) {
        let mut bytes = data;
        if bytes.first() != Some(&0xF0) {
            bytes.insert(0, 0xF0);
        }
        self.send_message(bytes, channel_offset, MessageOptions::default());
    }

    pub fn stop_all(&self, force: bool) {
        self.post(ChannelTarget::All, Command::StopAll { force });
    }

    pub fn reset_controllers(&self, channel: ChannelTarget) {
        self.post(channel, Command::ResetControllers);
    }

    pub fn mute_channel(&self, channel: usize, muted: bool) {
        self.post(ChannelTarget::Channel(channel), Command::MuteChannel { muted });
    }

    pub fn set_drums(&self, channel: usize, is_drum: bool) {
        self.post(ChannelTarget::Channel(channel), Command::SetDrums { is_drum });
    }

    pub fn transpose_channel(&self, channel: usize, semitones: f32, force: bool) {
        self.post(
            ChannelTarget::Channel(channel),
            Command::TransposeChannel { semitones, force },
        );
    }

    pub fn transpose(&self, semitones: f32) {
        self.set_master_parameter(MasterParameter::Transposition(semitones));
    }

    pub fn lock_controller(&self, channel: ChannelTarget, controller: u32, locked: bool) {
        self.post(
            channel,
            Command::LockController {
                controller: wrap7(controller),
                locked,
            },
        );
    }

    pub fn set_master_parameter(&self, parameter: MasterParameter) {
        self.post(ChannelTarget::All, Command::SetMasterParameter(parameter));
    }

    pub fn set_log_level(&self, level: LogLevel) {
        self.post(ChannelTarget::All, Command::SetLogLevel(level));
    }

    pub fn add_key_modifier(&self, channel: usize, note: u32, modifier: KeyModifier) {
        self.post(
            ChannelTarget::Channel(channel),
            Command::AddKeyModifier {
                note: wrap7(note),
                modifier,
            },
        );
    }

    pub fn delete_key_modifier(&self, channel: usize, note: u32) {
        self.post(
            ChannelTarget::Channel(channel),
            Command::DeleteKeyModifier { note: wrap7(note) },
        );
    }

    pub fn clear_key_modifiers(&self) {
        self.post(ChannelTarget::All, Command::ClearKeyModifiers);
    }

    pub fn add_sound_bank(
        &mut self,
        data: Vec<u8>,
        id: impl Into<String>,
        bank_offset: u8,
    ) -> PendingResponse<SoundBankOpStatus> {
        let command = Command::AddSoundBank {
            data,
            id: id.into(),
            bank_offset,
        };
        self.request(ChannelTarget::All, command, ResponseKind::SoundBankOp, sound_bank_status)
    }

    pub fn delete_sound_bank(
        &mut self,
        id: impl Into<String>,
    ) -> PendingResponse<SoundBankOpStatus> {
        let command = Command::DeleteSoundBank { id: id.into() };
        self.request(ChannelTarget::All, command, ResponseKind::SoundBankOp, sound_bank_status)
    }

    pub fn rearrange_sound_banks(
        &mut self,
        order: Vec<String>,
    ) -> PendingResponse<SoundBankOpStatus> {
        self.request(
            ChannelTarget::All,
            Command::RearrangeSoundBanks { order },
            ResponseKind::SoundBankOp,
            sound_bank_status,
        )
    }

    pub fn get_snapshot(&mut self) -> PendingResponse<SynthSnapshot> {
        self.request(
            ChannelTarget::All,
            Command::RequestSnapshot,
            ResponseKind::Snapshot,
            snapshot,
        )
    }

    pub fn apply_snapshot(&self, snapshot: SynthSnapshot) {
        self.post(ChannelTarget::All, Command::ApplySnapshot(snapshot));
    }

    pub fn render_audio(
        &mut self,
        song: SongSource,
        options: RenderOptions,
    ) -> PendingResponse<Result<RenderedAudio, String>> {
        self.render_progress = 0.0;
        self.request(
            ChannelTarget::All,
            Command::RenderAudio { song, options },
            ResponseKind::RenderComplete,
            render_result,
        )
    }

    pub fn write_wav(&mut self, audio: RenderedAudio) -> PendingResponse<Result<Vec<u8>, String>> {
        self.request(
            ChannelTarget::All,
            Command::WriteWav { audio },
            ResponseKind::WriteFile,
            write_result,
        )
    }

    /// Creates a sequencer on the remote side. Its id is predicted locally;
    /// the core allocates ids in the same dense order.
    pub fn create_sequencer(&mut self, options: SequencerOptions) -> SequencerHandle {
        let id: SequencerId = self.sequencer_routes.len();
        let (route_tx, route_rx) = unbounded();
        self.sequencer_routes.push(route_tx);
        self.post(ChannelTarget::All, Command::NewSequencer { id, options });
        SequencerHandle::new(
            id,
            self.link.commands.clone(),
            route_rx,
            self.audio_clock.clone(),
            self.wall_clock.clone(),
            options,
            self.policy,
        )
    }

    /// One-way: later calls are dropped and the remote core releases its engine.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.post(ChannelTarget::All, Command::Destroy);
        self.destroyed = true;
        self.correlations.clear();
        self.sequencer_routes.clear();
    }

    /// Drains inbound envelopes. Returns how many were handled, or the first
    /// sound bank error nobody listens for.
    pub fn poll(&mut self) -> Result<usize, RemoteError> {
        let mut handled = 0;
        loop {
            let envelope = match self.link.events.try_recv() {
                Ok(envelope) => envelope,
                Err(TryRecvError::Empty) => return Ok(handled),
                Err(TryRecvError::Disconnected) => {
                    return if handled == 0 && !self.destroyed {
                        Err(RemoteError::Disconnected)
                    } else {
                        Ok(handled)
                    };
                }
            };
            handled += 1;
            match envelope.message {
                Outbound::Synth(event) => self.handle_event(event),
                Outbound::Sequencer { id, event } => self.route(id, SequencerInbound::Event(event)),
                Outbound::SequencerResponse { id, response } => {
                    self.route(id, SequencerInbound::Response(response))
                }
                Outbound::Response(response) => self.handle_response(response),
                Outbound::SoundBankError(message) => {
                    let event = SynthEvent::SoundBankError(message.clone());
                    if !self.listeners.has(SynthEventKind::SoundBankError) {
                        return Err(RemoteError::SoundBank(message));
                    }
                    self.listeners.emit(SynthEventKind::SoundBankError, &event);
                }
            }
        }
    }

    fn route(&mut self, id: SequencerId, inbound: SequencerInbound) {
        match self.sequencer_routes.get(id) {
            Some(route) => {
                if route.send(inbound).is_err() {
                    log::debug!(target: "handle", "sequencer {id} handle dropped");
                }
            }
            None => log::warn!(target: "handle", "event for unknown sequencer {id}"),
        }
    }

    fn handle_response(&mut self, response: Response) {
        match response {
            Response::RenderProgress(progress) => {
                self.render_progress = progress;
                self.listeners.emit(
                    SynthEventKind::RenderProgress,
                    &SynthEvent::RenderProgress { progress },
                );
            }
            Response::InitializationComplete => {
                self.initialized = true;
                while self.correlations.outstanding(ResponseKind::InitializationComplete) > 0 {
                    self.correlations.resolve(Response::InitializationComplete);
                }
            }
            other => {
                self.correlations.resolve(other);
            }
        }
    }

    fn handle_event(&mut self, event: SynthEvent) {
        match &event {
            SynthEvent::ChannelPropertyChange { channel, property } => {
                if self.channel_properties.len() <= *channel {
                    self.channel_properties
                        .resize(*channel + 1, ChannelProperty::default());
                }
                self.channel_properties[*channel] = *property;
            }
            SynthEvent::NewChannel { channel } => {
                if self.channel_properties.len() <= *channel {
                    self.channel_properties
                        .resize(*channel + 1, ChannelProperty::default());
                }
            }
            SynthEvent::PresetListChange(presets) => self.presets = presets.clone(),
            SynthEvent::MasterParameterChange(parameter) => self.master.apply(*parameter),
            SynthEvent::DisplayText(text) => self.display_text = Some(text.clone()),
            _ => {}
        }
        self.listeners.emit(event.kind(), &event);
    }
}
