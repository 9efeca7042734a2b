use crate::audio_clock::AudioClock;
use crate::config::{RenderOptions, SequencerOptions, SynthConfig};
use crate::envelope::{Command, Envelope, MessageTiming, Response, SoundBankOpStatus};
use crate::link::{Outbox, RemoteLink};
use crate::offline::{encode_wav, render_offline};
use crate::processor::SynthProcessor;
use crate::sequencer_engine::SequencerEngine;
use crossbeam_channel::{Receiver, TryRecvError};
use std::collections::VecDeque;
use std::sync::Arc;
use tessitura_domain_song::SongSource;
use tessitura_ports::clock::Clock;
use tessitura_ports::midi::{ChannelMessage, MidiMessage};
use tessitura_ports::render::BusLayout;
use tessitura_ports::synth::SynthEngine;
use tessitura_ports::types::{ChannelTarget, Seconds, SequencerId};

#[derive(Debug)]
struct ScheduledMessage {
    at: Seconds,
    message: MidiMessage,
    channel_offset: usize,
    force: bool,
}

/// Remote side of the protocol. Lives in the rendering context and is driven
/// by `process`, which never blocks.
pub struct SynthRemoteCore {
    layout: BusLayout,
    clock: Arc<AudioClock>,
    inbound: Receiver<Envelope<Command>>,
    outbox: Outbox,
    processor: Option<SynthProcessor>,
    sequencers: Vec<SequencerEngine>,
    scheduled: VecDeque<ScheduledMessage>,
    mixed_l: Vec<f32>,
    mixed_r: Vec<f32>,
    mixed_pos: usize,
    scratch: Vec<f32>,
    link_closed: bool,
}

impl SynthRemoteCore {
    pub fn new(
        engine: Box<dyn SynthEngine>,
        link: RemoteLink,
        clock: Arc<AudioClock>,
        config: &SynthConfig,
    ) -> Self {
        if engine.sample_rate_hz() != clock.sample_rate_hz() {
            log::warn!(
                target: "remote",
                "engine renders at {} Hz but the audio clock counts {} Hz",
                engine.sample_rate_hz(),
                clock.sample_rate_hz()
            );
        }
        let layout = BusLayout::new(config.quantum_frames.max(1));
        let outbox = Outbox::new(link.events);
        let mut processor =
            SynthProcessor::new(engine, outbox.clone(), config.report_channel_properties);
        processor.ensure_channels(config.initial_channels);
        let quantum = layout.quantum_frames;
        let core = Self {
            layout,
            clock,
            inbound: link.commands,
            outbox,
            processor: Some(processor),
            sequencers: Vec::new(),
            scheduled: VecDeque::new(),
            mixed_l: vec![0.0; quantum],
            mixed_r: vec![0.0; quantum],
            mixed_pos: quantum,
            scratch: vec![0.0; layout.buffer_len()],
            link_closed: false,
        };
        log::info!(target: "remote", "synth core ready, quantum {quantum} frames");
        core.outbox.response(Response::InitializationComplete);
        core
    }

    pub fn layout(&self) -> BusLayout {
        self.layout
    }

    pub fn clock(&self) -> Arc<AudioClock> {
        self.clock.clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.processor.is_none()
    }

    /// True once the handle side dropped its command sender.
    pub fn is_link_closed(&self) -> bool {
        self.link_closed
    }

    pub fn processor(&self) -> Option<&SynthProcessor> {
        self.processor.as_ref()
    }

    pub fn sequencer(&self, id: SequencerId) -> Option<&SequencerEngine> {
        self.sequencers.get(id)
    }

    pub fn sequencer_count(&self) -> usize {
        self.sequencers.len()
    }

    /// Ids are dense: the next id is the current sequencer count.
    pub fn add_sequencer(&mut self, options: SequencerOptions) -> SequencerId {
        let id = self.sequencers.len();
        self.sequencers
            .push(SequencerEngine::new(id, options, self.outbox.clone()));
        log::debug!(target: "remote", "created sequencer {id}");
        id
    }

    pub fn load_sound_bank(
        &mut self,
        data: &[u8],
        id: impl Into<String>,
        bank_offset: u8,
    ) -> SoundBankOpStatus {
        match self.processor.as_mut() {
            Some(processor) => processor.add_sound_bank(data, id.into(), bank_offset),
            None => SoundBankOpStatus::Rejected("synth destroyed".to_string()),
        }
    }

    pub fn delete_sound_bank(&mut self, id: &str) -> SoundBankOpStatus {
        match self.processor.as_mut() {
            Some(processor) => processor.delete_sound_bank(id),
            None => SoundBankOpStatus::Rejected("synth destroyed".to_string()),
        }
    }

    pub fn rearrange_sound_banks(&mut self, order: &[String]) -> SoundBankOpStatus {
        match self.processor.as_mut() {
            Some(processor) => processor.rearrange_sound_banks(order),
            None => SoundBankOpStatus::Rejected("synth destroyed".to_string()),
        }
    }

    /// Handles every envelope already queued. Returns how many were handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        loop {
            match self.inbound.try_recv() {
                Ok(envelope) => {
                    self.dispatch(envelope);
                    handled += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.link_closed {
                        log::debug!(target: "remote", "handle disconnected");
                        self.link_closed = true;
                    }
                    break;
                }
            }
        }
        handled
    }

    pub fn dispatch(&mut self, envelope: Envelope<Command>) {
        let Envelope { channel, message } = envelope;
        let now = self.clock.now();
        let Some(processor) = self.processor.as_mut() else {
            log::debug!(target: "remote", "{} ignored, synth destroyed", message.name());
            return;
        };
        match message {
            Command::MidiMessage {
                data,
                channel_offset,
                force,
                timing,
            } => match MidiMessage::parse(&data) {
                Ok(message) => match timing {
                    MessageTiming::At(at) if at > now => {
                        let index = self.scheduled.partition_point(|scheduled| scheduled.at <= at);
                        self.scheduled.insert(
                            index,
                            ScheduledMessage {
                                at,
                                message,
                                channel_offset,
                                force,
                            },
                        );
                    }
                    _ => processor.apply_midi(&message, channel_offset, force),
                },
                Err(err) => log::warn!(
                    target: "remote",
                    "dropping malformed MIDI message {data:02x?}: {err}"
                ),
            },
            Command::ControllerChange {
                controller,
                value,
                force,
            } => with_channel(channel, "ControllerChange", |ch| {
                let message = ChannelMessage::ControllerChange { controller, value };
                processor.apply_channel_message(ch, message, force)
            }),
            Command::ProgramChange { program } => with_channel(channel, "ProgramChange", |ch| {
                let message = ChannelMessage::ProgramChange { program };
                processor.apply_channel_message(ch, message, false)
            }),
            Command::PitchWheel { value } => with_channel(channel, "PitchWheel", |ch| {
                processor.apply_channel_message(ch, ChannelMessage::PitchWheel { value }, false)
            }),
            Command::ChannelPressure { pressure } => with_channel(channel, "ChannelPressure", |ch| {
                let message = ChannelMessage::ChannelPressure { pressure };
                processor.apply_channel_message(ch, message, false)
            }),
            Command::PolyPressure { note, pressure } => with_channel(channel, "PolyPressure", |ch| {
                let message = ChannelMessage::PolyPressure { note, pressure };
                processor.apply_channel_message(ch, message, false)
            }),
            Command::StopAll { force } => match channel {
                ChannelTarget::All => processor.stop_all(force),
                ChannelTarget::Channel(ch) => processor.stop_channel(ch, force),
            },
            Command::ResetControllers => processor.reset_controllers(channel),
            Command::MuteChannel { muted } => {
                with_channel(channel, "MuteChannel", |ch| processor.set_muted(ch, muted))
            }
            Command::SetDrums { is_drum } => {
                with_channel(channel, "SetDrums", |ch| processor.set_drums(ch, is_drum))
            }
            Command::TransposeChannel { semitones, force } => match channel {
                ChannelTarget::All => {
                    for ch in 0..processor.channel_count() {
                        processor.transpose_channel(ch, semitones, force);
                    }
                }
                ChannelTarget::Channel(ch) => processor.transpose_channel(ch, semitones, force),
            },
            Command::LockController { controller, locked } => {
                processor.lock_controller(channel, controller, locked)
            }
            Command::SetMasterParameter(parameter) => processor.set_master_parameter(parameter),
            Command::AddSoundBank {
                data,
                id,
                bank_offset,
            } => {
                let status = processor.add_sound_bank(&data, id, bank_offset);
                self.outbox.response(Response::SoundBankOp(status));
            }
            Command::DeleteSoundBank { id } => {
                let status = processor.delete_sound_bank(&id);
                self.outbox.response(Response::SoundBankOp(status));
            }
            Command::RearrangeSoundBanks { order } => {
                let status = processor.rearrange_sound_banks(&order);
                self.outbox.response(Response::SoundBankOp(status));
            }
            Command::AddKeyModifier { note, modifier } => {
                with_channel(channel, "AddKeyModifier", |ch| {
                    processor.add_key_modifier(ch, note, modifier)
                })
            }
            Command::DeleteKeyModifier { note } => with_channel(channel, "DeleteKeyModifier", |ch| {
                processor.delete_key_modifier(ch, note)
            }),
            Command::ClearKeyModifiers => processor.clear_key_modifiers(),
            Command::RequestSnapshot => {
                let snapshot = processor.snapshot();
                self.outbox.response(Response::Snapshot(snapshot));
            }
            Command::ApplySnapshot(snapshot) => processor.apply_snapshot(&snapshot),
            Command::NewSequencer { id, options } => {
                let assigned = self.add_sequencer(options);
                if assigned != id {
                    log::warn!(
                        target: "remote",
                        "sequencer id mismatch: handle expects {id}, core assigned {assigned}"
                    );
                }
            }
            Command::Sequencer { id, command } => match self.sequencers.get_mut(id) {
                Some(sequencer) => sequencer.handle_command(command, now, processor),
                None => log::warn!(target: "remote", "no sequencer with id {id}"),
            },
            Command::SetLogLevel(level) => log::set_max_level(level.into()),
            Command::RenderAudio { song, options } => self.start_render(song, options),
            Command::WriteWav { audio } => {
                let result = encode_wav(&audio).map_err(|err| err.to_string());
                self.outbox.response(Response::WriteFile(result));
            }
            Command::Destroy => self.destroy(),
        }
    }

    fn start_render(&mut self, song: SongSource, options: RenderOptions) {
        let Some(processor) = self.processor.as_ref() else {
            return;
        };
        let outbox = self.outbox.clone();
        let engine = match processor.engine().fork_offline(options.sample_rate_hz) {
            Ok(engine) => engine,
            Err(err) => {
                log::warn!(target: "remote", "offline render unavailable: {err}");
                outbox.response(Response::RenderComplete(Err(err.to_string())));
                return;
            }
        };
        let snapshot = processor.snapshot();
        let spawned = std::thread::Builder::new()
            .name("tessitura-render".to_string())
            .spawn(move || {
                let result = song
                    .into_parsed()
                    .map_err(|err| err.to_string())
                    .map(|song| {
                        render_offline(engine, song, &snapshot, &options, |progress| {
                            outbox.response(Response::RenderProgress(progress))
                        })
                    });
                if let Err(err) = &result {
                    log::warn!(target: "remote", "offline render failed: {err}");
                }
                outbox.response(Response::RenderComplete(result));
            });
        if let Err(err) = spawned {
            log::error!(target: "remote", "failed to spawn render thread: {err}");
            self.outbox
                .response(Response::RenderComplete(Err(err.to_string())));
        }
    }

    fn apply_due_messages(&mut self, now: Seconds) {
        let Some(processor) = self.processor.as_mut() else {
            return;
        };
        while self.scheduled.front().is_some_and(|scheduled| scheduled.at <= now) {
            if let Some(scheduled) = self.scheduled.pop_front() {
                processor.apply_midi(&scheduled.message, scheduled.channel_offset, scheduled.force);
            }
        }
    }

    /// Renders one quantum into `out`, laid out per `layout()`.
    pub fn process(&mut self, out: &mut [f32]) {
        self.pump();
        if self.processor.is_none() {
            out.fill(0.0);
            return;
        }
        let now = self.clock.now();
        self.apply_due_messages(now);
        let Some(processor) = self.processor.as_mut() else {
            out.fill(0.0);
            return;
        };
        for sequencer in &mut self.sequencers {
            sequencer.process_tick(now, processor);
        }
        out.fill(0.0);
        processor.render(&self.layout, out);
        processor.report_channel_properties();
        self.clock.advance(self.layout.quantum_frames);
    }

    /// Fills a stereo pair of any length, rendering quanta as needed.
    pub fn process_stereo(&mut self, out_l: &mut [f32], out_r: &mut [f32]) {
        let frames = out_l.len().min(out_r.len());
        let quantum = self.layout.quantum_frames;
        let mut written = 0;
        while written < frames {
            if self.mixed_pos >= quantum {
                let mut scratch = std::mem::take(&mut self.scratch);
                self.process(&mut scratch);
                self.layout.mix_down(&scratch, &mut self.mixed_l, &mut self.mixed_r);
                self.scratch = scratch;
                self.mixed_pos = 0;
            }
            let count = (quantum - self.mixed_pos).min(frames - written);
            out_l[written..written + count]
                .copy_from_slice(&self.mixed_l[self.mixed_pos..self.mixed_pos + count]);
            out_r[written..written + count]
                .copy_from_slice(&self.mixed_r[self.mixed_pos..self.mixed_pos + count]);
            self.mixed_pos += count;
            written += count;
        }
    }

    /// Releases the engine and all sequencers. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        let Some(mut processor) = self.processor.take() else {
            return;
        };
        processor.stop_all(true);
        self.sequencers.clear();
        self.scheduled.clear();
        log::info!(target: "remote", "synth core destroyed");
    }
}

fn with_channel(target: ChannelTarget, command: &str, apply: impl FnOnce(usize)) {
    match target {
        ChannelTarget::Channel(channel) => apply(channel),
        ChannelTarget::All => log::warn!(target: "remote", "{command} needs a channel, got all"),
    }
}
