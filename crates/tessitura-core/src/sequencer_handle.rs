use crate::config::{CorrelationPolicy, SequencerOptions};
use crate::correlation::{Correlations, PendingResponse};
use crate::dual_clock::DualClock;
use crate::envelope::{
    Command, Envelope, Response, ResponseKind, SequencerCommand, SequencerEvent, SequencerEventKind,
    SongChange,
};
use crate::error::RemoteError;
use crate::listeners::EventListeners;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::sync::Arc;
use tessitura_domain_song::{ParsedSong, SongMetadata, SongSource};
use tessitura_ports::clock::Clock;
use tessitura_ports::types::{LoopCount, Seconds, SequencerId};

/// What the synth handle forwards to a sequencer handle.
#[derive(Debug)]
pub enum SequencerInbound {
    Event(SequencerEvent),
    Response(Response),
}

fn midi_data(response: Response) -> Option<Option<ParsedSong>> {
    match response {
        Response::MidiData(song) => Some(song),
        _ => None,
    }
}

/// Main-thread proxy of one remote sequencer.
pub struct SequencerHandle {
    id: SequencerId,
    commands: Sender<Envelope<Command>>,
    inbound: Receiver<SequencerInbound>,
    clock: DualClock,
    correlations: Correlations,
    listeners: EventListeners<SequencerEventKind, SequencerEvent>,
    midi_data: Option<SongMetadata>,
    // A song list was posted and the remote has not answered with a song yet.
    loading: bool,
    song_index: usize,
    song_list: Vec<SongMetadata>,
    loop_enabled: bool,
    loop_count: LoopCount,
    is_finished: bool,
    shuffle: bool,
    auto_play: bool,
    skip_to_first_note_on: bool,
    preserve_playback_state: bool,
    external_midi_playback: bool,
}

impl SequencerHandle {
    pub(crate) fn new(
        id: SequencerId,
        commands: Sender<Envelope<Command>>,
        inbound: Receiver<SequencerInbound>,
        audio_clock: Arc<dyn Clock>,
        wall_clock: Arc<dyn Clock>,
        options: SequencerOptions,
        policy: CorrelationPolicy,
    ) -> Self {
        Self {
            id,
            commands,
            inbound,
            clock: DualClock::new(audio_clock, wall_clock, options.initial_playback_rate),
            correlations: Correlations::new(policy),
            listeners: EventListeners::new(),
            midi_data: None,
            loading: false,
            song_index: 0,
            song_list: Vec::new(),
            loop_enabled: true,
            loop_count: LoopCount::Infinite,
            is_finished: false,
            shuffle: false,
            auto_play: options.auto_play,
            skip_to_first_note_on: options.skip_to_first_note_on,
            preserve_playback_state: options.preserve_playback_state,
            external_midi_playback: false,
        }
    }

    pub fn id(&self) -> SequencerId {
        self.id
    }

    fn post(&self, command: SequencerCommand) {
        let envelope = Envelope::global(Command::Sequencer { id: self.id, command });
        if self.commands.send(envelope).is_err() {
            log::warn!(target: "handle", "sequencer {}: remote core is gone", self.id);
        }
    }

    pub fn add_event_listener(
        &mut self,
        kind: SequencerEventKind,
        id: impl Into<String>,
        callback: impl FnMut(&SequencerEvent) + Send + 'static,
    ) {
        self.listeners.add(kind, id, callback);
    }

    pub fn remove_event_listener(&mut self, kind: SequencerEventKind, id: &str) -> bool {
        self.listeners.remove(kind, id)
    }

    /// `None` until a song is loaded.
    pub fn midi_data(&self) -> Option<&SongMetadata> {
        self.midi_data.as_ref()
    }

    /// Infinite while no song is loaded.
    pub fn duration(&self) -> Seconds {
        self.midi_data
            .as_ref()
            .map_or(f64::INFINITY, |metadata| metadata.duration)
    }

    pub fn song_name(&self) -> &str {
        self.midi_data
            .as_ref()
            .map_or("", |metadata| metadata.name.as_str())
    }

    pub fn song_index(&self) -> usize {
        self.song_index
    }

    pub fn songs_amount(&self) -> usize {
        self.song_list.len()
    }

    pub fn song_list(&self) -> &[SongMetadata] {
        &self.song_list
    }

    pub fn loop_enabled(&self) -> bool {
        self.loop_enabled
    }

    pub fn loop_count(&self) -> LoopCount {
        self.loop_count
    }

    pub fn is_finished(&self) -> bool {
        self.is_finished
    }

    pub fn paused(&self) -> bool {
        self.clock.is_paused()
    }

    pub fn shuffled(&self) -> bool {
        self.shuffle
    }

    pub fn skip_to_first_note_on(&self) -> bool {
        self.skip_to_first_note_on
    }

    pub fn preserve_playback_state(&self) -> bool {
        self.preserve_playback_state
    }

    pub fn external_midi_playback(&self) -> bool {
        self.external_midi_playback
    }

    pub fn playback_rate(&self) -> f64 {
        self.clock.playback_rate()
    }

    pub fn current_time(&self) -> Seconds {
        self.clock.current_time()
    }

    pub fn current_high_resolution_time(&mut self) -> Seconds {
        self.clock.current_high_resolution_time()
    }

    pub fn load_new_song_list(&mut self, songs: Vec<SongSource>) {
        let auto_play = self.auto_play;
        self.load_new_song_list_with(songs, auto_play);
    }

    pub fn load_new_song_list_with(&mut self, songs: Vec<SongSource>, auto_play: bool) {
        if songs.is_empty() {
            log::warn!(target: "handle", "sequencer {}: empty song list", self.id);
        }
        self.is_finished = false;
        self.loading = !songs.is_empty();
        self.post(SequencerCommand::LoadNewSongList { songs, auto_play });
    }

    /// True between posting a song list and the remote reporting its first song.
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Starts or resumes playback. The local clock moves at once when a song is
    /// known; the remote's playback state event has the final word.
    pub fn play(&mut self) {
        let Some(metadata) = self.midi_data.as_ref() else {
            if self.loading {
                self.post(SequencerCommand::Play);
            } else {
                log::debug!(target: "handle", "sequencer {}: play ignored, no song", self.id);
            }
            return;
        };
        if self.clock.is_paused() {
            if self.is_finished {
                let start = if self.skip_to_first_note_on {
                    metadata.first_note_on
                } else {
                    0.0
                };
                self.is_finished = false;
                self.clock.resume_at(start);
            } else {
                self.clock.resume();
            }
        }
        self.post(SequencerCommand::Play);
    }

    /// Always reaches the remote, even while a song list is still loading.
    pub fn pause(&mut self) {
        self.clock.pause();
        self.post(SequencerCommand::Pause);
    }

    /// Seeks, clamped to `[0, duration]`. Ignored while no song is loaded.
    pub fn set_current_time(&mut self, time: Seconds) {
        let Some(metadata) = self.midi_data.as_ref() else {
            log::debug!(target: "handle", "sequencer {}: seek ignored, no song", self.id);
            return;
        };
        if !time.is_finite() {
            log::warn!(target: "handle", "sequencer {}: ignoring seek to {time}", self.id);
            return;
        }
        let mut time = time.clamp(0.0, metadata.duration);
        if time == 0.0 && self.skip_to_first_note_on {
            time = metadata.first_note_on;
        }
        self.is_finished = false;
        self.clock.recalculate_start_time(time);
        self.post(SequencerCommand::SetTime(time));
    }

    pub fn set_playback_rate(&mut self, rate: f64) {
        if !(rate.is_finite() && rate > 0.0) {
            log::warn!(target: "handle", "sequencer {}: ignoring playback rate {rate}", self.id);
            return;
        }
        self.clock.set_playback_rate(rate);
        self.post(SequencerCommand::SetPlaybackRate(rate));
    }

    pub fn set_loop(&mut self, enabled: bool) {
        self.loop_enabled = enabled;
        self.post(SequencerCommand::SetLoop(enabled));
    }

    pub fn set_loop_count(&mut self, count: LoopCount) {
        self.loop_count = count;
        self.post(SequencerCommand::SetLoopCount(count));
    }

    pub fn next_song(&mut self) {
        self.post(SequencerCommand::ChangeSong(SongChange::Next));
    }

    pub fn previous_song(&mut self) {
        self.post(SequencerCommand::ChangeSong(SongChange::Previous));
    }

    pub fn set_song_index(&mut self, index: usize) {
        if !self.song_list.is_empty() && index >= self.song_list.len() {
            log::warn!(target: "handle", "sequencer {}: song index {index} out of range", self.id);
            return;
        }
        self.post(SequencerCommand::ChangeSong(SongChange::Index(index)));
    }

    pub fn set_shuffle(&mut self, shuffle: bool) {
        self.shuffle = shuffle;
        let change = if shuffle {
            SongChange::ShuffleOn
        } else {
            SongChange::ShuffleOff
        };
        self.post(SequencerCommand::ChangeSong(change));
    }

    pub fn set_external_midi_playback(&mut self, enabled: bool) {
        self.external_midi_playback = enabled;
        self.post(SequencerCommand::SetExternalMidiPlayback(enabled));
    }

    pub fn set_skip_to_first_note_on(&mut self, skip: bool) {
        self.skip_to_first_note_on = skip;
        self.post(SequencerCommand::SetSkipToFirstNoteOn(skip));
    }

    pub fn set_preserve_playback_state(&mut self, preserve: bool) {
        self.preserve_playback_state = preserve;
        self.post(SequencerCommand::SetPreservePlaybackState(preserve));
    }

    /// The full parsed song currently loaded, or `None` when empty.
    pub fn get_midi(&mut self) -> PendingResponse<Option<ParsedSong>> {
        let pending = self.correlations.register(ResponseKind::MidiData, midi_data);
        self.post(SequencerCommand::GetMidi);
        pending
    }

    /// Applies everything the synth handle forwarded. Returns the number of
    /// messages handled, or the first MIDI error nobody listens for.
    pub fn poll(&mut self) -> Result<usize, RemoteError> {
        let mut handled = 0;
        loop {
            let inbound = match self.inbound.try_recv() {
                Ok(inbound) => inbound,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return Ok(handled),
            };
            handled += 1;
            match inbound {
                SequencerInbound::Response(response) => {
                    self.correlations.resolve(response);
                }
                SequencerInbound::Event(event) => self.handle_event(event)?,
            }
        }
    }

    fn handle_event(&mut self, event: SequencerEvent) -> Result<(), RemoteError> {
        match &event {
            SequencerEvent::SongChange {
                metadata,
                song_index,
                start_time,
                auto_play,
            } => {
                self.midi_data = Some(metadata.clone());
                self.loading = false;
                self.song_index = *song_index;
                self.is_finished = false;
                if *auto_play {
                    self.clock.resume_at(*start_time);
                } else {
                    self.clock.pause_at(*start_time);
                }
            }
            SequencerEvent::SongEnded { time } => {
                self.is_finished = true;
                self.clock.pause_at(*time);
            }
            SequencerEvent::TimeChange { time } => self.clock.recalculate_start_time(*time),
            SequencerEvent::PlaybackStateChange { paused, time } => {
                self.is_finished = false;
                if *paused {
                    self.clock.pause_at(*time);
                } else {
                    self.clock.resume_at(*time);
                }
            }
            SequencerEvent::LoopCountChange(count) => self.loop_count = *count,
            SequencerEvent::SongListChange(list) => {
                self.song_list = list.clone();
                if list.is_empty() {
                    self.loading = false;
                    self.midi_data = None;
                    self.song_index = 0;
                    self.clock.pause_at(0.0);
                }
            }
            SequencerEvent::MidiError(message) => {
                if !self.listeners.has(SequencerEventKind::MidiError) {
                    return Err(RemoteError::Midi(message.clone()));
                }
            }
            SequencerEvent::TextEvent { .. }
            | SequencerEvent::MetaEvent { .. }
            | SequencerEvent::ExternalMidi { .. } => {}
        }
        self.listeners.emit(event.kind(), &event);
        Ok(())
    }
}
