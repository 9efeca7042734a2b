use crate::config::SequencerOptions;
use crate::envelope::{Response, SequencerCommand, SequencerEvent, SongChange};
use crate::link::Outbox;
use crate::processor::SynthProcessor;
use tessitura_domain_song::{ParsedSong, SongEvent, SongSource, SongTrack, TempoMap};
use tessitura_ports::midi::MidiMessage;
use tessitura_ports::types::{ChannelTarget, LoopCount, Seconds, SequencerId, Tick};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    /// No playable song; time is frozen at zero.
    Empty,
    Paused,
    Playing,
    /// The last song of a single-song list reached its end.
    Finished,
}

/// Read position inside the current song: the next event index of every track.
#[derive(Debug)]
struct SongCursor {
    tempo: TempoMap,
    positions: Vec<usize>,
}

impl SongCursor {
    fn new(song: &ParsedSong) -> Self {
        Self {
            tempo: song.tempo_map(),
            positions: vec![0; song.tracks.len()],
        }
    }

    fn rewind(&mut self) {
        self.positions.iter_mut().for_each(|position| *position = 0);
    }

    /// Earliest pending event across tracks; ties go to the lower track index.
    fn peek(&self, song: &ParsedSong) -> Option<(usize, Tick)> {
        let mut best: Option<(usize, Tick)> = None;
        for (index, track) in song.tracks.iter().enumerate() {
            if let Some(event) = track.events.get(self.positions[index]) {
                if best.map_or(true, |(_, tick)| event.tick < tick) {
                    best = Some((index, event.tick));
                }
            }
        }
        best
    }
}

struct EventSink<'a> {
    outbox: &'a Outbox,
    id: SequencerId,
    external: bool,
}

impl EventSink<'_> {
    /// Applies one song event. `replay` restores state during a seek, so
    /// notes and text are skipped.
    fn apply(
        &self,
        track_index: usize,
        track: &SongTrack,
        event: &SongEvent,
        processor: &mut SynthProcessor,
        replay: bool,
    ) {
        match event {
            SongEvent::Channel { channel, message } => {
                if replay && message.is_note() {
                    return;
                }
                if self.external {
                    let data = MidiMessage::Channel {
                        channel: *channel,
                        message: *message,
                    }
                    .to_bytes();
                    self.outbox.sequencer(
                        self.id,
                        SequencerEvent::ExternalMidi {
                            data,
                            channel_offset: track.channel_offset,
                        },
                    );
                    return;
                }
                processor.apply_channel_message(
                    track.channel_offset + *channel as usize,
                    *message,
                    false,
                );
            }
            SongEvent::SystemExclusive(data) => {
                if self.external {
                    self.outbox.sequencer(
                        self.id,
                        SequencerEvent::ExternalMidi {
                            data: data.clone(),
                            channel_offset: track.channel_offset,
                        },
                    );
                } else {
                    processor.system_exclusive(data, track.channel_offset);
                }
            }
            SongEvent::Text { kind, data } if !replay => self.outbox.sequencer(
                self.id,
                SequencerEvent::TextEvent {
                    kind: *kind,
                    data: data.clone(),
                    track: track_index,
                },
            ),
            SongEvent::Meta { meta_type, data } if !replay => self.outbox.sequencer(
                self.id,
                SequencerEvent::MetaEvent {
                    meta_type: *meta_type,
                    data: data.clone(),
                    track: track_index,
                },
            ),
            _ => {}
        }
    }
}

/// Per-sequencer playback state machine living inside the remote core.
pub struct SequencerEngine {
    id: SequencerId,
    outbox: Outbox,
    songs: Vec<ParsedSong>,
    // Play order over `songs`; identity unless shuffled.
    order: Vec<usize>,
    position: usize,
    shuffle: bool,
    rng: fastrand::Rng,
    cursor: Option<SongCursor>,
    state: PlaybackState,
    absolute_start_time: Seconds,
    paused_time: Seconds,
    playback_rate: f64,
    loop_enabled: bool,
    loops_remaining: LoopCount,
    external_midi_playback: bool,
    skip_to_first_note_on: bool,
    preserve_playback_state: bool,
}

impl SequencerEngine {
    pub fn new(id: SequencerId, options: SequencerOptions, outbox: Outbox) -> Self {
        let rate = options.initial_playback_rate;
        let playback_rate = if rate.is_finite() && rate > 0.0 {
            rate
        } else {
            1.0
        };
        Self {
            id,
            outbox,
            songs: Vec::new(),
            order: Vec::new(),
            position: 0,
            shuffle: false,
            rng: fastrand::Rng::new(),
            cursor: None,
            state: PlaybackState::Empty,
            absolute_start_time: 0.0,
            paused_time: 0.0,
            playback_rate,
            loop_enabled: true,
            loops_remaining: LoopCount::Infinite,
            external_midi_playback: false,
            skip_to_first_note_on: options.skip_to_first_note_on,
            preserve_playback_state: options.preserve_playback_state,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = fastrand::Rng::with_seed(seed);
        self
    }

    pub fn id(&self) -> SequencerId {
        self.id
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn songs(&self) -> &[ParsedSong] {
        &self.songs
    }

    /// Index into the song list of the song being played.
    pub fn song_index(&self) -> Option<usize> {
        self.order.get(self.position).copied()
    }

    pub fn current_song(&self) -> Option<&ParsedSong> {
        self.song_index().and_then(|index| self.songs.get(index))
    }

    pub fn loops_remaining(&self) -> LoopCount {
        self.loops_remaining
    }

    pub fn loop_enabled(&self) -> bool {
        self.loop_enabled
    }

    pub fn set_loop(&mut self, enabled: bool) {
        self.loop_enabled = enabled;
    }

    pub fn set_loop_count(&mut self, count: LoopCount) {
        self.loops_remaining = count;
    }

    pub fn playback_rate(&self) -> f64 {
        self.playback_rate
    }

    pub fn is_shuffled(&self) -> bool {
        self.shuffle
    }

    pub fn current_time(&self, now: Seconds) -> Seconds {
        match self.state {
            PlaybackState::Playing => (now - self.absolute_start_time) * self.playback_rate,
            _ => self.paused_time,
        }
    }

    pub fn handle_command(
        &mut self,
        command: SequencerCommand,
        now: Seconds,
        processor: &mut SynthProcessor,
    ) {
        match command {
            SequencerCommand::LoadNewSongList { songs, auto_play } => {
                self.load_new_song_list(songs, auto_play, now, processor)
            }
            SequencerCommand::Pause => self.pause(now, processor),
            SequencerCommand::Play => self.play(now, processor),
            SequencerCommand::SetTime(time) => self.set_time(time, now, processor),
            SequencerCommand::SetExternalMidiPlayback(enabled) => {
                if enabled && !self.external_midi_playback {
                    processor.stop_all(false);
                }
                self.external_midi_playback = enabled;
            }
            SequencerCommand::SetPlaybackRate(rate) => self.set_playback_rate(rate, now),
            SequencerCommand::SetLoop(enabled) => self.set_loop(enabled),
            SequencerCommand::SetLoopCount(count) => self.set_loop_count(count),
            SequencerCommand::ChangeSong(change) => self.change_song(change, now, processor),
            SequencerCommand::GetMidi => self
                .outbox
                .sequencer_response(self.id, Response::MidiData(self.current_song().cloned())),
            SequencerCommand::SetSkipToFirstNoteOn(skip) => self.skip_to_first_note_on = skip,
            SequencerCommand::SetPreservePlaybackState(preserve) => {
                self.preserve_playback_state = preserve
            }
        }
    }

    /// Replaces the song list. Songs that fail to parse are reported and
    /// skipped; if none survive the sequencer stays empty.
    pub fn load_new_song_list(
        &mut self,
        sources: Vec<SongSource>,
        auto_play: bool,
        now: Seconds,
        processor: &mut SynthProcessor,
    ) {
        if self.state == PlaybackState::Playing {
            processor.stop_all(false);
        }
        self.state = PlaybackState::Empty;
        self.cursor = None;
        self.paused_time = 0.0;
        self.position = 0;

        let mut songs = Vec::with_capacity(sources.len());
        for (index, source) in sources.into_iter().enumerate() {
            match source.into_parsed() {
                Ok(song) => songs.push(song),
                Err(err) => {
                    log::warn!(target: "sequencer", "song {index} could not be loaded: {err}");
                    let message = format!("song {index}: {err}");
                    self.outbox.sequencer(self.id, SequencerEvent::MidiError(message));
                }
            }
        }
        self.songs = songs;
        self.order = (0..self.songs.len()).collect();
        if self.shuffle {
            self.rng.shuffle(&mut self.order);
        }
        let list = self.songs.iter().map(ParsedSong::metadata).collect();
        self.outbox.sequencer(self.id, SequencerEvent::SongListChange(list));

        if self.songs.is_empty() {
            log::info!(target: "sequencer", "sequencer {} has no playable songs", self.id);
            return;
        }
        self.load_current_song(auto_play, now, processor);
    }

    fn start_tick(&self, song: &ParsedSong) -> Tick {
        if self.skip_to_first_note_on {
            song.first_note_on
        } else {
            0
        }
    }

    fn load_current_song(&mut self, auto_play: bool, now: Seconds, processor: &mut SynthProcessor) {
        let Some(index) = self.song_index() else {
            return;
        };
        let song = &self.songs[index];
        processor.stop_all(false);
        processor.ensure_channels(song.required_channels());

        let cursor = SongCursor::new(song);
        let start_tick = self.start_tick(song);
        let start_time = cursor.tempo.tick_to_seconds(start_tick);
        log::info!(
            target: "sequencer",
            "sequencer {} loading song {index} {:?} ({:.2}s)",
            self.id,
            song.name,
            song.duration
        );
        self.outbox.sequencer(
            self.id,
            SequencerEvent::SongChange {
                metadata: song.metadata(),
                song_index: index,
                start_time,
                auto_play,
            },
        );
        self.cursor = Some(cursor);
        self.state = PlaybackState::Paused;
        self.paused_time = start_time;
        self.set_time_ticks(start_tick, now, processor);
        if auto_play {
            self.play(now, processor);
        }
    }

    pub fn play(&mut self, now: Seconds, processor: &mut SynthProcessor) {
        match self.state {
            PlaybackState::Empty => {
                log::debug!(target: "sequencer", "play ignored, no song loaded");
                return;
            }
            PlaybackState::Playing => return,
            PlaybackState::Finished => {
                self.state = PlaybackState::Paused;
                let Some(start_tick) = self.current_song().map(|song| self.start_tick(song)) else {
                    return;
                };
                self.set_time_ticks(start_tick, now, processor);
            }
            PlaybackState::Paused => {}
        }
        self.absolute_start_time = now - self.paused_time / self.playback_rate;
        self.state = PlaybackState::Playing;
        self.outbox.sequencer(
            self.id,
            SequencerEvent::PlaybackStateChange {
                paused: false,
                time: self.paused_time,
            },
        );
    }

    pub fn pause(&mut self, now: Seconds, processor: &mut SynthProcessor) {
        if self.state != PlaybackState::Playing {
            return;
        }
        self.paused_time = self.current_time(now);
        self.state = PlaybackState::Paused;
        processor.stop_all(false);
        self.outbox.sequencer(
            self.id,
            SequencerEvent::PlaybackStateChange {
                paused: true,
                time: self.paused_time,
            },
        );
    }

    /// Seeks in seconds, clamped to the song. A seek to zero lands on the
    /// first note-on when skipping is enabled.
    pub fn set_time(&mut self, time: Seconds, now: Seconds, processor: &mut SynthProcessor) {
        if !time.is_finite() {
            log::warn!(target: "sequencer", "ignoring seek to {time}");
            return;
        }
        let Some(cursor) = self.cursor.as_ref() else {
            log::debug!(target: "sequencer", "seek ignored, no song loaded");
            return;
        };
        let Some(song) = self.current_song() else {
            return;
        };
        let time = time.clamp(0.0, song.duration);
        let tick = if time == 0.0 && self.skip_to_first_note_on {
            song.first_note_on
        } else {
            cursor.tempo.seconds_to_tick(time)
        };
        self.set_time_ticks(tick, now, processor);
    }

    /// Moves playback to `tick`: silences voices, resets controllers and
    /// replays every non-note event before the target.
    pub fn set_time_ticks(&mut self, tick: Tick, now: Seconds, processor: &mut SynthProcessor) {
        let Some(index) = self.song_index() else {
            return;
        };
        let Some(cursor) = self.cursor.as_mut() else {
            return;
        };
        let song = &self.songs[index];
        processor.stop_all(false);
        processor.reset_controllers(ChannelTarget::All);
        cursor.rewind();

        let sink = EventSink {
            outbox: &self.outbox,
            id: self.id,
            external: self.external_midi_playback,
        };
        while let Some((track_index, event_tick)) = cursor.peek(song) {
            if event_tick >= tick {
                break;
            }
            let track = &song.tracks[track_index];
            let event = &track.events[cursor.positions[track_index]];
            cursor.positions[track_index] += 1;
            sink.apply(track_index, track, &event.event, processor, true);
        }

        let time = cursor.tempo.tick_to_seconds(tick);
        let was_finished = self.state == PlaybackState::Finished;
        match self.state {
            PlaybackState::Playing => self.absolute_start_time = now - time / self.playback_rate,
            PlaybackState::Finished => {
                self.state = PlaybackState::Paused;
                self.paused_time = time;
            }
            _ => self.paused_time = time,
        }
        self.outbox.sequencer(self.id, SequencerEvent::TimeChange { time });
        if was_finished {
            self.outbox.sequencer(
                self.id,
                SequencerEvent::PlaybackStateChange { paused: true, time },
            );
        }
    }

    pub fn set_playback_rate(&mut self, rate: f64, now: Seconds) {
        if !(rate.is_finite() && rate > 0.0) {
            log::warn!(target: "sequencer", "ignoring playback rate {rate}");
            return;
        }
        let time = self.current_time(now);
        self.playback_rate = rate;
        if self.state == PlaybackState::Playing {
            self.absolute_start_time = now - time / rate;
        }
    }

    pub fn change_song(
        &mut self,
        change: SongChange,
        now: Seconds,
        processor: &mut SynthProcessor,
    ) {
        let len = self.songs.len();
        if len == 0 {
            log::debug!(target: "sequencer", "song change ignored, list is empty");
            return;
        }
        match change {
            SongChange::Index(index) => {
                let Some(position) = self.order.iter().position(|&song| song == index) else {
                    log::warn!(
                        target: "sequencer",
                        "song index {index} out of range ({len} songs)"
                    );
                    return;
                };
                self.position = position;
            }
            SongChange::Next => self.position = (self.position + 1) % len,
            SongChange::Previous => self.position = (self.position + len - 1) % len,
            SongChange::ShuffleOn => {
                self.shuffle = true;
                self.shuffle_after_current();
                return;
            }
            SongChange::ShuffleOff => {
                self.shuffle = false;
                self.position = self.song_index().unwrap_or(0);
                self.order = (0..len).collect();
                return;
            }
        }
        let auto_play = if self.preserve_playback_state {
            self.state == PlaybackState::Playing
        } else {
            true
        };
        self.load_current_song(auto_play, now, processor);
    }

    /// Keeps the current song in place and randomizes the songs after it.
    fn shuffle_after_current(&mut self) {
        let Some(current) = self.song_index() else {
            return;
        };
        let mut rest: Vec<usize> = (0..self.songs.len()).filter(|&song| song != current).collect();
        self.rng.shuffle(&mut rest);
        self.order = std::iter::once(current).chain(rest).collect();
        self.position = 0;
    }

    /// Advances playback to the current virtual time. Called once per quantum.
    pub fn process_tick(&mut self, now: Seconds, processor: &mut SynthProcessor) {
        if self.state != PlaybackState::Playing {
            return;
        }
        let Some(index) = self.song_index() else {
            return;
        };
        let current = self.current_time(now);
        loop {
            let song = &self.songs[index];
            let Some(cursor) = self.cursor.as_mut() else {
                return;
            };
            let next = cursor.peek(song);

            let loop_points = song.loop_points;
            let can_loop = self.loop_enabled && self.loops_remaining.can_loop();
            if can_loop && loop_points.end > loop_points.start {
                let at_loop_end = next.map_or(true, |(_, tick)| tick >= loop_points.end);
                if at_loop_end && current >= cursor.tempo.tick_to_seconds(loop_points.end) {
                    self.loops_remaining = self.loops_remaining.decrement();
                    if let LoopCount::Finite(_) = self.loops_remaining {
                        let event = SequencerEvent::LoopCountChange(self.loops_remaining);
                        self.outbox.sequencer(self.id, event);
                    }
                    log::debug!(
                        target: "sequencer",
                        "sequencer {} looping to tick {}, {:?} left",
                        self.id,
                        loop_points.start,
                        self.loops_remaining
                    );
                    self.set_time_ticks(loop_points.start, now, processor);
                    return;
                }
            }

            let next = next.filter(|&(_, tick)| tick <= song.last_voice_event);
            let Some((track_index, tick)) = next else {
                if current >= song.duration {
                    self.finish_song(now, processor);
                }
                return;
            };
            if cursor.tempo.tick_to_seconds(tick) > current {
                return;
            }
            let track = &song.tracks[track_index];
            let event = &track.events[cursor.positions[track_index]];
            cursor.positions[track_index] += 1;
            EventSink {
                outbox: &self.outbox,
                id: self.id,
                external: self.external_midi_playback,
            }
            .apply(track_index, track, &event.event, processor, false);
        }
    }

    fn finish_song(&mut self, now: Seconds, processor: &mut SynthProcessor) {
        let Some(song) = self.current_song() else {
            return;
        };
        let time = song.duration;
        processor.stop_all(false);
        self.outbox.sequencer(self.id, SequencerEvent::SongEnded { time });
        if self.songs.len() > 1 {
            self.position = (self.position + 1) % self.order.len();
            self.load_current_song(true, now, processor);
        } else {
            log::debug!(target: "sequencer", "sequencer {} finished", self.id);
            self.state = PlaybackState::Finished;
            self.paused_time = time;
        }
    }
}
