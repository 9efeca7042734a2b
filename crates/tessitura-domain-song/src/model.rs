use crate::midi_import::{import_midi_bytes, SongLoadError};
use crate::tempo::{TempoMap, TempoPoint};
use serde::{Deserialize, Serialize};
use tessitura_ports::midi::ChannelMessage;
use tessitura_ports::types::{Seconds, Tick};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextKind {
    Text,
    Copyright,
    TrackName,
    InstrumentName,
    Lyric,
    Marker,
    CuePoint,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SongEvent {
    /// `channel` is relative to the owning track's port.
    Channel { channel: u8, message: ChannelMessage },
    /// Full SysEx including the leading 0xF0.
    SystemExclusive(Vec<u8>),
    Tempo(u32),
    Text { kind: TextKind, data: Vec<u8> },
    Meta { meta_type: u8, data: Vec<u8> },
    EndOfTrack,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedEvent {
    pub tick: Tick,
    pub event: SongEvent,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SongTrack {
    pub name: Option<String>,
    /// First absolute channel of this track's MIDI port (port * 16).
    pub channel_offset: usize,
    pub events: Vec<TimedEvent>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopPoints {
    pub start: Tick,
    pub end: Tick,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRange {
    pub min: u8,
    pub max: u8,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParsedSong {
    pub name: String,
    pub file_name: Option<String>,
    pub copyright: Option<String>,
    pub ppq: u16,
    pub tempo_points: Vec<TempoPoint>,
    pub tracks: Vec<SongTrack>,
    pub loop_points: LoopPoints,
    pub first_note_on: Tick,
    pub last_voice_event: Tick,
    pub key_range: Option<KeyRange>,
    pub duration: Seconds,
}

impl ParsedSong {
    pub fn tempo_map(&self) -> TempoMap {
        TempoMap::new(self.ppq, &self.tempo_points)
    }

    pub fn first_note_on_seconds(&self) -> Seconds {
        self.tempo_map().tick_to_seconds(self.first_note_on)
    }

    /// Highest absolute channel addressed by any track, plus one.
    pub fn required_channels(&self) -> usize {
        self.tracks
            .iter()
            .filter_map(|track| {
                track
                    .events
                    .iter()
                    .filter_map(|event| match event.event {
                        SongEvent::Channel { channel, .. } => Some(channel as usize),
                        _ => None,
                    })
                    .max()
                    .map(|channel| track.channel_offset + channel + 1)
            })
            .max()
            .unwrap_or(0)
    }

    pub fn metadata(&self) -> SongMetadata {
        let tempo = self.tempo_map();
        let mut channel_offsets: Vec<usize> =
            self.tracks.iter().map(|track| track.channel_offset).collect();
        channel_offsets.sort_unstable();
        channel_offsets.dedup();
        SongMetadata {
            name: self.name.clone(),
            file_name: self.file_name.clone(),
            copyright: self.copyright.clone(),
            duration: self.duration,
            ppq: self.ppq,
            track_count: self.tracks.len(),
            first_note_on: tempo.tick_to_seconds(self.first_note_on),
            loop_points: self.loop_points,
            loop_seconds: (
                tempo.tick_to_seconds(self.loop_points.start),
                tempo.tick_to_seconds(self.loop_points.end),
            ),
            key_range: self.key_range,
            channel_offsets,
            tempo_changes: self.tempo_points.clone(),
        }
    }
}

/// Main-thread mirror of a parsed song: only scalar metadata, never events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SongMetadata {
    pub name: String,
    pub file_name: Option<String>,
    pub copyright: Option<String>,
    pub duration: Seconds,
    pub ppq: u16,
    pub track_count: usize,
    pub first_note_on: Seconds,
    pub loop_points: LoopPoints,
    pub loop_seconds: (Seconds, Seconds),
    pub key_range: Option<KeyRange>,
    pub channel_offsets: Vec<usize>,
    pub tempo_changes: Vec<TempoPoint>,
}

/// Song list entry as supplied by the caller.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum SongSource {
    Binary { data: Vec<u8>, name: Option<String> },
    Parsed(ParsedSong),
}

impl SongSource {
    pub fn binary(data: Vec<u8>) -> Self {
        SongSource::Binary { data, name: None }
    }

    pub fn named(data: Vec<u8>, name: impl Into<String>) -> Self {
        SongSource::Binary {
            data,
            name: Some(name.into()),
        }
    }

    pub fn into_parsed(self) -> Result<ParsedSong, SongLoadError> {
        match self {
            SongSource::Binary { data, name } => import_midi_bytes(&data, name.as_deref()),
            SongSource::Parsed(song) => Ok(song),
        }
    }
}
