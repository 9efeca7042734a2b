use crate::model::{KeyRange, LoopPoints, ParsedSong, SongEvent, SongTrack, TextKind, TimedEvent};
use crate::tempo::{TempoMap, TempoPoint, DEFAULT_US_PER_QUARTER};
use midly::{Fps, MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use std::collections::BTreeMap;
use std::path::Path;
use tessitura_ports::midi::{ChannelMessage, SYSTEM_EXCLUSIVE};
use tessitura_ports::types::{Tick, CHANNELS_PER_PORT};

const CC_LOOP_START_RPG: u8 = 111;
const CC_LOOP_START_EMIDI: u8 = 116;
const CC_LOOP_END_EMIDI: u8 = 117;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SongLoadError {
    #[error("io error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("song contains no voice events")]
    Empty,
}

pub fn import_midi_path(path: &Path) -> Result<ParsedSong, SongLoadError> {
    let data = std::fs::read(path).map_err(|e| SongLoadError::Io(e.to_string()))?;
    let name = path.file_name().and_then(|s| s.to_str());
    import_midi_bytes(&data, name)
}

pub fn import_midi_bytes(
    data: &[u8],
    file_name: Option<&str>,
) -> Result<ParsedSong, SongLoadError> {
    let smf = Smf::parse(data).map_err(|e| SongLoadError::Parse(e.to_string()))?;
    let (ppq, tempo_override) = match smf.header.timing {
        Timing::Metrical(ticks) => (ticks.as_int().max(1), None),
        Timing::Timecode(fps, ticks_per_frame) => {
            let (ppq, us_per_quarter) = timecode_ppq_and_tempo(fps, ticks_per_frame);
            (ppq, Some(us_per_quarter))
        }
    };

    let mut tempo_points: BTreeMap<Tick, u32> = BTreeMap::new();
    let mut tracks = Vec::with_capacity(smf.tracks.len());
    let mut copyright: Vec<String> = Vec::new();
    let mut loop_start: Option<Tick> = None;
    let mut loop_end: Option<Tick> = None;
    let mut first_note_on: Option<Tick> = None;
    let mut last_voice_event: Tick = 0;
    let mut has_voice_events = false;
    let mut key_range: Option<KeyRange> = None;

    for track in &smf.tracks {
        let mut tick: Tick = 0;
        let mut name: Option<String> = None;
        let mut port: Option<usize> = None;
        let mut events = Vec::with_capacity(track.len());

        for event in track {
            tick += event.delta.as_int() as Tick;
            let converted = match event.kind {
                TrackEventKind::Midi { channel, message } => {
                    let message = convert_message(message);
                    match message {
                        ChannelMessage::NoteOn { note, .. } => {
                            first_note_on = Some(first_note_on.map_or(tick, |t| t.min(tick)));
                            key_range = Some(match key_range {
                                Some(range) => KeyRange {
                                    min: range.min.min(note),
                                    max: range.max.max(note),
                                },
                                None => KeyRange { min: note, max: note },
                            });
                        }
                        ChannelMessage::ControllerChange { controller, .. } => match controller {
                            CC_LOOP_START_RPG | CC_LOOP_START_EMIDI => {
                                loop_start.get_or_insert(tick);
                            }
                            CC_LOOP_END_EMIDI => {
                                loop_end.get_or_insert(tick);
                            }
                            _ => {}
                        },
                        _ => {}
                    }
                    has_voice_events = true;
                    last_voice_event = last_voice_event.max(tick);
                    Some(SongEvent::Channel {
                        channel: channel.as_int(),
                        message,
                    })
                }
                TrackEventKind::SysEx(data) => {
                    let mut bytes = Vec::with_capacity(data.len() + 1);
                    bytes.push(SYSTEM_EXCLUSIVE);
                    bytes.extend_from_slice(data);
                    Some(SongEvent::SystemExclusive(bytes))
                }
                TrackEventKind::Escape(_) => None,
                TrackEventKind::Meta(meta) => match meta {
                    MetaMessage::Tempo(us_per_quarter) => {
                        tempo_points.insert(tick, us_per_quarter.as_int());
                        Some(SongEvent::Tempo(us_per_quarter.as_int()))
                    }
                    MetaMessage::MidiPort(value) => {
                        port.get_or_insert(value.as_int() as usize);
                        None
                    }
                    MetaMessage::EndOfTrack => Some(SongEvent::EndOfTrack),
                    MetaMessage::TimeSignature(num, den, clocks, notated) => Some(SongEvent::Meta {
                        meta_type: 0x58,
                        data: vec![num, den, clocks, notated],
                    }),
                    MetaMessage::KeySignature(sharps, minor) => Some(SongEvent::Meta {
                        meta_type: 0x59,
                        data: vec![sharps as u8, minor as u8],
                    }),
                    other => text_event(other).map(|(kind, data)| {
                        match kind {
                            TextKind::TrackName if name.is_none() => {
                                name = Some(decode_text(data));
                            }
                            TextKind::Copyright => copyright.push(decode_text(data)),
                            TextKind::Marker => {
                                let marker = decode_text(data).trim().to_ascii_lowercase();
                                match marker.as_str() {
                                    "loopstart" => {
                                        loop_start.get_or_insert(tick);
                                    }
                                    "loopend" => {
                                        loop_end.get_or_insert(tick);
                                    }
                                    _ => {}
                                }
                            }
                            _ => {}
                        }
                        SongEvent::Text {
                            kind,
                            data: data.to_vec(),
                        }
                    }),
                },
            };
            if let Some(event) = converted {
                events.push(TimedEvent { tick, event });
            }
        }

        tracks.push(SongTrack {
            name,
            channel_offset: port.unwrap_or(0) * CHANNELS_PER_PORT,
            events,
        });
    }

    if !has_voice_events {
        return Err(SongLoadError::Empty);
    }

    let first_note_on = first_note_on.unwrap_or(0);
    let tempo_points = build_tempo_map(tempo_points, tempo_override);
    let tempo = TempoMap::new(ppq, &tempo_points);
    let loop_points = LoopPoints {
        start: loop_start.unwrap_or(first_note_on),
        end: loop_end
            .filter(|end| *end > 0)
            .unwrap_or(last_voice_event),
    };

    let name = tracks
        .first()
        .and_then(|track| track.name.clone())
        .filter(|name| !name.trim().is_empty())
        .or_else(|| file_name.map(strip_extension))
        .unwrap_or_default();

    Ok(ParsedSong {
        name,
        file_name: file_name.map(str::to_string),
        copyright: if copyright.is_empty() {
            None
        } else {
            Some(copyright.join("\n"))
        },
        ppq,
        duration: tempo.tick_to_seconds(last_voice_event),
        tempo_points,
        tracks,
        loop_points,
        first_note_on,
        last_voice_event,
        key_range,
    })
}

fn convert_message(message: MidiMessage) -> ChannelMessage {
    match message {
        MidiMessage::NoteOn { key, vel } if vel.as_int() == 0 => ChannelMessage::NoteOff {
            note: key.as_int(),
            velocity: 64,
        },
        MidiMessage::NoteOn { key, vel } => ChannelMessage::NoteOn {
            note: key.as_int(),
            velocity: vel.as_int(),
        },
        MidiMessage::NoteOff { key, vel } => ChannelMessage::NoteOff {
            note: key.as_int(),
            velocity: vel.as_int(),
        },
        MidiMessage::Aftertouch { key, vel } => ChannelMessage::PolyPressure {
            note: key.as_int(),
            pressure: vel.as_int(),
        },
        MidiMessage::Controller { controller, value } => ChannelMessage::ControllerChange {
            controller: controller.as_int(),
            value: value.as_int(),
        },
        MidiMessage::ProgramChange { program } => ChannelMessage::ProgramChange {
            program: program.as_int(),
        },
        MidiMessage::ChannelAftertouch { vel } => ChannelMessage::ChannelPressure {
            pressure: vel.as_int(),
        },
        MidiMessage::PitchBend { bend } => ChannelMessage::PitchWheel {
            value: bend.0.as_int(),
        },
    }
}

fn text_event<'a>(meta: MetaMessage<'a>) -> Option<(TextKind, &'a [u8])> {
    match meta {
        MetaMessage::Text(data) => Some((TextKind::Text, data)),
        MetaMessage::Copyright(data) => Some((TextKind::Copyright, data)),
        MetaMessage::TrackName(data) => Some((TextKind::TrackName, data)),
        MetaMessage::InstrumentName(data) => Some((TextKind::InstrumentName, data)),
        MetaMessage::Lyric(data) => Some((TextKind::Lyric, data)),
        MetaMessage::Marker(data) => Some((TextKind::Marker, data)),
        MetaMessage::CuePoint(data) => Some((TextKind::CuePoint, data)),
        _ => None,
    }
}

fn decode_text(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}

fn strip_extension(file_name: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => file_name.to_string(),
    }
}

fn build_tempo_map(
    tempo_points: BTreeMap<Tick, u32>,
    override_us_per_quarter: Option<u32>,
) -> Vec<TempoPoint> {
    if let Some(us_per_quarter) = override_us_per_quarter {
        return vec![TempoPoint {
            tick: 0,
            us_per_quarter,
        }];
    }

    let mut map: Vec<TempoPoint> = tempo_points
        .into_iter()
        .map(|(tick, us_per_quarter)| TempoPoint {
            tick,
            us_per_quarter,
        })
        .collect();

    if map.is_empty() || map[0].tick != 0 {
        map.insert(
            0,
            TempoPoint {
                tick: 0,
                us_per_quarter: DEFAULT_US_PER_QUARTER,
            },
        );
    }
    map
}

fn timecode_ppq_and_tempo(fps: Fps, ticks_per_frame: u8) -> (u16, u32) {
    let ticks_per_frame = ticks_per_frame.max(1) as u16;
    match fps {
        Fps::Fps24 => (24 * ticks_per_frame, 1_000_000),
        Fps::Fps25 => (25 * ticks_per_frame, 1_000_000),
        Fps::Fps30 => (30 * ticks_per_frame, 1_000_000),
        Fps::Fps29 => (30 * ticks_per_frame, 1_001_000),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_extension_keeps_dotfiles() {
        assert_eq!(strip_extension("song.mid"), "song");
        assert_eq!(strip_extension(".mid"), ".mid");
        assert_eq!(strip_extension("plain"), "plain");
    }
}
