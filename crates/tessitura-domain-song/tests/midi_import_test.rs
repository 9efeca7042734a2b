use midly::num::{u15, u24, u28, u4, u7};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use pretty_assertions::assert_eq;
use tessitura_domain_song::{import_midi_bytes, LoopPoints, SongEvent, SongLoadError, SongSource};
use tessitura_ports::midi::ChannelMessage;

fn write_smf(tracks: Vec<Vec<TrackEvent<'static>>>) -> Vec<u8> {
    let format = if tracks.len() > 1 {
        Format::Parallel
    } else {
        Format::SingleTrack
    };
    let smf = Smf {
        header: Header {
            format,
            timing: Timing::Metrical(u15::new(480)),
        },
        tracks,
    };
    let mut data = Vec::new();
    smf.write(&mut data).expect("midi write should succeed");
    data
}

fn ev(delta: u32, kind: TrackEventKind<'static>) -> TrackEvent<'static> {
    TrackEvent {
        delta: u28::new(delta),
        kind,
    }
}

fn note(channel: u8, key: u8, vel: u8) -> TrackEventKind<'static> {
    TrackEventKind::Midi {
        channel: u4::new(channel),
        message: MidiMessage::NoteOn {
            key: u7::new(key),
            vel: u7::new(vel),
        },
    }
}

fn end() -> TrackEvent<'static> {
    ev(0, TrackEventKind::Meta(MetaMessage::EndOfTrack))
}

#[test]
fn duration_follows_last_voice_event_and_tempo_changes() {
    let track = vec![
        ev(0, TrackEventKind::Meta(MetaMessage::Tempo(u24::new(500_000)))),
        ev(0, note(0, 60, 100)),
        ev(960, TrackEventKind::Meta(MetaMessage::Tempo(u24::new(1_000_000)))),
        ev(480, note(0, 60, 0)),
        // trailing meta events do not extend the song
        ev(4800, TrackEventKind::Meta(MetaMessage::Text(b"tail"))),
        end(),
    ];

    let song = import_midi_bytes(&write_smf(vec![track]), Some("tempo.mid")).unwrap();
    assert_eq!(song.last_voice_event, 1440);
    assert_eq!(song.duration, 2.0);
    assert_eq!(song.name, "tempo");
    assert_eq!(song.tempo_points.len(), 2);
    assert_eq!(
        song.loop_points,
        LoopPoints {
            start: 0,
            end: 1440
        }
    );
}

#[test]
fn loop_markers_and_track_name_are_detected() {
    let conductor = vec![
        ev(0, TrackEventKind::Meta(MetaMessage::TrackName(b"Overture"))),
        ev(0, TrackEventKind::Meta(MetaMessage::Copyright(b"(c) nobody"))),
        ev(480, TrackEventKind::Meta(MetaMessage::Marker(b"loopStart"))),
        ev(960, TrackEventKind::Meta(MetaMessage::Marker(b"LoopEnd"))),
        end(),
    ];
    let notes = vec![
        ev(240, note(1, 64, 90)),
        ev(1680, note(1, 64, 0)),
        end(),
    ];

    let song = import_midi_bytes(&write_smf(vec![conductor, notes]), None).unwrap();
    assert_eq!(song.name, "Overture");
    assert_eq!(song.copyright.as_deref(), Some("(c) nobody"));
    assert_eq!(song.first_note_on, 240);
    assert_eq!(
        song.loop_points,
        LoopPoints {
            start: 480,
            end: 1440
        }
    );
    let meta = song.metadata();
    assert_eq!(meta.track_count, 2);
    assert_eq!(meta.first_note_on, 0.25);
}

#[test]
fn midi_port_sets_track_channel_offset() {
    let track = vec![
        ev(0, TrackEventKind::Meta(MetaMessage::MidiPort(u7::new(1)))),
        ev(0, note(2, 60, 100)),
        ev(480, note(2, 60, 0)),
        end(),
    ];

    let song = import_midi_bytes(&write_smf(vec![track]), None).unwrap();
    assert_eq!(song.tracks[0].channel_offset, 16);
    assert_eq!(song.required_channels(), 19);
    assert_eq!(song.metadata().channel_offsets, vec![16]);
}

#[test]
fn zero_velocity_note_on_becomes_note_off() {
    let track = vec![ev(0, note(0, 60, 100)), ev(10, note(0, 60, 0)), end()];
    let song = import_midi_bytes(&write_smf(vec![track]), None).unwrap();
    assert!(matches!(
        song.tracks[0].events[1].event,
        SongEvent::Channel {
            channel: 0,
            message: ChannelMessage::NoteOff { note: 60, .. }
        }
    ));
}

#[test]
fn songs_without_voice_events_are_rejected() {
    let track = vec![
        ev(0, TrackEventKind::Meta(MetaMessage::Text(b"silence"))),
        end(),
    ];
    assert_eq!(
        import_midi_bytes(&write_smf(vec![track]), None).unwrap_err(),
        SongLoadError::Empty
    );
}

#[test]
fn garbage_is_a_parse_error() {
    let err = SongSource::binary(b"definitely not midi".to_vec())
        .into_parsed()
        .unwrap_err();
    assert!(matches!(err, SongLoadError::Parse(_)));
}
