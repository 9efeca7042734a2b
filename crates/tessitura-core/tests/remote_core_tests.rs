mod common;

use common::{bank_bytes, note_ons, song_bytes, EngineCall, Rig, QUANTUM, SAMPLE_RATE};
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tessitura_core::{
    CorrelationPolicy, MessageOptions, MessageTiming, RemoteError, RenderOptions, SoundBankOpStatus,
    SynthConfig, SynthEvent, SynthEventKind,
};
use tessitura_domain_song::SongSource;
use tessitura_ports::synth::{KeyModifier, MasterParameter};
use tessitura_ports::types::{ChannelTarget, Volume01};

#[test]
fn handle_becomes_ready_after_first_quantum() {
    let mut rig = Rig::new();
    let ready = rig.handle.when_ready();
    assert!(!rig.handle.is_ready());
    assert_eq!(ready.try_take(), Ok(None));

    rig.step().unwrap();
    assert!(rig.handle.is_ready());
    assert_eq!(ready.try_take(), Ok(Some(())));
    assert_eq!(rig.handle.channels_amount(), 16);
    assert!(rig.handle.channel_properties()[9].is_drum);
}

#[test]
fn deleting_the_only_sound_bank_is_rejected() {
    let mut rig = Rig::new();
    let added = rig.handle.add_sound_bank(bank_bytes("main"), "main", 0);
    let deleted = rig.handle.delete_sound_bank("main");
    rig.step().unwrap();

    assert_eq!(added.try_take(), Ok(Some(SoundBankOpStatus::Applied { presets: 2 })));
    match deleted.try_take() {
        Ok(Some(SoundBankOpStatus::Rejected(_))) => {}
        other => panic!("expected rejection, got {other:?}"),
    }
    let installs: Vec<EngineCall> = rig
        .calls
        .lock()
        .unwrap()
        .iter()
        .filter(|call| matches!(call, EngineCall::SoundBanks(_)))
        .cloned()
        .collect();
    assert_eq!(installs, vec![EngineCall::SoundBanks(vec!["main".to_string()])]);
    assert_eq!(rig.handle.presets().len(), 2);
}

#[test]
fn duplicate_sound_bank_id_only_changes_offset() {
    let mut rig = Rig::new();
    rig.install_bank("main");
    let pending = rig.handle.add_sound_bank(b"not a bank".to_vec(), "main", 4);
    rig.step().unwrap();

    assert_eq!(pending.try_take(), Ok(Some(SoundBankOpStatus::Applied { presets: 2 })));
    assert!(rig.handle.presets().iter().any(|preset| preset.bank == 4));
    assert!(rig.handle.presets().iter().any(|preset| preset.bank == 128));
}

#[test]
fn second_bank_can_be_deleted_and_banks_rearranged() {
    let mut rig = Rig::new();
    rig.install_bank("main");
    rig.install_bank("extra");
    let rearranged = rig
        .handle
        .rearrange_sound_banks(vec!["main".to_string()]);
    let deleted = rig.handle.delete_sound_bank("extra");
    rig.step().unwrap();

    assert!(rearranged.try_take().unwrap().unwrap().is_applied());
    assert!(deleted.try_take().unwrap().unwrap().is_applied());
    let last_install = rig
        .calls
        .lock()
        .unwrap()
        .iter()
        .rev()
        .find(|call| matches!(call, EngineCall::SoundBanks(_)))
        .cloned();
    assert_eq!(last_install, Some(EngineCall::SoundBanks(vec!["main".to_string()])));
}

#[test]
fn undecodable_bank_raises_from_poll_without_listener() {
    let mut rig = Rig::new();
    let pending = rig.handle.add_sound_bank(b"garbage".to_vec(), "broken", 0);
    let result = rig.step();

    match result {
        Err(RemoteError::SoundBank(message)) => assert!(message.contains("broken")),
        other => panic!("expected sound bank error, got {other:?}"),
    }
    rig.handle.poll().unwrap();
    assert!(matches!(pending.try_take(), Ok(Some(SoundBankOpStatus::Failed(_)))));
}

#[test]
fn undecodable_bank_goes_to_listener_when_registered() {
    let mut rig = Rig::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    rig.handle
        .add_event_listener(SynthEventKind::SoundBankError, "errors", move |event| {
            if let SynthEvent::SoundBankError(message) = event {
                sink.lock().unwrap().push(message.clone());
            }
        });
    let _pending = rig.handle.add_sound_bank(b"garbage".to_vec(), "broken", 0);
    rig.step().unwrap();
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[test]
fn out_of_range_note_values_wrap_before_leaving_the_handle() {
    let mut rig = Rig::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    rig.handle
        .add_event_listener(SynthEventKind::NoteOn, "notes", move |event| {
            sink.lock().unwrap().push(event.clone());
        });

    rig.handle.note_on(0, 200, 300);
    rig.step().unwrap();

    assert_eq!(
        note_ons(&rig.calls),
        vec![EngineCall::NoteOn {
            channel: 0,
            note: 72,
            velocity: 44
        }]
    );
    assert_eq!(
        *seen.lock().unwrap(),
        vec![SynthEvent::NoteOn {
            channel: 0,
            note: 72,
            velocity: 44
        }]
    );
    assert_eq!(rig.handle.voices_amount(), 1);
}

#[test]
fn messages_for_missing_channels_are_ignored() {
    let mut rig = Rig::new();
    rig.handle.note_on(20, 60, 100);
    rig.handle.mute_channel(40, true);
    rig.handle.program_change(3, 10);
    rig.step().unwrap();

    let calls = rig.calls.lock().unwrap().clone();
    assert!(!calls.iter().any(|call| matches!(call, EngineCall::NoteOn { .. })));
    assert!(!calls.iter().any(|call| matches!(call, EngineCall::Muted { .. })));
    assert!(calls.contains(&EngineCall::Program {
        channel: 3,
        program: 10
    }));
}

#[test]
fn locked_controller_ignores_unforced_changes() {
    let mut rig = Rig::new();
    rig.handle.lock_controller(ChannelTarget::Channel(0), 7, true);
    rig.handle.controller_change(0, 7, 10, false);
    rig.handle.controller_change(0, 7, 20, true);
    rig.handle.controller_change(1, 7, 30, false);
    rig.step().unwrap();

    let volume_changes: Vec<EngineCall> = rig
        .calls
        .lock()
        .unwrap()
        .iter()
        .filter(|call| matches!(call, EngineCall::Controller { controller: 7, .. }))
        .cloned()
        .collect();
    assert_eq!(
        volume_changes,
        vec![
            EngineCall::Controller {
                channel: 0,
                controller: 7,
                value: 20
            },
            EngineCall::Controller {
                channel: 1,
                controller: 7,
                value: 30
            },
        ]
    );
}

#[test]
fn key_modifier_overrides_velocity() {
    let mut rig = Rig::new();
    rig.handle.add_key_modifier(
        0,
        60,
        KeyModifier {
            velocity: Some(100),
            velocity_gain: 1.0,
        },
    );
    rig.handle.note_on(0, 60, 10);
    rig.handle.note_on(0, 61, 10);
    rig.handle.delete_key_modifier(0, 60);
    rig.handle.note_on(0, 60, 10);
    rig.step().unwrap();

    let velocities: Vec<u8> = note_ons(&rig.calls)
        .into_iter()
        .map(|call| match call {
            EngineCall::NoteOn { velocity, .. } => velocity,
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(velocities, vec![100, 10, 10]);
}

#[test]
fn timed_message_waits_for_the_audio_clock() {
    let mut rig = Rig::new();
    rig.handle.send_message(
        vec![0x90, 64, 100],
        0,
        MessageOptions {
            force: false,
            timing: MessageTiming::At(0.05),
        },
    );
    let quantum_seconds = QUANTUM as f64 / SAMPLE_RATE as f64;
    let mut applied_at = None;
    for _ in 0..20 {
        let before = rig.clock.get();
        rig.step().unwrap();
        if applied_at.is_none() && !note_ons(&rig.calls).is_empty() {
            applied_at = Some(before as f64 / SAMPLE_RATE as f64);
        }
    }
    let applied_at = applied_at.expect("timed note was never applied");
    assert!(applied_at >= 0.05 && applied_at < 0.05 + quantum_seconds);
}

#[test]
fn gs_display_sysex_updates_display_text() {
    let mut rig = Rig::new();
    let mut sysex = vec![0xF0, 0x41, 0x10, 0x45, 0x12, 0x10, 0x00, 0x00];
    sysex.extend_from_slice(b"Hi");
    sysex.extend_from_slice(&[0x00, 0xF7]);
    rig.handle.system_exclusive(sysex, 0);
    rig.step().unwrap();
    assert_eq!(rig.handle.display_text(), Some("Hi"));
}

#[test]
fn master_parameter_changes_are_mirrored() {
    let mut rig = Rig::new();
    rig.handle
        .set_master_parameter(MasterParameter::Volume(Volume01::new(0.5)));
    rig.handle.transpose(2.0);
    rig.step().unwrap();
    let master = rig.handle.master_parameters();
    assert_eq!(master.volume, Volume01::new(0.5));
    assert_eq!(master.transposition, 2.0);
}

#[test]
fn snapshot_carries_locks_and_key_modifiers() {
    let mut rig = Rig::new();
    rig.handle.program_change(2, 33);
    rig.handle.lock_controller(ChannelTarget::Channel(2), 10, true);
    rig.handle.add_key_modifier(2, 40, KeyModifier::default());
    let pending = rig.handle.get_snapshot();
    rig.step().unwrap();

    let snapshot = pending.try_take().unwrap().expect("snapshot delivered");
    assert_eq!(snapshot.channels[2].program, 33);
    assert_eq!(snapshot.channels[2].locked_controllers, vec![10]);
    assert_eq!(snapshot.key_modifiers.len(), 1);
    assert_eq!(snapshot.key_modifiers[0].note, 40);
}

#[test]
fn latest_wins_policy_supersedes_earlier_request() {
    let mut rig = Rig::with_config(SynthConfig {
        correlation_policy: CorrelationPolicy::LatestWins,
        ..common::test_config()
    });
    let first = rig.handle.get_snapshot();
    let second = rig.handle.get_snapshot();
    rig.step().unwrap();
    assert_eq!(first.try_take(), Err(RemoteError::Superseded));
    assert!(second.try_take().unwrap().is_some());
}

#[test]
fn destroy_is_idempotent_and_silences_output() {
    let mut rig = Rig::new();
    rig.step().unwrap();
    assert!(rig.output().iter().any(|sample| *sample != 0.0));

    rig.handle.destroy();
    rig.handle.destroy();
    rig.handle.note_on(0, 60, 100);
    rig.step().unwrap();
    assert!(rig.core.is_destroyed());
    assert!(rig.output().iter().all(|sample| *sample == 0.0));

    rig.core.destroy();
    rig.step().unwrap();
    assert!(note_ons(&rig.calls).is_empty());
}

#[test]
fn offline_render_and_wav_export() {
    let mut rig = Rig::new();
    rig.install_bank("main");
    let progress = Arc::new(Mutex::new(Vec::new()));
    let sink = progress.clone();
    rig.handle
        .add_event_listener(SynthEventKind::RenderProgress, "progress", move |event| {
            if let SynthEvent::RenderProgress { progress } = event {
                sink.lock().unwrap().push(*progress);
            }
        });

    let pending = rig.handle.render_audio(
        SongSource::binary(song_bytes(1.0)),
        RenderOptions {
            sample_rate_hz: SAMPLE_RATE,
            tail_seconds: 0.5,
            ..RenderOptions::default()
        },
    );
    let deadline = Instant::now() + Duration::from_secs(10);
    let audio = loop {
        rig.step().unwrap();
        if let Some(result) = pending.try_take().unwrap() {
            break result.expect("render succeeded");
        }
        assert!(Instant::now() < deadline, "offline render timed out");
        std::thread::sleep(Duration::from_millis(1));
    };

    assert_eq!(audio.sample_rate_hz, SAMPLE_RATE);
    assert_eq!(audio.frames(), 72_000);
    assert!(audio.left.iter().any(|sample| *sample != 0.0));
    assert_eq!(rig.handle.render_progress(), 1.0);
    assert_eq!(progress.lock().unwrap().last().copied(), Some(1.0));

    let wav = rig.handle.write_wav(audio);
    rig.step().unwrap();
    let bytes = wav.try_take().unwrap().expect("wav delivered").expect("wav encoded");
    assert_eq!(&bytes[..4], b"RIFF");
    assert_eq!(&bytes[8..12], b"WAVE");
}
