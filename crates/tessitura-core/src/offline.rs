use crate::config::{RenderOptions, SequencerOptions};
use crate::envelope::RenderedAudio;
use crate::error::RemoteError;
use crate::link::Outbox;
use crate::processor::SynthProcessor;
use crate::sequencer_engine::{PlaybackState, SequencerEngine};
use std::io::Cursor;
use tessitura_domain_song::{ParsedSong, SongSource};
use tessitura_ports::render::BusLayout;
use tessitura_ports::synth::{SynthEngine, SynthSnapshot};
use tessitura_ports::types::LoopCount;

const OFFLINE_QUANTUM_FRAMES: usize = 128;

/// Seconds of audio an offline render of `song` produces, loops and tail included.
pub fn offline_length(song: &ParsedSong, options: &RenderOptions) -> f64 {
    let metadata = song.metadata();
    let (loop_start, loop_end) = metadata.loop_seconds;
    let loop_length = (loop_end - loop_start).max(0.0);
    song.duration + loop_length * options.loop_count as f64 + options.tail_seconds.max(0.0)
}

/// Plays `song` through `engine` as fast as possible and returns the stereo mix.
/// `progress` receives values in `0.0..=1.0`.
pub fn render_offline(
    engine: Box<dyn SynthEngine>,
    song: ParsedSong,
    snapshot: &SynthSnapshot,
    options: &RenderOptions,
    mut progress: impl FnMut(f32),
) -> RenderedAudio {
    let sample_rate_hz = engine.sample_rate_hz();
    let total_frames = (offline_length(&song, options) * sample_rate_hz as f64).ceil() as usize;
    log::info!(
        target: "remote",
        "offline render of {:?}: {total_frames} frames at {sample_rate_hz} Hz",
        song.name
    );

    let mut processor = SynthProcessor::new(engine, Outbox::detached(), false);
    processor.apply_snapshot(snapshot);
    let mut sequencer = SequencerEngine::new(
        0,
        SequencerOptions {
            skip_to_first_note_on: false,
            ..SequencerOptions::default()
        },
        Outbox::detached(),
    );
    sequencer.set_loop(options.loop_count > 0);
    sequencer.set_loop_count(LoopCount::Finite(options.loop_count));
    sequencer.load_new_song_list(vec![SongSource::Parsed(song)], true, 0.0, &mut processor);

    let layout = BusLayout::new(OFFLINE_QUANTUM_FRAMES);
    let mut buffer = vec![0.0; layout.buffer_len()];
    let mut mixed_l = vec![0.0; layout.quantum_frames];
    let mut mixed_r = vec![0.0; layout.quantum_frames];
    let mut left = Vec::with_capacity(total_frames);
    let mut right = Vec::with_capacity(total_frames);
    let interval = options.progress_interval_quanta.max(1);
    let mut quanta = 0usize;

    while left.len() < total_frames {
        let now = left.len() as f64 / sample_rate_hz as f64;
        if sequencer.state() == PlaybackState::Playing {
            sequencer.process_tick(now, &mut processor);
        }
        buffer.fill(0.0);
        processor.render(&layout, &mut buffer);
        layout.mix_down(&buffer, &mut mixed_l, &mut mixed_r);
        let count = layout.quantum_frames.min(total_frames - left.len());
        left.extend_from_slice(&mixed_l[..count]);
        right.extend_from_slice(&mixed_r[..count]);

        quanta += 1;
        if quanta % interval == 0 {
            progress(left.len() as f32 / total_frames.max(1) as f32);
        }
    }
    progress(1.0);

    RenderedAudio {
        sample_rate_hz,
        left,
        right,
    }
}

/// Encodes rendered audio as an interleaved stereo 32-bit float WAV file.
pub fn encode_wav(audio: &RenderedAudio) -> Result<Vec<u8>, RemoteError> {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: audio.sample_rate_hz,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| RemoteError::Render(e.to_string()))?;
        for frame in 0..audio.frames() {
            writer
                .write_sample(audio.left[frame])
                .map_err(|e| RemoteError::Render(e.to_string()))?;
            writer
                .write_sample(audio.right[frame])
                .map_err(|e| RemoteError::Render(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| RemoteError::Render(e.to_string()))?;
    }
    Ok(cursor.into_inner())
}
