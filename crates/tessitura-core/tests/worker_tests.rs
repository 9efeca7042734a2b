mod common;

use common::{test_config, FakeEngine};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tessitura_core::{
    playback_queue, spawn_worker, AudioClock, RefillRequest, SynthHandle, SynthRemoteCore,
    WorkerConfig,
};
use tessitura_ports::clock::ManualClock;
use tessitura_ports::render::BusLayout;

fn small_queue(capacity: usize, threshold: usize) -> WorkerConfig {
    WorkerConfig {
        queue_quanta: capacity,
        refill_threshold: threshold,
        ..WorkerConfig::default()
    }
}

fn filled(layout: BusLayout, value: f32) -> Box<[f32]> {
    vec![value; layout.buffer_len()].into_boxed_slice()
}

#[test]
fn empty_queue_plays_silence_and_counts_underrun() {
    let layout = BusLayout::new(64);
    let (writer, mut node) = playback_queue(layout, &small_queue(4, 2));
    let mut out = vec![1.0; layout.buffer_len()];

    assert!(!node.pop_quantum(&mut out));
    assert!(out.iter().all(|sample| *sample == 0.0));
    assert_eq!(node.stats().underruns(), 1);
    assert_eq!(writer.wait_request(Duration::from_millis(1)), RefillRequest::Requested);
}

#[test]
fn full_queue_rejects_pushes_and_buffers_are_reused() {
    let layout = BusLayout::new(64);
    let (mut writer, mut node) = playback_queue(layout, &small_queue(2, 1));

    let first = filled(layout, 0.5);
    let first_ptr = first.as_ptr();
    assert!(writer.push(first));
    assert!(writer.push(filled(layout, 0.5)));
    assert_eq!(writer.free_slots(), 0);
    assert!(!writer.push(filled(layout, 0.5)));
    assert_eq!(writer.stats().rendered(), 2);

    let mut out = vec![0.0; layout.buffer_len()];
    assert!(node.pop_quantum(&mut out));
    assert!(out.iter().all(|sample| *sample == 0.5));
    assert_eq!(writer.take_buffer().as_ptr(), first_ptr);
    assert_eq!(node.stats().consumed(), 1);
}

#[test]
fn refill_is_requested_below_threshold() {
    let layout = BusLayout::new(32);
    let (mut writer, mut node) = playback_queue(layout, &small_queue(4, 2));
    for _ in 0..4 {
        assert!(writer.push(filled(layout, 0.1)));
    }
    let mut out = vec![0.0; layout.buffer_len()];

    assert!(node.pop_quantum(&mut out));
    assert!(node.pop_quantum(&mut out));
    assert_eq!(writer.wait_request(Duration::from_millis(1)), RefillRequest::Idle);

    assert!(node.pop_quantum(&mut out));
    assert_eq!(node.queued(), 1);
    assert_eq!(writer.wait_request(Duration::from_millis(1)), RefillRequest::Requested);
}

#[test]
fn dropped_node_closes_the_request_channel() {
    let layout = BusLayout::new(32);
    let (writer, node) = playback_queue(layout, &small_queue(4, 2));
    drop(node);
    assert!(writer.is_abandoned());
    assert_eq!(writer.wait_request(Duration::from_millis(1)), RefillRequest::Closed);
}

#[test]
fn stereo_render_spans_quanta() {
    let layout = BusLayout::new(16);
    let (mut writer, mut node) = playback_queue(layout, &small_queue(4, 1));
    let mut first = filled(layout, 0.0);
    first[layout.left_offset(layout.dry_bus(0))] = 0.75;
    assert!(writer.push(first));
    assert!(writer.push(filled(layout, 0.0)));

    let mut left = vec![1.0; 40];
    let mut right = vec![1.0; 40];
    node.render(&mut left, &mut right);
    assert_eq!(left[0], 0.75);
    assert!(left[1..32].iter().all(|sample| *sample == 0.0));
    assert!(left[32..].iter().all(|sample| *sample == 0.0));
    assert_eq!(node.stats().consumed(), 2);
    assert_eq!(node.stats().underruns(), 1);
}

#[test]
fn worker_renders_until_destroyed() {
    let config = test_config();
    let (engine, _calls) = FakeEngine::new(config.sample_rate_hz);
    let (handle_link, remote_link) = tessitura_core::connect();
    let clock = Arc::new(AudioClock::new(config.sample_rate_hz));
    let core = SynthRemoteCore::new(Box::new(engine), remote_link, clock.clone(), &config);
    let wall = Arc::new(ManualClock::new(0.0));
    let mut handle = SynthHandle::new(handle_link, clock.clone(), wall, &config);

    let (worker, mut node) = spawn_worker(core, WorkerConfig::default()).expect("worker spawned");
    let mut left = vec![0.0; 256];
    let mut right = vec![0.0; 256];
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        node.render(&mut left, &mut right);
        handle.poll().expect("handle poll");
        if handle.is_ready() && left.iter().any(|sample| *sample != 0.0) {
            break;
        }
        assert!(Instant::now() < deadline, "worker produced no audio");
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(worker.stats().rendered() > 0);
    assert!(clock.get() > 0);

    handle.destroy();
    worker.join().expect("worker exits cleanly");
}
