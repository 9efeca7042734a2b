use crate::config::WorkerConfig;
use crate::error::RemoteError;
use crate::playback_buffer::{
    playback_queue, PlaybackNode, PlaybackStats, QueueWriter, RefillRequest,
};
use crate::remote::SynthRemoteCore;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// A remote core running on its own thread, feeding a `PlaybackNode`.
pub struct WorkerSynth {
    thread: Option<JoinHandle<()>>,
    stats: Arc<PlaybackStats>,
}

impl WorkerSynth {
    pub fn stats(&self) -> Arc<PlaybackStats> {
        self.stats.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Waits for the worker thread to exit. It exits after `Destroy`, when the
    /// handle disconnects or when the playback node is dropped.
    pub fn join(mut self) -> Result<(), RemoteError> {
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| RemoteError::Worker("worker thread panicked".to_string())),
            None => Ok(()),
        }
    }
}

/// Moves `core` onto a worker thread. The returned node belongs in the audio
/// callback.
pub fn spawn_worker(
    core: SynthRemoteCore,
    config: WorkerConfig,
) -> Result<(WorkerSynth, PlaybackNode), RemoteError> {
    let (writer, node) = playback_queue(core.layout(), &config);
    let stats = writer.stats();
    let idle = Duration::from_millis(config.idle_poll_ms.max(1));
    node.request_more();
    let thread = std::thread::Builder::new()
        .name("tessitura-worker".to_string())
        .spawn(move || run_worker(core, writer, idle))
        .map_err(|e| RemoteError::Worker(e.to_string()))?;
    Ok((
        WorkerSynth {
            thread: Some(thread),
            stats,
        },
        node,
    ))
}

fn run_worker(mut core: SynthRemoteCore, mut writer: QueueWriter, idle: Duration) {
    log::info!(target: "worker", "worker started");
    loop {
        core.pump();
        if core.is_destroyed() {
            log::info!(target: "worker", "synth destroyed, worker exiting");
            break;
        }
        if core.is_link_closed() {
            log::info!(target: "worker", "handle disconnected, worker exiting");
            core.destroy();
            break;
        }
        if writer.is_abandoned() {
            log::info!(target: "worker", "playback node dropped, worker exiting");
            core.destroy();
            break;
        }
        match writer.wait_request(idle) {
            RefillRequest::Requested => fill_queue(&mut core, &mut writer),
            RefillRequest::Idle => {}
            RefillRequest::Closed => {
                core.destroy();
                break;
            }
        }
    }
}

/// Renders until the queue is full, handling envelopes between quanta.
fn fill_queue(core: &mut SynthRemoteCore, writer: &mut QueueWriter) {
    while writer.free_slots() > 0 && !core.is_destroyed() {
        let mut buffer = writer.take_buffer();
        core.process(&mut buffer);
        if !writer.push(buffer) {
            break;
        }
    }
}
