use crate::config::WorkerConfig;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use rtrb::{Consumer, Producer, RingBuffer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tessitura_ports::render::BusLayout;

/// Counters shared by both ends of the playback queue.
#[derive(Debug, Default)]
pub struct PlaybackStats {
    rendered: AtomicU64,
    consumed: AtomicU64,
    underruns: AtomicU64,
}

impl PlaybackStats {
    pub fn rendered(&self) -> u64 {
        self.rendered.load(Ordering::Relaxed)
    }

    pub fn consumed(&self) -> u64 {
        self.consumed.load(Ordering::Relaxed)
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }
}

/// Creates both ends of a bounded quantum queue for `layout`.
pub fn playback_queue(layout: BusLayout, config: &WorkerConfig) -> (QueueWriter, PlaybackNode) {
    let capacity = config.queue_quanta.max(1);
    let (filled_tx, filled_rx) = RingBuffer::new(capacity);
    let (spent_tx, spent_rx) = RingBuffer::new(capacity);
    let (request_tx, request_rx) = bounded(1);
    let stats = Arc::new(PlaybackStats::default());
    let writer = QueueWriter {
        layout,
        filled: filled_tx,
        spent: spent_rx,
        requests: request_rx,
        stats: stats.clone(),
    };
    let node = PlaybackNode {
        layout,
        filled: filled_rx,
        spent: spent_tx,
        requests: request_tx,
        refill_threshold: config.refill_threshold.min(capacity),
        stats,
        mixed_l: vec![0.0; layout.quantum_frames],
        mixed_r: vec![0.0; layout.quantum_frames],
        position: layout.quantum_frames,
    };
    (writer, node)
}

#[derive(Debug, PartialEq, Eq)]
pub enum RefillRequest {
    Requested,
    Idle,
    Closed,
}

/// Worker end: renders into recycled buffers and pushes them to the node.
pub struct QueueWriter {
    layout: BusLayout,
    filled: Producer<Box<[f32]>>,
    spent: Consumer<Box<[f32]>>,
    requests: Receiver<()>,
    stats: Arc<PlaybackStats>,
}

impl QueueWriter {
    pub fn layout(&self) -> BusLayout {
        self.layout
    }

    pub fn stats(&self) -> Arc<PlaybackStats> {
        self.stats.clone()
    }

    pub fn free_slots(&self) -> usize {
        self.filled.slots()
    }

    /// True once the playback node was dropped.
    pub fn is_abandoned(&self) -> bool {
        self.filled.is_abandoned()
    }

    /// A spent buffer when one came back, otherwise a fresh one.
    pub fn take_buffer(&mut self) -> Box<[f32]> {
        match self.spent.pop() {
            Ok(buffer) => buffer,
            Err(_) => vec![0.0; self.layout.buffer_len()].into_boxed_slice(),
        }
    }

    /// Returns false when the queue is full; the buffer is dropped then.
    pub fn push(&mut self, buffer: Box<[f32]>) -> bool {
        match self.filled.push(buffer) {
            Ok(()) => {
                self.stats.rendered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => false,
        }
    }

    pub fn wait_request(&self, timeout: Duration) -> RefillRequest {
        match self.requests.recv_timeout(timeout) {
            Ok(()) => RefillRequest::Requested,
            Err(RecvTimeoutError::Timeout) => RefillRequest::Idle,
            Err(RecvTimeoutError::Disconnected) => RefillRequest::Closed,
        }
    }
}

/// Audio end of the playback buffer protocol. Never blocks: when the queue is
/// empty it outputs silence and counts an underrun.
pub struct PlaybackNode {
    layout: BusLayout,
    filled: Consumer<Box<[f32]>>,
    spent: Producer<Box<[f32]>>,
    requests: Sender<()>,
    refill_threshold: usize,
    stats: Arc<PlaybackStats>,
    mixed_l: Vec<f32>,
    mixed_r: Vec<f32>,
    position: usize,
}

impl PlaybackNode {
    pub fn layout(&self) -> BusLayout {
        self.layout
    }

    pub fn stats(&self) -> Arc<PlaybackStats> {
        self.stats.clone()
    }

    /// Quanta ready to be played.
    pub fn queued(&self) -> usize {
        self.filled.slots()
    }

    pub fn request_more(&self) {
        match self.requests.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Disconnected(())) => {
                log::trace!(target: "worker", "refill requested but the worker is gone")
            }
        }
    }

    fn after_pop(&self) {
        if self.filled.slots() < self.refill_threshold {
            self.request_more();
        }
    }

    /// Copies the next quantum, in bus layout, into `out`. Returns false and
    /// writes silence on underrun.
    pub fn pop_quantum(&mut self, out: &mut [f32]) -> bool {
        match self.filled.pop() {
            Ok(buffer) => {
                let len = out.len().min(buffer.len());
                out[..len].copy_from_slice(&buffer[..len]);
                out[len..].fill(0.0);
                self.recycle(buffer);
                self.stats.consumed.fetch_add(1, Ordering::Relaxed);
                self.after_pop();
                true
            }
            Err(_) => {
                out.fill(0.0);
                self.stats.underruns.fetch_add(1, Ordering::Relaxed);
                self.request_more();
                false
            }
        }
    }

    fn recycle(&mut self, buffer: Box<[f32]>) {
        if self.spent.push(buffer).is_err() {
            log::trace!(target: "worker", "spent queue full, buffer dropped");
        }
    }

    /// Stereo mixdown for a host callback of any length.
    pub fn render(&mut self, out_l: &mut [f32], out_r: &mut [f32]) {
        let frames = out_l.len().min(out_r.len());
        let quantum = self.layout.quantum_frames;
        let mut written = 0;
        while written < frames {
            if self.position >= quantum {
                match self.filled.pop() {
                    Ok(buffer) => {
                        self.layout
                            .mix_down(&buffer, &mut self.mixed_l, &mut self.mixed_r);
                        self.recycle(buffer);
                        self.stats.consumed.fetch_add(1, Ordering::Relaxed);
                        self.after_pop();
                    }
                    Err(_) => {
                        self.mixed_l.fill(0.0);
                        self.mixed_r.fill(0.0);
                        self.stats.underruns.fetch_add(1, Ordering::Relaxed);
                        self.request_more();
                    }
                }
                self.position = 0;
            }
            let count = (quantum - self.position).min(frames - written);
            out_l[written..written + count]
                .copy_from_slice(&self.mixed_l[self.position..self.position + count]);
            out_r[written..written + count]
                .copy_from_slice(&self.mixed_r[self.position..self.position + count]);
            self.position += count;
            written += count;
        }
    }
}
