use crate::envelope::{Command, Envelope, Outbound, Response, SequencerEvent, SynthEvent};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tessitura_ports::types::{ChannelTarget, SequencerId};

/// Capacity of the remote-to-handle queue.
pub const EVENT_QUEUE_CAPACITY: usize = 8192;

/// Handle side of a handle/remote pair.
#[derive(Debug)]
pub struct HandleLink {
    pub commands: Sender<Envelope<Command>>,
    pub events: Receiver<Envelope<Outbound>>,
}

/// Remote side of a handle/remote pair.
#[derive(Debug)]
pub struct RemoteLink {
    pub commands: Receiver<Envelope<Command>>,
    pub events: Sender<Envelope<Outbound>>,
}

/// Creates the two FIFO channels connecting a handle to its remote core.
pub fn connect() -> (HandleLink, RemoteLink) {
    connect_with_capacity(EVENT_QUEUE_CAPACITY)
}

/// Like [`connect`], with a remote-to-handle queue holding at most `capacity`
/// messages. The remote side never allocates or blocks when posting into it.
pub fn connect_with_capacity(capacity: usize) -> (HandleLink, RemoteLink) {
    let (command_tx, command_rx) = unbounded();
    let (event_tx, event_rx) = bounded(capacity.max(1));
    (
        HandleLink {
            commands: command_tx,
            events: event_rx,
        },
        RemoteLink {
            commands: command_rx,
            events: event_tx,
        },
    )
}

/// Sending half used by everything on the remote side that reports back.
///
/// Posting never blocks and never fails loudly. The last eighth of the queue
/// is reserved for replies and errors; events are dropped once only that
/// headroom is left. A gone handle just drops everything.
#[derive(Clone, Debug)]
pub struct Outbox {
    tx: Sender<Envelope<Outbound>>,
    reserved: usize,
    dropped: Arc<AtomicU64>,
}

impl Outbox {
    pub fn new(tx: Sender<Envelope<Outbound>>) -> Self {
        let reserved = tx.capacity().map_or(0, |capacity| capacity / 8);
        Self {
            tx,
            reserved,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// An outbox whose receiver is already gone, for offline work nobody observes.
    pub fn detached() -> Self {
        let (tx, _rx) = bounded(1);
        Self::new(tx)
    }

    /// Messages discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn has_event_room(&self) -> bool {
        match self.tx.capacity() {
            Some(capacity) => self.tx.len() + self.reserved < capacity,
            None => true,
        }
    }

    pub fn post(&self, channel: ChannelTarget, message: Outbound) {
        match self.tx.try_send(Envelope::new(channel, message)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::trace!(target: "remote", "outbound queue full, message dropped");
            }
            Err(TrySendError::Disconnected(_)) => {
                log::trace!(target: "remote", "outbound message dropped, handle is gone");
            }
        }
    }

    fn post_event(&self, channel: ChannelTarget, message: Outbound) {
        if !self.has_event_room() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            log::trace!(target: "remote", "outbound queue near full, event dropped");
            return;
        }
        self.post(channel, message);
    }

    pub fn synth(&self, event: SynthEvent) {
        self.post_event(event.channel(), Outbound::Synth(event));
    }

    pub fn sequencer(&self, id: SequencerId, event: SequencerEvent) {
        self.post_event(ChannelTarget::All, Outbound::Sequencer { id, event });
    }

    pub fn response(&self, response: Response) {
        self.post(ChannelTarget::All, Outbound::Response(response));
    }

    pub fn sequencer_response(&self, id: SequencerId, response: Response) {
        self.post(ChannelTarget::All, Outbound::SequencerResponse { id, response });
    }

    pub fn sound_bank_error(&self, message: String) {
        self.post(ChannelTarget::All, Outbound::SoundBankError(message));
    }
}
