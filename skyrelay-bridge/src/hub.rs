//! Distribution hub: the set of attached consumer channels.
//!
//! The active set is guarded by one mutex owned by the hub. Broadcast holds
//! it for the whole pass and never awaits, so attach and detach from
//! connection tasks can interleave with ticks but never observe a half-done
//! broadcast.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::transport::{Frame, SampleSink};

/// Opaque channel handle. Allocated monotonically, never reused.
pub type ChannelId = u64;

/// Lifecycle of a consumer channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Why a frame could not be handed to a channel.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The previous frame has not been written yet.
    #[error("outbox full")]
    Backpressure,

    #[error("channel closed")]
    Closed,
}

/// One attached output.
pub trait ConsumerChannel: Send + Sync {
    fn id(&self) -> ChannelId;

    /// Queue a frame without waiting.
    fn try_send(&self, frame: &Frame) -> Result<(), SendError>;

    /// Stop accepting frames; the writer drains and closes the connection.
    fn close(&self);
}

/// A consumer channel drained by a writer task.
///
/// At most one frame is outstanding: it is set in flight by `try_send` and
/// stays there until the writer calls [`OutboxChannel::write_done`], even
/// after it has left the queue.
pub struct OutboxChannel {
    id: ChannelId,
    sender: Mutex<Option<mpsc::Sender<Frame>>>,
    state: Mutex<ChannelState>,
    in_flight: AtomicBool,
}

impl OutboxChannel {
    /// Create a channel and the receiving end of its outbox.
    pub fn new(id: ChannelId) -> (Arc<Self>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(1);
        let channel = Arc::new(Self {
            id,
            sender: Mutex::new(Some(tx)),
            state: Mutex::new(ChannelState::Connecting),
            in_flight: AtomicBool::new(false),
        });
        (channel, rx)
    }

    pub fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    /// The handshake finished; the channel may be attached.
    pub fn mark_open(&self) {
        let mut state = self.state.lock();
        if *state == ChannelState::Connecting {
            *state = ChannelState::Open;
        }
    }

    /// The writer finished sending the outstanding frame.
    pub fn write_done(&self) {
        self.in_flight.store(false, Ordering::Release);
    }

    /// Whether a frame is queued or still being written.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// The connection is gone.
    pub fn mark_closed(&self) {
        *self.state.lock() = ChannelState::Closed;
        self.sender.lock().take();
    }
}

impl ConsumerChannel for OutboxChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn try_send(&self, frame: &Frame) -> Result<(), SendError> {
        let sender = self.sender.lock();
        let Some(tx) = sender.as_ref() else {
            return Err(SendError::Closed);
        };
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return Err(SendError::Backpressure);
        }
        tx.try_send(frame.clone()).map_err(|e| {
            self.in_flight.store(false, Ordering::Release);
            match e {
                mpsc::error::TrySendError::Full(_) => SendError::Backpressure,
                mpsc::error::TrySendError::Closed(_) => SendError::Closed,
            }
        })
    }

    fn close(&self) {
        let mut state = self.state.lock();
        if *state != ChannelState::Closed {
            *state = ChannelState::Closing;
        }
        // Dropping the sender lets the writer see end-of-outbox.
        self.sender.lock().take();
    }
}

/// Counts from one broadcast pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub delivered: usize,
    pub detached: usize,
}

/// The set of attached consumer channels.
#[derive(Default)]
pub struct DistributionHub {
    channels: Mutex<HashMap<ChannelId, Arc<dyn ConsumerChannel>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl DistributionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh channel id.
    pub fn next_channel_id(&self) -> ChannelId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Add a channel to the active set.
    ///
    /// Attaching an id that is already present is a no-op. Returns `false`
    /// once the hub has been closed.
    pub fn attach(&self, channel: Arc<dyn ConsumerChannel>) -> bool {
        let mut channels = self.channels.lock();
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let id = channel.id();
        if channels.contains_key(&id) {
            tracing::debug!(channel = id, "Channel already attached");
        } else {
            channels.insert(id, channel);
            tracing::info!(channel = id, consumers = channels.len(), "Consumer attached");
        }
        true
    }

    /// Remove a channel. Returns whether it was attached.
    pub fn detach(&self, id: ChannelId) -> bool {
        let mut channels = self.channels.lock();
        let removed = channels.remove(&id).is_some();
        if removed {
            tracing::info!(channel = id, consumers = channels.len(), "Consumer detached");
        }
        removed
    }

    pub fn contains(&self, id: ChannelId) -> bool {
        self.channels.lock().contains_key(&id)
    }

    /// Number of attached channels.
    pub fn len(&self) -> usize {
        self.channels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hand a frame to every attached channel.
    ///
    /// A channel that fails is closed and detached; the rest still receive
    /// the frame.
    pub fn broadcast(&self, frame: &Frame) -> BroadcastStats {
        let mut stats = BroadcastStats::default();
        let mut channels = self.channels.lock();

        channels.retain(|id, channel| match channel.try_send(frame) {
            Ok(()) => {
                stats.delivered += 1;
                true
            }
            Err(e) => {
                tracing::warn!(channel = *id, error = %e, "Dropping consumer");
                channel.close();
                stats.detached += 1;
                false
            }
        });

        stats
    }

    /// Close every channel and refuse further attaches.
    pub fn close_all(&self) {
        let mut channels = self.channels.lock();
        self.closed.store(true, Ordering::Release);
        for channel in channels.values() {
            channel.close();
        }
        let count = channels.len();
        channels.clear();
        tracing::info!(consumers = count, "Closed all consumers");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl SampleSink for DistributionHub {
    fn deliver(&self, frame: Frame) {
        let stats = self.broadcast(&frame);
        tracing::trace!(
            delivered = stats.delivered,
            detached = stats.detached,
            "Broadcast sample"
        );
    }
}
