//! Per-room fan-out over a tokio broadcast channel.
//!
//! Each member subscribes once and receives every [`Outbound`] item sent to
//! the room. Frames carry their origin connection so the receiving side can
//! skip its own traffic; the relay itself never inspects frame contents.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::protocol::WireMessage;
use chorus_core::WireError;

/// Item delivered to every member's receiver.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Encoded wire bytes. `origin` is the sending connection, if any.
    Frame {
        origin: Option<Uuid>,
        bytes: Arc<Vec<u8>>,
    },
    /// The room is being discarded; receivers close their connection.
    Terminate,
}

impl Outbound {
    /// True if this frame should be delivered to `connection`.
    pub fn is_for(&self, connection: Uuid) -> bool {
        match self {
            Outbound::Frame { origin, .. } => *origin != Some(connection),
            Outbound::Terminate => true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub bytes_sent: u64,
    pub subscribers: usize,
}

/// Fan-out group for one room.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Outbound>,
    capacity: usize,
    messages_sent: AtomicU64,
    bytes_sent: AtomicU64,
}

impl BroadcastGroup {
    /// `capacity` is the number of items buffered per receiver before a
    /// slow receiver starts lagging.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            capacity,
            messages_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.sender.subscribe()
    }

    /// Relay raw bytes from `origin` to every other subscriber. Returns the
    /// number of receivers the item reached (including the origin's own).
    pub fn relay(&self, origin: Option<Uuid>, bytes: Arc<Vec<u8>>) -> usize {
        let len = bytes.len() as u64;
        let count = self
            .sender
            .send(Outbound::Frame { origin, bytes })
            .unwrap_or(0);
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(len, Ordering::Relaxed);
        count
    }

    /// Encode and relay a message generated by the server itself.
    pub fn send_message(
        &self,
        origin: Option<Uuid>,
        message: &WireMessage,
    ) -> Result<usize, WireError> {
        let encoded = message.encode()?;
        Ok(self.relay(origin, Arc::new(encoded)))
    }

    /// Tell every subscriber to close.
    pub fn terminate(&self) -> usize {
        self.sender.send(Outbound::Terminate).unwrap_or(0)
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            subscribers: self.sender.receiver_count(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
