use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{Result, TransportError};
use crate::memory::{MemoryBus, PortId};

/// Where finished wire frames go.
///
/// Sending never blocks: the protocol core runs its arbitration on the
/// intake path and must not wait on the medium.
#[derive(Clone, Debug)]
pub enum PacketSink {
    /// Frames are queued on an unbounded channel (bridge writer task, tests).
    Channel(mpsc::UnboundedSender<Bytes>),
    /// Frames go onto a shared in-process bus, delivered to every other port.
    Memory { bus: MemoryBus, port: PortId },
    /// Frames are dropped. Used by nodes that only listen.
    Discard,
}

impl PacketSink {
    /// A channel sink and the receiver that collects what it sends.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::Channel(tx), rx)
    }

    /// Hand one wire frame to the medium.
    pub fn send(&self, frame: Bytes) -> Result<()> {
        trace!(len = frame.len(), "sending frame");
        match self {
            Self::Channel(tx) => tx.send(frame).map_err(|_| TransportError::Closed),
            Self::Memory { bus, port } => bus.broadcast(*port, frame),
            Self::Discard => Ok(()),
        }
    }

    /// True when nothing will ever receive frames sent here.
    pub fn is_closed(&self) -> bool {
        match self {
            Self::Channel(tx) => tx.is_closed(),
            Self::Memory { bus, port } => !bus.is_attached(*port),
            Self::Discard => false,
        }
    }
}
