use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{Result, TransportError};
use crate::sink::PacketSink;

/// Identifier of one attachment point on a [`MemoryBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortId(u32);

impl PortId {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for PortId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "port-{}", self.0)
    }
}

#[derive(Debug, Default)]
struct Ports {
    next_id: u32,
    attached: Vec<(PortId, mpsc::UnboundedSender<Bytes>)>,
    shut_down: bool,
}

/// An in-process shared medium.
///
/// Like the physical bus, a frame sent by one port is seen by every other
/// port and never echoed back to its sender. Delivery order per receiver
/// matches send order.
#[derive(Debug, Clone, Default)]
pub struct MemoryBus {
    ports: Arc<Mutex<Ports>>,
}

/// One node's attachment: a sink for outgoing frames and the intake channel.
#[derive(Debug)]
pub struct BusPort {
    pub id: PortId,
    pub sink: PacketSink,
    pub rx: mpsc::UnboundedReceiver<Bytes>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Ports> {
        self.ports.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Attach a new port.
    pub fn attach(&self) -> BusPort {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut ports = self.lock();
        let id = PortId(ports.next_id);
        ports.next_id += 1;
        ports.attached.push((id, tx));
        debug!(port = %id, attached = ports.attached.len(), "port attached");

        BusPort {
            id,
            sink: PacketSink::Memory {
                bus: self.clone(),
                port: id,
            },
            rx,
        }
    }

    /// Detach a port. Frames already queued for it stay readable.
    pub fn detach(&self, port: PortId) {
        let mut ports = self.lock();
        ports.attached.retain(|(id, _)| *id != port);
        debug!(port = %port, "port detached");
    }

    pub fn is_attached(&self, port: PortId) -> bool {
        self.lock().attached.iter().any(|(id, _)| *id == port)
    }

    pub fn port_count(&self) -> usize {
        self.lock().attached.len()
    }

    /// Close the bus: all intake channels end and further sends fail.
    pub fn shutdown(&self) {
        let mut ports = self.lock();
        ports.shut_down = true;
        ports.attached.clear();
    }

    /// Deliver `frame` to every port except `from`.
    pub(crate) fn broadcast(&self, from: PortId, frame: Bytes) -> Result<()> {
        let mut ports = self.lock();
        if ports.shut_down {
            return Err(TransportError::Shutdown);
        }
        if !ports.attached.iter().any(|(id, _)| *id == from) {
            return Err(TransportError::Closed);
        }

        // Receivers that went away are pruned on the way.
        ports.attached.retain(|(id, tx)| {
            if *id == from {
                return true;
            }
            tx.send(frame.clone()).is_ok()
        });
        trace!(port = %from, receivers = ports.attached.len() - 1, "frame broadcast");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_reach_every_other_port() {
        let bus = MemoryBus::new();
        let mut a = bus.attach();
        let mut b = bus.attach();
        let mut c = bus.attach();

        a.sink.send(Bytes::from_static(&[0, 0, 3, 0])).unwrap();

        assert_eq!(b.rx.try_recv().unwrap().as_ref(), &[0, 0, 3, 0]);
        assert_eq!(c.rx.try_recv().unwrap().as_ref(), &[0, 0, 3, 0]);
        assert!(a.rx.try_recv().is_err(), "no echo to the sender");
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let bus = MemoryBus::new();
        let a = bus.attach();
        let b = bus.attach();
        assert_eq!(bus.port_count(), 2);

        drop(b.rx);
        a.sink.send(Bytes::from_static(&[1])).unwrap();
        assert_eq!(bus.port_count(), 1);
    }

    #[test]
    fn detached_port_cannot_send() {
        let bus = MemoryBus::new();
        let a = bus.attach();
        let _b = bus.attach();

        bus.detach(a.id);
        assert!(a.sink.is_closed());
        assert!(matches!(
            a.sink.send(Bytes::from_static(&[1])),
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn shutdown_ends_intake() {
        let bus = MemoryBus::new();
        let mut a = bus.attach();
        bus.shutdown();

        assert!(a.rx.recv().await.is_none());
        assert!(matches!(
            a.sink.send(Bytes::from_static(&[1])),
            Err(TransportError::Shutdown)
        ));
    }

    #[test]
    fn port_ids_are_distinct() {
        let bus = MemoryBus::new();
        let a = bus.attach();
        let b = bus.attach();
        assert_ne!(a.id, b.id);
        assert_eq!(b.id.to_string(), format!("port-{}", b.id.get()));
    }
}
