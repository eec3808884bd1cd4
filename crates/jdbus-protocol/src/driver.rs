//! The driver abstraction and the context drivers act through.

use bytes::{Bytes, BytesMut};
use jdbus_frame::{encode_packet, ControlPacket, ControlPacketType, DeviceFlags, Packet};
use jdbus_transport::PacketSink;
use tracing::debug;

use crate::error::{ProtocolError, Result};
use crate::event::{BusEvent, EventKind};
use crate::registry::DriverHandle;
use crate::status::{DeviceStatus, PeerIdentity};

/// Flags a pairing request carries in its control flags field.
pub const PAIRING_REQUEST_FLAGS: DeviceFlags = DeviceFlags::from_bits(
    DeviceFlags::REMOTE.bits() | DeviceFlags::INITIALISED.bits() | DeviceFlags::CP_SEEN.bits(),
);

/// One logical participant on the bus.
///
/// Every method runs on the packet-intake path and must not block. Defaults
/// are no-ops, so a driver implements only what its role needs.
pub trait Driver: Send {
    /// A control packet the logic driver matched to this driver.
    fn handle_control_packet(&mut self, ctx: &mut DriverContext<'_>, cp: &ControlPacket) -> bool {
        let _ = (ctx, cp);
        false
    }

    /// A data packet routed to this driver.
    fn handle_packet(&mut self, ctx: &mut DriverContext<'_>, packet: &Packet) -> bool {
        let _ = (ctx, packet);
        false
    }

    /// Stamp driver-specific bits or payload into the next announce.
    fn fill_control_packet(&mut self, status: &DeviceStatus, cp: &mut ControlPacket) {
        let _ = (status, cp);
    }

    fn device_connected(&mut self, ctx: &mut DriverContext<'_>) {
        let _ = ctx;
    }

    fn device_removed(&mut self, ctx: &mut DriverContext<'_>) {
        let _ = ctx;
    }

    /// The peer being paired with or bonded to. Its announces keep the pairing
    /// alive; its data packets are routed here once the status is `PAIRED`.
    fn partner(&self) -> Option<PeerIdentity> {
        None
    }

    /// The partner stopped announcing.
    fn partner_lost(&mut self, ctx: &mut DriverContext<'_>) {
        let _ = ctx;
    }

    /// Short name for logs.
    fn name(&self) -> &str {
        "driver"
    }
}

/// What a driver may touch while handling a callback.
pub struct DriverContext<'a> {
    handle: DriverHandle,
    status: &'a mut DeviceStatus,
    sink: &'a PacketSink,
    events: &'a mut Vec<BusEvent>,
}

impl<'a> DriverContext<'a> {
    pub fn new(
        handle: DriverHandle,
        status: &'a mut DeviceStatus,
        sink: &'a PacketSink,
        events: &'a mut Vec<BusEvent>,
    ) -> Self {
        Self {
            handle,
            status,
            sink,
            events,
        }
    }

    pub fn handle(&self) -> DriverHandle {
        self.handle
    }

    pub fn status(&self) -> &DeviceStatus {
        self.status
    }

    pub fn status_mut(&mut self) -> &mut DeviceStatus {
        self.status
    }

    pub fn sink(&self) -> &PacketSink {
        self.sink
    }

    /// Queue a lifecycle event.
    pub fn emit(&mut self, kind: EventKind) {
        self.events.push(BusEvent {
            handle: self.handle,
            kind,
        });
    }

    /// Send a data packet under this driver's address.
    pub fn send(&self, data: &[u8]) -> Result<()> {
        if self.status.address == 0 {
            return Err(ProtocolError::NotConnected);
        }
        send_data(self.sink, self.status.address, data)
    }

    /// Send a control packet to the logic address.
    pub fn send_control(&self, cp: &ControlPacket) -> Result<()> {
        let packet = cp.to_packet()?;
        self.sink.send(packet.to_bytes())?;
        Ok(())
    }

    /// Ask `target` to pair with this driver.
    pub fn send_pairing_packet(&self, target: &PeerIdentity) -> Result<()> {
        if !self.status.is_connected() {
            return Err(ProtocolError::NotConnected);
        }
        debug!(
            handle = %self.handle,
            address = target.address,
            serial = target.serial_number,
            "sending pairing request"
        );
        let cp = pairing_packet(
            target,
            jdbus_frame::ControlFlags::from_bits(PAIRING_REQUEST_FLAGS.bits()),
            &self.status.identity(),
        );
        self.send_control(&cp)
    }

    /// Answer a pairing request from `requester` with `ACK` or `NACK`.
    pub fn send_pairing_response(&self, requester: &PeerIdentity, accept: bool) -> Result<()> {
        let flags = if accept {
            jdbus_frame::ControlFlags::ACK
        } else {
            jdbus_frame::ControlFlags::NACK
        };
        let cp = pairing_packet(requester, flags, &self.status.identity());
        self.send_control(&cp)
    }
}

/// A pairing packet addressed to `target`, carrying the sender's identity.
pub fn pairing_packet(
    target: &PeerIdentity,
    flags: jdbus_frame::ControlFlags,
    sender: &PeerIdentity,
) -> ControlPacket {
    let mut payload = BytesMut::with_capacity(PeerIdentity::ENCODED_LEN);
    sender.encode(&mut payload);
    ControlPacket {
        packet_type: ControlPacketType::PairingRequest,
        address: target.address,
        flags,
        driver_class: target.driver_class,
        serial_number: target.serial_number,
        payload: payload.freeze(),
    }
}

/// Encode and send a data packet for `address`.
pub(crate) fn send_data(sink: &PacketSink, address: u8, data: &[u8]) -> Result<()> {
    let packet = Packet::new(address, Bytes::copy_from_slice(data))?;
    let mut buf = BytesMut::with_capacity(packet.wire_size());
    encode_packet(packet.address, &packet.data, &mut buf);
    sink.send(buf.freeze())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use jdbus_frame::{decode_packet, ControlFlags};

    use super::*;
    use crate::status::DriverRole;

    fn handle() -> DriverHandle {
        DriverHandle::new(0, 0)
    }

    #[test]
    fn send_requires_address() {
        let (sink, mut rx) = PacketSink::channel();
        let mut status = DeviceStatus::new(DriverRole::Host, 7, 1);
        let mut events = Vec::new();
        let ctx = DriverContext::new(handle(), &mut status, &sink, &mut events);

        assert!(matches!(ctx.send(b"x"), Err(ProtocolError::NotConnected)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn send_uses_own_address() {
        let (sink, mut rx) = PacketSink::channel();
        let mut status = DeviceStatus::new(DriverRole::Host, 7, 1);
        status.address = 12;
        let mut events = Vec::new();
        let ctx = DriverContext::new(handle(), &mut status, &sink, &mut events);

        ctx.send(&[1, 2]).unwrap();
        let packet = decode_packet(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(packet.address, 12);
        assert_eq!(packet.data.as_ref(), &[1, 2]);
    }

    #[test]
    fn pairing_request_layout() {
        let (sink, mut rx) = PacketSink::channel();
        let mut status = DeviceStatus::new(DriverRole::PairableHost, 7, 100);
        status.address = 3;
        status.flags.insert(DeviceFlags::INITIALISED);
        let mut events = Vec::new();
        let ctx = DriverContext::new(handle(), &mut status, &sink, &mut events);

        let target = PeerIdentity {
            address: 5,
            serial_number: 200,
            driver_class: 7,
        };
        ctx.send_pairing_packet(&target).unwrap();

        let packet = decode_packet(&rx.try_recv().unwrap()).unwrap();
        assert!(packet.is_control());
        let cp = ControlPacket::from_packet(&packet).unwrap();
        assert_eq!(cp.packet_type, ControlPacketType::PairingRequest);
        assert_eq!(cp.address, 5);
        assert_eq!(cp.serial_number, 200);
        assert_eq!(cp.driver_class, 7);
        assert_eq!(cp.flags.bits(), 0x40A0);
        assert!(!cp.is_pairing_response());

        let sender = PeerIdentity::decode(&cp.payload).unwrap();
        assert_eq!(sender.address, 3);
        assert_eq!(sender.serial_number, 100);
    }

    #[test]
    fn pairing_response_carries_ack() {
        let (sink, mut rx) = PacketSink::channel();
        let mut status = DeviceStatus::new(DriverRole::PairableHost, 7, 200);
        status.address = 5;
        let mut events = Vec::new();
        let mut ctx = DriverContext::new(handle(), &mut status, &sink, &mut events);

        let requester = PeerIdentity {
            address: 3,
            serial_number: 100,
            driver_class: 7,
        };
        ctx.send_pairing_response(&requester, true).unwrap();
        ctx.emit(EventKind::Paired { partner: requester });

        let packet = decode_packet(&rx.try_recv().unwrap()).unwrap();
        let cp = ControlPacket::from_packet(&packet).unwrap();
        assert!(cp.is_pairing_response());
        assert!(cp.flags.contains(ControlFlags::ACK));
        assert_eq!(cp.address, 3);
        assert_eq!(events.len(), 1);
    }
}
