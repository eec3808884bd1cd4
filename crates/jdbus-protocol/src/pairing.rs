//! Host/client pairing layered over a plain driver.
//!
//! A [`PairableDriver`] runs the request/response handshake and keeps the
//! `PAIRED`/`PAIRING` status flags in step with its [`PairingState`]. Once
//! paired, data packets from anyone but the partner are swallowed before they
//! reach the wrapped [`PacketHandler`].

use jdbus_frame::{ControlFlags, ControlPacket, ControlPacketType, DeviceFlags, Packet};
use tracing::{debug, trace, warn};

use crate::driver::{Driver, DriverContext};
use crate::event::EventKind;
use crate::status::{DeviceStatus, PeerIdentity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    Unpaired,
    /// A request went out to this peer.
    Pairing(PeerIdentity),
    Paired(PeerIdentity),
}

impl PairingState {
    pub fn peer(&self) -> Option<PeerIdentity> {
        match self {
            Self::Unpaired => None,
            Self::Pairing(peer) | Self::Paired(peer) => Some(*peer),
        }
    }

    pub fn is_paired(&self) -> bool {
        matches!(self, Self::Paired(_))
    }
}

/// Application hooks of a pairable driver.
pub trait PacketHandler: Send {
    /// A data packet that passed the pairing gate.
    fn handle_packet(&mut self, ctx: &mut DriverContext<'_>, packet: &Packet) -> bool {
        let _ = (ctx, packet);
        false
    }

    fn fill_control_packet(&mut self, status: &DeviceStatus, cp: &mut ControlPacket) {
        let _ = (status, cp);
    }

    fn connected(&mut self, ctx: &mut DriverContext<'_>) {
        let _ = ctx;
    }

    fn removed(&mut self, ctx: &mut DriverContext<'_>) {
        let _ = ctx;
    }

    fn paired(&mut self, ctx: &mut DriverContext<'_>, partner: &PeerIdentity) {
        let _ = (ctx, partner);
    }

    fn unpaired(&mut self, ctx: &mut DriverContext<'_>) {
        let _ = ctx;
    }

    fn name(&self) -> &str {
        "pairable"
    }
}

pub struct PairableDriver<H> {
    handler: H,
    state: PairingState,
}

impl<H: PacketHandler> PairableDriver<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            state: PairingState::Unpaired,
        }
    }

    pub fn state(&self) -> PairingState {
        self.state
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    fn set_state(&mut self, ctx: &mut DriverContext<'_>, state: PairingState) {
        self.state = state;
        let flags = &mut ctx.status_mut().flags;
        flags.remove(DeviceFlags::PAIRED | DeviceFlags::PAIRING);
        match state {
            PairingState::Unpaired => {}
            PairingState::Pairing(_) => flags.insert(DeviceFlags::PAIRING),
            PairingState::Paired(_) => flags.insert(DeviceFlags::PAIRED),
        }
    }

    fn bond(&mut self, ctx: &mut DriverContext<'_>, partner: PeerIdentity) {
        if self.state == PairingState::Paired(partner) {
            return;
        }
        debug!(handle = %ctx.handle(), %partner, "paired");
        self.set_state(ctx, PairingState::Paired(partner));
        ctx.emit(EventKind::Paired { partner });
        self.handler.paired(ctx, &partner);
    }

    fn unbond(&mut self, ctx: &mut DriverContext<'_>) {
        let previous = self.state;
        self.set_state(ctx, PairingState::Unpaired);
        match previous {
            PairingState::Unpaired => {}
            PairingState::Pairing(peer) => {
                debug!(handle = %ctx.handle(), %peer, "pairing abandoned");
                ctx.emit(EventKind::PairRejected);
            }
            PairingState::Paired(peer) => {
                debug!(handle = %ctx.handle(), %peer, "unpaired");
                ctx.emit(EventKind::Unpaired);
                self.handler.unpaired(ctx);
            }
        }
    }

    fn handle_announce(&mut self, ctx: &mut DriverContext<'_>, cp: &ControlPacket) -> bool {
        let status = *ctx.status();
        if !status.can_pair() || !status.is_connected() || cp.address == status.address {
            return false;
        }
        let peer = PeerIdentity {
            address: cp.address,
            serial_number: cp.serial_number,
            driver_class: cp.driver_class,
        };

        match self.state {
            PairingState::Paired(partner) if same_device(&partner, &peer) => {
                if partner.address != peer.address {
                    debug!(handle = %ctx.handle(), from = partner.address, to = peer.address, "partner moved");
                    self.state = PairingState::Paired(peer);
                }
                true
            }
            PairingState::Paired(_) => false,
            // Repeat the request until the peer answers or goes silent.
            PairingState::Pairing(target) if same_device(&target, &peer) => {
                self.request(ctx, peer);
                true
            }
            PairingState::Pairing(_) => false,
            PairingState::Unpaired => {
                let eligible = cp.flags.is_safe()
                    && cp.driver_class == status.driver_class
                    && cp.flags.contains(ControlFlags::PAIRABLE)
                    && !cp.flags.contains(ControlFlags::PAIRED);
                if !eligible {
                    return false;
                }
                self.request(ctx, peer)
            }
        }
    }

    fn request(&mut self, ctx: &mut DriverContext<'_>, target: PeerIdentity) -> bool {
        match ctx.send_pairing_packet(&target) {
            Ok(()) => {
                self.set_state(ctx, PairingState::Pairing(target));
                true
            }
            Err(err) => {
                warn!(handle = %ctx.handle(), %target, %err, "pairing request failed");
                false
            }
        }
    }

    fn handle_request(&mut self, ctx: &mut DriverContext<'_>, cp: &ControlPacket) -> bool {
        let Some(requester) = PeerIdentity::decode(&cp.payload) else {
            debug!(handle = %ctx.handle(), "pairing request without sender identity");
            return false;
        };

        let accept = match self.state {
            PairingState::Unpaired => true,
            PairingState::Pairing(peer) | PairingState::Paired(peer) => {
                same_device(&peer, &requester)
            }
        };
        if let Err(err) = ctx.send_pairing_response(&requester, accept) {
            warn!(handle = %ctx.handle(), %requester, %err, "pairing response failed");
            return false;
        }

        if accept {
            self.bond(ctx, requester);
        } else {
            debug!(handle = %ctx.handle(), %requester, "pairing refused");
        }
        true
    }

    fn handle_response(&mut self, ctx: &mut DriverContext<'_>, cp: &ControlPacket) -> bool {
        let Some(responder) = PeerIdentity::decode(&cp.payload) else {
            debug!(handle = %ctx.handle(), "pairing response without sender identity");
            return false;
        };
        let PairingState::Pairing(target) = self.state else {
            trace!(handle = %ctx.handle(), %responder, "unsolicited pairing response");
            return false;
        };
        if !same_device(&target, &responder) {
            return false;
        }

        if cp.flags.contains(ControlFlags::ACK) {
            self.bond(ctx, responder);
        } else {
            self.unbond(ctx);
        }
        true
    }
}

impl<H: PacketHandler> Driver for PairableDriver<H> {
    fn handle_control_packet(&mut self, ctx: &mut DriverContext<'_>, cp: &ControlPacket) -> bool {
        match cp.packet_type {
            ControlPacketType::Hello => self.handle_announce(ctx, cp),
            ControlPacketType::PairingRequest if cp.is_pairing_response() => {
                self.handle_response(ctx, cp)
            }
            ControlPacketType::PairingRequest => self.handle_request(ctx, cp),
            ControlPacketType::Unknown(_) => false,
        }
    }

    fn handle_packet(&mut self, ctx: &mut DriverContext<'_>, packet: &Packet) -> bool {
        if let PairingState::Paired(partner) = self.state {
            if packet.address != partner.address {
                trace!(handle = %ctx.handle(), address = packet.address, "dropping packet from non-partner");
                return true;
            }
        }
        self.handler.handle_packet(ctx, packet)
    }

    fn fill_control_packet(&mut self, status: &DeviceStatus, cp: &mut ControlPacket) {
        self.handler.fill_control_packet(status, cp);
    }

    fn device_connected(&mut self, ctx: &mut DriverContext<'_>) {
        self.handler.connected(ctx);
    }

    fn device_removed(&mut self, ctx: &mut DriverContext<'_>) {
        self.unbond(ctx);
        self.handler.removed(ctx);
    }

    fn partner(&self) -> Option<PeerIdentity> {
        self.state.peer()
    }

    fn partner_lost(&mut self, ctx: &mut DriverContext<'_>) {
        self.unbond(ctx);
    }

    fn name(&self) -> &str {
        self.handler.name()
    }
}

/// Addresses move after conflicts; serial and class identify the device.
fn same_device(a: &PeerIdentity, b: &PeerIdentity) -> bool {
    a.serial_number == b.serial_number && a.driver_class == b.driver_class
}
