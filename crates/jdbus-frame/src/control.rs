use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::{Packet, LOGIC_ADDRESS, MAX_PAYLOAD};
use crate::error::{FrameError, Result};
use crate::flags::ControlFlags;

/// Control header: type (1) + address (1) + flags (2) + class (4) + serial (4) = 12 bytes.
pub const CONTROL_HEADER_SIZE: usize = 12;

/// Bytes left for driver-specific payload in one control packet.
pub const MAX_CONTROL_PAYLOAD: usize = MAX_PAYLOAD - CONTROL_HEADER_SIZE;

/// Kind of control packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlPacketType {
    /// Periodic announce; input of address arbitration.
    Hello,
    /// Pairing request or, with `ACK`/`NACK`, pairing response.
    PairingRequest,
    /// Anything else; ignored by the logic driver.
    Unknown(u8),
}

impl ControlPacketType {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Hello,
            2 => Self::PairingRequest,
            other => Self::Unknown(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Hello => 1,
            Self::PairingRequest => 2,
            Self::Unknown(v) => v,
        }
    }
}

/// The subframe carried by every frame addressed to the logic driver.
///
/// Wire format (inside the frame payload, little-endian):
/// ```text
/// ┌──────┬─────────┬───────┬─────────────┬──────────────┬───────────┐
/// │ Type │ Address │ Flags │ DriverClass │ SerialNumber │ Payload   │
/// │ (1B) │ (1B)    │ (2B)  │ (4B)        │ (4B)         │ (≤ 20B)   │
/// └──────┴─────────┴───────┴─────────────┴──────────────┴───────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPacket {
    pub packet_type: ControlPacketType,
    /// Address the sender announces (or, for pairing, the target address).
    pub address: u8,
    pub flags: ControlFlags,
    pub driver_class: u32,
    pub serial_number: u32,
    /// Driver-specific trailing bytes.
    pub payload: Bytes,
}

impl ControlPacket {
    /// An announce for the given identity with no flags and no payload.
    pub fn hello(address: u8, driver_class: u32, serial_number: u32) -> Self {
        Self {
            packet_type: ControlPacketType::Hello,
            address,
            flags: ControlFlags::NONE,
            driver_class,
            serial_number,
            payload: Bytes::new(),
        }
    }

    /// Decode a control packet from a frame payload.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < CONTROL_HEADER_SIZE {
            return Err(FrameError::ControlTooShort { len: data.len() });
        }

        let mut buf = data;
        let packet_type = ControlPacketType::from_u8(buf.get_u8());
        let address = buf.get_u8();
        let flags = ControlFlags::from_bits(buf.get_u16_le());
        let driver_class = buf.get_u32_le();
        let serial_number = buf.get_u32_le();

        Ok(Self {
            packet_type,
            address,
            flags,
            driver_class,
            serial_number,
            payload: Bytes::copy_from_slice(buf),
        })
    }

    /// Decode the control packet carried by a frame.
    pub fn from_packet(packet: &Packet) -> Result<Self> {
        Self::decode(&packet.data)
    }

    /// Encode the subframe into `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        if self.payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(FrameError::PayloadTooLarge {
                size: self.payload.len(),
                max: MAX_CONTROL_PAYLOAD,
            });
        }
        dst.reserve(CONTROL_HEADER_SIZE + self.payload.len());
        dst.put_u8(self.packet_type.as_u8());
        dst.put_u8(self.address);
        dst.put_u16_le(self.flags.bits());
        dst.put_u32_le(self.driver_class);
        dst.put_u32_le(self.serial_number);
        dst.put_slice(&self.payload);
        Ok(())
    }

    /// Wrap this subframe in a frame addressed to the logic driver.
    pub fn to_packet(&self) -> Result<Packet> {
        let mut data = BytesMut::with_capacity(CONTROL_HEADER_SIZE + self.payload.len());
        self.encode(&mut data)?;
        Packet::new(LOGIC_ADDRESS, data.freeze())
    }

    /// True for a pairing response (`ACK` or `NACK`), false for a request.
    pub fn is_pairing_response(&self) -> bool {
        self.packet_type == ControlPacketType::PairingRequest
            && self.flags.intersects(ControlFlags::ACK | ControlFlags::NACK)
    }
}
