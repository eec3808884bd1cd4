//! Wire codec for the JacDac bus.
//!
//! Every frame on the bus has the same fixed layout:
//! - A 2-byte little-endian CRC16 (filled and checked by the transport)
//! - A 1-byte device address (0 is the logic driver)
//! - A 1-byte payload size
//! - Up to 32 payload bytes
//!
//! Frames addressed to 0 carry a [`ControlPacket`] in their payload. Data
//! frames of streaming drivers carry a [`StreamCommand`].

pub mod class;
pub mod codec;
pub mod command;
pub mod control;
pub mod error;
pub mod flags;
pub mod reader;
pub mod writer;

pub use class::{class_name, ARCADE, BRIDGE, BUTTON, CONTROL, JOYSTICK, LOGGER, MESSAGE_BUS, PIN};
pub use codec::{
    decode_frame, decode_packet, encode_packet, LinkConfig, Packet, HEADER_SIZE, LOGIC_ADDRESS,
    MAX_PAYLOAD, PACKET_SIZE,
};
pub use command::{StreamCommand, MAX_STATE_LEN, STATE_HEADER_SIZE};
pub use control::{
    ControlPacket, ControlPacketType, CONTROL_HEADER_SIZE, MAX_CONTROL_PAYLOAD,
};
pub use error::{FrameError, Result};
pub use flags::{ControlFlags, DeviceFlags};
pub use reader::PacketReader;
pub use writer::PacketWriter;
