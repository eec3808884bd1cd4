//! Transport seam of the jdbus protocol core.
//!
//! The core never touches hardware. It hands finished wire frames to a
//! [`PacketSink`] and consumes raw frames from a channel. This crate provides:
//! - [`PacketSink`]: the send primitive used by drivers and the logic driver
//! - [`MemoryBus`]: an in-process shared medium where every frame sent by one
//!   port is delivered to all other ports (half-duplex bus semantics)
//! - [`BridgeSocket`] / [`BusStream`]: a Unix-socket bridge to an external
//!   simulator or serial adapter (Unix only)

pub mod error;
pub mod memory;
pub mod sink;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use memory::{BusPort, MemoryBus, PortId};
pub use sink::PacketSink;
pub use traits::BusStream;

#[cfg(unix)]
pub use uds::BridgeSocket;
