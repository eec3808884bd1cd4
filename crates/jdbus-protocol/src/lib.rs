//! Bus arbitration, driver registry, pairing and state streaming.
//!
//! Every node runs one [`LogicDriver`] at address 0. It allocates addresses
//! for local drivers, resolves conflicts, discovers remote devices and routes
//! packets to the [`Driver`]s in its registry. [`BusNode`] wraps it in a tokio
//! task fed by a transport intake channel and a tick interval.
//!
//! Driver layers, from plain to rich:
//! - [`Driver`]: lifecycle and packet callbacks, all non-blocking
//! - [`PairableDriver`]: host/client pairing handshake and partner gating
//! - [`StreamingDriver`]: change-detected state streaming between partners

pub mod config;
pub mod console;
pub mod driver;
pub mod error;
pub mod event;
pub mod filter;
pub mod logic;
pub mod node;
pub mod pairing;
pub mod registry;
pub mod status;
pub mod streaming;

pub use config::{BusConfig, DriverSpec, StreamingConfig};
pub use console::{ConsoleLine, ConsoleListener, ConsolePriority, LogBroadcaster, LogSender};
pub use driver::{pairing_packet, Driver, DriverContext, PAIRING_REQUEST_FLAGS};
pub use error::{ProtocolError, Result};
pub use event::{BusEvent, EventKind};
pub use filter::AddressFilter;
pub use logic::LogicDriver;
pub use node::{BusHandle, BusNode};
pub use pairing::{PacketHandler, PairableDriver, PairingState};
pub use registry::{DriverHandle, Registry};
pub use status::{DeviceStatus, DriverRole, PeerIdentity};
pub use streaming::{
    StateSample, StreamCache, StreamController, StreamHooks, StreamState, StreamingDriver,
};
