//! JacDac bus protocol core.
//!
//! jdbus implements the host-side logic of a single-wire JacDac bus:
//! address allocation and conflict resolution, device discovery, pairing
//! between hosts and clients, and change-detected state streaming. Hardware
//! is reached through a packet sink and a receive channel.
//!
//! # Crate Structure
//!
//! - [`transport`]: packet sinks, the in-process bus and the Unix socket bridge
//! - [`frame`]: fixed-size bus frames, control packets and streaming commands
//! - [`protocol`]: logic driver, driver registry, pairing and streaming
//!   (behind the `protocol` feature)

/// Re-export transport types.
pub mod transport {
    pub use jdbus_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use jdbus_frame::*;
}

/// Re-export protocol types (requires `protocol` feature).
#[cfg(feature = "protocol")]
pub mod protocol {
    pub use jdbus_protocol::*;
}
