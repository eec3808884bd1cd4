use std::fmt;

use crate::registry::DriverHandle;
use crate::status::PeerIdentity;

/// A lifecycle notification for one driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusEvent {
    pub handle: DriverHandle,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Address confirmed (local) or peer discovered (remote).
    Connected { address: u8 },
    /// The device left the bus or lost its address.
    Removed,
    /// Pairing completed.
    Paired { partner: PeerIdentity },
    /// The partner went away.
    Unpaired,
    /// The peer answered a pairing request with NACK.
    PairRejected,
    /// A local driver drew a new address.
    AddressAssigned(u8),
    /// A local driver lost its address to another device.
    AddressConflict { address: u8 },
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected { address } => write!(f, "connected at {address}"),
            Self::Removed => f.write_str("removed"),
            Self::Paired { partner } => write!(f, "paired with {partner}"),
            Self::Unpaired => f.write_str("unpaired"),
            Self::PairRejected => f.write_str("pairing rejected"),
            Self::AddressAssigned(address) => write!(f, "address {address} assigned"),
            Self::AddressConflict { address } => write!(f, "lost address {address}"),
        }
    }
}
