//! Per-driver identity and lifecycle state.

use std::fmt;

use bytes::{Buf, BufMut, BytesMut};
use jdbus_frame::DeviceFlags;

/// Role a driver plays on the bus. Each role is a fixed combination of mode flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverRole {
    /// Uses another device's resource; discovers and tracks a peer's address.
    Virtual,
    /// Hosts a resource; owns and announces its own address.
    Host,
    /// A host that accepts pairing with a driver of the same class.
    PairableHost,
    /// Announces its own address and receives all traffic of its class.
    Broadcast,
    /// Not enumerated; receives all traffic of its class.
    Sniffer,
    /// Client half of a pair: announces, receives class traffic, pairs with a pairable host.
    PairedClient,
}

impl DriverRole {
    pub const fn flags(self) -> DeviceFlags {
        let bits = match self {
            Self::Virtual => DeviceFlags::REMOTE.bits(),
            Self::Host => DeviceFlags::LOCAL.bits(),
            Self::PairableHost => DeviceFlags::LOCAL.bits() | DeviceFlags::PAIRABLE.bits(),
            Self::Broadcast => DeviceFlags::LOCAL.bits() | DeviceFlags::BROADCAST.bits(),
            Self::Sniffer => DeviceFlags::REMOTE.bits() | DeviceFlags::BROADCAST.bits(),
            Self::PairedClient => {
                DeviceFlags::LOCAL.bits() | DeviceFlags::BROADCAST.bits() | DeviceFlags::PAIR.bits()
            }
        };
        DeviceFlags::from_bits(bits)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Virtual => "virtual",
            Self::Host => "host",
            Self::PairableHost => "pairable-host",
            Self::Broadcast => "broadcast",
            Self::Sniffer => "sniffer",
            Self::PairedClient => "paired-client",
        }
    }
}

impl fmt::Display for DriverRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identity of a device as carried in control packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerIdentity {
    pub address: u8,
    pub serial_number: u32,
    pub driver_class: u32,
}

impl PeerIdentity {
    /// Encoded size: address (1) + serial (4) + class (4).
    pub const ENCODED_LEN: usize = 9;

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.address);
        dst.put_u32_le(self.serial_number);
        dst.put_u32_le(self.driver_class);
    }

    pub fn decode(mut src: &[u8]) -> Option<Self> {
        if src.len() < Self::ENCODED_LEN {
            return None;
        }
        Some(Self {
            address: src.get_u8(),
            serial_number: src.get_u32_le(),
            driver_class: src.get_u32_le(),
        })
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} (class {})",
            self.serial_number, self.address, self.driver_class
        )
    }
}

/// Identity and state of one registry entry.
///
/// Role predicates derive entirely from flag combinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStatus {
    pub address: u8,
    pub rolling_counter: u8,
    pub flags: DeviceFlags,
    pub serial_number: u32,
    pub driver_class: u32,
}

impl DeviceStatus {
    pub fn new(role: DriverRole, driver_class: u32, serial_number: u32) -> Self {
        Self {
            address: 0,
            rolling_counter: 0,
            flags: role.flags(),
            serial_number,
            driver_class,
        }
    }

    /// The role encoded in the mode flags, if it is one of the supported combinations.
    pub fn role(&self) -> Option<DriverRole> {
        [
            DriverRole::Virtual,
            DriverRole::Host,
            DriverRole::PairableHost,
            DriverRole::Broadcast,
            DriverRole::Sniffer,
            DriverRole::PairedClient,
        ]
        .into_iter()
        .find(|role| role.flags() == self.flags.mode())
    }

    pub fn identity(&self) -> PeerIdentity {
        PeerIdentity {
            address: self.address,
            serial_number: self.serial_number,
            driver_class: self.driver_class,
        }
    }

    fn has(&self, flags: DeviceFlags) -> bool {
        self.flags.contains(flags)
    }

    pub fn is_local(&self) -> bool {
        self.has(DeviceFlags::LOCAL)
    }

    pub fn is_remote(&self) -> bool {
        self.has(DeviceFlags::REMOTE)
    }

    pub fn is_broadcast(&self) -> bool {
        self.has(DeviceFlags::BROADCAST)
    }

    pub fn is_pairable(&self) -> bool {
        self.has(DeviceFlags::PAIRABLE)
    }

    pub fn is_paired(&self) -> bool {
        self.has(DeviceFlags::PAIRED)
    }

    pub fn is_pairing(&self) -> bool {
        self.has(DeviceFlags::PAIRING)
    }

    pub fn is_initialised(&self) -> bool {
        self.has(DeviceFlags::INITIALISED)
    }

    pub fn is_initialising(&self) -> bool {
        self.has(DeviceFlags::INITIALISING)
    }

    pub fn is_cp_seen(&self) -> bool {
        self.has(DeviceFlags::CP_SEEN)
    }

    pub fn is_broadcast_map(&self) -> bool {
        self.has(DeviceFlags::BROADCAST_MAP)
    }

    /// Connected means the address is confirmed (local) or discovered (remote).
    pub fn is_connected(&self) -> bool {
        self.is_initialised()
    }

    /// Remote and not broadcast.
    pub fn is_virtual_driver(&self) -> bool {
        self.is_remote() && !self.is_broadcast()
    }

    /// Broadcast and pair.
    pub fn is_paired_driver(&self) -> bool {
        self.is_broadcast() && self.has(DeviceFlags::PAIR)
    }

    /// Local and not broadcast.
    pub fn is_host_driver(&self) -> bool {
        self.is_local() && !self.is_broadcast()
    }

    /// Local and pairable.
    pub fn is_pairable_host(&self) -> bool {
        self.is_local() && self.is_pairable()
    }

    /// Local and broadcast.
    pub fn is_broadcast_driver(&self) -> bool {
        self.is_local() && self.is_broadcast()
    }

    /// Remote and broadcast.
    pub fn is_sniffer_driver(&self) -> bool {
        self.is_remote() && self.is_broadcast()
    }

    /// True for drivers that may pair: pairable hosts and paired clients.
    pub fn can_pair(&self) -> bool {
        self.is_pairable_host() || self.is_paired_driver()
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "addr={} serial={} class={} flags={}",
            self.address, self.serial_number, self.driver_class, self.flags
        )
    }
}
