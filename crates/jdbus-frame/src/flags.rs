//! Flag bitsets carried by device status records and control packets.
//!
//! The two sets live in different namespaces: [`DeviceFlags`] describe a
//! driver's role and lifecycle on this node, [`ControlFlags`] travel inside
//! announce packets.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

macro_rules! flag_set {
    ($name:ident { $($(#[$doc:meta])* $flag:ident = $bits:expr,)* }) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name(u16);

        impl $name {
            /// No flags set.
            pub const NONE: Self = Self(0);
            $($(#[$doc])* pub const $flag: Self = Self($bits);)*

            const NAMES: &'static [(Self, &'static str)] = &[$((Self::$flag, stringify!($flag)),)*];

            /// Wrap raw bits.
            pub const fn from_bits(bits: u16) -> Self {
                Self(bits)
            }

            /// Get raw bits.
            pub const fn bits(self) -> u16 {
                self.0
            }

            /// True if every bit of `other` is set.
            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            /// True if any bit of `other` is set.
            pub const fn intersects(self, other: Self) -> bool {
                self.0 & other.0 != 0
            }

            /// Set the bits of `other`.
            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }

            /// Clear the bits of `other`.
            pub fn remove(&mut self, other: Self) {
                self.0 &= !other.0;
            }

            /// Names of the known flags that are set.
            pub fn names(self) -> Vec<&'static str> {
                Self::NAMES
                    .iter()
                    .filter(|(flag, _)| self.contains(*flag))
                    .map(|(_, name)| *name)
                    .collect()
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#06x}: {})", stringify!($name), self.0, self.names().join("|"))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.0 == 0 {
                    return f.write_str("-");
                }
                f.write_str(&self.names().join("|"))
            }
        }
    };
}

flag_set!(DeviceFlags {
    /// The driver owns and announces its own address.
    LOCAL = 0x8000,
    /// The driver tracks a peer's address discovered from control packets.
    REMOTE = 0x4000,
    /// The driver receives all traffic of its class.
    BROADCAST = 0x2000,
    /// The driver takes part in host/client pairing.
    PAIR = 0x1000,
    /// The driver accepts pairing requests.
    PAIRABLE = 0x0800,
    /// The driver is bonded to a partner.
    PAIRED = 0x0400,
    /// A pairing request is outstanding.
    PAIRING = 0x0200,
    /// Address confirmed and device connected.
    INITIALISED = 0x0080,
    /// Address drawn, waiting for conflicts.
    INITIALISING = 0x0040,
    /// Announce observed since the last tick.
    CP_SEEN = 0x0020,
    /// Passive bookkeeping entry created by a broadcast driver.
    BROADCAST_MAP = 0x0010,
});

impl DeviceFlags {
    /// Role bits; everything else is lifecycle state.
    pub const MODE_MASK: Self = Self(0xF000 | 0x0800);

    /// Only the role bits of this set.
    pub const fn mode(self) -> Self {
        Self(self.0 & Self::MODE_MASK.0)
    }
}

flag_set!(ControlFlags {
    /// Reserved for future use.
    RESERVED = 0x8000,
    /// The sender is negotiating a pairing.
    PAIRING_MODE = 0x4000,
    /// The sender accepts pairing requests.
    PAIRABLE = 0x2000,
    /// The sender is bonded to a partner.
    PAIRED = 0x1000,
    /// The address in this packet is already taken; the sender must back off.
    CONFLICT = 0x0800,
    /// The sender has not confirmed its address yet.
    UNCERTAIN = 0x0400,
    /// Pairing rejected.
    NACK = 0x0200,
    /// Pairing accepted.
    ACK = 0x0100,
});

impl ControlFlags {
    /// A packet is safe when its sender is neither negotiating an address nor a pairing.
    pub const fn is_safe(self) -> bool {
        !self.intersects(Self(Self::UNCERTAIN.0 | Self::PAIRING_MODE.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_remove_contains() {
        let mut flags = DeviceFlags::LOCAL | DeviceFlags::PAIRABLE;
        assert!(flags.contains(DeviceFlags::LOCAL));
        assert!(!flags.contains(DeviceFlags::LOCAL | DeviceFlags::BROADCAST));
        assert!(flags.intersects(DeviceFlags::LOCAL | DeviceFlags::BROADCAST));

        flags.insert(DeviceFlags::INITIALISED);
        flags.remove(DeviceFlags::PAIRABLE);
        assert_eq!(flags.bits(), 0x8080);
    }

    #[test]
    fn mode_keeps_role_bits_only() {
        let flags = DeviceFlags::LOCAL
            | DeviceFlags::PAIRABLE
            | DeviceFlags::INITIALISED
            | DeviceFlags::CP_SEEN;
        assert_eq!(flags.mode(), DeviceFlags::LOCAL | DeviceFlags::PAIRABLE);
    }

    #[test]
    fn safety_depends_on_uncertain_and_pairing_mode() {
        assert!(ControlFlags::PAIRED.is_safe());
        assert!(ControlFlags::NONE.is_safe());
        assert!(!ControlFlags::UNCERTAIN.is_safe());
        assert!(!(ControlFlags::PAIRABLE | ControlFlags::PAIRING_MODE).is_safe());
    }

    #[test]
    fn display_lists_names() {
        let flags = ControlFlags::PAIRABLE | ControlFlags::ACK;
        assert_eq!(flags.to_string(), "PAIRABLE|ACK");
        assert_eq!(ControlFlags::NONE.to_string(), "-");
        assert!(format!("{:?}", DeviceFlags::LOCAL).contains("0x8000"));
    }
}
