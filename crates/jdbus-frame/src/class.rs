//! Well-known driver class identifiers.
//!
//! Classes 0-255 are reserved for built-in drivers. Application drivers
//! normally use a program hash, which lands well outside that range.

/// The logic driver (address 0) and control traffic.
pub const CONTROL: u32 = 0;

/// Arcade controller buttons.
pub const ARCADE: u32 = 1;

/// Analog joystick.
pub const JOYSTICK: u32 = 2;

/// Message bus event forwarding.
pub const MESSAGE_BUS: u32 = 3;

/// Radio bridge.
pub const RADIO: u32 = 4;

/// Bus bridge.
pub const BRIDGE: u32 = 5;

/// Single button.
pub const BUTTON: u32 = 6;

/// Remote pin control.
pub const PIN: u32 = 7;

/// Reliability tester.
pub const RELIABILITY_TESTER: u32 = 8;

/// Console log forwarding.
pub const LOGGER: u32 = 9;

/// Returns a human-readable name for a driver class.
pub fn class_name(class: u32) -> &'static str {
    match class {
        CONTROL => "CONTROL",
        ARCADE => "ARCADE",
        JOYSTICK => "JOYSTICK",
        MESSAGE_BUS => "MESSAGE_BUS",
        RADIO => "RADIO",
        BRIDGE => "BRIDGE",
        BUTTON => "BUTTON",
        PIN => "PIN",
        RELIABILITY_TESTER => "RELIABILITY_TESTER",
        LOGGER => "LOGGER",
        10..=255 => "RESERVED",
        _ => "PROGRAM",
    }
}

/// Returns true if the class is in the reserved range.
pub fn is_reserved(class: u32) -> bool {
    class < 256
}
