use std::time::Duration;

use crate::status::DriverRole;

/// Default registry capacity.
pub const DRIVER_ARRAY_SIZE: usize = 20;
/// Default period between announces.
pub const CTRLPACKET_TIME: Duration = Duration::from_millis(112);
/// Default time a drawn address must survive before it is confirmed.
pub const ADDRESS_ALLOC_TIME: Duration = Duration::from_millis(254);
/// Default silence after which a remote device is considered gone.
pub const DEVICE_TIMEOUT: Duration = Duration::from_millis(254);
/// Default capacity of the address filter.
pub const MAX_FILTERS: usize = 20;
/// Shortest period any ticker runs at; a zero period is raised to this.
pub const MIN_TICK: Duration = Duration::from_millis(1);

/// Configuration for one bus node.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Registry capacity, broadcast-map entries included.
    pub max_drivers: usize,
    /// Period of announces, allocation steps and staleness checks.
    pub tick_interval: Duration,
    /// Time a drawn address must survive before the driver is connected.
    pub address_alloc_time: Duration,
    /// Silence after which a remote device or pairing partner is removed.
    pub device_timeout: Duration,
    /// Maximum number of filtered addresses.
    pub max_filters: usize,
    /// Serial number of this node; default for local drivers.
    pub node_serial: u32,
    /// Class identity of the running program; default for drivers registered with class 0.
    pub node_class: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_drivers: DRIVER_ARRAY_SIZE,
            tick_interval: CTRLPACKET_TIME,
            address_alloc_time: ADDRESS_ALLOC_TIME,
            device_timeout: DEVICE_TIMEOUT,
            max_filters: MAX_FILTERS,
            node_serial: 0,
            node_class: 0,
        }
    }
}

impl BusConfig {
    pub fn with_serial(mut self, serial: u32) -> Self {
        self.node_serial = serial;
        self
    }

    pub fn with_class(mut self, class: u32) -> Self {
        self.node_class = class;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// The announce period actually used, never below [`MIN_TICK`].
    pub fn tick_period(&self) -> Duration {
        self.tick_interval.max(MIN_TICK)
    }

    /// Ticks an `Initialising` driver waits before it is connected.
    pub fn alloc_ticks(&self) -> u8 {
        ticks_for(self.address_alloc_time, self.tick_period())
    }

    /// Missed ticks after which an entry is removed.
    pub fn timeout_ticks(&self) -> u8 {
        ticks_for(self.device_timeout, self.tick_period())
    }
}

fn ticks_for(window: Duration, tick: Duration) -> u8 {
    let tick = tick.as_millis().max(1);
    let ticks = window.as_millis().div_ceil(tick).max(1);
    u8::try_from(ticks).unwrap_or(u8::MAX)
}

/// Configuration for streaming drivers.
#[derive(Debug, Clone)]
pub struct StreamingConfig {
    /// Interval used when a start request does not carry one.
    pub default_interval: Duration,
    /// Requested intervals are clamped to at least this.
    pub min_interval: Duration,
    /// An unchanged state is re-sent once this much time passed since the last send.
    pub max_silence: Duration,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            default_interval: Duration::from_millis(20),
            min_interval: Duration::from_millis(20),
            max_silence: Duration::from_millis(500),
        }
    }
}

impl StreamingConfig {
    /// Clamp a requested interval; zero selects the default. The result is
    /// never below [`MIN_TICK`].
    pub fn effective_interval(&self, requested: Duration) -> Duration {
        let interval = if requested.is_zero() {
            self.default_interval.max(self.min_interval)
        } else {
            requested.max(self.min_interval)
        };
        interval.max(MIN_TICK)
    }
}

/// How a driver is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverSpec {
    pub role: DriverRole,
    /// 0 selects [`BusConfig::node_class`].
    pub driver_class: u32,
    /// Local roles: own serial (default [`BusConfig::node_serial`]).
    /// Remote roles: the only serial this driver connects to.
    pub serial_number: Option<u32>,
    /// Local roles: address tried first during allocation.
    pub preferred_address: Option<u8>,
}

impl DriverSpec {
    pub fn new(role: DriverRole, driver_class: u32) -> Self {
        Self {
            role,
            driver_class,
            serial_number: None,
            preferred_address: None,
        }
    }

    pub fn with_serial(mut self, serial: u32) -> Self {
        self.serial_number = Some(serial);
        self
    }

    pub fn with_address(mut self, address: u8) -> Self {
        self.preferred_address = Some(address);
        self
    }
}
