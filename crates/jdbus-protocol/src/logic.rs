//! The logic driver: address allocation, conflict arbitration, remote
//! discovery and packet routing for one node.
//!
//! The logic driver sits at address 0 and owns the registry. It is the only
//! place where driver addresses and lifecycle flags change. Nothing here
//! returns an error for bus traffic: malformed frames are logged and dropped,
//! every decision is a flag mutation plus a queued [`BusEvent`].

use jdbus_frame::{
    decode_packet, ControlFlags, ControlPacket, ControlPacketType, DeviceFlags, Packet,
};
use jdbus_transport::PacketSink;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, trace, warn};

use crate::config::{BusConfig, DriverSpec};
use crate::driver::{Driver, DriverContext};
use crate::error::{ProtocolError, Result};
use crate::event::{BusEvent, EventKind};
use crate::filter::AddressFilter;
use crate::registry::{DriverEntry, DriverHandle, Entry, EntryKind, Registry};
use crate::status::{DeviceStatus, DriverRole};

const MAX_ADDRESS: u8 = 254;

pub struct LogicDriver {
    config: BusConfig,
    registry: Registry,
    filter: AddressFilter,
    sink: PacketSink,
    rng: StdRng,
    events: Vec<BusEvent>,
}

impl LogicDriver {
    pub fn new(config: BusConfig, sink: PacketSink) -> Self {
        Self {
            registry: Registry::new(config.max_drivers),
            filter: AddressFilter::new(config.max_filters),
            rng: StdRng::seed_from_u64(u64::from(config.node_serial)),
            config,
            sink,
            events: Vec::new(),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn sink(&self) -> &PacketSink {
        &self.sink
    }

    pub fn filter(&self) -> &AddressFilter {
        &self.filter
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Add a driver. Local roles get an address on the next ticks; remote
    /// roles wait for a matching announce.
    pub fn register(&mut self, spec: DriverSpec, driver: Box<dyn Driver>) -> Result<DriverHandle> {
        let driver_class = match spec.driver_class {
            0 => self.config.node_class,
            class => class,
        };
        let local = spec.role.flags().contains(DeviceFlags::LOCAL);
        let serial = match (local, spec.serial_number) {
            (_, Some(serial)) => serial,
            (true, None) => self.config.node_serial,
            (false, None) => 0,
        };

        let mut status = DeviceStatus::new(spec.role, driver_class, serial);
        // Sniffers are never enumerated; they listen from the start.
        if spec.role == DriverRole::Sniffer {
            status.flags.insert(DeviceFlags::INITIALISED);
        }

        let name = driver.name().to_string();
        let handle = self.registry.insert(Entry {
            status,
            kind: EntryKind::Driver(DriverEntry {
                driver,
                pinned_serial: if local { 0 } else { serial },
                preferred_address: spec.preferred_address,
                partner_missed: 0,
            }),
        })?;

        info!(
            %handle,
            role = %spec.role,
            driver_class,
            serial,
            name = name.as_str(),
            "driver registered"
        );
        Ok(handle)
    }

    /// Remove a driver. A connected driver sees `device_removed` first.
    pub fn unregister(&mut self, handle: DriverHandle) -> Result<()> {
        let mut entry = self
            .registry
            .remove(handle)
            .ok_or(ProtocolError::UnknownDriver(handle))?;

        if let EntryKind::Driver(mut driver) = entry.kind {
            if entry.status.is_connected() {
                let mut ctx =
                    DriverContext::new(handle, &mut entry.status, &self.sink, &mut self.events);
                ctx.emit(EventKind::Removed);
                driver.driver.device_removed(&mut ctx);
            }
        }
        info!(%handle, "driver unregistered");
        Ok(())
    }

    pub fn status(&self, handle: DriverHandle) -> Option<DeviceStatus> {
        self.registry.get(handle).map(|entry| entry.status)
    }

    /// Status of every entry in registry order, broadcast maps included.
    pub fn snapshot(&self) -> Vec<(DriverHandle, DeviceStatus)> {
        self.registry
            .iter()
            .map(|(handle, entry)| (handle, entry.status))
            .collect()
    }

    /// Events queued since the last drain.
    pub fn drain_events(&mut self) -> Vec<BusEvent> {
        std::mem::take(&mut self.events)
    }

    /// Decode and process one received wire frame.
    pub fn handle_frame(&mut self, frame: &[u8]) {
        match decode_packet(frame) {
            Ok(packet) => self.handle_packet(&packet),
            Err(err) => warn!(len = frame.len(), %err, "dropping malformed frame"),
        }
    }

    pub fn handle_packet(&mut self, packet: &Packet) {
        if !packet.is_control() {
            self.route_data(packet);
            return;
        }
        match ControlPacket::from_packet(packet) {
            Ok(cp) => self.handle_control_packet(&cp),
            Err(err) => debug!(%err, "dropping control packet"),
        }
    }

    pub fn handle_control_packet(&mut self, cp: &ControlPacket) {
        trace!(
            packet_type = cp.packet_type.as_u8(),
            address = cp.address,
            serial = cp.serial_number,
            driver_class = cp.driver_class,
            flags = %cp.flags,
            "control packet"
        );
        match cp.packet_type {
            ControlPacketType::Hello => self.arbitrate(cp),
            ControlPacketType::PairingRequest => self.route_pairing(cp),
            ControlPacketType::Unknown(kind) => trace!(packet_type = kind, "ignoring control packet"),
        }
    }

    fn arbitrate(&mut self, cp: &ControlPacket) {
        let safe = cp.flags.is_safe();
        let mut handled = false;
        // An entry already represents this device; it must not be discovered again.
        let mut claimed = false;

        self.note_partner(cp);

        for handle in self.registry.handles() {
            let Some(entry) = self.registry.get(handle) else {
                continue;
            };
            if entry.is_broadcast_map() {
                continue;
            }
            let status = entry.status;

            if status.is_local() && status.address != 0 && status.address == cp.address {
                if status.serial_number != cp.serial_number
                    && !cp.flags.contains(ControlFlags::CONFLICT)
                {
                    if status.is_initialised() && cp.flags.contains(ControlFlags::UNCERTAIN) {
                        debug!(
                            %handle,
                            address = cp.address,
                            serial = cp.serial_number,
                            "uncertain peer claims our address; flagging conflict"
                        );
                        let mut echo = cp.clone();
                        echo.flags |= ControlFlags::CONFLICT;
                        self.send_control(&echo);
                    } else {
                        debug!(
                            %handle,
                            address = cp.address,
                            serial = cp.serial_number,
                            "address taken by peer; releasing"
                        );
                        self.release_address(handle);
                    }
                    return;
                }
                if cp.flags.contains(ControlFlags::CONFLICT) {
                    debug!(%handle, address = cp.address, "conflict flagged on our address");
                    self.release_address(handle);
                    return;
                }

                claimed = true;
                self.mark_seen(handle);
                handled |= self.deliver_control(handle, cp) && safe;
                continue;
            }

            if status.is_virtual_driver()
                && status.is_connected()
                && status.serial_number == cp.serial_number
                && status.driver_class == cp.driver_class
            {
                claimed = true;
                if status.address != cp.address {
                    debug!(%handle, from = status.address, to = cp.address, "remote moved");
                }
                if let Some(entry) = self.registry.get_mut(handle) {
                    entry.status.address = cp.address;
                    entry.status.flags.insert(DeviceFlags::CP_SEEN);
                }
                handled |= self.deliver_control(handle, cp) && safe;
                continue;
            }

            if status.is_broadcast() && status.driver_class == cp.driver_class {
                if status.is_connected() && !cp.flags.contains(ControlFlags::UNCERTAIN) {
                    self.map_broadcast(cp);
                }
                handled |= self.deliver_control(handle, cp) && safe;
                continue;
            }

            // Pairable hosts watch same-class peers to start or keep a bond.
            if safe
                && status.can_pair()
                && status.is_connected()
                && status.driver_class == cp.driver_class
                && status.address != cp.address
            {
                handled |= self.deliver_control(handle, cp);
            }
        }

        if handled || !safe {
            return;
        }

        // Only the announce that adds an address to the filter stops here;
        // later announces from a filtered address still reach discovery.
        let paired = cp.flags.contains(ControlFlags::PAIRED);
        let filtered = self.filter.contains(cp.address);
        if !filtered && paired {
            self.filter.add(cp.address);
            return;
        }
        if filtered && !paired {
            self.filter.remove(cp.address);
        }

        if claimed {
            return;
        }

        let found = self.registry.find(|status| {
            status.is_virtual_driver()
                && !status.is_connected()
                && status.driver_class == cp.driver_class
                && (status.serial_number == 0 || status.serial_number == cp.serial_number)
        });
        if let Some(handle) = found {
            self.connect_remote(handle, cp);
        }
    }

    fn route_pairing(&mut self, cp: &ControlPacket) {
        let target = self.registry.find(|status| {
            status.is_local()
                && status.address != 0
                && status.address == cp.address
                && status.serial_number == cp.serial_number
        });
        match target {
            Some(handle) => {
                let handled = self.deliver_control(handle, cp);
                trace!(%handle, handled, response = cp.is_pairing_response(), "pairing packet");
            }
            None => trace!(address = cp.address, "pairing packet for another device"),
        }
    }

    fn route_data(&mut self, packet: &Packet) {
        let source = packet.address;
        let classes: Vec<u32> = self
            .registry
            .iter()
            .filter(|(_, entry)| {
                entry.status.address == source
                    && entry.status.is_connected()
                    && !entry.status.is_local()
            })
            .map(|(_, entry)| entry.status.driver_class)
            .collect();

        for handle in self.registry.handles() {
            let Some(entry) = self.registry.get(handle) else {
                continue;
            };
            let Some(driver) = entry.driver() else {
                continue;
            };
            let status = entry.status;

            let direct = status.is_connected() && status.address == source;
            // A peer that has not acknowledged yet sends nothing to us.
            let partner = status.is_paired()
                && driver
                    .driver
                    .partner()
                    .is_some_and(|partner| partner.address == source);
            let class = status.is_broadcast()
                && status.is_connected()
                && classes.contains(&status.driver_class);

            if direct || partner || class {
                let handled = self
                    .with_driver(handle, |driver, ctx| driver.handle_packet(ctx, packet))
                    .unwrap_or(false);
                trace!(%handle, address = source, handled, "data packet routed");
            }
        }
    }

    /// One scheduler tick: allocate addresses, announce local drivers, sweep
    /// silent remotes and watch pairing partners.
    pub fn tick(&mut self) {
        let alloc_ticks = self.config.alloc_ticks();
        let timeout_ticks = self.config.timeout_ticks();

        for handle in self.registry.handles() {
            let Some(entry) = self.registry.get(handle) else {
                continue;
            };
            if entry.is_broadcast_map() {
                self.sweep(handle, timeout_ticks);
                continue;
            }
            let status = entry.status;

            if status.is_local() {
                if status.address == 0 {
                    self.allocate(handle);
                } else if status.is_initialising() {
                    let confirmed = match self.registry.get_mut(handle) {
                        Some(entry) => {
                            entry.status.rolling_counter =
                                entry.status.rolling_counter.saturating_add(1);
                            entry.status.rolling_counter >= alloc_ticks
                        }
                        None => false,
                    };
                    if confirmed {
                        self.confirm_address(handle);
                    }
                }
                self.announce(handle);
            } else if status.is_virtual_driver() && status.is_connected() {
                self.sweep(handle, timeout_ticks);
            }

            self.check_partner(handle, timeout_ticks);
        }
    }

    fn allocate(&mut self, handle: DriverHandle) {
        let preferred = match self.registry.get_mut(handle).map(|entry| &mut entry.kind) {
            // Only the first allocation honours the preference; after a lost
            // conflict the address is known to be taken.
            Some(EntryKind::Driver(driver)) => driver.preferred_address.take(),
            _ => None,
        };
        let address = preferred
            .filter(|&address| {
                (1..=MAX_ADDRESS).contains(&address) && !self.registry.address_in_use(address)
            })
            .or_else(|| self.draw_address());

        let Some(address) = address else {
            warn!(%handle, "no free address left");
            return;
        };
        if let Some(entry) = self.registry.get_mut(handle) {
            entry.status.address = address;
            entry.status.rolling_counter = 0;
            entry.status.flags.remove(DeviceFlags::INITIALISED);
            entry.status.flags.insert(DeviceFlags::INITIALISING);
        }
        debug!(%handle, address, "address drawn");
        self.push_event(handle, EventKind::AddressAssigned(address));
    }

    fn draw_address(&mut self) -> Option<u8> {
        let free: Vec<u8> = (1..=MAX_ADDRESS)
            .filter(|&address| !self.registry.address_in_use(address))
            .collect();
        if free.is_empty() {
            return None;
        }
        Some(free[self.rng.gen_range(0..free.len())])
    }

    fn confirm_address(&mut self, handle: DriverHandle) {
        let Some(entry) = self.registry.get_mut(handle) else {
            return;
        };
        entry.status.flags.remove(DeviceFlags::INITIALISING);
        entry.status.flags.insert(DeviceFlags::INITIALISED);
        entry.status.rolling_counter = 0;
        let address = entry.status.address;

        info!(%handle, address, "address confirmed");
        self.push_event(handle, EventKind::Connected { address });
        self.with_driver(handle, |driver, ctx| driver.device_connected(ctx));
    }

    fn announce(&mut self, handle: DriverHandle) {
        let Some(entry) = self.registry.get_mut(handle) else {
            return;
        };
        let status = entry.status;
        if status.address == 0 {
            return;
        }

        let mut cp = ControlPacket::hello(status.address, status.driver_class, status.serial_number);
        if status.is_pairing() {
            cp.flags |= ControlFlags::PAIRING_MODE;
        }
        if status.is_paired() {
            cp.flags |= ControlFlags::PAIRED;
        }
        if status.is_pairable() {
            cp.flags |= ControlFlags::PAIRABLE;
        }
        if status.is_initialising() {
            cp.flags |= ControlFlags::UNCERTAIN;
        }
        if let EntryKind::Driver(driver) = &mut entry.kind {
            driver.driver.fill_control_packet(&status, &mut cp);
        }
        self.send_control(&cp);
    }

    fn sweep(&mut self, handle: DriverHandle, timeout_ticks: u8) {
        let Some(entry) = self.registry.get_mut(handle) else {
            return;
        };
        let status = &mut entry.status;
        if status.is_cp_seen() {
            status.flags.remove(DeviceFlags::CP_SEEN);
            status.rolling_counter = 0;
            return;
        }
        status.rolling_counter = status.rolling_counter.saturating_add(1);
        if status.rolling_counter < timeout_ticks {
            return;
        }

        if entry.is_broadcast_map() {
            let address = entry.status.address;
            self.registry.remove(handle);
            debug!(%handle, address, "broadcast map expired");
            return;
        }

        let pinned = match &entry.kind {
            EntryKind::Driver(driver) => driver.pinned_serial,
            EntryKind::BroadcastMap => 0,
        };
        let address = entry.status.address;
        entry.status.address = 0;
        entry.status.flags = entry.status.flags.mode();
        entry.status.serial_number = pinned;
        entry.status.rolling_counter = 0;

        info!(%handle, address, "remote device timed out");
        self.fire_removed(handle);
    }

    fn check_partner(&mut self, handle: DriverHandle, timeout_ticks: u8) {
        let Some(Entry {
            kind: EntryKind::Driver(driver),
            ..
        }) = self.registry.get_mut(handle)
        else {
            return;
        };
        if driver.driver.partner().is_none() {
            driver.partner_missed = 0;
            return;
        }
        driver.partner_missed = driver.partner_missed.saturating_add(1);
        if driver.partner_missed <= timeout_ticks {
            return;
        }
        driver.partner_missed = 0;

        info!(%handle, "pairing partner went silent");
        self.with_driver(handle, |driver, ctx| driver.partner_lost(ctx));
    }

    fn note_partner(&mut self, cp: &ControlPacket) {
        for handle in self.registry.handles() {
            if let Some(Entry {
                kind: EntryKind::Driver(driver),
                ..
            }) = self.registry.get_mut(handle)
            {
                let seen = driver.driver.partner().is_some_and(|partner| {
                    partner.serial_number == cp.serial_number
                        && partner.driver_class == cp.driver_class
                });
                if seen {
                    driver.partner_missed = 0;
                }
            }
        }
    }

    fn map_broadcast(&mut self, cp: &ControlPacket) {
        if let Some(existing) = self.registry.find(|status| {
            status.address == cp.address && status.serial_number == cp.serial_number
        }) {
            if let Some(entry) = self.registry.get_mut(existing) {
                if entry.is_broadcast_map() {
                    entry.status.flags.insert(DeviceFlags::CP_SEEN);
                }
            }
            return;
        }

        let status = DeviceStatus {
            address: cp.address,
            rolling_counter: 0,
            flags: DeviceFlags::BROADCAST_MAP | DeviceFlags::INITIALISED | DeviceFlags::CP_SEEN,
            serial_number: cp.serial_number,
            driver_class: cp.driver_class,
        };
        match self.registry.insert(Entry {
            status,
            kind: EntryKind::BroadcastMap,
        }) {
            Ok(handle) => debug!(
                %handle,
                address = cp.address,
                serial = cp.serial_number,
                driver_class = cp.driver_class,
                "broadcast device mapped"
            ),
            Err(err) => warn!(address = cp.address, %err, "cannot map broadcast device"),
        }
    }

    fn connect_remote(&mut self, handle: DriverHandle, cp: &ControlPacket) {
        let Some(entry) = self.registry.get_mut(handle) else {
            return;
        };
        entry.status.address = cp.address;
        entry.status.serial_number = cp.serial_number;
        entry.status.rolling_counter = 0;
        entry
            .status
            .flags
            .insert(DeviceFlags::INITIALISED | DeviceFlags::CP_SEEN);

        info!(
            %handle,
            address = cp.address,
            serial = cp.serial_number,
            driver_class = cp.driver_class,
            "remote device connected"
        );
        self.push_event(handle, EventKind::Connected {
            address: cp.address,
        });
        self.with_driver(handle, |driver, ctx| {
            driver.device_connected(ctx);
            driver.handle_control_packet(ctx, cp);
        });
    }

    /// Give up a local driver's address; it draws a new one next tick.
    fn release_address(&mut self, handle: DriverHandle) {
        let Some(entry) = self.registry.get_mut(handle) else {
            return;
        };
        let address = entry.status.address;
        let was_connected = entry.status.is_connected();
        entry.status.address = 0;
        entry.status.rolling_counter = 0;
        entry.status.flags.remove(
            DeviceFlags::INITIALISED | DeviceFlags::INITIALISING | DeviceFlags::CP_SEEN,
        );

        info!(%handle, address, "address lost to conflict");
        self.push_event(handle, EventKind::AddressConflict { address });
        if was_connected {
            self.fire_removed(handle);
        }
    }

    fn fire_removed(&mut self, handle: DriverHandle) {
        self.push_event(handle, EventKind::Removed);
        self.with_driver(handle, |driver, ctx| driver.device_removed(ctx));
    }

    fn mark_seen(&mut self, handle: DriverHandle) {
        if let Some(entry) = self.registry.get_mut(handle) {
            entry.status.flags.insert(DeviceFlags::CP_SEEN);
        }
    }

    fn deliver_control(&mut self, handle: DriverHandle, cp: &ControlPacket) -> bool {
        self.with_driver(handle, |driver, ctx| driver.handle_control_packet(ctx, cp))
            .unwrap_or(false)
    }

    fn with_driver<R>(
        &mut self,
        handle: DriverHandle,
        f: impl FnOnce(&mut dyn Driver, &mut DriverContext<'_>) -> R,
    ) -> Option<R> {
        let Entry { status, kind } = self.registry.get_mut(handle)?;
        let EntryKind::Driver(entry) = kind else {
            return None;
        };
        let mut ctx = DriverContext::new(handle, status, &self.sink, &mut self.events);
        Some(f(entry.driver.as_mut(), &mut ctx))
    }

    fn push_event(&mut self, handle: DriverHandle, kind: EventKind) {
        self.events.push(BusEvent { handle, kind });
    }

    fn send_control(&self, cp: &ControlPacket) {
        let result = cp
            .to_packet()
            .map_err(ProtocolError::from)
            .and_then(|packet| self.sink.send(packet.to_bytes()).map_err(ProtocolError::from));
        if let Err(err) = result {
            warn!(%err, address = cp.address, "failed to send control packet");
        }
    }
}
