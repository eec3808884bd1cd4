//! Fixed-capacity arena of drivers and broadcast-map entries.
//!
//! Entries are addressed by generation-checked handles, so a handle to a
//! removed entry never resolves to whatever reused its slot. Iteration follows
//! insertion order, which is the tie-break for remote discovery.

use std::fmt;

use crate::driver::Driver;
use crate::error::{ProtocolError, Result};
use crate::status::DeviceStatus;

/// Stable reference to a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DriverHandle {
    index: u16,
    generation: u16,
}

impl DriverHandle {
    pub(crate) fn new(index: u16, generation: u16) -> Self {
        Self { index, generation }
    }

    pub fn index(self) -> usize {
        self.index as usize
    }

    pub fn generation(self) -> u16 {
        self.generation
    }
}

impl fmt::Display for DriverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// A registered driver and its registration parameters.
pub struct DriverEntry {
    pub driver: Box<dyn Driver>,
    /// Serial restored when a remote driver is removed (0 = any).
    pub pinned_serial: u32,
    pub preferred_address: Option<u8>,
    /// Ticks since the pairing partner last announced.
    pub partner_missed: u8,
}

pub enum EntryKind {
    Driver(DriverEntry),
    /// Passive record of a device seen by a broadcast driver.
    BroadcastMap,
}

pub struct Entry {
    pub status: DeviceStatus,
    pub kind: EntryKind,
}

impl Entry {
    pub fn driver(&self) -> Option<&DriverEntry> {
        match &self.kind {
            EntryKind::Driver(entry) => Some(entry),
            EntryKind::BroadcastMap => None,
        }
    }

    pub fn is_broadcast_map(&self) -> bool {
        matches!(self.kind, EntryKind::BroadcastMap)
    }
}

struct Slot {
    generation: u16,
    entry: Option<Entry>,
}

pub struct Registry {
    slots: Vec<Slot>,
    order: Vec<u16>,
    capacity: usize,
}

impl Registry {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(u16::MAX as usize);
        Self {
            slots: Vec::with_capacity(capacity),
            order: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Store an entry in the first free slot and append it to the iteration order.
    pub fn insert(&mut self, entry: Entry) -> Result<DriverHandle> {
        if self.is_full() {
            return Err(ProtocolError::RegistryFull {
                capacity: self.capacity,
            });
        }

        let index = match self.slots.iter().position(|slot| slot.entry.is_none()) {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: None,
                });
                self.slots.len() - 1
            }
        };

        let slot = &mut self.slots[index];
        slot.entry = Some(entry);
        let index = index as u16;
        self.order.push(index);
        Ok(DriverHandle::new(index, slot.generation))
    }

    pub fn remove(&mut self, handle: DriverHandle) -> Option<Entry> {
        let slot = self.slots.get_mut(handle.index())?;
        if slot.generation != handle.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.order.retain(|&index| index != handle.index);
        Some(entry)
    }

    pub fn get(&self, handle: DriverHandle) -> Option<&Entry> {
        let slot = self.slots.get(handle.index())?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    pub fn get_mut(&mut self, handle: DriverHandle) -> Option<&mut Entry> {
        let slot = self.slots.get_mut(handle.index())?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entry.as_mut()
    }

    /// Handles in insertion order.
    pub fn handles(&self) -> Vec<DriverHandle> {
        self.order
            .iter()
            .map(|&index| DriverHandle::new(index, self.slots[index as usize].generation))
            .collect()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (DriverHandle, &Entry)> + '_ {
        self.order.iter().filter_map(move |&index| {
            let slot = &self.slots[index as usize];
            slot.entry
                .as_ref()
                .map(|entry| (DriverHandle::new(index, slot.generation), entry))
        })
    }

    /// First entry whose status matches.
    pub fn find(&self, mut predicate: impl FnMut(&DeviceStatus) -> bool) -> Option<DriverHandle> {
        self.iter()
            .find(|(_, entry)| predicate(&entry.status))
            .map(|(handle, _)| handle)
    }

    /// True if some entry already represents `(address, serial)`.
    pub fn represents(&self, address: u8, serial_number: u32) -> bool {
        self.find(|status| status.address == address && status.serial_number == serial_number)
            .is_some()
    }

    pub fn address_in_use(&self, address: u8) -> bool {
        self.find(|status| status.address == address).is_some()
    }
}
