use std::collections::BTreeSet;

use tracing::{debug, warn};

/// Addresses of devices paired with someone else; their announces are ignored.
#[derive(Debug, Clone)]
pub struct AddressFilter {
    addresses: BTreeSet<u8>,
    capacity: usize,
}

impl AddressFilter {
    pub fn new(capacity: usize) -> Self {
        Self {
            addresses: BTreeSet::new(),
            capacity,
        }
    }

    /// Add an address. Returns false when the filter is full.
    pub fn add(&mut self, address: u8) -> bool {
        if address == 0 {
            return false;
        }
        if self.addresses.contains(&address) {
            return true;
        }
        if self.addresses.len() >= self.capacity {
            warn!(address, capacity = self.capacity, "address filter full");
            return false;
        }
        self.addresses.insert(address);
        debug!(address, "address filtered");
        true
    }

    /// Remove an address. Removing a non-member is a no-op.
    pub fn remove(&mut self, address: u8) {
        if self.addresses.remove(&address) {
            debug!(address, "address unfiltered");
        }
    }

    /// The logic address is never filtered.
    pub fn contains(&self, address: u8) -> bool {
        address > 0 && self.addresses.contains(&address)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.addresses.iter().copied()
    }
}
