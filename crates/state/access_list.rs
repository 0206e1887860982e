//! Warm-address/warm-slot set, per-transaction (EIP-2929).

use ethrex_common::{Address, H256};
use rustc_hash::{FxHashMap, FxHashSet};

#[derive(Debug, Default, Clone)]
pub struct AccessList {
    addresses: FxHashSet<Address>,
    slots: FxHashMap<Address, FxHashSet<H256>>,
}

impl AccessList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.addresses.clear();
        self.slots.clear();
    }

    pub fn contains_address(&self, address: Address) -> bool {
        self.addresses.contains(&address)
    }

    pub fn contains_slot(&self, address: Address, slot: H256) -> bool {
        self.slots
            .get(&address)
            .map(|set| set.contains(&slot))
            .unwrap_or(false)
    }

    /// Returns whether the address was newly added.
    pub fn add_address(&mut self, address: Address) -> bool {
        self.addresses.insert(address)
    }

    /// Returns `(address_was_new, slot_was_new)`. Adding a slot implicitly
    /// warms its address.
    pub fn add_slot(&mut self, address: Address, slot: H256) -> (bool, bool) {
        let address_was_new = self.addresses.insert(address);
        let slot_was_new = self.slots.entry(address).or_default().insert(slot);
        (address_was_new, slot_was_new)
    }

    pub fn remove_address(&mut self, address: Address) {
        self.addresses.remove(&address);
    }

    pub fn remove_slot(&mut self, address: Address, slot: H256) {
        if let Some(set) = self.slots.get_mut(&address) {
            set.remove(&slot);
        }
    }

    /// O(n) deep copy, independent of `self`.
    pub fn deep_copy(&self) -> Self {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adding_a_slot_warms_its_address() {
        let mut list = AccessList::new();
        let addr = Address::from_low_u64_be(1);
        let slot = H256::from_low_u64_be(2);

        let (addr_new, slot_new) = list.add_slot(addr, slot);
        assert!(addr_new);
        assert!(slot_new);
        assert!(list.contains_address(addr));
        assert!(list.contains_slot(addr, slot));

        let (addr_new_again, slot_new_again) = list.add_slot(addr, slot);
        assert!(!addr_new_again);
        assert!(!slot_new_again);
    }

    #[test]
    fn deep_copy_is_independent() {
        let mut list = AccessList::new();
        let addr = Address::from_low_u64_be(1);
        list.add_address(addr);

        let copy = list.deep_copy();
        list.remove_address(addr);

        assert!(!list.contains_address(addr));
        assert!(copy.contains_address(addr));
    }
}
