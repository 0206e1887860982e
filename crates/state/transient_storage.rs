//! Per-transaction key/value scratch space, cleared between transactions
//! (EIP-1153).

use ethrex_common::{Address, H256, U256};
use rustc_hash::FxHashMap;

#[derive(Debug, Default, Clone)]
pub struct TransientStorage {
    slots: FxHashMap<Address, FxHashMap<H256, U256>>,
}

impl TransientStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, address: Address, slot: H256) -> U256 {
        self.slots
            .get(&address)
            .and_then(|m| m.get(&slot))
            .copied()
            .unwrap_or(U256::zero())
    }

    /// Setting the zero value is still a write: the journal is what
    /// distinguishes "set to zero" from "never touched".
    pub fn set(&mut self, address: Address, slot: H256, value: U256) {
        self.slots.entry(address).or_default().insert(slot, value);
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    pub fn deep_copy(&self) -> Self {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_slot_reads_zero() {
        let storage = TransientStorage::new();
        assert_eq!(
            storage.get(Address::zero(), H256::zero()),
            U256::zero()
        );
    }

    #[test]
    fn cleared_wholesale() {
        let mut storage = TransientStorage::new();
        storage.set(Address::zero(), H256::zero(), U256::from(5));
        storage.clear();
        assert_eq!(storage.get(Address::zero(), H256::zero()), U256::zero());
    }
}
