//! Ordered, append-only log of reversible edits — the backbone of
//! savepoint/revert.

use ethrex_common::{Address, H256, U256, types::Account};
use rustc_hash::FxHashMap;

use crate::cache::StateCache;
use crate::error::{StateError, StateResult};
use crate::object::StateObject;

/// One reversible edit. Each variant carries exactly the prior state its
/// `revert` needs to undo itself; nothing is looked up on revert.
#[derive(Debug, Clone)]
pub enum JournalEntry {
    CreateObject {
        address: Address,
    },
    ResetObject {
        address: Address,
        prev_object: Box<StateObject>,
        prev_destruct: bool,
        prev_account_bytes: Option<Vec<u8>>,
        prev_storage_map: FxHashMap<H256, Vec<u8>>,
        prev_account_origin_existed: bool,
        prev_account_origin: Option<Vec<u8>>,
        prev_storage_origin: FxHashMap<H256, Vec<u8>>,
    },
    SelfDestruct {
        address: Address,
        prev_flag: bool,
        prev_balance: U256,
    },
    BalanceChange {
        address: Address,
        prev: U256,
    },
    NonceChange {
        address: Address,
        prev: u64,
    },
    CodeChange {
        address: Address,
        prev_hash: H256,
        prev_code: Option<bytes::Bytes>,
    },
    StorageChange {
        address: Address,
        slot: H256,
        prev: U256,
        prev_existed: bool,
    },
    TransientStorageChange {
        address: Address,
        slot: H256,
        prev: U256,
    },
    RefundChange {
        prev: u64,
    },
    AddLog {
        tx_hash: H256,
    },
    AddPreimage {
        hash: H256,
    },
    TouchChange {
        address: Address,
    },
    AccessListAddAccount {
        address: Address,
    },
    AccessListAddSlot {
        address: Address,
        slot: H256,
    },
}

impl JournalEntry {
    /// The address this entry touches, if any — used to build `dirties`.
    fn address(&self) -> Option<Address> {
        match self {
            JournalEntry::CreateObject { address }
            | JournalEntry::ResetObject { address, .. }
            | JournalEntry::SelfDestruct { address, .. }
            | JournalEntry::BalanceChange { address, .. }
            | JournalEntry::NonceChange { address, .. }
            | JournalEntry::CodeChange { address, .. }
            | JournalEntry::StorageChange { address, .. }
            | JournalEntry::TouchChange { address }
            | JournalEntry::AccessListAddAccount { address }
            | JournalEntry::AccessListAddSlot { address, .. } => Some(*address),
            JournalEntry::TransientStorageChange { .. }
            | JournalEntry::RefundChange { .. }
            | JournalEntry::AddLog { .. }
            | JournalEntry::AddPreimage { .. } => None,
        }
    }

    fn revert(self, cache: &mut StateCache) -> StateResult<()> {
        match self {
            JournalEntry::CreateObject { address } => {
                cache.state_objects.remove(&address);
            }
            JournalEntry::ResetObject {
                address,
                prev_object,
                prev_destruct,
                prev_account_bytes,
                prev_storage_map,
                prev_account_origin_existed,
                prev_account_origin,
                prev_storage_origin,
            } => {
                cache.state_objects.insert(address, *prev_object);
                if prev_destruct {
                    cache
                        .destruct_dirty
                        .entry(address)
                        .or_insert_with(|| cache.destruct.get(&address).cloned().unwrap_or(None));
                } else {
                    cache.destruct.remove(&address);
                    cache.destruct_dirty.remove(&address);
                }
                let addr_hash = crate::object::address_hash(address);
                match prev_account_bytes {
                    Some(bytes) => {
                        cache.accounts.insert(addr_hash, bytes);
                    }
                    None => {
                        cache.accounts.remove(&addr_hash);
                    }
                }
                if prev_storage_map.is_empty() {
                    cache.storages.remove(&addr_hash);
                } else {
                    cache.storages.insert(addr_hash, prev_storage_map);
                }
                if prev_account_origin_existed {
                    cache.accounts_origin.insert(address, prev_account_origin);
                } else {
                    cache.accounts_origin.remove(&address);
                }
                if prev_storage_origin.is_empty() {
                    cache.storages_origin.remove(&address);
                } else {
                    cache.storages_origin.insert(address, prev_storage_origin);
                }
            }
            JournalEntry::SelfDestruct {
                address,
                prev_flag,
                prev_balance,
            } => {
                if let Some(obj) = cache.state_objects.get_mut(&address) {
                    obj.self_destructed = prev_flag;
                    obj.data.balance = prev_balance;
                }
            }
            JournalEntry::BalanceChange { address, prev } => {
                if let Some(obj) = cache.state_objects.get_mut(&address) {
                    obj.data.balance = prev;
                }
            }
            JournalEntry::NonceChange { address, prev } => {
                if let Some(obj) = cache.state_objects.get_mut(&address) {
                    obj.data.nonce = prev;
                }
            }
            JournalEntry::CodeChange {
                address,
                prev_hash,
                prev_code,
            } => {
                if let Some(obj) = cache.state_objects.get_mut(&address) {
                    obj.data.code_hash = prev_hash;
                    obj.code = prev_code;
                    obj.dirty_code = false;
                }
            }
            JournalEntry::StorageChange {
                address,
                slot,
                prev,
                prev_existed,
            } => {
                if let Some(obj) = cache.state_objects.get_mut(&address) {
                    if prev_existed {
                        obj.dirty_storage.insert(slot, prev);
                    } else {
                        obj.dirty_storage.remove(&slot);
                    }
                }
            }
            JournalEntry::TransientStorageChange {
                address,
                slot,
                prev,
            } => {
                cache.transient_storage.set(address, slot, prev);
            }
            JournalEntry::RefundChange { prev } => {
                cache.refund = prev;
            }
            JournalEntry::AddLog { tx_hash } => {
                if let Some(logs) = cache.logs.get_mut(&tx_hash) {
                    logs.pop();
                }
            }
            JournalEntry::AddPreimage { hash } => {
                cache.preimages.remove(&hash);
            }
            JournalEntry::TouchChange { .. } => {}
            JournalEntry::AccessListAddAccount { address } => {
                cache.access_list.remove_address(address);
            }
            JournalEntry::AccessListAddSlot { address, slot } => {
                cache.access_list.remove_slot(address, slot);
            }
        }
        Ok(())
    }
}

/// `(revision id, journal length at the time of the snapshot)`.
#[derive(Debug, Clone, Copy)]
pub struct Revision {
    pub id: i32,
    pub journal_index: usize,
}

/// The append-only edit log plus the revision stack used to revert to an
/// earlier point in it.
#[derive(Debug, Default)]
pub struct Journal {
    entries: Vec<JournalEntry>,
    valid_revisions: Vec<Revision>,
    next_revision_id: i32,
    /// Multiset of addresses touched, consulted by `finalise` and by
    /// deep-copy logic.
    pub dirties: FxHashMap<Address, u32>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: JournalEntry) {
        if let Some(address) = entry.address() {
            *self.dirties.entry(address).or_insert(0) += 1;
        }
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&mut self) -> i32 {
        let id = self.next_revision_id;
        self.next_revision_id += 1;
        self.valid_revisions.push(Revision {
            id,
            journal_index: self.entries.len(),
        });
        id
    }

    /// Clears the journal and revision stack wholesale, e.g. at the start of
    /// a new transaction once `Finalise` has run.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.valid_revisions.clear();
        self.dirties.clear();
        self.next_revision_id = 0;
    }

    fn find_revision(&self, id: i32) -> Option<usize> {
        self.valid_revisions
            .binary_search_by_key(&id, |r| r.id)
            .ok()
    }
}

impl StateCache {
    /// Takes a savepoint and returns its id.
    pub fn snapshot(&mut self) -> i32 {
        self.journal.snapshot()
    }

    /// Reverts every mutation recorded since `revision_id` was taken.
    ///
    /// Reverting to an id not present in `valid_revisions` (including one
    /// already consumed by an earlier revert) is a programmer error.
    pub fn revert_to_snapshot(&mut self, revision_id: i32) -> StateResult<()> {
        let idx = self
            .journal
            .find_revision(revision_id)
            .ok_or(StateError::InvalidRevision(revision_id))?;
        let target_len = self.journal.valid_revisions[idx].journal_index;

        while self.journal.entries.len() > target_len {
            let Some(entry) = self.journal.entries.pop() else {
                break;
            };
            if let Some(address) = entry.address() {
                if let Some(count) = self.journal.dirties.get_mut(&address) {
                    *count = count.saturating_sub(1);
                }
            }
            entry.revert(self)?;
        }
        self.journal.valid_revisions.truncate(idx);
        Ok(())
    }
}
