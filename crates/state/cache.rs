//! The top-level coordinator: owns live `StateObject`s, the block-scope
//! write buffers, the journal, and orchestrates Finalise → IntermediateRoot
//! → Commit.

use std::sync::{Arc, Mutex};

use ethrex_common::{Address, H256, U256, types::Account};
use ethrex_threadpool::ThreadPool;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

use crate::access_list::AccessList;
use crate::error::{StateError, StateResult};
use crate::journal::{Journal, JournalEntry};
use crate::object::{StateObject, StorageSource, address_hash};
use crate::traits::{
    AccessKind, Database, MVStates, NodeSet, Prefetcher, Scheme, Snapshot, SnapshotTree, Trie,
    TrieState,
};
use crate::transient_storage::TransientStorage;

/// Byte budget for wiping a single account's storage trie in one block.
/// Exceeding it aborts the deletion and marks it `incomplete`.
pub const STORAGE_DELETE_LIMIT: usize = 512 * 1024 * 1024;

/// How many diff layers the snapshot tree is allowed to stack before it
/// must flatten into the disk layer.
pub const SNAPSHOT_LAYER_CAP: usize = 128;

/// A raw log record; this crate treats log contents as opaque bytes — only
/// their count and tx association matter for journal undo.
pub type Log = Vec<u8>;

/// The state cache. Generic over its backing-store collaborators via the
/// `Database`/`SnapshotTree`/`MVStates` traits so it never depends on a
/// concrete trie or disk implementation.
pub struct StateCache {
    pub(crate) accounts: FxHashMap<H256, Vec<u8>>,
    pub(crate) storages: FxHashMap<H256, FxHashMap<H256, Vec<u8>>>,
    pub(crate) accounts_origin: FxHashMap<Address, Option<Vec<u8>>>,
    pub(crate) storages_origin: FxHashMap<Address, FxHashMap<H256, Vec<u8>>>,

    pub(crate) state_objects: FxHashMap<Address, StateObject>,
    pending: FxHashSet<Address>,
    dirty: FxHashSet<Address>,

    pub(crate) destruct: FxHashMap<Address, Option<Account>>,
    pub(crate) destruct_dirty: FxHashMap<Address, Option<Account>>,

    pub(crate) journal: Journal,

    pub(crate) refund: u64,
    tx_hash: H256,
    tx_index: usize,
    pub(crate) logs: FxHashMap<H256, Vec<Log>>,
    pub(crate) preimages: FxHashMap<H256, Vec<u8>>,

    pub(crate) access_list: AccessList,
    pub(crate) transient_storage: TransientStorage,

    db_error: Option<StateError>,

    db: Arc<dyn Database>,
    snapshot_tree: Option<Arc<dyn SnapshotTree>>,
    snapshot: Option<Arc<dyn Snapshot>>,
    account_trie: Box<dyn Trie>,
    original_root: H256,

    mvstates: Option<Arc<dyn MVStates>>,
    prefetcher: Option<Box<dyn Prefetcher>>,
    worker_count: usize,
}

impl StateCache {
    pub fn new(
        db: Arc<dyn Database>,
        snapshot_tree: Option<Arc<dyn SnapshotTree>>,
        root: H256,
        worker_count: usize,
    ) -> StateResult<Self> {
        let account_trie = db.open_trie(root)?;
        let snapshot = snapshot_tree.as_ref().and_then(|tree| tree.snapshot(root));
        Ok(StateCache {
            accounts: FxHashMap::default(),
            storages: FxHashMap::default(),
            accounts_origin: FxHashMap::default(),
            storages_origin: FxHashMap::default(),
            state_objects: FxHashMap::default(),
            pending: FxHashSet::default(),
            dirty: FxHashSet::default(),
            destruct: FxHashMap::default(),
            destruct_dirty: FxHashMap::default(),
            journal: Journal::new(),
            refund: 0,
            tx_hash: H256::zero(),
            tx_index: 0,
            logs: FxHashMap::default(),
            preimages: FxHashMap::default(),
            access_list: AccessList::new(),
            transient_storage: TransientStorage::new(),
            db_error: None,
            db,
            snapshot_tree,
            snapshot,
            account_trie,
            original_root: root,
            mvstates: None,
            prefetcher: None,
            worker_count: worker_count.max(1),
        })
    }

    pub fn with_mvstates(mut self, mvstates: Arc<dyn MVStates>) -> Self {
        self.mvstates = Some(mvstates);
        self
    }

    pub fn with_prefetcher(mut self, prefetcher: Box<dyn Prefetcher>) -> Self {
        self.prefetcher = Some(prefetcher);
        self
    }

    pub fn db_error(&self) -> Option<&StateError> {
        self.db_error.as_ref()
    }

    fn memoize_error(&mut self, err: StateError) {
        if self.db_error.is_none() {
            self.db_error = Some(err);
        }
    }

    // ---------------------------------------------------------------
    // Read path
    // ---------------------------------------------------------------

    fn is_resurrected(&self, address: Address) -> bool {
        matches!(self.destruct.get(&address), Some(Some(_)))
            || matches!(self.destruct_dirty.get(&address), Some(Some(_)))
    }

    /// Canonical lookup: live objects → snapshot → trie. Returns whether the
    /// object exists (including `deleted = true` objects).
    pub fn get_or_load(&mut self, address: Address) -> bool {
        if self.state_objects.contains_key(&address) {
            return true;
        }

        let addr_hash = address_hash(address);

        if let Some(snapshot) = self.snapshot.clone() {
            match snapshot.account(addr_hash) {
                Ok(Some(slim)) => {
                    let account: Account = slim.into();
                    self.state_objects
                        .insert(address, StateObject::from_origin(address, account));
                    return true;
                }
                Ok(None) => return false,
                Err(err) => {
                    self.memoize_error(err);
                    // fall through to the trie
                }
            }
        }

        match self.account_trie.get(addr_hash) {
            Ok(Some(bytes)) => match Account::decode_slim(&bytes) {
                Ok(account) => {
                    self.state_objects
                        .insert(address, StateObject::from_origin(address, account));
                    true
                }
                Err(err) => {
                    self.memoize_error(StateError::TrieMutation(err.to_string()));
                    false
                }
            },
            Ok(None) => false,
            Err(err) => {
                self.memoize_error(err);
                false
            }
        }
    }

    /// Like `get_or_load`, but also surfaces objects marked `deleted` —
    /// used by `create_object` to decide whether it is overwriting a prior
    /// incarnation of the address.
    fn get_or_load_including_deleted(&mut self, address: Address) -> Option<&StateObject> {
        self.get_or_load(address);
        self.state_objects.get(&address)
    }

    fn exists_live(&self, address: Address) -> bool {
        self.state_objects
            .get(&address)
            .map(|o| !o.deleted)
            .unwrap_or(false)
    }

    pub fn exist(&mut self, address: Address) -> bool {
        self.get_or_load(address) && self.exists_live(address)
    }

    pub fn get_balance(&mut self, address: Address) -> U256 {
        if self.get_or_load(address) {
            self.state_objects[&address].balance()
        } else {
            U256::zero()
        }
    }

    pub fn get_nonce(&mut self, address: Address) -> u64 {
        if self.get_or_load(address) {
            self.state_objects[&address].nonce()
        } else {
            0
        }
    }

    pub fn get_code_hash(&mut self, address: Address) -> H256 {
        if self.get_or_load(address) {
            self.state_objects[&address].code_hash()
        } else {
            ethrex_common::types::EMPTY_CODE_HASH
        }
    }

    pub fn get_code(&mut self, address: Address) -> StateResult<ethrex_common::types::Code> {
        if !self.get_or_load(address) {
            return Ok(Default::default());
        }
        let db = self.db.clone();
        let object = self.state_objects.get_mut(&address).expect("just loaded");
        match object.code(db.as_ref()) {
            Ok(code) => Ok(code),
            Err(err) => {
                self.memoize_error(err.clone());
                Err(err)
            }
        }
    }

    pub fn get_code_size(&mut self, address: Address) -> usize {
        self.get_code(address).map(|c| c.len()).unwrap_or(0)
    }

    pub fn get_state(&mut self, address: Address, slot: H256) -> U256 {
        if !self.get_or_load(address) {
            return U256::zero();
        }
        let resurrected = self.is_resurrected(address);
        let result = {
            let source = StorageSource {
                db: self.db.as_ref(),
                snapshot: self.snapshot.as_deref(),
                state_root: self.original_root,
                account_trie: self.account_trie.as_ref(),
                resurrected,
            };
            let object = self.state_objects.get_mut(&address).expect("just loaded");
            object.get_state(slot, &source)
        };
        match result {
            Ok(v) => v,
            Err(err) => {
                self.memoize_error(err);
                U256::zero()
            }
        }
    }

    pub fn get_committed_state(&mut self, address: Address, slot: H256) -> U256 {
        if !self.get_or_load(address) {
            return U256::zero();
        }
        let resurrected = self.is_resurrected(address);
        let result = {
            let source = StorageSource {
                db: self.db.as_ref(),
                snapshot: self.snapshot.as_deref(),
                state_root: self.original_root,
                account_trie: self.account_trie.as_ref(),
                resurrected,
            };
            let object = self.state_objects.get_mut(&address).expect("just loaded");
            object.get_committed_state(slot, &source)
        };
        match result {
            Ok(v) => v,
            Err(err) => {
                self.memoize_error(err);
                U256::zero()
            }
        }
    }

    // ---------------------------------------------------------------
    // Write path & destruction accounting
    // ---------------------------------------------------------------

    fn get_or_new(&mut self, address: Address) -> &mut StateObject {
        if !self.get_or_load(address) {
            self.create_object(address);
        }
        self.state_objects.get_mut(&address).expect("just created")
    }

    /// `create_object` is the subtle half of the write path: if an
    /// incarnation already existed, its account bytes and slots must be
    /// reported to the snapshot layer as deletions, and the new incarnation
    /// starts from blank.
    fn create_object(&mut self, address: Address) {
        let prev = self.get_or_load_including_deleted(address);

        let Some(prev_object_ref) = prev else {
            self.state_objects
                .insert(address, StateObject::new(address));
            self.journal.push(JournalEntry::CreateObject { address });
            return;
        };
        let prev_origin = prev_object_ref.origin;
        let _ = prev_origin;

        let addr_hash = address_hash(address);
        let prev_was_destructed =
            self.destruct.contains_key(&address) || self.destruct_dirty.contains_key(&address);
        if !prev_was_destructed {
            self.destruct_dirty.insert(address, prev_origin);
        }

        let prev_object = self
            .state_objects
            .remove(&address)
            .expect("checked present above");
        let prev_account_bytes = self.accounts.remove(&addr_hash);
        let prev_storage_map = self.storages.remove(&addr_hash).unwrap_or_default();
        let prev_account_origin_existed = self.accounts_origin.contains_key(&address);
        let prev_account_origin = self.accounts_origin.remove(&address).flatten();
        let prev_storage_origin = self.storages_origin.remove(&address).unwrap_or_default();

        self.journal.push(JournalEntry::ResetObject {
            address,
            prev_object: Box::new(prev_object),
            prev_destruct: prev_was_destructed,
            prev_account_bytes,
            prev_storage_map,
            prev_account_origin_existed,
            prev_account_origin,
            prev_storage_origin,
        });

        self.state_objects
            .insert(address, StateObject::new(address));
    }

    /// Unconditionally creates a fresh object; if a prior one existed, its
    /// balance is carried into the new incarnation (funds-preservation
    /// rule).
    pub fn create_account(&mut self, address: Address) {
        let prior_balance = if self.get_or_load(address) {
            self.state_objects[&address].balance()
        } else {
            U256::zero()
        };
        self.create_object(address);
        if !prior_balance.is_zero() {
            let object = self.state_objects.get_mut(&address).expect("just created");
            object.data.balance = prior_balance;
        }
        self.touch(address);
    }

    fn touch(&mut self, address: Address) {
        self.journal.push(JournalEntry::TouchChange { address });
    }

    pub fn add_balance(&mut self, address: Address, amount: U256) {
        if amount.is_zero() {
            self.touch(address);
            return;
        }
        let object = self.get_or_new(address);
        let prev = object.data.balance;
        object.data.balance = prev.saturating_add(amount);
        self.journal.push(JournalEntry::BalanceChange { address, prev });
    }

    pub fn sub_balance(&mut self, address: Address, amount: U256) {
        if amount.is_zero() {
            self.touch(address);
            return;
        }
        let object = self.get_or_new(address);
        let prev = object.data.balance;
        object.data.balance = prev.saturating_sub(amount);
        self.journal.push(JournalEntry::BalanceChange { address, prev });
    }

    pub fn set_balance(&mut self, address: Address, balance: U256) {
        let object = self.get_or_new(address);
        let prev = object.data.balance;
        object.data.balance = balance;
        self.journal.push(JournalEntry::BalanceChange { address, prev });
    }

    pub fn set_nonce(&mut self, address: Address, nonce: u64) {
        let object = self.get_or_new(address);
        let prev = object.data.nonce;
        object.data.nonce = nonce;
        self.journal.push(JournalEntry::NonceChange { address, prev });
    }

    pub fn set_code(&mut self, address: Address, code: ethrex_common::types::Code) {
        let object = self.get_or_new(address);
        let prev_hash = object.data.code_hash;
        let prev_code = object.code.clone();
        object.set_code(code);
        self.journal.push(JournalEntry::CodeChange {
            address,
            prev_hash,
            prev_code,
        });
        if let Some(mv) = &self.mvstates {
            mv.record_account_write(address, AccessKind::CodeHash);
        }
    }

    pub fn set_state(&mut self, address: Address, slot: H256, value: U256) {
        self.get_or_new(address);
        let resurrected = self.is_resurrected(address);

        let (committed, prev_existed, prev) = {
            let source = StorageSource {
                db: self.db.as_ref(),
                snapshot: self.snapshot.as_deref(),
                state_root: self.original_root,
                account_trie: self.account_trie.as_ref(),
                resurrected,
            };
            let object = self.state_objects.get_mut(&address).expect("just created");
            let committed = object.get_committed_state(slot, &source).unwrap_or(U256::zero());
            let prev_existed = object.dirty_storage.contains_key(&slot);
            let prev = object.dirty_storage.get(&slot).copied().unwrap_or(committed);
            (committed, prev_existed, prev)
        };

        // Still journal a no-op change so reverts are symmetric even when
        // the value doesn't actually change.
        self.journal.push(JournalEntry::StorageChange {
            address,
            slot,
            prev,
            prev_existed,
        });
        if committed == value {
            return;
        }
        let object = self.state_objects.get_mut(&address).expect("just loaded");
        object.dirty_storage.insert(slot, value);
    }

    /// Debug-only: stages a `destruct` entry with `None` so subsequent
    /// loads treat storage as wiped, then applies the supplied storage.
    pub fn set_storage(&mut self, address: Address, storage: FxHashMap<H256, U256>) {
        self.destruct_dirty.entry(address).or_insert(None);
        for (slot, value) in storage {
            self.set_state(address, slot, value);
        }
    }

    pub fn self_destruct(&mut self, address: Address) {
        if !self.get_or_load(address) {
            return;
        }
        let object = self.state_objects.get_mut(&address).expect("just loaded");
        let prev_flag = object.self_destructed;
        let prev_balance = object.data.balance;
        object.self_destructed = true;
        object.data.balance = U256::zero();
        self.journal.push(JournalEntry::SelfDestruct {
            address,
            prev_flag,
            prev_balance,
        });
        if let Some(mv) = &self.mvstates {
            mv.record_account_write(address, AccessKind::Suicide);
        }
    }

    /// EIP-6780: only honored if the object was created in the same
    /// transaction.
    pub fn self_destruct_6780(&mut self, address: Address) {
        if !self.get_or_load(address) {
            return;
        }
        if self.state_objects[&address].created {
            self.self_destruct(address);
        }
    }

    pub fn add_refund(&mut self, amount: u64) {
        let prev = self.refund;
        self.refund += amount;
        self.journal.push(JournalEntry::RefundChange { prev });
    }

    pub fn sub_refund(&mut self, amount: u64) -> StateResult<()> {
        if amount > self.refund {
            return Err(StateError::RefundUnderflow {
                current: self.refund,
                amount,
            });
        }
        let prev = self.refund;
        self.refund -= amount;
        self.journal.push(JournalEntry::RefundChange { prev });
        Ok(())
    }

    pub fn add_log(&mut self, tx_hash: H256, log: Log) {
        self.logs.entry(tx_hash).or_default().push(log);
        self.journal.push(JournalEntry::AddLog { tx_hash });
    }

    pub fn add_preimage(&mut self, hash: H256, preimage: Vec<u8>) {
        self.preimages.entry(hash).or_insert(preimage);
        self.journal.push(JournalEntry::AddPreimage { hash });
    }

    pub fn add_address_to_access_list(&mut self, address: Address) {
        if self.access_list.add_address(address) {
            self.journal
                .push(JournalEntry::AccessListAddAccount { address });
        }
    }

    pub fn add_slot_to_access_list(&mut self, address: Address, slot: H256) {
        let (addr_new, slot_new) = self.access_list.add_slot(address, slot);
        if addr_new {
            self.journal
                .push(JournalEntry::AccessListAddAccount { address });
        }
        if slot_new {
            self.journal
                .push(JournalEntry::AccessListAddSlot { address, slot });
        }
    }

    pub fn get_transient_state(&self, address: Address, slot: H256) -> U256 {
        self.transient_storage.get(address, slot)
    }

    pub fn set_transient_state(&mut self, address: Address, slot: H256, value: U256) {
        let prev = self.transient_storage.get(address, slot);
        self.transient_storage.set(address, slot, value);
        self.journal.push(JournalEntry::TransientStorageChange {
            address,
            slot,
            prev,
        });
    }

    /// Clears per-transaction scratch space; called at each `SetTxContext`.
    pub fn prepare(&mut self, tx_hash: H256, tx_index: usize) {
        self.tx_hash = tx_hash;
        self.tx_index = tx_index;
        self.transient_storage.clear();
        if let Some(mv) = &self.mvstates {
            mv.record_new_tx(tx_index);
        }
    }

    // ---------------------------------------------------------------
    // Finalise
    // ---------------------------------------------------------------

    pub fn finalise(&mut self, delete_empty: bool) {
        let merged_destruct: Vec<(Address, Option<Account>)> =
            self.destruct_dirty.drain().collect();
        for (address, prior) in merged_destruct {
            self.destruct.entry(address).or_insert(prior);
        }

        let touched: Vec<Address> = self.journal.dirties.keys().copied().collect();
        let mut prefetch_addresses = Vec::with_capacity(touched.len());

        for address in touched {
            let Some(object) = self.state_objects.get_mut(&address) else {
                // A journal-dirty address with no materialized object must be
                // tolerated, not cleaned up: the ripeMD precompile is touched
                // and emptied by real chains without ever being loaded here.
                continue;
            };

            let should_delete = object.self_destructed || (delete_empty && object.is_empty());
            if should_delete {
                object.deleted = true;
                let addr_hash = object.addr_hash;
                self.destruct.entry(address).or_insert(object.origin);
                self.accounts.remove(&addr_hash);
                self.storages.remove(&addr_hash);
                self.accounts_origin.remove(&address);
                self.storages_origin.remove(&address);
            } else {
                let slots = object.finalise();
                prefetch_addresses.push((address, slots));
            }

            let object = self.state_objects.get_mut(&address).expect("present");
            object.created = false;
            self.pending.insert(address);
            self.dirty.insert(address);
        }

        if let Some(prefetcher) = &self.prefetcher {
            for (address, slots) in &prefetch_addresses {
                let Some(object) = self.state_objects.get(address) else {
                    continue;
                };
                let keys: Vec<H256> = slots
                    .iter()
                    .map(|slot| H256(ethrex_crypto::keccak::keccak_hash(slot.as_bytes())))
                    .collect();
                prefetcher.prefetch(
                    self.original_root,
                    object.data.storage_root,
                    object.addr_hash,
                    keys,
                );
            }
        }

        debug!(count = prefetch_addresses.len(), "finalised dirty objects");
        self.journal.clear();
        self.refund = 0;
    }

    // ---------------------------------------------------------------
    // IntermediateRoot and Commit
    // ---------------------------------------------------------------

    pub fn intermediate_root(&mut self, delete_empty: bool) -> StateResult<H256> {
        self.finalise(delete_empty);
        self.update_roots_parallel()?;
        self.state_intermediate_root()
    }

    /// Fans per-object `update_root` out across a bounded worker pool; each
    /// object is owned by exactly one worker at a time, so no locking is
    /// needed beyond the shared `accounts` map.
    fn update_roots_parallel(&mut self) -> StateResult<()> {
        let addresses: Vec<Address> = self
            .pending
            .iter()
            .copied()
            .filter(|a| !self.state_objects.get(a).map(|o| o.deleted).unwrap_or(true))
            .collect();
        if addresses.is_empty() {
            return Ok(());
        }

        let db = self.db.as_ref();
        let snapshot = self.snapshot.as_deref();
        let state_root = self.original_root;
        let account_trie = self.account_trie.as_ref();
        let destruct = &self.destruct;
        let destruct_dirty = &self.destruct_dirty;
        let worker_count = self.worker_count;

        let accounts_mutex: Mutex<&mut FxHashMap<H256, Vec<u8>>> = Mutex::new(&mut self.accounts);
        let accounts_origin_mutex: Mutex<&mut FxHashMap<Address, Option<Vec<u8>>>> =
            Mutex::new(&mut self.accounts_origin);
        let storages_mutex: Mutex<&mut FxHashMap<H256, FxHashMap<H256, Vec<u8>>>> =
            Mutex::new(&mut self.storages);
        let storages_origin_mutex: Mutex<&mut FxHashMap<Address, FxHashMap<H256, Vec<u8>>>> =
            Mutex::new(&mut self.storages_origin);
        let objects_mutex: Mutex<&mut FxHashMap<Address, StateObject>> =
            Mutex::new(&mut self.state_objects);
        let error_mutex: Mutex<Option<StateError>> = Mutex::new(None);

        std::thread::scope(|scope| {
            let pool = ThreadPool::new(worker_count, scope);
            for address in addresses {
                let resurrected = matches!(destruct.get(&address), Some(Some(_)))
                    || matches!(destruct_dirty.get(&address), Some(Some(_)));
                let source = StorageSource {
                    db,
                    snapshot,
                    state_root,
                    account_trie,
                    resurrected,
                };
                let accounts_mutex = &accounts_mutex;
                let accounts_origin_mutex = &accounts_origin_mutex;
                let storages_mutex = &storages_mutex;
                let storages_origin_mutex = &storages_origin_mutex;
                let objects_mutex = &objects_mutex;
                let error_mutex = &error_mutex;

                pool.execute(Box::new(move || {
                    let mut objects = objects_mutex.lock().expect("lock poisoned");
                    let Some(object) = objects.get_mut(&address) else {
                        return;
                    };
                    match object.update_root(&source) {
                        Ok(published) => {
                            let addr_hash = object.addr_hash;
                            let slim = object.encode_slim();
                            let origin = object.origin;
                            drop(objects);

                            let mut accounts = accounts_mutex.lock().expect("lock poisoned");
                            accounts.insert(addr_hash, slim);
                            drop(accounts);

                            let mut accounts_origin =
                                accounts_origin_mutex.lock().expect("lock poisoned");
                            accounts_origin
                                .entry(address)
                                .or_insert_with(|| origin.map(|a| a.encode_slim()));
                            drop(accounts_origin);

                            if !published.is_empty() {
                                let mut storages = storages_mutex.lock().expect("lock poisoned");
                                let entry = storages.entry(addr_hash).or_default();
                                let mut storages_origin =
                                    storages_origin_mutex.lock().expect("lock poisoned");
                                let origin_entry = storages_origin.entry(address).or_default();
                                for (slot, _value, trimmed) in published {
                                    let slot_hash =
                                        H256(ethrex_crypto::keccak::keccak_hash(slot.as_bytes()));
                                    origin_entry.entry(slot_hash).or_insert_with(|| {
                                        entry.get(&slot_hash).cloned().unwrap_or_default()
                                    });
                                    entry.insert(slot_hash, trimmed);
                                }
                            }
                        }
                        Err(err) => {
                            let mut guard = error_mutex.lock().expect("lock poisoned");
                            if guard.is_none() {
                                *guard = Some(err);
                            }
                        }
                    }
                }));
            }
        });

        if let Some(err) = error_mutex.into_inner().expect("lock poisoned") {
            self.memoize_error(err.clone());
            return Err(err);
        }
        Ok(())
    }

    /// Flushes `pending` into the account trie, deleting self-destructed
    /// objects and updating the rest. Serial: the account trie is a single
    /// shared structure.
    fn state_intermediate_root(&mut self) -> StateResult<H256> {
        let pending: Vec<Address> = self.pending.drain().collect();
        for address in pending {
            let Some(object) = self.state_objects.get(&address) else {
                continue;
            };
            let addr_hash = object.addr_hash;
            if object.deleted {
                self.account_trie.remove(addr_hash)?;
            } else {
                self.account_trie
                    .insert(addr_hash, object.encode_full())?;
            }
        }
        self.account_trie.hash()
    }

    /// Runs the three-way commit pipeline: trie-commit runs on the calling
    /// thread while code-commit and snapshot-update run on two scoped
    /// worker threads over data extracted up front, so no two tasks ever
    /// contend for the same field.
    pub fn commit(
        &mut self,
        block: u64,
        delete_empty: bool,
        full_processed: bool,
        expected_root: Option<H256>,
    ) -> StateResult<H256> {
        if let Some(err) = self.db_error.clone() {
            return Err(err);
        }

        let intermediate_root = if !full_processed {
            Some(self.intermediate_root(delete_empty)?)
        } else {
            None
        };

        let dirty: Vec<Address> = self.dirty.iter().copied().collect();
        let destruct_snapshot = self.destruct.clone();

        let code_batch: Vec<(H256, ethrex_common::types::Code)> = dirty
            .iter()
            .filter_map(|addr| self.state_objects.get(addr))
            .filter(|o| o.dirty_code)
            .filter_map(|o| o.code.clone().map(|c| (o.data.code_hash, c)))
            .collect();
        let db_for_code = self.db.clone();

        let snapshot_tree_for_task = self.snapshot_tree.clone();
        let accounts_snapshot = self.accounts.clone();
        let storages_snapshot = self.storages.clone();
        let parent_root = self.original_root;
        let destruct_hashes: FxHashMap<H256, ()> = destruct_snapshot
            .keys()
            .map(|addr| (address_hash(*addr), ()))
            .collect();

        let merged_nodes = Mutex::new(NodeSet::new());
        let code_result: Mutex<Option<StateResult<()>>> = Mutex::new(None);
        let snapshot_result: Mutex<Option<StateResult<()>>> = Mutex::new(None);

        let trie_result = std::thread::scope(|scope| {
            scope.spawn(|| {
                *code_result.lock().expect("lock poisoned") =
                    Some(Self::run_code_commit_task(&db_for_code, &code_batch));
            });
            scope.spawn(|| {
                *snapshot_result.lock().expect("lock poisoned") = Some(Self::run_snapshot_update_task(
                    snapshot_tree_for_task.as_deref(),
                    parent_root,
                    expected_root,
                    &destruct_hashes,
                    &accounts_snapshot,
                    &storages_snapshot,
                ));
            });
            self.run_trie_commit_task(block, full_processed, expected_root, &dirty, &merged_nodes)
        });

        let root = trie_result?;

        if let Some(Err(err)) = code_result.into_inner().expect("lock poisoned") {
            return Err(err);
        }
        // Snapshot/cap errors are logged only, never fail the commit.
        if let Some(Err(err)) = snapshot_result.into_inner().expect("lock poisoned") {
            warn!(error = %err, "snapshot update failed");
        }

        let root = root.or(intermediate_root).unwrap_or(self.original_root);

        self.accounts.clear();
        self.storages.clear();
        self.accounts_origin.clear();
        self.storages_origin.clear();
        self.dirty.clear();
        self.destruct.clear();
        self.snapshot = None;
        self.original_root = root;

        Ok(root)
    }

    fn run_trie_commit_task(
        &mut self,
        block: u64,
        full_processed: bool,
        expected_root: Option<H256>,
        dirty: &[Address],
        merged_nodes: &Mutex<NodeSet>,
    ) -> StateResult<Option<H256>> {
        if full_processed {
            if let Some(expected) = expected_root {
                let computed = self.account_trie.hash()?;
                if computed != expected {
                    return Err(StateError::RootMismatch { computed, expected });
                }
            }
        }

        let mut trie_state = self.handle_destruction(merged_nodes)?;

        for address in dirty {
            if let Some(object) = self.state_objects.get_mut(address) {
                if object.deleted {
                    continue;
                }
                let nodes = object.commit()?;
                merged_nodes.lock().expect("lock poisoned").merge(nodes);
            }
        }

        let (root, account_nodes) = self.account_trie.commit(false)?;
        merged_nodes
            .lock()
            .expect("lock poisoned")
            .merge(account_nodes);

        let parent = self.original_root;
        let normalized_root = if root.is_zero() {
            ethrex_common::types::EMPTY_ROOT_HASH
        } else {
            root
        };

        if normalized_root != parent {
            trie_state.accounts_origin = self.accounts_origin.clone();
            trie_state.storages_origin = self.storages_origin.clone();
            let merged = std::mem::take(&mut *merged_nodes.lock().expect("lock poisoned"));
            self.db
                .trie_db()
                .update(normalized_root, parent, block, merged, trie_state)?;
        }

        Ok(Some(normalized_root))
    }

    fn run_code_commit_task(
        db: &Arc<dyn Database>,
        code_batch: &[(H256, ethrex_common::types::Code)],
    ) -> StateResult<()> {
        const IDEAL_BATCH_SIZE: usize = 100 * 1024;
        let mut batch = db.disk_db().write_batch();
        for (hash, code) in code_batch {
            batch.put(hash.as_bytes(), code);
            if batch.value_size() > IDEAL_BATCH_SIZE {
                batch.flush()?;
            }
        }
        batch.flush()
    }

    fn run_snapshot_update_task(
        tree: Option<&dyn SnapshotTree>,
        parent: H256,
        expected_root: Option<H256>,
        destruct_hashes: &FxHashMap<H256, ()>,
        accounts: &FxHashMap<H256, Vec<u8>>,
        storages: &FxHashMap<H256, FxHashMap<H256, Vec<u8>>>,
    ) -> StateResult<()> {
        let Some(tree) = tree else {
            return Ok(());
        };
        let expected = expected_root.unwrap_or(parent);
        if parent == expected {
            return Ok(());
        }

        tree.update(expected, parent, destruct_hashes, accounts, storages)?;
        if let Err(err) = tree.cap(expected, SNAPSHOT_LAYER_CAP) {
            warn!(error = %err, "snapshot cap failed");
        }
        Ok(())
    }

    /// Iterates `destruct`, recording resurrection/deletion bookkeeping and
    /// wiping each destructed account's storage.
    fn handle_destruction(&mut self, merged_nodes: &Mutex<NodeSet>) -> StateResult<TrieState> {
        let mut trie_state = TrieState::default();

        if self.db.trie_db().scheme() == Scheme::Hash {
            // Storage deletion is unsupported under the hash-addressed
            // scheme; short-circuit with an empty, incomplete result.
            return Ok(trie_state);
        }

        let destruct: Vec<(Address, Option<Account>)> =
            self.destruct.iter().map(|(a, p)| (*a, *p)).collect();

        for (address, prior) in destruct {
            let addr_hash = address_hash(address);
            match prior {
                None => {
                    if self.accounts.contains_key(&addr_hash) {
                        self.accounts_origin.insert(address, None);
                    }
                }
                Some(account) => {
                    self.accounts_origin
                        .insert(address, Some(account.encode_slim()));
                    if account.storage_root != ethrex_common::types::EMPTY_ROOT_HASH {
                        self.delete_storage(address, addr_hash, account.storage_root, &mut trie_state, merged_nodes)?;
                    }
                }
            }
        }

        Ok(trie_state)
    }

    /// Wipes an account's storage trie, aborting if the byte budget is
    /// exceeded (`STORAGE_DELETE_LIMIT`).
    fn delete_storage(
        &mut self,
        address: Address,
        addr_hash: H256,
        root: H256,
        trie_state: &mut TrieState,
        merged_nodes: &Mutex<NodeSet>,
    ) -> StateResult<()> {
        let mut collected = FxHashMap::default();
        let mut bytes_seen = 0usize;
        let mut aborted = false;

        if let Some(snapshot) = &self.snapshot {
            match snapshot.storage_iterator(self.original_root, addr_hash, H256::zero()) {
                Ok(iter) => {
                    let mut local_nodes = NodeSet::new();
                    for (slot_hash, value) in iter {
                        bytes_seen += value.len() + 32;
                        if bytes_seen > STORAGE_DELETE_LIMIT {
                            aborted = true;
                            break;
                        }
                        local_nodes.delete(slot_hash.as_bytes().to_vec());
                        collected.insert(slot_hash, value);
                    }
                    merged_nodes.lock().expect("lock poisoned").merge(local_nodes);
                }
                Err(_) => {
                    self.delete_storage_via_trie(address, root, &mut collected, &mut bytes_seen, &mut aborted, merged_nodes)?;
                }
            }
        } else {
            self.delete_storage_via_trie(address, root, &mut collected, &mut bytes_seen, &mut aborted, merged_nodes)?;
        }

        if aborted {
            trie_state.incomplete.insert(address, ());
            self.storages_origin.remove(&address);
            return Ok(());
        }

        let entry = self.storages_origin.entry(address).or_default();
        for (slot_hash, value) in collected {
            entry.entry(slot_hash).or_insert(value);
        }
        Ok(())
    }

    fn delete_storage_via_trie(
        &mut self,
        address: Address,
        root: H256,
        collected: &mut FxHashMap<H256, Vec<u8>>,
        bytes_seen: &mut usize,
        aborted: &mut bool,
        merged_nodes: &Mutex<NodeSet>,
    ) -> StateResult<()> {
        let trie = self.db.open_storage_trie(
            self.original_root,
            address,
            root,
            self.account_trie.as_ref(),
        )?;
        let mut local_nodes = NodeSet::new();
        for (path, value) in trie.node_iterator(H256::zero()) {
            *bytes_seen += value.len() + 32;
            if *bytes_seen > STORAGE_DELETE_LIMIT {
                *aborted = true;
                break;
            }
            local_nodes.delete(path.as_bytes().to_vec());
            collected.insert(path, value);
        }
        merged_nodes.lock().expect("lock poisoned").merge(local_nodes);
        Ok(())
    }

    // ---------------------------------------------------------------
    // Copy semantics
    // ---------------------------------------------------------------

    /// Produces an independent cache sharing only the snapshot tree handle
    /// and the database. Does not copy the journal; revisions are
    /// invalidated. Deep-copies every map directly off `self`, never reading
    /// back from the not-yet-populated destination.
    pub fn copy(&self) -> StateResult<Self> {
        let mut objects = FxHashMap::default();
        for (address, object) in &self.state_objects {
            objects.insert(*address, object.shallow_clone());
        }

        Ok(StateCache {
            accounts: self.accounts.clone(),
            storages: self.storages.clone(),
            accounts_origin: self.accounts_origin.clone(),
            storages_origin: self.storages_origin.clone(),
            state_objects: objects,
            pending: self.pending.clone(),
            dirty: self.dirty.clone(),
            destruct: self.destruct.clone(),
            destruct_dirty: self.destruct_dirty.clone(),
            journal: Journal::new(),
            refund: self.refund,
            tx_hash: self.tx_hash,
            tx_index: self.tx_index,
            logs: self.logs.clone(),
            preimages: self.preimages.clone(),
            access_list: self.access_list.deep_copy(),
            transient_storage: self.transient_storage.deep_copy(),
            db_error: self.db_error.clone(),
            db: self.db.clone(),
            snapshot_tree: self.snapshot_tree.clone(),
            snapshot: self.snapshot.clone(),
            account_trie: self.db.copy_trie(self.account_trie.as_ref())?,
            original_root: self.original_root,
            mvstates: self.mvstates.clone(),
            prefetcher: self.prefetcher.as_ref().map(|p| p.copy()),
            worker_count: self.worker_count,
        })
    }
}

#[cfg(test)]
mod mock {
    //! In-memory test doubles for the out-of-scope collaborators. Good
    //! enough to exercise the cache's own logic; none of it is a real trie
    //! or disk store.

    use super::*;
    use crate::traits::{Prefetcher, SlimAccount};

    #[derive(Clone, Default)]
    pub struct MockPrefetcher {
        calls: Arc<Mutex<Vec<(H256, H256, H256, Vec<H256>)>>>,
    }

    impl MockPrefetcher {
        pub fn calls(&self) -> Vec<(H256, H256, H256, Vec<H256>)> {
            self.calls.lock().expect("lock poisoned").clone()
        }
    }

    impl Prefetcher for MockPrefetcher {
        fn prefetch(&self, state_root: H256, root: H256, addr_prefix: H256, keys: Vec<H256>) {
            self.calls
                .lock()
                .expect("lock poisoned")
                .push((state_root, root, addr_prefix, keys));
        }

        fn used(&self, _root: H256, _addr_prefix: H256, _keys: &[H256]) {}

        fn trie(&self, _root: H256, _origin: H256) -> Option<Box<dyn Trie>> {
            None
        }

        fn copy(&self) -> Box<dyn Prefetcher> {
            Box::new(self.clone())
        }

        fn close(&self) {}
    }

    fn mock_hash(entries: &FxHashMap<H256, Vec<u8>>) -> H256 {
        if entries.is_empty() {
            return ethrex_common::types::EMPTY_ROOT_HASH;
        }
        let mut keys: Vec<H256> = entries.keys().copied().collect();
        keys.sort();
        let mut buf = Vec::new();
        for key in keys {
            buf.extend_from_slice(key.as_bytes());
            buf.extend_from_slice(&entries[&key]);
        }
        H256(ethrex_crypto::keccak::keccak_hash(&buf))
    }

    #[derive(Default)]
    pub struct MockTrie {
        entries: FxHashMap<H256, Vec<u8>>,
    }

    impl Trie for MockTrie {
        fn get(&self, path: H256) -> StateResult<Option<Vec<u8>>> {
            Ok(self.entries.get(&path).cloned())
        }

        fn insert(&mut self, path: H256, value: Vec<u8>) -> StateResult<()> {
            self.entries.insert(path, value);
            Ok(())
        }

        fn remove(&mut self, path: H256) -> StateResult<()> {
            self.entries.remove(&path);
            Ok(())
        }

        fn hash(&mut self) -> StateResult<H256> {
            Ok(mock_hash(&self.entries))
        }

        fn commit(&mut self, _collect_leaf: bool) -> StateResult<(H256, NodeSet)> {
            Ok((mock_hash(&self.entries), NodeSet::new()))
        }

        fn node_iterator(&self, _seek: H256) -> Box<dyn Iterator<Item = (H256, Vec<u8>)> + '_> {
            Box::new(self.entries.clone().into_iter())
        }
    }

    #[derive(Default)]
    pub struct MockTrieDb {
        captured: Mutex<Option<TrieState>>,
    }

    impl TrieDB for MockTrieDb {
        fn scheme(&self) -> Scheme {
            Scheme::Path
        }

        fn update(
            &self,
            _root: H256,
            _parent: H256,
            _block: u64,
            _merged_nodes: NodeSet,
            trie_state: TrieState,
        ) -> StateResult<()> {
            *self.captured.lock().expect("lock poisoned") = Some(trie_state);
            Ok(())
        }
    }

    pub struct MockWriteBatch {
        size: usize,
    }

    impl WriteBatch for MockWriteBatch {
        fn put(&mut self, _key: &[u8], value: &[u8]) {
            self.size += value.len();
        }

        fn value_size(&self) -> usize {
            self.size
        }

        fn flush(&mut self) -> StateResult<()> {
            self.size = 0;
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct MockKVStore;

    impl KVStore for MockKVStore {
        fn write_batch(&self) -> Box<dyn WriteBatch> {
            Box::new(MockWriteBatch { size: 0 })
        }
    }

    #[derive(Default)]
    pub struct MockDatabase {
        code_store: Mutex<FxHashMap<H256, ethrex_common::types::Code>>,
        trie_db: MockTrieDb,
        disk: MockKVStore,
    }

    impl MockDatabase {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn last_trie_state(&self) -> Option<TrieState> {
            self.trie_db.captured.lock().expect("lock poisoned").clone()
        }
    }

    impl Database for MockDatabase {
        fn open_trie(&self, _root: H256) -> StateResult<Box<dyn Trie>> {
            Ok(Box::new(MockTrie::default()))
        }

        fn open_storage_trie(
            &self,
            _state_root: H256,
            _address: Address,
            _storage_root: H256,
            _account_trie: &dyn Trie,
        ) -> StateResult<Box<dyn Trie>> {
            Ok(Box::new(MockTrie::default()))
        }

        fn copy_trie(&self, trie: &dyn Trie) -> StateResult<Box<dyn Trie>> {
            let mut copy = MockTrie::default();
            for (path, value) in trie.node_iterator(H256::zero()) {
                copy.entries.insert(path, value);
            }
            Ok(Box::new(copy))
        }

        fn trie_db(&self) -> &dyn TrieDB {
            &self.trie_db
        }

        fn disk_db(&self) -> &dyn KVStore {
            &self.disk
        }

        fn get_code(&self, code_hash: H256) -> StateResult<Option<ethrex_common::types::Code>> {
            Ok(self
                .code_store
                .lock()
                .expect("lock poisoned")
                .get(&code_hash)
                .cloned())
        }
    }

    #[derive(Default)]
    pub struct MockSnapshot {
        accounts: Mutex<FxHashMap<H256, SlimAccount>>,
        storages: Mutex<FxHashMap<H256, Vec<(H256, Vec<u8>)>>>,
    }

    impl Snapshot for MockSnapshot {
        fn root(&self) -> H256 {
            H256::zero()
        }

        fn account(&self, addr_hash: H256) -> StateResult<Option<SlimAccount>> {
            Ok(self.accounts.lock().expect("lock poisoned").get(&addr_hash).copied())
        }

        fn storage_iterator(
            &self,
            _state_root: H256,
            addr_hash: H256,
            _seek: H256,
        ) -> StateResult<Box<dyn Iterator<Item = (H256, Vec<u8>)> + '_>> {
            let entries = self
                .storages
                .lock()
                .expect("lock poisoned")
                .get(&addr_hash)
                .cloned()
                .unwrap_or_default();
            Ok(Box::new(entries.into_iter()))
        }
    }

    #[derive(Default)]
    pub struct MockSnapshotTree {
        snapshot: Arc<MockSnapshot>,
    }

    impl MockSnapshotTree {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn seed_account(&self, address: Address, account: SlimAccount) {
            self.snapshot
                .accounts
                .lock()
                .expect("lock poisoned")
                .insert(address_hash(address), account);
        }

        pub fn seed_storage(&self, address: Address, slot_hash: H256, value: Vec<u8>) {
            self.snapshot
                .storages
                .lock()
                .expect("lock poisoned")
                .entry(address_hash(address))
                .or_default()
                .push((slot_hash, value));
        }
    }

    impl SnapshotTree for MockSnapshotTree {
        fn snapshot(&self, _root: H256) -> Option<Arc<dyn Snapshot>> {
            Some(self.snapshot.clone() as Arc<dyn Snapshot>)
        }

        fn update(
            &self,
            _new_root: H256,
            _parent_root: H256,
            _destruct_set: &FxHashMap<H256, ()>,
            _accounts: &FxHashMap<H256, Vec<u8>>,
            _storages: &FxHashMap<H256, FxHashMap<H256, Vec<u8>>>,
        ) -> StateResult<()> {
            Ok(())
        }

        fn cap(&self, _root: H256, _layers: usize) -> StateResult<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{MockDatabase, MockPrefetcher, MockSnapshotTree};
    use super::*;
    use crate::traits::SlimAccount;

    fn fresh_cache() -> StateCache {
        let db: Arc<dyn Database> = Arc::new(MockDatabase::new());
        StateCache::new(db, None, H256::zero(), 2).expect("fresh trie opens cleanly")
    }

    #[test]
    fn simple_transfer_produces_deterministic_root() {
        let mut cache = fresh_cache();
        let a = Address::from_low_u64_be(1);
        let b = Address::from_low_u64_be(2);

        cache.create_account(a);
        cache.set_balance(a, U256::from(100));
        cache.create_account(b);
        cache.sub_balance(a, U256::from(30));
        cache.add_balance(b, U256::from(30));
        cache.finalise(true);
        let root = cache.intermediate_root(true).expect("intermediate root");

        assert_eq!(cache.get_balance(a), U256::from(70));
        assert_eq!(cache.get_balance(b), U256::from(30));
        assert_ne!(root, H256::zero());
    }

    #[test]
    fn ordinary_commit_populates_accounts_origin() {
        let db = Arc::new(MockDatabase::new());
        let mut cache =
            StateCache::new(db.clone(), None, H256::zero(), 1).expect("fresh trie opens cleanly");
        let a = Address::from_low_u64_be(7);

        cache.create_account(a);
        cache.set_balance(a, U256::from(5));
        cache.finalise(true);
        cache.commit(1, true, false, None).expect("commit succeeds");

        let trie_state = db.last_trie_state().expect("trie db was updated");
        assert_eq!(trie_state.accounts_origin.get(&a), Some(&None));
    }

    #[test]
    fn finalise_prefetches_touched_storage_slots() {
        let db: Arc<dyn Database> = Arc::new(MockDatabase::new());
        let prefetcher = MockPrefetcher::default();
        let handle = prefetcher.clone();
        let mut cache = StateCache::new(db, None, H256::zero(), 1)
            .expect("fresh trie opens cleanly")
            .with_prefetcher(Box::new(prefetcher));

        let a = Address::from_low_u64_be(1);
        let slot = H256::from_low_u64_be(9);
        cache.set_state(a, slot, U256::from(11));
        cache.finalise(false);

        let calls = handle.calls();
        assert_eq!(calls.len(), 1);
        let (_, _, addr_prefix, keys) = &calls[0];
        assert_eq!(*addr_prefix, address_hash(a));
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn revert_restores_prior_balances() {
        let mut cache = fresh_cache();
        let a = Address::from_low_u64_be(1);
        let b = Address::from_low_u64_be(2);

        cache.create_account(a);
        cache.set_balance(a, U256::from(100));
        cache.create_account(b);
        cache.sub_balance(a, U256::from(30));
        cache.add_balance(b, U256::from(30));
        cache.finalise(true);

        let revision = cache.snapshot();
        cache.sub_balance(a, U256::from(70));
        cache.add_balance(b, U256::from(70));
        cache
            .revert_to_snapshot(revision)
            .expect("revision is valid");

        assert_eq!(cache.get_balance(a), U256::from(70));
        assert_eq!(cache.get_balance(b), U256::from(30));
    }

    #[test]
    fn storage_zeroing_restores_empty_root() {
        let mut cache = fresh_cache();
        let a = Address::from_low_u64_be(1);
        let slot = H256::from_low_u64_be(1);

        cache.set_state(a, slot, U256::from(0x11));
        cache.finalise(false);
        cache.set_state(a, slot, U256::zero());
        cache.finalise(false);
        cache.commit(1, false, false, None).expect("commit succeeds");

        let object = cache
            .state_objects
            .get(&a)
            .expect("account survives commit");
        assert_eq!(
            object.data.storage_root,
            ethrex_common::types::EMPTY_ROOT_HASH
        );
    }

    #[test]
    fn self_destruct_then_create_keeps_new_balance_and_marks_destruct() {
        let db = Arc::new(MockDatabase::new());
        let mut cache =
            StateCache::new(db.clone(), None, H256::zero(), 1).expect("fresh trie opens cleanly");
        let a = Address::from_low_u64_be(1);

        cache.set_balance(a, U256::from(50));
        cache.self_destruct(a);
        cache.create_account(a);
        cache.set_balance(a, U256::from(7));
        cache.finalise(true);

        assert_eq!(cache.get_balance(a), U256::from(7));
        assert!(cache.destruct.contains_key(&a));

        cache.commit(1, true, false, None).expect("commit succeeds");
        let trie_state = db.last_trie_state().expect("trie db was updated");
        assert_eq!(trie_state.accounts_origin.get(&a), Some(&None));
    }

    #[test]
    fn refund_underflow_is_rejected() {
        let mut cache = fresh_cache();
        cache.add_refund(5);
        let err = cache.sub_refund(10).unwrap_err();
        assert!(matches!(
            err,
            StateError::RefundUnderflow {
                current: 5,
                amount: 10
            }
        ));
    }

    #[test]
    #[ignore = "allocates past the 512 MiB storage-delete budget"]
    fn storage_delete_aborts_past_budget() {
        let db = Arc::new(MockDatabase::new());
        let snapshot_tree = Arc::new(MockSnapshotTree::new());
        let mut cache = StateCache::new(
            db.clone(),
            Some(snapshot_tree.clone() as Arc<dyn SnapshotTree>),
            H256::zero(),
            1,
        )
        .expect("fresh trie opens cleanly");

        let a = Address::from_low_u64_be(1);
        let slot_hash = H256::from_low_u64_be(0xaa);
        snapshot_tree.seed_account(
            a,
            SlimAccount {
                nonce: 1,
                balance: U256::zero(),
                storage_root: H256::from_low_u64_be(0xab),
                code_hash: ethrex_common::types::EMPTY_CODE_HASH,
            },
        );
        snapshot_tree.seed_storage(a, slot_hash, vec![0u8; STORAGE_DELETE_LIMIT + 1]);

        cache.self_destruct(a);
        cache.finalise(true);
        let root = cache
            .commit(1, true, false, None)
            .expect("commit still succeeds on an incomplete destruction");

        assert_ne!(root, H256::zero());
        let trie_state = db.last_trie_state().expect("trie db was updated");
        assert!(trie_state.incomplete.contains_key(&a));
    }

    #[test]
    fn funds_preservation_on_recreate() {
        let mut cache = fresh_cache();
        let a = Address::from_low_u64_be(1);

        cache.create_account(a);
        cache.set_balance(a, U256::from(42));
        cache.create_account(a);

        assert_eq!(cache.get_balance(a), U256::from(42));
    }

    #[test]
    fn copy_is_independent_of_the_source() {
        let mut cache = fresh_cache();
        let a = Address::from_low_u64_be(1);

        cache.create_account(a);
        cache.set_balance(a, U256::from(10));
        cache.finalise(true);

        let copy = cache.copy().expect("copy succeeds");
        cache.set_balance(a, U256::from(999));

        assert_eq!(
            copy.state_objects.get(&a).expect("copied object").balance(),
            U256::from(10)
        );
    }

    #[test]
    fn revert_to_unknown_revision_fails() {
        let mut cache = fresh_cache();
        let err = cache.revert_to_snapshot(999).unwrap_err();
        assert!(matches!(err, StateError::InvalidRevision(999)));
    }
}
