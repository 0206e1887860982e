//! Per-account shadow: the origin/dirty views of one account's balance,
//! nonce, code and storage.

use ethrex_common::{Address, H256, U256, types::Account};
use ethrex_crypto::keccak::keccak_hash;
use ethrex_rlp::encode::RLPEncode;
use rustc_hash::FxHashMap;

use crate::error::{StateError, StateResult};
use crate::traits::{Database, Snapshot, Trie};

pub fn address_hash(address: Address) -> H256 {
    H256(keccak_hash(address.as_bytes()))
}

/// Where to resolve a slot not already memoized in `origin_storage`.
pub struct StorageSource<'a> {
    pub db: &'a dyn Database,
    pub snapshot: Option<&'a dyn Snapshot>,
    pub state_root: H256,
    pub account_trie: &'a dyn Trie,
    /// True when the object was freshly created or is sitting behind a
    /// `destruct` entry with a non-None prior value: its original storage is
    /// conceptually already wiped, so reads short-circuit to zero.
    pub resurrected: bool,
}

pub struct StateObject {
    pub address: Address,
    pub addr_hash: H256,

    pub origin: Option<Account>,
    pub data: Account,

    pub code: Option<ethrex_common::types::Code>,
    pub dirty_code: bool,

    pub origin_storage: FxHashMap<H256, U256>,
    pub pending_storage: FxHashMap<H256, U256>,
    pub dirty_storage: FxHashMap<H256, U256>,

    pub self_destructed: bool,
    pub deleted: bool,
    pub created: bool,

    storage_trie: Option<Box<dyn Trie>>,
}

impl std::fmt::Debug for StateObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateObject")
            .field("address", &self.address)
            .field("data", &self.data)
            .field("self_destructed", &self.self_destructed)
            .field("deleted", &self.deleted)
            .field("created", &self.created)
            .finish_non_exhaustive()
    }
}

impl StateObject {
    /// A brand-new object: `origin = None`, lifecycle flag `created = true`.
    pub fn new(address: Address) -> Self {
        StateObject {
            address,
            addr_hash: address_hash(address),
            origin: None,
            data: Account::default(),
            code: None,
            dirty_code: false,
            origin_storage: FxHashMap::default(),
            pending_storage: FxHashMap::default(),
            dirty_storage: FxHashMap::default(),
            self_destructed: false,
            deleted: false,
            created: true,
            storage_trie: None,
        }
    }

    /// Wraps an account read from the backing store.
    pub fn from_origin(address: Address, account: Account) -> Self {
        StateObject {
            address,
            addr_hash: address_hash(address),
            origin: Some(account),
            data: account,
            code: None,
            dirty_code: false,
            origin_storage: FxHashMap::default(),
            pending_storage: FxHashMap::default(),
            dirty_storage: FxHashMap::default(),
            self_destructed: false,
            deleted: false,
            created: false,
            storage_trie: None,
        }
    }

    pub fn balance(&self) -> U256 {
        self.data.balance
    }

    pub fn nonce(&self) -> u64 {
        self.data.nonce
    }

    pub fn code_hash(&self) -> H256 {
        self.data.code_hash
    }

    pub fn code_size(&self) -> usize {
        self.code.as_ref().map(|c| c.len()).unwrap_or(0)
    }

    /// Loads code lazily from the code store keyed by `code_hash`, caching
    /// the result.
    pub fn code(&mut self, db: &dyn Database) -> StateResult<ethrex_common::types::Code> {
        if let Some(code) = &self.code {
            return Ok(code.clone());
        }
        if self.data.code_hash == ethrex_common::types::EMPTY_CODE_HASH {
            self.code = Some(Default::default());
            return Ok(Default::default());
        }
        let code = db
            .get_code(self.data.code_hash)?
            .ok_or_else(|| StateError::CodeRead(self.address, "code missing".to_string()))?;
        self.code = Some(code.clone());
        Ok(code)
    }

    pub fn set_code(&mut self, code: ethrex_common::types::Code) {
        self.data.code_hash = ethrex_common::types::code_hash(&code);
        self.code = Some(code);
        self.dirty_code = true;
    }

    /// An object is empty iff its committed view is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get_state(&mut self, slot: H256, source: &StorageSource) -> StateResult<U256> {
        if let Some(v) = self.dirty_storage.get(&slot) {
            return Ok(*v);
        }
        self.get_committed_state(slot, source)
    }

    pub fn get_committed_state(&mut self, slot: H256, source: &StorageSource) -> StateResult<U256> {
        if let Some(v) = self.pending_storage.get(&slot) {
            return Ok(*v);
        }
        if let Some(v) = self.origin_storage.get(&slot) {
            return Ok(*v);
        }
        if self.origin.is_none() || source.resurrected {
            self.origin_storage.insert(slot, U256::zero());
            return Ok(U256::zero());
        }

        let slot_hash = H256(keccak_hash(slot.as_bytes()));
        let value = if let Some(snap) = source.snapshot {
            match snap.storage_iterator(source.state_root, self.addr_hash, slot_hash) {
                Ok(mut it) => it
                    .find(|(hash, _)| *hash == slot_hash)
                    .map(|(_, bytes)| ethrex_common::types::decode_storage_value(&bytes))
                    .transpose()
                    .unwrap_or(None)
                    .unwrap_or(U256::zero()),
                Err(_) => self.load_from_storage_trie(slot, slot_hash, source)?,
            }
        } else {
            self.load_from_storage_trie(slot, slot_hash, source)?
        };

        self.origin_storage.insert(slot, value);
        Ok(value)
    }

    fn load_from_storage_trie(
        &mut self,
        _slot: H256,
        slot_hash: H256,
        source: &StorageSource,
    ) -> StateResult<U256> {
        self.ensure_storage_trie(source)?;
        let Some(trie) = &self.storage_trie else {
            return Ok(U256::zero());
        };
        match trie.get(slot_hash)? {
            Some(bytes) => ethrex_common::types::decode_storage_value(&bytes)
                .map_err(|e| StateError::TrieMutation(e.to_string())),
            None => Ok(U256::zero()),
        }
    }

    fn ensure_storage_trie(&mut self, source: &StorageSource) -> StateResult<()> {
        if self.storage_trie.is_some() {
            return Ok(());
        }
        let trie = source.db.open_storage_trie(
            source.state_root,
            self.address,
            self.data.storage_root,
            source.account_trie,
        )?;
        self.storage_trie = Some(trie);
        Ok(())
    }

    /// Folds `dirty_storage` into `pending_storage`, clearing the former.
    /// Returns the slot hashes touched, for prefetcher warm-up.
    pub fn finalise(&mut self) -> Vec<H256> {
        let touched: Vec<H256> = self.dirty_storage.keys().copied().collect();
        for (slot, value) in self.dirty_storage.drain() {
            self.pending_storage.insert(slot, value);
        }
        touched
    }

    /// Flushes `pending_storage` into the storage trie and recomputes its
    /// root. No-op if there is nothing pending. Returns the trimmed bytes
    /// published per-slot, used by the caller to update the cache's
    /// `storages`/`storages_origin` maps.
    pub fn update_root(
        &mut self,
        source: &StorageSource,
    ) -> StateResult<Vec<(H256, U256, Vec<u8>)>> {
        if self.pending_storage.is_empty() {
            return Ok(Vec::new());
        }
        self.ensure_storage_trie(source)?;
        let mut published = Vec::with_capacity(self.pending_storage.len());

        let pending: Vec<(H256, U256)> = self.pending_storage.drain().collect();
        for (slot, value) in pending {
            let slot_hash = H256(keccak_hash(slot.as_bytes()));
            let trimmed = ethrex_common::types::encode_storage_value(value);
            let Some(trie) = &mut self.storage_trie else {
                unreachable!("ensure_storage_trie just populated it");
            };
            if trimmed.is_empty() {
                trie.remove(slot_hash)?;
            } else {
                trie.insert(slot_hash, trimmed.clone())?;
            }
            self.origin_storage.insert(slot, value);
            published.push((slot, value, trimmed));
        }

        if let Some(trie) = &mut self.storage_trie {
            self.data.storage_root = trie.hash()?;
        }
        Ok(published)
    }

    /// Commits the storage trie; must be called after `update_root`. Returns
    /// the trie's node-set delta, to be folded into the commit phase's
    /// merged node-set.
    pub fn commit(&mut self) -> StateResult<crate::traits::NodeSet> {
        let Some(trie) = &mut self.storage_trie else {
            return Ok(crate::traits::NodeSet::new());
        };
        let (root, nodes) = trie.commit(false)?;
        self.data.storage_root = root;
        Ok(nodes)
    }

    pub fn encode_slim(&self) -> Vec<u8> {
        self.data.encode_slim()
    }

    pub fn encode_full(&self) -> Vec<u8> {
        self.data.encode_to_vec()
    }

    /// Copies everything but the opened storage trie handle, which is
    /// lazily reopened on first access.
    pub fn shallow_clone(&self) -> StateObject {
        StateObject {
            address: self.address,
            addr_hash: self.addr_hash,
            origin: self.origin,
            data: self.data,
            code: self.code.clone(),
            dirty_code: self.dirty_code,
            origin_storage: self.origin_storage.clone(),
            pending_storage: self.pending_storage.clone(),
            dirty_storage: self.dirty_storage.clone(),
            self_destructed: self.self_destructed,
            deleted: self.deleted,
            created: self.created,
            storage_trie: None,
        }
    }
}
