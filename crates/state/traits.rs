//! Capability traits for every backing-store collaborator the cache talks to.
//!
//! None of these are implemented here beyond what a test double needs
//! (see `cache::tests::mock`); the real trie, snapshot tree and disk store
//! live outside this crate. The cache is generic over them so it never
//! has to know which concrete store it's pointed at.

use ethrex_common::{Address, H256, types::Account};
use rustc_hash::FxHashMap;

use crate::error::StateResult;

/// A delta of trie nodes produced by one `Trie::commit`, merged under a
/// single mutex at the end of the parallel commit phase.
#[derive(Debug, Default, Clone)]
pub struct NodeSet {
    nodes: FxHashMap<Vec<u8>, Vec<u8>>,
    /// Paths explicitly recorded as deleted (used by `delete_storage`'s
    /// stack-trie leaf callback).
    deletions: Vec<Vec<u8>>,
}

impl NodeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: Vec<u8>, node: Vec<u8>) {
        self.nodes.insert(path, node);
    }

    pub fn delete(&mut self, path: Vec<u8>) {
        self.deletions.push(path);
    }

    pub fn len(&self) -> usize {
        self.nodes.len() + self.deletions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.deletions.is_empty()
    }

    /// Folds `other` into `self`. Called under the commit-phase node-set
    /// mutex; merge is append-only, later writers win on key collisions.
    pub fn merge(&mut self, other: NodeSet) {
        self.nodes.extend(other.nodes);
        self.deletions.extend(other.deletions);
    }
}

/// One account as read from a snapshot diff/disk layer: the slim-RLP fields,
/// already decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlimAccount {
    pub nonce: u64,
    pub balance: ethrex_common::U256,
    pub storage_root: H256,
    pub code_hash: H256,
}

impl From<SlimAccount> for Account {
    fn from(value: SlimAccount) -> Self {
        Account {
            nonce: value.nonce,
            balance: value.balance,
            storage_root: value.storage_root,
            code_hash: value.code_hash,
        }
    }
}

/// The Merkle-Patricia trie, treated as an opaque path/value store keyed by
/// 32-byte hashed paths (account trie: `Keccak256(address)`; storage trie:
/// `Keccak256(slot)`).
pub trait Trie: Send + Sync {
    fn get(&self, path: H256) -> StateResult<Option<Vec<u8>>>;
    fn insert(&mut self, path: H256, value: Vec<u8>) -> StateResult<()>;
    fn remove(&mut self, path: H256) -> StateResult<()>;
    /// Root hash of the trie as it stands, without persisting anything.
    fn hash(&mut self) -> StateResult<H256>;
    /// Persists the trie's pending edits and returns the new root together
    /// with the delta of touched nodes. `collect_leaf` additionally asks the
    /// trie to report touched leaf paths (used by witness generation;
    /// ignored by a plain commit).
    fn commit(&mut self, collect_leaf: bool) -> StateResult<(H256, NodeSet)>;
    /// Iterates `(path, value)` pairs starting at `seek`, in path order.
    fn node_iterator(&self, seek: H256) -> Box<dyn Iterator<Item = (H256, Vec<u8>)> + '_>;
}

/// Opens and copies tries, and exposes the lower collaborators (`TrieDB`,
/// the disk key-value store, the code store) the cache needs to reach them.
pub trait Database: Send + Sync {
    fn open_trie(&self, root: H256) -> StateResult<Box<dyn Trie>>;
    fn open_storage_trie(
        &self,
        state_root: H256,
        address: Address,
        storage_root: H256,
        account_trie: &dyn Trie,
    ) -> StateResult<Box<dyn Trie>>;
    fn copy_trie(&self, trie: &dyn Trie) -> StateResult<Box<dyn Trie>>;
    fn trie_db(&self) -> &dyn TrieDB;
    fn disk_db(&self) -> &dyn KVStore;
    fn get_code(&self, code_hash: H256) -> StateResult<Option<ethrex_common::types::Code>>;
}

/// Read-optimized secondary store of the state at a given root.
pub trait Snapshot: Send + Sync {
    fn root(&self) -> H256;
    fn account(&self, addr_hash: H256) -> StateResult<Option<SlimAccount>>;
    fn storage_iterator(
        &self,
        state_root: H256,
        addr_hash: H256,
        seek: H256,
    ) -> StateResult<Box<dyn Iterator<Item = (H256, Vec<u8>)> + '_>>;
}

/// The append-only diff-layer stack sitting on top of a disk layer.
pub trait SnapshotTree: Send + Sync {
    fn snapshot(&self, root: H256) -> Option<std::sync::Arc<dyn Snapshot>>;
    #[allow(clippy::too_many_arguments)]
    fn update(
        &self,
        new_root: H256,
        parent_root: H256,
        destruct_set: &FxHashMap<H256, ()>,
        accounts: &FxHashMap<H256, Vec<u8>>,
        storages: &FxHashMap<H256, FxHashMap<H256, Vec<u8>>>,
    ) -> StateResult<()>;
    fn cap(&self, root: H256, layers: usize) -> StateResult<()>;
}

/// Node-addressing scheme of the trie node database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Hash,
    Path,
}

/// Extra bookkeeping handed to the trie node database alongside a commit, so
/// it can reconcile an (possibly incomplete) destruction diff on its own
/// timeline.
#[derive(Debug, Default, Clone)]
pub struct TrieState {
    pub accounts_origin: FxHashMap<Address, Option<Vec<u8>>>,
    pub storages_origin: FxHashMap<Address, FxHashMap<H256, Vec<u8>>>,
    pub incomplete: FxHashMap<Address, ()>,
}

pub trait TrieDB: Send + Sync {
    fn scheme(&self) -> Scheme;
    fn update(
        &self,
        root: H256,
        parent: H256,
        block: u64,
        merged_nodes: NodeSet,
        trie_state: TrieState,
    ) -> StateResult<()>;
}

/// The disk key-value store and its write-batch abstraction; out of scope
/// beyond this shape.
pub trait KVStore: Send + Sync {
    fn write_batch(&self) -> Box<dyn WriteBatch>;
}

pub trait WriteBatch {
    fn put(&mut self, key: &[u8], value: &[u8]);
    fn value_size(&self) -> usize;
    fn flush(&mut self) -> StateResult<()>;
}

/// What kind of field was touched, for the optional MVStates recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Balance,
    Nonce,
    CodeHash,
    Suicide,
}

/// Background loader that warms trie nodes for addresses the cache expects
/// to read soon. Purely an optimization: the cache never depends on what it
/// returns, only on `trie()` handing back an already-resolved tree so
/// `state_intermediate_root` can skip reopening one.
pub trait Prefetcher: Send + Sync {
    /// Schedules `keys` under `addr_prefix` at `root` for background
    /// warm-up against `state_root`.
    fn prefetch(&self, state_root: H256, root: H256, addr_prefix: H256, keys: Vec<H256>);
    /// Marks `keys` under `addr_prefix` at `root` as already consumed, so
    /// the prefetcher can drop them from its queue.
    fn used(&self, root: H256, addr_prefix: H256, keys: &[H256]);
    /// Returns the hot trie for `root`/`origin` if the prefetcher finished
    /// warming it, `None` otherwise.
    fn trie(&self, root: H256, origin: H256) -> Option<Box<dyn Trie>>;
    /// Produces an inactive clone, for `StateCache::copy`.
    fn copy(&self) -> Box<dyn Prefetcher>;
    /// Releases background resources; called on every exit path.
    fn close(&self);
}

/// Optional multi-version/parallel-execution observer. The cache calls
/// these as a pure side effect of reads/writes; they must never influence
/// state semantics.
pub trait MVStates: Send + Sync {
    fn record_account_read(&self, addr: Address, kind: AccessKind);
    fn record_storage_read(&self, addr: Address, slot: H256);
    fn record_account_write(&self, addr: Address, kind: AccessKind);
    fn record_new_tx(&self, tx_index: usize);
    fn record_read_done(&self);
    fn record_write_done(&self);
    fn finalise_with_rwset(&self);
    fn record_cannot_delay_gas_fee(&self);
    fn fee_receivers(&self) -> Vec<Address>;
    fn resolve_tx_dag(&self, tx_count: usize, extras: &[u8]) -> Vec<u8>;
}
