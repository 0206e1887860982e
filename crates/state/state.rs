//! In-memory transactional state cache sitting atop a Merkle-Patricia trie.
//!
//! [`StateCache`](cache::StateCache) is the entry point: it answers account
//! and storage queries against a tri-layered pipeline (live objects →
//! snapshot → trie), buffers writes in a journal so they can be reverted to
//! an earlier savepoint, and turns a block's worth of buffered writes into a
//! new state root via `Finalise` → `IntermediateRoot` → `Commit`.

pub mod access_list;
pub mod cache;
pub mod error;
pub mod journal;
pub mod object;
pub mod traits;
pub mod transient_storage;

pub use access_list::AccessList;
pub use cache::{Log, StateCache, SNAPSHOT_LAYER_CAP, STORAGE_DELETE_LIMIT};
pub use error::{StateError, StateResult};
pub use journal::{Journal, JournalEntry, Revision};
pub use object::{address_hash, StateObject, StorageSource};
pub use traits::{
    AccessKind, Database, KVStore, MVStates, NodeSet, Scheme, SlimAccount, Snapshot, SnapshotTree,
    Trie, TrieDB, TrieState, WriteBatch,
};
pub use transient_storage::TransientStorage;
