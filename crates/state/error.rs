use ethrex_common::{Address, H256};

/// Errors surfaced by the state cache.
///
/// Read errors that occur while the VM is executing are never propagated
/// inline (see [`StateCache::db_error`](crate::cache::StateCache)) — they
/// are memoized and only turned into a `StateError` once `Commit` runs.
#[derive(Debug, thiserror::Error, Clone)]
pub enum StateError {
    #[error("failed to read account {0:?} from the backing store: {1}")]
    BackingStoreRead(Address, String),
    #[error("failed to mutate the trie: {0}")]
    TrieMutation(String),
    #[error("computed state root {computed:?} does not match expected root {expected:?}")]
    RootMismatch { computed: H256, expected: H256 },
    #[error("storage iterator for account {0:?} failed: {1}")]
    StorageIterator(Address, String),
    #[error("attempted to revert to unknown revision {0}")]
    InvalidRevision(i32),
    #[error("refund underflow: tried to subtract {amount} from a refund counter of {current}")]
    RefundUnderflow { current: u64, amount: u64 },
    #[error("code store read failed for account {0:?}: {1}")]
    CodeRead(Address, String),
    #[error("snapshot update failed: {0}")]
    SnapshotUpdate(String),
}

pub type StateResult<T> = Result<T, StateError>;
