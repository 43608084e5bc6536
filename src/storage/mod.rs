//! Persistent storage (C3): a set of crash-safe key-value families, each
//! exposed as a capability trait rather than a single monolithic interface
//! (§9 design note — polymorphic storage backends via capability sets).

mod memory;
mod rocks;

pub use memory::MemoryStorage;
pub use rocks::RocksStorage;

use crate::errors::StorageError;
use crate::model::{
    ActionQueueEntry, ConsensusState, GroupId, GroupRecord, NonceTree, ParticipantId,
    RolloverState, SignatureId, SignatureRequest, SigningState,
};
use std::collections::BTreeMap;

pub type StorageResult<T> = Result<T, StorageError>;

/// `(block_number, log_index)`; `log_index = None` denotes a block tick.
pub type WatcherCursor = (u64, Option<u64>);

pub trait GroupStorage: Send + Sync {
    fn insert_group(&self, record: GroupRecord) -> StorageResult<()>;
    fn get_group(&self, group_id: &GroupId) -> StorageResult<Option<GroupRecord>>;
    fn update_group(&self, record: GroupRecord) -> StorageResult<()>;
    fn delete_group(&self, group_id: &GroupId) -> StorageResult<()>;
}

pub trait NonceStorage: Send + Sync {
    fn link_nonce_tree(&self, group_id: &GroupId, chunk: u64, root: [u8; 32]) -> StorageResult<()>;
    fn insert_nonce_tree(&self, root: [u8; 32], tree: NonceTree) -> StorageResult<()>;
    fn get_nonce_tree(&self, root: &[u8; 32]) -> StorageResult<Option<NonceTree>>;
    fn update_nonce_tree(&self, root: [u8; 32], tree: NonceTree) -> StorageResult<()>;
    /// Finds the next unburned leaf in any tree linked to `group_id`.
    fn next_unburned_leaf(&self, group_id: &GroupId) -> StorageResult<Option<([u8; 32], usize)>>;
}

pub trait SignatureRequestStorage: Send + Sync {
    fn insert_request(&self, request: SignatureRequest) -> StorageResult<()>;
    fn get_request(&self, signature_id: SignatureId) -> StorageResult<Option<SignatureRequest>>;
    fn update_request(&self, request: SignatureRequest) -> StorageResult<()>;
    fn delete_request(&self, signature_id: SignatureId) -> StorageResult<()>;
}

pub trait ActionQueueStorage: Send + Sync {
    fn push_action(&self, entry: ActionQueueEntry) -> StorageResult<()>;
    fn peek_action(&self) -> StorageResult<Option<ActionQueueEntry>>;
    fn pop_action(&self) -> StorageResult<()>;
    fn queue_len(&self) -> StorageResult<usize>;
}

pub trait TransactionStorage: Send + Sync {
    fn insert_pending(&self, row: TxRow) -> StorageResult<()>;
    fn get_pending(&self, nonce: u64) -> StorageResult<Option<TxRow>>;
    fn update_pending(&self, row: TxRow) -> StorageResult<()>;
    fn delete_pending(&self, nonce: u64) -> StorageResult<()>;
    fn all_pending(&self) -> StorageResult<Vec<TxRow>>;
    fn max_reserved_nonce(&self) -> StorageResult<Option<u64>>;
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct TxRow {
    pub nonce: u64,
    pub calldata: Vec<u8>,
    pub to: [u8; 20],
    pub value: [u8; 32],
    pub gas: u64,
    pub created_at_ms: u64,
    pub hash: Option<[u8; 32]>,
}

pub trait ConsensusStorage: Send + Sync {
    fn get_consensus_state(&self) -> StorageResult<ConsensusState>;
    fn put_consensus_state(&self, state: ConsensusState) -> StorageResult<()>;

    fn get_rollover_state(&self) -> StorageResult<Option<RolloverState>>;
    fn put_rollover_state(&self, state: RolloverState) -> StorageResult<()>;

    fn get_signing_states(&self) -> StorageResult<BTreeMap<[u8; 32], SigningState>>;
    fn put_signing_state(&self, message: [u8; 32], state: Option<SigningState>) -> StorageResult<()>;

    fn get_cursor(&self) -> StorageResult<WatcherCursor>;
    fn put_cursor(&self, cursor: WatcherCursor) -> StorageResult<()>;
}

/// Everything a single machine transition writes (§4.8), bundled with the
/// watcher cursor advance it must land alongside. `Storage::commit_transition`
/// applies all of it as one atomic unit so a crash mid-transition can never
/// leave the cursor pointing past a write that didn't happen (or vice versa).
#[derive(Debug, Default, Clone)]
pub struct TransitionWrite {
    pub consensus_delta: Option<ConsensusState>,
    pub rollover: Option<RolloverState>,
    pub signing: Option<([u8; 32], Option<SigningState>)>,
    pub actions: Vec<ActionQueueEntry>,
    pub cursor: WatcherCursor,
}

/// The full storage surface a component receives: all capability traits
/// plus atomic transition application (§4.8: `StateDiff` application is
/// atomic with the watcher cursor advance).
pub trait Storage:
    GroupStorage + NonceStorage + SignatureRequestStorage + ActionQueueStorage + TransactionStorage + ConsensusStorage
{
    fn commit_transition(&self, write: TransitionWrite) -> StorageResult<()>;
}

pub fn participant_ids(group: &GroupRecord) -> Vec<ParticipantId> {
    group.participants.iter().map(|p| p.id).collect()
}
