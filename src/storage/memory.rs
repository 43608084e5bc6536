//! In-memory storage backend, used by tests and the `test-indexer` CLI
//! diagnostic mode (§9 — capability set injected at construction).

use super::{
    ActionQueueStorage, ConsensusStorage, GroupStorage, NonceStorage, SignatureRequestStorage,
    Storage, StorageResult, TransactionStorage, TransitionWrite, TxRow, WatcherCursor,
};
use crate::errors::StorageError;
use crate::model::{
    ActionQueueEntry, ConsensusState, GroupId, GroupRecord, NonceTree, RolloverState, SignatureId,
    SignatureRequest, SigningState,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

#[derive(Default)]
struct Inner {
    groups: BTreeMap<GroupId, GroupRecord>,
    nonce_links: BTreeMap<(GroupId, u64), [u8; 32]>,
    nonce_trees: BTreeMap<[u8; 32], NonceTree>,
    requests: BTreeMap<SignatureId, SignatureRequest>,
    actions: VecDeque<ActionQueueEntry>,
    pending_tx: BTreeMap<u64, TxRow>,
    consensus_state: ConsensusState,
    rollover_state: Option<RolloverState>,
    signing_states: BTreeMap<[u8; 32], SigningState>,
    cursor: WatcherCursor,
}

pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner::default()) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl GroupStorage for MemoryStorage {
    fn insert_group(&self, record: GroupRecord) -> StorageResult<()> {
        let mut inner = self.lock();
        if inner.groups.contains_key(&record.group_id) {
            return Err(StorageError::AlreadyExists(hex::encode(record.group_id)));
        }
        inner.groups.insert(record.group_id, record);
        Ok(())
    }

    fn get_group(&self, group_id: &GroupId) -> StorageResult<Option<GroupRecord>> {
        Ok(self.lock().groups.get(group_id).cloned())
    }

    fn update_group(&self, record: GroupRecord) -> StorageResult<()> {
        let mut inner = self.lock();
        if let Some(existing) = inner.groups.get(&record.group_id) {
            if existing.public_key.is_some() && record.public_key != existing.public_key {
                return Err(StorageError::SetOnceViolation("public_key"));
            }
            if existing.verification_share.is_some()
                && record.verification_share != existing.verification_share
            {
                return Err(StorageError::SetOnceViolation("verification_share"));
            }
            if existing.signing_share.is_some() && record.signing_share != existing.signing_share {
                return Err(StorageError::SetOnceViolation("signing_share"));
            }
        }
        inner.groups.insert(record.group_id, record);
        Ok(())
    }

    fn delete_group(&self, group_id: &GroupId) -> StorageResult<()> {
        self.lock().groups.remove(group_id);
        Ok(())
    }
}

impl NonceStorage for MemoryStorage {
    fn link_nonce_tree(&self, group_id: &GroupId, chunk: u64, root: [u8; 32]) -> StorageResult<()> {
        self.lock().nonce_links.insert((*group_id, chunk), root);
        Ok(())
    }

    fn insert_nonce_tree(&self, root: [u8; 32], tree: NonceTree) -> StorageResult<()> {
        let mut inner = self.lock();
        if inner.nonce_trees.contains_key(&root) {
            return Err(StorageError::AlreadyExists(hex::encode(root)));
        }
        inner.nonce_trees.insert(root, tree);
        Ok(())
    }

    fn get_nonce_tree(&self, root: &[u8; 32]) -> StorageResult<Option<NonceTree>> {
        Ok(self.lock().nonce_trees.get(root).cloned())
    }

    fn update_nonce_tree(&self, root: [u8; 32], tree: NonceTree) -> StorageResult<()> {
        self.lock().nonce_trees.insert(root, tree);
        Ok(())
    }

    fn next_unburned_leaf(&self, group_id: &GroupId) -> StorageResult<Option<([u8; 32], usize)>> {
        let inner = self.lock();
        let roots: Vec<[u8; 32]> = inner
            .nonce_links
            .iter()
            .filter(|((gid, _), _)| gid == group_id)
            .map(|(_, root)| *root)
            .collect();
        for root in roots {
            if let Some(tree) = inner.nonce_trees.get(&root) {
                if let Some(idx) = tree.commitments.iter().position(|c| !c.is_burned()) {
                    return Ok(Some((root, idx)));
                }
            }
        }
        Ok(None)
    }
}

impl SignatureRequestStorage for MemoryStorage {
    fn insert_request(&self, request: SignatureRequest) -> StorageResult<()> {
        let mut inner = self.lock();
        if inner.requests.contains_key(&request.signature_id) {
            return Err(StorageError::AlreadyExists(request.signature_id.to_string()));
        }
        inner.requests.insert(request.signature_id, request);
        Ok(())
    }

    fn get_request(&self, signature_id: SignatureId) -> StorageResult<Option<SignatureRequest>> {
        Ok(self.lock().requests.get(&signature_id).cloned())
    }

    fn update_request(&self, request: SignatureRequest) -> StorageResult<()> {
        self.lock().requests.insert(request.signature_id, request);
        Ok(())
    }

    fn delete_request(&self, signature_id: SignatureId) -> StorageResult<()> {
        self.lock().requests.remove(&signature_id);
        Ok(())
    }
}

impl ActionQueueStorage for MemoryStorage {
    fn push_action(&self, entry: ActionQueueEntry) -> StorageResult<()> {
        self.lock().actions.push_back(entry);
        Ok(())
    }

    fn peek_action(&self) -> StorageResult<Option<ActionQueueEntry>> {
        Ok(self.lock().actions.front().cloned())
    }

    fn pop_action(&self) -> StorageResult<()> {
        self.lock().actions.pop_front();
        Ok(())
    }

    fn queue_len(&self) -> StorageResult<usize> {
        Ok(self.lock().actions.len())
    }
}

impl TransactionStorage for MemoryStorage {
    fn insert_pending(&self, row: TxRow) -> StorageResult<()> {
        let mut inner = self.lock();
        if inner.pending_tx.contains_key(&row.nonce) {
            return Err(StorageError::AlreadyExists(row.nonce.to_string()));
        }
        inner.pending_tx.insert(row.nonce, row);
        Ok(())
    }

    fn get_pending(&self, nonce: u64) -> StorageResult<Option<TxRow>> {
        Ok(self.lock().pending_tx.get(&nonce).cloned())
    }

    fn update_pending(&self, row: TxRow) -> StorageResult<()> {
        self.lock().pending_tx.insert(row.nonce, row);
        Ok(())
    }

    fn delete_pending(&self, nonce: u64) -> StorageResult<()> {
        self.lock().pending_tx.remove(&nonce);
        Ok(())
    }

    fn all_pending(&self) -> StorageResult<Vec<TxRow>> {
        Ok(self.lock().pending_tx.values().cloned().collect())
    }

    fn max_reserved_nonce(&self) -> StorageResult<Option<u64>> {
        Ok(self.lock().pending_tx.keys().next_back().copied())
    }
}

impl ConsensusStorage for MemoryStorage {
    fn get_consensus_state(&self) -> StorageResult<ConsensusState> {
        Ok(self.lock().consensus_state.clone())
    }

    fn put_consensus_state(&self, state: ConsensusState) -> StorageResult<()> {
        self.lock().consensus_state = state;
        Ok(())
    }

    fn get_rollover_state(&self) -> StorageResult<Option<RolloverState>> {
        Ok(self.lock().rollover_state)
    }

    fn put_rollover_state(&self, state: RolloverState) -> StorageResult<()> {
        self.lock().rollover_state = Some(state);
        Ok(())
    }

    fn get_signing_states(&self) -> StorageResult<BTreeMap<[u8; 32], SigningState>> {
        Ok(self.lock().signing_states.clone())
    }

    fn put_signing_state(&self, message: [u8; 32], state: Option<SigningState>) -> StorageResult<()> {
        let mut inner = self.lock();
        match state {
            Some(s) => {
                inner.signing_states.insert(message, s);
            }
            None => {
                inner.signing_states.remove(&message);
            }
        }
        Ok(())
    }

    fn get_cursor(&self) -> StorageResult<WatcherCursor> {
        Ok(self.lock().cursor)
    }

    fn put_cursor(&self, cursor: WatcherCursor) -> StorageResult<()> {
        self.lock().cursor = cursor;
        Ok(())
    }
}

impl Storage for MemoryStorage {
    /// A single lock acquisition makes every write in `write` atomic with
    /// the cursor advance, same as `RocksStorage`'s `WriteBatch`.
    fn commit_transition(&self, write: TransitionWrite) -> StorageResult<()> {
        let mut inner = self.lock();
        if let Some(consensus) = write.consensus_delta {
            inner.consensus_state = consensus;
        }
        if let Some(rollover) = write.rollover {
            inner.rollover_state = Some(rollover);
        }
        if let Some((message, state)) = write.signing {
            match state {
                Some(s) => {
                    inner.signing_states.insert(message, s);
                }
                None => {
                    inner.signing_states.remove(&message);
                }
            }
        }
        inner.actions.extend(write.actions);
        inner.cursor = write.cursor;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Participant;

    #[test]
    fn set_once_public_key_rejects_mutation() {
        let storage = MemoryStorage::new();
        let mut record = GroupRecord::new(
            [1u8; 32],
            vec![Participant { id: 1, address: [0u8; 20] }],
            1,
            1,
        );
        storage.insert_group(record.clone()).unwrap();

        record.public_key = Some(crate::crypto::Point::generator());
        storage.update_group(record.clone()).unwrap();

        record.public_key = Some(crate::crypto::Point::identity());
        assert!(storage.update_group(record).is_err());
    }

    #[test]
    fn duplicate_insert_fails() {
        let storage = MemoryStorage::new();
        let record = GroupRecord::new(
            [2u8; 32],
            vec![Participant { id: 1, address: [0u8; 20] }],
            1,
            1,
        );
        storage.insert_group(record.clone()).unwrap();
        assert!(storage.insert_group(record).is_err());
    }

    #[test]
    fn commit_transition_advances_cursor_with_its_writes() {
        let storage = MemoryStorage::new();
        let mut consensus = storage.get_consensus_state().unwrap();
        consensus.active_epoch = 7;

        storage
            .commit_transition(TransitionWrite {
                consensus_delta: Some(consensus),
                cursor: (42, Some(3)),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(storage.get_consensus_state().unwrap().active_epoch, 7);
        assert_eq!(storage.get_cursor().unwrap(), (42, Some(3)));
    }
}
