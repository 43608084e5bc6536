//! Durable storage backend on top of RocksDB, one column family per
//! family named in §4.3. The upstream project's real manifest
//! (not the sparse teacher snapshot) is the grounding source for choosing
//! `rocksdb` here.

use super::{
    ActionQueueStorage, ConsensusStorage, GroupStorage, NonceStorage, SignatureRequestStorage,
    Storage, StorageResult, TransactionStorage, TransitionWrite, TxRow, WatcherCursor,
};
use crate::errors::StorageError;
use crate::model::{
    ActionQueueEntry, ConsensusState, GroupId, GroupRecord, NonceTree, RolloverState, SignatureId,
    SignatureRequest, SigningState,
};
use anyhow::Context;
use rocksdb::{ColumnFamilyDescriptor, Options, WriteBatch, DB};
use std::collections::BTreeMap;
use std::path::Path;

const CF_GROUPS: &str = "groups";
const CF_NONCE_LINKS: &str = "nonce_links";
const CF_NONCES: &str = "nonces";
const CF_REQUESTS: &str = "signature_requests";
const CF_ACTION_QUEUE: &str = "action_queue";
const CF_TX_STORE: &str = "tx_store";
const CF_SINGLETON: &str = "singletons";

const KEY_CONSENSUS_STATE: &[u8] = b"consensus_state";
const KEY_ROLLOVER_STATE: &[u8] = b"rollover_state";
const KEY_SIGNING_STATES: &[u8] = b"signing_states";
const KEY_CURSOR: &[u8] = b"watcher_cursor";
const KEY_ACTION_HEAD: &[u8] = b"action_queue_head";
const KEY_ACTION_TAIL: &[u8] = b"action_queue_tail";

pub struct RocksStorage {
    db: DB,
}

fn backend(e: impl std::error::Error + Send + Sync + 'static) -> StorageError {
    StorageError::Backend(anyhow::Error::new(e))
}

impl RocksStorage {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = [
            CF_GROUPS,
            CF_NONCE_LINKS,
            CF_NONCES,
            CF_REQUESTS,
            CF_ACTION_QUEUE,
            CF_TX_STORE,
            CF_SINGLETON,
        ]
        .iter()
        .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()));

        let db = DB::open_cf_descriptors(&opts, path, cfs)
            .context("failed to open rocksdb storage")?;

        Ok(Self { db })
    }

    fn cf(&self, name: &str) -> &rocksdb::ColumnFamily {
        self.db.cf_handle(name).expect("column family registered at open")
    }

    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        cf: &str,
        key: impl AsRef<[u8]>,
    ) -> StorageResult<Option<T>> {
        let bytes = self.db.get_cf(self.cf(cf), key).map_err(backend)?;
        match bytes {
            Some(b) => Ok(Some(serde_json::from_slice(&b).map_err(|e| backend(e))?)),
            None => Ok(None),
        }
    }

    fn put_json<T: serde::Serialize>(
        &self,
        cf: &str,
        key: impl AsRef<[u8]>,
        value: &T,
    ) -> StorageResult<()> {
        let bytes = serde_json::to_vec(value).map_err(|e| backend(e))?;
        self.db.put_cf(self.cf(cf), key, bytes).map_err(backend)
    }

    fn batch_put_json<T: serde::Serialize>(
        &self,
        batch: &mut WriteBatch,
        cf: &str,
        key: impl AsRef<[u8]>,
        value: &T,
    ) -> StorageResult<()> {
        let bytes = serde_json::to_vec(value).map_err(|e| backend(e))?;
        batch.put_cf(self.cf(cf), key, bytes);
        Ok(())
    }
}

impl GroupStorage for RocksStorage {
    fn insert_group(&self, record: GroupRecord) -> StorageResult<()> {
        if self.get_json::<GroupRecord>(CF_GROUPS, record.group_id)?.is_some() {
            return Err(StorageError::AlreadyExists(hex::encode(record.group_id)));
        }
        self.put_json(CF_GROUPS, record.group_id, &record)
    }

    fn get_group(&self, group_id: &GroupId) -> StorageResult<Option<GroupRecord>> {
        self.get_json(CF_GROUPS, group_id)
    }

    fn update_group(&self, record: GroupRecord) -> StorageResult<()> {
        if let Some(existing) = self.get_json::<GroupRecord>(CF_GROUPS, record.group_id)? {
            if existing.public_key.is_some() && record.public_key != existing.public_key {
                return Err(StorageError::SetOnceViolation("public_key"));
            }
            if existing.signing_share.is_some() && record.signing_share != existing.signing_share {
                return Err(StorageError::SetOnceViolation("signing_share"));
            }
        }
        self.put_json(CF_GROUPS, record.group_id, &record)
    }

    fn delete_group(&self, group_id: &GroupId) -> StorageResult<()> {
        self.db.delete_cf(self.cf(CF_GROUPS), group_id).map_err(backend)
    }
}

impl NonceStorage for RocksStorage {
    fn link_nonce_tree(&self, group_id: &GroupId, chunk: u64, root: [u8; 32]) -> StorageResult<()> {
        let mut key = group_id.to_vec();
        key.extend_from_slice(&chunk.to_be_bytes());
        self.put_json(CF_NONCE_LINKS, key, &root)
    }

    fn insert_nonce_tree(&self, root: [u8; 32], tree: NonceTree) -> StorageResult<()> {
        if self.get_json::<NonceTree>(CF_NONCES, root)?.is_some() {
            return Err(StorageError::AlreadyExists(hex::encode(root)));
        }
        self.put_json(CF_NONCES, root, &tree)
    }

    fn get_nonce_tree(&self, root: &[u8; 32]) -> StorageResult<Option<NonceTree>> {
        self.get_json(CF_NONCES, root)
    }

    fn update_nonce_tree(&self, root: [u8; 32], tree: NonceTree) -> StorageResult<()> {
        self.put_json(CF_NONCES, root, &tree)
    }

    fn next_unburned_leaf(&self, group_id: &GroupId) -> StorageResult<Option<([u8; 32], usize)>> {
        let prefix = group_id.to_vec();
        let iter = self.db.prefix_iterator_cf(self.cf(CF_NONCE_LINKS), &prefix);
        for item in iter {
            let (_, value) = item.map_err(backend)?;
            let root: [u8; 32] = serde_json::from_slice(&value).map_err(|e| backend(e))?;
            if let Some(tree) = self.get_json::<NonceTree>(CF_NONCES, root)? {
                if let Some(idx) = tree.commitments.iter().position(|c| !c.is_burned()) {
                    return Ok(Some((root, idx)));
                }
            }
        }
        Ok(None)
    }
}

impl SignatureRequestStorage for RocksStorage {
    fn insert_request(&self, request: SignatureRequest) -> StorageResult<()> {
        if self
            .get_json::<SignatureRequest>(CF_REQUESTS, request.signature_id.to_be_bytes())?
            .is_some()
        {
            return Err(StorageError::AlreadyExists(request.signature_id.to_string()));
        }
        self.put_json(CF_REQUESTS, request.signature_id.to_be_bytes(), &request)
    }

    fn get_request(&self, signature_id: SignatureId) -> StorageResult<Option<SignatureRequest>> {
        self.get_json(CF_REQUESTS, signature_id.to_be_bytes())
    }

    fn update_request(&self, request: SignatureRequest) -> StorageResult<()> {
        self.put_json(CF_REQUESTS, request.signature_id.to_be_bytes(), &request)
    }

    fn delete_request(&self, signature_id: SignatureId) -> StorageResult<()> {
        self.db
            .delete_cf(self.cf(CF_REQUESTS), signature_id.to_be_bytes())
            .map_err(backend)
    }
}

/// The queue is a contiguous `[head, tail)` index range over the
/// `action_queue` column family, so head-of-line peek/pop are O(1).
impl ActionQueueStorage for RocksStorage {
    fn push_action(&self, entry: ActionQueueEntry) -> StorageResult<()> {
        let tail: u64 = self.get_json(CF_SINGLETON, KEY_ACTION_TAIL)?.unwrap_or(0);
        self.put_json(CF_ACTION_QUEUE, tail.to_be_bytes(), &entry)?;
        self.put_json(CF_SINGLETON, KEY_ACTION_TAIL, &(tail + 1))
    }

    fn peek_action(&self) -> StorageResult<Option<ActionQueueEntry>> {
        let head: u64 = self.get_json(CF_SINGLETON, KEY_ACTION_HEAD)?.unwrap_or(0);
        self.get_json(CF_ACTION_QUEUE, head.to_be_bytes())
    }

    fn pop_action(&self) -> StorageResult<()> {
        let head: u64 = self.get_json(CF_SINGLETON, KEY_ACTION_HEAD)?.unwrap_or(0);
        self.db
            .delete_cf(self.cf(CF_ACTION_QUEUE), head.to_be_bytes())
            .map_err(backend)?;
        self.put_json(CF_SINGLETON, KEY_ACTION_HEAD, &(head + 1))
    }

    fn queue_len(&self) -> StorageResult<usize> {
        let head: u64 = self.get_json(CF_SINGLETON, KEY_ACTION_HEAD)?.unwrap_or(0);
        let tail: u64 = self.get_json(CF_SINGLETON, KEY_ACTION_TAIL)?.unwrap_or(0);
        Ok(tail.saturating_sub(head) as usize)
    }
}

impl TransactionStorage for RocksStorage {
    fn insert_pending(&self, row: TxRow) -> StorageResult<()> {
        if self.get_json::<TxRow>(CF_TX_STORE, row.nonce.to_be_bytes())?.is_some() {
            return Err(StorageError::AlreadyExists(row.nonce.to_string()));
        }
        self.put_json(CF_TX_STORE, row.nonce.to_be_bytes(), &row)
    }

    fn get_pending(&self, nonce: u64) -> StorageResult<Option<TxRow>> {
        self.get_json(CF_TX_STORE, nonce.to_be_bytes())
    }

    fn update_pending(&self, row: TxRow) -> StorageResult<()> {
        self.put_json(CF_TX_STORE, row.nonce.to_be_bytes(), &row)
    }

    fn delete_pending(&self, nonce: u64) -> StorageResult<()> {
        self.db.delete_cf(self.cf(CF_TX_STORE), nonce.to_be_bytes()).map_err(backend)
    }

    fn all_pending(&self) -> StorageResult<Vec<TxRow>> {
        let mut out = Vec::new();
        for item in self.db.iterator_cf(self.cf(CF_TX_STORE), rocksdb::IteratorMode::Start) {
            let (_, value) = item.map_err(backend)?;
            out.push(serde_json::from_slice(&value).map_err(|e| backend(e))?);
        }
        Ok(out)
    }

    fn max_reserved_nonce(&self) -> StorageResult<Option<u64>> {
        let mut max = None;
        for item in self.db.iterator_cf(self.cf(CF_TX_STORE), rocksdb::IteratorMode::Start) {
            let (key, _) = item.map_err(backend)?;
            let nonce = u64::from_be_bytes(key.as_ref().try_into().map_err(|_| {
                StorageError::Backend(anyhow::anyhow!("corrupt tx_store key"))
            })?);
            max = Some(max.map_or(nonce, |m: u64| m.max(nonce)));
        }
        Ok(max)
    }
}

impl ConsensusStorage for RocksStorage {
    fn get_consensus_state(&self) -> StorageResult<ConsensusState> {
        Ok(self.get_json(CF_SINGLETON, KEY_CONSENSUS_STATE)?.unwrap_or_default())
    }

    fn put_consensus_state(&self, state: ConsensusState) -> StorageResult<()> {
        self.put_json(CF_SINGLETON, KEY_CONSENSUS_STATE, &state)
    }

    fn get_rollover_state(&self) -> StorageResult<Option<RolloverState>> {
        self.get_json(CF_SINGLETON, KEY_ROLLOVER_STATE)
    }

    fn put_rollover_state(&self, state: RolloverState) -> StorageResult<()> {
        self.put_json(CF_SINGLETON, KEY_ROLLOVER_STATE, &state)
    }

    fn get_signing_states(&self) -> StorageResult<BTreeMap<[u8; 32], SigningState>> {
        Ok(self
            .get_json::<BTreeMap<[u8; 32], SigningState>>(CF_SINGLETON, KEY_SIGNING_STATES)?
            .unwrap_or_default())
    }

    fn put_signing_state(&self, message: [u8; 32], state: Option<SigningState>) -> StorageResult<()> {
        let mut all = self.get_signing_states()?;
        match state {
            Some(s) => {
                all.insert(message, s);
            }
            None => {
                all.remove(&message);
            }
        }
        self.put_json(CF_SINGLETON, KEY_SIGNING_STATES, &all)
    }

    fn get_cursor(&self) -> StorageResult<WatcherCursor> {
        Ok(self.get_json(CF_SINGLETON, KEY_CURSOR)?.unwrap_or((0, None)))
    }

    fn put_cursor(&self, cursor: WatcherCursor) -> StorageResult<()> {
        self.put_json(CF_SINGLETON, KEY_CURSOR, &cursor)
    }
}

impl Storage for RocksStorage {
    /// Batches the transition's writes with the cursor advance into one
    /// `WriteBatch` (§4.8, §9): a crash between them is impossible, so a
    /// replayed watcher event is never applied twice.
    fn commit_transition(&self, write: TransitionWrite) -> StorageResult<()> {
        let mut batch = WriteBatch::default();

        if let Some(consensus) = &write.consensus_delta {
            self.batch_put_json(&mut batch, CF_SINGLETON, KEY_CONSENSUS_STATE, consensus)?;
        }
        if let Some(rollover) = &write.rollover {
            self.batch_put_json(&mut batch, CF_SINGLETON, KEY_ROLLOVER_STATE, rollover)?;
        }
        if let Some((message, state)) = &write.signing {
            let mut all = self.get_signing_states()?;
            match state {
                Some(s) => {
                    all.insert(*message, s.clone());
                }
                None => {
                    all.remove(message);
                }
            }
            self.batch_put_json(&mut batch, CF_SINGLETON, KEY_SIGNING_STATES, &all)?;
        }
        if !write.actions.is_empty() {
            let mut tail: u64 = self.get_json(CF_SINGLETON, KEY_ACTION_TAIL)?.unwrap_or(0);
            for entry in &write.actions {
                self.batch_put_json(&mut batch, CF_ACTION_QUEUE, tail.to_be_bytes(), entry)?;
                tail += 1;
            }
            self.batch_put_json(&mut batch, CF_SINGLETON, KEY_ACTION_TAIL, &tail)?;
        }

        self.batch_put_json(&mut batch, CF_SINGLETON, KEY_CURSOR, &write.cursor)?;
        self.db.write(batch).map_err(backend)
    }
}
