//! State machine (C8): event/block/action-timeout driven rollover and
//! signing orchestration with atomic state diffs. Grounded in the
//! teacher's per-ceremony driver shape (`multisig/client/keygen_state_runner.rs`
//! generalized from a single ceremony to the durable consensus state).

pub mod diff;
pub mod rollover;
pub mod signing_state;

pub use diff::StateDiff;

use crate::client::keygen::KeyGenClient;
use crate::client::signing::SigningClient;
use crate::crypto::{Point, Scalar};
use crate::frost::keygen::ProofOfKnowledge;
use crate::model::{GroupId, Participant, ParticipantId, RolloverState, SignatureId, SigningState};
use crate::storage::Storage;
use slog::{o, Logger};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as u64
}

#[derive(Debug, Clone)]
pub struct MachineConfig {
    pub chain_id: u64,
    pub consensus_address: [u8; 20],
    pub key_gen_timeout: u64,
    pub signing_timeout: u64,
}

/// Transition inputs (§4.8): watcher events, block ticks, and the
/// action-timeout pseudo-event that drives the `on_timeout` sweep.
#[derive(Debug, Clone)]
pub enum Event {
    KeyGen { group_id: GroupId, participants: Vec<Participant>, threshold: u64, context: [u8; 32] },
    KeyGenCommitted { group_id: GroupId, id: ParticipantId, commitments: Vec<Point>, pok: ProofOfKnowledge },
    KeyGenSecretShared { group_id: GroupId, sender_id: ParticipantId, encrypted_share: [u8; 32] },
    KeyGenComplaintSubmitted { group_id: GroupId, plaintiff: ParticipantId, accused: ParticipantId },
    KeyGenComplaintResponded { group_id: GroupId, plaintiff: ParticipantId, accused: ParticipantId, share: Scalar },
    KeyGenConfirmed { group_id: GroupId, participant: ParticipantId },
    Sign { group_id: GroupId, message: [u8; 32], signature_id: SignatureId },
    NonceCommitmentsHash { group_id: GroupId, participant: ParticipantId, root: [u8; 32], chunk: u64 },
    NonceCommitments { signature_id: SignatureId, signer: ParticipantId, hiding: Point, binding: Point },
    SignatureShare { signature_id: SignatureId, signer: ParticipantId, share: Scalar },
    Signed { signature_id: SignatureId },
    EpochProposed { proposed_epoch: u64, rollover_block: u64, group_id: GroupId },
    EpochStaged { proposed_epoch: u64 },
    TransactionProposed { group_id: GroupId, message: [u8; 32] },
    TransactionAttested { epoch: u64, signature_id: SignatureId },
}

pub struct Driver<S> {
    storage: Arc<S>,
    keygen: Arc<KeyGenClient<S>>,
    signing: Arc<SigningClient<S>>,
    cfg: MachineConfig,
    this_id: ParticipantId,
    logger: Logger,
}

impl<S: Storage> Driver<S> {
    pub fn new(
        storage: Arc<S>,
        keygen: Arc<KeyGenClient<S>>,
        signing: Arc<SigningClient<S>>,
        cfg: MachineConfig,
        this_id: ParticipantId,
        logger: &Logger,
    ) -> Self {
        Self { storage, keygen, signing, cfg, this_id, logger: logger.new(o!(crate::constants::COMPONENT_KEY => "Machine")) }
    }

    /// Handles a single watcher event at `block_number`, producing a
    /// `StateDiff` to be applied atomically with the cursor advance.
    pub fn on_event(&self, block_number: u64, event: Event) -> anyhow::Result<StateDiff> {
        if let Event::NonceCommitmentsHash { group_id, chunk, root, .. } = &event {
            self.signing.handle_nonce_commitments_hash(group_id, *chunk, *root)?;
            return Ok(StateDiff::default());
        }

        if let Event::TransactionProposed { group_id, message } = &event {
            return Ok(StateDiff {
                signing: Some((*message, Some(SigningState::WaitingForRequest))),
                actions: vec![crate::model::ActionQueueEntry {
                    action: crate::model::ProtocolAction::RequestSignature { group_id: *group_id, message: *message },
                    valid_until_ms: now_ms() + crate::constants::DEFAULT_ACTION_TTL_MS,
                }],
                ..Default::default()
            });
        }

        let consensus = self.storage.get_consensus_state()?;

        if let Some(message) = message_for_event(&consensus, &event) {
            if let Some(state) = self.storage.get_signing_states()?.get(&message).cloned() {
                return signing_state::handle(
                    &self.signing,
                    &self.storage,
                    &self.cfg,
                    self.this_id,
                    &consensus,
                    message,
                    state,
                    block_number,
                    &event,
                );
            }
        }

        let rollover = self.storage.get_rollover_state()?.unwrap_or(RolloverState::WaitingForRollover);
        rollover::handle(&*self.storage, &self.keygen, &self.cfg, self.this_id, &consensus, rollover, block_number, &event)
    }

    /// Block-tick duties (§4.8): epoch advance, DKG triggering, timeout
    /// scanning across both the rollover and signing state machines.
    pub fn on_block_tick(&self, block_number: u64) -> anyhow::Result<StateDiff> {
        let mut consensus = self.storage.get_consensus_state()?;
        let mut diff = StateDiff::default();

        if consensus.staged_epoch != 0 && block_number >= consensus.epoch_rollover_block(consensus.staged_epoch) {
            consensus.active_epoch = consensus.staged_epoch;
            diff.consensus_delta = Some(consensus.clone());
        }

        let rollover = self.storage.get_rollover_state()?.unwrap_or(RolloverState::WaitingForRollover);
        let timeout_diff = rollover::on_timeout(&*self.storage, &consensus, rollover, block_number);
        if !timeout_diff.is_empty() {
            slog::info!(self.logger, "rollover timeout fired"; "block" => block_number);
            return Ok(merge(diff, timeout_diff));
        }

        for (message, state) in self.storage.get_signing_states()? {
            let signature_id = consensus.signature_to_message.iter().find(|(_, m)| **m == message).map(|(sid, _)| *sid);
            let threshold = signature_id
                .and_then(|sid| self.storage.get_request(sid).ok().flatten())
                .and_then(|req| self.storage.get_group(&req.group_id).ok().flatten())
                .map(|g| g.threshold)
                .unwrap_or(0);

            let timeout_diff = signing_state::on_timeout(&*self.storage, threshold, message, signature_id, state, block_number);
            if !timeout_diff.is_empty() {
                return Ok(merge(diff, timeout_diff));
            }
        }

        Ok(diff)
    }

    /// Applies a `StateDiff` to persistent storage atomically with the
    /// watcher cursor advance to `cursor`, via `Storage::commit_transition`:
    /// a crash here can never leave the cursor past an unapplied diff, or
    /// past a diff the cursor doesn't yet reflect.
    pub fn commit(&self, diff: StateDiff, cursor: crate::storage::WatcherCursor) -> anyhow::Result<()> {
        self.storage.commit_transition(crate::storage::TransitionWrite {
            consensus_delta: diff.consensus_delta,
            rollover: diff.rollover,
            signing: diff.signing,
            actions: diff.actions,
            cursor,
        })?;
        Ok(())
    }
}

fn merge(mut a: StateDiff, b: StateDiff) -> StateDiff {
    if b.consensus_delta.is_some() {
        a.consensus_delta = b.consensus_delta;
    }
    if b.rollover.is_some() {
        a.rollover = b.rollover;
    }
    if b.signing.is_some() {
        a.signing = b.signing;
    }
    a.actions.extend(b.actions);
    a
}

fn message_for_event(consensus: &crate::model::ConsensusState, event: &Event) -> Option<[u8; 32]> {
    match event {
        Event::Sign { message, .. } => Some(*message),
        Event::NonceCommitments { signature_id, .. }
        | Event::SignatureShare { signature_id, .. }
        | Event::Signed { signature_id } => consensus.signature_to_message.get(signature_id).copied(),
        Event::TransactionAttested { signature_id, .. } => consensus.signature_to_message.get(signature_id).copied(),
        Event::EpochStaged { .. } | Event::TransactionProposed { .. } => None,
        _ => None,
    }
}

