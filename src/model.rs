//! Shared data model (§3). Tagged unions replace untagged discriminated
//! maps throughout, per the design note in §9.

use crate::crypto::{Point, Scalar};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use zeroize::Zeroize;

pub type ParticipantId = u64;
pub type GroupId = [u8; 32];
pub type SignatureId = u64;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Participant {
    pub id: ParticipantId,
    pub address: [u8; 20],
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Group {
    pub group_id: GroupId,
    pub participants: Vec<Participant>,
    pub threshold: u64,
}

impl Group {
    pub fn n(&self) -> u64 {
        self.participants.len() as u64
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroupRecord {
    pub group_id: GroupId,
    pub participants: Vec<Participant>,
    pub threshold: u64,
    pub this_participant_id: ParticipantId,
    pub public_key: Option<Point>,
    pub verification_share: Option<Point>,
    pub signing_share: Option<Scalar>,
    pub commitments_by_id: BTreeMap<ParticipantId, Vec<Point>>,
    pub secret_shares_by_id: BTreeMap<ParticipantId, Scalar>,
    pub coefficients: Option<Vec<Scalar>>,
}

impl GroupRecord {
    pub fn new(
        group_id: GroupId,
        participants: Vec<Participant>,
        threshold: u64,
        this_participant_id: ParticipantId,
    ) -> Self {
        Self {
            group_id,
            participants,
            threshold,
            this_participant_id,
            public_key: None,
            verification_share: None,
            signing_share: None,
            commitments_by_id: BTreeMap::new(),
            secret_shares_by_id: BTreeMap::new(),
            coefficients: None,
        }
    }

    pub fn commitments_complete(&self) -> bool {
        self.commitments_by_id.len() == self.participants.len()
    }

    pub fn shares_complete(&self) -> bool {
        self.secret_shares_by_id.len() == self.participants.len()
    }
}

/// A single `(hiding, binding)` nonce commitment pair. Burned nonces have
/// both scalars zeroed (invariant: a nonce is used exactly once).
#[derive(Clone, Debug, Default, Serialize, Deserialize, Zeroize)]
pub struct NonceCommitment {
    pub hiding_scalar: Option<Scalar>,
    pub binding_scalar: Option<Scalar>,
    #[zeroize(skip)]
    pub hiding_point: Point,
    #[zeroize(skip)]
    pub binding_point: Point,
}

impl NonceCommitment {
    pub fn is_burned(&self) -> bool {
        self.hiding_scalar.is_none() && self.binding_scalar.is_none()
    }

    pub fn burn(&mut self) {
        self.hiding_scalar = None;
        self.binding_scalar = None;
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NonceTree {
    pub root: [u8; 32],
    pub leaves: Vec<[u8; 32]>,
    pub commitments: Vec<NonceCommitment>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignatureRequest {
    pub signature_id: SignatureId,
    pub group_id: GroupId,
    pub message: [u8; 32],
    pub signers: Vec<ParticipantId>,
    pub sequence: u64,
    pub nonce_commitments_by_signer: BTreeMap<ParticipantId, (Point, Point)>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Epoch {
    pub number: u64,
    pub group_id: GroupId,
    pub rollover_block: u64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Operation {
    Call,
    DelegateCall,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionProposal {
    pub chain_id: u64,
    pub safe: [u8; 20],
    pub to: [u8; 20],
    pub value: [u8; 32],
    pub data: Vec<u8>,
    pub operation: Operation,
    pub safe_tx_gas: u64,
    pub base_gas: u64,
    pub gas_price: [u8; 32],
    pub gas_token: [u8; 20],
    pub refund_receiver: [u8; 20],
    pub nonce: u64,
    pub epoch: u64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum RolloverState {
    WaitingForRollover,
    CollectingCommitments,
    CollectingShares,
    CollectingConfirmations,
    SignRollover,
    EpochStaged,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SigningState {
    WaitingForRequest,
    CollectNonceCommitments { deadline: u64, last_signer: Option<ParticipantId> },
    CollectSigningShares {
        deadline: u64,
        last_signer: Option<ParticipantId>,
        shares_from: std::collections::BTreeSet<ParticipantId>,
    },
    WaitingForAttestation { responsible: Option<ParticipantId> },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsensusState {
    pub active_epoch: u64,
    pub staged_epoch: u64,
    pub genesis_group_id: Option<GroupId>,
    pub group_pending_nonces: std::collections::BTreeSet<GroupId>,
    pub epoch_groups: BTreeMap<u64, (GroupId, ParticipantId)>,
    pub signature_to_message: BTreeMap<SignatureId, [u8; 32]>,
    /// Ephemeral bookkeeping for the rollover in flight (cleared whenever
    /// `rollover` returns to `WaitingForRollover`).
    pub rollover_group_id: Option<GroupId>,
    pub rollover_participants: Option<Vec<Participant>>,
    pub rollover_threshold: Option<u64>,
    pub rollover_context: Option<[u8; 32]>,
    pub confirmations_from: std::collections::BTreeSet<ParticipantId>,
    /// accused id -> plaintiff id, for complaints awaiting a response.
    pub outstanding_complaints: BTreeMap<ParticipantId, ParticipantId>,
    pub missing_shares_from: std::collections::BTreeSet<ParticipantId>,
    pub rollover_deadlines: Option<(u64, u64, u64)>,
    pub rollover_message: Option<[u8; 32]>,
    pub staged_rollover_block: Option<u64>,
}

impl Default for ConsensusState {
    fn default() -> Self {
        Self {
            active_epoch: 0,
            staged_epoch: 0,
            genesis_group_id: None,
            group_pending_nonces: Default::default(),
            epoch_groups: BTreeMap::new(),
            signature_to_message: BTreeMap::new(),
            rollover_group_id: None,
            rollover_participants: None,
            rollover_threshold: None,
            rollover_context: None,
            confirmations_from: Default::default(),
            outstanding_complaints: BTreeMap::new(),
            missing_shares_from: Default::default(),
            rollover_deadlines: None,
            rollover_message: None,
            staged_rollover_block: None,
        }
    }
}

impl ConsensusState {
    pub fn epoch_rollover_block(&self, epoch: u64) -> u64 {
        if epoch == self.staged_epoch {
            self.staged_rollover_block.unwrap_or(u64::MAX)
        } else {
            u64::MAX
        }
    }
}

/// Tagged union of protocol actions (§9 design note: tagged unions replace
/// untagged discriminated maps).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ProtocolAction {
    StartKeyGen { participants: Vec<Participant>, threshold: u64, context: [u8; 32] },
    PublishSecretShares { group_id: GroupId },
    ConfirmKeyGen { group_id: GroupId, callback: Option<([u8; 20], Vec<u8>)> },
    Complain { group_id: GroupId, accused_id: ParticipantId },
    ComplaintResponse { group_id: GroupId, plaintiff_id: ParticipantId, secret_share: Scalar },
    RequestSignature { group_id: GroupId, message: [u8; 32] },
    RegisterNonceCommitments { group_id: GroupId },
    RevealNonceCommitments { signature_id: SignatureId },
    PublishSignatureShare { signature_id: SignatureId },
    AttestTransaction { epoch: u64, transaction_hash: [u8; 32], signature_id: SignatureId },
    StageEpoch { proposed_epoch: u64, rollover_block: u64, group_id: GroupId, signature_id: SignatureId },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionQueueEntry {
    pub action: ProtocolAction,
    pub valid_until_ms: u64,
}
