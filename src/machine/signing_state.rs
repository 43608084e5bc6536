//! Signing transitions (§4.8), shared by rollover and safe-transaction
//! messages: `WaitingForRequest -> CollectNonceCommitments ->
//! CollectSigningShares -> WaitingForAttestation`.

use super::diff::StateDiff;
use super::{Event, MachineConfig};
use crate::client::signing::{HandleNonceCommitmentsOutcome, SigningClient};
use crate::constants::DEFAULT_ACTION_TTL_MS;
use crate::model::{ActionQueueEntry, ParticipantId, ProtocolAction, SignatureId, SigningState};
use crate::storage::{GroupStorage, NonceStorage, SignatureRequestStorage, Storage};

fn action(action: ProtocolAction) -> ActionQueueEntry {
    ActionQueueEntry { action, valid_until_ms: super::now_ms() + DEFAULT_ACTION_TTL_MS }
}

#[allow(clippy::too_many_arguments)]
pub fn handle<S: Storage>(
    signing: &SigningClient<S>,
    storage: &S,
    cfg: &MachineConfig,
    this_id: ParticipantId,
    consensus: &crate::model::ConsensusState,
    message: [u8; 32],
    state: SigningState,
    block_number: u64,
    event: &Event,
) -> anyhow::Result<StateDiff> {
    match (state, event) {
        (SigningState::WaitingForRequest, Event::Sign { group_id, message: m, signature_id }) if *m == message => {
            let group = storage.get_group(group_id)?.ok_or_else(|| anyhow::anyhow!("unknown group"))?;
            let signers = group.participants.iter().map(|p| p.id).collect::<Vec<_>>();
            signing.register_signature_request(*signature_id, *group_id, message, signers.clone(), 0)?;

            let mut delta = consensus.clone();
            delta.signature_to_message.insert(*signature_id, message);
            delta.group_pending_nonces.insert(*group_id);

            let mut diff = StateDiff {
                consensus_delta: Some(delta),
                signing: Some((
                    message,
                    Some(SigningState::CollectNonceCommitments {
                        deadline: block_number + cfg.signing_timeout,
                        last_signer: None,
                    }),
                )),
                ..Default::default()
            };

            if signers.contains(&this_id) && storage.next_unburned_leaf(group_id)?.is_some() {
                diff.actions.push(action(ProtocolAction::RevealNonceCommitments { signature_id: *signature_id }));
            }
            Ok(diff)
        }

        (
            SigningState::CollectNonceCommitments { deadline, .. },
            Event::NonceCommitments { signature_id, signer, hiding, binding },
        ) => {
            let outcome = signing.handle_nonce_commitments(*signature_id, *signer, *hiding, *binding)?;
            let mut diff = StateDiff {
                signing: Some((
                    message,
                    Some(SigningState::CollectNonceCommitments { deadline, last_signer: Some(*signer) }),
                )),
                ..Default::default()
            };

            if outcome == HandleNonceCommitmentsOutcome::Complete {
                let request = storage
                    .get_request(*signature_id)?
                    .ok_or_else(|| anyhow::anyhow!("signature request vanished"))?;
                if request.signers.contains(&this_id) {
                    diff.actions.push(action(ProtocolAction::PublishSignatureShare { signature_id: *signature_id }));
                }
                diff.signing = Some((
                    message,
                    Some(SigningState::CollectSigningShares {
                        deadline,
                        last_signer: Some(*signer),
                        shares_from: Default::default(),
                    }),
                ));
            }
            Ok(diff)
        }

        (
            SigningState::CollectSigningShares { deadline, shares_from, .. },
            Event::SignatureShare { signature_id, signer, .. },
        ) => {
            let mut shares_from = shares_from;
            shares_from.insert(*signer);

            let request = storage.get_request(*signature_id)?.ok_or_else(|| anyhow::anyhow!("signature request vanished"))?;
            let group = storage.get_group(&request.group_id)?.ok_or_else(|| anyhow::anyhow!("unknown group"))?;
            let complete = shares_from.len() as u64 >= group.threshold;

            Ok(StateDiff {
                signing: Some((
                    message,
                    Some(if complete {
                        SigningState::WaitingForAttestation { responsible: Some(*signer) }
                    } else {
                        SigningState::CollectSigningShares { deadline, last_signer: Some(*signer), shares_from }
                    }),
                )),
                ..Default::default()
            })
        }

        (SigningState::CollectSigningShares { .. }, Event::Signed { signature_id: _ }) => Ok(StateDiff {
            signing: Some((message, Some(SigningState::WaitingForAttestation { responsible: None }))),
            ..Default::default()
        }),

        (SigningState::WaitingForAttestation { .. }, Event::TransactionAttested { .. }) => {
            Ok(StateDiff { signing: Some((message, None)), ..Default::default() })
        }

        _ => Ok(StateDiff::default()),
    }
}

/// Timeout handling for a single signing state (§4.8 Timeouts).
pub fn on_timeout<S: Storage>(
    storage: &S,
    threshold: u64,
    message: [u8; 32],
    signature_id: Option<SignatureId>,
    state: SigningState,
    block_number: u64,
) -> StateDiff {
    match state {
        SigningState::WaitingForRequest => StateDiff::default(),
        SigningState::CollectNonceCommitments { deadline, .. } | SigningState::CollectSigningShares { deadline, .. }
            if block_number >= deadline =>
        {
            let Some(signature_id) = signature_id else { return StateDiff::default() };
            let Ok(Some(request)) = storage.get_request(signature_id) else { return StateDiff::default() };
            let responded: std::collections::BTreeSet<ParticipantId> =
                request.nonce_commitments_by_signer.keys().copied().collect();
            let reduced: Vec<ParticipantId> = request.signers.iter().copied().filter(|id| responded.contains(id)).collect();

            if (reduced.len() as u64) < threshold {
                return StateDiff { signing: Some((message, None)), ..Default::default() };
            }

            StateDiff {
                signing: Some((message, Some(SigningState::WaitingForRequest))),
                actions: vec![action(ProtocolAction::RequestSignature { group_id: request.group_id, message })],
                ..Default::default()
            }
        }
        SigningState::WaitingForAttestation { responsible } => {
            let _ = responsible;
            StateDiff::default()
        }
        _ => StateDiff::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Scalar;
    use crate::logging::test_logger;
    use crate::model::{ConsensusState, GroupRecord, Participant, SignatureRequest};
    use crate::storage::MemoryStorage;
    use std::sync::Arc;

    fn cfg() -> MachineConfig {
        MachineConfig { chain_id: 1, consensus_address: [0u8; 20], key_gen_timeout: 100, signing_timeout: 100 }
    }

    fn share_event(signature_id: SignatureId, signer: ParticipantId) -> Event {
        Event::SignatureShare { signature_id, signer, share: Scalar::random(&mut rand::thread_rng()) }
    }

    #[test]
    fn waits_for_threshold_distinct_signers_before_completing() {
        let storage = Arc::new(MemoryStorage::new());
        let signing = SigningClient::new(storage.clone(), &test_logger());
        let group_id = [9u8; 32];
        let threshold = 2;
        storage
            .insert_group(GroupRecord::new(
                group_id,
                vec![
                    Participant { id: 1, address: [1u8; 20] },
                    Participant { id: 2, address: [2u8; 20] },
                    Participant { id: 3, address: [3u8; 20] },
                ],
                threshold,
                1,
            ))
            .unwrap();

        let message = [7u8; 32];
        let signature_id = 42;
        storage
            .insert_request(SignatureRequest {
                signature_id,
                group_id,
                message,
                signers: vec![1, 2, 3],
                sequence: 0,
                nonce_commitments_by_signer: Default::default(),
            })
            .unwrap();

        let consensus = ConsensusState::default();
        let state = SigningState::CollectSigningShares { deadline: 100, last_signer: None, shares_from: Default::default() };
        let diff = handle(&signing, &*storage, &cfg(), 1, &consensus, message, state, 0, &share_event(signature_id, 1)).unwrap();
        let (_, Some(next)) = diff.signing.unwrap() else { panic!("signing state removed") };
        assert!(matches!(next, SigningState::CollectSigningShares { .. }), "one share of two must not complete");

        let diff2 = handle(&signing, &*storage, &cfg(), 1, &consensus, message, next, 0, &share_event(signature_id, 2)).unwrap();
        let (_, Some(next2)) = diff2.signing.unwrap() else { panic!("signing state removed") };
        assert!(matches!(next2, SigningState::WaitingForAttestation { .. }), "two distinct shares must complete at threshold 2");
    }

    #[test]
    fn repeated_signer_does_not_count_twice() {
        let storage = Arc::new(MemoryStorage::new());
        let signing = SigningClient::new(storage.clone(), &test_logger());
        let group_id = [8u8; 32];
        let threshold = 2;
        storage
            .insert_group(GroupRecord::new(
                group_id,
                vec![Participant { id: 1, address: [1u8; 20] }, Participant { id: 2, address: [2u8; 20] }],
                threshold,
                1,
            ))
            .unwrap();

        let message = [6u8; 32];
        let signature_id = 7;
        storage
            .insert_request(SignatureRequest {
                signature_id,
                group_id,
                message,
                signers: vec![1, 2],
                sequence: 0,
                nonce_commitments_by_signer: Default::default(),
            })
            .unwrap();

        let consensus = ConsensusState::default();
        let state = SigningState::CollectSigningShares { deadline: 100, last_signer: None, shares_from: Default::default() };
        let event = share_event(signature_id, 1);
        let diff = handle(&signing, &*storage, &cfg(), 1, &consensus, message, state, 0, &event).unwrap();
        let (_, Some(next)) = diff.signing.unwrap() else { panic!("signing state removed") };

        let diff2 = handle(&signing, &*storage, &cfg(), 1, &consensus, message, next, 0, &event).unwrap();
        let (_, Some(next2)) = diff2.signing.unwrap() else { panic!("signing state removed") };
        assert!(matches!(next2, SigningState::CollectSigningShares { .. }), "a repeated signer must not push past threshold");
    }
}
