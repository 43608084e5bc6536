//! Rollover transitions (§4.8): the single in-flight DKG/epoch-rollover
//! state machine, genesis and non-genesis paths.

use super::diff::StateDiff;
use super::{Event, MachineConfig};
use crate::client::keygen::{HandleSecretsOutcome, KeyGenClient};
use crate::constants::{CONFIRMATION_DEADLINE_STEPS, DEFAULT_ACTION_TTL_MS};
use crate::model::{ActionQueueEntry, ConsensusState, Participant, ParticipantId, ProtocolAction, RolloverState, SigningState};
use crate::storage::{GroupStorage, Storage};
use crate::verification;

fn action(action: ProtocolAction) -> ActionQueueEntry {
    ActionQueueEntry { action, valid_until_ms: super::now_ms() + DEFAULT_ACTION_TTL_MS }
}

fn is_genesis(consensus: &ConsensusState) -> bool {
    consensus.active_epoch == 0 && consensus.staged_epoch == 0 && consensus.genesis_group_id.is_none()
}

pub fn handle<S: Storage>(
    storage: &S,
    keygen: &KeyGenClient<S>,
    cfg: &MachineConfig,
    this_id: ParticipantId,
    consensus: &ConsensusState,
    rollover: RolloverState,
    block_number: u64,
    event: &Event,
) -> anyhow::Result<StateDiff> {
    match (rollover, event) {
        (RolloverState::WaitingForRollover, Event::KeyGen { group_id, participants, threshold, context }) => {
            let expected = crate::frost::keygen::calc_group_id(participants, *threshold, context);
            if expected != *group_id {
                return Ok(StateDiff::default());
            }

            let mut delta = consensus.clone();
            delta.rollover_group_id = Some(*group_id);
            delta.rollover_participants = Some(participants.clone());
            delta.rollover_threshold = Some(*threshold);
            delta.rollover_context = Some(*context);
            delta.confirmations_from.clear();
            delta.outstanding_complaints.clear();
            delta.missing_shares_from.clear();

            Ok(StateDiff {
                consensus_delta: Some(delta),
                rollover: Some(RolloverState::CollectingCommitments),
                ..Default::default()
            })
        }

        (RolloverState::CollectingCommitments, Event::KeyGenCommitted { group_id, id, commitments, pok }) => {
            let Some(expected_group) = consensus.rollover_group_id else { return Ok(StateDiff::default()) };
            if expected_group != *group_id {
                return Ok(StateDiff::default());
            }

            let complete = keygen.handle_commitment(group_id, *id, commitments.clone(), pok)?;
            if !complete {
                return Ok(StateDiff::default());
            }

            keygen.create_secret_shares(group_id)?;
            let mut diff = StateDiff {
                rollover: Some(RolloverState::CollectingShares),
                ..Default::default()
            };
            diff.actions.push(action(ProtocolAction::PublishSecretShares { group_id: *group_id }));
            Ok(diff)
        }

        (RolloverState::CollectingShares, Event::KeyGenSecretShared { group_id, sender_id, encrypted_share }) => {
            let Some(expected_group) = consensus.rollover_group_id else { return Ok(StateDiff::default()) };
            if expected_group != *group_id {
                return Ok(StateDiff::default());
            }

            let outcome = keygen.handle_secrets(group_id, *sender_id, *encrypted_share)?;
            match outcome {
                HandleSecretsOutcome::Invalid => {
                    let mut delta = consensus.clone();
                    delta.missing_shares_from.insert(*sender_id);
                    let mut diff = StateDiff { consensus_delta: Some(delta), ..Default::default() };
                    diff.actions.push(action(ProtocolAction::Complain { group_id: *group_id, accused_id: *sender_id }));
                    Ok(diff)
                }
                HandleSecretsOutcome::Pending => Ok(StateDiff::default()),
                HandleSecretsOutcome::Completed => {
                    let genesis = is_genesis(consensus);
                    let mut delta = consensus.clone();
                    delta.confirmations_from.clear();
                    let deadline_base = block_number;
                    delta.rollover_deadlines = Some((
                        deadline_base + CONFIRMATION_DEADLINE_STEPS[0] * cfg.key_gen_timeout,
                        deadline_base + CONFIRMATION_DEADLINE_STEPS[1] * cfg.key_gen_timeout,
                        deadline_base + CONFIRMATION_DEADLINE_STEPS[2] * cfg.key_gen_timeout,
                    ));

                    let mut diff = StateDiff {
                        consensus_delta: Some(delta),
                        rollover: Some(RolloverState::CollectingConfirmations),
                        ..Default::default()
                    };
                    let callback = if genesis { None } else { Some((consensus_callback_target(consensus), group_id.to_vec())) };
                    diff.actions.push(action(ProtocolAction::ConfirmKeyGen { group_id: *group_id, callback }));
                    Ok(diff)
                }
            }
        }

        (RolloverState::CollectingConfirmations, Event::KeyGenComplaintSubmitted { group_id, plaintiff, accused }) => {
            let mut delta = consensus.clone();
            delta.outstanding_complaints.insert(*accused, *plaintiff);
            let mut diff = StateDiff { consensus_delta: Some(delta), ..Default::default() };

            if *accused == this_id {
                let share = keygen.create_secret_share(group_id, *plaintiff)?;
                diff.actions.push(action(ProtocolAction::ComplaintResponse {
                    group_id: *group_id,
                    plaintiff_id: *plaintiff,
                    secret_share: share,
                }));
            }
            Ok(diff)
        }

        (
            RolloverState::CollectingConfirmations,
            Event::KeyGenComplaintResponded { group_id, plaintiff, accused, share },
        ) => {
            let mut delta = consensus.clone();
            delta.outstanding_complaints.remove(accused);

            if *plaintiff == this_id && consensus.missing_shares_from.contains(accused) {
                // §9 open question: the source leaves ambiguous whether both
                // sides should be excluded on an inconsistent response. We
                // exclude only the accused when the response is consistent,
                // and restart excluding both when it is not (DESIGN.md).
                let valid = keygen.verify_secret_share(group_id, *accused, this_id, *share)?;
                if valid {
                    delta.missing_shares_from.remove(accused);
                    return Ok(StateDiff { consensus_delta: Some(delta), ..Default::default() });
                }
                return Ok(restart_excluding(consensus, &[*accused, *plaintiff]));
            }

            let valid = keygen.verify_secret_share(group_id, *accused, *plaintiff, *share)?;
            if !valid {
                return Ok(restart_excluding(consensus, &[*accused]));
            }
            Ok(StateDiff { consensus_delta: Some(delta), ..Default::default() })
        }

        (RolloverState::CollectingConfirmations, Event::KeyGenConfirmed { group_id, participant }) => {
            let Some(expected_group) = consensus.rollover_group_id else { return Ok(StateDiff::default()) };
            if expected_group != *group_id {
                return Ok(StateDiff::default());
            }

            let mut delta = consensus.clone();
            delta.confirmations_from.insert(*participant);
            let n = consensus.rollover_participants.as_ref().map(|p| p.len()).unwrap_or(0);

            if delta.confirmations_from.len() < n {
                return Ok(StateDiff { consensus_delta: Some(delta), ..Default::default() });
            }

            if is_genesis(consensus) {
                delta.genesis_group_id = Some(*group_id);
                delta.epoch_groups.insert(0, (*group_id, this_id));
                return Ok(StateDiff { consensus_delta: Some(delta), rollover: Some(RolloverState::WaitingForRollover), ..Default::default() });
            }

            let group_key = storage
                .get_group(group_id)?
                .and_then(|g| g.public_key)
                .ok_or_else(|| anyhow::anyhow!("group public key not yet derived"))?;
            let proposed_epoch = consensus.active_epoch.max(consensus.staged_epoch) + 1;
            let rollover_block = block_number + cfg.key_gen_timeout;
            let result = verification::epoch_rollover_packet(
                cfg.chain_id,
                &cfg.consensus_address,
                consensus.active_epoch,
                proposed_epoch,
                rollover_block,
                group_key,
            );
            let message = match result {
                verification::VerificationResult::Valid { packet_id } => packet_id,
                verification::VerificationResult::Invalid { reason } => anyhow::bail!("epoch rollover packet invalid: {reason}"),
            };

            delta.rollover_message = Some(message);
            delta.staged_rollover_block = Some(rollover_block);

            Ok(StateDiff {
                consensus_delta: Some(delta),
                rollover: Some(RolloverState::SignRollover),
                signing: Some((message, Some(SigningState::WaitingForRequest))),
                ..Default::default()
            })
        }

        (RolloverState::SignRollover, Event::EpochStaged { proposed_epoch }) => {
            let Some(message) = consensus.rollover_message else { return Ok(StateDiff::default()) };
            let mut delta = consensus.clone();
            delta.staged_epoch = *proposed_epoch;
            delta.rollover_message = None;
            delta.rollover_group_id = None;
            delta.rollover_participants = None;
            delta.rollover_threshold = None;
            delta.confirmations_from.clear();

            Ok(StateDiff {
                consensus_delta: Some(delta),
                rollover: Some(RolloverState::EpochStaged),
                signing: Some((message, None)),
                ..Default::default()
            })
        }

        _ => Ok(StateDiff::default()),
    }
}

fn consensus_callback_target(consensus: &ConsensusState) -> [u8; 20] {
    consensus
        .rollover_participants
        .as_ref()
        .and_then(|p| p.first())
        .map(|p| p.address)
        .unwrap_or_default()
}

/// Restarts DKG excluding the given ids (timeout / invalid-response paths).
fn restart_excluding(consensus: &ConsensusState, exclude: &[ParticipantId]) -> StateDiff {
    let remaining: Vec<Participant> = consensus
        .rollover_participants
        .clone()
        .unwrap_or_default()
        .into_iter()
        .filter(|p| !exclude.contains(&p.id))
        .collect();

    let mut delta = consensus.clone();
    delta.rollover_group_id = None;
    delta.rollover_participants = None;
    delta.rollover_threshold = None;
    delta.confirmations_from.clear();
    delta.outstanding_complaints.clear();
    delta.missing_shares_from.clear();

    let mut diff = StateDiff {
        consensus_delta: Some(delta),
        rollover: Some(RolloverState::WaitingForRollover),
        ..Default::default()
    };
    if let (Some(threshold), Some(context)) = (consensus.rollover_threshold, consensus.rollover_context) {
        if !remaining.is_empty() {
            diff.actions.push(action(ProtocolAction::StartKeyGen { participants: remaining, threshold, context }));
        }
    }
    diff
}

/// Timeout handling for the rollover machine (§4.8 Timeouts).
pub fn on_timeout<S: Storage>(storage: &S, consensus: &ConsensusState, rollover: RolloverState, block_number: u64) -> StateDiff {
    match rollover {
        RolloverState::CollectingCommitments | RolloverState::CollectingShares => {
            let responded: std::collections::BTreeSet<ParticipantId> = consensus
                .rollover_group_id
                .and_then(|group_id| storage.get_group(&group_id).ok().flatten())
                .map(|record| {
                    if matches!(rollover, RolloverState::CollectingCommitments) {
                        record.commitments_by_id.keys().copied().collect()
                    } else {
                        record.secret_shares_by_id.keys().copied().collect()
                    }
                })
                .unwrap_or_default();
            let participants = consensus.rollover_participants.clone().unwrap_or_default();
            let unresponsive: Vec<ParticipantId> =
                participants.iter().map(|p| p.id).filter(|id| !responded.contains(id)).collect();
            restart_excluding(consensus, &unresponsive)
        }
        RolloverState::CollectingConfirmations => {
            let Some((complaint_deadline, response_deadline, final_deadline)) = consensus.rollover_deadlines else {
                return StateDiff::default();
            };
            if block_number < complaint_deadline {
                return StateDiff::default();
            }
            if block_number < response_deadline {
                return StateDiff::default();
            }
            if block_number < final_deadline {
                let unresponded: Vec<ParticipantId> = consensus.outstanding_complaints.keys().copied().collect();
                if !unresponded.is_empty() {
                    return restart_excluding(consensus, &unresponded);
                }
                return StateDiff::default();
            }

            let participants = consensus.rollover_participants.clone().unwrap_or_default();
            let confirmed: Vec<Participant> =
                participants.into_iter().filter(|p| consensus.confirmations_from.contains(&p.id)).collect();

            let mut delta = consensus.clone();
            delta.rollover_group_id = None;
            delta.rollover_participants = None;
            delta.confirmations_from.clear();
            delta.outstanding_complaints.clear();
            delta.missing_shares_from.clear();
            delta.rollover_deadlines = None;

            let mut diff = StateDiff {
                consensus_delta: Some(delta),
                rollover: Some(RolloverState::WaitingForRollover),
                ..Default::default()
            };
            if let (Some(threshold), Some(context)) = (consensus.rollover_threshold, consensus.rollover_context) {
                if !confirmed.is_empty() {
                    diff.actions.push(action(ProtocolAction::StartKeyGen { participants: confirmed, threshold, context }));
                }
            }
            diff
        }
        _ => StateDiff::default(),
    }
}
