//! KeyGen client (C4): a stateful DKG driver per group. Grounded in the
//! teacher's per-ceremony state-runner shape
//! (`multisig/client/keygen_state_runner.rs`), adapted to the spec's
//! commit/share/complaint operations rather than p2p broadcast rounds.

use crate::crypto::{Point, Scalar};
use crate::errors::KeyGenError;
use crate::frost::keygen as alg;
use crate::frost::merkle;
use crate::model::{GroupId, GroupRecord, Participant, ParticipantId};
use crate::storage::GroupStorage;
use rand::RngCore;
use slog::{o, Logger};
use std::sync::Arc;

pub struct SetupGroupOutput {
    pub group_id: GroupId,
    pub participants_root: [u8; 32],
    pub this_id: ParticipantId,
    pub commitments: Vec<Point>,
    pub pok: alg::ProofOfKnowledge,
    pub poap: merkle::MerkleProof,
}

#[derive(Debug, PartialEq, Eq)]
pub enum HandleSecretsOutcome {
    Invalid,
    Pending,
    Completed,
}

pub struct KeyGenClient<S: GroupStorage> {
    storage: Arc<S>,
    logger: Logger,
}

impl<S: GroupStorage> KeyGenClient<S> {
    pub fn new(storage: Arc<S>, logger: &Logger) -> Self {
        Self { storage, logger: logger.new(o!(crate::constants::COMPONENT_KEY => "KeyGenClient")) }
    }

    pub fn setup_group(
        &self,
        participants: Vec<Participant>,
        threshold: u64,
        this_id: ParticipantId,
        context: &[u8; 32],
        rng: &mut impl RngCore,
    ) -> anyhow::Result<SetupGroupOutput> {
        let group_id = alg::calc_group_id(&participants, threshold, context);

        let mut sorted = participants.clone();
        sorted.sort_by_key(|p| p.id);
        let leaves: Vec<[u8; 32]> = sorted.iter().map(|p| merkle::hash_participant(p.id, &p.address)).collect();
        let (participants_root, levels) = merkle::build_tree_keccak(&leaves);
        let own_index = sorted.iter().position(|p| p.id == this_id).expect("this_id is a participant");
        let poap = merkle::proof_for_index(&levels, own_index);

        let (coefficients, commitments, pok) = alg::generate_coefficients_and_pok(this_id, threshold, rng);

        let mut record = GroupRecord::new(group_id, participants, threshold, this_id);
        record.coefficients = Some(coefficients);
        record.commitments_by_id.insert(this_id, commitments.clone());
        self.storage.insert_group(record)?;

        slog::info!(self.logger, "setup group"; "group_id" => hex::encode(group_id), "this_id" => this_id);

        Ok(SetupGroupOutput { group_id, participants_root, this_id, commitments, pok, poap })
    }

    /// Records `sender_id`'s commitments after verifying `pok`; returns
    /// whether all participants' commitments are now present.
    pub fn handle_commitment(
        &self,
        group_id: &GroupId,
        sender_id: ParticipantId,
        commits: Vec<Point>,
        pok: &alg::ProofOfKnowledge,
    ) -> anyhow::Result<bool> {
        let mut record = self
            .storage
            .get_group(group_id)?
            .ok_or(KeyGenError::UnknownGroup(u64::from_be_bytes(group_id[..8].try_into().unwrap())))?;

        if record.commitments_by_id.contains_key(&sender_id) {
            return Err(KeyGenError::AlreadyRegistered(sender_id).into());
        }

        if !alg::verify_pok(sender_id, commits[0], pok) {
            slog::warn!(self.logger, "invalid pok"; "sender" => sender_id);
            return Err(KeyGenError::InvalidPok(crate::errors::CryptoError::InvalidPok(sender_id)).into());
        }

        record.commitments_by_id.insert(sender_id, commits);
        let complete = record.commitments_complete();
        self.storage.update_group(record)?;
        Ok(complete)
    }

    /// Computes this participant's encrypted shares for every other
    /// participant, plus this participant's own verification share, and
    /// persists the group's public key (set-once).
    pub fn create_secret_shares(
        &self,
        group_id: &GroupId,
    ) -> anyhow::Result<(Point, Vec<(ParticipantId, [u8; 32])>)> {
        let mut record = self
            .storage
            .get_group(group_id)?
            .ok_or(KeyGenError::UnknownGroup(0))?;

        if !record.commitments_complete() {
            return Err(KeyGenError::IncompletePrereqs("commitments").into());
        }

        let coefficients = record
            .coefficients
            .clone()
            .ok_or(KeyGenError::IncompletePrereqs("own coefficients missing"))?;

        let verification_share = alg::compute_verification_share(&record.commitments_by_id, record.this_participant_id);
        let public_key = alg::derive_group_public_key(&record.commitments_by_id);

        let mut shares = Vec::new();
        for p in &record.participants {
            if p.id == record.this_participant_id {
                continue;
            }
            let target_c0 = record.commitments_by_id[&p.id][0];
            let encrypted = alg::encrypt_share(&coefficients, p.id, target_c0);
            shares.push((p.id, encrypted));
        }

        record.public_key = Some(public_key);
        record.verification_share = Some(verification_share);
        self.storage.update_group(record)?;

        Ok((verification_share, shares))
    }

    /// Decrypts and verifies the share from `sender_id`; on completion,
    /// reconstructs the signing share and checks
    /// `g·signing_share == verification_share`.
    pub fn handle_secrets(
        &self,
        group_id: &GroupId,
        sender_id: ParticipantId,
        encrypted_share: [u8; 32],
    ) -> anyhow::Result<HandleSecretsOutcome> {
        let mut record = self
            .storage
            .get_group(group_id)?
            .ok_or(KeyGenError::UnknownGroup(0))?;

        let own_a0 = record
            .coefficients
            .as_ref()
            .ok_or(KeyGenError::IncompletePrereqs("own coefficients missing"))?[0];
        let sender_c0 = record.commitments_by_id[&sender_id][0];

        let share = match alg::decrypt_share(encrypted_share, &own_a0, sender_c0) {
            Some(s) => s,
            None => return Ok(HandleSecretsOutcome::Invalid),
        };

        let sender_commitments = &record.commitments_by_id[&sender_id];
        let expected = alg::eval_commitment(sender_commitments, record.this_participant_id);
        if !Point::from_scalar(&share).equals(&expected) {
            slog::warn!(self.logger, "invalid secret share"; "sender" => sender_id);
            return Ok(HandleSecretsOutcome::Invalid);
        }

        record.secret_shares_by_id.insert(sender_id, share);

        if !record.shares_complete() {
            self.storage.update_group(record)?;
            return Ok(HandleSecretsOutcome::Pending);
        }

        let signing_share = alg::compute_signing_share(&record.secret_shares_by_id);
        let verification_share = record
            .verification_share
            .ok_or(KeyGenError::IncompletePrereqs("verification_share missing"))?;

        if !Point::from_scalar(&signing_share).equals(&verification_share) {
            return Err(crate::errors::CryptoError::ShareMismatch.into());
        }

        record.signing_share = Some(signing_share);
        record.coefficients = None;
        self.storage.update_group(record)?;

        Ok(HandleSecretsOutcome::Completed)
    }

    /// Used by the complaint sub-protocol: recomputes the plaintext share
    /// this participant sent to `target`, to be broadcast as a response.
    pub fn create_secret_share(&self, group_id: &GroupId, target: ParticipantId) -> anyhow::Result<Scalar> {
        let record = self.storage.get_group(group_id)?.ok_or(KeyGenError::UnknownGroup(0))?;
        let coefficients = record.coefficients.as_ref().ok_or(KeyGenError::IncompletePrereqs("coefficients"))?;
        Ok(alg::eval_polynomial(coefficients, target))
    }

    /// Used by the complaint sub-protocol: verifies a plaintext share
    /// `sender` claims to have sent to `target` against `sender`'s
    /// public commitments.
    pub fn verify_secret_share(
        &self,
        group_id: &GroupId,
        sender: ParticipantId,
        target: ParticipantId,
        share: Scalar,
    ) -> anyhow::Result<bool> {
        let record = self.storage.get_group(group_id)?.ok_or(KeyGenError::UnknownGroup(0))?;
        let sender_commitments = record.commitments_by_id.get(&sender).ok_or(KeyGenError::IncompletePrereqs("sender commitments"))?;
        let expected = alg::eval_commitment(sender_commitments, target);
        Ok(Point::from_scalar(&share).equals(&expected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::test_logger;
    use crate::storage::MemoryStorage;

    fn participants() -> Vec<Participant> {
        vec![
            Participant { id: 1, address: [1u8; 20] },
            Participant { id: 2, address: [2u8; 20] },
            Participant { id: 3, address: [3u8; 20] },
        ]
    }

    #[test]
    fn three_party_dkg_completes_and_satisfies_invariant() {
        let mut rng = rand::thread_rng();
        let context = [9u8; 32];
        let logger = test_logger();

        let clients: Vec<_> = [1u64, 2, 3]
            .iter()
            .map(|_| KeyGenClient::new(Arc::new(MemoryStorage::new()), &logger))
            .collect();

        let mut setups = Vec::new();
        for (i, &id) in [1u64, 2, 3].iter().enumerate() {
            let out = clients[i]
                .setup_group(participants(), 2, id, &context, &mut rng)
                .unwrap();
            setups.push(out);
        }
        let group_id = setups[0].group_id;
        assert!(setups.iter().all(|s| s.group_id == group_id));

        // Cross-feed commitments.
        for (i, &id) in [1u64, 2, 3].iter().enumerate() {
            for (j, _) in [1u64, 2, 3].iter().enumerate() {
                if i == j {
                    continue;
                }
                clients[j]
                    .handle_commitment(&group_id, id, setups[i].commitments.clone(), &setups[i].pok)
                    .unwrap();
            }
        }

        // Each client computes shares for the others.
        let mut all_shares = Vec::new();
        for i in 0..3 {
            let (_vshare, shares) = clients[i].create_secret_shares(&group_id).unwrap();
            all_shares.push(shares);
        }

        let ids = [1u64, 2, 3];
        let mut signing_shares = Vec::new();
        for (j, &target_id) in ids.iter().enumerate() {
            let mut outcome = HandleSecretsOutcome::Pending;
            // self share
            let own_share = {
                let record = clients[j].storage.get_group(&group_id).unwrap().unwrap();
                alg::eval_polynomial(record.coefficients.as_ref().unwrap(), target_id)
            };
            {
                let mut record = clients[j].storage.get_group(&group_id).unwrap().unwrap();
                record.secret_shares_by_id.insert(target_id, own_share);
                clients[j].storage.update_group(record).unwrap();
            }

            for (i, &sender_id) in ids.iter().enumerate() {
                if i == j {
                    continue;
                }
                let encrypted = all_shares[i]
                    .iter()
                    .find(|(to, _)| *to == target_id)
                    .unwrap()
                    .1;
                outcome = clients[j].handle_secrets(&group_id, sender_id, encrypted).unwrap();
            }

            assert_eq!(outcome, HandleSecretsOutcome::Completed);
            let record = clients[j].storage.get_group(&group_id).unwrap().unwrap();
            signing_shares.push(record.signing_share.unwrap());
            assert!(Point::from_scalar(&record.signing_share.unwrap())
                .equals(&record.verification_share.unwrap()));
        }
    }
}
