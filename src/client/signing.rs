//! Signing client (C5): nonce tree pre-processing, signature-request
//! registration, nonce reveal, and signature-share creation. The stateful
//! per-ceremony shape is grounded in `keygen_state_runner.rs`; the
//! cryptographic core is grounded in `multisig/client/signing/frost.rs`.

use crate::constants::NONCE_BATCH_SIZE;
use crate::crypto::{Point, Scalar};
use crate::errors::SigningError;
use crate::frost::merkle::{self, MerkleProof};
use crate::frost::signing as alg;
use crate::model::{
    GroupId, NonceCommitment, NonceTree, ParticipantId, SignatureId, SignatureRequest,
};
use crate::storage::{GroupStorage, NonceStorage, SignatureRequestStorage};
use rand::RngCore;
use slog::{o, Logger};
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct RevealedNonces {
    pub hiding: Point,
    pub binding: Point,
    pub proof: MerkleProof,
}

#[derive(Debug, PartialEq, Eq)]
pub enum HandleNonceCommitmentsOutcome {
    Pending,
    Complete,
}

pub struct SignatureShareOutput {
    pub share: Scalar,
    pub commitment_share: Point,
    pub lagrange_coefficient: Scalar,
}

pub struct SigningClient<S> {
    storage: Arc<S>,
    logger: Logger,
}

impl<S> SigningClient<S>
where
    S: GroupStorage + NonceStorage + SignatureRequestStorage,
{
    pub fn new(storage: Arc<S>, logger: &Logger) -> Self {
        Self { storage, logger: logger.new(o!(crate::constants::COMPONENT_KEY => "SigningClient")) }
    }

    /// Draws `NONCE_BATCH_SIZE` random nonce pairs and persists the tree
    /// (unlinked to any chunk index yet).
    pub fn generate_nonce_tree(&self, rng: &mut impl RngCore) -> anyhow::Result<[u8; 32]> {
        let mut commitments = Vec::with_capacity(NONCE_BATCH_SIZE);
        let mut leaves = Vec::with_capacity(NONCE_BATCH_SIZE);

        for _ in 0..NONCE_BATCH_SIZE {
            let hiding_scalar = Scalar::random(rng);
            let binding_scalar = Scalar::random(rng);
            let hiding_point = Point::from_scalar(&hiding_scalar);
            let binding_point = Point::from_scalar(&binding_scalar);

            leaves.push(crate::crypto::h5_com(&[&hiding_point.to_bytes(), &binding_point.to_bytes()]));
            commitments.push(NonceCommitment {
                hiding_scalar: Some(hiding_scalar),
                binding_scalar: Some(binding_scalar),
                hiding_point,
                binding_point,
            });
        }

        let (root, _levels) = merkle::build_tree(&leaves);
        self.storage.insert_nonce_tree(root, NonceTree { root, leaves, commitments })?;

        slog::debug!(self.logger, "generated nonce tree"; "root" => hex::encode(root));
        Ok(root)
    }

    pub fn handle_nonce_commitments_hash(
        &self,
        group_id: &GroupId,
        chunk: u64,
        root: [u8; 32],
    ) -> anyhow::Result<()> {
        self.storage.link_nonce_tree(group_id, chunk, root)?;
        Ok(())
    }

    pub fn register_signature_request(
        &self,
        signature_id: SignatureId,
        group_id: GroupId,
        message: [u8; 32],
        signers: Vec<ParticipantId>,
        sequence: u64,
    ) -> anyhow::Result<()> {
        let group = self.storage.get_group(&group_id)?.ok_or(crate::errors::KeyGenError::UnknownGroup(0))?;
        if (signers.len() as u64) < group.threshold {
            return Err(SigningError::InsufficientSigners { have: signers.len(), need: group.threshold as usize }.into());
        }
        self.storage.insert_request(SignatureRequest {
            signature_id,
            group_id,
            message,
            signers,
            sequence,
            nonce_commitments_by_signer: BTreeMap::new(),
        })?;
        Ok(())
    }

    /// Selects the next unburned leaf for this signer's group and marks it
    /// pending reveal (the actual burn happens in `create_signature_share`).
    pub fn reveal_nonces(&self, signature_id: SignatureId) -> anyhow::Result<RevealedNonces> {
        let request = self
            .storage
            .get_request(signature_id)?
            .ok_or(SigningError::UnknownRequest(signature_id))?;

        let (root, idx) = self
            .storage
            .next_unburned_leaf(&request.group_id)?
            .ok_or(SigningError::NoncesExhausted(0))?;

        let tree = self.storage.get_nonce_tree(&root)?.expect("linked root must have a tree");
        let commitment = &tree.commitments[idx];
        let proof = {
            let (_root, levels) = merkle::build_tree(&tree.leaves);
            merkle::proof_for_index(&levels, idx)
        };

        Ok(RevealedNonces { hiding: commitment.hiding_point, binding: commitment.binding_point, proof })
    }

    pub fn handle_nonce_commitments(
        &self,
        signature_id: SignatureId,
        signer: ParticipantId,
        hiding: Point,
        binding: Point,
    ) -> anyhow::Result<HandleNonceCommitmentsOutcome> {
        let mut request = self
            .storage
            .get_request(signature_id)?
            .ok_or(SigningError::UnknownRequest(signature_id))?;

        request.nonce_commitments_by_signer.insert(signer, (hiding, binding));
        let complete = request.nonce_commitments_by_signer.len() == request.signers.len();
        self.storage.update_request(request)?;

        Ok(if complete {
            HandleNonceCommitmentsOutcome::Complete
        } else {
            HandleNonceCommitmentsOutcome::Pending
        })
    }

    /// Computes `ρ_i`, `R`, `c`, `z_i`, then burns the nonce pair used.
    pub fn create_signature_share(
        &self,
        signature_id: SignatureId,
        this_id: ParticipantId,
    ) -> anyhow::Result<SignatureShareOutput> {
        let request = self
            .storage
            .get_request(signature_id)?
            .ok_or(SigningError::UnknownRequest(signature_id))?;

        let group = self
            .storage
            .get_group(&request.group_id)?
            .ok_or(crate::errors::KeyGenError::UnknownGroup(0))?;

        let signing_share = group.signing_share.ok_or(crate::errors::KeyGenError::IncompletePrereqs("signing_share"))?;
        let public_key = group.public_key.ok_or(crate::errors::KeyGenError::IncompletePrereqs("public_key"))?;
        let verification_share = group.verification_share.ok_or(crate::errors::KeyGenError::IncompletePrereqs("verification_share"))?;

        let signer_set = request.signers.iter().copied().collect();
        let lambda_i = alg::lagrange_coefficient(this_id, &signer_set)?;
        let rho_i = alg::binding_factor(this_id, &request.message, &request.nonce_commitments_by_signer);
        let r = alg::group_commitment(&request.nonce_commitments_by_signer, &{
            let mut bindings = BTreeMap::new();
            for &id in &request.signers {
                bindings.insert(id, alg::binding_factor(id, &request.message, &request.nonce_commitments_by_signer));
            }
            bindings
        });

        let (root, idx) = self
            .storage
            .next_unburned_leaf(&request.group_id)?
            .ok_or(SigningError::NoncesExhausted(0))?;
        let mut tree = self.storage.get_nonce_tree(&root)?.expect("linked root must have a tree");

        let (hiding_scalar, binding_scalar, commitment_share) = {
            let commitment = &tree.commitments[idx];
            (
                commitment.hiding_scalar.expect("unburned leaf has a hiding scalar"),
                commitment.binding_scalar.expect("unburned leaf has a binding scalar"),
                commitment.hiding_point + commitment.binding_point.multiply(&rho_i),
            )
        };

        let z = alg::signature_share(
            this_id,
            &hiding_scalar,
            &binding_scalar,
            &signing_share,
            rho_i,
            lambda_i,
            public_key,
            r,
            &request.message,
        );

        tree.commitments[idx].burn();
        self.storage.update_nonce_tree(root, tree)?;

        let _ = verification_share;
        Ok(SignatureShareOutput { share: z, commitment_share, lagrange_coefficient: lambda_i })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::test_logger;
    use crate::model::{GroupRecord, Participant};
    use crate::storage::MemoryStorage;

    fn group_with_share(storage: &Arc<MemoryStorage>, signing_share: Scalar, public_key: Point) -> GroupId {
        let group_id = [5u8; 32];
        let mut record = GroupRecord::new(
            group_id,
            vec![Participant { id: 1, address: [0u8; 20] }, Participant { id: 2, address: [0u8; 20] }],
            2,
            1,
        );
        record.signing_share = Some(signing_share);
        record.verification_share = Some(Point::from_scalar(&signing_share));
        record.public_key = Some(public_key);
        storage.insert_group(record).unwrap();
        group_id
    }

    #[test]
    fn nonce_tree_leaves_burn_exactly_once() {
        let storage = Arc::new(MemoryStorage::new());
        let logger = test_logger();
        let client = SigningClient::new(storage.clone(), &logger);
        let mut rng = rand::thread_rng();

        let root = client.generate_nonce_tree(&mut rng).unwrap();
        let group_id = group_with_share(&storage, Scalar::random(&mut rng), Point::generator());
        storage.link_nonce_tree(&group_id, 0, root).unwrap();

        let (_root, idx) = storage.next_unburned_leaf(&group_id).unwrap().unwrap();
        let tree = storage.get_nonce_tree(&root).unwrap().unwrap();
        assert!(!tree.commitments[idx].is_burned());
    }
}
