//! Protocol/action queue (C6): a durable FIFO worker with head-of-line
//! blocking (§4.6), backed by the `ActionQueueStorage` capability. Several
//! actions carry no cryptographic material of their own and instead derive
//! it just-in-time from the persisted group/nonce state via the KeyGen and
//! Signing clients, mirroring the teacher's `sc_broadcaster.rs`
//! subscribe-submit-track-nonce worker shape.

pub mod encode;
pub mod rpc;
pub mod tx_store;

use crate::client::keygen::KeyGenClient;
use crate::client::signing::SigningClient;
use crate::constants::DEFAULT_RETRY_DELAY_MS;
use crate::frost::merkle;
use crate::model::{ParticipantId, ProtocolAction};
use crate::storage::{GroupStorage, NonceStorage, SignatureRequestStorage, Storage};
use rpc::EthRpcApi;
use slog::{o, Logger};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tx_store::TxSubmitter;
use web3::types::Address;

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as u64
}

pub struct ActionQueueWorker<S, R> {
    storage: Arc<S>,
    submitter: Arc<TxSubmitter<S, R>>,
    keygen: Arc<KeyGenClient<S>>,
    signing: Arc<SigningClient<S>>,
    this_id: ParticipantId,
    coordinator: Address,
    consensus: Address,
    logger: Logger,
}

impl<S, R> ActionQueueWorker<S, R>
where
    S: Storage,
    R: EthRpcApi,
{
    pub fn new(
        storage: Arc<S>,
        submitter: Arc<TxSubmitter<S, R>>,
        keygen: Arc<KeyGenClient<S>>,
        signing: Arc<SigningClient<S>>,
        this_id: ParticipantId,
        coordinator: Address,
        consensus: Address,
        logger: &Logger,
    ) -> Self {
        Self {
            storage,
            submitter,
            keygen,
            signing,
            this_id,
            coordinator,
            consensus,
            logger: logger.new(o!(crate::constants::COMPONENT_KEY => "ActionQueue")),
        }
    }

    /// Processes head-of-line exactly once: peek, drop if expired,
    /// otherwise invoke and pop on success. Callers loop this with a
    /// retry-delay sleep on failure (§4.6).
    pub async fn process_head(&self) -> anyhow::Result<()> {
        let Some(entry) = self.storage.peek_action()? else {
            return Ok(());
        };

        if now_ms() >= entry.valid_until_ms {
            slog::warn!(self.logger, "action expired, dropping"; "action" => format!("{:?}", entry.action));
            self.storage.pop_action()?;
            return Ok(());
        }

        match self.invoke(&entry.action).await {
            Ok(()) => {
                self.storage.pop_action()?;
            }
            Err(err) => {
                slog::warn!(self.logger, "action handler failed, retaining for retry"; "error" => format!("{err:#}"));
                tokio::time::sleep(Duration::from_millis(DEFAULT_RETRY_DELAY_MS)).await;
            }
        }
        Ok(())
    }

    async fn submit(&self, to: Address, calldata: Vec<u8>) -> anyhow::Result<()> {
        self.submitter.register_and_send(to, calldata, 500_000).await?;
        Ok(())
    }

    async fn invoke(&self, action: &ProtocolAction) -> anyhow::Result<()> {
        use ProtocolAction::*;

        match action {
            StartKeyGen { participants, threshold, context } => {
                let mut rng = rand::thread_rng();
                let out = self.keygen.setup_group(participants.clone(), *threshold, self.this_id, context, &mut rng)?;
                let calldata = encode::key_gen_and_commit(
                    out.participants_root,
                    participants.len() as u64,
                    *threshold,
                    *context,
                    self.this_id,
                    &merkle::encode_proof(&out.poap),
                    &out.pok,
                );
                self.submit(self.coordinator, calldata).await
            }

            PublishSecretShares { group_id } => {
                let (_verification_share, shares) = self.keygen.create_secret_shares(group_id)?;
                let own_commitment = self
                    .storage
                    .get_group(group_id)?
                    .and_then(|g| g.commitments_by_id.get(&self.this_id).map(|c| c[0]))
                    .ok_or_else(|| anyhow::anyhow!("missing own commitment for group"))?;
                for (_target, encrypted) in shares {
                    let calldata = encode::key_gen_secret_share(*group_id, own_commitment, encrypted);
                    self.submit(self.coordinator, calldata).await?;
                }
                Ok(())
            }

            ConfirmKeyGen { group_id, callback } => {
                let calldata = match callback {
                    Some((target, context)) => {
                        encode::key_gen_confirm_with_callback(*group_id, (*target).into(), context.clone())
                    }
                    None => encode::key_gen_confirm(*group_id),
                };
                self.submit(self.coordinator, calldata).await
            }

            Complain { group_id, accused_id } => {
                self.submit(self.coordinator, encode::key_gen_complain(*group_id, *accused_id)).await
            }

            ComplaintResponse { group_id, plaintiff_id, secret_share } => {
                let calldata = encode::key_gen_complaint_response(*group_id, *plaintiff_id, secret_share.to_bytes());
                self.submit(self.coordinator, calldata).await
            }

            RequestSignature { group_id, message } => {
                self.submit(self.coordinator, encode::sign(*group_id, *message)).await
            }

            RegisterNonceCommitments { group_id } => {
                let mut rng = rand::thread_rng();
                let root = self.signing.generate_nonce_tree(&mut rng)?;
                let _ = group_id;
                self.submit(self.coordinator, encode::preprocess(*group_id, root)).await
            }

            RevealNonceCommitments { signature_id } => {
                let revealed = self.signing.reveal_nonces(*signature_id)?;
                let calldata = encode::sign_reveal_nonces(
                    *signature_id,
                    revealed.hiding,
                    revealed.binding,
                    &merkle::encode_proof(&revealed.proof),
                );
                self.submit(self.coordinator, calldata).await
            }

            PublishSignatureShare { signature_id } => {
                let out = self.signing.create_signature_share(*signature_id, self.this_id)?;
                let request = self
                    .storage
                    .get_request(*signature_id)?
                    .ok_or_else(|| anyhow::anyhow!("signature request vanished before publishing share"))?;
                let signers_root = {
                    let leaves: Vec<[u8; 32]> =
                        request.signers.iter().map(|id| crate::crypto::h5_com(&[&id.to_be_bytes()])).collect();
                    merkle::build_tree(&leaves).0
                };
                let calldata = encode::sign_share(
                    *signature_id,
                    out.commitment_share,
                    signers_root,
                    out.share,
                    out.lagrange_coefficient,
                    &[],
                );
                self.submit(self.coordinator, calldata).await
            }

            AttestTransaction { epoch, transaction_hash, signature_id } => {
                self.submit(self.consensus, encode::attest_transaction(*epoch, *transaction_hash, *signature_id)).await
            }

            StageEpoch { proposed_epoch, rollover_block, group_id, signature_id } => {
                self.submit(
                    self.consensus,
                    encode::stage_epoch(*proposed_epoch, *rollover_block, *group_id, *signature_id),
                )
                .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::test_logger;
    use crate::model::ActionQueueEntry;
    use crate::storage::MemoryStorage;
    use rpc::MockEthRpcApi;

    fn worker(storage: Arc<MemoryStorage>) -> ActionQueueWorker<MemoryStorage, MockEthRpcApi> {
        let logger = test_logger();
        let rpc = MockEthRpcApi::new();
        let submitter = Arc::new(TxSubmitter::new(
            storage.clone(),
            Arc::new(rpc),
            Address::zero(),
            secp256k1::SecretKey::from_slice(&[1u8; 32]).unwrap(),
            1,
            &logger,
        ));
        ActionQueueWorker::new(
            storage.clone(),
            submitter,
            Arc::new(KeyGenClient::new(storage.clone(), &logger)),
            Arc::new(SigningClient::new(storage, &logger)),
            1,
            Address::zero(),
            Address::zero(),
            &logger,
        )
    }

    #[tokio::test]
    async fn expired_action_is_dropped_without_invoking_handler() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .push_action(ActionQueueEntry {
                action: ProtocolAction::Complain { group_id: [0u8; 32], accused_id: 2 },
                valid_until_ms: 0,
            })
            .unwrap();

        let worker = worker(storage.clone());
        worker.process_head().await.unwrap();
        assert_eq!(storage.queue_len().unwrap(), 0);
    }
}
