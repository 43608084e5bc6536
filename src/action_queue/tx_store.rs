//! Transaction submission with a persistent `tx_store` keyed by nonce
//! (§4.6): "at-least-once-then-confirmed" delivery, with a `checkPending`
//! resubmission timer.

use crate::constants::{DEFAULT_CHECK_PENDING_POLL_SECONDS, DEFAULT_RESUBMIT_SECONDS};
use crate::errors::RpcError;
use crate::storage::{TransactionStorage, TxRow};
use slog::{o, Logger};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use web3::types::{Address, Bytes, TransactionParameters, U256, U64};

use super::rpc::EthRpcApi;

pub struct TxSubmitter<S, R> {
    storage: Arc<S>,
    rpc: Arc<R>,
    from: Address,
    private_key: secp256k1::SecretKey,
    chain_id: u64,
    logger: Logger,
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as u64
}

impl<S, R> TxSubmitter<S, R>
where
    S: TransactionStorage,
    R: EthRpcApi,
{
    pub fn new(
        storage: Arc<S>,
        rpc: Arc<R>,
        from: Address,
        private_key: secp256k1::SecretKey,
        chain_id: u64,
        logger: &Logger,
    ) -> Self {
        Self {
            storage,
            rpc,
            from,
            private_key,
            chain_id,
            logger: logger.new(o!(crate::constants::COMPONENT_KEY => "TxSubmitter")),
        }
    }

    /// Reads the pending on-chain nonce, reserves the next free row, and
    /// submits the transaction, recording its hash on success.
    pub async fn register_and_send(&self, to: Address, calldata: Vec<u8>, gas: u64) -> anyhow::Result<u64> {
        let pending_nonce: u64 = self.rpc.transaction_count(self.from).await?.as_u64();
        let min_nonce = self.storage.max_reserved_nonce()?.map(|n| n + 1).unwrap_or(pending_nonce);
        let nonce = min_nonce.max(pending_nonce);

        let mut row = TxRow {
            nonce,
            calldata: calldata.clone(),
            to: to.into(),
            value: [0u8; 32],
            gas,
            created_at_ms: now_ms(),
            hash: None,
        };
        self.storage.insert_pending(row.clone())?;

        match self.send_raw(&row).await {
            Ok(hash) => {
                row.hash = Some(hash);
                self.storage.update_pending(row)?;
            }
            Err(err) => {
                slog::warn!(self.logger, "initial submission failed, will retry via checkPending"; "error" => format!("{err:#}"));
            }
        }

        Ok(nonce)
    }

    async fn send_raw(&self, row: &TxRow) -> anyhow::Result<[u8; 32]> {
        let signed = self.sign(row).await?;
        let hash = self.rpc.send_raw_transaction(Bytes(signed)).await?;
        Ok(hash.0)
    }

    /// Builds and signs an EIP-1559 transaction with `self.private_key`,
    /// mirroring the teacher's `sign_transaction` (`engine/src/eth/rpc.rs`)
    /// and its `fee_history`-based fee estimation
    /// (`engine/src/eth/chain_data_witnessing.rs`'s `get_tracked_data`).
    async fn sign(&self, row: &TxRow) -> anyhow::Result<Vec<u8>> {
        let fee_history = self
            .rpc
            .fee_history(U256::one(), web3::types::BlockNumber::Latest, Some(vec![0.5]))
            .await?;
        let base_fee = *fee_history.base_fee_per_gas.first().ok_or_else(|| anyhow::anyhow!("empty fee history"))?;
        let priority_fee = fee_history
            .reward
            .as_ref()
            .and_then(|r| r.first())
            .and_then(|r| r.first())
            .copied()
            .unwrap_or_else(|| U256::from(1_500_000_000u64));
        let max_fee_per_gas = base_fee.saturating_mul(U256::from(2)) + priority_fee;

        let tx = TransactionParameters {
            nonce: Some(U256::from(row.nonce)),
            to: Some(row.to.into()),
            value: U256::zero(),
            gas: U256::from(row.gas),
            data: Bytes(row.calldata.clone()),
            chain_id: Some(self.chain_id),
            transaction_type: Some(U64::from(2u64)),
            max_fee_per_gas: Some(max_fee_per_gas),
            max_priority_fee_per_gas: Some(priority_fee),
            ..Default::default()
        };

        let signed = self.rpc.sign_transaction(tx, &self.private_key).await?;
        Ok(signed.raw_transaction.0)
    }

    /// Run once per `checkPending` tick: for rows older than
    /// `resubmit_seconds`, check the receipt; resubmit if still missing,
    /// delete if mined or if the node reports `NonceTooLowError`.
    pub async fn check_pending(&self) -> anyhow::Result<()> {
        let now = now_ms();
        for row in self.storage.all_pending()? {
            let age_seconds = now.saturating_sub(row.created_at_ms) / 1000;
            if age_seconds < DEFAULT_RESUBMIT_SECONDS {
                continue;
            }

            if let Some(hash) = row.hash {
                if let Some(receipt) = self.rpc.transaction_receipt(web3::types::H256(hash)).await? {
                    if receipt.status == Some(1.into()) || receipt.status.is_some() {
                        slog::info!(self.logger, "transaction mined"; "nonce" => row.nonce);
                        self.storage.delete_pending(row.nonce)?;
                        continue;
                    }
                }
            }

            match self.send_raw(&row).await {
                Ok(hash) => {
                    let mut updated = row.clone();
                    updated.hash = Some(hash);
                    self.storage.update_pending(updated)?;
                }
                Err(err) => {
                    if is_nonce_too_low(&err) {
                        slog::info!(self.logger, "nonce consumed externally"; "nonce" => row.nonce);
                        self.storage.delete_pending(row.nonce)?;
                    } else {
                        slog::warn!(self.logger, "resubmission failed"; "nonce" => row.nonce, "error" => format!("{err:#}"));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(DEFAULT_CHECK_PENDING_POLL_SECONDS)
    }
}

fn is_nonce_too_low(err: &anyhow::Error) -> bool {
    err.downcast_ref::<RpcError>().map(|e| matches!(e, RpcError::NonceTooLow)).unwrap_or(false)
        || err.to_string().to_lowercase().contains("nonce too low")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action_queue::rpc::MockEthRpcApi;
    use crate::logging::test_logger;
    use crate::storage::MemoryStorage;

    fn dummy_key() -> secp256k1::SecretKey {
        secp256k1::SecretKey::from_slice(&[7u8; 32]).unwrap()
    }

    #[tokio::test]
    async fn register_reserves_increasing_nonces() {
        let storage = Arc::new(MemoryStorage::new());
        let mut rpc = MockEthRpcApi::new();
        rpc.expect_transaction_count().returning(|_| Ok(U256::from(5u64)));
        rpc.expect_fee_history().returning(|_, _, _| {
            Ok(web3::types::FeeHistory {
                oldest_block: U256::zero(),
                base_fee_per_gas: vec![U256::from(1_000_000_000u64)],
                gas_used_ratio: vec![0.5],
                reward: Some(vec![vec![U256::from(1_500_000_000u64)]]),
            })
        });
        rpc.expect_sign_transaction().returning(|_, _| {
            Ok(web3::types::SignedTransaction {
                message_hash: web3::types::H256::zero(),
                v: 0,
                r: web3::types::H256::zero(),
                s: web3::types::H256::zero(),
                raw_transaction: Bytes(vec![0xde, 0xad, 0xbe, 0xef]),
                transaction_hash: web3::types::H256::zero(),
            })
        });
        rpc.expect_send_raw_transaction().returning(|_| Ok(web3::types::H256::zero()));

        let submitter = TxSubmitter::new(
            storage.clone(),
            Arc::new(rpc),
            Address::zero(),
            dummy_key(),
            1,
            &test_logger(),
        );

        let n1 = submitter.register_and_send(Address::zero(), vec![1], 21000).await.unwrap();
        let n2 = submitter.register_and_send(Address::zero(), vec![2], 21000).await.unwrap();

        assert_eq!(n1, 5);
        assert_eq!(n2, 6);
    }
}
