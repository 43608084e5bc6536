//! Service shell (C10): owns the validator's signing key, wires the
//! watcher into the state machine, applies `StateDiff`s atomically
//! against storage alongside the cursor advance, and runs the action
//! queue and tx-store resubmission timer as cooperative tasks.
//!
//! Grounded in the teacher's `start_client` wiring function
//! (`engine/src/multisig/mod.rs`): a `tokio::select!` loop over a
//! handful of channels/streams plus a periodic cleanup tick.

use crate::action_queue::rpc::EthRpcApi;
use crate::action_queue::tx_store::TxSubmitter;
use crate::action_queue::ActionQueueWorker;
use crate::client::{KeyGenClient, SigningClient};
use crate::machine::{Driver, MachineConfig};
use crate::metrics::Metrics;
use crate::storage::{ConsensusStorage, Storage};
use crate::watcher::{Watcher, WatcherItem};
use slog::{o, Logger};
use std::sync::Arc;
use std::time::Duration;

pub struct ShellConfig {
    pub chain_id: u64,
    pub coordinator: web3::types::Address,
    pub consensus: web3::types::Address,
    pub this_id: crate::model::ParticipantId,
    pub max_reorg_depth: u64,
    pub key_gen_timeout: u64,
    pub signing_timeout: u64,
    pub block_poll_interval: Duration,
    pub action_queue_poll_interval: Duration,
    pub check_pending_poll_interval: Duration,
}

/// Owns every long-lived component and runs the cooperative event loop
/// until a shutdown signal fires.
pub struct Shell<S, R> {
    storage: Arc<S>,
    watcher: Watcher<R>,
    driver: Driver<S>,
    action_queue: Arc<ActionQueueWorker<S, R>>,
    tx_submitter: Arc<TxSubmitter<S, R>>,
    metrics: Arc<Metrics>,
    cfg: ShellConfig,
    logger: Logger,
}

impl<S, R> Shell<S, R>
where
    S: Storage + 'static,
    R: EthRpcApi + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: Arc<S>,
        rpc: Arc<R>,
        private_key: secp256k1::SecretKey,
        from: web3::types::Address,
        cfg: ShellConfig,
        logger: &Logger,
    ) -> anyhow::Result<Self> {
        let logger = logger.new(o!(crate::constants::COMPONENT_KEY => "Shell"));
        let metrics = Arc::new(Metrics::new()?);

        let keygen = Arc::new(KeyGenClient::new(storage.clone(), &logger));
        let signing = Arc::new(SigningClient::new(storage.clone(), &logger));

        let machine_cfg = MachineConfig {
            chain_id: cfg.chain_id,
            consensus_address: cfg.consensus.0,
            key_gen_timeout: cfg.key_gen_timeout,
            signing_timeout: cfg.signing_timeout,
        };
        let driver = Driver::new(storage.clone(), keygen.clone(), signing.clone(), machine_cfg, cfg.this_id, &logger);

        let watcher =
            Watcher::new(rpc.clone(), cfg.coordinator, cfg.consensus, cfg.chain_id, cfg.max_reorg_depth, &logger);

        let tx_submitter =
            Arc::new(TxSubmitter::new(storage.clone(), rpc.clone(), from, private_key, cfg.chain_id, &logger));
        let action_queue = Arc::new(ActionQueueWorker::new(
            storage.clone(),
            tx_submitter.clone(),
            keygen,
            signing,
            cfg.this_id,
            cfg.coordinator,
            cfg.consensus,
            &logger,
        ));

        Ok(Self { storage, watcher, driver, action_queue, tx_submitter, metrics, cfg, logger })
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Runs until `shutdown` resolves. On return, the caller may assume
    /// the watcher cursor and action queue are in a flushed, consistent
    /// state (§6 CLI surface: drain in-flight action, flush storage,
    /// unsubscribe watcher).
    pub async fn run(&mut self, mut shutdown: tokio::sync::oneshot::Receiver<()>) -> anyhow::Result<()> {
        let mut block_tick = tokio::time::interval(self.cfg.block_poll_interval);
        let mut action_tick = tokio::time::interval(self.cfg.action_queue_poll_interval);
        let mut check_pending_tick = tokio::time::interval(self.cfg.check_pending_poll_interval);

        loop {
            tokio::select! {
                _ = block_tick.tick() => {
                    if let Err(err) = self.drive_watcher().await {
                        slog::warn!(self.logger, "watcher cycle failed"; "error" => format!("{err:#}"));
                    }
                }
                _ = action_tick.tick() => {
                    if let Err(err) = self.action_queue.process_head().await {
                        slog::warn!(self.logger, "action queue cycle failed"; "error" => format!("{err:#}"));
                    }
                }
                _ = check_pending_tick.tick() => {
                    if let Err(err) = self.tx_submitter.check_pending().await {
                        slog::warn!(self.logger, "checkPending cycle failed"; "error" => format!("{err:#}"));
                    }
                }
                Ok(()) = &mut shutdown => {
                    slog::info!(self.logger, "shutdown requested, draining in-flight action");
                    let _ = self.action_queue.process_head().await;
                    break;
                }
            }
        }

        Ok(())
    }

    async fn drive_watcher(&mut self) -> anyhow::Result<()> {
        let (cursor, _) = self.storage.get_cursor()?;
        let items = self.watcher.poll(cursor).await?;

        for item in items {
            match item {
                WatcherItem::Uncled { block_number } => {
                    self.storage.put_cursor((block_number, None))?;
                    self.metrics.record_transition("uncled");
                }
                WatcherItem::Event { block_number, log_index, event } => {
                    let diff = self.driver.on_event(block_number, event);
                    match diff {
                        Ok(diff) => {
                            self.driver.commit(diff, (block_number, Some(log_index)))?;
                            self.metrics.event_index.set(log_index as i64);
                            self.metrics.record_transition("ok");
                        }
                        Err(err) => {
                            slog::warn!(self.logger, "transition failed, cursor not advanced"; "error" => format!("{err:#}"));
                            self.metrics.record_transition("err");
                            return Err(err);
                        }
                    }
                }
                WatcherItem::BlockTick { block_number } => {
                    let diff = self.driver.on_block_tick(block_number)?;
                    self.driver.commit(diff, (block_number, None))?;
                    self.metrics.block_number.set(block_number as i64);
                }
            }
        }

        Ok(())
    }
}
