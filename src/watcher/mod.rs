//! Event/block watcher (C9): produces an ordered, cursor-advancing
//! stream of `machine::Event`s and block ticks for the service shell to
//! feed into the state machine. Grounded in the teacher's
//! `EthRpcApi`-polling idiom (`engine/src/eth/rpc.rs`), adapted with the
//! reorg handling the distilled spec calls for.

pub mod block;
pub mod events;

use crate::action_queue::rpc::EthRpcApi;
use block::{BlockUpdate, BlockWatcher, BlockWatcherConfig};
use slog::{o, Logger};
use std::sync::Arc;
use web3::types::Address;

/// One unit of work for the state machine driver: either a decoded
/// on-chain event at `(block_number, log_index)`, or the block-tick
/// pseudo-event fired once all of a block's events have been applied.
pub enum WatcherItem {
    Event { block_number: u64, log_index: u64, event: crate::machine::Event },
    BlockTick { block_number: u64 },
    /// Everything applied at or after `block_number` must be rolled back;
    /// the caller resumes watching from `block_number` again.
    Uncled { block_number: u64 },
}

pub struct Watcher<R> {
    rpc: Arc<R>,
    block_watcher: BlockWatcher<R>,
    addresses: Vec<Address>,
    chain_id: u64,
    logger: Logger,
}

impl<R: EthRpcApi> Watcher<R> {
    pub fn new(
        rpc: Arc<R>,
        coordinator: Address,
        consensus: Address,
        chain_id: u64,
        max_reorg_depth: u64,
        logger: &Logger,
    ) -> Self {
        let cfg = BlockWatcherConfig {
            max_reorg_depth,
            propagation_delay: std::time::Duration::from_secs(2),
            block_time: std::time::Duration::from_secs(12),
            poll_backoffs: vec![
                std::time::Duration::from_millis(500),
                std::time::Duration::from_secs(1),
                std::time::Duration::from_secs(2),
                std::time::Duration::from_secs(4),
            ],
        };
        Self {
            block_watcher: BlockWatcher::new(rpc.clone(), cfg),
            rpc,
            addresses: vec![coordinator, consensus],
            chain_id,
            logger: logger.new(o!(crate::constants::COMPONENT_KEY => "Watcher")),
        }
    }

    /// Advances the watcher by one poll cycle starting from `cursor`,
    /// returning the ordered items to apply. A `WarpToBlock` step yields
    /// one bulk `get_logs` query; `NewBlock` steps in the live tail each
    /// get their own per-block query with a bloom pre-check.
    pub async fn poll(&mut self, cursor: u64) -> anyhow::Result<Vec<WatcherItem>> {
        let updates = self.block_watcher.poll(cursor).await?;
        let mut items = Vec::new();

        for update in updates {
            match update {
                BlockUpdate::UncleBlock(block_number) => {
                    slog::warn!(self.logger, "reorg detected"; "block" => block_number);
                    items.push(WatcherItem::Uncled { block_number });
                }
                BlockUpdate::WarpToBlock { from, to } => {
                    let events = events::fetch_range(&*self.rpc, self.chain_id, &self.addresses, from + 1, to).await?;
                    for (block_number, log_index, event) in events {
                        items.push(WatcherItem::Event { block_number, log_index, event });
                    }
                    items.push(WatcherItem::BlockTick { block_number: to });
                }
                BlockUpdate::NewBlock(header) => {
                    let events = self.events_for_block(&header).await?;
                    for (log_index, event) in events {
                        items.push(WatcherItem::Event { block_number: header.number, log_index, event });
                    }
                    items.push(WatcherItem::BlockTick { block_number: header.number });
                }
            }
        }

        Ok(items)
    }

    /// Per-block log fetch with a bloom-filter pre-check, falling back
    /// from a single range query to per-event queries if the retry count
    /// is exceeded (§4.9).
    async fn events_for_block(&self, header: &block::BlockHeader) -> anyhow::Result<Vec<(u64, crate::machine::Event)>> {
        const BLOCK_SINGLE_QUERY_RETRY_COUNT: u32 = 3;

        let block = self
            .rpc
            .block(web3::types::BlockId::Number(web3::types::BlockNumber::Number(web3::types::U64::from(
                header.number,
            ))))
            .await?
            .ok_or(crate::errors::RpcError::BlockNotFound(header.number))?;

        if !events::block_might_contain(&block, &self.addresses) {
            return Ok(Vec::new());
        }

        let mut attempt = 0;
        loop {
            match events::fetch_range(&*self.rpc, self.chain_id, &self.addresses, header.number, header.number).await {
                Ok(events) => return Ok(events.into_iter().map(|(_, index, event)| (index, event)).collect()),
                Err(err) if attempt < BLOCK_SINGLE_QUERY_RETRY_COUNT => {
                    attempt += 1;
                    slog::debug!(self.logger, "per-block log query failed, retrying"; "block" => header.number, "attempt" => attempt, "error" => format!("{err:#}"));
                }
                Err(_) => {
                    slog::warn!(self.logger, "per-block log query exhausted retries, falling back to per-event queries"; "block" => header.number);
                    return self.events_per_event_fallback(header.number).await;
                }
            }
        }
    }

    /// Last-resort fallback: query each event signature individually
    /// rather than the whole address set in one call.
    async fn events_per_event_fallback(&self, block_number: u64) -> anyhow::Result<Vec<(u64, crate::machine::Event)>> {
        let mut out = Vec::new();
        for address in &self.addresses {
            let events =
                events::fetch_range(&*self.rpc, self.chain_id, std::slice::from_ref(address), block_number, block_number)
                    .await?;
            out.extend(events.into_iter().map(|(_, index, event)| (index, event)));
        }
        out.sort_by_key(|(index, _)| *index);
        Ok(out)
    }
}
