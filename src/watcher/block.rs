//! Block-stream side of the watcher (§4.9): produces an ordered
//! `WarpToBlock | UncleBlock | NewBlock` stream from a stored cursor to
//! chain tip, grounded in the teacher's `EthRpcApi` polling shape
//! (`engine/src/eth/rpc.rs`) generalized with reorg handling the teacher
//! leaves to its underlying subscription transport.

use crate::action_queue::rpc::EthRpcApi;
use crate::errors::RpcError;
use std::time::Duration;
use web3::types::{BlockId, BlockNumber, H256, U64};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: u64,
    pub hash: [u8; 32],
    pub parent_hash: [u8; 32],
    pub timestamp: u64,
}

/// A single step of the block stream (§4.9).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockUpdate {
    /// The block at this height (and everything after it) is no longer on
    /// the canonical chain; any state applied from it onward must be
    /// treated as provisional and is about to be redelivered.
    UncleBlock(u64),
    /// Skips from `from` (exclusive) to `to` (inclusive) without
    /// per-block headers; the event watcher still queries logs for the
    /// whole range in one shot.
    WarpToBlock { from: u64, to: u64 },
    NewBlock(BlockHeader),
}

fn to_header(block: &web3::types::Block<H256>) -> anyhow::Result<BlockHeader> {
    let number = block.number.ok_or_else(|| anyhow::anyhow!("pending block has no number"))?;
    Ok(BlockHeader {
        number: number.as_u64(),
        hash: block.hash.map(|h| h.0).unwrap_or_default(),
        parent_hash: block.parent_hash.0,
        timestamp: block.timestamp.as_u64(),
    })
}

pub struct BlockWatcherConfig {
    pub max_reorg_depth: u64,
    pub propagation_delay: Duration,
    pub block_time: Duration,
    pub poll_backoffs: Vec<Duration>,
}

/// Polls an `EthRpcApi` transport for new blocks, tailing the chain tip
/// while tolerating uncles up to `max_reorg_depth` blocks deep.
pub struct BlockWatcher<R> {
    rpc: std::sync::Arc<R>,
    cfg: BlockWatcherConfig,
    last_delivered: Option<BlockHeader>,
    started: bool,
}

impl<R: EthRpcApi> BlockWatcher<R> {
    pub fn new(rpc: std::sync::Arc<R>, cfg: BlockWatcherConfig) -> Self {
        Self { rpc, cfg, last_delivered: None, started: false }
    }

    async fn fetch(&self, number: u64) -> anyhow::Result<BlockHeader> {
        let block = self
            .rpc
            .block(BlockId::Number(BlockNumber::Number(U64::from(number))))
            .await?
            .ok_or(RpcError::BlockNotFound(number))?;
        to_header(&block)
    }

    /// Waits for the chain tip to move past `after`, honoring the
    /// propagation-delay/back-off schedule before giving up and letting
    /// the caller skip the slot (§4.9).
    async fn await_tip_past(&self, after: u64) -> anyhow::Result<u64> {
        if let Some(head) = self.last_delivered {
            let expected = head.timestamp + self.cfg.block_time.as_secs();
            let now = crate::machine::now_ms() / 1000;
            if now < expected + self.cfg.propagation_delay.as_secs() {
                tokio::time::sleep(Duration::from_secs(
                    (expected + self.cfg.propagation_delay.as_secs()).saturating_sub(now),
                ))
                .await;
            }
        }

        for backoff in self.cfg.poll_backoffs.iter().copied() {
            let tip = self.rpc.block_number().await?.as_u64();
            if tip > after {
                return Ok(tip);
            }
            tokio::time::sleep(backoff).await;
        }

        Ok(self.rpc.block_number().await?.as_u64())
    }

    /// Produces the next batch of updates. Empty on a quiet tick (chain
    /// tip hasn't advanced past `after` even after the back-off schedule,
    /// in which case the slot is skipped).
    pub async fn poll(&mut self, cursor: u64) -> anyhow::Result<Vec<BlockUpdate>> {
        let mut updates = Vec::new();

        if !self.started {
            self.started = true;
            let safe_start = cursor.saturating_sub(self.cfg.max_reorg_depth.saturating_sub(1));
            if safe_start < cursor {
                updates.push(BlockUpdate::UncleBlock(safe_start));
            }
            self.last_delivered = None;
            return self.continue_from(safe_start, updates).await;
        }

        let after = self.last_delivered.map(|h| h.number).unwrap_or(cursor);
        self.continue_from(after, updates).await
    }

    async fn continue_from(&mut self, after: u64, mut updates: Vec<BlockUpdate>) -> anyhow::Result<Vec<BlockUpdate>> {
        let tip = self.await_tip_past(after).await?;
        if tip <= after {
            return Ok(updates);
        }

        let tail_from = tip.saturating_sub(self.cfg.max_reorg_depth.saturating_sub(1)).max(after + 1);

        if tail_from > after + 1 {
            updates.push(BlockUpdate::WarpToBlock { from: after, to: tail_from - 1 });
        }

        for number in tail_from..=tip {
            let header = self.fetch(number).await?;

            if let Some(last) = self.last_delivered {
                if header.parent_hash != last.hash && number == last.number + 1 {
                    updates.push(BlockUpdate::UncleBlock(last.number));
                    self.last_delivered = None;
                }
            }

            updates.push(BlockUpdate::NewBlock(header));
            self.last_delivered = Some(header);
        }

        Ok(updates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action_queue::rpc::MockEthRpcApi;
    use web3::types::Block;

    fn header_block(number: u64, hash: u8, parent: u8) -> Block<H256> {
        Block {
            number: Some(U64::from(number)),
            hash: Some(H256::from([hash; 32])),
            parent_hash: H256::from([parent; 32]),
            timestamp: web3::types::U256::from(1_700_000_000u64 + number),
            ..Default::default()
        }
    }

    fn cfg() -> BlockWatcherConfig {
        BlockWatcherConfig {
            max_reorg_depth: 2,
            propagation_delay: Duration::from_millis(0),
            block_time: Duration::from_millis(0),
            poll_backoffs: vec![Duration::from_millis(0)],
        }
    }

    #[tokio::test]
    async fn startup_warps_then_tails_the_reorg_window() {
        let mut rpc = MockEthRpcApi::new();
        rpc.expect_block_number().returning(|| Ok(U64::from(1000)));
        rpc.expect_block().returning(|id| {
            let BlockId::Number(BlockNumber::Number(n)) = id else { panic!("expected numeric id") };
            let n = n.as_u64();
            Ok(Some(header_block(n, n as u8, (n - 1) as u8)))
        });

        let mut watcher = BlockWatcher::new(std::sync::Arc::new(rpc), cfg());
        let updates = watcher.poll(900).await.unwrap();

        assert_eq!(updates[0], BlockUpdate::UncleBlock(899));
        assert!(matches!(updates[1], BlockUpdate::WarpToBlock { from: 899, to: 998 }));
        assert!(matches!(updates[2], BlockUpdate::NewBlock(h) if h.number == 999));
        assert!(matches!(updates[3], BlockUpdate::NewBlock(h) if h.number == 1000));
    }

    #[tokio::test]
    async fn mismatched_parent_hash_emits_uncle_before_redelivering() {
        let mut rpc = MockEthRpcApi::new();
        let call = std::sync::atomic::AtomicU64::new(0);
        rpc.expect_block_number().returning(|| Ok(U64::from(101)));
        rpc.expect_block().returning(move |id| {
            let BlockId::Number(BlockNumber::Number(n)) = id else { panic!("expected numeric id") };
            let n = n.as_u64();
            let attempt = call.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if n == 101 && attempt == 0 {
                // first delivery of 101 has an unexpected parent.
                return Ok(Some(header_block(101, 101, 200)));
            }
            Ok(Some(header_block(n, n as u8, (n - 1) as u8)))
        });

        let mut watcher = BlockWatcher::new(std::sync::Arc::new(rpc), cfg());
        watcher.last_delivered = Some(BlockHeader { number: 100, hash: [100; 32], parent_hash: [99; 32], timestamp: 0 });
        watcher.started = true;

        let updates = watcher.poll(100).await.unwrap();
        assert!(matches!(updates[0], BlockUpdate::UncleBlock(100)));
    }
}
