//! Minimal Ethereum JSON-RPC surface the action queue and watcher depend
//! on, grounded in the teacher's `EthRpcApi` trait (`engine/src/eth/rpc.rs`):
//! an `async-trait` interface over `web3::Web3`, mockable via `mockall` for
//! unit tests.

use async_trait::async_trait;
use web3::types::{
    Block, BlockId, BlockNumber, Bytes, FeeHistory, FilterBuilder, Log, SignedTransaction,
    TransactionParameters, TransactionReceipt, H256, U256, U64,
};
use web3::Transport;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EthRpcApi: Send + Sync {
    async fn send_raw_transaction(&self, raw: Bytes) -> anyhow::Result<H256>;
    async fn transaction_count(&self, address: web3::types::Address) -> anyhow::Result<U256>;
    async fn transaction_receipt(&self, hash: H256) -> anyhow::Result<Option<TransactionReceipt>>;
    async fn chain_id(&self) -> anyhow::Result<U256>;
    async fn block(&self, id: BlockId) -> anyhow::Result<Option<Block<H256>>>;
    async fn block_number(&self) -> anyhow::Result<U64>;
    async fn get_logs(&self, filter: FilterBuilder) -> anyhow::Result<Vec<Log>>;
    async fn fee_history(
        &self,
        block_count: U256,
        newest_block: BlockNumber,
        reward_percentiles: Option<Vec<f64>>,
    ) -> anyhow::Result<FeeHistory>;
    async fn sign_transaction(
        &self,
        tx: TransactionParameters,
        key: &secp256k1::SecretKey,
    ) -> anyhow::Result<SignedTransaction>;
}

pub struct EthRpcClient<T: Transport> {
    web3: web3::Web3<T>,
}

impl<T: Transport> EthRpcClient<T> {
    pub fn new(transport: T) -> Self {
        Self { web3: web3::Web3::new(transport) }
    }
}

#[async_trait]
impl<T> EthRpcApi for EthRpcClient<T>
where
    T: Transport + Send + Sync,
    T::Out: Send,
{
    async fn send_raw_transaction(&self, raw: Bytes) -> anyhow::Result<H256> {
        self.web3
            .eth()
            .send_raw_transaction(raw)
            .await
            .map_err(anyhow::Error::from)
    }

    async fn transaction_count(&self, address: web3::types::Address) -> anyhow::Result<U256> {
        self.web3
            .eth()
            .transaction_count(address, Some(BlockNumber::Pending))
            .await
            .map_err(anyhow::Error::from)
    }

    async fn transaction_receipt(&self, hash: H256) -> anyhow::Result<Option<TransactionReceipt>> {
        self.web3.eth().transaction_receipt(hash).await.map_err(anyhow::Error::from)
    }

    async fn chain_id(&self) -> anyhow::Result<U256> {
        self.web3.eth().chain_id().await.map_err(anyhow::Error::from)
    }

    async fn block(&self, id: BlockId) -> anyhow::Result<Option<Block<H256>>> {
        self.web3.eth().block(id).await.map_err(anyhow::Error::from)
    }

    async fn block_number(&self) -> anyhow::Result<U64> {
        self.web3.eth().block_number().await.map_err(anyhow::Error::from)
    }

    async fn get_logs(&self, filter: FilterBuilder) -> anyhow::Result<Vec<Log>> {
        self.web3.eth().logs(filter.build()).await.map_err(anyhow::Error::from)
    }

    async fn fee_history(
        &self,
        block_count: U256,
        newest_block: BlockNumber,
        reward_percentiles: Option<Vec<f64>>,
    ) -> anyhow::Result<FeeHistory> {
        self.web3.eth().fee_history(block_count, newest_block, reward_percentiles).await.map_err(anyhow::Error::from)
    }

    async fn sign_transaction(
        &self,
        tx: TransactionParameters,
        key: &secp256k1::SecretKey,
    ) -> anyhow::Result<SignedTransaction> {
        self.web3
            .accounts()
            .sign_transaction(tx, web3::signing::SecretKeyRef::from(key))
            .await
            .map_err(anyhow::Error::from)
    }
}

/// Picks an HTTP or WebSocket transport at startup based on the
/// configured URL scheme, grounded in the teacher's `EthHttpRpcClient` /
/// `EthWsRpcClient` split (`engine/src/eth/rpc.rs`) without the dual
/// simultaneous-query behavior, since this engine only ever needs one
/// live connection per validator process.
pub enum AnyTransportClient {
    Http(EthRpcClient<web3::transports::Http>),
    Ws(EthRpcClient<web3::transports::WebSocket>),
}

impl AnyTransportClient {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        if url.starts_with("ws") {
            let transport = web3::transports::WebSocket::new(url).await?;
            Ok(Self::Ws(EthRpcClient::new(transport)))
        } else {
            let transport = web3::transports::Http::new(url)?;
            Ok(Self::Http(EthRpcClient::new(transport)))
        }
    }
}

macro_rules! dispatch {
    ($self:expr, $method:ident($($arg:expr),*)) => {
        match $self {
            Self::Http(c) => c.$method($($arg),*).await,
            Self::Ws(c) => c.$method($($arg),*).await,
        }
    };
}

#[async_trait]
impl EthRpcApi for AnyTransportClient {
    async fn send_raw_transaction(&self, raw: Bytes) -> anyhow::Result<H256> {
        dispatch!(self, send_raw_transaction(raw))
    }

    async fn transaction_count(&self, address: web3::types::Address) -> anyhow::Result<U256> {
        dispatch!(self, transaction_count(address))
    }

    async fn transaction_receipt(&self, hash: H256) -> anyhow::Result<Option<TransactionReceipt>> {
        dispatch!(self, transaction_receipt(hash))
    }

    async fn chain_id(&self) -> anyhow::Result<U256> {
        dispatch!(self, chain_id())
    }

    async fn block(&self, id: BlockId) -> anyhow::Result<Option<Block<H256>>> {
        dispatch!(self, block(id))
    }

    async fn block_number(&self) -> anyhow::Result<U64> {
        dispatch!(self, block_number())
    }

    async fn get_logs(&self, filter: FilterBuilder) -> anyhow::Result<Vec<Log>> {
        dispatch!(self, get_logs(filter))
    }

    async fn fee_history(
        &self,
        block_count: U256,
        newest_block: BlockNumber,
        reward_percentiles: Option<Vec<f64>>,
    ) -> anyhow::Result<FeeHistory> {
        dispatch!(self, fee_history(block_count, newest_block, reward_percentiles))
    }

    async fn sign_transaction(
        &self,
        tx: TransactionParameters,
        key: &secp256k1::SecretKey,
    ) -> anyhow::Result<SignedTransaction> {
        dispatch!(self, sign_transaction(tx, key))
    }
}
