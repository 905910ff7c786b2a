//! # Chain Gateway
//!
//! Boundary to the chain RPC node. The engine core only talks to the
//! [`ChainGateway`] trait; `EthersGateway` is the production implementation
//! over an HTTP provider with an optional WebSocket endpoint for push
//! subscriptions.
//!
//! Every call carries a per-call timeout (default 5 s) and transient-looking
//! failures are retried with exponential backoff. An RPC failure surfaces as
//! `EngineError::Rpc`; callers treat the affected operation as a zero-result
//! for the cycle rather than crashing the pipeline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::prelude::{Http, Middleware, Provider, Ws};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address, BlockNumber, Bytes, Filter, Log, Transaction, TransactionReceipt, TransactionRequest,
    H256, U256,
};
use ethers::utils::keccak256;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::Retry;
use tracing::{debug, warn};

use crate::errors::{EngineError, EngineResult};
use crate::types::BlockEvent;

/// Cancels the backing pump task when dropped or explicitly cancelled.
/// Returned by the watch_* subscription methods.
#[derive(Debug)]
pub struct WatchHandle {
    task: JoinHandle<()>,
}

impl WatchHandle {
    pub fn new(task: JoinHandle<()>) -> Self {
        Self { task }
    }

    pub fn cancel(&self) {
        self.task.abort();
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Read/subscribe surface the engine needs from a chain node.
#[async_trait]
pub trait ChainGateway: Send + Sync {
    /// Raw `eth_call` against a contract.
    async fn read_contract(&self, to: Address, calldata: Bytes) -> EngineResult<Bytes>;

    async fn get_block_number(&self) -> EngineResult<u64>;

    async fn get_block(&self, number: u64) -> EngineResult<Option<BlockEvent>>;

    async fn get_transaction(&self, hash: H256) -> EngineResult<Option<Transaction>>;

    async fn get_transaction_receipt(&self, hash: H256)
        -> EngineResult<Option<TransactionReceipt>>;

    async fn get_logs(&self, filter: &Filter) -> EngineResult<Vec<Log>>;

    async fn get_gas_price(&self) -> EngineResult<U256>;

    async fn estimate_gas(&self, tx: &TypedTransaction) -> EngineResult<u64>;

    /// Executor-only: signs and broadcasts. Implementations without a signer
    /// return `EngineError::Execution`.
    async fn send_transaction(&self, tx: TypedTransaction) -> EngineResult<H256>;

    async fn wait_for_receipt(&self, hash: H256) -> EngineResult<Option<TransactionReceipt>>;

    /// Push (or poll-backed) stream of new block headers. Blocks must not be
    /// dropped by the subscription itself; the returned handle cancels it.
    async fn watch_blocks(&self) -> EngineResult<(mpsc::Receiver<BlockEvent>, WatchHandle)>;

    /// Stream of pending transaction hashes. May be unavailable (no WS
    /// endpoint); callers treat the error as "feature absent".
    async fn watch_pending_txs(&self) -> EngineResult<(mpsc::Receiver<H256>, WatchHandle)>;
}

/// Production gateway over ethers providers.
pub struct EthersGateway {
    http: Arc<Provider<Http>>,
    ws: Option<Arc<Provider<Ws>>>,
    call_timeout: Duration,
    max_retries: u32,
    backoff_base_ms: u64,
}

impl EthersGateway {
    pub fn new(http: Arc<Provider<Http>>) -> Self {
        Self {
            http,
            ws: None,
            call_timeout: Duration::from_secs(5),
            max_retries: 3,
            backoff_base_ms: 200,
        }
    }

    pub async fn connect(url: &str, ws_url: Option<&str>) -> EngineResult<Self> {
        let http = Provider::<Http>::try_from(url)
            .map_err(|e| EngineError::Config(format!("invalid rpc url '{}': {}", url, e)))?;
        let mut gateway = Self::new(Arc::new(http));
        if let Some(ws_url) = ws_url {
            match Provider::<Ws>::connect(ws_url).await {
                Ok(ws) => gateway.ws = Some(Arc::new(ws)),
                Err(e) => warn!("websocket endpoint unavailable, falling back to polling: {}", e),
            }
        }
        Ok(gateway)
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, backoff_base_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.backoff_base_ms = backoff_base_ms;
        self
    }

    fn backoff(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(self.backoff_base_ms.max(1))
            .max_delay(Duration::from_secs(2))
            .take(self.max_retries as usize)
    }

    /// Runs `op` under the per-call timeout with retry on transient failures.
    async fn guarded<T, F, Fut>(&self, label: &'static str, op: F) -> EngineResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, ethers::providers::ProviderError>>,
    {
        let call_timeout = self.call_timeout;
        Retry::spawn(self.backoff(), || async {
            match timeout(call_timeout, op()).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(EngineError::Rpc(format!("{}: {}", label, e))),
                Err(_) => Err(EngineError::Rpc(format!(
                    "{}: timed out after {:?}",
                    label, call_timeout
                ))),
            }
        })
        .await
    }
}

#[async_trait]
impl ChainGateway for EthersGateway {
    async fn read_contract(&self, to: Address, calldata: Bytes) -> EngineResult<Bytes> {
        let tx: TypedTransaction = TransactionRequest::new()
            .to(to)
            .data(calldata.clone())
            .into();
        self.guarded("eth_call", || {
            let tx = tx.clone();
            let provider = Arc::clone(&self.http);
            async move { provider.call(&tx, None).await }
        })
        .await
    }

    async fn get_block_number(&self) -> EngineResult<u64> {
        let number = self
            .guarded("eth_blockNumber", || {
                let provider = Arc::clone(&self.http);
                async move { provider.get_block_number().await }
            })
            .await?;
        Ok(number.as_u64())
    }

    async fn get_block(&self, number: u64) -> EngineResult<Option<BlockEvent>> {
        let block = self
            .guarded("eth_getBlockByNumber", || {
                let provider = Arc::clone(&self.http);
                async move { provider.get_block(BlockNumber::Number(number.into())).await }
            })
            .await?;
        Ok(block.and_then(|b| {
            Some(BlockEvent {
                number: b.number?.as_u64(),
                hash: b.hash?,
                timestamp: b.timestamp.as_u64(),
            })
        }))
    }

    async fn get_transaction(&self, hash: H256) -> EngineResult<Option<Transaction>> {
        self.guarded("eth_getTransactionByHash", || {
            let provider = Arc::clone(&self.http);
            async move { provider.get_transaction(hash).await }
        })
        .await
    }

    async fn get_transaction_receipt(
        &self,
        hash: H256,
    ) -> EngineResult<Option<TransactionReceipt>> {
        self.guarded("eth_getTransactionReceipt", || {
            let provider = Arc::clone(&self.http);
            async move { provider.get_transaction_receipt(hash).await }
        })
        .await
    }

    async fn get_logs(&self, filter: &Filter) -> EngineResult<Vec<Log>> {
        // No retry here: the collector owns range-halving recovery and must
        // see oversized-response errors as they are.
        let result = timeout(self.call_timeout, self.http.get_logs(filter)).await;
        match result {
            Ok(Ok(logs)) => Ok(logs),
            Ok(Err(e)) => Err(EngineError::Rpc(format!("eth_getLogs: {}", e))),
            Err(_) => Err(EngineError::Rpc(format!(
                "eth_getLogs: timed out after {:?}",
                self.call_timeout
            ))),
        }
    }

    async fn get_gas_price(&self) -> EngineResult<U256> {
        self.guarded("eth_gasPrice", || {
            let provider = Arc::clone(&self.http);
            async move { provider.get_gas_price().await }
        })
        .await
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> EngineResult<u64> {
        let estimate = self
            .guarded("eth_estimateGas", || {
                let tx = tx.clone();
                let provider = Arc::clone(&self.http);
                async move { provider.estimate_gas(&tx, None).await }
            })
            .await?;
        Ok(estimate.as_u64())
    }

    async fn send_transaction(&self, tx: TypedTransaction) -> EngineResult<H256> {
        let pending = self
            .http
            .send_transaction(tx, None)
            .await
            .map_err(|e| EngineError::Execution(format!("eth_sendTransaction: {}", e)))?;
        Ok(pending.tx_hash())
    }

    async fn wait_for_receipt(&self, hash: H256) -> EngineResult<Option<TransactionReceipt>> {
        // Poll with the call timeout per attempt; bounded overall wait.
        for _ in 0..30 {
            if let Some(receipt) = self.get_transaction_receipt(hash).await? {
                return Ok(Some(receipt));
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        Ok(None)
    }

    async fn watch_blocks(&self) -> EngineResult<(mpsc::Receiver<BlockEvent>, WatchHandle)> {
        let (tx, rx) = mpsc::channel(256);

        if let Some(ws) = self.ws.clone() {
            let task = tokio::spawn(async move {
                loop {
                    let mut stream = match ws.subscribe_blocks().await {
                        Ok(stream) => stream,
                        Err(e) => {
                            warn!("block subscription failed, retrying: {}", e);
                            tokio::time::sleep(Duration::from_secs(2)).await;
                            continue;
                        }
                    };
                    use futures_util::StreamExt;
                    while let Some(block) = stream.next().await {
                        let event = match (block.number, block.hash) {
                            (Some(number), Some(hash)) => BlockEvent {
                                number: number.as_u64(),
                                hash,
                                timestamp: block.timestamp.as_u64(),
                            },
                            _ => continue,
                        };
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    debug!("block subscription ended, resubscribing");
                }
            });
            return Ok((rx, WatchHandle::new(task)));
        }

        // Poll fallback: track the head and emit every new height in order.
        let provider = Arc::clone(&self.http);
        let task = tokio::spawn(async move {
            let mut last_seen: Option<u64> = None;
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                ticker.tick().await;
                let head = match provider.get_block_number().await {
                    Ok(n) => n.as_u64(),
                    Err(e) => {
                        debug!("head poll failed: {}", e);
                        continue;
                    }
                };
                let from = last_seen.map(|n| n + 1).unwrap_or(head);
                for number in from..=head {
                    let block = match provider
                        .get_block(BlockNumber::Number(number.into()))
                        .await
                    {
                        Ok(Some(b)) => b,
                        _ => continue,
                    };
                    let event = match (block.number, block.hash) {
                        (Some(n), Some(hash)) => BlockEvent {
                            number: n.as_u64(),
                            hash,
                            timestamp: block.timestamp.as_u64(),
                        },
                        _ => continue,
                    };
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                last_seen = Some(head);
            }
        });
        Ok((rx, WatchHandle::new(task)))
    }

    async fn watch_pending_txs(&self) -> EngineResult<(mpsc::Receiver<H256>, WatchHandle)> {
        let ws = self.ws.clone().ok_or_else(|| {
            EngineError::Rpc("pending-tx subscription requires a websocket endpoint".into())
        })?;
        let (tx, rx) = mpsc::channel(1024);
        let task = tokio::spawn(async move {
            let mut stream = match ws.subscribe_pending_txs().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("pending-tx subscription failed: {}", e);
                    return;
                }
            };
            use futures_util::StreamExt;
            while let Some(hash) = stream.next().await {
                // Pending stream is best-effort: drop on backpressure.
                if tx.try_send(hash).is_err() && tx.is_closed() {
                    return;
                }
            }
        });
        Ok((rx, WatchHandle::new(task)))
    }
}

/// Typed read helpers over the raw `read_contract` surface. Calldata is built
/// from hand-rolled selectors and outputs decoded from raw words, keeping the
/// gateway free of ABI machinery.
pub mod calls {
    use super::*;

    fn selector(signature: &str) -> [u8; 4] {
        let hash = keccak256(signature.as_bytes());
        [hash[0], hash[1], hash[2], hash[3]]
    }

    fn call_data(signature: &str, args: &[[u8; 32]]) -> Bytes {
        let mut data = Vec::with_capacity(4 + args.len() * 32);
        data.extend_from_slice(&selector(signature));
        for arg in args {
            data.extend_from_slice(arg);
        }
        Bytes::from(data)
    }

    /// Calldata for a no-argument call; used to assemble multicall batches.
    pub fn encode_no_args(signature: &str) -> Bytes {
        call_data(signature, &[])
    }

    /// Calldata for a single-uint256-argument call.
    pub fn encode_u256_arg(signature: &str, value: U256) -> Bytes {
        call_data(signature, &[word_from_u256(value)])
    }

    fn word_from_u256(value: U256) -> [u8; 32] {
        let mut word = [0u8; 32];
        value.to_big_endian(&mut word);
        word
    }

    fn word_from_address(value: Address) -> [u8; 32] {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(value.as_bytes());
        word
    }

    fn u256_at(raw: &[u8], word: usize) -> Option<U256> {
        let start = word * 32;
        raw.get(start..start + 32).map(U256::from_big_endian)
    }

    fn address_at(raw: &[u8], word: usize) -> Option<Address> {
        let start = word * 32;
        raw.get(start + 12..start + 32).map(Address::from_slice)
    }

    /// `getReserves()` on a V2-style pair. Reserves are uint112 padded into
    /// the first two words.
    pub async fn get_reserves(
        gateway: &dyn ChainGateway,
        pool: Address,
    ) -> EngineResult<(U256, U256)> {
        let raw = gateway
            .read_contract(pool, call_data("getReserves()", &[]))
            .await?;
        let r0 = u256_at(&raw, 0);
        let r1 = u256_at(&raw, 1);
        match (r0, r1) {
            (Some(r0), Some(r1)) => Ok((r0, r1)),
            _ => Err(EngineError::BadData(format!(
                "short getReserves() response from {:?}",
                pool
            ))),
        }
    }

    /// `slot0()` on a V3-style pool; returns the current sqrtPriceX96.
    pub async fn slot0_sqrt_price(
        gateway: &dyn ChainGateway,
        pool: Address,
    ) -> EngineResult<U256> {
        let raw = gateway.read_contract(pool, call_data("slot0()", &[])).await?;
        u256_at(&raw, 0).ok_or_else(|| {
            EngineError::BadData(format!("short slot0() response from {:?}", pool))
        })
    }

    /// `liquidity()` on a V3-style pool.
    pub async fn liquidity(gateway: &dyn ChainGateway, pool: Address) -> EngineResult<u128> {
        let raw = gateway
            .read_contract(pool, call_data("liquidity()", &[]))
            .await?;
        let value = u256_at(&raw, 0).ok_or_else(|| {
            EngineError::BadData(format!("short liquidity() response from {:?}", pool))
        })?;
        Ok(value.low_u128())
    }

    pub async fn token0(gateway: &dyn ChainGateway, pool: Address) -> EngineResult<Address> {
        let raw = gateway.read_contract(pool, call_data("token0()", &[])).await?;
        address_at(&raw, 0)
            .ok_or_else(|| EngineError::BadData(format!("short token0() response from {:?}", pool)))
    }

    pub async fn token1(gateway: &dyn ChainGateway, pool: Address) -> EngineResult<Address> {
        let raw = gateway.read_contract(pool, call_data("token1()", &[])).await?;
        address_at(&raw, 0)
            .ok_or_else(|| EngineError::BadData(format!("short token1() response from {:?}", pool)))
    }

    /// `allPairsLength()` on a V2-style factory.
    pub async fn all_pairs_length(
        gateway: &dyn ChainGateway,
        factory: Address,
    ) -> EngineResult<u64> {
        let raw = gateway
            .read_contract(factory, call_data("allPairsLength()", &[]))
            .await?;
        let value = u256_at(&raw, 0).ok_or_else(|| {
            EngineError::BadData(format!("short allPairsLength() response from {:?}", factory))
        })?;
        Ok(value.low_u64())
    }

    /// `allPairs(uint256)` on a V2-style factory.
    pub async fn all_pairs(
        gateway: &dyn ChainGateway,
        factory: Address,
        index: u64,
    ) -> EngineResult<Address> {
        let raw = gateway
            .read_contract(
                factory,
                call_data("allPairs(uint256)", &[word_from_u256(U256::from(index))]),
            )
            .await?;
        address_at(&raw, 0).ok_or_else(|| {
            EngineError::BadData(format!("short allPairs() response from {:?}", factory))
        })
    }

    /// `getPair(address,address)` on a V2-style factory; zero when absent.
    pub async fn get_pair(
        gateway: &dyn ChainGateway,
        factory: Address,
        token_a: Address,
        token_b: Address,
    ) -> EngineResult<Address> {
        let raw = gateway
            .read_contract(
                factory,
                call_data(
                    "getPair(address,address)",
                    &[word_from_address(token_a), word_from_address(token_b)],
                ),
            )
            .await?;
        address_at(&raw, 0).ok_or_else(|| {
            EngineError::BadData(format!("short getPair() response from {:?}", factory))
        })
    }

    /// `getPool(address,address,uint24)` on a V3-style factory.
    pub async fn get_pool(
        gateway: &dyn ChainGateway,
        factory: Address,
        token_a: Address,
        token_b: Address,
        fee: u32,
    ) -> EngineResult<Address> {
        let raw = gateway
            .read_contract(
                factory,
                call_data(
                    "getPool(address,address,uint24)",
                    &[
                        word_from_address(token_a),
                        word_from_address(token_b),
                        word_from_u256(U256::from(fee)),
                    ],
                ),
            )
            .await?;
        address_at(&raw, 0).ok_or_else(|| {
            EngineError::BadData(format!("short getPool() response from {:?}", factory))
        })
    }

    /// `stable()` on a Solidly-style pair; distinguishes stable from volatile
    /// pricing within one factory.
    pub async fn is_stable_pair(gateway: &dyn ChainGateway, pool: Address) -> EngineResult<bool> {
        let raw = gateway.read_contract(pool, call_data("stable()", &[])).await?;
        let value = u256_at(&raw, 0).ok_or_else(|| {
            EngineError::BadData(format!("short stable() response from {:?}", pool))
        })?;
        Ok(!value.is_zero())
    }

    pub async fn erc20_decimals(gateway: &dyn ChainGateway, token: Address) -> EngineResult<u8> {
        let raw = gateway
            .read_contract(token, call_data("decimals()", &[]))
            .await?;
        let value = u256_at(&raw, 0).ok_or_else(|| {
            EngineError::BadData(format!("short decimals() response from {:?}", token))
        })?;
        if value > U256::from(u8::MAX) {
            return Err(EngineError::BadData(format!(
                "decimals() out of range for {:?}",
                token
            )));
        }
        Ok(value.low_u64() as u8)
    }

    /// `symbol()`: decodes a dynamic string, with a bytes32 fallback used by
    /// a handful of legacy tokens.
    pub async fn erc20_symbol(gateway: &dyn ChainGateway, token: Address) -> EngineResult<String> {
        let raw = gateway.read_contract(token, call_data("symbol()", &[])).await?;
        if raw.len() == 32 {
            // bytes32 symbol
            let trimmed: Vec<u8> = raw.iter().copied().take_while(|b| *b != 0).collect();
            return String::from_utf8(trimmed)
                .map_err(|_| EngineError::BadData(format!("non-utf8 symbol for {:?}", token)));
        }
        if raw.len() >= 64 {
            let len = u256_at(&raw, 1)
                .map(|l| l.low_u64() as usize)
                .unwrap_or(0)
                .min(raw.len().saturating_sub(64));
            let bytes = raw
                .get(64..64 + len)
                .ok_or_else(|| EngineError::BadData(format!("short symbol() from {:?}", token)))?;
            return String::from_utf8(bytes.to_vec())
                .map_err(|_| EngineError::BadData(format!("non-utf8 symbol for {:?}", token)));
        }
        Err(EngineError::BadData(format!(
            "undecodable symbol() response from {:?}",
            token
        )))
    }
}
