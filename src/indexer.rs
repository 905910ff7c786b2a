//! # Pool Indexer
//!
//! Discovers pools from the configured factories and translates raw chain
//! logs into [`StateEvent`]s for the state manager.
//!
//! Two discovery paths, selected per protocol family:
//! - V2-style factories are enumerated by paging `allPairsLength` /
//!   `allPairs(i)`.
//! - V3-style factories are scanned for `PoolCreated` logs over chunked block
//!   ranges.
//!
//! Token metadata (symbol, decimals) is read once per token and kept in a
//! bounded LRU; unreadable metadata degrades to a placeholder with a warning.

use std::num::NonZeroUsize;
use std::sync::Arc;

use ethers::types::{Address, Filter, Log, H256, U256};
use ethers::utils::keccak256;
use futures::future::join_all;
use log::{debug, info, warn};
use lru::LruCache;
use once_cell::sync::Lazy;
use tokio::sync::Mutex;

use crate::errors::{EngineError, EngineResult};
use crate::gateway::{calls, ChainGateway};
use crate::multicall::{Call, Multicall};
use crate::pools::Pool;
use crate::settings::Settings;
use crate::state_manager::{PoolStateManager, StateEvent};
use crate::types::{Protocol, Token};
use crate::utils::create_block_chunks;

fn event_topic(signature: &str) -> H256 {
    H256::from(keccak256(signature.as_bytes()))
}

/// `PairCreated(address,address,address,uint256)`: V2-style factories.
pub static PAIR_CREATED: Lazy<H256> =
    Lazy::new(|| event_topic("PairCreated(address,address,address,uint256)"));
/// `PoolCreated(address,address,uint24,int24,address)`: V3-style factories.
pub static POOL_CREATED: Lazy<H256> =
    Lazy::new(|| event_topic("PoolCreated(address,address,uint24,int24,address)"));
/// `Sync(uint112,uint112)`: reserve refresh after every V2 mutation.
pub static SYNC_V2: Lazy<H256> = Lazy::new(|| event_topic("Sync(uint112,uint112)"));
/// `Swap(address,uint256,uint256,uint256,uint256,address)`: V2 swap.
pub static SWAP_V2: Lazy<H256> =
    Lazy::new(|| event_topic("Swap(address,uint256,uint256,uint256,uint256,address)"));
pub static MINT_V2: Lazy<H256> = Lazy::new(|| event_topic("Mint(address,uint256,uint256)"));
pub static BURN_V2: Lazy<H256> =
    Lazy::new(|| event_topic("Burn(address,uint256,uint256,address)"));
/// `Swap(address,address,int256,int256,uint160,uint128,int24)`: V3 swap,
/// carries the post-trade price and active liquidity.
pub static SWAP_V3: Lazy<H256> =
    Lazy::new(|| event_topic("Swap(address,address,int256,int256,uint160,uint128,int24)"));
pub static MINT_V3: Lazy<H256> =
    Lazy::new(|| event_topic("Mint(address,address,int24,int24,uint128,uint256,uint256)"));
pub static BURN_V3: Lazy<H256> =
    Lazy::new(|| event_topic("Burn(address,int24,int24,uint128,uint256,uint256)"));

/// All topic0 values the collector polls for.
pub fn watched_topics() -> Vec<H256> {
    vec![
        *PAIR_CREATED,
        *POOL_CREATED,
        *SYNC_V2,
        *SWAP_V2,
        *MINT_V2,
        *BURN_V2,
        *SWAP_V3,
        *MINT_V3,
        *BURN_V3,
    ]
}

fn u256_word(data: &[u8], word: usize) -> Option<U256> {
    let start = word * 32;
    data.get(start..start + 32).map(U256::from_big_endian)
}

fn address_word(data: &[u8], word: usize) -> Option<Address> {
    let start = word * 32;
    data.get(start + 12..start + 32).map(Address::from_slice)
}

fn topic_address(log: &Log, index: usize) -> Option<Address> {
    log.topics
        .get(index)
        .map(|topic| Address::from_slice(&topic.as_bytes()[12..]))
}

const TOKEN_CACHE_CAPACITY: usize = 4_096;
const DISCOVERY_MAX_ATTEMPTS: u32 = 3;

pub struct PoolIndexer {
    gateway: Arc<dyn ChainGateway>,
    manager: Arc<PoolStateManager>,
    settings: Arc<Settings>,
    factories: Vec<(Protocol, Address)>,
    token_cache: Mutex<LruCache<Address, Token>>,
    multicall: Option<Multicall>,
}

impl PoolIndexer {
    pub fn new(
        gateway: Arc<dyn ChainGateway>,
        manager: Arc<PoolStateManager>,
        settings: Arc<Settings>,
    ) -> Self {
        let mut factories = Vec::new();
        for protocol in [
            Protocol::HyperSwapV2,
            Protocol::HyperSwapV3,
            Protocol::KittenSwap,
            Protocol::Shadow,
            Protocol::SwapX,
        ] {
            if let Some(factory) = settings.factory_for(protocol) {
                factories.push((protocol, factory));
            }
        }
        let multicall = settings
            .multicall_address()
            .map(|address| Multicall::new(Arc::clone(&gateway), address, 100));
        Self {
            gateway,
            manager,
            settings,
            factories,
            token_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(TOKEN_CACHE_CAPACITY).expect("nonzero capacity"),
            )),
            multicall,
        }
    }

    pub fn factories(&self) -> &[(Protocol, Address)] {
        &self.factories
    }

    /// Full discovery across every configured factory. Returns the number of
    /// newly indexed pools. Per-factory failures are logged and skipped; a
    /// factory that cannot be scanned does not abort the others.
    pub async fn discover_all(&self) -> EngineResult<usize> {
        let mut discovered = 0usize;
        for (protocol, factory) in &self.factories {
            let result = if protocol.is_concentrated() {
                self.discover_v3_factory(*protocol, *factory).await
            } else {
                self.discover_v2_factory(*protocol, *factory).await
            };
            match result {
                Ok(count) => {
                    info!("🔍 {}: discovered {} pools", protocol, count);
                    discovered += count;
                }
                Err(e) => warn!("discovery failed for {} ({:?}): {}", protocol, factory, e),
            }
        }
        Ok(discovered)
    }

    /// Pages a V2-style factory through `allPairs`, creating one pool per
    /// pair with its current reserves.
    async fn discover_v2_factory(
        &self,
        protocol: Protocol,
        factory: Address,
    ) -> EngineResult<usize> {
        let total = calls::all_pairs_length(self.gateway.as_ref(), factory).await?;
        let limit = total.min(self.settings.indexer.max_pairs_per_factory);
        if limit < total {
            debug!(
                "{}: enumerating {} of {} pairs (capped)",
                protocol, limit, total
            );
        }

        let pairs = self.enumerate_pairs(protocol, factory, limit).await;
        let fresh: Vec<Address> = pairs
            .into_iter()
            .filter(|pair| self.manager.pool_by_address(*pair).is_none())
            .collect();

        let mut created = 0usize;
        if let Some(multicall) = &self.multicall {
            for pool in self.fetch_v2_pools_batched(protocol, &fresh, multicall).await {
                if self.apply_created(pool) {
                    created += 1;
                }
            }
        } else {
            for pair in fresh {
                match self.build_v2_pool(protocol, pair).await {
                    Ok(pool) => {
                        if self.apply_created(pool) {
                            created += 1;
                        }
                    }
                    Err(e) => warn!("{}: skipping pair {:?}: {}", protocol, pair, e),
                }
            }
        }
        Ok(created)
    }

    /// `allPairs(i)` for `0..limit`, batched through multicall when available.
    async fn enumerate_pairs(
        &self,
        protocol: Protocol,
        factory: Address,
        limit: u64,
    ) -> Vec<Address> {
        if let Some(multicall) = &self.multicall {
            let batch: Vec<Call> = (0..limit)
                .map(|index| Call {
                    target: factory,
                    call_data: calls::encode_u256_arg("allPairs(uint256)", U256::from(index)),
                })
                .collect();
            match multicall.run(batch).await {
                Ok(results) => {
                    return results
                        .iter()
                        .filter_map(|raw| address_word(raw, 0))
                        .collect()
                }
                Err(e) => warn!("{}: batched allPairs failed, falling back: {}", protocol, e),
            }
        }
        let mut pairs = Vec::with_capacity(limit as usize);
        for index in 0..limit {
            match calls::all_pairs(self.gateway.as_ref(), factory, index).await {
                Ok(pair) => pairs.push(pair),
                Err(e) => warn!("{}: allPairs({}) failed: {}", protocol, index, e),
            }
        }
        pairs
    }

    /// Reads token0/token1/getReserves (plus the Solidly stable flag) for a
    /// set of pairs in one multicall round trip per field.
    async fn fetch_v2_pools_batched(
        &self,
        protocol: Protocol,
        pairs: &[Address],
        multicall: &Multicall,
    ) -> Vec<Pool> {
        if pairs.is_empty() {
            return Vec::new();
        }
        let check_stable = protocol == Protocol::KittenSwap;
        let mut batch = Vec::with_capacity(pairs.len() * 4);
        for pair in pairs {
            batch.push(Call {
                target: *pair,
                call_data: calls::encode_no_args("token0()"),
            });
            batch.push(Call {
                target: *pair,
                call_data: calls::encode_no_args("token1()"),
            });
            batch.push(Call {
                target: *pair,
                call_data: calls::encode_no_args("getReserves()"),
            });
            if check_stable {
                batch.push(Call {
                    target: *pair,
                    call_data: calls::encode_no_args("stable()"),
                });
            }
        }
        let results = match multicall.run(batch).await {
            Ok(results) => results,
            Err(e) => {
                warn!("{}: batched pair state fetch failed: {}", protocol, e);
                return Vec::new();
            }
        };

        let stride = if check_stable { 4 } else { 3 };
        let mut pools = Vec::with_capacity(pairs.len());
        for (i, pair) in pairs.iter().enumerate() {
            let window = &results[i * stride..(i + 1) * stride];
            let (Some(token0), Some(token1)) =
                (address_word(&window[0], 0), address_word(&window[1], 0))
            else {
                debug!("skipping pair {:?}: token reads reverted", pair);
                continue;
            };
            let (Some(reserve0), Some(reserve1)) =
                (u256_word(&window[2], 0), u256_word(&window[2], 1))
            else {
                debug!("skipping pair {:?}: getReserves reverted", pair);
                continue;
            };
            let protocol = if check_stable {
                match u256_word(&window[3], 0) {
                    Some(flag) if !flag.is_zero() => Protocol::KittenSwapStable,
                    _ => Protocol::KittenSwap,
                }
            } else {
                protocol
            };
            match Pool::new(*pair, protocol, token0, token1) {
                Ok(pool) => pools.push(pool.with_reserves(reserve0, reserve1)),
                Err(e) => warn!("skipping malformed pair {:?}: {}", pair, e),
            }
        }
        pools
    }

    async fn build_v2_pool(&self, protocol: Protocol, pair: Address) -> EngineResult<Pool> {
        let token0 = calls::token0(self.gateway.as_ref(), pair).await?;
        let token1 = calls::token1(self.gateway.as_ref(), pair).await?;
        let (reserve0, reserve1) = calls::get_reserves(self.gateway.as_ref(), pair).await?;

        // Solidly-style factories mix volatile and stable pairs; the stable
        // flag selects the pricing rule.
        let protocol = if protocol == Protocol::KittenSwap {
            match calls::is_stable_pair(self.gateway.as_ref(), pair).await {
                Ok(true) => Protocol::KittenSwapStable,
                _ => Protocol::KittenSwap,
            }
        } else {
            protocol
        };

        Ok(Pool::new(pair, protocol, token0, token1)?.with_reserves(reserve0, reserve1))
    }

    /// Scans a V3-style factory for `PoolCreated` logs over chunked ranges,
    /// then seeds each pool with its current slot0/liquidity state.
    async fn discover_v3_factory(
        &self,
        protocol: Protocol,
        factory: Address,
    ) -> EngineResult<usize> {
        let head = self.gateway.get_block_number().await?;
        let from = head.saturating_sub(self.settings.indexer.lookback_blocks);
        let chunks = create_block_chunks(from, head, self.settings.indexer.chunk_size);

        let mut created = 0usize;
        for (chunk_from, chunk_to) in chunks {
            let filter = Filter::new()
                .address(factory)
                .from_block(chunk_from)
                .to_block(chunk_to)
                .topic0(*POOL_CREATED);

            let mut logs = None;
            for attempt in 1..=DISCOVERY_MAX_ATTEMPTS {
                match self.gateway.get_logs(&filter).await {
                    Ok(found) => {
                        logs = Some(found);
                        break;
                    }
                    Err(e) => warn!(
                        "{}: PoolCreated scan [{}, {}] attempt {}/{} failed: {}",
                        protocol, chunk_from, chunk_to, attempt, DISCOVERY_MAX_ATTEMPTS, e
                    ),
                }
            }
            let Some(logs) = logs else { continue };

            let fresh: Vec<Pool> = logs
                .iter()
                .filter_map(|log| self.decode_v3_creation(protocol, factory, log))
                .filter(|pool| self.manager.pool_by_address(pool.address).is_none())
                .collect();

            // Seed slot0/liquidity for the whole chunk; a pool whose state
            // read fails is still indexed, just stateless.
            let seeded = if let Some(multicall) = &self.multicall {
                self.seed_v3_states_batched(fresh, multicall).await
            } else {
                join_all(fresh.into_iter().map(|pool| async move {
                    match self.seed_v3_state(pool.clone()).await {
                        Ok(seeded) => seeded,
                        Err(e) => {
                            debug!("state seed failed for {:?}: {}", pool.address, e);
                            pool
                        }
                    }
                }))
                .await
            };

            for pool in seeded {
                if self.apply_created(pool) {
                    created += 1;
                }
            }
        }
        Ok(created)
    }

    async fn seed_v3_state(&self, mut pool: Pool) -> EngineResult<Pool> {
        let sqrt_price = calls::slot0_sqrt_price(self.gateway.as_ref(), pool.address).await?;
        let liquidity = calls::liquidity(self.gateway.as_ref(), pool.address).await?;
        pool.sqrt_price_x96 = Some(sqrt_price);
        pool.liquidity = Some(liquidity);
        Ok(pool)
    }

    /// slot0 + liquidity for a whole batch of pools in one round trip.
    async fn seed_v3_states_batched(&self, pools: Vec<Pool>, multicall: &Multicall) -> Vec<Pool> {
        if pools.is_empty() {
            return pools;
        }
        let mut batch = Vec::with_capacity(pools.len() * 2);
        for pool in &pools {
            batch.push(Call {
                target: pool.address,
                call_data: calls::encode_no_args("slot0()"),
            });
            batch.push(Call {
                target: pool.address,
                call_data: calls::encode_no_args("liquidity()"),
            });
        }
        let results = match multicall.run(batch).await {
            Ok(results) => results,
            Err(e) => {
                warn!("batched v3 state seed failed: {}", e);
                return pools;
            }
        };
        pools
            .into_iter()
            .enumerate()
            .map(|(i, mut pool)| {
                if let Some(sqrt_price) = u256_word(&results[i * 2], 0) {
                    pool.sqrt_price_x96 = Some(sqrt_price);
                }
                if let Some(liquidity) = u256_word(&results[i * 2 + 1], 0) {
                    pool.liquidity = Some(liquidity.low_u128());
                }
                pool
            })
            .collect()
    }

    fn apply_created(&self, pool: Pool) -> bool {
        match self.manager.apply_event(StateEvent::PoolCreated(pool)) {
            Ok(_) => true,
            Err(EngineError::Invariant(_)) => false,
            Err(e) => {
                warn!("pool creation rejected: {}", e);
                false
            }
        }
    }

    /// Refetches a pool's on-chain state and applies it as a `PoolUpdated`.
    /// Used when staleness is suspected (e.g. after V2 mint/burn logs that
    /// carry no absolute state).
    pub async fn refresh_pool_state(&self, address: Address) -> EngineResult<u64> {
        let pool = self
            .manager
            .pool_by_address(address)
            .ok_or(EngineError::UnknownPool(address))?;
        let event = if pool.protocol.is_concentrated() {
            let sqrt_price = calls::slot0_sqrt_price(self.gateway.as_ref(), address).await?;
            let liquidity = calls::liquidity(self.gateway.as_ref(), address).await?;
            StateEvent::PoolUpdated {
                pool: address,
                reserves: None,
                sqrt_price_x96: Some(sqrt_price),
                liquidity: Some(liquidity),
            }
        } else {
            let (reserve0, reserve1) = calls::get_reserves(self.gateway.as_ref(), address).await?;
            StateEvent::PoolUpdated {
                pool: address,
                reserves: Some([reserve0, reserve1]),
                sqrt_price_x96: None,
                liquidity: None,
            }
        };
        self.manager.apply_event(event)
    }

    /// Token metadata with a bounded cache; falls back to a placeholder when
    /// the token contract misbehaves.
    pub async fn token_metadata(&self, address: Address) -> Token {
        if let Some(token) = self.token_cache.lock().await.get(&address) {
            return token.clone();
        }
        let decimals = calls::erc20_decimals(self.gateway.as_ref(), address).await;
        let symbol = calls::erc20_symbol(self.gateway.as_ref(), address).await;
        let token = match (decimals, symbol) {
            (Ok(decimals), Ok(symbol)) => Token {
                address,
                symbol,
                decimals,
            },
            (decimals, symbol) => {
                warn!(
                    "unreadable token metadata for {:?} (decimals: {}, symbol: {})",
                    address,
                    decimals.is_ok(),
                    symbol.is_ok()
                );
                let mut token = Token::unknown(address);
                if let Ok(d) = decimals {
                    token.decimals = d;
                }
                token
            }
        };
        self.token_cache.lock().await.put(address, token.clone());
        token
    }

    /// Translates a raw chain log into a state event.
    ///
    /// Creation logs are accepted only from configured factories. Mutation
    /// logs are translated unconditionally; the manager drops the ones that
    /// reference pools it does not know.
    pub fn decode_log(&self, log: &Log) -> Option<StateEvent> {
        let topic0 = log.topics.first()?;

        if *topic0 == *PAIR_CREATED {
            let (protocol, _) = self
                .factories
                .iter()
                .find(|(_, factory)| *factory == log.address)?;
            let token0 = topic_address(log, 1)?;
            let token1 = topic_address(log, 2)?;
            let pair = address_word(&log.data, 0)?;
            let pool = Pool::new(pair, *protocol, token0, token1).ok()?;
            return Some(StateEvent::PoolCreated(pool));
        }

        if *topic0 == *POOL_CREATED {
            let (protocol, factory) = self
                .factories
                .iter()
                .find(|(_, factory)| *factory == log.address)?;
            return self
                .decode_v3_creation(*protocol, *factory, log)
                .map(StateEvent::PoolCreated);
        }

        if *topic0 == *SYNC_V2 {
            let reserve0 = u256_word(&log.data, 0)?;
            let reserve1 = u256_word(&log.data, 1)?;
            return Some(StateEvent::PoolUpdated {
                pool: log.address,
                reserves: Some([reserve0, reserve1]),
                sqrt_price_x96: None,
                liquidity: None,
            });
        }

        if *topic0 == *SWAP_V2 {
            // Reserves arrive in the paired Sync log; this event only marks
            // the pool as touched.
            return Some(StateEvent::Swap {
                pool: log.address,
                reserves: None,
                sqrt_price_x96: None,
                liquidity: None,
            });
        }

        if *topic0 == *SWAP_V3 {
            let sqrt_price = u256_word(&log.data, 2)?;
            let liquidity = u256_word(&log.data, 3)?.low_u128();
            return Some(StateEvent::Swap {
                pool: log.address,
                reserves: None,
                sqrt_price_x96: Some(sqrt_price),
                liquidity: Some(liquidity),
            });
        }

        if *topic0 == *MINT_V2 || *topic0 == *MINT_V3 {
            return Some(StateEvent::LiquidityAdded {
                pool: log.address,
                reserves: None,
                liquidity: None,
            });
        }

        if *topic0 == *BURN_V2 || *topic0 == *BURN_V3 {
            return Some(StateEvent::LiquidityRemoved {
                pool: log.address,
                reserves: None,
                liquidity: None,
            });
        }

        None
    }

    fn decode_v3_creation(&self, protocol: Protocol, factory: Address, log: &Log) -> Option<Pool> {
        if log.address != factory {
            return None;
        }
        let token0 = topic_address(log, 1)?;
        let token1 = topic_address(log, 2)?;
        // fee is an indexed uint24, in hundredths of a bip (3000 = 30 bps)
        let fee_raw = log.topics.get(3).map(|t| U256::from_big_endian(t.as_bytes()))?;
        let fee_bps = (fee_raw.low_u64() / 100) as u32;
        // data: [tickSpacing, pool]
        let pool_address = address_word(&log.data, 1)?;
        Pool::new(pool_address, protocol, token0, token1)
            .ok()
            .map(|pool| pool.with_fee_bps(fee_bps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Bytes;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    fn word(value: U256) -> [u8; 32] {
        let mut out = [0u8; 32];
        value.to_big_endian(&mut out);
        out
    }

    fn address_topic(address: Address) -> H256 {
        let mut out = [0u8; 32];
        out[12..].copy_from_slice(address.as_bytes());
        H256::from(out)
    }

    fn indexer_with_factory(protocol_factory: Address) -> PoolIndexer {
        let mut settings = Settings {
            chain_id: 999,
            multicall_address: None,
            rpc: crate::settings::Rpc {
                url: "http://localhost:8545".into(),
                ws_url: None,
                timeout_seconds: 5,
                max_retries: 1,
                backoff_base_ms: 10,
            },
            wallet: Default::default(),
            factories: Default::default(),
            engine: Default::default(),
            collector: Default::default(),
            optimizer: Default::default(),
            indexer: Default::default(),
            telegram: Default::default(),
        };
        settings.factories.hyperswap_v2 = Some(format!("{:#x}", protocol_factory));
        let manager = Arc::new(PoolStateManager::new(999, std::env::temp_dir()));
        let gateway: Arc<dyn ChainGateway> = Arc::new(NullGateway);
        PoolIndexer::new(gateway, manager, Arc::new(settings))
    }

    struct NullGateway;

    #[async_trait::async_trait]
    impl ChainGateway for NullGateway {
        async fn read_contract(&self, _: Address, _: Bytes) -> EngineResult<Bytes> {
            Err(EngineError::Rpc("null gateway".into()))
        }
        async fn get_block_number(&self) -> EngineResult<u64> {
            Ok(0)
        }
        async fn get_block(&self, _: u64) -> EngineResult<Option<crate::types::BlockEvent>> {
            Ok(None)
        }
        async fn get_transaction(
            &self,
            _: H256,
        ) -> EngineResult<Option<ethers::types::Transaction>> {
            Ok(None)
        }
        async fn get_transaction_receipt(
            &self,
            _: H256,
        ) -> EngineResult<Option<ethers::types::TransactionReceipt>> {
            Ok(None)
        }
        async fn get_logs(&self, _: &Filter) -> EngineResult<Vec<Log>> {
            Ok(Vec::new())
        }
        async fn get_gas_price(&self) -> EngineResult<U256> {
            Ok(U256::zero())
        }
        async fn estimate_gas(
            &self,
            _: &ethers::types::transaction::eip2718::TypedTransaction,
        ) -> EngineResult<u64> {
            Ok(21_000)
        }
        async fn send_transaction(
            &self,
            _: ethers::types::transaction::eip2718::TypedTransaction,
        ) -> EngineResult<H256> {
            Err(EngineError::Execution("null gateway".into()))
        }
        async fn wait_for_receipt(
            &self,
            _: H256,
        ) -> EngineResult<Option<ethers::types::TransactionReceipt>> {
            Ok(None)
        }
        async fn watch_blocks(
            &self,
        ) -> EngineResult<(
            tokio::sync::mpsc::Receiver<crate::types::BlockEvent>,
            crate::gateway::WatchHandle,
        )> {
            Err(EngineError::Rpc("null gateway".into()))
        }
        async fn watch_pending_txs(
            &self,
        ) -> EngineResult<(tokio::sync::mpsc::Receiver<H256>, crate::gateway::WatchHandle)> {
            Err(EngineError::Rpc("null gateway".into()))
        }
    }

    #[test]
    fn decodes_sync_into_pool_updated() {
        let indexer = indexer_with_factory(addr(99));
        let mut data = Vec::new();
        data.extend_from_slice(&word(U256::from(1_000u64)));
        data.extend_from_slice(&word(U256::from(2_000u64)));
        let log = Log {
            address: addr(5),
            topics: vec![*SYNC_V2],
            data: Bytes::from(data),
            ..Default::default()
        };
        match indexer.decode_log(&log) {
            Some(StateEvent::PoolUpdated { pool, reserves, .. }) => {
                assert_eq!(pool, addr(5));
                assert_eq!(
                    reserves,
                    Some([U256::from(1_000u64), U256::from(2_000u64)])
                );
            }
            other => panic!("unexpected decode result: {:?}", other),
        }
    }

    #[test]
    fn decodes_pair_created_only_from_known_factory() {
        let factory = addr(99);
        let indexer = indexer_with_factory(factory);

        let mut data = Vec::new();
        data.extend_from_slice(&{
            let mut w = [0u8; 32];
            w[12..].copy_from_slice(addr(7).as_bytes());
            w
        });
        data.extend_from_slice(&word(U256::one()));

        let mut log = Log {
            address: factory,
            topics: vec![*PAIR_CREATED, address_topic(addr(1)), address_topic(addr(2))],
            data: Bytes::from(data),
            ..Default::default()
        };
        match indexer.decode_log(&log) {
            Some(StateEvent::PoolCreated(pool)) => {
                assert_eq!(pool.address, addr(7));
                assert_eq!(pool.tokens, [addr(1), addr(2)]);
                assert_eq!(pool.protocol, Protocol::HyperSwapV2);
            }
            other => panic!("unexpected decode result: {:?}", other),
        }

        // same log from an unknown factory is ignored
        log.address = addr(123);
        assert!(indexer.decode_log(&log).is_none());
    }

    #[test]
    fn decodes_v3_swap_state() {
        let indexer = indexer_with_factory(addr(99));
        let sqrt_price = U256::from(2u64).pow(U256::from(96u64));
        let mut data = Vec::new();
        data.extend_from_slice(&word(U256::from(10u64))); // amount0
        data.extend_from_slice(&word(U256::from(20u64))); // amount1
        data.extend_from_slice(&word(sqrt_price)); // sqrtPriceX96
        data.extend_from_slice(&word(U256::from(777u64))); // liquidity
        data.extend_from_slice(&word(U256::zero())); // tick
        let log = Log {
            address: addr(6),
            topics: vec![*SWAP_V3, address_topic(addr(1)), address_topic(addr(2))],
            data: Bytes::from(data),
            ..Default::default()
        };
        match indexer.decode_log(&log) {
            Some(StateEvent::Swap {
                pool,
                sqrt_price_x96,
                liquidity,
                ..
            }) => {
                assert_eq!(pool, addr(6));
                assert_eq!(sqrt_price_x96, Some(sqrt_price));
                assert_eq!(liquidity, Some(777));
            }
            other => panic!("unexpected decode result: {:?}", other),
        }
    }

    #[test]
    fn watched_topics_cover_all_families() {
        let topics = watched_topics();
        assert_eq!(topics.len(), 9);
        assert!(topics.contains(&*SYNC_V2));
        assert!(topics.contains(&*POOL_CREATED));
    }
}
