//! # Pool State Manager
//!
//! Authoritative in-memory store of pool state with four indexes (by address,
//! by token, by token pair, by protocol) and generation-stamped mutations.
//!
//! ## Generation discipline
//!
//! Every mutation increments the manager's monotonic generation counter and
//! stamps the mutated pool with the new value. Readers capture a generation
//! and later compare it against the pool's current one to detect staleness;
//! the simulator and opportunity cache build their invalidation on this.
//!
//! ## Thread safety
//!
//! Indexes live in `DashMap`s for lock-free concurrent reads; mutations are
//! serialized per pool by the map's shard locks. Lookups return snapshots
//! (clones), never references into the maps.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use dashmap::DashMap;
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::{EngineError, EngineResult};
use crate::metrics;
use crate::pools::Pool;
use crate::types::{pair_key, Protocol};
use crate::utils::now_ms;

/// Version tag of the persisted cache file. Bump on schema changes; a
/// mismatch makes the loader ignore the file and fall back to rediscovery.
const CACHE_SCHEMA_VERSION: u32 = 1;

/// A state mutation consumed by [`PoolStateManager::apply_event`].
///
/// Update-style events carry the fields they refresh; absent fields leave the
/// pool's previous value in place.
#[derive(Debug, Clone)]
pub enum StateEvent {
    PoolCreated(Pool),
    PoolUpdated {
        pool: Address,
        reserves: Option<[U256; 2]>,
        sqrt_price_x96: Option<U256>,
        liquidity: Option<u128>,
    },
    Swap {
        pool: Address,
        reserves: Option<[U256; 2]>,
        sqrt_price_x96: Option<U256>,
        liquidity: Option<u128>,
    },
    LiquidityAdded {
        pool: Address,
        reserves: Option<[U256; 2]>,
        liquidity: Option<u128>,
    },
    LiquidityRemoved {
        pool: Address,
        reserves: Option<[U256; 2]>,
        liquidity: Option<u128>,
    },
}

impl StateEvent {
    pub fn pool_address(&self) -> Address {
        match self {
            StateEvent::PoolCreated(pool) => pool.address,
            StateEvent::PoolUpdated { pool, .. }
            | StateEvent::Swap { pool, .. }
            | StateEvent::LiquidityAdded { pool, .. }
            | StateEvent::LiquidityRemoved { pool, .. } => *pool,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StateEvent::PoolCreated(_) => "created",
            StateEvent::PoolUpdated { .. } => "updated",
            StateEvent::Swap { .. } => "swap",
            StateEvent::LiquidityAdded { .. } => "liquidity_added",
            StateEvent::LiquidityRemoved { .. } => "liquidity_removed",
        }
    }
}

/// Subscription handle returned by [`PoolStateManager::subscribe`]. Pass it
/// back to `unsubscribe` to stop receiving events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

type Subscriber = Box<dyn Fn(&StateEvent) + Send + Sync>;

/// Aggregate counters exposed for periodic stats logging.
#[derive(Debug, Clone, Default)]
pub struct ManagerStats {
    pub pools: usize,
    pub tokens: usize,
    pub pairs: usize,
    pub generation: u64,
    pub lookup_hits: u64,
    pub lookup_misses: u64,
    pub events_applied: u64,
    pub events_dropped: u64,
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    chain_id: u64,
    saved_at_ms: u64,
    /// Human-readable save time; informational only.
    saved_at: chrono::DateTime<chrono::Utc>,
    pools: Vec<Pool>,
}

pub struct PoolStateManager {
    chain_id: u64,
    pools: DashMap<Address, Pool>,
    by_token: DashMap<Address, Vec<Address>>,
    by_pair: DashMap<String, Vec<Address>>,
    by_protocol: DashMap<Protocol, Vec<Address>>,
    generation: AtomicU64,
    lookup_hits: AtomicU64,
    lookup_misses: AtomicU64,
    events_applied: AtomicU64,
    events_dropped: AtomicU64,
    next_subscriber: AtomicU64,
    subscribers: Mutex<Vec<(u64, Subscriber)>>,
    cache_dir: PathBuf,
}

impl PoolStateManager {
    pub fn new(chain_id: u64, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            chain_id,
            pools: DashMap::new(),
            by_token: DashMap::new(),
            by_pair: DashMap::new(),
            by_protocol: DashMap::new(),
            generation: AtomicU64::new(0),
            lookup_hits: AtomicU64::new(0),
            lookup_misses: AtomicU64::new(0),
            events_applied: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            next_subscriber: AtomicU64::new(1),
            subscribers: Mutex::new(Vec::new()),
            cache_dir: cache_dir.into(),
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Current value of the process-wide generation counter.
    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Merges a state mutation, stamps the pool with a fresh generation and
    /// notifies subscribers. Swap/liquidity events for pools the manager has
    /// never seen fail with [`EngineError::UnknownPool`]; callers drop those
    /// with a warning and the pipeline continues.
    pub fn apply_event(&self, event: StateEvent) -> EngineResult<u64> {
        let address = event.pool_address();
        let new_generation = match &event {
            StateEvent::PoolCreated(pool) => {
                if self.pools.contains_key(&address) {
                    self.events_dropped.fetch_add(1, Ordering::Relaxed);
                    return Err(EngineError::Invariant(format!(
                        "duplicate pool insertion for {:?}",
                        address
                    )));
                }
                let generation = self.bump_generation();
                let mut created = pool.clone();
                created.generation = generation;
                created.last_updated = now_ms();
                self.index_pool(&created);
                self.pools.insert(address, created);
                metrics::record_pools_tracked(self.pools.len());
                generation
            }
            StateEvent::PoolUpdated {
                reserves,
                sqrt_price_x96,
                liquidity,
                ..
            }
            | StateEvent::Swap {
                reserves,
                sqrt_price_x96,
                liquidity,
                ..
            } => self.mutate(address, *reserves, *sqrt_price_x96, *liquidity)?,
            StateEvent::LiquidityAdded {
                reserves,
                liquidity,
                ..
            }
            | StateEvent::LiquidityRemoved {
                reserves,
                liquidity,
                ..
            } => self.mutate(address, *reserves, None, *liquidity)?,
        };

        self.events_applied.fetch_add(1, Ordering::Relaxed);
        metrics::record_state_event(event.kind());
        self.notify(&event);
        Ok(new_generation)
    }

    fn mutate(
        &self,
        address: Address,
        reserves: Option<[U256; 2]>,
        sqrt_price_x96: Option<U256>,
        liquidity: Option<u128>,
    ) -> EngineResult<u64> {
        let mut entry = self.pools.get_mut(&address).ok_or_else(|| {
            self.events_dropped.fetch_add(1, Ordering::Relaxed);
            metrics::record_dropped_event();
            warn!("dropping state event for unknown pool {:?}", address);
            EngineError::UnknownPool(address)
        })?;
        let generation = self.bump_generation();
        let pool = entry.value_mut();
        if let Some(r) = reserves {
            pool.reserves = Some(r);
        }
        if let Some(sp) = sqrt_price_x96 {
            pool.sqrt_price_x96 = Some(sp);
        }
        if let Some(l) = liquidity {
            pool.liquidity = Some(l);
        }
        pool.generation = generation;
        pool.last_updated = now_ms();
        Ok(generation)
    }

    fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn index_pool(&self, pool: &Pool) {
        for token in pool.tokens {
            self.by_token.entry(token).or_default().push(pool.address);
        }
        self.by_pair
            .entry(pair_key(pool.tokens[0], pool.tokens[1]))
            .or_default()
            .push(pool.address);
        self.by_protocol
            .entry(pool.protocol)
            .or_default()
            .push(pool.address);
    }

    fn notify(&self, event: &StateEvent) {
        let subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (_, callback) in subscribers.iter() {
            callback(event);
        }
    }

    /// O(1) snapshot lookup by pool address.
    pub fn pool_by_address(&self, address: Address) -> Option<Pool> {
        let found = self.pools.get(&address).map(|p| p.clone());
        self.count_lookup(found.is_some());
        found
    }

    /// All pools holding `token` on either side.
    pub fn pools_by_token(&self, token: Address) -> Vec<Pool> {
        let pools = self
            .by_token
            .get(&token)
            .map(|addresses| self.collect(addresses.value()))
            .unwrap_or_default();
        self.count_lookup(!pools.is_empty());
        pools
    }

    /// All pools over the unordered pair `(a, b)`.
    pub fn pools_by_pair(&self, a: Address, b: Address) -> Vec<Pool> {
        let pools = self
            .by_pair
            .get(&pair_key(a, b))
            .map(|addresses| self.collect(addresses.value()))
            .unwrap_or_default();
        self.count_lookup(!pools.is_empty());
        pools
    }

    pub fn pools_by_protocol(&self, protocol: Protocol) -> Vec<Pool> {
        let pools = self
            .by_protocol
            .get(&protocol)
            .map(|addresses| self.collect(addresses.value()))
            .unwrap_or_default();
        self.count_lookup(!pools.is_empty());
        pools
    }

    fn collect(&self, addresses: &[Address]) -> Vec<Pool> {
        addresses
            .iter()
            .filter_map(|addr| self.pools.get(addr).map(|p| p.clone()))
            .collect()
    }

    fn count_lookup(&self, hit: bool) {
        if hit {
            self.lookup_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.lookup_misses.fetch_add(1, Ordering::Relaxed);
        }
        metrics::record_pool_lookup(hit);
    }

    /// Stable snapshot of every tracked pool. The returned vector is detached
    /// from the live maps, so iteration is restartable and unaffected by
    /// concurrent mutations.
    pub fn snapshot(&self) -> Vec<Pool> {
        self.pools.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Admin/test helper; pools are never deleted in normal operation.
    pub fn remove_pool(&self, address: Address) -> Option<Pool> {
        let (_, pool) = self.pools.remove(&address)?;
        for token in pool.tokens {
            if let Some(mut list) = self.by_token.get_mut(&token) {
                list.retain(|a| *a != address);
            }
        }
        if let Some(mut list) = self.by_pair.get_mut(&pair_key(pool.tokens[0], pool.tokens[1])) {
            list.retain(|a| *a != address);
        }
        if let Some(mut list) = self.by_protocol.get_mut(&pool.protocol) {
            list.retain(|a| *a != address);
        }
        metrics::record_pools_tracked(self.pools.len());
        Some(pool)
    }

    /// Registers a state-event callback; returns a handle for `unsubscribe`.
    pub fn subscribe(&self, callback: impl Fn(&StateEvent) + Send + Sync + 'static) -> SubscriptionId {
        let id = self.next_subscriber.fetch_add(1, Ordering::SeqCst);
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id, Box::new(callback)));
        SubscriptionId(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|(sub_id, _)| *sub_id != id.0);
    }

    fn cache_path(&self, chain_id: u64) -> PathBuf {
        self.cache_dir.join(format!("pools-{}.json", chain_id))
    }

    /// Serializes the pool set to `pools-<chainId>.json` under the cache dir.
    /// Big-integer fields are written as base-10 strings.
    pub fn save_to_cache(&self, chain_id: u64) -> EngineResult<usize> {
        let pools = self.snapshot();
        let file = CacheFile {
            version: CACHE_SCHEMA_VERSION,
            chain_id,
            saved_at_ms: now_ms(),
            saved_at: chrono::Utc::now(),
            pools,
        };
        fs::create_dir_all(&self.cache_dir)?;
        let path = self.cache_path(chain_id);
        let json = serde_json::to_string_pretty(&file)?;
        fs::write(&path, json)?;
        debug!("saved {} pools to {}", file.pools.len(), path.display());
        Ok(file.pools.len())
    }

    /// Loads the persisted pool set and rebuilds all indexes from scratch.
    /// A missing, mismatched or unparseable file is ignored (pools will be
    /// re-discovered) and load returns 0.
    pub fn load_from_cache(&self, chain_id: u64) -> EngineResult<usize> {
        let path = self.cache_path(chain_id);
        if !Path::new(&path).exists() {
            return Ok(0);
        }
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("unreadable pool cache {}: {}", path.display(), e);
                return Ok(0);
            }
        };
        let file: CacheFile = match serde_json::from_str(&raw) {
            Ok(file) => file,
            Err(e) => {
                warn!("ignoring malformed pool cache {}: {}", path.display(), e);
                return Ok(0);
            }
        };
        if file.version != CACHE_SCHEMA_VERSION || file.chain_id != chain_id {
            warn!(
                "ignoring pool cache {}: version {} chain {} (want version {} chain {})",
                path.display(),
                file.version,
                file.chain_id,
                CACHE_SCHEMA_VERSION,
                chain_id
            );
            return Ok(0);
        }

        self.pools.clear();
        self.by_token.clear();
        self.by_pair.clear();
        self.by_protocol.clear();

        let count = file.pools.len();
        let mut max_generation = self.current_generation();
        for pool in file.pools {
            max_generation = max_generation.max(pool.generation);
            self.index_pool(&pool);
            self.pools.insert(pool.address, pool);
        }
        // Resume the counter past every persisted generation so stamps stay
        // strictly increasing across restarts.
        self.generation.fetch_max(max_generation, Ordering::SeqCst);
        metrics::record_pools_tracked(self.pools.len());
        info!("📦 loaded {} pools from {}", count, path.display());
        Ok(count)
    }

    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            pools: self.pools.len(),
            tokens: self.by_token.len(),
            pairs: self.by_pair.len(),
            generation: self.current_generation(),
            lookup_hits: self.lookup_hits.load(Ordering::Relaxed),
            lookup_misses: self.lookup_misses.load(Ordering::Relaxed),
            events_applied: self.events_applied.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }
}
