//! # Opportunity Cache
//!
//! Bounded, profit-ordered queue of arbitrage candidates keyed by
//! `(start_token, seed_pool)` with TTL expiry and generation-based
//! invalidation.
//!
//! Two layers share one mutex: a max-heap ordered by expected profit and a
//! keyed map holding the live entry per key. Re-inserting a key overwrites
//! the map entry and leaves the superseded heap item in place; `pop_best`
//! recognizes it by its stale cache generation and skips it. An entry is also
//! skipped when its TTL passed or when any pool referenced by its path has
//! advanced past the generation captured at creation.
//!
//! All operations are O(log n) under a single mutex.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::sync::Mutex;

use ethers::types::{Address, I256};

use crate::finder::ArbitrageOpportunity;
use crate::metrics;
use crate::state_manager::PoolStateManager;
use crate::types::OpportunitySource;
use crate::utils::now_ms;

/// Cache key: where the cycle starts and the pool that seeds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub start_token: Address,
    pub seed_pool: Address,
}

impl CacheKey {
    pub fn for_opportunity(opportunity: &ArbitrageOpportunity) -> Self {
        Self {
            start_token: opportunity.start_token,
            seed_pool: opportunity.path.seed_pool().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    opportunity: ArbitrageOpportunity,
    /// Cache-internal insertion sequence; a heap item whose generation does
    /// not match the live entry has been superseded.
    generation: u64,
    expires_at_ms: u64,
    #[allow(dead_code)]
    source: OpportunitySource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeapItem {
    expected_profit: I256,
    generation: u64,
    key: CacheKey,
    expires_at_ms: u64,
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // max-heap on profit; ties go to the younger (higher) generation
        self.expected_profit
            .cmp(&other.expected_profit)
            .then(self.generation.cmp(&other.generation))
    }
}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

struct Inner {
    heap: BinaryHeap<HeapItem>,
    map: HashMap<CacheKey, CacheEntry>,
    next_generation: u64,
}

pub struct OpportunityCache {
    inner: Mutex<Inner>,
    manager: Arc<PoolStateManager>,
    ttl_ms: u64,
}

impl OpportunityCache {
    pub fn new(manager: Arc<PoolStateManager>, ttl_ms: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                map: HashMap::new(),
                next_generation: 0,
            }),
            manager,
            ttl_ms,
        }
    }

    /// Inserts (or overwrites) the candidate under its key. The previous heap
    /// item, if any, stays behind as a tombstone skipped on pop.
    pub fn insert(&self, opportunity: ArbitrageOpportunity, source: OpportunitySource) {
        let key = CacheKey::for_opportunity(&opportunity);
        let expires_at_ms = now_ms() + self.ttl_ms;
        let expected_profit = opportunity.expected_profit;

        let mut inner = self.lock();
        inner.next_generation += 1;
        let generation = inner.next_generation;
        inner.map.insert(
            key,
            CacheEntry {
                opportunity,
                generation,
                expires_at_ms,
                source,
            },
        );
        inner.heap.push(HeapItem {
            expected_profit,
            generation,
            key,
            expires_at_ms,
        });
        metrics::record_opportunity("inserted");
    }

    /// Highest-profit valid candidate, or `None`. Stale and expired heap
    /// items encountered on the way are discarded permanently.
    pub fn pop_best(&self) -> Option<ArbitrageOpportunity> {
        let now = now_ms();
        let mut inner = self.lock();
        while let Some(item) = inner.heap.pop() {
            let live_generation = match inner.map.get(&item.key) {
                Some(entry) => entry.generation,
                None => {
                    metrics::record_opportunity("stale");
                    continue;
                }
            };
            if live_generation != item.generation {
                // superseded by a later insert for the same key
                metrics::record_opportunity("stale");
                continue;
            }
            if item.expires_at_ms <= now {
                inner.map.remove(&item.key);
                metrics::record_opportunity("expired");
                continue;
            }
            let entry = inner.map.remove(&item.key).expect("checked above");
            if !self.generations_valid(&entry.opportunity) {
                metrics::record_opportunity("stale");
                continue;
            }
            metrics::record_opportunity("popped");
            return Some(entry.opportunity);
        }
        None
    }

    /// Every pool on the path must still be at or below the generation
    /// captured when the candidate was created.
    fn generations_valid(&self, opportunity: &ArbitrageOpportunity) -> bool {
        opportunity.path.edges().iter().all(|edge| {
            self.manager
                .pool_by_address(edge.pool)
                .map(|pool| pool.generation <= opportunity.max_generation)
                .unwrap_or(false)
        })
    }

    /// Periodic maintenance: drops expired map entries and drains leading
    /// dead heap items so the top stays honest.
    pub fn remove_expired(&self) {
        let now = now_ms();
        let mut inner = self.lock();
        inner.map.retain(|_, entry| entry.expires_at_ms > now);
        while let Some(top) = inner.heap.peek() {
            let dead = top.expires_at_ms <= now
                || inner
                    .map
                    .get(&top.key)
                    .map(|entry| entry.generation != top.generation)
                    .unwrap_or(true);
            if dead {
                inner.heap.pop();
            } else {
                break;
            }
        }
    }

    /// Number of live (keyed) entries; heap tombstones are not counted.
    pub fn size(&self) -> usize {
        self.lock().map.len()
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.heap.clear();
        inner.map.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finder::ArbitrageOpportunity;
    use crate::pools::Pool;
    use crate::state_manager::StateEvent;
    use crate::token_graph::{Path, TokenGraph};
    use crate::types::Protocol;
    use ethers::types::U256;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    const A: u64 = 10;
    const B: u64 = 11;

    fn setup() -> (Arc<PoolStateManager>, Path) {
        let manager = Arc::new(PoolStateManager::new(999, std::env::temp_dir()));
        let p1 = Pool::new(addr(1), Protocol::HyperSwapV2, addr(A), addr(B))
            .unwrap()
            .with_reserves(U256::from(1_000_000u64), U256::from(2_000_000u64));
        let p2 = Pool::new(addr(2), Protocol::HyperSwapV2, addr(B), addr(A))
            .unwrap()
            .with_reserves(U256::from(1_000_000u64), U256::from(3_000_000u64));
        manager.apply_event(StateEvent::PoolCreated(p1)).unwrap();
        manager.apply_event(StateEvent::PoolCreated(p2)).unwrap();
        let graph = TokenGraph::build(&manager);
        let out_edge = graph
            .edges_between(addr(A), addr(B))
            .into_iter()
            .find(|edge| edge.pool == addr(1))
            .unwrap()
            .clone();
        let back_edge = graph
            .edges_between(addr(B), addr(A))
            .into_iter()
            .find(|edge| edge.pool == addr(2))
            .unwrap()
            .clone();
        let path = Path::new(vec![out_edge, back_edge]).unwrap();
        (manager, path)
    }

    fn candidate(path: &Path, profit: i64) -> ArbitrageOpportunity {
        let mut opportunity =
            ArbitrageOpportunity::from_cycle(path.clone(), OpportunitySource::Public);
        opportunity.expected_profit = I256::from(profit);
        opportunity
    }

    #[test]
    fn pop_returns_highest_profit_first() {
        let (manager, path) = setup();
        let cache = OpportunityCache::new(Arc::clone(&manager), 60_000);

        // distinct keys via distinct start tokens
        let mut low = candidate(&path, 10);
        low.start_token = addr(100);
        let mut high = candidate(&path, 1_000);
        high.start_token = addr(101);
        let mut mid = candidate(&path, 500);
        mid.start_token = addr(102);

        cache.insert(low, OpportunitySource::Public);
        cache.insert(high, OpportunitySource::Public);
        cache.insert(mid, OpportunitySource::Public);
        assert_eq!(cache.size(), 3);

        assert_eq!(cache.pop_best().unwrap().expected_profit, I256::from(1_000));
        assert_eq!(cache.pop_best().unwrap().expected_profit, I256::from(500));
        assert_eq!(cache.pop_best().unwrap().expected_profit, I256::from(10));
        assert!(cache.pop_best().is_none());
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn overwritten_key_never_resurfaces() {
        let (manager, path) = setup();
        let cache = OpportunityCache::new(Arc::clone(&manager), 60_000);

        let first = candidate(&path, 1_000);
        let second = candidate(&path, 5); // same key, lower profit
        let second_id = second.id;
        cache.insert(first, OpportunitySource::Public);
        cache.insert(second, OpportunitySource::Public);
        assert_eq!(cache.size(), 1);

        // the high-profit tombstone is skipped; the live entry wins
        let popped = cache.pop_best().unwrap();
        assert_eq!(popped.id, second_id);
        assert_eq!(popped.expected_profit, I256::from(5));
        assert!(cache.pop_best().is_none());
    }

    #[test]
    fn pool_mutation_invalidates_candidates() {
        let (manager, path) = setup();
        let cache = OpportunityCache::new(Arc::clone(&manager), 60_000);
        cache.insert(candidate(&path, 1_000), OpportunitySource::Public);

        manager
            .apply_event(StateEvent::Swap {
                pool: addr(1),
                reserves: Some([U256::from(990_000u64), U256::from(2_020_000u64)]),
                sqrt_price_x96: None,
                liquidity: None,
            })
            .unwrap();

        assert!(cache.pop_best().is_none());
    }

    #[test]
    fn expiry_is_enforced() {
        let (manager, path) = setup();
        let cache = OpportunityCache::new(Arc::clone(&manager), 1);
        cache.insert(candidate(&path, 1_000), OpportunitySource::Public);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(cache.pop_best().is_none());
        cache.remove_expired();
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn profit_ties_prefer_younger_generation() {
        let (manager, path) = setup();
        let cache = OpportunityCache::new(Arc::clone(&manager), 60_000);

        let mut older = candidate(&path, 500);
        older.start_token = addr(100);
        let older_id = older.id;
        let mut younger = candidate(&path, 500);
        younger.start_token = addr(101);
        let younger_id = younger.id;

        cache.insert(older, OpportunitySource::Public);
        cache.insert(younger, OpportunitySource::Public);

        assert_eq!(cache.pop_best().unwrap().id, younger_id);
        assert_eq!(cache.pop_best().unwrap().id, older_id);
    }

    #[test]
    fn clear_empties_everything() {
        let (manager, path) = setup();
        let cache = OpportunityCache::new(Arc::clone(&manager), 60_000);
        cache.insert(candidate(&path, 10), OpportunitySource::Public);
        cache.clear();
        assert_eq!(cache.size(), 0);
        assert!(cache.pop_best().is_none());
    }
}
