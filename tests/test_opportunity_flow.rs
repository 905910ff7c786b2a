//! Integration tests for the opportunity cache → worker pool flow
//!
//! Covers:
//! - stale invalidation after a pool mutation
//! - TTL expiry draining the cache
//! - overwrite semantics per cache key
//! - worker-pool drain with exact profitable-callback accounting

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ethers::types::{Address, I256, U256};
use hyperarb::finder::ArbitrageOpportunity;
use hyperarb::opportunity_cache::OpportunityCache;
use hyperarb::optimizer::OptimizedTrade;
use hyperarb::pools::Pool;
use hyperarb::simulator::Quote;
use hyperarb::state_manager::{PoolStateManager, StateEvent};
use hyperarb::token_graph::{Path, TokenGraph};
use hyperarb::types::{OpportunitySource, Protocol};
use hyperarb::worker_pool::{Evaluator, ProfitableCallback, WorkerPool};

fn addr(n: u64) -> Address {
    Address::from_low_u64_be(n)
}

const A: u64 = 0xA0;
const B: u64 = 0xB0;

fn arb_manager() -> Arc<PoolStateManager> {
    let manager = Arc::new(PoolStateManager::new(999, std::env::temp_dir()));
    let p1 = Pool::new(addr(1), Protocol::HyperSwapV2, addr(A), addr(B))
        .unwrap()
        .with_reserves(U256::from(1_000_000u64), U256::from(2_000_000u64));
    let p2 = Pool::new(addr(2), Protocol::HyperSwapV2, addr(B), addr(A))
        .unwrap()
        .with_reserves(U256::from(1_000_000u64), U256::from(3_000_000u64));
    manager.apply_event(StateEvent::PoolCreated(p1)).unwrap();
    manager.apply_event(StateEvent::PoolCreated(p2)).unwrap();
    manager
}

fn cycle_path(manager: &PoolStateManager) -> Path {
    let graph = TokenGraph::build(manager);
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
    Path::new(vec![out_edge, back_edge]).unwrap()
}

fn candidate(path: &Path, profit: i64, start_token: Address) -> ArbitrageOpportunity {
    let mut opportunity = ArbitrageOpportunity::from_cycle(path.clone(), OpportunitySource::Public);
    opportunity.expected_profit = I256::from(profit);
    opportunity.start_token = start_token;
    opportunity
}

/// Scenario: an opportunity referencing pool P becomes unreturnable once a
/// swap advances P's generation past the snapshot captured at creation.
#[test]
fn swap_invalidates_cached_opportunity() {
    let manager = arb_manager();
    let path = cycle_path(&manager);
    let cache = OpportunityCache::new(Arc::clone(&manager), 60_000);

    cache.insert(
        candidate(&path, 1_000, addr(A)),
        OpportunitySource::Public,
    );
    assert_eq!(cache.size(), 1);

    manager
        .apply_event(StateEvent::Swap {
            pool: addr(1),
            reserves: Some([U256::from(950_000u64), U256::from(2_100_000u64)]),
            sqrt_price_x96: None,
            liquidity: None,
        })
        .unwrap();

    assert!(cache.pop_best().is_none(), "stale candidate must be skipped");
}

/// Scenario: a 1 ms TTL entry is gone after expiry and `remove_expired`
/// leaves the cache empty.
#[test]
fn ttl_expiry_empties_the_cache() {
    let manager = arb_manager();
    let path = cycle_path(&manager);
    let cache = OpportunityCache::new(Arc::clone(&manager), 1);

    cache.insert(candidate(&path, 1_000, addr(A)), OpportunitySource::Public);
    std::thread::sleep(Duration::from_millis(3));

    assert!(cache.pop_best().is_none());
    cache.remove_expired();
    assert_eq!(cache.size(), 0);
}

/// `pop_best` never returns an entry overwritten by a later insert for the
/// same key, even when the overwritten one advertised a higher profit.
#[test]
fn overwrite_wins_over_tombstone() {
    let manager = arb_manager();
    let path = cycle_path(&manager);
    let cache = OpportunityCache::new(Arc::clone(&manager), 60_000);

    let loud = candidate(&path, 1_000_000, addr(A));
    let quiet = candidate(&path, 1, addr(A)); // same (start, seed) key
    let quiet_id = quiet.id;

    cache.insert(loud, OpportunitySource::Public);
    cache.insert(quiet, OpportunitySource::Public);

    let popped = cache.pop_best().expect("live entry must remain valid");
    assert_eq!(popped.id, quiet_id);
    assert!(cache.pop_best().is_none());
}

/// Scenario: 100 queued opportunities, 10 profitable, 4 workers. The
/// profitable callback fires exactly 10 times and the queue drains to zero.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn worker_drain_accounts_exactly() {
    let manager = arb_manager();
    let path = cycle_path(&manager);

    // profitable iff the candidate's marker is a multiple of 10
    let evaluator: Arc<Evaluator> = Arc::new(|opportunity: &ArbitrageOpportunity| {
        let marker = opportunity.input_amount.low_u64();
        let profit = if marker % 10 == 0 {
            U256::from(1_000_000_000u64)
        } else {
            U256::zero()
        };
        OptimizedTrade {
            input_amount: opportunity.input_amount,
            quote: Quote {
                amount_out: profit,
                gas_estimate: U256::from(141_000u64),
                gas_cost: U256::zero(),
                profit,
            },
        }
    });
    let profitable_hits = Arc::new(AtomicU64::new(0));
    let hits = Arc::clone(&profitable_hits);
    let on_profitable: Arc<ProfitableCallback> = Arc::new(move |_, _| {
        hits.fetch_add(1, Ordering::SeqCst);
    });

    let pool = WorkerPool::new(4, U256::zero(), evaluator, on_profitable);
    pool.start();

    for marker in 0..100u64 {
        let mut opportunity = candidate(&path, marker as i64, addr(A));
        opportunity.input_amount = U256::from(marker);
        pool.submit(opportunity);
    }

    // bounded wait for the drain
    for _ in 0..300 {
        if pool.queue_size() == 0 && pool.busy_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    pool.stop().await;

    assert_eq!(profitable_hits.load(Ordering::SeqCst), 10);
    assert_eq!(pool.queue_size(), 0);
    assert_eq!(pool.busy_count(), 0);
}

/// End-to-end hand-off: candidates inserted into the cache surface through
/// `pop_best` in profit order and evaluate through the worker pool.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cache_to_workers_hand_off() {
    let manager = arb_manager();
    let path = cycle_path(&manager);
    let cache = Arc::new(OpportunityCache::new(Arc::clone(&manager), 60_000));

    for (marker, profit) in [(1u64, 50i64), (2, 500), (3, 5)] {
        let mut opportunity = candidate(&path, profit, addr(marker + 100));
        opportunity.input_amount = U256::from(marker);
        cache.insert(opportunity, OpportunitySource::Public);
    }

    let seen_order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let evaluator: Arc<Evaluator> = Arc::new(|opportunity: &ArbitrageOpportunity| OptimizedTrade {
        input_amount: opportunity.input_amount,
        quote: Quote {
            amount_out: U256::one(),
            gas_estimate: U256::zero(),
            gas_cost: U256::zero(),
            profit: U256::one(),
        },
    });
    let order_sink = Arc::clone(&seen_order);
    let on_profitable: Arc<ProfitableCallback> = Arc::new(move |opportunity, _| {
        order_sink
            .lock()
            .unwrap()
            .push(opportunity.expected_profit.as_i64());
    });

    let pool = WorkerPool::new(1, U256::zero(), evaluator, on_profitable);
    pool.start();
    // single worker + priority pops give a deterministic callback order
    while let Some(opportunity) = cache.pop_best() {
        pool.submit(opportunity);
    }
    for _ in 0..300 {
        if pool.queue_size() == 0 && pool.busy_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    pool.stop().await;

    assert_eq!(*seen_order.lock().unwrap(), vec![500, 50, 5]);
}
