//! # Trade Simulator
//!
//! Deterministic off-chain pricing of candidate paths from current pool
//! state. All arithmetic is integer-only on U256 with U512 intermediates;
//! there are no floats anywhere in the quoting path.
//!
//! Pricing rules per protocol family:
//! - **Constant-product** (HyperSwapV2, KittenSwap volatile): the classic
//!   `x*y=k` quote with the fee drawn from the input amount.
//! - **Stable** (KittenSwapStable): priced with the constant-product rule at
//!   its 25 bps fee. The closed-form stable invariant is not carried.
//! - **Concentrated** (HyperSwapV3, Shadow, SwapX): simplified spot model.
//!   The price comes from `sqrtPriceX96² / 2¹⁹²` with the fee on input; zero
//!   active liquidity prices to zero. Tick-crossing is not modelled.
//!
//! A pool with zero reserves on the relevant side prices to zero out; that is
//! a quote of zero, never an error.
//!
//! ## Memoization
//!
//! Quotes are memoized under a fingerprint of the ordered
//! (pool, direction, generation) triples plus `(amount_in, gas_price,
//! slippage)`. A pool mutation advances its generation, changes the
//! fingerprint and implicitly invalidates every quote that depended on it;
//! no explicit eviction is needed.

use std::sync::Arc;

use dashmap::DashMap;
use ethers::types::{H256, U256, U512};
use ethers::utils::keccak256;

use crate::metrics;
use crate::pools::Pool;
use crate::state_manager::PoolStateManager;
use crate::token_graph::Path;
use crate::types::Direction;

const BPS_DENOMINATOR: u64 = 10_000;
/// Base transaction cost added to every path estimate.
const GAS_BASE: u64 = 21_000;

/// Result of pricing one path at one input size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Quote {
    pub amount_out: U256,
    pub gas_estimate: U256,
    pub gas_cost: U256,
    /// `max(0, amount_out - amount_in - gas_cost)`.
    pub profit: U256,
}

/// Constant-product quote: `in' = in * (10000 - fee)`;
/// `out = in' * r_out / (r_in * 10000 + in')`.
pub fn constant_product_out(
    amount_in: U256,
    reserve_in: U256,
    reserve_out: U256,
    fee_bps: u32,
) -> U256 {
    if amount_in.is_zero() || reserve_in.is_zero() || reserve_out.is_zero() {
        return U256::zero();
    }
    let fee_bps = fee_bps.min(BPS_DENOMINATOR as u32) as u64;
    let amount_in_with_fee: U512 = amount_in.full_mul(U256::from(BPS_DENOMINATOR - fee_bps));
    let numerator = match amount_in_with_fee.checked_mul(U512::from(reserve_out)) {
        Some(product) => product,
        None => return U256::zero(),
    };
    let denominator = match U512::from(reserve_in)
        .checked_mul(U512::from(BPS_DENOMINATOR))
        .and_then(|scaled| scaled.checked_add(amount_in_with_fee))
    {
        Some(sum) => sum,
        None => return U256::zero(),
    };
    if denominator.is_zero() {
        return U256::zero();
    }
    U256::try_from(numerator / denominator).unwrap_or(U256::zero())
}

/// Simplified concentrated-liquidity quote from the pool's spot price.
fn concentrated_out(pool: &Pool, direction: Direction, amount_in: U256) -> U256 {
    let liquidity = pool.liquidity.unwrap_or(0);
    if liquidity == 0 || amount_in.is_zero() {
        return U256::zero();
    }
    let price_e18 = match pool.spot_price_e18() {
        Some(price) => price,
        None => return U256::zero(),
    };
    if price_e18.is_zero() {
        return U256::zero();
    }
    let fee_bps = pool.fee_bps().min(BPS_DENOMINATOR as u32) as u64;
    let effective_in: U512 = amount_in.full_mul(U256::from(BPS_DENOMINATOR - fee_bps));
    // effective_in is scaled by 1e4; fold the bps denominator into the final
    // division to avoid a second truncation.
    let scale = U512::from(U256::exp10(18));
    let out = match direction {
        // token0 in: out = in * price
        Direction::ZeroForOne => {
            let numerator = match effective_in.checked_mul(U512::from(price_e18)) {
                Some(product) => product,
                None => return U256::zero(),
            };
            numerator / (scale * U512::from(BPS_DENOMINATOR))
        }
        // token1 in: out = in / price
        Direction::OneForZero => {
            let numerator = match effective_in.checked_mul(scale) {
                Some(product) => product,
                None => return U256::zero(),
            };
            numerator / (U512::from(price_e18) * U512::from(BPS_DENOMINATOR))
        }
    };
    U256::try_from(out).unwrap_or(U256::zero())
}

/// Quote a single hop from current pool state.
pub fn amount_out_single(pool: &Pool, direction: Direction, amount_in: U256) -> U256 {
    if amount_in.is_zero() {
        return U256::zero();
    }
    if pool.protocol.is_concentrated() && pool.reserves.is_none() {
        return concentrated_out(pool, direction, amount_in);
    }
    match pool.reserves_for(direction) {
        Some((reserve_in, reserve_out)) => {
            constant_product_out(amount_in, reserve_in, reserve_out, pool.fee_bps())
        }
        None => U256::zero(),
    }
}

/// Per-hop gas for a path plus the 21k base.
pub fn gas_estimate(path: &Path) -> U256 {
    let per_hop: u64 = path
        .edges()
        .iter()
        .map(|edge| edge.protocol.gas_per_hop())
        .sum();
    U256::from(GAS_BASE + per_hop)
}

pub struct TradeSimulator {
    manager: Arc<PoolStateManager>,
    memo: DashMap<H256, Quote>,
}

impl TradeSimulator {
    pub fn new(manager: Arc<PoolStateManager>) -> Self {
        Self {
            manager,
            memo: DashMap::new(),
        }
    }

    /// Stable memo key over the ordered pool/direction/generation triples and
    /// the quote inputs. Built from *current* generations, so a mutation to
    /// any pool on the path rotates the key.
    pub fn path_fingerprint(
        &self,
        path: &Path,
        amount_in: U256,
        gas_price: U256,
        slippage_bps: u32,
    ) -> H256 {
        let mut buffer = Vec::with_capacity(path.hops() * 61 + 96);
        for edge in path.edges() {
            buffer.extend_from_slice(edge.pool.as_bytes());
            buffer.push(edge.direction.tag());
            let generation = self
                .manager
                .pool_by_address(edge.pool)
                .map(|pool| pool.generation)
                .unwrap_or(0);
            buffer.extend_from_slice(&generation.to_be_bytes());
        }
        let mut word = [0u8; 32];
        amount_in.to_big_endian(&mut word);
        buffer.extend_from_slice(&word);
        gas_price.to_big_endian(&mut word);
        buffer.extend_from_slice(&word);
        buffer.extend_from_slice(&slippage_bps.to_be_bytes());
        H256::from(keccak256(buffer))
    }

    /// Prices `path` at `amount_in`. Missing pools or empty paths price to a
    /// zero quote. The result is memoized by fingerprint.
    pub fn simulate(
        &self,
        path: &Path,
        amount_in: U256,
        gas_price: U256,
        slippage_bps: u32,
    ) -> Quote {
        if path.is_empty() || amount_in.is_zero() {
            return Quote::default();
        }

        let fingerprint = self.path_fingerprint(path, amount_in, gas_price, slippage_bps);
        if let Some(cached) = self.memo.get(&fingerprint) {
            metrics::record_simulation(true);
            return *cached;
        }

        let mut amount = amount_in;
        for edge in path.edges() {
            if amount.is_zero() {
                break;
            }
            let pool = match self.manager.pool_by_address(edge.pool) {
                Some(pool) => pool,
                None => {
                    amount = U256::zero();
                    break;
                }
            };
            amount = amount_out_single(&pool, edge.direction, amount);
        }

        // Slippage haircut on the final output.
        let slippage_bps = (slippage_bps as u64).min(BPS_DENOMINATOR);
        let amount_out = if amount.is_zero() {
            amount
        } else {
            let haircut: U512 = amount.full_mul(U256::from(BPS_DENOMINATOR - slippage_bps));
            U256::try_from(haircut / U512::from(BPS_DENOMINATOR)).unwrap_or(U256::zero())
        };

        let estimate = gas_estimate(path);
        let gas_cost = estimate.saturating_mul(gas_price);
        let profit = amount_out
            .saturating_sub(amount_in)
            .saturating_sub(gas_cost);

        let quote = Quote {
            amount_out,
            gas_estimate: estimate,
            gas_cost,
            profit,
        };
        metrics::record_simulation(false);
        self.memo.insert(fingerprint, quote);
        quote
    }

    pub fn memo_len(&self) -> usize {
        self.memo.len()
    }

    /// Drops every memoized quote. Invalidation is normally implicit via
    /// generations; this is for tests and manual resets.
    pub fn clear_memo(&self) {
        self.memo.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_manager::StateEvent;
    use crate::token_graph::TokenGraph;
    use crate::types::Protocol;
    use ethers::types::Address;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    const A: u64 = 10;
    const B: u64 = 11;

    fn setup(pools: Vec<Pool>) -> (Arc<PoolStateManager>, TokenGraph) {
        let manager = Arc::new(PoolStateManager::new(999, std::env::temp_dir()));
        for pool in pools {
            manager.apply_event(StateEvent::PoolCreated(pool)).unwrap();
        }
        let graph = TokenGraph::build(&manager);
        (manager, graph)
    }

    /// The concrete edge through `pool`, pinned by address so tests do not
    /// depend on liquidity-score ordering.
    fn edge_via(graph: &TokenGraph, from: Address, to: Address, pool: Address) -> crate::token_graph::Edge {
        graph
            .edges_between(from, to)
            .into_iter()
            .find(|edge| edge.pool == pool)
            .expect("edge must exist")
            .clone()
    }

    #[test]
    fn constant_product_matches_hand_computation() {
        // in = 10_000 on (1e6, 2e6) at 30 bps:
        // in' = 10_000 * 9970 = 99_700_000
        // out = 99_700_000 * 2e6 / (1e6 * 10_000 + 99_700_000) = 19_743...
        let out = constant_product_out(
            U256::from(10_000u64),
            U256::from(1_000_000u64),
            U256::from(2_000_000u64),
            30,
        );
        assert_eq!(out, U256::from(19_743u64));
    }

    #[test]
    fn zero_inputs_price_to_zero() {
        assert_eq!(
            constant_product_out(U256::zero(), U256::from(1u64), U256::from(1u64), 30),
            U256::zero()
        );
        assert_eq!(
            constant_product_out(U256::from(1u64), U256::zero(), U256::from(1u64), 30),
            U256::zero()
        );
        assert_eq!(
            constant_product_out(U256::from(1u64), U256::from(1u64), U256::zero(), 30),
            U256::zero()
        );
    }

    #[test]
    fn round_trip_through_one_pool_is_lossy() {
        let reserve0 = U256::from(1_000_000u64);
        let reserve1 = U256::from(2_000_000u64);
        let amount_in = U256::from(50_000u64);
        let forward = constant_product_out(amount_in, reserve0, reserve1, 30);
        // reverse swap against the same (unchanged) reserves
        let back = constant_product_out(forward, reserve1, reserve0, 30);
        assert!(back < amount_in, "round trip must lose to fees: {} vs {}", back, amount_in);
    }

    #[test]
    fn concentrated_parity_pricing() {
        // price 1.0 (sqrtPriceX96 = 2^96), fee 30 bps
        let sqrt_price = U256::from(2u64).pow(U256::from(96u64));
        let pool = Pool::new(addr(1), Protocol::HyperSwapV3, addr(A), addr(B))
            .unwrap()
            .with_concentrated_state(sqrt_price, 1_000_000);
        let amount_in = U256::exp10(18);
        let out = amount_out_single(&pool, Direction::ZeroForOne, amount_in);
        // 1e18 * 0.997 at price 1.0
        assert_eq!(out, U256::from(997_000_000_000_000_000u128));
        let back = amount_out_single(&pool, Direction::OneForZero, amount_in);
        assert_eq!(back, U256::from(997_000_000_000_000_000u128));
    }

    #[test]
    fn concentrated_zero_liquidity_prices_to_zero() {
        let sqrt_price = U256::from(2u64).pow(U256::from(96u64));
        let pool = Pool::new(addr(1), Protocol::Shadow, addr(A), addr(B))
            .unwrap()
            .with_concentrated_state(sqrt_price, 0);
        assert_eq!(
            amount_out_single(&pool, Direction::ZeroForOne, U256::exp10(18)),
            U256::zero()
        );
    }

    #[test]
    fn two_pool_arbitrage_scenario() {
        // P1 prices B at 0.5 A (reserves 1e6 A, 2e6 B); P2 prices B at 3 A
        // (reserves 1e6 B, 3e6 A). Swapping A->B in P1 then B->A in P2 must
        // beat the input before gas.
        let p1 = Pool::new(addr(1), Protocol::HyperSwapV2, addr(A), addr(B))
            .unwrap()
            .with_reserves(U256::from(1_000_000u64), U256::from(2_000_000u64));
        let p2 = Pool::new(addr(2), Protocol::HyperSwapV2, addr(B), addr(A))
            .unwrap()
            .with_reserves(U256::from(1_000_000u64), U256::from(3_000_000u64));
        let (manager, graph) = setup(vec![p1, p2]);

        let out_edge = edge_via(&graph, addr(A), addr(B), addr(1));
        let back_edge = edge_via(&graph, addr(B), addr(A), addr(2));
        let path = Path::new(vec![out_edge, back_edge]).unwrap();

        let simulator = TradeSimulator::new(manager);
        let amount_in = U256::from(10_000u64);
        let quote = simulator.simulate(&path, amount_in, U256::zero(), 0);

        assert_eq!(quote.gas_estimate, U256::from(141_000u64));
        assert_eq!(quote.gas_cost, U256::zero());
        assert!(quote.amount_out > amount_in);
        assert_eq!(quote.profit, quote.amount_out - amount_in);
    }

    #[test]
    fn memo_hits_until_generation_advances() {
        let p1 = Pool::new(addr(1), Protocol::HyperSwapV2, addr(A), addr(B))
            .unwrap()
            .with_reserves(U256::from(1_000_000u64), U256::from(2_000_000u64));
        let p2 = Pool::new(addr(2), Protocol::HyperSwapV2, addr(B), addr(A))
            .unwrap()
            .with_reserves(U256::from(3_000_000u64), U256::from(1_000_000u64));
        let (manager, graph) = setup(vec![p1, p2]);
        let path = Path::new(vec![
            edge_via(&graph, addr(A), addr(B), addr(1)),
            edge_via(&graph, addr(B), addr(A), addr(2)),
        ])
        .unwrap();

        let simulator = TradeSimulator::new(Arc::clone(&manager));
        let amount_in = U256::from(10_000u64);
        let first = simulator.simulate(&path, amount_in, U256::zero(), 0);
        assert_eq!(simulator.memo_len(), 1);
        let again = simulator.simulate(&path, amount_in, U256::zero(), 0);
        assert_eq!(first, again);
        assert_eq!(simulator.memo_len(), 1);

        // a swap invalidates implicitly: same inputs, new fingerprint
        manager
            .apply_event(StateEvent::Swap {
                pool: addr(1),
                reserves: Some([U256::from(900_000u64), U256::from(2_300_000u64)]),
                sqrt_price_x96: None,
                liquidity: None,
            })
            .unwrap();
        let refreshed = simulator.simulate(&path, amount_in, U256::zero(), 0);
        assert_eq!(simulator.memo_len(), 2);
        assert_ne!(first.amount_out, refreshed.amount_out);
    }

    #[test]
    fn gas_cost_reduces_profit_to_zero_floor() {
        let p1 = Pool::new(addr(1), Protocol::HyperSwapV2, addr(A), addr(B))
            .unwrap()
            .with_reserves(U256::from(1_000_000u64), U256::from(1_000_000u64));
        let p2 = Pool::new(addr(2), Protocol::HyperSwapV2, addr(B), addr(A))
            .unwrap()
            .with_reserves(U256::from(1_000_000u64), U256::from(1_000_000u64));
        let (manager, graph) = setup(vec![p1, p2]);
        let path = Path::new(vec![
            edge_via(&graph, addr(A), addr(B), addr(1)),
            edge_via(&graph, addr(B), addr(A), addr(2)),
        ])
        .unwrap();

        let simulator = TradeSimulator::new(manager);
        // parity pools lose to fees; gas on top keeps profit floored at zero
        let quote = simulator.simulate(&path, U256::from(10_000u64), U256::from(1_000_000_000u64), 50);
        assert_eq!(quote.profit, U256::zero());
        assert!(quote.amount_out < U256::from(10_000u64));
    }

    #[test]
    fn empty_path_and_zero_amount_yield_zero_quote() {
        let (manager, _) = setup(vec![]);
        let simulator = TradeSimulator::new(manager);
        let empty = Path::new(Vec::new()).unwrap();
        assert_eq!(simulator.simulate(&empty, U256::exp10(18), U256::one(), 50), Quote::default());
    }
}
