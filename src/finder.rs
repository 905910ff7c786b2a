//! # Arbitrage Finder
//!
//! Enumerates simple cycles of length 2..=H starting and ending at a base
//! token, materializing each as a [`Path`] over concrete pool edges.
//!
//! Search rules:
//! - depth-first, no interior token repeats, no pool reused within a path;
//! - at most `max_pools_per_hop` alternative pools per `(from, to)` pair,
//!   taken in descending captured-liquidity order (ties by ascending pool
//!   address), which makes enumeration fully deterministic;
//! - cycles are emitted through a visitor as soon as they close, so a
//!   consumer can stop the walk early.
//!
//! Enumeration cost is O(b^H) with branching factor b; H is a hard cap.

use std::collections::{HashMap, HashSet};

use ethers::types::{Address, U256};
use ethers::types::I256;
use uuid::Uuid;

use crate::metrics;
use crate::token_graph::{Edge, Path, TokenGraph};
use crate::types::OpportunitySource;
use crate::utils::now_ms;

/// A candidate cyclic trade. The finder emits these with zero input and
/// profit; the optimizer fills both in.
#[derive(Debug, Clone)]
pub struct ArbitrageOpportunity {
    pub id: Uuid,
    pub path: Path,
    pub start_token: Address,
    pub input_amount: U256,
    pub expected_profit: I256,
    pub gas_estimate: U256,
    pub source: OpportunitySource,
    pub created_at_ms: u64,
    pub deadline_ms: Option<u64>,
    /// Highest pool generation captured at creation. The opportunity is valid
    /// only while every referenced pool's generation is <= this value.
    pub max_generation: u64,
}

impl ArbitrageOpportunity {
    pub fn from_cycle(path: Path, source: OpportunitySource) -> Self {
        let start_token = path.start_token().unwrap_or_default();
        let max_generation = path.max_generation();
        Self {
            id: Uuid::new_v4(),
            path,
            start_token,
            input_amount: U256::zero(),
            expected_profit: I256::zero(),
            gas_estimate: U256::zero(),
            source,
            created_at_ms: now_ms(),
            deadline_ms: None,
            max_generation,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FinderConfig {
    pub max_hops: usize,
    pub max_pools_per_hop: usize,
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            max_hops: 3,
            max_pools_per_hop: 5,
        }
    }
}

pub struct ArbitrageFinder<'g> {
    graph: &'g TokenGraph,
    config: FinderConfig,
}

impl<'g> ArbitrageFinder<'g> {
    pub fn new(graph: &'g TokenGraph, config: FinderConfig) -> Self {
        Self { graph, config }
    }

    /// Walks all cycles from `start`, invoking `visitor` for each completed
    /// one. The visitor returns `false` to stop enumeration early.
    pub fn visit_cycles(&self, start: Address, visitor: &mut dyn FnMut(Path) -> bool) {
        if self.config.max_hops < 2 {
            return;
        }
        let mut current: Vec<Edge> = Vec::with_capacity(self.config.max_hops);
        let mut visited_tokens: HashSet<Address> = HashSet::new();
        let mut used_pools: HashSet<Address> = HashSet::new();
        visited_tokens.insert(start);
        self.dfs(
            start,
            start,
            &mut current,
            &mut visited_tokens,
            &mut used_pools,
            visitor,
        );
    }

    /// Collects every cycle from `start` in enumeration order.
    pub fn find_cycles(&self, start: Address) -> Vec<Path> {
        let mut cycles = Vec::new();
        self.visit_cycles(start, &mut |path| {
            cycles.push(path);
            true
        });
        cycles
    }

    /// Cycles wrapped as zero-profit opportunities for the optimizer.
    pub fn opportunities(&self, start: Address, source: OpportunitySource) -> Vec<ArbitrageOpportunity> {
        self.find_cycles(start)
            .into_iter()
            .map(|path| ArbitrageOpportunity::from_cycle(path, source))
            .collect()
    }

    /// Returns `false` when the visitor asked to stop.
    fn dfs(
        &self,
        start: Address,
        position: Address,
        current: &mut Vec<Edge>,
        visited_tokens: &mut HashSet<Address>,
        used_pools: &mut HashSet<Address>,
        visitor: &mut dyn FnMut(Path) -> bool,
    ) -> bool {
        let depth = current.len();

        // Close the cycle: any edge back to the start token completes a
        // candidate once at least one intermediate hop exists.
        if depth >= 1 && depth + 1 >= 2 && depth + 1 <= self.config.max_hops {
            let mut closing_taken: usize = 0;
            for edge in self.graph.edges_from(position) {
                if edge.token_out != start || used_pools.contains(&edge.pool) {
                    continue;
                }
                if closing_taken >= self.config.max_pools_per_hop {
                    break;
                }
                closing_taken += 1;
                current.push(edge.clone());
                let path = Path::new(current.clone()).expect("edges chain by construction");
                current.pop();
                metrics::record_cycle_enumerated();
                if !visitor(path) {
                    return false;
                }
            }
        }

        // Extend deeper while another hop plus the closing hop still fit.
        if depth + 2 > self.config.max_hops {
            return true;
        }

        let mut taken_per_target: HashMap<Address, usize> = HashMap::new();
        for edge in self.graph.edges_from(position) {
            if edge.token_out == start || visited_tokens.contains(&edge.token_out) {
                continue;
            }
            if used_pools.contains(&edge.pool) {
                continue;
            }
            let taken = taken_per_target.entry(edge.token_out).or_insert(0);
            if *taken >= self.config.max_pools_per_hop {
                continue;
            }
            *taken += 1;

            current.push(edge.clone());
            visited_tokens.insert(edge.token_out);
            used_pools.insert(edge.pool);

            let keep_going = self.dfs(start, edge.token_out, current, visited_tokens, used_pools, visitor);

            used_pools.remove(&edge.pool);
            visited_tokens.remove(&edge.token_out);
            current.pop();

            if !keep_going {
                return false;
            }
        }
        true
    }
}
