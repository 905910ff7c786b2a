//! # Token Graph
//!
//! Directed multi-graph derived from the pool store. Each edge represents a
//! swap capability through one concrete pool in one direction; a two-token
//! pool contributes an edge in each direction.
//!
//! Edges carry a pool *handle* (the address) plus captured ordering data,
//! never the pool itself; the store stays the single owner of pool state,
//! which keeps the graph rebuildable and free of reference cycles.
//!
//! Builds are deterministic: pools are visited in address order and each
//! adjacency list is sorted by descending captured liquidity, then ascending
//! pool address.

use ethers::types::{Address, U256};
use indexmap::IndexMap;

use crate::errors::{EngineError, EngineResult};
use crate::state_manager::PoolStateManager;
use crate::types::{Direction, Protocol};

/// One swap capability: `token_in` → `token_out` through `pool`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub token_in: Address,
    pub token_out: Address,
    pub pool: Address,
    pub direction: Direction,
    pub protocol: Protocol,
    /// Liquidity proxy captured at build time; ordering heuristic only.
    pub liquidity_score: U256,
    /// Pool generation captured at build time.
    pub generation: u64,
}

/// An ordered list of edges with token continuity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    edges: Vec<Edge>,
}

impl Path {
    /// Validates token continuity: each edge must start where the previous
    /// one ended. A broken chain is a logical invariant violation.
    pub fn new(edges: Vec<Edge>) -> EngineResult<Self> {
        for window in edges.windows(2) {
            if window[0].token_out != window[1].token_in {
                return Err(EngineError::Invariant(format!(
                    "path discontinuity: {:?} -> {:?}",
                    window[0].token_out, window[1].token_in
                )));
            }
        }
        Ok(Self { edges })
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn hops(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn start_token(&self) -> Option<Address> {
        self.edges.first().map(|e| e.token_in)
    }

    pub fn end_token(&self) -> Option<Address> {
        self.edges.last().map(|e| e.token_out)
    }

    /// The visited token sequence, start token first. One longer than the
    /// hop count for non-empty paths.
    pub fn token_sequence(&self) -> Vec<Address> {
        let mut sequence = Vec::with_capacity(self.edges.len() + 1);
        if let Some(first) = self.edges.first() {
            sequence.push(first.token_in);
        }
        for edge in &self.edges {
            sequence.push(edge.token_out);
        }
        sequence
    }

    pub fn is_cycle(&self) -> bool {
        !self.is_empty() && self.start_token() == self.end_token()
    }

    /// Highest captured pool generation along the path. An opportunity built
    /// from this path is stale once any referenced pool advances past it.
    pub fn max_generation(&self) -> u64 {
        self.edges.iter().map(|e| e.generation).max().unwrap_or(0)
    }

    /// First edge's pool; the cache keys targeted candidates by it.
    pub fn seed_pool(&self) -> Option<Address> {
        self.edges.first().map(|e| e.pool)
    }
}

pub struct TokenGraph {
    adjacency: IndexMap<Address, Vec<Edge>>,
    edge_count: usize,
    built_at_generation: u64,
}

impl TokenGraph {
    /// Builds the graph from a snapshot of the pool store. Pools without
    /// usable state contribute no edges.
    pub fn build(manager: &PoolStateManager) -> Self {
        let mut pools = manager.snapshot();
        pools.sort_by_key(|pool| pool.address);

        let mut adjacency: IndexMap<Address, Vec<Edge>> = IndexMap::new();
        let mut edge_count = 0usize;
        for pool in &pools {
            if !pool.has_state() {
                continue;
            }
            let score = pool.liquidity_score();
            for (token_in, token_out, direction) in [
                (pool.tokens[0], pool.tokens[1], Direction::ZeroForOne),
                (pool.tokens[1], pool.tokens[0], Direction::OneForZero),
            ] {
                adjacency.entry(token_in).or_default().push(Edge {
                    token_in,
                    token_out,
                    pool: pool.address,
                    direction,
                    protocol: pool.protocol,
                    liquidity_score: score,
                    generation: pool.generation,
                });
                edge_count += 1;
            }
        }

        for edges in adjacency.values_mut() {
            edges.sort_by(|a, b| {
                b.liquidity_score
                    .cmp(&a.liquidity_score)
                    .then(a.pool.cmp(&b.pool))
            });
        }
        adjacency.sort_keys();

        Self {
            adjacency,
            edge_count,
            built_at_generation: manager.current_generation(),
        }
    }

    /// Outgoing edges of `token`, best liquidity first.
    pub fn edges_from(&self, token: Address) -> &[Edge] {
        self.adjacency
            .get(&token)
            .map(|edges| edges.as_slice())
            .unwrap_or(&[])
    }

    /// Edges from `from` to `to`, preserving the liquidity ordering.
    pub fn edges_between(&self, from: Address, to: Address) -> Vec<&Edge> {
        self.edges_from(from)
            .iter()
            .filter(|edge| edge.token_out == to)
            .collect()
    }

    pub fn tokens(&self) -> impl Iterator<Item = &Address> {
        self.adjacency.keys()
    }

    pub fn token_count(&self) -> usize {
        self.adjacency.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Generation of the store when this snapshot was built.
    pub fn built_at_generation(&self) -> u64 {
        self.built_at_generation
    }
}
