//! # Hyperarb
//!
//! A high-performance Rust engine for on-chain cyclic arbitrage discovery
//! across HyperEVM DEX protocols. The engine watches live chain activity,
//! maintains a generation-stamped index of liquidity pools, and continuously
//! searches for cyclic trades that return more of a base token than they
//! consume after gas and fees.
//!
//! ## Overview
//!
//! The pipeline, leaves to root:
//!
//! - **Indexing**: pools are discovered from factory contracts and kept
//!   current by decoded DEX logs.
//! - **State**: a single in-memory store owns every pool; each mutation is
//!   stamped from a monotonic generation counter, which downstream caches use
//!   to detect staleness without coordination.
//! - **Search**: a directed token graph is derived from the store and walked
//!   for simple cycles of bounded length from each configured base token.
//! - **Valuation**: candidate cycles are priced by a deterministic integer
//!   AMM simulator and sized by a grid + golden-section optimizer.
//! - **Execution hand-off**: profitable candidates flow through a
//!   profit-ordered cache into a worker pool that forwards winners to the
//!   executor boundary.
//!
//! ## Concurrency
//!
//! Event streams are per-source FIFO with no cross-source ordering; the only
//! global order in the system is the per-pool generation sequence. All pool
//! math is pure integer U256/U512; no floats touch an amount.

// Core types
/// Engine error taxonomy
pub mod errors;
/// Common types: tokens, protocol tags, directions, swap hints
pub mod types;

// State layer
/// Unified pool record and integer pool math helpers
pub mod pools;
/// Generation-stamped pool store with four indexes and JSON persistence
pub mod state_manager;

// Chain boundary
/// Multiplexed block / pending-tx / log stream with dedup and poll fallback
pub mod event_collector;
/// ChainGateway trait, ethers implementation and typed call helpers
pub mod gateway;
/// Pool discovery from factories and chain-log decoding
pub mod indexer;
/// Multicall3 batch executor for read calls
pub mod multicall;

// Search & valuation
/// Cycle enumeration over the token graph
pub mod finder;
/// Input-size optimization (grid + golden section)
pub mod optimizer;
/// Deterministic per-protocol swap pricing with fingerprint memoization
pub mod simulator;
/// Directed multi-graph of swap capabilities
pub mod token_graph;

// Scheduling
/// Profit-ordered candidate cache with TTL and generation invalidation
pub mod opportunity_cache;
/// Fixed-size evaluation worker pool
pub mod worker_pool;

// Control & boundaries
/// Controller wiring the pipeline and the event loop
pub mod bot;
/// Execution boundary (external calldata building plugs in here)
pub mod executor;
/// Outbound notifications (Telegram)
pub mod notifier;

// Infrastructure
/// Metrics facade (no-op without the `observability` feature)
pub mod metrics;
/// Configuration management
pub mod settings;
/// Small shared helpers
pub mod utils;

// Re-exports for convenience
pub use bot::ArbitrageBot;
pub use finder::{ArbitrageFinder, ArbitrageOpportunity};
pub use gateway::{ChainGateway, EthersGateway};
pub use opportunity_cache::OpportunityCache;
pub use optimizer::Optimizer;
pub use pools::Pool;
pub use settings::Settings;
pub use simulator::TradeSimulator;
pub use state_manager::PoolStateManager;
pub use token_graph::TokenGraph;
