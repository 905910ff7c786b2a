//! # Arbitrage Bot
//!
//! Controller wiring the pipeline together: indexer → state manager → token
//! graph → finder → opportunity cache → worker pool → executor, fed by the
//! event collector.
//!
//! Event handling policy:
//! - every block refreshes the cached gas price (clamped to the configured
//!   maximum) and every K-th block triggers a full graph rebuild + cycle
//!   re-enumeration;
//! - DEX logs are decoded into state events and applied; events referencing
//!   unknown pools are dropped with a warning and the loop continues;
//! - pending-tx hashes are observed only; router calldata decoding is an
//!   external collaborator that feeds [`ArbitrageBot::submit_swap_hint`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use ethers::types::{Address, H256, U256};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::errors::{EngineError, EngineResult};
use crate::event_collector::{Event, EventCollector};
use crate::executor::{DryRunExecutor, Executor};
use crate::finder::{ArbitrageFinder, ArbitrageOpportunity, FinderConfig};
use crate::gateway::{ChainGateway, EthersGateway};
use crate::indexer::{self, PoolIndexer};
use crate::notifier::{Notifier, NullNotifier, TelegramNotifier};
use crate::opportunity_cache::OpportunityCache;
use crate::optimizer::{Optimizer, OptimizerConfig};
use crate::settings::Settings;
use crate::simulator::TradeSimulator;
use crate::state_manager::PoolStateManager;
use crate::token_graph::TokenGraph;
use crate::types::{OpportunitySource, SwapInfo};
use crate::worker_pool::{Evaluator, ProfitableCallback, WorkerPool};

const STATS_INTERVAL: Duration = Duration::from_secs(60);
const PERSIST_INTERVAL: Duration = Duration::from_secs(300);
const DISPATCH_INTERVAL: Duration = Duration::from_millis(100);

pub struct ArbitrageBot {
    settings: Arc<Settings>,
    gateway: Arc<dyn ChainGateway>,
    manager: Arc<PoolStateManager>,
    indexer: Arc<PoolIndexer>,
    simulator: Arc<TradeSimulator>,
    cache: Arc<OpportunityCache>,
    workers: Arc<WorkerPool>,
    collector: Arc<EventCollector>,
    graph: Arc<ArcSwap<TokenGraph>>,
    /// Latest observed gas price in wei, clamped to the configured maximum.
    gas_price_wei: Arc<AtomicU64>,
    token_decimals: Arc<DashMap<Address, u8>>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl ArbitrageBot {
    pub async fn new(settings: Settings) -> anyhow::Result<Self> {
        settings
            .validate()
            .map_err(|e| anyhow::anyhow!("configuration error: {}", e))?;
        let settings = Arc::new(settings);

        let gateway: Arc<dyn ChainGateway> = Arc::new(
            EthersGateway::connect(&settings.rpc.url, settings.rpc.ws_url.as_deref())
                .await?
                .with_call_timeout(Duration::from_secs(settings.rpc.timeout_seconds))
                .with_retries(settings.rpc.max_retries, settings.rpc.backoff_base_ms),
        );
        Ok(Self::with_gateway(settings, gateway))
    }

    /// Wires the pipeline over an externally supplied gateway (tests inject
    /// mocks through this).
    pub fn with_gateway(settings: Arc<Settings>, gateway: Arc<dyn ChainGateway>) -> Self {
        let manager = Arc::new(PoolStateManager::new(
            settings.chain_id,
            settings.engine.cache_dir.clone(),
        ));
        let indexer = Arc::new(PoolIndexer::new(
            Arc::clone(&gateway),
            Arc::clone(&manager),
            Arc::clone(&settings),
        ));
        let simulator = Arc::new(TradeSimulator::new(Arc::clone(&manager)));
        let optimizer = Arc::new(Optimizer::new(
            Arc::clone(&simulator),
            OptimizerConfig {
                grid_samples: settings.optimizer.grid_samples,
                tolerance_milli_token: settings.optimizer.tolerance_milli_token,
            },
        ));
        let cache = Arc::new(OpportunityCache::new(
            Arc::clone(&manager),
            settings.engine.cache_ttl_ms,
        ));
        let collector = Arc::new(EventCollector::new(
            Arc::clone(&gateway),
            settings.collector.clone(),
            indexer::watched_topics(),
        ));
        let graph = Arc::new(ArcSwap::from_pointee(TokenGraph::build(&manager)));
        let gas_price_wei = Arc::new(AtomicU64::new(0));
        let token_decimals: Arc<DashMap<Address, u8>> = Arc::new(DashMap::new());

        let notifier: Arc<dyn Notifier> = match TelegramNotifier::from_settings(&settings.telegram)
        {
            Some(telegram) => Arc::new(telegram),
            None => Arc::new(NullNotifier),
        };
        let executor: Arc<dyn Executor> = Arc::new(DryRunExecutor);

        let evaluator = Self::build_evaluator(
            Arc::clone(&optimizer),
            Arc::clone(&token_decimals),
            Arc::clone(&gas_price_wei),
            settings.engine.slippage_bps,
        );
        let on_profitable = Self::build_profitable_callback(
            executor,
            notifier,
            settings.telegram.notify_on_execution,
        );
        let workers = Arc::new(WorkerPool::new(
            settings.engine.worker_pool_size,
            settings.min_profit_threshold().unwrap_or_default(),
            evaluator,
            on_profitable,
        ));

        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            settings,
            gateway,
            manager,
            indexer,
            simulator,
            cache,
            workers,
            collector,
            graph,
            gas_price_wei,
            token_decimals,
            stop_tx,
            stop_rx,
        }
    }

    fn build_evaluator(
        optimizer: Arc<Optimizer>,
        token_decimals: Arc<DashMap<Address, u8>>,
        gas_price_wei: Arc<AtomicU64>,
        slippage_bps: u32,
    ) -> Arc<Evaluator> {
        Arc::new(move |opportunity: &ArbitrageOpportunity| {
            let decimals = token_decimals
                .get(&opportunity.start_token)
                .map(|entry| *entry)
                .unwrap_or(18);
            let gas_price = U256::from(gas_price_wei.load(Ordering::Relaxed));
            optimizer.optimize(&opportunity.path, decimals, gas_price, slippage_bps)
        })
    }

    fn build_profitable_callback(
        executor: Arc<dyn Executor>,
        notifier: Arc<dyn Notifier>,
        notify_on_execution: bool,
    ) -> Arc<ProfitableCallback> {
        Arc::new(move |opportunity, trade| {
            let executor = Arc::clone(&executor);
            let notifier = Arc::clone(&notifier);
            tokio::spawn(async move {
                match executor.execute(&opportunity, &trade).await {
                    Ok(tx_hash) => {
                        if notify_on_execution {
                            let message = format!(
                                "arb cycle {} profit {} wei (tx: {:?})",
                                opportunity.id, trade.quote.profit, tx_hash
                            );
                            if let Err(e) = notifier.notify(&message).await {
                                warn!("notification failed: {}", e);
                            }
                        }
                    }
                    Err(e) => warn!("execution failed for {}: {}", opportunity.id, e),
                }
            });
        })
    }

    pub fn manager(&self) -> &Arc<PoolStateManager> {
        &self.manager
    }

    pub fn simulator(&self) -> &Arc<TradeSimulator> {
        &self.simulator
    }

    pub fn opportunity_cache(&self) -> &Arc<OpportunityCache> {
        &self.cache
    }

    /// Current graph snapshot (hot-swapped on rebuilds).
    pub fn graph(&self) -> Arc<TokenGraph> {
        self.graph.load_full()
    }

    /// Main loop. Returns when [`stop`](Self::stop) is called or every event
    /// source has ended.
    pub async fn run(&self) -> anyhow::Result<()> {
        info!("🚀 starting arbitrage engine on chain {}", self.settings.chain_id);

        let restored = self.manager.load_from_cache(self.settings.chain_id)?;
        if restored > 0 {
            info!("restored {} pools from cache", restored);
        }
        let discovered = self.indexer.discover_all().await?;
        info!(
            "startup index: {} pools ({} newly discovered)",
            self.manager.pool_count(),
            discovered
        );
        self.prefetch_base_token_metadata().await;
        self.refresh_gas_price().await;
        self.rebuild_and_enumerate();

        self.workers.start();
        let mut events = self.collector.stream().await?;

        let mut stats_ticker = tokio::time::interval(STATS_INTERVAL);
        let mut persist_ticker = tokio::time::interval(PERSIST_INTERVAL);
        let mut expire_ticker =
            tokio::time::interval(Duration::from_millis(self.settings.engine.cache_ttl_ms.max(1_000) / 2));
        let mut dispatch_ticker = tokio::time::interval(DISPATCH_INTERVAL);
        let mut stop_rx = self.stop_rx.clone();

        loop {
            tokio::select! {
                _ = stop_rx.changed() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        warn!("event stream ended");
                        break;
                    }
                },
                _ = dispatch_ticker.tick() => self.dispatch_candidates(),
                _ = expire_ticker.tick() => self.cache.remove_expired(),
                _ = stats_ticker.tick() => self.log_stats(),
                _ = persist_ticker.tick() => {
                    if let Err(e) = self.manager.save_to_cache(self.settings.chain_id) {
                        warn!("pool cache save failed: {}", e);
                    }
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Requests loop termination; `run` performs the actual teardown.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    async fn shutdown(&self) {
        info!("shutting down…");
        self.collector.stop().await;
        self.workers.stop().await;
        if let Err(e) = self.manager.save_to_cache(self.settings.chain_id) {
            warn!("final pool cache save failed: {}", e);
        }
        info!("shutdown complete");
    }

    async fn handle_event(&self, event: Event) {
        match event {
            Event::Block(block) => {
                debug!("block {}", block.number);
                self.refresh_gas_price().await;
                let interval = self.settings.engine.reindex_interval_blocks.max(1);
                if block.number % interval == 0 {
                    self.rebuild_and_enumerate();
                }
            }
            Event::Log(log) => {
                if let Some(state_event) = self.indexer.decode_log(&log) {
                    match self.manager.apply_event(state_event) {
                        Ok(_) => {}
                        Err(EngineError::UnknownPool(_)) => {
                            // already warned by the manager; pipeline continues
                        }
                        Err(EngineError::Invariant(reason)) => debug!("{}", reason),
                        Err(e) => warn!("state event rejected: {}", e),
                    }
                }
            }
            Event::PendingTx(hash) => {
                // Router decoding is external; hashes are only surfaced here.
                debug!("pending tx {:?}", hash);
            }
        }
    }

    /// Rebuilds the graph snapshot and re-enumerates cycles from every base
    /// token into the opportunity cache.
    pub fn rebuild_and_enumerate(&self) {
        let graph = Arc::new(TokenGraph::build(&self.manager));
        info!(
            "🧭 graph rebuilt: {} tokens, {} edges (generation {})",
            graph.token_count(),
            graph.edge_count(),
            graph.built_at_generation()
        );
        self.graph.store(Arc::clone(&graph));

        let finder_config = FinderConfig {
            max_hops: self.settings.engine.max_hops,
            max_pools_per_hop: self.settings.engine.max_pools_per_hop,
        };
        let finder = ArbitrageFinder::new(&graph, finder_config);
        let mut enumerated = 0usize;
        for base_token in self.settings.base_token_addresses() {
            for opportunity in finder.opportunities(base_token, OpportunitySource::Public) {
                self.cache.insert(opportunity, OpportunitySource::Public);
                enumerated += 1;
            }
        }
        debug!("enumerated {} cycle candidates", enumerated);
    }

    /// Moves the best candidates from the cache into the worker queue,
    /// keeping the queue shallow so profit priority keeps mattering.
    fn dispatch_candidates(&self) {
        let budget = (self.settings.engine.worker_pool_size * 2)
            .saturating_sub(self.workers.queue_size());
        for _ in 0..budget {
            match self.cache.pop_best() {
                Some(opportunity) => self.workers.submit(opportunity),
                None => break,
            }
        }
    }

    /// Seeds a targeted candidate from an externally decoded router swap.
    /// Cycles are restricted to those seeded by the hinted pool.
    pub fn submit_swap_hint(&self, hint: SwapInfo) -> usize {
        let graph = self.graph.load_full();
        let finder_config = FinderConfig {
            max_hops: self.settings.engine.max_hops,
            max_pools_per_hop: self.settings.engine.max_pools_per_hop,
        };
        let finder = ArbitrageFinder::new(&graph, finder_config);
        let mut inserted = 0usize;
        for path in finder.find_cycles(hint.start_token) {
            if path.seed_pool() != Some(hint.seed_pool) {
                continue;
            }
            let opportunity = ArbitrageOpportunity::from_cycle(path, OpportunitySource::Mempool);
            self.cache.insert(opportunity, OpportunitySource::Mempool);
            inserted += 1;
        }
        debug!(
            "swap hint for {:?} seeded {} candidates",
            hint.seed_pool, inserted
        );
        inserted
    }

    async fn prefetch_base_token_metadata(&self) {
        for base_token in self.settings.base_token_addresses() {
            let token = self.indexer.token_metadata(base_token).await;
            self.token_decimals.insert(base_token, token.decimals);
            info!(
                "base token {} ({} decimals)",
                token.symbol, token.decimals
            );
        }
    }

    async fn refresh_gas_price(&self) {
        match self.gateway.get_gas_price().await {
            Ok(price) => {
                let cap = self.settings.max_gas_price().unwrap_or(U256::max_value());
                let clamped = price.min(cap);
                self.gas_price_wei
                    .store(clamped.low_u64(), Ordering::Relaxed);
            }
            Err(e) => debug!("gas price refresh failed: {}", e),
        }
    }

    fn log_stats(&self) {
        let stats = self.manager.stats();
        info!(
            "📊 pools={} tokens={} pairs={} gen={} lookups={}/{} events={}+{} cache={} queue={} busy={} memo={}",
            stats.pools,
            stats.tokens,
            stats.pairs,
            stats.generation,
            stats.lookup_hits,
            stats.lookup_misses,
            stats.events_applied,
            stats.events_dropped,
            self.cache.size(),
            self.workers.queue_size(),
            self.workers.busy_count(),
            self.simulator.memo_len(),
        );
    }

    // ----- CLI analysis helpers -------------------------------------------

    /// `analyze-tx`: fetch a transaction and its receipt, report the DEX
    /// state events its logs decode into.
    pub async fn analyze_tx(&self, hash: H256) -> EngineResult<String> {
        let tx = self
            .gateway
            .get_transaction(hash)
            .await?
            .ok_or_else(|| EngineError::BadData(format!("transaction {:?} not found", hash)))?;
        let receipt = self.gateway.get_transaction_receipt(hash).await?;

        let mut report = format!(
            "tx {:?}\n  from {:?}\n  to {:?}\n  value {}\n",
            hash, tx.from, tx.to, tx.value
        );
        let preview = &tx.input[..tx.input.len().min(16)];
        report.push_str(&format!(
            "  input {} bytes (0x{}…)\n",
            tx.input.len(),
            hex::encode(preview)
        ));
        if let Some(receipt) = receipt {
            report.push_str(&format!(
                "  status {:?} gas_used {:?} logs {}\n",
                receipt.status,
                receipt.gas_used,
                receipt.logs.len()
            ));
            for log in &receipt.logs {
                if let Some(event) = self.indexer.decode_log(log) {
                    report.push_str(&format!(
                        "  log[{}] {:?} -> {} on pool {:?}\n",
                        log.log_index.unwrap_or_default(),
                        log.address,
                        event.kind(),
                        event.pool_address()
                    ));
                }
            }
        } else {
            report.push_str("  (no receipt yet)\n");
        }
        Ok(report)
    }

    /// `analyze-routers`: frequency count of addresses receiving swap-heavy
    /// traffic over a block range.
    pub async fn analyze_routers(&self, from_block: u64, to_block: u64) -> EngineResult<String> {
        let mut counts: HashMap<Address, usize> = HashMap::new();
        for (chunk_from, chunk_to) in
            crate::utils::create_block_chunks(from_block, to_block, self.settings.indexer.chunk_size)
        {
            let filter = ethers::types::Filter::new()
                .from_block(chunk_from)
                .to_block(chunk_to)
                .topic0(indexer::watched_topics());
            match self.gateway.get_logs(&filter).await {
                Ok(logs) => {
                    for log in logs {
                        *counts.entry(log.address).or_insert(0) += 1;
                    }
                }
                Err(e) => warn!("router scan [{}, {}] failed: {}", chunk_from, chunk_to, e),
            }
        }
        let mut ranked: Vec<(Address, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let mut report = format!("active pools in blocks [{}, {}]:\n", from_block, to_block);
        for (address, count) in ranked.into_iter().take(20) {
            report.push_str(&format!("  {:?}: {} events\n", address, count));
        }
        Ok(report)
    }

    /// `debug-arbitrage`: replay a transaction's pool touches against the
    /// current index and report which candidates they would seed.
    pub async fn debug_arbitrage(&self, hash: H256) -> EngineResult<String> {
        let receipt = self
            .gateway
            .get_transaction_receipt(hash)
            .await?
            .ok_or_else(|| EngineError::BadData(format!("receipt for {:?} not found", hash)))?;

        let mut report = format!("arbitrage debug for {:?}:\n", hash);
        for log in &receipt.logs {
            let Some(event) = self.indexer.decode_log(log) else {
                continue;
            };
            let pool_address = event.pool_address();
            let Some(pool) = self.manager.pool_by_address(pool_address) else {
                report.push_str(&format!("  pool {:?}: not indexed\n", pool_address));
                continue;
            };
            report.push_str(&format!(
                "  pool {:?} [{}] generation {}\n",
                pool_address, pool.protocol, pool.generation
            ));
            for token in pool.tokens {
                let seeded = self.submit_swap_hint(SwapInfo {
                    start_token: token,
                    seed_pool: pool_address,
                    amount_hint: None,
                });
                report.push_str(&format!(
                    "    {} cycles seeded from token {:?}\n",
                    seeded, token
                ));
            }
        }
        Ok(report)
    }
}
