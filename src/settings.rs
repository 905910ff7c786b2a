use config::{Config, ConfigError, File};
use ethers::types::{Address, U256};
use serde::Deserialize;
use std::env;

fn default_false() -> bool {
    false
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct Rpc {
    pub url: String,
    #[serde(default)]
    pub ws_url: Option<String>,
    #[serde(default = "default_rpc_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_rpc_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_rpc_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

fn default_rpc_timeout_seconds() -> u64 {
    5
}
fn default_rpc_max_retries() -> u32 {
    3
}
fn default_rpc_backoff_base_ms() -> u64 {
    200
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Wallet {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub private_key: String,
}

/// Factory addresses per protocol. Chain-dependent; empty entries disable
/// discovery for that protocol.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Factories {
    #[serde(default)]
    pub hyperswap_v2: Option<String>,
    #[serde(default)]
    pub hyperswap_v3: Option<String>,
    #[serde(default)]
    pub kittenswap: Option<String>,
    #[serde(default)]
    pub shadow: Option<String>,
    #[serde(default)]
    pub swapx: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Engine {
    /// Upper bound on the gas price used in simulation, in wei.
    #[serde(default = "default_max_gas_price_wei")]
    pub max_gas_price_wei: String,
    /// Minimum net profit (wei of the start token) to forward to the executor.
    #[serde(default = "default_min_profit_threshold_wei")]
    pub min_profit_threshold_wei: String,
    /// Cycle length upper bound H.
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,
    /// Branching factor cap per (from, to) token pair.
    #[serde(default = "default_max_pools_per_hop")]
    pub max_pools_per_hop: usize,
    /// Cycle start tokens (hex addresses). Chain-dependent; required for `run`.
    #[serde(default)]
    pub base_tokens: Vec<String>,
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    /// Opportunity cache TTL in milliseconds.
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
    /// Directory for the pool-state persistence file.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
    /// Re-enumerate all cycles every K blocks.
    #[serde(default = "default_reindex_interval_blocks")]
    pub reindex_interval_blocks: u64,
    /// Slippage allowance applied when quoting, in basis points.
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u32,
}

fn default_max_gas_price_wei() -> String {
    "300000000000".to_string() // 3e11
}
fn default_min_profit_threshold_wei() -> String {
    "1000000000000000".to_string() // 1e15
}
fn default_max_hops() -> usize {
    3
}
fn default_max_pools_per_hop() -> usize {
    5
}
fn default_worker_pool_size() -> usize {
    4
}
fn default_cache_ttl_ms() -> u64 {
    60_000
}
fn default_cache_dir() -> String {
    "./cache".to_string()
}
fn default_reindex_interval_blocks() -> u64 {
    10
}
fn default_slippage_bps() -> u32 {
    50
}

impl Default for Engine {
    fn default() -> Self {
        Self {
            max_gas_price_wei: default_max_gas_price_wei(),
            min_profit_threshold_wei: default_min_profit_threshold_wei(),
            max_hops: default_max_hops(),
            max_pools_per_hop: default_max_pools_per_hop(),
            base_tokens: Vec::new(),
            worker_pool_size: default_worker_pool_size(),
            cache_ttl_ms: default_cache_ttl_ms(),
            cache_dir: default_cache_dir(),
            reindex_interval_blocks: default_reindex_interval_blocks(),
            slippage_bps: default_slippage_bps(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Collector {
    /// Base interval for the getLogs poller; jitter is added on top.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_poll_jitter_ms")]
    pub poll_jitter_ms: u64,
    /// Dedup window capacity; trimmed to half on overflow.
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
    /// Bounded pending-tx queue; overflow drops, blocks never drop.
    #[serde(default = "default_pending_queue_capacity")]
    pub pending_queue_capacity: usize,
    #[serde(default = "default_max_log_block_range")]
    pub max_log_block_range: u64,
    /// Subscribe to pending transaction hashes when the node supports it.
    #[serde(default = "default_true")]
    pub watch_pending_txs: bool,
}

fn default_poll_interval_ms() -> u64 {
    3_000
}
fn default_poll_jitter_ms() -> u64 {
    2_000
}
fn default_dedup_capacity() -> usize {
    10_000
}
fn default_pending_queue_capacity() -> usize {
    4_096
}
fn default_max_log_block_range() -> u64 {
    2_000
}

impl Default for Collector {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            poll_jitter_ms: default_poll_jitter_ms(),
            dedup_capacity: default_dedup_capacity(),
            pending_queue_capacity: default_pending_queue_capacity(),
            max_log_block_range: default_max_log_block_range(),
            watch_pending_txs: default_true(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Optimizer {
    #[serde(default = "default_grid_samples")]
    pub grid_samples: usize,
    /// Convergence tolerance in thousandths of a token (1 = 10^-3 token).
    #[serde(default = "default_tolerance_milli_token")]
    pub tolerance_milli_token: u64,
}

fn default_grid_samples() -> usize {
    10
}
fn default_tolerance_milli_token() -> u64 {
    1
}

impl Default for Optimizer {
    fn default() -> Self {
        Self {
            grid_samples: default_grid_samples(),
            tolerance_milli_token: default_tolerance_milli_token(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Telegram {
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default = "default_false")]
    pub notify_on_execution: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Indexer {
    /// Block chunk size for factory log scans.
    #[serde(default = "default_discovery_chunk_size")]
    pub chunk_size: u64,
    #[serde(default = "default_discovery_concurrency")]
    pub max_concurrency: usize,
    /// How far back to scan for pool-creation events on a cold start.
    #[serde(default = "default_discovery_lookback_blocks")]
    pub lookback_blocks: u64,
    /// Cap on V2 pair enumeration per factory (`allPairs` paging).
    #[serde(default = "default_max_pairs_per_factory")]
    pub max_pairs_per_factory: u64,
}

fn default_discovery_chunk_size() -> u64 {
    10_000
}
fn default_discovery_concurrency() -> usize {
    4
}
fn default_discovery_lookback_blocks() -> u64 {
    500_000
}
fn default_max_pairs_per_factory() -> u64 {
    5_000
}

impl Default for Indexer {
    fn default() -> Self {
        Self {
            chunk_size: default_discovery_chunk_size(),
            max_concurrency: default_discovery_concurrency(),
            lookback_blocks: default_discovery_lookback_blocks(),
            max_pairs_per_factory: default_max_pairs_per_factory(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    /// Multicall3 contract for batched reads; sequential calls when absent.
    #[serde(default)]
    pub multicall_address: Option<String>,
    pub rpc: Rpc,
    #[serde(default)]
    pub wallet: Wallet,
    #[serde(default)]
    pub factories: Factories,
    #[serde(default)]
    pub engine: Engine,
    #[serde(default)]
    pub collector: Collector,
    #[serde(default)]
    pub optimizer: Optimizer,
    #[serde(default)]
    pub indexer: Indexer,
    #[serde(default)]
    pub telegram: Telegram,
}

fn default_chain_id() -> u64 {
    999
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("Config.toml").required(false))
            .add_source(File::with_name("config/default").required(false))
            .build()?;

        let mut settings: Self = s.try_deserialize()?;
        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Environment variables take precedence over file values.
    fn apply_env_overrides(&mut self) {
        if let Ok(chain_id) = env::var("CHAIN_ID") {
            if let Ok(parsed) = chain_id.trim().parse() {
                self.chain_id = parsed;
            }
        }
        if let Ok(pk) = env::var("PRIVATE_KEY") {
            if !pk.trim().is_empty() {
                self.wallet.private_key = pk.trim().to_string();
            }
        }
        if let Ok(addr) = env::var("WALLET_ADDRESS") {
            if !addr.trim().is_empty() {
                self.wallet.address = addr.trim().to_string();
            }
        }
        if let Ok(token) = env::var("TELEGRAM_BOT_TOKEN") {
            if !token.trim().is_empty() {
                self.telegram.bot_token = Some(token.trim().to_string());
            }
        }
        if let Ok(chat) = env::var("TELEGRAM_CHAT_ID") {
            if !chat.trim().is_empty() {
                self.telegram.chat_id = Some(chat.trim().to_string());
            }
        }
    }

    /// Validates everything the `run` command needs. Called at startup;
    /// failures exit the process with code 1.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc.url.trim().is_empty() {
            return Err(ConfigError::Message("rpc.url is required".into()));
        }
        if self.wallet.address.trim().is_empty() {
            return Err(ConfigError::Message("wallet.address is required".into()));
        }
        if self.wallet.private_key.trim().is_empty() {
            return Err(ConfigError::Message("wallet.private_key is required".into()));
        }
        if self.engine.base_tokens.is_empty() {
            return Err(ConfigError::Message(
                "engine.base_tokens must list at least one start token".into(),
            ));
        }
        for raw in &self.engine.base_tokens {
            raw.parse::<Address>().map_err(|_| {
                ConfigError::Message(format!("invalid base token address '{}'", raw))
            })?;
        }
        self.wallet.address.parse::<Address>().map_err(|_| {
            ConfigError::Message(format!("invalid wallet address '{}'", self.wallet.address))
        })?;
        self.max_gas_price()
            .map_err(|e| ConfigError::Message(e))?;
        self.min_profit_threshold()
            .map_err(|e| ConfigError::Message(e))?;
        if self.engine.worker_pool_size == 0 {
            return Err(ConfigError::Message(
                "engine.worker_pool_size must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn max_gas_price(&self) -> Result<U256, String> {
        U256::from_dec_str(self.engine.max_gas_price_wei.trim())
            .map_err(|e| format!("invalid engine.max_gas_price_wei: {}", e))
    }

    pub fn min_profit_threshold(&self) -> Result<U256, String> {
        U256::from_dec_str(self.engine.min_profit_threshold_wei.trim())
            .map_err(|e| format!("invalid engine.min_profit_threshold_wei: {}", e))
    }

    pub fn base_token_addresses(&self) -> Vec<Address> {
        self.engine
            .base_tokens
            .iter()
            .filter_map(|raw| raw.parse().ok())
            .collect()
    }

    pub fn multicall_address(&self) -> Option<Address> {
        self.multicall_address.as_ref()?.parse().ok()
    }

    /// Factory address for a protocol, when configured.
    pub fn factory_for(&self, protocol: crate::types::Protocol) -> Option<Address> {
        use crate::types::Protocol;
        let raw = match protocol {
            Protocol::HyperSwapV2 => self.factories.hyperswap_v2.as_ref(),
            Protocol::HyperSwapV3 => self.factories.hyperswap_v3.as_ref(),
            Protocol::KittenSwap | Protocol::KittenSwapStable => self.factories.kittenswap.as_ref(),
            Protocol::Shadow => self.factories.shadow.as_ref(),
            Protocol::SwapX => self.factories.swapx.as_ref(),
            Protocol::Unknown => None,
        }?;
        raw.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Settings {
        Settings {
            chain_id: 999,
            multicall_address: None,
            rpc: Rpc {
                url: "http://localhost:8545".into(),
                ws_url: None,
                timeout_seconds: 5,
                max_retries: 3,
                backoff_base_ms: 200,
            },
            wallet: Wallet {
                address: "0x00000000000000000000000000000000000000aa".into(),
                private_key: "0xabc".into(),
            },
            factories: Factories::default(),
            engine: Engine {
                base_tokens: vec!["0x00000000000000000000000000000000000000bb".into()],
                ..Engine::default()
            },
            collector: Collector::default(),
            optimizer: Optimizer::default(),
            indexer: Indexer::default(),
            telegram: Telegram::default(),
        }
    }

    #[test]
    fn validate_accepts_minimal_settings() {
        assert!(minimal().validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_base_tokens() {
        let mut s = minimal();
        s.engine.base_tokens.clear();
        assert!(s.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_addresses() {
        let mut s = minimal();
        s.engine.base_tokens = vec!["not-an-address".into()];
        assert!(s.validate().is_err());
    }

    #[test]
    fn wei_defaults_parse() {
        let s = minimal();
        assert_eq!(s.max_gas_price().unwrap(), U256::from(300_000_000_000u64));
        assert_eq!(
            s.min_profit_threshold().unwrap(),
            U256::from(1_000_000_000_000_000u64)
        );
    }
}
