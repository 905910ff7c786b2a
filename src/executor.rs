//! Execution boundary. Building router calldata and signing are external
//! concerns; the engine hands a fully optimized opportunity to an
//! [`Executor`] and records the outcome.

use async_trait::async_trait;
use ethers::types::H256;
use tracing::info;

use crate::errors::EngineResult;
use crate::finder::ArbitrageOpportunity;
use crate::optimizer::OptimizedTrade;

#[async_trait]
pub trait Executor: Send + Sync {
    /// Submits the trade. An execution failure is surfaced to the caller and
    /// never evicts anything from pool state.
    async fn execute(
        &self,
        opportunity: &ArbitrageOpportunity,
        trade: &OptimizedTrade,
    ) -> EngineResult<Option<H256>>;
}

/// Default executor: records the would-be trade without touching the chain.
/// Stands in until an external calldata-building executor is wired up.
pub struct DryRunExecutor;

#[async_trait]
impl Executor for DryRunExecutor {
    async fn execute(
        &self,
        opportunity: &ArbitrageOpportunity,
        trade: &OptimizedTrade,
    ) -> EngineResult<Option<H256>> {
        info!(
            "💡 dry-run: cycle {} [{} hops] input {} profit {} gas {}",
            opportunity.id,
            opportunity.path.hops(),
            trade.input_amount,
            trade.quote.profit,
            trade.quote.gas_estimate,
        );
        Ok(None)
    }
}
