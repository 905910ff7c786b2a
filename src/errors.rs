//! Engine error taxonomy.
//!
//! Transient I/O and bad-data failures are recoverable and stay local to the
//! component that hit them; invariant violations are caught at the worker
//! boundary; configuration errors surface at startup and exit the process.

use ethers::types::Address;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A state event referenced a pool the manager has never seen.
    /// Swap/liquidity events can legitimately arrive before creation;
    /// callers drop these with a warning.
    #[error("unknown pool {0:?}")]
    UnknownPool(Address),

    /// Transient RPC failure (timeout, oversized response, transport error).
    #[error("rpc error: {0}")]
    Rpc(String),

    /// Malformed on-chain data (undecodable log, unreadable metadata).
    #[error("bad data: {0}")]
    BadData(String),

    /// Startup configuration problem. Fatal; process exits non-zero.
    #[error("configuration error: {0}")]
    Config(String),

    /// A logical invariant was broken (path continuity, duplicate insertion).
    /// Caught at the worker boundary and logged at ERROR.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Transaction execution failure, surfaced to the caller.
    #[error("execution failed: {0}")]
    Execution(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Whether the affected operation should be retried with reduced scope
    /// rather than propagated.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Rpc(_))
    }
}
