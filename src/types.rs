//! Common types shared across the engine: tokens, protocol tags, swap hints.

use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};

/// An ERC-20 token as seen by the engine.
///
/// Tokens are created on first sighting (indexer discovery or metadata read)
/// and live for the process. `decimals` is immutable once set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
}

impl Token {
    /// Placeholder token used when on-chain metadata is unreadable.
    /// Bad metadata is a WARN, not a fatal error.
    pub fn unknown(address: Address) -> Self {
        Self {
            address,
            symbol: format!("UNK-{}", short_address(&address)),
            decimals: 18,
        }
    }

    /// One whole token in wei units.
    pub fn one(&self) -> U256 {
        U256::exp10(self.decimals as usize)
    }
}

/// DEX protocol identifier.
///
/// Each variant carries its pricing rule: constant-product for the V2-style
/// protocols, the simplified spot model for the concentrated-liquidity ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Protocol {
    HyperSwapV2,
    HyperSwapV3,
    KittenSwap,
    KittenSwapStable,
    Shadow,
    SwapX,
    #[default]
    Unknown,
}

impl Protocol {
    /// Default swap fee in basis points when the pool does not carry its own.
    pub fn default_fee_bps(&self) -> u32 {
        match self {
            Protocol::HyperSwapV2 => 30,
            Protocol::KittenSwap | Protocol::KittenSwapStable => 25,
            Protocol::HyperSwapV3 | Protocol::Shadow | Protocol::SwapX => 30,
            Protocol::Unknown => 30,
        }
    }

    /// Per-hop gas for the swap call, excluding the 21k transaction base.
    pub fn gas_per_hop(&self) -> u64 {
        match self {
            Protocol::HyperSwapV2 => 60_000,
            Protocol::HyperSwapV3 | Protocol::Shadow | Protocol::SwapX => 100_000,
            Protocol::KittenSwap | Protocol::KittenSwapStable => 80_000,
            Protocol::Unknown => 80_000,
        }
    }

    /// Whether the protocol prices from `sqrtPriceX96` + active liquidity
    /// rather than raw reserves.
    pub fn is_concentrated(&self) -> bool {
        matches!(
            self,
            Protocol::HyperSwapV3 | Protocol::Shadow | Protocol::SwapX
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::HyperSwapV2 => "HyperSwapV2",
            Protocol::HyperSwapV3 => "HyperSwapV3",
            Protocol::KittenSwap => "KittenSwap",
            Protocol::KittenSwapStable => "KittenSwapStable",
            Protocol::Shadow => "Shadow",
            Protocol::SwapX => "SwapX",
            Protocol::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Protocol {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "HyperSwapV2" => Protocol::HyperSwapV2,
            "HyperSwapV3" => Protocol::HyperSwapV3,
            "KittenSwap" => Protocol::KittenSwap,
            "KittenSwapStable" => Protocol::KittenSwapStable,
            "Shadow" => Protocol::Shadow,
            "SwapX" => Protocol::SwapX,
            _ => Protocol::Unknown,
        })
    }
}

/// Swap direction through a two-token pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// token0 in, token1 out
    ZeroForOne,
    /// token1 in, token0 out
    OneForZero,
}

impl Direction {
    pub fn flip(&self) -> Self {
        match self {
            Direction::ZeroForOne => Direction::OneForZero,
            Direction::OneForZero => Direction::ZeroForOne,
        }
    }

    /// Byte tag used in path fingerprints.
    pub fn tag(&self) -> u8 {
        match self {
            Direction::ZeroForOne => 0,
            Direction::OneForZero => 1,
        }
    }
}

/// Where an opportunity candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OpportunitySource {
    #[default]
    Public,
    Mempool,
    Private,
}

impl std::fmt::Display for OpportunitySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpportunitySource::Public => write!(f, "public"),
            OpportunitySource::Mempool => write!(f, "mempool"),
            OpportunitySource::Private => write!(f, "private"),
        }
    }
}

/// Pre-decoded swap hint handed to the engine by an external router decoder.
///
/// The core never decodes calldata itself; it only consumes these hints to
/// seed targeted `(start_token, seed_pool)` candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapInfo {
    pub start_token: Address,
    pub seed_pool: Address,
    pub amount_hint: Option<U256>,
}

/// A mined block header as seen by the collector. Only the fields the
/// engine consumes; full blocks stay behind the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEvent {
    pub number: u64,
    pub hash: ethers::types::H256,
    pub timestamp: u64,
}

/// Canonical key for an unordered token pair: `min(a,b)-max(a,b)`,
/// lowercased hex. Used by the pair index and the graph.
pub fn pair_key(a: Address, b: Address) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{:#x}-{:#x}", lo, hi)
}

/// Short display form of an address (`0x1234..abcd`), for log lines.
pub fn short_address(addr: &Address) -> String {
    let full = format!("{:#x}", addr);
    if full.len() > 12 {
        format!("{}..{}", &full[..6], &full[full.len() - 4..])
    } else {
        full
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_key_is_order_independent() {
        let a: Address = "0x00000000000000000000000000000000000000aa"
            .parse()
            .unwrap();
        let b: Address = "0x00000000000000000000000000000000000000bb"
            .parse()
            .unwrap();
        assert_eq!(pair_key(a, b), pair_key(b, a));
        assert!(pair_key(a, b).starts_with("0x"));
        // min always first
        assert!(pair_key(a, b).find("aa").unwrap() < pair_key(a, b).find("bb").unwrap());
    }

    #[test]
    fn protocol_defaults_match_pricing_rules() {
        assert_eq!(Protocol::HyperSwapV2.default_fee_bps(), 30);
        assert_eq!(Protocol::KittenSwap.default_fee_bps(), 25);
        assert_eq!(Protocol::KittenSwapStable.default_fee_bps(), 25);
        assert!(Protocol::Shadow.is_concentrated());
        assert!(!Protocol::KittenSwap.is_concentrated());
        assert_eq!(Protocol::HyperSwapV2.gas_per_hop(), 60_000);
        assert_eq!(Protocol::HyperSwapV3.gas_per_hop(), 100_000);
    }

    #[test]
    fn direction_flip_roundtrips() {
        assert_eq!(Direction::ZeroForOne.flip(), Direction::OneForZero);
        assert_eq!(Direction::ZeroForOne.flip().flip(), Direction::ZeroForOne);
    }
}
