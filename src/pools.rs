// src/pools.rs

use ethers::types::{U256, U512};
use ethers::prelude::Address;
use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, EngineResult};
use crate::types::{Direction, Protocol};

/// Unified pool record across all supported DEX protocols.
///
/// The protocol tag selects the pricing rule; the optional state fields are
/// populated per family. Constant-product pools carry `reserves`, concentrated
/// pools carry `liquidity` + `sqrt_price_x96`.
///
/// `generation` strictly increases on each mutation and is stamped by the
/// `PoolStateManager` from its process-wide counter. Readers capture a
/// generation to later answer "has this pool changed?".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pool {
    pub address: Address,
    pub protocol: Protocol,
    pub tokens: [Address; 2],
    #[serde(default)]
    pub fee_bps: Option<u32>,
    #[serde(default, with = "serde_reserves")]
    pub reserves: Option<[U256; 2]>,
    #[serde(default, with = "serde_opt_u128")]
    pub liquidity: Option<u128>,
    #[serde(default, with = "serde_opt_u256")]
    pub sqrt_price_x96: Option<U256>,
    pub generation: u64,
    /// Monotonic wall-clock milliseconds of the last mutation.
    pub last_updated: u64,
}

impl Pool {
    pub fn new(
        address: Address,
        protocol: Protocol,
        token0: Address,
        token1: Address,
    ) -> EngineResult<Self> {
        if token0 == token1 {
            return Err(EngineError::Invariant(format!(
                "pool {:?} lists the same token twice",
                address
            )));
        }
        Ok(Self {
            address,
            protocol,
            tokens: [token0, token1],
            fee_bps: None,
            reserves: None,
            liquidity: None,
            sqrt_price_x96: None,
            generation: 0,
            last_updated: 0,
        })
    }

    pub fn with_fee_bps(mut self, fee_bps: u32) -> Self {
        self.fee_bps = Some(fee_bps);
        self
    }

    pub fn with_reserves(mut self, reserve0: U256, reserve1: U256) -> Self {
        self.reserves = Some([reserve0, reserve1]);
        self
    }

    pub fn with_concentrated_state(mut self, sqrt_price_x96: U256, liquidity: u128) -> Self {
        self.sqrt_price_x96 = Some(sqrt_price_x96);
        self.liquidity = Some(liquidity);
        self
    }

    /// Effective swap fee: the pool's own tier, or the protocol default.
    pub fn fee_bps(&self) -> u32 {
        self.fee_bps.unwrap_or_else(|| self.protocol.default_fee_bps())
    }

    pub fn token0(&self) -> Address {
        self.tokens[0]
    }

    pub fn token1(&self) -> Address {
        self.tokens[1]
    }

    pub fn contains(&self, token: Address) -> bool {
        self.tokens[0] == token || self.tokens[1] == token
    }

    pub fn other_token(&self, token: Address) -> Option<Address> {
        if self.tokens[0] == token {
            Some(self.tokens[1])
        } else if self.tokens[1] == token {
            Some(self.tokens[0])
        } else {
            None
        }
    }

    /// Direction that swaps `token_in` into the opposite token, if the pool
    /// holds `token_in` at all.
    pub fn direction_from(&self, token_in: Address) -> Option<Direction> {
        if self.tokens[0] == token_in {
            Some(Direction::ZeroForOne)
        } else if self.tokens[1] == token_in {
            Some(Direction::OneForZero)
        } else {
            None
        }
    }

    /// (reserve_in, reserve_out) for a constant-product swap in `direction`.
    pub fn reserves_for(&self, direction: Direction) -> Option<(U256, U256)> {
        let [r0, r1] = self.reserves?;
        Some(match direction {
            Direction::ZeroForOne => (r0, r1),
            Direction::OneForZero => (r1, r0),
        })
    }

    /// Liquidity proxy used to rank alternative pools per hop. Constant-product
    /// pools score the geometric mean of their reserves; concentrated pools
    /// score their active liquidity. Comparable only as an ordering heuristic.
    pub fn liquidity_score(&self) -> U256 {
        if let Some([r0, r1]) = self.reserves {
            let product = r0.full_mul(r1);
            integer_sqrt_u512(product)
        } else if let Some(liquidity) = self.liquidity {
            U256::from(liquidity)
        } else {
            U256::zero()
        }
    }

    /// Spot price of token0 in token1, scaled by 1e18, for concentrated pools:
    /// `(sqrtPriceX96)^2 * 1e18 / 2^192`.
    pub fn spot_price_e18(&self) -> Option<U256> {
        let sqrt_price = self.sqrt_price_x96?;
        if sqrt_price.is_zero() {
            return Some(U256::zero());
        }
        let price_x192: U512 = sqrt_price.full_mul(sqrt_price);
        let scaled = price_x192 * U512::from(U256::exp10(18));
        let shifted = scaled >> 192;
        Some(U256::try_from(shifted).unwrap_or(U256::max_value()))
    }

    /// Whether the pool can price a swap in `direction` at all. Zero state is
    /// not an error; it prices to zero out.
    pub fn has_state(&self) -> bool {
        match self.reserves {
            Some(_) => true,
            None => self.sqrt_price_x96.is_some() && self.liquidity.is_some(),
        }
    }
}

/// Integer square root of a 512-bit value, truncated. Newton's method;
/// converges in well under 64 iterations for any input.
pub(crate) fn integer_sqrt_u512(value: U512) -> U256 {
    if value.is_zero() {
        return U256::zero();
    }
    let one = U512::one();
    if value <= U512::from(3u64) {
        return U256::one();
    }
    let mut x = value;
    let mut y = (x + one) >> 1;
    while y < x {
        x = y;
        y = (x + value / x) >> 1;
    }
    U256::try_from(x).unwrap_or(U256::max_value())
}

mod serde_opt_u256 {
    use ethers::types::U256;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<U256>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_some(&v.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<U256>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            Some(s) => U256::from_dec_str(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

mod serde_opt_u128 {
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<u128>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_some(&v.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<u128>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

mod serde_reserves {
    use ethers::types::U256;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<[U256; 2]>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some([r0, r1]) => serializer.serialize_some(&[r0.to_string(), r1.to_string()]),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<[U256; 2]>, D::Error> {
        let raw: Option<[String; 2]> = Option::deserialize(deserializer)?;
        match raw {
            Some([a, b]) => {
                let r0 = U256::from_dec_str(&a).map_err(serde::de::Error::custom)?;
                let r1 = U256::from_dec_str(&b).map_err(serde::de::Error::custom)?;
                Ok(Some([r0, r1]))
            }
            None => Ok(None),
        }
    }
}
