//! # Input-Size Optimizer
//!
//! Chooses the input amount that maximizes net profit for a candidate path.
//!
//! Two stages:
//! 1. a coarse grid over `[10⁻³, 1.0]` tokens (scaled by the start token's
//!    decimals), evaluated in parallel against the memoized simulator;
//! 2. when the best grid point is profitable, golden-section refinement over
//!    `[best/2, best*2]` down to a configurable tolerance.
//!
//! The profit curve is treated as unimodal inside the refinement interval,
//! an approximation the tolerance absorbs. The golden ratio is applied as the
//! integer ratio `1_618_033_988_749_895 / 10¹⁵`; amounts never pass through
//! floating point, so identical inputs at identical pool generations return
//! identical results.

use std::sync::Arc;
use std::time::Instant;

use ethers::types::{U256, U512};
use rayon::prelude::*;

use crate::metrics;
use crate::simulator::{Quote, TradeSimulator};
use crate::token_graph::Path;

/// φ scaled by 1e15.
const PHI_NUM: u64 = 1_618_033_988_749_895;
const PHI_SCALE: u64 = 1_000_000_000_000_000;
/// 1/φ = φ - 1, same scale.
const INV_PHI_NUM: u64 = PHI_NUM - PHI_SCALE;
/// Hard cap on golden-section iterations; the interval shrinks by ~0.618 per
/// step, so this is never reached with sane tolerances.
const MAX_REFINE_ITERATIONS: usize = 200;

#[derive(Debug, Clone, Copy)]
pub struct OptimizerConfig {
    pub grid_samples: usize,
    /// Convergence tolerance in thousandths of a token.
    pub tolerance_milli_token: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            grid_samples: 10,
            tolerance_milli_token: 1,
        }
    }
}

/// Outcome of an optimization run. `profit` is zero when no input size in the
/// search range clears gas and fees.
#[derive(Debug, Clone, Copy, Default)]
pub struct OptimizedTrade {
    pub input_amount: U256,
    pub quote: Quote,
}

impl OptimizedTrade {
    pub fn profit(&self) -> U256 {
        self.quote.profit
    }

    pub fn is_profitable(&self) -> bool {
        !self.quote.profit.is_zero()
    }
}

pub struct Optimizer {
    simulator: Arc<TradeSimulator>,
    config: OptimizerConfig,
}

impl Optimizer {
    pub fn new(simulator: Arc<TradeSimulator>, config: OptimizerConfig) -> Self {
        Self { simulator, config }
    }

    /// Searches for the profit-maximizing input over the default range
    /// `[10^(decimals-3), 10^decimals]` wei of the start token.
    pub fn optimize(
        &self,
        path: &Path,
        start_token_decimals: u8,
        gas_price: U256,
        slippage_bps: u32,
    ) -> OptimizedTrade {
        let decimals = start_token_decimals as usize;
        let min = if decimals >= 3 {
            U256::exp10(decimals - 3)
        } else {
            U256::one()
        };
        let max = U256::exp10(decimals);
        let tolerance = min.saturating_mul(U256::from(self.config.tolerance_milli_token.max(1)));
        self.optimize_in_range(path, min, max, tolerance, gas_price, slippage_bps)
    }

    /// Grid + golden-section over an explicit `[min, max]` range.
    pub fn optimize_in_range(
        &self,
        path: &Path,
        min: U256,
        max: U256,
        tolerance: U256,
        gas_price: U256,
        slippage_bps: u32,
    ) -> OptimizedTrade {
        if path.is_empty() || min > max {
            return OptimizedTrade::default();
        }
        let started = Instant::now();

        let samples = self.config.grid_samples.max(2);
        let span = max - min;
        let amounts: Vec<U256> = (0..samples)
            .map(|i| {
                let offset: U512 = span.full_mul(U256::from(i as u64));
                let offset =
                    U256::try_from(offset / U512::from((samples - 1) as u64)).unwrap_or(span);
                min + offset
            })
            .collect();

        // Parallel grid evaluation; the simulator memo makes repeat points
        // free for the refinement stage.
        let best_grid = amounts
            .par_iter()
            .map(|&amount| OptimizedTrade {
                input_amount: amount,
                quote: self.simulator.simulate(path, amount, gas_price, slippage_bps),
            })
            .reduce(OptimizedTrade::default, better_of);

        if !best_grid.is_profitable() {
            metrics::record_optimize_ms(started.elapsed().as_secs_f64() * 1_000.0);
            return OptimizedTrade {
                input_amount: best_grid.input_amount,
                quote: Quote::default(),
            };
        }

        let refined = self.golden_section(
            path,
            best_grid,
            (best_grid.input_amount / 2).max(min),
            best_grid.input_amount.saturating_mul(U256::from(2u64)),
            tolerance,
            gas_price,
            slippage_bps,
        );
        metrics::record_optimize_ms(started.elapsed().as_secs_f64() * 1_000.0);
        refined
    }

    #[allow(clippy::too_many_arguments)]
    fn golden_section(
        &self,
        path: &Path,
        mut best: OptimizedTrade,
        mut a: U256,
        mut b: U256,
        tolerance: U256,
        gas_price: U256,
        slippage_bps: u32,
    ) -> OptimizedTrade {
        let tolerance = tolerance.max(U256::one());
        let mut evaluate = |amount: U256| -> OptimizedTrade {
            OptimizedTrade {
                input_amount: amount,
                quote: self.simulator.simulate(path, amount, gas_price, slippage_bps),
            }
        };

        for _ in 0..MAX_REFINE_ITERATIONS {
            if b.saturating_sub(a) <= tolerance {
                break;
            }
            let width = b - a;
            let step = golden_step(width);
            let lower = b - step;
            let upper = a + step;

            let at_lower = evaluate(lower);
            let at_upper = evaluate(upper);
            best = better_of(best, better_of(at_lower, at_upper));

            if at_lower.quote.profit >= at_upper.quote.profit {
                b = upper;
            } else {
                a = lower;
            }
        }
        best
    }
}

/// `width * (1/φ)` in pure integer math.
fn golden_step(width: U256) -> U256 {
    let scaled: U512 = width.full_mul(U256::from(INV_PHI_NUM));
    U256::try_from(scaled / U512::from(PHI_SCALE)).unwrap_or(width)
}

/// Higher profit wins; ties prefer the smaller input (less capital at risk).
fn better_of(left: OptimizedTrade, right: OptimizedTrade) -> OptimizedTrade {
    if right.quote.profit > left.quote.profit
        || (right.quote.profit == left.quote.profit
            && !right.input_amount.is_zero()
            && (left.input_amount.is_zero() || right.input_amount < left.input_amount))
    {
        right
    } else {
        left
    }
}
