//! Optimal position sizing for arbitrage routes
//!
//! Route profit as a function of input size is unimodal for chained
//! constant-product and in-range concentrated-liquidity curves, so a
//! golden-section search over `[lower, upper]` converges on the
//! profit-maximizing input without derivatives. Points the quote function
//! cannot price (e.g. a V3 hop leaving its active range) count as infeasible.

use anyhow::{bail, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::trace;

/// 1 / phi
const INV_PHI: Decimal = dec!(0.6180339887498948482045868344);

/// Configuration for position sizing
#[derive(Debug, Clone)]
pub struct SizingConfig {
    /// Maximum golden-section iterations
    pub max_iterations: u32,
    /// Stop once the bracket is narrower than this fraction of the upper bound
    pub relative_tolerance: Decimal,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            max_iterations: 60,
            relative_tolerance: dec!(0.0001),
        }
    }
}

/// Result of optimal position calculation
#[derive(Debug, Clone, PartialEq)]
pub struct OptimalPosition {
    pub amount_in: Decimal,
    pub expected_profit: Decimal,
    pub evaluations: u32,
}

impl OptimalPosition {
    /// Profit per unit of input
    pub fn profit_margin(&self) -> Decimal {
        if self.amount_in == dec!(0) {
            return dec!(0);
        }
        self.expected_profit / self.amount_in
    }
}

/// Calculates profit-maximizing trade sizes
#[derive(Debug, Clone, Default)]
pub struct OptimalSizeCalculator {
    config: SizingConfig,
}

impl OptimalSizeCalculator {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    /// Find the input in `[lower, upper]` that maximizes `profit_fn`.
    ///
    /// Both bounds are evaluated as well, so a profit curve that is still
    /// rising at the cap returns the cap.
    pub fn maximize<F>(&self, lower: Decimal, upper: Decimal, profit_fn: F) -> Result<OptimalPosition>
    where
        F: Fn(Decimal) -> Result<Decimal>,
    {
        if lower < dec!(0) || upper <= lower {
            bail!("Invalid sizing bracket [{}, {}]", lower, upper);
        }

        let mut evaluations = 0u32;
        let mut best: Option<(Decimal, Decimal)> = None;
        let mut evaluate = |amount: Decimal| -> Option<Decimal> {
            evaluations += 1;
            let profit = profit_fn(amount).ok()?;
            if best.map_or(true, |(_, p)| profit > p) {
                best = Some((amount, profit));
            }
            Some(profit)
        };

        evaluate(upper);
        if lower > dec!(0) {
            evaluate(lower);
        }

        let tolerance = upper * self.config.relative_tolerance;
        let (mut a, mut b) = (lower, upper);
        let mut c = b - (b - a) * INV_PHI;
        let mut d = a + (b - a) * INV_PHI;
        let mut fc = evaluate(c);
        let mut fd = evaluate(d);

        for _ in 0..self.config.max_iterations {
            if b - a <= tolerance {
                break;
            }
            // Infeasible points sit past the feasible region's right edge
            let keep_left = match (fc, fd) {
                (Some(pc), Some(pd)) => pc >= pd,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => true,
            };
            if keep_left {
                b = d;
                d = c;
                fd = fc;
                c = b - (b - a) * INV_PHI;
                fc = evaluate(c);
            } else {
                a = c;
                c = d;
                fc = fd;
                d = a + (b - a) * INV_PHI;
                fd = evaluate(d);
            }
        }

        match best {
            Some((amount_in, expected_profit)) => {
                trace!(%amount_in, %expected_profit, evaluations, "golden-section sizing converged");
                Ok(OptimalPosition {
                    amount_in,
                    expected_profit,
                    evaluations,
                })
            }
            None => bail!("No feasible size in [{}, {}]", lower, upper),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AmmPool, V2Math, V2PoolState};

    fn cycle_pools() -> (V2PoolState, V2PoolState) {
        (
            V2PoolState {
                reserve_in: dec!(10000),
                reserve_out: dec!(20000),
                fee_bps: 30,
            },
            V2PoolState {
                reserve_in: dec!(19000),
                reserve_out: dec!(10500),
                fee_bps: 30,
            },
        )
    }

    #[test]
    fn test_golden_section_matches_closed_form() {
        let (pool_a, pool_b) = cycle_pools();
        let closed_form = V2Math::calculate_optimal_arbitrage_amount(&pool_a, &pool_b).unwrap();

        let calculator = OptimalSizeCalculator::default();
        let position = calculator
            .maximize(dec!(0), dec!(5000), |x| {
                Ok(pool_b.get_amount_out(pool_a.get_amount_out(x)?)? - x)
            })
            .unwrap();

        assert!(position.expected_profit > dec!(0));
        assert!((position.amount_in - closed_form).abs() / closed_form < dec!(0.01));
    }

    #[test]
    fn test_monotonic_profit_returns_cap() {
        let calculator = OptimalSizeCalculator::default();
        let position = calculator
            .maximize(dec!(1), dec!(100), |x| Ok(x * dec!(0.01)))
            .unwrap();
        assert_eq!(position.amount_in, dec!(100));
        assert_eq!(position.expected_profit, dec!(1));
    }

    #[test]
    fn test_infeasible_region_is_avoided() {
        let calculator = OptimalSizeCalculator::default();
        let position = calculator
            .maximize(dec!(0), dec!(100), |x| {
                if x > dec!(40) {
                    bail!("out of range");
                }
                Ok(x)
            })
            .unwrap();
        assert!(position.amount_in <= dec!(40));
        assert!(position.amount_in > dec!(39));
    }

    #[test]
    fn test_invalid_bracket_rejected() {
        let calculator = OptimalSizeCalculator::default();
        assert!(calculator.maximize(dec!(10), dec!(5), |x| Ok(x)).is_err());
    }

    #[test]
    fn test_all_infeasible_is_error() {
        let calculator = OptimalSizeCalculator::default();
        let result = calculator.maximize(dec!(0), dec!(10), |_| bail!("never quotes"));
        assert!(result.is_err());
    }
}
