//! # Torq AMM Library - Exact Venue Pricing
//!
//! ## Purpose
//!
//! Exact quoting for the two curve families the arbitrage engine trades against:
//! constant-product pools (Uniswap V2 style, `x*y=k`) and concentrated-liquidity pools
//! (Uniswap V3 style, swaps priced inside the active tick range). All amounts are
//! `Decimal` so that re-quotes in the optimizer never go through a linear approximation.
//!
//! ## Integration Points
//!
//! - **Path discovery**: marginal post-fee spot rates feed the `-ln(rate)` edge weights
//! - **Path optimization**: exact multi-leg output, slippage and price impact per hop
//! - **Sizing**: golden-section search for the profit-maximizing input of a route
//! - **Risk**: virtual reserve depth for liquidity-depth ratios
//!
//! ## Architecture Role
//!
//! ```text
//! Pool State (reserves | sqrtPrice, liquidity)
//!        ↓
//! [V2Math | V3Math] → AmmPool::get_amount_out → OptimalSizeCalculator
//!        ↓                     ↓                          ↓
//!   Spot rates           Route re-quotes           Profit-maximizing size
//! ```

pub mod optimal_size;
pub mod pool_traits;
pub mod v2_math;
pub mod v3_math;

pub use optimal_size::{OptimalPosition, OptimalSizeCalculator, SizingConfig};
pub use pool_traits::{AmmPool, DirectedV3Pool, PoolType};
pub use v2_math::{V2Math, V2PoolState};
pub use v3_math::{V3Math, V3PoolState, V3SwapResult};

/// Common types for AMM calculations
pub use rust_decimal::Decimal;
pub use rust_decimal_macros::dec;

/// `10^decimals` as a `Decimal`, used to move between whole-token and raw units.
pub fn pow10(decimals: u8) -> Decimal {
    let mut value = Decimal::ONE;
    for _ in 0..decimals {
        value *= Decimal::TEN;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pow10() {
        assert_eq!(pow10(0), dec!(1));
        assert_eq!(pow10(6), dec!(1000000));
        assert_eq!(pow10(18), dec!(1000000000000000000));
    }
}
