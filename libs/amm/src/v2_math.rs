//! Uniswap V2 AMM math with exact calculations
//!
//! Preserves full precision using Decimal type for accurate slippage
//! and route re-quoting. Reserves are expressed in whole-token units.

use anyhow::{bail, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const BPS_DENOMINATOR: u32 = 10_000;

/// Pool reserves and fee structure for V2 AMMs, oriented in the swap direction
#[derive(Debug, Clone, PartialEq)]
pub struct V2PoolState {
    pub reserve_in: Decimal,
    pub reserve_out: Decimal,
    pub fee_bps: u32, // Fee in basis points (30 = 0.3%)
}

impl V2PoolState {
    /// Same pool, opposite swap direction
    pub fn reversed(&self) -> Self {
        Self {
            reserve_in: self.reserve_out,
            reserve_out: self.reserve_in,
            fee_bps: self.fee_bps,
        }
    }
}

/// V2 AMM math functions with zero precision loss
pub struct V2Math;

impl V2Math {
    /// Fee multiplier, e.g. 30 bps -> 0.997
    pub fn fee_multiplier(fee_bps: u32) -> Result<Decimal> {
        if fee_bps >= BPS_DENOMINATOR {
            bail!("Fee of {} bps leaves nothing to trade", fee_bps);
        }
        Ok(Decimal::from(BPS_DENOMINATOR - fee_bps) / Decimal::from(BPS_DENOMINATOR))
    }

    /// Calculate exact output amount for Uniswap V2 using x*y=k formula
    ///
    /// # Arguments
    /// * `amount_in` - Input token amount
    /// * `reserve_in` - Input token reserve
    /// * `reserve_out` - Output token reserve
    /// * `fee_bps` - Fee in basis points (30 = 0.3%)
    pub fn calculate_output_amount(
        amount_in: Decimal,
        reserve_in: Decimal,
        reserve_out: Decimal,
        fee_bps: u32,
    ) -> Result<Decimal> {
        if amount_in <= dec!(0) {
            bail!("Input amount must be positive");
        }
        if reserve_in <= dec!(0) || reserve_out <= dec!(0) {
            bail!("Reserves must be positive");
        }

        let amount_in_after_fee = amount_in * Self::fee_multiplier(fee_bps)?;

        // output = (amount_in_after_fee * reserve_out) / (reserve_in + amount_in_after_fee)
        let numerator = amount_in_after_fee
            .checked_mul(reserve_out)
            .ok_or_else(|| anyhow::anyhow!("Overflow in V2 output numerator"))?;
        let denominator = reserve_in + amount_in_after_fee;

        Ok(numerator / denominator)
    }

    /// Calculate required input amount for desired output (reverse calculation)
    pub fn calculate_input_amount(
        amount_out: Decimal,
        reserve_in: Decimal,
        reserve_out: Decimal,
        fee_bps: u32,
    ) -> Result<Decimal> {
        if amount_out <= dec!(0) {
            bail!("Output amount must be positive");
        }
        if amount_out >= reserve_out {
            bail!("Insufficient liquidity: output exceeds reserves");
        }

        let numerator = reserve_in * amount_out;
        let denominator = (reserve_out - amount_out) * Self::fee_multiplier(fee_bps)?;

        Ok(numerator / denominator)
    }

    /// Marginal exchange rate for an infinitesimal trade, after the fee
    pub fn spot_rate(reserve_in: Decimal, reserve_out: Decimal, fee_bps: u32) -> Result<Decimal> {
        if reserve_in <= dec!(0) || reserve_out <= dec!(0) {
            bail!("Reserves must be positive");
        }
        Ok(reserve_out / reserve_in * Self::fee_multiplier(fee_bps)?)
    }

    /// Calculate price impact of a trade as a fraction (0.01 = 1%)
    pub fn calculate_price_impact(
        amount_in: Decimal,
        reserve_in: Decimal,
        reserve_out: Decimal,
    ) -> Result<Decimal> {
        if amount_in <= dec!(0) || reserve_in <= dec!(0) || reserve_out <= dec!(0) {
            bail!("Invalid inputs for price impact calculation");
        }

        let price_before = reserve_out / reserve_in;

        let amount_out = Self::calculate_output_amount(amount_in, reserve_in, reserve_out, 0)?;
        let price_after = (reserve_out - amount_out) / (reserve_in + amount_in);

        Ok((price_before - price_after).abs() / price_before)
    }

    /// Slippage as a fraction: shortfall of the actual output versus the
    /// output at the post-fee spot rate
    pub fn calculate_slippage(
        amount_in: Decimal,
        reserve_in: Decimal,
        reserve_out: Decimal,
        fee_bps: u32,
    ) -> Result<Decimal> {
        let ideal_output = amount_in * Self::spot_rate(reserve_in, reserve_out, fee_bps)?;
        let actual_output =
            Self::calculate_output_amount(amount_in, reserve_in, reserve_out, fee_bps)?;

        Ok((ideal_output - actual_output) / ideal_output)
    }

    /// Closed-form input that maximizes `out_b(out_a(x)) - x` for a two-pool cycle.
    ///
    /// x* = (sqrt(r_a_in * r_a_out * r_b_in * r_b_out * fee_a * fee_b) - r_a_in * r_b_in) /
    ///      (fee_a * r_b_in + fee_a * fee_b * r_a_out)
    pub fn calculate_optimal_arbitrage_amount(
        pool_a: &V2PoolState,
        pool_b: &V2PoolState,
    ) -> Result<Decimal> {
        let fee_a = Self::fee_multiplier(pool_a.fee_bps)?;
        let fee_b = Self::fee_multiplier(pool_b.fee_bps)?;

        let product = pool_a.reserve_in * pool_a.reserve_out * fee_a * fee_b;
        let product = product
            .checked_mul(pool_b.reserve_in * pool_b.reserve_out)
            .ok_or_else(|| anyhow::anyhow!("Overflow in optimal arbitrage amount"))?;

        if product <= dec!(0) {
            return Ok(dec!(0));
        }

        let numerator = Self::decimal_sqrt(product)? - pool_a.reserve_in * pool_b.reserve_in;
        let denominator = fee_a * pool_b.reserve_in + fee_a * fee_b * pool_a.reserve_out;

        if numerator <= dec!(0) || denominator <= dec!(0) {
            return Ok(dec!(0));
        }

        Ok(numerator / denominator)
    }

    /// Calculate square root of a Decimal using Newton's method
    pub fn decimal_sqrt(value: Decimal) -> Result<Decimal> {
        if value < dec!(0) {
            bail!("Cannot calculate square root of negative number");
        }
        if value == dec!(0) {
            return Ok(dec!(0));
        }

        let mut x = if value > dec!(1) { value / dec!(2) } else { dec!(1) };
        let epsilon = dec!(0.0000000001);

        for _ in 0..100 {
            let next_x = (x + value / x) / dec!(2);
            if (next_x - x).abs() < epsilon {
                return Ok(next_x);
            }
            x = next_x;
        }

        Ok(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v2_output_calculation() {
        // 100 tokens in, 1000:2000 reserves, 0.3% fee
        let output =
            V2Math::calculate_output_amount(dec!(100), dec!(1000), dec!(2000), 30).unwrap();

        // Expected: ~181.32 tokens out
        assert!((output - dec!(181.32)).abs() < dec!(0.01));
    }

    #[test]
    fn test_input_inverts_output() {
        let output =
            V2Math::calculate_output_amount(dec!(100), dec!(1000), dec!(2000), 30).unwrap();
        let input = V2Math::calculate_input_amount(output, dec!(1000), dec!(2000), 30).unwrap();
        assert!((input - dec!(100)).abs() < dec!(0.000001));
    }

    #[test]
    fn test_input_rejects_draining_reserves() {
        assert!(V2Math::calculate_input_amount(dec!(2000), dec!(1000), dec!(2000), 30).is_err());
    }

    #[test]
    fn test_spot_rate_includes_fee() {
        let rate = V2Math::spot_rate(dec!(1000), dec!(2000), 30).unwrap();
        assert_eq!(rate, dec!(1.994));
    }

    #[test]
    fn test_optimal_arbitrage_amount_beats_neighbours() {
        let pool_a = V2PoolState {
            reserve_in: dec!(10000),
            reserve_out: dec!(20000),
            fee_bps: 30,
        };
        let pool_b = V2PoolState {
            reserve_in: dec!(19000),
            reserve_out: dec!(10500),
            fee_bps: 30,
        };

        let optimal = V2Math::calculate_optimal_arbitrage_amount(&pool_a, &pool_b).unwrap();
        assert!(optimal > dec!(0));

        let profit = |x: Decimal| {
            let mid = V2Math::calculate_output_amount(
                x,
                pool_a.reserve_in,
                pool_a.reserve_out,
                pool_a.fee_bps,
            )
            .unwrap();
            V2Math::calculate_output_amount(
                mid,
                pool_b.reserve_in,
                pool_b.reserve_out,
                pool_b.fee_bps,
            )
            .unwrap()
                - x
        };

        let best = profit(optimal);
        assert!(best > dec!(0));
        assert!(best >= profit(optimal * dec!(0.9)));
        assert!(best >= profit(optimal * dec!(1.1)));
    }

    #[test]
    fn test_no_arbitrage_between_identical_pools() {
        let pool = V2PoolState {
            reserve_in: dec!(10000),
            reserve_out: dec!(20000),
            fee_bps: 30,
        };
        let optimal = V2Math::calculate_optimal_arbitrage_amount(&pool, &pool.reversed()).unwrap();
        assert_eq!(optimal, dec!(0));
    }

    #[test]
    fn test_price_impact_and_slippage_grow_with_size() {
        let small = V2Math::calculate_slippage(dec!(1), dec!(1000), dec!(2000), 30).unwrap();
        let large = V2Math::calculate_slippage(dec!(100), dec!(1000), dec!(2000), 30).unwrap();
        assert!(small < large);

        let impact = V2Math::calculate_price_impact(dec!(100), dec!(1000), dec!(2000)).unwrap();
        assert!(impact > dec!(0) && impact < dec!(0.2));
    }

    #[test]
    fn test_sqrt_accuracy() {
        let result = V2Math::decimal_sqrt(dec!(100)).unwrap();
        assert!((result - dec!(10)).abs() < dec!(0.0001));

        let result = V2Math::decimal_sqrt(dec!(2)).unwrap();
        assert!((result - dec!(1.41421356)).abs() < dec!(0.0001));
    }
}
