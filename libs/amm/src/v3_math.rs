//! Uniswap V3 concentrated-liquidity math
//!
//! Swaps are priced exactly inside the active tick range using the
//! `L`/`sqrtP` invariants. A swap that would leave the active range is
//! rejected rather than approximated, so callers treat it as insufficient
//! liquidity. All amounts here are raw token units (no decimal scaling).

use anyhow::{anyhow, bail, Result};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// V3 tick math constants
pub const MIN_TICK: i32 = -887272;
pub const MAX_TICK: i32 = 887272;

const PIPS_DENOMINATOR: u32 = 1_000_000;

/// V3 pool state with concentrated liquidity
#[derive(Debug, Clone, PartialEq)]
pub struct V3PoolState {
    pub liquidity: u128,
    pub sqrt_price_x96: u128,
    pub current_tick: i32,
    pub fee_pips: u32, // Fee in pips (3000 = 0.3%)
    /// Bounds of the active liquidity range, when known
    pub tick_lower: Option<i32>,
    pub tick_upper: Option<i32>,
}

/// Result of a single-range V3 swap
#[derive(Debug, Clone, PartialEq)]
pub struct V3SwapResult {
    pub amount_out: Decimal,
    pub sqrt_price_before: Decimal,
    pub sqrt_price_after: Decimal,
    pub fee_paid: Decimal,
}

/// V3 AMM math with within-range calculations
pub struct V3Math;

impl V3Math {
    /// Convert a Q64.96 sqrt price to a Decimal sqrt price (token1 per token0, raw units)
    pub fn sqrt_price_from_x96(sqrt_price_x96: u128) -> Result<Decimal> {
        if sqrt_price_x96 == 0 {
            bail!("sqrt price must be positive");
        }
        // 2^96 itself exceeds Decimal::MAX, so scale through f64
        let value = sqrt_price_x96 as f64 / 2f64.powi(96);
        Decimal::from_f64(value).ok_or_else(|| anyhow!("sqrt price {} not representable", value))
    }

    /// sqrt(1.0001^tick)
    pub fn sqrt_price_at_tick(tick: i32) -> Result<Decimal> {
        if !(MIN_TICK..=MAX_TICK).contains(&tick) {
            bail!("Tick {} outside [{}, {}]", tick, MIN_TICK, MAX_TICK);
        }
        let value = 1.0001f64.powf(tick as f64 / 2.0);
        Decimal::from_f64(value).ok_or_else(|| anyhow!("sqrt price at tick {} not representable", tick))
    }

    /// Approximate tick for a sqrt price (floor of log_1.0001(price))
    pub fn tick_at_sqrt_price(sqrt_price: Decimal) -> Result<i32> {
        let value = sqrt_price
            .to_f64()
            .filter(|v| *v > 0.0)
            .ok_or_else(|| anyhow!("Invalid sqrt price {}", sqrt_price))?;
        let tick = (2.0 * value.ln() / 1.0001f64.ln()).floor();
        Ok((tick as i64).clamp(MIN_TICK as i64, MAX_TICK as i64) as i32)
    }

    fn liquidity(pool: &V3PoolState) -> Result<Decimal> {
        if pool.liquidity == 0 {
            bail!("No liquidity in active range");
        }
        Decimal::from_u128(pool.liquidity)
            .ok_or_else(|| anyhow!("Liquidity {} exceeds Decimal range", pool.liquidity))
    }

    fn fee_multiplier(fee_pips: u32) -> Result<Decimal> {
        if fee_pips >= PIPS_DENOMINATOR {
            bail!("Fee of {} pips leaves nothing to trade", fee_pips);
        }
        Ok(Decimal::from(PIPS_DENOMINATOR - fee_pips) / Decimal::from(PIPS_DENOMINATOR))
    }

    /// Calculate exact V3 swap output for a given input inside the active range
    ///
    /// zero_for_one: sqrtP' = L * sqrtP / (L + dx * sqrtP),  dy = L * (sqrtP - sqrtP')
    /// one_for_zero: sqrtP' = sqrtP + dy / L,                dx = L * (1/sqrtP - 1/sqrtP')
    pub fn calculate_output_amount(
        amount_in: Decimal,
        pool: &V3PoolState,
        zero_for_one: bool,
    ) -> Result<V3SwapResult> {
        if amount_in <= dec!(0) {
            bail!("Input amount must be positive");
        }

        let liquidity = Self::liquidity(pool)?;
        let sqrt_price = Self::sqrt_price_from_x96(pool.sqrt_price_x96)?;
        let amount_after_fee = amount_in * Self::fee_multiplier(pool.fee_pips)?;
        let fee_paid = amount_in - amount_after_fee;

        let (amount_out, sqrt_price_after) = if zero_for_one {
            let scaled_in = amount_after_fee
                .checked_mul(sqrt_price)
                .ok_or_else(|| anyhow!("Overflow in V3 input scaling"))?;
            let numerator = liquidity
                .checked_mul(sqrt_price)
                .ok_or_else(|| anyhow!("Overflow in V3 price update"))?;
            let sqrt_price_after = numerator / (liquidity + scaled_in);

            if let Some(lower) = pool.tick_lower {
                if sqrt_price_after < Self::sqrt_price_at_tick(lower)? {
                    bail!("Swap crosses lower bound of active range (tick {})", lower);
                }
            }

            (liquidity * (sqrt_price - sqrt_price_after), sqrt_price_after)
        } else {
            let sqrt_price_after = sqrt_price + amount_after_fee / liquidity;

            if let Some(upper) = pool.tick_upper {
                if sqrt_price_after > Self::sqrt_price_at_tick(upper)? {
                    bail!("Swap crosses upper bound of active range (tick {})", upper);
                }
            }

            let amount_out = liquidity * (Decimal::ONE / sqrt_price - Decimal::ONE / sqrt_price_after);
            (amount_out, sqrt_price_after)
        };

        Ok(V3SwapResult {
            amount_out,
            sqrt_price_before: sqrt_price,
            sqrt_price_after,
            fee_paid,
        })
    }

    /// Marginal post-fee rate in the swap direction (raw units)
    pub fn spot_rate(pool: &V3PoolState, zero_for_one: bool) -> Result<Decimal> {
        let sqrt_price = Self::sqrt_price_from_x96(pool.sqrt_price_x96)?;
        let price = sqrt_price * sqrt_price;
        let fee = Self::fee_multiplier(pool.fee_pips)?;
        if zero_for_one {
            Ok(price * fee)
        } else {
            Ok(fee / price)
        }
    }

    /// Virtual reserves (x, y) = (L / sqrtP, L * sqrtP) of the active range
    pub fn virtual_reserves(pool: &V3PoolState) -> Result<(Decimal, Decimal)> {
        let liquidity = Self::liquidity(pool)?;
        let sqrt_price = Self::sqrt_price_from_x96(pool.sqrt_price_x96)?;
        let reserve1 = liquidity
            .checked_mul(sqrt_price)
            .ok_or_else(|| anyhow!("Overflow computing virtual reserves"))?;
        Ok((liquidity / sqrt_price, reserve1))
    }

    /// Price impact of a swap as a fraction of the starting price
    pub fn calculate_price_impact(
        amount_in: Decimal,
        pool: &V3PoolState,
        zero_for_one: bool,
    ) -> Result<Decimal> {
        let swap = Self::calculate_output_amount(amount_in, pool, zero_for_one)?;
        let before = swap.sqrt_price_before * swap.sqrt_price_before;
        let after = swap.sqrt_price_after * swap.sqrt_price_after;
        Ok((before - after).abs() / before)
    }

    /// Slippage versus the post-fee spot rate, as a fraction
    pub fn calculate_slippage(
        amount_in: Decimal,
        pool: &V3PoolState,
        zero_for_one: bool,
    ) -> Result<Decimal> {
        let ideal = amount_in * Self::spot_rate(pool, zero_for_one)?;
        let actual = Self::calculate_output_amount(amount_in, pool, zero_for_one)?.amount_out;
        Ok((ideal - actual) / ideal)
    }
}
