//! Pool trait definitions for unified AMM interface
//!
//! Every implementation quotes in whole-token units oriented in the swap
//! direction, so a path can chain hops without caring about pool kind.

use crate::{pow10, Decimal, V2Math, V2PoolState, V3Math, V3PoolState};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Pool type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolType {
    UniswapV2,
    UniswapV3,
}

/// Unified pool interface for path quoting
pub trait AmmPool {
    fn pool_type(&self) -> PoolType;

    /// Calculate output amount for given input
    fn get_amount_out(&self, amount_in: Decimal) -> Result<Decimal>;

    /// Post-fee marginal rate (output per unit input)
    fn spot_rate(&self) -> Result<Decimal>;

    /// Input-side depth used to judge how far a trade moves the pool
    fn depth(&self) -> Result<Decimal>;

    /// Fee as a fraction (0.003 = 0.3%)
    fn fee_fraction(&self) -> Decimal;

    /// Shortfall of the actual output versus the spot-rate output, as a fraction
    fn slippage(&self, amount_in: Decimal) -> Result<Decimal> {
        let ideal = amount_in * self.spot_rate()?;
        if ideal <= Decimal::ZERO {
            bail!("Pool quotes zero output");
        }
        let actual = self.get_amount_out(amount_in)?;
        Ok((ideal - actual) / ideal)
    }
}

impl AmmPool for V2PoolState {
    fn pool_type(&self) -> PoolType {
        PoolType::UniswapV2
    }

    fn get_amount_out(&self, amount_in: Decimal) -> Result<Decimal> {
        V2Math::calculate_output_amount(amount_in, self.reserve_in, self.reserve_out, self.fee_bps)
    }

    fn spot_rate(&self) -> Result<Decimal> {
        V2Math::spot_rate(self.reserve_in, self.reserve_out, self.fee_bps)
    }

    fn depth(&self) -> Result<Decimal> {
        Ok(self.reserve_in)
    }

    fn fee_fraction(&self) -> Decimal {
        Decimal::from(self.fee_bps) / Decimal::from(10_000)
    }
}

/// A V3 pool bound to a swap direction and the decimals of both tokens
#[derive(Debug, Clone, PartialEq)]
pub struct DirectedV3Pool {
    pub state: V3PoolState,
    pub zero_for_one: bool,
    pub decimals_in: u8,
    pub decimals_out: u8,
}

impl DirectedV3Pool {
    pub fn new(state: V3PoolState, zero_for_one: bool, decimals_in: u8, decimals_out: u8) -> Self {
        Self {
            state,
            zero_for_one,
            decimals_in,
            decimals_out,
        }
    }
}

impl AmmPool for DirectedV3Pool {
    fn pool_type(&self) -> PoolType {
        PoolType::UniswapV3
    }

    fn get_amount_out(&self, amount_in: Decimal) -> Result<Decimal> {
        let raw_in = amount_in * pow10(self.decimals_in);
        let swap = V3Math::calculate_output_amount(raw_in, &self.state, self.zero_for_one)?;
        Ok(swap.amount_out / pow10(self.decimals_out))
    }

    fn spot_rate(&self) -> Result<Decimal> {
        let raw_rate = V3Math::spot_rate(&self.state, self.zero_for_one)?;
        Ok(raw_rate * pow10(self.decimals_in) / pow10(self.decimals_out))
    }

    fn depth(&self) -> Result<Decimal> {
        let (reserve0, reserve1) = V3Math::virtual_reserves(&self.state)?;
        let raw_in = if self.zero_for_one { reserve0 } else { reserve1 };
        Ok(raw_in / pow10(self.decimals_in))
    }

    fn fee_fraction(&self) -> Decimal {
        Decimal::from(self.state.fee_pips) / Decimal::from(1_000_000)
    }
}
