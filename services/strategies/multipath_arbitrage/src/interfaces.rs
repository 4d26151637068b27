//! External collaborator seams
//!
//! The engine never reaches a chain, a relay, or a data feed directly; it
//! talks to these traits. Production implementations live in
//! `file_market_data`, `gas_price`, `wallet`, `flash_loan` and the `mev`
//! crate; `testing` carries in-memory ones.

use crate::error::Result;
use crate::types::{Token, VenueId};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use torq_amm::PoolType;

pub use mev::PrivateRelay;

/// Static pool metadata from the DEX registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolMeta {
    /// Lowercase 0x-prefixed address
    pub address: String,
    pub venue: VenueId,
    pub token0: Token,
    pub token1: Token,
    pub kind: PoolType,
    /// Fee tier in basis points
    pub fee_bps: u32,
}

/// Pricing state of a pool. Constant-product reserves are whole tokens;
/// concentrated-liquidity values are raw on-chain integers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolState {
    ConstantProduct {
        reserve0: Decimal,
        reserve1: Decimal,
    },
    Concentrated {
        sqrt_price_x96: u128,
        liquidity: u128,
        tick: i32,
        #[serde(default)]
        tick_lower: Option<i32>,
        #[serde(default)]
        tick_upper: Option<i32>,
    },
}

/// Pool state together with the time the source observed it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolQuote {
    pub state: PoolState,
    pub as_of_ms: u64,
}

/// Market data / DEX registry
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn get_active_pools(&self) -> Result<Vec<PoolMeta>>;

    async fn get_reserves_or_tick_state(&self, pool: &PoolMeta) -> Result<PoolQuote>;
}

/// Flash loan liquidity source
#[async_trait]
pub trait FlashLoanProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Contract the borrow and repay legs are routed through
    fn contract_address(&self) -> &str;

    /// Largest loan available, in whole tokens
    async fn max_loan(&self, token: &Token) -> Result<Decimal>;

    async fn fee_bps(&self, token: &Token, amount: Decimal) -> Result<u32>;
}

/// Current gas market, in gwei, plus the native token price in currency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasQuote {
    pub base_fee_gwei: Decimal,
    pub priority_fee_gwei: Decimal,
    /// 1.0 = blocks at target; higher means congested
    pub congestion: Decimal,
    pub native_token_price: Decimal,
}

impl GasQuote {
    /// Currency cost of `gas_units` at base + priority fee
    pub fn cost_of(&self, gas_units: u64) -> Decimal {
        self.cost_with_priority(gas_units, self.priority_fee_gwei)
    }

    pub fn cost_with_priority(&self, gas_units: u64, priority_fee_gwei: Decimal) -> Decimal {
        let gwei = Decimal::from(gas_units) * (self.base_fee_gwei + priority_fee_gwei);
        gwei / Decimal::from(1_000_000_000u64) * self.native_token_price
    }
}

#[async_trait]
pub trait NetworkConditions: Send + Sync {
    async fn current_block(&self) -> Result<u64>;

    async fn gas_quote(&self) -> Result<GasQuote>;
}

/// Searcher wallet view
#[async_trait]
pub trait WalletBalances: Send + Sync {
    /// Balance in whole tokens
    async fn balance_of(&self, token: &Token) -> Result<Decimal>;

    async fn next_nonce(&self) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_gas_cost_in_currency() {
        let quote = GasQuote {
            base_fee_gwei: dec!(20),
            priority_fee_gwei: dec!(2),
            congestion: dec!(1),
            native_token_price: dec!(3000),
        };
        // 300k gas * 22 gwei = 0.0066 native * 3000
        assert_eq!(quote.cost_of(300_000), dec!(19.8));
        assert_eq!(quote.cost_with_priority(300_000, dec!(0)), dec!(18));
    }

    #[test]
    fn test_pool_state_json_shape() {
        let state: PoolState = serde_json::from_str(
            r#"{"concentrated":{"sqrt_price_x96":79228162514264337593543950336,"liquidity":1000,"tick":0}}"#,
        )
        .unwrap();
        assert!(matches!(
            state,
            PoolState::Concentrated {
                tick: 0,
                tick_lower: None,
                ..
            }
        ));
    }
}
