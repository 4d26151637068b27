//! File-backed market data for the CLI and dry runs
//!
//! A JSON document with token metadata and per-pool state:
//!
//! ```json
//! {
//!   "tokens": [{ "address": "0x..", "symbol": "WETH", "decimals": 18, "reference_price": "3000" }],
//!   "pools": [{
//!     "address": "0x..", "venue": "uniswap_v2", "token0": "0x..", "token1": "0x..",
//!     "kind": "uniswap_v2", "fee_bps": 30,
//!     "state": { "constant_product": { "reserve0": "1000", "reserve1": "2000000" } },
//!     "as_of_ms": 1700000000000
//!   }]
//! }
//! ```
//!
//! Pools without `as_of_ms` are reported as fresh at read time.

use crate::error::{ArbitrageError, Result};
use crate::interfaces::{MarketDataSource, PoolMeta, PoolQuote, PoolState};
use crate::snapshot::unix_millis;
use crate::types::{Token, VenueId};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use torq_amm::PoolType;
use tracing::info;

#[derive(Debug, Deserialize)]
struct MarketFile {
    tokens: Vec<Token>,
    pools: Vec<PoolEntry>,
}

#[derive(Debug, Deserialize)]
struct PoolEntry {
    address: String,
    venue: String,
    token0: String,
    token1: String,
    kind: PoolType,
    fee_bps: u32,
    state: PoolState,
    #[serde(default)]
    as_of_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct FileMarketData {
    pools: Vec<PoolMeta>,
    states: HashMap<String, (PoolState, Option<u64>)>,
}

impl FileMarketData {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ArbitrageError::Configuration(format!("Reading {}: {}", path.display(), e))
        })?;
        let market = Self::from_json(&content)?;
        info!(
            "📂 Loaded {} pools from {}",
            market.pools.len(),
            path.display()
        );
        Ok(market)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let file: MarketFile = serde_json::from_str(content)
            .map_err(|e| ArbitrageError::Configuration(format!("Invalid market file: {}", e)))?;

        let tokens: HashMap<String, Token> = file
            .tokens
            .into_iter()
            .map(|mut token| {
                token.address = token.address.to_lowercase();
                (token.address.clone(), token)
            })
            .collect();
        let lookup = |address: &str| {
            tokens.get(&address.to_lowercase()).cloned().ok_or_else(|| {
                ArbitrageError::Configuration(format!("Pool references unknown token {}", address))
            })
        };

        let mut pools = Vec::with_capacity(file.pools.len());
        let mut states = HashMap::with_capacity(file.pools.len());
        for entry in file.pools {
            let address = entry.address.to_lowercase();
            pools.push(PoolMeta {
                address: address.clone(),
                venue: VenueId::new(entry.venue),
                token0: lookup(&entry.token0)?,
                token1: lookup(&entry.token1)?,
                kind: entry.kind,
                fee_bps: entry.fee_bps,
            });
            states.insert(address, (entry.state, entry.as_of_ms));
        }

        Ok(Self { pools, states })
    }
}

#[async_trait]
impl MarketDataSource for FileMarketData {
    async fn get_active_pools(&self) -> Result<Vec<PoolMeta>> {
        Ok(self.pools.clone())
    }

    async fn get_reserves_or_tick_state(&self, pool: &PoolMeta) -> Result<PoolQuote> {
        let (state, as_of_ms) = self
            .states
            .get(&pool.address)
            .ok_or_else(|| ArbitrageError::InvalidPath(format!("Unknown pool {}", pool.address)))?;
        Ok(PoolQuote {
            state: state.clone(),
            as_of_ms: as_of_ms.unwrap_or_else(unix_millis),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    const MARKET: &str = r#"{
        "tokens": [
            { "address": "0x00000000000000000000000000000000000000A0", "symbol": "A", "decimals": 18 },
            { "address": "0x00000000000000000000000000000000000000b0", "symbol": "B", "decimals": 6, "reference_price": "1" }
        ],
        "pools": [{
            "address": "0x0000000000000000000000000000000000000001",
            "venue": "uniswap_v2",
            "token0": "0x00000000000000000000000000000000000000a0",
            "token1": "0x00000000000000000000000000000000000000b0",
            "kind": "uniswap_v2",
            "fee_bps": 30,
            "state": { "constant_product": { "reserve0": "1000", "reserve1": "2000" } },
            "as_of_ms": 42
        }]
    }"#;

    #[tokio::test]
    async fn test_load_market_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MARKET.as_bytes()).unwrap();

        let market = FileMarketData::load(file.path()).unwrap();
        let pools = market.get_active_pools().await.unwrap();
        assert_eq!(pools.len(), 1);
        assert_eq!(pools[0].token0.symbol, "A");
        assert_eq!(pools[0].token0.reference_price, dec!(1));

        let quote = market.get_reserves_or_tick_state(&pools[0]).await.unwrap();
        assert_eq!(quote.as_of_ms, 42);
        assert_eq!(
            quote.state,
            PoolState::ConstantProduct {
                reserve0: dec!(1000),
                reserve1: dec!(2000)
            }
        );
    }

    #[test]
    fn test_unknown_token_rejected() {
        let broken = MARKET.replace(
            "\"token1\": \"0x00000000000000000000000000000000000000b0\"",
            "\"token1\": \"0x00000000000000000000000000000000000000c0\"",
        );
        let err = FileMarketData::from_json(&broken).unwrap_err();
        assert!(err.is_cycle_fatal());
    }
}
