//! # Gas Oracle - Network Conditions over JSON-RPC
//!
//! ## Purpose
//!
//! `NetworkConditions` backed by an `ethers` HTTP provider: block height,
//! EIP-1559 base fee from the latest block header, and a priority fee from
//! `eth_maxPriorityFeePerGas`. Congestion is the latest block's gas used over
//! its gas target (half the limit), floored at 1.
//!
//! Quotes are cached for `cache_ttl_secs`. When the node cannot be reached the
//! last good quote is served, and with no quote at all the configured defaults
//! are, so a flaky node degrades profit estimates instead of halting cycles.
//! Block height has no sensible default and fails as a connectivity error.

use crate::config::{ArbitrageConfig, GasConfig};
use crate::error::{ArbitrageError, Result};
use crate::interfaces::{GasQuote, NetworkConditions};
use anyhow::Context;
use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{BlockNumber, U256};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone)]
struct CachedQuote {
    quote: GasQuote,
    fetched_at: Instant,
}

impl CachedQuote {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() > ttl
    }
}

fn to_decimal(value: U256) -> Decimal {
    Decimal::from_str(&value.to_string()).unwrap_or_default()
}

fn wei_to_gwei(wei: U256) -> Decimal {
    to_decimal(wei) / Decimal::from(1_000_000_000u64)
}

pub struct RpcGasOracle {
    provider: Provider<Http>,
    defaults: GasConfig,
    timeout: Duration,
    cache: RwLock<Option<CachedQuote>>,
}

impl RpcGasOracle {
    pub fn new(config: &ArbitrageConfig) -> anyhow::Result<Self> {
        let timeout = Duration::from_millis(config.network.request_timeout_ms);
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(4)
            .timeout(timeout)
            .tcp_nodelay(true)
            .build()
            .context("Failed to create HTTP client for gas oracle")?;

        let url: Url = config.network.rpc_url.parse().context("Invalid RPC URL")?;
        let provider = Provider::new(Http::new_with_client(url, client));

        info!("⛽ Gas oracle using {}", config.network.rpc_url);
        Ok(Self {
            provider,
            defaults: config.gas.clone(),
            timeout,
            cache: RwLock::new(None),
        })
    }

    fn default_quote(&self) -> GasQuote {
        GasQuote {
            base_fee_gwei: self.defaults.default_base_fee_gwei,
            priority_fee_gwei: self.defaults.default_priority_fee_gwei,
            congestion: Decimal::ONE,
            native_token_price: self.defaults.default_native_token_price,
        }
    }

    async fn fetch_quote(&self) -> anyhow::Result<GasQuote> {
        let block = tokio::time::timeout(self.timeout, self.provider.get_block(BlockNumber::Latest))
            .await
            .context("Latest block request timed out")?
            .context("Failed to fetch latest block")?
            .context("Node returned no latest block")?;

        let base_fee = block
            .base_fee_per_gas
            .map(wei_to_gwei)
            .unwrap_or(self.defaults.default_base_fee_gwei);

        let priority_fee = match tokio::time::timeout(
            self.timeout,
            self.provider.request::<_, U256>("eth_maxPriorityFeePerGas", ()),
        )
        .await
        {
            Ok(Ok(wei)) => wei_to_gwei(wei),
            _ => self.defaults.default_priority_fee_gwei,
        };

        let target = to_decimal(block.gas_limit) / Decimal::TWO;
        let congestion = if target.is_zero() {
            Decimal::ONE
        } else {
            (to_decimal(block.gas_used) / target).max(Decimal::ONE)
        };

        Ok(GasQuote {
            base_fee_gwei: base_fee,
            priority_fee_gwei: priority_fee,
            congestion,
            native_token_price: self.defaults.default_native_token_price,
        })
    }
}

#[async_trait]
impl NetworkConditions for RpcGasOracle {
    async fn current_block(&self) -> Result<u64> {
        tokio::time::timeout(self.timeout, self.provider.get_block_number())
            .await
            .map_err(|_| ArbitrageError::connectivity("rpc", "eth_blockNumber timed out"))?
            .map(|block| block.as_u64())
            .map_err(|e| ArbitrageError::connectivity("rpc", e))
    }

    async fn gas_quote(&self) -> Result<GasQuote> {
        let ttl = Duration::from_secs(self.defaults.cache_ttl_secs);
        let cached = self.cache.read().clone();
        if let Some(cached) = cached.as_ref().filter(|cached| !cached.is_expired(ttl)) {
            return Ok(cached.quote.clone());
        }

        match self.fetch_quote().await {
            Ok(quote) => {
                debug!(
                    "⛽ Gas quote: base {} gwei, priority {} gwei, congestion {}",
                    quote.base_fee_gwei.round_dp(3),
                    quote.priority_fee_gwei.round_dp(3),
                    quote.congestion.round_dp(2)
                );
                *self.cache.write() = Some(CachedQuote {
                    quote: quote.clone(),
                    fetched_at: Instant::now(),
                });
                Ok(quote)
            }
            Err(e) => {
                let stale = cached.map(|cached| cached.quote);
                let fallback = if stale.is_some() { "last quote" } else { "defaults" };
                warn!("⛽ Gas quote unavailable, using {}: {:#}", fallback, e);
                Ok(stale.unwrap_or_else(|| self.default_quote()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_wei_to_gwei() {
        assert_eq!(wei_to_gwei(U256::from(1_500_000_000u64)), dec!(1.5));
        assert_eq!(wei_to_gwei(U256::zero()), dec!(0));
    }

    #[test]
    fn test_cache_expiry() {
        let cached = CachedQuote {
            quote: GasQuote {
                base_fee_gwei: dec!(20),
                priority_fee_gwei: dec!(1),
                congestion: dec!(1),
                native_token_price: dec!(3000),
            },
            fetched_at: Instant::now(),
        };
        assert!(!cached.is_expired(Duration::from_secs(12)));

        let old = CachedQuote {
            fetched_at: Instant::now().checked_sub(Duration::from_secs(20)).unwrap(),
            ..cached
        };
        assert!(old.is_expired(Duration::from_secs(12)));
    }

    #[tokio::test]
    async fn test_unreachable_node_falls_back_to_defaults() {
        let mut config = ArbitrageConfig::default();
        config.network.rpc_url = "http://127.0.0.1:9".to_string();
        config.network.request_timeout_ms = 200;
        let oracle = RpcGasOracle::new(&config).unwrap();

        let quote = oracle.gas_quote().await.unwrap();
        assert_eq!(quote.base_fee_gwei, config.gas.default_base_fee_gwei);
        assert_eq!(quote.priority_fee_gwei, config.gas.default_priority_fee_gwei);
        assert!(oracle.current_block().await.unwrap_err().is_cycle_fatal());
    }
}
