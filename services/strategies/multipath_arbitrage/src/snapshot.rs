//! # Market Snapshot - Per-Cycle Token/Pool Arena
//!
//! ## Purpose
//!
//! Immutable view of the market for one discovery cycle. Tokens and pools live
//! in `Vec` arenas addressed by `TokenId` / `PoolId`; every pool contributes two
//! directed edges weighted `-ln(rate·(1-fee))`, so a profitable loop is a
//! negative-weight cycle. The snapshot is built once, shared as
//! `Arc<MarketSnapshot>`, and dropped at the end of the cycle.
//!
//! ## Integration Points
//!
//! - **Input**: `MarketDataSource::get_active_pools` + `get_reserves_or_tick_state`
//! - **Output**: PathFinder (edges, adjacency), PathOptimizer (pool metadata, directed pools)
//! - **Degradation**: stale or unpriceable pools are left out and reported, never fatal
//!
//! ## Architecture Role
//!
//! ```text
//! MarketDataSource → [fetch quotes, bounded concurrency] → [freshness / validity filter]
//!                                                                   ↓
//!                         tokens[TokenId]  pools[PoolId]  edges + adjacency[TokenId]
//! ```

use crate::config::DiscoveryConfig;
use crate::error::{ArbitrageError, Result};
use crate::interfaces::{MarketDataSource, PoolMeta, PoolQuote, PoolState};
use crate::types::{PoolId, Token, TokenId, VenueId};
use futures::stream::{self, StreamExt};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use torq_amm::{AmmPool, DirectedV3Pool, PoolType, V2PoolState, V3PoolState};
use tracing::{debug, info, warn};

/// Milliseconds since the Unix epoch
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A pool oriented in one swap direction, quoted in whole tokens
#[derive(Debug, Clone, PartialEq)]
pub enum DirectedPool {
    ConstantProduct(V2PoolState),
    Concentrated(DirectedV3Pool),
}

impl DirectedPool {
    /// Orient `state` so that `from_token0` selects token0 → token1
    pub fn from_state(meta: &PoolMeta, state: &PoolState, from_token0: bool) -> Result<Self> {
        match (meta.kind, state) {
            (PoolType::UniswapV2, PoolState::ConstantProduct { reserve0, reserve1 }) => {
                let forward = V2PoolState {
                    reserve_in: *reserve0,
                    reserve_out: *reserve1,
                    fee_bps: meta.fee_bps,
                };
                Ok(DirectedPool::ConstantProduct(if from_token0 {
                    forward
                } else {
                    forward.reversed()
                }))
            }
            (
                PoolType::UniswapV3,
                PoolState::Concentrated {
                    sqrt_price_x96,
                    liquidity,
                    tick,
                    tick_lower,
                    tick_upper,
                },
            ) => {
                let state = V3PoolState {
                    liquidity: *liquidity,
                    sqrt_price_x96: *sqrt_price_x96,
                    current_tick: *tick,
                    fee_pips: meta.fee_bps * 100,
                    tick_lower: *tick_lower,
                    tick_upper: *tick_upper,
                };
                let (decimals_in, decimals_out) = if from_token0 {
                    (meta.token0.decimals, meta.token1.decimals)
                } else {
                    (meta.token1.decimals, meta.token0.decimals)
                };
                Ok(DirectedPool::Concentrated(DirectedV3Pool::new(
                    state,
                    from_token0,
                    decimals_in,
                    decimals_out,
                )))
            }
            (kind, _) => Err(ArbitrageError::InvalidPath(format!(
                "pool {} is {:?} but its state has the wrong shape",
                meta.address, kind
            ))),
        }
    }
}

impl AmmPool for DirectedPool {
    fn pool_type(&self) -> PoolType {
        match self {
            DirectedPool::ConstantProduct(pool) => pool.pool_type(),
            DirectedPool::Concentrated(pool) => pool.pool_type(),
        }
    }

    fn get_amount_out(&self, amount_in: Decimal) -> anyhow::Result<Decimal> {
        match self {
            DirectedPool::ConstantProduct(pool) => pool.get_amount_out(amount_in),
            DirectedPool::Concentrated(pool) => pool.get_amount_out(amount_in),
        }
    }

    fn spot_rate(&self) -> anyhow::Result<Decimal> {
        match self {
            DirectedPool::ConstantProduct(pool) => pool.spot_rate(),
            DirectedPool::Concentrated(pool) => pool.spot_rate(),
        }
    }

    fn depth(&self) -> anyhow::Result<Decimal> {
        match self {
            DirectedPool::ConstantProduct(pool) => pool.depth(),
            DirectedPool::Concentrated(pool) => pool.depth(),
        }
    }

    fn fee_fraction(&self) -> Decimal {
        match self {
            DirectedPool::ConstantProduct(pool) => pool.fee_fraction(),
            DirectedPool::Concentrated(pool) => pool.fee_fraction(),
        }
    }
}

/// A pool admitted into the snapshot
#[derive(Debug, Clone)]
pub struct SnapshotPool {
    pub id: PoolId,
    pub meta: PoolMeta,
    pub token0: TokenId,
    pub token1: TokenId,
    pub quote: PoolQuote,
}

impl SnapshotPool {
    pub fn directed(&self, from: TokenId) -> Result<DirectedPool> {
        DirectedPool::from_state(&self.meta, &self.quote.state, from == self.token0)
    }

    pub fn other(&self, token: TokenId) -> TokenId {
        if token == self.token0 {
            self.token1
        } else {
            self.token0
        }
    }
}

/// Directed edge `from → to` through one pool
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub pool: PoolId,
    pub from: TokenId,
    pub to: TokenId,
    /// Pre-fee marginal rate
    pub rate: f64,
    pub fee_bps: u32,
    /// `-ln(rate·(1-fee))`
    pub weight: f64,
    /// Input-side depth in whole `from` tokens
    pub depth: Decimal,
    pub venue: VenueId,
}

impl Edge {
    /// Post-fee rate, `rate·(1-fee)`
    pub fn effective_rate(&self) -> f64 {
        (-self.weight).exp()
    }
}

/// Pools left out of the snapshot, by address
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotReport {
    pub excluded_stale: Vec<String>,
    pub excluded_invalid: Vec<String>,
}

impl SnapshotReport {
    pub fn excluded_count(&self) -> usize {
        self.excluded_stale.len() + self.excluded_invalid.len()
    }
}

/// Immutable per-cycle market graph
#[derive(Debug, Clone, Default)]
pub struct MarketSnapshot {
    pub built_at_ms: u64,
    tokens: Vec<Token>,
    token_index: HashMap<String, TokenId>,
    pools: Vec<SnapshotPool>,
    edges: Vec<Edge>,
    adjacency: Vec<Vec<usize>>,
}

impl MarketSnapshot {
    /// Fetch every active pool's state (bounded by `concurrency_limit`) and
    /// assemble the snapshot. Failing to list pools is fatal for the cycle;
    /// a single pool that cannot be quoted is only excluded.
    pub async fn build(
        source: &dyn MarketDataSource,
        config: &DiscoveryConfig,
        now_ms: u64,
    ) -> Result<(Self, SnapshotReport)> {
        let pools = source.get_active_pools().await?;
        let total = pools.len();

        let fetched: Vec<(PoolMeta, Result<PoolQuote>)> = stream::iter(pools)
            .map(|meta| async move {
                let quote = source.get_reserves_or_tick_state(&meta).await;
                (meta, quote)
            })
            .buffered(config.concurrency_limit.max(1))
            .collect()
            .await;

        let mut entries = Vec::with_capacity(fetched.len());
        let mut unquoted = Vec::new();
        let mut last_fatal = None;
        for (meta, quote) in fetched {
            match quote {
                Ok(quote) => entries.push((meta, quote)),
                Err(e) => {
                    warn!("🏊 Pool {} could not be quoted: {}", meta.address, e);
                    unquoted.push(meta.address);
                    if e.is_cycle_fatal() {
                        last_fatal = Some(e);
                    }
                }
            }
        }

        // Every quote failing on connectivity means the source itself is down
        if entries.is_empty() && total > 0 {
            if let Some(e) = last_fatal {
                return Err(e);
            }
        }

        let (snapshot, mut report) =
            Self::from_parts(entries, config.freshness_sla_ms, now_ms);
        report.excluded_invalid.extend(unquoted);

        info!(
            "🏊 Snapshot built: {} tokens, {} pools, {} edges ({} stale, {} invalid of {} listed)",
            snapshot.token_count(),
            snapshot.pool_count(),
            snapshot.edges.len(),
            report.excluded_stale.len(),
            report.excluded_invalid.len(),
            total
        );
        Ok((snapshot, report))
    }

    /// Assemble a snapshot from already-fetched quotes
    pub fn from_parts(
        entries: Vec<(PoolMeta, PoolQuote)>,
        freshness_sla_ms: u64,
        now_ms: u64,
    ) -> (Self, SnapshotReport) {
        let mut snapshot = MarketSnapshot {
            built_at_ms: now_ms,
            ..Default::default()
        };
        let mut report = SnapshotReport::default();

        for (meta, quote) in entries {
            let age_ms = now_ms.saturating_sub(quote.as_of_ms);
            if age_ms > freshness_sla_ms {
                let stale = ArbitrageError::DataStaleness {
                    pool: meta.address.clone(),
                    age_ms,
                    sla_ms: freshness_sla_ms,
                };
                debug!("{}", stale);
                report.excluded_stale.push(meta.address);
                continue;
            }

            let forward = DirectedPool::from_state(&meta, &quote.state, true);
            let backward = DirectedPool::from_state(&meta, &quote.state, false);
            let priced = match (forward, backward) {
                (Ok(f), Ok(b)) => edge_terms(&f).and_then(|fw| edge_terms(&b).map(|bw| (fw, bw))),
                _ => None,
            };
            let Some((forward_terms, backward_terms)) = priced else {
                debug!("Pool {} has no usable liquidity", meta.address);
                report.excluded_invalid.push(meta.address);
                continue;
            };

            let token0 = snapshot.intern_token(&meta.token0);
            let token1 = snapshot.intern_token(&meta.token1);
            let id = PoolId(snapshot.pools.len() as u32);
            let venue = meta.venue.clone();
            let fee_bps = meta.fee_bps;

            snapshot.pools.push(SnapshotPool {
                id,
                meta,
                token0,
                token1,
                quote,
            });
            for (from, to, (rate, weight, depth)) in [
                (token0, token1, forward_terms),
                (token1, token0, backward_terms),
            ] {
                snapshot.push_edge(Edge {
                    pool: id,
                    from,
                    to,
                    rate,
                    fee_bps,
                    weight,
                    depth,
                    venue: venue.clone(),
                });
            }
        }

        (snapshot, report)
    }

    fn intern_token(&mut self, token: &Token) -> TokenId {
        if let Some(id) = self.token_index.get(&token.address) {
            return *id;
        }
        let id = TokenId(self.tokens.len() as u32);
        self.tokens.push(token.clone());
        self.token_index.insert(token.address.clone(), id);
        self.adjacency.push(Vec::new());
        id
    }

    fn push_edge(&mut self, edge: Edge) {
        let index = self.edges.len();
        if let Some(out) = self.adjacency.get_mut(edge.from.0 as usize) {
            out.push(index);
        }
        self.edges.push(edge);
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn token(&self, id: TokenId) -> Option<&Token> {
        self.tokens.get(id.0 as usize)
    }

    pub fn token_id(&self, address: &str) -> Option<TokenId> {
        self.token_index.get(&address.to_lowercase()).copied()
    }

    pub fn token_ids(&self) -> impl Iterator<Item = TokenId> + '_ {
        (0..self.tokens.len() as u32).map(TokenId)
    }

    pub fn pools(&self) -> &[SnapshotPool] {
        &self.pools
    }

    pub fn pool(&self, id: PoolId) -> Option<&SnapshotPool> {
        self.pools.get(id.0 as usize)
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Edges leaving `token`, in insertion order
    pub fn outgoing(&self, token: TokenId) -> impl Iterator<Item = &Edge> + '_ {
        self.adjacency
            .get(token.0 as usize)
            .into_iter()
            .flatten()
            .filter_map(move |index| self.edges.get(*index))
    }

    pub fn edge(&self, pool: PoolId, from: TokenId) -> Option<&Edge> {
        self.outgoing(from).find(|edge| edge.pool == pool)
    }

    /// Resolve configured start addresses; empty means every token
    pub fn start_tokens(&self, addresses: &[String]) -> Vec<TokenId> {
        if addresses.is_empty() {
            return self.token_ids().collect();
        }
        addresses
            .iter()
            .filter_map(|address| {
                let id = self.token_id(address);
                if id.is_none() {
                    debug!("Start token {} is not in this snapshot", address);
                }
                id
            })
            .collect()
    }
}

/// (pre-fee rate, weight, depth) of a directed pool, if it can be priced
fn edge_terms(pool: &DirectedPool) -> Option<(f64, f64, Decimal)> {
    let effective = pool.spot_rate().ok()?.to_f64()?;
    let depth = pool.depth().ok()?;
    if effective <= 0.0 || !effective.is_finite() || depth <= Decimal::ZERO {
        return None;
    }
    let fee = pool.fee_fraction().to_f64()?;
    let rate = effective / (1.0 - fee);
    Some((rate, -effective.ln(), depth))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{v2_meta, InMemoryMarketData};
    use rust_decimal_macros::dec;

    fn tokens() -> (Token, Token, Token) {
        (
            Token::new("0x00000000000000000000000000000000000000a0", "AAA", 18),
            Token::new("0x00000000000000000000000000000000000000b0", "BBB", 18),
            Token::new("0x00000000000000000000000000000000000000c0", "CCC", 18),
        )
    }

    fn reserves(as_of_ms: u64, reserve0: Decimal, reserve1: Decimal) -> PoolQuote {
        PoolQuote {
            state: PoolState::ConstantProduct { reserve0, reserve1 },
            as_of_ms,
        }
    }

    #[test]
    fn test_edges_carry_log_weights() {
        let (a, b, _) = tokens();
        let pool = v2_meta("0x01", "uniswap_v2", &a, &b, 30);
        let (snapshot, report) = MarketSnapshot::from_parts(
            vec![(pool, reserves(1_000, dec!(1000), dec!(2000)))],
            500,
            1_200,
        );

        assert_eq!(report.excluded_count(), 0);
        assert_eq!(snapshot.token_count(), 2);
        assert_eq!(snapshot.edges().len(), 2);

        let a_id = snapshot.token_id(&a.address).unwrap();
        let edge = snapshot.outgoing(a_id).next().unwrap();
        assert!((edge.rate - 2.0).abs() < 1e-9);
        assert!((edge.effective_rate() - 2.0 * 0.997).abs() < 1e-9);
        assert_eq!(edge.depth, dec!(1000));
    }

    #[test]
    fn test_stale_and_empty_pools_excluded() {
        let (a, b, c) = tokens();
        let (snapshot, report) = MarketSnapshot::from_parts(
            vec![
                (
                    v2_meta("0x01", "uniswap_v2", &a, &b, 30),
                    reserves(9_000, dec!(1000), dec!(1000)),
                ),
                (
                    v2_meta("0x02", "sushiswap", &b, &c, 30),
                    reserves(1_000, dec!(1000), dec!(1000)),
                ),
                (
                    v2_meta("0x03", "sushiswap", &a, &c, 30),
                    reserves(9_000, dec!(0), dec!(1000)),
                ),
            ],
            3_000,
            10_000,
        );

        assert_eq!(snapshot.pool_count(), 1);
        assert_eq!(report.excluded_stale, vec!["0x02".to_string()]);
        assert_eq!(report.excluded_invalid, vec!["0x03".to_string()]);
        // Tokens only enter through admitted pools
        assert!(snapshot.token_id(&c.address).is_none());
    }

    #[tokio::test]
    async fn test_build_from_source() {
        let (a, b, _) = tokens();
        let source = InMemoryMarketData::new();
        source.add_pool(
            v2_meta("0x01", "uniswap_v2", &a, &b, 30),
            PoolState::ConstantProduct {
                reserve0: dec!(1000),
                reserve1: dec!(1000),
            },
        );

        let (snapshot, report) =
            MarketSnapshot::build(&source, &DiscoveryConfig::default(), unix_millis())
                .await
                .unwrap();
        assert_eq!(snapshot.pool_count(), 1);
        assert_eq!(report.excluded_count(), 0);
        assert_eq!(snapshot.start_tokens(&[]).len(), 2);
        assert_eq!(snapshot.start_tokens(&[b.address.to_uppercase()]).len(), 1);
    }
}
