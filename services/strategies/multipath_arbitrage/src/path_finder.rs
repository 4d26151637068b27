//! # PathFinder - Bounded Bellman-Ford Cycle Detection
//!
//! ## Purpose
//!
//! Finds profitable loops in the snapshot graph. Edge weights are
//! `-ln(rate·(1-fee))`, so a loop whose rate product exceeds `1 + ε` is a cycle
//! with total weight below `-ln(1 + ε)`. Relaxation runs layer by layer and stops
//! after `max_hops` layers instead of `|V|-1`, which bounds both path length and
//! runtime.
//!
//! ## Algorithm
//!
//! Each layer `k` holds, per token, the `max_paths_per_token` lightest simple
//! walks of exactly `k` hops from the start token (K-best relaxation). A walk
//! never revisits a token or reuses a pool. Whenever an edge closes a walk back
//! onto the start token with cumulative weight below the threshold, the loop is
//! recorded. Work per start token is `O(max_hops · K · E)`.
//!
//! Truncating to K keeps the search sound: every reported loop is a real
//! profitable cycle, and nothing is reported when no such cycle exists. It is
//! exact only while K covers every simple walk into a token; past that, a
//! lighter cycle can be lost with a pruned prefix.
//!
//! ## Integration Points
//!
//! - **Input**: `Arc<MarketSnapshot>` for the cycle, start token ids
//! - **Output**: de-duplicated `Path`s, lightest first, for the PathRanker
//! - **Parallelism**: one blocking task per start token, at most `concurrency_limit` at once
//!
//! ## Architecture Role
//!
//! ```text
//! MarketSnapshot ──→ [start token 1] ─┐
//!                ──→ [start token 2] ─┼─→ merge + dedupe by edge sequence → sorted Paths
//!                ──→ [start token N] ─┘
//! ```

use crate::config::DiscoveryConfig;
use crate::snapshot::{Edge, MarketSnapshot};
use crate::types::{Path, PathHop, PoolId, StrategyId, TokenId};
use futures::stream::{self, StreamExt};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Bounded multi-hop cycle search
#[derive(Debug, Clone)]
pub struct PathFinder {
    max_hops: usize,
    max_paths_per_token: usize,
    concurrency_limit: usize,
    /// `-ln(1 + ε)`; cycles must weigh strictly less
    weight_threshold: f64,
}

/// Partial walk from the start token
#[derive(Debug, Clone)]
struct Label {
    weight: f64,
    hops: Vec<PathHop>,
}

impl Label {
    fn visits(&self, token: TokenId) -> bool {
        self.hops.iter().any(|hop| hop.from == token || hop.to == token)
    }

    fn uses_pool(&self, pool: PoolId) -> bool {
        self.hops.iter().any(|hop| hop.pool == pool)
    }

    fn extended(&self, edge: &Edge) -> Label {
        let mut hops = Vec::with_capacity(self.hops.len() + 1);
        hops.extend_from_slice(&self.hops);
        hops.push(PathHop {
            pool: edge.pool,
            from: edge.from,
            to: edge.to,
        });
        Label {
            weight: self.weight + edge.weight,
            hops,
        }
    }
}

/// Lightest first, then fewer hops, then edge sequence
pub fn compare_paths(a: &Path, b: &Path) -> Ordering {
    a.weight
        .total_cmp(&b.weight)
        .then_with(|| a.hop_count().cmp(&b.hop_count()))
        .then_with(|| a.edge_key().cmp(&b.edge_key()))
}

impl PathFinder {
    pub fn new(config: &DiscoveryConfig) -> Self {
        Self {
            max_hops: config.max_hops,
            max_paths_per_token: config.max_paths_per_token,
            concurrency_limit: config.concurrency_limit.max(1),
            weight_threshold: -(config.cycle_epsilon.ln_1p()),
        }
    }

    pub fn max_hops(&self) -> usize {
        self.max_hops
    }

    /// Whether a cycle of this total weight counts as profitable
    pub fn is_profitable(&self, weight: f64) -> bool {
        weight < self.weight_threshold
    }

    /// Profitable cycles through `start`, lightest first, at most `max_paths`
    pub fn find_paths(&self, snapshot: &MarketSnapshot, start: TokenId, max_paths: usize) -> Vec<Path> {
        let beam = self.max_paths_per_token.max(max_paths).max(1);
        let token_count = snapshot.token_count();
        if start.0 as usize >= token_count || max_paths == 0 {
            return Vec::new();
        }

        let mut found: Vec<Path> = Vec::new();
        let mut layer: Vec<Vec<Label>> = vec![Vec::new(); token_count];
        layer[start.0 as usize].push(Label {
            weight: 0.0,
            hops: Vec::new(),
        });

        for depth in 1..=self.max_hops {
            let mut next: Vec<Vec<Label>> = vec![Vec::new(); token_count];

            for labels in &layer {
                for label in labels {
                    let at = label.hops.last().map_or(start, |hop| hop.to);
                    for edge in snapshot.outgoing(at) {
                        if label.uses_pool(edge.pool) {
                            continue;
                        }
                        if edge.to == start {
                            if depth >= 2 && self.is_profitable(label.weight + edge.weight) {
                                let closed = label.extended(edge);
                                found.push(Path::new(
                                    StrategyId::MultiPath,
                                    start,
                                    closed.hops,
                                    closed.weight,
                                ));
                            }
                            continue;
                        }
                        // The last layer can only close cycles
                        if depth == self.max_hops || label.visits(edge.to) {
                            continue;
                        }
                        next[edge.to.0 as usize].push(label.extended(edge));
                    }
                }
            }

            for labels in &mut next {
                labels.sort_by(|a, b| {
                    a.weight
                        .total_cmp(&b.weight)
                        .then_with(|| a.hops.cmp(&b.hops))
                });
                labels.truncate(beam);
            }
            layer = next;
        }

        found.sort_by(compare_paths);
        found.truncate(max_paths);
        debug!(
            "🔍 Start token {:?}: {} profitable cycles within {} hops",
            start,
            found.len(),
            self.max_hops
        );
        found
    }

    /// Search every start token in parallel and merge the results
    pub async fn find_all(&self, snapshot: Arc<MarketSnapshot>, starts: &[TokenId]) -> Vec<Path> {
        let max_paths = self.max_paths_per_token;
        let per_start: Vec<Vec<Path>> = stream::iter(starts.to_vec())
            .map(|start| {
                let finder = self.clone();
                let snapshot = Arc::clone(&snapshot);
                async move {
                    match tokio::task::spawn_blocking(move || {
                        finder.find_paths(&snapshot, start, max_paths)
                    })
                    .await
                    {
                        Ok(paths) => paths,
                        Err(e) => {
                            warn!("Path search for {:?} did not complete: {}", start, e);
                            Vec::new()
                        }
                    }
                }
            })
            .buffer_unordered(self.concurrency_limit)
            .collect()
            .await;

        merge_paths(per_start)
    }
}

/// Flatten, drop repeated edge sequences, and order deterministically
pub fn merge_paths(batches: Vec<Vec<Path>>) -> Vec<Path> {
    let mut seen = HashSet::new();
    let mut merged: Vec<Path> = batches
        .into_iter()
        .flatten()
        .filter(|path| seen.insert(path.edge_key()))
        .collect();
    merged.sort_by(compare_paths);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::{PoolQuote, PoolState};
    use crate::testing::v2_meta;
    use crate::types::Token;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn token(byte: &str, symbol: &str) -> Token {
        Token::new(&format!("0x{:0>40}", byte), symbol, 18)
    }

    fn pool(
        address: &str,
        venue: &str,
        t0: &Token,
        t1: &Token,
        reserve0: Decimal,
        reserve1: Decimal,
    ) -> (crate::interfaces::PoolMeta, PoolQuote) {
        (
            v2_meta(address, venue, t0, t1, 30),
            PoolQuote {
                state: PoolState::ConstantProduct { reserve0, reserve1 },
                as_of_ms: 0,
            },
        )
    }

    /// A→B at 2.0, B→C at 1.5, C→A at 0.35, 0.3% fee per hop
    fn triangle() -> (MarketSnapshot, TokenId) {
        let (a, b, c) = (token("a", "A"), token("b", "B"), token("c", "C"));
        let (snapshot, _) = MarketSnapshot::from_parts(
            vec![
                pool("0x01", "uniswap_v2", &a, &b, dec!(1000), dec!(2000)),
                pool("0x02", "uniswap_v2", &b, &c, dec!(1000), dec!(1500)),
                pool("0x03", "sushiswap", &c, &a, dec!(1000), dec!(350)),
            ],
            1_000,
            0,
        );
        let start = snapshot.token_id(&a.address).unwrap();
        (snapshot, start)
    }

    #[test]
    fn test_triangle_cycle_found() {
        let (snapshot, start) = triangle();
        let finder = PathFinder::new(&DiscoveryConfig::default());
        let paths = finder.find_paths(&snapshot, start, 10);

        assert_eq!(paths.len(), 1);
        let path = &paths[0];
        assert_eq!(path.hop_count(), 3);
        assert!(path.validate(4).is_ok());
        // 2.0 * 1.5 * 0.35 * 0.997^3 ≈ 1.0406
        assert!((path.gross_factor() - 1.0406).abs() < 0.001);
    }

    #[test]
    fn test_max_hops_bounds_search() {
        let (snapshot, start) = triangle();
        let config = DiscoveryConfig {
            max_hops: 2,
            ..DiscoveryConfig::default()
        };
        let finder = PathFinder::new(&config);
        assert!(finder.find_paths(&snapshot, start, 10).is_empty());
    }

    #[test]
    fn test_epsilon_filters_marginal_cycles() {
        let (snapshot, start) = triangle();
        let config = DiscoveryConfig {
            cycle_epsilon: 0.05,
            ..DiscoveryConfig::default()
        };
        let finder = PathFinder::new(&config);
        assert!(finder.find_paths(&snapshot, start, 10).is_empty());
    }

    #[test]
    fn test_cross_venue_two_hop_cycle() {
        let (a, b) = (token("a", "A"), token("b", "B"));
        let (snapshot, _) = MarketSnapshot::from_parts(
            vec![
                pool("0x01", "uniswap_v2", &a, &b, dec!(1000), dec!(2000)),
                pool("0x02", "sushiswap", &a, &b, dec!(1000), dec!(2100)),
            ],
            1_000,
            0,
        );
        let start = snapshot.token_id(&a.address).unwrap();
        let finder = PathFinder::new(&DiscoveryConfig::default());
        let paths = finder.find_paths(&snapshot, start, 10);

        // Buy B on sushiswap, sell it back on uniswap
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].pools(), vec![PoolId(1), PoolId(0)]);
    }

    #[tokio::test]
    async fn test_find_all_dedupes_and_sorts() {
        let (snapshot, start) = triangle();
        let finder = PathFinder::new(&DiscoveryConfig::default());
        let snapshot = Arc::new(snapshot);
        let all = finder
            .find_all(Arc::clone(&snapshot), &[start, start])
            .await;
        assert_eq!(all.len(), 1);

        // Every token of the loop sees its own rotation
        let starts: Vec<TokenId> = snapshot.token_ids().collect();
        let rotations = finder.find_all(snapshot, &starts).await;
        assert_eq!(rotations.len(), 3);
        assert!(rotations.windows(2).all(|w| compare_paths(&w[0], &w[1]) != Ordering::Greater));
    }
}
