//! # Opportunity Detectors
//!
//! ## Purpose
//!
//! Closed set of cycle detectors selected by `discovery.strategies`. Each
//! variant turns the cycle's snapshot into candidate `Path`s tagged with its own
//! `StrategyId`, so execution requests can be checked against the detector
//! that produced them.
//!
//! - **CrossVenue**: 2-hop loops through the same pair on two different venues
//! - **Triangular**: exhaustive 3-hop loops
//! - **MultiPath**: bounded Bellman-Ford up to `max_hops` (see `path_finder`)
//!
//! All three share the PathFinder's `1 + ε` profitability threshold.

use crate::config::DiscoveryConfig;
use crate::path_finder::{merge_paths, PathFinder};
use crate::snapshot::MarketSnapshot;
use crate::types::{Path, PathHop, StrategyId, TokenId};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub enum OpportunityDetector {
    CrossVenue(PathFinder),
    Triangular(PathFinder),
    MultiPath(PathFinder),
}

impl OpportunityDetector {
    pub fn new(strategy: StrategyId, config: &DiscoveryConfig) -> Self {
        let finder = PathFinder::new(config);
        match strategy {
            StrategyId::CrossVenue => OpportunityDetector::CrossVenue(finder),
            StrategyId::Triangular => OpportunityDetector::Triangular(finder),
            StrategyId::MultiPath => OpportunityDetector::MultiPath(finder),
        }
    }

    /// One detector per configured strategy, duplicates removed
    pub fn from_config(config: &DiscoveryConfig) -> Vec<Self> {
        let mut strategies = config.strategies.clone();
        strategies.sort();
        strategies.dedup();
        strategies
            .into_iter()
            .map(|strategy| Self::new(strategy, config))
            .collect()
    }

    pub fn strategy_id(&self) -> StrategyId {
        match self {
            OpportunityDetector::CrossVenue(_) => StrategyId::CrossVenue,
            OpportunityDetector::Triangular(_) => StrategyId::Triangular,
            OpportunityDetector::MultiPath(_) => StrategyId::MultiPath,
        }
    }

    pub async fn detect(&self, snapshot: Arc<MarketSnapshot>, starts: &[TokenId]) -> Vec<Path> {
        let paths = match self {
            OpportunityDetector::MultiPath(finder) => finder.find_all(snapshot, starts).await,
            OpportunityDetector::CrossVenue(finder) => {
                let batches = starts
                    .iter()
                    .map(|start| cross_venue_cycles(finder, &snapshot, *start))
                    .collect();
                merge_paths(batches)
            }
            OpportunityDetector::Triangular(finder) => {
                let batches = starts
                    .iter()
                    .map(|start| triangular_cycles(finder, &snapshot, *start))
                    .collect();
                merge_paths(batches)
            }
        };
        debug!("🔍 {} detector produced {} paths", self.strategy_id(), paths.len());
        paths
    }
}

fn hop(pool: crate::types::PoolId, from: TokenId, to: TokenId) -> PathHop {
    PathHop { pool, from, to }
}

/// Buy on one venue, sell on another
fn cross_venue_cycles(finder: &PathFinder, snapshot: &MarketSnapshot, start: TokenId) -> Vec<Path> {
    let mut found = Vec::new();
    for out in snapshot.outgoing(start) {
        for back in snapshot.outgoing(out.to) {
            if back.to != start || back.pool == out.pool || back.venue == out.venue {
                continue;
            }
            let weight = out.weight + back.weight;
            if finder.is_profitable(weight) {
                found.push(Path::new(
                    StrategyId::CrossVenue,
                    start,
                    vec![hop(out.pool, start, out.to), hop(back.pool, out.to, start)],
                    weight,
                ));
            }
        }
    }
    found
}

/// Every start → x → y → start loop with three distinct pools
fn triangular_cycles(finder: &PathFinder, snapshot: &MarketSnapshot, start: TokenId) -> Vec<Path> {
    let mut found = Vec::new();
    for first in snapshot.outgoing(start) {
        if first.to == start {
            continue;
        }
        for second in snapshot.outgoing(first.to) {
            if second.to == start || second.to == first.to || second.pool == first.pool {
                continue;
            }
            for third in snapshot.outgoing(second.to) {
                if third.to != start || third.pool == first.pool || third.pool == second.pool {
                    continue;
                }
                let weight = first.weight + second.weight + third.weight;
                if finder.is_profitable(weight) {
                    found.push(Path::new(
                        StrategyId::Triangular,
                        start,
                        vec![
                            hop(first.pool, start, first.to),
                            hop(second.pool, first.to, second.to),
                            hop(third.pool, second.to, start),
                        ],
                        weight,
                    ));
                }
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::{PoolQuote, PoolState};
    use crate::testing::v2_meta;
    use crate::types::Token;
    use rust_decimal_macros::dec;

    fn snapshot() -> (MarketSnapshot, TokenId) {
        let a = Token::new("0x00000000000000000000000000000000000000a0", "A", 18);
        let b = Token::new("0x00000000000000000000000000000000000000b0", "B", 18);
        let c = Token::new("0x00000000000000000000000000000000000000c0", "C", 18);
        let quote = |reserve0, reserve1| PoolQuote {
            state: PoolState::ConstantProduct { reserve0, reserve1 },
            as_of_ms: 0,
        };
        let (snapshot, _) = MarketSnapshot::from_parts(
            vec![
                (v2_meta("0x01", "uniswap_v2", &a, &b, 30), quote(dec!(1000), dec!(2000))),
                (v2_meta("0x02", "sushiswap", &a, &b, 30), quote(dec!(1000), dec!(2100))),
                (v2_meta("0x03", "uniswap_v2", &b, &c, 30), quote(dec!(1000), dec!(1500))),
                (v2_meta("0x04", "sushiswap", &c, &a, 30), quote(dec!(1000), dec!(350))),
            ],
            1_000,
            0,
        );
        let start = snapshot.token_id(&a.address).unwrap();
        (snapshot, start)
    }

    #[tokio::test]
    async fn test_detectors_tag_their_strategy() {
        let (snapshot, start) = snapshot();
        let snapshot = Arc::new(snapshot);
        let config = DiscoveryConfig::default();

        for strategy in [
            StrategyId::CrossVenue,
            StrategyId::Triangular,
            StrategyId::MultiPath,
        ] {
            let detector = OpportunityDetector::new(strategy, &config);
            let paths = detector.detect(Arc::clone(&snapshot), &[start]).await;
            assert!(!paths.is_empty(), "{} found nothing", strategy);
            assert!(paths.iter().all(|p| p.strategy == detector.strategy_id()));
        }
    }

    #[tokio::test]
    async fn test_shape_of_each_detector() {
        let (snapshot, start) = snapshot();
        let snapshot = Arc::new(snapshot);
        let config = DiscoveryConfig::default();

        let cross = OpportunityDetector::new(StrategyId::CrossVenue, &config)
            .detect(Arc::clone(&snapshot), &[start])
            .await;
        assert!(cross.iter().all(|p| p.hop_count() == 2));

        let triangular = OpportunityDetector::new(StrategyId::Triangular, &config)
            .detect(Arc::clone(&snapshot), &[start])
            .await;
        assert!(triangular.iter().all(|p| p.hop_count() == 3));

        // Multi-path sees both shapes
        let multi = OpportunityDetector::new(StrategyId::MultiPath, &config)
            .detect(snapshot, &[start])
            .await;
        assert!(multi.len() >= cross.len() + triangular.len());
    }

    #[test]
    fn test_from_config_dedupes() {
        let config = DiscoveryConfig {
            strategies: vec![StrategyId::Triangular, StrategyId::Triangular],
            ..DiscoveryConfig::default()
        };
        let detectors = OpportunityDetector::from_config(&config);
        assert_eq!(detectors.len(), 1);
        assert_eq!(detectors[0].strategy_id(), StrategyId::Triangular);
    }
}
