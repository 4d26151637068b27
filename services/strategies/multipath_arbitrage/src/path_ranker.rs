//! # PathRanker - Weighted Path Scoring
//!
//! Orders candidate paths by a weighted sum of four normalized terms:
//!
//! ```text
//! score = w_profit·profit/max_profit + w_risk·(1 - risk)
//!       + w_diversity·novelty(vs. already selected) + w_history·venue_success
//! ```
//!
//! `risk` is the RiskManager's pre-sizing path score (`RiskManager::assess_path`).
//!
//! Diversity depends on what has been selected so far, so ranking is a greedy
//! selection: each round re-scores the remaining candidates and takes the best.
//! Ties break on higher raw profit, then fewer hops, then lower gas, then the
//! edge sequence. The ranker is a pure function of its inputs.

use crate::config::{ArbitrageConfig, RankingConfig};
use crate::snapshot::MarketSnapshot;
use crate::types::{Path, PoolId, TokenId, VenueId};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Everything the ranker needs to know about one path
#[derive(Debug, Clone, PartialEq)]
pub struct RankCandidate {
    pub path: Path,
    /// Expected relative profit at spot rates (`gross_factor - 1`)
    pub profit: f64,
    /// RiskManager path score in [0, 1]; higher is riskier
    pub risk: f64,
    /// Mean historical success rate of the path's venues, in [0, 1]
    pub venue_success: f64,
    pub gas_estimate: u64,
    pub venues: BTreeSet<VenueId>,
}

impl RankCandidate {
    /// Build a candidate from the snapshot with an already computed risk score
    pub fn from_snapshot(
        path: Path,
        snapshot: &MarketSnapshot,
        config: &ArbitrageConfig,
        risk: f64,
        venue_success: impl Fn(&VenueId) -> f64,
    ) -> Self {
        let venues: BTreeSet<VenueId> = path
            .hops
            .iter()
            .filter_map(|hop| snapshot.pool(hop.pool))
            .map(|pool| pool.meta.venue.clone())
            .collect();
        let success = if venues.is_empty() {
            0.0
        } else {
            venues.iter().map(&venue_success).sum::<f64>() / venues.len() as f64
        };
        let gas_estimate =
            config.gas.base_gas + config.gas.gas_per_hop * path.hop_count() as u64;

        Self {
            profit: path.gross_factor() - 1.0,
            risk: risk.clamp(0.0, 1.0),
            venue_success: success,
            gas_estimate,
            venues,
            path,
        }
    }

    fn tokens(&self) -> BTreeSet<TokenId> {
        self.path.tokens().into_iter().collect()
    }

    fn pools(&self) -> BTreeSet<PoolId> {
        self.path.pools().into_iter().collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedPath {
    pub candidate: RankCandidate,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct PathRanker {
    weights: RankingConfig,
}

#[derive(Default)]
struct Selected {
    venues: BTreeSet<VenueId>,
    tokens: BTreeSet<TokenId>,
    pools: BTreeSet<PoolId>,
}

impl Selected {
    /// Share of the candidate's venues, tokens and pools not yet covered
    fn novelty(&self, candidate: &RankCandidate) -> f64 {
        if self.pools.is_empty() {
            return 1.0;
        }
        let tokens = candidate.tokens();
        let pools = candidate.pools();
        let total = candidate.venues.len() + tokens.len() + pools.len();
        if total == 0 {
            return 0.0;
        }
        let fresh = candidate.venues.difference(&self.venues).count()
            + tokens.difference(&self.tokens).count()
            + pools.difference(&self.pools).count();
        fresh as f64 / total as f64
    }

    fn add(&mut self, candidate: &RankCandidate) {
        self.venues.extend(candidate.venues.iter().cloned());
        self.tokens.extend(candidate.tokens());
        self.pools.extend(candidate.pools());
    }
}

fn tie_break(a: &RankCandidate, b: &RankCandidate) -> Ordering {
    b.profit
        .total_cmp(&a.profit)
        .then_with(|| a.path.hop_count().cmp(&b.path.hop_count()))
        .then_with(|| a.gas_estimate.cmp(&b.gas_estimate))
        .then_with(|| a.path.edge_key().cmp(&b.path.edge_key()))
}

impl PathRanker {
    pub fn new(weights: RankingConfig) -> Self {
        Self { weights }
    }

    fn base_score(&self, candidate: &RankCandidate, max_profit: f64) -> f64 {
        let profit = if max_profit > 0.0 {
            (candidate.profit / max_profit).clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.weights.profit_weight * profit
            + self.weights.risk_weight * (1.0 - candidate.risk.clamp(0.0, 1.0))
            + self.weights.history_weight * candidate.venue_success.clamp(0.0, 1.0)
    }

    /// Highest score first
    pub fn rank(&self, candidates: Vec<RankCandidate>) -> Vec<RankedPath> {
        let max_profit = candidates
            .iter()
            .map(|c| c.profit)
            .fold(0.0_f64, f64::max);

        let mut remaining: Vec<(RankCandidate, f64)> = candidates
            .into_iter()
            .map(|c| {
                let base = self.base_score(&c, max_profit);
                (c, base)
            })
            .collect();
        let mut selected = Selected::default();
        let mut ranked = Vec::with_capacity(remaining.len());

        while !remaining.is_empty() {
            let mut best: Option<(usize, f64)> = None;
            for (index, (candidate, base)) in remaining.iter().enumerate() {
                let score = base + self.weights.diversity_weight * selected.novelty(candidate);
                let better = match best {
                    None => true,
                    Some((best_index, best_score)) => match score.total_cmp(&best_score) {
                        Ordering::Greater => true,
                        Ordering::Less => false,
                        Ordering::Equal => {
                            tie_break(candidate, &remaining[best_index].0) == Ordering::Less
                        }
                    },
                };
                if better {
                    best = Some((index, score));
                }
            }

            let Some((index, score)) = best else { break };
            let (candidate, _) = remaining.swap_remove(index);
            selected.add(&candidate);
            ranked.push(RankedPath { candidate, score });
        }

        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PathHop, StrategyId};

    fn candidate(pools: &[u32], profit: f64, venue: &str) -> RankCandidate {
        let n = pools.len() as u32;
        let hops = pools
            .iter()
            .enumerate()
            .map(|(i, pool)| PathHop {
                pool: PoolId(*pool),
                from: TokenId(i as u32),
                to: TokenId((i as u32 + 1) % n),
            })
            .collect::<Vec<_>>();
        RankCandidate {
            path: Path::new(StrategyId::MultiPath, TokenId(0), hops, -(1.0 + profit).ln()),
            profit,
            risk: 0.5,
            venue_success: 1.0,
            gas_estimate: 60_000 + 90_000 * pools.len() as u64,
            venues: [VenueId::new(venue)].into_iter().collect(),
        }
    }

    #[test]
    fn test_profit_dominates_with_profit_weight() {
        let ranker = PathRanker::new(RankingConfig {
            profit_weight: 1.0,
            risk_weight: 0.0,
            diversity_weight: 0.0,
            history_weight: 0.0,
        });
        let ranked = ranker.rank(vec![
            candidate(&[0, 1], 0.01, "a"),
            candidate(&[2, 3], 0.03, "a"),
            candidate(&[4, 5], 0.02, "a"),
        ]);
        let profits: Vec<f64> = ranked.iter().map(|r| r.candidate.profit).collect();
        assert_eq!(profits, vec![0.03, 0.02, 0.01]);
        assert!((ranked[0].score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_diversity_promotes_disjoint_path() {
        let ranker = PathRanker::new(RankingConfig {
            profit_weight: 0.5,
            risk_weight: 0.0,
            diversity_weight: 0.5,
            history_weight: 0.0,
        });
        // Second-best path reuses the best one's pools and venue; the third is disjoint
        let ranked = ranker.rank(vec![
            candidate(&[0, 1], 0.030, "uniswap_v2"),
            candidate(&[0, 1, 2], 0.029, "uniswap_v2"),
            candidate(&[7, 8], 0.025, "sushiswap"),
        ]);
        assert_eq!(ranked[0].candidate.path.pools(), vec![PoolId(0), PoolId(1)]);
        assert_eq!(ranked[1].candidate.path.pools(), vec![PoolId(7), PoolId(8)]);
    }

    #[test]
    fn test_ties_prefer_fewer_hops_then_lower_gas() {
        let ranker = PathRanker::new(RankingConfig {
            profit_weight: 1.0,
            risk_weight: 0.0,
            diversity_weight: 0.0,
            history_weight: 0.0,
        });
        let long = candidate(&[0, 1, 2], 0.02, "a");
        let short = candidate(&[3, 4], 0.02, "a");
        let ranked = ranker.rank(vec![long, short]);
        assert_eq!(ranked[0].candidate.path.hop_count(), 2);
    }

    #[test]
    fn test_lower_risk_score_ranks_first() {
        let ranker = PathRanker::new(RankingConfig {
            profit_weight: 0.5,
            risk_weight: 0.5,
            diversity_weight: 0.0,
            history_weight: 0.0,
        });
        let mut shallow = candidate(&[0, 1], 0.02, "a");
        shallow.risk = 0.9;
        let mut deep = candidate(&[2, 3], 0.02, "a");
        deep.risk = 0.1;
        let ranked = ranker.rank(vec![shallow, deep]);
        assert_eq!(ranked[0].candidate.path.pools(), vec![PoolId(2), PoolId(3)]);
        assert!((ranked[0].score - ranked[1].score - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_rank_is_deterministic() {
        let ranker = PathRanker::new(RankingConfig::default());
        let input = vec![
            candidate(&[0, 1], 0.02, "a"),
            candidate(&[2, 3], 0.02, "b"),
            candidate(&[4, 5, 6], 0.04, "c"),
        ];
        let first = ranker.rank(input.clone());
        let second = ranker.rank(input);
        assert_eq!(first, second);
    }
}
