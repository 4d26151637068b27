//! # RiskManager - Exposure Scoring and Hard Caps
//!
//! ## Purpose
//!
//! Scores each opportunity before capital is committed and enforces the three
//! hard caps, each a fraction of total capital:
//!
//! - `max_risk_per_trade`: size of any single allocation
//! - `max_risk_per_token`: summed allocations touching one token this cycle
//! - `max_risk_per_dex`: summed allocations routed through one venue this cycle
//!
//! ## Risk Score
//!
//! ```text
//! score = depth_weight       · min(depth_ratio / max_position_pct_of_depth, 1)
//!       + failure_weight     · mean venue failure rate
//!       + correlation_weight · max(existing exposure / cap) over the route's tokens and venues
//! ```
//!
//! A route whose worst hop trades more than `sandwich_depth_threshold` of the
//! pool's depth is flagged for sandwich protection in the bundle builder.
//!
//! Before sizing, `assess_path` scores a bare path the same way for a trade of
//! a given notional. The correlation term is zero there: nothing is allocated
//! while paths are being ranked.

use crate::config::{ExecutionConfig, RiskConfig};
use crate::error::ArbitrageError;
use crate::metrics::PerformanceTracker;
use crate::snapshot::MarketSnapshot;
use crate::types::{ArbitrageOpportunity, Path, RiskAssessment, VenueId};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

/// Open exposure of the current cycle, in currency
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortfolioState {
    pub total_capital: Decimal,
    pub token_exposure: BTreeMap<String, Decimal>,
    pub venue_exposure: BTreeMap<VenueId, Decimal>,
}

impl PortfolioState {
    pub fn new(total_capital: Decimal) -> Self {
        Self {
            total_capital,
            ..Self::default()
        }
    }

    pub fn add(&mut self, opportunity: &ArbitrageOpportunity, amount: Decimal) {
        for token in opportunity.token_addresses() {
            *self.token_exposure.entry(token).or_default() += amount;
        }
        for venue in opportunity.venues() {
            *self.venue_exposure.entry(venue).or_default() += amount;
        }
    }

    pub fn token(&self, address: &str) -> Decimal {
        self.token_exposure.get(address).copied().unwrap_or_default()
    }

    pub fn venue(&self, venue: &VenueId) -> Decimal {
        self.venue_exposure.get(venue).copied().unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct RiskManager {
    config: RiskConfig,
    max_position_pct_of_depth: Decimal,
}

impl RiskManager {
    pub fn new(config: RiskConfig, execution: &ExecutionConfig) -> Self {
        Self {
            config,
            max_position_pct_of_depth: execution.max_position_pct_of_depth,
        }
    }

    fn trade_cap(&self, portfolio: &PortfolioState) -> Decimal {
        self.config.max_risk_per_trade * portfolio.total_capital
    }

    fn token_cap(&self, portfolio: &PortfolioState) -> Decimal {
        self.config.max_risk_per_token * portfolio.total_capital
    }

    fn venue_cap(&self, portfolio: &PortfolioState) -> Decimal {
        self.config.max_risk_per_dex * portfolio.total_capital
    }

    /// Score `opportunity` executed at `scale` × its optimal input
    pub fn assess(
        &self,
        opportunity: &ArbitrageOpportunity,
        scale: Decimal,
        portfolio: &PortfolioState,
        history: &PerformanceTracker,
    ) -> RiskAssessment {
        let depth_ratio = opportunity.max_depth_ratio(scale);
        let depth_term = if self.max_position_pct_of_depth > Decimal::ZERO {
            (depth_ratio / self.max_position_pct_of_depth).min(Decimal::ONE)
        } else {
            Decimal::ONE
        };

        let venues = opportunity.venues();
        let venue_failure_rate = if venues.is_empty() {
            Decimal::ZERO
        } else {
            venues
                .iter()
                .map(|venue| history.venue_failure_rate(venue))
                .sum::<Decimal>()
                / Decimal::from(venues.len())
        };

        let correlation = self.correlation(opportunity, portfolio);
        let score = (self.config.depth_weight * depth_term
            + self.config.failure_weight * venue_failure_rate
            + self.config.correlation_weight * correlation)
            .max(Decimal::ZERO)
            .min(Decimal::ONE);

        RiskAssessment {
            opportunity_id: opportunity.id,
            score,
            depth_ratio,
            venue_failure_rate,
            correlation,
            sandwich_risk: depth_ratio > self.config.sandwich_depth_threshold,
        }
    }

    /// Score an unsized path as a trade of `notional` currency into an empty
    /// portfolio. Missing prices or depths score as fully depth-bound.
    pub fn assess_path(
        &self,
        path: &Path,
        snapshot: &MarketSnapshot,
        notional: Decimal,
        history: &PerformanceTracker,
    ) -> Decimal {
        let depth_term = self
            .path_depth_ratio(path, snapshot, notional)
            .and_then(|ratio| {
                let limit = self.max_position_pct_of_depth.to_f64()?;
                (limit > 0.0).then(|| (ratio / limit).min(1.0))
            })
            .and_then(Decimal::from_f64)
            .unwrap_or(Decimal::ONE);

        let venues: BTreeSet<VenueId> = path
            .hops
            .iter()
            .filter_map(|hop| snapshot.pool(hop.pool))
            .map(|pool| pool.meta.venue.clone())
            .collect();
        let venue_failure_rate = if venues.is_empty() {
            Decimal::ZERO
        } else {
            venues
                .iter()
                .map(|venue| history.venue_failure_rate(venue))
                .sum::<Decimal>()
                / Decimal::from(venues.len())
        };

        (self.config.depth_weight * depth_term + self.config.failure_weight * venue_failure_rate)
            .max(Decimal::ZERO)
            .min(Decimal::ONE)
    }

    /// Largest share of a hop's depth the path consumes when entered with
    /// `notional` currency at spot rates
    fn path_depth_ratio(
        &self,
        path: &Path,
        snapshot: &MarketSnapshot,
        notional: Decimal,
    ) -> Option<f64> {
        let price = snapshot.token(path.start)?.reference_price.to_f64()?;
        if price <= 0.0 {
            return None;
        }
        let mut amount = notional.to_f64()? / price;
        let mut worst = 0.0_f64;
        for hop in &path.hops {
            let edge = snapshot.edge(hop.pool, hop.from)?;
            let depth = edge.depth.to_f64()?;
            if depth <= 0.0 {
                return None;
            }
            worst = worst.max(amount / depth);
            amount *= edge.effective_rate();
        }
        Some(worst)
    }

    /// How much of the route's token and venue budget is already spoken for
    fn correlation(&self, opportunity: &ArbitrageOpportunity, portfolio: &PortfolioState) -> Decimal {
        let share = |exposure: Decimal, cap: Decimal| {
            if cap > Decimal::ZERO {
                exposure / cap
            } else {
                Decimal::ONE
            }
        };
        let token_cap = self.token_cap(portfolio);
        let venue_cap = self.venue_cap(portfolio);

        let tokens = opportunity
            .token_addresses()
            .into_iter()
            .map(|token| share(portfolio.token(&token), token_cap));
        let venues = opportunity
            .venues()
            .into_iter()
            .map(|venue| share(portfolio.venue(&venue), venue_cap));

        tokens
            .chain(venues)
            .max()
            .unwrap_or_default()
            .max(Decimal::ZERO)
            .min(Decimal::ONE)
    }

    /// Hard caps for an allocation of `amount` currency
    pub fn check(
        &self,
        amount: Decimal,
        opportunity: &ArbitrageOpportunity,
        portfolio: &PortfolioState,
    ) -> Result<(), ArbitrageError> {
        let exceeded = |limit: String, requested: Decimal, allowed: Decimal| {
            Err(ArbitrageError::RiskLimitExceeded {
                limit,
                requested,
                allowed,
            })
        };

        let trade_cap = self.trade_cap(portfolio);
        if amount > trade_cap {
            return exceeded("max_risk_per_trade".to_string(), amount, trade_cap);
        }

        let token_cap = self.token_cap(portfolio);
        for token in opportunity.token_addresses() {
            let requested = portfolio.token(&token) + amount;
            if requested > token_cap {
                return exceeded(format!("max_risk_per_token({})", token), requested, token_cap);
            }
        }

        let venue_cap = self.venue_cap(portfolio);
        for venue in opportunity.venues() {
            let requested = portfolio.venue(&venue) + amount;
            if requested > venue_cap {
                return exceeded(format!("max_risk_per_dex({})", venue), requested, venue_cap);
            }
        }

        Ok(())
    }

    /// Largest amount not above `amount` that passes `check`
    pub fn cap(
        &self,
        amount: Decimal,
        opportunity: &ArbitrageOpportunity,
        portfolio: &PortfolioState,
    ) -> Decimal {
        let token_cap = self.token_cap(portfolio);
        let venue_cap = self.venue_cap(portfolio);
        let token_room = opportunity
            .token_addresses()
            .iter()
            .map(|token| token_cap - portfolio.token(token))
            .min();
        let venue_room = opportunity
            .venues()
            .iter()
            .map(|venue| venue_cap - portfolio.venue(venue))
            .min();

        [Some(amount), Some(self.trade_cap(portfolio)), token_room, venue_room]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or_default()
            .max(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::opportunity;
    use rust_decimal_macros::dec;

    fn manager() -> RiskManager {
        RiskManager::new(RiskConfig::default(), &ExecutionConfig::default())
    }

    #[test]
    fn test_caps_scale_with_total_capital() {
        let risk = manager();
        let opp = opportunity(&["uniswap_v2", "sushiswap"], dec!(100), dec!(5));
        let portfolio = PortfolioState::new(dec!(10000));

        // 10% per trade
        assert!(risk.check(dec!(1000), &opp, &portfolio).is_ok());
        let err = risk.check(dec!(1001), &opp, &portfolio).unwrap_err();
        assert!(matches!(
            err,
            ArbitrageError::RiskLimitExceeded { ref limit, .. } if limit == "max_risk_per_trade"
        ));
        assert_eq!(risk.cap(dec!(5000), &opp, &portfolio), dec!(1000));
    }

    #[test]
    fn test_token_exposure_accumulates() {
        let risk = manager();
        let opp = opportunity(&["uniswap_v2", "sushiswap"], dec!(100), dec!(5));
        let mut portfolio = PortfolioState::new(dec!(10000));
        portfolio.add(&opp, dec!(1000));
        portfolio.add(&opp, dec!(1000));

        // 25% per token leaves 500 of room on every token of the route
        assert_eq!(risk.cap(dec!(1000), &opp, &portfolio), dec!(500));
        assert!(risk.check(dec!(600), &opp, &portfolio).is_err());
        assert!(risk.check(dec!(500), &opp, &portfolio).is_ok());
    }

    #[test]
    fn test_path_score_tracks_depth_and_venue_history() {
        use crate::interfaces::{PoolQuote, PoolState};
        use crate::testing::v2_meta;
        use crate::types::{ExecutionResult, ExecutionState, Token, TokenId};

        let a = Token::new("0x00000000000000000000000000000000000000a0", "A", 18);
        let b = Token::new("0x00000000000000000000000000000000000000b0", "B", 18);
        let pool = |address: &str, venue: &str, reserve_a: Decimal, reserve_b: Decimal| {
            (
                v2_meta(address, venue, &a, &b, 30),
                PoolQuote {
                    state: PoolState::ConstantProduct {
                        reserve0: reserve_a,
                        reserve1: reserve_b,
                    },
                    as_of_ms: 1_000,
                },
            )
        };
        let (snapshot, _) = MarketSnapshot::from_parts(
            vec![
                pool("0x01", "uniswap_v2", dec!(100000), dec!(110000)),
                pool("0x02", "sushiswap", dec!(100000), dec!(100000)),
            ],
            10_000,
            1_000,
        );
        let start = TokenId(0);
        let finder = crate::path_finder::PathFinder::new(&Default::default());
        let paths = finder.find_paths(&snapshot, start, 4);
        let path = paths.first().expect("cross-venue cycle");

        let risk = manager();
        let history = PerformanceTracker::new();

        // 100 of 100000 is far inside the 5% depth limit; 10000 is past it
        let small = risk.assess_path(path, &snapshot, dec!(100), &history);
        let large = risk.assess_path(path, &snapshot, dec!(10000), &history);
        assert!(small < large);
        assert_eq!(large, RiskConfig::default().depth_weight);

        for _ in 0..4 {
            history.record_result(&ExecutionResult::failed(
                &crate::testing::opportunity(&["uniswap_v2"], dec!(1), dec!(1)),
                &ArbitrageError::SimulationFailure {
                    reason: "reverted".to_string(),
                },
                ExecutionState::Simulated { passed: false },
            ));
        }
        assert!(risk.assess_path(path, &snapshot, dec!(100), &history) > small);
    }

    #[test]
    fn test_assessment_factors() {
        let risk = manager();
        let history = PerformanceTracker::new();
        let opp = opportunity(&["uniswap_v2"], dec!(100), dec!(5));
        let portfolio = PortfolioState::new(dec!(10000));

        let quiet = risk.assess(&opp, dec!(1), &portfolio, &history);
        assert_eq!(quiet.correlation, dec!(0));
        assert_eq!(quiet.venue_failure_rate, dec!(0));
        assert!(!quiet.sandwich_risk);

        // Trading at 100x the optimal size eats into the pools
        let heavy = risk.assess(&opp, dec!(100), &portfolio, &history);
        assert!(heavy.score > quiet.score);
        assert!(heavy.sandwich_risk);

        let mut exposed = PortfolioState::new(dec!(10000));
        exposed.add(&opp, dec!(1250));
        let correlated = risk.assess(&opp, dec!(1), &exposed, &history);
        // 1250 of a 2500 token cap
        assert_eq!(correlated.correlation, dec!(0.5));
    }
}
