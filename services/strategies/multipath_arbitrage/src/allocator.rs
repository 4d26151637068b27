//! # CapitalAllocator - Kelly Sizing Over a Shared Ledger
//!
//! ## Purpose
//!
//! Walks the optimizer's opportunities in ranked order and commits capital to
//! each one, one at a time, against the `CapitalLedger`. The ledger is the only
//! mutable state shared between cycles and in-flight executions, so it sits
//! behind a `tokio::sync::Mutex` and allocation holds the lock for the whole pass.
//!
//! ## Sizing
//!
//! ```text
//! p = confidence, q = 1 - p, b = expected_profit / input_value
//! f* = (p·b - q) / b                           rejected when f* <= 0
//! f  = clamp(kelly_fraction · f*, min_allocation_percent, max_allocation_percent)
//! amount = min(f · usable_capital, remaining, input_value) → RiskManager caps
//! ```
//!
//! Down-sizing scales the route's pre-gas profit linearly and pays the full gas
//! bill, so a route shrunk too far falls under `min_profit_threshold` and is
//! rejected instead.

use crate::config::{AllocationConfig, ArbitrageConfig};
use crate::error::{ArbitrageError, ReasonCode};
use crate::metrics::PerformanceTracker;
use crate::risk::{PortfolioState, RiskManager};
use crate::types::{
    ArbitrageOpportunity, CapitalAllocation, OpportunityId, RejectedOpportunity, VenueId,
};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
struct Reservation {
    amount: Decimal,
    tokens: BTreeSet<String>,
    venues: BTreeSet<VenueId>,
}

/// Capital committed to opportunities that have not finished executing
#[derive(Debug, Clone)]
pub struct CapitalLedger {
    total_capital: Decimal,
    reserve_percentage: Decimal,
    reservations: BTreeMap<OpportunityId, Reservation>,
}

pub type SharedLedger = Arc<Mutex<CapitalLedger>>;

impl CapitalLedger {
    pub fn new(config: &AllocationConfig) -> Self {
        Self {
            total_capital: config.total_capital,
            reserve_percentage: config.reserve_percentage,
            reservations: BTreeMap::new(),
        }
    }

    pub fn shared(config: &AllocationConfig) -> SharedLedger {
        Arc::new(Mutex::new(Self::new(config)))
    }

    pub fn total_capital(&self) -> Decimal {
        self.total_capital
    }

    /// `total_capital × (1 - reserve_percentage)`
    pub fn usable_total(&self) -> Decimal {
        self.total_capital * (Decimal::ONE - self.reserve_percentage)
    }

    pub fn allocated(&self) -> Decimal {
        self.reservations.values().map(|r| r.amount).sum()
    }

    pub fn remaining(&self) -> Decimal {
        (self.usable_total() - self.allocated()).max(Decimal::ZERO)
    }

    pub fn is_reserved(&self, id: &OpportunityId) -> bool {
        self.reservations.contains_key(id)
    }

    pub fn reserve(
        &mut self,
        opportunity: &ArbitrageOpportunity,
        amount: Decimal,
    ) -> Result<(), ArbitrageError> {
        let remaining = self.remaining();
        if amount > remaining {
            return Err(ArbitrageError::CapitalExhausted { remaining });
        }
        self.reservations.insert(
            opportunity.id,
            Reservation {
                amount,
                tokens: opportunity.token_addresses(),
                venues: opportunity.venues(),
            },
        );
        Ok(())
    }

    /// Return the capital of a finished or abandoned opportunity
    pub fn release(&mut self, id: &OpportunityId) -> Option<Decimal> {
        self.reservations.remove(id).map(|r| r.amount)
    }

    /// Release and book the realized profit into total capital
    pub fn settle(&mut self, id: &OpportunityId, realized_profit: Decimal) -> Option<Decimal> {
        let released = self.release(id)?;
        self.total_capital += realized_profit;
        Some(released)
    }

    /// Exposure of every open reservation, for the RiskManager
    pub fn portfolio(&self) -> PortfolioState {
        let mut portfolio = PortfolioState::new(self.total_capital);
        for reservation in self.reservations.values() {
            for token in &reservation.tokens {
                *portfolio.token_exposure.entry(token.clone()).or_default() += reservation.amount;
            }
            for venue in &reservation.venues {
                *portfolio.venue_exposure.entry(venue.clone()).or_default() += reservation.amount;
            }
        }
        portfolio
    }
}

#[derive(Debug, Default)]
pub struct AllocationOutcome {
    pub allocations: Vec<(ArbitrageOpportunity, CapitalAllocation)>,
    pub rejected: Vec<RejectedOpportunity>,
}

#[derive(Debug, Clone)]
pub struct CapitalAllocator {
    config: ArbitrageConfig,
}

impl CapitalAllocator {
    pub fn new(config: ArbitrageConfig) -> Self {
        Self { config }
    }

    /// Full-Kelly fraction `f*` for an opportunity
    pub fn kelly_edge(&self, opportunity: &ArbitrageOpportunity) -> Decimal {
        let input_value = opportunity.input_value();
        if input_value <= Decimal::ZERO || opportunity.expected_profit <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let odds = opportunity.expected_profit / input_value;
        let p = opportunity.confidence;
        let q = Decimal::ONE - p;
        (p * odds - q) / odds
    }

    fn fraction(&self, edge: Decimal) -> Decimal {
        let allocation = &self.config.allocation;
        (allocation.kelly_fraction * edge)
            .max(allocation.min_allocation_percent)
            .min(allocation.max_allocation_percent)
    }

    /// Commit capital to `opportunities` in the order given
    pub fn allocate(
        &self,
        opportunities: Vec<ArbitrageOpportunity>,
        ledger: &mut CapitalLedger,
        risk: &RiskManager,
        history: &PerformanceTracker,
    ) -> AllocationOutcome {
        let mut outcome = AllocationOutcome::default();
        let usable = ledger.usable_total();

        for opportunity in opportunities {
            let remaining = ledger.remaining();
            if remaining <= Decimal::ZERO {
                outcome.rejected.push(RejectedOpportunity::from_error(
                    Some(opportunity.id),
                    &ArbitrageError::CapitalExhausted { remaining },
                ));
                continue;
            }

            match self.size(&opportunity, usable, ledger, risk, history) {
                Ok(allocation) => {
                    debug!(
                        "💰 Allocated {} ({}x of optimal) to {}",
                        allocation.amount.round_dp(4),
                        allocation.scale.round_dp(4),
                        opportunity.id
                    );
                    outcome.allocations.push((opportunity, allocation));
                }
                Err(rejection) => outcome.rejected.push(rejection),
            }
        }

        info!(
            "🏦 Allocation: {} committed, {} rejected, {} usable capital left",
            outcome.allocations.len(),
            outcome.rejected.len(),
            ledger.remaining().round_dp(4)
        );
        outcome
    }

    fn size(
        &self,
        opportunity: &ArbitrageOpportunity,
        usable: Decimal,
        ledger: &mut CapitalLedger,
        risk: &RiskManager,
        history: &PerformanceTracker,
    ) -> Result<CapitalAllocation, RejectedOpportunity> {
        let reject = |e: ArbitrageError| RejectedOpportunity::from_error(Some(opportunity.id), &e);

        let input_value = opportunity.input_value();
        if input_value <= Decimal::ZERO {
            return Err(reject(ArbitrageError::InsufficientLiquidity(
                "opportunity has no input size".to_string(),
            )));
        }

        let edge = self.kelly_edge(opportunity);
        if edge <= Decimal::ZERO {
            return Err(reject(ArbitrageError::RiskLimitExceeded {
                limit: "kelly_edge".to_string(),
                requested: edge,
                allowed: Decimal::ZERO,
            }));
        }
        let fraction = self.fraction(edge);

        let wanted = (fraction * usable).min(ledger.remaining()).min(input_value);
        let portfolio = ledger.portfolio();
        let amount = risk.cap(wanted, opportunity, &portfolio);
        let down_sized = amount < wanted;
        if amount <= Decimal::ZERO {
            return Err(reject(ArbitrageError::RiskLimitExceeded {
                limit: "risk_caps".to_string(),
                requested: wanted,
                allowed: Decimal::ZERO,
            }));
        }
        risk.check(amount, opportunity, &portfolio).map_err(reject)?;

        let scale = amount / input_value;
        let expected_profit =
            (opportunity.expected_profit + opportunity.gas_cost) * scale - opportunity.gas_cost;
        if !self.config.clears_profit_threshold(expected_profit) {
            let reason = if down_sized {
                ReasonCode::RiskLimitExceeded
            } else {
                ReasonCode::BelowProfitThreshold
            };
            return Err(RejectedOpportunity::new(
                Some(opportunity.id),
                reason,
                format!(
                    "profit {} at allocated size {} does not clear {}",
                    expected_profit.round_dp(6),
                    amount.round_dp(6),
                    self.config.min_profit_threshold
                ),
            ));
        }

        let assessment = risk.assess(opportunity, scale, &portfolio, history);
        ledger.reserve(opportunity, amount).map_err(reject)?;

        let price = opportunity.start_token.reference_price;
        Ok(CapitalAllocation {
            opportunity_id: opportunity.id,
            amount,
            token_amount: if price > Decimal::ZERO {
                amount / price
            } else {
                Decimal::ZERO
            },
            fraction,
            scale,
            expected_profit,
            down_sized,
            risk: assessment,
        })
    }
}
