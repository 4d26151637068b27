//! Performance tracking and venue history
//!
//! Every `ExecutionResult` lands here. Per-venue attempt/success counts feed
//! the ranker's historical success term, the optimizer's confidence, and the
//! RiskManager's venue failure rate; the totals back
//! `get_performance_metrics()`.

use crate::error::ReasonCode;
use crate::types::{ExecutionResult, ExecutionState, RejectedOpportunity, VenueId};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use torq_strategy_shared::{MetricsCollector, StrategyMetrics};

/// Pseudo-successes credited to every venue so a single failure does not
/// write a venue off
const VENUE_PRIOR_WEIGHT: u64 = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct VenueStats {
    pub attempts: u64,
    pub successes: u64,
}

impl VenueStats {
    pub fn success_rate(&self) -> Decimal {
        Decimal::from(self.successes + VENUE_PRIOR_WEIGHT)
            / Decimal::from(self.attempts + VENUE_PRIOR_WEIGHT)
    }
}

/// Snapshot of engine performance for dashboards and the CLI
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedStats {
    pub strategy: StrategyMetrics,
    pub discovered: u64,
    pub allocated: u64,
    pub rejected_by_reason: BTreeMap<ReasonCode, u64>,
    pub executions: u64,
    pub simulations_passed: u64,
    pub submissions: u64,
    pub included: u64,
    pub abandoned: u64,
    pub realized_profit: Decimal,
    pub gas_used: u64,
    /// Included / executions
    pub success_rate: Decimal,
    pub venues: BTreeMap<String, VenueStats>,
}

#[derive(Debug, Default)]
struct TrackerState {
    venues: HashMap<VenueId, VenueStats>,
    discovered: u64,
    allocated: u64,
    rejected: BTreeMap<ReasonCode, u64>,
    executions: u64,
    simulations_passed: u64,
    submissions: u64,
    included: u64,
    abandoned: u64,
    realized_profit: Decimal,
    gas_used: u64,
}

#[derive(Debug, Default)]
pub struct PerformanceTracker {
    collector: MetricsCollector,
    state: RwLock<TrackerState>,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cycle(&self) {
        self.collector.increment_cycles();
    }

    pub fn record_error(&self) {
        self.collector.increment_errors();
    }

    pub fn record_discovered(&self, count: usize) {
        self.collector.add_opportunities(count as u64);
        self.state.write().discovered += count as u64;
    }

    pub fn record_allocated(&self, count: usize) {
        self.state.write().allocated += count as u64;
    }

    pub fn record_rejections(&self, rejected: &[RejectedOpportunity]) {
        let mut state = self.state.write();
        for rejection in rejected {
            *state.rejected.entry(rejection.reason).or_default() += 1;
        }
    }

    pub fn record_result(&self, result: &ExecutionResult) {
        if result.success {
            self.collector.increment_trades();
        }

        let mut state = self.state.write();
        state.executions += 1;
        state.submissions += u64::from(result.submissions);
        state.gas_used += result.gas_used;
        if result
            .steps
            .iter()
            .any(|step| step.state == ExecutionState::Simulated { passed: true })
        {
            state.simulations_passed += 1;
        }
        match result.final_state {
            ExecutionState::Included { .. } => state.included += 1,
            ExecutionState::Abandoned => state.abandoned += 1,
            _ => {}
        }
        if result.success {
            state.realized_profit += result.realized_profit;
        }
        if let Some(reason) = result.failure {
            *state.rejected.entry(reason).or_default() += 1;
        }

        // Only outcomes the venues themselves influenced count toward history
        let attempted = result.success
            || matches!(
                result.failure,
                Some(ReasonCode::SimulationFailure) | Some(ReasonCode::BundleNotIncluded)
            );
        if attempted {
            for venue in &result.venues {
                let stats = state.venues.entry(venue.clone()).or_default();
                stats.attempts += 1;
                if result.success {
                    stats.successes += 1;
                }
            }
        }
    }

    /// Smoothed historical success rate of a venue, in (0, 1]
    pub fn venue_success_rate(&self, venue: &VenueId) -> Decimal {
        self.state
            .read()
            .venues
            .get(venue)
            .copied()
            .unwrap_or_default()
            .success_rate()
    }

    pub fn venue_failure_rate(&self, venue: &VenueId) -> Decimal {
        Decimal::ONE - self.venue_success_rate(venue)
    }

    pub fn strategy_metrics(&self) -> StrategyMetrics {
        self.collector.get_metrics()
    }

    pub fn aggregated(&self) -> AggregatedStats {
        let state = self.state.read();
        let success_rate = if state.executions == 0 {
            Decimal::ZERO
        } else {
            Decimal::from(state.included) / Decimal::from(state.executions)
        };
        AggregatedStats {
            strategy: self.collector.get_metrics(),
            discovered: state.discovered,
            allocated: state.allocated,
            rejected_by_reason: state.rejected.clone(),
            executions: state.executions,
            simulations_passed: state.simulations_passed,
            submissions: state.submissions,
            included: state.included,
            abandoned: state.abandoned,
            realized_profit: state.realized_profit,
            gas_used: state.gas_used,
            success_rate,
            venues: state
                .venues
                .iter()
                .map(|(venue, stats)| (venue.to_string(), *stats))
                .collect(),
        }
    }
}
