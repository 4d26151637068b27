//! # Bundle Executor - Simulate, Submit, Monitor
//!
//! ## Purpose
//!
//! Drives one allocated opportunity through its execution state machine:
//!
//! ```text
//! Allocated → Built → Simulated(pass|fail) → Submitted → Included
//!                            ↑                   ↓ not included
//!                            └──── Retried (fee bump, re-target) ──→ Abandoned
//! ```
//!
//! Every submission, including each fee-bumped resubmission, is preceded by a
//! simulation of exactly that bundle which must pass. A simulation passes when
//! no leg reverts, the simulated profit after gas clears `min_profit_threshold`,
//! and the observed start-token delta is within `max_slippage` of the
//! optimizer's estimate. Failure ends the opportunity before anything reaches
//! the chain; flash loans revert atomically on non-inclusion, so no capital is
//! at risk past simulation either.
//!
//! ## Error Propagation
//!
//! Opportunity-scoped failures (revert, timeout, non-inclusion) come back as an
//! `ExecutionResult` with a reason code. Only relay and network connectivity
//! faults return `Err`.
//!
//! Every relay and network call runs under its own deadline: simulation under
//! `simulation_timeout_ms`, status polling under what is left of
//! `inclusion_timeout_ms`, everything else under `request_timeout_ms`.

use crate::bundle_builder::ArbitrageBundleBuilder;
use crate::config::ArbitrageConfig;
use crate::error::{ArbitrageError, Result};
use crate::flash_loan::LoanPlan;
use crate::interfaces::{GasQuote, NetworkConditions, PrivateRelay};
use crate::types::{
    ArbitrageOpportunity, CapitalAllocation, ExecutionResult, ExecutionState, ExecutionStep,
};
use mev::{Bundle, BundleId, BundleStatus, SimulationOutcome};
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Everything execution needs about one funded opportunity
pub struct ExecutionPlan<'a> {
    pub opportunity: &'a ArbitrageOpportunity,
    pub allocation: &'a CapitalAllocation,
    pub loan: &'a LoanPlan,
    pub nonce: u64,
}

/// Step recorder with per-step timing
struct Timeline {
    started: Instant,
    last: Instant,
    steps: Vec<ExecutionStep>,
}

impl Timeline {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            last: now,
            steps: Vec::new(),
        }
    }

    fn record(&mut self, state: ExecutionState, detail: Option<String>) {
        let now = Instant::now();
        self.steps.push(ExecutionStep {
            state,
            duration_ms: now.duration_since(self.last).as_millis() as u64,
            detail,
        });
        self.last = now;
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

/// Await one external call, turning a stall into `ArbitrageError::Timeout`
pub(crate) async fn bounded<T, E>(
    operation: &str,
    budget: Duration,
    call: impl Future<Output = std::result::Result<T, E>>,
) -> Result<T>
where
    ArbitrageError: From<E>,
{
    match timeout(budget, call).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(ArbitrageError::Timeout {
            operation: operation.to_string(),
            timeout_ms: budget.as_millis() as u64,
        }),
    }
}

/// Simulation that cleared every check
struct ClearedSimulation {
    net_profit: Decimal,
    gas_used: u64,
}

pub struct BundleExecutor {
    config: ArbitrageConfig,
    builder: ArbitrageBundleBuilder,
    relay: Arc<dyn PrivateRelay>,
    network: Arc<dyn NetworkConditions>,
}

impl BundleExecutor {
    pub fn new(
        config: ArbitrageConfig,
        relay: Arc<dyn PrivateRelay>,
        network: Arc<dyn NetworkConditions>,
    ) -> Self {
        Self {
            builder: ArbitrageBundleBuilder::new(config.clone()),
            config,
            relay,
            network,
        }
    }

    pub async fn execute(&self, plan: ExecutionPlan<'_>) -> Result<ExecutionResult> {
        let opportunity = plan.opportunity;
        let mut timeline = Timeline::new();
        timeline.record(ExecutionState::Allocated, None);

        let request = Duration::from_millis(self.config.network.request_timeout_ms);
        let conditions = async {
            let gas = bounded("gas_quote", request, self.network.gas_quote()).await?;
            let block = bounded("current_block", request, self.network.current_block()).await?;
            Ok::<_, ArbitrageError>((gas, block))
        };
        let (gas, block) = match conditions.await {
            Ok(conditions) => conditions,
            Err(e) if e.is_cycle_fatal() => return Err(e),
            Err(e) => {
                warn!("⌛ Network conditions unavailable for {}: {}", opportunity.id, e);
                return Ok(self.failure(opportunity, &e, ExecutionState::Abandoned, timeline, 0));
            }
        };

        let mut bundle = match self.builder.build(
            opportunity,
            plan.allocation,
            plan.loan,
            &gas,
            block,
            plan.nonce,
        ) {
            Ok(bundle) => bundle,
            Err(e) if e.is_cycle_fatal() => return Err(e),
            Err(e) => return Ok(self.failure(opportunity, &e, ExecutionState::Abandoned, timeline, 0)),
        };
        timeline.record(
            ExecutionState::Built,
            Some(format!("{} txs, {} gas", bundle.transaction_count(), bundle.estimate_gas())),
        );

        let mut cleared = match self.simulate_and_check(&bundle, &plan, &gas).await {
            Ok(cleared) => cleared,
            Err(e) if e.is_cycle_fatal() => return Err(e),
            Err(e) => {
                timeline.record(ExecutionState::Simulated { passed: false }, Some(e.to_string()));
                warn!("🧪 Simulation rejected {}: {}", opportunity.id, e);
                return Ok(self.failure(
                    opportunity,
                    &e,
                    ExecutionState::Simulated { passed: false },
                    timeline,
                    0,
                ));
            }
        };
        timeline.record(
            ExecutionState::Simulated { passed: true },
            Some(format!("net profit {}", cleared.net_profit.round_dp(6))),
        );

        if self.config.execution.dry_run {
            info!(
                "🧪 Dry run: {} simulated at {} net profit, not submitted",
                opportunity.id,
                cleared.net_profit.round_dp(6)
            );
            let mut result = self.outcome(opportunity, timeline, ExecutionState::Simulated { passed: true });
            result.gas_used = cleared.gas_used;
            result.failure_detail = Some("dry run".to_string());
            return Ok(result);
        }

        let retry_limit = self.config.execution.retry_limit;
        let mut submissions = 0u32;
        for attempt in 0..=retry_limit {
            if attempt > 0 {
                let block = match bounded("current_block", request, self.network.current_block()).await {
                    Ok(block) => block,
                    Err(e) if e.is_cycle_fatal() => return Err(e),
                    Err(e) => {
                        return Ok(self.failure(
                            opportunity,
                            &e,
                            ExecutionState::Abandoned,
                            timeline,
                            submissions,
                        ))
                    }
                };
                bundle = bundle.with_bumped_priority_fee(self.config.execution.fee_bump_percent);
                let span = bundle.last_block - bundle.first_block;
                bundle.first_block = block + 1;
                bundle.last_block = block + 1 + span;
                timeline.record(
                    ExecutionState::Retried { attempt },
                    Some(format!("blocks {}..={}", bundle.first_block, bundle.last_block)),
                );

                cleared = match self.simulate_and_check(&bundle, &plan, &gas).await {
                    Ok(cleared) => cleared,
                    Err(e) if e.is_cycle_fatal() => return Err(e),
                    Err(e) => {
                        timeline.record(ExecutionState::Simulated { passed: false }, Some(e.to_string()));
                        return Ok(self.failure(
                            opportunity,
                            &e,
                            ExecutionState::Abandoned,
                            timeline,
                            submissions,
                        ));
                    }
                };
                timeline.record(ExecutionState::Simulated { passed: true }, None);
            }

            let submitted = bounded(
                "submit_bundle",
                request,
                self.relay.submit_bundle(&bundle.transactions, bundle.target_blocks()),
            )
            .await;
            let bundle_id = match submitted {
                Ok(bundle_id) => bundle_id,
                Err(e) if e.is_cycle_fatal() => return Err(e),
                Err(e) => {
                    warn!("❌ Submission of {} failed: {}", opportunity.id, e);
                    timeline.record(ExecutionState::Abandoned, Some(e.to_string()));
                    return Ok(self.failure(
                        opportunity,
                        &e,
                        ExecutionState::Abandoned,
                        timeline,
                        submissions,
                    ));
                }
            };
            submissions += 1;
            timeline.record(
                ExecutionState::Submitted { attempt },
                Some(bundle_id.to_string()),
            );

            let included = match self.await_inclusion(&bundle_id).await {
                Ok(included) => included,
                Err(e) if e.is_cycle_fatal() => return Err(e),
                Err(e) => {
                    warn!("❌ Lost track of bundle {}: {}", bundle_id, e);
                    timeline.record(ExecutionState::Abandoned, Some(e.to_string()));
                    return Ok(self.failure(
                        opportunity,
                        &e,
                        ExecutionState::Abandoned,
                        timeline,
                        submissions,
                    ));
                }
            };
            if let Some(block_number) = included {
                let state = ExecutionState::Included { block_number };
                timeline.record(state, None);
                info!(
                    "✅ {} included in block {} after {} submission(s), profit {}",
                    opportunity.id,
                    block_number,
                    submissions,
                    cleared.net_profit.round_dp(6)
                );
                let mut result = self.outcome(opportunity, timeline, state);
                result.success = true;
                result.realized_profit = cleared.net_profit;
                result.gas_used = cleared.gas_used;
                result.bundle_id = Some(bundle_id.0);
                result.submissions = submissions;
                return Ok(result);
            }
            debug!("⌛ Bundle {} not included (attempt {})", bundle_id, attempt);
        }

        let error = ArbitrageError::BundleNotIncluded { submissions };
        warn!("❌ Abandoning {}: {}", opportunity.id, error);
        timeline.record(ExecutionState::Abandoned, Some(error.to_string()));
        Ok(self.failure(opportunity, &error, ExecutionState::Abandoned, timeline, submissions))
    }

    async fn simulate_and_check(
        &self,
        bundle: &Bundle,
        plan: &ExecutionPlan<'_>,
        gas: &GasQuote,
    ) -> Result<ClearedSimulation> {
        let timeout_ms = self.config.execution.simulation_timeout_ms;
        let outcome = timeout(
            Duration::from_millis(timeout_ms),
            self.relay.simulate_bundle(&bundle.transactions),
        )
        .await
        .map_err(|_| ArbitrageError::Timeout {
            operation: "simulate_bundle".to_string(),
            timeout_ms,
        })??;

        self.check_simulation(&outcome, bundle, plan, gas)
    }

    fn check_simulation(
        &self,
        outcome: &SimulationOutcome,
        bundle: &Bundle,
        plan: &ExecutionPlan<'_>,
        gas: &GasQuote,
    ) -> Result<ClearedSimulation> {
        let failure = |reason: String| Err(ArbitrageError::SimulationFailure { reason });
        let opportunity = plan.opportunity;

        if !outcome.success {
            return failure(
                outcome
                    .revert_reason
                    .clone()
                    .unwrap_or_else(|| "bundle reverted".to_string()),
            );
        }

        let token = &opportunity.start_token;
        let observed = outcome.state_diff.get(&token.address).copied();
        let profit_value = match observed {
            Some(delta) => delta * token.reference_price,
            None => outcome.profit * gas.native_token_price,
        };

        let priority_gwei = bundle
            .transactions
            .first()
            .map(|tx| Decimal::from(tx.max_priority_fee_per_gas) / Decimal::from(1_000_000_000u64))
            .unwrap_or(gas.priority_fee_gwei);
        let gas_cost = gas.cost_with_priority(outcome.gas_used, priority_gwei);
        let net_profit = profit_value - gas_cost;

        if !self.config.clears_profit_threshold(net_profit) {
            return failure(format!(
                "simulated profit {} after {} gas does not clear {}",
                net_profit.round_dp(6),
                gas_cost.round_dp(6),
                self.config.min_profit_threshold
            ));
        }

        if let Some(delta) = observed {
            let expected = (opportunity.expected_output - opportunity.input_amount) * plan.allocation.scale;
            let input = plan.allocation.token_amount;
            if input > Decimal::ZERO {
                let shortfall = (expected - delta) / input;
                if shortfall > self.config.execution.max_slippage {
                    return failure(format!(
                        "state diff {} {} is {} short of the estimated {}",
                        delta,
                        token.symbol,
                        shortfall.round_dp(6),
                        expected.round_dp(6)
                    ));
                }
            }
        }

        Ok(ClearedSimulation {
            net_profit,
            gas_used: outcome.gas_used,
        })
    }

    /// Poll until included, expired, or the inclusion timeout passes.
    /// A status call still unanswered at the deadline is a `Timeout`.
    async fn await_inclusion(&self, bundle_id: &BundleId) -> Result<Option<u64>> {
        let timeout_ms = self.config.execution.inclusion_timeout_ms;
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let poll = Duration::from_millis(self.config.execution.status_poll_interval_ms.max(1));
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let status = timeout(remaining, self.relay.get_bundle_status(bundle_id))
                .await
                .map_err(|_| ArbitrageError::Timeout {
                    operation: "get_bundle_status".to_string(),
                    timeout_ms,
                })??;
            match status {
                BundleStatus::Included { block_number } => return Ok(Some(block_number)),
                BundleStatus::Expired => return Ok(None),
                BundleStatus::Pending => {
                    if Instant::now() >= deadline {
                        debug!("⌛ Inclusion timeout for bundle {}", bundle_id);
                        return Ok(None);
                    }
                    tokio::time::sleep(poll).await;
                }
            }
        }
    }

    fn outcome(
        &self,
        opportunity: &ArbitrageOpportunity,
        timeline: Timeline,
        final_state: ExecutionState,
    ) -> ExecutionResult {
        ExecutionResult {
            opportunity_id: opportunity.id,
            strategy: opportunity.strategy,
            success: false,
            realized_profit: Decimal::ZERO,
            gas_used: 0,
            failure: None,
            failure_detail: None,
            bundle_id: None,
            submissions: 0,
            final_state,
            venues: opportunity.venues().into_iter().collect(),
            execution_time_ms: timeline.elapsed_ms(),
            steps: timeline.steps,
        }
    }

    fn failure(
        &self,
        opportunity: &ArbitrageOpportunity,
        error: &ArbitrageError,
        final_state: ExecutionState,
        timeline: Timeline,
        submissions: u32,
    ) -> ExecutionResult {
        let mut result = ExecutionResult::failed(opportunity, error, final_state);
        result.submissions = submissions;
        result.execution_time_ms = timeline.elapsed_ms();
        result.steps = timeline.steps;
        result
    }
}
