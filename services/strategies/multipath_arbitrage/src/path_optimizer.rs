//! # PathOptimizer - Re-Quote, Size, and Merge
//!
//! ## Purpose
//!
//! Turns ranked paths into executable opportunities. Every pool on a ranked path
//! is read a second time, closer to execution, and the route is re-priced with the
//! venue's exact curve (constant-product or in-range concentrated liquidity).
//! The input size is the profit-maximizing amount subject to two constraints:
//! route slippage stays within `max_slippage`, and no hop trades more than
//! `max_position_pct_of_depth` of its pool. Gas (base + per hop + flash-loan
//! overhead when the wallet cannot fund the input) comes off the profit, and
//! anything left at or below `min_profit_threshold` is dropped.
//!
//! Paths that start with the same hops on batching venues are merged into one
//! route whose shared prefix runs once with the combined input, when doing so
//! beats executing them separately.
//!
//! ## Architecture Role
//!
//! ```text
//! RankedPaths → [re-quote pools] → [exact route pricing] → [golden-section sizing]
//!                    ↓ stale                                      ↓
//!               DataStaleness          gas + flash-loan overhead → threshold → [prefix merge]
//! ```

use crate::config::ArbitrageConfig;
use crate::error::{ArbitrageError, ReasonCode, Result};
use crate::interfaces::{GasQuote, MarketDataSource, PoolMeta, PoolQuote, WalletBalances};
use crate::metrics::PerformanceTracker;
use crate::path_ranker::RankedPath;
use crate::snapshot::{DirectedPool, MarketSnapshot};
use crate::types::{
    ArbitrageOpportunity, OpportunityId, Path, PathHop, PoolId, RejectedOpportunity, Route,
    StrategyId, SwapLeg, Token, TokenId, VenueId,
};
use anyhow::bail;
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};
use std::ops::Range;
use torq_amm::{AmmPool, OptimalSizeCalculator};
use tracing::{debug, info};

/// Collaborators and cycle state the optimizer reads
pub struct OptimizerInputs<'a> {
    pub snapshot: &'a MarketSnapshot,
    pub market: &'a dyn MarketDataSource,
    pub wallet: &'a dyn WalletBalances,
    pub gas: &'a GasQuote,
    pub history: &'a PerformanceTracker,
    pub now_ms: u64,
}

#[derive(Debug, Default)]
pub struct OptimizationOutcome {
    /// Ranked order preserved; a merged route takes its first path's slot
    pub opportunities: Vec<ArbitrageOpportunity>,
    pub rejected: Vec<RejectedOpportunity>,
}

#[derive(Debug, Clone)]
struct PricedHop {
    hop: PathHop,
    meta: PoolMeta,
    from_token0: bool,
    pool: DirectedPool,
    depth: Decimal,
}

impl PricedHop {
    fn token_in(&self) -> &Token {
        if self.from_token0 {
            &self.meta.token0
        } else {
            &self.meta.token1
        }
    }

    fn token_out(&self) -> &Token {
        if self.from_token0 {
            &self.meta.token1
        } else {
            &self.meta.token0
        }
    }
}

/// A path bound to freshly quoted pools
#[derive(Debug, Clone)]
struct PricedPath {
    path: Path,
    hops: Vec<PricedHop>,
    /// Product of post-fee spot rates
    spot_product: Decimal,
}

impl PricedPath {
    /// (amount_in, amount_out) per hop over `range`, or an error when a hop
    /// cannot be priced or would exceed its depth cap
    fn run(
        &self,
        range: Range<usize>,
        amount_in: Decimal,
        depth_cap: Decimal,
    ) -> anyhow::Result<Vec<(Decimal, Decimal)>> {
        let mut amount = amount_in;
        let mut flows = Vec::with_capacity(range.len());
        for priced in &self.hops[range] {
            if amount > priced.depth * depth_cap {
                bail!(
                    "{} in exceeds depth cap of pool {}",
                    amount,
                    priced.meta.address
                );
            }
            let out = priced.pool.get_amount_out(amount)?;
            flows.push((amount, out));
            amount = out;
        }
        Ok(flows)
    }

    fn legs(&self, range: Range<usize>, flows: &[(Decimal, Decimal)]) -> Vec<SwapLeg> {
        self.hops[range]
            .iter()
            .zip(flows)
            .map(|(priced, (amount_in, expected_out))| SwapLeg {
                pool: priced.hop.pool,
                pool_address: priced.meta.address.clone(),
                venue: priced.meta.venue.clone(),
                token_in: priced.token_in().clone(),
                token_out: priced.token_out().clone(),
                amount_in: *amount_in,
                expected_out: *expected_out,
                depth_in: priced.depth,
            })
            .collect()
    }

    fn start_token(&self) -> Option<&Token> {
        self.hops.first().map(PricedHop::token_in)
    }
}

/// Route economics handed to `finish`
struct RouteDraft {
    route: Route,
    start_token: Token,
    input: Decimal,
    output: Decimal,
    /// Output at spot rates, for slippage
    ideal_output: Decimal,
    swap_count: usize,
}

#[derive(Debug, Clone)]
pub struct PathOptimizer {
    config: ArbitrageConfig,
    sizing: OptimalSizeCalculator,
}

fn amm_error(err: anyhow::Error) -> ArbitrageError {
    ArbitrageError::Amm(err.to_string())
}

impl PathOptimizer {
    pub fn new(config: ArbitrageConfig) -> Self {
        Self {
            config,
            sizing: OptimalSizeCalculator::default(),
        }
    }

    pub async fn optimize(
        &self,
        ranked: &[RankedPath],
        inputs: &OptimizerInputs<'_>,
    ) -> Result<OptimizationOutcome> {
        let mut outcome = OptimizationOutcome::default();
        if ranked.is_empty() {
            return Ok(outcome);
        }

        let (fresh, failed) = self.requote(ranked, inputs).await?;

        let mut balances: HashMap<TokenId, Decimal> = HashMap::new();
        let mut sized: Vec<(ArbitrageOpportunity, PricedPath)> = Vec::new();
        for entry in ranked {
            let path = &entry.candidate.path;
            let priced = match self.price_path(path, inputs.snapshot, &fresh, &failed) {
                Ok(priced) => priced,
                Err(rejection) => {
                    debug!("Dropping path after re-quote: {}", rejection.detail);
                    outcome.rejected.push(rejection);
                    continue;
                }
            };

            let balance = self.balance(path.start, &priced, inputs, &mut balances).await?;
            match self.size_single(&priced, balance, inputs) {
                Ok(opportunity) => sized.push((opportunity, priced)),
                Err(rejection) => {
                    debug!("Dropping path after sizing: {}", rejection.detail);
                    outcome.rejected.push(rejection);
                }
            }
        }

        outcome.opportunities = self.merge_shared_prefixes(sized, &balances, inputs);
        info!(
            "💰 Optimizer kept {} of {} ranked paths ({} rejected)",
            outcome.opportunities.len(),
            ranked.len(),
            outcome.rejected.len()
        );
        Ok(outcome)
    }

    /// Second read of every pool on a ranked path. A connectivity failure on
    /// every single pool is fatal; anything less only drops affected paths.
    async fn requote(
        &self,
        ranked: &[RankedPath],
        inputs: &OptimizerInputs<'_>,
    ) -> Result<(HashMap<PoolId, PoolQuote>, HashMap<PoolId, RejectedOpportunity>)> {
        let pool_ids: BTreeSet<PoolId> = ranked
            .iter()
            .flat_map(|entry| entry.candidate.path.pools())
            .collect();
        let market = inputs.market;
        let snapshot = inputs.snapshot;

        let results: Vec<(PoolId, Option<Result<PoolQuote>>)> = stream::iter(pool_ids)
            .map(|id| async move {
                match snapshot.pool(id) {
                    Some(pool) => (id, Some(market.get_reserves_or_tick_state(&pool.meta).await)),
                    None => (id, None),
                }
            })
            .buffered(self.config.discovery.concurrency_limit.max(1))
            .collect()
            .await;

        let total = results.len();
        let mut fresh = HashMap::new();
        let mut failed = HashMap::new();
        let mut fatal = None;
        let mut fatal_count = 0usize;

        for (id, result) in results {
            let address = snapshot
                .pool(id)
                .map(|pool| pool.meta.address.clone())
                .unwrap_or_default();
            match result {
                Some(Ok(quote)) => {
                    let age_ms = inputs.now_ms.saturating_sub(quote.as_of_ms);
                    if age_ms > self.config.discovery.freshness_sla_ms {
                        let stale = ArbitrageError::DataStaleness {
                            pool: address,
                            age_ms,
                            sla_ms: self.config.discovery.freshness_sla_ms,
                        };
                        failed.insert(id, RejectedOpportunity::from_error(None, &stale));
                    } else {
                        fresh.insert(id, quote);
                    }
                }
                Some(Err(e)) => {
                    if e.is_cycle_fatal() {
                        fatal_count += 1;
                    }
                    failed.insert(id, RejectedOpportunity::from_error(None, &e));
                    fatal = Some(e);
                }
                None => {
                    let missing = ArbitrageError::InvalidPath(format!("{:?} not in snapshot", id));
                    failed.insert(id, RejectedOpportunity::from_error(None, &missing));
                }
            }
        }

        if total > 0 && fatal_count == total {
            if let Some(e) = fatal {
                return Err(e);
            }
        }
        Ok((fresh, failed))
    }

    fn price_path(
        &self,
        path: &Path,
        snapshot: &MarketSnapshot,
        fresh: &HashMap<PoolId, PoolQuote>,
        failed: &HashMap<PoolId, RejectedOpportunity>,
    ) -> std::result::Result<PricedPath, RejectedOpportunity> {
        let reject = |e: ArbitrageError| RejectedOpportunity::from_error(None, &e);
        path.validate(self.config.discovery.max_hops).map_err(reject)?;

        let mut hops = Vec::with_capacity(path.hop_count());
        let mut spot_product = Decimal::ONE;
        for hop in &path.hops {
            if let Some(rejection) = failed.get(&hop.pool) {
                return Err(rejection.clone());
            }
            let (Some(pool), Some(quote)) = (snapshot.pool(hop.pool), fresh.get(&hop.pool)) else {
                return Err(reject(ArbitrageError::InvalidPath(format!(
                    "{:?} has no fresh quote",
                    hop.pool
                ))));
            };
            let from_token0 = hop.from == pool.token0;
            let directed =
                DirectedPool::from_state(&pool.meta, &quote.state, from_token0).map_err(reject)?;
            let spot = directed.spot_rate().map_err(|e| reject(amm_error(e)))?;
            let depth = directed.depth().map_err(|e| reject(amm_error(e)))?;
            spot_product *= spot;
            hops.push(PricedHop {
                hop: *hop,
                meta: pool.meta.clone(),
                from_token0,
                pool: directed,
                depth,
            });
        }

        Ok(PricedPath {
            path: path.clone(),
            hops,
            spot_product,
        })
    }

    async fn balance(
        &self,
        start: TokenId,
        priced: &PricedPath,
        inputs: &OptimizerInputs<'_>,
        cache: &mut HashMap<TokenId, Decimal>,
    ) -> Result<Decimal> {
        if let Some(balance) = cache.get(&start) {
            return Ok(*balance);
        }
        let Some(token) = priced.start_token() else {
            return Ok(Decimal::ZERO);
        };
        let balance = match inputs.wallet.balance_of(token).await {
            Ok(balance) => balance,
            Err(e) if e.is_cycle_fatal() => return Err(e),
            Err(e) => {
                debug!("Treating {} balance as zero: {}", token.symbol, e);
                Decimal::ZERO
            }
        };
        cache.insert(start, balance);
        Ok(balance)
    }

    fn size_single(
        &self,
        priced: &PricedPath,
        balance: Decimal,
        inputs: &OptimizerInputs<'_>,
    ) -> std::result::Result<ArbitrageOpportunity, RejectedOpportunity> {
        let insufficient = |detail: String| {
            RejectedOpportunity::from_error(None, &ArbitrageError::InsufficientLiquidity(detail))
        };
        let Some(start_token) = priced.start_token().cloned() else {
            return Err(insufficient("empty route".to_string()));
        };

        let depth_cap = self.config.execution.max_position_pct_of_depth;
        let max_slippage = self.config.execution.max_slippage;
        let hop_count = priced.hops.len();
        let upper = priced.hops[0].depth * depth_cap;

        let position = self
            .sizing
            .maximize(Decimal::ZERO, upper, |amount| {
                let flows = priced.run(0..hop_count, amount, depth_cap)?;
                let output = flows.last().map(|(_, out)| *out).unwrap_or_default();
                let ideal = amount * priced.spot_product;
                if ideal > Decimal::ZERO && (ideal - output) / ideal > max_slippage {
                    bail!("slippage above {}", max_slippage);
                }
                Ok(output - amount)
            })
            .map_err(|e| insufficient(e.to_string()))?;

        if position.expected_profit <= Decimal::ZERO || position.amount_in <= Decimal::ZERO {
            return Err(RejectedOpportunity::new(
                None,
                ReasonCode::BelowProfitThreshold,
                format!("no profitable size for {} hop route", hop_count),
            ));
        }

        let flows = priced
            .run(0..hop_count, position.amount_in, depth_cap)
            .map_err(|e| insufficient(e.to_string()))?;
        let output = flows.last().map(|(_, out)| *out).unwrap_or_default();

        self.finish(
            RouteDraft {
                route: Route::single(
                    priced.path.clone(),
                    position.amount_in,
                    priced.legs(0..hop_count, &flows),
                ),
                start_token,
                input: position.amount_in,
                output,
                ideal_output: position.amount_in * priced.spot_product,
                swap_count: hop_count,
            },
            balance,
            inputs,
        )
    }

    /// Gas, confidence and the profit gate
    fn finish(
        &self,
        draft: RouteDraft,
        balance: Decimal,
        inputs: &OptimizerInputs<'_>,
    ) -> std::result::Result<ArbitrageOpportunity, RejectedOpportunity> {
        let gas_config = &self.config.gas;
        let needs_flash_loan = balance < draft.input;
        let gas_units = gas_config.base_gas
            + gas_config.gas_per_hop * draft.swap_count as u64
            + if needs_flash_loan { gas_config.flash_loan_gas } else { 0 };
        let gas_cost = inputs.gas.cost_of(gas_units);

        let gross_profit = (draft.output - draft.input) * draft.start_token.reference_price;
        let expected_profit = gross_profit - gas_cost;
        let slippage = if draft.ideal_output > Decimal::ZERO {
            ((draft.ideal_output - draft.output) / draft.ideal_output).max(Decimal::ZERO)
        } else {
            Decimal::ONE
        };

        let venues: BTreeSet<VenueId> =
            draft.route.legs.iter().map(|leg| leg.venue.clone()).collect();
        let venue_success = if venues.is_empty() {
            Decimal::ZERO
        } else {
            venues
                .iter()
                .map(|venue| inputs.history.venue_success_rate(venue))
                .sum::<Decimal>()
                / Decimal::from(venues.len())
        };
        let confidence = (venue_success * (Decimal::ONE - slippage))
            .max(Decimal::ZERO)
            .min(Decimal::ONE);

        let strategy = draft
            .route
            .primary()
            .map(|path| path.strategy)
            .unwrap_or(StrategyId::MultiPath);
        let opportunity = ArbitrageOpportunity {
            id: OpportunityId::new(),
            strategy,
            route: draft.route,
            start_token: draft.start_token,
            input_amount: draft.input,
            expected_output: draft.output,
            gross_profit,
            gas_units,
            gas_cost,
            expected_profit,
            slippage,
            confidence,
            needs_flash_loan,
            discovered_at_ms: inputs.now_ms,
        };

        if !self.config.clears_profit_threshold(expected_profit) {
            return Err(RejectedOpportunity::new(
                Some(opportunity.id),
                ReasonCode::BelowProfitThreshold,
                format!(
                    "expected profit {} after {} gas does not clear {}",
                    expected_profit.round_dp(6),
                    gas_cost.round_dp(6),
                    self.config.min_profit_threshold
                ),
            ));
        }
        Ok(opportunity)
    }

    fn merge_shared_prefixes(
        &self,
        sized: Vec<(ArbitrageOpportunity, PricedPath)>,
        balances: &HashMap<TokenId, Decimal>,
        inputs: &OptimizerInputs<'_>,
    ) -> Vec<ArbitrageOpportunity> {
        let mut consumed = vec![false; sized.len()];
        let mut result = Vec::with_capacity(sized.len());

        for i in 0..sized.len() {
            if consumed[i] {
                continue;
            }
            consumed[i] = true;
            let mut chosen = sized[i].0.clone();
            for j in (i + 1)..sized.len() {
                if consumed[j] {
                    continue;
                }
                let balance = balances
                    .get(&sized[i].1.path.start)
                    .copied()
                    .unwrap_or_default();
                if let Some(merged) = self.try_merge(&sized[i], &sized[j], balance, inputs) {
                    debug!(
                        "Merged {} and {} over a {}-hop shared prefix",
                        sized[i].0.id, sized[j].0.id, merged.route.shared_prefix_len
                    );
                    consumed[j] = true;
                    chosen = merged;
                    break;
                }
            }
            result.push(chosen);
        }
        result
    }

    fn batching(&self, opportunity: &ArbitrageOpportunity) -> bool {
        let venues = &self.config.execution.batching_venues;
        opportunity
            .venues()
            .iter()
            .all(|venue| venues.iter().any(|allowed| allowed == venue.as_str()))
    }

    fn try_merge(
        &self,
        (first, first_path): &(ArbitrageOpportunity, PricedPath),
        (second, second_path): &(ArbitrageOpportunity, PricedPath),
        balance: Decimal,
        inputs: &OptimizerInputs<'_>,
    ) -> Option<ArbitrageOpportunity> {
        if first_path.path.start != second_path.path.start
            || !self.batching(first)
            || !self.batching(second)
        {
            return None;
        }

        let prefix = first_path
            .path
            .hops
            .iter()
            .zip(&second_path.path.hops)
            .take_while(|(a, b)| a == b)
            .count();
        let (first_len, second_len) = (first_path.hops.len(), second_path.hops.len());
        if prefix == 0 || prefix >= first_len.min(second_len) {
            return None;
        }

        let depth_cap = self.config.execution.max_position_pct_of_depth;
        let (first_in, second_in) = (first.input_amount, second.input_amount);
        let combined = first_in + second_in;

        let prefix_flows = first_path.run(0..prefix, combined, depth_cap).ok()?;
        let prefix_out = prefix_flows.last()?.1;
        let first_share = prefix_out * first_in / combined;
        let second_share = prefix_out - first_share;

        let first_flows = first_path.run(prefix..first_len, first_share, depth_cap).ok()?;
        let second_flows = second_path.run(prefix..second_len, second_share, depth_cap).ok()?;
        let output = first_flows.last()?.1 + second_flows.last()?.1;

        let mut legs = first_path.legs(0..prefix, &prefix_flows);
        legs.extend(first_path.legs(prefix..first_len, &first_flows));
        legs.extend(second_path.legs(prefix..second_len, &second_flows));

        let merged = self
            .finish(
                RouteDraft {
                    route: Route {
                        paths: vec![first_path.path.clone(), second_path.path.clone()],
                        shared_prefix_len: prefix,
                        path_inputs: vec![first_in, second_in],
                        legs,
                    },
                    start_token: first.start_token.clone(),
                    input: combined,
                    output,
                    ideal_output: first_in * first_path.spot_product
                        + second_in * second_path.spot_product,
                    swap_count: first_len + second_len - prefix,
                },
                balance,
                inputs,
            )
            .ok()?;

        let better = merged.expected_profit > first.expected_profit + second.expected_profit;
        (better && merged.slippage <= self.config.execution.max_slippage).then_some(merged)
    }
}
