//! # Arbitrage Engine - Cycle Coordination and Execution Hub
//!
//! ## Purpose
//!
//! Wires every stage of the pipeline together and exposes the operations the
//! dashboard, analytics and CLI call: `discover_opportunities`,
//! `execute_opportunity` and `get_performance_metrics`. The continuous mode
//! (`run`) ticks a discovery cycle every `discovery_interval_seconds` and hands
//! allocated opportunities to a bounded execution pool.
//!
//! ## Integration Points
//!
//! - **Input Sources**: `MarketDataSource`, `NetworkConditions`, `WalletBalances`
//! - **Output Destinations**: `PrivateRelay` via the executor, optional `ExecutionResult` channel
//! - **Capital Ledger**: one `tokio::sync::Mutex` guarded ledger; only allocation and
//!   settlement take the lock, never while a bundle is in flight
//! - **Feedback**: every `ExecutionResult` lands in the `PerformanceTracker`
//!
//! ## Architecture Role
//!
//! ```text
//! tick → [snapshot] → [detectors] → [ranker] → [optimizer] → [allocator + risk]
//!                                                                   ↓ mpsc (bounded)
//!        ledger ← settle / release ← [executor] ← [flash loans] ← dispatcher (Semaphore, JoinSet)
//! ```
//!
//! A new cycle only starts once the previous cycle's discovery and allocation
//! have finished and its allocations are queued; executions from earlier cycles
//! keep running independently.

use crate::allocator::{CapitalAllocator, CapitalLedger, SharedLedger};
use crate::config::ArbitrageConfig;
use crate::detector::OpportunityDetector;
use crate::error::{ArbitrageError, ReasonCode, Result};
use crate::executor::{bounded, BundleExecutor, ExecutionPlan};
use crate::flash_loan::FlashLoanOrchestrator;
use crate::interfaces::{
    FlashLoanProvider, MarketDataSource, NetworkConditions, PrivateRelay, WalletBalances,
};
use crate::metrics::{AggregatedStats, PerformanceTracker};
use crate::path_finder::merge_paths;
use crate::path_optimizer::{OptimizerInputs, PathOptimizer};
use crate::path_ranker::{PathRanker, RankCandidate};
use crate::risk::RiskManager;
use crate::snapshot::{unix_millis, MarketSnapshot};
use crate::types::{
    ArbitrageOpportunity, CapitalAllocation, ExecutionResult, ExecutionState, OpportunityId,
    RejectedOpportunity, StrategyId,
};
use crate::{log_error, log_execution, log_metrics, log_search};
use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use torq_strategy_shared::{Strategy, StrategyMetrics};
use tracing::{debug, info, info_span, warn, Instrument};

/// Collaborators and configuration, built once at process start
pub struct EngineContext {
    pub config: ArbitrageConfig,
    pub market: Arc<dyn MarketDataSource>,
    pub relay: Arc<dyn PrivateRelay>,
    pub network: Arc<dyn NetworkConditions>,
    pub wallet: Arc<dyn WalletBalances>,
    pub flash_loans: FlashLoanOrchestrator,
}

impl EngineContext {
    /// Validates `config`; flash loan providers come from its provider table
    pub fn new(
        config: ArbitrageConfig,
        market: Arc<dyn MarketDataSource>,
        relay: Arc<dyn PrivateRelay>,
        network: Arc<dyn NetworkConditions>,
        wallet: Arc<dyn WalletBalances>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| ArbitrageError::Configuration(format!("{:#}", e)))?;
        let flash_loans = FlashLoanOrchestrator::from_config(&config.flash_loans.providers);
        Ok(Self {
            config,
            market,
            relay,
            network,
            wallet,
            flash_loans,
        })
    }

    pub fn with_flash_loan_providers(mut self, providers: Vec<Arc<dyn FlashLoanProvider>>) -> Self {
        self.flash_loans = FlashLoanOrchestrator::new(providers);
        self
    }
}

/// Outcome of one discovery + allocation pass
#[derive(Debug, Default)]
pub struct CycleReport {
    pub cycle: u64,
    pub discovered: usize,
    pub excluded_pools: usize,
    pub allocations: Vec<(ArbitrageOpportunity, CapitalAllocation)>,
    pub rejected: Vec<RejectedOpportunity>,
}

struct Discovery {
    opportunities: Vec<ArbitrageOpportunity>,
    rejected: Vec<RejectedOpportunity>,
    excluded_pools: usize,
}

pub struct ArbitrageEngine {
    context: EngineContext,
    detectors: Vec<OpportunityDetector>,
    ranker: PathRanker,
    optimizer: PathOptimizer,
    risk: RiskManager,
    allocator: CapitalAllocator,
    executor: BundleExecutor,
    ledger: SharedLedger,
    tracker: PerformanceTracker,
    /// Opportunities from the latest discovery, addressable by id
    latest: RwLock<HashMap<OpportunityId, ArbitrageOpportunity>>,
    results: Option<mpsc::Sender<ExecutionResult>>,
    cycles: AtomicU64,
}

fn rejected_result(
    opportunity: &ArbitrageOpportunity,
    rejection: &RejectedOpportunity,
    final_state: ExecutionState,
) -> ExecutionResult {
    ExecutionResult {
        opportunity_id: opportunity.id,
        strategy: opportunity.strategy,
        success: false,
        realized_profit: Decimal::ZERO,
        gas_used: 0,
        failure: Some(rejection.reason),
        failure_detail: Some(rejection.detail.clone()),
        bundle_id: None,
        submissions: 0,
        final_state,
        venues: opportunity.venues().into_iter().collect(),
        steps: Vec::new(),
        execution_time_ms: 0,
    }
}

impl ArbitrageEngine {
    pub fn new(context: EngineContext) -> Self {
        let config = &context.config;
        let executor = BundleExecutor::new(
            config.clone(),
            Arc::clone(&context.relay),
            Arc::clone(&context.network),
        );
        info!(
            "🚀 Arbitrage engine ready: {} detector(s), {} flash loan provider(s), {} usable capital",
            config.discovery.strategies.len(),
            context.flash_loans.provider_count(),
            config.allocation.total_capital * (Decimal::ONE - config.allocation.reserve_percentage)
        );
        Self {
            detectors: OpportunityDetector::from_config(&config.discovery),
            ranker: PathRanker::new(config.ranking.clone()),
            optimizer: PathOptimizer::new(config.clone()),
            risk: RiskManager::new(config.risk.clone(), &config.execution),
            allocator: CapitalAllocator::new(config.clone()),
            ledger: CapitalLedger::shared(&config.allocation),
            executor,
            tracker: PerformanceTracker::new(),
            latest: RwLock::new(HashMap::new()),
            results: None,
            cycles: AtomicU64::new(0),
            context,
        }
    }

    /// Publish every `ExecutionResult` on a bounded channel. Results are
    /// dropped with a warning when the consumer falls behind.
    pub fn subscribe_results(&mut self) -> mpsc::Receiver<ExecutionResult> {
        let (tx, rx) = mpsc::channel(self.context.config.network.results_channel_capacity.max(1));
        self.results = Some(tx);
        rx
    }

    pub fn config(&self) -> &ArbitrageConfig {
        &self.context.config
    }

    pub fn ledger(&self) -> &SharedLedger {
        &self.ledger
    }

    pub fn get_performance_metrics(&self) -> AggregatedStats {
        self.tracker.aggregated()
    }

    pub fn strategy_metrics(&self) -> StrategyMetrics {
        self.tracker.strategy_metrics()
    }

    /// Snapshot → detect → rank → optimize. Returns at most `max_results`
    /// opportunities in ranked order; all of them stay addressable by
    /// `execute_opportunity` until the next discovery.
    pub async fn discover_opportunities(&self, max_results: usize) -> Result<Vec<ArbitrageOpportunity>> {
        let discovery = self.discover().await?;
        Ok(discovery.opportunities.into_iter().take(max_results).collect())
    }

    async fn discover(&self) -> Result<Discovery> {
        let config = &self.context.config;
        let (snapshot, report) =
            MarketSnapshot::build(self.context.market.as_ref(), &config.discovery, unix_millis())
                .await?;
        let snapshot = Arc::new(snapshot);
        let starts = snapshot.start_tokens(&config.discovery.start_tokens);

        let mut batches = Vec::with_capacity(self.detectors.len());
        for detector in &self.detectors {
            batches.push(detector.detect(Arc::clone(&snapshot), &starts).await);
        }
        let paths = merge_paths(batches);
        log_search!(
            "{} candidate cycles from {} start tokens",
            paths.len(),
            starts.len()
        );

        let tracker = &self.tracker;
        let notional = config.risk.max_risk_per_trade * config.allocation.total_capital;
        let candidates = paths
            .into_iter()
            .map(|path| {
                let risk = self
                    .risk
                    .assess_path(&path, &snapshot, notional, tracker)
                    .to_f64()
                    .unwrap_or(1.0);
                RankCandidate::from_snapshot(path, &snapshot, config, risk, |venue| {
                    tracker.venue_success_rate(venue).to_f64().unwrap_or(0.0)
                })
            })
            .collect();
        let ranked = self.ranker.rank(candidates);

        let request = Duration::from_millis(config.network.request_timeout_ms);
        let gas = bounded("gas_quote", request, self.context.network.gas_quote()).await?;
        let inputs = OptimizerInputs {
            snapshot: &snapshot,
            market: self.context.market.as_ref(),
            wallet: self.context.wallet.as_ref(),
            gas: &gas,
            history: tracker,
            now_ms: unix_millis(),
        };
        let outcome = self.optimizer.optimize(&ranked, &inputs).await?;

        tracker.record_discovered(outcome.opportunities.len());
        tracker.record_rejections(&outcome.rejected);
        *self.latest.write() = outcome
            .opportunities
            .iter()
            .map(|opportunity| (opportunity.id, opportunity.clone()))
            .collect();

        Ok(Discovery {
            opportunities: outcome.opportunities,
            rejected: outcome.rejected,
            excluded_pools: report.excluded_count(),
        })
    }

    /// Discovery followed by the serialized allocation pass
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        self.tracker.record_cycle();

        let discovery = match self.discover().await {
            Ok(discovery) => discovery,
            Err(e) => {
                self.tracker.record_error();
                return Err(e);
            }
        };
        let discovered = discovery.opportunities.len();

        let outcome = {
            let mut ledger = self.ledger.lock().await;
            self.allocator
                .allocate(discovery.opportunities, &mut ledger, &self.risk, &self.tracker)
        };
        self.tracker.record_allocated(outcome.allocations.len());
        self.tracker.record_rejections(&outcome.rejected);

        let mut rejected = discovery.rejected;
        rejected.extend(outcome.rejected);
        log_metrics!(
            "Cycle {}: {} discovered, {} allocated, {} rejected, {} pools excluded",
            cycle,
            discovered,
            outcome.allocations.len(),
            rejected.len(),
            discovery.excluded_pools
        );

        Ok(CycleReport {
            cycle,
            discovered,
            excluded_pools: discovery.excluded_pools,
            allocations: outcome.allocations,
            rejected,
        })
    }

    /// Allocate and execute one opportunity from the latest discovery
    pub async fn execute_opportunity(
        &self,
        opportunity_id: OpportunityId,
        strategy: StrategyId,
    ) -> Result<ExecutionResult> {
        let opportunity = self
            .latest
            .read()
            .get(&opportunity_id)
            .cloned()
            .ok_or_else(|| ArbitrageError::OpportunityNotFound(opportunity_id.to_string()))?;
        if opportunity.strategy != strategy {
            return Err(ArbitrageError::StrategyMismatch {
                requested: strategy.to_string(),
                found: opportunity.strategy.to_string(),
            });
        }

        let mut outcome = {
            let mut ledger = self.ledger.lock().await;
            self.allocator
                .allocate(vec![opportunity.clone()], &mut ledger, &self.risk, &self.tracker)
        };
        self.tracker.record_rejections(&outcome.rejected);

        match outcome.allocations.pop() {
            Some((opportunity, allocation)) => {
                self.tracker.record_allocated(1);
                self.execute_allocated(opportunity, allocation).await
            }
            None => {
                let rejection = outcome.rejected.pop().unwrap_or_else(|| {
                    RejectedOpportunity::new(
                        Some(opportunity.id),
                        ReasonCode::Internal,
                        "allocation produced no decision",
                    )
                });
                warn!("💰 {} not allocated: {}", opportunity.id, rejection.detail);
                let result = rejected_result(&opportunity, &rejection, ExecutionState::Abandoned);
                self.publish(&result);
                Ok(result)
            }
        }
    }

    /// Fund, build, simulate and submit one allocated opportunity, then settle
    /// or release its capital. Opportunity-scoped failures come back as a
    /// failed result; only cycle-fatal errors return `Err`.
    pub async fn execute_allocated(
        &self,
        opportunity: ArbitrageOpportunity,
        allocation: CapitalAllocation,
    ) -> Result<ExecutionResult> {
        let span = info_span!("bundle", opportunity = %opportunity.id);
        let outcome = self.fund_and_execute(&opportunity, &allocation).instrument(span).await;

        let mut ledger = self.ledger.lock().await;
        match outcome {
            Ok(result) => {
                if result.success {
                    ledger.settle(&opportunity.id, result.realized_profit);
                } else {
                    ledger.release(&opportunity.id);
                }
                drop(ledger);
                self.tracker.record_result(&result);
                self.publish(&result);
                Ok(result)
            }
            Err(e) => {
                ledger.release(&opportunity.id);
                drop(ledger);
                self.tracker.record_error();
                Err(e)
            }
        }
    }

    async fn fund_and_execute(
        &self,
        opportunity: &ArbitrageOpportunity,
        allocation: &CapitalAllocation,
    ) -> Result<ExecutionResult> {
        let wallet = &self.context.wallet;
        let request = Duration::from_millis(self.context.config.network.request_timeout_ms);
        let funding = async {
            let balance =
                bounded("balance_of", request, wallet.balance_of(&opportunity.start_token)).await?;
            let loan = bounded(
                "flash_loan_quote",
                request,
                self.context.flash_loans.fund(allocation, opportunity, balance),
            )
            .await?;
            let nonce = bounded("next_nonce", request, wallet.next_nonce()).await?;
            Ok::<_, ArbitrageError>((loan, nonce))
        };
        let (loan, nonce) = match funding.await {
            Ok(funded) => funded,
            Err(e) if e.is_cycle_fatal() => return Err(e),
            Err(e) => {
                warn!("🏦 {} not funded: {}", opportunity.id, e);
                return Ok(ExecutionResult::failed(opportunity, &e, ExecutionState::Allocated));
            }
        };

        log_execution!(
            "Executing {} ({}): {} allocated, {} borrowed",
            opportunity.id,
            opportunity.strategy,
            allocation.amount.round_dp(4),
            loan.loan
                .as_ref()
                .map(|loan| loan.principal)
                .unwrap_or_default()
                .round_dp(4)
        );
        self.executor
            .execute(ExecutionPlan {
                opportunity,
                allocation,
                loan: &loan,
                nonce,
            })
            .await
    }

    fn publish(&self, result: &ExecutionResult) {
        if let Some(tx) = &self.results {
            if let Err(e) = tx.try_send(result.clone()) {
                warn!("📊 Result for {} not published: {}", result.opportunity_id, e);
            }
        }
    }

    /// Allocate-and-execute one cycle, waiting for every bundle it starts
    pub async fn run_once(self: &Arc<Self>) -> Result<Vec<ExecutionResult>> {
        let report = self
            .run_cycle()
            .instrument(info_span!("cycle", id = self.cycles.load(Ordering::Relaxed) + 1))
            .await?;

        let semaphore = Arc::new(Semaphore::new(self.context.config.execution.max_concurrent_paths));
        let mut tasks = JoinSet::new();
        for (opportunity, allocation) in report.allocations {
            let engine = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                engine.execute_allocated(opportunity, allocation).await
            });
        }

        let mut results = Vec::new();
        let mut fatal = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(result)) => results.push(result),
                Ok(Err(e)) => {
                    log_error!("Execution aborted: {}", e);
                    fatal.get_or_insert(e);
                }
                Err(e) => log_error!("Execution task failed: {}", e),
            }
        }
        match fatal {
            Some(e) => Err(e),
            None => Ok(results),
        }
    }

    /// Run discovery cycles until `shutdown` flips to true or a cycle-fatal
    /// error occurs. In-flight bundles are awaited before returning.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let config = &self.context.config;
        let (job_tx, job_rx) = mpsc::channel(config.discovery.opportunity_channel_capacity);
        let (fatal_tx, mut fatal_rx) = mpsc::channel(1);
        let dispatcher = tokio::spawn(Arc::clone(&self).dispatch(job_rx, fatal_tx));

        let mut ticker = interval(Duration::from_secs(config.discovery.discovery_interval_seconds));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "🚀 Discovery every {}s, up to {} concurrent bundles",
            config.discovery.discovery_interval_seconds, config.execution.max_concurrent_paths
        );

        let mut failure = None;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let cycle = self.cycles.load(Ordering::Relaxed) + 1;
                    match self.run_cycle().instrument(info_span!("cycle", id = cycle)).await {
                        Ok(report) => {
                            for job in report.allocations {
                                // Blocks while the execution queue is full
                                if job_tx.send(job).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(e) if e.is_cycle_fatal() => {
                            log_error!("Cycle {} aborted: {}", cycle, e);
                            failure = Some(e);
                            break;
                        }
                        Err(e) => warn!("Cycle {} failed: {}", cycle, e),
                    }
                }
                Some(e) = fatal_rx.recv() => {
                    log_error!("Stopping after execution failure: {}", e);
                    failure = Some(e);
                    break;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("🛑 Shutdown requested");
                        break;
                    }
                }
            }
        }

        drop(job_tx);
        if let Err(e) = dispatcher.await {
            log_error!("Execution dispatcher failed: {}", e);
        }
        let stats = self.tracker.aggregated();
        log_metrics!(
            "Stopped after {} cycles: {} included, {} abandoned, {} realized",
            stats.strategy.cycles_completed,
            stats.included,
            stats.abandoned,
            stats.realized_profit.round_dp(4)
        );
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Pull allocations off the queue and execute them, at most
    /// `max_concurrent_paths` at a time
    async fn dispatch(
        self: Arc<Self>,
        mut jobs: mpsc::Receiver<(ArbitrageOpportunity, CapitalAllocation)>,
        fatal: mpsc::Sender<ArbitrageError>,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.context.config.execution.max_concurrent_paths));
        let mut tasks = JoinSet::new();

        while let Some((opportunity, allocation)) = jobs.recv().await {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            while let Some(joined) = tasks.try_join_next() {
                Self::reap(joined, &fatal);
            }
            let engine = Arc::clone(&self);
            tasks.spawn(async move {
                let _permit = permit;
                engine.execute_allocated(opportunity, allocation).await
            });
        }

        debug!("Waiting for {} in-flight bundles", tasks.len());
        while let Some(joined) = tasks.join_next().await {
            Self::reap(joined, &fatal);
        }
    }

    fn reap(
        joined: std::result::Result<Result<ExecutionResult>, JoinError>,
        fatal: &mpsc::Sender<ArbitrageError>,
    ) {
        match joined {
            Ok(Ok(result)) => debug!(
                "Bundle for {} finished in {:?}",
                result.opportunity_id, result.final_state
            ),
            Ok(Err(e)) => {
                log_error!("Execution aborted: {}", e);
                if e.is_cycle_fatal() {
                    let _ = fatal.try_send(e);
                }
            }
            Err(e) => log_error!("Execution task failed: {}", e),
        }
    }
}

/// `Strategy` lifecycle around a continuously running engine
pub struct ArbitrageService {
    engine: Arc<ArbitrageEngine>,
    shutdown: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl ArbitrageService {
    pub fn new(engine: Arc<ArbitrageEngine>) -> Self {
        Self {
            engine,
            shutdown: None,
            handle: None,
        }
    }

    pub fn engine(&self) -> &Arc<ArbitrageEngine> {
        &self.engine
    }
}

#[async_trait]
impl Strategy for ArbitrageService {
    fn name(&self) -> &'static str {
        "multipath_arbitrage"
    }

    async fn start(&mut self) -> anyhow::Result<()> {
        if self.handle.is_some() {
            anyhow::bail!("{} is already running", self.name());
        }
        let (tx, rx) = watch::channel(false);
        self.handle = Some(tokio::spawn(Arc::clone(&self.engine).run(rx)));
        self.shutdown = Some(tx);
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }
        match self.handle.take() {
            Some(handle) => Ok(handle.await??),
            None => Ok(()),
        }
    }

    fn metrics(&self) -> StrategyMetrics {
        self.engine.strategy_metrics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::PoolState;
    use crate::testing::{v2_meta, InMemoryMarketData, InMemoryWallet, ScriptedRelay, StaticNetwork};
    use crate::types::Token;
    use mev::{BundleStatus, SimulationOutcome};
    use rust_decimal_macros::dec;

    fn market() -> Arc<InMemoryMarketData> {
        let a = Token::new("0x00000000000000000000000000000000000000a0", "A", 18);
        let b = Token::new("0x00000000000000000000000000000000000000b0", "B", 18);
        let c = Token::new("0x00000000000000000000000000000000000000c0", "C", 18);
        let source = InMemoryMarketData::new();
        for (address, venue, t0, t1, r0, r1) in [
            ("0x01", "uniswap_v2", &a, &b, dec!(100000), dec!(200000)),
            ("0x02", "uniswap_v2", &b, &c, dec!(100000), dec!(150000)),
            ("0x03", "sushiswap", &c, &a, dec!(100000), dec!(35000)),
        ] {
            source.add_pool(
                v2_meta(address, venue, t0, t1, 30),
                PoolState::ConstantProduct {
                    reserve0: r0,
                    reserve1: r1,
                },
            );
        }
        Arc::new(source)
    }

    fn engine(config: ArbitrageConfig, relay: Arc<ScriptedRelay>) -> ArbitrageEngine {
        let context = EngineContext::new(
            config,
            market(),
            relay,
            Arc::new(StaticNetwork::quiet(100)),
            Arc::new(InMemoryWallet::new()),
        )
        .unwrap();
        ArbitrageEngine::new(context)
    }

    #[test]
    fn test_context_rejects_invalid_config() {
        let mut config = ArbitrageConfig::default();
        config.discovery.max_hops = 1;
        let err = EngineContext::new(
            config,
            market(),
            Arc::new(ScriptedRelay::unreachable()),
            Arc::new(StaticNetwork::quiet(100)),
            Arc::new(InMemoryWallet::new()),
        )
        .err()
        .unwrap();
        assert!(err.is_cycle_fatal());
    }

    #[tokio::test]
    async fn test_discover_respects_max_results() {
        let config = ArbitrageConfig {
            min_profit_threshold: dec!(0),
            ..ArbitrageConfig::default()
        };
        let engine = engine(config, Arc::new(ScriptedRelay::unreachable()));

        let found = engine.discover_opportunities(10).await.unwrap();
        assert!(!found.is_empty());
        assert!(found.iter().all(|o| o.expected_profit > dec!(0)));
        assert_eq!(engine.discover_opportunities(1).await.unwrap().len(), 1);
        assert!(engine.discover_opportunities(0).await.unwrap().is_empty());
        assert!(engine.get_performance_metrics().discovered >= 3 * found.len() as u64);
    }

    #[tokio::test]
    async fn test_execute_checks_id_and_strategy() {
        let config = ArbitrageConfig {
            min_profit_threshold: dec!(0),
            ..ArbitrageConfig::default()
        };
        let engine = engine(config, Arc::new(ScriptedRelay::unreachable()));
        let found = engine.discover_opportunities(10).await.unwrap();

        let missing = engine
            .execute_opportunity(OpportunityId::new(), StrategyId::MultiPath)
            .await
            .unwrap_err();
        assert!(matches!(missing, ArbitrageError::OpportunityNotFound(_)));

        let mismatch = engine
            .execute_opportunity(found[0].id, StrategyId::CrossVenue)
            .await
            .unwrap_err();
        assert!(matches!(mismatch, ArbitrageError::StrategyMismatch { .. }));
    }

    #[tokio::test]
    async fn test_unfunded_opportunity_releases_capital() {
        let config = ArbitrageConfig {
            min_profit_threshold: dec!(0),
            ..ArbitrageConfig::default()
        };
        let relay = Arc::new(ScriptedRelay::new(
            SimulationOutcome::default(),
            vec![BundleStatus::Expired],
        ));
        let mut engine = engine(config, Arc::clone(&relay));
        let mut results = engine.subscribe_results();
        let found = engine.discover_opportunities(10).await.unwrap();

        // Empty wallet and no flash loan providers: nothing reaches the relay
        let result = engine
            .execute_opportunity(found[0].id, found[0].strategy)
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.failure.is_some());
        assert_eq!(engine.ledger().lock().await.allocated(), dec!(0));
        assert!(relay.calls().is_empty());
        assert_eq!(results.recv().await.unwrap().opportunity_id, found[0].id);
    }

    #[tokio::test]
    async fn test_service_start_stop() {
        let relay = Arc::new(ScriptedRelay::unreachable());
        let mut service = ArbitrageService::new(Arc::new(engine(ArbitrageConfig::default(), relay)));
        service.start().await.unwrap();
        assert!(service.start().await.is_err());
        tokio::time::sleep(Duration::from_millis(50)).await;
        service.stop().await.unwrap();
        assert!(service.metrics().cycles_completed >= 1);
    }
}
