//! In-memory collaborators for tests and offline runs
//!
//! Deterministic stand-ins for the market data feed, wallet, flash loan
//! providers, network and private relay, plus builders for opportunities and
//! allocations with round numbers.

use crate::error::{ArbitrageError, Result};
use crate::interfaces::{
    FlashLoanProvider, GasQuote, MarketDataSource, NetworkConditions, PoolMeta, PoolQuote,
    PoolState, WalletBalances,
};
use crate::snapshot::unix_millis;
use crate::types::{
    ArbitrageOpportunity, CapitalAllocation, OpportunityId, Path, PathHop, PoolId, RiskAssessment,
    Route, StrategyId, SwapLeg, Token, TokenId, VenueId,
};
use async_trait::async_trait;
use mev::{BundleId, BundleStatus, BundleTransaction, PrivateRelay, RelayError, SimulationOutcome};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::ops::RangeInclusive;
use std::time::Duration;
use torq_amm::PoolType;

/// Constant-product pool metadata
pub fn v2_meta(address: &str, venue: &str, token0: &Token, token1: &Token, fee_bps: u32) -> PoolMeta {
    PoolMeta {
        address: address.to_lowercase(),
        venue: VenueId::new(venue),
        token0: token0.clone(),
        token1: token1.clone(),
        kind: PoolType::UniswapV2,
        fee_bps,
    }
}

#[derive(Debug, Clone)]
struct StoredPool {
    meta: PoolMeta,
    state: PoolState,
    as_of_ms: Option<u64>,
}

/// Mutable market; quotes are fresh at read time unless pinned with `set_as_of`
#[derive(Debug, Default)]
pub struct InMemoryMarketData {
    pools: RwLock<Vec<StoredPool>>,
}

impl InMemoryMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pool(&self, meta: PoolMeta, state: PoolState) {
        self.pools.write().push(StoredPool {
            meta,
            state,
            as_of_ms: None,
        });
    }

    pub fn set_state(&self, address: &str, state: PoolState) {
        let address = address.to_lowercase();
        if let Some(pool) = self.pools.write().iter_mut().find(|p| p.meta.address == address) {
            pool.state = state;
        }
    }

    pub fn set_as_of(&self, address: &str, as_of_ms: u64) {
        let address = address.to_lowercase();
        if let Some(pool) = self.pools.write().iter_mut().find(|p| p.meta.address == address) {
            pool.as_of_ms = Some(as_of_ms);
        }
    }
}

#[async_trait]
impl MarketDataSource for InMemoryMarketData {
    async fn get_active_pools(&self) -> Result<Vec<PoolMeta>> {
        Ok(self.pools.read().iter().map(|p| p.meta.clone()).collect())
    }

    async fn get_reserves_or_tick_state(&self, pool: &PoolMeta) -> Result<PoolQuote> {
        self.pools
            .read()
            .iter()
            .find(|p| p.meta.address == pool.address)
            .map(|p| PoolQuote {
                state: p.state.clone(),
                as_of_ms: p.as_of_ms.unwrap_or_else(unix_millis),
            })
            .ok_or_else(|| ArbitrageError::InvalidPath(format!("Unknown pool {}", pool.address)))
    }
}

/// Wallet with per-token balances (zero by default) and a counting nonce
#[derive(Debug, Default)]
pub struct InMemoryWallet {
    balances: RwLock<HashMap<String, Decimal>>,
    nonce: Mutex<u64>,
}

impl InMemoryWallet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balance(self, token_address: &str, amount: Decimal) -> Self {
        self.set_balance(token_address, amount);
        self
    }

    pub fn set_balance(&self, token_address: &str, amount: Decimal) {
        self.balances.write().insert(token_address.to_lowercase(), amount);
    }
}

#[async_trait]
impl WalletBalances for InMemoryWallet {
    async fn balance_of(&self, token: &Token) -> Result<Decimal> {
        Ok(self.balances.read().get(&token.address).copied().unwrap_or_default())
    }

    async fn next_nonce(&self) -> Result<u64> {
        let mut nonce = self.nonce.lock();
        let next = *nonce;
        *nonce += 1;
        Ok(next)
    }
}

/// Provider with one fee and the same capacity for every token
#[derive(Debug, Clone)]
pub struct StaticFlashLoanProvider {
    name: String,
    contract: String,
    fee_bps: u32,
    capacity: Decimal,
}

impl StaticFlashLoanProvider {
    pub fn new(name: &str, fee_bps: u32, capacity: Decimal) -> Self {
        Self {
            name: name.to_string(),
            contract: "0x00000000000000000000000000000000000f1a54".to_string(),
            fee_bps,
            capacity,
        }
    }
}

#[async_trait]
impl FlashLoanProvider for StaticFlashLoanProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn contract_address(&self) -> &str {
        &self.contract
    }

    async fn max_loan(&self, _token: &Token) -> Result<Decimal> {
        Ok(self.capacity)
    }

    async fn fee_bps(&self, _token: &Token, _amount: Decimal) -> Result<u32> {
        Ok(self.fee_bps)
    }
}

/// Fixed block height and gas market
#[derive(Debug, Clone)]
pub struct StaticNetwork {
    pub block: u64,
    pub quote: GasQuote,
    stalled: bool,
}

impl StaticNetwork {
    /// Uncongested 1 gwei base + 1 gwei priority, native token priced at 1
    pub fn quiet(block: u64) -> Self {
        Self {
            block,
            quote: GasQuote {
                base_fee_gwei: Decimal::ONE,
                priority_fee_gwei: Decimal::ONE,
                congestion: Decimal::ONE,
                native_token_price: Decimal::ONE,
            },
            stalled: false,
        }
    }

    /// Every call hangs forever
    pub fn stalled(mut self) -> Self {
        self.stalled = true;
        self
    }
}

#[async_trait]
impl NetworkConditions for StaticNetwork {
    async fn current_block(&self) -> Result<u64> {
        if self.stalled {
            std::future::pending::<()>().await;
        }
        Ok(self.block)
    }

    async fn gas_quote(&self) -> Result<GasQuote> {
        if self.stalled {
            std::future::pending::<()>().await;
        }
        Ok(self.quote.clone())
    }
}

/// What the relay was asked to do, in order
#[derive(Debug, Clone, PartialEq)]
pub enum RelayCall {
    Simulate {
        transactions: Vec<BundleTransaction>,
        success: bool,
    },
    Submit {
        transactions: Vec<BundleTransaction>,
        target_blocks: RangeInclusive<u64>,
    },
    Status {
        bundle_id: BundleId,
    },
}

/// Relay that replays one simulation outcome and a queue of bundle statuses.
/// Statuses are consumed one per poll; an empty queue reports `Pending`.
#[derive(Debug)]
pub struct ScriptedRelay {
    simulation: Option<SimulationOutcome>,
    statuses: Mutex<VecDeque<BundleStatus>>,
    simulation_delay: Duration,
    stalled_submit: bool,
    stalled_status: bool,
    calls: Mutex<Vec<RelayCall>>,
}

impl ScriptedRelay {
    pub fn new(simulation: SimulationOutcome, statuses: Vec<BundleStatus>) -> Self {
        Self {
            simulation: Some(simulation),
            statuses: Mutex::new(statuses.into()),
            simulation_delay: Duration::ZERO,
            stalled_submit: false,
            stalled_status: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every call fails at the transport
    pub fn unreachable() -> Self {
        Self {
            simulation: None,
            statuses: Mutex::new(VecDeque::new()),
            simulation_delay: Duration::ZERO,
            stalled_submit: false,
            stalled_status: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_simulation_delay(mut self, delay: Duration) -> Self {
        self.simulation_delay = delay;
        self
    }

    /// `submit_bundle` records the call, then never answers
    pub fn with_stalled_submission(mut self) -> Self {
        self.stalled_submit = true;
        self
    }

    /// `get_bundle_status` records the call, then never answers
    pub fn with_stalled_status(mut self) -> Self {
        self.stalled_status = true;
        self
    }

    pub fn calls(&self) -> Vec<RelayCall> {
        self.calls.lock().clone()
    }

    pub fn submissions(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, RelayCall::Submit { .. }))
            .count()
    }

    fn transport_error() -> RelayError {
        RelayError::Transport("connection refused".to_string())
    }
}

#[async_trait]
impl PrivateRelay for ScriptedRelay {
    async fn simulate_bundle(
        &self,
        transactions: &[BundleTransaction],
    ) -> std::result::Result<SimulationOutcome, RelayError> {
        let outcome = self.simulation.clone().ok_or_else(Self::transport_error)?;
        if !self.simulation_delay.is_zero() {
            tokio::time::sleep(self.simulation_delay).await;
        }
        self.calls.lock().push(RelayCall::Simulate {
            transactions: transactions.to_vec(),
            success: outcome.success,
        });
        Ok(outcome)
    }

    async fn submit_bundle(
        &self,
        transactions: &[BundleTransaction],
        target_blocks: RangeInclusive<u64>,
    ) -> std::result::Result<BundleId, RelayError> {
        if self.simulation.is_none() {
            return Err(Self::transport_error());
        }
        let id = {
            let mut calls = self.calls.lock();
            calls.push(RelayCall::Submit {
                transactions: transactions.to_vec(),
                target_blocks,
            });
            BundleId(format!("bundle-{}", calls.len()))
        };
        if self.stalled_submit {
            std::future::pending::<()>().await;
        }
        Ok(id)
    }

    async fn get_bundle_status(
        &self,
        bundle_id: &BundleId,
    ) -> std::result::Result<BundleStatus, RelayError> {
        if self.simulation.is_none() {
            return Err(Self::transport_error());
        }
        self.calls.lock().push(RelayCall::Status {
            bundle_id: bundle_id.clone(),
        });
        if self.stalled_status {
            std::future::pending::<()>().await;
        }
        Ok(self.statuses.lock().pop_front().unwrap_or(BundleStatus::Pending))
    }
}

/// Address of the `index`-th synthetic token
fn token_address(index: usize) -> String {
    format!("0x{:040x}", 0xa0 + index * 0x10)
}

/// Cycle through `venues` starting and ending at an 18-decimal token priced at 1.
///
/// Every leg moves `input` with pools 100× deeper than the trade, the last leg
/// returns `input + expected_profit`, and gas is free, so the currency profit
/// equals `expected_profit`. Confidence is 1.
pub fn opportunity(venues: &[&str], input: Decimal, expected_profit: Decimal) -> ArbitrageOpportunity {
    let hops = venues.len().max(1);
    let token = |index: usize| {
        let index = index % hops;
        Token::new(&token_address(index), &format!("T{}", index), 18)
    };

    let mut path_hops = Vec::with_capacity(hops);
    let mut legs = Vec::with_capacity(hops);
    for (index, venue) in venues.iter().enumerate() {
        let last = index + 1 == venues.len();
        let expected_out = if last { input + expected_profit } else { input };
        path_hops.push(PathHop {
            pool: PoolId(index as u32),
            from: TokenId(index as u32),
            to: TokenId(((index + 1) % hops) as u32),
        });
        legs.push(SwapLeg {
            pool: PoolId(index as u32),
            pool_address: format!("0x{:040x}", index + 1),
            venue: VenueId::new(*venue),
            token_in: token(index),
            token_out: token(index + 1),
            amount_in: input,
            expected_out,
            depth_in: input * Decimal::ONE_HUNDRED,
        });
    }

    let start_token = token(0);
    let path = Path::new(StrategyId::MultiPath, TokenId(0), path_hops, -0.01);
    ArbitrageOpportunity {
        id: OpportunityId::new(),
        strategy: StrategyId::MultiPath,
        route: Route::single(path, input, legs),
        start_token,
        input_amount: input,
        expected_output: input + expected_profit,
        gross_profit: expected_profit,
        gas_units: 0,
        gas_cost: Decimal::ZERO,
        expected_profit,
        slippage: Decimal::ZERO,
        confidence: Decimal::ONE,
        needs_flash_loan: false,
        discovered_at_ms: unix_millis(),
    }
}

/// Allocation of `amount` currency with a neutral risk assessment
pub fn allocation_for(opportunity: &ArbitrageOpportunity, amount: Decimal) -> CapitalAllocation {
    let input_value = opportunity.input_value();
    let scale = if input_value > Decimal::ZERO {
        amount / input_value
    } else {
        Decimal::ZERO
    };
    let price = opportunity.start_token.reference_price;
    CapitalAllocation {
        opportunity_id: opportunity.id,
        amount,
        token_amount: if price > Decimal::ZERO {
            amount / price
        } else {
            Decimal::ZERO
        },
        fraction: Decimal::ZERO,
        scale,
        expected_profit: (opportunity.expected_profit + opportunity.gas_cost) * scale
            - opportunity.gas_cost,
        down_sized: false,
        risk: RiskAssessment {
            opportunity_id: opportunity.id,
            score: Decimal::ZERO,
            depth_ratio: opportunity.max_depth_ratio(scale),
            venue_failure_rate: Decimal::ZERO,
            correlation: Decimal::ZERO,
            sandwich_risk: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_opportunity_closes_its_cycle() {
        let opp = opportunity(&["uniswap_v2", "sushiswap", "uniswap_v2"], dec!(10), dec!(1));
        let path = opp.route.primary().unwrap();
        assert!(path.validate(4).is_ok());
        assert_eq!(opp.route.legs[0].token_in, opp.start_token);
        assert_eq!(opp.route.legs[2].token_out, opp.start_token);
        assert_eq!(opp.token_addresses().len(), 3);
        assert_eq!(opp.max_depth_ratio(dec!(1)), dec!(0.01));
    }

    #[tokio::test]
    async fn test_scripted_statuses_drain_to_pending() {
        let relay = ScriptedRelay::new(
            SimulationOutcome::default(),
            vec![BundleStatus::Expired],
        );
        let id = BundleId("b".to_string());
        assert_eq!(relay.get_bundle_status(&id).await.unwrap(), BundleStatus::Expired);
        assert_eq!(relay.get_bundle_status(&id).await.unwrap(), BundleStatus::Pending);
        assert_eq!(relay.calls().len(), 2);
    }
}
