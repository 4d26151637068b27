//! End-to-end engine scenarios against in-memory collaborators

use mev::{BundleStatus, SimulationOutcome};
use multipath_arbitrage::allocator::{CapitalAllocator, CapitalLedger};
use multipath_arbitrage::config::{AllocationConfig, RiskConfig};
use multipath_arbitrage::testing::{
    opportunity, v2_meta, InMemoryMarketData, InMemoryWallet, RelayCall, ScriptedRelay,
    StaticFlashLoanProvider, StaticNetwork,
};
use multipath_arbitrage::{
    ArbitrageConfig, ArbitrageEngine, EngineContext, ExecutionState, PerformanceTracker,
    PoolState, ReasonCode, RiskManager, Token, WalletBalances,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;

const TOKEN_A: &str = "0x00000000000000000000000000000000000000a0";

/// A→B→C→A at 2.0 / 1.5 / 0.35, 0.3% per hop, 100k deep
fn triangle() -> Arc<InMemoryMarketData> {
    let a = Token::new(TOKEN_A, "A", 18);
    let b = Token::new("0x00000000000000000000000000000000000000b0", "B", 18);
    let c = Token::new("0x00000000000000000000000000000000000000c0", "C", 18);
    let market = InMemoryMarketData::new();
    for (address, venue, t0, t1, r0, r1) in [
        ("0x01", "uniswap_v2", &a, &b, dec!(100000), dec!(200000)),
        ("0x02", "uniswap_v2", &b, &c, dec!(100000), dec!(150000)),
        ("0x03", "sushiswap", &c, &a, dec!(100000), dec!(35000)),
    ] {
        market.add_pool(
            v2_meta(address, venue, t0, t1, 30),
            PoolState::ConstantProduct {
                reserve0: r0,
                reserve1: r1,
            },
        );
    }
    Arc::new(market)
}

fn fast_config() -> ArbitrageConfig {
    let mut config = ArbitrageConfig {
        min_profit_threshold: dec!(0.5),
        ..ArbitrageConfig::default()
    };
    config.discovery.start_tokens = vec![TOKEN_A.to_string()];
    config.execution.status_poll_interval_ms = 1;
    config.execution.inclusion_timeout_ms = 50;
    config.execution.simulation_timeout_ms = 50;
    config
}

fn simulation(success: bool, delta: Decimal) -> SimulationOutcome {
    let mut state_diff = HashMap::new();
    state_diff.insert(TOKEN_A.to_string(), delta);
    SimulationOutcome {
        success,
        revert_reason: (!success).then(|| "UniswapV2: K".to_string()),
        profit: dec!(0),
        gas_used: 300_000,
        state_diff,
    }
}

struct Harness {
    engine: Arc<ArbitrageEngine>,
    relay: Arc<ScriptedRelay>,
    wallet: Arc<InMemoryWallet>,
}

fn harness(config: ArbitrageConfig, relay: ScriptedRelay) -> Harness {
    let relay = Arc::new(relay);
    let wallet = Arc::new(InMemoryWallet::new());
    let context = EngineContext::new(
        config,
        triangle(),
        relay.clone(),
        Arc::new(StaticNetwork::quiet(100)),
        wallet.clone(),
    )
    .unwrap()
    .with_flash_loan_providers(vec![Arc::new(StaticFlashLoanProvider::new(
        "balancer",
        0,
        dec!(1000000),
    ))]);
    Harness {
        engine: Arc::new(ArbitrageEngine::new(context)),
        relay,
        wallet,
    }
}

#[tokio::test]
async fn scenario_a_triangle_is_profitable() {
    let h = harness(fast_config(), ScriptedRelay::unreachable());

    let found = h.engine.discover_opportunities(5).await.unwrap();
    assert_eq!(found.len(), 1);

    let opp = &found[0];
    let path = opp.route.primary().unwrap();
    let factor = path.gross_factor();
    assert!(factor > 1.04 && factor < 1.05, "factor {}", factor);
    assert_eq!(opp.route.legs.len(), 3);
    assert_eq!(opp.start_token.address, TOKEN_A);
    assert!(opp.expected_profit > dec!(0.5));
    // Nothing has touched the relay yet
    assert!(h.relay.calls().is_empty());
}

#[test]
fn scenario_b_kelly_allocations_stay_within_usable_capital() {
    let mut config = ArbitrageConfig {
        min_profit_threshold: dec!(0),
        ..ArbitrageConfig::default()
    };
    config.allocation = AllocationConfig {
        total_capital: dec!(10),
        reserve_percentage: dec!(0.10),
        kelly_fraction: dec!(1),
        min_allocation_percent: dec!(0.01),
        max_allocation_percent: dec!(0.5),
    };
    config.risk = RiskConfig {
        max_risk_per_trade: dec!(1),
        max_risk_per_token: dec!(1),
        max_risk_per_dex: dec!(1),
        ..RiskConfig::default()
    };
    let allocator = CapitalAllocator::new(config.clone());
    let risk = RiskManager::new(config.risk.clone(), &config.execution);
    let mut ledger = CapitalLedger::new(&config.allocation);

    // Kelly edges 0.30 and 0.40 at confidence 0.8
    let mut first = opportunity(&["uniswap_v2"], dec!(10), dec!(4));
    let mut second = opportunity(&["sushiswap"], dec!(10), dec!(5));
    first.confidence = dec!(0.8);
    second.confidence = dec!(0.8);

    let outcome = allocator.allocate(
        vec![first, second],
        &mut ledger,
        &risk,
        &PerformanceTracker::new(),
    );
    let amounts: Vec<Decimal> = outcome.allocations.iter().map(|(_, a)| a.amount).collect();
    assert_eq!(amounts, vec![dec!(2.7), dec!(3.6)]);
    assert_eq!(ledger.allocated(), dec!(6.3));
    assert_eq!(ledger.remaining(), dec!(2.7));
}

#[tokio::test]
async fn scenario_c_reverted_simulation_releases_capital() {
    let h = harness(
        fast_config(),
        ScriptedRelay::new(simulation(false, dec!(0)), Vec::new()),
    );

    let results = h.engine.run_once().await.unwrap();
    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert!(!result.success);
    assert_eq!(result.failure, Some(ReasonCode::SimulationFailure));
    assert_eq!(result.final_state, ExecutionState::Simulated { passed: false });

    // Simulated once, never submitted
    let calls = h.relay.calls();
    assert_eq!(calls.len(), 1);
    assert!(matches!(calls[0], RelayCall::Simulate { success: false, .. }));
    assert_eq!(h.engine.ledger().lock().await.allocated(), dec!(0));

    let stats = h.engine.get_performance_metrics();
    assert_eq!(stats.executions, 1);
    assert_eq!(stats.submissions, 0);
}

#[tokio::test]
async fn scenario_d_unincluded_bundle_is_abandoned() {
    let config = fast_config();
    assert_eq!(config.execution.max_block_number_target, 3);
    assert_eq!(config.execution.retry_limit, 2);
    let h = harness(
        config,
        ScriptedRelay::new(simulation(true, dec!(1000)), vec![BundleStatus::Expired; 3]),
    );
    let token = Token::new(TOKEN_A, "A", 18);
    let before = h.wallet.balance_of(&token).await.unwrap();

    let results = h.engine.run_once().await.unwrap();
    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!(result.failure, Some(ReasonCode::BundleNotIncluded));
    assert_eq!(result.final_state, ExecutionState::Abandoned);
    assert_eq!(result.submissions, 3);
    assert_eq!(h.relay.submissions(), 3);

    // Each submission targets a three-block window
    for call in h.relay.calls() {
        if let RelayCall::Submit { target_blocks, .. } = call {
            assert_eq!(target_blocks.end() - target_blocks.start(), 2);
        }
    }

    assert_eq!(h.wallet.balance_of(&token).await.unwrap(), before);
    let ledger = h.engine.ledger().lock().await;
    assert_eq!(ledger.allocated(), dec!(0));
    assert_eq!(ledger.total_capital(), dec!(10000));
}

#[tokio::test]
async fn relay_outage_stops_the_cycle() {
    let h = harness(fast_config(), ScriptedRelay::unreachable());
    let err = h.engine.run_once().await.unwrap_err();
    assert!(err.is_cycle_fatal());
    assert_eq!(h.engine.ledger().lock().await.allocated(), dec!(0));
}
