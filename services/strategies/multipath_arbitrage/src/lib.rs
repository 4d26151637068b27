//! # Multi-Path Arbitrage Strategy - Cyclic Route Discovery and Bundle Execution
//!
//! ## Purpose
//!
//! Finds closed trading cycles across AMM pools whose product of effective
//! exchange rates exceeds one, sizes them under liquidity and risk limits,
//! funds them from the wallet or a flash loan, and submits each one as an
//! atomic bundle to a private relay. Every opportunity ends either included
//! on-chain or abandoned with its capital released.
//!
//! ## Integration Points
//!
//! - **Input Sources**: `MarketDataSource` pool states, `NetworkConditions` gas quotes,
//!   `WalletBalances` for own capital and nonces
//! - **Output Destinations**: `PrivateRelay` (Flashbots-compatible) bundle submission
//! - **Flash Loan Providers**: any number of `FlashLoanProvider`s, cheapest sufficient wins
//! - **Analytics**: `ExecutionResult` channel and `AggregatedStats` snapshot
//!
//! ## Architecture Role
//!
//! ```mermaid
//! graph LR
//!     Market[Market Data] --> Snapshot[Market Snapshot]
//!     Snapshot --> Finder[Path Finder<br/>Bounded Bellman-Ford]
//!     Finder --> Ranker[Path Ranker]
//!     Ranker --> Optimizer[Path Optimizer<br/>Sizing + Merging]
//!     Optimizer --> Allocator[Kelly Allocator<br/>Risk Manager]
//!     Allocator --> Loans[Flash Loan Orchestrator]
//!     Loans --> Executor[Bundle Executor]
//!     Executor --> Relay[Private Relay]
//!     Executor --> Tracker[Performance Tracker]
//!     Tracker --> Ranker
//!     Tracker --> Allocator
//! ```
//!
//! ## Strategy Components
//!
//! ### Discovery
//! - **Snapshot**: one consistent view of pool states per cycle, stale pools excluded
//! - **Detectors**: cross-venue (2 hops), triangular (3 hops) and multi-path (up to `max_hops`)
//! - **Ranking**: weighted profit, risk, venue history and gas with a diversity pass
//!
//! ### Execution
//! - **Sizing**: largest input within slippage and depth limits, shared-prefix merging
//! - **Allocation**: fractional Kelly over a ledger that never exceeds usable capital
//! - **Bundles**: simulate, then submit for a block range, retry with a fee bump
//!
//! ## Examples
//!
//! The in-memory collaborators below live behind the `testing` feature.
//!
//! ```rust,no_run
//! use multipath_arbitrage::{ArbitrageConfig, ArbitrageEngine, EngineContext, FileMarketData};
//! use multipath_arbitrage::testing::{InMemoryWallet, ScriptedRelay, StaticNetwork};
//! use std::sync::Arc;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let context = EngineContext::new(
//!     ArbitrageConfig::default(),
//!     Arc::new(FileMarketData::load("pools.json")?),
//!     Arc::new(ScriptedRelay::unreachable()),
//!     Arc::new(StaticNetwork::quiet(1)),
//!     Arc::new(InMemoryWallet::new()),
//! )?;
//! let engine = ArbitrageEngine::new(context);
//! for opportunity in engine.discover_opportunities(5).await? {
//!     println!("{} → {}", opportunity.id, opportunity.expected_profit);
//! }
//! # Ok(())
//! # }
//! ```

pub mod allocator;
pub mod bundle_builder;
pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod executor;
pub mod file_market_data;
pub mod flash_loan;
pub mod gas_price;
pub mod interfaces;
pub mod logging;
pub mod metrics;
pub mod path_finder;
pub mod path_optimizer;
pub mod path_ranker;
pub mod risk;
pub mod snapshot;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;
pub mod wallet;

pub use allocator::{CapitalAllocator, CapitalLedger, SharedLedger};
pub use bundle_builder::ArbitrageBundleBuilder;
pub use config::ArbitrageConfig;
pub use detector::OpportunityDetector;
pub use engine::{ArbitrageEngine, ArbitrageService, CycleReport, EngineContext};
pub use error::{ArbitrageError, ReasonCode, Result};
pub use executor::BundleExecutor;
pub use file_market_data::FileMarketData;
pub use flash_loan::{FlashLoanOrchestrator, LoanPlan};
pub use gas_price::RpcGasOracle;
pub use interfaces::{
    FlashLoanProvider, GasQuote, MarketDataSource, NetworkConditions, PoolMeta, PoolState,
    PrivateRelay, WalletBalances,
};
pub use metrics::{AggregatedStats, PerformanceTracker};
pub use path_finder::PathFinder;
pub use path_optimizer::PathOptimizer;
pub use path_ranker::PathRanker;
pub use risk::RiskManager;
pub use types::{
    ArbitrageOpportunity, CapitalAllocation, ExecutionResult, ExecutionState, OpportunityId,
    Path, StrategyId, Token,
};
pub use wallet::RpcWallet;

/// Re-export key types
pub use rust_decimal::Decimal;
