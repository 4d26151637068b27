//! # Multi-Path Arbitrage Configuration - Dynamic Parameter Management
//!
//! ## Purpose
//!
//! Single configuration authority for the engine: discovery bounds, ranking
//! weights, risk caps, Kelly allocation, execution and retry policy, gas model,
//! flash-loan providers and network endpoints. Loaded once at start-up into the
//! engine context and passed down by reference; nothing reads configuration
//! from module-level state.
//!
//! ## Integration Points
//!
//! - **Input Sources**: TOML or JSON files, `ARBITRAGE_*` environment variables, CLI flags
//! - **Output Destinations**: every pipeline stage via `EngineContext`
//! - **Validation**: `validate()` rejects inconsistent settings before the first cycle
//!
//! ## Architecture Role
//!
//! ```text
//! Config File ─┐
//! Environment ─┼─→ [ArbitrageConfig::validate] → EngineContext → PathFinder / Ranker /
//! CLI Flags ───┘                                                  Optimizer / Risk /
//!                                                                 Allocator / Executor
//! ```

use crate::types::StrategyId;
use anyhow::{bail, Context};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use torq_strategy_shared::{load_config, save_config, BaseStrategyConfig, StrategyConfig};

/// Complete configuration for the multi-path arbitrage engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbitrageConfig {
    /// Minimum profit after gas, in currency units, applied at every stage
    pub min_profit_threshold: Decimal,
    pub strategy: BaseStrategyConfig,
    pub discovery: DiscoveryConfig,
    pub ranking: RankingConfig,
    pub risk: RiskConfig,
    pub allocation: AllocationConfig,
    pub execution: ExecutionConfig,
    pub gas: GasConfig,
    pub flash_loans: FlashLoanConfig,
    pub network: NetworkConfig,
}

/// Path discovery parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub max_hops: usize,
    pub max_paths_per_token: usize,
    /// Parallel start-token searches and pool re-quotes
    pub concurrency_limit: usize,
    /// A cycle is flagged when its rate product exceeds 1 + epsilon
    pub cycle_epsilon: f64,
    /// Pool quotes older than this are excluded from the cycle's graph
    pub freshness_sla_ms: u64,
    pub discovery_interval_seconds: u64,
    /// Addresses to start cycles from; empty means every token in the snapshot
    pub start_tokens: Vec<String>,
    pub strategies: Vec<StrategyId>,
    /// Bounded queue between allocation and execution
    pub opportunity_channel_capacity: usize,
}

/// Ranking weights; must sum to 1
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub profit_weight: f64,
    pub risk_weight: f64,
    pub diversity_weight: f64,
    pub history_weight: f64,
}

/// Risk caps (fractions of total capital) and risk-score weights
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub max_risk_per_trade: Decimal,
    pub max_risk_per_token: Decimal,
    pub max_risk_per_dex: Decimal,
    pub depth_weight: Decimal,
    pub failure_weight: Decimal,
    pub correlation_weight: Decimal,
    /// Depth ratio above which a route is treated as sandwich-exposed
    pub sandwich_depth_threshold: Decimal,
}

/// Kelly allocation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationConfig {
    pub total_capital: Decimal,
    pub reserve_percentage: Decimal,
    /// Safety multiplier on the full-Kelly fraction
    pub kelly_fraction: Decimal,
    pub min_allocation_percent: Decimal,
    pub max_allocation_percent: Decimal,
}

/// Optimizer and executor parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub max_slippage: Decimal,
    /// Largest first-hop input as a fraction of that pool's depth
    pub max_position_pct_of_depth: Decimal,
    /// Venues whose router can run merged multi-leg swaps
    pub batching_venues: Vec<String>,
    pub max_block_number_target: u64,
    pub retry_limit: u32,
    pub max_concurrent_paths: usize,
    pub simulation_timeout_ms: u64,
    pub inclusion_timeout_ms: u64,
    pub status_poll_interval_ms: u64,
    pub fee_bump_percent: u32,
    /// Arbitrage contract that receives every bundle leg
    pub executor_contract: String,
    /// Simulate only; never submit
    pub dry_run: bool,
}

/// Gas cost model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GasConfig {
    pub base_gas: u64,
    pub gas_per_hop: u64,
    pub flash_loan_gas: u64,
    /// Priority fee multiplier for sandwich-exposed routes
    pub mev_risk_multiplier: Decimal,
    pub max_priority_multiplier: Decimal,
    pub default_base_fee_gwei: Decimal,
    pub default_priority_fee_gwei: Decimal,
    /// Native token price in currency units, used when no feed is available
    pub default_native_token_price: Decimal,
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FlashLoanConfig {
    pub providers: Vec<FlashLoanProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashLoanProviderConfig {
    pub name: String,
    pub contract: String,
    pub fee_bps: u32,
    /// Token address → maximum loan in whole tokens
    #[serde(default)]
    pub max_loans: std::collections::HashMap<String, Decimal>,
}

/// Network and connectivity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub rpc_url: String,
    pub relay_url: String,
    pub chain_id: u64,
    pub request_timeout_ms: u64,
    /// JSON pool snapshot used by the file-backed market data source
    pub snapshot_path: Option<String>,
    /// Capacity of the optional analytics result channel
    pub results_channel_capacity: usize,
}

impl Default for ArbitrageConfig {
    fn default() -> Self {
        Self {
            min_profit_threshold: dec!(1.0),
            strategy: BaseStrategyConfig {
                name: "multipath_arbitrage".to_string(),
                ..BaseStrategyConfig::default()
            },
            discovery: DiscoveryConfig::default(),
            ranking: RankingConfig::default(),
            risk: RiskConfig::default(),
            allocation: AllocationConfig::default(),
            execution: ExecutionConfig::default(),
            gas: GasConfig::default(),
            flash_loans: FlashLoanConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_hops: 4,
            max_paths_per_token: 16,
            concurrency_limit: 8,
            cycle_epsilon: 0.0001,
            freshness_sla_ms: 3_000,
            discovery_interval_seconds: 2,
            start_tokens: Vec::new(),
            strategies: vec![StrategyId::MultiPath],
            opportunity_channel_capacity: 64,
        }
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            profit_weight: 0.5,
            risk_weight: 0.2,
            diversity_weight: 0.15,
            history_weight: 0.15,
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_risk_per_trade: dec!(0.10),
            max_risk_per_token: dec!(0.25),
            max_risk_per_dex: dec!(0.40),
            depth_weight: dec!(0.5),
            failure_weight: dec!(0.3),
            correlation_weight: dec!(0.2),
            sandwich_depth_threshold: dec!(0.02),
        }
    }
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            total_capital: dec!(10000),
            reserve_percentage: dec!(0.10),
            kelly_fraction: dec!(0.5), // half-Kelly
            min_allocation_percent: dec!(0.01),
            max_allocation_percent: dec!(0.25),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_slippage: dec!(0.005),
            max_position_pct_of_depth: dec!(0.05),
            batching_venues: vec!["uniswap_v2".to_string(), "uniswap_v3".to_string()],
            max_block_number_target: 3,
            retry_limit: 2,
            max_concurrent_paths: 4,
            simulation_timeout_ms: 2_000,
            inclusion_timeout_ms: 45_000,
            status_poll_interval_ms: 1_000,
            fee_bump_percent: 12,
            executor_contract: "0x0000000000000000000000000000000000000000".to_string(),
            dry_run: false,
        }
    }
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            base_gas: 60_000,
            gas_per_hop: 90_000,
            flash_loan_gas: 80_000,
            mev_risk_multiplier: dec!(1.5),
            max_priority_multiplier: dec!(5),
            default_base_fee_gwei: dec!(20),
            default_priority_fee_gwei: dec!(1.5),
            default_native_token_price: dec!(3000),
            cache_ttl_secs: 12,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            relay_url: "https://relay.flashbots.net".to_string(),
            chain_id: 1,
            request_timeout_ms: 5_000,
            snapshot_path: None,
            results_channel_capacity: 256,
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|value| value.parse::<T>().ok())
}

impl ArbitrageConfig {
    /// Load configuration from a TOML file, or JSON when the extension is `.json`
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        load_config(path).with_context(|| format!("Loading arbitrage config {}", path.display()))
    }

    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Override fields from `ARBITRAGE_*` variables when present and parseable
    pub fn apply_env_overrides(&mut self) {
        if let Some(value) = env_parse::<Decimal>("ARBITRAGE_MIN_PROFIT_THRESHOLD") {
            self.min_profit_threshold = value;
        }
        if let Some(value) = env_parse::<usize>("ARBITRAGE_MAX_HOPS") {
            self.discovery.max_hops = value;
        }
        if let Some(value) = env_parse::<usize>("ARBITRAGE_CONCURRENCY_LIMIT") {
            self.discovery.concurrency_limit = value;
        }
        if let Some(value) = env_parse::<u64>("ARBITRAGE_DISCOVERY_INTERVAL_SECONDS") {
            self.discovery.discovery_interval_seconds = value;
        }
        if let Some(value) = env_parse::<Decimal>("ARBITRAGE_TOTAL_CAPITAL") {
            self.allocation.total_capital = value;
        }
        if let Some(value) = env_parse::<Decimal>("ARBITRAGE_KELLY_FRACTION") {
            self.allocation.kelly_fraction = value;
        }
        if let Some(value) = env_parse::<Decimal>("ARBITRAGE_MAX_SLIPPAGE") {
            self.execution.max_slippage = value;
        }
        if let Some(value) = env_parse::<u32>("ARBITRAGE_RETRY_LIMIT") {
            self.execution.retry_limit = value;
        }
        if let Some(value) = env_parse::<bool>("ARBITRAGE_DRY_RUN") {
            self.execution.dry_run = value;
        }
        if let Ok(value) = std::env::var("ARBITRAGE_RPC_URL") {
            self.network.rpc_url = value;
        }
        if let Ok(value) = std::env::var("ARBITRAGE_RELAY_URL") {
            self.network.relay_url = value;
        }
    }

    /// The single profit gate used by every stage
    pub fn clears_profit_threshold(&self, profit: Decimal) -> bool {
        profit > self.min_profit_threshold
    }

    /// Save configuration to a TOML or JSON file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        save_config(self, path)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> anyhow::Result<()> {
        let fraction = |value: Decimal| value >= dec!(0) && value <= dec!(1);

        if self.min_profit_threshold < dec!(0) {
            bail!("min_profit_threshold must be non-negative");
        }

        // Discovery
        if self.discovery.max_hops < 2 {
            bail!("max_hops must be at least 2 (a cycle needs two pools)");
        }
        if self.discovery.max_paths_per_token == 0 {
            bail!("max_paths_per_token must be positive");
        }
        if self.discovery.concurrency_limit == 0 {
            bail!("concurrency_limit must be positive");
        }
        if !(self.discovery.cycle_epsilon >= 0.0 && self.discovery.cycle_epsilon < 1.0) {
            bail!("cycle_epsilon must be in [0, 1)");
        }
        if self.discovery.discovery_interval_seconds == 0 {
            bail!("discovery_interval_seconds must be positive");
        }
        if self.discovery.strategies.is_empty() {
            bail!("at least one detector strategy must be enabled");
        }
        if self.discovery.opportunity_channel_capacity == 0 {
            bail!("opportunity_channel_capacity must be positive");
        }

        // Ranking
        let weights = [
            self.ranking.profit_weight,
            self.ranking.risk_weight,
            self.ranking.diversity_weight,
            self.ranking.history_weight,
        ];
        if weights.iter().any(|w| *w < 0.0) {
            bail!("ranking weights must be non-negative");
        }
        if (weights.iter().sum::<f64>() - 1.0).abs() > 1e-6 {
            bail!("ranking weights must sum to 1");
        }

        // Risk
        for (name, value) in [
            ("max_risk_per_trade", self.risk.max_risk_per_trade),
            ("max_risk_per_token", self.risk.max_risk_per_token),
            ("max_risk_per_dex", self.risk.max_risk_per_dex),
        ] {
            if value <= dec!(0) || value > dec!(1) {
                bail!("{} must be in (0, 1]", name);
            }
        }

        // Allocation
        if self.allocation.total_capital <= dec!(0) {
            bail!("total_capital must be positive");
        }
        if !fraction(self.allocation.reserve_percentage) || self.allocation.reserve_percentage == dec!(1) {
            bail!("reserve_percentage must be in [0, 1)");
        }
        if self.allocation.kelly_fraction <= dec!(0) || self.allocation.kelly_fraction > dec!(1) {
            bail!("kelly_fraction must be in (0, 1]");
        }
        if !fraction(self.allocation.min_allocation_percent)
            || !fraction(self.allocation.max_allocation_percent)
            || self.allocation.min_allocation_percent > self.allocation.max_allocation_percent
        {
            bail!("allocation percents must satisfy 0 <= min <= max <= 1");
        }

        // Execution
        if !fraction(self.execution.max_slippage) {
            bail!("max_slippage must be in [0, 1]");
        }
        if self.execution.max_position_pct_of_depth <= dec!(0)
            || self.execution.max_position_pct_of_depth > dec!(1)
        {
            bail!("max_position_pct_of_depth must be in (0, 1]");
        }
        if self.execution.max_block_number_target == 0 {
            bail!("max_block_number_target must be positive");
        }
        if self.execution.max_concurrent_paths == 0 {
            bail!("max_concurrent_paths must be positive");
        }
        if self.execution.simulation_timeout_ms == 0 || self.execution.inclusion_timeout_ms == 0 {
            bail!("simulation and inclusion timeouts must be positive");
        }
        if self
            .execution
            .executor_contract
            .parse::<ethers::types::Address>()
            .is_err()
        {
            bail!("Invalid executor_contract address format");
        }

        // Gas
        if self.gas.mev_risk_multiplier < dec!(1) {
            bail!("mev_risk_multiplier must be at least 1");
        }
        if self.gas.default_native_token_price <= dec!(0) {
            bail!("default_native_token_price must be positive");
        }

        // Flash loans
        for provider in &self.flash_loans.providers {
            if provider.contract.parse::<ethers::types::Address>().is_err() {
                bail!("Invalid contract address for flash loan provider {}", provider.name);
            }
            if provider.fee_bps >= 10_000 {
                bail!("fee_bps for flash loan provider {} must be below 10000", provider.name);
            }
        }

        Ok(())
    }
}

impl StrategyConfig for ArbitrageConfig {
    fn validate(&self) -> anyhow::Result<()> {
        ArbitrageConfig::validate(self)
    }
}
