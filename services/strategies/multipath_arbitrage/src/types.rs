//! Core domain types shared by every stage of the pipeline
//!
//! Ids are small integers into the per-cycle snapshot arena; anything that
//! outlives the snapshot (opportunities, allocations, results) also carries
//! the addresses and symbols needed to act on it.

use crate::error::{ArbitrageError, ReasonCode};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PoolId(pub u32);

/// Exchange venue identifier (e.g. "uniswap_v2", "sushiswap")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VenueId(pub String);

impl VenueId {
    pub fn new(name: impl Into<String>) -> Self {
        VenueId(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn one() -> Decimal {
    Decimal::ONE
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token {
    /// Lowercase 0x-prefixed address
    pub address: String,
    pub symbol: String,
    pub decimals: u8,
    /// Value of one whole token in the accounting currency
    #[serde(default = "one")]
    pub reference_price: Decimal,
}

impl Token {
    pub fn new(address: &str, symbol: &str, decimals: u8) -> Self {
        Self {
            address: address.to_lowercase(),
            symbol: symbol.to_string(),
            decimals,
            reference_price: Decimal::ONE,
        }
    }

    pub fn with_price(mut self, reference_price: Decimal) -> Self {
        self.reference_price = reference_price;
        self
    }
}

/// Which detector produced a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyId {
    CrossVenue,
    Triangular,
    MultiPath,
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyId::CrossVenue => "cross_venue",
            StrategyId::Triangular => "triangular",
            StrategyId::MultiPath => "multi_path",
        };
        f.write_str(name)
    }
}

impl FromStr for StrategyId {
    type Err = ArbitrageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cross_venue" => Ok(StrategyId::CrossVenue),
            "triangular" => Ok(StrategyId::Triangular),
            "multi_path" => Ok(StrategyId::MultiPath),
            other => Err(ArbitrageError::Configuration(format!(
                "Unknown strategy '{}'",
                other
            ))),
        }
    }
}

/// One directed hop through a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathHop {
    pub pool: PoolId,
    pub from: TokenId,
    pub to: TokenId,
}

/// A cycle of hops that starts and ends at `start`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Path {
    pub strategy: StrategyId,
    pub start: TokenId,
    pub hops: Vec<PathHop>,
    /// Sum of `-ln(rate·(1-fee))` over the hops
    pub weight: f64,
}

impl Path {
    pub fn new(strategy: StrategyId, start: TokenId, hops: Vec<PathHop>, weight: f64) -> Self {
        Self {
            strategy,
            start,
            hops,
            weight,
        }
    }

    pub fn hop_count(&self) -> usize {
        self.hops.len()
    }

    /// Product of post-fee spot rates around the cycle
    pub fn gross_factor(&self) -> f64 {
        (-self.weight).exp()
    }

    /// Tokens visited, starting token first, without repeating it at the end
    pub fn tokens(&self) -> Vec<TokenId> {
        self.hops.iter().map(|hop| hop.from).collect()
    }

    pub fn pools(&self) -> Vec<PoolId> {
        self.hops.iter().map(|hop| hop.pool).collect()
    }

    /// Identity used for de-duplication: the exact directed edge sequence
    pub fn edge_key(&self) -> Vec<(PoolId, TokenId, TokenId)> {
        self.hops.iter().map(|hop| (hop.pool, hop.from, hop.to)).collect()
    }

    /// Every consecutive hop shares a token and the cycle closes on `start`
    pub fn validate(&self, max_hops: usize) -> Result<(), ArbitrageError> {
        let (first, last) = match (self.hops.first(), self.hops.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(ArbitrageError::InvalidPath("empty path".to_string())),
        };
        if self.hops.len() > max_hops {
            return Err(ArbitrageError::InvalidPath(format!(
                "{} hops exceeds max_hops {}",
                self.hops.len(),
                max_hops
            )));
        }
        if first.from != self.start || last.to != self.start {
            return Err(ArbitrageError::InvalidPath(
                "cycle does not close on its start token".to_string(),
            ));
        }
        for (index, pair) in self.hops.windows(2).enumerate() {
            if pair[0].to != pair[1].from {
                return Err(ArbitrageError::InvalidPath(format!(
                    "hop {} ends at {:?} but hop {} starts at {:?}",
                    index,
                    pair[0].to,
                    index + 1,
                    pair[1].from
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpportunityId(pub Uuid);

impl OpportunityId {
    pub fn new() -> Self {
        OpportunityId(Uuid::new_v4())
    }
}

impl Default for OpportunityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OpportunityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OpportunityId {
    type Err = ArbitrageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(OpportunityId)
            .map_err(|_| ArbitrageError::OpportunityNotFound(s.to_string()))
    }
}

/// A priced swap inside a route, in whole-token units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapLeg {
    pub pool: PoolId,
    pub pool_address: String,
    pub venue: VenueId,
    pub token_in: Token,
    pub token_out: Token,
    pub amount_in: Decimal,
    pub expected_out: Decimal,
    /// Input-side depth of the pool at quote time
    pub depth_in: Decimal,
}

/// One or more paths executed together; merged paths share their first
/// `shared_prefix_len` hops, which run once with the combined input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub paths: Vec<Path>,
    pub shared_prefix_len: usize,
    /// Start-token input attributed to each path
    pub path_inputs: Vec<Decimal>,
    /// Legs in execution order: shared prefix, then each path's suffix
    pub legs: Vec<SwapLeg>,
}

impl Route {
    pub fn single(path: Path, input: Decimal, legs: Vec<SwapLeg>) -> Self {
        Self {
            paths: vec![path],
            shared_prefix_len: 0,
            path_inputs: vec![input],
            legs,
        }
    }

    pub fn is_merged(&self) -> bool {
        self.paths.len() > 1
    }

    pub fn primary(&self) -> Option<&Path> {
        self.paths.first()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrageOpportunity {
    pub id: OpportunityId,
    pub strategy: StrategyId,
    pub route: Route,
    pub start_token: Token,
    /// Start-token units
    pub input_amount: Decimal,
    /// Start-token units returned by the route
    pub expected_output: Decimal,
    /// Currency, post-fee and pre-gas
    pub gross_profit: Decimal,
    pub gas_units: u64,
    /// Currency
    pub gas_cost: Decimal,
    /// Currency, after gas
    pub expected_profit: Decimal,
    /// Shortfall of the route output against spot-rate output, as a fraction
    pub slippage: Decimal,
    /// Probability the route fills as quoted, in [0, 1]
    pub confidence: Decimal,
    pub needs_flash_loan: bool,
    pub discovered_at_ms: u64,
}

impl ArbitrageOpportunity {
    /// Input size in the accounting currency
    pub fn input_value(&self) -> Decimal {
        self.input_amount * self.start_token.reference_price
    }

    pub fn hop_count(&self) -> usize {
        self.route.legs.len()
    }

    pub fn token_addresses(&self) -> BTreeSet<String> {
        self.route
            .legs
            .iter()
            .flat_map(|leg| [leg.token_in.address.clone(), leg.token_out.address.clone()])
            .collect()
    }

    pub fn venues(&self) -> BTreeSet<VenueId> {
        self.route.legs.iter().map(|leg| leg.venue.clone()).collect()
    }

    /// Largest trade-size to depth ratio across legs
    pub fn max_depth_ratio(&self, scale: Decimal) -> Decimal {
        self.route
            .legs
            .iter()
            .map(|leg| {
                if leg.depth_in > Decimal::ZERO {
                    leg.amount_in * scale / leg.depth_in
                } else {
                    Decimal::ONE
                }
            })
            .max()
            .unwrap_or(Decimal::ZERO)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub opportunity_id: OpportunityId,
    /// Weighted score in [0, 1]; higher is riskier
    pub score: Decimal,
    pub depth_ratio: Decimal,
    pub venue_failure_rate: Decimal,
    pub correlation: Decimal,
    pub sandwich_risk: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapitalAllocation {
    pub opportunity_id: OpportunityId,
    /// Currency
    pub amount: Decimal,
    /// Start-token units
    pub token_amount: Decimal,
    /// Applied fraction of usable capital
    pub fraction: Decimal,
    /// `amount / opportunity.input_value()`
    pub scale: Decimal,
    /// Currency, after gas, at the allocated size
    pub expected_profit: Decimal,
    pub down_sized: bool,
    pub risk: RiskAssessment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedOpportunity {
    pub opportunity_id: Option<OpportunityId>,
    pub reason: ReasonCode,
    pub detail: String,
}

impl RejectedOpportunity {
    pub fn new(
        opportunity_id: Option<OpportunityId>,
        reason: ReasonCode,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            opportunity_id,
            reason,
            detail: detail.into(),
        }
    }

    pub fn from_error(opportunity_id: Option<OpportunityId>, error: &ArbitrageError) -> Self {
        Self {
            opportunity_id,
            reason: error.reason_code(),
            detail: error.to_string(),
        }
    }
}

/// Lifecycle of one opportunity inside the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum ExecutionState {
    Allocated,
    Built,
    Simulated { passed: bool },
    Submitted { attempt: u32 },
    Included { block_number: u64 },
    Retried { attempt: u32 },
    Abandoned,
}

/// Individual execution step with timing for performance analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub state: ExecutionState,
    pub duration_ms: u64,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub opportunity_id: OpportunityId,
    pub strategy: StrategyId,
    pub success: bool,
    /// Currency, after gas
    pub realized_profit: Decimal,
    pub gas_used: u64,
    pub failure: Option<ReasonCode>,
    pub failure_detail: Option<String>,
    pub bundle_id: Option<String>,
    pub submissions: u32,
    pub final_state: ExecutionState,
    pub venues: Vec<VenueId>,
    pub steps: Vec<ExecutionStep>,
    pub execution_time_ms: u64,
}

impl ExecutionResult {
    pub fn failed(
        opportunity: &ArbitrageOpportunity,
        error: &ArbitrageError,
        final_state: ExecutionState,
    ) -> Self {
        Self {
            opportunity_id: opportunity.id,
            strategy: opportunity.strategy,
            success: false,
            realized_profit: dec!(0),
            gas_used: 0,
            failure: Some(error.reason_code()),
            failure_detail: Some(error.to_string()),
            bundle_id: None,
            submissions: 0,
            final_state,
            venues: opportunity.venues().into_iter().collect(),
            steps: Vec::new(),
            execution_time_ms: 0,
        }
    }
}
