//! Error taxonomy for the arbitrage engine
//!
//! Every variant except `Configuration` and `Connectivity` is scoped to a
//! single opportunity or bundle: it is caught at that boundary, converted to
//! a `ReasonCode`, and never aborts the discovery cycle or sibling bundles.

use mev::{BundleError, RelayError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ArbitrageError>;

#[derive(Debug, Error)]
pub enum ArbitrageError {
    #[error("Pool {pool} quote is {age_ms}ms old (SLA {sla_ms}ms)")]
    DataStaleness { pool: String, age_ms: u64, sla_ms: u64 },

    #[error("Insufficient liquidity: {0}")]
    InsufficientLiquidity(String),

    #[error("Simulation failed: {reason}")]
    SimulationFailure { reason: String },

    #[error("Risk limit {limit} exceeded: requested {requested}, allowed {allowed}")]
    RiskLimitExceeded {
        limit: String,
        requested: Decimal,
        allowed: Decimal,
    },

    #[error("Capital exhausted: {remaining} usable capital remaining")]
    CapitalExhausted { remaining: Decimal },

    #[error("No flash loan provider can supply {amount} {token}")]
    FlashLoanUnavailable { token: String, amount: Decimal },

    #[error("Bundle not included after {submissions} submissions")]
    BundleNotIncluded { submissions: u32 },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connectivity error ({collaborator}): {message}")]
    Connectivity {
        collaborator: String,
        message: String,
    },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("AMM math error: {0}")]
    Amm(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Opportunity {0} not found in the current cycle")]
    OpportunityNotFound(String),

    #[error("Opportunity was produced by {found}, not {requested}")]
    StrategyMismatch { requested: String, found: String },

    #[error("Bundle construction failed: {0}")]
    Bundle(#[from] BundleError),
}

/// Stable machine-readable reason attached to every failed or rejected opportunity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    DataStaleness,
    InsufficientLiquidity,
    BelowProfitThreshold,
    SimulationFailure,
    RiskLimitExceeded,
    CapitalExhausted,
    FlashLoanUnavailable,
    BundleNotIncluded,
    Timeout,
    InvalidPath,
    Configuration,
    Connectivity,
    Internal,
}

impl ArbitrageError {
    /// Configuration and connectivity faults surface to the operator; all
    /// other failures end only the opportunity they belong to.
    pub fn is_cycle_fatal(&self) -> bool {
        matches!(
            self,
            ArbitrageError::Configuration(_) | ArbitrageError::Connectivity { .. }
        )
    }

    pub fn reason_code(&self) -> ReasonCode {
        match self {
            ArbitrageError::DataStaleness { .. } => ReasonCode::DataStaleness,
            ArbitrageError::InsufficientLiquidity(_) => ReasonCode::InsufficientLiquidity,
            ArbitrageError::SimulationFailure { .. } => ReasonCode::SimulationFailure,
            ArbitrageError::RiskLimitExceeded { .. } => ReasonCode::RiskLimitExceeded,
            ArbitrageError::CapitalExhausted { .. } => ReasonCode::CapitalExhausted,
            ArbitrageError::FlashLoanUnavailable { .. } => ReasonCode::FlashLoanUnavailable,
            ArbitrageError::BundleNotIncluded { .. } => ReasonCode::BundleNotIncluded,
            ArbitrageError::Timeout { .. } => ReasonCode::Timeout,
            ArbitrageError::InvalidPath(_) | ArbitrageError::Amm(_) => ReasonCode::InvalidPath,
            ArbitrageError::Configuration(_) => ReasonCode::Configuration,
            ArbitrageError::Connectivity { .. } => ReasonCode::Connectivity,
            ArbitrageError::OpportunityNotFound(_)
            | ArbitrageError::StrategyMismatch { .. }
            | ArbitrageError::Bundle(_) => ReasonCode::Internal,
        }
    }

    pub fn connectivity(collaborator: &str, message: impl ToString) -> Self {
        ArbitrageError::Connectivity {
            collaborator: collaborator.to_string(),
            message: message.to_string(),
        }
    }
}

impl From<RelayError> for ArbitrageError {
    fn from(err: RelayError) -> Self {
        ArbitrageError::connectivity("relay", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_only_configuration_and_connectivity_are_fatal() {
        assert!(ArbitrageError::Configuration("bad".into()).is_cycle_fatal());
        assert!(ArbitrageError::connectivity("market_data", "refused").is_cycle_fatal());

        let scoped = [
            ArbitrageError::SimulationFailure {
                reason: "revert".into(),
            },
            ArbitrageError::BundleNotIncluded { submissions: 3 },
            ArbitrageError::FlashLoanUnavailable {
                token: "WETH".into(),
                amount: dec!(1),
            },
            ArbitrageError::CapitalExhausted {
                remaining: dec!(0),
            },
        ];
        assert!(scoped.iter().all(|e| !e.is_cycle_fatal()));
    }

    #[test]
    fn test_reason_codes() {
        assert_eq!(
            ArbitrageError::SimulationFailure {
                reason: "revert".into()
            }
            .reason_code(),
            ReasonCode::SimulationFailure
        );
        assert_eq!(
            ArbitrageError::BundleNotIncluded { submissions: 3 }.reason_code(),
            ReasonCode::BundleNotIncluded
        );
        assert_eq!(
            ArbitrageError::Timeout {
                operation: "simulate_bundle".into(),
                timeout_ms: 10
            }
            .reason_code(),
            ReasonCode::Timeout
        );
    }
}
