//! # FlashLoanOrchestrator - Shortfall Borrowing
//!
//! ## Purpose
//!
//! Decides how an allocation is funded. Whatever the wallet already holds of
//! the start token is used first; the shortfall is borrowed from the cheapest
//! provider that can lend it, and repaid (principal + fee) by the bundle's
//! final transaction. No capable provider means the opportunity is dropped with
//! `FlashLoanUnavailable` and its capital goes back to the ledger.
//!
//! ## Integration Points
//!
//! - **Providers**: `FlashLoanProvider::max_loan` / `fee_bps`, queried per opportunity
//! - **Output**: `LoanPlan`, consumed by the bundle builder for borrow / repay legs
//!
//! ```text
//! CapitalAllocation + wallet balance → [shortfall?] → no  → LoanPlan { loan: None }
//!                                           ↓ yes
//!                       providers sorted by (fee, name) → first with max_loan ≥ shortfall
//! ```

use crate::config::FlashLoanProviderConfig;
use crate::error::{ArbitrageError, Result};
use crate::interfaces::FlashLoanProvider;
use crate::types::{ArbitrageOpportunity, CapitalAllocation, Token};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Borrowed leg of a loan plan
#[derive(Debug, Clone, PartialEq)]
pub struct FlashLoan {
    pub provider: String,
    pub contract: String,
    /// Start-token units
    pub principal: Decimal,
    pub fee_bps: u32,
    pub fee: Decimal,
    pub repay_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoanPlan {
    pub token: Token,
    /// Start-token units supplied by the wallet
    pub own_capital: Decimal,
    pub loan: Option<FlashLoan>,
}

impl LoanPlan {
    pub fn is_borrowing(&self) -> bool {
        self.loan.is_some()
    }

    /// Flash-loan fee in the accounting currency
    pub fn fee_value(&self) -> Decimal {
        self.loan
            .as_ref()
            .map(|loan| loan.fee * self.token.reference_price)
            .unwrap_or_default()
    }
}

/// Provider backed by static configuration
#[derive(Debug, Clone)]
pub struct ConfiguredFlashLoanProvider {
    name: String,
    contract: String,
    fee_bps: u32,
    /// Keyed by lowercase address or symbol
    max_loans: HashMap<String, Decimal>,
}

impl ConfiguredFlashLoanProvider {
    pub fn new(config: &FlashLoanProviderConfig) -> Self {
        Self {
            name: config.name.clone(),
            contract: config.contract.clone(),
            fee_bps: config.fee_bps,
            max_loans: config
                .max_loans
                .iter()
                .map(|(key, amount)| (key.to_lowercase(), *amount))
                .collect(),
        }
    }
}

#[async_trait]
impl FlashLoanProvider for ConfiguredFlashLoanProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn contract_address(&self) -> &str {
        &self.contract
    }

    async fn max_loan(&self, token: &Token) -> Result<Decimal> {
        Ok(self
            .max_loans
            .get(&token.address)
            .or_else(|| self.max_loans.get(&token.symbol.to_lowercase()))
            .copied()
            .unwrap_or_default())
    }

    async fn fee_bps(&self, _token: &Token, _amount: Decimal) -> Result<u32> {
        Ok(self.fee_bps)
    }
}

#[derive(Clone)]
pub struct FlashLoanOrchestrator {
    providers: Vec<Arc<dyn FlashLoanProvider>>,
}

impl FlashLoanOrchestrator {
    pub fn new(providers: Vec<Arc<dyn FlashLoanProvider>>) -> Self {
        Self { providers }
    }

    pub fn from_config(configs: &[FlashLoanProviderConfig]) -> Self {
        Self::new(
            configs
                .iter()
                .map(|config| Arc::new(ConfiguredFlashLoanProvider::new(config)) as Arc<dyn FlashLoanProvider>)
                .collect(),
        )
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Fund `allocation`, borrowing whatever `available_balance` does not cover
    pub async fn fund(
        &self,
        allocation: &CapitalAllocation,
        opportunity: &ArbitrageOpportunity,
        available_balance: Decimal,
    ) -> Result<LoanPlan> {
        let token = opportunity.start_token.clone();
        let required = allocation.token_amount;
        let own_capital = available_balance.max(Decimal::ZERO).min(required);
        let shortfall = required - own_capital;

        if shortfall <= Decimal::ZERO {
            return Ok(LoanPlan {
                token,
                own_capital,
                loan: None,
            });
        }

        let mut quotes = Vec::with_capacity(self.providers.len());
        for provider in &self.providers {
            let quote = async {
                let capacity = provider.max_loan(&token).await?;
                let fee_bps = provider.fee_bps(&token, shortfall).await?;
                Ok::<_, ArbitrageError>((capacity, fee_bps))
            };
            match quote.await {
                Ok((capacity, fee_bps)) if capacity >= shortfall => {
                    quotes.push((fee_bps, provider.name().to_string(), Arc::clone(provider)));
                }
                Ok((capacity, _)) => {
                    debug!(
                        "🏦 {} can lend {} {}, short of {}",
                        provider.name(),
                        capacity,
                        token.symbol,
                        shortfall
                    );
                }
                Err(e) => warn!("🏦 Flash loan provider {} unavailable: {}", provider.name(), e),
            }
        }

        quotes.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        let Some((fee_bps, name, provider)) = quotes.into_iter().next() else {
            return Err(ArbitrageError::FlashLoanUnavailable {
                token: token.symbol.clone(),
                amount: shortfall,
            });
        };

        let fee = shortfall * Decimal::from(fee_bps) / Decimal::from(10_000);
        debug!(
            "🏦 Borrowing {} {} from {} at {} bps",
            shortfall, token.symbol, name, fee_bps
        );
        Ok(LoanPlan {
            token,
            own_capital,
            loan: Some(FlashLoan {
                provider: name,
                contract: provider.contract_address().to_string(),
                principal: shortfall,
                fee_bps,
                fee,
                repay_amount: shortfall + fee,
            }),
        })
    }
}
