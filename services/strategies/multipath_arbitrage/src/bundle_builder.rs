//! # Arbitrage Bundle Builder
//!
//! ## Purpose
//!
//! Turns an allocated, funded opportunity into a `mev::Bundle`: an optional
//! `flashBorrow`, one `swapExactIn` per leg in route order, and an optional
//! `flashRepay` for principal plus fee, all sent to the configured executor
//! contract. Leg sizes are the optimizer's sizes scaled by the allocation;
//! each swap carries a protected minimum output so a manipulated pool reverts
//! the whole bundle.
//!
//! Fees follow network congestion, and routes the RiskManager flagged for
//! sandwich exposure pay the MEV-risk multiplier on top:
//!
//! ```text
//! priority = priority_fee_gwei × min(congestion × mev_multiplier, max_priority_multiplier)
//! max_fee  = 2 × base_fee_gwei + priority
//! ```

use crate::config::ArbitrageConfig;
use crate::error::{ArbitrageError, Result};
use crate::flash_loan::LoanPlan;
use crate::interfaces::GasQuote;
use crate::types::{ArbitrageOpportunity, CapitalAllocation};
use ethers::abi::{self, Token as AbiToken};
use ethers::types::{Address, U256};
use ethers::utils::id;
use mev::{Bundle, BundleBuilder, BundleTransaction, LegKind, MevProtection, MevProtectionConfig};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;
use torq_amm::pow10;
use tracing::debug;

const FLASH_BORROW: &str = "flashBorrow(address,address,uint256)";
const SWAP_EXACT_IN: &str = "swapExactIn(address,address,address,uint256,uint256)";
const FLASH_REPAY: &str = "flashRepay(address,address,uint256)";

fn parse_address(value: &str) -> Result<Address> {
    Address::from_str(value)
        .map_err(|e| ArbitrageError::Configuration(format!("Invalid address '{}': {}", value, e)))
}

/// Whole-token amount to raw integer units, truncated
pub fn raw_amount(amount: Decimal, decimals: u8) -> Result<U256> {
    if amount < Decimal::ZERO {
        return Err(ArbitrageError::InvalidPath(format!("negative amount {}", amount)));
    }
    let scaled = amount
        .checked_mul(pow10(decimals))
        .ok_or_else(|| ArbitrageError::Amm(format!("{} overflows at {} decimals", amount, decimals)))?
        .trunc()
        .normalize();
    U256::from_dec_str(&scaled.to_string())
        .map_err(|e| ArbitrageError::Amm(format!("{} is not an integer amount: {}", scaled, e)))
}

fn gwei_to_wei(gwei: Decimal) -> u64 {
    (gwei * Decimal::from(1_000_000_000u64))
        .trunc()
        .to_u64()
        .unwrap_or(u64::MAX)
}

fn calldata(signature: &str, args: &[AbiToken]) -> String {
    let mut data = id(signature).to_vec();
    data.extend(abi::encode(args));
    format!("0x{}", hex::encode(data))
}

#[derive(Debug, Clone)]
pub struct ArbitrageBundleBuilder {
    config: ArbitrageConfig,
    protection: MevProtection,
}

impl ArbitrageBundleBuilder {
    pub fn new(config: ArbitrageConfig) -> Self {
        let max_slippage_bps = (config.execution.max_slippage * Decimal::from(10_000))
            .round()
            .to_u32()
            .unwrap_or(u32::MAX);
        let protection = MevProtection::new(MevProtectionConfig {
            max_slippage_bps,
            sandwich_priority_multiplier: config.gas.mev_risk_multiplier,
            max_priority_multiplier: config.gas.max_priority_multiplier,
        });
        Self { config, protection }
    }

    /// Priority fee and max fee per gas in wei
    pub fn fees(&self, gas: &GasQuote, sandwich_risk: bool) -> (u64, u64) {
        let multiplier = self.protection.priority_multiplier(gas.congestion, sandwich_risk);
        let priority_gwei = gas.priority_fee_gwei * multiplier;
        let max_fee_gwei = gas.base_fee_gwei * Decimal::TWO + priority_gwei;
        (gwei_to_wei(priority_gwei), gwei_to_wei(max_fee_gwei))
    }

    pub fn build(
        &self,
        opportunity: &ArbitrageOpportunity,
        allocation: &CapitalAllocation,
        plan: &LoanPlan,
        gas: &GasQuote,
        current_block: u64,
        nonce: u64,
    ) -> Result<Bundle> {
        let executor = parse_address(&self.config.execution.executor_contract)?;
        let executor_hex = format!("{:?}", executor);
        let (priority, max_fee) = self.fees(gas, allocation.risk.sandwich_risk);
        let gas_config = &self.config.gas;
        let target = current_block + 1..=current_block + self.config.execution.max_block_number_target;

        let transaction = |kind: LegKind, data: String, gas_limit: u64| BundleTransaction {
            kind,
            to: executor_hex.clone(),
            data,
            value: "0".to_string(),
            gas_limit,
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: priority,
            nonce: 0,
        };

        let mut transactions = Vec::with_capacity(opportunity.route.legs.len() + 2);
        let borrow_gas = gas_config.flash_loan_gas / 2;

        if let Some(loan) = &plan.loan {
            let data = calldata(
                FLASH_BORROW,
                &[
                    AbiToken::Address(parse_address(&loan.contract)?),
                    AbiToken::Address(parse_address(&plan.token.address)?),
                    AbiToken::Uint(raw_amount(loan.principal, plan.token.decimals)?),
                ],
            );
            transactions.push(transaction(LegKind::Borrow, data, borrow_gas));
        }

        for leg in &opportunity.route.legs {
            let amount_in = leg.amount_in * allocation.scale;
            let min_out = self
                .protection
                .calculate_protected_min_output(leg.expected_out * allocation.scale);
            let data = calldata(
                SWAP_EXACT_IN,
                &[
                    AbiToken::Address(parse_address(&leg.pool_address)?),
                    AbiToken::Address(parse_address(&leg.token_in.address)?),
                    AbiToken::Address(parse_address(&leg.token_out.address)?),
                    AbiToken::Uint(raw_amount(amount_in, leg.token_in.decimals)?),
                    AbiToken::Uint(raw_amount(min_out, leg.token_out.decimals)?),
                ],
            );
            transactions.push(transaction(LegKind::Swap, data, gas_config.gas_per_hop));
        }

        if let Some(loan) = &plan.loan {
            let data = calldata(
                FLASH_REPAY,
                &[
                    AbiToken::Address(parse_address(&loan.contract)?),
                    AbiToken::Address(parse_address(&plan.token.address)?),
                    AbiToken::Uint(raw_amount(loan.repay_amount, plan.token.decimals)?),
                ],
            );
            transactions.push(transaction(
                LegKind::Repay,
                data,
                gas_config.flash_loan_gas - borrow_gas,
            ));
        }

        // Fixed per-bundle overhead rides on the first transaction
        if let Some(first) = transactions.first_mut() {
            first.gas_limit += gas_config.base_gas;
        }

        let bundle = transactions
            .into_iter()
            .fold(
                BundleBuilder::new(target).starting_nonce(nonce),
                BundleBuilder::add_transaction,
            )
            .add_metadata("opportunity_id", opportunity.id.to_string())
            .add_metadata("strategy", opportunity.strategy.to_string())
            .build()?;

        debug!(
            "⛽ Built bundle for {}: {} txs, {} gas, priority {} wei, blocks {}..={}",
            opportunity.id,
            bundle.transaction_count(),
            bundle.estimate_gas(),
            priority,
            bundle.first_block,
            bundle.last_block
        );
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash_loan::FlashLoan;
    use crate::testing::{allocation_for, opportunity};
    use rust_decimal_macros::dec;

    fn quote() -> GasQuote {
        GasQuote {
            base_fee_gwei: dec!(20),
            priority_fee_gwei: dec!(2),
            congestion: dec!(1),
            native_token_price: dec!(3000),
        }
    }

    fn borrowing(opp: &ArbitrageOpportunity) -> LoanPlan {
        LoanPlan {
            token: opp.start_token.clone(),
            own_capital: dec!(0),
            loan: Some(FlashLoan {
                provider: "aave".to_string(),
                contract: "0x87870bca3f3fd6335c3f4ce8392d69350b4fa4e2".to_string(),
                principal: dec!(10),
                fee_bps: 5,
                fee: dec!(0.005),
                repay_amount: dec!(10.005),
            }),
        }
    }

    #[test]
    fn test_raw_amount() {
        assert_eq!(raw_amount(dec!(1.5), 6).unwrap(), U256::from(1_500_000u64));
        assert_eq!(raw_amount(dec!(0.0000001), 6).unwrap(), U256::zero());
        assert_eq!(
            raw_amount(dec!(2), 18).unwrap(),
            U256::from(2_000_000_000_000_000_000u128)
        );
        assert!(raw_amount(dec!(-1), 18).is_err());
    }

    #[test]
    fn test_flash_loan_bundle_order_and_gas() {
        let config = ArbitrageConfig::default();
        let builder = ArbitrageBundleBuilder::new(config.clone());
        let opp = opportunity(&["uniswap_v2", "sushiswap", "uniswap_v2"], dec!(10), dec!(1));
        let allocation = allocation_for(&opp, dec!(10));
        let bundle = builder
            .build(&opp, &allocation, &borrowing(&opp), &quote(), 100, 7)
            .unwrap();

        let kinds: Vec<LegKind> = bundle.transactions.iter().map(|tx| tx.kind).collect();
        assert_eq!(
            kinds,
            vec![
                LegKind::Borrow,
                LegKind::Swap,
                LegKind::Swap,
                LegKind::Swap,
                LegKind::Repay
            ]
        );
        let nonces: Vec<u64> = bundle.transactions.iter().map(|tx| tx.nonce).collect();
        assert_eq!(nonces, vec![7, 8, 9, 10, 11]);
        assert_eq!(bundle.target_blocks(), 101..=103);
        assert_eq!(
            bundle.estimate_gas(),
            config.gas.base_gas + 3 * config.gas.gas_per_hop + config.gas.flash_loan_gas
        );
        assert!(bundle.transactions[0]
            .data
            .starts_with(&format!("0x{}", hex::encode(id(FLASH_BORROW)))));
        assert_eq!(bundle.metadata["opportunity_id"], opp.id.to_string());
    }

    #[test]
    fn test_self_funded_bundle_has_only_swaps() {
        let builder = ArbitrageBundleBuilder::new(ArbitrageConfig::default());
        let opp = opportunity(&["uniswap_v2", "sushiswap"], dec!(10), dec!(1));
        let allocation = allocation_for(&opp, dec!(10));
        let plan = LoanPlan {
            token: opp.start_token.clone(),
            own_capital: dec!(10),
            loan: None,
        };
        let bundle = builder.build(&opp, &allocation, &plan, &quote(), 100, 0).unwrap();
        assert!(!bundle.has_flash_loan());
        assert!(bundle.transactions.iter().all(|tx| tx.kind == LegKind::Swap));
    }

    #[test]
    fn test_sandwich_risk_raises_priority_fee() {
        let builder = ArbitrageBundleBuilder::new(ArbitrageConfig::default());
        let (quiet_priority, quiet_max) = builder.fees(&quote(), false);
        assert_eq!(quiet_priority, 2_000_000_000);
        assert_eq!(quiet_max, 42_000_000_000);

        let (exposed_priority, _) = builder.fees(&quote(), true);
        assert_eq!(exposed_priority, 3_000_000_000);

        // Capped at max_priority_multiplier
        let congested = GasQuote {
            congestion: dec!(10),
            ..quote()
        };
        let (capped, _) = builder.fees(&congested, true);
        assert_eq!(capped, 10_000_000_000);
    }

    #[test]
    fn test_min_output_protects_each_leg() {
        let builder = ArbitrageBundleBuilder::new(ArbitrageConfig::default());
        let opp = opportunity(&["uniswap_v2", "sushiswap"], dec!(10), dec!(1));
        let allocation = allocation_for(&opp, dec!(10));
        let plan = LoanPlan {
            token: opp.start_token.clone(),
            own_capital: dec!(10),
            loan: None,
        };
        let bundle = builder.build(&opp, &allocation, &plan, &quote(), 100, 0).unwrap();

        let last = &opp.route.legs[1];
        let min_out = raw_amount(last.expected_out * dec!(0.995), last.token_out.decimals).unwrap();
        let mut encoded = [0u8; 32];
        min_out.to_big_endian(&mut encoded);
        assert!(bundle.transactions[1].data.ends_with(&hex::encode(encoded)));
    }

    #[test]
    fn test_invalid_executor_contract() {
        let mut config = ArbitrageConfig::default();
        config.execution.executor_contract = "not-an-address".to_string();
        let builder = ArbitrageBundleBuilder::new(config);
        let opp = opportunity(&["uniswap_v2", "sushiswap"], dec!(10), dec!(1));
        let allocation = allocation_for(&opp, dec!(10));
        let plan = borrowing(&opp);
        let err = builder.build(&opp, &allocation, &plan, &quote(), 100, 0).unwrap_err();
        assert!(err.is_cycle_fatal());
    }
}
