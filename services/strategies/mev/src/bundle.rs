//! Bundle construction for atomic arbitrage execution
//!
//! A bundle is always ordered borrow → swap legs → repay. The builder
//! enforces that ordering so a repay leg can never land ahead of the swaps
//! that fund it.

use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::RangeInclusive;
use thiserror::Error;

/// Role of a transaction inside an arbitrage bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegKind {
    Borrow,
    Swap,
    Repay,
}

impl LegKind {
    fn stage(self) -> u8 {
        match self {
            LegKind::Borrow => 0,
            LegKind::Swap => 1,
            LegKind::Repay => 2,
        }
    }
}

/// Transaction within a bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleTransaction {
    pub kind: LegKind,
    /// Target contract, 0x-prefixed hex
    pub to: String,
    /// ABI-encoded calldata, 0x-prefixed hex
    pub data: String,
    /// Native value in wei, decimal string
    pub value: String,
    pub gas_limit: u64,
    pub max_fee_per_gas: u64,
    pub max_priority_fee_per_gas: u64,
    pub nonce: u64,
}

#[derive(Debug, Error, PartialEq)]
pub enum BundleError {
    #[error("Bundle has no swap legs")]
    NoSwapLegs,

    #[error("Leg {index} ({kind:?}) is out of borrow → swap → repay order")]
    LegOutOfOrder { index: usize, kind: LegKind },

    #[error("Invalid target block range {first}..={last}")]
    InvalidTargetRange { first: u64, last: u64 },
}

/// Bundle of transactions for atomic execution
#[derive(Debug, Clone, PartialEq)]
pub struct Bundle {
    pub transactions: Vec<BundleTransaction>,
    pub first_block: u64,
    pub last_block: u64,
    pub metadata: HashMap<String, String>,
}

/// Builder for constructing arbitrage bundles
pub struct BundleBuilder {
    bundle: Bundle,
    next_nonce: u64,
}

impl BundleBuilder {
    pub fn new(target_blocks: RangeInclusive<u64>) -> Self {
        Self {
            bundle: Bundle {
                transactions: Vec::new(),
                first_block: *target_blocks.start(),
                last_block: *target_blocks.end(),
                metadata: HashMap::new(),
            },
            next_nonce: 0,
        }
    }

    /// Nonce of the first transaction; later legs take consecutive nonces
    pub fn starting_nonce(mut self, nonce: u64) -> Self {
        self.next_nonce = nonce;
        self
    }

    pub fn add_transaction(mut self, mut tx: BundleTransaction) -> Self {
        tx.nonce = self.next_nonce;
        self.next_nonce += 1;
        self.bundle.transactions.push(tx);
        self
    }

    pub fn add_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.bundle.metadata.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Result<Bundle, BundleError> {
        let bundle = self.bundle;
        if bundle.first_block == 0 || bundle.last_block < bundle.first_block {
            return Err(BundleError::InvalidTargetRange {
                first: bundle.first_block,
                last: bundle.last_block,
            });
        }

        let mut stage = 0;
        for (index, tx) in bundle.transactions.iter().enumerate() {
            if tx.kind.stage() < stage {
                return Err(BundleError::LegOutOfOrder {
                    index,
                    kind: tx.kind,
                });
            }
            stage = tx.kind.stage();
        }

        if !bundle.transactions.iter().any(|tx| tx.kind == LegKind::Swap) {
            return Err(BundleError::NoSwapLegs);
        }

        Ok(bundle)
    }
}

impl Bundle {
    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn estimate_gas(&self) -> u64 {
        self.transactions.iter().map(|tx| tx.gas_limit).sum()
    }

    pub fn target_blocks(&self) -> RangeInclusive<u64> {
        self.first_block..=self.last_block
    }

    pub fn has_flash_loan(&self) -> bool {
        self.transactions.iter().any(|tx| tx.kind == LegKind::Borrow)
    }

    /// Content hash over the ordered calldata and fees, used to pair a
    /// submission with the simulation that cleared it
    pub fn fingerprint(&self) -> String {
        let mut preimage = Vec::new();
        for tx in &self.transactions {
            preimage.extend_from_slice(tx.to.as_bytes());
            preimage.extend_from_slice(tx.data.as_bytes());
            preimage.extend_from_slice(&tx.max_priority_fee_per_gas.to_be_bytes());
            preimage.extend_from_slice(&tx.nonce.to_be_bytes());
        }
        format!("0x{}", hex::encode(keccak256(preimage)))
    }

    /// Copy of the bundle with every priority fee raised by `percent`.
    /// The max fee rises by the same absolute amount so it stays above
    /// base + priority.
    pub fn with_bumped_priority_fee(&self, percent: u32) -> Bundle {
        let mut bumped = self.clone();
        for tx in &mut bumped.transactions {
            let increase = (tx.max_priority_fee_per_gas * u64::from(percent)).div_ceil(100).max(1);
            tx.max_priority_fee_per_gas += increase;
            tx.max_fee_per_gas += increase;
        }
        bumped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leg(kind: LegKind) -> BundleTransaction {
        BundleTransaction {
            kind,
            to: "0x0000000000000000000000000000000000000001".to_string(),
            data: "0xdeadbeef".to_string(),
            value: "0".to_string(),
            gas_limit: 100_000,
            max_fee_per_gas: 40_000_000_000,
            max_priority_fee_per_gas: 2_000_000_000,
            nonce: 0,
        }
    }

    #[test]
    fn test_builder_assigns_consecutive_nonces() {
        let bundle = BundleBuilder::new(101..=103)
            .starting_nonce(7)
            .add_transaction(leg(LegKind::Borrow))
            .add_transaction(leg(LegKind::Swap))
            .add_transaction(leg(LegKind::Repay))
            .build()
            .unwrap();

        let nonces: Vec<u64> = bundle.transactions.iter().map(|tx| tx.nonce).collect();
        assert_eq!(nonces, vec![7, 8, 9]);
        assert_eq!(bundle.target_blocks(), 101..=103);
        assert_eq!(bundle.estimate_gas(), 300_000);
        assert!(bundle.has_flash_loan());
    }

    #[test]
    fn test_repay_before_swap_rejected() {
        let result = BundleBuilder::new(10..=12)
            .add_transaction(leg(LegKind::Borrow))
            .add_transaction(leg(LegKind::Repay))
            .add_transaction(leg(LegKind::Swap))
            .build();

        assert_eq!(
            result,
            Err(BundleError::LegOutOfOrder {
                index: 2,
                kind: LegKind::Swap
            })
        );
    }

    #[test]
    fn test_bundle_without_swaps_rejected() {
        let result = BundleBuilder::new(10..=12)
            .add_transaction(leg(LegKind::Borrow))
            .build();
        assert_eq!(result, Err(BundleError::NoSwapLegs));
    }

    #[test]
    fn test_priority_fee_bump() {
        let bundle = BundleBuilder::new(10..=12)
            .add_transaction(leg(LegKind::Swap))
            .build()
            .unwrap();
        let bumped = bundle.with_bumped_priority_fee(10);

        assert_eq!(bumped.transactions[0].max_priority_fee_per_gas, 2_200_000_000);
        assert_eq!(bumped.transactions[0].max_fee_per_gas, 40_200_000_000);
        assert_ne!(bundle.fingerprint(), bumped.fingerprint());
    }
}
