//! MEV protection mechanisms
//!
//! Two levers: pay a higher priority fee when a route is exposed to
//! sandwiching, and encode a minimum output on every swap leg so a
//! manipulated pool reverts the bundle instead of filling it.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// MEV protection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MevProtectionConfig {
    /// Tolerance applied to each leg's expected output
    pub max_slippage_bps: u32,
    /// Priority fee multiplier for routes flagged as sandwich-exposed
    pub sandwich_priority_multiplier: Decimal,
    /// Upper bound on any multiplier, congestion included
    pub max_priority_multiplier: Decimal,
}

impl Default for MevProtectionConfig {
    fn default() -> Self {
        Self {
            max_slippage_bps: 50, // 0.5%
            sandwich_priority_multiplier: dec!(1.5),
            max_priority_multiplier: dec!(5),
        }
    }
}

/// MEV protection mechanisms
#[derive(Debug, Clone)]
pub struct MevProtection {
    config: MevProtectionConfig,
}

impl MevProtection {
    pub fn new(config: MevProtectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MevProtectionConfig {
        &self.config
    }

    /// Multiplier on the priority fee for the given congestion level
    /// (1.0 = quiet network) and sandwich exposure
    pub fn priority_multiplier(&self, congestion: Decimal, sandwich_risk: bool) -> Decimal {
        let congestion = congestion.max(Decimal::ONE);
        let mev = if sandwich_risk {
            self.config.sandwich_priority_multiplier
        } else {
            Decimal::ONE
        };
        (congestion * mev).min(self.config.max_priority_multiplier)
    }

    /// Calculate minimum output with MEV protection
    pub fn calculate_protected_min_output(&self, expected_output: Decimal) -> Decimal {
        let protection_buffer = Decimal::from(self.config.max_slippage_bps) / Decimal::from(10000);
        expected_output * (Decimal::ONE - protection_buffer)
    }

    /// Get protection statistics
    pub fn get_protection_stats(&self) -> MevProtectionStats {
        MevProtectionStats {
            max_slippage_bps: self.config.max_slippage_bps,
            sandwich_priority_multiplier: self.config.sandwich_priority_multiplier,
        }
    }
}

/// Statistics for MEV protection monitoring
#[derive(Debug, Clone, Serialize)]
pub struct MevProtectionStats {
    pub max_slippage_bps: u32,
    pub sandwich_priority_multiplier: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandwich_risk_raises_multiplier() {
        let protection = MevProtection::new(MevProtectionConfig::default());
        let quiet = protection.priority_multiplier(dec!(1), false);
        let exposed = protection.priority_multiplier(dec!(1), true);
        assert_eq!(quiet, dec!(1));
        assert_eq!(exposed, dec!(1.5));
    }

    #[test]
    fn test_multiplier_is_capped() {
        let protection = MevProtection::new(MevProtectionConfig::default());
        assert_eq!(protection.priority_multiplier(dec!(10), true), dec!(5));
        // Congestion below 1 never discounts the fee
        assert_eq!(protection.priority_multiplier(dec!(0.2), false), dec!(1));
    }

    #[test]
    fn test_protected_min_output() {
        let protection = MevProtection::new(MevProtectionConfig::default());
        assert_eq!(protection.calculate_protected_min_output(dec!(1000)), dec!(995));
    }
}
