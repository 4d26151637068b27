//! # Torq MEV Library - Private Bundle Execution
//!
//! ## Purpose
//!
//! MEV-protected execution plumbing for atomic arbitrage: bundle construction
//! with enforced borrow → swap → repay ordering, a private relay seam with a
//! Flashbots-style JSON-RPC client, and front-running protection (sandwich-aware
//! priority fees, protected minimum outputs). Nothing here ever touches the public
//! mempool.
//!
//! ## Integration Points
//!
//! - **Input Sources**: risk-approved, capital-allocated arbitrage routes
//! - **Output Destinations**: private relay simulation and submission endpoints
//! - **Bundle Construction**: ordered legs, consecutive nonces, target block ranges
//! - **Relay Seam**: `PrivateRelay` trait, swapped for scripted relays in tests
//! - **Protection Services**: priority multipliers and minimum-output guards
//!
//! ## Architecture Role
//!
//! ```text
//! Allocated Route → [MEV Protection] → [Bundle Construction] → [PrivateRelay]
//!        ↓                ↓                     ↓                    ↓
//! Flash loan plan    Priority fee          Borrow → Swaps → Repay  simulate_bundle
//! Swap legs          Min output guard      Target blocks           submit_bundle
//!                                                                  get_bundle_status
//! ```

pub mod bundle;
pub mod flashbots;
pub mod protection;

pub use bundle::{Bundle, BundleBuilder, BundleError, BundleTransaction, LegKind};
pub use flashbots::{
    BundleId, BundleStatus, FlashbotsClient, FlashbotsConfig, PrivateRelay, RelayError,
    SimulationOutcome,
};
pub use protection::{MevProtection, MevProtectionConfig, MevProtectionStats};
