//! Shared Strategy Framework
//!
//! Common utilities and traits for trading strategy implementations:
//! config file loading, the start/stop lifecycle trait, and lock-free
//! strategy counters.

pub mod config;
pub mod metrics;
pub mod traits;

pub use config::*;
pub use metrics::*;
pub use traits::*;
