//! Strategy traits and interfaces

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

/// Core strategy trait that all trading strategies must implement
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Strategy name for identification
    fn name(&self) -> &'static str;

    /// Start the strategy
    async fn start(&mut self) -> Result<()>;

    /// Stop the strategy, waiting for in-flight work
    async fn stop(&mut self) -> Result<()>;

    /// Get current strategy metrics
    fn metrics(&self) -> StrategyMetrics;
}

/// Basic strategy metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StrategyMetrics {
    pub cycles_completed: u64,
    pub opportunities_found: u64,
    pub trades_executed: u64,
    pub errors: u64,
    pub uptime_secs: u64,
}

/// Strategy configuration trait
pub trait StrategyConfig: Send + Sync + Clone {
    /// Validate configuration
    fn validate(&self) -> Result<()>;
}
