pub mod error;
pub mod market_data;
pub mod types;

#[cfg(feature = "estimation")]
pub mod risk_metrics;

#[cfg(feature = "optimization")]
pub mod optimization;

#[cfg(feature = "backtest")]
pub mod backtest;

#[cfg(all(feature = "estimation", feature = "optimization"))]
pub mod allocation;

pub use error::AllocationError;
pub use types::*;

/// Standard result type for all allocation operations
pub type AllocationResult<T> = Result<T, AllocationError>;
