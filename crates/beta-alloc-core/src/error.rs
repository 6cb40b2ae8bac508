use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("Invalid input: {field} — {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Infeasible: {0}")]
    Infeasible(String),

    #[error("Convergence failure: {function} did not converge after {iterations} iterations (delta: {last_delta})")]
    NonConvergent {
        function: String,
        iterations: u32,
        last_delta: Decimal,
    },

    #[error("Numerical degeneracy: {0}")]
    NumericalDegeneracy(String),

    #[error("Date error: {0}")]
    DateError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl AllocationError {
    /// Stable tag for the failure class, independent of the message text.
    pub fn kind(&self) -> &'static str {
        match self {
            AllocationError::InvalidInput { .. } => "InvalidInputError",
            AllocationError::InsufficientData(_) => "InsufficientDataError",
            AllocationError::Infeasible(_) => "InfeasibleError",
            AllocationError::NonConvergent { .. } => "NonconvergentError",
            AllocationError::NumericalDegeneracy(_) => "NumericalDegeneracyError",
            AllocationError::DateError(_) => "DateError",
            AllocationError::SerializationError(_) => "SerializationError",
        }
    }
}

impl From<serde_json::Error> for AllocationError {
    fn from(e: serde_json::Error) -> Self {
        AllocationError::SerializationError(e.to_string())
    }
}
