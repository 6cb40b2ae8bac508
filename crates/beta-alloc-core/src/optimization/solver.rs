use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::AllocationError;
use crate::AllocationResult;

use super::linalg::{dot, mat_vec_multiply, quadratic_form};

// ---------------------------------------------------------------------------
// Problem description
// ---------------------------------------------------------------------------

/// A twice-differentiable objective to minimise.
pub trait Objective {
    fn value(&self, x: &[Decimal]) -> Decimal;
    fn gradient(&self, x: &[Decimal]) -> Vec<Decimal>;
    fn hessian(&self, x: &[Decimal]) -> Vec<Vec<Decimal>>;
}

/// An equality constraint `c(x) = 0`.
pub trait EqualityConstraint {
    fn name(&self) -> &str;
    fn value(&self, x: &[Decimal]) -> Decimal;
    fn gradient(&self, x: &[Decimal]) -> Vec<Decimal>;
}

/// `x' * M * x` for a symmetric matrix `M` (portfolio variance when `M` is
/// a covariance matrix).
#[derive(Debug, Clone)]
pub struct QuadraticForm {
    pub matrix: Vec<Vec<Decimal>>,
}

impl Objective for QuadraticForm {
    fn value(&self, x: &[Decimal]) -> Decimal {
        quadratic_form(&self.matrix, x)
    }

    fn gradient(&self, x: &[Decimal]) -> Vec<Decimal> {
        mat_vec_multiply(&self.matrix, x)
            .into_iter()
            .map(|v| dec!(2) * v)
            .collect()
    }

    fn hessian(&self, _x: &[Decimal]) -> Vec<Vec<Decimal>> {
        self.matrix
            .iter()
            .map(|row| row.iter().map(|v| dec!(2) * *v).collect())
            .collect()
    }
}

/// `coefficients · x = rhs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearConstraint {
    pub name: String,
    pub coefficients: Vec<Decimal>,
    pub rhs: Decimal,
}

impl LinearConstraint {
    pub fn new(name: impl Into<String>, coefficients: Vec<Decimal>, rhs: Decimal) -> Self {
        Self {
            name: name.into(),
            coefficients,
            rhs,
        }
    }
}

impl EqualityConstraint for LinearConstraint {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self, x: &[Decimal]) -> Decimal {
        dot(&self.coefficients, x) - self.rhs
    }

    fn gradient(&self, _x: &[Decimal]) -> Vec<Decimal> {
        self.coefficients.clone()
    }
}

/// Box constraint on one variable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    pub lower: Decimal,
    pub upper: Decimal,
}

impl Bound {
    pub fn new(lower: Decimal, upper: Decimal) -> Self {
        Self { lower, upper }
    }

    /// `[0, 1]`: no short selling, no leverage.
    pub fn unit() -> Self {
        Self::new(Decimal::ZERO, Decimal::ONE)
    }

    pub fn clamp(&self, v: Decimal) -> Decimal {
        v.max(self.lower).min(self.upper)
    }
}

// ---------------------------------------------------------------------------
// Options and outcome
// ---------------------------------------------------------------------------

/// Termination and conditioning settings shared by every solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    /// Outer (SQP) iteration budget, also used for the feasibility phase.
    pub max_iterations: u32,
    /// Iteration budget of each quadratic subproblem.
    pub max_subproblem_iterations: u32,
    /// Step-size / multiplier tolerance.
    pub tolerance: Decimal,
    /// Largest constraint violation accepted as feasible.
    pub feasibility_tolerance: Decimal,
    /// Added to the Hessian diagonal so semidefinite problems stay solvable.
    pub hessian_ridge: Decimal,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            max_subproblem_iterations: 500,
            tolerance: dec!(0.0000000001),
            feasibility_tolerance: dec!(0.00000001),
            hessian_ridge: dec!(0.000000000001),
        }
    }
}

impl SolverOptions {
    pub fn validate(&self) -> AllocationResult<()> {
        if self.max_iterations == 0 || self.max_subproblem_iterations == 0 {
            return Err(AllocationError::InvalidInput {
                field: "solver".into(),
                reason: "Iteration budgets must be positive".into(),
            });
        }
        if self.tolerance <= Decimal::ZERO || self.feasibility_tolerance <= Decimal::ZERO {
            return Err(AllocationError::InvalidInput {
                field: "solver".into(),
                reason: "Tolerances must be positive".into(),
            });
        }
        if self.hessian_ridge < Decimal::ZERO {
            return Err(AllocationError::InvalidInput {
                field: "solver.hessian_ridge".into(),
                reason: "Ridge must be non-negative".into(),
            });
        }
        Ok(())
    }
}

/// Successful solver result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverOutcome {
    pub x: Vec<Decimal>,
    pub objective: Decimal,
    /// Outer iterations used by the optimality phase.
    pub iterations: u32,
    /// Max of final step length and constraint violation.
    pub kkt_residual: Decimal,
    pub constraint_violation: Decimal,
    pub message: String,
}

/// Any algorithm that minimises a smooth objective under equality
/// constraints and box bounds.
///
/// Implementations return `Infeasible` when no point satisfies the
/// constraints within the bounds and `NonConvergent` when the iteration
/// budget runs out; they never return a point that violates the bounds.
pub trait ConstrainedSolver {
    fn solve(
        &self,
        objective: &dyn Objective,
        constraints: &[Box<dyn EqualityConstraint>],
        bounds: &[Bound],
        initial: &[Decimal],
    ) -> AllocationResult<SolverOutcome>;
}
