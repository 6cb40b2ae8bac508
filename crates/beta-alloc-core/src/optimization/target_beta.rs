use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::error::AllocationError;
use crate::risk_metrics::beta::BetaVector;
use crate::risk_metrics::covariance::CovarianceMatrix;
use crate::types::{with_metadata, AssetId, ComputationOutput};
use crate::AllocationResult;

use super::linalg::{dot, quadratic_form};
use super::solver::{
    Bound, ConstrainedSolver, EqualityConstraint, LinearConstraint, QuadraticForm, SolverOptions,
    SolverOutcome,
};
use super::sqp::SqpSolver;

/// Tolerance for the budget and beta invariants on the unrounded weights.
const INVARIANT_TOLERANCE: Decimal = dec!(0.0001);

/// Single-asset weight above which a concentration warning is raised.
const CONCENTRATION_LIMIT: Decimal = dec!(0.5);

const DEFAULT_DISPLAY_PRECISION: u32 = 2;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Input to target-beta minimum-variance optimization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetBetaInput {
    /// Asset identifiers.
    pub asset_names: Vec<AssetId>,
    /// N x N covariance matrix.
    pub covariance_matrix: Vec<Vec<Decimal>>,
    /// Benchmark beta per asset.
    pub betas: Vec<Decimal>,
    /// Required portfolio beta.
    pub target_beta: Decimal,
    /// Solver settings (defaults when absent).
    #[serde(default)]
    pub solver: Option<SolverOptions>,
    /// Decimal places of the reported weights (default 2).
    #[serde(default)]
    pub display_precision: Option<u32>,
}

/// Weight of one asset, rounded for display and unrounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetWeight {
    pub name: AssetId,
    pub weight: Decimal,
    pub raw_weight: Decimal,
}

/// Drift introduced by display rounding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundingError {
    /// Sum of rounded weights minus 1.
    pub sum: Decimal,
    /// Beta of the rounded weights minus the target.
    pub beta: Decimal,
}

/// Output of target-beta optimization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetBetaOutput {
    pub weights: Vec<AssetWeight>,
    /// Unrounded optimizer solution, in asset order.
    pub raw_weights: Vec<Decimal>,
    pub portfolio_variance: Decimal,
    pub portfolio_volatility: Decimal,
    pub achieved_beta: Decimal,
    pub weight_sum: Decimal,
    pub iterations: u32,
    pub kkt_residual: Decimal,
    pub rounding_error: RoundingError,
}

impl TargetBetaOutput {
    /// Rounded weights keyed by asset.
    pub fn weight_map(&self) -> std::collections::BTreeMap<AssetId, Decimal> {
        self.weights
            .iter()
            .map(|w| (w.name.clone(), w.weight))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Minimum-variance long-only portfolio whose beta equals the target.
///
/// Minimises `w' * Sigma * w` subject to `sum(w) = 1`, `beta' * w = target`
/// and `0 <= w_i <= 1`, starting from equal weights. Weights are rounded to
/// `display_precision` places only in the reported `weights`; every check
/// runs against the unrounded vector.
pub fn optimize_target_beta(
    input: &TargetBetaInput,
) -> AllocationResult<ComputationOutput<TargetBetaOutput>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let n = input.asset_names.len();
    validate_input(input, n)?;

    let options = input.solver.clone().unwrap_or_default();
    let precision = input.display_precision.unwrap_or(DEFAULT_DISPLAY_PRECISION);

    let outcome = solve_target_beta(
        &input.covariance_matrix,
        &input.betas,
        input.target_beta,
        &options,
    )?;
    let raw = outcome.x.clone();
    check_invariants(&raw, &input.betas, input.target_beta)?;

    // --- Portfolio statistics (unrounded) ---
    let variance = quadratic_form(&input.covariance_matrix, &raw).max(Decimal::ZERO);
    let volatility = variance.sqrt().unwrap_or(Decimal::ZERO);
    let achieved_beta = dot(&input.betas, &raw);
    let weight_sum: Decimal = raw.iter().sum();

    // --- Display rounding ---
    let weights: Vec<AssetWeight> = input
        .asset_names
        .iter()
        .zip(raw.iter())
        .map(|(name, w)| AssetWeight {
            name: name.clone(),
            weight: w.round_dp(precision),
            raw_weight: *w,
        })
        .collect();
    let rounded: Vec<Decimal> = weights.iter().map(|w| w.weight).collect();
    let rounding_error = RoundingError {
        sum: rounded.iter().copied().sum::<Decimal>() - Decimal::ONE,
        beta: dot(&input.betas, &rounded) - input.target_beta,
    };

    for w in &weights {
        if w.raw_weight > CONCENTRATION_LIMIT {
            warnings.push(format!(
                "Concentrated allocation: {} holds {:.2}% of the portfolio",
                w.name,
                w.raw_weight * dec!(100)
            ));
        }
    }
    if rounding_error.sum.abs() > INVARIANT_TOLERANCE {
        warnings.push(format!(
            "Rounded weights sum to {} (display precision {} places)",
            Decimal::ONE + rounding_error.sum,
            precision
        ));
    }

    let output = TargetBetaOutput {
        weights,
        raw_weights: raw,
        portfolio_variance: variance,
        portfolio_volatility: volatility,
        achieved_beta,
        weight_sum,
        iterations: outcome.iterations,
        kkt_residual: outcome.kkt_residual,
        rounding_error,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Target-Beta Minimum Variance (SQP, active-set QP subproblems)",
        &serde_json::json!({
            "n_assets": n,
            "target_beta": input.target_beta.to_string(),
            "long_only": true,
            "fully_invested": true,
            "display_precision": precision,
            "max_iterations": options.max_iterations,
            "tolerance": options.tolerance.to_string(),
        }),
        warnings,
        elapsed,
        output,
    ))
}

/// Typed form over estimator outputs.
///
/// The covariance and beta vectors must cover the same assets in the same
/// order.
pub fn optimize(
    covariance: &CovarianceMatrix,
    betas: &BetaVector,
    target_beta: Decimal,
    options: Option<SolverOptions>,
) -> AllocationResult<ComputationOutput<TargetBetaOutput>> {
    if covariance.assets != betas.assets {
        return Err(AllocationError::InvalidInput {
            field: "betas".into(),
            reason: "Beta vector and covariance matrix cover different assets".into(),
        });
    }
    optimize_target_beta(&TargetBetaInput {
        asset_names: covariance.assets.clone(),
        covariance_matrix: covariance.values.clone(),
        betas: betas.betas.clone(),
        target_beta,
        solver: options,
        display_precision: None,
    })
}

// ---------------------------------------------------------------------------
// Core routine
// ---------------------------------------------------------------------------

fn solve_target_beta(
    sigma: &[Vec<Decimal>],
    betas: &[Decimal],
    target_beta: Decimal,
    options: &SolverOptions,
) -> AllocationResult<SolverOutcome> {
    let n = betas.len();
    let objective = QuadraticForm {
        matrix: sigma.to_vec(),
    };
    let constraints: Vec<Box<dyn EqualityConstraint>> = vec![
        Box::new(LinearConstraint::new(
            "budget",
            vec![Decimal::ONE; n],
            Decimal::ONE,
        )),
        Box::new(LinearConstraint::new("beta", betas.to_vec(), target_beta)),
    ];
    let bounds = vec![Bound::unit(); n];
    let initial = vec![Decimal::ONE / Decimal::from(n as u64); n];

    let solver = SqpSolver::new(options.clone());
    solver
        .solve(&objective, &constraints, &bounds, &initial)
        .map_err(|e| match e {
            AllocationError::Infeasible(msg) => {
                let (lo, hi) = beta_range(betas);
                AllocationError::Infeasible(format!(
                    "target beta {} cannot be reached by a long-only, fully invested portfolio \
                     (achievable range [{}, {}]): {}",
                    target_beta, lo, hi, msg
                ))
            }
            AllocationError::NonConvergent {
                iterations,
                last_delta,
                ..
            } => AllocationError::NonConvergent {
                function: format!("target-beta SQP (target {})", target_beta),
                iterations,
                last_delta,
            },
            other => other,
        })
}

fn beta_range(betas: &[Decimal]) -> (Decimal, Decimal) {
    betas
        .iter()
        .fold((Decimal::MAX, Decimal::MIN), |(lo, hi), b| (lo.min(*b), hi.max(*b)))
}

fn check_invariants(
    weights: &[Decimal],
    betas: &[Decimal],
    target_beta: Decimal,
) -> AllocationResult<()> {
    let sum: Decimal = weights.iter().sum();
    if (sum - Decimal::ONE).abs() >= INVARIANT_TOLERANCE {
        return Err(AllocationError::NumericalDegeneracy(format!(
            "Solver returned weights summing to {}",
            sum
        )));
    }
    let beta = dot(betas, weights);
    if (beta - target_beta).abs() >= INVARIANT_TOLERANCE {
        return Err(AllocationError::NumericalDegeneracy(format!(
            "Solver returned portfolio beta {} for target {}",
            beta, target_beta
        )));
    }
    if let Some((i, w)) = weights
        .iter()
        .enumerate()
        .find(|(_, w)| **w < Decimal::ZERO || **w > Decimal::ONE)
    {
        return Err(AllocationError::NumericalDegeneracy(format!(
            "Weight {} of asset {} outside [0, 1]",
            w, i
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate_input(input: &TargetBetaInput, n: usize) -> AllocationResult<()> {
    if n == 0 {
        return Err(AllocationError::InsufficientData(
            "At least one asset required".into(),
        ));
    }

    if input.betas.len() != n {
        return Err(AllocationError::InvalidInput {
            field: "betas".into(),
            reason: format!("Expected {} betas but got {}", n, input.betas.len()),
        });
    }

    validate_covariance_matrix(&input.covariance_matrix, n)?;

    if let Some(ref opts) = input.solver {
        opts.validate()?;
    }
    Ok(())
}

fn validate_covariance_matrix(cov: &[Vec<Decimal>], n: usize) -> AllocationResult<()> {
    if cov.len() != n {
        return Err(AllocationError::InvalidInput {
            field: "covariance_matrix".into(),
            reason: format!("Expected {}x{} matrix but got {} rows", n, n, cov.len()),
        });
    }
    for (i, row) in cov.iter().enumerate() {
        if row.len() != n {
            return Err(AllocationError::InvalidInput {
                field: "covariance_matrix".into(),
                reason: format!("Row {} has {} columns, expected {}", i, row.len(), n),
            });
        }
    }
    let tolerance = dec!(0.0000001);
    for i in 0..n {
        for j in (i + 1)..n {
            if (cov[i][j] - cov[j][i]).abs() > tolerance {
                return Err(AllocationError::InvalidInput {
                    field: "covariance_matrix".into(),
                    reason: format!(
                        "Not symmetric: [{},{}]={} != [{},{}]={}",
                        i, j, cov[i][j], j, i, cov[j][i]
                    ),
                });
            }
        }
    }
    for (i, row) in cov.iter().enumerate() {
        if row[i] < Decimal::ZERO {
            return Err(AllocationError::InvalidInput {
                field: "covariance_matrix".into(),
                reason: format!("Negative variance on diagonal at [{},{}]", i, i),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tol() -> Decimal {
        dec!(0.000001)
    }

    fn three_asset_input(target: Decimal) -> TargetBetaInput {
        TargetBetaInput {
            asset_names: vec!["LOW".into(), "MID".into(), "HIGH".into()],
            covariance_matrix: vec![
                vec![dec!(0.01), dec!(0), dec!(0)],
                vec![dec!(0), dec!(0.04), dec!(0)],
                vec![dec!(0), dec!(0), dec!(0.09)],
            ],
            betas: vec![dec!(0.5), dec!(1.0), dec!(1.5)],
            target_beta: target,
            solver: None,
            display_precision: None,
        }
    }

    // ------------------------------------------------------------------
    // 1. Interior solution
    // ------------------------------------------------------------------
    #[test]
    fn test_interior_solution() {
        // Stationarity 2*var_i*w_i = lambda + mu*beta_i gives 4/13, 5/13, 4/13.
        let out = optimize_target_beta(&three_asset_input(dec!(1.0))).unwrap();
        let r = &out.result;
        let expected = [dec!(4) / dec!(13), dec!(5) / dec!(13), dec!(4) / dec!(13)];
        for (w, e) in r.raw_weights.iter().zip(expected.iter()) {
            assert!((*w - *e).abs() < tol(), "weight {} expected {}", w, e);
        }
        assert_eq!(r.weights[0].weight, dec!(0.31));
        assert_eq!(r.weights[1].weight, dec!(0.38));
        assert_eq!(r.weights[2].weight, dec!(0.31));
        // Variance = 2.6 / 169 = 1/65
        assert!((r.portfolio_variance - dec!(1) / dec!(65)).abs() < tol());
        assert!((r.achieved_beta - dec!(1.0)).abs() < tol());
        assert!((r.weight_sum - Decimal::ONE).abs() < tol());
    }

    // ------------------------------------------------------------------
    // 2. Lower bound active
    // ------------------------------------------------------------------
    #[test]
    fn test_active_lower_bound() {
        let out = optimize_target_beta(&three_asset_input(dec!(0.52))).unwrap();
        let r = &out.result;
        assert!((r.raw_weights[0] - dec!(0.96)).abs() < tol(), "{:?}", r.raw_weights);
        assert!((r.raw_weights[1] - dec!(0.04)).abs() < tol(), "{:?}", r.raw_weights);
        assert!(r.raw_weights[2].abs() < tol(), "{:?}", r.raw_weights);
        assert!(r.raw_weights.iter().all(|w| *w >= Decimal::ZERO && *w <= Decimal::ONE));
        assert!(out.warnings.iter().any(|w| w.contains("LOW")));
    }

    // ------------------------------------------------------------------
    // 3. Equal variances, betas 1 and 2, target 1.5
    // ------------------------------------------------------------------
    #[test]
    fn test_two_asset_midpoint() {
        let input = TargetBetaInput {
            asset_names: vec!["A".into(), "B".into()],
            covariance_matrix: vec![vec![dec!(0.04), dec!(0)], vec![dec!(0), dec!(0.04)]],
            betas: vec![dec!(1.0), dec!(2.0)],
            target_beta: dec!(1.5),
            solver: None,
            display_precision: None,
        };
        let out = optimize_target_beta(&input).unwrap();
        assert_eq!(out.result.weights[0].weight, dec!(0.50));
        assert_eq!(out.result.weights[1].weight, dec!(0.50));
    }

    // ------------------------------------------------------------------
    // 4. Infeasible target
    // ------------------------------------------------------------------
    #[test]
    fn test_target_outside_beta_range() {
        let input = TargetBetaInput {
            asset_names: vec!["A".into(), "B".into()],
            covariance_matrix: vec![vec![dec!(0.04), dec!(0)], vec![dec!(0), dec!(0.02)]],
            betas: vec![dec!(0.5), dec!(0.8)],
            target_beta: dec!(5.0),
            solver: None,
            display_precision: None,
        };
        let err = optimize_target_beta(&input).unwrap_err();
        assert_eq!(err.kind(), "InfeasibleError");
        let msg = err.to_string();
        assert!(msg.contains("target beta 5.0"), "{}", msg);
        assert!(msg.contains("[0.5, 0.8]"), "{}", msg);
    }

    // ------------------------------------------------------------------
    // 5. Idempotence
    // ------------------------------------------------------------------
    #[test]
    fn test_deterministic() {
        let a = optimize_target_beta(&three_asset_input(dec!(0.8))).unwrap();
        let b = optimize_target_beta(&three_asset_input(dec!(0.8))).unwrap();
        assert_eq!(a.result.raw_weights, b.result.raw_weights);
        assert_eq!(a.result.iterations, b.result.iterations);
    }

    // ------------------------------------------------------------------
    // 6. Single asset
    // ------------------------------------------------------------------
    #[test]
    fn test_single_asset_matching_beta() {
        let input = TargetBetaInput {
            asset_names: vec!["ONLY".into()],
            covariance_matrix: vec![vec![dec!(0.03)]],
            betas: vec![dec!(1.2)],
            target_beta: dec!(1.2),
            solver: None,
            display_precision: None,
        };
        let out = optimize_target_beta(&input).unwrap();
        assert_eq!(out.result.weights[0].weight, dec!(1.00));
    }

    #[test]
    fn test_equal_betas_dependent_constraints() {
        let input = TargetBetaInput {
            asset_names: vec!["A".into(), "B".into()],
            covariance_matrix: vec![vec![dec!(0.04), dec!(0)], vec![dec!(0), dec!(0.01)]],
            betas: vec![dec!(1.0), dec!(1.0)],
            target_beta: dec!(1.0),
            solver: None,
            display_precision: None,
        };
        let out = optimize_target_beta(&input).unwrap();
        assert!((out.result.raw_weights[0] - dec!(0.2)).abs() < tol());
        assert!((out.result.raw_weights[1] - dec!(0.8)).abs() < tol());
    }

    // ------------------------------------------------------------------
    // 7. Display precision and rounding report
    // ------------------------------------------------------------------
    #[test]
    fn test_display_precision() {
        let mut input = three_asset_input(dec!(1.0));
        input.display_precision = Some(4);
        let out = optimize_target_beta(&input).unwrap();
        assert_eq!(out.result.weights[0].weight, dec!(0.3077));
        assert_eq!(out.result.weights[1].weight, dec!(0.3846));
        // 0.3077 + 0.3846 + 0.3077 = 1.0000
        assert_eq!(out.result.rounding_error.sum, dec!(0));
    }

    // ------------------------------------------------------------------
    // 8. Validation
    // ------------------------------------------------------------------
    #[test]
    fn test_asymmetric_covariance_rejected() {
        let mut input = three_asset_input(dec!(1.0));
        input.covariance_matrix[0][1] = dec!(0.002);
        let err = optimize_target_beta(&input).unwrap_err();
        assert_eq!(err.kind(), "InvalidInputError");
        assert!(err.to_string().contains("Not symmetric"));
    }

    #[test]
    fn test_negative_variance_rejected() {
        let mut input = three_asset_input(dec!(1.0));
        input.covariance_matrix[1][1] = dec!(-0.04);
        assert!(optimize_target_beta(&input).is_err());
    }

    #[test]
    fn test_beta_length_mismatch() {
        let mut input = three_asset_input(dec!(1.0));
        input.betas.pop();
        let err = optimize_target_beta(&input).unwrap_err();
        assert!(err.to_string().contains("betas"));
    }

    #[test]
    fn test_empty_universe() {
        let input = TargetBetaInput {
            asset_names: vec![],
            covariance_matrix: vec![],
            betas: vec![],
            target_beta: dec!(1),
            solver: None,
            display_precision: None,
        };
        assert_eq!(
            optimize_target_beta(&input).unwrap_err().kind(),
            "InsufficientDataError"
        );
    }

    // ------------------------------------------------------------------
    // 9. Typed form
    // ------------------------------------------------------------------
    #[test]
    fn test_typed_optimize_checks_asset_order() {
        let cov = CovarianceMatrix {
            assets: vec!["A".into(), "B".into()],
            values: vec![vec![dec!(0.04), dec!(0)], vec![dec!(0), dec!(0.04)]],
        };
        let betas = BetaVector {
            assets: vec!["B".into(), "A".into()],
            betas: vec![dec!(1), dec!(2)],
        };
        assert!(optimize(&cov, &betas, dec!(1.5), None).is_err());

        let betas = BetaVector {
            assets: vec!["A".into(), "B".into()],
            betas: vec![dec!(1), dec!(2)],
        };
        let out = optimize(&cov, &betas, dec!(1.5), None).unwrap();
        let map = out.result.weight_map();
        assert_eq!(map.get("A"), Some(&dec!(0.50)));
    }

    // ------------------------------------------------------------------
    // 10. Tied betas at the edge of the feasible range
    // ------------------------------------------------------------------
    fn tied_input(betas: Vec<Decimal>, target: Decimal) -> TargetBetaInput {
        TargetBetaInput {
            asset_names: vec!["A".into(), "B".into(), "C".into()],
            covariance_matrix: vec![
                vec![dec!(0.04), dec!(0), dec!(0)],
                vec![dec!(0), dec!(0.01), dec!(0)],
                vec![dec!(0), dec!(0), dec!(0.09)],
            ],
            betas,
            target_beta: target,
            solver: None,
            display_precision: None,
        }
    }

    #[test]
    fn test_tied_minimum_beta_target() {
        // Only A and B can be held; 0.04*w_a = 0.01*w_b gives 0.2 / 0.8.
        let input = tied_input(vec![dec!(0.5), dec!(0.5), dec!(1.0)], dec!(0.5));
        let out = optimize_target_beta(&input).unwrap();
        let expected = [dec!(0.2), dec!(0.8), dec!(0)];
        for (w, e) in out.result.raw_weights.iter().zip(expected.iter()) {
            assert!((*w - *e).abs() < tol(), "weight {} expected {}", w, e);
        }
        assert!((out.result.achieved_beta - dec!(0.5)).abs() < tol());
    }

    #[test]
    fn test_tied_maximum_beta_target() {
        // Only B and C can be held; 0.01*w_b = 0.09*w_c gives 0.9 / 0.1.
        let input = tied_input(vec![dec!(1.0), dec!(1.5), dec!(1.5)], dec!(1.5));
        let out = optimize_target_beta(&input).unwrap();
        let expected = [dec!(0), dec!(0.9), dec!(0.1)];
        for (w, e) in out.result.raw_weights.iter().zip(expected.iter()) {
            assert!((*w - *e).abs() < tol(), "weight {} expected {}", w, e);
        }
        assert!((out.result.weight_sum - Decimal::ONE).abs() < tol());
    }
}
