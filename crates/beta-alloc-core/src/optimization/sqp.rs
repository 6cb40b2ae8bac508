use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::error::AllocationError;
use crate::AllocationResult;

use super::active_set::{solve_qp, QpProblem};
use super::linalg::{independent_rows, mat_t_vec_multiply, norm_inf};
use super::solver::{Bound, ConstrainedSolver, EqualityConstraint, Objective, SolverOptions, SolverOutcome};

/// Sequential quadratic programming with an active-set subproblem solver.
///
/// Runs in two phases. Phase 1 minimises the squared linearised constraint
/// residual inside the bounds; if the best residual is still above the
/// feasibility tolerance the problem is infeasible. Phase 2 iterates
/// `x += d`, where `d` solves the quadratic model of the objective subject to
/// the linearised constraints and the shifted bounds, until the step and the
/// constraint violation are both within tolerance.
///
/// The model Hessian is the objective Hessian plus a small ridge; constraint
/// curvature is ignored, which is exact for linear constraints.
#[derive(Debug, Clone, Default)]
pub struct SqpSolver {
    pub options: SolverOptions,
}

impl SqpSolver {
    pub fn new(options: SolverOptions) -> Self {
        Self { options }
    }

    fn restore_feasibility(
        &self,
        constraints: &[Box<dyn EqualityConstraint>],
        lower: &[Decimal],
        upper: &[Decimal],
        x: &mut [Decimal],
    ) -> AllocationResult<Decimal> {
        let opts = &self.options;
        let n = x.len();
        let mut violation = max_violation(constraints, x);

        for iteration in 1..=opts.max_iterations {
            if violation <= opts.feasibility_tolerance {
                break;
            }
            let (jac, resid) = linearize(constraints, x);

            // min |J d + c|^2  =>  H = 2 J'J, g = 2 J'c
            let mut hessian = vec![vec![Decimal::ZERO; n]; n];
            for row in &jac {
                for i in 0..n {
                    if row[i].is_zero() {
                        continue;
                    }
                    for j in 0..n {
                        hessian[i][j] += dec!(2) * row[i] * row[j];
                    }
                }
            }
            add_ridge(&mut hessian, opts.hessian_ridge);
            let gradient: Vec<Decimal> = mat_t_vec_multiply(&jac, &resid, n)
                .into_iter()
                .map(|v| dec!(2) * v)
                .collect();

            let (lo, hi) = shifted_bounds(lower, upper, x);
            let qp = QpProblem {
                hessian: &hessian,
                gradient: &gradient,
                eq_matrix: &[],
                eq_rhs: &[],
                lower: &lo,
                upper: &hi,
            };
            let sol = solve_qp(
                &qp,
                vec![Decimal::ZERO; n],
                opts.max_subproblem_iterations,
                opts.tolerance,
            )?;
            apply_step(x, &sol.step, lower, upper);

            let step = norm_inf(&sol.step);
            violation = max_violation(constraints, x);
            tracing::debug!(
                phase = "feasibility",
                iteration,
                step = %step,
                violation = %violation,
                "sqp iteration"
            );
            if step <= opts.tolerance {
                break;
            }
        }
        Ok(violation)
    }
}

impl ConstrainedSolver for SqpSolver {
    fn solve(
        &self,
        objective: &dyn Objective,
        constraints: &[Box<dyn EqualityConstraint>],
        bounds: &[Bound],
        initial: &[Decimal],
    ) -> AllocationResult<SolverOutcome> {
        let opts = &self.options;
        opts.validate()?;
        validate_problem(constraints, bounds, initial)?;

        let n = initial.len();
        let lower: Vec<Decimal> = bounds.iter().map(|b| b.lower).collect();
        let upper: Vec<Decimal> = bounds.iter().map(|b| b.upper).collect();
        let mut x: Vec<Decimal> = initial
            .iter()
            .zip(bounds.iter())
            .map(|(v, b)| b.clamp(*v))
            .collect();

        // --- Phase 1: feasibility ---
        let violation = self.restore_feasibility(constraints, &lower, &upper, &mut x)?;
        if violation > opts.feasibility_tolerance {
            let worst = worst_constraint(constraints, &x);
            tracing::warn!(violation = %violation, constraint = worst, "no feasible point");
            return Err(AllocationError::Infeasible(format!(
                "constraints cannot be met within bounds; smallest achievable violation is {} on '{}'",
                violation.round_dp(8),
                worst
            )));
        }

        // --- Phase 2: optimality ---
        let all_cols: Vec<usize> = (0..n).collect();
        let mut last_step = Decimal::ZERO;
        for iteration in 1..=opts.max_iterations {
            let gradient = objective.gradient(&x);
            let mut hessian = objective.hessian(&x);
            add_ridge(&mut hessian, opts.hessian_ridge);

            let (jac, resid) = linearize(constraints, &x);
            let rows = independent_rows(&jac, &all_cols);
            let eq_matrix: Vec<Vec<Decimal>> = rows.iter().map(|&k| jac[k].clone()).collect();
            let eq_rhs: Vec<Decimal> = rows.iter().map(|&k| -resid[k]).collect();

            let (lo, hi) = shifted_bounds(&lower, &upper, &x);
            let qp = QpProblem {
                hessian: &hessian,
                gradient: &gradient,
                eq_matrix: &eq_matrix,
                eq_rhs: &eq_rhs,
                lower: &lo,
                upper: &hi,
            };
            let sol = solve_qp(
                &qp,
                vec![Decimal::ZERO; n],
                opts.max_subproblem_iterations,
                opts.tolerance,
            )?;
            apply_step(&mut x, &sol.step, &lower, &upper);

            last_step = norm_inf(&sol.step);
            let violation = max_violation(constraints, &x);
            tracing::debug!(
                phase = "optimality",
                iteration,
                step = %last_step,
                violation = %violation,
                subproblem_iterations = sol.iterations,
                "sqp iteration"
            );

            if last_step <= opts.tolerance && violation <= opts.feasibility_tolerance {
                let value = objective.value(&x);
                tracing::info!(iterations = iteration, objective = %value, "sqp converged");
                return Ok(SolverOutcome {
                    x,
                    objective: value,
                    iterations: iteration,
                    kkt_residual: last_step.max(violation),
                    constraint_violation: violation,
                    message: format!(
                        "Optimization terminated successfully after {} iterations",
                        iteration
                    ),
                });
            }
        }

        Err(AllocationError::NonConvergent {
            function: "SQP".into(),
            iterations: opts.max_iterations,
            last_delta: last_step,
        })
    }
}

fn validate_problem(
    constraints: &[Box<dyn EqualityConstraint>],
    bounds: &[Bound],
    initial: &[Decimal],
) -> AllocationResult<()> {
    let n = initial.len();
    if n == 0 {
        return Err(AllocationError::InvalidInput {
            field: "initial".into(),
            reason: "At least one variable required".into(),
        });
    }
    if bounds.len() != n {
        return Err(AllocationError::InvalidInput {
            field: "bounds".into(),
            reason: format!("Expected {} bounds but got {}", n, bounds.len()),
        });
    }
    for (i, b) in bounds.iter().enumerate() {
        if b.lower > b.upper {
            return Err(AllocationError::InvalidInput {
                field: format!("bounds[{}]", i),
                reason: format!("lower {} exceeds upper {}", b.lower, b.upper),
            });
        }
    }
    for c in constraints {
        let len = c.gradient(initial).len();
        if len != n {
            return Err(AllocationError::InvalidInput {
                field: format!("constraints[{}]", c.name()),
                reason: format!("Gradient has {} entries, expected {}", len, n),
            });
        }
    }
    Ok(())
}

/// Constraint Jacobian and residuals at `x`.
fn linearize(
    constraints: &[Box<dyn EqualityConstraint>],
    x: &[Decimal],
) -> (Vec<Vec<Decimal>>, Vec<Decimal>) {
    let jac = constraints.iter().map(|c| c.gradient(x)).collect();
    let resid = constraints.iter().map(|c| c.value(x)).collect();
    (jac, resid)
}

fn max_violation(constraints: &[Box<dyn EqualityConstraint>], x: &[Decimal]) -> Decimal {
    constraints
        .iter()
        .fold(Decimal::ZERO, |m, c| m.max(c.value(x).abs()))
}

fn worst_constraint<'a>(constraints: &'a [Box<dyn EqualityConstraint>], x: &[Decimal]) -> &'a str {
    let mut worst = ("", Decimal::MIN);
    for c in constraints {
        let v = c.value(x).abs();
        if v > worst.1 {
            worst = (c.name(), v);
        }
    }
    worst.0
}

fn add_ridge(hessian: &mut [Vec<Decimal>], ridge: Decimal) {
    for (i, row) in hessian.iter_mut().enumerate() {
        row[i] += ridge;
    }
}

/// Bounds on the step `d` so that `x + d` stays inside the box.
fn shifted_bounds(
    lower: &[Decimal],
    upper: &[Decimal],
    x: &[Decimal],
) -> (Vec<Decimal>, Vec<Decimal>) {
    let lo = lower.iter().zip(x.iter()).map(|(l, xi)| *l - *xi).collect();
    let hi = upper.iter().zip(x.iter()).map(|(u, xi)| *u - *xi).collect();
    (lo, hi)
}

fn apply_step(x: &mut [Decimal], step: &[Decimal], lower: &[Decimal], upper: &[Decimal]) {
    for i in 0..x.len() {
        x[i] = (x[i] + step[i]).max(lower[i]).min(upper[i]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::solver::{LinearConstraint, QuadraticForm};
    use tracing_test::traced_test;

    fn diag(values: &[Decimal]) -> Vec<Vec<Decimal>> {
        (0..values.len())
            .map(|i| {
                (0..values.len())
                    .map(|j| if i == j { values[i] } else { Decimal::ZERO })
                    .collect()
            })
            .collect()
    }

    fn budget(n: usize) -> Box<dyn EqualityConstraint> {
        Box::new(LinearConstraint::new("budget", vec![Decimal::ONE; n], Decimal::ONE))
    }

    // ------------------------------------------------------------------
    // 1. Budget-only minimum variance: inverse-variance weights
    // ------------------------------------------------------------------
    #[test]
    fn test_inverse_variance_weights() {
        // w_i proportional to 1/var_i: 1/0.04 : 1/0.01 = 1 : 4
        let objective = QuadraticForm {
            matrix: diag(&[dec!(0.04), dec!(0.01)]),
        };
        let solver = SqpSolver::default();
        let out = solver
            .solve(
                &objective,
                &[budget(2)],
                &[Bound::unit(), Bound::unit()],
                &[dec!(0.5), dec!(0.5)],
            )
            .unwrap();
        assert!((out.x[0] - dec!(0.2)).abs() < dec!(0.000001), "got {:?}", out.x);
        assert!((out.x[1] - dec!(0.8)).abs() < dec!(0.000001), "got {:?}", out.x);
        assert!(out.kkt_residual <= dec!(0.00000001));
    }

    #[test]
    #[traced_test]
    fn test_convergence_is_logged() {
        let objective = QuadraticForm {
            matrix: diag(&[dec!(0.04), dec!(0.01)]),
        };
        SqpSolver::default()
            .solve(
                &objective,
                &[budget(2)],
                &[Bound::unit(), Bound::unit()],
                &[dec!(0.5), dec!(0.5)],
            )
            .unwrap();
        assert!(logs_contain("sqp iteration"));
        assert!(logs_contain("sqp converged"));
    }

    // ------------------------------------------------------------------
    // 2. Infeasible start is repaired in phase 1
    // ------------------------------------------------------------------
    #[test]
    fn test_infeasible_start_is_repaired() {
        let objective = QuadraticForm {
            matrix: diag(&[dec!(0.04), dec!(0.01)]),
        };
        let out = SqpSolver::default()
            .solve(
                &objective,
                &[budget(2)],
                &[Bound::unit(), Bound::unit()],
                &[dec!(0.9), dec!(0.9)],
            )
            .unwrap();
        let total: Decimal = out.x.iter().sum();
        assert!((total - Decimal::ONE).abs() < dec!(0.00000001));
    }

    // ------------------------------------------------------------------
    // 3. No point satisfies the constraints inside the box
    // ------------------------------------------------------------------
    #[test]
    fn test_infeasible_problem() {
        let objective = QuadraticForm {
            matrix: diag(&[dec!(0.04), dec!(0.01)]),
        };
        let constraints = vec![
            budget(2),
            Box::new(LinearConstraint::new(
                "beta",
                vec![dec!(0.5), dec!(0.8)],
                dec!(5),
            )) as Box<dyn EqualityConstraint>,
        ];
        let err = SqpSolver::default()
            .solve(
                &objective,
                &constraints,
                &[Bound::unit(), Bound::unit()],
                &[dec!(0.5), dec!(0.5)],
            )
            .unwrap_err();
        assert_eq!(err.kind(), "InfeasibleError");
        assert!(err.to_string().contains("beta"), "{}", err);
    }

    // ------------------------------------------------------------------
    // 4. Dimension checks
    // ------------------------------------------------------------------
    #[test]
    fn test_bound_count_mismatch() {
        let objective = QuadraticForm {
            matrix: diag(&[dec!(0.04), dec!(0.01)]),
        };
        let err = SqpSolver::default()
            .solve(&objective, &[budget(2)], &[Bound::unit()], &[dec!(0.5), dec!(0.5)])
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidInputError");
    }

    #[test]
    fn test_inverted_bound_rejected() {
        let objective = QuadraticForm {
            matrix: diag(&[dec!(0.04)]),
        };
        let err = SqpSolver::default()
            .solve(
                &objective,
                &[budget(1)],
                &[Bound::new(dec!(1), dec!(0))],
                &[dec!(0.5)],
            )
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidInputError");
    }

    // ------------------------------------------------------------------
    // 5. Semidefinite covariance still solves thanks to the ridge
    // ------------------------------------------------------------------
    #[test]
    fn test_singular_covariance() {
        // Two identical assets: any split has the same variance.
        let objective = QuadraticForm {
            matrix: vec![vec![dec!(0.04), dec!(0.04)], vec![dec!(0.04), dec!(0.04)]],
        };
        let out = SqpSolver::default()
            .solve(
                &objective,
                &[budget(2)],
                &[Bound::unit(), Bound::unit()],
                &[dec!(0.5), dec!(0.5)],
            )
            .unwrap();
        assert!((out.x[0] - dec!(0.5)).abs() < dec!(0.000001));
        assert!((out.objective - dec!(0.04)).abs() < dec!(0.000001));
    }

    #[test]
    fn test_iteration_budget_exhausted() {
        let objective = QuadraticForm {
            matrix: diag(&[dec!(0.04), dec!(0.01)]),
        };
        let solver = SqpSolver::new(SolverOptions {
            max_iterations: 1,
            ..SolverOptions::default()
        });
        let err = solver
            .solve(
                &objective,
                &[budget(2)],
                &[Bound::unit(), Bound::unit()],
                &[dec!(0.5), dec!(0.5)],
            )
            .unwrap_err();
        assert_eq!(err.kind(), "NonconvergentError");
    }
}
