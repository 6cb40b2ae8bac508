//! Primal active-set method for the convex quadratic subproblem
//!
//! ```text
//! min  ½ d'Hd + g'd   s.t.  E d = e,  lower <= d <= upper
//! ```
//!
//! The working set holds the variables pinned at a bound. Each iteration
//! solves the equality-constrained KKT system over the free variables, then
//! either shortens the step at the first bound it would cross (that bound
//! joins the working set) or, for a zero step, releases the pinned variable
//! with the most negative multiplier. Ties go to the lowest index, which
//! keeps the iteration order deterministic.

use rust_decimal::Decimal;

use crate::error::AllocationError;
use crate::AllocationResult;

use super::linalg::{
    dot, independent_rows, mat_t_vec_multiply, mat_vec_multiply, norm_inf, solve_linear_system,
};

/// Where a variable sits relative to its bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundState {
    Free,
    AtLower,
    AtUpper,
}

/// Subproblem data.
///
/// `eq_matrix` rows may become dependent once variables are pinned (two
/// assets with the same beta at an extreme target, say). Each iteration keeps
/// an independent subset over the free variables; the dropped rows must stay
/// satisfied by the kept ones.
#[derive(Debug, Clone, Copy)]
pub struct QpProblem<'a> {
    pub hessian: &'a [Vec<Decimal>],
    pub gradient: &'a [Decimal],
    pub eq_matrix: &'a [Vec<Decimal>],
    pub eq_rhs: &'a [Decimal],
    pub lower: &'a [Decimal],
    pub upper: &'a [Decimal],
}

#[derive(Debug, Clone)]
pub struct QpSolution {
    pub step: Vec<Decimal>,
    /// Multipliers of the equality rows.
    pub eq_multipliers: Vec<Decimal>,
    pub states: Vec<BoundState>,
    pub iterations: u32,
}

/// Solve the subproblem starting from `start`, which must lie within the
/// bounds (it need not satisfy the equalities).
pub fn solve_qp(
    problem: &QpProblem<'_>,
    start: Vec<Decimal>,
    max_iterations: u32,
    tolerance: Decimal,
) -> AllocationResult<QpSolution> {
    let n = problem.gradient.len();
    let mut d = start;
    let mut states = initial_states(&mut d, problem, tolerance);
    release_for_rank(&mut states, problem);

    let mut last_step = Decimal::ZERO;
    for iteration in 1..=max_iterations {
        let free: Vec<usize> = (0..n).filter(|&i| states[i] == BoundState::Free).collect();
        let rows = independent_rows(problem.eq_matrix, &free);
        let (p, lambda) = equality_step(problem, &d, &free, &rows)?;
        check_dropped_rows(problem, &d, &p, &rows, tolerance)?;
        last_step = norm_inf(&p);

        if last_step <= tolerance {
            for (di, pi) in d.iter_mut().zip(p.iter()) {
                *di += *pi;
            }
            match most_negative_multiplier(problem, &d, &lambda, &states, tolerance) {
                None => {
                    return Ok(QpSolution {
                        step: d,
                        eq_multipliers: lambda,
                        states,
                        iterations: iteration,
                    });
                }
                Some(i) => {
                    tracing::trace!(variable = i, "releasing bound");
                    states[i] = BoundState::Free;
                }
            }
            continue;
        }

        match blocking_bound(problem, &d, &p, &free) {
            Some((i, alpha, state)) => {
                for (di, pi) in d.iter_mut().zip(p.iter()) {
                    *di += alpha * *pi;
                }
                d[i] = match state {
                    BoundState::AtLower => problem.lower[i],
                    _ => problem.upper[i],
                };
                states[i] = state;
                tracing::trace!(variable = i, %alpha, "bound became active");
            }
            None => {
                for (di, pi) in d.iter_mut().zip(p.iter()) {
                    *di += *pi;
                }
            }
        }
    }

    Err(AllocationError::NonConvergent {
        function: "active-set quadratic subproblem".into(),
        iterations: max_iterations,
        last_delta: last_step,
    })
}

/// Pin every variable that starts on (or numerically past) a bound.
fn initial_states(d: &mut [Decimal], problem: &QpProblem<'_>, tolerance: Decimal) -> Vec<BoundState> {
    d.iter_mut()
        .enumerate()
        .map(|(i, di)| {
            if *di <= problem.lower[i] + tolerance {
                *di = problem.lower[i];
                BoundState::AtLower
            } else if *di >= problem.upper[i] - tolerance {
                *di = problem.upper[i];
                BoundState::AtUpper
            } else {
                BoundState::Free
            }
        })
        .collect()
}

/// Release pinned variables (lowest index first) while doing so raises the
/// rank of the equality rows restricted to the free variables.
fn release_for_rank(states: &mut [BoundState], problem: &QpProblem<'_>) {
    let m = problem.eq_matrix.len();
    let mut free: Vec<usize> = (0..states.len())
        .filter(|&i| states[i] == BoundState::Free)
        .collect();
    let mut rank = independent_rows(problem.eq_matrix, &free).len();

    for i in 0..states.len() {
        if rank == m {
            break;
        }
        if states[i] == BoundState::Free || problem.lower[i] == problem.upper[i] {
            continue;
        }
        let mut candidate = free.clone();
        candidate.push(i);
        candidate.sort_unstable();
        let r = independent_rows(problem.eq_matrix, &candidate).len();
        if r > rank {
            states[i] = BoundState::Free;
            free = candidate;
            rank = r;
        }
    }
}

/// Rows left out of the KKT system must still hold after the step.
fn check_dropped_rows(
    problem: &QpProblem<'_>,
    d: &[Decimal],
    p: &[Decimal],
    rows: &[usize],
    tolerance: Decimal,
) -> AllocationResult<()> {
    let next: Vec<Decimal> = d.iter().zip(p.iter()).map(|(a, b)| *a + *b).collect();
    for (k, row) in problem.eq_matrix.iter().enumerate() {
        if rows.contains(&k) {
            continue;
        }
        let residual = (problem.eq_rhs[k] - dot(row, &next)).abs();
        if residual > tolerance {
            return Err(AllocationError::NumericalDegeneracy(format!(
                "Equality row {} is inconsistent with the rows kept over the free variables (residual {})",
                k, residual
            )));
        }
    }
    Ok(())
}

/// Solve the KKT system over the free variables and the equality `rows`.
///
/// ```text
/// [ H_FF  E_F' ] [ p_F ]   [ -(H d + g)_F ]
/// [ E_F   0    ] [ -l  ] = [  e - E d     ]
/// ```
///
/// Returns the full-length step (zero on pinned variables) and the
/// equality multipliers `l`, zero for rows not in `rows`.
#[allow(clippy::needless_range_loop)]
fn equality_step(
    problem: &QpProblem<'_>,
    d: &[Decimal],
    free: &[usize],
    rows: &[usize],
) -> AllocationResult<(Vec<Decimal>, Vec<Decimal>)> {
    let n = d.len();
    let m = rows.len();
    let nf = free.len();
    let size = nf + m;

    let hd = mat_vec_multiply(problem.hessian, d);
    let residual: Vec<Decimal> = rows
        .iter()
        .map(|&k| problem.eq_rhs[k] - dot(&problem.eq_matrix[k], d))
        .collect();

    let mut kkt = vec![vec![Decimal::ZERO; size]; size];
    let mut rhs = vec![Decimal::ZERO; size];
    for (a, &i) in free.iter().enumerate() {
        for (b, &j) in free.iter().enumerate() {
            kkt[a][b] = problem.hessian[i][j];
        }
        for (r, &k) in rows.iter().enumerate() {
            kkt[a][nf + r] = problem.eq_matrix[k][i];
            kkt[nf + r][a] = problem.eq_matrix[k][i];
        }
        rhs[a] = -(hd[i] + problem.gradient[i]);
    }
    for k in 0..m {
        rhs[nf + k] = residual[k];
    }

    let sol = solve_linear_system(kkt, rhs).ok_or_else(|| {
        AllocationError::NumericalDegeneracy(format!(
            "Singular KKT system with {} free variables and {} equality rows",
            nf, m
        ))
    })?;

    let mut p = vec![Decimal::ZERO; n];
    for (a, &i) in free.iter().enumerate() {
        p[i] = sol[a];
    }
    let mut lambda = vec![Decimal::ZERO; problem.eq_matrix.len()];
    for (r, &k) in rows.iter().enumerate() {
        lambda[k] = -sol[nf + r];
    }
    Ok((p, lambda))
}

/// Pinned variable whose bound multiplier has the wrong sign, if any.
fn most_negative_multiplier(
    problem: &QpProblem<'_>,
    d: &[Decimal],
    lambda: &[Decimal],
    states: &[BoundState],
    tolerance: Decimal,
) -> Option<usize> {
    let n = d.len();
    let hd = mat_vec_multiply(problem.hessian, d);
    let et_lambda = mat_t_vec_multiply(problem.eq_matrix, lambda, n);

    let mut worst: Option<(usize, Decimal)> = None;
    for i in 0..n {
        if states[i] == BoundState::Free || problem.lower[i] == problem.upper[i] {
            continue;
        }
        let mu = hd[i] + problem.gradient[i] - et_lambda[i];
        let signed = match states[i] {
            BoundState::AtLower => mu,
            _ => -mu,
        };
        if signed < -tolerance && worst.map_or(true, |(_, w)| signed < w) {
            worst = Some((i, signed));
        }
    }
    worst.map(|(i, _)| i)
}

/// First bound crossed along `p` before a full step, as
/// `(index, step fraction, new state)`.
fn blocking_bound(
    problem: &QpProblem<'_>,
    d: &[Decimal],
    p: &[Decimal],
    free: &[usize],
) -> Option<(usize, Decimal, BoundState)> {
    let mut best: Option<(usize, Decimal, BoundState)> = None;
    for &i in free {
        let (room, state) = if p[i] < Decimal::ZERO {
            (problem.lower[i] - d[i], BoundState::AtLower)
        } else if p[i] > Decimal::ZERO {
            (problem.upper[i] - d[i], BoundState::AtUpper)
        } else {
            continue;
        };
        let alpha = (room / p[i]).max(Decimal::ZERO);
        if alpha < Decimal::ONE && best.map_or(true, |(_, a, _)| alpha < a) {
            best = Some((i, alpha, state));
        }
    }
    best
}
