use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Pivots smaller than this are treated as zero.
const PIVOT_EPSILON: Decimal = dec!(0.0000000000000000000001);

/// Relative size below which a reduced row counts as dependent.
const RANK_EPSILON: Decimal = dec!(0.000000000001);

/// Dot product.
pub fn dot(a: &[Decimal], b: &[Decimal]) -> Decimal {
    a.iter().zip(b.iter()).map(|(x, y)| *x * *y).sum()
}

/// Matrix-vector multiplication.
pub fn mat_vec_multiply(mat: &[Vec<Decimal>], v: &[Decimal]) -> Vec<Decimal> {
    mat.iter().map(|row| dot(row, v)).collect()
}

/// Transposed matrix-vector product `A' * v`.
pub fn mat_t_vec_multiply(mat: &[Vec<Decimal>], v: &[Decimal], cols: usize) -> Vec<Decimal> {
    let mut out = vec![Decimal::ZERO; cols];
    for (row, vi) in mat.iter().zip(v.iter()) {
        for (o, a) in out.iter_mut().zip(row.iter()) {
            *o += *a * *vi;
        }
    }
    out
}

/// Quadratic form `x' * M * x`.
pub fn quadratic_form(mat: &[Vec<Decimal>], x: &[Decimal]) -> Decimal {
    dot(x, &mat_vec_multiply(mat, x))
}

/// Largest absolute entry (infinity norm); zero for an empty vector.
pub fn norm_inf(v: &[Decimal]) -> Decimal {
    v.iter().fold(Decimal::ZERO, |m, x| m.max(x.abs()))
}

/// Solve `A x = b` by Gaussian elimination with partial pivoting.
///
/// Returns `None` when a pivot falls below `PIVOT_EPSILON`.
#[allow(clippy::needless_range_loop)]
pub fn solve_linear_system(mut a: Vec<Vec<Decimal>>, mut b: Vec<Decimal>) -> Option<Vec<Decimal>> {
    let n = a.len();
    if n == 0 {
        return Some(Vec::new());
    }

    for col in 0..n {
        // Partial pivoting; the first maximal row wins ties.
        let mut max_row = col;
        let mut max_val = a[col][col].abs();
        for row in (col + 1)..n {
            let val = a[row][col].abs();
            if val > max_val {
                max_val = val;
                max_row = row;
            }
        }
        if max_val < PIVOT_EPSILON {
            return None;
        }
        if max_row != col {
            a.swap(col, max_row);
            b.swap(col, max_row);
        }

        let pivot = a[col][col];
        for row in (col + 1)..n {
            let factor = a[row][col] / pivot;
            if factor.is_zero() {
                continue;
            }
            for k in col..n {
                let delta = factor * a[col][k];
                a[row][k] -= delta;
            }
            let delta = factor * b[col];
            b[row] -= delta;
        }
    }

    let mut x = vec![Decimal::ZERO; n];
    for row in (0..n).rev() {
        let tail: Decimal = ((row + 1)..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Some(x)
}

/// Indices of a maximal linearly independent subset of `rows`, restricted
/// to the columns in `cols`. Earlier rows are preferred.
pub fn independent_rows(rows: &[Vec<Decimal>], cols: &[usize]) -> Vec<usize> {
    let mut basis: Vec<(usize, Vec<Decimal>)> = Vec::new();
    let mut kept = Vec::new();

    for (idx, row) in rows.iter().enumerate() {
        let mut r: Vec<Decimal> = cols.iter().map(|&c| row[c]).collect();
        let scale = norm_inf(&r);
        if scale.is_zero() {
            continue;
        }
        for (pivot, b) in &basis {
            let f = r[*pivot];
            if !f.is_zero() {
                for (ri, bi) in r.iter_mut().zip(b.iter()) {
                    *ri -= f * *bi;
                }
            }
        }

        let mut pivot = 0;
        let mut best = Decimal::ZERO;
        for (k, v) in r.iter().enumerate() {
            if v.abs() > best {
                best = v.abs();
                pivot = k;
            }
        }
        if best > RANK_EPSILON * scale {
            let p = r[pivot];
            let normalized: Vec<Decimal> = r.iter().map(|v| *v / p).collect();
            basis.push((pivot, normalized));
            kept.push(idx);
        }
    }
    kept
}
