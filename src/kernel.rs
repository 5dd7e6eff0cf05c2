//! Kernel primitives shared by the embedding models: squared distance
//! matrices, Gaussian kernels and a stable log-sum-exp reduction.

use num_traits::Float;

use crate::Error;

/// Computes the matrix of squared Euclidean distances between the columns of
/// `x` and `y`.
///
/// Matrices are stored flat with one contiguous `dim`-sized chunk per column,
/// so `x` holds `m = x.len() / dim` columns and `y` holds `k` columns. The
/// result is written row-wise into `out`, which must hold `m * k` values.
///
/// Distances are computed through the expansion `‖a‖² + ‖b‖² − 2a·b` rather
/// than by forming explicit differences. The output is symmetric with a zero
/// diagonal, up to floating point error, whenever `x` and `y` coincide.
pub fn squared_distances<T: Float>(x: &[T], y: &[T], dim: usize, out: &mut [T]) {
    let m = x.len() / dim;
    let k = y.len() / dim;
    debug_assert_eq!(x.len(), m * dim);
    debug_assert_eq!(y.len(), k * dim);
    debug_assert_eq!(out.len(), m * k);

    let column_norms = |data: &[T]| -> Vec<T> {
        data.chunks_exact(dim)
            .map(|column| column.iter().fold(T::zero(), |acc, &v| acc + v * v))
            .collect()
    };
    let x2 = column_norms(x);
    let y2 = column_norms(y);

    let two = T::one() + T::one();
    for i in 0..m {
        let xi = &x[i * dim..(i + 1) * dim];
        for j in 0..k {
            let yj = &y[j * dim..(j + 1) * dim];
            let mut dot = T::zero();
            for r in 0..dim {
                dot = dot + xi[r] * yj[r];
            }
            out[i * k + j] = x2[i] + y2[j] - two * dot;
        }
    }
}

/// Evaluates the Gaussian kernel `exp(-d / bandwidth)` elementwise on a
/// matrix of squared distances. The bandwidth must be strictly positive;
/// callers validate it.
pub fn gaussian_kernel<T: Float>(distances: &[T], bandwidth: T, out: &mut [T]) {
    debug_assert_eq!(distances.len(), out.len());
    for (o, &d) in out.iter_mut().zip(distances) {
        *o = (-d / bandwidth).exp();
    }
}

/// Computes `log(sum(exp(x)))` in a numerically stable way by shifting by the
/// maximum before exponentiating.
///
/// The entry at `skip`, if any, is left out of the reduction entirely; this
/// is how leave-one-out masking suppresses self-similarity terms. Returns
/// `None` when every remaining entry is `-inf`, i.e. the row is degenerate
/// and the result would otherwise be a silent `NaN`.
pub fn log_sum_exp<T: Float>(x: &[T], skip: Option<usize>) -> Option<T> {
    let mut xmax = T::neg_infinity();
    for (j, &v) in x.iter().enumerate() {
        if Some(j) == skip {
            continue;
        }
        if v > xmax {
            xmax = v;
        }
    }
    if !(xmax > T::neg_infinity()) {
        return None;
    }
    let mut sum = T::zero();
    for (j, &v) in x.iter().enumerate() {
        if Some(j) == skip {
            continue;
        }
        sum = sum + (v - xmax).exp();
    }
    Some(xmax + sum.ln())
}

/// Row-wise [`log_sum_exp`] over a flat row-major matrix with `cols` columns.
///
/// With `skip_diagonal` set, entry `(i, i)` of each row is masked out. A
/// degenerate row is reported as [`Error::DegenerateRow`].
pub fn log_sum_exp_rows<T: Float>(
    matrix: &[T],
    cols: usize,
    skip_diagonal: bool,
) -> Result<Vec<T>, Error> {
    matrix
        .chunks_exact(cols)
        .enumerate()
        .map(|(i, row)| {
            let skip = if skip_diagonal { Some(i) } else { None };
            log_sum_exp(row, skip).ok_or(Error::DegenerateRow { row: i })
        })
        .collect()
}
