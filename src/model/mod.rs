//! The embedding models and the machinery they share: penalties, latent
//! initialization and kernel-weighted regression between spaces.

mod cie;
mod kie;

pub use cie::Cie;
pub use kie::Kie;

use std::f64::consts::PI;

use rand_distr::{Distribution, Normal};

use crate::Error;
use crate::kernel::{gaussian_kernel, log_sum_exp, squared_distances};

/// A regularization penalty over the latent coordinates.
///
/// The latent matrix is passed as a flat slice with one contiguous column per
/// example. Models weight both the value and the gradient by `reg / n`.
pub trait Penalty {
    /// Scalar penalty value for the latent matrix `z`.
    fn value(&self, z: &[f64]) -> f64;
    /// Writes the penalty gradient with respect to `z` into `out`.
    fn grad(&self, z: &[f64], out: &mut [f64]);
}

/// The default penalty: sum of squared latent coordinates, gradient `2Z`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SquaredNorm;

impl Penalty for SquaredNorm {
    fn value(&self, z: &[f64]) -> f64 {
        z.iter().map(|v| v * v).sum()
    }

    fn grad(&self, z: &[f64], out: &mut [f64]) {
        for (o, &v) in out.iter_mut().zip(z) {
            *o = 2.0 * v;
        }
    }
}

/// Samples a small random latent initialization.
pub(crate) fn random_latent(len: usize, scale: f64) -> Vec<f64> {
    let normal = Normal::new(0.0, scale).unwrap();
    let mut rng = rand::rng();
    (0..len).map(|_| normal.sample(&mut rng)).collect()
}

/// Gaussian kernel matrix of a column-contiguous data matrix with itself.
pub(crate) fn data_kernel(data: &[f64], dim: usize, bandwidth: f64) -> Vec<f64> {
    let n = data.len() / dim;
    let mut distances = vec![0.0; n * n];
    squared_distances(data, data, dim, &mut distances);
    let mut kernel = vec![0.0; n * n];
    gaussian_kernel(&distances, bandwidth, &mut kernel);
    kernel
}

/// Writes the latent kernel matrix `exp(-‖z_i - z_j‖²)`, bandwidth 1, into
/// `out`.
pub(crate) fn latent_kernel(z: &[f64], q: usize, out: &mut [f64]) {
    squared_distances(z, z, q, out);
    for v in out.iter_mut() {
        *v = (-*v).exp();
    }
}

/// Log kernel values of every query column against every base column,
/// `-‖query_t - base_j‖² / bandwidth`, one row per query.
pub(crate) fn query_log_kernel(query: &[f64], base: &[f64], dim: usize, bandwidth: f64) -> Vec<f64> {
    let rows = query.len() / dim;
    let cols = base.len() / dim;
    let mut logk = vec![0.0; rows * cols];
    squared_distances(query, base, dim, &mut logk);
    for v in &mut logk {
        *v = -*v / bandwidth;
    }
    logk
}

/// Kernel-weighted expectation of `targets` at each query.
///
/// `logk` holds one row of log kernel values per query against the `n` base
/// columns; `targets` is column-contiguous with `dim` values per column. The
/// softmax weights are formed through the stable log-sum-exp, so arbitrarily
/// large negative log kernels are handled gracefully.
pub(crate) fn kernel_regression(
    logk: &[f64],
    n: usize,
    targets: &[f64],
    dim: usize,
) -> Result<Vec<f64>, Error> {
    let mut out = vec![0.0; (logk.len() / n) * dim];
    for (t, row) in logk.chunks_exact(n).enumerate() {
        let lse = log_sum_exp(row, None).ok_or(Error::DegenerateRow { row: t })?;
        let expectation = &mut out[t * dim..(t + 1) * dim];
        for (j, &k) in row.iter().enumerate() {
            let weight = (k - lse).exp();
            let target = &targets[j * dim..(j + 1) * dim];
            for (o, &v) in expectation.iter_mut().zip(target) {
                *o += weight * v;
            }
        }
    }
    Ok(out)
}

/// Gaussian kernel density estimate at a single point, normalized by
/// `n · (π·h)^(dim/2)`.
pub(crate) fn point_density(point: &[f64], base: &[f64], dim: usize, bandwidth: f64) -> f64 {
    let n = base.len() / dim;
    let mut sum = 0.0;
    for column in base.chunks_exact(dim) {
        let mut distance = 0.0;
        for (&a, &b) in point.iter().zip(column) {
            distance += (a - b) * (a - b);
        }
        sum += (-distance / bandwidth).exp();
    }
    sum / (n as f64 * (PI * bandwidth).powf(dim as f64 / 2.0))
}

pub(crate) fn check_bandwidth(bandwidth: f64) -> Result<(), Error> {
    if bandwidth.is_finite() && bandwidth > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidBandwidth(bandwidth))
    }
}

/// Validates that a query holds a whole number of `dim`-sized columns; a bare
/// `dim`-length vector is a single column.
pub(crate) fn check_query(query: &[f64], dim: usize) -> Result<(), Error> {
    if query.is_empty() || query.len() % dim != 0 {
        return Err(Error::InvalidDimension(format!(
            "query length {} is not a positive multiple of the space dimensionality {}",
            query.len(),
            dim
        )));
    }
    Ok(())
}

/// Validates a single point against the dimensionality of its space.
pub(crate) fn check_point(point: &[f64], dim: usize) -> Result<(), Error> {
    if point.len() != dim {
        return Err(Error::InvalidDimension(format!(
            "point length {} does not match the space dimensionality {}",
            point.len(),
            dim
        )));
    }
    Ok(())
}
