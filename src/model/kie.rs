use std::f64::consts::PI;

use rayon::prelude::*;

use crate::Error;
use crate::kernel::{log_sum_exp_rows, squared_distances};
use crate::model::{self, Penalty, SquaredNorm};
use crate::optimize::{GradientDescent, Objective, TrainSummary};

/// Kernel information embedding.
///
/// Computes a low-dimensional embedding of data by maximizing a Parzen-window
/// estimate of the mutual information between the embedding and the original
/// data. The data is denoted `Y` (one column per example) and the embedding
/// `Z`; the flat parameter vector holds `Z` column by column, followed by the
/// log data bandwidth when it is learned.
pub struct Kie {
    q: usize,
    d: usize,
    n: usize,
    reg: f64,
    loo: bool,
    learn_bandwidth: bool,
    y: Vec<f64>,
    /// Squared distances between data columns, fixed at construction.
    yy: Vec<f64>,
    /// Log data kernel `-YY / h` and its elementwise exponential. Refreshed
    /// from the parameter vector only when the bandwidth is learned; with
    /// leave-one-out the diagonal of the exponentiated kernel is zeroed.
    log_ky: Vec<f64>,
    ky: Vec<f64>,
    log_hy: f64,
    log_n: f64,
    params: Vec<f64>,
    penalty: Box<dyn Penalty + Send + Sync>,
    /// n×n scratch for the latent kernel and the joint log kernel, reused
    /// across cost and gradient evaluations.
    kz: Vec<f64>,
    joint: Vec<f64>,
}

impl Kie {
    /// Creates a new unconditional embedding model with a random latent
    /// initialization of scale `0.1`.
    ///
    /// # Arguments
    ///
    /// * `q` - dimensionality of the latent space, at least 1.
    ///
    /// * `hy` - data space kernel bandwidth, strictly positive.
    ///
    /// * `y` - data matrix, `d` contiguous values per example.
    ///
    /// * `d` - dimensionality of the data space.
    ///
    /// * `reg` - non-negative regularization weight.
    ///
    /// * `loo` - whether to use the leave-one-out estimate.
    ///
    /// * `learn_bandwidth` - whether to optimize the bandwidth too; its log
    ///   is then appended to the parameter vector.
    pub fn new(
        q: usize,
        hy: f64,
        y: Vec<f64>,
        d: usize,
        reg: f64,
        loo: bool,
        learn_bandwidth: bool,
    ) -> Result<Self, Error> {
        if q == 0 {
            return Err(Error::InvalidDimension(
                "the latent dimensionality must be at least 1".into(),
            ));
        }
        if d == 0 || y.is_empty() || y.len() % d != 0 {
            return Err(Error::InvalidDimension(format!(
                "data length {} is not a positive multiple of the data dimensionality {}",
                y.len(),
                d
            )));
        }
        let n = y.len() / d;
        if n < 2 {
            return Err(Error::InvalidDimension(
                "at least two examples are required".into(),
            ));
        }
        model::check_bandwidth(hy)?;
        if !(reg >= 0.0) {
            return Err(Error::InvalidDimension(
                "the regularization weight must be non-negative".into(),
            ));
        }

        let mut yy = vec![0.0; n * n];
        squared_distances(&y, &y, d, &mut yy);

        let mut params = model::random_latent(q * n, 0.1);
        let log_hy = hy.ln();
        if learn_bandwidth {
            params.push(log_hy);
        }

        let mut model = Self {
            q,
            d,
            n,
            reg,
            loo,
            learn_bandwidth,
            y,
            yy,
            log_ky: vec![0.0; n * n],
            ky: vec![0.0; n * n],
            log_hy,
            log_n: (n as f64).ln(),
            params,
            penalty: Box::new(SquaredNorm),
            kz: vec![0.0; n * n],
            joint: vec![0.0; n * n],
        };
        model.rebuild_data_kernel();
        Ok(model)
    }

    /// Replaces the regularization penalty.
    pub fn penalty(&mut self, penalty: Box<dyn Penalty + Send + Sync>) -> &mut Self {
        self.penalty = penalty;
        self
    }

    /// The latent coordinate matrix, `q` contiguous values per example.
    pub fn embedding(&self) -> &[f64] {
        &self.params[..self.q * self.n]
    }

    /// The current data space bandwidth.
    pub fn bandwidth(&self) -> f64 {
        self.current_log_hy().exp()
    }

    fn current_log_hy(&self) -> f64 {
        if self.learn_bandwidth {
            self.params[self.q * self.n]
        } else {
            self.log_hy
        }
    }

    fn rebuild_data_kernel(&mut self) {
        let h = self.log_hy.exp();
        for (i, &dd) in self.yy.iter().enumerate() {
            self.log_ky[i] = -dd / h;
            self.ky[i] = self.log_ky[i].exp();
        }
        if self.loo {
            for i in 0..self.n {
                self.ky[i * self.n + i] = 0.0;
            }
        }
    }

    /// Refreshes quantities derived from trainable parameters. Only the data
    /// kernel depends on them, and only when the bandwidth is learned.
    fn refresh(&mut self) {
        if self.learn_bandwidth {
            self.log_hy = self.params[self.q * self.n];
            self.rebuild_data_kernel();
        }
    }

    /// Evaluates the embedding objective at the current parameters.
    ///
    /// This is minus the mutual information estimate between the latent and
    /// data kernels, plus a log-partition term when the bandwidth is learned,
    /// plus the weighted penalty. Deterministic given the parameter vector.
    pub fn cost(&mut self) -> Result<f64, Error> {
        self.refresh();
        let n = self.n;
        let z = &self.params[..self.q * n];

        // The scratch buffer holds the negated latent squared distances,
        // i.e. the log latent kernel.
        squared_distances(z, z, self.q, &mut self.kz);
        for v in self.kz.iter_mut() {
            *v = -*v;
        }

        for ((j, &ky), &kz) in self.joint.iter_mut().zip(&self.log_ky).zip(&self.kz) {
            *j = ky + kz;
        }
        let joint_lse = log_sum_exp_rows(&self.joint, n, self.loo)?;
        let latent_lse = log_sum_exp_rows(&self.kz, n, self.loo)?;
        let sum: f64 = latent_lse
            .iter()
            .zip(&joint_lse)
            .map(|(latent, joint)| latent - joint)
            .sum();

        let mut cost = sum / n as f64;
        if self.learn_bandwidth {
            cost += self.log_n + 0.5 * self.d as f64 * (PI * self.log_hy.exp()).ln();
        }
        cost += self.reg / n as f64 * self.penalty.value(self.embedding());
        Ok(cost)
    }

    /// Evaluates the analytic gradient of [`cost`](Kie::cost) with respect to
    /// the full parameter vector.
    pub fn grad(&mut self) -> Result<Vec<f64>, Error> {
        self.refresh();
        let (q, n) = (self.q, self.n);

        model::latent_kernel(&self.params[..q * n], q, &mut self.kz);
        if self.loo {
            for i in 0..n {
                self.kz[i * n + i] = 0.0;
            }
        }
        let kz = &self.kz;

        let mut sum_kz = vec![0.0; n];
        let mut sum_kzky = vec![0.0; n];
        for i in 0..n {
            for j in 0..n {
                sum_kz[i] += kz[i * n + j];
                sum_kzky[i] += kz[i * n + j] * self.ky[i * n + j];
            }
            if !(sum_kz[i] > 0.0) || !(sum_kzky[i] > 0.0) {
                return Err(Error::DegenerateRow { row: i });
            }
        }

        let mut grad = vec![0.0; self.params.len()];
        let z = self.embedding();
        let ky = &self.ky;
        let scale = 2.0 / n as f64;

        // One latent column per example; the accumulation is data-parallel.
        grad[..q * n]
            .par_chunks_mut(q)
            .enumerate()
            .for_each(|(l, gl)| {
                let zl = &z[l * q..(l + 1) * q];
                for j in 0..n {
                    let weight = kz[l * n + j]
                        * (ky[l * n + j] / sum_kzky[l] + ky[l * n + j] / sum_kzky[j]
                            - 1.0 / sum_kz[l]
                            - 1.0 / sum_kz[j]);
                    let zj = &z[j * q..(j + 1) * q];
                    for r in 0..q {
                        gl[r] += (zl[r] - zj[r]) * weight;
                    }
                }
                for g in gl.iter_mut() {
                    *g *= scale;
                }
            });

        let mut penalty_grad = vec![0.0; q * n];
        self.penalty.grad(z, &mut penalty_grad);
        for (g, p) in grad.iter_mut().zip(&penalty_grad) {
            *g += self.reg / n as f64 * p;
        }

        if self.learn_bandwidth {
            let h = self.log_hy.exp();
            let mut dh = 0.0;
            for i in 0..n {
                for j in 0..n {
                    dh += kz[i * n + j] * ky[i * n + j] / sum_kzky[i] * self.yy[i * n + j];
                }
            }
            grad[q * n] = -dh / (n as f64 * h) + 0.5 * self.d as f64;
        }

        Ok(grad)
    }

    /// Maps latent points to their expected data space images.
    ///
    /// `z` holds any number of `q`-sized query columns; a bare length-`q`
    /// vector is a single column. The result is the kernel-weighted
    /// expectation of `Y` under the latent Gaussian kernel of bandwidth 1,
    /// with `d` contiguous values per query.
    pub fn forward(&self, z: &[f64]) -> Result<Vec<f64>, Error> {
        model::check_query(z, self.q)?;
        let logk = model::query_log_kernel(z, self.embedding(), self.q, 1.0);
        model::kernel_regression(&logk, self.n, &self.y, self.d)
    }

    /// Maps data points to their expected latent coordinates, using the data
    /// space bandwidth.
    pub fn backward(&self, y: &[f64]) -> Result<Vec<f64>, Error> {
        model::check_query(y, self.d)?;
        let mut query = vec![0.0; y.len() / self.d * self.n];
        squared_distances(y, &self.y, self.d, &mut query);
        let h = self.current_log_hy().exp();
        for v in &mut query {
            *v = -*v / h;
        }
        model::kernel_regression(&query, self.n, self.embedding(), self.q)
    }

    /// Projects data points onto the learned manifold, i.e. the forward image
    /// of the backward mapping. A round trip through the model de-noises.
    pub fn project(&self, y: &[f64]) -> Result<Vec<f64>, Error> {
        self.forward(&self.backward(y)?)
    }

    /// Kernel density estimate at a single latent point.
    pub fn latdensity(&self, z: &[f64]) -> Result<f64, Error> {
        model::check_point(z, self.q)?;
        Ok(model::point_density(z, self.embedding(), self.q, 1.0))
    }

    /// Kernel density estimate at a single data point.
    pub fn obsdensity(&self, y: &[f64]) -> Result<f64, Error> {
        model::check_point(y, self.d)?;
        Ok(model::point_density(
            y,
            &self.y,
            self.d,
            self.current_log_hy().exp(),
        ))
    }

    /// Runs gradient descent with adaptive step size on the parameters.
    pub fn train(&mut self, max_steps: usize, step_size: f64) -> Result<TrainSummary, Error> {
        GradientDescent::new(step_size, max_steps).minimize(self)
    }
}

impl Objective for Kie {
    fn params(&self) -> &[f64] {
        &self.params
    }

    fn set_params(&mut self, params: &[f64]) -> Result<(), Error> {
        if params.len() != self.params.len() {
            return Err(Error::InvalidDimension(format!(
                "parameter vector length {} does not match the expected {}",
                params.len(),
                self.params.len()
            )));
        }
        self.params.copy_from_slice(params);
        Ok(())
    }

    fn cost(&mut self) -> Result<f64, Error> {
        Kie::cost(self)
    }

    fn grad(&mut self) -> Result<Vec<f64>, Error> {
        Kie::grad(self)
    }
}
