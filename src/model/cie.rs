use rayon::prelude::*;

use crate::Error;
use crate::model::{self, Penalty, SquaredNorm};
use crate::optimize::{GradientDescent, Objective, TrainSummary};

/// Side information retained for the joint forward mapping.
struct Side {
    x: Vec<f64>,
    dim: usize,
}

/// Conditional kernel information embedding.
///
/// Computes a conditional embedding of data by factoring out known
/// information: the objective is conditioned on a fixed kernel `KX` over side
/// data, through elementwise `KZ·KX` and `KZ·KX·KY` products. Both data
/// kernels are precomputed at construction and never relearned.
pub struct Cie {
    q: usize,
    d: usize,
    n: usize,
    reg: f64,
    y: Vec<f64>,
    hy: f64,
    ky: Vec<f64>,
    kx: Vec<f64>,
    side: Option<Side>,
    params: Vec<f64>,
    penalty: Box<dyn Penalty + Send + Sync>,
    /// n×n scratch for the latent kernel, reused across cost and gradient
    /// evaluations.
    kz: Vec<f64>,
}

impl Cie {
    /// Creates a conditional embedding model from raw data and side
    /// information matrices, with a random latent initialization of scale
    /// `0.1`.
    ///
    /// # Arguments
    ///
    /// * `q` - dimensionality of the latent space, at least 1.
    ///
    /// * `y` - data matrix, `d` contiguous values per example.
    ///
    /// * `d` - dimensionality of the data space.
    ///
    /// * `hy` - data space kernel bandwidth, strictly positive.
    ///
    /// * `x` - side information matrix, `p` contiguous values per example,
    ///   with the same number of examples as `y`.
    ///
    /// * `p` - dimensionality of the side information space.
    ///
    /// * `hx` - side information kernel bandwidth, strictly positive.
    ///
    /// * `reg` - non-negative regularization weight.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        q: usize,
        y: Vec<f64>,
        d: usize,
        hy: f64,
        x: Vec<f64>,
        p: usize,
        hx: f64,
        reg: f64,
    ) -> Result<Self, Error> {
        let (n, mut model) = Self::build(q, y, d, hy, reg)?;
        if p == 0 || x.len() != p * n {
            return Err(Error::InvalidDimension(format!(
                "side information length {} does not hold {} examples of dimensionality {}",
                x.len(),
                n,
                p
            )));
        }
        model::check_bandwidth(hx)?;
        model.kx = model::data_kernel(&x, p, hx);
        model.side = Some(Side { x, dim: p });
        Ok(model)
    }

    /// Creates a conditional embedding model from a precomputed n×n side
    /// information kernel. The raw side data is not available to such a
    /// model, so [`forwardxz`](Cie::forwardxz) is not either.
    pub fn with_side_kernel(
        q: usize,
        y: Vec<f64>,
        d: usize,
        hy: f64,
        kx: Vec<f64>,
        reg: f64,
    ) -> Result<Self, Error> {
        let (n, mut model) = Self::build(q, y, d, hy, reg)?;
        if kx.len() != n * n {
            return Err(Error::InvalidDimension(format!(
                "side kernel length {} is not {n}×{n}",
                kx.len()
            )));
        }
        model.kx = kx;
        Ok(model)
    }

    fn build(q: usize, y: Vec<f64>, d: usize, hy: f64, reg: f64) -> Result<(usize, Self), Error> {
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

        let ky = model::data_kernel(&y, d, hy);
        let model = Self {
            q,
            d,
            n,
            reg,
            y,
            hy,
            ky,
            kx: Vec::new(),
            side: None,
            params: model::random_latent(q * n, 0.1),
            penalty: Box::new(SquaredNorm),
            kz: vec![0.0; n * n],
        };
        Ok((n, model))
    }

    /// Replaces the regularization penalty.
    pub fn penalty(&mut self, penalty: Box<dyn Penalty + Send + Sync>) -> &mut Self {
        self.penalty = penalty;
        self
    }

    /// The latent coordinate matrix, `q` contiguous values per example.
    pub fn embedding(&self) -> &[f64] {
        &self.params
    }

    /// Row sums of `KZ·KX` and `KZ·KX·KY` for the latent kernel currently in
    /// the scratch buffer.
    fn conditional_sums(&self) -> Result<(Vec<f64>, Vec<f64>), Error> {
        let n = self.n;
        let mut sum_kzkx = vec![0.0; n];
        let mut sum_kzkxky = vec![0.0; n];
        for i in 0..n {
            for j in 0..n {
                let kzx = self.kz[i * n + j] * self.kx[i * n + j];
                sum_kzkx[i] += kzx;
                sum_kzkxky[i] += kzx * self.ky[i * n + j];
            }
            if !(sum_kzkx[i] > 0.0) || !(sum_kzkxky[i] > 0.0) {
                return Err(Error::DegenerateRow { row: i });
            }
        }
        Ok((sum_kzkx, sum_kzkxky))
    }

    /// Evaluates the conditional embedding objective at the current
    /// parameters.
    pub fn cost(&mut self) -> Result<f64, Error> {
        let n = self.n;
        model::latent_kernel(&self.params, self.q, &mut self.kz);
        let (sum_kzkx, sum_kzkxky) = self.conditional_sums()?;

        let mut sum = 0.0;
        for i in 0..n {
            sum += sum_kzkx[i].ln() - sum_kzkxky[i].ln();
        }
        let mut cost = sum / n as f64;
        cost += self.reg / n as f64 * self.penalty.value(self.embedding());
        Ok(cost)
    }

    /// Evaluates the analytic gradient of [`cost`](Cie::cost) with respect to
    /// the parameter vector.
    pub fn grad(&mut self) -> Result<Vec<f64>, Error> {
        let (q, n) = (self.q, self.n);
        model::latent_kernel(&self.params, q, &mut self.kz);
        let (sum_kzkx, sum_kzkxky) = self.conditional_sums()?;

        let mut grad = vec![0.0; self.params.len()];
        let z = self.embedding();
        let kz = &self.kz;
        let kx = &self.kx;
        let ky = &self.ky;
        let scale = -2.0 / n as f64;

        grad.par_chunks_mut(q).enumerate().for_each(|(l, gl)| {
            let zl = &z[l * q..(l + 1) * q];
            for j in 0..n {
                let kxy = kx[l * n + j] * ky[l * n + j];
                let weight = kz[l * n + j]
                    * (kx[l * n + j] / sum_kzkx[l] + kx[l * n + j] / sum_kzkx[j]
                        - kxy / sum_kzkxky[l]
                        - kxy / sum_kzkxky[j]);
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
        Ok(grad)
    }

    /// Maps latent points to their expected data space images, as in
    /// [`Kie::forward`](crate::Kie::forward).
    pub fn forward(&self, z: &[f64]) -> Result<Vec<f64>, Error> {
        model::check_query(z, self.q)?;
        let logk = model::query_log_kernel(z, self.embedding(), self.q, 1.0);
        model::kernel_regression(&logk, self.n, &self.y, self.d)
    }

    /// Maps data points to their expected latent coordinates.
    pub fn backward(&self, y: &[f64]) -> Result<Vec<f64>, Error> {
        model::check_query(y, self.d)?;
        let logk = model::query_log_kernel(y, &self.y, self.d, self.hy);
        model::kernel_regression(&logk, self.n, self.embedding(), self.q)
    }

    /// Expected data space image of a single latent point and a single side
    /// information point jointly.
    ///
    /// Only available when the model was built from raw side data; returns
    /// [`Error::NoSideData`] otherwise.
    pub fn forwardxz(&self, x: &[f64], z: &[f64]) -> Result<Vec<f64>, Error> {
        let side = self.side.as_ref().ok_or(Error::NoSideData)?;
        model::check_point(z, self.q)?;
        model::check_point(x, side.dim)?;

        let latent = self.embedding();
        let mut logk = vec![0.0; self.n];
        for j in 0..self.n {
            let mut dz = 0.0;
            for (r, &v) in z.iter().enumerate() {
                let t = v - latent[j * self.q + r];
                dz += t * t;
            }
            let mut dx = 0.0;
            for (r, &v) in x.iter().enumerate() {
                let t = v - side.x[j * side.dim + r];
                dx += t * t;
            }
            logk[j] = -dz - dx;
        }
        model::kernel_regression(&logk, self.n, &self.y, self.d)
    }

    /// Projects data points onto the learned manifold.
    pub fn project(&self, y: &[f64]) -> Result<Vec<f64>, Error> {
        self.forward(&self.backward(y)?)
    }

    /// Runs gradient descent with adaptive step size on the parameters.
    pub fn train(&mut self, max_steps: usize, step_size: f64) -> Result<TrainSummary, Error> {
        GradientDescent::new(step_size, max_steps).minimize(self)
    }
}

impl Objective for Cie {
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
        Cie::cost(self)
    }

    fn grad(&mut self) -> Result<Vec<f64>, Error> {
        Cie::grad(self)
    }
}
