//! # kie
//!
//! `kie` contains implementations of kernel information embeddings, a family
//! of probabilistic non-parametric dimensionality reduction algorithms.
//!
//! Unlike most standard embedding methods (such as LLE, kernel PCA, UKR or
//! Laplacian eigenmaps) kernel information embeddings come with both forward
//! and backward mappings. After computing an embedding it is therefore
//! possible to compute low-dimensional codes for new, previously unseen
//! data, to produce fantasy data by mapping latent elements into the data
//! space, or to project data cases onto the learned manifold, for example in
//! order to perform de-noising.
//!
//! Embeddings are computed with [`Kie`] (simple kernel information
//! embeddings) and [`Cie`] (conditional kernel information embeddings). Both
//! expose a flat parameter vector together with cost and gradient functions
//! through the [`Objective`] trait, so any non-linear unconstrained
//! optimizer can drive them; a `train` method running [`GradientDescent`] is
//! provided for convenience.
//!
//! # Example
//!
//! ```
//! use kie::Kie;
//!
//! let d = 2; // Dimensionality of the original space.
//! let q = 1; // Dimensionality of the latent space.
//!
//! // Eight noisy points along a line, one example per column.
//! let y = vec![
//!     0.0, 0.1, 1.0, 1.1, 2.0, 1.9, 3.0, 3.1, 4.0, 3.9, 5.0, 5.1, 6.0, 6.1, 7.0, 6.9,
//! ];
//!
//! // Bandwidth 1.0, light regularization, no leave-one-out, fixed bandwidth.
//! let mut model = Kie::new(q, 1.0, y, d, 0.01, false, false).unwrap();
//! let summary = model.train(100, 0.01).unwrap();
//!
//! // One latent coordinate per example, ready for the forward mapping.
//! assert_eq!(model.embedding().len(), 8);
//! let fantasy = model.forward(&[0.5]).unwrap();
//! assert_eq!(fantasy.len(), d);
//! assert!(summary.cost.is_finite());
//! ```
//!
//! For more information on kernel information embeddings see:
//! Memisevic, R. (2006). "Kernel information embeddings". In: Proceedings of
//! the 23rd International Conference on Machine Learning (ICML 2006).

pub mod kernel;
mod model;
mod optimize;

pub use model::{Cie, Kie, Penalty, SquaredNorm};
pub use optimize::{GradientDescent, Objective, TrainSummary};

#[cfg(feature = "csv")]
use std::path::Path;

use thiserror::Error;

/// Errors raised by model construction, evaluation and checkpointing.
#[derive(Debug, Error)]
pub enum Error {
    /// A structural precondition on matrix shapes or sizes was violated.
    #[error("invalid dimension: {0}")]
    InvalidDimension(String),
    /// A kernel bandwidth was not strictly positive and finite.
    #[error("invalid bandwidth: {0}, bandwidths must be positive and finite")]
    InvalidBandwidth(f64),
    /// Every entry of a log-kernel row was masked out or `-inf`, so its
    /// normalization is undefined.
    #[error("degenerate row {row}: every entry is masked out or -inf")]
    DegenerateRow {
        /// Index of the offending row.
        row: usize,
    },
    /// The raw side information matrix was not retained at construction.
    #[error("no side information matrix, the model was built from a precomputed kernel")]
    NoSideData,
    /// A csv read or write failed.
    #[cfg(feature = "csv")]
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    /// A checkpoint flush failed.
    #[cfg(feature = "csv")]
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// A checkpoint entry could not be parsed back into a float.
    #[cfg(feature = "csv")]
    #[error("invalid checkpoint entry: {0}")]
    Parse(#[from] std::num::ParseFloatError),
}

/// Writes a flat parameter vector to a csv file, one value per record.
///
/// Together with [`read_params_csv`] and [`Objective::set_params`] this
/// checkpoints and restores model state bit-for-bit: values are written in
/// Rust's shortest round-tripping decimal form.
///
/// # Arguments
///
/// * `file_path` - path of the file to write the checkpoint to.
///
/// * `params` - the parameter vector, as returned by [`Objective::params`].
#[cfg(feature = "csv")]
pub fn write_params_csv<P: AsRef<Path>>(file_path: P, params: &[f64]) -> Result<(), Error> {
    let mut wtr = csv::Writer::from_path(file_path)?;
    for value in params {
        wtr.write_record([value.to_string()])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Reads a flat parameter vector back from a csv checkpoint.
///
/// # Arguments
///
/// * `file_path` - path of the file to read the checkpoint from.
#[cfg(feature = "csv")]
pub fn read_params_csv<P: AsRef<Path>>(file_path: P) -> Result<Vec<f64>, Error> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(file_path)?;
    let mut params = Vec::new();
    for result in rdr.records() {
        let record = result?;
        for field in record.iter() {
            params.push(field.parse()?);
        }
    }
    Ok(params)
}

/// Writes a latent coordinate matrix to a csv file, one example per record.
///
/// # Arguments
///
/// * `file_path` - path of the file to write the embedding to.
///
/// * `embedding` - the latent matrix, `q` contiguous values per example.
///
/// * `q` - dimensionality of the latent space. Two- and three-dimensional
///   embeddings get `x,y[,z]` headers, any other dimensionality none.
#[cfg(feature = "csv")]
pub fn write_embedding_csv<P: AsRef<Path>>(
    file_path: P,
    embedding: &[f64],
    q: usize,
) -> Result<(), Error> {
    if q == 0 || embedding.len() % q != 0 {
        return Err(Error::InvalidDimension(format!(
            "embedding length {} is not a positive multiple of the latent dimensionality {q}",
            embedding.len()
        )));
    }
    let mut wtr = csv::Writer::from_path(file_path)?;
    match q {
        2 => wtr.write_record(["x", "y"])?,
        3 => wtr.write_record(["x", "y", "z"])?,
        _ => (),
    }
    for example in embedding.chunks(q) {
        wtr.write_record(example.iter().map(|v| v.to_string()))?;
    }
    wtr.flush()?;
    Ok(())
}
