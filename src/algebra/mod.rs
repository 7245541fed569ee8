//! Linear-algebra helpers layered on top of `nalgebra`: the Cholesky-based
//! solves every Kriging-family model shares, and the correlation kernel.

pub mod correlation;

pub use correlation::{correlation_matrix, correlation_vector, kernel};

use nalgebra::{Cholesky, DMatrix};

use crate::error::{Error, Result};

/// Upper-triangular Cholesky factor `U` such that `R = U^T U`, with jitter
/// `epsilon * I` added to the diagonal first (spec.md section 4.3).
///
/// Returns `NumericalError` if `R + epsilon*I` is not positive definite,
/// mirroring spec.md's "else report ill-conditioning".
pub fn cholesky_upper(r: &DMatrix<f64>, epsilon: f64) -> Result<DMatrix<f64>> {
    let jittered = r + DMatrix::identity(r.nrows(), r.ncols()) * epsilon;
    let chol = Cholesky::new(jittered)
        .ok_or_else(|| Error::Numerical("correlation matrix is not positive definite after jitter".into()))?;
    // nalgebra's Cholesky stores the lower factor L (R = L L^T); U = L^T.
    Ok(chol.l().transpose())
}

/// Solves `R x = b` given the lower-Cholesky decomposition implied by the
/// upper factor `U` (`R = U^T U`), i.e. forward/back substitution through
/// `U^T` then `U`.
pub fn cholesky_solve(u: &DMatrix<f64>, b: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    // U^T y = b, then U x = y
    let y = u
        .transpose()
        .lu()
        .solve(b)
        .ok_or_else(|| Error::Numerical("forward substitution against Cholesky factor failed".into()))?;
    u.lu().solve(&y).ok_or_else(|| Error::Numerical("back substitution against Cholesky factor failed".into()))
}

/// `log|R|` from its Cholesky factor: `2 * sum(log(diag(U)))`.
pub fn log_determinant_from_cholesky(u: &DMatrix<f64>) -> f64 {
    2.0 * (0..u.nrows()).map(|i| u[(i, i)].abs().ln()).sum::<f64>()
}
