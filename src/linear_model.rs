//! Ordinary least-squares linear model.
//!
//! Used standalone (`ModelType::LinearRegression`) and as the trend for
//! Universal Kriging: the linear prediction is subtracted from `y` before
//! Kriging is fit on the residual (spec.md section 4.2).

use nalgebra::{DMatrix, DVector, RowDVector};

use crate::bounds::Bounds;
use crate::data::{DataTable, RowSchema};
use crate::design::ModelType;
use crate::error::{Error, Result};
use crate::surrogate::{Surrogate, SurrogateBase};

/// `y ≈ w_0 + w^T x`, fit by closed-form normal equations with a small-ridge
/// fallback when the normal-equation matrix is singular.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "rodeo_serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LinearModel {
    /// `weights[0]` is the bias; `weights[1..]` are the per-dimension slopes.
    weights: DVector<f64>,
}

const RIDGE_EPSILON: f64 = 1e-8;

impl LinearModel {
    /// An all-zero model over `dimension` inputs.
    pub fn zeros(dimension: usize) -> Self {
        LinearModel { weights: DVector::zeros(dimension + 1) }
    }

    /// Fits `w` by solving the normal equations `(X^T X) w = X^T y` (`X` with
    /// a prepended bias column), falling back to a ridge-regularized solve if
    /// `X^T X` is singular.
    pub fn fit(inputs_normalized: &DMatrix<f64>, outputs: &DVector<f64>) -> Result<Self> {
        let n = inputs_normalized.nrows();
        if n == 0 {
            return Err(Error::Numerical("cannot fit linear model with zero samples".into()));
        }
        let design = inputs_normalized.clone().insert_column(0, 1.0);
        let gram = design.transpose() * &design;
        let rhs = design.transpose() * outputs;

        let weights = match gram.clone().lu().solve(&rhs) {
            Some(w) => w,
            None => {
                let ridge = &gram + DMatrix::identity(gram.nrows(), gram.ncols()) * RIDGE_EPSILON;
                ridge
                    .lu()
                    .solve(&rhs)
                    .ok_or_else(|| Error::Numerical("linear model normal equations singular even after ridge fallback".into()))?
            }
        };
        Ok(LinearModel { weights })
    }

    /// Predicts at a single normalized input.
    pub fn predict(&self, x_normalized: &DVector<f64>) -> f64 {
        self.weights[0] + (1..self.weights.nrows()).map(|i| self.weights[i] * x_normalized[i - 1]).sum::<f64>()
    }

    /// Predicts for every row of a normalized input matrix.
    pub fn predict_batch(&self, inputs_normalized: &DMatrix<f64>) -> DVector<f64> {
        DVector::from_fn(inputs_normalized.nrows(), |r, _| {
            let row = inputs_normalized.row(r);
            self.weights[0] + (1..self.weights.nrows()).map(|i| self.weights[i] * row[i - 1]).sum::<f64>()
        })
    }

    pub fn weights(&self) -> &DVector<f64> {
        &self.weights
    }
}

/// `ModelType::LinearRegression` used standalone: a `LinearModel` plus the
/// `SurrogateBase`/`DataTable` bookkeeping every concrete surrogate carries,
/// so it can sit behind the `Surrogate` capability set alongside Kriging and
/// its relatives (spec.md section 3, `modelType` tag).
#[derive(Clone, Debug)]
pub struct LinearSurrogate {
    base: SurrogateBase,
    data: DataTable,
    model: LinearModel,
}

impl LinearSurrogate {
    pub fn new(dimension: usize, bounds: Bounds) -> Self {
        LinearSurrogate {
            base: SurrogateBase::new(dimension, bounds, ModelType::LinearRegression),
            data: DataTable::new(RowSchema::plain(dimension)),
            model: LinearModel::zeros(dimension),
        }
    }

    pub fn add_sample(&mut self, x: DVector<f64>, y: f64) -> Result<bool> {
        let xn = self.base.bounds.normalize(&x);
        if self.data.len() > 0 && self.data.is_duplicate(&xn, 1e-8) {
            return Ok(false);
        }
        let row = DataTable::compose_row(&RowDVector::from_iterator(x.nrows(), x.iter().copied()), y, None, None);
        self.data.append_row(row)?;
        Ok(true)
    }
}

impl Surrogate for LinearSurrogate {
    fn dimension(&self) -> usize {
        self.base.dimension
    }

    fn num_samples(&self) -> usize {
        self.data.len()
    }

    fn is_initialized(&self) -> bool {
        self.base.if_initialized
    }

    fn model_type(&self) -> ModelType {
        ModelType::LinearRegression
    }

    fn bounds(&self) -> &Bounds {
        &self.base.bounds
    }

    fn train(&mut self) -> Result<()> {
        let xn = self.base.bounds.normalize_matrix(&self.data.inputs());
        self.model = LinearModel::fit(&xn, &self.data.outputs())?;
        self.base.if_initialized = true;
        Ok(())
    }

    fn predict(&self, x: &DVector<f64>) -> Result<f64> {
        if !self.base.if_initialized {
            return Err(Error::ModelBind("linear model predicted before training".into()));
        }
        Ok(self.model.predict(&self.base.bounds.normalize(x)))
    }

    /// No native variance estimate; returns `0.0` as [`Surrogate::predict_with_variance`] documents.
    fn predict_with_variance(&self, x: &DVector<f64>) -> Result<(f64, f64)> {
        Ok((self.predict(x)?, 0.0))
    }

    fn y_min(&self) -> Option<f64> {
        if self.data.is_empty() {
            None
        } else {
            Some(self.data.outputs().min())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn fits_exact_linear_function() {
        // y = 2 + 3*x0 - x1
        let inputs = DMatrix::from_row_slice(4, 2, &[0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        let outputs = DVector::from_vec(vec![2.0, 5.0, 1.0, 4.0]);
        let model = LinearModel::fit(&inputs, &outputs).unwrap();
        for r in 0..4 {
            let x = inputs.row(r).transpose();
            assert_abs_diff_eq!(model.predict(&x), outputs[r], epsilon = 1e-8);
        }
    }

    #[test]
    fn ridge_fallback_on_singular_design() {
        // two identical columns -> singular X^T X without ridge
        let inputs = DMatrix::from_row_slice(3, 2, &[0.0, 0.0, 1.0, 1.0, 2.0, 2.0]);
        let outputs = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        let model = LinearModel::fit(&inputs, &outputs);
        assert!(model.is_ok());
    }

    #[test]
    fn linear_surrogate_round_trips_through_the_surrogate_trait() {
        let bounds = Bounds::uniform(2, 0.0, 1.0).unwrap();
        let mut surrogate = LinearSurrogate::new(2, bounds);
        for &(x0, x1) in &[(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)] {
            let x = DVector::from_vec(vec![x0, x1]);
            surrogate.add_sample(x, 2.0 + 3.0 * x0 - x1).unwrap();
        }
        surrogate.train().unwrap();
        let p = surrogate.predict(&DVector::from_vec(vec![0.5, 0.5])).unwrap();
        assert_abs_diff_eq!(p, 2.0 + 3.0 * 0.5 - 0.5, epsilon = 1e-8);
        let (_mu, s2) = surrogate.predict_with_variance(&DVector::from_vec(vec![0.5, 0.5])).unwrap();
        assert_eq!(s2, 0.0);
    }
}
