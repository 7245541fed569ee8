//! Ordinary and Universal Kriging.
//!
//! Spec.md section 4.3. The correlation matrix, its Cholesky factor, and the
//! precomputed `R^-1(y - beta0*1)`/`R^-1*1` vectors live here; the
//! evolutionary hyperparameter search lives in [`train`]/[`ga`].

pub mod ga;
pub mod train;

use std::fs;
use std::path::Path;

use nalgebra::{DMatrix, DVector, RowDVector};

use crate::algebra::correlation::correlation_vector_gradient;
use crate::algebra::{cholesky_solve, cholesky_upper, correlation_matrix, correlation_vector};
use crate::bounds::Bounds;
use crate::data::{DataTable, RowSchema};
use crate::design::ModelType;
use crate::error::{Error, Result};
use crate::linear_model::LinearModel;
use crate::surrogate::{Surrogate, SurrogateBase};

/// Default correlation-matrix jitter, per spec.md section 4.3 (`epsilon ~= 1e-10`).
pub const DEFAULT_JITTER: f64 = 1e-10;
/// Infinity-norm rejection threshold for near-duplicate samples (spec.md section 4.3).
pub const DUPLICATE_TOLERANCE: f64 = 1e-8;

#[derive(Clone, Debug)]
pub struct KrigingModel {
    base: SurrogateBase,
    data: DataTable,
    normalized_inputs: DMatrix<f64>,

    pub theta: DVector<f64>,
    pub gamma: DVector<f64>,
    pub epsilon: f64,

    /// `K(X,X) + epsilon*I`.
    r: DMatrix<f64>,
    /// Upper Cholesky factor of `r`.
    u: DMatrix<f64>,
    beta0: f64,
    sigma_sqr: f64,
    /// `R^-1 (y - beta0*1)`.
    r_inv_ys_min_beta: DVector<f64>,
    /// `R^-1 * 1`.
    r_inv_one: DVector<f64>,

    /// `Some` for Universal Kriging: the trend fit on the raw outputs,
    /// subtracted before Kriging is fit on the residual (spec.md section 4.2).
    trend: Option<LinearModel>,

    pub train_config: train::TrainConfig,
}

impl KrigingModel {
    pub fn new(dimension: usize, bounds: Bounds, universal: bool) -> Self {
        let model_type = if universal { ModelType::UniversalKriging } else { ModelType::OrdinaryKriging };
        KrigingModel {
            base: SurrogateBase::new(dimension, bounds, model_type),
            data: DataTable::new(RowSchema::plain(dimension)),
            normalized_inputs: DMatrix::zeros(0, dimension),
            theta: DVector::from_element(dimension, 1.0),
            gamma: DVector::from_element(dimension, 2.0),
            epsilon: DEFAULT_JITTER,
            r: DMatrix::zeros(0, 0),
            u: DMatrix::zeros(0, 0),
            beta0: 0.0,
            sigma_sqr: 0.0,
            r_inv_ys_min_beta: DVector::zeros(0),
            r_inv_one: DVector::zeros(0),
            trend: if universal { Some(LinearModel::zeros(dimension)) } else { None },
            train_config: train::TrainConfig::default(),
        }
    }

    pub fn is_universal(&self) -> bool {
        self.trend.is_some()
    }

    /// Appends one `(x, y)` sample in natural scale, rejecting it as a
    /// near-duplicate (within `DUPLICATE_TOLERANCE` in normalized
    /// infinity-norm) of an existing row. Returns whether the sample was
    /// actually added.
    pub fn add_sample(&mut self, x: DVector<f64>, y: f64) -> Result<bool> {
        let xn = self.base.bounds.normalize(&x);
        if self.data.len() > 0 && self.data.is_duplicate(&xn, DUPLICATE_TOLERANCE) {
            log::debug!("kriging: rejected near-duplicate sample at {:?}", x);
            return Ok(false);
        }
        let row = DataTable::compose_row(&RowDVector::from_iterator(x.nrows(), x.iter().copied()), y, None, None);
        self.data.append_row(row)?;
        self.rebuild_normalized_inputs();
        Ok(true)
    }

    fn rebuild_normalized_inputs(&mut self) {
        self.normalized_inputs = self.base.bounds.normalize_matrix(&self.data.inputs());
    }

    /// Trains hyperparameters via the parallel evolutionary search (spec.md
    /// section 4.3), then re-runs `refresh_auxiliary`. On failure, the
    /// caller's previous `theta`/`gamma` are left untouched, per spec.md's
    /// "Failure semantics" (the iteration reuses previously valid
    /// hyperparameters).
    pub fn train_hyperparameters(&mut self) -> Result<()> {
        if self.data.len() < 2 {
            return Err(Error::Numerical("need at least 2 samples to train Kriging hyperparameters".into()));
        }
        let (residual_y, trend) = self.fit_trend_and_residual()?;
        let warm_start = Some((self.theta.clone(), self.gamma.clone()));
        match train::train(&self.normalized_inputs, &residual_y, self.epsilon, self.base.dimension, warm_start, self.train_config) {
            Ok((theta, gamma, _ll)) => {
                self.theta = theta;
                self.gamma = gamma;
                self.trend = trend;
                self.refresh_auxiliary()?;
                self.base.if_initialized = true;
                log::info!("kriging: trained theta={:?} gamma={:?} sigma2={}", self.theta, self.gamma, self.sigma_sqr);
                Ok(())
            }
            Err(e) => {
                log::warn!("kriging: hyperparameter training failed ({e}); keeping previous hyperparameters");
                Err(e)
            }
        }
    }

    fn fit_trend_and_residual(&self) -> Result<(DVector<f64>, Option<LinearModel>)> {
        let y = self.data.outputs();
        if self.is_universal() {
            let trend = LinearModel::fit(&self.normalized_inputs, &y)?;
            let residual = &y - trend.predict_batch(&self.normalized_inputs);
            Ok((residual, Some(trend)))
        } else {
            Ok((y, None))
        }
    }

    /// Recomputes `R`, its Cholesky factor, `beta0`, `sigma^2`, and the two
    /// precomputed solve vectors from the current `theta`/`gamma`/`epsilon`
    /// and training data, without re-running the evolutionary search
    /// (spec.md section 4.9 step 2, "otherwise just refresh auxiliary
    /// fields with newly added rows").
    pub fn refresh_auxiliary(&mut self) -> Result<()> {
        let n = self.data.len();
        if n == 0 {
            return Err(Error::ModelBind("cannot refresh auxiliary fields with zero samples".into()));
        }
        let (residual_y, _trend) = self.fit_trend_and_residual_keep_existing()?;
        let r_base = correlation_matrix(&self.normalized_inputs, &self.theta, &self.gamma);
        let u = cholesky_upper(&r_base, self.epsilon)?;
        let r = &r_base + DMatrix::identity(n, n) * self.epsilon;

        let ones = DVector::from_element(n, 1.0);
        let a = cholesky_solve_vec(&u, &residual_y)?;
        let b = cholesky_solve_vec(&u, &ones)?;
        let beta0 = ones.dot(&a) / ones.dot(&b);
        let residual = &residual_y - &ones * beta0;
        let w = cholesky_solve_vec(&u, &residual)?;
        let sigma_sqr = residual.dot(&w) / n as f64;
        if !(sigma_sqr > 0.0) {
            return Err(Error::Numerical(format!("sigma^2 = {sigma_sqr} <= 0 after refresh")));
        }

        self.r = r;
        self.u = u;
        self.beta0 = beta0;
        self.sigma_sqr = sigma_sqr;
        self.r_inv_ys_min_beta = w;
        self.r_inv_one = b;
        self.base.if_initialized = true;
        Ok(())
    }

    fn fit_trend_and_residual_keep_existing(&mut self) -> Result<(DVector<f64>, ())> {
        let y = self.data.outputs();
        if self.is_universal() {
            if self.trend.is_none() {
                self.trend = Some(LinearModel::fit(&self.normalized_inputs, &y)?);
            }
            let trend = self.trend.as_ref().expect("set above");
            let residual = &y - trend.predict_batch(&self.normalized_inputs);
            Ok((residual, ()))
        } else {
            Ok((y, ()))
        }
    }

    /// `t(x) = beta0` for ordinary Kriging, `t(x) = beta0 + trend(x)` for
    /// Universal Kriging (spec.md section 4.3).
    fn trend_value(&self, xn: &DVector<f64>) -> f64 {
        match &self.trend {
            Some(model) => model.predict(xn) + self.beta0,
            None => self.beta0,
        }
    }

    pub fn y_min_value(&self) -> Option<f64> {
        if self.data.is_empty() {
            None
        } else {
            Some(self.data.outputs().min())
        }
    }

    pub fn num_samples_value(&self) -> usize {
        self.data.len()
    }

    /// Closed-form gradient of the predicted mean w.r.t. the natural-scale
    /// design vector, via the chain rule through normalization.
    pub fn predict_gradient(&self, x: &DVector<f64>) -> Result<DVector<f64>> {
        self.require_initialized()?;
        let xn = self.base.bounds.normalize(x);
        let train = self.normalized_inputs.clone();
        let mut grad = DVector::zeros(self.base.dimension);
        for k in 0..self.base.dimension {
            let dr_dxk = correlation_vector_gradient(&to_row(&xn), &train, &self.theta, &self.gamma, k);
            let scale = 1.0 / (self.base.bounds.ub()[k] - self.base.bounds.lb()[k]);
            let trend_grad = match &self.trend {
                Some(model) => model.weights()[k + 1],
                None => 0.0,
            };
            grad[k] = (trend_grad + dr_dxk.dot(&self.r_inv_ys_min_beta)) * scale;
        }
        Ok(grad)
    }

    /// Closed-form gradient of the predicted variance w.r.t. the
    /// natural-scale design vector.
    pub fn variance_gradient(&self, x: &DVector<f64>) -> Result<DVector<f64>> {
        self.require_initialized()?;
        let xn = self.base.bounds.normalize(x);
        let xn_row = to_row(&xn);
        let train = self.normalized_inputs.clone();
        let r = correlation_vector(&xn_row, &train, &self.theta, &self.gamma);
        let r_inv_r = cholesky_solve_vec(&self.u, &r)?;
        let r_dot_b = r.dot(&self.r_inv_one);
        let sum_b = self.r_inv_one.sum();

        let mut grad = DVector::zeros(self.base.dimension);
        for k in 0..self.base.dimension {
            let dr_dxk = correlation_vector_gradient(&xn_row, &train, &self.theta, &self.gamma, k);
            let scale = 1.0 / (self.base.bounds.ub()[k] - self.base.bounds.lb()[k]);
            let d_s2 = self.sigma_sqr * (-2.0 * dr_dxk.dot(&r_inv_r) + 2.0 * (r_dot_b - 1.0) * dr_dxk.dot(&self.r_inv_one) / sum_b);
            grad[k] = d_s2 * scale;
        }
        Ok(grad)
    }

    fn require_initialized(&self) -> Result<()> {
        if !self.base.if_initialized {
            Err(Error::ModelBind("Kriging model predicted before training".into()))
        } else {
            Ok(())
        }
    }

    /// Persists `[theta_1..theta_d, gamma_1..gamma_d]` as one CSV row, per
    /// spec.md section 6 (`<label>_kriging_hyperparameters.csv`).
    pub fn save_hyperparameters(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut row: Vec<f64> = self.theta.iter().copied().collect();
        row.extend(self.gamma.iter().copied());
        let line = row.iter().map(|v| format!("{v:.15e}")).collect::<Vec<_>>().join(",");
        fs::write(path.as_ref(), line + "\n").map_err(|e| Error::Io(e.to_string()))
    }

    /// Loads `[theta_1..theta_d, gamma_1..gamma_d]` from a hyperparameter
    /// CSV row and re-runs `refresh_auxiliary` so predictions immediately
    /// match a freshly trained model (spec.md section 8, "round-trip" property).
    pub fn load_hyperparameters(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| Error::Io(e.to_string()))?;
        let values: Vec<f64> = content
            .trim()
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<f64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Io(e.to_string()))?;
        let d = self.base.dimension;
        if values.len() != 2 * d {
            return Err(Error::Io(format!("expected {} hyperparameters, got {}", 2 * d, values.len())));
        }
        self.theta = DVector::from_row_slice(&values[..d]);
        self.gamma = DVector::from_row_slice(&values[d..]);
        self.refresh_auxiliary()
    }
}

fn to_row(v: &DVector<f64>) -> RowDVector<f64> {
    RowDVector::from_iterator(v.nrows(), v.iter().copied())
}

fn cholesky_solve_vec(u: &DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>> {
    let b_mat = DMatrix::from_column_slice(b.nrows(), 1, b.as_slice());
    let x = cholesky_solve(u, &b_mat)?;
    Ok(DVector::from_column_slice(x.as_slice()))
}

impl Surrogate for KrigingModel {
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
        self.base.model_type
    }

    fn bounds(&self) -> &Bounds {
        &self.base.bounds
    }

    fn train(&mut self) -> Result<()> {
        self.train_hyperparameters()
    }

    fn refresh(&mut self) -> Result<()> {
        self.refresh_auxiliary()
    }

    fn predict(&self, x: &DVector<f64>) -> Result<f64> {
        self.require_initialized()?;
        let xn = self.base.bounds.normalize(x);
        let r = correlation_vector(&to_row(&xn), &self.normalized_inputs, &self.theta, &self.gamma);
        Ok(self.trend_value(&xn) + r.dot(&self.r_inv_ys_min_beta))
    }

    fn predict_with_variance(&self, x: &DVector<f64>) -> Result<(f64, f64)> {
        self.require_initialized()?;
        let xn = self.base.bounds.normalize(x);
        let xn_row = to_row(&xn);
        let r = correlation_vector(&xn_row, &self.normalized_inputs, &self.theta, &self.gamma);
        let mean = self.trend_value(&xn) + r.dot(&self.r_inv_ys_min_beta);

        let r_inv_r = cholesky_solve_vec(&self.u, &r)?;
        let r_dot_r_inv_r = r.dot(&r_inv_r);
        let r_dot_b = r.dot(&self.r_inv_one);
        let sum_b = self.r_inv_one.sum();
        let variance = (self.sigma_sqr * (1.0 - r_dot_r_inv_r + (r_dot_b - 1.0).powi(2) / sum_b)).max(0.0);
        Ok((mean, variance))
    }

    fn y_min(&self) -> Option<f64> {
        self.y_min_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sum_of_squares_model(dimension: usize, n_per_dim: usize) -> KrigingModel {
        let bounds = Bounds::uniform(dimension, -1.0, 1.0).unwrap();
        let mut model = KrigingModel::new(dimension, bounds, false);
        let mut rng = rand::thread_rng();
        use rand::Rng;
        for _ in 0..n_per_dim {
            let x = DVector::from_fn(dimension, |_, _| rng.gen_range(-1.0..1.0));
            let y: f64 = x.iter().map(|v| v * v).sum();
            model.add_sample(x, y).unwrap();
        }
        model.train_config.evaluations_per_thread = 600;
        model.train_config.threads = 2;
        model.train_hyperparameters().unwrap();
        model
    }

    #[test]
    fn interpolates_training_points() {
        let model = sum_of_squares_model(3, 10);
        for i in 0..model.num_samples_value() {
            let row = model.data.row(i);
            let x = DVector::from_row_slice(&row[..3]);
            let y = row[3];
            let predicted = model.predict(&x).unwrap();
            assert_abs_diff_eq!(predicted, y, epsilon = 1e-3);
        }
    }

    #[test]
    fn variance_is_nonnegative_and_near_zero_at_training_points() {
        let model = sum_of_squares_model(2, 8);
        for i in 0..model.num_samples_value() {
            let row = model.data.row(i);
            let x = DVector::from_row_slice(&row[..2]);
            let (_mu, s2) = model.predict_with_variance(&x).unwrap();
            assert!(s2 >= 0.0);
            assert!(s2 < 1e-2);
        }
        let (_mu, s2) = model.predict_with_variance(&DVector::from_vec(vec![0.13, -0.42])).unwrap();
        assert!(s2 >= 0.0);
    }

    #[test]
    fn predicting_before_training_is_a_bind_error() {
        let bounds = Bounds::uniform(1, 0.0, 1.0).unwrap();
        let model = KrigingModel::new(1, bounds, false);
        let err = model.predict(&DVector::from_vec(vec![0.5])).unwrap_err();
        matches!(err, Error::ModelBind(_));
    }

    #[test]
    fn rejects_near_duplicate_sample() {
        let bounds = Bounds::uniform(1, 0.0, 1.0).unwrap();
        let mut model = KrigingModel::new(1, bounds, false);
        assert!(model.add_sample(DVector::from_vec(vec![0.5]), 1.0).unwrap());
        assert!(!model.add_sample(DVector::from_vec(vec![0.5 + 1e-10]), 1.1).unwrap());
        assert_eq!(model.num_samples_value(), 1);
    }
}
