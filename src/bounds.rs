//! Box constraints and min-max normalization.
//!
//! Every surrogate operates on inputs normalized into `[0,1]^d` by a `Bounds`;
//! predictions and design vectors stay in the natural (denormalized) scale.

use nalgebra::{DMatrix, DVector, RowDVector};
use rand::Rng;

use crate::error::{Error, Result};

/// Box constraints on a `d`-dimensional design vector.
///
/// Immutable after construction: there is no setter, only constructors, since
/// a `Bounds` that changed shape out from under an already-normalized
/// `SurrogateModel` would silently invalidate its training data.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "rodeo_serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bounds {
    lb: DVector<f64>,
    ub: DVector<f64>,
}

impl Bounds {
    /// Builds a new `Bounds`, checking `lb[i] < ub[i]` for every dimension.
    pub fn new(lb: DVector<f64>, ub: DVector<f64>) -> Result<Self> {
        let bounds = Bounds { lb, ub };
        bounds.validate()?;
        Ok(bounds)
    }

    /// Builds a `Bounds` with the same `[lb, ub]` pair repeated over `dimension` dimensions.
    pub fn uniform(dimension: usize, lb: f64, ub: f64) -> Result<Self> {
        Self::new(DVector::from_element(dimension, lb), DVector::from_element(dimension, ub))
    }

    fn validate(&self) -> Result<()> {
        if self.lb.nrows() != self.ub.nrows() {
            return Err(Error::Config(format!(
                "lower/upper bound length mismatch: {} vs {}",
                self.lb.nrows(),
                self.ub.nrows()
            )));
        }
        for i in 0..self.lb.nrows() {
            if !(self.lb[i] < self.ub[i]) {
                return Err(Error::Config(format!(
                    "bounds invalid at dimension {}: lb={} must be strictly less than ub={}",
                    i, self.lb[i], self.ub[i]
                )));
            }
        }
        Ok(())
    }

    /// Input dimension.
    pub fn dimension(&self) -> usize {
        self.lb.nrows()
    }

    pub fn lb(&self) -> &DVector<f64> {
        &self.lb
    }

    pub fn ub(&self) -> &DVector<f64> {
        &self.ub
    }

    /// Whether `x` lies within the closed box.
    pub fn contains(&self, x: &DVector<f64>) -> bool {
        (0..self.dimension()).all(|i| x[i] >= self.lb[i] && x[i] <= self.ub[i])
    }

    /// Draws a uniform random point inside the box.
    pub fn sample_uniform(&self, rng: &mut impl Rng) -> DVector<f64> {
        DVector::from_fn(self.dimension(), |i, _| rng.gen_range(self.lb[i]..=self.ub[i]))
    }

    /// `(x - lb) / (ub - lb)`, component-wise.
    pub fn normalize(&self, x: &DVector<f64>) -> DVector<f64> {
        DVector::from_fn(self.dimension(), |i, _| (x[i] - self.lb[i]) / (self.ub[i] - self.lb[i]))
    }

    /// Normalizes a row vector (convenience for matrix-row iteration).
    pub fn normalize_row(&self, x: &RowDVector<f64>) -> RowDVector<f64> {
        RowDVector::from_fn(self.dimension(), |_, i| (x[i] - self.lb[i]) / (self.ub[i] - self.lb[i]))
    }

    /// Inverse of `normalize`: `xn * (ub - lb) + lb`.
    pub fn denormalize(&self, xn: &DVector<f64>) -> DVector<f64> {
        DVector::from_fn(self.dimension(), |i, _| xn[i] * (self.ub[i] - self.lb[i]) + self.lb[i])
    }

    /// Normalizes every row of a design matrix (rows = samples, cols = dimensions).
    pub fn normalize_matrix(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        let mut out = x.clone();
        for mut row in out.row_iter_mut() {
            for i in 0..self.dimension() {
                row[i] = (row[i] - self.lb[i]) / (self.ub[i] - self.lb[i]);
            }
        }
        out
    }

    /// Shrinks the box around `center` by `factor` (e.g. 0.5 halves each side),
    /// keeping `center` strictly interior. Used by the optimizer's zoom-in step.
    pub fn zoom(&self, center: &DVector<f64>, factor: f64) -> Result<Bounds> {
        let half_width = (&self.ub - &self.lb) * (factor / 2.0);
        let mut lb = center - &half_width;
        let mut ub = center + &half_width;
        for i in 0..self.dimension() {
            lb[i] = lb[i].max(self.lb[i]);
            ub[i] = ub[i].min(self.ub[i]);
            // Keep the incumbent strictly interior even if it sits on the
            // original box's edge.
            if !(lb[i] < center[i]) {
                lb[i] = center[i] - f64::EPSILON.max(1e-12);
            }
            if !(ub[i] > center[i]) {
                ub[i] = center[i] + f64::EPSILON.max(1e-12);
            }
        }
        Bounds::new(lb, ub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_inverted_bounds() {
        let lb = DVector::from_vec(vec![0.0, 1.0]);
        let ub = DVector::from_vec(vec![1.0, 1.0]);
        assert!(Bounds::new(lb, ub).is_err());
    }

    #[test]
    fn normalize_denormalize_roundtrip() {
        let bounds = Bounds::uniform(3, -6.0, 6.0).unwrap();
        let x = DVector::from_vec(vec![-2.5, 0.0, 5.9]);
        let xn = bounds.normalize(&x);
        assert!(xn.iter().all(|&v| (0.0..=1.0).contains(&v)));
        let back = bounds.denormalize(&xn);
        for i in 0..3 {
            assert!((back[i] - x[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn zoom_keeps_incumbent_interior_and_shrinks() {
        let bounds = Bounds::uniform(1, -6.0, 6.0).unwrap();
        let center = DVector::from_vec(vec![3.0]);
        let zoomed = bounds.zoom(&center, 0.5).unwrap();
        assert!(zoomed.lb()[0] < center[0]);
        assert!(zoomed.ub()[0] > center[0]);
        assert!(zoomed.ub()[0] - zoomed.lb()[0] < bounds.ub()[0] - bounds.lb()[0]);
    }
}
