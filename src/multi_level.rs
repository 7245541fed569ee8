//! Multi-level (two-fidelity) cokriging.
//!
//! Spec.md section 4.6: `M_LO` is fit directly on the low-fidelity samples;
//! `M_delta` is fit on the residual `y_HI - M_LO(x_HI)` at the high-fidelity
//! inputs. Prediction is `M_LO(x) + M_delta(x)`. Because `M_delta`
//! interpolates its own (residual) training points exactly, and `M_LO`
//! interpolates its own training points exactly, `M(x)` interpolates every
//! high-fidelity point exactly too — spec.md's invariant that co-located
//! hi-fi points are reproduced exactly falls out of composing two
//! interpolating models rather than needing special-casing.

use nalgebra::DVector;

use crate::bounds::Bounds;
use crate::design::ModelType;
use crate::error::{Error, Result};
use crate::kriging::KrigingModel;
use crate::surrogate::{Surrogate, SurrogateBase};

#[derive(Clone, Debug)]
pub struct MultiLevelModel {
    base: SurrogateBase,
    low_fi: KrigingModel,
    delta: KrigingModel,
    /// Kept to recompute `y_HI - M_LO(x_HI)` residuals whenever `low_fi` is retrained.
    hi_fi_inputs: Vec<DVector<f64>>,
    hi_fi_outputs: Vec<f64>,
}

impl MultiLevelModel {
    pub fn new(dimension: usize, bounds: Bounds) -> Self {
        MultiLevelModel {
            base: SurrogateBase::new(dimension, bounds.clone(), ModelType::MultiLevel),
            low_fi: KrigingModel::new(dimension, bounds.clone(), false),
            delta: KrigingModel::new(dimension, bounds, false),
            hi_fi_inputs: Vec::new(),
            hi_fi_outputs: Vec::new(),
        }
    }

    pub fn add_low_fidelity_sample(&mut self, x: DVector<f64>, y: f64) -> Result<bool> {
        self.low_fi.add_sample(x, y)
    }

    pub fn add_high_fidelity_sample(&mut self, x: DVector<f64>, y: f64) -> Result<()> {
        self.hi_fi_inputs.push(x);
        self.hi_fi_outputs.push(y);
        Ok(())
    }

    fn rebuild_delta(&mut self) -> Result<()> {
        if !self.low_fi.is_initialized() || self.hi_fi_inputs.is_empty() {
            return Ok(());
        }
        self.delta = KrigingModel::new(self.base.dimension, self.base.bounds.clone(), false);
        self.delta.train_config = self.low_fi.train_config;
        for (x, y) in self.hi_fi_inputs.iter().zip(self.hi_fi_outputs.iter()) {
            let low_fi_prediction = self.low_fi.predict(x)?;
            self.delta.add_sample(x.clone(), y - low_fi_prediction)?;
        }
        Ok(())
    }

    pub fn low_fidelity_model(&self) -> &KrigingModel {
        &self.low_fi
    }

    pub fn delta_model(&self) -> &KrigingModel {
        &self.delta
    }
}

impl Surrogate for MultiLevelModel {
    fn dimension(&self) -> usize {
        self.base.dimension
    }

    fn num_samples(&self) -> usize {
        self.low_fi.num_samples() + self.hi_fi_inputs.len()
    }

    fn is_initialized(&self) -> bool {
        self.base.if_initialized
    }

    fn model_type(&self) -> ModelType {
        ModelType::MultiLevel
    }

    fn bounds(&self) -> &Bounds {
        &self.base.bounds
    }

    fn train(&mut self) -> Result<()> {
        self.low_fi.train()?;
        self.rebuild_delta()?;
        if self.hi_fi_inputs.len() >= 2 {
            self.delta.train()?;
        } else {
            self.delta.refresh_auxiliary().ok();
        }
        self.base.if_initialized = true;
        Ok(())
    }

    fn refresh(&mut self) -> Result<()> {
        self.low_fi.refresh()?;
        self.rebuild_delta()?;
        self.delta.refresh()
    }

    fn predict(&self, x: &DVector<f64>) -> Result<f64> {
        if !self.base.if_initialized {
            return Err(Error::ModelBind("multi-level model predicted before training".into()));
        }
        Ok(self.low_fi.predict(x)? + self.delta.predict(x)?)
    }

    fn predict_with_variance(&self, x: &DVector<f64>) -> Result<(f64, f64)> {
        if !self.base.if_initialized {
            return Err(Error::ModelBind("multi-level model predicted before training".into()));
        }
        let (mu_lo, s2_lo) = self.low_fi.predict_with_variance(x)?;
        let (mu_delta, s2_delta) = self.delta.predict_with_variance(x)?;
        Ok((mu_lo + mu_delta, s2_lo + s2_delta))
    }

    fn y_min(&self) -> Option<f64> {
        self.hi_fi_outputs.iter().cloned().fold(None, |acc, v| Some(acc.map_or(v, |m: f64| m.min(v))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn interpolates_hi_fi_points_exactly() {
        let bounds = Bounds::uniform(1, 0.0, 6.3).unwrap();
        let mut model = MultiLevelModel::new(1, bounds);
        for i in 0..15 {
            let x = i as f64 * 6.3 / 15.0;
            model.add_low_fidelity_sample(DVector::from_vec(vec![x]), x.sin()).unwrap();
        }
        for i in 0..6 {
            let x = 0.3 + i as f64 * 6.0 / 6.0;
            model.add_high_fidelity_sample(DVector::from_vec(vec![x]), x.sin() + 0.1 * x).unwrap();
        }
        model.low_fi.train_config.evaluations_per_thread = 400;
        model.low_fi.train_config.threads = 2;
        model.train().unwrap();

        for i in 0..6 {
            let x = 0.3 + i as f64 * 6.0 / 6.0;
            let predicted = model.predict(&DVector::from_vec(vec![x])).unwrap();
            assert_abs_diff_eq!(predicted, x.sin() + 0.1 * x, epsilon = 5e-2);
        }
    }
}
