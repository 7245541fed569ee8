//! The surrogate capability set.
//!
//! Spec.md section 9 ("Design Notes") calls for replacing the original's
//! deep inheritance (`SurrogateModel` -> `KrigingModel` -> ...) with a
//! capability set plus a tagged variant, and for shared fields to live in a
//! reusable composition rather than a base class. `Surrogate` is that
//! capability set; `SurrogateBase` is the composed-in shared state every
//! concrete model embeds.

use nalgebra::DVector;

use crate::bounds::Bounds;
use crate::design::ModelType;
use crate::error::Result;

/// Fields common to every concrete surrogate (spec.md section 3,
/// "SurrogateModel state (common)"), composed into each concrete model
/// rather than inherited from a base class.
#[derive(Clone, Debug)]
pub struct SurrogateBase {
    pub dimension: usize,
    pub bounds: Bounds,
    pub if_initialized: bool,
    pub model_type: ModelType,
}

impl SurrogateBase {
    pub fn new(dimension: usize, bounds: Bounds, model_type: ModelType) -> Self {
        SurrogateBase { dimension, bounds, if_initialized: false, model_type }
    }
}

/// The capability set every surrogate model exposes to the optimizer and to
/// the objective/constraint adapters.
pub trait Surrogate {
    /// Input dimension.
    fn dimension(&self) -> usize;

    /// Number of training samples currently held.
    fn num_samples(&self) -> usize;

    /// Whether the model has been trained at least once.
    fn is_initialized(&self) -> bool;

    /// Which surrogate family this is.
    fn model_type(&self) -> ModelType;

    /// The box constraints inputs are normalized against.
    fn bounds(&self) -> &Bounds;

    /// (Re)trains hyperparameters/trend from the current training data.
    fn train(&mut self) -> Result<()>;

    /// Re-derives the model's auxiliary prediction state (Cholesky factor,
    /// trend, precomputed solve vectors) from newly appended samples without
    /// re-running the evolutionary hyperparameter search — spec.md section
    /// 4.9 step 2's "otherwise just refresh auxiliary fields with newly added
    /// rows". Defaults to a full [`Surrogate::train`] for models that have no
    /// cheaper path.
    fn refresh(&mut self) -> Result<()> {
        self.train()
    }

    /// Predicted mean at a design-space point `x` (natural scale).
    fn predict(&self, x: &DVector<f64>) -> Result<f64>;

    /// Predicted mean and variance at a design-space point `x` (natural scale).
    ///
    /// Models that have no native variance estimate (e.g. `LinearModel`
    /// used standalone) return variance `0.0`.
    fn predict_with_variance(&self, x: &DVector<f64>) -> Result<(f64, f64)>;

    /// `y_min` over the training set, used by the optimizer to form the
    /// incumbent for objective surrogates.
    fn y_min(&self) -> Option<f64>;
}
