//! Parallel evolutionary hyperparameter search.
//!
//! Spec.md section 4.3/section 5: each of `threads` rayon tasks runs an
//! independent genetic algorithm population over an immutable snapshot of
//! `(X, y, epsilon, dim)`; only the best-per-thread is reduced, under a
//! lock, to a process-wide best, followed by a barrier (rayon's `collect`).

use std::sync::Mutex;

use nalgebra::{DMatrix, DVector};
use rand::SeedableRng;
use rayon::prelude::*;

use super::ga::{log_likelihood, Individual, Population};
use crate::error::{Error, Result};

/// Tunables for [`train`], mirroring `COptimizer`/`KrigingModel`'s
/// `max_number_of_kriging_iterations` and thread count.
#[derive(Clone, Copy, Debug)]
pub struct TrainConfig {
    /// Total fitness evaluations each thread's population runs for.
    pub evaluations_per_thread: usize,
    /// Number of independent GA populations (rayon tasks).
    pub threads: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig { evaluations_per_thread: 2000, threads: 4 }
    }
}

/// Runs the parallel evolutionary search and returns the globally best
/// `(theta, gamma)` pair, or a `NumericalError` if every individual across
/// every thread failed to produce a valid likelihood (non-PD `R` or
/// `sigma^2 <= 0` everywhere) — spec.md's "Failure semantics": the caller
/// (`KrigingModel::train`) is expected to then keep its previous
/// hyperparameters.
pub fn train(
    x_normalized: &DMatrix<f64>,
    y: &DVector<f64>,
    epsilon: f64,
    dimension: usize,
    warm_start: Option<(DVector<f64>, DVector<f64>)>,
    config: TrainConfig,
) -> Result<(DVector<f64>, DVector<f64>, f64)> {
    let threads = config.threads.max(1);
    let min_population = (100 * dimension / threads).max(100);
    let best_overall: Mutex<Option<Individual>> = Mutex::new(None);

    (0..threads).into_par_iter().for_each(|thread_id| {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0xC0FFEE ^ thread_id as u64);
        let warm = warm_start.clone().into_iter().collect::<Vec<_>>();
        let mut population = Population::seed(dimension, min_population, &warm, &mut rng);
        let best = population.run(x_normalized, y, epsilon, config.evaluations_per_thread, &mut rng);

        if best.log_likelihood.is_finite() {
            let mut global = best_overall.lock().expect("best-overall mutex poisoned");
            let replace = match &*global {
                None => true,
                Some(current) => best.log_likelihood > current.log_likelihood,
            };
            if replace {
                *global = Some(best);
            }
        }
    });

    let winner = best_overall.into_inner().expect("best-overall mutex poisoned").ok_or_else(|| {
        Error::Numerical("evolutionary hyperparameter search found no individual with a positive-definite correlation matrix".into())
    })?;

    let final_likelihood = log_likelihood(x_normalized, y, &winner.theta, &winner.gamma, epsilon)
        .ok_or_else(|| Error::Numerical("winning hyperparameters failed to re-validate".into()))?;
    Ok((winner.theta, winner.gamma, final_likelihood))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trains_on_tiny_problem() {
        let x = DMatrix::from_row_slice(5, 1, &[0.0, 0.25, 0.5, 0.75, 1.0]);
        let y = DVector::from_vec(x.column(0).iter().map(|&v| (v * 2.0).sin()).collect());
        let config = TrainConfig { evaluations_per_thread: 200, threads: 2 };
        let (theta, gamma, ll) = train(&x, &y, 1e-10, 1, None, config).unwrap();
        assert_eq!(theta.nrows(), 1);
        assert_eq!(gamma.nrows(), 1);
        assert!(ll.is_finite());
        assert!(theta[0] >= 0.0);
        assert!(gamma[0] > 0.0 && gamma[0] <= 2.0);
    }
}
