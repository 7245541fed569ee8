//! The evolutionary hyperparameter search population.
//!
//! Grounded on `original_source/src/kriging_training.cpp`'s `EAdesign`
//! (an individual holding `theta`, `gamma`, `fitness`, `crossover_probability`,
//! `death_probability`) and its roulette selection / Gaussian crossover
//! (`pickup_random_pair`, `crossover_kriging`, `update_population_properties`).
//! One [`Population`] runs inside a single rayon task; spec.md section 5
//! treats each thread's population as independent until the final reduction.

use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::algebra::{cholesky_upper, correlation_matrix};

/// One candidate hyperparameter set and its fitness.
#[derive(Clone, Debug)]
pub struct Individual {
    pub theta: DVector<f64>,
    pub gamma: DVector<f64>,
    /// log-likelihood, or `-inf` if this individual produced a non-PD `R` or `sigma^2 <= 0`.
    pub log_likelihood: f64,
}

const THETA_MAX: f64 = 10.0;
const GAMMA_MIN: f64 = 1e-3;
const GAMMA_MAX: f64 = 2.0;

impl Individual {
    fn random(dimension: usize, rng: &mut impl Rng) -> Self {
        Individual {
            theta: DVector::from_fn(dimension, |_, _| rng.gen_range(0.0..THETA_MAX)),
            gamma: DVector::from_fn(dimension, |_, _| rng.gen_range(GAMMA_MIN..GAMMA_MAX)),
            log_likelihood: f64::NEG_INFINITY,
        }
    }
}

/// Concentrated log-likelihood `L(theta,gamma) = -(n/2)*log(sigma^2) - 1/2*log|R|`
/// (spec.md section 4.3), or `None` if `R` is not positive definite or the
/// resulting `sigma^2 <= 0` — these evaluations get fitness `-inf`
/// (counted but discarded, spec.md section 4.3).
pub fn log_likelihood(x_normalized: &DMatrix<f64>, y: &DVector<f64>, theta: &DVector<f64>, gamma: &DVector<f64>, epsilon: f64) -> Option<f64> {
    let n = x_normalized.nrows();
    let r = correlation_matrix(x_normalized, theta, gamma);
    let u = cholesky_upper(&r, epsilon).ok()?;
    let r_jittered = &r + DMatrix::identity(n, n) * epsilon;
    let ones = DVector::from_element(n, 1.0);
    let a = r_jittered.clone().lu().solve(y)?;
    let b = r_jittered.clone().lu().solve(&ones)?;
    let beta0 = ones.dot(&a) / ones.dot(&b);
    let residual = y - &ones * beta0;
    let w = r_jittered.lu().solve(&residual)?;
    let sigma_sqr = residual.dot(&w) / n as f64;
    if !(sigma_sqr > 0.0) {
        return None;
    }
    let log_det_r = 2.0 * (0..u.nrows()).map(|i| u[(i, i)].abs().ln()).sum::<f64>();
    Some(-(n as f64 / 2.0) * sigma_sqr.ln() - 0.5 * log_det_r)
}

/// A single-thread genetic-algorithm population.
pub struct Population {
    individuals: Vec<Individual>,
    dimension: usize,
}

impl Population {
    /// Seeds a population with at least `min_size` individuals: the
    /// `warm_start` set (loaded from disk by the caller), padded with
    /// uniformly random individuals up to `min_size`
    /// (spec.md section 4.3: "always include at least 100*d/threads initial
    /// individuals, minimum 100").
    pub fn seed(dimension: usize, min_size: usize, warm_start: &[(DVector<f64>, DVector<f64>)], rng: &mut impl Rng) -> Self {
        let mut individuals: Vec<Individual> = warm_start
            .iter()
            .map(|(theta, gamma)| Individual { theta: theta.clone(), gamma: gamma.clone(), log_likelihood: f64::NEG_INFINITY })
            .collect();
        while individuals.len() < min_size {
            individuals.push(Individual::random(dimension, rng));
        }
        Population { individuals, dimension }
    }

    /// Evaluates every individual's fitness against the training set, then
    /// normalizes fitness as `(L - L_min) / (L_max - L_min) * 100` (spec.md
    /// section 4.3). Individuals with no valid likelihood get fitness `0`.
    fn evaluate(&mut self, x_normalized: &DMatrix<f64>, y: &DVector<f64>, epsilon: f64) -> Vec<f64> {
        for ind in self.individuals.iter_mut() {
            ind.log_likelihood = log_likelihood(x_normalized, y, &ind.theta, &ind.gamma, epsilon).unwrap_or(f64::NEG_INFINITY);
        }
        let finite: Vec<f64> = self.individuals.iter().map(|i| i.log_likelihood).filter(|l| l.is_finite()).collect();
        if finite.is_empty() {
            return vec![0.0; self.individuals.len()];
        }
        let l_min = finite.iter().cloned().fold(f64::INFINITY, f64::min);
        let l_max = finite.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let spread = (l_max - l_min).max(1e-12);
        self.individuals
            .iter()
            .map(|i| if i.log_likelihood.is_finite() { (i.log_likelihood - l_min) / spread * 100.0 } else { 0.0 })
            .collect()
    }

    /// Roulette-wheel selection over the normalized fitness vector.
    fn roulette_select(fitness: &[f64], rng: &mut impl Rng) -> usize {
        let total: f64 = fitness.iter().sum();
        if total <= 0.0 {
            return rng.gen_range(0..fitness.len());
        }
        let mut pick = rng.gen_range(0.0..total);
        for (i, &f) in fitness.iter().enumerate() {
            if pick < f {
                return i;
            }
            pick -= f;
        }
        fitness.len() - 1
    }

    /// Runs `evaluations` fitness evaluations' worth of generations, each
    /// generation producing children via Gaussian crossover around the
    /// selected parents' mean, rejection-resampling any child with
    /// `theta_i < 0` or `gamma_i` outside `(0,2)` (spec.md section 4.3).
    pub fn run(&mut self, x_normalized: &DMatrix<f64>, y: &DVector<f64>, epsilon: f64, evaluations: usize, rng: &mut impl Rng) -> Individual {
        let generation_size = self.individuals.len();
        let mut spent = 0usize;
        let mut fitness = self.evaluate(x_normalized, y, epsilon);
        spent += generation_size;

        while spent < evaluations {
            let mut children = Vec::with_capacity(generation_size);
            for _ in 0..generation_size {
                let mother = Self::roulette_select(&fitness, rng);
                let father = Self::roulette_select(&fitness, rng);
                children.push(self.crossover(&self.individuals[mother], &self.individuals[father], rng));
            }
            self.individuals = children;
            fitness = self.evaluate(x_normalized, y, epsilon);
            spent += generation_size;
        }

        self.best().clone()
    }

    /// Gaussian crossover: the child is drawn from `N(mean, spread)` per
    /// gene, where `mean` is the parents' average and `spread` is
    /// proportional to the parents' gene distance; children landing outside
    /// the valid range are resampled.
    fn crossover(&self, mother: &Individual, father: &Individual, rng: &mut impl Rng) -> Individual {
        let mut theta = DVector::zeros(self.dimension);
        let mut gamma = DVector::zeros(self.dimension);
        for k in 0..self.dimension {
            theta[k] = Self::gaussian_child(mother.theta[k], father.theta[k], 0.0, THETA_MAX, rng);
            gamma[k] = Self::gaussian_child(mother.gamma[k], father.gamma[k], GAMMA_MIN, GAMMA_MAX, rng);
        }
        Individual { theta, gamma, log_likelihood: f64::NEG_INFINITY }
    }

    fn gaussian_child(a: f64, b: f64, lo: f64, hi: f64, rng: &mut impl Rng) -> f64 {
        let mean = (a + b) / 2.0;
        let spread = ((a - b).abs() / 2.0).max(1e-6);
        let normal = Normal::new(mean, spread).expect("gene spread is always positive");
        for _ in 0..64 {
            let value = normal.sample(rng);
            if value > lo && value < hi {
                return value;
            }
        }
        rng.gen_range(lo..hi)
    }

    fn best(&self) -> &Individual {
        self.individuals.iter().max_by(|a, b| a.log_likelihood.partial_cmp(&b.log_likelihood).unwrap()).expect("population is never empty")
    }
}
