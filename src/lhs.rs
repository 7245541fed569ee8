//! Design-of-experiments sampling: Latin hypercube plus plain uniform random.
//!
//! Grounded on `examples/original_source/src/lhs.hpp`, which exposes Latin
//! hypercube as one `DoE_METHOD` alongside plain random sampling rather than
//! the only option — reproduced here as [`DoeMethod`]. Used only to seed
//! initial training data (spec.md section 8 scenario 1); the optimizer's
//! per-iteration candidate generation (spec.md section 4.9 step 3) is plain
//! uniform sampling via `Bounds::sample_uniform`, not LHS.

use nalgebra::DMatrix;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::bounds::Bounds;

/// Which design-of-experiments method seeds the initial training set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DoeMethod {
    LatinHypercube,
    UniformRandom,
}

/// Draws `n` points in `bounds` using `method`. Rows are samples, columns are
/// dimensions, in natural (denormalized) scale.
pub fn sample(method: DoeMethod, n: usize, bounds: &Bounds, rng: &mut impl Rng) -> DMatrix<f64> {
    match method {
        DoeMethod::LatinHypercube => latin_hypercube(n, bounds, rng),
        DoeMethod::UniformRandom => uniform_random(n, bounds, rng),
    }
}

/// Textbook Latin hypercube: for each dimension, a random permutation of `n`
/// equal-width strata, one uniform draw per stratum, denormalized into
/// `bounds`.
pub fn latin_hypercube(n: usize, bounds: &Bounds, rng: &mut impl Rng) -> DMatrix<f64> {
    let d = bounds.dimension();
    let mut out = DMatrix::zeros(n, d);
    let stratum_width = 1.0 / n as f64;
    for k in 0..d {
        let mut strata: Vec<usize> = (0..n).collect();
        strata.shuffle(rng);
        for (row, &stratum) in strata.iter().enumerate() {
            let offset: f64 = rng.gen_range(0.0..1.0);
            let unit = (stratum as f64 + offset) * stratum_width;
            out[(row, k)] = unit;
        }
    }
    for mut row in out.row_iter_mut() {
        let xn = nalgebra::DVector::from_iterator(d, row.iter().copied());
        let x = bounds.denormalize(&xn);
        for k in 0..d {
            row[k] = x[k];
        }
    }
    out
}

fn uniform_random(n: usize, bounds: &Bounds, rng: &mut impl Rng) -> DMatrix<f64> {
    let d = bounds.dimension();
    let mut out = DMatrix::zeros(n, d);
    for mut row in out.row_iter_mut() {
        let x = bounds.sample_uniform(rng);
        for k in 0..d {
            row[k] = x[k];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latin_hypercube_covers_every_stratum_per_dimension() {
        let bounds = Bounds::uniform(2, 0.0, 10.0).unwrap();
        let mut rng = rand::thread_rng();
        let points = latin_hypercube(10, &bounds, &mut rng);
        for k in 0..2 {
            let mut strata_hit = vec![false; 10];
            for row in 0..10 {
                let unit = points[(row, k)] / 10.0;
                let stratum = ((unit * 10.0) as usize).min(9);
                strata_hit[stratum] = true;
            }
            assert!(strata_hit.iter().all(|&hit| hit), "dimension {k} missed a stratum");
        }
    }

    #[test]
    fn all_samples_stay_in_bounds() {
        let bounds = Bounds::uniform(3, -2.0, 2.0).unwrap();
        let mut rng = rand::thread_rng();
        for method in [DoeMethod::LatinHypercube, DoeMethod::UniformRandom] {
            let points = sample(method, 20, &bounds, &mut rng);
            for row in points.row_iter() {
                for k in 0..3 {
                    assert!(row[k] >= -2.0 && row[k] <= 2.0);
                }
            }
        }
    }
}
