//! Log-domain weight arithmetic and the Gaussian perturbation kernel used by the SMC sampler.
//!
//! Particle matrices are `n_particles x dim`, one particle per row.

use nalgebra::{Cholesky, DMatrix, DVector};
use num_traits::Float;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

/// Computes `ln(sum(exp(xs)))` without overflow.
///
/// Returns negative infinity for an empty slice or when every entry is negative infinity.
///
/// # Examples
///
/// ```rust
/// use mini_abc::stats::logsumexp;
///
/// let lse = logsumexp(&[1000.0, 1000.0]);
/// assert!((lse - (1000.0 + 2f64.ln())).abs() < 1e-12);
/// ```
pub fn logsumexp<T: Float>(xs: &[T]) -> T {
    let max = xs.iter().copied().fold(T::neg_infinity(), T::max);
    if max == T::neg_infinity() || max == T::infinity() {
        return max;
    }
    let sum = xs
        .iter()
        .map(|&x| (x - max).exp())
        .fold(T::zero(), |acc, x| acc + x);
    max + sum.ln()
}

/// Shifts `log_weights` in place so that they log-sum-exp to zero. Returns the shift.
pub fn normalize_log_weights(log_weights: &mut [f64]) -> f64 {
    let normalizer = logsumexp(log_weights);
    log_weights.iter_mut().for_each(|w| *w -= normalizer);
    normalizer
}

/// Log of the effective-sample-size fraction of normalized log-weights.
///
/// `ESS = 1 / sum(w^2)` lies in `[1, n]`, so the returned value lies in `[-ln(n), 0]` up to
/// rounding.
pub fn log_ess(log_weights: &[f64]) -> f64 {
    let doubled: Vec<f64> = log_weights.iter().map(|w| 2.0 * w).collect();
    let n = log_weights.len() as f64;
    -logsumexp(&doubled) - n.ln()
}

/// Weighted column means of `particles`.
pub fn weighted_mean(particles: &DMatrix<f64>, log_weights: &[f64]) -> DVector<f64> {
    let mut mean = DVector::zeros(particles.ncols());
    for (row, lw) in particles.row_iter().zip(log_weights) {
        mean += row.transpose() * lw.exp();
    }
    mean
}

/// Weighted covariance `sum_i w_i (x_i - m)(x_i - m)^T` of `particles`.
pub fn weighted_covariance(particles: &DMatrix<f64>, log_weights: &[f64]) -> DMatrix<f64> {
    let mean = weighted_mean(particles, log_weights);
    let dim = particles.ncols();
    let mut cov = DMatrix::zeros(dim, dim);
    for (row, lw) in particles.row_iter().zip(log_weights) {
        let centered = row.transpose() - &mean;
        cov += &centered * centered.transpose() * lw.exp();
    }
    cov
}

/// Twice the unweighted sample covariance, `2 (X^T X / n - m m^T)`.
pub fn perturbation_covariance(particles: &DMatrix<f64>) -> DMatrix<f64> {
    let n = particles.nrows() as f64;
    let mean = particles.row_mean().transpose();
    (particles.tr_mul(particles) / n - &mean * mean.transpose()) * 2.0
}

/**
A Gaussian kernel `N(0, C)` for moving particles, stored through the Cholesky factor `L`
of its covariance `C = L L^T`.

# Examples

```rust
use mini_abc::stats::PerturbationKernel;
use nalgebra::DMatrix;

let particles = DMatrix::from_row_slice(4, 2, &[1.0, 0.0, -1.0, 0.0, 0.0, 1.0, 0.0, -1.0]);
let kernel = PerturbationKernel::fit(&particles).expect("covariance is the identity");
assert_eq!(kernel.factor(), &DMatrix::identity(2, 2));
```
*/
#[derive(Debug, Clone, PartialEq)]
pub struct PerturbationKernel {
    l: DMatrix<f64>,
}

impl PerturbationKernel {
    /// Fits the kernel to a population, see [`perturbation_covariance`].
    ///
    /// Returns `None` if the covariance is not positive definite.
    pub fn fit(particles: &DMatrix<f64>) -> Option<Self> {
        Self::from_covariance(perturbation_covariance(particles))
    }

    pub fn from_covariance(cov: DMatrix<f64>) -> Option<Self> {
        let l = Cholesky::new(cov)?.unpack();
        Some(Self { l })
    }

    /// Lower-triangular Cholesky factor of the kernel covariance.
    pub fn factor(&self) -> &DMatrix<f64> {
        &self.l
    }

    pub fn dim(&self) -> usize {
        self.l.nrows()
    }

    /// Draws `center + L z` with `z` standard normal.
    pub fn perturb<R: Rng + ?Sized>(&self, center: &DVector<f64>, rng: &mut R) -> DVector<f64> {
        let z = DVector::<f64>::from_iterator(
            self.dim(),
            (0..self.dim()).map(|_| StandardNormal.sample(&mut *rng)),
        );
        center + &self.l * z
    }

    /// Kernel log-density at `x` around every particle, up to an additive constant:
    /// `-0.5 |L^-1 (x - p_j)|^2`.
    ///
    /// Uses back-substitution against `L`, never an explicit inverse.
    pub fn log_kernel(&self, x: &DVector<f64>, particles: &DMatrix<f64>) -> Option<Vec<f64>> {
        let diffs = DMatrix::from_fn(self.dim(), particles.nrows(), |r, j| {
            x[r] - particles[(j, r)]
        });
        let solved = self.l.solve_lower_triangular(&diffs)?;
        Some(
            solved
                .column_iter()
                .map(|c| -0.5 * c.norm_squared())
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn cross() -> DMatrix<f64> {
        DMatrix::from_row_slice(4, 2, &[1.0, 0.0, -1.0, 0.0, 0.0, 1.0, 0.0, -1.0])
    }

    #[test]
    fn logsumexp_basic() {
        assert_relative_eq!(logsumexp(&[0.0, 0.0]), 2f64.ln(), epsilon = 1e-12);
        assert_relative_eq!(logsumexp(&[-1000.0, -1000.0]), -1000.0 + 2f64.ln());
        assert_relative_eq!(logsumexp(&[0.5f32]), 0.5f32);
    }

    #[test]
    fn logsumexp_edge_cases() {
        assert_eq!(logsumexp::<f64>(&[]), f64::NEG_INFINITY);
        assert_eq!(
            logsumexp(&[f64::NEG_INFINITY, f64::NEG_INFINITY]),
            f64::NEG_INFINITY
        );
        assert_eq!(logsumexp(&[0.0, f64::NEG_INFINITY]), 0.0);
        assert_eq!(logsumexp(&[1.0, f64::INFINITY]), f64::INFINITY);
    }

    #[test]
    fn normalized_weights_sum_to_one() {
        let mut lw = vec![-3.0, 0.5, 2.0, f64::NEG_INFINITY];
        normalize_log_weights(&mut lw);
        assert_abs_diff_eq!(logsumexp(&lw), 0.0, epsilon = 1e-12);
        assert_eq!(lw[3], f64::NEG_INFINITY);
    }

    #[test]
    fn log_ess_bounds() {
        let n = 8usize;
        let uniform = vec![-(n as f64).ln(); n];
        assert_abs_diff_eq!(log_ess(&uniform), 0.0, epsilon = 1e-12);

        // ESS = 1 / (0.25 + 0.0625 + 0.0625)
        let skewed = [0.5f64.ln(), 0.25f64.ln(), 0.25f64.ln()];
        assert_relative_eq!(log_ess(&skewed), (8.0f64 / 9.0).ln(), epsilon = 1e-12);

        let mut one_hot = vec![f64::NEG_INFINITY; n];
        one_hot[3] = 0.0;
        assert_relative_eq!(log_ess(&one_hot), -(n as f64).ln(), epsilon = 1e-12);
    }

    #[test]
    fn weighted_summaries() {
        let particles = DMatrix::from_row_slice(2, 1, &[0.0, 4.0]);
        let uniform = [0.5f64.ln(), 0.5f64.ln()];
        assert_relative_eq!(weighted_mean(&particles, &uniform)[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(
            weighted_covariance(&particles, &uniform)[(0, 0)],
            4.0,
            epsilon = 1e-12
        );

        let one_hot = [f64::NEG_INFINITY, 0.0];
        assert_eq!(weighted_mean(&particles, &one_hot)[0], 4.0);
        assert_eq!(weighted_covariance(&particles, &one_hot)[(0, 0)], 0.0);
    }

    #[test]
    fn perturbation_covariance_is_twice_the_sample_covariance() {
        let particles = DMatrix::from_row_slice(2, 1, &[0.0, 2.0]);
        assert_relative_eq!(perturbation_covariance(&particles)[(0, 0)], 2.0);
        assert_relative_eq!(
            perturbation_covariance(&cross()),
            DMatrix::identity(2, 2),
            epsilon = 1e-12
        );
    }

    #[test]
    fn kernel_fit_fails_on_collapsed_population() {
        let particles = DMatrix::from_row_slice(3, 2, &[1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
        assert!(PerturbationKernel::fit(&particles).is_none());
    }

    #[test]
    fn log_kernel_matches_explicit_inverse() {
        let cov = DMatrix::from_row_slice(2, 2, &[4.0, 2.0, 2.0, 3.0]);
        let kernel = PerturbationKernel::from_covariance(cov.clone()).unwrap();
        let inv = cov.try_inverse().unwrap();
        let particles = cross();
        let x = DVector::from_vec(vec![0.3, -0.7]);

        let lk = kernel.log_kernel(&x, &particles).unwrap();
        assert_eq!(lk.len(), 4);
        for (j, row) in particles.row_iter().enumerate() {
            let d = &x - row.transpose();
            let expected = -0.5 * (d.transpose() * &inv * &d)[(0, 0)];
            assert_relative_eq!(lk[j], expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn log_kernel_identity_covariance() {
        let kernel = PerturbationKernel::fit(&cross()).unwrap();
        let x = DVector::from_vec(vec![1.0, 1.0]);
        let lk = kernel.log_kernel(&x, &cross()).unwrap();
        let expected = [-0.5, -2.5, -0.5, -2.5];
        for (got, want) in lk.iter().zip(expected) {
            assert_relative_eq!(*got, want, epsilon = 1e-12);
        }
    }

    #[test]
    fn perturbations_have_kernel_moments() {
        const N: usize = 20_000;
        let cov = DMatrix::from_row_slice(2, 2, &[4.0, 2.0, 2.0, 3.0]);
        let kernel = PerturbationKernel::from_covariance(cov.clone()).unwrap();
        let center = DVector::from_vec(vec![1.0, -1.0]);
        let mut rng = SmallRng::seed_from_u64(42);

        let mut draws = DMatrix::zeros(N, 2);
        for i in 0..N {
            let x = kernel.perturb(&center, &mut rng);
            draws.set_row(i, &x.transpose());
        }
        let uniform = vec![-(N as f64).ln(); N];
        let mean = weighted_mean(&draws, &uniform);
        let emp_cov = weighted_covariance(&draws, &uniform);
        assert_abs_diff_eq!(mean, center, epsilon = 0.1);
        assert_abs_diff_eq!(emp_cov, cov, epsilon = 0.25);
    }
}
