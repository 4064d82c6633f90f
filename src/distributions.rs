/*!
Capabilities consumed by the samplers (priors and simulators), the categorical resampler used
by the SMC sampler, and two ready-made priors.

All randomness comes from the `rng` argument; nothing in this module owns a generator.

# Examples

### Priors

```rust
use mini_abc::distributions::{Prior, UniformBox};
use rand::{rngs::SmallRng, SeedableRng};

let prior = UniformBox::new(vec![-10.0, 0.0], vec![10.0, 1.0]).unwrap();
let mut rng = SmallRng::seed_from_u64(42);
let theta = prior.generate(&mut rng);
assert_eq!(theta.len(), 2);
assert!(prior.log_density(&theta).is_finite());
assert_eq!(prior.log_density(&[11.0, 0.5]), f64::NEG_INFINITY);
```

### Categorical resampling

```rust
use mini_abc::distributions::Categorical;
use rand::{rngs::SmallRng, SeedableRng};

let cat = Categorical::new(&[0.2, 0.3, 0.5]).unwrap();
let mut rng = SmallRng::seed_from_u64(42);
let one: usize = cat.sample(&mut rng);
let many: Vec<usize> = cat.sample_n(10, &mut rng);
assert!(one < 3);
assert_eq!(many.len(), 10);
```
*/

use rand::Rng;
use rand_distr::{Distribution, StandardNormal, Uniform};
use std::f64::consts::PI;

use crate::error::{invalid_config, AbcError, Result};

/// A distribution over parameter vectors that can be sampled and evaluated.
pub trait Prior {
    /// Length of the parameter vectors this prior produces.
    fn dim(&self) -> usize;

    /// Draws one parameter vector.
    fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64>;

    /// Log-density at `theta`, `f64::NEG_INFINITY` outside the support.
    fn log_density(&self, theta: &[f64]) -> f64;
}

/// A stochastic data-generating process.
///
/// Calling `simulate` twice with the same parameters may yield different datasets. `None`
/// signals a failed simulation; such a dataset is infinitely far from any observation.
pub trait Simulator {
    fn simulate<R: Rng + ?Sized>(&self, theta: &[f64], rng: &mut R) -> Option<Vec<f64>>;
}

/**
A discrete distribution over `0..n` with probabilities proportional to nonnegative weights.

The weights do not have to sum to one. Draws use an inverse-CDF lookup: a uniform draw is
scaled by the total weight and located among the cumulative sums by binary search, so an
index with zero weight is never returned.
*/
#[derive(Debug, Clone, PartialEq)]
pub struct Categorical {
    cumulative: Vec<f64>,
}

impl Categorical {
    /// Builds the distribution, rejecting empty, negative, non-finite or all-zero weights.
    pub fn new(weights: &[f64]) -> Result<Self> {
        if weights.is_empty() {
            return Err(AbcError::InvalidWeights("no weights given".into()));
        }
        let mut cumulative = Vec::with_capacity(weights.len());
        let mut total = 0.0;
        for (i, &w) in weights.iter().enumerate() {
            if !w.is_finite() || w < 0.0 {
                return Err(AbcError::InvalidWeights(format!(
                    "weight {i} is {w}, expected a finite nonnegative value"
                )));
            }
            total += w;
            cumulative.push(total);
        }
        if total <= 0.0 {
            return Err(AbcError::InvalidWeights("all weights are zero".into()));
        }
        Ok(Self { cumulative })
    }

    /// Number of categories.
    pub fn len(&self) -> usize {
        self.cumulative.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cumulative.is_empty()
    }

    /// Draws a single index.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let total = self.cumulative[self.cumulative.len() - 1];
        let target = rng.gen::<f64>() * total;
        let idx = self.cumulative.partition_point(|&c| c <= target);
        idx.min(self.cumulative.len() - 1)
    }

    /// Draws `k` indices independently, with replacement.
    pub fn sample_n<R: Rng + ?Sized>(&self, k: usize, rng: &mut R) -> Vec<usize> {
        (0..k).map(|_| self.sample(&mut *rng)).collect()
    }
}

/**
Independent uniform distributions on `[lower[i], upper[i]]`, i.e. a uniform prior on a box.

# Examples

```rust
use mini_abc::distributions::{Prior, UniformBox};

let prior = UniformBox::new(vec![-10.0], vec![10.0]).unwrap();
assert!((prior.log_density(&[3.0]) - (-20.0f64.ln())).abs() < 1e-12);
```
*/
#[derive(Debug, Clone)]
pub struct UniformBox {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    log_volume: f64,
    sides: Vec<Uniform<f64>>,
}

impl UniformBox {
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Result<Self> {
        if lower.len() != upper.len() {
            return Err(AbcError::DimensionMismatch {
                expected: lower.len(),
                found: upper.len(),
            });
        }
        if lower.is_empty() {
            return Err(invalid_config("lower", "a prior needs at least one dimension"));
        }
        for (lo, hi) in lower.iter().zip(&upper) {
            if !(lo.is_finite() && hi.is_finite() && lo < hi) {
                return Err(invalid_config(
                    "upper",
                    format!("expected finite bounds with lower < upper, got [{lo}, {hi}]"),
                ));
            }
        }
        let log_volume = lower.iter().zip(&upper).map(|(lo, hi)| (hi - lo).ln()).sum();
        let sides = lower
            .iter()
            .zip(&upper)
            .map(|(&lo, &hi)| Uniform::new_inclusive(lo, hi))
            .collect();
        Ok(Self {
            lower,
            upper,
            log_volume,
            sides,
        })
    }
}

impl Prior for UniformBox {
    fn dim(&self) -> usize {
        self.lower.len()
    }

    fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64> {
        self.sides.iter().map(|side| side.sample(&mut *rng)).collect()
    }

    fn log_density(&self, theta: &[f64]) -> f64 {
        let inside = theta.len() == self.dim()
            && theta
                .iter()
                .zip(self.lower.iter().zip(&self.upper))
                .all(|(x, (lo, hi))| lo <= x && x <= hi);
        if inside {
            -self.log_volume
        } else {
            f64::NEG_INFINITY
        }
    }
}

/**
A Gaussian prior with independent coordinates sharing the standard deviation `std`.

# Examples

```rust
use mini_abc::distributions::{IsotropicGaussian, Prior};

let prior = IsotropicGaussian::new(vec![0.0, 0.0], 1.0).unwrap();
let lp = prior.log_density(&[0.0, 0.0]);
assert!((lp + (2.0 * std::f64::consts::PI).ln()).abs() < 1e-12);
```
*/
#[derive(Debug, Clone, PartialEq)]
pub struct IsotropicGaussian {
    pub mean: Vec<f64>,
    pub std: f64,
}

impl IsotropicGaussian {
    pub fn new(mean: Vec<f64>, std: f64) -> Result<Self> {
        if mean.is_empty() {
            return Err(invalid_config("mean", "a prior needs at least one dimension"));
        }
        if !(std.is_finite() && std > 0.0) {
            return Err(invalid_config("std", format!("expected std > 0, got {std}")));
        }
        Ok(Self { mean, std })
    }
}

impl Prior for IsotropicGaussian {
    fn dim(&self) -> usize {
        self.mean.len()
    }

    fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64> {
        self.mean
            .iter()
            .map(|m| {
                let z: f64 = StandardNormal.sample(&mut *rng);
                m + self.std * z
            })
            .collect()
    }

    fn log_density(&self, theta: &[f64]) -> f64 {
        if theta.len() != self.dim() {
            return f64::NEG_INFINITY;
        }
        let d = self.dim() as f64;
        let sq: f64 = theta
            .iter()
            .zip(&self.mean)
            .map(|(x, m)| ((x - m) / self.std).powi(2))
            .sum();
        -0.5 * sq - d * (self.std.ln() + 0.5 * (2.0 * PI).ln())
    }
}
