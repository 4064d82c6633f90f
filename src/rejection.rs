/*!
# Rejection ABC

Draws parameters independently from the prior, simulates a dataset for each and keeps the
parameters whose dataset lands within `eps` of the observation. The accepted parameters are
independent samples from the prior restricted to the tolerance region.

There is no cap on the number of simulations: if `eps` is too small for the prior and
simulator at hand, `run` never returns. Choosing a reachable tolerance is up to the caller.

## Example

```rust
use mini_abc::distributions::{Prior, Simulator, UniformBox};
use mini_abc::rejection::RejectionSampler;
use rand::{rngs::SmallRng, Rng, SeedableRng};

struct Shifted;

impl Simulator for Shifted {
    fn simulate<R: Rng + ?Sized>(&self, theta: &[f64], _rng: &mut R) -> Option<Vec<f64>> {
        Some(theta.to_vec())
    }
}

let prior = UniformBox::new(vec![-10.0], vec![10.0]).unwrap();
let mut sampler = RejectionSampler::new(&prior, &Shifted);
let mut rng = SmallRng::seed_from_u64(42);

let samples = sampler.run(&[0.0], 0.5, 5, &mut rng).unwrap();
assert_eq!(samples.nrows(), 5);
assert!(samples.iter().all(|x| x.abs() < 0.5));
```
*/

use nalgebra::DMatrix;
use rand::Rng;

use crate::core::{stack_rows, NullSink, Sink};
use crate::distance::{DistanceMetric, Euclidean};
use crate::distributions::{Prior, Simulator};
use crate::error::{check_dim, check_eps, Result};

/// Diagnostics of a rejection run.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectionInfo {
    /// Distance of every draw, accepted or not, in draw order.
    pub distances: Vec<f64>,
    /// Total number of simulations.
    pub n_sims: usize,
}

impl RejectionInfo {
    pub fn acceptance_rate(&self, n_accepted: usize) -> f64 {
        if self.n_sims == 0 {
            0.0
        } else {
            n_accepted as f64 / self.n_sims as f64
        }
    }
}

/// Rejection ABC over a borrowed prior and simulator.
pub struct RejectionSampler<'a, P, S> {
    prior: &'a P,
    simulator: &'a S,
    metric: Box<dyn DistanceMetric + 'a>,
    sink: Box<dyn Sink + 'a>,
}

impl<'a, P, S> RejectionSampler<'a, P, S>
where
    P: Prior,
    S: Simulator,
{
    /// Creates a sampler using the Euclidean distance and no progress output.
    pub fn new(prior: &'a P, simulator: &'a S) -> Self {
        Self {
            prior,
            simulator,
            metric: Box::new(Euclidean),
            sink: Box::new(NullSink),
        }
    }

    pub fn set_metric(mut self, metric: impl DistanceMetric + 'a) -> Self {
        self.metric = Box::new(metric);
        self
    }

    pub fn set_sink(mut self, sink: impl Sink + 'a) -> Self {
        self.sink = Box::new(sink);
        self
    }

    /// Draws until exactly `n_samples` parameters are accepted.
    ///
    /// Returns an `n_samples x dim` matrix with one accepted parameter vector per row.
    pub fn run<R: Rng + ?Sized>(
        &mut self,
        obs_data: &[f64],
        eps: f64,
        n_samples: usize,
        rng: &mut R,
    ) -> Result<DMatrix<f64>> {
        let (samples, _, _) = self.sample(obs_data, eps, n_samples, false, rng)?;
        Ok(samples)
    }

    /// Like [`run`](Self::run), additionally returning every draw's distance and the
    /// simulation count.
    pub fn run_with_info<R: Rng + ?Sized>(
        &mut self,
        obs_data: &[f64],
        eps: f64,
        n_samples: usize,
        rng: &mut R,
    ) -> Result<(DMatrix<f64>, RejectionInfo)> {
        let (samples, distances, n_sims) = self.sample(obs_data, eps, n_samples, true, rng)?;
        Ok((samples, RejectionInfo { distances, n_sims }))
    }

    fn sample<R: Rng + ?Sized>(
        &mut self,
        obs_data: &[f64],
        eps: f64,
        n_samples: usize,
        record: bool,
        rng: &mut R,
    ) -> Result<(DMatrix<f64>, Vec<f64>, usize)> {
        check_eps(eps)?;
        let dim = self.prior.dim();
        let mut accepted = Vec::with_capacity(n_samples);
        let mut distances = Vec::new();
        let mut n_sims = 0;

        while accepted.len() < n_samples {
            let prop_ps = self.prior.generate(rng);
            check_dim(dim, prop_ps.len())?;
            let prop_data = self.simulator.simulate(&prop_ps, rng);
            let prop_dist = self.metric.distance(prop_data.as_deref(), Some(obs_data));
            n_sims += 1;

            if prop_dist < eps {
                accepted.push(prop_ps);
            }
            if record {
                distances.push(prop_dist);
            }

            self.sink.write(&format!(
                "sim = {}, accepted = {}, dist = {:.3}, acc rate = {:.2}%",
                n_sims,
                accepted.len(),
                prop_dist,
                100.0 * accepted.len() as f64 / n_sims as f64
            ));
        }

        Ok((stack_rows(&accepted, dim), distances, n_sims))
    }
}
