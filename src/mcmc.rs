/*!
# Markov chain ABC

A single Metropolis chain with a spherical Gaussian proposal. A proposed move is considered
only if its simulated dataset lands within `eps` of the observation; it is then accepted with
probability `min(1, p(proposed) / p(current))` where `p` is the prior density. The proposal is
symmetric, so its density cancels from the ratio.

The chain targets the prior restricted to the tolerance region, which approaches the posterior
as `eps` goes to zero. No burn-in or thinning is applied.

## Example

```rust
use mini_abc::distributions::{Prior, Simulator, UniformBox};
use mini_abc::mcmc::McmcSampler;
use rand::{rngs::SmallRng, Rng, SeedableRng};

struct Echo;

impl Simulator for Echo {
    fn simulate<R: Rng + ?Sized>(&self, theta: &[f64], _rng: &mut R) -> Option<Vec<f64>> {
        Some(theta.to_vec())
    }
}

let prior = UniformBox::new(vec![-5.0, -5.0], vec![5.0, 5.0]).unwrap();
let mut mcmc = McmcSampler::new(&prior, &Echo, &[0.0, 0.0]).unwrap();
let mut rng = SmallRng::seed_from_u64(42);

let (chain, info) = mcmc.run_with_info(&[0.0, 0.0], 1.0, 0.3, 500, &mut rng).unwrap();
assert_eq!(chain.shape(), (500, 2));
assert!(info.acceptance_rate > 0.0);
```
*/

use nalgebra::DMatrix;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::core::{NullSink, Sink};
use crate::distance::{DistanceMetric, Euclidean};
use crate::distributions::{Prior, Simulator};
use crate::error::{check_dim, check_eps, invalid_config, Result};

/// Diagnostics of an MCMC run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct McmcInfo {
    /// Fraction of steps whose proposal was accepted.
    pub acceptance_rate: f64,
}

/// Markov chain ABC over a borrowed prior and simulator.
///
/// The chain state survives between calls to [`run`](Self::run), so consecutive runs
/// continue the same chain.
pub struct McmcSampler<'a, P, S> {
    prior: &'a P,
    simulator: &'a S,
    metric: Box<dyn DistanceMetric + 'a>,
    sink: Box<dyn Sink + 'a>,
    cur_ps: Vec<f64>,
    cur_log_prior: f64,
    cur_dist: Option<f64>,
}

impl<'a, P, S> McmcSampler<'a, P, S>
where
    P: Prior,
    S: Simulator,
{
    /// Starts a chain at `init_ps`.
    pub fn new(prior: &'a P, simulator: &'a S, init_ps: &[f64]) -> Result<Self> {
        check_dim(prior.dim(), init_ps.len())?;
        Ok(Self {
            prior,
            simulator,
            metric: Box::new(Euclidean),
            sink: Box::new(NullSink),
            cur_ps: init_ps.to_vec(),
            cur_log_prior: prior.log_density(init_ps),
            cur_dist: None,
        })
    }

    pub fn set_metric(mut self, metric: impl DistanceMetric + 'a) -> Self {
        self.metric = Box::new(metric);
        self
    }

    pub fn set_sink(mut self, sink: impl Sink + 'a) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn current_state(&self) -> &[f64] {
        &self.cur_ps
    }

    pub fn current_log_prior(&self) -> f64 {
        self.cur_log_prior
    }

    /// Distance of the last accepted proposal, `None` until a move is accepted.
    pub fn current_distance(&self) -> Option<f64> {
        self.cur_dist
    }

    /// Runs the chain for `n_samples` steps and returns the visited states, one per row.
    pub fn run<R: Rng + ?Sized>(
        &mut self,
        obs_data: &[f64],
        eps: f64,
        step: f64,
        n_samples: usize,
        rng: &mut R,
    ) -> Result<DMatrix<f64>> {
        let (chain, _) = self.run_with_info(obs_data, eps, step, n_samples, rng)?;
        Ok(chain)
    }

    /// Like [`run`](Self::run), additionally returning the acceptance rate.
    pub fn run_with_info<R: Rng + ?Sized>(
        &mut self,
        obs_data: &[f64],
        eps: f64,
        step: f64,
        n_samples: usize,
        rng: &mut R,
    ) -> Result<(DMatrix<f64>, McmcInfo)> {
        check_eps(eps)?;
        if !(step.is_finite() && step >= 0.0) {
            return Err(invalid_config(
                "step",
                format!("expected a finite step >= 0, got {step}"),
            ));
        }

        let mut chain = DMatrix::zeros(n_samples, self.cur_ps.len());
        let mut n_accepted = 0;

        for i in 0..n_samples {
            if self.step(obs_data, eps, step, rng) {
                n_accepted += 1;
            }
            chain.row_mut(i).copy_from_slice(&self.cur_ps);

            let dist = self
                .cur_dist
                .map_or_else(|| "none".to_string(), |d| format!("{d:.3}"));
            self.sink.write(&format!(
                "iter = {}, dist = {}, acc rate = {:.2}%",
                i,
                dist,
                100.0 * n_accepted as f64 / (i + 1) as f64
            ));
        }

        let acceptance_rate = if n_samples == 0 {
            0.0
        } else {
            n_accepted as f64 / n_samples as f64
        };
        Ok((chain, McmcInfo { acceptance_rate }))
    }

    /// One Metropolis update. Returns whether the proposal was accepted.
    fn step<R: Rng + ?Sized>(
        &mut self,
        obs_data: &[f64],
        eps: f64,
        step: f64,
        rng: &mut R,
    ) -> bool {
        let prop_ps: Vec<f64> = self
            .cur_ps
            .iter()
            .map(|x| {
                let z: f64 = StandardNormal.sample(&mut *rng);
                x + step * z
            })
            .collect();
        let prop_data = self.simulator.simulate(&prop_ps, rng);
        let prop_dist = self.metric.distance(prop_data.as_deref(), Some(obs_data));

        if prop_dist < eps {
            let prop_log_prior = self.prior.log_density(&prop_ps);
            // NaN when both log priors are -inf, which rejects
            if rng.gen::<f64>() < (prop_log_prior - self.cur_log_prior).exp() {
                self.cur_ps = prop_ps;
                self.cur_log_prior = prop_log_prior;
                self.cur_dist = Some(prop_dist);
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{IsotropicGaussian, UniformBox};
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    struct Echo;

    impl Simulator for Echo {
        fn simulate<R: Rng + ?Sized>(&self, theta: &[f64], _rng: &mut R) -> Option<Vec<f64>> {
            Some(theta.to_vec())
        }
    }

    struct AlwaysFails;

    impl Simulator for AlwaysFails {
        fn simulate<R: Rng + ?Sized>(&self, _theta: &[f64], _rng: &mut R) -> Option<Vec<f64>> {
            None
        }
    }

    #[test]
    fn chain_has_requested_length() {
        let prior = UniformBox::new(vec![-1.0], vec![1.0]).unwrap();
        let mut mcmc = McmcSampler::new(&prior, &Echo, &[0.0]).unwrap();
        let mut rng = SmallRng::seed_from_u64(42);
        let chain = mcmc.run(&[0.0], 0.5, 0.1, 123, &mut rng).unwrap();
        assert_eq!(chain.shape(), (123, 1));
    }

    #[test]
    fn zero_step_with_infinite_tolerance_never_moves() {
        let prior = IsotropicGaussian::new(vec![0.0, 0.0, 0.0], 1.0).unwrap();
        let init = [0.25, -1.5, 3.0];
        let mut mcmc = McmcSampler::new(&prior, &Echo, &init).unwrap();
        let mut rng = SmallRng::seed_from_u64(42);

        let chain = mcmc
            .run(&[0.0, 0.0, 0.0], f64::INFINITY, 0.0, 200, &mut rng)
            .unwrap();
        for row in chain.row_iter() {
            assert_eq!(row.iter().copied().collect::<Vec<_>>(), init.to_vec());
        }
    }

    #[test]
    fn failed_simulations_keep_the_initial_state() {
        let prior = IsotropicGaussian::new(vec![0.0], 1.0).unwrap();
        let mut mcmc = McmcSampler::new(&prior, &AlwaysFails, &[0.7]).unwrap();
        let mut rng = SmallRng::seed_from_u64(9);

        let (chain, info) = mcmc
            .run_with_info(&[0.0], f64::INFINITY, 1.0, 50, &mut rng)
            .unwrap();
        assert!(chain.iter().all(|&x| x == 0.7));
        assert_eq!(info.acceptance_rate, 0.0);
        assert_eq!(mcmc.current_distance(), None);
    }

    #[test]
    fn states_respect_tolerance_and_support() {
        let prior = UniformBox::new(vec![-2.0, -2.0], vec![2.0, 2.0]).unwrap();
        let mut mcmc = McmcSampler::new(&prior, &Echo, &[0.1, 0.1]).unwrap();
        let mut rng = SmallRng::seed_from_u64(42);
        let eps = 1.0;

        let (chain, info) = mcmc
            .run_with_info(&[0.0, 0.0], eps, 0.5, 2_000, &mut rng)
            .unwrap();

        assert!(info.acceptance_rate > 0.0 && info.acceptance_rate < 1.0);
        for row in chain.row_iter() {
            assert!(row.norm() < eps);
            assert!(prior.log_density(&[row[0], row[1]]).is_finite());
        }
    }

    #[test]
    fn rejected_steps_repeat_the_previous_state() {
        let prior = UniformBox::new(vec![-1.0], vec![1.0]).unwrap();
        let mut mcmc = McmcSampler::new(&prior, &Echo, &[0.0]).unwrap();
        let mut rng = SmallRng::seed_from_u64(4);

        let (chain, info) = mcmc
            .run_with_info(&[0.0], 0.2, 0.5, 1_000, &mut rng)
            .unwrap();
        let repeats = (1..chain.nrows())
            .filter(|&i| chain[(i, 0)] == chain[(i - 1, 0)])
            .count();
        assert!(repeats > 0);
        let moves = chain.nrows() - 1 - repeats;
        // the first step may move away from the initial state too
        let accepted = (info.acceptance_rate * 1_000.0).round() as usize;
        assert!(moves == accepted || moves + 1 == accepted);
    }

    #[test]
    fn consecutive_runs_continue_the_chain() {
        let prior = UniformBox::new(vec![-3.0], vec![3.0]).unwrap();
        let mut mcmc = McmcSampler::new(&prior, &Echo, &[0.0]).unwrap();
        let mut rng = SmallRng::seed_from_u64(8);

        let first = mcmc.run(&[0.0], 2.0, 0.5, 100, &mut rng).unwrap();
        assert_eq!(mcmc.current_state(), &[first[(99, 0)]]);
        mcmc.run(&[0.0], 2.0, 0.5, 100, &mut rng).unwrap();
        assert!(mcmc.current_log_prior().is_finite());
    }

    #[test]
    fn rejects_bad_arguments() {
        let prior = UniformBox::new(vec![-1.0], vec![1.0]).unwrap();
        assert!(McmcSampler::new(&prior, &Echo, &[0.0, 0.0]).is_err());

        let mut mcmc = McmcSampler::new(&prior, &Echo, &[0.0]).unwrap();
        let mut rng = SmallRng::seed_from_u64(1);
        assert!(mcmc.run(&[0.0], 0.0, 0.1, 10, &mut rng).is_err());
        assert!(mcmc.run(&[0.0], 1.0, -0.1, 10, &mut rng).is_err());
        assert!(mcmc.run(&[0.0], 1.0, f64::NAN, 10, &mut rng).is_err());
    }

    #[test]
    fn reports_every_step() {
        let prior = UniformBox::new(vec![-1.0], vec![1.0]).unwrap();
        let mut log: Vec<String> = Vec::new();
        {
            let mut mcmc = McmcSampler::new(&prior, &Echo, &[0.0])
                .unwrap()
                .set_sink(&mut log);
            let mut rng = SmallRng::seed_from_u64(2);
            mcmc.run(&[0.0], 0.5, 0.1, 20, &mut rng).unwrap();
        }
        assert_eq!(log.len(), 20);
        assert!(log[0].starts_with("iter = 0, dist = "));
    }
}
