/*!
# Sequential Monte Carlo ABC

Maintains a weighted population of particles while shrinking the acceptance tolerance
geometrically, until a fixed number of simulations has been spent.

## Overview

1. **Initial population**: `n_initial_round` prior draws are simulated. If that is more than
   `n_particles`, the closest fraction `n_particles / n_initial_round` is kept and the first
   rejected distance becomes the initial tolerance; otherwise every draw is kept and the
   largest distance is the tolerance. Weights start uniform.
2. **Iteration**: the tolerance is multiplied by `eps_decay`. Each new particle is proposed by
   picking an ancestor according to the current weights and moving it with a Gaussian kernel
   whose covariance is twice the (unweighted) population covariance, repeating until the
   simulated dataset is within tolerance. Its importance weight is the prior density divided by
   the kernel mixture density of the previous population.
3. **Degeneracy**: when the effective-sample-size fraction drops below `ess_min` the population
   is resampled and the weights reset to uniform.
4. **Termination**: the run stops once the budget is reached. If the budget runs out while a
   population is being built, that population is dropped and the run ends with the completed
   iterations.

## Example

```rust
use mini_abc::distributions::{Simulator, UniformBox};
use mini_abc::smc::{SmcConfig, SmcSampler};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use rand_distr::StandardNormal;

struct Noisy;

impl Simulator for Noisy {
    fn simulate<R: Rng + ?Sized>(&self, theta: &[f64], rng: &mut R) -> Option<Vec<f64>> {
        Some(theta.iter().map(|t| t + rng.sample::<f64, _>(StandardNormal)).collect())
    }
}

let prior = UniformBox::new(vec![-10.0], vec![10.0]).unwrap();
let config = SmcConfig::new(50, 200, 0.9, 2_000);
let mut smc = SmcSampler::new(&prior, &Noisy, config).unwrap();
let mut rng = SmallRng::seed_from_u64(42);

let history = smc.run(&[0.0], &mut rng).unwrap();
assert!(history.len() >= 1);
assert!(*history.n_sims().last().unwrap() <= 2_000);
```
*/

use nalgebra::{DMatrix, DVector};
use rand::Rng;

use crate::core::{stack_rows, NullSink, Sink};
use crate::distance::{DistanceMetric, Euclidean};
use crate::distributions::{Categorical, Prior, Simulator};
use crate::error::{check_dim, invalid_config, AbcError, Result};
use crate::stats::{self, PerturbationKernel};

/// Settings of an SMC run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmcConfig {
    /// Target population size.
    pub n_particles: usize,
    /// Number of prior draws used to build the initial population.
    pub n_initial_round: usize,
    /// Factor applied to the tolerance at every iteration, in `(0, 1)`.
    pub eps_decay: f64,
    /// Maximum number of simulations over the whole run.
    pub n_sims_budget: usize,
    /// Resampling threshold on the effective-sample-size fraction, in `(0, 1]`.
    pub ess_min: f64,
}

impl SmcConfig {
    /// Creates a config with `ess_min = 0.5`.
    pub fn new(
        n_particles: usize,
        n_initial_round: usize,
        eps_decay: f64,
        n_sims_budget: usize,
    ) -> Self {
        Self {
            n_particles,
            n_initial_round,
            eps_decay,
            n_sims_budget,
            ess_min: 0.5,
        }
    }

    pub fn set_ess_min(mut self, ess_min: f64) -> Self {
        self.ess_min = ess_min;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_particles == 0 {
            return Err(invalid_config("n_particles", "must be positive"));
        }
        if self.n_initial_round == 0 {
            return Err(invalid_config("n_initial_round", "must be positive"));
        }
        if !(self.eps_decay > 0.0 && self.eps_decay < 1.0) {
            return Err(invalid_config(
                "eps_decay",
                format!("expected a value in (0, 1), got {}", self.eps_decay),
            ));
        }
        if !(self.ess_min > 0.0 && self.ess_min <= 1.0) {
            return Err(invalid_config(
                "ess_min",
                format!("expected a value in (0, 1], got {}", self.ess_min),
            ));
        }
        if self.n_sims_budget < self.n_initial_round {
            return Err(invalid_config(
                "n_sims_budget",
                format!(
                    "budget {} cannot cover the {} initial simulations",
                    self.n_sims_budget, self.n_initial_round
                ),
            ));
        }
        Ok(())
    }
}

/// A weighted set of particles sharing one tolerance.
///
/// Log-weights are normalized: they log-sum-exp to zero.
#[derive(Debug, Clone, PartialEq)]
pub struct Population {
    particles: DMatrix<f64>,
    log_weights: Vec<f64>,
    eps: f64,
    iteration: usize,
}

impl Population {
    /// Wraps particles (one per row) and their log-weights, normalizing the weights.
    pub fn new(
        particles: DMatrix<f64>,
        mut log_weights: Vec<f64>,
        eps: f64,
        iteration: usize,
    ) -> Result<Self> {
        check_dim(particles.nrows(), log_weights.len())?;
        let normalizer = stats::normalize_log_weights(&mut log_weights);
        if !normalizer.is_finite() {
            return Err(AbcError::DegenerateWeights { iteration });
        }
        Ok(Self {
            particles,
            log_weights,
            eps,
            iteration,
        })
    }

    /// Wraps particles with uniform weights.
    pub fn uniform(particles: DMatrix<f64>, eps: f64, iteration: usize) -> Self {
        let n = particles.nrows();
        Self {
            particles,
            log_weights: vec![-(n as f64).ln(); n],
            eps,
            iteration,
        }
    }

    pub fn particles(&self) -> &DMatrix<f64> {
        &self.particles
    }

    pub fn particle(&self, i: usize) -> DVector<f64> {
        self.particles.row(i).transpose()
    }

    pub fn log_weights(&self) -> &[f64] {
        &self.log_weights
    }

    /// Normalized linear weights.
    pub fn weights(&self) -> Vec<f64> {
        self.log_weights.iter().map(|w| w.exp()).collect()
    }

    pub fn eps(&self) -> f64 {
        self.eps
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn len(&self) -> usize {
        self.particles.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dim(&self) -> usize {
        self.particles.ncols()
    }

    /// Effective sample size, between 1 and `len()` up to rounding.
    pub fn ess(&self) -> f64 {
        stats::log_ess(&self.log_weights).exp() * self.len() as f64
    }

    /// Weighted mean of the particles.
    pub fn mean(&self) -> DVector<f64> {
        stats::weighted_mean(&self.particles, &self.log_weights)
    }

    /// Weighted covariance of the particles.
    pub fn covariance(&self) -> DMatrix<f64> {
        stats::weighted_covariance(&self.particles, &self.log_weights)
    }
}

/// One completed iteration of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub population: Population,
    /// Log effective-sample-size fraction before any resampling; zero for the initial round.
    pub log_ess: f64,
    /// Cumulative number of simulations at the end of this iteration.
    pub n_sims: usize,
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The last completed iteration used up the budget.
    BudgetReached,
    /// The budget ran out while a population was being built; that population was dropped.
    BudgetExhausted,
}

/// Outcome of building one population.
#[derive(Debug, Clone, PartialEq)]
pub enum PopulationStep {
    Completed {
        particles: DMatrix<f64>,
        /// Normalized log-weights.
        log_weights: Vec<f64>,
        n_sims: usize,
    },
    /// Another simulation would have exceeded the remaining budget.
    BudgetExhausted { n_sims: usize },
}

/// Every completed iteration of an SMC run, initial population first.
#[derive(Debug, Clone, PartialEq)]
pub struct RunHistory {
    generations: Vec<Generation>,
    termination: Termination,
    total_sims: usize,
}

impl RunHistory {
    pub fn generations(&self) -> &[Generation] {
        &self.generations
    }

    pub fn into_generations(self) -> Vec<Generation> {
        self.generations
    }

    pub fn len(&self) -> usize {
        self.generations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.generations.is_empty()
    }

    pub fn last(&self) -> Option<&Generation> {
        self.generations.last()
    }

    pub fn termination(&self) -> Termination {
        self.termination
    }

    /// Simulations actually run, including those of a dropped final population.
    pub fn total_sims(&self) -> usize {
        self.total_sims
    }

    pub fn populations(&self) -> Vec<&DMatrix<f64>> {
        self.generations
            .iter()
            .map(|g| g.population.particles())
            .collect()
    }

    pub fn log_weights(&self) -> Vec<&[f64]> {
        self.generations
            .iter()
            .map(|g| g.population.log_weights())
            .collect()
    }

    pub fn eps(&self) -> Vec<f64> {
        self.generations.iter().map(|g| g.population.eps()).collect()
    }

    pub fn log_ess(&self) -> Vec<f64> {
        self.generations.iter().map(|g| g.log_ess).collect()
    }

    pub fn n_sims(&self) -> Vec<usize> {
        self.generations.iter().map(|g| g.n_sims).collect()
    }
}

/// Sequential Monte Carlo ABC over a borrowed prior and simulator.
pub struct SmcSampler<'a, P, S> {
    prior: &'a P,
    simulator: &'a S,
    config: SmcConfig,
    metric: Box<dyn DistanceMetric + 'a>,
    sink: Box<dyn Sink + 'a>,
}

impl<'a, P, S> SmcSampler<'a, P, S>
where
    P: Prior,
    S: Simulator,
{
    pub fn new(prior: &'a P, simulator: &'a S, config: SmcConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            prior,
            simulator,
            config,
            metric: Box::new(Euclidean),
            sink: Box::new(NullSink),
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

    pub fn config(&self) -> &SmcConfig {
        &self.config
    }

    /// Runs the full algorithm and returns every completed iteration.
    ///
    /// Fails with [`AbcError::NotPositiveDefinite`] if a population collapses so far that its
    /// covariance cannot be factored.
    ///
    /// When `n_initial_round <= n_particles` the initial tolerance is the largest distance, so a
    /// single failed simulation in the initial round makes it `+inf`. Decay cannot shrink an
    /// infinite tolerance: every generation then records `eps = inf` and accepts any proposal
    /// whose simulation succeeds.
    pub fn run<R: Rng + ?Sized>(&mut self, obs_data: &[f64], rng: &mut R) -> Result<RunHistory> {
        let budget = self.config.n_sims_budget;
        let log_ess_min = self.config.ess_min.ln();

        let (initial, mut n_sims) = self.sample_initial_population(obs_data, rng)?;
        let mut eps = initial.eps();
        self.sink.write(&format!(
            "iter = 0, eps = {eps}, ess (%) = 1, sims = {n_sims}"
        ));

        let mut generations = vec![Generation {
            population: initial,
            log_ess: 0.0,
            n_sims,
        }];
        let mut total_sims = n_sims;
        let mut termination = Termination::BudgetReached;
        let mut iteration = 0;

        while n_sims < budget {
            iteration += 1;
            eps *= self.config.eps_decay;

            let previous = &generations[generations.len() - 1].population;
            let step =
                self.sample_next_population(previous, obs_data, eps, budget - n_sims, iteration, rng)?;
            let (particles, log_weights, new_sims) = match step {
                PopulationStep::Completed {
                    particles,
                    log_weights,
                    n_sims,
                } => (particles, log_weights, n_sims),
                PopulationStep::BudgetExhausted { n_sims: wasted } => {
                    total_sims += wasted;
                    termination = Termination::BudgetExhausted;
                    self.sink
                        .write("Simulation budget exceeded, quit simulation loop");
                    break;
                }
            };
            n_sims += new_sims;
            total_sims += new_sims;

            let log_ess = stats::log_ess(&log_weights);
            let mut population = Population {
                particles,
                log_weights,
                eps,
                iteration,
            };
            if log_ess < log_ess_min {
                let resampled = self.resample(&population, rng)?;
                population = Population::uniform(resampled, eps, iteration);
            }

            self.sink.write(&format!(
                "iter = {iteration}, eps = {eps}, ess (%) = {}, sims = {n_sims}",
                log_ess.exp()
            ));
            generations.push(Generation {
                population,
                log_ess,
                n_sims,
            });

            if n_sims >= budget {
                self.sink.write("Reached simulation budget");
                break;
            }
        }

        Ok(RunHistory {
            generations,
            termination,
            total_sims,
        })
    }

    /// Builds the initial population from `n_initial_round` prior draws.
    ///
    /// Returns the population and the number of simulations spent. When truncating, the
    /// population size is `floor((n_particles / n_initial_round) * n_initial_round)` computed in
    /// floating point, which can come out one short of `n_particles`.
    pub fn sample_initial_population<R: Rng + ?Sized>(
        &mut self,
        obs_data: &[f64],
        rng: &mut R,
    ) -> Result<(Population, usize)> {
        let n_initial_round = self.config.n_initial_round;
        let n_particles = self.config.n_particles;
        let dim = self.prior.dim();

        let mut ps = Vec::with_capacity(n_initial_round);
        let mut ds = Vec::with_capacity(n_initial_round);
        for _ in 0..n_initial_round {
            let prop_ps = self.prior.generate(rng);
            check_dim(dim, prop_ps.len())?;
            let data = self.simulator.simulate(&prop_ps, rng);
            ds.push(self.metric.distance(data.as_deref(), Some(obs_data)));
            ps.push(prop_ps);
        }

        let (particles, eps_init) = if n_initial_round > n_particles {
            let quantile = n_particles as f64 / n_initial_round as f64;
            let n_quantile = (quantile * n_initial_round as f64) as usize;
            let mut order: Vec<usize> = (0..n_initial_round).collect();
            order.sort_by(|&a, &b| ds[a].total_cmp(&ds[b]));
            let eps_init = ds[order[n_quantile]];
            let kept: Vec<Vec<f64>> = order[..n_quantile]
                .iter()
                .map(|&i| std::mem::take(&mut ps[i]))
                .collect();
            (stack_rows(&kept, dim), eps_init)
        } else {
            let eps_init = ds.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            (stack_rows(&ps, dim), eps_init)
        };

        Ok((Population::uniform(particles, eps_init, 0), n_initial_round))
    }

    /// Perturbs `population` into a new population at tolerance `eps`.
    ///
    /// Gives up with [`PopulationStep::BudgetExhausted`] as soon as one more simulation would
    /// exceed `remaining_budget`. `iteration` only labels errors.
    pub fn sample_next_population<R: Rng + ?Sized>(
        &self,
        population: &Population,
        obs_data: &[f64],
        eps: f64,
        remaining_budget: usize,
        iteration: usize,
        rng: &mut R,
    ) -> Result<PopulationStep> {
        let ps = population.particles();
        let n = population.len();
        let kernel =
            PerturbationKernel::fit(ps).ok_or(AbcError::NotPositiveDefinite { iteration })?;
        let ancestors = Categorical::new(&population.weights())?;

        let mut new_ps = DMatrix::zeros(n, population.dim());
        let mut new_log_weights = Vec::with_capacity(n);
        let mut n_sims = 0;

        for i in 0..n {
            let new_p = loop {
                if n_sims >= remaining_budget {
                    return Ok(PopulationStep::BudgetExhausted { n_sims });
                }
                let idx = ancestors.sample(rng);
                let candidate = kernel.perturb(&population.particle(idx), rng);
                let data = self.simulator.simulate(candidate.as_slice(), rng);
                n_sims += 1;
                if self.metric.distance(data.as_deref(), Some(obs_data)) < eps {
                    break candidate;
                }
            };

            let log_kernel = kernel
                .log_kernel(&new_p, ps)
                .ok_or(AbcError::NotPositiveDefinite { iteration })?;
            let mixture: Vec<f64> = population
                .log_weights()
                .iter()
                .zip(&log_kernel)
                .map(|(w, k)| w + k)
                .collect();
            new_log_weights
                .push(self.prior.log_density(new_p.as_slice()) - stats::logsumexp(&mixture));
            new_ps.set_row(i, &new_p.transpose());
        }

        if !stats::normalize_log_weights(&mut new_log_weights).is_finite() {
            return Err(AbcError::DegenerateWeights { iteration });
        }

        Ok(PopulationStep::Completed {
            particles: new_ps,
            log_weights: new_log_weights,
            n_sims,
        })
    }

    /// Draws `population.len()` particles with replacement, proportionally to their weights.
    pub fn resample<R: Rng + ?Sized>(
        &self,
        population: &Population,
        rng: &mut R,
    ) -> Result<DMatrix<f64>> {
        let idx = Categorical::new(&population.weights())?.sample_n(population.len(), rng);
        Ok(population.particles().select_rows(idx.iter()))
    }
}
