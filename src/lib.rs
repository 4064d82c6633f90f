//! Approximate Bayesian Computation: rejection, MCMC and SMC samplers for models that can be
//! simulated but whose likelihood cannot be evaluated.
//!
//! A model is a [`Prior`](distributions::Prior) over parameter vectors plus a
//! [`Simulator`](distributions::Simulator) mapping parameters to a dataset. Samplers compare
//! simulated datasets to the observation with a [`DistanceMetric`](distance::DistanceMetric)
//! and report progress to a [`Sink`](crate::core::Sink).

pub mod core;
pub mod distance;
pub mod distributions;
pub mod error;
pub mod mcmc;
pub mod rejection;
pub mod smc;
pub mod stats;
