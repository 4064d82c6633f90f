//! Error type shared by all samplers.

use thiserror::Error;

/// Errors raised by the ABC samplers.
///
/// Running out of simulation budget is not represented here: the SMC sampler reports it
/// through [`PopulationStep::BudgetExhausted`](crate::smc::PopulationStep) and ends the run
/// normally.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AbcError {
    #[error("invalid value for `{name}`: {reason}")]
    InvalidConfig { name: &'static str, reason: String },

    #[error("invalid categorical weights: {0}")]
    InvalidWeights(String),

    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    /// The perturbation covariance of an SMC population could not be Cholesky-factored.
    #[error("population covariance is not positive definite at iteration {iteration}")]
    NotPositiveDefinite { iteration: usize },

    /// Every particle of a new SMC population has zero prior density.
    #[error("log-weights cannot be normalized at iteration {iteration}")]
    DegenerateWeights { iteration: usize },
}

pub type Result<T> = std::result::Result<T, AbcError>;

pub(crate) fn invalid_config(name: &'static str, reason: impl Into<String>) -> AbcError {
    AbcError::InvalidConfig {
        name,
        reason: reason.into(),
    }
}

/// Checks that an acceptance tolerance is usable: strictly positive, `+inf` allowed.
pub(crate) fn check_eps(eps: f64) -> Result<()> {
    if eps.is_nan() || eps <= 0.0 {
        return Err(invalid_config("eps", format!("expected eps > 0, got {eps}")));
    }
    Ok(())
}

pub(crate) fn check_dim(expected: usize, found: usize) -> Result<()> {
    if expected != found {
        return Err(AbcError::DimensionMismatch { expected, found });
    }
    Ok(())
}
