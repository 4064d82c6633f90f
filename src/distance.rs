//! Discrepancy between a simulated and an observed dataset.

/// A nonnegative discrepancy between two datasets.
///
/// `None` stands for a dataset that does not exist, e.g. a simulation that failed. Any
/// comparison involving `None` must return `f64::INFINITY` so that the candidate is never
/// accepted, whatever the tolerance.
pub trait DistanceMetric {
    fn distance(&self, a: Option<&[f64]>, b: Option<&[f64]>) -> f64;
}

/// Euclidean norm of the elementwise difference.
///
/// Datasets of different lengths cannot be compared and are infinitely far apart.
///
/// # Examples
///
/// ```rust
/// use mini_abc::distance::{DistanceMetric, Euclidean};
///
/// let d = Euclidean.distance(Some(&[0.0, 0.0]), Some(&[3.0, 4.0]));
/// assert_eq!(d, 5.0);
/// assert_eq!(Euclidean.distance(None, Some(&[1.0])), f64::INFINITY);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Euclidean;

impl DistanceMetric for Euclidean {
    fn distance(&self, a: Option<&[f64]>, b: Option<&[f64]>) -> f64 {
        match (a, b) {
            (Some(a), Some(b)) if a.len() == b.len() => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f64>()
                .sqrt(),
            _ => f64::INFINITY,
        }
    }
}
