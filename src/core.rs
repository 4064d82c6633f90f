//! Progress reporting shared by all samplers.
//!
//! Samplers report what they are doing through a [`Sink`]. The default is [`NullSink`],
//! which discards everything; [`ProgressSink`] shows the latest message on an `indicatif`
//! spinner, and a `Vec<String>` collects the full transcript.

use indicatif::{ProgressBar, ProgressStyle};
use nalgebra::DMatrix;

/// A write-only destination for progress messages.
///
/// Messages are purely informational; nothing a sink does can change the outcome of a run.
pub trait Sink {
    fn write(&mut self, message: &str);
}

/// Discards all messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NullSink;

impl Sink for NullSink {
    fn write(&mut self, _message: &str) {}
}

impl Sink for Vec<String> {
    fn write(&mut self, message: &str) {
        self.push(message.to_owned());
    }
}

impl<K: Sink + ?Sized> Sink for &mut K {
    fn write(&mut self, message: &str) {
        (**self).write(message)
    }
}

/// Shows the most recent message on a terminal spinner.
///
/// Clones share the same spinner and message count.
///
/// # Examples
///
/// ```rust
/// use mini_abc::core::{ProgressSink, Sink};
///
/// let mut sink = ProgressSink::hidden();
/// sink.write("iter = 0, eps = 1.5, ess (%) = 1, sims = 200");
/// assert_eq!(sink.n_messages(), 1);
/// sink.finish();
/// ```
#[derive(Clone)]
pub struct ProgressSink {
    pb: ProgressBar,
}

impl ProgressSink {
    /// Creates a spinner labelled with `prefix`, drawn to stderr.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self::from_bar(ProgressBar::new_spinner(), prefix.into())
    }

    /// Creates a sink whose spinner is never drawn.
    pub fn hidden() -> Self {
        Self::from_bar(ProgressBar::hidden(), String::new())
    }

    fn from_bar(pb: ProgressBar, prefix: String) -> Self {
        let style = ProgressStyle::with_template("{prefix} [{elapsed_precise}] {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_prefix(prefix);
        Self { pb }
    }

    /// Number of messages written so far.
    pub fn n_messages(&self) -> u64 {
        self.pb.position()
    }

    /// Stops the spinner, leaving the last message on screen.
    pub fn finish(&self) {
        self.pb.finish();
    }
}

impl Sink for ProgressSink {
    fn write(&mut self, message: &str) {
        self.pb.set_message(message.trim_end().to_owned());
        self.pb.inc(1);
    }
}

/// Stacks parameter vectors of length `dim` into an `n x dim` matrix, one per row.
pub(crate) fn stack_rows(rows: &[Vec<f64>], dim: usize) -> DMatrix<f64> {
    DMatrix::from_fn(rows.len(), dim, |i, j| rows[i][j])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_sink_collects_messages_in_order() {
        let mut log: Vec<String> = Vec::new();
        log.write("first");
        log.write("second");
        assert_eq!(log, vec!["first".to_string(), "second".to_string()]);
    }

    #[test]
    fn mut_ref_forwards_to_inner_sink() {
        fn emit<K: Sink>(mut sink: K) {
            sink.write("forwarded");
        }

        let mut log: Vec<String> = Vec::new();
        emit(&mut log);
        emit(&mut log);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn stack_rows_keeps_row_order() {
        let m = stack_rows(&[vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]], 2);
        assert_eq!(m, DMatrix::from_row_slice(3, 2, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]));
        assert_eq!(stack_rows(&[], 3).shape(), (0, 3));
    }

    #[test]
    fn progress_sink_counts_messages() {
        let mut sink = ProgressSink::hidden();
        for i in 0..5 {
            sink.write(&format!("message {i}"));
        }
        assert_eq!(sink.n_messages(), 5);

        let mut clone = sink.clone();
        clone.write("from the clone");
        assert_eq!(sink.n_messages(), 6);
        sink.finish();
    }
}
