// Per-epoch loss and accuracy accumulators

/// Ordered per-batch losses, reduced to their mean at epoch end
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LossAccumulator {
    values: Vec<f32>,
}

impl LossAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, loss: f32) {
        self.values.push(loss);
    }

    /// Losses in insertion order
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Arithmetic mean, summed in insertion order; None when empty
    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        let sum: f64 = self.values.iter().map(|&v| f64::from(v)).sum();
        Some(sum / self.values.len() as f64)
    }

    /// Hand back the collected losses and start over
    pub fn take(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.values)
    }

    pub fn reset(&mut self) {
        self.values.clear();
    }
}

/// Predicted-vs-actual label counter, finalized once per epoch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccuracyMetric {
    correct: usize,
    total: usize,
}

impl AccuracyMetric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one batch of predictions
    pub fn update(&mut self, predicted: &[usize], actual: &[i64]) {
        for (&p, &a) in predicted.iter().zip(actual.iter()) {
            if usize::try_from(a).map(|a| a == p).unwrap_or(false) {
                self.correct += 1;
            }
            self.total += 1;
        }
    }

    pub fn correct(&self) -> usize {
        self.correct
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Fraction correct in [0, 1]; None before any prediction
    pub fn finalize(&self) -> Option<f64> {
        if self.total == 0 {
            None
        } else {
            Some(self.correct as f64 / self.total as f64)
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
