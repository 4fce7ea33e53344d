// Batch sources for the training and evaluation loops

use ndarray::{Array1, ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::errors::{OrtrainError, Result};

/// Features and labels for one step
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Shape `[batch, sample_shape...]`
    pub features: ArrayD<f32>,
    /// Shape `[batch]`
    pub labels: Array1<i64>,
}

impl Batch {
    /// Pair features with labels; the leading dimensions must agree
    pub fn new(features: ArrayD<f32>, labels: Array1<i64>) -> Result<Self> {
        let rows = features.shape().first().copied().unwrap_or(0);
        if features.ndim() < 2 || rows != labels.len() {
            return Err(OrtrainError::ShapeMismatch {
                expected: vec![labels.len()],
                actual: features.shape().to_vec(),
            });
        }
        Ok(Self { features, labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Per-sample shape (batch dimension stripped, empty for a 0-d array)
    pub fn sample_shape(&self) -> &[usize] {
        self.features.shape().get(1..).unwrap_or(&[])
    }

    /// Fail with ShapeMismatch unless the per-sample shape equals `expected`
    pub fn check_shape(&self, expected: &[usize]) -> Result<()> {
        if self.sample_shape() != expected {
            return Err(OrtrainError::ShapeMismatch {
                expected: expected.to_vec(),
                actual: self.sample_shape().to_vec(),
            });
        }
        Ok(())
    }
}

/// Finite, restartable stream of batches
pub trait BatchSource {
    /// Rewind to the first batch (start of a new epoch)
    fn reset(&mut self);

    /// Next batch, or None at the end of the epoch
    fn next_batch(&mut self) -> Result<Option<Batch>>;

    /// Number of batches per epoch, when known
    fn batches_per_epoch(&self) -> Option<usize> {
        None
    }
}

impl<S: BatchSource + ?Sized> BatchSource for Box<S> {
    fn reset(&mut self) {
        (**self).reset()
    }

    fn next_batch(&mut self) -> Result<Option<Batch>> {
        (**self).next_batch()
    }

    fn batches_per_epoch(&self) -> Option<usize> {
        (**self).batches_per_epoch()
    }
}

/// One labelled sample (also the JSONL line format)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub features: Vec<f32>,
    pub label: i64,
}

/// Read samples from a JSON-lines file, one `{"features": [...], "label": n}` per line
pub fn load_jsonl(path: &Path) -> Result<Vec<Sample>> {
    let contents = fs::read_to_string(path)?;
    let mut samples = Vec::new();

    for (line_no, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let sample: Sample = serde_json::from_str(line).map_err(|e| {
            OrtrainError::Config(format!(
                "{}:{}: invalid sample: {}",
                path.display(),
                line_no + 1,
                e
            ))
        })?;
        samples.push(sample);
    }

    info!(path = ?path, samples = samples.len(), "Loaded dataset");
    Ok(samples)
}

/// Batches drawn from samples held in memory
pub struct InMemorySource {
    samples: Vec<Sample>,
    sample_shape: Vec<usize>,
    batch_size: usize,
    order: Vec<usize>,
    cursor: usize,
    rng: Option<StdRng>,
}

impl InMemorySource {
    /// Create a source; every sample must hold `product(sample_shape)` features
    pub fn new(samples: Vec<Sample>, sample_shape: Vec<usize>, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(OrtrainError::Config("batch_size must be at least 1".to_string()));
        }

        let sample_len: usize = sample_shape.iter().product();
        if let Some(bad) = samples.iter().find(|s| s.features.len() != sample_len) {
            return Err(OrtrainError::ShapeMismatch {
                expected: sample_shape,
                actual: vec![bad.features.len()],
            });
        }

        let order = (0..samples.len()).collect();
        Ok(Self {
            samples,
            sample_shape,
            batch_size,
            order,
            cursor: 0,
            rng: None,
        })
    }

    /// Reshuffle sample order on every reset, deterministically from `seed`
    pub fn with_shuffle(mut self, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        self.order.shuffle(&mut rng);
        self.rng = Some(rng);
        self
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl BatchSource for InMemorySource {
    fn reset(&mut self) {
        self.cursor = 0;
        if let Some(rng) = self.rng.as_mut() {
            self.order.shuffle(rng);
        }
    }

    fn next_batch(&mut self) -> Result<Option<Batch>> {
        if self.cursor >= self.order.len() {
            return Ok(None);
        }

        let end = (self.cursor + self.batch_size).min(self.order.len());
        let indices = &self.order[self.cursor..end];
        self.cursor = end;

        let mut features = Vec::with_capacity(indices.len() * self.sample_shape.iter().product::<usize>());
        let mut labels = Vec::with_capacity(indices.len());
        for &i in indices {
            features.extend_from_slice(&self.samples[i].features);
            labels.push(self.samples[i].label);
        }

        let mut shape = Vec::with_capacity(self.sample_shape.len() + 1);
        shape.push(indices.len());
        shape.extend_from_slice(&self.sample_shape);

        let features = ArrayD::from_shape_vec(IxDyn(&shape), features).map_err(|_| {
            OrtrainError::ShapeMismatch {
                expected: self.sample_shape.clone(),
                actual: shape.clone(),
            }
        })?;

        debug!(rows = indices.len(), "Prepared batch");
        Batch::new(features, Array1::from(labels)).map(Some)
    }

    fn batches_per_epoch(&self) -> Option<usize> {
        Some(self.samples.len().div_ceil(self.batch_size))
    }
}
