// Shared test helpers: a call-recording mock runtime and small datasets

#![allow(dead_code)]

use ndarray::{Array2, Axis};
use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use ortrain::artifacts::{ArtifactKind, GraphArtifact};
use ortrain::data::{Batch, Sample};
use ortrain::runtime::{
    validate_output_names, CheckpointState, Mode, Optimizer, StepOutput, TrainableModule,
    TrainingRuntime,
};
use ortrain::{OrtrainError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Forward,
    Step,
    Reset,
}

pub type CallLog = Rc<RefCell<Vec<Call>>>;

/// Checkpoint blob is a single scale factor written as text
#[derive(Debug, Clone, PartialEq)]
pub struct MockCheckpoint {
    pub scale: f32,
    pub steps: u32,
}

impl CheckpointState for MockCheckpoint {
    fn version(&self) -> u32 {
        1
    }

    fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.scale.to_string())?;
        Ok(())
    }
}

pub struct MockModule {
    log: CallLog,
    mode: Mode,
    input_shape: Vec<usize>,
    output_names: Vec<String>,
    has_gradients: bool,
    /// Scale decrement the next step applies; grows with every train forward
    pending_grad: f32,
    forwards: usize,
    fail_on_forward: Option<usize>,
}

impl TrainableModule for MockModule {
    type Checkpoint = MockCheckpoint;

    fn train_mode(&mut self) {
        self.mode = Mode::Train;
    }

    fn eval_mode(&mut self) {
        self.mode = Mode::Eval;
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    fn output_names(&self) -> &[String] {
        &self.output_names
    }

    fn run(&mut self, checkpoint: &MockCheckpoint, batch: &Batch) -> Result<StepOutput> {
        self.log.borrow_mut().push(Call::Forward);
        self.forwards += 1;
        if self.fail_on_forward == Some(self.forwards) {
            return Err(OrtrainError::runtime("injected failure"));
        }
        batch.check_shape(&self.input_shape)?;

        let rows = batch.len();
        let x = batch
            .features
            .to_shape((rows, self.input_shape[0]))
            .map_err(OrtrainError::runtime)?;
        let first = x.index_axis(Axis(1), 0).mapv(|v| v * checkpoint.scale);

        let mut outputs = Array2::<f32>::zeros((rows, 2));
        outputs.column_mut(0).assign(&first);
        outputs.column_mut(1).assign(&first.mapv(|v| -v));

        let loss = x.sum() * checkpoint.scale / rows as f32;
        if self.mode == Mode::Train {
            self.has_gradients = true;
            self.pending_grad += 0.1;
        }
        Ok(StepOutput { loss, outputs })
    }

    fn reset_gradients(&mut self) -> Result<()> {
        self.log.borrow_mut().push(Call::Reset);
        self.has_gradients = false;
        self.pending_grad = 0.0;
        Ok(())
    }

    fn export_inference_graph(
        &self,
        checkpoint: &MockCheckpoint,
        path: &Path,
        output_names: &[&str],
    ) -> Result<GraphArtifact> {
        validate_output_names(output_names, &self.output_names)?;
        fs::write(path, format!("{} {}", checkpoint.scale, output_names.join(",")))?;
        GraphArtifact::open(path, ArtifactKind::Inference)
    }
}

pub struct MockOptimizer {
    log: CallLog,
    steps: usize,
    fail_on_step: Option<usize>,
}

impl Optimizer for MockOptimizer {
    type Module = MockModule;

    fn step(&mut self, checkpoint: &mut MockCheckpoint, module: &MockModule) -> Result<()> {
        self.log.borrow_mut().push(Call::Step);
        self.steps += 1;
        if self.fail_on_step == Some(self.steps) {
            return Err(OrtrainError::runtime("injected step failure"));
        }
        if !module.has_gradients {
            return Err(OrtrainError::runtime("no gradients"));
        }
        checkpoint.scale -= module.pending_grad;
        checkpoint.steps += 1;
        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        0.1
    }
}

/// Records every forward/step/reset; can fail on the n-th forward pass or step
pub struct MockRuntime {
    pub log: CallLog,
    pub input_shape: Vec<usize>,
    pub fail_on_forward: Option<usize>,
    pub fail_on_step: Option<usize>,
}

impl MockRuntime {
    pub fn new(input_shape: Vec<usize>) -> Self {
        Self {
            log: Rc::new(RefCell::new(Vec::new())),
            input_shape,
            fail_on_forward: None,
            fail_on_step: None,
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.log.borrow().clone()
    }
}

impl TrainingRuntime for MockRuntime {
    type Checkpoint = MockCheckpoint;
    type Module = MockModule;
    type Optimizer = MockOptimizer;

    fn name(&self) -> &str {
        "mock"
    }

    fn load_checkpoint(&self, artifact: &GraphArtifact) -> Result<MockCheckpoint> {
        let bytes = artifact.read_bytes()?;
        let scale = String::from_utf8_lossy(&bytes)
            .trim()
            .parse::<f32>()
            .map_err(|e| artifact.corrupt(e))?;
        Ok(MockCheckpoint { scale, steps: 0 })
    }

    fn load_module(
        &self,
        _training: &GraphArtifact,
        _checkpoint: &MockCheckpoint,
        _eval: Option<&GraphArtifact>,
    ) -> Result<MockModule> {
        Ok(MockModule {
            log: Rc::clone(&self.log),
            mode: Mode::Train,
            input_shape: self.input_shape.clone(),
            output_names: vec!["output".to_string()],
            has_gradients: false,
            pending_grad: 0.0,
            forwards: 0,
            fail_on_forward: self.fail_on_forward,
        })
    }

    fn load_optimizer(&self, _optimizer: &GraphArtifact, _module: &MockModule) -> Result<MockOptimizer> {
        Ok(MockOptimizer {
            log: Rc::clone(&self.log),
            steps: 0,
            fail_on_step: self.fail_on_step,
        })
    }
}

/// Write placeholder artifacts in the conventional layout
pub fn write_mock_artifacts(dir: &Path, scale: &str) {
    fs::write(dir.join("training_model.onnx"), "training").unwrap();
    fs::write(dir.join("optimizer_model.onnx"), "optimizer").unwrap();
    fs::write(dir.join("checkpoint"), scale).unwrap();
}

/// Linearly separable 3-class data over 4 features
pub fn separable_samples(per_class: usize) -> Vec<Sample> {
    let mut samples = Vec::new();
    for i in 0..per_class {
        for class in 0..3 {
            let mut features = vec![0.05 * (i % 3) as f32; 4];
            features[class] = 1.0 + 0.1 * (i % 2) as f32;
            samples.push(Sample {
                features,
                label: class as i64,
            });
        }
    }
    samples
}

/// Samples whose feature sum differs per sample, so per-batch losses differ
pub fn ramp_samples(n: usize, width: usize) -> Vec<Sample> {
    (0..n)
        .map(|i| Sample {
            features: vec![i as f32 + 1.0; width],
            label: (i % 2) as i64,
        })
        .collect()
}
