// Reference training runtime
//
// In-process stand-in for an on-device training runtime. The "graphs" are JSON
// descriptors of a linear softmax classifier and the checkpoint holds its
// weight and bias. Enough to drive the orchestration shell end to end without
// a native training library.

use ndarray::{Array1, Array2, ArrayD, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use super::{
    validate_output_names, CheckpointState, Mode, Optimizer, StepOutput, TrainableModule,
    TrainingRuntime,
};
use crate::artifacts::{ArtifactKind, ArtifactSet, GraphArtifact};
use crate::data::Batch;
use crate::errors::{OrtrainError, Result};
use crate::inference::{InferenceEngine, InferenceOutputs};

/// Marker stored in every reference descriptor
pub const REFERENCE_FORMAT: &str = "ortrain-reference";

/// Checkpoint layout version this runtime reads and writes
pub const CHECKPOINT_VERSION: u32 = 1;

/// Raw scores per class
pub const LOGITS_OUTPUT: &str = "output";

/// Softmax of the logits
pub const PROBABILITIES_OUTPUT: &str = "probabilities";

/// Training or eval graph descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct GraphDescriptor {
    format: String,
    kind: ArtifactKind,
    input_name: String,
    input_shape: Vec<usize>,
    num_classes: usize,
    output_names: Vec<String>,
}

impl GraphDescriptor {
    fn input_dim(&self) -> usize {
        self.input_shape.iter().product()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OptimizerDescriptor {
    format: String,
    kind: ArtifactKind,
    algorithm: String,
    learning_rate: f32,
}

/// Deployment graph with parameters frozen in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct InferenceDescriptor {
    format: String,
    kind: ArtifactKind,
    input_name: String,
    input_shape: Vec<usize>,
    num_classes: usize,
    output_names: Vec<String>,
    weight: Vec<f32>,
    bias: Vec<f32>,
}

/// Weight `[input_dim, num_classes]` (row-major), bias and a step counter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceCheckpoint {
    format: String,
    version: u32,
    input_dim: usize,
    num_classes: usize,
    weight: Vec<f32>,
    bias: Vec<f32>,
    /// Non-trainable: optimizer steps applied so far
    step: u64,
}

impl ReferenceCheckpoint {
    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Optimizer steps applied so far
    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn weight(&self) -> &[f32] {
        &self.weight
    }

    pub fn bias(&self) -> &[f32] {
        &self.bias
    }

    fn weight_view(&self) -> Result<ArrayView2<'_, f32>> {
        ArrayView2::from_shape((self.input_dim, self.num_classes), &self.weight)
            .map_err(OrtrainError::runtime)
    }

    fn bias_view(&self) -> ArrayView1<'_, f32> {
        ArrayView1::from(&self.bias[..])
    }

    fn check_compatible(&self, input_dim: usize, num_classes: usize) -> Result<()> {
        if self.input_dim != input_dim || self.num_classes != num_classes {
            return Err(OrtrainError::runtime(format!(
                "checkpoint holds a {}x{} classifier but the graph expects {}x{}",
                self.input_dim, self.num_classes, input_dim, num_classes
            )));
        }
        Ok(())
    }
}

impl CheckpointState for ReferenceCheckpoint {
    fn version(&self) -> u32 {
        self.version
    }

    fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self)?;
        debug!(path = ?path, step = self.step, "Saved reference checkpoint");
        Ok(())
    }
}

/// Loaded training graph (plus optional eval graph) with gradient buffers
#[derive(Debug)]
pub struct ReferenceModule {
    graph: GraphDescriptor,
    eval_graph: Option<GraphDescriptor>,
    mode: Mode,
    grad_weight: Option<Array2<f32>>,
    grad_bias: Option<Array1<f32>>,
}

impl ReferenceModule {
    pub fn has_eval_graph(&self) -> bool {
        self.eval_graph.is_some()
    }

    /// True once a train-mode pass has run since the last reset
    pub fn has_gradients(&self) -> bool {
        self.grad_weight.is_some()
    }

    /// Eval mode runs the eval graph when one was loaded
    fn active_graph(&self) -> &GraphDescriptor {
        match (self.mode, self.eval_graph.as_ref()) {
            (Mode::Eval, Some(eval)) => eval,
            _ => &self.graph,
        }
    }

    fn gradients(&self) -> Option<(&Array2<f32>, &Array1<f32>)> {
        self.grad_weight.as_ref().zip(self.grad_bias.as_ref())
    }

    fn accumulate(&mut self, grad_weight: Array2<f32>, grad_bias: Array1<f32>) {
        match self.grad_weight.as_mut() {
            Some(existing) => *existing += &grad_weight,
            None => self.grad_weight = Some(grad_weight),
        }
        match self.grad_bias.as_mut() {
            Some(existing) => *existing += &grad_bias,
            None => self.grad_bias = Some(grad_bias),
        }
    }
}

impl TrainableModule for ReferenceModule {
    type Checkpoint = ReferenceCheckpoint;

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
        &self.graph.input_shape
    }

    fn output_names(&self) -> &[String] {
        &self.active_graph().output_names
    }

    fn run(&mut self, checkpoint: &ReferenceCheckpoint, batch: &Batch) -> Result<StepOutput> {
        let graph = self.active_graph();
        let (input_dim, num_classes) = (graph.input_dim(), graph.num_classes);
        batch.check_shape(&graph.input_shape)?;
        checkpoint.check_compatible(input_dim, num_classes)?;

        let rows = batch.len();
        if rows == 0 {
            return Err(OrtrainError::runtime("cannot run an empty batch"));
        }

        let classes = batch
            .labels
            .iter()
            .map(|&label| {
                usize::try_from(label)
                    .ok()
                    .filter(|&c| c < num_classes)
                    .ok_or_else(|| {
                        OrtrainError::runtime(format!(
                            "label {} out of range for {} classes",
                            label, num_classes
                        ))
                    })
            })
            .collect::<Result<Vec<usize>>>()?;

        let x = batch
            .features
            .to_shape((rows, input_dim))
            .map_err(OrtrainError::runtime)?;
        let logits = x.dot(&checkpoint.weight_view()?) + &checkpoint.bias_view();
        let probabilities = softmax_rows(&logits);

        let loss = classes
            .iter()
            .enumerate()
            .map(|(row, &class)| -probabilities[[row, class]].max(f32::MIN_POSITIVE).ln())
            .sum::<f32>()
            / rows as f32;

        if self.mode == Mode::Train {
            // d(mean cross-entropy)/d(logits) = (softmax - onehot) / rows
            let mut grad_logits = probabilities;
            for (row, &class) in classes.iter().enumerate() {
                grad_logits[[row, class]] -= 1.0;
            }
            grad_logits.mapv_inplace(|g| g / rows as f32);

            let grad_weight = x.t().dot(&grad_logits);
            let grad_bias = grad_logits.sum_axis(Axis(0));
            self.accumulate(grad_weight, grad_bias);
        }

        debug!(rows = rows, loss = loss, mode = ?self.mode, "Reference forward pass");
        Ok(StepOutput {
            loss,
            outputs: logits,
        })
    }

    fn reset_gradients(&mut self) -> Result<()> {
        self.grad_weight = None;
        self.grad_bias = None;
        Ok(())
    }

    fn export_inference_graph(
        &self,
        checkpoint: &ReferenceCheckpoint,
        path: &Path,
        output_names: &[&str],
    ) -> Result<GraphArtifact> {
        if output_names.is_empty() {
            return Err(OrtrainError::Config(
                "an inference graph needs at least one output name".to_string(),
            ));
        }
        validate_output_names(output_names, &self.graph.output_names)?;
        checkpoint.check_compatible(self.graph.input_dim(), self.graph.num_classes)?;

        let descriptor = InferenceDescriptor {
            format: REFERENCE_FORMAT.to_string(),
            kind: ArtifactKind::Inference,
            input_name: self.graph.input_name.clone(),
            input_shape: self.graph.input_shape.clone(),
            num_classes: self.graph.num_classes,
            output_names: output_names.iter().map(|s| s.to_string()).collect(),
            weight: checkpoint.weight.clone(),
            bias: checkpoint.bias.clone(),
        };
        write_json(path, &descriptor)?;

        GraphArtifact::open(path, ArtifactKind::Inference)
    }
}

/// Plain SGD over the module's accumulated gradients
#[derive(Debug, Clone)]
pub struct ReferenceOptimizer {
    learning_rate: f32,
}

impl Optimizer for ReferenceOptimizer {
    type Module = ReferenceModule;

    fn step(&mut self, checkpoint: &mut ReferenceCheckpoint, module: &ReferenceModule) -> Result<()> {
        let (grad_weight, grad_bias) = module.gradients().ok_or_else(|| {
            OrtrainError::runtime("optimizer step requested before any forward/backward pass")
        })?;
        checkpoint.check_compatible(module.graph.input_dim(), module.graph.num_classes)?;

        for (w, g) in checkpoint.weight.iter_mut().zip(grad_weight.iter()) {
            *w -= self.learning_rate * g;
        }
        for (b, g) in checkpoint.bias.iter_mut().zip(grad_bias.iter()) {
            *b -= self.learning_rate * g;
        }
        checkpoint.step += 1;

        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }
}

/// The reference runtime itself (stateless; everything lives in the handles)
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceRuntime;

impl ReferenceRuntime {
    pub fn new() -> Self {
        Self
    }
}

impl TrainingRuntime for ReferenceRuntime {
    type Checkpoint = ReferenceCheckpoint;
    type Module = ReferenceModule;
    type Optimizer = ReferenceOptimizer;

    fn name(&self) -> &str {
        "reference"
    }

    fn load_checkpoint(&self, artifact: &GraphArtifact) -> Result<ReferenceCheckpoint> {
        let checkpoint: ReferenceCheckpoint = parse(artifact)?;

        if checkpoint.format != REFERENCE_FORMAT {
            return Err(artifact.corrupt(format!("unexpected format '{}'", checkpoint.format)));
        }
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(artifact.corrupt(format!(
                "unsupported checkpoint version {} (expected {})",
                checkpoint.version, CHECKPOINT_VERSION
            )));
        }
        if checkpoint.weight.len() != checkpoint.input_dim * checkpoint.num_classes
            || checkpoint.bias.len() != checkpoint.num_classes
        {
            return Err(artifact.corrupt("parameter lengths do not match declared dimensions"));
        }

        info!(
            path = ?artifact.path(),
            version = checkpoint.version,
            step = checkpoint.step,
            "Loaded checkpoint"
        );
        Ok(checkpoint)
    }

    fn load_module(
        &self,
        training: &GraphArtifact,
        checkpoint: &ReferenceCheckpoint,
        eval: Option<&GraphArtifact>,
    ) -> Result<ReferenceModule> {
        let graph: GraphDescriptor = parse_graph(training, ArtifactKind::Training)?;
        checkpoint.check_compatible(graph.input_dim(), graph.num_classes)?;

        let eval_graph = match eval {
            Some(artifact) => {
                let eval_graph: GraphDescriptor = parse_graph(artifact, ArtifactKind::Eval)?;
                if eval_graph.input_shape != graph.input_shape
                    || eval_graph.num_classes != graph.num_classes
                {
                    return Err(artifact.corrupt("eval graph does not match the training graph"));
                }
                Some(eval_graph)
            }
            None => None,
        };

        info!(
            input_shape = ?graph.input_shape,
            num_classes = graph.num_classes,
            has_eval = eval_graph.is_some(),
            "Loaded training module"
        );

        Ok(ReferenceModule {
            graph,
            eval_graph,
            mode: Mode::Train,
            grad_weight: None,
            grad_bias: None,
        })
    }

    fn load_optimizer(&self, optimizer: &GraphArtifact, _module: &ReferenceModule) -> Result<ReferenceOptimizer> {
        let descriptor: OptimizerDescriptor = parse(optimizer)?;
        if descriptor.format != REFERENCE_FORMAT || descriptor.kind != ArtifactKind::Optimizer {
            return Err(optimizer.corrupt("not a reference optimizer graph"));
        }
        if descriptor.algorithm != "sgd" {
            return Err(optimizer.corrupt(format!(
                "unsupported optimizer algorithm '{}'",
                descriptor.algorithm
            )));
        }
        if !(descriptor.learning_rate.is_finite() && descriptor.learning_rate > 0.0) {
            return Err(optimizer.corrupt("learning rate must be positive"));
        }

        info!(learning_rate = descriptor.learning_rate, "Loaded optimizer");
        Ok(ReferenceOptimizer {
            learning_rate: descriptor.learning_rate,
        })
    }
}

/// Runs an exported reference inference graph
#[derive(Debug, Clone)]
pub struct ReferenceInferenceEngine {
    descriptor: InferenceDescriptor,
}

impl ReferenceInferenceEngine {
    pub fn load(artifact: &GraphArtifact) -> Result<Self> {
        let descriptor: InferenceDescriptor = parse(artifact)?;
        if descriptor.format != REFERENCE_FORMAT || descriptor.kind != ArtifactKind::Inference {
            return Err(artifact.corrupt("not a reference inference graph"));
        }
        let input_dim: usize = descriptor.input_shape.iter().product();
        if descriptor.weight.len() != input_dim * descriptor.num_classes
            || descriptor.bias.len() != descriptor.num_classes
        {
            return Err(artifact.corrupt("parameter lengths do not match declared dimensions"));
        }
        Ok(Self { descriptor })
    }

    /// Name of the single graph input
    pub fn input_name(&self) -> &str {
        &self.descriptor.input_name
    }
}

impl InferenceEngine for ReferenceInferenceEngine {
    fn output_names(&self) -> &[String] {
        &self.descriptor.output_names
    }

    fn run(&mut self, input: &ArrayD<f32>, output_names: &[&str]) -> Result<InferenceOutputs> {
        validate_output_names(output_names, &self.descriptor.output_names)?;

        let shape = input.shape();
        if shape.len() < 2 || shape[1..] != self.descriptor.input_shape[..] {
            return Err(OrtrainError::ShapeMismatch {
                expected: self.descriptor.input_shape.clone(),
                actual: shape.get(1..).unwrap_or_default().to_vec(),
            });
        }

        let input_dim: usize = self.descriptor.input_shape.iter().product();
        let x = input
            .to_shape((shape[0], input_dim))
            .map_err(OrtrainError::runtime)?;
        let weight = ArrayView2::from_shape((input_dim, self.descriptor.num_classes), &self.descriptor.weight)
            .map_err(OrtrainError::runtime)?;
        let logits = x.dot(&weight) + &ArrayView1::from(&self.descriptor.bias[..]);

        let mut outputs = InferenceOutputs::new();
        for &name in output_names {
            let value = match name {
                PROBABILITIES_OUTPUT => softmax_rows(&logits),
                _ => logits.clone(),
            };
            outputs.push(name, value.into_dyn());
        }
        Ok(outputs)
    }
}

/// Shape and optimizer settings for freshly generated artifacts
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceModelSpec {
    pub input_shape: Vec<usize>,
    pub num_classes: usize,
    pub learning_rate: f32,
    pub seed: u64,
}

impl Default for ReferenceModelSpec {
    fn default() -> Self {
        Self {
            input_shape: vec![4],
            num_classes: 3,
            learning_rate: 0.1,
            seed: 42,
        }
    }
}

/// Write training, eval and optimizer graphs plus an initial checkpoint
///
/// Uses the conventional file names, so `ArtifactSet::discover(dir)` finds them.
pub fn generate_artifacts(dir: &Path, spec: &ReferenceModelSpec) -> Result<ArtifactSet> {
    let input_dim: usize = spec.input_shape.iter().product();
    if input_dim == 0 || spec.num_classes < 2 {
        return Err(OrtrainError::Config(
            "a classifier needs a non-empty input and at least two classes".to_string(),
        ));
    }

    fs::create_dir_all(dir)?;

    let output_names = vec![LOGITS_OUTPUT.to_string(), PROBABILITIES_OUTPUT.to_string()];
    for kind in [ArtifactKind::Training, ArtifactKind::Eval] {
        let graph = GraphDescriptor {
            format: REFERENCE_FORMAT.to_string(),
            kind,
            input_name: "input".to_string(),
            input_shape: spec.input_shape.clone(),
            num_classes: spec.num_classes,
            output_names: output_names.clone(),
        };
        write_json(&dir.join(kind.default_file_name()), &graph)?;
    }

    let optimizer = OptimizerDescriptor {
        format: REFERENCE_FORMAT.to_string(),
        kind: ArtifactKind::Optimizer,
        algorithm: "sgd".to_string(),
        learning_rate: spec.learning_rate,
    };
    write_json(&dir.join(ArtifactKind::Optimizer.default_file_name()), &optimizer)?;

    let mut rng = StdRng::seed_from_u64(spec.seed);
    let bound = 1.0 / (input_dim as f32).sqrt();
    let checkpoint = ReferenceCheckpoint {
        format: REFERENCE_FORMAT.to_string(),
        version: CHECKPOINT_VERSION,
        input_dim,
        num_classes: spec.num_classes,
        weight: (0..input_dim * spec.num_classes)
            .map(|_| rng.gen_range(-bound..bound))
            .collect(),
        bias: vec![0.0; spec.num_classes],
        step: 0,
    };
    checkpoint.save(&dir.join(ArtifactKind::Checkpoint.default_file_name()))?;

    info!(dir = ?dir, input_shape = ?spec.input_shape, num_classes = spec.num_classes, "Generated reference artifacts");
    ArtifactSet::discover(dir)
}

/// True when `bytes` is a reference descriptor rather than a native graph
pub fn is_reference_artifact(bytes: &[u8]) -> bool {
    #[derive(Deserialize)]
    struct Header {
        format: String,
    }

    serde_json::from_slice::<Header>(bytes)
        .map(|header| header.format == REFERENCE_FORMAT)
        .unwrap_or(false)
}

fn softmax_rows(logits: &Array2<f32>) -> Array2<f32> {
    let mut out = logits.clone();
    for mut row in out.axis_iter_mut(Axis(0)) {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    out
}

fn parse<T: DeserializeOwned>(artifact: &GraphArtifact) -> Result<T> {
    let bytes = artifact.read_bytes()?;
    serde_json::from_slice(&bytes).map_err(|e| artifact.corrupt(e))
}

fn parse_graph(artifact: &GraphArtifact, kind: ArtifactKind) -> Result<GraphDescriptor> {
    let graph: GraphDescriptor = parse(artifact)?;
    if graph.format != REFERENCE_FORMAT || graph.kind != kind {
        return Err(artifact.corrupt(format!("not a reference {} graph", kind)));
    }
    if graph.input_dim() == 0 || graph.num_classes == 0 {
        return Err(artifact.corrupt("graph declares an empty input or output"));
    }
    Ok(graph)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, IxDyn};
    use tempfile::TempDir;

    fn setup() -> (TempDir, ArtifactSet) {
        let temp_dir = TempDir::new().unwrap();
        let set = generate_artifacts(temp_dir.path(), &ReferenceModelSpec::default()).unwrap();
        (temp_dir, set)
    }

    fn batch(labels: Vec<i64>) -> Batch {
        let rows = labels.len();
        let features = (0..rows * 4).map(|i| (i as f32) * 0.1).collect();
        Batch::new(
            ArrayD::from_shape_vec(IxDyn(&[rows, 4]), features).unwrap(),
            Array1::from(labels),
        )
        .unwrap()
    }

    #[test]
    fn test_generated_artifacts_load() {
        let (_dir, set) = setup();
        let runtime = ReferenceRuntime::new();
        let checkpoint = runtime.load_checkpoint(&set.checkpoint).unwrap();
        let module = runtime.load_module(&set.training, &checkpoint, set.eval.as_ref()).unwrap();
        let optimizer = runtime.load_optimizer(&set.optimizer, &module).unwrap();

        assert_eq!(checkpoint.version(), CHECKPOINT_VERSION);
        assert!(module.has_eval_graph());
        assert_eq!(module.input_shape(), &[4]);
        assert!((optimizer.learning_rate() - 0.1).abs() < f32::EPSILON);
    }

    #[test]
    fn test_eval_mode_runs_eval_graph() {
        let (dir, set) = setup();
        let eval_path = dir.path().join(ArtifactKind::Eval.default_file_name());
        let mut eval: GraphDescriptor = serde_json::from_slice(&fs::read(&eval_path).unwrap()).unwrap();
        eval.output_names = vec![LOGITS_OUTPUT.to_string()];
        write_json(&eval_path, &eval).unwrap();
        let eval_artifact = GraphArtifact::open(&eval_path, ArtifactKind::Eval).unwrap();

        let runtime = ReferenceRuntime::new();
        let checkpoint = runtime.load_checkpoint(&set.checkpoint).unwrap();
        let mut module = runtime.load_module(&set.training, &checkpoint, Some(&eval_artifact)).unwrap();
        assert_eq!(module.output_names().len(), 2);

        module.eval_mode();
        assert_eq!(module.output_names(), &[LOGITS_OUTPUT.to_string()]);
        let output = module.run(&checkpoint, &batch(vec![0, 2])).unwrap();
        assert_eq!(output.outputs.dim(), (2, 3));
        assert!(!module.has_gradients());

        // Without an eval graph, eval mode falls back to the training graph
        let mut module = runtime.load_module(&set.training, &checkpoint, None).unwrap();
        module.eval_mode();
        assert_eq!(module.output_names().len(), 2);
    }

    #[test]
    fn test_graph_used_as_checkpoint_is_corrupt() {
        let (_dir, set) = setup();
        let wrong = GraphArtifact::open(set.training.path(), ArtifactKind::Checkpoint).unwrap();
        let err = ReferenceRuntime::new().load_checkpoint(&wrong).unwrap_err();
        assert!(matches!(err, OrtrainError::ArtifactCorrupt { .. }));
    }

    #[test]
    fn test_future_checkpoint_version_rejected() {
        let (dir, set) = setup();
        let mut checkpoint = ReferenceRuntime::new().load_checkpoint(&set.checkpoint).unwrap();
        checkpoint.version = CHECKPOINT_VERSION + 1;
        let path = dir.path().join("future");
        checkpoint.save(&path).unwrap();

        let artifact = GraphArtifact::open(&path, ArtifactKind::Checkpoint).unwrap();
        let err = ReferenceRuntime::new().load_checkpoint(&artifact).unwrap_err();
        assert!(err.to_string().contains("unsupported checkpoint version"));
    }

    #[test]
    fn test_step_without_gradients_fails() {
        let (_dir, set) = setup();
        let runtime = ReferenceRuntime::new();
        let mut checkpoint = runtime.load_checkpoint(&set.checkpoint).unwrap();
        let module = runtime.load_module(&set.training, &checkpoint, None).unwrap();
        let mut optimizer = runtime.load_optimizer(&set.optimizer, &module).unwrap();

        let err = optimizer.step(&mut checkpoint, &module).unwrap_err();
        assert!(matches!(err, OrtrainError::Runtime(_)));
        assert_eq!(checkpoint.step(), 0);
    }

    #[test]
    fn test_gradients_accumulate_until_reset() {
        let (_dir, set) = setup();
        let runtime = ReferenceRuntime::new();
        let checkpoint = runtime.load_checkpoint(&set.checkpoint).unwrap();
        let mut module = runtime.load_module(&set.training, &checkpoint, None).unwrap();

        module.run(&checkpoint, &batch(vec![0, 1])).unwrap();
        let first = module.grad_bias.clone().unwrap();
        module.run(&checkpoint, &batch(vec![0, 1])).unwrap();
        let doubled = module.grad_bias.clone().unwrap();
        for (a, b) in first.iter().zip(doubled.iter()) {
            assert!((2.0 * a - b).abs() < 1e-6);
        }

        module.reset_gradients().unwrap();
        assert!(!module.has_gradients());
    }

    #[test]
    fn test_eval_mode_leaves_no_gradients() {
        let (_dir, set) = setup();
        let runtime = ReferenceRuntime::new();
        let checkpoint = runtime.load_checkpoint(&set.checkpoint).unwrap();
        let mut module = runtime.load_module(&set.training, &checkpoint, None).unwrap();

        module.eval_mode();
        module.run(&checkpoint, &batch(vec![2])).unwrap();
        assert!(!module.has_gradients());
    }

    #[test]
    fn test_label_out_of_range() {
        let (_dir, set) = setup();
        let runtime = ReferenceRuntime::new();
        let checkpoint = runtime.load_checkpoint(&set.checkpoint).unwrap();
        let mut module = runtime.load_module(&set.training, &checkpoint, None).unwrap();

        let err = module.run(&checkpoint, &batch(vec![3])).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let logits = ndarray::arr2(&[[1.0, 2.0, 3.0], [100.0, 100.0, -100.0]]);
        let probs = softmax_rows(&logits);
        for row in probs.axis_iter(Axis(0)) {
            assert!((row.sum() - 1.0).abs() < 1e-5);
        }
        assert!((probs[[1, 0]] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_is_reference_artifact() {
        assert!(is_reference_artifact(br#"{"format": "ortrain-reference", "kind": "inference"}"#));
        assert!(!is_reference_artifact(b"\x08\x07\x12\x04onnx"));
    }
}
