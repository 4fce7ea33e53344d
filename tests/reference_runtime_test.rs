// Integration test: reference runtime end to end
// Generate artifacts, train, evaluate, export an inference graph and run it

mod common;

use anyhow::Result;
use ndarray::{Array1, Array2, ArrayD};
use std::fs;
use tempfile::TempDir;

use common::separable_samples;
use ortrain::artifacts::{ArtifactKind, ArtifactPaths, ArtifactSet, GraphArtifact};
use ortrain::data::{Batch, InMemorySource, Sample};
use ortrain::inference::{self, InferenceEngine};
use ortrain::runtime::{
    generate_artifacts, ReferenceInferenceEngine, ReferenceModelSpec, ReferenceRuntime,
    TrainableModule, TrainingRuntime,
};
use ortrain::training::{CheckpointManager, SnapshotMetrics, TrainingSession};
use ortrain::OrtrainError;

fn generated() -> Result<(TempDir, ArtifactSet)> {
    let dir = TempDir::new()?;
    let artifacts = generate_artifacts(dir.path(), &ReferenceModelSpec::default())?;
    Ok((dir, artifacts))
}

fn input_of(samples: &[Sample]) -> ArrayD<f32> {
    let width = samples[0].features.len();
    let flat: Vec<f32> = samples.iter().flat_map(|s| s.features.clone()).collect();
    Array2::from_shape_vec((samples.len(), width), flat)
        .unwrap()
        .into_dyn()
}

fn open_failure(artifacts: ArtifactSet) -> OrtrainError {
    match TrainingSession::open(ReferenceRuntime::new(), artifacts) {
        Ok(_) => panic!("session should not open"),
        Err(e) => e,
    }
}

#[test]
fn test_generated_artifacts_are_discoverable() -> Result<()> {
    let (_dir, artifacts) = generated()?;
    assert!(artifacts.eval.is_some());
    assert_eq!(artifacts.checkpoint.kind(), ArtifactKind::Checkpoint);

    let session = TrainingSession::open(ReferenceRuntime::new(), artifacts)?;
    assert_eq!(session.module().input_shape(), &[4]);
    assert_eq!(session.checkpoint().step(), 0);
    Ok(())
}

#[test]
fn test_missing_checkpoint_is_not_found() -> Result<()> {
    let (dir, _) = generated()?;
    fs::remove_file(dir.path().join("checkpoint"))?;

    let err = ArtifactSet::discover(dir.path()).unwrap_err();
    match err {
        OrtrainError::ArtifactNotFound { kind, .. } => assert_eq!(kind, ArtifactKind::Checkpoint),
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[test]
fn test_malformed_checkpoint_is_artifact_error() -> Result<()> {
    let (dir, _) = generated()?;
    fs::write(dir.path().join("checkpoint"), "{ this is not json")?;

    let err = open_failure(ArtifactSet::discover(dir.path())?);
    assert!(err.is_artifact_error(), "got {err:?}");
    assert!(matches!(
        err,
        OrtrainError::ArtifactCorrupt {
            kind: ArtifactKind::Checkpoint,
            ..
        }
    ));
    Ok(())
}

#[test]
fn test_checkpoint_with_wrong_dimensions_is_rejected() -> Result<()> {
    let (dir, _) = generated()?;
    let other = TempDir::new()?;
    let spec = ReferenceModelSpec {
        input_shape: vec![6],
        ..ReferenceModelSpec::default()
    };
    generate_artifacts(other.path(), &spec)?;

    let paths = ArtifactPaths {
        checkpoint: Some(other.path().join("checkpoint")),
        ..ArtifactPaths::default()
    };
    let err = open_failure(ArtifactSet::from_paths(dir.path(), &paths)?);
    assert!(matches!(err, OrtrainError::Runtime(_)), "got {err:?}");
    assert!(err.to_string().contains("4x3"));
    Ok(())
}

#[test]
fn test_eval_is_deterministic_and_leaves_checkpoint_alone() -> Result<()> {
    let (_dir, artifacts) = generated()?;
    let runtime = ReferenceRuntime::new();
    let checkpoint = runtime.load_checkpoint(&artifacts.checkpoint)?;
    let mut module = runtime.load_module(&artifacts.training, &checkpoint, artifacts.eval.as_ref())?;
    let before = checkpoint.clone();

    let samples = separable_samples(2);
    let batch = Batch::new(
        input_of(&samples),
        Array1::from(samples.iter().map(|s| s.label).collect::<Vec<_>>()),
    )?;

    module.eval_mode();
    let first = module.run(&checkpoint, &batch)?;
    let second = module.run(&checkpoint, &batch)?;
    assert_eq!(first.loss, second.loss);
    assert_eq!(first.outputs, second.outputs);
    assert!(!module.has_gradients());
    assert_eq!(checkpoint, before);
    Ok(())
}

#[test]
fn test_session_evaluation_repeats_exactly() -> Result<()> {
    let (_dir, artifacts) = generated()?;
    let mut session = TrainingSession::open(ReferenceRuntime::new(), artifacts)?;
    let mut source = InMemorySource::new(separable_samples(4), vec![4], 5)?;

    let first = session.evaluate(&mut source)?;
    let second = session.evaluate(&mut source)?;
    assert_eq!(first.losses, second.losses);
    assert_eq!(first.accuracy, second.accuracy);
    assert_eq!(second.epoch, 2);
    assert_eq!(session.checkpoint().step(), 0);
    Ok(())
}

#[test]
fn test_one_step_changes_exported_predictions() -> Result<()> {
    let (dir, artifacts) = generated()?;
    let mut session = TrainingSession::open(ReferenceRuntime::new(), artifacts)?;
    let samples = separable_samples(2);
    let input = input_of(&samples);

    let before = session.export_and_run(
        &dir.path().join("before.json"),
        &["output"],
        ReferenceInferenceEngine::load,
        &input,
    )?;

    // A single batch, so exactly one optimizer step
    let mut source = InMemorySource::new(samples.clone(), vec![4], samples.len())?;
    let report = session.train_epoch(&mut source)?;
    assert_eq!(report.batches, 1);
    assert_eq!(session.checkpoint().step(), 1);

    let after = session.export_and_run(
        &dir.path().join("after.json"),
        &["output"],
        ReferenceInferenceEngine::load,
        &input,
    )?;

    assert_ne!(before.outputs.get("output"), after.outputs.get("output"));
    assert_eq!(after.labels.len(), samples.len());
    Ok(())
}

#[test]
fn test_exported_graph_only_serves_requested_outputs() -> Result<()> {
    let (dir, artifacts) = generated()?;
    let session = TrainingSession::open(ReferenceRuntime::new(), artifacts)?;
    let path = dir.path().join("inference_model.onnx");

    let artifact = session.export_inference(&path, &["output"])?;
    let mut engine = ReferenceInferenceEngine::load(&artifact)?;
    assert_eq!(engine.output_names(), &["output".to_string()]);

    let input = input_of(&separable_samples(1));
    let outputs = engine.run(&input, &["output"])?;
    assert_eq!(outputs.get("output").map(|o| o.shape().to_vec()), Some(vec![3, 3]));

    for unknown in ["probabilities", "logits"] {
        match engine.run(&input, &[unknown]).unwrap_err() {
            OrtrainError::UnknownOutput { name, available } => {
                assert_eq!(name, unknown);
                assert_eq!(available, vec!["output".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    // Exporting a name the module never declared fails before writing
    let bogus = dir.path().join("bogus.json");
    let err = session.export_inference(&bogus, &["bogus"]).unwrap_err();
    assert!(matches!(err, OrtrainError::UnknownOutput { .. }));
    assert!(!bogus.exists());
    Ok(())
}

#[test]
fn test_probabilities_output_sums_to_one() -> Result<()> {
    let (dir, artifacts) = generated()?;
    let session = TrainingSession::open(ReferenceRuntime::new(), artifacts)?;
    let path = dir.path().join("inference_model.onnx");
    session.export_inference(&path, &["output", "probabilities"])?;

    let mut engine = inference::open_engine(&path, "input")?;
    assert_eq!(
        engine.output_names(),
        &["output".to_string(), "probabilities".to_string()]
    );
    let prediction = inference::predict(
        &mut engine,
        &input_of(&separable_samples(2)),
        &["probabilities", "output"],
    )?;

    let probabilities = prediction.outputs.get("probabilities").unwrap();
    for row in probabilities.rows() {
        assert!((row.sum() - 1.0).abs() < 1e-5);
    }

    // Softmax is monotonic, so labels agree with the logits' argmax
    let logits = prediction.outputs.get("output").unwrap();
    assert_eq!(prediction.labels, inference::argmax_output(logits)?);
    Ok(())
}

#[test]
fn test_inference_shape_mismatch() -> Result<()> {
    let (dir, artifacts) = generated()?;
    let session = TrainingSession::open(ReferenceRuntime::new(), artifacts)?;
    let artifact = session.export_inference(&dir.path().join("inference.json"), &["output"])?;
    let mut engine = ReferenceInferenceEngine::load(&artifact)?;

    let input = ArrayD::<f32>::zeros(vec![2, 5]);
    match engine.run(&input, &["output"]).unwrap_err() {
        OrtrainError::ShapeMismatch { expected, actual } => {
            assert_eq!(expected, vec![4]);
            assert_eq!(actual, vec![5]);
        }
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[test]
fn test_training_reduces_loss_and_snapshots_restore() -> Result<()> {
    let (dir, artifacts) = generated()?;
    let mut session = TrainingSession::open(ReferenceRuntime::new(), artifacts)?;
    let mut source = InMemorySource::new(separable_samples(10), vec![4], 6)?;

    let first = session.train_epoch(&mut source)?;
    let mut last = first.clone();
    for _ in 0..29 {
        last = session.train_epoch(&mut source)?;
    }
    let first_loss = first.mean_loss.unwrap();
    let last_loss = last.mean_loss.unwrap();
    println!("Loss: {:.4} -> {:.4}", first_loss, last_loss);
    assert!(last_loss < first_loss);
    assert_eq!(last.epoch, 30);
    assert_eq!(session.checkpoint().step(), 150);

    let eval = session.evaluate(&mut source)?;
    assert!(eval.accuracy.unwrap() > 0.9, "accuracy {:?}", eval.accuracy);

    let manager = CheckpointManager::new(dir.path().join("snapshots"), 3)?;
    let snapshot = session.snapshot(
        &manager,
        SnapshotMetrics {
            train_loss: last.mean_loss,
            eval_loss: eval.mean_loss,
            eval_accuracy: eval.accuracy,
        },
    )?;
    assert_eq!(snapshot.epoch, 30);
    assert_eq!(snapshot.state_version, 1);

    let restored: GraphArtifact = manager.restore_snapshot(&snapshot.id)?;
    let checkpoint = ReferenceRuntime::new().load_checkpoint(&restored)?;
    assert_eq!(checkpoint.step(), session.checkpoint().step());
    for (restored, live) in checkpoint.weight().iter().zip(session.checkpoint().weight()) {
        assert!((restored - live).abs() < 1e-6);
    }
    Ok(())
}

#[test]
fn test_tampered_snapshot_is_corrupt() -> Result<()> {
    let (dir, artifacts) = generated()?;
    let session = TrainingSession::open(ReferenceRuntime::new(), artifacts)?;
    let manager = CheckpointManager::new(dir.path().join("snapshots"), 3)?;
    let snapshot = session.snapshot(&manager, SnapshotMetrics::default())?;

    fs::write(&snapshot.state_path, "{}")?;
    let err = manager.restore_snapshot(&snapshot.id).unwrap_err();
    assert!(matches!(err, OrtrainError::ArtifactCorrupt { .. }), "got {err:?}");
    Ok(())
}
