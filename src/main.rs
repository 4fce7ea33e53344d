// ortrain - On-device training orchestration
// Main entry point

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{ArrayD, IxDyn};
use std::path::{Path, PathBuf};
use tracing::warn;
use tracing_subscriber::prelude::*;

use ortrain::artifacts::{ArtifactKind, ArtifactSet};
use ortrain::config::{load_config, Config};
use ortrain::data::{load_jsonl, BatchSource, InMemorySource, Sample};
use ortrain::errors::user_message;
use ortrain::inference::{open_engine, predict};
use ortrain::runtime::{generate_artifacts, ReferenceModelSpec, ReferenceRuntime, TrainableModule};
use ortrain::training::{CheckpointManager, SnapshotMetrics, TrainingSession};
use ortrain::OrtrainError;

#[derive(Parser, Debug)]
#[command(name = "ortrain")]
#[command(about = "On-device training orchestration", version)]
struct Args {
    /// Config file (default: ./ortrain.toml, then ~/.ortrain/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write reference training/eval/optimizer graphs and an initial checkpoint
    Generate {
        /// Output directory (default: artifacts.dir from config)
        #[arg(long)]
        out: Option<PathBuf>,
        /// Features per sample
        #[arg(long, default_value_t = 4)]
        features: usize,
        /// Number of classes
        #[arg(long, default_value_t = 3)]
        classes: usize,
        /// SGD learning rate
        #[arg(long, default_value_t = 0.1)]
        lr: f32,
        /// Seed for parameter initialization
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Train, evaluate, snapshot and export the inference graph
    Train {
        #[arg(long)]
        artifacts: Option<PathBuf>,
        /// Training samples (JSONL)
        #[arg(long)]
        data: Option<PathBuf>,
        /// Held-out samples (JSONL)
        #[arg(long = "eval-data")]
        eval_data: Option<PathBuf>,
        #[arg(long)]
        epochs: Option<usize>,
    },
    /// Evaluate the current checkpoint without training
    Eval {
        #[arg(long)]
        artifacts: Option<PathBuf>,
        /// Samples to evaluate (JSONL)
        #[arg(long)]
        data: Option<PathBuf>,
    },
    /// Run one input through an exported inference graph
    Infer {
        /// Graph path (default: inference.graph from config)
        #[arg(long)]
        graph: Option<PathBuf>,
        /// Comma-separated feature values for a single sample
        #[arg(long)]
        input: String,
        /// Output name to request (repeatable; default: inference.output_names)
        #[arg(long = "output")]
        outputs: Vec<String>,
    },
    /// Checkpoint snapshot commands
    Checkpoints {
        #[command(subcommand)]
        checkpoint_command: CheckpointCommand,
    },
}

#[derive(Subcommand, Debug)]
enum CheckpointCommand {
    /// List snapshots, newest first
    List,
    /// Copy a snapshot's checkpoint back into the artifacts directory
    Restore {
        /// Snapshot ID
        id: String,
        /// Artifacts directory to restore into (default: artifacts.dir)
        #[arg(long)]
        artifacts: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    // Suppress ONNX Runtime verbose logs before any ORT code runs
    // ORT_LOGGING_LEVEL: 0=Verbose, 1=Info, 2=Warning, 3=Error, 4=Fatal
    std::env::set_var("ORT_LOGGING_LEVEL", "3");

    let args = Args::parse();
    let config = load_config(args.config.as_deref()).map_err(friendly)?;

    init_tracing(&config.log_level);

    match args.command {
        Command::Generate {
            out,
            features,
            classes,
            lr,
            seed,
        } => {
            let dir = out.unwrap_or_else(|| config.artifacts.dir.clone());
            let spec = ReferenceModelSpec {
                input_shape: vec![features],
                num_classes: classes,
                learning_rate: lr,
                seed,
            };
            generate_artifacts(&dir, &spec).map_err(friendly)?;
            println!("Generated reference artifacts in {}", dir.display());
            Ok(())
        }
        Command::Train {
            artifacts,
            data,
            eval_data,
            epochs,
        } => run_train(&config, artifacts, data, eval_data, epochs),
        Command::Eval { artifacts, data } => run_eval(&config, artifacts, data),
        Command::Infer {
            graph,
            input,
            outputs,
        } => run_infer(&config, graph, &input, outputs),
        Command::Checkpoints { checkpoint_command } => {
            run_checkpoint_command(&config, checkpoint_command)
        }
    }
}

/// Turn artifact errors into the actionable multi-line message
fn friendly(error: OrtrainError) -> anyhow::Error {
    anyhow::anyhow!(user_message(&error))
}

fn open_session(config: &Config, artifacts_dir: &Path) -> Result<TrainingSession<ReferenceRuntime>> {
    let artifacts = ArtifactSet::from_paths(artifacts_dir, &config.artifacts.paths).map_err(friendly)?;
    TrainingSession::open(ReferenceRuntime::new(), artifacts).map_err(friendly)
}

fn load_source(
    path: &Path,
    input_shape: &[usize],
    batch_size: usize,
    shuffle_seed: Option<u64>,
) -> Result<InMemorySource> {
    let samples: Vec<Sample> =
        load_jsonl(path).with_context(|| format!("Failed to load dataset {}", path.display()))?;
    if samples.is_empty() {
        bail!("Dataset {} contains no samples", path.display());
    }

    let source = InMemorySource::new(samples, input_shape.to_vec(), batch_size)?;
    Ok(match shuffle_seed {
        Some(seed) => source.with_shuffle(seed),
        None => source,
    })
}

fn epoch_progress_bar(batches: Option<usize>, epoch: usize, total: usize) -> ProgressBar {
    let bar = match batches {
        Some(n) => ProgressBar::new(n as u64),
        None => ProgressBar::new_spinner(),
    };
    if let Ok(style) = ProgressStyle::with_template(
        "epoch {prefix} [{bar:30.cyan/blue}] {pos}/{len} batches {msg}",
    ) {
        bar.set_style(style.progress_chars("=> "));
    }
    bar.set_prefix(format!("{}/{}", epoch, total));
    bar
}

fn run_train(
    config: &Config,
    artifacts: Option<PathBuf>,
    data: Option<PathBuf>,
    eval_data: Option<PathBuf>,
    epochs: Option<usize>,
) -> Result<()> {
    let artifacts_dir = artifacts.unwrap_or_else(|| config.artifacts.dir.clone());
    let data = data
        .or_else(|| config.training.data.clone())
        .context("No training data: pass --data or set training.data in the config")?;
    let eval_data = eval_data.or_else(|| config.training.eval_data.clone());
    let epochs = epochs.unwrap_or(config.training.epochs);
    if epochs == 0 {
        bail!("--epochs must be at least 1");
    }

    let mut session = open_session(config, &artifacts_dir)?;
    let input_shape = session.module().input_shape().to_vec();
    let batch_size = config.training.batch_size;
    let seed = config.training.shuffle.then_some(config.training.seed);

    let mut train_source = load_source(&data, &input_shape, batch_size, seed)?;
    let mut eval_source = match &eval_data {
        Some(path) => load_source(path, &input_shape, batch_size, None)?,
        None => {
            warn!(
                data = ?data,
                "No held-out eval data configured; evaluating on the training data"
            );
            load_source(&data, &input_shape, batch_size, None)?
        }
    };

    let manager = CheckpointManager::new(config.checkpoints.dir.clone(), config.checkpoints.max_checkpoints)
        .map_err(friendly)?;

    for epoch in 1..=epochs {
        let bar = epoch_progress_bar(
            train_source.batches_per_epoch(),
            epoch,
            epochs,
        );
        let report = session
            .train_epoch_with(&mut train_source, |_, loss| {
                bar.set_message(format!("loss {:.4}", loss));
                bar.inc(1);
            })
            .map_err(friendly)?;
        bar.finish_and_clear();

        let eval = session.evaluate(&mut eval_source).map_err(friendly)?;

        println!(
            "epoch {}/{}: train loss {:.4}, eval loss {:.4}, accuracy {:.2}%",
            epoch,
            epochs,
            report.mean_loss.unwrap_or(f64::NAN),
            eval.mean_loss.unwrap_or(f64::NAN),
            eval.accuracy.unwrap_or(0.0) * 100.0
        );

        let snapshot = session
            .snapshot(
                &manager,
                SnapshotMetrics {
                    train_loss: report.mean_loss,
                    eval_loss: eval.mean_loss,
                    eval_accuracy: eval.accuracy,
                },
            )
            .map_err(friendly)?;
        tracing::debug!(snapshot_id = %snapshot.id, "Snapshot written");
    }

    let output_names: Vec<&str> = config.inference.output_names.iter().map(String::as_str).collect();
    let graph_path = if config.inference.graph.is_absolute() {
        config.inference.graph.clone()
    } else {
        artifacts_dir.join(&config.inference.graph)
    };
    let graph = session
        .export_inference(&graph_path, &output_names)
        .map_err(friendly)?;
    println!("Exported inference graph to {}", graph.path().display());

    Ok(())
}

fn run_eval(config: &Config, artifacts: Option<PathBuf>, data: Option<PathBuf>) -> Result<()> {
    let artifacts_dir = artifacts.unwrap_or_else(|| config.artifacts.dir.clone());
    let data = data
        .or_else(|| config.training.eval_data.clone())
        .or_else(|| config.training.data.clone())
        .context("No eval data: pass --data or set training.eval_data in the config")?;

    let mut session = open_session(config, &artifacts_dir)?;
    let input_shape = session.module().input_shape().to_vec();
    let mut source = load_source(&data, &input_shape, config.training.batch_size, None)?;

    let report = session.evaluate(&mut source).map_err(friendly)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_infer(config: &Config, graph: Option<PathBuf>, input: &str, outputs: Vec<String>) -> Result<()> {
    let graph = graph.unwrap_or_else(|| config.inference_graph_path());
    let outputs = if outputs.is_empty() {
        config.inference.output_names.clone()
    } else {
        outputs
    };

    let features = input
        .split(',')
        .map(|v| v.trim().parse::<f32>())
        .collect::<std::result::Result<Vec<f32>, _>>()
        .context("--input must be comma-separated numbers")?;
    let input = ArrayD::from_shape_vec(IxDyn(&[1, features.len()]), features)?;

    let mut engine = open_engine(&graph, &config.inference.input_name).map_err(friendly)?;
    let requested: Vec<&str> = outputs.iter().map(String::as_str).collect();
    let prediction = predict(&mut engine, &input, &requested).map_err(friendly)?;

    for (name, value) in prediction.outputs.into_inner() {
        println!("{}: {:?}", name, value.iter().collect::<Vec<_>>());
    }
    if let Some(label) = prediction.labels.first() {
        println!("label: {}", label);
    }
    Ok(())
}

fn run_checkpoint_command(config: &Config, command: CheckpointCommand) -> Result<()> {
    let manager = CheckpointManager::new(config.checkpoints.dir.clone(), config.checkpoints.max_checkpoints)
        .map_err(friendly)?;

    match command {
        CheckpointCommand::List => {
            let snapshots = manager.list_snapshots().map_err(friendly)?;
            if snapshots.is_empty() {
                println!("No snapshots in {}", manager.checkpoint_dir().display());
            }
            for snapshot in snapshots {
                println!(
                    "{}  epoch {:>3}  train loss {:>8}  accuracy {:>7}",
                    snapshot.id,
                    snapshot.epoch,
                    snapshot
                        .metrics
                        .train_loss
                        .map(|l| format!("{:.4}", l))
                        .unwrap_or_else(|| "-".to_string()),
                    snapshot
                        .metrics
                        .eval_accuracy
                        .map(|a| format!("{:.2}%", a * 100.0))
                        .unwrap_or_else(|| "-".to_string()),
                );
            }
        }
        CheckpointCommand::Restore { id, artifacts } => {
            let artifact = manager.restore_snapshot(&id).map_err(friendly)?;
            let dir = artifacts.unwrap_or_else(|| config.artifacts.dir.clone());
            let target = config.artifacts.paths.resolve(&dir, ArtifactKind::Checkpoint);
            std::fs::copy(artifact.path(), &target)
                .with_context(|| format!("Failed to restore checkpoint to {}", target.display()))?;
            println!("Restored snapshot {} to {}", id, target.display());
        }
    }

    Ok(())
}

/// Initialize tracing
///
/// RUST_LOG wins; otherwise the config's log_level, defaulting to info.
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Bridge log crate → tracing (for dependencies using log crate)
    tracing_log::LogTracer::init().ok();
}
