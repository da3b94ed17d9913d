//! Training Monitor Example
//!
//! Drives the monitoring extensions from a toy training loop: a linear
//! model fitted with plain gradient descent on synthetic data.
//!
//! Run with: cargo run --example training_monitor -- [out_dir]
//! Set `RUST_LOG=trueno_monitor=debug` to see every invocation.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use trueno_monitor::config::MonitorConfig;
use trueno_monitor::extension::{InvocationContext, Observation};
use trueno_monitor::graph::ComputationGraph;
use trueno_monitor::model::{Parameter, ParameterTree};
use trueno_monitor::sink::{export_parquet, read_scalars};
use trueno_monitor::trigger::TrainingProgress;

const CONFIG: &str = r#"{
    "error_policy": "continue",
    "parameter_statistics": [
        {
            "prefix": "main",
            "log_dir": "stats",
            "trigger": { "every": 10, "unit": "iteration" },
            "grad_statistics": ["mean", "std", "norm", "percentile"],
            "histogram": true
        }
    ],
    "dump_graph": { "filename": "cg.dot", "render": "png" },
    "log_report": { "trigger": { "every": 1, "unit": "epoch" } }
}"#;

const EPOCHS: u64 = 5;
const BATCHES: u64 = 20;
const LEARNING_RATE: f32 = 0.05;

fn build_model() -> anyhow::Result<ParameterTree> {
    let mut linear = ParameterTree::new("linear");
    linear
        .add_parameter(Parameter::new("W", vec![1, 3], vec![0.0; 3])?)?
        .add_parameter(Parameter::from_vec("b", vec![0.0])?)?;
    let mut model = ParameterTree::new("");
    model.add_child(linear)?;
    Ok(model)
}

fn build_graph() -> ComputationGraph {
    let mut g = ComputationGraph::new("linear_regression");
    g.add_variable("x", "x (1, 3)")
        .add_parameter("W", "linear/W (1, 3)")
        .add_parameter("b", "linear/b (1)")
        .add_function("linear", "Linear")
        .add_variable("y", "y (1, 1)")
        .add_variable("t", "t (1, 1)")
        .add_function("mse", "MeanSquaredError")
        .add_variable("loss", "loss ()")
        .connect("x", "linear")
        .connect("W", "linear")
        .connect("b", "linear")
        .connect("linear", "y")
        .connect("y", "mse")
        .connect("t", "mse")
        .connect("mse", "loss");
    g
}

/// Target function: t = 2 x0 - x1 + 0.5 x2 + 1
#[allow(clippy::cast_precision_loss)]
fn sample(i: u64) -> ([f32; 3], f32) {
    let x = [
        ((i * 7) % 11) as f32 / 11.0,
        ((i * 5) % 13) as f32 / 13.0,
        ((i * 3) % 17) as f32 / 17.0,
    ];
    (x, 0.5f32.mul_add(x[2], 2.0f32.mul_add(x[0], -x[1])) + 1.0)
}

/// One SGD step on a single sample; returns the squared error.
fn step(model: &mut ParameterTree, x: [f32; 3], t: f32) -> anyhow::Result<f32> {
    let w = model.parameter("linear/W").context("missing W")?.data().to_vec();
    let b = model.parameter("linear/b").context("missing b")?.data()[0];
    let y = w.iter().zip(x).map(|(w, x)| w * x).sum::<f32>() + b;
    let diff = y - t;

    let grad_w: Vec<f32> = x.iter().map(|x| 2.0 * diff * x).collect();
    let grad_b = 2.0 * diff;

    let weight = model.parameter_mut("linear/W").context("missing W")?;
    for (p, g) in weight.data_mut().iter_mut().zip(&grad_w) {
        *p -= LEARNING_RATE * g;
    }
    weight.set_grad(grad_w)?;

    let bias = model.parameter_mut("linear/b").context("missing b")?;
    bias.data_mut()[0] -= LEARNING_RATE * grad_b;
    bias.set_grad(vec![grad_b])?;

    Ok(diff * diff)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let out: PathBuf = std::env::args().nth(1).unwrap_or_else(|| "result".to_string()).into();
    println!("=== Trueno-Monitor Training Demo ===\n");
    println!("Output directory: {}", out.display());

    let mut model = build_model()?;
    let graph = build_graph();

    let config = MonitorConfig::from_json_str(CONFIG)?;
    let mut manager = config.manager();
    let names = config.install(&mut manager, &model, &out)?;
    println!("Registered extensions: {}", names.join(", "));

    let started = Instant::now();
    let mut iteration = 0;
    for epoch in 1..=EPOCHS {
        for batch in 0..BATCHES {
            iteration += 1;
            let (x, t) = sample(iteration);
            let loss = step(&mut model, x, t)?;

            let observation: Observation = [("main/loss".to_string(), f64::from(loss))].into_iter().collect();
            let progress = if batch + 1 == BATCHES {
                TrainingProgress::epoch_end(iteration, epoch)
            } else {
                TrainingProgress::new(iteration, epoch - 1)
            };
            let ctx = InvocationContext::new(progress, &out)
                .with_model(&model)
                .with_graph(&graph)
                .with_observation(&observation)
                .with_elapsed(started.elapsed());

            let report = manager.run(&ctx)?;
            for failure in &report.failures {
                println!("   iteration {iteration}: {failure}");
            }
        }
        println!("   Epoch {epoch} done");
    }
    manager.finalize()?;

    let records = read_scalars(out.join("stats"))?;
    println!("\nScalar records written: {}", records.len());
    if let Some(last) = records.iter().rev().find(|r| r.tag() == "main/linear/W/norm/grad") {
        println!("Final gradient norm of W: {:.6} (step {})", last.value(), last.step());
    }

    let rows = export_parquet(out.join("stats"), out.join("stats.parquet"))?;
    println!("Exported {rows} rows to {}", out.join("stats.parquet").display());

    println!("\n=== Training Monitor Complete ===");
    Ok(())
}
