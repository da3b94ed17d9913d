//! # Trueno-Monitor: Training Loop Monitoring Extensions
//!
//! **Version**: 0.1.0
//!
//! Trueno-Monitor provides extensions a training loop calls on a trigger:
//!
//! - [`ParameterStatistics`](statistics::ParameterStatistics): summary
//!   statistics of every parameter and gradient, written to a structured
//!   scalar log (TensorBoard event files, exportable to Parquet)
//! - [`DumpGraph`](dump_graph::DumpGraph): the computation graph as a DOT file
//! - [`LogReport`](log_report::LogReport): mean observations as JSON and CSV logs
//!
//! The crate contains no training loop. The host owns the loop, exposes its
//! parameters through the [`Model`](model::Model) trait and calls
//! [`ExtensionManager::run`](extension::ExtensionManager::run) once per
//! update with explicit progress counters.
//!
//! ## Design Principles
//!
//! - **Read-only**: extensions never mutate parameter state
//! - **Explicit progress**: the step is passed in, never inferred
//! - **Deterministic output**: tags are emitted in the same order every time
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::path::Path;
//! use trueno_monitor::extension::{ExtensionManager, InvocationContext};
//! use trueno_monitor::model::Parameter;
//! use trueno_monitor::statistics::ParameterStatistics;
//! use trueno_monitor::trigger::{Trigger, TrainingProgress};
//!
//! let model = vec![Parameter::from_vec("W", vec![0.1, -0.2, 0.3])?];
//! let out = Path::new("result");
//!
//! let mut manager = ExtensionManager::new();
//! manager.register(
//!     ParameterStatistics::builder()
//!         .prefix("main")
//!         .log_dir(out.join("stats"))
//!         .build(&model)?,
//!     Some(Trigger::every_n_iterations(100)?),
//! );
//!
//! for iteration in 1..=1000 {
//!     // ... forward, backward, update ...
//!     let ctx = InvocationContext::new(TrainingProgress::new(iteration, 0), out).with_model(&model);
//!     manager.run(&ctx)?;
//! }
//! manager.finalize()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod dump_graph;
pub mod error;
pub mod extension;
pub mod graph;
pub mod log_report;
pub mod model;
pub mod sink;
pub mod statistics;
pub mod stats;
pub mod trigger;

pub use error::{Error, Result};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_alias() {
        let result: Result<()> = Err(Error::Config("x".to_string()));
        assert!(result.unwrap_err().is_config());
    }
}
