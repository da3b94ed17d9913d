//! Extension calling convention.
//!
//! Extensions are registered once on an [`ExtensionManager`] with a trigger.
//! The host calls [`ExtensionManager::run`] after every update with an
//! [`InvocationContext`] holding the explicit progress counters and whatever
//! the extensions read (model, graph, observation). Due extensions run
//! synchronously, in priority order, before `run` returns.
//!
//! ```rust
//! use std::path::Path;
//! use trueno_monitor::extension::{Extension, ExtensionManager, InvocationContext};
//! use trueno_monitor::trigger::{Trigger, TrainingProgress};
//!
//! struct Counter(u32);
//!
//! impl Extension for Counter {
//!     fn name(&self) -> &str {
//!         "counter"
//!     }
//!
//!     fn invoke(&mut self, _ctx: &InvocationContext<'_>) -> trueno_monitor::Result<()> {
//!         self.0 += 1;
//!         Ok(())
//!     }
//! }
//!
//! # fn main() -> trueno_monitor::Result<()> {
//! let mut manager = ExtensionManager::new();
//! manager.register(Counter(0), Some(Trigger::every_n_iterations(2)?));
//!
//! for iteration in 1..=4 {
//!     let ctx = InvocationContext::new(TrainingProgress::new(iteration, 0), Path::new("out"));
//!     manager.run(&ctx)?;
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::graph::ComputationGraph;
use crate::model::Model;
use crate::trigger::{TrainingProgress, Trigger};
use crate::{Error, Result};

/// Values the trainer reported during the last update (e.g. `main/loss`).
pub type Observation = BTreeMap<String, f64>;

static EMPTY_OBSERVATION: Observation = BTreeMap::new();

/// Order in which due extensions run within one step: higher first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub u16);

impl Priority {
    /// Extensions that write observations others read.
    pub const WRITER: Self = Self(300);
    /// Extensions that edit observations.
    pub const EDITOR: Self = Self(200);
    /// Extensions that only read.
    pub const READER: Self = Self(100);
}

/// What the manager does when an extension fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Stop at the first failure and return it.
    #[default]
    Abort,
    /// Log the failure, keep running the remaining extensions, and report
    /// the failures in the [`RunReport`].
    Continue,
}

/// Everything an extension may read during one invocation.
#[derive(Clone, Copy)]
pub struct InvocationContext<'a> {
    progress: TrainingProgress,
    elapsed: Duration,
    out_dir: &'a Path,
    model: Option<&'a dyn Model>,
    graph: Option<&'a ComputationGraph>,
    observation: &'a Observation,
}

impl<'a> InvocationContext<'a> {
    /// Context with progress counters and the trainer output directory.
    #[must_use]
    pub fn new(progress: TrainingProgress, out_dir: &'a Path) -> Self {
        Self {
            progress,
            elapsed: Duration::ZERO,
            out_dir,
            model: None,
            graph: None,
            observation: &EMPTY_OBSERVATION,
        }
    }

    /// Attach the model whose parameters extensions may read.
    #[must_use]
    pub fn with_model(mut self, model: &'a dyn Model) -> Self {
        self.model = Some(model);
        self
    }

    /// Attach the graph of the current forward computation.
    #[must_use]
    pub const fn with_graph(mut self, graph: &'a ComputationGraph) -> Self {
        self.graph = Some(graph);
        self
    }

    /// Attach the trainer's observation for this update.
    #[must_use]
    pub const fn with_observation(mut self, observation: &'a Observation) -> Self {
        self.observation = observation;
        self
    }

    /// Set the wall time elapsed since training started.
    #[must_use]
    pub const fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    /// Progress counters.
    #[must_use]
    pub const fn progress(&self) -> TrainingProgress {
        self.progress
    }

    /// Global step (the iteration counter).
    #[must_use]
    pub const fn step(&self) -> u64 {
        self.progress.iteration
    }

    /// Elapsed training time.
    #[must_use]
    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Trainer output directory.
    #[must_use]
    pub const fn out_dir(&self) -> &'a Path {
        self.out_dir
    }

    /// The model, if the host supplied one.
    #[must_use]
    pub fn model(&self) -> Option<&'a dyn Model> {
        self.model
    }

    /// The current graph, if the host supplied one.
    #[must_use]
    pub const fn graph(&self) -> Option<&'a ComputationGraph> {
        self.graph
    }

    /// The observation of the last update.
    #[must_use]
    pub const fn observation(&self) -> &'a Observation {
        self.observation
    }
}

/// A callback invoked by the host trainer on a trigger.
pub trait Extension: Send {
    /// Name used for registration and in error reports.
    fn name(&self) -> &str;

    /// Trigger used when none is given at registration.
    fn default_trigger(&self) -> Trigger {
        Trigger::every_iteration()
    }

    /// Run order among extensions due at the same step.
    fn priority(&self) -> Priority {
        Priority::READER
    }

    /// Called once, before the first trigger evaluation.
    ///
    /// # Errors
    ///
    /// Failures are handled like invocation failures.
    fn initialize(&mut self, _ctx: &InvocationContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Do the work for this step.
    ///
    /// # Errors
    ///
    /// Any failure is handed to the manager's [`ErrorPolicy`].
    fn invoke(&mut self, ctx: &InvocationContext<'_>) -> Result<()>;

    /// Called once when training ends.
    ///
    /// # Errors
    ///
    /// Returns an error if pending output cannot be flushed.
    fn finalize(&mut self) -> Result<()> {
        Ok(())
    }
}

struct Entry {
    name: String,
    extension: Box<dyn Extension>,
    trigger: Trigger,
    priority: Priority,
    initialized: bool,
}

/// Outcome of one [`ExtensionManager::run`].
#[derive(Debug, Default)]
pub struct RunReport {
    /// Names of the extensions invoked, in order.
    pub invoked: Vec<String>,
    /// Failures tolerated under [`ErrorPolicy::Continue`].
    pub failures: Vec<Error>,
}

/// Registry of extensions; evaluates triggers and invokes due extensions.
#[derive(Default)]
pub struct ExtensionManager {
    entries: Vec<Entry>,
    policy: ErrorPolicy,
}

impl ExtensionManager {
    /// Create an empty manager with [`ErrorPolicy::Abort`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Register an extension. Without an explicit trigger the extension's
    /// default trigger is used. A name already taken gets a `_1`, `_2`, ...
    /// suffix; the assigned name is returned.
    pub fn register<E: Extension + 'static>(&mut self, extension: E, trigger: Option<Trigger>) -> String {
        self.register_boxed(Box::new(extension), trigger)
    }

    /// Register an already boxed extension.
    pub fn register_boxed(&mut self, extension: Box<dyn Extension>, trigger: Option<Trigger>) -> String {
        let base = extension.name().to_string();
        let mut name = base.clone();
        let mut n = 0;
        while self.entries.iter().any(|e| e.name == name) {
            n += 1;
            name = format!("{base}_{n}");
        }

        let trigger = trigger.unwrap_or_else(|| extension.default_trigger());
        let priority = extension.priority();
        // Stable: equal priorities keep registration order
        let at = self
            .entries
            .iter()
            .position(|e| e.priority < priority)
            .unwrap_or(self.entries.len());

        debug!(extension = %name, ?trigger, priority = priority.0, "registered extension");
        self.entries.insert(
            at,
            Entry {
                name: name.clone(),
                extension,
                trigger,
                priority,
                initialized: false,
            },
        );
        name
    }

    /// Registered names, in run order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Number of registered extensions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evaluate every trigger for this step and invoke the due extensions.
    ///
    /// # Errors
    ///
    /// Under [`ErrorPolicy::Abort`], returns the first failure wrapped in
    /// [`Error::Extension`].
    pub fn run(&mut self, ctx: &InvocationContext<'_>) -> Result<RunReport> {
        let mut report = RunReport::default();
        let progress = ctx.progress();

        for entry in &mut self.entries {
            let outcome = if entry.initialized {
                Ok(())
            } else {
                entry.initialized = true;
                entry.extension.initialize(ctx)
            };

            let outcome = outcome.and_then(|()| {
                if !entry.trigger.should_fire(&progress) {
                    return Ok(false);
                }
                debug!(extension = %entry.name, iteration = progress.iteration, "invoking extension");
                entry.extension.invoke(ctx).map(|()| true)
            });

            match outcome {
                Ok(true) => {
                    entry.trigger.acknowledge();
                    report.invoked.push(entry.name.clone());
                }
                Ok(false) => {}
                Err(source) => {
                    let err = Error::Extension {
                        name: entry.name.clone(),
                        source: Box::new(source),
                    };
                    match self.policy {
                        ErrorPolicy::Abort => return Err(err),
                        ErrorPolicy::Continue => {
                            warn!(error = %err, iteration = progress.iteration, "extension failed, continuing");
                            report.failures.push(err);
                        }
                    }
                }
            }
        }
        Ok(report)
    }

    /// Finalize every extension.
    ///
    /// # Errors
    ///
    /// All extensions are finalized; the first failure is returned.
    pub fn finalize(&mut self) -> Result<()> {
        let mut first = None;
        for entry in &mut self.entries {
            if let Err(source) = entry.extension.finalize() {
                warn!(extension = %entry.name, error = %source, "finalize failed");
                first.get_or_insert(Error::Extension {
                    name: entry.name.clone(),
                    source: Box::new(source),
                });
            }
        }
        first.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;

    type Calls = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        name: &'static str,
        priority: Priority,
        /// Invocations below this step fail.
        fail_below: u64,
        calls: Calls,
    }

    impl Recorder {
        fn new(name: &'static str, priority: Priority, calls: &Calls) -> Self {
            Self {
                name,
                priority,
                fail_below: 0,
                calls: Arc::clone(calls),
            }
        }
    }

    impl Extension for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn priority(&self) -> Priority {
            self.priority
        }

        fn initialize(&mut self, _ctx: &InvocationContext<'_>) -> Result<()> {
            self.calls.lock().push(format!("init:{}", self.name));
            Ok(())
        }

        fn invoke(&mut self, ctx: &InvocationContext<'_>) -> Result<()> {
            self.calls.lock().push(format!("{}@{}", self.name, ctx.step()));
            if ctx.step() < self.fail_below {
                return Err(Error::Serialization("boom".to_string()));
            }
            Ok(())
        }
    }

    fn ctx(iteration: u64) -> InvocationContext<'static> {
        InvocationContext::new(TrainingProgress::new(iteration, 0), Path::new("out"))
    }

    #[test]
    fn test_priority_then_registration_order() {
        let calls = Calls::default();
        let mut manager = ExtensionManager::new();
        manager.register(Recorder::new("reader", Priority::READER, &calls), None);
        manager.register(Recorder::new("writer", Priority::WRITER, &calls), None);
        manager.register(Recorder::new("reader2", Priority::READER, &calls), None);

        assert_eq!(manager.names(), ["writer", "reader", "reader2"]);

        let report = manager.run(&ctx(1)).unwrap();
        assert_eq!(report.invoked, ["writer", "reader", "reader2"]);
        assert_eq!(
            *calls.lock(),
            ["init:writer", "writer@1", "init:reader", "reader@1", "init:reader2", "reader2@1"]
        );
    }

    #[test]
    fn test_initialize_runs_once() {
        let calls = Calls::default();
        let mut manager = ExtensionManager::new();
        manager.register(
            Recorder::new("p", Priority::READER, &calls),
            Some(Trigger::every_n_iterations(2).unwrap()),
        );
        for i in 1..=4 {
            manager.run(&ctx(i)).unwrap();
        }
        assert_eq!(*calls.lock(), ["init:p", "p@2", "p@4"]);
    }

    #[test]
    fn test_duplicate_names_are_suffixed() {
        let calls = Calls::default();
        let mut manager = ExtensionManager::new();
        let a = manager.register(Recorder::new("stats", Priority::READER, &calls), None);
        let b = manager.register(Recorder::new("stats", Priority::READER, &calls), None);
        let c = manager.register(Recorder::new("stats", Priority::READER, &calls), None);
        assert_eq!((a.as_str(), b.as_str(), c.as_str()), ("stats", "stats_1", "stats_2"));
        assert_eq!(manager.len(), 3);
    }

    #[test]
    fn test_abort_policy_stops() {
        let calls = Calls::default();
        let mut manager = ExtensionManager::new();
        let mut bad = Recorder::new("bad", Priority::WRITER, &calls);
        bad.fail_below = u64::MAX;
        manager.register(bad, None);
        manager.register(Recorder::new("after", Priority::READER, &calls), None);

        let err = manager.run(&ctx(1)).unwrap_err();
        assert!(matches!(&err, Error::Extension { name, .. } if name == "bad"));
        assert!(matches!(err.root(), Error::Serialization(_)));
        assert!(!calls.lock().iter().any(|c| c.starts_with("after@")));
    }

    #[test]
    fn test_continue_policy_collects() {
        let calls = Calls::default();
        let mut manager = ExtensionManager::new().with_policy(ErrorPolicy::Continue);
        let mut bad = Recorder::new("bad", Priority::WRITER, &calls);
        bad.fail_below = u64::MAX;
        manager.register(bad, None);
        manager.register(Recorder::new("after", Priority::READER, &calls), None);

        let report = manager.run(&ctx(1)).unwrap();
        assert_eq!(report.invoked, ["after"]);
        assert_eq!(report.failures.len(), 1);
    }

    #[test]
    fn test_once_retried_after_failure() {
        let calls = Calls::default();
        let mut manager = ExtensionManager::new().with_policy(ErrorPolicy::Continue);
        let mut late = Recorder::new("late", Priority::READER, &calls);
        late.fail_below = 1;
        manager.register(late, Some(Trigger::once()));

        let first = manager.run(&ctx(0)).unwrap();
        assert!(first.invoked.is_empty());
        assert_eq!(first.failures.len(), 1);

        let second = manager.run(&ctx(1)).unwrap();
        assert_eq!(second.invoked, ["late"]);

        let third = manager.run(&ctx(2)).unwrap();
        assert!(third.invoked.is_empty() && third.failures.is_empty());
        assert_eq!(*calls.lock(), ["init:late", "late@0", "late@1"]);
    }

    #[test]
    fn test_context_defaults() {
        let c = ctx(7);
        assert_eq!(c.step(), 7);
        assert!(c.model().is_none());
        assert!(c.graph().is_none());
        assert!(c.observation().is_empty());
        assert_eq!(c.elapsed(), Duration::ZERO);
    }
}
