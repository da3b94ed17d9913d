//! Triggers decide when an extension runs.
//!
//! The host passes a [`TrainingProgress`] snapshot explicitly on every step;
//! nothing is read from global state.

use std::fmt;
use std::num::NonZeroU64;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Progress counters supplied by the host trainer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingProgress {
    /// Global step: number of completed updates. Monotonically increasing.
    pub iteration: u64,
    /// Number of completed epochs.
    pub epoch: u64,
    /// Whether the update that produced `iteration` finished an epoch.
    pub is_new_epoch: bool,
}

impl TrainingProgress {
    /// Progress after `iteration` updates inside `epoch`, not on an epoch boundary.
    #[must_use]
    pub const fn new(iteration: u64, epoch: u64) -> Self {
        Self {
            iteration,
            epoch,
            is_new_epoch: false,
        }
    }

    /// Progress at an epoch boundary.
    #[must_use]
    pub const fn epoch_end(iteration: u64, epoch: u64) -> Self {
        Self {
            iteration,
            epoch,
            is_new_epoch: true,
        }
    }
}

/// Predicate used by [`Trigger::Custom`].
pub type TriggerFn = Arc<dyn Fn(&TrainingProgress) -> bool + Send + Sync>;

/// When to invoke an extension.
#[derive(Clone)]
pub enum Trigger {
    /// Every `n` iterations (`iteration % n == 0`).
    EveryNIterations(NonZeroU64),
    /// At every `n`-th epoch boundary.
    EveryNEpochs(NonZeroU64),
    /// Until the first successful invocation.
    Once {
        /// Set once an invocation has succeeded.
        fired: bool,
    },
    /// Arbitrary predicate over the progress counters.
    Custom(TriggerFn),
}

impl Trigger {
    /// Every `n` iterations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `n` is zero.
    pub fn every_n_iterations(n: u64) -> Result<Self> {
        NonZeroU64::new(n)
            .map(Self::EveryNIterations)
            .ok_or_else(|| Error::Config("iteration interval must be positive".to_string()))
    }

    /// Every `n` epochs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `n` is zero.
    pub fn every_n_epochs(n: u64) -> Result<Self> {
        NonZeroU64::new(n)
            .map(Self::EveryNEpochs)
            .ok_or_else(|| Error::Config("epoch interval must be positive".to_string()))
    }

    /// Every iteration.
    #[must_use]
    pub const fn every_iteration() -> Self {
        Self::EveryNIterations(NonZeroU64::MIN)
    }

    /// Every epoch boundary.
    #[must_use]
    pub const fn every_epoch() -> Self {
        Self::EveryNEpochs(NonZeroU64::MIN)
    }

    /// Fires at every evaluation until an invocation succeeds.
    #[must_use]
    pub const fn once() -> Self {
        Self::Once { fired: false }
    }

    /// Wrap a predicate.
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&TrainingProgress) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(predicate))
    }

    /// Evaluate the trigger for this step.
    ///
    /// Evaluation has no side effect: a `Once` trigger keeps firing until
    /// [`acknowledge`](Self::acknowledge) records a successful invocation.
    #[must_use]
    pub fn should_fire(&self, progress: &TrainingProgress) -> bool {
        match self {
            Self::EveryNIterations(n) => progress.iteration % n.get() == 0,
            Self::EveryNEpochs(n) => progress.is_new_epoch && progress.epoch % n.get() == 0,
            Self::Once { fired } => !fired,
            Self::Custom(predicate) => predicate(progress),
        }
    }

    /// Record that the invocation this trigger fired for succeeded.
    pub fn acknowledge(&mut self) {
        if let Self::Once { fired } = self {
            *fired = true;
        }
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EveryNIterations(n) => f.debug_tuple("EveryNIterations").field(n).finish(),
            Self::EveryNEpochs(n) => f.debug_tuple("EveryNEpochs").field(n).finish(),
            Self::Once { fired } => f.debug_struct("Once").field("fired", fired).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Unit of an interval trigger in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    /// Training iterations.
    Iteration,
    /// Epochs.
    Epoch,
}

/// Serializable trigger description.
///
/// ```json
/// "once"
/// { "every": 100, "unit": "iteration" }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TriggerConfig {
    /// `"once"`.
    Once(OnceTag),
    /// Interval trigger.
    Interval {
        /// Period.
        every: u64,
        /// Unit of the period.
        unit: IntervalUnit,
    },
}

/// The literal `"once"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnceTag {
    /// `"once"`
    Once,
}

impl TriggerConfig {
    /// Build the runtime trigger.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero interval.
    pub fn build(self) -> Result<Trigger> {
        match self {
            Self::Once(_) => Ok(Trigger::once()),
            Self::Interval {
                every,
                unit: IntervalUnit::Iteration,
            } => Trigger::every_n_iterations(every),
            Self::Interval {
                every,
                unit: IntervalUnit::Epoch,
            } => Trigger::every_n_epochs(every),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_n_iterations() {
        let t = Trigger::every_n_iterations(3).unwrap();
        let fired: Vec<u64> = (1..=10)
            .filter(|&i| t.should_fire(&TrainingProgress::new(i, 0)))
            .collect();
        assert_eq!(fired, [3, 6, 9]);
    }

    #[test]
    fn test_every_epoch_only_on_boundary() {
        let t = Trigger::every_epoch();
        assert!(!t.should_fire(&TrainingProgress::new(5, 0)));
        assert!(t.should_fire(&TrainingProgress::epoch_end(10, 1)));
        assert!(t.should_fire(&TrainingProgress::epoch_end(20, 2)));
    }

    #[test]
    fn test_every_two_epochs() {
        let t = Trigger::every_n_epochs(2).unwrap();
        assert!(!t.should_fire(&TrainingProgress::epoch_end(10, 1)));
        assert!(t.should_fire(&TrainingProgress::epoch_end(20, 2)));
    }

    #[test]
    fn test_once_fires_once() {
        let mut t = Trigger::once();
        assert!(t.should_fire(&TrainingProgress::new(1, 0)));
        t.acknowledge();
        assert!(!t.should_fire(&TrainingProgress::new(2, 0)));
        assert!(!t.should_fire(&TrainingProgress::epoch_end(3, 1)));
    }

    #[test]
    fn test_once_keeps_firing_until_acknowledged() {
        let mut t = Trigger::once();
        assert!(t.should_fire(&TrainingProgress::new(0, 0)));
        assert!(t.should_fire(&TrainingProgress::new(1, 0)));
        t.acknowledge();
        assert!(!t.should_fire(&TrainingProgress::new(2, 0)));

        // interval triggers ignore acknowledgement
        let mut every = Trigger::every_iteration();
        every.acknowledge();
        assert!(every.should_fire(&TrainingProgress::new(3, 0)));
    }

    #[test]
    fn test_custom() {
        let t = Trigger::custom(|p| p.iteration > 2);
        assert!(!t.should_fire(&TrainingProgress::new(2, 0)));
        assert!(t.should_fire(&TrainingProgress::new(3, 0)));
        assert_eq!(format!("{t:?}"), "Custom(..)");
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(Trigger::every_n_iterations(0).is_err());
        assert!(Trigger::every_n_epochs(0).is_err());
    }

    #[test]
    fn test_config_parsing() {
        let once: TriggerConfig = serde_json::from_str("\"once\"").unwrap();
        assert!(matches!(once.build().unwrap(), Trigger::Once { fired: false }));

        let every: TriggerConfig =
            serde_json::from_str(r#"{"every": 100, "unit": "iteration"}"#).unwrap();
        let t = every.build().unwrap();
        assert!(t.should_fire(&TrainingProgress::new(200, 0)));

        let zero: TriggerConfig = serde_json::from_str(r#"{"every": 0, "unit": "epoch"}"#).unwrap();
        assert!(zero.build().is_err());
    }
}
