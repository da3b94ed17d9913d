//! Parameter statistics collector.
//!
//! On each trigger, walks every parameter of the model, computes summary
//! statistics of its values and (when present) its gradient, and emits one
//! [`StatisticRecord`] per scalar through a [`ScalarSink`].
//!
//! ## Tags
//!
//! ```text
//! {prefix}/{parameter}/{statistic}/value
//! {prefix}/{parameter}/{statistic}/grad
//! {prefix}/{parameter}/percentile/grad/{i}
//! ```
//!
//! The `{prefix}/` segment is left out when the prefix is empty.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use trueno_monitor::model::Parameter;
//! use trueno_monitor::sink::MemorySink;
//! use trueno_monitor::statistics::ParameterStatistics;
//!
//! # fn main() -> trueno_monitor::Result<()> {
//! let model = vec![Parameter::from_vec("W", vec![1.0, 2.0, 3.0, 4.0])?];
//! let sink = Arc::new(MemorySink::new());
//!
//! let stats = ParameterStatistics::builder()
//!     .prefix("main")
//!     .sink(sink.clone())
//!     .build(&model)?;
//! stats.report(&model, 1)?;
//!
//! let mean = sink.series("main/W/mean/value");
//! assert_eq!(mean[0].value(), 2.5);
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use rustc_hash::FxHashSet;
use tracing::debug;

use crate::extension::{Extension, InvocationContext, Priority};
use crate::model::{Model, ParameterView};
use crate::sink::{EventLogWriter, HistogramRecord, ScalarSink, StatisticRecord, DEFAULT_BUCKETS};
use crate::stats::{has_nan, StatValue, Statistic};
use crate::trigger::Trigger;
use crate::{Error, Result};

/// Which array of a parameter a statistic describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayKind {
    /// Parameter values.
    Value,
    /// Parameter gradient.
    Grad,
}

impl ArrayKind {
    /// Tag segment.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Value => "value",
            Self::Grad => "grad",
        }
    }
}

/// Extension that reports parameter and gradient statistics.
pub struct ParameterStatistics {
    prefix: String,
    sink: Arc<dyn ScalarSink>,
    trigger: Trigger,
    value_statistics: Vec<Statistic>,
    grad_statistics: Vec<Statistic>,
    report_params: bool,
    report_grads: bool,
    histogram: bool,
    histogram_buckets: usize,
    skip_nan_params: bool,
}

impl ParameterStatistics {
    /// Extension name used at registration.
    pub const NAME: &'static str = "parameter_statistics";

    /// Start configuring a collector.
    #[must_use]
    pub fn builder() -> ParameterStatisticsBuilder {
        ParameterStatisticsBuilder::default()
    }

    /// Tag prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Compute every scalar record for `model` at `step`, without writing.
    ///
    /// Records come out in parameter order; within a parameter, value
    /// statistics precede gradient statistics, each in configured order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the model has no parameters, repeats a
    /// parameter name, or has a gradient whose length differs from its values.
    pub fn collect(&self, model: &dyn Model, step: u64) -> Result<Vec<StatisticRecord>> {
        let params = checked_parameters(model)?;
        let wall_time = Utc::now();
        let mut records = Vec::with_capacity(params.len() * self.max_width());

        for param in &params {
            for (kind, data, statistics) in self.arrays(param) {
                let skip = self.skip_nan_params && has_nan(data);
                for &stat in statistics {
                    let value = if skip { stat.nan() } else { stat.compute(data) };
                    let base = self.tag(param.name(), Some(stat), kind);
                    match value {
                        StatValue::Scalar(v) => records.push(
                            StatisticRecord::builder(base, v, step).wall_time(wall_time).build(),
                        ),
                        StatValue::Series(values) => {
                            for (i, v) in values.into_iter().enumerate() {
                                records.push(
                                    StatisticRecord::builder(format!("{base}/{i}"), v, step)
                                        .wall_time(wall_time)
                                        .build(),
                                );
                            }
                        }
                    }
                }
            }
        }
        Ok(records)
    }

    /// Build one histogram per reported array. Empty unless histograms are enabled.
    ///
    /// # Errors
    ///
    /// Same as [`collect`](Self::collect).
    pub fn collect_histograms(&self, model: &dyn Model, step: u64) -> Result<Vec<HistogramRecord>> {
        if !self.histogram {
            return Ok(Vec::new());
        }
        let params = checked_parameters(model)?;
        let mut records = Vec::new();
        for param in &params {
            for (kind, data, _) in self.arrays(param) {
                records.push(HistogramRecord::from_values(
                    self.tag(param.name(), None, kind),
                    step,
                    data,
                    self.histogram_buckets,
                ));
            }
        }
        Ok(records)
    }

    /// Compute and write all records for `step`. Returns the number of
    /// scalar records written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid model and [`Error::Io`] if the
    /// sink rejects a record.
    pub fn report(&self, model: &dyn Model, step: u64) -> Result<usize> {
        let scalars = self.collect(model, step)?;
        let histograms = self.collect_histograms(model, step)?;
        let count = scalars.len();
        let histogram_count = histograms.len();

        self.sink.add_scalars(scalars)?;
        for histogram in histograms {
            self.sink.add_histogram(histogram)?;
        }

        debug!(
            prefix = %self.prefix,
            step,
            scalars = count,
            histograms = histogram_count,
            "reported parameter statistics"
        );
        Ok(count)
    }

    fn arrays<'v>(
        &self,
        param: &ParameterView<'v>,
    ) -> Vec<(ArrayKind, &'v [f32], &[Statistic])> {
        let mut arrays = Vec::with_capacity(2);
        if self.report_params {
            arrays.push((ArrayKind::Value, param.data(), self.value_statistics.as_slice()));
        }
        if self.report_grads {
            if let Some(grad) = param.grad() {
                arrays.push((ArrayKind::Grad, grad, self.grad_statistics.as_slice()));
            }
        }
        arrays
    }

    fn tag(&self, param: &str, stat: Option<Statistic>, kind: ArrayKind) -> String {
        let mut tag = String::new();
        if !self.prefix.is_empty() {
            tag.push_str(&self.prefix);
            tag.push('/');
        }
        tag.push_str(param);
        if let Some(stat) = stat {
            tag.push('/');
            tag.push_str(stat.name());
        }
        tag.push('/');
        tag.push_str(kind.name());
        tag
    }

    fn max_width(&self) -> usize {
        let width = |stats: &[Statistic]| stats.iter().map(|s| s.width()).sum::<usize>();
        width(&self.value_statistics) + width(&self.grad_statistics)
    }
}

impl std::fmt::Debug for ParameterStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterStatistics")
            .field("prefix", &self.prefix)
            .field("trigger", &self.trigger)
            .field("value_statistics", &self.value_statistics)
            .field("grad_statistics", &self.grad_statistics)
            .field("histogram", &self.histogram)
            .field("skip_nan_params", &self.skip_nan_params)
            .finish_non_exhaustive()
    }
}

impl Extension for ParameterStatistics {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn default_trigger(&self) -> Trigger {
        self.trigger.clone()
    }

    fn priority(&self) -> Priority {
        Priority::WRITER
    }

    fn invoke(&mut self, ctx: &InvocationContext<'_>) -> Result<()> {
        let model = ctx
            .model()
            .ok_or_else(|| Error::Config("no model in invocation context".to_string()))?;
        self.report(model, ctx.step())?;
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        self.sink.flush()
    }
}

fn checked_parameters(model: &dyn Model) -> Result<Vec<ParameterView<'_>>> {
    let params = model.parameters();
    if params.is_empty() {
        return Err(Error::Config("model exposes no parameters".to_string()));
    }
    let mut names = FxHashSet::default();
    for param in &params {
        param.validate()?;
        if !names.insert(param.name()) {
            return Err(Error::Config(format!(
                "duplicate parameter name '{}'",
                param.name()
            )));
        }
    }
    Ok(params)
}

/// Builder for [`ParameterStatistics`].
#[derive(Default)]
pub struct ParameterStatisticsBuilder {
    prefix: String,
    log_dir: Option<PathBuf>,
    sink: Option<Arc<dyn ScalarSink>>,
    trigger: Option<Trigger>,
    value_statistics: Option<Vec<Statistic>>,
    grad_statistics: Option<Vec<Statistic>>,
    report_params: Option<bool>,
    report_grads: Option<bool>,
    histogram: bool,
    histogram_buckets: Option<usize>,
    skip_nan_params: bool,
}

impl ParameterStatisticsBuilder {
    /// Tag prefix (default empty).
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Write to an [`EventLogWriter`] in this directory.
    #[must_use]
    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    /// Write to an explicit sink. Takes precedence over [`log_dir`](Self::log_dir).
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn ScalarSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Invocation trigger (default every epoch).
    #[must_use]
    pub fn trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// Statistics of parameter values (default mean, std, min, max).
    #[must_use]
    pub fn value_statistics(mut self, statistics: Vec<Statistic>) -> Self {
        self.value_statistics = Some(statistics);
        self
    }

    /// Statistics of gradients (default mean, std, min, max, norm).
    #[must_use]
    pub fn grad_statistics(mut self, statistics: Vec<Statistic>) -> Self {
        self.grad_statistics = Some(statistics);
        self
    }

    /// Report value statistics (default true).
    #[must_use]
    pub const fn report_params(mut self, enabled: bool) -> Self {
        self.report_params = Some(enabled);
        self
    }

    /// Report gradient statistics (default true).
    #[must_use]
    pub const fn report_grads(mut self, enabled: bool) -> Self {
        self.report_grads = Some(enabled);
        self
    }

    /// Also emit a histogram per array (default false).
    #[must_use]
    pub const fn histogram(mut self, enabled: bool) -> Self {
        self.histogram = enabled;
        self
    }

    /// Histogram bucket count.
    #[must_use]
    pub const fn histogram_buckets(mut self, buckets: usize) -> Self {
        self.histogram_buckets = Some(buckets);
        self
    }

    /// Report NaN for every statistic of an array containing NaN (default false).
    #[must_use]
    pub const fn skip_nan_params(mut self, enabled: bool) -> Self {
        self.skip_nan_params = enabled;
        self
    }

    /// Validate the model and build the collector.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no destination is set, the model has no
    /// parameters, a parameter name repeats, a gradient length mismatches, or
    /// the histogram bucket count is zero.
    pub fn build(self, model: &dyn Model) -> Result<ParameterStatistics> {
        let params = checked_parameters(model)?;

        let sink: Arc<dyn ScalarSink> = match (self.sink, self.log_dir) {
            (Some(sink), _) => sink,
            (None, Some(dir)) if !dir.as_os_str().is_empty() => Arc::new(EventLogWriter::new(dir)),
            (None, Some(_)) => return Err(Error::Config("empty log directory".to_string())),
            (None, None) => {
                return Err(Error::Config(
                    "parameter statistics need a log directory or a sink".to_string(),
                ))
            }
        };

        let histogram_buckets = self.histogram_buckets.unwrap_or(DEFAULT_BUCKETS);
        if histogram_buckets == 0 {
            return Err(Error::Config("histogram bucket count must be positive".to_string()));
        }

        debug!(prefix = %self.prefix, parameters = params.len(), "parameter statistics ready");
        Ok(ParameterStatistics {
            prefix: self.prefix,
            sink,
            trigger: self.trigger.unwrap_or_else(Trigger::every_epoch),
            value_statistics: self
                .value_statistics
                .unwrap_or_else(|| Statistic::VALUE_DEFAULTS.to_vec()),
            grad_statistics: self
                .grad_statistics
                .unwrap_or_else(|| Statistic::GRAD_DEFAULTS.to_vec()),
            report_params: self.report_params.unwrap_or(true),
            report_grads: self.report_grads.unwrap_or(true),
            histogram: self.histogram,
            histogram_buckets,
            skip_nan_params: self.skip_nan_params,
        })
    }
}
