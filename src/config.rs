//! File-based configuration of the monitoring extensions.
//!
//! ```json
//! {
//!   "error_policy": "continue",
//!   "parameter_statistics": [
//!     { "prefix": "main", "log_dir": "stats", "trigger": { "every": 100, "unit": "iteration" } }
//!   ],
//!   "dump_graph": { "filename": "cg.dot", "render": "png" },
//!   "log_report": { "keys": ["main/loss"], "trigger": { "every": 1, "unit": "epoch" } }
//! }
//! ```
//!
//! Relative paths resolve against the output directory given to
//! [`MonitorConfig::install`].

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dump_graph::DumpGraph;
use crate::extension::{ErrorPolicy, ExtensionManager};
use crate::log_report::{LogReport, DEFAULT_CSV_NAME, DEFAULT_JSON_NAME};
use crate::model::Model;
use crate::sink::ScalarSink;
use crate::statistics::{ParameterStatistics, ParameterStatisticsBuilder};
use crate::stats::Statistic;
use crate::trigger::TriggerConfig;
use crate::Result;

const fn yes() -> bool {
    true
}

fn default_graph_file() -> PathBuf {
    PathBuf::from("cg.dot")
}

fn default_json_name() -> Option<PathBuf> {
    Some(PathBuf::from(DEFAULT_JSON_NAME))
}

fn default_csv_name() -> Option<PathBuf> {
    Some(PathBuf::from(DEFAULT_CSV_NAME))
}

/// Settings of one [`ParameterStatistics`] collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterStatisticsConfig {
    /// Tag prefix.
    #[serde(default)]
    pub prefix: String,
    /// Structured log directory.
    pub log_dir: PathBuf,
    /// Invocation trigger; every epoch when absent.
    #[serde(default)]
    pub trigger: Option<TriggerConfig>,
    /// Value statistics; defaults when absent.
    #[serde(default)]
    pub value_statistics: Option<Vec<Statistic>>,
    /// Gradient statistics; defaults when absent.
    #[serde(default)]
    pub grad_statistics: Option<Vec<Statistic>>,
    /// Report value statistics.
    #[serde(default = "yes")]
    pub report_params: bool,
    /// Report gradient statistics.
    #[serde(default = "yes")]
    pub report_grads: bool,
    /// Emit histograms.
    #[serde(default)]
    pub histogram: bool,
    /// Histogram bucket count.
    #[serde(default)]
    pub histogram_buckets: Option<usize>,
    /// Report NaN for arrays containing NaN.
    #[serde(default)]
    pub skip_nan_params: bool,
}

impl ParameterStatisticsConfig {
    /// Build the collector, writing under `out_dir` unless `log_dir` is absolute.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) for an invalid trigger
    /// or model.
    pub fn build(&self, model: &dyn Model, out_dir: &Path) -> Result<ParameterStatistics> {
        self.builder()?.log_dir(out_dir.join(&self.log_dir)).build(model)
    }

    /// Build the collector with an explicit sink; `log_dir` is ignored.
    ///
    /// # Errors
    ///
    /// Same as [`build`](Self::build).
    pub fn build_with_sink(&self, model: &dyn Model, sink: Arc<dyn ScalarSink>) -> Result<ParameterStatistics> {
        self.builder()?.sink(sink).build(model)
    }

    fn builder(&self) -> Result<ParameterStatisticsBuilder> {
        let mut builder = ParameterStatistics::builder()
            .prefix(self.prefix.clone())
            .report_params(self.report_params)
            .report_grads(self.report_grads)
            .histogram(self.histogram)
            .skip_nan_params(self.skip_nan_params);
        if let Some(trigger) = self.trigger {
            builder = builder.trigger(trigger.build()?);
        }
        if let Some(stats) = &self.value_statistics {
            builder = builder.value_statistics(stats.clone());
        }
        if let Some(stats) = &self.grad_statistics {
            builder = builder.grad_statistics(stats.clone());
        }
        if let Some(buckets) = self.histogram_buckets {
            builder = builder.histogram_buckets(buckets);
        }
        Ok(builder)
    }
}

/// Settings of the [`DumpGraph`] extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DumpGraphConfig {
    /// Output file, relative to the output directory unless absolute.
    #[serde(default = "default_graph_file")]
    pub filename: PathBuf,
    /// Trigger; once when absent.
    #[serde(default)]
    pub trigger: Option<TriggerConfig>,
    /// Graphviz output format to render after writing.
    #[serde(default)]
    pub render: Option<String>,
}

impl Default for DumpGraphConfig {
    fn default() -> Self {
        Self {
            filename: default_graph_file(),
            trigger: None,
            render: None,
        }
    }
}

impl DumpGraphConfig {
    /// Build the extension.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) for an empty file name
    /// or invalid trigger.
    pub fn build(&self) -> Result<DumpGraph> {
        let mut dump = DumpGraph::new(&self.filename)?;
        if let Some(trigger) = self.trigger {
            dump = dump.with_trigger(trigger.build()?);
        }
        if let Some(format) = &self.render {
            dump = dump.with_render(format.clone());
        }
        Ok(dump)
    }
}

/// Settings of the [`LogReport`] extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogReportConfig {
    /// Keys to accumulate; all when absent.
    #[serde(default)]
    pub keys: Option<Vec<String>>,
    /// Emission trigger; every iteration when absent.
    #[serde(default)]
    pub trigger: Option<TriggerConfig>,
    /// JSON log name; `null` disables the file.
    #[serde(default = "default_json_name")]
    pub json_name: Option<PathBuf>,
    /// CSV log name; `null` disables the file.
    #[serde(default = "default_csv_name")]
    pub csv_name: Option<PathBuf>,
}

impl Default for LogReportConfig {
    fn default() -> Self {
        Self {
            keys: None,
            trigger: None,
            json_name: default_json_name(),
            csv_name: default_csv_name(),
        }
    }
}

impl LogReportConfig {
    /// Build the extension.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) for an invalid trigger.
    pub fn build(&self) -> Result<LogReport> {
        let mut report = LogReport::new()
            .with_json_name(self.json_name.clone())
            .with_csv_name(self.csv_name.clone());
        if let Some(keys) = &self.keys {
            report = report.with_keys(keys.iter().cloned());
        }
        if let Some(trigger) = self.trigger {
            report = report.with_trigger(trigger.build()?);
        }
        Ok(report)
    }
}

/// All monitoring extensions of a training run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    /// Failure policy of the manager.
    pub error_policy: ErrorPolicy,
    /// Statistics collectors.
    pub parameter_statistics: Vec<ParameterStatisticsConfig>,
    /// Graph dumper.
    pub dump_graph: Option<DumpGraphConfig>,
    /// Observation log.
    pub log_report: Option<LogReportConfig>,
}

impl MonitorConfig {
    /// Parse a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) for malformed input or
    /// unknown fields.
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read and parse a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the file cannot be read,
    /// otherwise as [`from_json_str`](Self::from_json_str).
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// An empty manager with the configured failure policy.
    #[must_use]
    pub fn manager(&self) -> ExtensionManager {
        ExtensionManager::new().with_policy(self.error_policy)
    }

    /// Build every configured extension and register it on `manager`.
    /// Returns the registered names.
    ///
    /// # Errors
    ///
    /// Returns the first construction error; nothing is registered then.
    pub fn install(
        &self,
        manager: &mut ExtensionManager,
        model: &dyn Model,
        out_dir: &Path,
    ) -> Result<Vec<String>> {
        let statistics = self
            .parameter_statistics
            .iter()
            .map(|c| c.build(model, out_dir))
            .collect::<Result<Vec<_>>>()?;
        let dump = self.dump_graph.as_ref().map(DumpGraphConfig::build).transpose()?;
        let report = self.log_report.as_ref().map(LogReportConfig::build).transpose()?;

        let mut names = Vec::new();
        for collector in statistics {
            names.push(manager.register(collector, None));
        }
        if let Some(dump) = dump {
            names.push(manager.register(dump, None));
        }
        if let Some(report) = report {
            names.push(manager.register(report, None));
        }

        info!(extensions = names.len(), out_dir = %out_dir.display(), "installed monitor extensions");
        Ok(names)
    }
}
