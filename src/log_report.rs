//! Observation log.
//!
//! [`LogReport`] accumulates the trainer's observation on every invocation
//! and, each time its emission trigger fires, appends the mean of every
//! accumulated key to its log. The log is mirrored to two files under the
//! output directory:
//!
//! ```text
//! <out_dir>/log       JSON array of entries, rewritten on every emission
//! <out_dir>/log.csv   header written once, one row appended per emission
//! ```
//!
//! Each entry carries `epoch`, `iteration` and `elapsed_time` (seconds) in
//! addition to the observed means. The CSV header is fixed at the first
//! invocation: the three counters, then the configured keys, or the sorted
//! keys of the first observation. Keys absent from an entry are written as
//! an empty CSV field and a JSON `null`.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::extension::{Extension, InvocationContext, Observation};
use crate::trigger::Trigger;
use crate::Result;

/// Default JSON log file name.
pub const DEFAULT_JSON_NAME: &str = "log";

/// Default CSV log file name.
pub const DEFAULT_CSV_NAME: &str = "log.csv";

const COUNTERS: [&str; 3] = ["epoch", "iteration", "elapsed_time"];

/// One emitted summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Epoch at emission.
    pub epoch: u64,
    /// Iteration at emission.
    pub iteration: u64,
    /// Seconds since training started.
    pub elapsed_time: f64,
    /// Mean of every accumulated observation key.
    #[serde(flatten)]
    pub values: BTreeMap<String, f64>,
}

impl LogEntry {
    /// Value of a column, counters included.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn get(&self, key: &str) -> Option<f64> {
        match key {
            "epoch" => Some(self.epoch as f64),
            "iteration" => Some(self.iteration as f64),
            "elapsed_time" => Some(self.elapsed_time),
            _ => self.values.get(key).copied(),
        }
    }
}

/// Running sum of one key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Accumulator {
    /// Sum of the observed values.
    pub sum: f64,
    /// Number of observations.
    pub count: u64,
}

impl Accumulator {
    fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    #[allow(clippy::cast_precision_loss)]
    fn mean(self) -> f64 {
        self.sum / self.count as f64
    }
}

/// Resumable state of a [`LogReport`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogReportState {
    /// Emitted entries.
    pub log: Vec<LogEntry>,
    /// Observations accumulated since the last emission.
    pub summary: BTreeMap<String, Accumulator>,
}

/// Extension that logs mean observations to JSON and CSV files.
#[derive(Debug)]
pub struct LogReport {
    keys: Option<Vec<String>>,
    trigger: Trigger,
    json_name: Option<PathBuf>,
    csv_name: Option<PathBuf>,
    state: LogReportState,
    header: Option<Vec<String>>,
    json_path: Option<PathBuf>,
    csv_path: Option<PathBuf>,
}

impl Default for LogReport {
    fn default() -> Self {
        Self::new()
    }
}

impl LogReport {
    /// Extension name used at registration.
    pub const NAME: &'static str = "log_report";

    /// Log every observed key at every iteration to `log` and `log.csv`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            keys: None,
            trigger: Trigger::every_iteration(),
            json_name: Some(PathBuf::from(DEFAULT_JSON_NAME)),
            csv_name: Some(PathBuf::from(DEFAULT_CSV_NAME)),
            state: LogReportState::default(),
            header: None,
            json_path: None,
            csv_path: None,
        }
    }

    /// Only accumulate these keys.
    #[must_use]
    pub fn with_keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// When to emit a summary (default every iteration). Distinct from the
    /// trigger the extension is registered with, which controls accumulation.
    #[must_use]
    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = trigger;
        self
    }

    /// JSON log file name under the output directory; `None` disables it.
    #[must_use]
    pub fn with_json_name(mut self, name: Option<PathBuf>) -> Self {
        self.json_name = name;
        self
    }

    /// CSV log file name under the output directory; `None` disables it.
    #[must_use]
    pub fn with_csv_name(mut self, name: Option<PathBuf>) -> Self {
        self.csv_name = name;
        self
    }

    /// Entries emitted so far.
    #[must_use]
    pub fn log(&self) -> &[LogEntry] {
        &self.state.log
    }

    /// CSV columns, once fixed by the first invocation.
    #[must_use]
    pub fn header(&self) -> Option<&[String]> {
        self.header.as_deref()
    }

    /// Snapshot for checkpointing.
    #[must_use]
    pub fn state(&self) -> LogReportState {
        self.state.clone()
    }

    /// Restore a snapshot. Restored entries are written to the files at the
    /// next initialization.
    pub fn restore(&mut self, state: LogReportState) {
        self.state = state;
    }

    fn accumulate(&mut self, observation: &Observation) {
        let summary = &mut self.state.summary;
        match &self.keys {
            Some(keys) => {
                for key in keys {
                    if let Some(&value) = observation.get(key) {
                        summary.entry(key.clone()).or_default().add(value);
                    }
                }
            }
            None => {
                for (key, &value) in observation {
                    summary.entry(key.clone()).or_default().add(value);
                }
            }
        }
    }

    fn build_header(&self, observation: &Observation) -> Vec<String> {
        let mut header: Vec<String> = COUNTERS.iter().map(ToString::to_string).collect();
        let extra: Vec<String> = match &self.keys {
            Some(keys) => keys.clone(),
            // BTreeMap keys are already sorted
            None => observation.keys().cloned().collect(),
        };
        for key in extra {
            if !header.contains(&key) {
                header.push(key);
            }
        }
        header
    }

    fn emit(&mut self, ctx: &InvocationContext<'_>) -> Result<()> {
        let progress = ctx.progress();
        let entry = LogEntry {
            epoch: progress.epoch,
            iteration: progress.iteration,
            elapsed_time: ctx.elapsed().as_secs_f64(),
            values: self.state.summary.iter().map(|(k, acc)| (k.clone(), acc.mean())).collect(),
        };
        // The entry is kept even if a file write below fails.
        self.state.log.push(entry);
        self.state.summary.clear();

        if let (Some(path), Some(header), Some(entry)) =
            (&self.csv_path, &self.header, self.state.log.last())
        {
            let file = OpenOptions::new().append(true).create(true).open(path)?;
            let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
            writer.write_record(csv_row(header, entry))?;
            writer.flush()?;
        }
        self.write_json()?;

        debug!(iteration = progress.iteration, entries = self.state.log.len(), "emitted log entry");
        Ok(())
    }

    fn write_json(&self) -> Result<()> {
        let (Some(path), Some(header)) = (&self.json_path, &self.header) else {
            return Ok(());
        };
        let entries: Vec<Value> = self.state.log.iter().map(|e| json_entry(header, e)).collect();
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, &entries)?;
        writer.flush()?;
        Ok(())
    }
}

impl Extension for LogReport {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn initialize(&mut self, ctx: &InvocationContext<'_>) -> Result<()> {
        let header = self.build_header(ctx.observation());
        self.json_path = self.json_name.as_deref().map(|n| ctx.out_dir().join(n));
        self.csv_path = self.csv_name.as_deref().map(|n| ctx.out_dir().join(n));

        for path in [&self.json_path, &self.csv_path].into_iter().flatten() {
            create_parent(path)?;
        }

        if let Some(path) = &self.csv_path {
            let mut writer = csv::WriterBuilder::new().has_headers(false).from_path(path)?;
            writer.write_record(&header)?;
            for entry in &self.state.log {
                writer.write_record(csv_row(&header, entry))?;
            }
            writer.flush()?;
            info!(path = %path.display(), columns = header.len(), "created csv log");
        }

        self.header = Some(header);
        if !self.state.log.is_empty() {
            self.write_json()?;
        }
        Ok(())
    }

    fn invoke(&mut self, ctx: &InvocationContext<'_>) -> Result<()> {
        if self.header.is_none() {
            self.initialize(ctx)?;
        }
        self.accumulate(ctx.observation());
        if self.trigger.should_fire(&ctx.progress()) {
            self.emit(ctx)?;
            self.trigger.acknowledge();
        }
        Ok(())
    }
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn json_entry(header: &[String], entry: &LogEntry) -> Value {
    let mut object = Map::new();
    object.insert("epoch".to_string(), Value::from(entry.epoch));
    object.insert("iteration".to_string(), Value::from(entry.iteration));
    object.insert("elapsed_time".to_string(), Value::from(entry.elapsed_time));
    for key in header.iter().skip(COUNTERS.len()) {
        let value = entry.values.get(key).map_or(Value::Null, |&v| Value::from(v));
        object.insert(key.clone(), value);
    }
    Value::Object(object)
}

fn csv_row(header: &[String], entry: &LogEntry) -> Vec<String> {
    header
        .iter()
        .map(|key| match key.as_str() {
            "epoch" => entry.epoch.to_string(),
            "iteration" => entry.iteration.to_string(),
            _ => entry.get(key).map(|v| v.to_string()).unwrap_or_default(),
        })
        .collect()
}
