//! Reading a log directory back, and exporting it to Parquet

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use tracing::info;

use super::tfevents::{self, Event};
use super::{HistogramRecord, StatisticRecord, EVENT_FILE_MARKER};
use crate::{Error, Result};

/// Event files of a log directory, in name order (creation order for files
/// written by this crate). A missing directory has none.
///
/// # Errors
///
/// Returns [`Error::Io`] if the directory cannot be listed.
pub fn event_files(log_dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let log_dir = log_dir.as_ref();
    if !log_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(log_dir)? {
        let entry = entry?;
        let is_event_file = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.contains(EVENT_FILE_MARKER));
        if is_event_file && entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Load every scalar record of a log directory, file by file in write order.
///
/// Values come back at the `f32` precision event files store.
///
/// # Errors
///
/// Returns [`Error::Io`] on read failure and [`Error::Serialization`] for a
/// corrupt or truncated event file.
pub fn read_scalars(log_dir: impl AsRef<Path>) -> Result<Vec<StatisticRecord>> {
    Ok(read_events(log_dir.as_ref())?
        .iter()
        .flat_map(Event::scalars)
        .collect())
}

/// Load every histogram record of a log directory, file by file in write order.
///
/// # Errors
///
/// See [`read_scalars`].
pub fn read_histograms(log_dir: impl AsRef<Path>) -> Result<Vec<HistogramRecord>> {
    Ok(read_events(log_dir.as_ref())?
        .iter()
        .flat_map(Event::histograms)
        .collect())
}

fn read_events(log_dir: &Path) -> Result<Vec<Event>> {
    let mut events = Vec::new();
    for path in event_files(log_dir)? {
        let bytes = fs::read(&path)?;
        let decoded = tfevents::read_records(&bytes).map_err(|e| match e {
            Error::Serialization(msg) => Error::Serialization(format!("{}: {msg}", path.display())),
            other => other,
        })?;
        events.extend(decoded);
    }
    Ok(events)
}

/// Arrow schema of the exported scalar table.
#[must_use]
pub fn scalar_schema() -> Schema {
    Schema::new(vec![
        Field::new("tag", DataType::Utf8, false),
        Field::new("step", DataType::UInt64, false),
        Field::new("value", DataType::Float64, false),
        Field::new("wall_time_us", DataType::Int64, false),
    ])
}

/// Write the scalar log of `log_dir` to a Parquet file for columnar analysis.
///
/// Columns: `tag`, `step`, `value`, `wall_time_us` (microseconds since the
/// Unix epoch). Returns the number of rows written.
///
/// # Errors
///
/// Returns an error if the log cannot be read or the Parquet file cannot be written.
pub fn export_parquet(log_dir: impl AsRef<Path>, out: impl AsRef<Path>) -> Result<usize> {
    let records = read_scalars(log_dir)?;
    let out = out.as_ref();

    let schema = Arc::new(scalar_schema());
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(records.iter().map(StatisticRecord::tag))),
        Arc::new(UInt64Array::from_iter_values(records.iter().map(StatisticRecord::step))),
        Arc::new(Float64Array::from_iter_values(records.iter().map(StatisticRecord::value))),
        Arc::new(Int64Array::from_iter_values(
            records.iter().map(|r| r.wall_time().timestamp_micros()),
        )),
    ];
    let batch = RecordBatch::try_new(Arc::clone(&schema), columns)?;

    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(out)?;
    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;

    info!(rows = records.len(), path = %out.display(), "exported scalar log");
    Ok(records.len())
}
