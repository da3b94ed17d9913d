//! Structured log sinks for scalar and histogram records.
//!
//! ## Layout
//!
//! ```text
//! <log_dir>/
//!   events.out.tfevents.<secs>.<host>.<pid>.<seq>   one file per writer
//! ```
//!
//! Each file holds TensorBoard `Event` records: a version event, then one
//! summary event per step with a `simple_value` per scalar tag, and one
//! `histo` summary per histogram. `tensorboard --logdir <log_dir>` reads the
//! directory directly.
//!
//! ## Usage
//!
//! ```rust
//! use trueno_monitor::sink::{MemorySink, ScalarSink, StatisticRecord};
//!
//! let sink = MemorySink::new();
//! sink.add_scalar(StatisticRecord::new("l1/W/mean/value", 0.01, 100)).unwrap();
//! assert_eq!(sink.scalar_count(), 1);
//! ```

mod event_log;
mod export;
mod memory;
mod record;
mod tfevents;

pub use event_log::{EventLogWriter, EVENT_FILE_MARKER};
pub use export::{event_files, export_parquet, read_histograms, read_scalars, scalar_schema};
pub use memory::MemorySink;
pub use record::{HistogramRecord, StatisticRecord, StatisticRecordBuilder, DEFAULT_BUCKETS};

use std::sync::Arc;

use crate::Result;

/// Destination of emitted records.
///
/// Methods take `&self` so one sink can be shared by several extensions;
/// implementations serialize their own physical writes.
pub trait ScalarSink: Send + Sync {
    /// Append one scalar record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the record cannot be appended.
    fn add_scalar(&self, record: StatisticRecord) -> Result<()>;

    /// Append several scalar records, preserving their order.
    ///
    /// # Errors
    ///
    /// Stops at the first failing record.
    fn add_scalars(&self, records: Vec<StatisticRecord>) -> Result<()> {
        for record in records {
            self.add_scalar(record)?;
        }
        Ok(())
    }

    /// Append one histogram record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the record cannot be appended.
    fn add_histogram(&self, record: HistogramRecord) -> Result<()>;

    /// Push buffered records to the underlying storage.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) on write failure.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

impl<S: ScalarSink + ?Sized> ScalarSink for Arc<S> {
    fn add_scalar(&self, record: StatisticRecord) -> Result<()> {
        (**self).add_scalar(record)
    }

    fn add_scalars(&self, records: Vec<StatisticRecord>) -> Result<()> {
        (**self).add_scalars(records)
    }

    fn add_histogram(&self, record: HistogramRecord) -> Result<()> {
        (**self).add_histogram(record)
    }

    fn flush(&self) -> Result<()> {
        (**self).flush()
    }
}

impl<S: ScalarSink + ?Sized> ScalarSink for Box<S> {
    fn add_scalar(&self, record: StatisticRecord) -> Result<()> {
        (**self).add_scalar(record)
    }

    fn add_scalars(&self, records: Vec<StatisticRecord>) -> Result<()> {
        (**self).add_scalars(records)
    }

    fn add_histogram(&self, record: HistogramRecord) -> Result<()> {
        (**self).add_histogram(record)
    }

    fn flush(&self) -> Result<()> {
        (**self).flush()
    }
}
