//! File-backed sink: a TensorBoard log directory.
//!
//! The directory and the event file are created lazily at the first write.
//! Every writer owns one new `events.out.tfevents.*` file, so a restarted
//! run (or a second writer on the same directory) adds a file next to the
//! existing ones instead of truncating them; readers merge the files in
//! name order.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::tfevents::{self, Event};
use super::{HistogramRecord, ScalarSink, StatisticRecord};
use crate::Result;

/// Substring that marks an event file inside a log directory.
pub const EVENT_FILE_MARKER: &str = "tfevents";

static WRITER_SEQ: AtomicU64 = AtomicU64::new(0);

/// Appends records to `<log_dir>/events.out.tfevents.<secs>.<host>.<pid>.<seq>`.
///
/// Physical writes are serialized by an internal mutex, so one writer may be
/// shared through an `Arc` by several extensions.
#[derive(Debug)]
pub struct EventLogWriter {
    log_dir: PathBuf,
    file: Mutex<Option<EventFile>>,
}

#[derive(Debug)]
struct EventFile {
    path: PathBuf,
    out: BufWriter<File>,
}

impl EventLogWriter {
    /// Create a writer for `log_dir`. Nothing touches the filesystem until
    /// the first record is written.
    #[must_use]
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            file: Mutex::new(None),
        }
    }

    /// The log directory.
    #[must_use]
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Path of this writer's event file, once it has been created.
    #[must_use]
    pub fn path(&self) -> Option<PathBuf> {
        self.file.lock().as_ref().map(|f| f.path.clone())
    }

    fn open(&self) -> Result<EventFile> {
        if !self.log_dir.exists() {
            fs::create_dir_all(&self.log_dir)?;
            info!(log_dir = %self.log_dir.display(), "created log directory");
        }
        let path = self.log_dir.join(event_file_name());
        let file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        let mut out = BufWriter::new(file);
        tfevents::write_record(&mut out, &Event::file_version())?;
        debug!(path = %path.display(), "opened event file");
        Ok(EventFile { path, out })
    }

    fn append(&self, events: &[Event]) -> Result<()> {
        let mut guard = self.file.lock();
        if guard.is_none() {
            *guard = Some(self.open()?);
        }
        if let Some(file) = guard.as_mut() {
            for event in events {
                tfevents::write_record(&mut file.out, event)?;
            }
            file.out.flush()?;
        }
        Ok(())
    }
}

fn event_file_name() -> String {
    let seq = WRITER_SEQ.fetch_add(1, Ordering::Relaxed);
    format!(
        "events.out.{EVENT_FILE_MARKER}.{:010}.{}.{}.{seq:06}",
        Utc::now().timestamp(),
        hostname(),
        std::process::id()
    )
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string())
}

impl ScalarSink for EventLogWriter {
    fn add_scalar(&self, record: StatisticRecord) -> Result<()> {
        self.add_scalars(vec![record])
    }

    fn add_scalars(&self, records: Vec<StatisticRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.append(&Event::from_scalars(&records))
    }

    fn add_histogram(&self, record: HistogramRecord) -> Result<()> {
        self.append(&[Event::from_histogram(&record)])
    }

    fn flush(&self) -> Result<()> {
        if let Some(file) = self.file.lock().as_mut() {
            file.out.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events_in(path: &Path) -> Vec<Event> {
        tfevents::read_records(&fs::read(path).unwrap()).unwrap()
    }

    #[test]
    fn test_directory_created_lazily() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("runs").join("a");
        let writer = EventLogWriter::new(&dir);
        assert!(!dir.exists());
        assert!(writer.path().is_none());

        writer
            .add_scalar(StatisticRecord::new("x/mean/value", 1.0, 1))
            .unwrap();
        assert!(dir.is_dir());

        let path = writer.path().unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("events.out.tfevents."));
        // version event, then the scalar
        assert_eq!(events_in(&path).len(), 2);
    }

    #[test]
    fn test_subsequent_writes_append() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = EventLogWriter::new(tmp.path());
        writer.add_scalar(StatisticRecord::new("x", 1.0, 1)).unwrap();
        writer
            .add_scalars(vec![
                StatisticRecord::new("x", 2.0, 2),
                StatisticRecord::new("y", 2.0, 2),
            ])
            .unwrap();
        let path = writer.path().unwrap();
        let scalars: usize = events_in(&path).iter().map(|e| e.scalars().len()).sum();
        assert_eq!(scalars, 3);

        // A second writer on the same directory leaves the first file alone
        let again = EventLogWriter::new(tmp.path());
        again.add_scalar(StatisticRecord::new("x", 3.0, 3)).unwrap();
        assert_ne!(again.path(), writer.path());
        let first: usize = events_in(&path).iter().map(|e| e.scalars().len()).sum();
        assert_eq!(first, 3);
    }

    #[test]
    fn test_histograms_share_the_event_file() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = EventLogWriter::new(tmp.path());
        writer
            .add_histogram(HistogramRecord::from_values("w/value", 1, &[1.0, 2.0], 4))
            .unwrap();
        let events = events_in(&writer.path().unwrap());
        assert_eq!(events.len(), 2);
        assert!(events[1].scalars().is_empty());
        assert_eq!(events[1].histograms()[0].tag(), "w/value");
    }

    #[test]
    fn test_unwritable_directory_is_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("file");
        fs::write(&blocker, b"not a directory").unwrap();

        let writer = EventLogWriter::new(blocker.join("logs"));
        let err = writer.add_scalar(StatisticRecord::new("x", 1.0, 1)).unwrap_err();
        assert!(matches!(err, crate::Error::Io(_)));
    }
}
