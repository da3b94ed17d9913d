//! In-memory sink - keeps every record, for tests and in-process dashboards

use parking_lot::Mutex;

use super::{HistogramRecord, ScalarSink, StatisticRecord};
use crate::Result;

/// In-memory sink.
///
/// Records are kept in emission order; `series` returns one tag's time
/// series ordered by step.
#[derive(Debug, Default)]
pub struct MemorySink {
    scalars: Mutex<Vec<StatisticRecord>>,
    histograms: Mutex<Vec<HistogramRecord>>,
}

impl MemorySink {
    /// Create a new empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scalars.lock().is_empty() && self.histograms.lock().is_empty()
    }

    /// Number of scalar records.
    #[must_use]
    pub fn scalar_count(&self) -> usize {
        self.scalars.lock().len()
    }

    /// All scalar records in emission order.
    #[must_use]
    pub fn scalars(&self) -> Vec<StatisticRecord> {
        self.scalars.lock().clone()
    }

    /// Scalar records emitted at `step`, in emission order.
    #[must_use]
    pub fn scalars_at(&self, step: u64) -> Vec<StatisticRecord> {
        self.scalars
            .lock()
            .iter()
            .filter(|r| r.step() == step)
            .cloned()
            .collect()
    }

    /// Time series for a tag, ordered by step.
    ///
    /// ## Example
    ///
    /// ```rust
    /// use trueno_monitor::sink::{MemorySink, ScalarSink, StatisticRecord};
    ///
    /// let sink = MemorySink::new();
    /// for step in (0..3).rev() {
    ///     sink.add_scalar(StatisticRecord::new("l1/W/norm/grad", step as f64, step)).unwrap();
    /// }
    ///
    /// let series = sink.series("l1/W/norm/grad");
    /// assert_eq!(series.iter().map(|r| r.step()).collect::<Vec<_>>(), [0, 1, 2]);
    /// ```
    #[must_use]
    pub fn series(&self, tag: &str) -> Vec<StatisticRecord> {
        let mut series: Vec<StatisticRecord> = self
            .scalars
            .lock()
            .iter()
            .filter(|r| r.tag() == tag)
            .cloned()
            .collect();

        series.sort_by_key(StatisticRecord::step);

        series
    }

    /// All histogram records in emission order.
    #[must_use]
    pub fn histograms(&self) -> Vec<HistogramRecord> {
        self.histograms.lock().clone()
    }

    /// Drop everything recorded so far.
    pub fn clear(&self) {
        self.scalars.lock().clear();
        self.histograms.lock().clear();
    }
}

impl ScalarSink for MemorySink {
    fn add_scalar(&self, record: StatisticRecord) -> Result<()> {
        self.scalars.lock().push(record);
        Ok(())
    }

    fn add_scalars(&self, records: Vec<StatisticRecord>) -> Result<()> {
        self.scalars.lock().extend(records);
        Ok(())
    }

    fn add_histogram(&self, record: HistogramRecord) -> Result<()> {
        self.histograms.lock().push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_default() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());
        assert_eq!(sink.scalar_count(), 0);
    }

    #[test]
    fn test_series_ordering() {
        let sink = MemorySink::new();

        // Add out of order
        sink.add_scalar(StatisticRecord::new("loss", 0.2, 2)).unwrap();
        sink.add_scalar(StatisticRecord::new("loss", 0.0, 0)).unwrap();
        sink.add_scalar(StatisticRecord::new("acc", 0.5, 1)).unwrap();
        sink.add_scalar(StatisticRecord::new("loss", 0.1, 1)).unwrap();

        let series = sink.series("loss");

        assert_eq!(series.len(), 3);
        assert_eq!(series[0].step(), 0);
        assert_eq!(series[1].step(), 1);
        assert_eq!(series[2].step(), 2);
        assert_eq!(sink.scalars_at(1).len(), 2);
    }

    #[test]
    fn test_clear() {
        let sink = MemorySink::new();
        sink.add_histogram(HistogramRecord::from_values("w", 0, &[1.0], 4))
            .unwrap();
        assert!(!sink.is_empty());
        sink.clear();
        assert!(sink.is_empty());
    }
}
