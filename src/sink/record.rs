//! Log records - time-series scalars and histograms keyed by tag and step

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::tfevents::HistogramProto;
use crate::stats;

/// Default number of histogram buckets.
pub const DEFAULT_BUCKETS: usize = 30;

/// A single scalar data point.
///
/// Records with the same tag at increasing steps form one time series;
/// a later step never overwrites an earlier one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatisticRecord {
    tag: String,
    // JSON has no NaN; serde_json writes non-finite values as null
    #[serde(deserialize_with = "null_as_nan")]
    value: f64,
    step: u64,
    wall_time: DateTime<Utc>,
}

impl StatisticRecord {
    /// Create a new record stamped with the current time.
    ///
    /// # Arguments
    ///
    /// * `tag` - Series name (e.g., "stats/l1/W/mean/value")
    /// * `value` - Scalar value
    /// * `step` - Global training step
    #[must_use]
    pub fn new(tag: impl Into<String>, value: f64, step: u64) -> Self {
        Self {
            tag: tag.into(),
            value,
            step,
            wall_time: Utc::now(),
        }
    }

    /// Create a builder for constructing a record with optional fields.
    #[must_use]
    pub fn builder(tag: impl Into<String>, value: f64, step: u64) -> StatisticRecordBuilder {
        StatisticRecordBuilder::new(tag, value, step)
    }

    /// Get the series tag.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Get the value.
    #[must_use]
    pub const fn value(&self) -> f64 {
        self.value
    }

    /// Get the step.
    #[must_use]
    pub const fn step(&self) -> u64 {
        self.step
    }

    /// Get the wall-clock time of emission.
    #[must_use]
    pub const fn wall_time(&self) -> DateTime<Utc> {
        self.wall_time
    }
}

fn null_as_nan<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

/// Builder for `StatisticRecord`.
#[derive(Debug)]
pub struct StatisticRecordBuilder {
    tag: String,
    value: f64,
    step: u64,
    wall_time: DateTime<Utc>,
}

impl StatisticRecordBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(tag: impl Into<String>, value: f64, step: u64) -> Self {
        Self {
            tag: tag.into(),
            value,
            step,
            wall_time: Utc::now(),
        }
    }

    /// Set a custom wall time (useful for replaying logs and testing).
    #[must_use]
    pub const fn wall_time(mut self, wall_time: DateTime<Utc>) -> Self {
        self.wall_time = wall_time;
        self
    }

    /// Build the `StatisticRecord`.
    #[must_use]
    pub fn build(self) -> StatisticRecord {
        StatisticRecord {
            tag: self.tag,
            value: self.value,
            step: self.step,
            wall_time: self.wall_time,
        }
    }
}

/// Distribution of one array at one step, in the layout scalar dashboards
/// expect: summary moments plus bucket upper limits and counts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistogramRecord {
    tag: String,
    step: u64,
    wall_time: DateTime<Utc>,
    min: f64,
    max: f64,
    num: u64,
    sum: f64,
    sum_squares: f64,
    bucket_limits: Vec<f64>,
    bucket_counts: Vec<u64>,
}

impl HistogramRecord {
    /// Build a histogram of the finite elements of `values` with
    /// `buckets` equal-width buckets between the minimum and maximum.
    ///
    /// Non-finite elements are left out. An array with no finite element
    /// produces an empty histogram (`num == 0`, no buckets).
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn from_values(tag: impl Into<String>, step: u64, values: &[f32], buckets: usize) -> Self {
        let finite: Vec<f32> = values.iter().copied().filter(|x| x.is_finite()).collect();

        let mut record = Self {
            tag: tag.into(),
            step,
            wall_time: Utc::now(),
            min: 0.0,
            max: 0.0,
            num: finite.len() as u64,
            sum: stats::sum(&finite),
            sum_squares: stats::sum_of_squares(&finite),
            bucket_limits: Vec::new(),
            bucket_counts: Vec::new(),
        };
        if finite.is_empty() {
            return record;
        }

        let (min, max) = (stats::min(&finite), stats::max(&finite));
        record.min = min;
        record.max = max;

        let buckets = buckets.max(1);
        let width = (max - min) / buckets as f64;
        if width == 0.0 {
            record.bucket_limits = vec![max];
            record.bucket_counts = vec![record.num];
            return record;
        }

        record.bucket_limits = (1..=buckets).map(|i| min + width * i as f64).collect();
        record.bucket_counts = vec![0; buckets];
        for x in finite.iter().map(|&x| f64::from(x)) {
            let idx = (((x - min) / width) as usize).min(buckets - 1);
            record.bucket_counts[idx] += 1;
        }
        record
    }

    /// Rebuild a record from a decoded event-file histogram.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub(crate) fn from_distribution(
        tag: String,
        step: u64,
        wall_time: DateTime<Utc>,
        histo: &HistogramProto,
    ) -> Self {
        Self {
            tag,
            step,
            wall_time,
            min: histo.min,
            max: histo.max,
            num: histo.num as u64,
            sum: histo.sum,
            sum_squares: histo.sum_squares,
            bucket_limits: histo.bucket_limit.clone(),
            bucket_counts: histo.bucket.iter().map(|&c| c as u64).collect(),
        }
    }

    /// Get the series tag.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Get the step.
    #[must_use]
    pub const fn step(&self) -> u64 {
        self.step
    }

    /// Get the wall-clock time of emission.
    #[must_use]
    pub const fn wall_time(&self) -> DateTime<Utc> {
        self.wall_time
    }

    /// Smallest finite element.
    #[must_use]
    pub const fn min(&self) -> f64 {
        self.min
    }

    /// Largest finite element.
    #[must_use]
    pub const fn max(&self) -> f64 {
        self.max
    }

    /// Number of finite elements.
    #[must_use]
    pub const fn num(&self) -> u64 {
        self.num
    }

    /// Sum of finite elements.
    #[must_use]
    pub const fn sum(&self) -> f64 {
        self.sum
    }

    /// Sum of squares of finite elements.
    #[must_use]
    pub const fn sum_squares(&self) -> f64 {
        self.sum_squares
    }

    /// Bucket upper limits, ascending.
    #[must_use]
    pub fn bucket_limits(&self) -> &[f64] {
        &self.bucket_limits
    }

    /// Element count per bucket.
    #[must_use]
    pub fn bucket_counts(&self) -> &[u64] {
        &self.bucket_counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statistic_record_new() {
        let record = StatisticRecord::new("l1/W/mean/value", 0.5, 3);
        assert_eq!(record.tag(), "l1/W/mean/value");
        assert_eq!(record.step(), 3);
        assert!((record.value() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_builder_wall_time() {
        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let record = StatisticRecord::builder("loss", 1.0, 0).wall_time(at).build();
        assert_eq!(record.wall_time(), at);
    }

    #[test]
    fn test_histogram_buckets() {
        let values = [0.0, 1.0, 2.0, 3.0, 4.0];
        let h = HistogramRecord::from_values("w", 1, &values, 4);
        assert_eq!(h.num(), 5);
        assert_eq!(h.bucket_limits(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(h.bucket_counts(), &[1, 1, 1, 2]);
        assert_eq!(h.bucket_counts().iter().sum::<u64>(), h.num());
        assert!((h.sum() - 10.0).abs() < f64::EPSILON);
        assert!((h.sum_squares() - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_histogram_constant_and_non_finite() {
        let h = HistogramRecord::from_values("w", 1, &[2.0, 2.0, f32::NAN], 10);
        assert_eq!(h.num(), 2);
        assert_eq!(h.bucket_counts(), &[2]);

        let empty = HistogramRecord::from_values("w", 1, &[f32::INFINITY], 10);
        assert_eq!(empty.num(), 0);
        assert!(empty.bucket_limits().is_empty());
    }

    #[test]
    fn test_nan_value_survives_json() {
        let record = StatisticRecord::new("w/mean/value", f64::NAN, 1);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"value\":null"));
        let back: StatisticRecord = serde_json::from_str(&json).unwrap();
        assert!(back.value().is_nan());
    }
}
