//! Summary statistics over flattened parameter arrays
//!
//! Sums, extrema and the sum of squares run on trueno's SIMD vectors
//! (AVX-512/AVX2/SSE2 auto-detected). Finite arrays are summed with Kahan
//! compensation so means of large tensors do not drift. The standard
//! deviation is a second `f64` pass around that mean.

use serde::{Deserialize, Serialize};
use trueno::Vector;

/// Sigma percentiles reported by [`Statistic::Percentile`]: the normal
/// distribution's -3σ, -2σ, -1σ, median, +1σ, +2σ and +3σ points.
pub const SIGMA_PERCENTILES: [f64; 7] = [0.13, 2.28, 15.87, 50.0, 84.13, 97.72, 99.87];

/// A statistic computed over a parameter or gradient array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Statistic {
    /// Arithmetic mean.
    Mean,
    /// Population standard deviation.
    Std,
    /// Minimum element.
    Min,
    /// Maximum element.
    Max,
    /// L2 norm.
    Norm,
    /// Count of elements exactly equal to zero.
    Zeros,
    /// The seven [`SIGMA_PERCENTILES`], linearly interpolated.
    Percentile,
}

/// Result of one statistic: most are scalars, percentiles are a series.
#[derive(Debug, Clone, PartialEq)]
pub enum StatValue {
    /// A single scalar.
    Scalar(f64),
    /// Several scalars, reported with index suffixes.
    Series(Vec<f64>),
}

impl Statistic {
    /// Statistics reported for parameter values by default.
    pub const VALUE_DEFAULTS: [Self; 4] = [Self::Mean, Self::Std, Self::Min, Self::Max];

    /// Statistics reported for gradients by default.
    pub const GRAD_DEFAULTS: [Self; 5] = [Self::Mean, Self::Std, Self::Min, Self::Max, Self::Norm];

    /// Name used in record tags.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Std => "std",
            Self::Min => "min",
            Self::Max => "max",
            Self::Norm => "norm",
            Self::Zeros => "zeros",
            Self::Percentile => "percentile",
        }
    }

    /// Number of scalars this statistic produces.
    #[must_use]
    pub const fn width(self) -> usize {
        match self {
            Self::Percentile => SIGMA_PERCENTILES.len(),
            _ => 1,
        }
    }

    /// Compute this statistic over `values`.
    #[must_use]
    pub fn compute(self, values: &[f32]) -> StatValue {
        match self {
            Self::Mean => StatValue::Scalar(mean(values)),
            Self::Std => StatValue::Scalar(std(values)),
            Self::Min => StatValue::Scalar(min(values)),
            Self::Max => StatValue::Scalar(max(values)),
            Self::Norm => StatValue::Scalar(l2_norm(values)),
            #[allow(clippy::cast_precision_loss)]
            Self::Zeros => StatValue::Scalar(values.iter().filter(|&&x| x == 0.0).count() as f64),
            Self::Percentile => StatValue::Series(percentiles(values, &SIGMA_PERCENTILES)),
        }
    }

    /// The value reported when the array is skipped (NaN of the right width).
    #[must_use]
    pub fn nan(self) -> StatValue {
        match self {
            Self::Percentile => StatValue::Series(vec![f64::NAN; self.width()]),
            _ => StatValue::Scalar(f64::NAN),
        }
    }
}

impl std::fmt::Display for Statistic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Sum of all elements; 0 for an empty array.
///
/// Uses compensated summation unless the array holds infinities or NaN,
/// which the compensation term cannot carry.
#[must_use]
pub fn sum(values: &[f32]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let vector = Vector::from_slice(values);
    let total = if values.iter().all(|x| x.is_finite()) {
        vector.sum_kahan()
    } else {
        vector.sum()
    };
    total.map_or(f64::NAN, f64::from)
}

/// Arithmetic mean; NaN for an empty array.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mean(values: &[f32]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    sum(values) / values.len() as f64
}

/// Population standard deviation (divides by `n`); NaN for an empty array.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn std(values: &[f32]) -> f64 {
    let m = mean(values);
    if m.is_nan() {
        return f64::NAN;
    }
    let var = values
        .iter()
        .map(|&x| {
            let d = f64::from(x) - m;
            d * d
        })
        .sum::<f64>()
        / values.len() as f64;
    var.sqrt()
}

/// Minimum; NaN if empty or if any element is NaN.
#[must_use]
pub fn min(values: &[f32]) -> f64 {
    if values.is_empty() || has_nan(values) {
        return f64::NAN;
    }
    Vector::from_slice(values).min().map_or(f64::NAN, f64::from)
}

/// Maximum; NaN if empty or if any element is NaN.
#[must_use]
pub fn max(values: &[f32]) -> f64 {
    if values.is_empty() || has_nan(values) {
        return f64::NAN;
    }
    Vector::from_slice(values).max().map_or(f64::NAN, f64::from)
}

/// Sum of squared elements; 0 for an empty array.
#[must_use]
pub fn sum_of_squares(values: &[f32]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let vector = Vector::from_slice(values);
    vector.dot(&vector).map_or(f64::NAN, f64::from)
}

/// L2 norm; 0 for an empty array.
#[must_use]
pub fn l2_norm(values: &[f32]) -> f64 {
    sum_of_squares(values).sqrt()
}

/// Percentiles (0..=100) with linear interpolation between closest ranks.
/// NaN entries if the array is empty or contains NaN.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::float_cmp
)]
pub fn percentiles(values: &[f32], qs: &[f64]) -> Vec<f64> {
    if values.is_empty() || has_nan(values) {
        return vec![f64::NAN; qs.len()];
    }

    let mut sorted: Vec<f64> = values.iter().map(|&x| f64::from(x)).collect();
    sorted.sort_by(f64::total_cmp);
    let last = (sorted.len() - 1) as f64;

    qs.iter()
        .map(|&q| {
            let rank = (q / 100.0).clamp(0.0, 1.0) * last;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            // equal neighbours need no interpolation (and inf - inf is NaN)
            if lo == hi || sorted[lo] == sorted[hi] {
                return sorted[lo];
            }
            let frac = rank - rank.floor();
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        })
        .collect()
}

/// Whether any element is NaN.
#[must_use]
pub fn has_nan(values: &[f32]) -> bool {
    values.iter().any(|x| x.is_nan())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_known_values() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert!((mean(&v) - 2.5).abs() < EPS);
        assert!((std(&v) - 1.25_f64.sqrt()).abs() < EPS);
        assert!((min(&v) - 1.0).abs() < EPS);
        assert!((max(&v) - 4.0).abs() < EPS);
        assert!((l2_norm(&v) - 30.0_f64.sqrt()).abs() < EPS);
    }

    #[test]
    fn test_std_is_population() {
        // Sample std of [1, 2, 3, 4] would be ~1.291
        assert!((std(&[1.0, 2.0, 3.0, 4.0]) - 1.118_034).abs() < 1e-6);
    }

    #[test]
    fn test_empty_arrays() {
        assert!(mean(&[]).is_nan());
        assert!(std(&[]).is_nan());
        assert!(min(&[]).is_nan());
        assert!(max(&[]).is_nan());
        assert!(l2_norm(&[]).abs() < EPS);
        assert_eq!(Statistic::Zeros.compute(&[]), StatValue::Scalar(0.0));
    }

    #[test]
    fn test_nan_propagates_through_min_max() {
        let v = [1.0, f32::NAN, 3.0];
        assert!(min(&v).is_nan());
        assert!(max(&v).is_nan());
        assert!(has_nan(&v));
    }

    #[test]
    fn test_zeros() {
        let v = [0.0, 1.0, -0.0, 2.0];
        assert_eq!(Statistic::Zeros.compute(&v), StatValue::Scalar(2.0));
    }

    #[test]
    fn test_percentiles_linear_interpolation() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0];
        let p = percentiles(&v, &[0.0, 50.0, 100.0, 25.0, 10.0]);
        assert!((p[0] - 1.0).abs() < EPS);
        assert!((p[1] - 3.0).abs() < EPS);
        assert!((p[2] - 5.0).abs() < EPS);
        assert!((p[3] - 2.0).abs() < EPS);
        assert!((p[4] - 1.4).abs() < EPS);
    }

    #[test]
    fn test_percentiles_with_infinities() {
        let p = percentiles(&[1.0, f32::INFINITY], &[0.0, 100.0]);
        assert!((p[0] - 1.0).abs() < EPS);
        assert_eq!(p[1], f64::INFINITY);

        let all_inf = percentiles(&[f32::INFINITY; 3], &SIGMA_PERCENTILES);
        assert!(all_inf.iter().all(|&x| x == f64::INFINITY));
    }

    #[test]
    fn test_sum_compensated_and_special_values() {
        assert!((sum(&[0.1; 1000]) - 100.0).abs() < 1e-3);
        assert!(sum(&[]).abs() < EPS);
        assert_eq!(sum(&[1.0, f32::INFINITY]), f64::INFINITY);
        assert!(mean(&[1.0, f32::NAN]).is_nan());
    }

    #[test]
    fn test_sum_of_squares_matches_norm() {
        let v = [3.0, 4.0];
        assert!((sum_of_squares(&v) - 25.0).abs() < EPS);
        assert!((l2_norm(&v) - 5.0).abs() < EPS);
        assert!(sum_of_squares(&[]).abs() < EPS);
    }

    #[test]
    fn test_percentile_width() {
        match Statistic::Percentile.compute(&[1.0, 2.0]) {
            StatValue::Series(s) => assert_eq!(s.len(), 7),
            StatValue::Scalar(_) => panic!("expected series"),
        }
        assert_eq!(Statistic::Percentile.width(), 7);
        assert_eq!(Statistic::Mean.width(), 1);
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&Statistic::GRAD_DEFAULTS).unwrap();
        assert_eq!(json, r#"["mean","std","min","max","norm"]"#);
        let parsed: Statistic = serde_json::from_str("\"percentile\"").unwrap();
        assert_eq!(parsed, Statistic::Percentile);
    }
}
