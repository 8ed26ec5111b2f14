//! Descriptive statistics over per-page view counts.
//!
//! Everything here is a pure function of its inputs: identical input
//! (and the same filtering flag) always produces identical output.
//!
//! Method choices, fixed across the workspace:
//! - Percentiles use nearest-rank on the ascending sort
//!   (`index = ceil(p * n) - 1`), so every reported percentile is an
//!   actually-observed value.
//! - Outlier removal uses Tukey fences at `1.5 * IQR`, with quartiles
//!   computed by the same nearest-rank rule.

use serde::{Deserialize, Serialize};

/// Result of a goal computation over a (possibly filtered) sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalStats {
    pub mean: f64,
    pub median: f64,
    pub p90: f64,
    pub max: u64,
    /// `round(median)`, a realistic per-page target.
    pub base_goal: u64,
    /// `round(p90)`, an ambitious per-page target.
    pub stretch_goal: u64,
    /// Sample size after outlier filtering (raw size when filtering is off).
    pub sample_count: usize,
}

impl GoalStats {
    fn zero() -> Self {
        Self {
            mean: 0.0,
            median: 0.0,
            p90: 0.0,
            max: 0,
            base_goal: 0,
            stretch_goal: 0,
            sample_count: 0,
        }
    }
}

/// Compute goal statistics over raw view counts.
///
/// With `outlier_filter` set, values outside the Tukey fences
/// `[q1 - 1.5*iqr, q3 + 1.5*iqr]` are dropped before aggregating, and
/// `sample_count` reflects the filtered size.
///
/// An empty input yields the all-zero result; callers that want the
/// documented fallback goals must short-circuit before getting here.
pub fn compute_goals(counts: &[u64], outlier_filter: bool) -> GoalStats {
    if counts.is_empty() {
        return GoalStats::zero();
    }

    let mut sorted: Vec<u64> = counts.to_vec();
    sorted.sort_unstable();

    if outlier_filter {
        let fenced = tukey_filter(&sorted);
        // The fences always bracket the quartiles, so the filtered set is
        // non-empty; the guard keeps this total even if the rule changes.
        if !fenced.is_empty() {
            sorted = fenced;
        }
    }

    let n = sorted.len();
    let sum: u64 = sorted.iter().sum();
    let mean = sum as f64 / n as f64;
    let median = percentile_sorted(&sorted, 50.0);
    let p90 = percentile_sorted(&sorted, 90.0);
    let max = sorted[n - 1];

    GoalStats {
        mean,
        median,
        p90,
        max,
        base_goal: median.round() as u64,
        stretch_goal: p90.round() as u64,
        sample_count: n,
    }
}

/// Nearest-rank percentile over an ascending-sorted slice.
///
/// `pct` is in `(0, 100]`; the rank is `ceil(pct/100 * n)`, clamped to
/// the valid index range.
fn percentile_sorted(sorted: &[u64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let n = sorted.len();
    let rank = (pct / 100.0 * n as f64).ceil() as usize;
    let idx = rank.clamp(1, n) - 1;
    sorted[idx] as f64
}

/// Drop values outside the Tukey fences `[q1 - 1.5*iqr, q3 + 1.5*iqr]`.
///
/// Input must be sorted ascending; output stays sorted.
fn tukey_filter(sorted: &[u64]) -> Vec<u64> {
    let q1 = percentile_sorted(sorted, 25.0);
    let q3 = percentile_sorted(sorted, 75.0);
    let iqr = q3 - q1;
    let low = q1 - 1.5 * iqr;
    let high = q3 + 1.5 * iqr;

    sorted
        .iter()
        .copied()
        .filter(|&v| {
            let v = v as f64;
            v >= low && v <= high
        })
        .collect()
}

/// One equal-width histogram bucket over a view-count sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBucket {
    /// Inclusive lower bound.
    pub lower: u64,
    /// Inclusive upper bound.
    pub upper: u64,
    pub count: usize,
}

/// Equal-width histogram over raw counts, for display only.
///
/// Buckets cover `[min, max]`; every sample lands in exactly one bucket
/// (the last bucket's upper bound is inclusive).
pub fn histogram(counts: &[u64], buckets: usize) -> Vec<HistogramBucket> {
    if counts.is_empty() || buckets == 0 {
        return Vec::new();
    }

    let min = *counts.iter().min().unwrap_or(&0);
    let max = *counts.iter().max().unwrap_or(&0);
    let span = max.saturating_sub(min) + 1;
    let buckets = buckets.min(span as usize);
    let width = span.div_ceil(buckets as u64);

    let mut out: Vec<HistogramBucket> = (0..buckets)
        .map(|i| {
            let lower = min + i as u64 * width;
            HistogramBucket {
                lower,
                upper: (lower + width - 1).min(max),
                count: 0,
            }
        })
        .collect();

    for &v in counts {
        let idx = ((v - min) / width) as usize;
        out[idx.min(buckets - 1)].count += 1;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn nearest_rank_small_samples() {
        // n = 5: p50 rank = ceil(2.5) = 3 -> third value.
        assert_eq!(percentile_sorted(&[10, 20, 30, 40, 50], 50.0), 30.0);
        // p90 rank = ceil(4.5) = 5 -> fifth value.
        assert_eq!(percentile_sorted(&[10, 20, 30, 40, 50], 90.0), 50.0);
        // n = 10: p90 rank = 9.
        let v: Vec<u64> = (1..=10).map(|i| i * 10).collect();
        assert_eq!(percentile_sorted(&v, 90.0), 90.0);
    }

    #[test]
    fn goals_on_uniform_sample() {
        let counts: Vec<u64> = (1..=100).collect();
        let stats = compute_goals(&counts, false);
        assert_relative_eq!(stats.mean, 50.5);
        assert_eq!(stats.median, 50.0);
        assert_eq!(stats.p90, 90.0);
        assert_eq!(stats.max, 100);
        assert_eq!(stats.base_goal, 50);
        assert_eq!(stats.stretch_goal, 90);
        assert_eq!(stats.sample_count, 100);
    }

    #[test]
    fn outlier_filter_drops_extremes_and_shrinks_sample() {
        // 20 well-behaved values plus one absurd spike.
        let mut counts: Vec<u64> = (100..120).collect();
        counts.push(1_000_000);

        let raw = compute_goals(&counts, false);
        let filtered = compute_goals(&counts, true);

        assert_eq!(raw.sample_count, 21);
        assert_eq!(filtered.sample_count, 20);
        assert_eq!(filtered.max, 119);
        assert!(filtered.mean < raw.mean);
    }

    #[test]
    fn outlier_filter_keeps_tight_samples_intact() {
        let counts = vec![50, 51, 52, 53, 54];
        let stats = compute_goals(&counts, true);
        assert_eq!(stats.sample_count, 5);
    }

    #[test]
    fn empty_input_is_all_zero() {
        let stats = compute_goals(&[], true);
        assert_eq!(stats, GoalStats::zero());
        let stats = compute_goals(&[], false);
        assert_eq!(stats.sample_count, 0);
    }

    #[test]
    fn single_value_sample() {
        let stats = compute_goals(&[42], true);
        assert_eq!(stats.base_goal, 42);
        assert_eq!(stats.stretch_goal, 42);
        assert_eq!(stats.max, 42);
        assert_eq!(stats.sample_count, 1);
    }

    #[test]
    fn histogram_covers_range() {
        let counts = vec![1, 2, 3, 10, 11, 12, 100];
        let h = histogram(&counts, 4);
        let total: usize = h.iter().map(|b| b.count).sum();
        assert_eq!(total, counts.len());
        assert_eq!(h.first().unwrap().lower, 1);
        assert_eq!(h.last().unwrap().upper, 100);
    }

    #[test]
    fn histogram_handles_degenerate_inputs() {
        assert!(histogram(&[], 10).is_empty());
        assert!(histogram(&[5, 5, 5], 0).is_empty());
        // All-equal sample collapses to one bucket.
        let h = histogram(&[7, 7, 7], 10);
        assert_eq!(h.len(), 1);
        assert_eq!(h[0].count, 3);
    }

    proptest! {
        #[test]
        fn base_never_exceeds_stretch_never_exceeds_max(
            counts in prop::collection::vec(0u64..1_000_000, 1..200),
            outlier_filter in any::<bool>(),
        ) {
            let stats = compute_goals(&counts, outlier_filter);
            prop_assert!(stats.base_goal <= stats.stretch_goal);
            prop_assert!(stats.stretch_goal <= stats.max);
            prop_assert!(stats.sample_count > 0);
        }

        #[test]
        fn deterministic_for_identical_input(
            counts in prop::collection::vec(0u64..100_000, 0..100),
            outlier_filter in any::<bool>(),
        ) {
            let a = compute_goals(&counts, outlier_filter);
            let b = compute_goals(&counts, outlier_filter);
            prop_assert_eq!(a, b);
        }

        #[test]
        fn filtered_count_never_exceeds_raw_count(
            counts in prop::collection::vec(0u64..1_000_000, 1..200),
        ) {
            let raw = compute_goals(&counts, false);
            let filtered = compute_goals(&counts, true);
            prop_assert!(filtered.sample_count <= raw.sample_count);
            prop_assert_eq!(raw.sample_count, counts.len());
        }
    }
}
