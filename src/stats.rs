use snafu::OptionExt;
use std::num::NonZeroUsize;

use crate::errors::stats::EmptySelectionSnafu;
use crate::errors::StatsError;
use crate::mask::IntensityMask;

/// Default number of histogram bins used to locate the histogram peak.
///
/// 256 bins matches the resolution of 8-bit intensity data and keeps bins narrow
/// enough on 16-bit and float scans that the peak is within 0.4% of the selected
/// intensity range.
pub const DEFAULT_HISTOGRAM_BINS: NonZeroUsize = match NonZeroUsize::new(256) {
    Some(bins) => bins,
    None => unreachable!(),
};

/// Running mean (Welford update) with the extrema tracked in the same pass.
#[derive(Debug, Clone, Copy)]
pub struct RunningMoments {
    count: u64,
    mean: f64,
    min: f64,
    max: f64,
}

impl Default for RunningMoments {
    fn default() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}

impl RunningMoments {
    pub fn update(&mut self, value: f64) {
        self.count += 1;
        self.mean += (value - self.mean) / self.count as f64;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Mean of the observed values. Rounding in the running update can push the mean
    /// an ulp outside of `[min, max]`, so it is clamped back into the range.
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.mean.max(self.min).min(self.max))
    }

    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }
}

impl FromIterator<f64> for RunningMoments {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        iter.into_iter().fold(Self::default(), |mut moments, value| {
            moments.update(value);
            moments
        })
    }
}

/// Median of a set of values, reordering the slice in place.
/// For an even count this is the mean of the two middle values.
pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mid = values.len() / 2;
    let odd = values.len() % 2 == 1;
    let (lower, upper, _) = values.select_nth_unstable_by(mid, f64::total_cmp);
    let upper = *upper;
    if odd {
        return Some(upper);
    }
    let lower = lower.iter().copied().max_by(f64::total_cmp)?;
    Some(lower + (upper - lower) / 2.0)
}

/// Equal-width histogram over a closed range.
///
/// Every bin is half-open `[left, right)` except the last one, which also holds
/// values equal to the upper bound. A degenerate range `lower == upper` is widened
/// to `[lower - 0.5, upper + 0.5]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    counts: Vec<u64>,
    lower: f64,
    upper: f64,
}

impl Histogram {
    /// Histogram of `values` over `[lower, upper]`. Values outside the range are ignored.
    pub fn with_range(values: &[f64], lower: f64, upper: f64, bins: NonZeroUsize) -> Self {
        let (lower, upper) = if lower == upper {
            (lower - 0.5, upper + 0.5)
        } else {
            (lower, upper)
        };
        let mut histogram = Self {
            counts: vec![0; bins.get()],
            lower,
            upper,
        };
        let width = histogram.bin_width();
        let last = bins.get() - 1;
        for &value in values {
            if value < lower || value > upper {
                continue;
            }
            let bin = (((value - lower) / width) as usize).min(last);
            histogram.counts[bin] += 1;
        }
        histogram
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn bin_width(&self) -> f64 {
        (self.upper - self.lower) / self.counts.len() as f64
    }

    /// Bin edges, one more than the number of bins.
    pub fn edges(&self) -> Vec<f64> {
        let width = self.bin_width();
        (0..=self.counts.len())
            .map(|i| self.lower + i as f64 * width)
            .collect()
    }

    pub fn bin_center(&self, bin: usize) -> f64 {
        self.lower + (bin as f64 + 0.5) * self.bin_width()
    }

    /// Index of the first bin with the highest count.
    pub fn peak_bin(&self) -> usize {
        let max = self.counts.iter().copied().max().unwrap_or(0);
        self.counts.iter().position(|&c| c == max).unwrap_or(0)
    }

    /// Center of the most populated bin.
    pub fn peak(&self) -> f64 {
        self.bin_center(self.peak_bin())
    }
}

/// Summary statistics over the voxels selected by a mask.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntensityStatistics {
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub voxel_count: u64,
    pub histogram_peak: f64,
}

impl IntensityStatistics {
    /// Compute statistics over the voxels included by `mask`.
    ///
    /// Fails with `EmptySelection` when the mask excludes every voxel. When all
    /// selected voxels share one value, that value is the histogram peak.
    pub fn compute<I>(
        voxels: I,
        mask: &IntensityMask,
        bins: NonZeroUsize,
    ) -> Result<Self, StatsError>
    where
        I: IntoIterator<Item = f64>,
    {
        let empty = EmptySelectionSnafu {
            threshold: mask.threshold(),
        };
        let mut values = mask.select(voxels);
        let moments = values.iter().copied().collect::<RunningMoments>();
        let (Some(mean), Some(min), Some(max)) = (moments.mean(), moments.min(), moments.max())
        else {
            return empty.fail();
        };

        let histogram_peak = if min == max {
            min
        } else {
            Histogram::with_range(&values, min, max, bins).peak()
        };
        let median = median(&mut values).context(empty)?;

        Ok(Self {
            mean,
            median,
            min,
            max,
            voxel_count: moments.count(),
            histogram_peak,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use rstest::rstest;

    const TOLERANCE: f64 = 1e-9;

    fn bins(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn test_running_moments() {
        let moments: RunningMoments = (1..=5).map(|v| v as f64).collect();
        assert_eq!(moments.count(), 5);
        assert!((moments.mean().unwrap() - 3.0).abs() < TOLERANCE);
        assert_eq!(moments.min(), Some(1.0));
        assert_eq!(moments.max(), Some(5.0));
    }

    #[test]
    fn test_running_moments_empty() {
        let moments = RunningMoments::default();
        assert_eq!(moments.count(), 0);
        assert_eq!(moments.mean(), None);
        assert_eq!(moments.min(), None);
        assert_eq!(moments.max(), None);
    }

    #[rstest]
    #[case(vec![3.0, 1.0, 2.0], Some(2.0))]
    #[case(vec![4.0, 1.0, 3.0, 2.0], Some(2.5))]
    #[case(vec![7.0], Some(7.0))]
    #[case(vec![-1.0, -3.0], Some(-2.0))]
    #[case(vec![], None)]
    fn test_median(#[case] mut values: Vec<f64>, #[case] expected: Option<f64>) {
        assert_eq!(median(&mut values), expected);
    }

    #[rstest]
    #[case::odd(101)]
    #[case::even(100)]
    fn test_median_matches_sorted(#[case] len: usize) {
        let mut rng = rand::thread_rng();
        let mut values: Vec<f64> = (0..len).map(|_| rng.gen_range(-50.0..50.0)).collect();
        let mut sorted = values.clone();
        sorted.sort_by(f64::total_cmp);
        let expected = if len % 2 == 1 {
            sorted[len / 2]
        } else {
            (sorted[len / 2 - 1] + sorted[len / 2]) / 2.0
        };
        assert!((median(&mut values).unwrap() - expected).abs() < TOLERANCE);
    }

    #[test]
    fn test_histogram_counts_and_peak() {
        let values = [0.0, 1.0, 1.0, 1.0, 2.0, 9.0, 10.0];
        let histogram = Histogram::with_range(&values, 0.0, 10.0, bins(10));
        assert_eq!(histogram.counts(), &[1, 3, 1, 0, 0, 0, 0, 0, 0, 2]);
        assert_eq!(histogram.peak_bin(), 1);
        assert!((histogram.peak() - 1.5).abs() < TOLERANCE);
        assert_eq!(histogram.edges().len(), 11);
    }

    #[test]
    fn test_histogram_peak_ties_pick_first_bin() {
        let values = [0.0, 0.0, 10.0, 10.0];
        let histogram = Histogram::with_range(&values, 0.0, 10.0, bins(2));
        assert_eq!(histogram.counts(), &[2, 2]);
        assert_eq!(histogram.peak_bin(), 0);
        assert!((histogram.peak() - 2.5).abs() < TOLERANCE);
    }

    #[test]
    fn test_histogram_degenerate_range() {
        let histogram = Histogram::with_range(&[4.0, 4.0], 4.0, 4.0, bins(1));
        assert_eq!(histogram.counts(), &[2]);
        assert_eq!(histogram.edges(), vec![3.5, 4.5]);
        assert!((histogram.peak() - 4.0).abs() < TOLERANCE);
    }

    #[test]
    fn test_compute_all_voxels() {
        let voxels = vec![1.0, 2.0, 2.0, 3.0, 7.0];
        let stats = IntensityStatistics::compute(voxels, &IntensityMask::All, bins(6)).unwrap();
        assert_eq!(stats.voxel_count, 5);
        assert!((stats.mean - 3.0).abs() < TOLERANCE);
        assert_eq!(stats.median, 2.0);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 7.0);
        // Bins of width 1 over [1, 7]: the bin [2, 3) holds two voxels
        assert!((stats.histogram_peak - 2.5).abs() < TOLERANCE);
    }

    #[test]
    fn test_compute_threshold() {
        let voxels = (0..=20).map(|v| v as f64);
        let stats =
            IntensityStatistics::compute(voxels, &IntensityMask::Threshold(10.0), bins(256))
                .unwrap();
        assert_eq!(stats.voxel_count, 10);
        assert_eq!(stats.min, 11.0);
        assert_eq!(stats.max, 20.0);
        assert_eq!(stats.median, 15.5);
        assert!((stats.mean - 15.5).abs() < TOLERANCE);
    }

    #[test]
    fn test_compute_constant_values() {
        let stats =
            IntensityStatistics::compute(vec![5.0; 64], &IntensityMask::All, bins(10)).unwrap();
        assert_eq!(stats.voxel_count, 64);
        assert_eq!(stats.mean, 5.0);
        assert_eq!(stats.median, 5.0);
        assert_eq!(stats.histogram_peak, 5.0);
    }

    #[rstest]
    #[case::threshold(IntensityMask::Threshold(10.0), vec![5.0; 64], Some(10.0))]
    #[case::no_voxels(IntensityMask::All, vec![], None)]
    #[case::only_nan(IntensityMask::All, vec![f64::NAN; 3], None)]
    fn test_compute_empty_selection(
        #[case] mask: IntensityMask,
        #[case] voxels: Vec<f64>,
        #[case] threshold: Option<f64>,
    ) {
        let result = IntensityStatistics::compute(voxels, &mask, bins(10));
        assert_eq!(result, Err(StatsError::EmptySelection { threshold }));
    }

    #[test]
    fn test_compute_random_volumes_bounds() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let len = rng.gen_range(1..500);
            let voxels: Vec<f64> = (0..len).map(|_| rng.gen_range(-1e3..1e3)).collect();
            let threshold = rng.gen_range(-1e3..0.0);
            let mask = IntensityMask::Threshold(threshold);
            let expected_count = voxels.iter().filter(|&&v| v > threshold).count() as u64;

            match IntensityStatistics::compute(voxels, &mask, bins(32)) {
                Ok(stats) => {
                    assert_eq!(stats.voxel_count, expected_count);
                    assert!(stats.min <= stats.mean && stats.mean <= stats.max);
                    assert!(stats.min <= stats.median && stats.median <= stats.max);
                    assert!(stats.min <= stats.histogram_peak && stats.histogram_peak <= stats.max);
                }
                Err(StatsError::EmptySelection { .. }) => assert_eq!(expected_count, 0),
            }
        }
    }
}
