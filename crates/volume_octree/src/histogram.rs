//! Per-channel value histograms gathered during construction.

use serde::{Deserialize, Serialize};

use crate::constants::{MAX_HISTOGRAM_BUCKET_BITS, NORMALIZED_RANGE};
use crate::types::{RealWorldMapping, VoxelFormat};

/// Bucket counts over a real-world value range.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
  min: f32,
  max: f32,
  buckets: Vec<u64>,
}

impl Histogram {
  pub fn new(min: f32, max: f32, num_buckets: usize) -> Self {
    Self {
      min,
      max,
      buckets: vec![0; num_buckets.max(1)],
    }
  }

  /// Bucket count used for a source format: 256 for 8-bit data, 4096 otherwise.
  pub fn bucket_count_for(format: VoxelFormat) -> usize {
    1 << (8 * format.bytes_per_voxel()).min(MAX_HISTOGRAM_BUCKET_BITS)
  }

  /// Out-of-range bucket indices are ignored.
  pub fn increase_bucket(&mut self, bucket: usize, count: u64) {
    if let Some(slot) = self.buckets.get_mut(bucket) {
      *slot += count;
    }
  }

  #[inline]
  pub fn num_buckets(&self) -> usize {
    self.buckets.len()
  }

  #[inline]
  pub fn bucket(&self, bucket: usize) -> u64 {
    self.buckets.get(bucket).copied().unwrap_or(0)
  }

  pub fn buckets(&self) -> &[u64] {
    &self.buckets
  }

  pub fn num_samples(&self) -> u64 {
    self.buckets.iter().sum()
  }

  pub fn max_bucket(&self) -> u64 {
    self.buckets.iter().copied().max().unwrap_or(0)
  }

  pub fn min_value(&self) -> f32 {
    self.min
  }

  pub fn max_value(&self) -> f32 {
    self.max
  }

  /// Real-world value interval `[lower, upper)` covered by `bucket`.
  pub fn bucket_range(&self, bucket: usize) -> (f32, f32) {
    let width = (self.max - self.min) / self.buckets.len() as f32;
    let lower = self.min + width * bucket as f32;
    (lower, lower + width)
  }

  /// Bucket containing a real-world value, clamped to the first/last bucket.
  pub fn bucket_for_value(&self, value: f32) -> usize {
    let span = self.max - self.min;
    if span <= 0.0 || value.is_nan() {
      return 0;
    }
    let relative = ((value - self.min) / span).clamp(0.0, 1.0);
    ((relative * self.buckets.len() as f32) as usize).min(self.buckets.len() - 1)
  }
}

/// Full-resolution counts of normalized values, one block of 65536 per channel.
///
/// Each construction worker owns one; they are summed and bucketized once at
/// the end of the build.
#[derive(Clone, Debug)]
pub(crate) struct HistogramAccumulator {
  num_channels: usize,
  counts: Vec<u64>,
}

impl HistogramAccumulator {
  pub(crate) fn new(num_channels: usize) -> Self {
    Self {
      num_channels,
      counts: vec![0; num_channels * NORMALIZED_RANGE],
    }
  }

  #[inline(always)]
  pub(crate) fn record(&mut self, channel: usize, value: u16) {
    self.counts[channel * NORMALIZED_RANGE + value as usize] += 1;
  }

  pub(crate) fn merge(&mut self, other: &Self) {
    for (a, b) in self.counts.iter_mut().zip(&other.counts) {
      *a += *b;
    }
  }

  /// Reduce the full-resolution counts to one histogram per channel, each
  /// spanning the real-world range of its channel's mapping.
  pub(crate) fn into_histograms(
    self,
    num_buckets: usize,
    mappings: &[RealWorldMapping],
  ) -> Vec<Histogram> {
    let bucket_shift = 16 - num_buckets.max(1).trailing_zeros().min(16);
    (0..self.num_channels)
      .map(|channel| {
        let mapping = mappings.get(channel).copied().unwrap_or_default();
        let min = mapping.normalized_to_real_world(0.0);
        let max = mapping.normalized_to_real_world(1.0);
        let mut histogram = Histogram::new(min, max, num_buckets);
        let counts = &self.counts[channel * NORMALIZED_RANGE..(channel + 1) * NORMALIZED_RANGE];
        for (value, &count) in counts.iter().enumerate() {
          if count > 0 {
            histogram.increase_bucket(value >> bucket_shift, count);
          }
        }
        histogram
      })
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_bucket_counts_per_format() {
    assert_eq!(Histogram::bucket_count_for(VoxelFormat::U8), 256);
    assert_eq!(Histogram::bucket_count_for(VoxelFormat::I8), 256);
    assert_eq!(Histogram::bucket_count_for(VoxelFormat::U16), 4096);
    assert_eq!(Histogram::bucket_count_for(VoxelFormat::F64), 4096);
  }

  #[test]
  fn test_bucket_queries() {
    let mut histogram = Histogram::new(0.0, 1.0, 4);
    histogram.increase_bucket(1, 3);
    histogram.increase_bucket(3, 5);
    histogram.increase_bucket(9, 100);

    assert_eq!(histogram.num_samples(), 8, "Out-of-range bucket must be ignored");
    assert_eq!(histogram.max_bucket(), 5);
    assert_eq!(histogram.bucket(1), 3);
    assert_eq!(histogram.bucket_range(2), (0.5, 0.75));
    assert_eq!(histogram.bucket_for_value(0.6), 2);
    assert_eq!(histogram.bucket_for_value(1.0), 3);
    assert_eq!(histogram.bucket_for_value(-4.0), 0);
  }

  #[test]
  fn test_accumulator_bucketizes_by_high_bits() {
    let mut a = HistogramAccumulator::new(2);
    let mut b = HistogramAccumulator::new(2);
    a.record(0, 0);
    a.record(0, 0xFFFF);
    b.record(0, 0x00FF);
    b.record(1, 0x8000);
    a.merge(&b);

    let histograms = a.into_histograms(256, &[RealWorldMapping::IDENTITY; 2]);
    assert_eq!(histograms.len(), 2);
    assert_eq!(histograms[0].bucket(0), 2, "0x0000 and 0x00FF share bucket 0");
    assert_eq!(histograms[0].bucket(255), 1);
    assert_eq!(histograms[1].bucket(128), 1);
    assert_eq!(histograms[1].num_samples(), 1);
  }

  #[test]
  fn test_accumulator_uses_real_world_range() {
    let histograms = HistogramAccumulator::new(1)
      .into_histograms(4096, &[RealWorldMapping::new(2.0, -1.0)]);
    assert_eq!(histograms[0].min_value(), -1.0);
    assert_eq!(histograms[0].max_value(), 1.0);
  }
}
