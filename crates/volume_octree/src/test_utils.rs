//! Test utilities shared by the octree, pool and persistence tests.
//!
//! Provides a reproducible noise generator, synthetic volumes with known
//! homogeneous regions, an independent mip-map reference and unique scratch
//! directories.

use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use glam::UVec3;

use crate::constants::{cubic_to_linear, voxel_count};
use crate::octree::{BuildOptions, VolumeOctree};
use crate::pool::RamBrickPool;
use crate::progress::NoProgress;
use crate::source::{ChannelSource, VolumeBuffer};

// =============================================================================
// Random numbers
// =============================================================================

/// Multiply-with-carry generator; identical seeds give identical sequences.
#[derive(Clone, Debug)]
pub struct MwcRng {
  mz: u32,
  mw: u32,
}

impl MwcRng {
  pub fn new(mz: u32, mw: u32) -> Self {
    assert!(mz != 0 && mw != 0, "seeds must be non-zero");
    Self { mz, mw }
  }

  pub fn next_u32(&mut self) -> u32 {
    self.mz = 36969 * (self.mz & 65535) + (self.mz >> 16);
    self.mw = 18000 * (self.mw & 65535) + (self.mw >> 16);
    (self.mz << 16).wrapping_add(self.mw)
  }

  pub fn next_u16(&mut self) -> u16 {
    (self.next_u32() >> 16) as u16
  }
}

impl Default for MwcRng {
  fn default() -> Self {
    Self::new(3, 17)
  }
}

// =============================================================================
// Synthetic volumes
// =============================================================================

/// Uniform random `u16` noise (no homogeneous regions).
pub fn noise_volume(dim: UVec3) -> Vec<u16> {
  let mut rng = MwcRng::default();
  (0..voxel_count(dim)).map(|_| rng.next_u16()).collect()
}

pub fn constant_volume(dim: UVec3, value: u16) -> Vec<u16> {
  vec![value; voxel_count(dim)]
}

/// Volume of constant regions of size `region`, where face-adjacent regions
/// differ by at least 8192.
pub fn bricked_volume(dim: UVec3, region: UVec3) -> Vec<u16> {
  const MIN_NEIGHBOR_DIFF: u16 = 1 << 13;

  let regions = dim / region;
  assert_eq!(regions * region, dim, "region must divide the volume");
  let mut rng = MwcRng::default();
  let mut values = vec![0u16; voxel_count(regions)];

  for z in 0..regions.z {
    for y in 0..regions.y {
      for x in 0..regions.x {
        let cell = UVec3::new(x, y, z);
        let neighbors: Vec<u16> = [UVec3::X, UVec3::Y, UVec3::Z]
          .iter()
          .filter(|axis| (cell * **axis).max_element() > 0)
          .map(|axis| values[cubic_to_linear(cell - *axis, regions)])
          .collect();
        let value = loop {
          let candidate = rng.next_u16();
          if neighbors.iter().all(|n| candidate.abs_diff(*n) >= MIN_NEIGHBOR_DIFF) {
            break candidate;
          }
        };
        values[cubic_to_linear(cell, regions)] = value;
      }
    }
  }

  let mut data = vec![0u16; voxel_count(dim)];
  for z in 0..dim.z {
    for y in 0..dim.y {
      for x in 0..dim.x {
        let voxel = UVec3::new(x, y, z);
        data[cubic_to_linear(voxel, dim)] = values[cubic_to_linear(voxel / region, regions)];
      }
    }
  }
  data
}

/// Crop the lower-left-front `target` region of a volume.
pub fn crop(data: &[u16], dim: UVec3, target: UVec3) -> Vec<u16> {
  let mut out = Vec::with_capacity(voxel_count(target));
  for z in 0..target.z {
    for y in 0..target.y {
      for x in 0..target.x {
        out.push(data[cubic_to_linear(UVec3::new(x, y, z), dim)]);
      }
    }
  }
  out
}

/// Interleave single-channel volumes into one channel-interleaved buffer.
pub fn interleave(channels: &[&[u16]]) -> Vec<u16> {
  let voxels = channels[0].len();
  let mut out = Vec::with_capacity(voxels * channels.len());
  for i in 0..voxels {
    for channel in channels {
      out.push(channel[i]);
    }
  }
  out
}

// =============================================================================
// Mip-map reference
// =============================================================================

/// One 2x2x2 box-filter step (truncating mean), output `dim / 2`.
pub fn half_sample(data: &[u16], dim: UVec3) -> (Vec<u16>, UVec3) {
  let out_dim = dim / 2;
  let mut out = Vec::with_capacity(voxel_count(out_dim));
  for z in 0..out_dim.z {
    for y in 0..out_dim.y {
      for x in 0..out_dim.x {
        let base = UVec3::new(x, y, z) * 2;
        let mut sum = 0u64;
        for dz in 0..2 {
          for dy in 0..2 {
            for dx in 0..2 {
              sum += data[cubic_to_linear(base + UVec3::new(dx, dy, dz), dim)] as u64;
            }
          }
        }
        out.push((sum / 8) as u16);
      }
    }
  }
  (out, out_dim)
}

/// Levels `0..levels` of a single-channel mip map.
pub fn mip_map(data: &[u16], dim: UVec3, levels: u32) -> Vec<(UVec3, Vec<u16>)> {
  let mut out = vec![(dim, data.to_vec())];
  for _ in 1..levels {
    let (prev_dim, prev) = out.last().cloned().unwrap_or_default();
    let (next, next_dim) = half_sample(&prev, prev_dim);
    out.push((next_dim, next));
  }
  out
}

/// Largest per-sample difference and number of samples differing by more
/// than `tolerance`.
pub fn compare(actual: &[u16], expected: &[u16], tolerance: u16) -> (u16, usize) {
  assert_eq!(actual.len(), expected.len(), "buffer length mismatch");
  actual
    .iter()
    .zip(expected)
    .map(|(a, e)| a.abs_diff(*e))
    .fold((0, 0), |(max, count), diff| {
      (max.max(diff), count + usize::from(diff > tolerance))
    })
}

// =============================================================================
// Octree fixtures
// =============================================================================

pub fn u16_source(dim: UVec3, data: &[u16]) -> VolumeBuffer {
  VolumeBuffer::from_samples(dim, data).expect("valid test volume")
}

/// Pool with room for many bricks; tests never hit its limits.
pub fn ram_pool() -> Box<RamBrickPool> {
  Box::new(RamBrickPool::new(1 << 20))
}

pub fn build_ram(sources: &[&dyn ChannelSource], options: &BuildOptions) -> VolumeOctree {
  VolumeOctree::build(sources, options, ram_pool(), &mut NoProgress::default())
    .expect("octree construction should succeed")
}

pub fn build_single(dim: UVec3, data: &[u16], options: &BuildOptions) -> VolumeOctree {
  let source = u16_source(dim, data);
  build_ram(&[&source], options)
}

// =============================================================================
// Scratch directories
// =============================================================================

static TEST_UNIQUIFIER: AtomicU64 = AtomicU64::new(0);

/// Scratch directory that is removed with its contents on drop.
///
/// Declare it before any pool that writes into it so the pool is dropped
/// (and flushed) first.
#[derive(Debug)]
pub struct TestDir(PathBuf);

impl Deref for TestDir {
  type Target = Path;

  fn deref(&self) -> &Path {
    &self.0
  }
}

impl AsRef<Path> for TestDir {
  fn as_ref(&self) -> &Path {
    &self.0
  }
}

impl Drop for TestDir {
  fn drop(&mut self) {
    let _ = std::fs::remove_dir_all(&self.0);
  }
}

/// Fresh, empty directory under the system temp dir.
pub fn test_dir(name: &str) -> TestDir {
  let serial = TEST_UNIQUIFIER.fetch_add(1, Ordering::Relaxed);
  let mut path = std::env::temp_dir();
  path.push(format!(
    "volume-octree-{name}-{}-{}",
    std::process::id(),
    serial
  ));
  let _ = std::fs::remove_dir_all(&path);
  std::fs::create_dir_all(&path).expect("create test directory");
  TestDir(path)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_scratch_directory_is_removed_on_drop() {
    let dir = test_dir("scratch");
    std::fs::write(dir.join("file.raw"), [1u8, 2, 3]).unwrap();
    let path = dir.to_path_buf();
    assert!(path.is_dir());
    drop(dir);
    assert!(!path.exists(), "Scratch directory should be deleted with its contents");
  }
}
