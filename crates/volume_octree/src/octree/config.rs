//! Octree geometry and construction parameters.
//!
//! # Level Convention
//!
//! Level 0 = finest detail (leaf bricks at full resolution), level
//! `num_levels - 1` = root. Every node stores a `brick_dim³` brick regardless
//! of its level, so a node at level `l` covers `brick_dim · 2^l` voxels per
//! axis.
//!
//! ```text
//! octree_dim = next_pow2(max(volume_dim))
//! num_levels = log2(octree_dim / brick_dim) + 1
//! ```

use glam::UVec3;
use serde::{Deserialize, Serialize};

use crate::constants::{BYTES_PER_VOXEL, MAX_CHANNELS, NORMALIZED_MAX};
use crate::error::OctreeError;

/// Derived dimensions of an octree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OctreeGeometry {
  pub volume_dim: UVec3,
  /// Edge length of the cubic octree domain (power of two).
  pub octree_dim: u32,
  pub brick_dim: u32,
  pub num_levels: u32,
  pub num_channels: u32,
  pub bytes_per_voxel: u32,
}

impl OctreeGeometry {
  pub fn new(volume_dim: UVec3, brick_dim: u32, num_channels: usize) -> Result<Self, OctreeError> {
    if volume_dim.cmple(UVec3::ONE).any() {
      return Err(OctreeError::invalid_argument(format!(
        "volume dimensions must be greater than one: {volume_dim}"
      )));
    }
    if num_channels == 0 || num_channels > MAX_CHANNELS {
      return Err(OctreeError::invalid_argument(format!(
        "channel count must be between 1 and {MAX_CHANNELS}: {num_channels}"
      )));
    }
    let octree_dim = volume_dim.max_element().next_power_of_two();
    if !brick_dim.is_power_of_two() || brick_dim < 2 {
      return Err(OctreeError::invalid_argument(format!(
        "brick dimension must be a power of two of at least 2: {brick_dim}"
      )));
    }
    if brick_dim > octree_dim {
      return Err(OctreeError::invalid_argument(format!(
        "brick dimension {brick_dim} exceeds octree dimension {octree_dim}"
      )));
    }
    Ok(Self {
      volume_dim,
      octree_dim,
      brick_dim,
      num_levels: (octree_dim / brick_dim).trailing_zeros() + 1,
      num_channels: num_channels as u32,
      bytes_per_voxel: BYTES_PER_VOXEL as u32,
    })
  }

  /// Check a deserialized geometry for internal consistency.
  pub fn validate(&self) -> Result<(), OctreeError> {
    let expected = Self::new(self.volume_dim, self.brick_dim, self.num_channels as usize)?;
    if expected != *self {
      return Err(OctreeError::invalid_argument(format!(
        "inconsistent octree geometry: {self:?}"
      )));
    }
    Ok(())
  }

  #[inline]
  pub fn num_channels(&self) -> usize {
    self.num_channels as usize
  }

  #[inline]
  pub fn voxels_per_brick(&self) -> usize {
    (self.brick_dim as usize).pow(3)
  }

  /// `u16` samples per brick (all channels).
  #[inline]
  pub fn brick_samples(&self) -> usize {
    self.voxels_per_brick() * self.num_channels()
  }

  #[inline]
  pub fn brick_bytes(&self) -> usize {
    self.brick_samples() * self.bytes_per_voxel as usize
  }

  /// Reconstruction dimensions at `level` (`volume_dim / 2^level`).
  #[inline]
  pub fn level_volume_dim(&self, level: u32) -> UVec3 {
    self.volume_dim >> level
  }

  /// Voxels per axis covered by one node at `level`.
  #[inline]
  pub fn node_dim_at_level(&self, level: u32) -> u32 {
    self.brick_dim << level
  }

  /// Leaf nodes per axis.
  #[inline]
  pub fn leaf_grid_dim(&self) -> u32 {
    self.octree_dim / self.brick_dim
  }

  /// Nodes of a complete tree with `depth` levels: `Σ 8^l` for `l < depth`.
  pub fn complete_tree_node_count(depth: u32) -> u64 {
    (0..depth).map(|l| 8u64.pow(l)).sum()
  }
}

/// Parameters of [`VolumeOctree::build`](super::VolumeOctree::build).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BuildOptions {
  /// Brick edge length in voxels; power of two.
  pub brick_dim: u32,
  /// Largest normalized `max - min` range, in `[0, 1]`, that still counts as
  /// homogeneous. Negative disables pruning and yields a complete tree.
  pub homogeneity_threshold: f32,
  /// Construction workers (0 = one per core).
  pub num_threads: usize,
}

impl BuildOptions {
  /// Default parameters with light pruning.
  pub const DEFAULT: Self = Self {
    brick_dim: 32,
    homogeneity_threshold: 0.001,
    num_threads: 0,
  };

  /// Prune only regions that are exactly constant.
  pub const LOSSLESS: Self = Self {
    brick_dim: 32,
    homogeneity_threshold: 0.0,
    num_threads: 0,
  };

  /// No pruning: every node carries a brick.
  pub const COMPLETE_TREE: Self = Self {
    brick_dim: 32,
    homogeneity_threshold: -1.0,
    num_threads: 0,
  };

  pub fn with_brick_dim(mut self, brick_dim: u32) -> Self {
    self.brick_dim = brick_dim;
    self
  }

  pub fn with_homogeneity_threshold(mut self, threshold: f32) -> Self {
    self.homogeneity_threshold = threshold;
    self
  }

  pub fn with_num_threads(mut self, num_threads: usize) -> Self {
    self.num_threads = num_threads;
    self
  }

  #[inline]
  pub fn optimization_enabled(&self) -> bool {
    self.homogeneity_threshold >= 0.0
  }

  /// Threshold in the normalized `u16` domain.
  pub fn threshold_u16(&self) -> u16 {
    if !self.optimization_enabled() {
      return 0;
    }
    (self.homogeneity_threshold * NORMALIZED_MAX as f32)
      .round()
      .clamp(0.0, NORMALIZED_MAX as f32) as u16
  }
}

impl Default for BuildOptions {
  fn default() -> Self {
    Self::DEFAULT
  }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
