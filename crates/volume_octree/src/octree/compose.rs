//! Volume and slice reconstruction.
//!
//! Both operations copy a window of one level into a dense,
//! channel-interleaved buffer:
//!
//! ```text
//!  create_volume:  window = [0, level_dim)
//!  create_slice:   window = [0, level_dim) with the slice axis narrowed to
//!                  [index_at_level, index_at_level + 1)
//! ```
//!
//! The tree is traversed depth-first, child index ascending. Subtrees that
//! do not intersect the window are skipped, so a slice only visits the child
//! layer containing it. Brickless nodes broadcast their average; nodes at the
//! target level copy their brick.

use glam::UVec3;
use serde::{Deserialize, Serialize};

use super::budget::{BudgetClock, ComposeBudget};
use super::node::NodeId;
use super::VolumeOctree;
use crate::constants::{cubic_to_linear, voxel_count, CHILD_OFFSETS};
use crate::error::OctreeError;
use crate::pool::{BrickAddress, BrickRef};

/// Orientation of a slice, named by the plane it spans.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SliceAlignment {
  /// Constant x.
  YzPlane,
  /// Constant y.
  XzPlane,
  /// Constant z.
  XyPlane,
}

impl SliceAlignment {
  pub const ALL: [Self; 3] = [Self::YzPlane, Self::XzPlane, Self::XyPlane];

  /// Index of the axis held constant.
  #[inline]
  pub const fn axis(self) -> usize {
    match self {
      Self::YzPlane => 0,
      Self::XzPlane => 1,
      Self::XyPlane => 2,
    }
  }
}

/// Dense channel-interleaved voxel buffer produced by reconstruction.
#[derive(Clone, Debug, PartialEq)]
pub struct Reconstruction {
  pub dimensions: UVec3,
  pub num_channels: usize,
  /// `(x + y·dx + z·dx·dy) · num_channels + channel`.
  pub data: Vec<u16>,
  /// False when bricks were replaced by averages because the time budget
  /// ran out.
  pub complete: bool,
}

impl Reconstruction {
  fn zeroed(dimensions: UVec3, num_channels: usize) -> Self {
    Self {
      dimensions,
      num_channels,
      data: vec![0; voxel_count(dimensions) * num_channels],
      complete: true,
    }
  }

  #[inline]
  pub fn voxel(&self, position: UVec3, channel: usize) -> u16 {
    self.data[cubic_to_linear(position, self.dimensions) * self.num_channels + channel]
  }

  /// Samples of one channel.
  pub fn channel(&self, channel: usize) -> Vec<u16> {
    self
      .data
      .iter()
      .skip(channel)
      .step_by(self.num_channels)
      .copied()
      .collect()
  }

  /// Raw bytes in native byte order.
  pub fn as_bytes(&self) -> &[u8] {
    bytemuck::cast_slice(&self.data)
  }
}

impl VolumeOctree {
  /// Reconstruct the whole volume at `level` (`volume_dim / 2^level`).
  #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, name = "octree::create_volume"))]
  pub fn create_volume(&self, level: u32, budget: ComposeBudget) -> Result<Reconstruction, OctreeError> {
    self.check_level(level)?;
    let level_dim = self.level_dim(level);
    self.compose(level, UVec3::ZERO, level_dim, budget)
  }

  /// Reconstruct one slice at `level`. `index` addresses a full-resolution
  /// slice and is mapped to the containing slice of the level.
  #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, name = "octree::create_slice"))]
  pub fn create_slice(
    &self,
    alignment: SliceAlignment,
    index: u32,
    level: u32,
    budget: ComposeBudget,
  ) -> Result<Reconstruction, OctreeError> {
    self.check_level(level)?;
    let axis = alignment.axis();
    if index >= self.volume_dim()[axis] {
      return Err(OctreeError::precondition(format!(
        "slice index {index} out of range for {alignment:?} (volume dim: {})",
        self.volume_dim()
      )));
    }
    let level_dim = self.level_dim(level);
    let index_at_level = (index >> level).min(level_dim[axis] - 1);

    let mut lo = UVec3::ZERO;
    let mut hi = level_dim;
    lo[axis] = index_at_level;
    hi[axis] = index_at_level + 1;
    self.compose(level, lo, hi, budget)
  }

  /// Level dimensions, kept at least one voxel per axis for thin volumes.
  fn level_dim(&self, level: u32) -> UVec3 {
    self.geometry.level_volume_dim(level).max(UVec3::ONE)
  }

  fn compose(
    &self,
    level: u32,
    lo: UVec3,
    hi: UVec3,
    budget: ComposeBudget,
  ) -> Result<Reconstruction, OctreeError> {
    let mut composer = Composer {
      octree: self,
      target_level: level,
      clock: budget.start(),
      lo,
      hi,
      out: Reconstruction::zeroed(hi - lo, self.num_channels()),
    };
    let complete = composer.compose_node(self.root(), UVec3::ZERO, self.num_levels() - 1)?;
    let mut out = composer.out;
    out.complete = complete;

    #[cfg(feature = "tracing")]
    tracing::debug!(level, dimensions = %out.dimensions, complete, "composed");

    Ok(out)
  }
}

/// Traversal state of one reconstruction. Positions are voxels of the
/// target level; `[lo, hi)` is the output window.
struct Composer<'a> {
  octree: &'a VolumeOctree,
  target_level: u32,
  clock: BudgetClock,
  lo: UVec3,
  hi: UVec3,
  out: Reconstruction,
}

impl<'a> Composer<'a> {
  /// Returns whether the node's region was written without substitutions.
  fn compose_node(&mut self, id: NodeId, offset: UVec3, level: u32) -> Result<bool, OctreeError> {
    let node_dim = self.octree.geometry.node_dim_at_level(level - self.target_level);
    let region_lo = offset.max(self.lo);
    let region_hi = (offset + UVec3::splat(node_dim)).min(self.hi);
    if region_lo.cmpge(region_hi).any() {
      return Ok(true);
    }

    let octree = self.octree;
    let node = &octree.arena()[id];
    let Some(address) = node.brick_address() else {
      self.fill(region_lo, region_hi, id);
      return Ok(true);
    };

    if let (Some(children), true) = (node.children(), level > self.target_level) {
      let half = node_dim / 2;
      let mut complete = true;
      for (child, child_offset) in children.iter().zip(CHILD_OFFSETS) {
        complete &= self.compose_node(*child, offset + child_offset * half, level - 1)?;
      }
      return Ok(complete);
    }

    match self.load(address)? {
      Some(brick) => {
        self.copy(region_lo, region_hi, offset, node_dim, &brick);
        Ok(true)
      }
      None => {
        self.fill(region_lo, region_hi, id);
        Ok(false)
      }
    }
  }

  /// The brick, or `None` once the budget is exhausted and the brick is not
  /// resident (or can no longer be read).
  fn load(&self, address: BrickAddress) -> Result<Option<BrickRef<'a>>, OctreeError> {
    let octree: &'a VolumeOctree = self.octree;
    let pool = octree.pool();
    if self.clock.exhausted() && !pool.is_brick_in_ram(address) {
      return Ok(None);
    }
    match pool.get_brick(address) {
      Ok(brick) => Ok(Some(brick)),
      Err(_) if self.clock.exhausted() => Ok(None),
      Err(error) => Err(error.into()),
    }
  }

  fn fill(&mut self, lo: UVec3, hi: UVec3, id: NodeId) {
    let octree = self.octree;
    let node = &octree.arena()[id];
    let channels = self.out.num_channels;
    let dim = self.out.dimensions;
    for z in lo.z..hi.z {
      for y in lo.y..hi.y {
        let row = cubic_to_linear(UVec3::new(lo.x, y, z) - self.lo, dim) * channels;
        let len = (hi.x - lo.x) as usize * channels;
        for (i, sample) in self.out.data[row..row + len].iter_mut().enumerate() {
          *sample = node.avg(i % channels);
        }
      }
    }
  }

  /// Copy the part of `brick` covering `[lo, hi)`. A node wider than its
  /// brick (a leaf above the target level) is sampled nearest-neighbor.
  fn copy(&mut self, lo: UVec3, hi: UVec3, offset: UVec3, node_dim: u32, brick: &[u16]) {
    let channels = self.out.num_channels;
    let dim = self.out.dimensions;
    let brick_dim = self.octree.geometry.brick_dim;
    let brick_extent = UVec3::splat(brick_dim);
    for z in lo.z..hi.z {
      for y in lo.y..hi.y {
        for x in lo.x..hi.x {
          let position = UVec3::new(x, y, z);
          let brick_voxel = (position - offset) * brick_dim / node_dim;
          let source = cubic_to_linear(brick_voxel, brick_extent) * channels;
          let target = cubic_to_linear(position - self.lo, dim) * channels;
          self.out.data[target..target + channels].copy_from_slice(&brick[source..source + channels]);
        }
      }
    }
  }
}

#[cfg(test)]
#[path = "compose_test.rs"]
mod compose_test;
