//! Point/level lookup and single-voxel reads.
//!
//! Both descend from the root towards the voxel containing the query point,
//! taking one child per level:
//!
//! ```text
//! child = (voxel - node_llf) / (node_dim / 2)      component-wise, in {0, 1}
//! ```
//!
//! The descent stops at the requested level or at the first leaf above it, so
//! the returned level is never finer than what the tree stores.

use glam::{UVec3, Vec3};

use super::node::{NodeId, OctreeNode};
use super::VolumeOctree;
use crate::constants::{child_index, cubic_to_linear};
use crate::error::OctreeError;

/// Result of [`VolumeOctree::get_node`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NodeLookup<'a> {
  pub id: NodeId,
  pub node: &'a OctreeNode,
  /// Level of `node`; at least the requested level.
  pub level: u32,
  /// Lower-left-front voxel of the node region.
  pub voxel_llf: UVec3,
  /// Upper-right-back voxel of the node region (exclusive).
  pub voxel_urb: UVec3,
  /// `voxel_llf / volume_dim`.
  pub normalized_llf: Vec3,
  /// `voxel_urb / volume_dim`.
  pub normalized_urb: Vec3,
}

impl VolumeOctree {
  /// Node containing `point` (normalized to `[0, 1]³`) at `level`, or the
  /// leaf above it when the tree ends earlier.
  pub fn get_node(&self, point: Vec3, level: u32) -> Result<NodeLookup<'_>, OctreeError> {
    let in_unit_cube = point.cmpge(Vec3::ZERO).all() && point.cmple(Vec3::ONE).all();
    if !in_unit_cube {
      return Err(OctreeError::precondition(format!(
        "point outside the unit cube: {point}"
      )));
    }
    self.check_level(level)?;

    let volume_dim = self.volume_dim();
    let voxel = (point * volume_dim.as_vec3())
      .floor()
      .as_uvec3()
      .min(volume_dim - UVec3::ONE);
    let (id, node_level, voxel_llf) = self.descend(voxel, level);
    let voxel_urb = voxel_llf + UVec3::splat(self.geometry.node_dim_at_level(node_level));

    Ok(NodeLookup {
      id,
      node: &self.arena()[id],
      level: node_level,
      voxel_llf,
      voxel_urb,
      normalized_llf: voxel_llf.as_vec3() / volume_dim.as_vec3(),
      normalized_urb: voxel_urb.as_vec3() / volume_dim.as_vec3(),
    })
  }

  /// Normalized value of one voxel at full resolution.
  ///
  /// Voxels of brickless nodes read as the node's channel average.
  pub fn get_voxel(&self, position: UVec3, channel: usize) -> Result<u16, OctreeError> {
    if channel >= self.num_channels() {
      return Err(OctreeError::precondition(format!(
        "channel {channel} out of range (channels: {})",
        self.num_channels()
      )));
    }
    if position.cmpge(self.volume_dim()).any() {
      return Err(OctreeError::precondition(format!(
        "voxel {position} outside volume {}",
        self.volume_dim()
      )));
    }

    let (id, level, llf) = self.descend(position, 0);
    let node = &self.arena()[id];
    let Some(address) = node.brick_address() else {
      return Ok(node.avg(channel));
    };

    let brick_dim = self.geometry.brick_dim;
    let node_dim = self.geometry.node_dim_at_level(level);
    let brick_voxel = ((position - llf) * brick_dim / node_dim).min(UVec3::splat(brick_dim - 1));
    let brick = self.pool().get_brick(address)?;
    let index = cubic_to_linear(brick_voxel, UVec3::splat(brick_dim)) * self.num_channels() + channel;
    Ok(brick[index])
  }

  pub(crate) fn check_level(&self, level: u32) -> Result<(), OctreeError> {
    if level >= self.num_levels() {
      return Err(OctreeError::precondition(format!(
        "level {level} out of range (levels: {})",
        self.num_levels()
      )));
    }
    Ok(())
  }

  /// Walk from the root to the node containing `voxel` at `target_level` or
  /// the leaf above it. Returns the node, its level and its llf voxel.
  fn descend(&self, voxel: UVec3, target_level: u32) -> (NodeId, u32, UVec3) {
    let arena = self.arena();
    let mut id = self.root();
    let mut level = self.num_levels() - 1;
    let mut llf = UVec3::ZERO;
    loop {
      let node = &arena[id];
      let Some(children) = node.children() else {
        break;
      };
      if level <= target_level {
        break;
      }
      let half = self.geometry.node_dim_at_level(level) / 2;
      let octant = ((voxel - llf) / half).min(UVec3::ONE);
      id = children[child_index(octant)];
      llf += octant * half;
      level -= 1;
    }
    (id, level, llf)
  }
}

#[cfg(test)]
#[path = "query_test.rs"]
mod query_test;
