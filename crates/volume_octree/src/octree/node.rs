//! Octree nodes and the arena that owns them.
//!
//! A node carries per-channel statistics, one of three brick states and
//! either no children or exactly eight. Nodes are addressed by [`NodeId`]
//! into a [`NodeArena`]; an inner node exclusively owns its eight children.

use std::ops::Index;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::constants::{EMPTY_NODE, NO_BRICK};
use crate::error::OctreeError;
use crate::pool::BrickAddress;

/// Average, minimum and maximum of one channel over a node's region.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStats {
  pub avg: u16,
  pub min: u16,
  pub max: u16,
}

impl ChannelStats {
  pub const ZERO: Self = Self {
    avg: 0,
    min: 0,
    max: 0,
  };

  pub const fn uniform(value: u16) -> Self {
    Self {
      avg: value,
      min: value,
      max: value,
    }
  }

  #[inline]
  pub fn range(&self) -> u16 {
    self.max.saturating_sub(self.min)
  }

  #[inline]
  pub fn is_homogeneous(&self, threshold: u16) -> bool {
    self.range() <= threshold
  }
}

pub type StatsVec = SmallVec<[ChannelStats; 4]>;

/// Where a node's voxels come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BrickState {
  /// Voxels are stored in a brick.
  Brick(BrickAddress),
  /// Inside the volume, every voxel is represented by the channel average.
  Homogeneous,
  /// Entirely outside the volume.
  Empty,
}

impl BrickState {
  /// 64-bit brick field of the node encoding.
  #[inline]
  pub fn to_raw(self) -> u64 {
    match self {
      Self::Brick(address) => address.raw(),
      Self::Homogeneous => NO_BRICK,
      Self::Empty => EMPTY_NODE,
    }
  }

  #[inline]
  pub fn from_raw(raw: u64) -> Self {
    match raw {
      NO_BRICK => Self::Homogeneous,
      EMPTY_NODE => Self::Empty,
      address => Self::Brick(BrickAddress::from_raw(address)),
    }
  }
}

/// Index of a node in its arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
  #[inline]
  pub fn index(self) -> usize {
    self.0 as usize
  }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OctreeNode {
  stats: StatsVec,
  brick: BrickState,
  children: Option<[NodeId; 8]>,
}

impl OctreeNode {
  pub fn new(stats: StatsVec, brick: BrickState) -> Self {
    Self {
      stats,
      brick,
      children: None,
    }
  }

  /// Node outside the volume: zero statistics, no brick.
  pub fn empty(num_channels: usize) -> Self {
    Self::new(SmallVec::from_elem(ChannelStats::ZERO, num_channels), BrickState::Empty)
  }

  pub fn with_children(mut self, children: [NodeId; 8]) -> Self {
    self.children = Some(children);
    self
  }

  #[inline]
  pub fn stats(&self) -> &[ChannelStats] {
    &self.stats
  }

  #[inline]
  pub fn num_channels(&self) -> usize {
    self.stats.len()
  }

  #[inline]
  pub fn avg(&self, channel: usize) -> u16 {
    self.stats[channel].avg
  }

  #[inline]
  pub fn min(&self, channel: usize) -> u16 {
    self.stats[channel].min
  }

  #[inline]
  pub fn max(&self, channel: usize) -> u16 {
    self.stats[channel].max
  }

  #[inline]
  pub fn brick(&self) -> BrickState {
    self.brick
  }

  #[inline]
  pub fn brick_address(&self) -> Option<BrickAddress> {
    match self.brick {
      BrickState::Brick(address) => Some(address),
      _ => None,
    }
  }

  #[inline]
  pub fn has_brick(&self) -> bool {
    matches!(self.brick, BrickState::Brick(_))
  }

  #[inline]
  pub fn in_volume(&self) -> bool {
    self.brick != BrickState::Empty
  }

  #[inline]
  pub fn is_leaf(&self) -> bool {
    self.children.is_none()
  }

  /// Leaf without a brick inside the volume.
  #[inline]
  pub fn is_homogeneous(&self) -> bool {
    self.is_leaf() && self.brick == BrickState::Homogeneous
  }

  #[inline]
  pub fn children(&self) -> Option<&[NodeId; 8]> {
    self.children.as_ref()
  }
}

// =============================================================================
// Arena
// =============================================================================

/// Slab storage for nodes with recycled ids.
#[derive(Clone, Debug, Default)]
pub struct NodeArena {
  slots: Vec<Option<OctreeNode>>,
  free: Vec<u32>,
  live: usize,
}

impl NodeArena {
  pub fn insert(&mut self, node: OctreeNode) -> NodeId {
    self.live += 1;
    match self.free.pop() {
      Some(id) => {
        self.slots[id as usize] = Some(node);
        NodeId(id)
      }
      None => {
        self.slots.push(Some(node));
        NodeId(self.slots.len() as u32 - 1)
      }
    }
  }

  /// Arena whose ids are the positions in `nodes`.
  pub(crate) fn from_nodes(nodes: Vec<OctreeNode>) -> Self {
    let live = nodes.len();
    Self {
      slots: nodes.into_iter().map(Some).collect(),
      free: Vec::new(),
      live,
    }
  }

  #[inline]
  pub fn get(&self, id: NodeId) -> Option<&OctreeNode> {
    self.slots.get(id.index()).and_then(Option::as_ref)
  }

  /// Live nodes.
  #[inline]
  pub fn len(&self) -> usize {
    self.live
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.live == 0
  }

  pub fn iter(&self) -> impl Iterator<Item = (NodeId, &OctreeNode)> {
    self
      .slots
      .iter()
      .enumerate()
      .filter_map(|(i, slot)| slot.as_ref().map(|node| (NodeId(i as u32), node)))
  }

  /// Remove `id` and all its descendants; returns their brick addresses.
  pub fn free_subtree(&mut self, id: NodeId) -> Vec<BrickAddress> {
    let mut bricks = Vec::new();
    let mut stack = vec![id];
    while let Some(id) = stack.pop() {
      let Some(node) = self.slots.get_mut(id.index()).and_then(Option::take) else {
        continue;
      };
      self.live -= 1;
      self.free.push(id.0);
      bricks.extend(node.brick_address());
      if let Some(children) = node.children {
        stack.extend_from_slice(&children);
      }
    }
    bricks
  }

  /// Renumber the nodes reachable from `root` depth-first: the root becomes
  /// id 0 and every child group occupies eight consecutive ids.
  pub fn compact(mut self, root: NodeId) -> Result<(Self, NodeId), OctreeError> {
    let mut slots: Vec<Option<OctreeNode>> = Vec::with_capacity(self.live);
    slots.push(None);
    let mut stack = vec![(root, 0usize)];
    while let Some((old, new)) = stack.pop() {
      let mut node = self
        .slots
        .get_mut(old.index())
        .and_then(Option::take)
        .ok_or_else(|| OctreeError::construction(format!("dangling node id {}", old.0)))?;
      if let Some(children) = node.children {
        let base = slots.len();
        slots.resize(base + 8, None);
        let mut renamed = [NodeId(0); 8];
        for (i, child) in children.iter().enumerate().rev() {
          renamed[i] = NodeId((base + i) as u32);
          stack.push((*child, base + i));
        }
        node.children = Some(renamed);
      }
      slots[new] = Some(node);
    }
    let live = slots.len();
    Ok((
      Self {
        slots,
        free: Vec::new(),
        live,
      },
      NodeId(0),
    ))
  }

  /// Levels below and including `root` (a lone root has depth 1).
  pub fn depth(&self, root: NodeId) -> u32 {
    let mut depth = 0;
    let mut stack = vec![(root, 1u32)];
    while let Some((id, level)) = stack.pop() {
      let Some(node) = self.get(id) else {
        continue;
      };
      depth = depth.max(level);
      if let Some(children) = node.children() {
        stack.extend(children.iter().map(|&child| (child, level + 1)));
      }
    }
    depth
  }

  /// Nodes that own a brick.
  pub fn brick_count(&self) -> usize {
    self.iter().filter(|(_, node)| node.has_brick()).count()
  }
}

impl Index<NodeId> for NodeArena {
  type Output = OctreeNode;

  fn index(&self, id: NodeId) -> &OctreeNode {
    match self.get(id) {
      Some(node) => node,
      None => panic!("node {} is not in the arena", id.0),
    }
  }
}

#[cfg(test)]
#[path = "node_test.rs"]
mod node_test;
