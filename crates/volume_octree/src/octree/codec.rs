//! Binary node buffer.
//!
//! One fixed-size record per node, all integers little-endian:
//!
//! ```text
//! ┌──────────────────────────────────────────┬──────────┬─────────────────┐
//! │ avg min max (u16 each) × num_channels    │ brick    │ child group     │
//! │ 6 · num_channels bytes                   │ u64      │ u64             │
//! └──────────────────────────────────────────┴──────────┴─────────────────┘
//!  └──────────────── node content ─────────────────────┘
//! ```
//!
//! `brick` is a brick address, `u64::MAX` (homogeneous) or `u64::MAX - 1`
//! (outside the volume). `child group` is the record index of the first of
//! eight consecutive child records, or `u64::MAX` for a leaf. The root is
//! record 0.

use super::node::{BrickState, ChannelStats, NodeArena, NodeId, OctreeNode, StatsVec};
use crate::constants::{EMPTY_NODE, NO_BRICK, NO_CHILDREN};
use crate::error::OctreeError;
use crate::pool::BrickAddress;

/// Bytes of a node's content (statistics and brick field).
#[inline]
pub const fn node_content_size(num_channels: usize) -> usize {
  6 * num_channels + 8
}

/// Bytes of one serialized record (content and child group offset).
#[inline]
pub const fn node_record_size(num_channels: usize) -> usize {
  node_content_size(num_channels) + 8
}

/// Serialize the tree below `root`. Child groups are appended in the order
/// their parents are taken from a work stack.
pub fn encode_nodes(arena: &NodeArena, root: NodeId, num_channels: usize) -> Result<Vec<u8>, OctreeError> {
  let record_size = node_record_size(num_channels);
  let mut buffer = vec![0u8; arena.len() * record_size];
  let mut next_record = 1usize;
  let mut stack = vec![(root, 0usize)];

  write_record(&mut buffer, 0, record_size, lookup(arena, root)?, num_channels)?;
  while let Some((id, record)) = stack.pop() {
    let Some(children) = lookup(arena, id)?.children() else {
      continue;
    };
    if next_record + 8 > arena.len() {
      return Err(OctreeError::serialization(format!(
        "tree has more nodes than the arena holds ({})",
        arena.len()
      )));
    }
    let offset = record * record_size + node_content_size(num_channels);
    buffer[offset..offset + 8].copy_from_slice(&(next_record as u64).to_le_bytes());
    for (i, &child) in children.iter().enumerate() {
      write_record(&mut buffer, next_record + i, record_size, lookup(arena, child)?, num_channels)?;
      stack.push((child, next_record + i));
    }
    next_record += 8;
  }

  if next_record != arena.len() {
    return Err(OctreeError::serialization(format!(
      "arena holds {} nodes unreachable from the root",
      arena.len() - next_record
    )));
  }
  Ok(buffer)
}

/// Rebuild a tree from a node buffer holding `node_count` records.
///
/// The returned arena uses record indices as node ids; the root is id 0.
pub fn decode_nodes(
  buffer: &[u8],
  node_count: usize,
  num_channels: usize,
) -> Result<(NodeArena, NodeId), OctreeError> {
  let record_size = node_record_size(num_channels);
  if node_count == 0 {
    return Err(OctreeError::serialization("node buffer holds no nodes"));
  }
  if buffer.len() != node_count * record_size {
    return Err(OctreeError::serialization(format!(
      "node buffer byte size does not match node count * record size [{} != {node_count} * {record_size}]",
      buffer.len()
    )));
  }

  let mut nodes = Vec::with_capacity(node_count);
  let mut groups = Vec::with_capacity(node_count);
  for record in buffer.chunks_exact(record_size) {
    let (node, group) = read_record(record, num_channels)?;
    nodes.push(node);
    groups.push(group);
  }

  let mut visited = vec![false; node_count];
  visited[0] = true;
  let mut reached = 1usize;
  let mut stack = vec![0usize];
  while let Some(index) = stack.pop() {
    let group = groups[index];
    if group == NO_CHILDREN {
      continue;
    }
    let first = usize::try_from(group)
      .ok()
      .filter(|&first| first > index && first.saturating_add(8) <= node_count)
      .ok_or_else(|| OctreeError::serialization(format!("invalid child group offset: {group}")))?;
    if !nodes[index].has_brick() {
      return Err(OctreeError::serialization(format!(
        "inner node {index} has no brick"
      )));
    }
    for child in first..first + 8 {
      if std::mem::replace(&mut visited[child], true) {
        return Err(OctreeError::serialization(format!(
          "node record {child} referenced twice"
        )));
      }
      stack.push(child);
    }
    reached += 8;
    let children: [NodeId; 8] = std::array::from_fn(|i| NodeId((first + i) as u32));
    let node = std::mem::replace(&mut nodes[index], OctreeNode::empty(0));
    nodes[index] = node.with_children(children);
  }

  if reached != node_count {
    return Err(OctreeError::serialization(format!(
      "node count of deserialized octree does not match specified node count [{reached} != {node_count}]"
    )));
  }
  Ok((NodeArena::from_nodes(nodes), NodeId(0)))
}

fn lookup(arena: &NodeArena, id: NodeId) -> Result<&OctreeNode, OctreeError> {
  arena
    .get(id)
    .ok_or_else(|| OctreeError::serialization(format!("dangling node id {}", id.index())))
}

fn write_record(
  buffer: &mut [u8],
  index: usize,
  record_size: usize,
  node: &OctreeNode,
  num_channels: usize,
) -> Result<(), OctreeError> {
  if node.num_channels() != num_channels {
    return Err(OctreeError::serialization(format!(
      "node has {} channels, expected {num_channels}",
      node.num_channels()
    )));
  }
  let record = &mut buffer[index * record_size..(index + 1) * record_size];
  let mut cursor = 0;
  for stats in node.stats() {
    for value in [stats.avg, stats.min, stats.max] {
      record[cursor..cursor + 2].copy_from_slice(&value.to_le_bytes());
      cursor += 2;
    }
  }
  record[cursor..cursor + 8].copy_from_slice(&node.brick().to_raw().to_le_bytes());
  record[cursor + 8..cursor + 16].copy_from_slice(&NO_CHILDREN.to_le_bytes());
  Ok(())
}

fn read_record(record: &[u8], num_channels: usize) -> Result<(OctreeNode, u64), OctreeError> {
  let u16_at = |at: usize| u16::from_le_bytes([record[at], record[at + 1]]);
  let u64_at = |at: usize| {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&record[at..at + 8]);
    u64::from_le_bytes(bytes)
  };

  let stats: StatsVec = (0..num_channels)
    .map(|c| ChannelStats {
      avg: u16_at(6 * c),
      min: u16_at(6 * c + 2),
      max: u16_at(6 * c + 4),
    })
    .collect();
  if let Some(bad) = stats.iter().find(|s| s.min > s.max) {
    return Err(OctreeError::serialization(format!(
      "invalid node statistics: min {} > max {}",
      bad.min, bad.max
    )));
  }

  let content = node_content_size(num_channels);
  let brick = match u64_at(content - 8) {
    NO_BRICK => BrickState::Homogeneous,
    EMPTY_NODE => BrickState::Empty,
    raw if BrickAddress::from_raw(raw).generation() == u32::MAX => {
      return Err(OctreeError::serialization(format!("invalid brick field: {raw:#x}")));
    }
    raw => BrickState::Brick(BrickAddress::from_raw(raw)),
  };
  Ok((OctreeNode::new(stats, brick), u64_at(content)))
}

#[cfg(test)]
#[path = "codec_test.rs"]
mod codec_test;
