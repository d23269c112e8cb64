use glam::UVec3;

use super::*;
use crate::octree::BuildOptions;
use crate::test_utils::*;

fn sample_tree() -> (Vec<u8>, usize) {
  let dim = UVec3::new(50, 33, 20);
  let octree = build_single(dim, &bricked_volume(UVec3::new(50, 33, 20), UVec3::new(5, 11, 4)), &BuildOptions::LOSSLESS.with_brick_dim(8));
  let buffer = encode_nodes(octree.arena(), octree.root(), 1).unwrap();
  (buffer, octree.node_count())
}

fn set_u64(buffer: &mut [u8], at: usize, value: u64) {
  buffer[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

#[test]
fn test_record_sizes() {
  assert_eq!(node_content_size(1), 14);
  assert_eq!(node_record_size(1), 22);
  assert_eq!(node_record_size(4), 40);
}

#[test]
fn test_decode_restores_encoded_tree() {
  let dim = UVec3::splat(64);
  let octree = build_single(dim, &bricked_volume(dim, UVec3::splat(16)), &BuildOptions::LOSSLESS.with_brick_dim(8));
  let buffer = encode_nodes(octree.arena(), octree.root(), 1).unwrap();
  assert_eq!(buffer.len(), octree.node_count() * node_record_size(1));

  let (arena, root) = decode_nodes(&buffer, octree.node_count(), 1).unwrap();
  assert_eq!(root.index(), 0);
  assert_eq!(arena.len(), octree.node_count());
  assert_eq!(arena.depth(root), octree.actual_depth());
  assert_eq!(arena.brick_count(), octree.brick_count());

  // Same nodes along the same paths.
  let mut stack = vec![(octree.root(), root)];
  while let Some((original, decoded)) = stack.pop() {
    let (a, b) = (&octree.arena()[original], &arena[decoded]);
    assert_eq!(a.stats(), b.stats());
    assert_eq!(a.brick(), b.brick());
    match (a.children(), b.children()) {
      (Some(x), Some(y)) => stack.extend(x.iter().copied().zip(y.iter().copied())),
      (None, None) => {}
      _ => panic!("child structure differs"),
    }
  }
}

#[test]
fn test_root_record_layout() {
  let (buffer, _) = sample_tree();
  let content = node_content_size(1);
  let group = u64::from_le_bytes(buffer[content..content + 8].try_into().unwrap());
  assert_eq!(group, 1, "Root children follow the root record");
}

#[test]
fn test_size_mismatch_is_rejected() {
  let (buffer, count) = sample_tree();
  for (bytes, nodes) in [(&buffer[..buffer.len() - 1], count), (&buffer[..], count + 1), (&buffer[..0], 0)] {
    assert!(matches!(
      decode_nodes(bytes, nodes, 1),
      Err(OctreeError::SerializationFailed(_))
    ));
  }
}

#[test]
fn test_invalid_child_offsets_are_rejected() {
  let (buffer, count) = sample_tree();
  let record = node_record_size(1);
  let content = node_content_size(1);

  // Out of bounds.
  let mut corrupt = buffer.clone();
  set_u64(&mut corrupt, content, count as u64 - 4);
  assert!(decode_nodes(&corrupt, count, 1).is_err());

  // Pointing back at the root.
  let mut corrupt = buffer.clone();
  set_u64(&mut corrupt, content, 0);
  assert!(decode_nodes(&corrupt, count, 1).is_err());

  // A leaf claiming the child group of an inner node.
  let group_at = |i: usize| {
    let at = i * record + content;
    u64::from_le_bytes(buffer[at..at + 8].try_into().unwrap())
  };
  let inner = (1..count)
    .find(|&i| group_at(i) != u64::MAX)
    .expect("sample tree has an inner node below the root");
  let leaf = (1..count).find(|&i| group_at(i) == u64::MAX).unwrap();
  let mut corrupt = buffer.clone();
  set_u64(&mut corrupt, leaf * record + content, group_at(inner));
  assert!(decode_nodes(&corrupt, count, 1).is_err());
}

#[test]
fn test_invalid_brick_field_is_rejected() {
  let (buffer, count) = sample_tree();
  let mut corrupt = buffer.clone();
  let brick_at = node_content_size(1) - 8;
  set_u64(&mut corrupt, brick_at, 0xFFFF_FFFF_0000_0003);
  assert!(matches!(
    decode_nodes(&corrupt, count, 1),
    Err(OctreeError::SerializationFailed(_))
  ));

  // Inner node without a brick.
  let mut corrupt = buffer;
  set_u64(&mut corrupt, brick_at, crate::constants::NO_BRICK);
  assert!(decode_nodes(&corrupt, count, 1).is_err());
}

#[test]
fn test_inconsistent_statistics_are_rejected() {
  let (mut buffer, count) = sample_tree();
  // min = 10, max = 5
  buffer[2..4].copy_from_slice(&10u16.to_le_bytes());
  buffer[4..6].copy_from_slice(&5u16.to_le_bytes());
  assert!(decode_nodes(&buffer, count, 1).is_err());
}
