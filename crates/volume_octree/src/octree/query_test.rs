use glam::{UVec3, Vec3};

use crate::constants::cubic_to_linear;
use crate::error::OctreeError;
use crate::octree::BuildOptions;
use crate::test_utils::*;

#[test]
fn test_get_node_descends_to_requested_level() {
  let dim = UVec3::splat(64);
  let octree = build_single(dim, &noise_volume(dim), &BuildOptions::COMPLETE_TREE.with_brick_dim(8));
  assert_eq!(octree.num_levels(), 4);

  let point = Vec3::new(0.3, 0.6, 0.9);
  for level in 0..4 {
    let lookup = octree.get_node(point, level).unwrap();
    assert_eq!(lookup.level, level);
    let node_dim = 8 << level;
    assert_eq!(lookup.voxel_urb - lookup.voxel_llf, UVec3::splat(node_dim));
    assert_eq!(lookup.voxel_llf % node_dim, UVec3::ZERO, "Node llf must be aligned");

    let voxel = (point * 64.0).floor().as_uvec3();
    assert!(
      voxel.cmpge(lookup.voxel_llf).all() && voxel.cmplt(lookup.voxel_urb).all(),
      "level {level}: voxel {voxel} outside [{}, {})",
      lookup.voxel_llf,
      lookup.voxel_urb
    );
    assert_eq!(lookup.normalized_llf, lookup.voxel_llf.as_vec3() / 64.0);
  }

  let root = octree.get_node(Vec3::ONE, 3).unwrap();
  assert_eq!(root.id, octree.root());
  assert_eq!(root.normalized_llf, Vec3::ZERO);
  assert_eq!(root.normalized_urb, Vec3::ONE);
}

#[test]
fn test_get_node_stops_at_homogeneous_leaf() {
  let dim = UVec3::splat(64);
  let data = bricked_volume(dim, UVec3::splat(32));
  let octree = build_single(dim, &data, &BuildOptions::LOSSLESS.with_brick_dim(8));

  // Every 32³ block is a level-2 leaf.
  for point in [Vec3::splat(0.1), Vec3::new(0.7, 0.2, 0.55), Vec3::new(0.99, 0.99, 0.0)] {
    let coarse = octree.get_node(point, 2).unwrap();
    let fine = octree.get_node(point, 0).unwrap();
    assert_eq!(fine.level, 2, "Descent must stop at the homogeneous leaf");
    assert_eq!(fine.id, coarse.id);
    assert!(!fine.node.has_brick());
    assert_eq!(fine.node.min(0), fine.node.max(0));

    let voxel = (point * 64.0).floor().as_uvec3();
    assert_eq!(fine.node.avg(0), data[cubic_to_linear(voxel, dim)]);
  }
}

#[test]
fn test_get_node_rejects_invalid_arguments() {
  let dim = UVec3::splat(32);
  let octree = build_single(dim, &noise_volume(dim), &BuildOptions::DEFAULT.with_brick_dim(8));
  for point in [Vec3::new(-0.1, 0.5, 0.5), Vec3::new(0.5, 1.01, 0.5), Vec3::splat(f32::NAN)] {
    assert!(matches!(
      octree.get_node(point, 0),
      Err(OctreeError::PreconditionViolation(_))
    ));
  }
  assert!(matches!(
    octree.get_node(Vec3::splat(0.5), octree.num_levels()),
    Err(OctreeError::PreconditionViolation(_))
  ));
}

#[test]
fn test_get_voxel_reads_full_resolution() {
  let dim = UVec3::new(45, 30, 17);
  let data = noise_volume(dim);
  let octree = build_single(dim, &data, &BuildOptions::LOSSLESS.with_brick_dim(8));
  for position in [
    UVec3::ZERO,
    UVec3::new(44, 29, 16),
    UVec3::new(8, 7, 9),
    UVec3::new(33, 0, 15),
  ] {
    assert_eq!(
      octree.get_voxel(position, 0).unwrap(),
      data[cubic_to_linear(position, dim)],
      "voxel {position}"
    );
  }
}

#[test]
fn test_get_voxel_in_homogeneous_region_reads_average() {
  let dim = UVec3::splat(32);
  let data = bricked_volume(dim, UVec3::splat(16));
  let octree = build_single(dim, &data, &BuildOptions::LOSSLESS.with_brick_dim(8));
  for position in [UVec3::new(3, 20, 31), UVec3::new(17, 17, 0)] {
    assert_eq!(octree.get_voxel(position, 0).unwrap(), data[cubic_to_linear(position, dim)]);
  }
}

#[test]
fn test_get_voxel_rejects_invalid_arguments() {
  let dim = UVec3::splat(16);
  let octree = build_single(dim, &noise_volume(dim), &BuildOptions::DEFAULT.with_brick_dim(8));
  assert!(matches!(
    octree.get_voxel(UVec3::new(16, 0, 0), 0),
    Err(OctreeError::PreconditionViolation(_))
  ));
  assert!(matches!(
    octree.get_voxel(UVec3::ZERO, 1),
    Err(OctreeError::PreconditionViolation(_))
  ));
}
