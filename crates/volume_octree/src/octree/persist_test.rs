use std::fs;

use glam::UVec3;

use super::*;
use crate::octree::{BuildOptions, ComposeBudget};
use crate::pool::{DiskBrickPool, DiskPoolConfig};
use crate::progress::NoProgress;
use crate::test_utils::*;

fn saved_octree(name: &str) -> (TestDir, VolumeOctree) {
  let dim = UVec3::new(48, 40, 24);
  let octree = build_single(dim, &bricked_volume(dim, UVec3::new(8, 8, 4)), &BuildOptions::LOSSLESS.with_brick_dim(8));
  let dir = test_dir(name);
  octree.save(&dir).unwrap();
  (dir, octree)
}

fn assert_same_octree(a: &VolumeOctree, b: &VolumeOctree) {
  assert_eq!(a.geometry(), b.geometry());
  assert_eq!(a.source_format(), b.source_format());
  assert_eq!(a.node_count(), b.node_count());
  assert_eq!(a.brick_count(), b.brick_count());
  assert_eq!(a.actual_depth(), b.actual_depth());
  assert_eq!(a.histograms(), b.histograms());
  assert_eq!(a.construction_stats(), b.construction_stats());
  for level in 0..a.num_levels() {
    assert_eq!(
      a.create_volume(level, ComposeBudget::UNLIMITED).unwrap(),
      b.create_volume(level, ComposeBudget::UNLIMITED).unwrap(),
      "level {level}"
    );
  }
}

#[test]
fn test_ram_octree_round_trip() {
  let (dir, octree) = saved_octree("persist-ram");
  assert!(dir.join(METADATA_FILE).is_file());
  assert!(dir.join(NODE_BUFFER_FILE).is_file());

  let loaded = VolumeOctree::load(&dir, &PoolRestore::default()).unwrap();
  assert_same_octree(&octree, &loaded);
  assert_eq!(octree.description(), loaded.description());

  // Save again from the restored tree.
  let again = test_dir("persist-ram-again");
  loaded.save(&again).unwrap();
  let reloaded = VolumeOctree::load(&again, &PoolRestore::default()).unwrap();
  assert_same_octree(&octree, &reloaded);
}

#[test]
fn test_metadata_is_readable_json() {
  let (dir, octree) = saved_octree("persist-metadata");
  let metadata = OctreeMetadata::read(&dir).unwrap();
  assert_eq!(metadata.node_count, octree.node_count() as u64);
  assert_eq!(metadata.geometry, *octree.geometry());
  assert_eq!(metadata.histograms.len(), 1);
  assert!(matches!(metadata.pool, crate::pool::PoolDescriptor::Ram(_)));
}

#[test]
fn test_disk_octree_round_trip() {
  let dim = UVec3::splat(64);
  let data = noise_volume(dim);
  let source = u16_source(dim, &data);
  let brick_bytes = 8 * 8 * 8 * 2;
  let pool_dir = test_dir("persist-disk-pool");
  let pool = DiskBrickPool::new(
    DiskPoolConfig::new(pool_dir.to_path_buf())
      .with_max_buffer_bytes(32 * brick_bytes)
      .with_ram_limit_bytes(4 * 32 * brick_bytes),
  );
  let octree = VolumeOctree::build(
    &[&source],
    &BuildOptions::COMPLETE_TREE.with_brick_dim(8),
    Box::new(pool),
    &mut NoProgress::default(),
  )
  .unwrap();
  let dir = test_dir("persist-disk");
  octree.save(&dir).unwrap();
  drop(octree);

  let restore = PoolRestore {
    ram_limit_bytes: Some(2 * 32 * brick_bytes),
  };
  let loaded = VolumeOctree::load(&dir, &restore).unwrap();
  assert_eq!(loaded.node_count(), 585);
  let volume = loaded.create_volume(0, ComposeBudget::UNLIMITED).unwrap();
  assert_eq!(volume.data, data);
  assert_eq!(loaded.get_voxel(UVec3::new(63, 1, 40), 0).unwrap(), data[crate::constants::cubic_to_linear(UVec3::new(63, 1, 40), dim)]);
}

#[test]
fn test_missing_node_buffer_fails() {
  let (dir, _) = saved_octree("persist-missing");
  fs::remove_file(dir.join(NODE_BUFFER_FILE)).unwrap();
  assert!(matches!(
    VolumeOctree::load(&dir, &PoolRestore::default()),
    Err(OctreeError::SerializationFailed(_))
  ));
}

#[test]
fn test_truncated_node_buffer_fails() {
  let (dir, _) = saved_octree("persist-truncated");
  let path = dir.join(NODE_BUFFER_FILE);
  let buffer = fs::read(&path).unwrap();
  fs::write(&path, &buffer[..buffer.len() - 3]).unwrap();
  match VolumeOctree::load(&dir, &PoolRestore::default()) {
    Err(OctreeError::SerializationFailed(message)) => {
      assert!(message.contains("size mismatch"), "{message}")
    }
    other => panic!("expected SerializationFailed, got {other:?}"),
  }
}

#[test]
fn test_foreign_metadata_is_rejected() {
  let (dir, _) = saved_octree("persist-foreign");
  let path = dir.join(METADATA_FILE);
  let text = fs::read_to_string(&path).unwrap();

  fs::write(&path, text.replace("\"volume-octree\"", "\"something-else\"")).unwrap();
  assert!(OctreeMetadata::read(&dir).is_err());

  fs::write(&path, text.replace("\"version\": 1", "\"version\": 7")).unwrap();
  assert!(VolumeOctree::load(&dir, &PoolRestore::default()).is_err());

  fs::write(&path, "{ not json").unwrap();
  assert!(matches!(
    VolumeOctree::load(&dir, &PoolRestore::default()),
    Err(OctreeError::SerializationFailed(_))
  ));
}

#[test]
fn test_missing_pool_file_fails() {
  let (dir, _) = saved_octree("persist-pool-file");
  let metadata = OctreeMetadata::read(&dir).unwrap();
  let crate::pool::PoolDescriptor::Ram(ram) = metadata.pool else {
    panic!("expected a RAM pool descriptor");
  };
  fs::remove_file(dir.join(&ram.files[0])).unwrap();
  assert!(VolumeOctree::load(&dir, &PoolRestore::default()).is_err());
}
