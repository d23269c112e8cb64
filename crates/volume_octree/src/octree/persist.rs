//! Saving and loading an octree directory.
//!
//! ```text
//! <dir>/
//!   octree.json         metadata: geometry, histograms, stats, pool record
//!   nodebuffer.raw      node buffer (see `codec`)
//!   ...                 brick pool files (RAM pool buffers, or the disk
//!                       pool's own files when they live here)
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::budget::ConstructionStats;
use super::codec::{decode_nodes, encode_nodes};
use super::config::OctreeGeometry;
use super::VolumeOctree;
use crate::error::OctreeError;
use crate::histogram::Histogram;
use crate::pool::{restore_pool, BrickAddress, BrickPoolManager, PoolDescriptor, PoolRestore};
use crate::types::VoxelFormat;

pub const METADATA_FILE: &str = "octree.json";
pub const NODE_BUFFER_FILE: &str = "nodebuffer.raw";

const FORMAT_TAG: &str = "volume-octree";
const FORMAT_VERSION: u32 = 1;

/// Contents of `octree.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OctreeMetadata {
  pub format: String,
  pub version: u32,
  pub node_count: u64,
  pub node_buffer_bytes: u64,
  pub geometry: OctreeGeometry,
  pub source_format: VoxelFormat,
  pub histograms: Vec<Histogram>,
  pub construction_stats: ConstructionStats,
  pub pool: PoolDescriptor,
}

impl OctreeMetadata {
  /// Read and sanity-check `octree.json` of an octree directory.
  pub fn read(dir: &Path) -> Result<Self, OctreeError> {
    let path = dir.join(METADATA_FILE);
    let text = fs::read_to_string(&path)
      .map_err(|e| OctreeError::serialization(format!("{}: {e}", path.display())))?;
    let metadata: Self = serde_json::from_str(&text)
      .map_err(|e| OctreeError::serialization(format!("{}: {e}", path.display())))?;

    if metadata.format != FORMAT_TAG {
      return Err(OctreeError::serialization(format!(
        "unknown format tag '{}'",
        metadata.format
      )));
    }
    if metadata.version != FORMAT_VERSION {
      return Err(OctreeError::serialization(format!(
        "unsupported format version {} (expected {FORMAT_VERSION})",
        metadata.version
      )));
    }
    metadata
      .geometry
      .validate()
      .map_err(OctreeError::serialization)?;
    if metadata.histograms.len() != metadata.geometry.num_channels() {
      return Err(OctreeError::serialization(format!(
        "{} histograms for {} channels",
        metadata.histograms.len(),
        metadata.geometry.num_channels
      )));
    }
    Ok(metadata)
  }
}

impl VolumeOctree {
  /// Write the octree into `dir` (created if missing) and make the brick
  /// pool durable.
  #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, name = "octree::save"))]
  pub fn save(&self, dir: &Path) -> Result<(), OctreeError> {
    fs::create_dir_all(dir)
      .map_err(|e| OctreeError::serialization(format!("{}: {e}", dir.display())))?;

    let buffer = encode_nodes(self.arena(), self.root(), self.num_channels())?;
    let pool = self.pool().persist(dir).map_err(OctreeError::serialization)?;
    let metadata = OctreeMetadata {
      format: FORMAT_TAG.to_string(),
      version: FORMAT_VERSION,
      node_count: self.node_count() as u64,
      node_buffer_bytes: buffer.len() as u64,
      geometry: *self.geometry(),
      source_format: self.source_format(),
      histograms: self.histograms().to_vec(),
      construction_stats: *self.construction_stats(),
      pool,
    };

    let path = dir.join(NODE_BUFFER_FILE);
    fs::write(&path, &buffer)
      .map_err(|e| OctreeError::serialization(format!("{}: {e}", path.display())))?;
    let json = serde_json::to_string_pretty(&metadata).map_err(OctreeError::serialization)?;
    let path = dir.join(METADATA_FILE);
    fs::write(&path, json)
      .map_err(|e| OctreeError::serialization(format!("{}: {e}", path.display())))?;

    #[cfg(feature = "tracing")]
    tracing::debug!(dir = %dir.display(), nodes = metadata.node_count, "octree saved");
    Ok(())
  }

  /// Restore an octree saved with [`save`](Self::save). Either the node
  /// buffer and the brick pool are both restored or the load fails.
  #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, name = "octree::load"))]
  pub fn load(dir: &Path, options: &PoolRestore) -> Result<Self, OctreeError> {
    let metadata = OctreeMetadata::read(dir)?;
    let geometry = metadata.geometry;

    let path = dir.join(NODE_BUFFER_FILE);
    let buffer =
      fs::read(&path).map_err(|e| OctreeError::serialization(format!("{}: {e}", path.display())))?;
    if buffer.len() as u64 != metadata.node_buffer_bytes {
      return Err(OctreeError::serialization(format!(
        "node buffer size mismatch [{} != {}]",
        buffer.len(),
        metadata.node_buffer_bytes
      )));
    }
    let node_count = usize::try_from(metadata.node_count).map_err(OctreeError::serialization)?;
    let (arena, root) = decode_nodes(&buffer, node_count, geometry.num_channels())?;

    let mut pool = restore_pool(&metadata.pool, dir, options).map_err(OctreeError::serialization)?;
    if let Err(error) = check_pool(pool.as_ref(), &geometry, arena.iter().filter_map(|(_, n)| n.brick_address())) {
      pool.deinitialize();
      return Err(error);
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(dir = %dir.display(), nodes = node_count, "octree loaded");

    Ok(Self::from_parts(
      geometry,
      metadata.source_format,
      arena,
      root,
      pool,
      metadata.histograms,
      metadata.construction_stats,
    ))
  }
}

fn check_pool(
  pool: &dyn BrickPoolManager,
  geometry: &OctreeGeometry,
  mut addresses: impl Iterator<Item = BrickAddress>,
) -> Result<(), OctreeError> {
  if pool.brick_bytes() != geometry.brick_bytes() {
    return Err(OctreeError::serialization(format!(
      "brick pool brick size {} does not match octree brick size {}",
      pool.brick_bytes(),
      geometry.brick_bytes()
    )));
  }
  match addresses.find(|address| !pool.contains_brick(*address)) {
    Some(address) => Err(OctreeError::serialization(format!(
      "node references brick {address} missing from the pool"
    ))),
    None => Ok(()),
  }
}

#[cfg(test)]
#[path = "persist_test.rs"]
mod persist_test;
