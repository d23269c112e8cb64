//! Sparse multi-resolution brick octree.
//!
//! Every node of the tree stores a `brick_dim³` brick of normalized `u16`
//! samples, so a node at level `l` represents its `brick_dim · 2^l` voxel
//! region at `1 / 2^l` resolution. Regions whose values fall within the
//! homogeneity threshold carry no brick at all; their per-channel average
//! stands in for every voxel.
//!
//! # Level Convention
//!
//! Level 0 = full resolution (leaves), level `num_levels - 1` = root.
//!
//! ```text
//!              root            level 2   covers 4·b voxels
//!        ┌──────┴──────┐
//!      node    ...    node     level 1   covers 2·b voxels
//!    ┌──┴──┐
//!   leaf  leaf  ...            level 0   covers   b voxels
//! ```
//!
//! # Module Structure
//!
//! - [`config`]: `OctreeGeometry`, `BuildOptions`
//! - [`node`]: `OctreeNode`, `BrickState`, `NodeArena`
//! - [`budget`]: `ComposeBudget`, `ConstructionStats`
//! - `build`: iterative bottom-up construction
//! - [`query`]: point/level lookup and voxel reads
//! - [`compose`]: volume and slice reconstruction
//! - [`codec`]: binary node buffer
//! - `persist`: save/load of the octree directory

pub mod budget;
mod build;
pub mod codec;
pub mod compose;
pub mod config;
pub mod node;
mod persist;
pub mod query;

// Re-exports
pub use budget::{ComposeBudget, ConstructionStats};
pub use compose::{Reconstruction, SliceAlignment};
pub use config::{BuildOptions, OctreeGeometry};
pub use node::{BrickState, ChannelStats, NodeArena, NodeId, OctreeNode};
pub use persist::{OctreeMetadata, METADATA_FILE, NODE_BUFFER_FILE};
pub use query::NodeLookup;

use glam::UVec3;

use crate::constants::{format_memory_size, MAX_CHANNELS};
use crate::error::OctreeError;
use crate::histogram::Histogram;
use crate::pool::BrickPoolManager;
use crate::progress::ProgressSink;
use crate::source::ChannelSource;
use crate::types::VoxelFormat;

/// A built (or restored) octree together with the pool holding its bricks.
///
/// The tree is immutable; all queries take `&self` and may run from several
/// threads at once.
#[derive(Debug)]
pub struct VolumeOctree {
  geometry: OctreeGeometry,
  source_format: VoxelFormat,
  arena: NodeArena,
  root: NodeId,
  pool: Box<dyn BrickPoolManager>,
  histograms: Vec<Histogram>,
  stats: ConstructionStats,
}

impl VolumeOctree {
  /// Build an octree from 1 to 4 channel sources of equal dimensions and
  /// format.
  ///
  /// Arguments are validated before the pool is touched. Any later failure
  /// releases the pool and is reported as [`OctreeError::ConstructionFailed`].
  pub fn build(
    sources: &[&dyn ChannelSource],
    options: &BuildOptions,
    mut pool: Box<dyn BrickPoolManager>,
    progress: &mut dyn ProgressSink,
  ) -> Result<Self, OctreeError> {
    let (geometry, source_format) = validate_sources(sources, options)?;
    pool
      .initialize(geometry.brick_bytes())
      .map_err(OctreeError::construction)?;

    #[cfg(feature = "tracing")]
    tracing::debug!(
      volume_dim = %geometry.volume_dim,
      brick_dim = geometry.brick_dim,
      num_levels = geometry.num_levels,
      channels = geometry.num_channels,
      pool = %pool.description(),
      "building octree"
    );

    match build::build_tree(geometry, sources, options, pool.as_ref(), progress) {
      Ok(output) => Ok(Self {
        geometry,
        source_format,
        arena: output.arena,
        root: output.root,
        pool,
        histograms: output.histograms,
        stats: output.stats,
      }),
      Err(error) => {
        pool.deinitialize();
        Err(error.into_construction_failure())
      }
    }
  }

  pub(crate) fn from_parts(
    geometry: OctreeGeometry,
    source_format: VoxelFormat,
    arena: NodeArena,
    root: NodeId,
    pool: Box<dyn BrickPoolManager>,
    histograms: Vec<Histogram>,
    stats: ConstructionStats,
  ) -> Self {
    Self {
      geometry,
      source_format,
      arena,
      root,
      pool,
      histograms,
      stats,
    }
  }

  // ===========================================================================
  // Accessors
  // ===========================================================================

  #[inline]
  pub fn geometry(&self) -> &OctreeGeometry {
    &self.geometry
  }

  #[inline]
  pub fn volume_dim(&self) -> UVec3 {
    self.geometry.volume_dim
  }

  #[inline]
  pub fn num_levels(&self) -> u32 {
    self.geometry.num_levels
  }

  #[inline]
  pub fn num_channels(&self) -> usize {
    self.geometry.num_channels()
  }

  /// Format of the sources the octree was built from.
  pub fn source_format(&self) -> VoxelFormat {
    self.source_format
  }

  #[inline]
  pub fn root(&self) -> NodeId {
    self.root
  }

  pub fn root_node(&self) -> &OctreeNode {
    &self.arena[self.root]
  }

  pub fn node(&self, id: NodeId) -> Option<&OctreeNode> {
    self.arena.get(id)
  }

  pub(crate) fn arena(&self) -> &NodeArena {
    &self.arena
  }

  pub fn node_count(&self) -> usize {
    self.arena.len()
  }

  /// Bricks referenced by the tree.
  pub fn brick_count(&self) -> usize {
    self.arena.brick_count()
  }

  /// Levels actually present below the root (at most `num_levels`).
  pub fn actual_depth(&self) -> u32 {
    self.arena.depth(self.root)
  }

  /// Nodes of a complete octree with `depth` levels.
  pub fn complete_tree_node_count(depth: u32) -> u64 {
    OctreeGeometry::complete_tree_node_count(depth)
  }

  /// Bytes occupied by the bricks of the tree.
  pub fn brick_pool_memory_used(&self) -> u64 {
    self.brick_count() as u64 * self.geometry.brick_bytes() as u64
  }

  /// Bytes reserved by the brick pool, which may exceed the bytes used.
  pub fn brick_pool_memory_allocated(&self) -> u64 {
    self.pool.memory_allocated()
  }

  pub fn histogram(&self, channel: usize) -> Result<&Histogram, OctreeError> {
    self.histograms.get(channel).ok_or_else(|| {
      OctreeError::precondition(format!(
        "channel {channel} out of range (channels: {})",
        self.num_channels()
      ))
    })
  }

  pub fn histograms(&self) -> &[Histogram] {
    &self.histograms
  }

  pub fn construction_stats(&self) -> &ConstructionStats {
    &self.stats
  }

  pub fn pool(&self) -> &dyn BrickPoolManager {
    self.pool.as_ref()
  }

  /// Change the RAM limit of the brick pool.
  pub fn set_ram_limit(&mut self, bytes: u64) -> Result<(), OctreeError> {
    self.pool.set_ram_limit(bytes).map_err(OctreeError::from)
  }

  pub fn description(&self) -> String {
    let g = &self.geometry;
    let nodes = self.node_count();
    let complete = Self::complete_tree_node_count(g.num_levels);
    let mut lines = vec![
      format!("Volume dim: {}", g.volume_dim),
      format!("Source format: {}", self.source_format),
      format!("Num channels: {}", g.num_channels),
      format!("Octree dim: {}", g.octree_dim),
      format!("Brick dim: {}", g.brick_dim),
      format!("Brick memory size: {}", format_memory_size(g.brick_bytes() as u64)),
      format!("Num levels: {}", g.num_levels),
      format!("Actual tree depth: {}", self.actual_depth()),
      format!(
        "Num nodes: {nodes} (complete tree: {complete}, {:.2}%)",
        100.0 * nodes as f64 / complete.max(1) as f64
      ),
      format!(
        "Num bricks: {} (complete tree: {complete}, {:.2}%)",
        self.brick_count(),
        100.0 * self.brick_count() as f64 / complete.max(1) as f64
      ),
      format!(
        "Brick pool memory used: {}",
        format_memory_size(self.brick_pool_memory_used())
      ),
      format!(
        "Brick pool memory allocated: {}",
        format_memory_size(self.brick_pool_memory_allocated())
      ),
      format!("Brick pool: {}", self.pool.description()),
    ];
    if self.stats.merge_rounds > 0 || self.stats.leaf_nodes > 0 {
      lines.push(format!(
        "Construction time: {:.1} ms",
        self.stats.elapsed.as_secs_f64() * 1000.0
      ));
    }
    lines.join("\n")
  }
}

impl Drop for VolumeOctree {
  fn drop(&mut self) {
    self.pool.deinitialize();
  }
}

fn validate_sources(
  sources: &[&dyn ChannelSource],
  options: &BuildOptions,
) -> Result<(OctreeGeometry, VoxelFormat), OctreeError> {
  let Some(first) = sources.first() else {
    return Err(OctreeError::invalid_argument("no channel sources passed"));
  };
  if sources.len() > MAX_CHANNELS {
    return Err(OctreeError::invalid_argument(format!(
      "at most {MAX_CHANNELS} channels supported: {}",
      sources.len()
    )));
  }
  let dimensions = first.dimensions();
  let format = first.format();
  for (channel, source) in sources.iter().enumerate().skip(1) {
    if source.dimensions() != dimensions {
      return Err(OctreeError::invalid_argument(format!(
        "channel {channel} dimensions {} differ from {dimensions}",
        source.dimensions()
      )));
    }
    if source.format() != format {
      return Err(OctreeError::invalid_argument(format!(
        "channel {channel} format {} differs from {format}",
        source.format()
      )));
    }
  }
  let geometry = OctreeGeometry::new(dimensions, options.brick_dim, sources.len())?;
  Ok((geometry, format))
}
