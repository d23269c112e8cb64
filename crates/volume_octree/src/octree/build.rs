//! Bottom-up streaming construction.
//!
//! ```text
//!  StreamingLeaves ──► MergingLevel(1) ──► ... ──► MergingLevel(n-1) ──► Root
//!   z-slab by z-slab     parent z-plane by parent z-plane
//! ```
//!
//! The input is read one z-slab (`brick_dim` slices) at a time, so only one
//! slab per channel is held in memory. Within a slab, and within a parent
//! z-plane while merging, workers build grid rows striped by `y`:
//!
//! ```text
//!  worker t handles rows  y = t, t + W, t + 2W, ...
//! ```
//!
//! Workers only read the arena and talk to the (internally synchronized)
//! brick pool. Their results are inserted into the arena sequentially, in
//! grid order, after each slab or plane.

use glam::UVec3;
use rayon::prelude::*;
use rayon::ThreadPool;
use smallvec::SmallVec;
use web_time::Instant;

use super::budget::ConstructionStats;
use super::config::{BuildOptions, OctreeGeometry};
use super::node::{BrickState, ChannelStats, NodeArena, NodeId, OctreeNode, StatsVec};
use crate::constants::{cubic_to_linear, voxel_count, CHILD_OFFSETS, MAX_CHANNELS};
use crate::error::OctreeError;
use crate::histogram::{Histogram, HistogramAccumulator};
use crate::pool::{BrickAddress, BrickPoolManager};
use crate::progress::{ProgressSink, SubRange};
use crate::source::{read_slab, ChannelSource};

/// Share of the progress range spent streaming leaves.
const LEAF_PROGRESS: f32 = 0.7;
/// Progress at the end of the last merge level.
const MERGE_PROGRESS: f32 = 0.95;

/// Progress range `[start, end)` of merge round `round` out of `rounds`.
///
/// The first round handles 8x more parents than the next one, so it gets
/// half of the merge range and every later round half of what remains.
fn merge_progress_range(round: u32, rounds: u32) -> (f32, f32) {
  let span = MERGE_PROGRESS - LEAF_PROGRESS;
  let done = |r: u32| {
    if r >= rounds {
      1.0
    } else {
      1.0 - 0.5f32.powi(r as i32)
    }
  };
  (
    LEAF_PROGRESS + span * done(round),
    LEAF_PROGRESS + span * done(round + 1),
  )
}

pub(crate) struct BuildOutput {
  pub arena: NodeArena,
  pub root: NodeId,
  pub histograms: Vec<Histogram>,
  pub stats: ConstructionStats,
}

/// Node ids of one level, laid out as a cubic grid (x fastest).
struct LevelGrid {
  dim: u32,
  nodes: Vec<NodeId>,
}

impl LevelGrid {
  fn new(dim: u32) -> Self {
    Self {
      dim,
      nodes: vec![NodeId(0); voxel_count(UVec3::splat(dim))],
    }
  }

  #[inline]
  fn index(&self, coord: UVec3) -> usize {
    cubic_to_linear(coord, UVec3::splat(self.dim))
  }

  #[inline]
  fn get(&self, coord: UVec3) -> NodeId {
    self.nodes[self.index(coord)]
  }
}

/// Normalized input slices `first..first + dim.z` of every channel.
struct Slab {
  first: u32,
  channels: Vec<Vec<u16>>,
}

/// A parent computed by a worker, not yet linked into the arena.
struct ParentPlan {
  node: OctreeNode,
  children: [NodeId; 8],
  /// The children are absorbed; `node` becomes a leaf.
  collapse: bool,
}

struct Builder<'a> {
  geometry: OctreeGeometry,
  pool: &'a dyn BrickPoolManager,
  threshold: u16,
  optimize: bool,
  workers: usize,
}

#[cfg_attr(feature = "tracing", tracing::instrument(skip_all, name = "octree::build"))]
pub(crate) fn build_tree(
  geometry: OctreeGeometry,
  sources: &[&dyn ChannelSource],
  options: &BuildOptions,
  pool: &dyn BrickPoolManager,
  progress: &mut dyn ProgressSink,
) -> Result<BuildOutput, OctreeError> {
  let started = Instant::now();
  let thread_pool = rayon::ThreadPoolBuilder::new()
    .num_threads(options.num_threads)
    .build()
    .map_err(OctreeError::construction)?;
  let builder = Builder {
    geometry,
    pool,
    threshold: options.threshold_u16(),
    optimize: options.optimization_enabled(),
    workers: thread_pool.current_num_threads().max(1),
  };

  let mut arena = NodeArena::default();
  let mut stats = ConstructionStats::default();
  let mut accumulators: Vec<HistogramAccumulator> = (0..builder.workers)
    .map(|_| HistogramAccumulator::new(geometry.num_channels()))
    .collect();

  let mut grid = builder.stream_leaves(
    sources,
    &thread_pool,
    &mut arena,
    &mut accumulators,
    &mut stats,
    progress,
  )?;
  let rounds = grid.dim.trailing_zeros();
  while grid.dim > 1 {
    let range = merge_progress_range(stats.merge_rounds, rounds);
    grid = builder.merge_level(&thread_pool, &mut arena, &grid, &mut stats, range, progress)?;
  }

  let (arena, root) = arena.compact(grid.get(UVec3::ZERO))?;

  {
    #[cfg(feature = "tracing")]
    let _span = tracing::info_span!("octree::flush").entered();
    let start = progress.progress();
    pool.flush_pool_to_disk(&mut SubRange::new(progress, start, 1.0))?;
  }

  let mut accumulators = accumulators.into_iter();
  let mut total = accumulators
    .next()
    .unwrap_or_else(|| HistogramAccumulator::new(geometry.num_channels()));
  for partial in accumulators {
    total.merge(&partial);
  }
  let mappings: Vec<_> = sources.iter().map(|s| s.real_world_mapping()).collect();
  let histograms = total.into_histograms(Histogram::bucket_count_for(sources[0].format()), &mappings);

  stats.elapsed = started.elapsed();
  progress.set_progress(1.0);
  #[cfg(feature = "tracing")]
  tracing::debug!(
    nodes = arena.len(),
    bricks = stats.bricks_retained(),
    elapsed_ms = stats.elapsed.as_millis() as u64,
    "octree built"
  );

  Ok(BuildOutput {
    arena,
    root,
    histograms,
    stats,
  })
}

impl Builder<'_> {
  // ===========================================================================
  // Leaves
  // ===========================================================================

  fn stream_leaves(
    &self,
    sources: &[&dyn ChannelSource],
    thread_pool: &ThreadPool,
    arena: &mut NodeArena,
    accumulators: &mut [HistogramAccumulator],
    stats: &mut ConstructionStats,
    progress: &mut dyn ProgressSink,
  ) -> Result<LevelGrid, OctreeError> {
    #[cfg(feature = "tracing")]
    let _span = tracing::info_span!("octree::leaves").entered();

    let grid_dim = self.geometry.leaf_grid_dim();
    let brick_dim = self.geometry.brick_dim;
    let volume_dim = self.geometry.volume_dim;
    let mut grid = LevelGrid::new(grid_dim);

    for gz in 0..grid_dim {
      let first = gz * brick_dim;
      let rows: Vec<Vec<(usize, OctreeNode)>> = if first >= volume_dim.z {
        // Slab entirely behind the volume.
        vec![(0..grid_dim * grid_dim)
          .map(|i| {
            let coord = UVec3::new(i % grid_dim, i / grid_dim, gz);
            (grid.index(coord), OctreeNode::empty(self.geometry.num_channels()))
          })
          .collect()]
      } else {
        let last = (first + brick_dim - 1).min(volume_dim.z - 1);
        let slab = load_slab(sources, first, last)?;
        thread_pool.install(|| {
          accumulators
            .par_iter_mut()
            .enumerate()
            .map(|(worker, histogram)| {
              let mut scratch = vec![0u16; self.geometry.brick_samples()];
              let mut out = Vec::new();
              for gy in (worker as u32..grid_dim).step_by(self.workers) {
                for gx in 0..grid_dim {
                  let coord = UVec3::new(gx, gy, gz);
                  let node = self.build_leaf(coord, &slab, &mut scratch, histogram)?;
                  out.push((grid.index(coord), node));
                }
              }
              Ok(out)
            })
            .collect::<Result<Vec<_>, OctreeError>>()
        })?
      };

      for (index, node) in rows.into_iter().flatten() {
        match node.brick() {
          BrickState::Brick(_) => {
            stats.leaf_nodes += 1;
            stats.bricks_written += 1;
          }
          BrickState::Homogeneous => {
            stats.leaf_nodes += 1;
            stats.homogeneous_leaves += 1;
          }
          BrickState::Empty => stats.empty_nodes += 1,
        }
        grid.nodes[index] = arena.insert(node);
      }

      let end = (first + brick_dim).min(volume_dim.z);
      progress.set_progress(LEAF_PROGRESS * (end - 1) as f32 / volume_dim.z as f32);
    }

    Ok(grid)
  }

  /// Gather one leaf brick from the slab; the brick is stored only if the
  /// region is not homogeneous (or pruning is disabled).
  fn build_leaf(
    &self,
    coord: UVec3,
    slab: &Slab,
    scratch: &mut [u16],
    histogram: &mut HistogramAccumulator,
  ) -> Result<OctreeNode, OctreeError> {
    let channels = self.geometry.num_channels();
    let brick_dim = self.geometry.brick_dim as usize;
    let volume_dim = self.geometry.volume_dim;
    let llf = coord * self.geometry.brick_dim;
    if llf.cmpge(volume_dim).any() {
      return Ok(OctreeNode::empty(channels));
    }
    let urb = (llf + UVec3::splat(self.geometry.brick_dim)).min(volume_dim);

    scratch.fill(0);
    let mut min = [u16::MAX; MAX_CHANNELS];
    let mut max = [0u16; MAX_CHANNELS];
    let mut sum = [0u64; MAX_CHANNELS];

    for z in llf.z..urb.z {
      for y in llf.y..urb.y {
        let slab_row = ((z - slab.first) as usize * volume_dim.y as usize + y as usize)
          * volume_dim.x as usize;
        let brick_row = ((z - llf.z) as usize * brick_dim + (y - llf.y) as usize) * brick_dim;
        for x in llf.x..urb.x {
          let source = slab_row + x as usize;
          let target = (brick_row + (x - llf.x) as usize) * channels;
          for (channel, values) in slab.channels.iter().enumerate() {
            let value = values[source];
            scratch[target + channel] = value;
            min[channel] = min[channel].min(value);
            max[channel] = max[channel].max(value);
            sum[channel] += value as u64;
            histogram.record(channel, value);
          }
        }
      }
    }

    let count = voxel_count(urb - llf) as u64;
    let stats: StatsVec = (0..channels)
      .map(|c| ChannelStats {
        avg: (sum[c] / count) as u16,
        min: min[c],
        max: max[c],
      })
      .collect();

    if self.optimize && stats.iter().all(|s| s.is_homogeneous(self.threshold)) {
      return Ok(OctreeNode::new(stats, BrickState::Homogeneous));
    }
    let address = self.write_brick(scratch)?;
    Ok(OctreeNode::new(stats, BrickState::Brick(address)))
  }

  fn write_brick(&self, data: &[u16]) -> Result<BrickAddress, OctreeError> {
    let address = self.pool.allocate_brick()?;
    self.pool.get_writable_brick(address)?.copy_from_slice(data);
    Ok(address)
  }

  // ===========================================================================
  // Merging
  // ===========================================================================

  fn merge_level(
    &self,
    thread_pool: &ThreadPool,
    arena: &mut NodeArena,
    grid: &LevelGrid,
    stats: &mut ConstructionStats,
    (start, end): (f32, f32),
    progress: &mut dyn ProgressSink,
  ) -> Result<LevelGrid, OctreeError> {
    #[cfg(feature = "tracing")]
    let _span = tracing::info_span!("octree::merge", round = stats.merge_rounds + 1).entered();

    let parent_dim = grid.dim / 2;
    let mut parents = LevelGrid::new(parent_dim);

    for pz in 0..parent_dim {
      let shared: &NodeArena = arena;
      let plans = thread_pool.install(|| {
        (0..self.workers)
          .into_par_iter()
          .map(|worker| {
            let mut scratch = vec![0u16; self.geometry.brick_samples()];
            let mut out = Vec::new();
            for py in (worker as u32..parent_dim).step_by(self.workers) {
              for px in 0..parent_dim {
                let coord = UVec3::new(px, py, pz);
                let children: [NodeId; 8] =
                  std::array::from_fn(|i| grid.get(coord * 2 + CHILD_OFFSETS[i]));
                let plan = self.build_parent(shared, children, &mut scratch)?;
                out.push((parents.index(coord), plan));
              }
            }
            Ok(out)
          })
          .collect::<Result<Vec<_>, OctreeError>>()
      })?;

      for (index, plan) in plans.into_iter().flatten() {
        parents.nodes[index] = self.place_parent(arena, plan, stats)?;
      }
      progress.set_progress(start + (end - start) * (pz + 1) as f32 / parent_dim as f32);
    }

    stats.merge_rounds += 1;
    Ok(parents)
  }

  /// Derive a parent from its eight children.
  ///
  /// Parent statistics cover the in-volume children only. A parent whose
  /// range is within the threshold absorbs its children; otherwise every
  /// child brick is box-filtered into its octant of a new parent brick and
  /// brickless children contribute their average.
  fn build_parent(
    &self,
    arena: &NodeArena,
    children: [NodeId; 8],
    scratch: &mut [u16],
  ) -> Result<ParentPlan, OctreeError> {
    let channels = self.geometry.num_channels();
    let nodes: [&OctreeNode; 8] = children.map(|id| &arena[id]);
    let inside: SmallVec<[&OctreeNode; 8]> = nodes.iter().copied().filter(|n| n.in_volume()).collect();

    if inside.is_empty() {
      return Ok(ParentPlan {
        node: OctreeNode::empty(channels),
        children,
        collapse: true,
      });
    }

    let stats: StatsVec = (0..channels)
      .map(|c| {
        let sum: u32 = inside.iter().map(|n| n.avg(c) as u32).sum();
        ChannelStats {
          avg: (sum / inside.len() as u32) as u16,
          min: inside.iter().map(|n| n.min(c)).min().unwrap_or(0),
          max: inside.iter().map(|n| n.max(c)).max().unwrap_or(0),
        }
      })
      .collect();

    if self.optimize && stats.iter().all(|s| s.is_homogeneous(self.threshold)) {
      return Ok(ParentPlan {
        node: OctreeNode::new(stats, BrickState::Homogeneous),
        children,
        collapse: true,
      });
    }

    let half = self.geometry.brick_dim / 2;
    for (node, offset) in nodes.iter().zip(CHILD_OFFSETS) {
      let octant = offset * half;
      match node.brick_address() {
        Some(address) => {
          let brick = self.pool.get_brick(address)?;
          half_sample_into(&brick, scratch, octant, self.geometry.brick_dim, channels);
        }
        None => fill_octant(scratch, octant, self.geometry.brick_dim, node.stats()),
      }
    }
    let address = self.write_brick(scratch)?;
    Ok(ParentPlan {
      node: OctreeNode::new(stats, BrickState::Brick(address)),
      children,
      collapse: false,
    })
  }

  fn place_parent(
    &self,
    arena: &mut NodeArena,
    plan: ParentPlan,
    stats: &mut ConstructionStats,
  ) -> Result<NodeId, OctreeError> {
    if !plan.collapse {
      stats.bricks_written += 1;
      return Ok(arena.insert(plan.node.with_children(plan.children)));
    }
    for child in plan.children {
      for address in arena.free_subtree(child) {
        self.pool.delete_brick(address)?;
        stats.bricks_freed += 1;
      }
    }
    if !plan.node.in_volume() {
      stats.empty_nodes += 1;
    }
    Ok(arena.insert(plan.node))
  }
}

fn load_slab(sources: &[&dyn ChannelSource], first: u32, last: u32) -> Result<Slab, OctreeError> {
  #[cfg(feature = "tracing")]
  tracing::debug!(first, last, "loading slab");
  let channels = sources
    .iter()
    .map(|source| Ok(source.format().normalize_slab(&read_slab(*source, first, last)?)))
    .collect::<Result<Vec<_>, OctreeError>>()?;
  Ok(Slab { first, channels })
}

/// 2x2x2 box filter of `child` (u64 sum, truncating) into the octant of
/// `parent` starting at `octant`.
fn half_sample_into(child: &[u16], parent: &mut [u16], octant: UVec3, brick_dim: u32, channels: usize) {
  let b = brick_dim as usize;
  let half = b / 2;
  let at = |x: usize, y: usize, z: usize| ((z * b + y) * b + x) * channels;
  for z in 0..half {
    for y in 0..half {
      for x in 0..half {
        let target = at(
          octant.x as usize + x,
          octant.y as usize + y,
          octant.z as usize + z,
        );
        for channel in 0..channels {
          let mut sum = 0u64;
          for offset in CHILD_OFFSETS {
            let source = at(
              2 * x + offset.x as usize,
              2 * y + offset.y as usize,
              2 * z + offset.z as usize,
            );
            sum += child[source + channel] as u64;
          }
          parent[target + channel] = (sum / 8) as u16;
        }
      }
    }
  }
}

/// Fill the octant of `parent` starting at `octant` with per-channel averages.
fn fill_octant(parent: &mut [u16], octant: UVec3, brick_dim: u32, stats: &[ChannelStats]) {
  let b = brick_dim as usize;
  let half = b / 2;
  let channels = stats.len();
  for z in 0..half {
    for y in 0..half {
      let row = ((octant.z as usize + z) * b + octant.y as usize + y) * b + octant.x as usize;
      for x in 0..half {
        let target = (row + x) * channels;
        for (channel, s) in stats.iter().enumerate() {
          parent[target + channel] = s.avg;
        }
      }
    }
  }
}

#[cfg(test)]
#[path = "build_test.rs"]
mod build_test;
