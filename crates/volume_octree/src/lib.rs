//! volume_octree - Out-of-core multi-resolution octree for volume data
//!
//! This crate stores large scalar volumes (up to four channels) as a sparse
//! octree of fixed-size bricks. Every node carries a half-resolution summary
//! of its children, so any level of detail can be read without touching the
//! full-resolution data. Bricks live in a pluggable pool that keeps them in
//! RAM or pages them to disk under a memory limit.
//!
//! # Features
//!
//! - **Streaming construction**: Slabs of z-slices are read once, leaf bricks
//!   are built in parallel and merged bottom-up
//! - **Homogeneity pruning**: Uniform regions collapse into brickless nodes
//! - **LOD queries**: Node lookup by normalized position and level
//! - **Reconstruction**: Whole volumes and axis-aligned slices at any level,
//!   optionally limited to RAM-resident bricks
//! - **Persistence**: Octree directories with JSON metadata and a binary node
//!   buffer
//!
//! # Example
//!
//! ```ignore
//! use volume_octree::{
//!   BuildOptions, ComposeBudget, NoProgress, RamBrickPool, VolumeBuffer, VolumeOctree,
//! };
//!
//! let source = VolumeBuffer::from_samples(dim, &samples)?;
//! let octree = VolumeOctree::build(
//!   &[&source],
//!   &BuildOptions::DEFAULT,
//!   Box::new(RamBrickPool::new(64 << 20)),
//!   &mut NoProgress::default(),
//! )?;
//!
//! let preview = octree.create_volume(2, ComposeBudget::UNLIMITED)?;
//! println!("{} nodes, preview {}", octree.node_count(), preview.dimensions);
//! ```

pub mod constants;
pub mod error;
pub mod histogram;
pub mod types;

// Re-export commonly used items
pub use constants::{cubic_to_linear, linear_to_cubic, voxel_count, CHILD_OFFSETS};
pub use error::{OctreeError, PoolError};
pub use histogram::Histogram;
pub use types::{RealWorldMapping, VoxelFormat, VoxelSample};

// Input volumes
pub mod source;
pub use source::{ChannelSource, RawVolumeFile, VolumeBuffer};

// Progress reporting for long-running operations
pub mod progress;
pub use progress::{ChannelProgress, FnProgress, NoProgress, ProgressSink, SubRange};

// Brick storage
pub mod pool;
pub use pool::{
  BrickAddress, BrickPoolManager, DiskBrickPool, DiskPoolConfig, PoolRestore, RamBrickPool,
};

// The octree itself
pub mod octree;
pub use octree::{
  BuildOptions, ComposeBudget, NodeLookup, OctreeNode, Reconstruction, SliceAlignment,
  VolumeOctree,
};

#[cfg(test)]
pub(crate) mod test_utils;
