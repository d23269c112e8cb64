//! Layout constants shared by the octree, the brick pools and the node codec.
//!
//! # Brick Memory Layout
//!
//! ```text
//! Brick samples are channel-interleaved, X fastest:
//!
//! index = ((z * b + y) * b + x) * channels + channel
//!
//! Address:  0        1        ...  C-1      C        ...
//! Content: [0,0,0].0 [0,0,0].1 ... [0,0,0].C [1,0,0].0 ...
//!          └──── voxel (0,0,0) ────┘└──── voxel (1,0,0) ...
//! ```
//!
//! The same layout is used for reconstructed volumes and slices, with the
//! output dimensions in place of the brick dimension.
//!
//! # Child Order
//!
//! ```text
//! child = x | y << 1 | z << 2
//!
//!   0 = (0,0,0)    4 = (0,0,1)
//!   1 = (1,0,0)    5 = (1,0,1)
//!   2 = (0,1,0)    6 = (0,1,1)
//!   3 = (1,1,0)    7 = (1,1,1)
//! ```
//!
//! Iterating children by ascending index visits them in z, y, x order, which
//! is the traversal order of every reconstruction.

use glam::UVec3;

/// Maximum number of channels per octree.
pub const MAX_CHANNELS: usize = 4;

/// Bytes per stored sample (all channels are normalized to `u16`).
pub const BYTES_PER_VOXEL: usize = 2;

/// Number of distinct normalized sample values (2^16).
pub const NORMALIZED_RANGE: usize = 1 << 16;

/// Largest normalized sample value.
pub const NORMALIZED_MAX: u16 = u16::MAX;

/// Upper bound for histogram resolution (2^12 buckets).
pub const MAX_HISTOGRAM_BUCKET_BITS: usize = 12;

/// Brick field of a node without a brick that lies inside the volume.
pub const NO_BRICK: u64 = u64::MAX;

/// Brick field of a node that lies completely outside the volume.
pub const EMPTY_NODE: u64 = u64::MAX - 1;

/// Child-group offset of a serialized leaf.
pub const NO_CHILDREN: u64 = u64::MAX;

/// Grid offsets of the 8 children, indexed by child index.
pub const CHILD_OFFSETS: [UVec3; 8] = [
  UVec3::new(0, 0, 0),
  UVec3::new(1, 0, 0),
  UVec3::new(0, 1, 0),
  UVec3::new(1, 1, 0),
  UVec3::new(0, 0, 1),
  UVec3::new(1, 0, 1),
  UVec3::new(0, 1, 1),
  UVec3::new(1, 1, 1),
];

/// Convert 3D coordinates to a linear index (X fastest).
#[inline(always)]
pub fn cubic_to_linear(coord: UVec3, dim: UVec3) -> usize {
  (coord.z as usize * dim.y as usize + coord.y as usize) * dim.x as usize + coord.x as usize
}

/// Convert a linear index back to 3D coordinates.
#[inline(always)]
pub fn linear_to_cubic(index: usize, dim: UVec3) -> UVec3 {
  let x = index % dim.x as usize;
  let y = (index / dim.x as usize) % dim.y as usize;
  let z = index / (dim.x as usize * dim.y as usize);
  UVec3::new(x as u32, y as u32, z as u32)
}

/// Child index of the octant at `coord` (each component 0 or 1).
#[inline(always)]
pub const fn child_index(coord: UVec3) -> usize {
  (coord.x | (coord.y << 1) | (coord.z << 2)) as usize
}

/// Number of voxels in a region (product of the components).
#[inline(always)]
pub fn voxel_count(dim: UVec3) -> usize {
  dim.x as usize * dim.y as usize * dim.z as usize
}

/// Format a byte count for logs and descriptions (`"1.50 MB"`).
pub fn format_memory_size(bytes: u64) -> String {
  const UNITS: [&str; 5] = ["B", "kB", "MB", "GB", "TB"];
  let mut value = bytes as f64;
  let mut unit = 0;
  while value >= 1024.0 && unit < UNITS.len() - 1 {
    value /= 1024.0;
    unit += 1;
  }
  if unit == 0 {
    format!("{} {}", bytes, UNITS[0])
  } else {
    format!("{:.2} {}", value, UNITS[unit])
  }
}

#[cfg(test)]
#[path = "constants_test.rs"]
mod constants_test;
