//! Channel sources feeding the octree construction.
//!
//! A source provides one channel of a regular grid. Construction streams the
//! volume in z-slabs; for each slab it takes a sub-view of the resident
//! buffer when one exists and falls back to [`ChannelSource::load_slices`]
//! otherwise.

use std::borrow::Cow;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use glam::UVec3;

use crate::constants::voxel_count;
use crate::error::OctreeError;
use crate::types::{RealWorldMapping, VoxelFormat, VoxelSample};

/// One channel of the input volume.
pub trait ChannelSource: Send + Sync {
  fn dimensions(&self) -> UVec3;

  fn format(&self) -> VoxelFormat;

  fn real_world_mapping(&self) -> RealWorldMapping {
    RealWorldMapping::IDENTITY
  }

  /// Little-endian bytes of the complete volume, if it is held in memory.
  fn resident(&self) -> Option<&[u8]> {
    None
  }

  /// Little-endian bytes of z-slices `first..=last`.
  fn load_slices(&self, first: u32, last: u32) -> Result<Vec<u8>, OctreeError> {
    Err(OctreeError::construction(format!(
      "source provides neither resident data nor slices {first}..={last}"
    )))
  }
}

/// Bytes of one z-slice of a source.
#[inline]
pub(crate) fn slice_bytes(source: &dyn ChannelSource) -> usize {
  let dim = source.dimensions();
  dim.x as usize * dim.y as usize * source.format().bytes_per_voxel()
}

/// Read slices `first..=last` from a source, borrowing from its resident
/// buffer when it has one.
pub(crate) fn read_slab(
  source: &dyn ChannelSource,
  first: u32,
  last: u32,
) -> Result<Cow<'_, [u8]>, OctreeError> {
  if let Some(bytes) = source.resident() {
    let stride = slice_bytes(source);
    let start = first as usize * stride;
    let end = (last as usize + 1) * stride;
    return bytes.get(start..end).map(Cow::Borrowed).ok_or_else(|| {
      OctreeError::construction(format!(
        "resident buffer too short for slices {first}..={last}"
      ))
    });
  }
  let bytes = source.load_slices(first, last)?;
  let expected = (last - first + 1) as usize * slice_bytes(source);
  if bytes.len() < expected {
    return Err(OctreeError::construction(format!(
      "slice loader returned {} bytes for slices {first}..={last}, expected {expected}",
      bytes.len()
    )));
  }
  Ok(Cow::Owned(bytes))
}

// =============================================================================
// In-memory volume
// =============================================================================

/// A channel held completely in memory.
#[derive(Clone, Debug)]
pub struct VolumeBuffer {
  dimensions: UVec3,
  format: VoxelFormat,
  mapping: RealWorldMapping,
  bytes: Vec<u8>,
}

impl VolumeBuffer {
  /// Wrap little-endian bytes; the length must match the dimensions exactly.
  pub fn new(dimensions: UVec3, format: VoxelFormat, bytes: Vec<u8>) -> Result<Self, OctreeError> {
    let expected = voxel_count(dimensions) * format.bytes_per_voxel();
    if bytes.len() != expected {
      return Err(OctreeError::invalid_argument(format!(
        "volume buffer holds {} bytes, {}x{}x{} {} needs {}",
        bytes.len(),
        dimensions.x,
        dimensions.y,
        dimensions.z,
        format,
        expected
      )));
    }
    Ok(Self {
      dimensions,
      format,
      mapping: RealWorldMapping::IDENTITY,
      bytes,
    })
  }

  /// Build from typed samples in x-fastest order.
  pub fn from_samples<T: VoxelSample + bytemuck::Pod>(
    dimensions: UVec3,
    samples: &[T],
  ) -> Result<Self, OctreeError> {
    let bytes = if cfg!(target_endian = "little") {
      bytemuck::cast_slice::<T, u8>(samples).to_vec()
    } else {
      let mut bytes = Vec::new();
      T::extend_le_bytes(samples, &mut bytes);
      bytes
    };
    Self::new(dimensions, T::FORMAT, bytes)
  }

  pub fn with_real_world_mapping(mut self, mapping: RealWorldMapping) -> Self {
    self.mapping = mapping;
    self
  }

  pub fn bytes(&self) -> &[u8] {
    &self.bytes
  }
}

impl ChannelSource for VolumeBuffer {
  fn dimensions(&self) -> UVec3 {
    self.dimensions
  }

  fn format(&self) -> VoxelFormat {
    self.format
  }

  fn real_world_mapping(&self) -> RealWorldMapping {
    self.mapping
  }

  fn resident(&self) -> Option<&[u8]> {
    Some(&self.bytes)
  }
}

// =============================================================================
// Raw file
// =============================================================================

/// A headerless (or fixed-header) little-endian raw volume file, read slab by
/// slab.
#[derive(Clone, Debug)]
pub struct RawVolumeFile {
  path: PathBuf,
  dimensions: UVec3,
  format: VoxelFormat,
  header_bytes: u64,
  mapping: RealWorldMapping,
}

impl RawVolumeFile {
  pub fn open(
    path: impl AsRef<Path>,
    dimensions: UVec3,
    format: VoxelFormat,
  ) -> Result<Self, OctreeError> {
    Self::open_with_header(path, dimensions, format, 0)
  }

  /// Open a file whose voxel data starts after `header_bytes` bytes.
  pub fn open_with_header(
    path: impl AsRef<Path>,
    dimensions: UVec3,
    format: VoxelFormat,
    header_bytes: u64,
  ) -> Result<Self, OctreeError> {
    let path = path.as_ref().to_path_buf();
    let file_len = std::fs::metadata(&path)
      .map_err(|e| OctreeError::invalid_argument(format!("{}: {e}", path.display())))?
      .len();
    let needed = header_bytes + (voxel_count(dimensions) * format.bytes_per_voxel()) as u64;
    if file_len < needed {
      return Err(OctreeError::invalid_argument(format!(
        "{} is {} bytes, expected at least {}",
        path.display(),
        file_len,
        needed
      )));
    }
    Ok(Self {
      path,
      dimensions,
      format,
      header_bytes,
      mapping: RealWorldMapping::IDENTITY,
    })
  }

  pub fn with_real_world_mapping(mut self, mapping: RealWorldMapping) -> Self {
    self.mapping = mapping;
    self
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl ChannelSource for RawVolumeFile {
  fn dimensions(&self) -> UVec3 {
    self.dimensions
  }

  fn format(&self) -> VoxelFormat {
    self.format
  }

  fn real_world_mapping(&self) -> RealWorldMapping {
    self.mapping
  }

  fn load_slices(&self, first: u32, last: u32) -> Result<Vec<u8>, OctreeError> {
    if first > last || last >= self.dimensions.z {
      return Err(OctreeError::construction(format!(
        "slice range {first}..={last} outside volume depth {}",
        self.dimensions.z
      )));
    }
    let stride = slice_bytes(self) as u64;
    let io_error = |e: std::io::Error| OctreeError::construction(format!("{}: {e}", self.path.display()));

    let mut file = File::open(&self.path).map_err(io_error)?;
    file
      .seek(SeekFrom::Start(self.header_bytes + first as u64 * stride))
      .map_err(io_error)?;
    let mut bytes = vec![0u8; ((last - first + 1) as u64 * stride) as usize];
    file.read_exact(&mut bytes).map_err(io_error)?;
    Ok(bytes)
  }
}

#[cfg(test)]
#[path = "source_test.rs"]
mod source_test;
