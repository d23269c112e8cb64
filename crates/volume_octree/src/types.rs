//! Source voxel formats and their mapping to the normalized 16-bit domain.
//!
//! Every channel is stored as `u16` regardless of the input type, and all
//! homogeneity decisions compare values in this normalized domain.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::OctreeError;

/// Numeric type of the samples delivered by a channel source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoxelFormat {
  #[serde(rename = "uint8")]
  U8,
  #[serde(rename = "int8")]
  I8,
  #[serde(rename = "uint16")]
  U16,
  #[serde(rename = "int16")]
  I16,
  #[serde(rename = "uint32")]
  U32,
  #[serde(rename = "int32")]
  I32,
  #[serde(rename = "float")]
  F32,
  #[serde(rename = "double")]
  F64,
}

impl VoxelFormat {
  pub const ALL: [Self; 8] = [
    Self::U8,
    Self::I8,
    Self::U16,
    Self::I16,
    Self::U32,
    Self::I32,
    Self::F32,
    Self::F64,
  ];

  /// Size of one sample in the source representation.
  #[inline]
  pub const fn bytes_per_voxel(self) -> usize {
    match self {
      Self::U8 | Self::I8 => 1,
      Self::U16 | Self::I16 => 2,
      Self::U32 | Self::I32 | Self::F32 => 4,
      Self::F64 => 8,
    }
  }

  pub const fn name(self) -> &'static str {
    match self {
      Self::U8 => "uint8",
      Self::I8 => "int8",
      Self::U16 => "uint16",
      Self::I16 => "int16",
      Self::U32 => "uint32",
      Self::I32 => "int32",
      Self::F32 => "float",
      Self::F64 => "double",
    }
  }

  /// Decode little-endian source samples and normalize them to `u16`.
  ///
  /// Trailing bytes that do not form a whole sample are ignored.
  pub fn normalize_slab(self, bytes: &[u8]) -> Vec<u16> {
    match self {
      Self::U8 => bytes.iter().map(|&v| normalize::from_u8(v)).collect(),
      Self::I8 => bytes.iter().map(|&v| normalize::from_i8(v as i8)).collect(),
      Self::U16 => bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect(),
      Self::I16 => bytes
        .chunks_exact(2)
        .map(|c| normalize::from_i16(i16::from_le_bytes([c[0], c[1]])))
        .collect(),
      Self::U32 => bytes
        .chunks_exact(4)
        .map(|c| normalize::from_u32(u32::from_le_bytes([c[0], c[1], c[2], c[3]])))
        .collect(),
      Self::I32 => bytes
        .chunks_exact(4)
        .map(|c| normalize::from_i32(i32::from_le_bytes([c[0], c[1], c[2], c[3]])))
        .collect(),
      Self::F32 => bytes
        .chunks_exact(4)
        .map(|c| normalize::from_f32(f32::from_le_bytes([c[0], c[1], c[2], c[3]])))
        .collect(),
      Self::F64 => bytes
        .chunks_exact(8)
        .map(|c| {
          normalize::from_f64(f64::from_le_bytes([
            c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7],
          ]))
        })
        .collect(),
    }
  }
}

impl fmt::Display for VoxelFormat {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl FromStr for VoxelFormat {
  type Err = OctreeError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::ALL
      .into_iter()
      .find(|format| format.name() == s)
      .ok_or_else(|| OctreeError::invalid_argument(format!("unknown voxel format '{s}'")))
  }
}

/// Conversion of source samples into the normalized `u16` domain.
///
/// Unsigned 8/16/32-bit values are bit-shifted, other integer types are
/// rescaled linearly from their native range, floating point values are
/// treated as already normalized to `[0, 1]`. All casts saturate.
pub mod normalize {
  #[inline(always)]
  pub fn from_u8(value: u8) -> u16 {
    (value as u16) << 8
  }

  #[inline(always)]
  pub fn from_u16(value: u16) -> u16 {
    value
  }

  #[inline(always)]
  pub fn from_u32(value: u32) -> u16 {
    (value >> 16) as u16
  }

  #[inline(always)]
  pub fn from_i8(value: i8) -> u16 {
    rescale(value as f64, i8::MIN as f64, i8::MAX as f64)
  }

  #[inline(always)]
  pub fn from_i16(value: i16) -> u16 {
    rescale(value as f64, i16::MIN as f64, i16::MAX as f64)
  }

  #[inline(always)]
  pub fn from_i32(value: i32) -> u16 {
    rescale(value as f64, i32::MIN as f64, i32::MAX as f64)
  }

  #[inline(always)]
  pub fn from_f32(value: f32) -> u16 {
    (value * 65535.0) as u16
  }

  #[inline(always)]
  pub fn from_f64(value: f64) -> u16 {
    (value * 65535.0) as u16
  }

  #[inline(always)]
  fn rescale(value: f64, min: f64, max: f64) -> u16 {
    ((value - min) / (max - min) * 65535.0) as u16
  }
}

/// Linear mapping from normalized `[0, 1]` to real-world units.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RealWorldMapping {
  pub scale: f32,
  pub offset: f32,
}

impl RealWorldMapping {
  pub const IDENTITY: Self = Self {
    scale: 1.0,
    offset: 0.0,
  };

  pub fn new(scale: f32, offset: f32) -> Self {
    Self { scale, offset }
  }

  #[inline]
  pub fn normalized_to_real_world(&self, value: f32) -> f32 {
    value * self.scale + self.offset
  }
}

impl Default for RealWorldMapping {
  fn default() -> Self {
    Self::IDENTITY
  }
}

/// Primitive sample types that can seed an in-memory volume.
pub trait VoxelSample: Copy + Send + Sync + 'static {
  const FORMAT: VoxelFormat;

  /// Append the little-endian encoding of `samples` to `out`.
  fn extend_le_bytes(samples: &[Self], out: &mut Vec<u8>);
}

macro_rules! impl_voxel_sample {
  ($($ty:ty => $format:ident),* $(,)?) => {
    $(
      impl VoxelSample for $ty {
        const FORMAT: VoxelFormat = VoxelFormat::$format;

        fn extend_le_bytes(samples: &[Self], out: &mut Vec<u8>) {
          out.reserve(samples.len() * std::mem::size_of::<$ty>());
          for sample in samples {
            out.extend_from_slice(&sample.to_le_bytes());
          }
        }
      }
    )*
  };
}

impl_voxel_sample!(
  u8 => U8,
  i8 => I8,
  u16 => U16,
  i16 => I16,
  u32 => U32,
  i32 => I32,
  f32 => F32,
  f64 => F64,
);

#[cfg(test)]
#[path = "types_test.rs"]
mod types_test;
