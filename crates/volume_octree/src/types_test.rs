use normalize::*;

use super::*;

// Unsigned formats are bit-shifted into the 16-bit domain.
#[test]
fn test_unsigned_shifts() {
  assert_eq!(from_u8(0), 0);
  assert_eq!(from_u8(1), 256);
  assert_eq!(from_u8(255), 0xFF00);
  assert_eq!(from_u16(1234), 1234);
  assert_eq!(from_u32(0x1234_5678), 0x1234);
  assert_eq!(from_u32(u32::MAX), u16::MAX);
}

#[test]
fn test_signed_rescale_covers_full_range() {
  assert_eq!(from_i8(i8::MIN), 0);
  assert_eq!(from_i8(i8::MAX), u16::MAX);
  assert_eq!(from_i16(i16::MIN), 0);
  assert_eq!(from_i16(i16::MAX), u16::MAX);
  assert_eq!(from_i32(i32::MIN), 0);
  assert_eq!(from_i32(i32::MAX), u16::MAX);
}

#[test]
fn test_signed_rescale_is_monotonic() {
  let mut previous = 0;
  for value in i8::MIN..=i8::MAX {
    let normalized = from_i8(value);
    assert!(
      normalized >= previous,
      "Normalization of {} decreased ({} < {})",
      value,
      normalized,
      previous
    );
    previous = normalized;
  }
}

#[test]
fn test_float_scaling_saturates() {
  assert_eq!(from_f32(0.0), 0);
  assert_eq!(from_f32(1.0), u16::MAX);
  assert_eq!(from_f32(0.5), 32767);
  assert_eq!(from_f32(-3.0), 0, "Negative values clamp to zero");
  assert_eq!(from_f32(7.0), u16::MAX, "Values above one clamp to max");
  assert_eq!(from_f32(f32::NAN), 0);
  assert_eq!(from_f64(1.0), u16::MAX);
}

#[test]
fn test_normalize_slab_decodes_little_endian() {
  let bytes = [0x34, 0x12, 0xFF, 0xFF];
  assert_eq!(VoxelFormat::U16.normalize_slab(&bytes), vec![0x1234, 0xFFFF]);

  let mut float_bytes = Vec::new();
  f32::extend_le_bytes(&[0.0, 1.0], &mut float_bytes);
  assert_eq!(VoxelFormat::F32.normalize_slab(&float_bytes), vec![0, u16::MAX]);
}

#[test]
fn test_normalize_slab_matches_scalar_rules() {
  let samples: Vec<i16> = vec![i16::MIN, -1, 0, 1, i16::MAX];
  let mut bytes = Vec::new();
  i16::extend_le_bytes(&samples, &mut bytes);

  let slab = VoxelFormat::I16.normalize_slab(&bytes);
  let expected: Vec<u16> = samples.iter().map(|&v| from_i16(v)).collect();
  assert_eq!(slab, expected);
}

#[test]
fn test_format_names_roundtrip() {
  for format in VoxelFormat::ALL {
    let parsed: VoxelFormat = format.name().parse().expect("Known name should parse");
    assert_eq!(parsed, format);
  }
  assert!("complex64".parse::<VoxelFormat>().is_err());
}

#[test]
fn test_bytes_per_voxel() {
  assert_eq!(VoxelFormat::U8.bytes_per_voxel(), 1);
  assert_eq!(VoxelFormat::I16.bytes_per_voxel(), 2);
  assert_eq!(VoxelFormat::F32.bytes_per_voxel(), 4);
  assert_eq!(VoxelFormat::F64.bytes_per_voxel(), 8);
}

#[test]
fn test_real_world_mapping() {
  let mapping = RealWorldMapping::new(2000.0, -1000.0);
  assert_eq!(mapping.normalized_to_real_world(0.0), -1000.0);
  assert_eq!(mapping.normalized_to_real_world(1.0), 1000.0);
  assert_eq!(RealWorldMapping::default(), RealWorldMapping::IDENTITY);
}
