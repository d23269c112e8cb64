//! Read-path benchmarks on a prebuilt octree.
//!
//! - **point**: `get_node` at the root, middle and leaf levels, `get_voxel`
//! - **slice**: full-resolution and coarse slices per alignment
//! - **volume**: whole-volume reconstruction at coarse levels

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::{UVec3, Vec3};
use volume_octree::{
  BuildOptions, ChannelSource, ComposeBudget, NoProgress, RamBrickPool, SliceAlignment,
  VolumeBuffer, VolumeOctree,
};

const DIM: u32 = 192;

/// Concentric shells with a gentle ramp: bricked near the shells,
/// homogeneous in between.
fn shell_volume(dim: UVec3) -> VolumeBuffer {
  let center = dim.as_vec3() * 0.5;
  let mut samples = Vec::with_capacity((dim.x * dim.y * dim.z) as usize);
  for z in 0..dim.z {
    for y in 0..dim.y {
      for x in 0..dim.x {
        let distance = (Vec3::new(x as f32, y as f32, z as f32) - center).length();
        let shell = (distance / 24.0).floor() as u16;
        let ramp = if distance % 24.0 < 2.0 { (distance * 64.0) as u16 } else { 0 };
        samples.push(shell.wrapping_mul(8192).wrapping_add(ramp));
      }
    }
  }
  VolumeBuffer::from_samples(dim, &samples).expect("valid bench volume")
}

fn bench_octree() -> VolumeOctree {
  let source = shell_volume(UVec3::splat(DIM));
  VolumeOctree::build(
    &[&source as &dyn ChannelSource],
    &BuildOptions::LOSSLESS.with_brick_dim(16),
    Box::new(RamBrickPool::new(64 << 20)),
    &mut NoProgress::default(),
  )
  .expect("bench construction")
}

fn bench_point_queries(c: &mut Criterion) {
  let mut group = c.benchmark_group("query/point");
  let octree = bench_octree();
  let points: Vec<Vec3> = (0..256)
    .map(|i| {
      let t = i as f32 / 256.0;
      Vec3::new(t, (t * 7.0).fract(), (t * 13.0).fract())
    })
    .collect();

  for level in [octree.num_levels() - 1, octree.num_levels() / 2, 0] {
    group.bench_with_input(BenchmarkId::new("get_node", level), &level, |b, &level| {
      b.iter(|| {
        for point in &points {
          black_box(octree.get_node(black_box(*point), level).ok());
        }
      })
    });
  }

  group.bench_function("get_voxel", |b| {
    b.iter(|| {
      for point in &points {
        let position = (*point * (DIM - 1) as f32).as_uvec3();
        black_box(octree.get_voxel(position, 0).ok());
      }
    })
  });
  group.finish();
}

fn bench_slices(c: &mut Criterion) {
  let mut group = c.benchmark_group("query/slice");
  let octree = bench_octree();

  for alignment in SliceAlignment::ALL {
    for level in [0, 2] {
      let id = BenchmarkId::new(format!("{alignment:?}"), level);
      group.bench_function(id, |b| {
        b.iter(|| {
          octree
            .create_slice(alignment, black_box(DIM / 2), level, ComposeBudget::UNLIMITED)
            .ok()
        })
      });
    }
  }
  group.finish();
}

fn bench_volumes(c: &mut Criterion) {
  let mut group = c.benchmark_group("query/volume");
  group.sample_size(20);
  let octree = bench_octree();

  for level in [1, 2, 3] {
    group.bench_with_input(BenchmarkId::from_parameter(level), &level, |b, &level| {
      b.iter(|| octree.create_volume(black_box(level), ComposeBudget::UNLIMITED).ok())
    });
  }
  group.finish();
}

criterion_group!(query, bench_point_queries, bench_slices, bench_volumes);
criterion_main!(query);
