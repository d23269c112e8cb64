//! Brick pools: paged storage for fixed-size `u16` bricks.
//!
//! The octree never touches brick memory directly. It asks a
//! [`BrickPoolManager`] for a [`BrickAddress`] and reads or writes through
//! scoped guards:
//!
//! ```text
//!  allocate_brick() ──► BrickAddress ──► get_writable_brick() ──► BrickMut
//!                            │                                      │ drop
//!                            │                                      ▼
//!                            └──────────► get_brick() ──► BrickRef  release_brick()
//! ```
//!
//! Two implementations exist:
//! - [`RamBrickPool`]: everything stays resident, grows buffer by buffer.
//! - [`DiskBrickPool`]: buffers are backed by files and paged in and out under
//!   a RAM limit with LRU eviction.
//!
//! Pools synchronize internally; all access methods take `&self`.

mod address;
mod disk;
mod guard;
mod ram;

use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use address::BrickAddress;
pub(crate) use address::SlotTable;
pub use disk::{DiskBrickPool, DiskPoolConfig};
pub use guard::{BrickMut, BrickRef};
pub use ram::RamBrickPool;

use crate::error::PoolError;
use crate::progress::ProgressSink;

/// How a guard hands a brick back to its pool.
#[derive(Debug)]
pub enum BrickRelease {
  Read,
  Write(Arc<[u16]>),
}

/// Paged storage of equally sized bricks.
pub trait BrickPoolManager: Send + Sync + Debug {
  /// Prepare the pool for bricks of `brick_bytes` bytes.
  fn initialize(&mut self, brick_bytes: usize) -> Result<(), PoolError>;

  /// Release all memory; the pool must be initialized again before use.
  fn deinitialize(&mut self);

  fn brick_bytes(&self) -> usize;

  fn allocate_brick(&self) -> Result<BrickAddress, PoolError>;

  /// Free a brick; its slot is reused under a new generation.
  fn delete_brick(&self, address: BrickAddress) -> Result<(), PoolError>;

  fn get_brick(&self, address: BrickAddress) -> Result<BrickRef<'_>, PoolError>;

  fn get_writable_brick(&self, address: BrickAddress) -> Result<BrickMut<'_>, PoolError>;

  /// Called by the guards on drop.
  fn release_brick(&self, address: BrickAddress, release: BrickRelease);

  fn is_brick_in_ram(&self, address: BrickAddress) -> bool;

  /// Whether `address` refers to a live brick of this pool.
  fn contains_brick(&self, address: BrickAddress) -> bool;

  fn set_ram_limit(&mut self, bytes: u64) -> Result<(), PoolError>;

  /// Write all modified buffers to their backing store.
  fn flush_pool_to_disk(&self, progress: &mut dyn ProgressSink) -> Result<(), PoolError>;

  /// Bytes reserved by all buffers, resident or not.
  fn memory_allocated(&self) -> u64;

  fn description(&self) -> String;

  /// Make the pool content durable and describe how to restore it.
  ///
  /// Pools that hold no files of their own write them into `dir`.
  fn persist(&self, dir: &Path) -> Result<PoolDescriptor, PoolError>;
}

// =============================================================================
// Persistence records
// =============================================================================

/// Serialized description of a pool, stored in the octree metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PoolDescriptor {
  Ram(RamPoolDescriptor),
  Disk(DiskPoolDescriptor),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RamPoolDescriptor {
  pub buffer_bytes: u64,
  pub brick_bytes: u64,
  pub slot_count: u64,
  pub ram_limit_bytes: Option<u64>,
  pub files: Vec<String>,
  pub generations: Vec<(u32, u32)>,
  pub free_slots: Vec<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiskPoolDescriptor {
  pub max_buffer_bytes: u64,
  pub buffer_bytes: u64,
  pub brick_bytes: u64,
  pub ram_limit_bytes: u64,
  pub directory: PathBuf,
  pub file_prefix: String,
  pub files: Vec<String>,
  pub slot_count: u64,
  pub generations: Vec<(u32, u32)>,
  pub free_slots: Vec<u32>,
}

/// Overrides applied when restoring a pool.
#[derive(Clone, Debug, Default)]
pub struct PoolRestore {
  /// RAM limit for a disk pool; the persisted limit is used when `None`.
  pub ram_limit_bytes: Option<u64>,
}

/// Recreate a pool from its descriptor.
///
/// `octree_dir` is where a RAM pool wrote its buffers. A disk pool whose
/// recorded directory no longer exists is looked up there as well.
pub fn restore_pool(
  descriptor: &PoolDescriptor,
  octree_dir: &Path,
  options: &PoolRestore,
) -> Result<Box<dyn BrickPoolManager>, PoolError> {
  match descriptor {
    PoolDescriptor::Ram(ram) => Ok(Box::new(RamBrickPool::restore(ram, octree_dir)?)),
    PoolDescriptor::Disk(disk) => {
      let directory = if disk.directory.is_dir() {
        disk.directory.clone()
      } else {
        octree_dir.to_path_buf()
      };
      Ok(Box::new(DiskBrickPool::restore(
        disk,
        directory,
        options.ram_limit_bytes,
      )?))
    }
  }
}
