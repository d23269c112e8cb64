//! Error types for the brick pools and the octree.
//!
//! `PoolError` is raised by [`BrickPoolManager`](crate::pool::BrickPoolManager)
//! implementations. `OctreeError` is what the public octree API returns; the
//! octree decides at each boundary which kind a pool failure becomes.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::pool::BrickAddress;

/// Failure inside a brick pool.
#[derive(Debug, Error)]
pub enum PoolError {
  /// The pool was used before `initialize` or after `deinitialize`.
  #[error("brick pool is not initialized")]
  NotInitialized,
  /// Address was never allocated, was deleted, or belongs to another pool.
  #[error("invalid brick address {0}")]
  InvalidAddress(BrickAddress),
  /// A single buffer cannot hold even one brick.
  #[error("buffer size is smaller than a single brick [{buffer_bytes} bytes < {brick_bytes} bytes]")]
  BufferTooSmall { buffer_bytes: u64, brick_bytes: u64 },
  /// The RAM limit does not fit the minimum number of resident buffers.
  #[error("RAM limit must hold at least two buffers [{limit_bytes} bytes < {required_bytes} bytes]")]
  RamLimitTooSmall { limit_bytes: u64, required_bytes: u64 },
  /// Allocating another buffer would exceed the RAM limit.
  #[error("brick pool RAM limit of {limit_bytes} bytes exceeded")]
  RamLimitExceeded { limit_bytes: u64 },
  /// Every resident buffer stayed pinned while a buffer had to be paged in.
  #[error("all resident brick buffers are in use")]
  AllBuffersPinned,
  /// Backing directory does not exist.
  #[error("brick pool directory does not exist: {}", .0.display())]
  MissingDirectory(PathBuf),
  /// A buffer file listed by the pool is missing.
  #[error("missing brick buffer file: {}", .0.display())]
  MissingFile(PathBuf),
  /// A buffer file or pool record does not match the expected layout.
  #[error("corrupt brick pool: {0}")]
  Corrupt(String),
  /// Reading or writing a buffer file failed.
  #[error("{}: {source}", .path.display())]
  Io { path: PathBuf, source: io::Error },
  /// A thread panicked while holding the pool lock.
  #[error("brick pool lock poisoned")]
  Poisoned,
}

impl PoolError {
  pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
    Self::Io {
      path: path.into(),
      source,
    }
  }
}

/// Failure of an octree operation.
#[derive(Debug, Error)]
pub enum OctreeError {
  /// Construction arguments rejected before any brick was allocated.
  #[error("invalid argument: {0}")]
  InvalidArgument(String),
  /// Construction aborted; the partial pool was released.
  #[error("octree construction failed: {0}")]
  ConstructionFailed(String),
  /// Saving or loading the node buffer, metadata or brick pool failed.
  #[error("octree serialization failed: {0}")]
  SerializationFailed(String),
  /// Query arguments out of range (level, channel, point, slice index).
  #[error("precondition violated: {0}")]
  PreconditionViolation(String),
  /// Brick access failed during a query.
  #[error("brick pool error: {0}")]
  Pool(#[from] PoolError),
}

impl OctreeError {
  pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
    Self::InvalidArgument(message.into())
  }

  pub(crate) fn precondition(message: impl Into<String>) -> Self {
    Self::PreconditionViolation(message.into())
  }

  pub(crate) fn serialization(message: impl fmt::Display) -> Self {
    Self::SerializationFailed(message.to_string())
  }

  pub(crate) fn construction(message: impl fmt::Display) -> Self {
    Self::ConstructionFailed(message.to_string())
  }

  /// Fold any failure raised while building into a single construction error.
  pub(crate) fn into_construction_failure(self) -> Self {
    match self {
      Self::ConstructionFailed(_) | Self::InvalidArgument(_) => self,
      other => Self::ConstructionFailed(other.to_string()),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::error::Error as _;

  use super::*;

  #[test]
  fn test_pool_error_converts_and_keeps_source() {
    let io = io::Error::new(io::ErrorKind::NotFound, "gone");
    let error: OctreeError = PoolError::io("/tmp/brickbuffer_0", io).into();
    assert_eq!(error.to_string(), "brick pool error: /tmp/brickbuffer_0: gone");

    let pool = error.source().expect("pool error should be the source");
    assert!(pool.source().is_some(), "I/O error should be reachable from the pool error");
  }

  #[test]
  fn test_construction_failure_folds_other_kinds() {
    let folded = OctreeError::from(PoolError::AllBuffersPinned).into_construction_failure();
    assert!(matches!(folded, OctreeError::ConstructionFailed(ref m) if m.contains("in use")));
    assert!(matches!(
      OctreeError::invalid_argument("x").into_construction_failure(),
      OctreeError::InvalidArgument(_)
    ));
  }
}
