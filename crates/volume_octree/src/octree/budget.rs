//! Time budget for reconstruction and statistics of construction.
//!
//! A budgeted reconstruction stops paging bricks in once its time limit has
//! passed. Nodes whose bricks are not resident are then filled with their
//! average value and the result is flagged incomplete.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use web_time::Instant;

/// Time limit for `create_volume` / `create_slice`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComposeBudget {
  /// Wall-clock limit; `None` never runs out.
  pub time_limit: Option<Duration>,
}

impl ComposeBudget {
  /// Every brick is loaded, however long it takes.
  pub const UNLIMITED: Self = Self { time_limit: None };

  /// Only RAM-resident bricks are used.
  pub const RESIDENT_ONLY: Self = Self {
    time_limit: Some(Duration::ZERO),
  };

  pub fn with_limit(limit: Duration) -> Self {
    Self {
      time_limit: Some(limit),
    }
  }

  pub(crate) fn start(&self) -> BudgetClock {
    BudgetClock {
      started: Instant::now(),
      limit: self.time_limit,
    }
  }
}

impl Default for ComposeBudget {
  fn default() -> Self {
    Self::UNLIMITED
  }
}

/// Running budget of one reconstruction.
#[derive(Clone, Copy, Debug)]
pub(crate) struct BudgetClock {
  started: Instant,
  limit: Option<Duration>,
}

impl BudgetClock {
  #[inline]
  pub(crate) fn exhausted(&self) -> bool {
    self
      .limit
      .is_some_and(|limit| self.started.elapsed() >= limit)
  }
}

/// Statistics from octree construction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstructionStats {
  /// Leaf nodes inside the volume.
  pub leaf_nodes: u64,
  /// Leaves stored without a brick.
  pub homogeneous_leaves: u64,
  /// Nodes created entirely outside the volume, at any level.
  pub empty_nodes: u64,
  /// Bricks written (leaves and merged parents).
  pub bricks_written: u64,
  /// Bricks deleted when a homogeneous parent absorbed its children.
  pub bricks_freed: u64,
  /// Parent levels built.
  pub merge_rounds: u32,
  pub elapsed: Duration,
}

impl ConstructionStats {
  /// Bricks remaining after pruning.
  #[inline]
  pub fn bricks_retained(&self) -> u64 {
    self.bricks_written - self.bricks_freed
  }
}
