//! Scoped brick access.
//!
//! Every successful `get_brick` / `get_writable_brick` returns a guard that
//! releases the brick when dropped, so acquire and release stay paired on
//! early returns and unwinding.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use super::{BrickAddress, BrickPoolManager, BrickRelease};

/// Read access to one brick.
pub struct BrickRef<'a> {
  pool: &'a dyn BrickPoolManager,
  address: BrickAddress,
  data: Arc<[u16]>,
}

impl<'a> BrickRef<'a> {
  pub(crate) fn new(pool: &'a dyn BrickPoolManager, address: BrickAddress, data: Arc<[u16]>) -> Self {
    Self {
      pool,
      address,
      data,
    }
  }

  pub fn address(&self) -> BrickAddress {
    self.address
  }
}

impl Deref for BrickRef<'_> {
  type Target = [u16];

  fn deref(&self) -> &[u16] {
    &self.data
  }
}

impl Drop for BrickRef<'_> {
  fn drop(&mut self) {
    self.pool.release_brick(self.address, BrickRelease::Read);
  }
}

/// Write access to one brick.
///
/// Holds a private copy; the pool sees the new content when the guard is
/// dropped.
pub struct BrickMut<'a> {
  pool: &'a dyn BrickPoolManager,
  address: BrickAddress,
  data: Option<Vec<u16>>,
}

impl<'a> BrickMut<'a> {
  pub(crate) fn new(pool: &'a dyn BrickPoolManager, address: BrickAddress, data: Vec<u16>) -> Self {
    Self {
      pool,
      address,
      data: Some(data),
    }
  }

  pub fn address(&self) -> BrickAddress {
    self.address
  }
}

impl Deref for BrickMut<'_> {
  type Target = [u16];

  fn deref(&self) -> &[u16] {
    self.data.as_deref().unwrap_or_default()
  }
}

impl DerefMut for BrickMut<'_> {
  fn deref_mut(&mut self) -> &mut [u16] {
    self.data.as_deref_mut().unwrap_or_default()
  }
}

impl Drop for BrickMut<'_> {
  fn drop(&mut self) {
    if let Some(data) = self.data.take() {
      self
        .pool
        .release_brick(self.address, BrickRelease::Write(Arc::from(data)));
    }
  }
}
