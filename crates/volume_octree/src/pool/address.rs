//! Generational brick addresses and the slot table that hands them out.

use std::fmt;

use crate::error::PoolError;

/// Opaque handle to one brick of a pool.
///
/// ```text
///  63            32 31             0
/// ┌────────────────┬────────────────┐
/// │   generation   │      slot      │
/// └────────────────┴────────────────┘
/// ```
///
/// The generation never reaches `u32::MAX`, so a valid address never equals
/// the node codec sentinels `u64::MAX` and `u64::MAX - 1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BrickAddress(u64);

impl BrickAddress {
  #[inline]
  pub(crate) const fn new(slot: u32, generation: u32) -> Self {
    Self(((generation as u64) << 32) | slot as u64)
  }

  #[inline]
  pub const fn from_raw(raw: u64) -> Self {
    Self(raw)
  }

  #[inline]
  pub const fn raw(self) -> u64 {
    self.0
  }

  #[inline]
  pub const fn slot(self) -> u32 {
    self.0 as u32
  }

  #[inline]
  pub const fn generation(self) -> u32 {
    (self.0 >> 32) as u32
  }
}

impl fmt::Display for BrickAddress {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}#{}", self.slot(), self.generation())
  }
}

#[inline]
fn next_generation(generation: u32) -> u32 {
  match generation.wrapping_add(1) {
    u32::MAX => 0,
    next => next,
  }
}

/// Bookkeeping of slot generations, liveness and the free list.
///
/// Slot storage itself belongs to the pool; the table only decides which
/// address is valid.
#[derive(Clone, Debug, Default)]
pub(crate) struct SlotTable {
  generations: Vec<u32>,
  live: Vec<bool>,
  free: Vec<u32>,
}

impl SlotTable {
  /// Slots ever handed out (live or free).
  #[inline]
  pub(crate) fn len(&self) -> usize {
    self.generations.len()
  }

  pub(crate) fn live_count(&self) -> usize {
    self.len() - self.free.len()
  }

  /// Hand out the next never-used slot.
  pub(crate) fn push_fresh(&mut self) -> BrickAddress {
    let slot = self.generations.len() as u32;
    self.generations.push(0);
    self.live.push(true);
    BrickAddress::new(slot, 0)
  }

  /// Reuse a deleted slot, most recently freed first.
  pub(crate) fn take_free(&mut self) -> Option<BrickAddress> {
    let slot = self.free.pop()?;
    self.live[slot as usize] = true;
    Some(BrickAddress::new(slot, self.generations[slot as usize]))
  }

  /// Slot index of a live address.
  pub(crate) fn validate(&self, address: BrickAddress) -> Result<usize, PoolError> {
    let slot = address.slot() as usize;
    match (self.generations.get(slot), self.live.get(slot)) {
      (Some(&generation), Some(true)) if generation == address.generation() => Ok(slot),
      _ => Err(PoolError::InvalidAddress(address)),
    }
  }

  /// Invalidate an address and put its slot on the free list.
  pub(crate) fn release(&mut self, address: BrickAddress) -> Result<usize, PoolError> {
    let slot = self.validate(address)?;
    self.generations[slot] = next_generation(self.generations[slot]);
    self.live[slot] = false;
    self.free.push(slot as u32);
    Ok(slot)
  }

  /// `(slot, generation)` pairs with a non-zero generation.
  pub(crate) fn sparse_generations(&self) -> Vec<(u32, u32)> {
    self
      .generations
      .iter()
      .enumerate()
      .filter(|(_, &generation)| generation != 0)
      .map(|(slot, &generation)| (slot as u32, generation))
      .collect()
  }

  pub(crate) fn free_slots(&self) -> &[u32] {
    &self.free
  }

  /// Rebuild a table from its persisted form.
  pub(crate) fn restore(
    slot_count: usize,
    generations: &[(u32, u32)],
    free: &[u32],
  ) -> Result<Self, PoolError> {
    let mut table = Self {
      generations: vec![0; slot_count],
      live: vec![true; slot_count],
      free: Vec::with_capacity(free.len()),
    };
    for &(slot, generation) in generations {
      if slot as usize >= slot_count || generation == u32::MAX {
        return Err(PoolError::Corrupt(format!(
          "generation record {slot}#{generation} out of range"
        )));
      }
      table.generations[slot as usize] = generation;
    }
    for &slot in free {
      match table.live.get_mut(slot as usize) {
        Some(live) if *live => *live = false,
        _ => {
          return Err(PoolError::Corrupt(format!("invalid free slot {slot}")));
        }
      }
      table.free.push(slot);
    }
    Ok(table)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_address_packing() {
    let address = BrickAddress::new(7, 3);
    assert_eq!(address.slot(), 7);
    assert_eq!(address.generation(), 3);
    assert_eq!(BrickAddress::from_raw(address.raw()), address);
    assert_eq!(address.to_string(), "7#3");
  }

  #[test]
  fn test_stale_address_is_rejected() {
    let mut table = SlotTable::default();
    let first = table.push_fresh();
    table.release(first).unwrap();

    let reused = table.take_free().expect("freed slot should be reused");
    assert_eq!(reused.slot(), first.slot());
    assert_ne!(reused, first, "Reused slot must carry a new generation");
    assert!(matches!(
      table.validate(first),
      Err(PoolError::InvalidAddress(_))
    ));
    assert!(table.validate(reused).is_ok());
  }

  #[test]
  fn test_double_release_fails() {
    let mut table = SlotTable::default();
    let address = table.push_fresh();
    assert!(table.release(address).is_ok());
    assert!(table.release(address).is_err());
  }

  #[test]
  fn test_generation_skips_reserved_value() {
    assert_eq!(next_generation(u32::MAX - 1), 0);
    assert_eq!(next_generation(5), 6);
  }

  #[test]
  fn test_restore_roundtrip() {
    let mut table = SlotTable::default();
    let a = table.push_fresh();
    let _b = table.push_fresh();
    table.release(a).unwrap();

    let restored =
      SlotTable::restore(table.len(), &table.sparse_generations(), table.free_slots()).unwrap();
    assert_eq!(restored.live_count(), 1);
    assert!(restored.validate(a).is_err());
    assert!(restored.validate(BrickAddress::new(1, 0)).is_ok());
  }
}
