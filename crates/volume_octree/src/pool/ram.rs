//! RAM-resident brick pool.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{
  BrickAddress, BrickMut, BrickPoolManager, BrickRef, BrickRelease, PoolDescriptor,
  RamPoolDescriptor, SlotTable,
};
use crate::constants::format_memory_size;
use crate::error::PoolError;
use crate::progress::ProgressSink;

const RAM_BUFFER_PREFIX: &str = "rambuffer_";

/// Brick pool that keeps every brick in memory.
///
/// Storage grows in logical buffers of `buffer_bytes / brick_bytes` slots.
/// An optional RAM limit caps the number of buffers.
#[derive(Debug)]
pub struct RamBrickPool {
  buffer_bytes: u64,
  ram_limit_bytes: Option<u64>,
  state: Mutex<Option<RamState>>,
}

#[derive(Debug)]
struct RamState {
  brick_bytes: usize,
  slots_per_buffer: usize,
  num_buffers: usize,
  table: SlotTable,
  /// `None` for bricks that were never written.
  bricks: Vec<Option<Arc<[u16]>>>,
  zero: Arc<[u16]>,
}

impl RamState {
  fn new(brick_bytes: usize, buffer_bytes: u64) -> Result<Self, PoolError> {
    let slots_per_buffer = (buffer_bytes / brick_bytes.max(1) as u64) as usize;
    if brick_bytes == 0 || brick_bytes % 2 != 0 || slots_per_buffer == 0 {
      return Err(PoolError::BufferTooSmall {
        buffer_bytes,
        brick_bytes: brick_bytes as u64,
      });
    }
    Ok(Self {
      brick_bytes,
      slots_per_buffer,
      num_buffers: 0,
      table: SlotTable::default(),
      bricks: Vec::new(),
      zero: Arc::from(vec![0u16; brick_bytes / 2]),
    })
  }

  #[inline]
  fn brick_samples(&self) -> usize {
    self.brick_bytes / 2
  }

  #[inline]
  fn buffer_bytes(&self) -> u64 {
    (self.slots_per_buffer * self.brick_bytes) as u64
  }

  fn memory_allocated(&self) -> u64 {
    self.num_buffers as u64 * self.buffer_bytes()
  }
}

impl RamBrickPool {
  pub fn new(buffer_bytes: u64) -> Self {
    Self {
      buffer_bytes,
      ram_limit_bytes: None,
      state: Mutex::new(None),
    }
  }

  pub fn with_ram_limit(mut self, bytes: u64) -> Self {
    self.ram_limit_bytes = Some(bytes);
    self
  }

  fn lock(&self) -> Result<MutexGuard<'_, Option<RamState>>, PoolError> {
    self.state.lock().map_err(|_| PoolError::Poisoned)
  }

  fn with_state<R>(
    &self,
    f: impl FnOnce(&mut RamState) -> Result<R, PoolError>,
  ) -> Result<R, PoolError> {
    let mut guard = self.lock()?;
    let state = guard.as_mut().ok_or(PoolError::NotInitialized)?;
    f(state)
  }

  /// Load a pool written by [`BrickPoolManager::persist`].
  pub fn restore(descriptor: &RamPoolDescriptor, dir: &Path) -> Result<Self, PoolError> {
    let mut state = RamState::new(descriptor.brick_bytes as usize, descriptor.buffer_bytes)?;
    let slot_count = descriptor.slot_count as usize;
    if slot_count > descriptor.files.len() * state.slots_per_buffer {
      return Err(PoolError::Corrupt(format!(
        "{} slots do not fit into {} buffers",
        slot_count,
        descriptor.files.len()
      )));
    }
    state.table = SlotTable::restore(slot_count, &descriptor.generations, &descriptor.free_slots)?;
    state.num_buffers = descriptor.files.len();
    state.bricks = Vec::with_capacity(slot_count);

    let samples = state.brick_samples();
    for file_name in &descriptor.files {
      let path = dir.join(file_name);
      if !path.is_file() {
        return Err(PoolError::MissingFile(path));
      }
      let bytes = std::fs::read(&path).map_err(|e| PoolError::io(&path, e))?;
      if bytes.len() as u64 != state.buffer_bytes() {
        return Err(PoolError::Corrupt(format!(
          "{} has {} bytes, expected {}",
          path.display(),
          bytes.len(),
          state.buffer_bytes()
        )));
      }
      let words: Vec<u16> = bytemuck::pod_collect_to_vec(&bytes);
      for brick in words.chunks_exact(samples) {
        if state.bricks.len() < slot_count {
          state.bricks.push(Some(Arc::from(brick)));
        }
      }
    }
    for &slot in state.table.free_slots() {
      state.bricks[slot as usize] = None;
    }

    Ok(Self {
      buffer_bytes: descriptor.buffer_bytes,
      ram_limit_bytes: descriptor.ram_limit_bytes,
      state: Mutex::new(Some(state)),
    })
  }
}

impl BrickPoolManager for RamBrickPool {
  fn initialize(&mut self, brick_bytes: usize) -> Result<(), PoolError> {
    let state = RamState::new(brick_bytes, self.buffer_bytes)?;
    if let Some(limit) = self.ram_limit_bytes {
      if limit < state.buffer_bytes() {
        return Err(PoolError::RamLimitTooSmall {
          limit_bytes: limit,
          required_bytes: state.buffer_bytes(),
        });
      }
    }
    *self.state.get_mut().map_err(|_| PoolError::Poisoned)? = Some(state);
    Ok(())
  }

  fn deinitialize(&mut self) {
    if let Ok(state) = self.state.get_mut() {
      *state = None;
    }
  }

  fn brick_bytes(&self) -> usize {
    self
      .lock()
      .ok()
      .and_then(|guard| guard.as_ref().map(|state| state.brick_bytes))
      .unwrap_or(0)
  }

  fn allocate_brick(&self) -> Result<BrickAddress, PoolError> {
    let ram_limit = self.ram_limit_bytes;
    self.with_state(|state| {
      if state.table.len() < state.num_buffers * state.slots_per_buffer {
        state.bricks.push(None);
        return Ok(state.table.push_fresh());
      }
      if let Some(address) = state.table.take_free() {
        return Ok(address);
      }
      if let Some(limit) = ram_limit {
        if state.memory_allocated() + state.buffer_bytes() > limit {
          return Err(PoolError::RamLimitExceeded { limit_bytes: limit });
        }
      }
      state.num_buffers += 1;
      #[cfg(feature = "tracing")]
      tracing::debug!(buffers = state.num_buffers, "ram pool: new buffer");
      state.bricks.push(None);
      Ok(state.table.push_fresh())
    })
  }

  fn delete_brick(&self, address: BrickAddress) -> Result<(), PoolError> {
    self.with_state(|state| {
      let slot = state.table.release(address)?;
      state.bricks[slot] = None;
      Ok(())
    })
  }

  fn get_brick(&self, address: BrickAddress) -> Result<BrickRef<'_>, PoolError> {
    let data = self.with_state(|state| {
      let slot = state.table.validate(address)?;
      Ok(state.bricks[slot].clone().unwrap_or_else(|| state.zero.clone()))
    })?;
    Ok(BrickRef::new(self, address, data))
  }

  fn get_writable_brick(&self, address: BrickAddress) -> Result<BrickMut<'_>, PoolError> {
    let data = self.with_state(|state| {
      let slot = state.table.validate(address)?;
      Ok(match &state.bricks[slot] {
        Some(brick) => brick.to_vec(),
        None => vec![0; state.brick_samples()],
      })
    })?;
    Ok(BrickMut::new(self, address, data))
  }

  fn release_brick(&self, address: BrickAddress, release: BrickRelease) {
    if let BrickRelease::Write(data) = release {
      let stored = self.with_state(|state| {
        let slot = state.table.validate(address)?;
        if data.len() == state.brick_samples() {
          state.bricks[slot] = Some(data);
        }
        Ok(())
      });
      if let Err(err) = stored {
        #[cfg(feature = "tracing")]
        tracing::warn!(%address, %err, "ram pool: brick write discarded");
        #[cfg(not(feature = "tracing"))]
        let _ = err;
      }
    }
  }

  fn is_brick_in_ram(&self, address: BrickAddress) -> bool {
    self.contains_brick(address)
  }

  fn contains_brick(&self, address: BrickAddress) -> bool {
    self
      .with_state(|state| state.table.validate(address).map(|_| ()))
      .is_ok()
  }

  fn set_ram_limit(&mut self, bytes: u64) -> Result<(), PoolError> {
    let allocated = self.memory_allocated();
    if bytes < allocated {
      return Err(PoolError::RamLimitTooSmall {
        limit_bytes: bytes,
        required_bytes: allocated,
      });
    }
    self.ram_limit_bytes = Some(bytes);
    Ok(())
  }

  fn flush_pool_to_disk(&self, progress: &mut dyn ProgressSink) -> Result<(), PoolError> {
    progress.set_progress(1.0);
    Ok(())
  }

  fn memory_allocated(&self) -> u64 {
    self
      .with_state(|state| Ok(state.memory_allocated()))
      .unwrap_or(0)
  }

  fn description(&self) -> String {
    self
      .with_state(|state| {
        Ok(format!(
          "RAM brick pool: {} bricks in {} buffers of {}, {} allocated",
          state.table.live_count(),
          state.num_buffers,
          format_memory_size(state.buffer_bytes()),
          format_memory_size(state.memory_allocated()),
        ))
      })
      .unwrap_or_else(|_| "RAM brick pool (not initialized)".to_string())
  }

  fn persist(&self, dir: &Path) -> Result<PoolDescriptor, PoolError> {
    let ram_limit_bytes = self.ram_limit_bytes;
    let buffer_bytes = self.buffer_bytes;
    self.with_state(|state| {
      let mut files = Vec::with_capacity(state.num_buffers);
      for buffer in 0..state.num_buffers {
        let name = format!("{RAM_BUFFER_PREFIX}{buffer}.raw");
        let path = dir.join(&name);
        let file = File::create(&path).map_err(|e| PoolError::io(&path, e))?;
        let mut writer = BufWriter::new(file);
        let first = buffer * state.slots_per_buffer;
        for slot in first..first + state.slots_per_buffer {
          let brick = state.bricks.get(slot).cloned().flatten();
          let data = brick.as_deref().unwrap_or(&state.zero[..]);
          writer
            .write_all(bytemuck::cast_slice(data))
            .map_err(|e| PoolError::io(&path, e))?;
        }
        writer.flush().map_err(|e| PoolError::io(&path, e))?;
        files.push(name);
      }

      Ok(PoolDescriptor::Ram(RamPoolDescriptor {
        buffer_bytes,
        brick_bytes: state.brick_bytes as u64,
        slot_count: state.table.len() as u64,
        ram_limit_bytes,
        files,
        generations: state.table.sparse_generations(),
        free_slots: state.table.free_slots().to_vec(),
      }))
    })
  }
}

#[cfg(test)]
#[path = "ram_test.rs"]
mod ram_test;
