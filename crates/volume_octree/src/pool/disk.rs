//! Disk-backed brick pool with LRU paging.
//!
//! # Layout
//!
//! ```text
//! slot ──► buffer = slot / slots_per_buffer ──► file  <dir>/<prefix><buffer>
//!          local  = slot % slots_per_buffer ──► byte offset local * brick_bytes
//! ```
//!
//! At most `ram_limit / buffer_bytes` buffers are resident. Paging in a
//! buffer evicts the least recently used resident buffer without pins,
//! writing it back first if it was modified. Guards pin the buffer of their
//! brick for as long as they live.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use web_time::Instant;

use super::{
  BrickAddress, BrickMut, BrickPoolManager, BrickRef, BrickRelease, DiskPoolDescriptor,
  PoolDescriptor, SlotTable,
};
use crate::constants::format_memory_size;
use crate::error::PoolError;
use crate::progress::{NoProgress, ProgressSink};

/// How long a page-in waits for another thread to unpin a buffer.
const PIN_WAIT: Duration = Duration::from_secs(10);

/// Minimum number of buffers that must fit into the RAM limit.
const MIN_RESIDENT_BUFFERS: u64 = 2;

/// Disk pool parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct DiskPoolConfig {
  /// Upper bound for one buffer file; rounded down to whole bricks.
  pub max_buffer_bytes: u64,
  /// Memory available to resident buffers; must hold two buffers.
  pub ram_limit_bytes: u64,
  /// Existing directory for the buffer files.
  pub directory: PathBuf,
  pub file_prefix: String,
}

impl DiskPoolConfig {
  pub const DEFAULT_MAX_BUFFER_BYTES: u64 = 64 << 20;
  pub const DEFAULT_RAM_LIMIT_BYTES: u64 = 1 << 30;
  pub const DEFAULT_FILE_PREFIX: &'static str = "brickbuffer_";

  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      max_buffer_bytes: Self::DEFAULT_MAX_BUFFER_BYTES,
      ram_limit_bytes: Self::DEFAULT_RAM_LIMIT_BYTES,
      directory: directory.into(),
      file_prefix: Self::DEFAULT_FILE_PREFIX.to_string(),
    }
  }

  pub fn with_max_buffer_bytes(mut self, bytes: u64) -> Self {
    self.max_buffer_bytes = bytes;
    self
  }

  pub fn with_ram_limit_bytes(mut self, bytes: u64) -> Self {
    self.ram_limit_bytes = bytes;
    self
  }

  pub fn with_file_prefix(mut self, prefix: impl Into<String>) -> Self {
    self.file_prefix = prefix.into();
    self
  }
}

// =============================================================================
// Buffer state
// =============================================================================

#[derive(Debug)]
struct BufferEntry {
  file: String,
  /// Resident slot data; `None` when paged out. A `None` slot reads as zeros.
  bricks: Option<Vec<Option<Arc<[u16]>>>>,
  pins: usize,
  dirty: bool,
}

impl BufferEntry {
  #[inline]
  fn is_resident(&self) -> bool {
    self.bricks.is_some()
  }
}

#[derive(Debug)]
struct DiskState {
  directory: PathBuf,
  file_prefix: String,
  brick_bytes: usize,
  slots_per_buffer: usize,
  buffer_bytes: u64,
  ram_limit_bytes: u64,
  max_resident: usize,
  table: SlotTable,
  buffers: Vec<BufferEntry>,
  /// Resident buffer indices, least recently used first.
  lru: VecDeque<usize>,
  zero: Arc<[u16]>,
}

type StateGuard<'a> = MutexGuard<'a, Option<DiskState>>;

fn resident_slots(state: &mut DiskState, buffer: usize) -> Result<&mut Vec<Option<Arc<[u16]>>>, PoolError> {
  state.buffers[buffer]
    .bricks
    .as_mut()
    .ok_or_else(|| PoolError::Corrupt(format!("buffer {buffer} is not resident")))
}

impl DiskState {
  fn new(config: &DiskPoolConfig, brick_bytes: usize) -> Result<Self, PoolError> {
    if !config.directory.is_dir() {
      return Err(PoolError::MissingDirectory(config.directory.clone()));
    }
    let directory = config
      .directory
      .canonicalize()
      .map_err(|e| PoolError::io(&config.directory, e))?;

    let slots_per_buffer = (config.max_buffer_bytes / brick_bytes.max(1) as u64) as usize;
    if brick_bytes == 0 || brick_bytes % 2 != 0 || slots_per_buffer == 0 {
      return Err(PoolError::BufferTooSmall {
        buffer_bytes: config.max_buffer_bytes,
        brick_bytes: brick_bytes as u64,
      });
    }
    let buffer_bytes = (slots_per_buffer * brick_bytes) as u64;
    let max_resident = check_ram_limit(config.ram_limit_bytes, buffer_bytes)?;

    Ok(Self {
      directory,
      file_prefix: config.file_prefix.clone(),
      brick_bytes,
      slots_per_buffer,
      buffer_bytes,
      ram_limit_bytes: config.ram_limit_bytes,
      max_resident,
      table: SlotTable::default(),
      buffers: Vec::new(),
      lru: VecDeque::new(),
      zero: Arc::from(vec![0u16; brick_bytes / 2]),
    })
  }

  #[inline]
  fn brick_samples(&self) -> usize {
    self.brick_bytes / 2
  }

  #[inline]
  fn locate(&self, slot: usize) -> (usize, usize) {
    (slot / self.slots_per_buffer, slot % self.slots_per_buffer)
  }

  fn path(&self, buffer: usize) -> PathBuf {
    self.directory.join(&self.buffers[buffer].file)
  }

  fn touch(&mut self, buffer: usize) {
    if let Some(position) = self.lru.iter().position(|&b| b == buffer) {
      self.lru.remove(position);
    }
    self.lru.push_back(buffer);
  }

  /// Evict until another buffer fits. Returns `false` if every resident
  /// buffer is pinned.
  fn make_room(&mut self) -> Result<bool, PoolError> {
    while self.lru.len() >= self.max_resident {
      let Some(position) = self.lru.iter().position(|&b| self.buffers[b].pins == 0) else {
        return Ok(false);
      };
      let victim = self.lru[position];
      if self.buffers[victim].dirty {
        self.save(victim)?;
      }
      #[cfg(feature = "tracing")]
      tracing::debug!(buffer = victim, "disk pool: evict");
      self.buffers[victim].bricks = None;
      self.lru.remove(position);
    }
    Ok(true)
  }

  fn save(&mut self, buffer: usize) -> Result<(), PoolError> {
    let path = self.path(buffer);
    let Some(bricks) = self.buffers[buffer].bricks.as_ref() else {
      return Ok(());
    };
    let file = File::create(&path).map_err(|e| PoolError::io(&path, e))?;
    let mut writer = BufWriter::new(file);
    for brick in bricks {
      let data = brick.as_deref().unwrap_or(&self.zero[..]);
      writer
        .write_all(bytemuck::cast_slice(data))
        .map_err(|e| PoolError::io(&path, e))?;
    }
    writer.flush().map_err(|e| PoolError::io(&path, e))?;
    self.buffers[buffer].dirty = false;
    Ok(())
  }

  /// Read a buffer file; the caller made room.
  fn load(&mut self, buffer: usize) -> Result<(), PoolError> {
    let path = self.path(buffer);
    if !path.is_file() {
      return Err(PoolError::MissingFile(path));
    }
    let bytes = std::fs::read(&path).map_err(|e| PoolError::io(&path, e))?;
    if bytes.len() as u64 != self.buffer_bytes {
      return Err(PoolError::Corrupt(format!(
        "{} has {} bytes, expected {}",
        path.display(),
        bytes.len(),
        self.buffer_bytes
      )));
    }
    let words: Vec<u16> = bytemuck::pod_collect_to_vec(&bytes);
    let bricks = words
      .chunks_exact(self.brick_samples())
      .map(|brick| Some(Arc::from(brick)))
      .collect();
    #[cfg(feature = "tracing")]
    tracing::debug!(buffer, "disk pool: load");
    self.buffers[buffer].bricks = Some(bricks);
    self.buffers[buffer].dirty = false;
    self.lru.push_back(buffer);
    Ok(())
  }

  fn flush(&mut self, progress: &mut dyn ProgressSink) -> Result<(), PoolError> {
    let dirty: Vec<usize> = (0..self.buffers.len())
      .filter(|&b| self.buffers[b].dirty && self.buffers[b].is_resident())
      .collect();
    for (done, &buffer) in dirty.iter().enumerate() {
      self.save(buffer)?;
      progress.set_progress((done + 1) as f32 / dirty.len() as f32);
    }
    progress.set_progress(1.0);
    Ok(())
  }

  fn memory_allocated(&self) -> u64 {
    self.buffers.len() as u64 * self.buffer_bytes
  }
}

fn check_ram_limit(ram_limit_bytes: u64, buffer_bytes: u64) -> Result<usize, PoolError> {
  let required = MIN_RESIDENT_BUFFERS * buffer_bytes;
  if ram_limit_bytes < required {
    return Err(PoolError::RamLimitTooSmall {
      limit_bytes: ram_limit_bytes,
      required_bytes: required,
    });
  }
  Ok((ram_limit_bytes / buffer_bytes) as usize)
}

// =============================================================================
// Pool
// =============================================================================

/// Brick pool whose buffers live in files and are paged under a RAM limit.
#[derive(Debug)]
pub struct DiskBrickPool {
  config: DiskPoolConfig,
  state: Mutex<Option<DiskState>>,
  unpinned: Condvar,
}

impl DiskBrickPool {
  pub fn new(config: DiskPoolConfig) -> Self {
    Self {
      config,
      state: Mutex::new(None),
      unpinned: Condvar::new(),
    }
  }

  pub fn config(&self) -> &DiskPoolConfig {
    &self.config
  }

  /// Reopen a pool from its descriptor; no buffer is resident afterwards.
  pub fn restore(
    descriptor: &DiskPoolDescriptor,
    directory: PathBuf,
    ram_limit_bytes: Option<u64>,
  ) -> Result<Self, PoolError> {
    let config = DiskPoolConfig {
      max_buffer_bytes: descriptor.max_buffer_bytes,
      ram_limit_bytes: ram_limit_bytes.unwrap_or(descriptor.ram_limit_bytes),
      directory,
      file_prefix: descriptor.file_prefix.clone(),
    };
    let mut state = DiskState::new(&config, descriptor.brick_bytes as usize)?;
    if state.buffer_bytes != descriptor.buffer_bytes {
      return Err(PoolError::Corrupt(format!(
        "buffer size {} does not match the recorded {}",
        state.buffer_bytes, descriptor.buffer_bytes
      )));
    }
    let slot_count = descriptor.slot_count as usize;
    if slot_count > descriptor.files.len() * state.slots_per_buffer {
      return Err(PoolError::Corrupt(format!(
        "{} slots do not fit into {} buffers",
        slot_count,
        descriptor.files.len()
      )));
    }
    for file in &descriptor.files {
      let path = state.directory.join(file);
      let len = std::fs::metadata(&path)
        .map_err(|_| PoolError::MissingFile(path.clone()))?
        .len();
      if len != state.buffer_bytes {
        return Err(PoolError::Corrupt(format!(
          "{} has {} bytes, expected {}",
          path.display(),
          len,
          state.buffer_bytes
        )));
      }
      state.buffers.push(BufferEntry {
        file: file.clone(),
        bricks: None,
        pins: 0,
        dirty: false,
      });
    }
    state.table = SlotTable::restore(slot_count, &descriptor.generations, &descriptor.free_slots)?;

    Ok(Self {
      config,
      state: Mutex::new(Some(state)),
      unpinned: Condvar::new(),
    })
  }

  fn lock(&self) -> Result<StateGuard<'_>, PoolError> {
    self.state.lock().map_err(|_| PoolError::Poisoned)
  }

  fn wait_for_unpin<'g>(
    &'g self,
    guard: StateGuard<'g>,
    deadline: Instant,
  ) -> Result<StateGuard<'g>, PoolError> {
    let now = Instant::now();
    if now >= deadline {
      return Err(PoolError::AllBuffersPinned);
    }
    let (guard, _) = self
      .unpinned
      .wait_timeout(guard, deadline - now)
      .map_err(|_| PoolError::Poisoned)?;
    Ok(guard)
  }

  /// Make `buffer` resident and most recently used.
  fn page_in<'g>(&'g self, mut guard: StateGuard<'g>, buffer: usize) -> Result<StateGuard<'g>, PoolError> {
    let deadline = Instant::now() + PIN_WAIT;
    loop {
      let state = guard.as_mut().ok_or(PoolError::NotInitialized)?;
      if state.buffers[buffer].is_resident() {
        state.touch(buffer);
        return Ok(guard);
      }
      if state.make_room()? {
        state.load(buffer)?;
        return Ok(guard);
      }
      guard = self.wait_for_unpin(guard, deadline)?;
    }
  }

  /// Append a new resident buffer and hand out its first slot.
  fn grow<'g>(&'g self, mut guard: StateGuard<'g>) -> Result<BrickAddress, PoolError> {
    let deadline = Instant::now() + PIN_WAIT;
    loop {
      let state = guard.as_mut().ok_or(PoolError::NotInitialized)?;
      if state.make_room()? {
        let index = state.buffers.len();
        state.buffers.push(BufferEntry {
          file: format!("{}{}", state.file_prefix, index),
          bricks: Some(vec![None; state.slots_per_buffer]),
          pins: 0,
          dirty: true,
        });
        state.lru.push_back(index);
        #[cfg(feature = "tracing")]
        tracing::debug!(buffer = index, "disk pool: new buffer");
        return Ok(state.table.push_fresh());
      }
      guard = self.wait_for_unpin(guard, deadline)?;
    }
  }

  /// Validate, page in and pin the buffer of `address`.
  fn acquire(&self, address: BrickAddress) -> Result<(StateGuard<'_>, usize, usize), PoolError> {
    let guard = self.lock()?;
    let state = guard.as_ref().ok_or(PoolError::NotInitialized)?;
    let slot = state.table.validate(address)?;
    let (buffer, local) = state.locate(slot);
    let mut guard = self.page_in(guard, buffer)?;
    if let Some(state) = guard.as_mut() {
      state.buffers[buffer].pins += 1;
    }
    Ok((guard, buffer, local))
  }
}

impl BrickPoolManager for DiskBrickPool {
  fn initialize(&mut self, brick_bytes: usize) -> Result<(), PoolError> {
    let state = DiskState::new(&self.config, brick_bytes)?;
    #[cfg(feature = "tracing")]
    tracing::debug!(
      directory = %state.directory.display(),
      buffer_bytes = state.buffer_bytes,
      max_resident = state.max_resident,
      "disk pool: initialize"
    );
    *self.state.get_mut().map_err(|_| PoolError::Poisoned)? = Some(state);
    Ok(())
  }

  fn deinitialize(&mut self) {
    if let Ok(slot) = self.state.get_mut() {
      if let Some(state) = slot.as_mut() {
        if let Err(err) = state.flush(&mut NoProgress::default()) {
          #[cfg(feature = "tracing")]
          tracing::warn!(%err, "disk pool: dirty buffers lost on deinitialize");
          #[cfg(not(feature = "tracing"))]
          let _ = err;
        }
      }
      *slot = None;
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
    let mut guard = self.lock()?;
    let state = guard.as_mut().ok_or(PoolError::NotInitialized)?;
    if state.table.len() < state.buffers.len() * state.slots_per_buffer {
      return Ok(state.table.push_fresh());
    }
    if let Some(address) = state.table.take_free() {
      return Ok(address);
    }
    self.grow(guard)
  }

  fn delete_brick(&self, address: BrickAddress) -> Result<(), PoolError> {
    let guard = self.lock()?;
    let state = guard.as_ref().ok_or(PoolError::NotInitialized)?;
    let slot = state.table.validate(address)?;
    let (buffer, local) = state.locate(slot);

    // Freed slots must read as zeros once reused.
    let mut guard = self.page_in(guard, buffer)?;
    let state = guard.as_mut().ok_or(PoolError::NotInitialized)?;
    state.table.release(address)?;
    resident_slots(state, buffer)?[local] = None;
    state.buffers[buffer].dirty = true;
    Ok(())
  }

  fn get_brick(&self, address: BrickAddress) -> Result<BrickRef<'_>, PoolError> {
    let (mut guard, buffer, local) = self.acquire(address)?;
    let state = guard.as_mut().ok_or(PoolError::NotInitialized)?;
    let zero = state.zero.clone();
    let data = resident_slots(state, buffer)?[local].clone().unwrap_or(zero);
    drop(guard);
    Ok(BrickRef::new(self, address, data))
  }

  fn get_writable_brick(&self, address: BrickAddress) -> Result<BrickMut<'_>, PoolError> {
    let (mut guard, buffer, local) = self.acquire(address)?;
    let state = guard.as_mut().ok_or(PoolError::NotInitialized)?;
    let samples = state.brick_samples();
    let data = match &resident_slots(state, buffer)?[local] {
      Some(brick) => brick.to_vec(),
      None => vec![0; samples],
    };
    drop(guard);
    Ok(BrickMut::new(self, address, data))
  }

  fn release_brick(&self, address: BrickAddress, release: BrickRelease) {
    let Ok(mut guard) = self.lock() else {
      return;
    };
    let Some(state) = guard.as_mut() else {
      return;
    };
    let (buffer, local) = state.locate(address.slot() as usize);
    if buffer >= state.buffers.len() {
      return;
    }
    if let BrickRelease::Write(data) = release {
      let valid = state.table.validate(address).is_ok() && data.len() == state.brick_samples();
      if valid {
        if let Some(bricks) = state.buffers[buffer].bricks.as_mut() {
          bricks[local] = Some(data);
          state.buffers[buffer].dirty = true;
        }
      }
    }
    let entry = &mut state.buffers[buffer];
    entry.pins = entry.pins.saturating_sub(1);
    drop(guard);
    self.unpinned.notify_all();
  }

  fn is_brick_in_ram(&self, address: BrickAddress) -> bool {
    let Ok(guard) = self.lock() else {
      return false;
    };
    guard.as_ref().is_some_and(|state| {
      state
        .table
        .validate(address)
        .is_ok_and(|slot| state.buffers[state.locate(slot).0].is_resident())
    })
  }

  fn contains_brick(&self, address: BrickAddress) -> bool {
    let Ok(guard) = self.lock() else {
      return false;
    };
    guard
      .as_ref()
      .is_some_and(|state| state.table.validate(address).is_ok())
  }

  fn set_ram_limit(&mut self, bytes: u64) -> Result<(), PoolError> {
    let slot = self.state.get_mut().map_err(|_| PoolError::Poisoned)?;
    if let Some(state) = slot.as_mut() {
      let max_resident = check_ram_limit(bytes, state.buffer_bytes)?;
      if bytes != state.ram_limit_bytes {
        state.flush(&mut NoProgress::default())?;
        for entry in &mut state.buffers {
          entry.bricks = None;
          entry.pins = 0;
        }
        state.lru.clear();
        state.ram_limit_bytes = bytes;
        state.max_resident = max_resident;
      }
    }
    self.config.ram_limit_bytes = bytes;
    Ok(())
  }

  #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, name = "pool::flush"))]
  fn flush_pool_to_disk(&self, progress: &mut dyn ProgressSink) -> Result<(), PoolError> {
    let mut guard = self.lock()?;
    let state = guard.as_mut().ok_or(PoolError::NotInitialized)?;
    state.flush(progress)
  }

  fn memory_allocated(&self) -> u64 {
    self
      .lock()
      .ok()
      .and_then(|guard| guard.as_ref().map(DiskState::memory_allocated))
      .unwrap_or(0)
  }

  fn description(&self) -> String {
    let Ok(guard) = self.lock() else {
      return "Disk brick pool (unavailable)".to_string();
    };
    match guard.as_ref() {
      Some(state) => format!(
        "Disk brick pool at {}: {} bricks in {} buffers of {}, {} resident (RAM limit {})",
        state.directory.display(),
        state.table.live_count(),
        state.buffers.len(),
        format_memory_size(state.buffer_bytes),
        state.lru.len(),
        format_memory_size(state.ram_limit_bytes),
      ),
      None => "Disk brick pool (not initialized)".to_string(),
    }
  }

  fn persist(&self, _dir: &Path) -> Result<PoolDescriptor, PoolError> {
    let mut guard = self.lock()?;
    let state = guard.as_mut().ok_or(PoolError::NotInitialized)?;
    state.flush(&mut NoProgress::default())?;

    Ok(PoolDescriptor::Disk(DiskPoolDescriptor {
      max_buffer_bytes: self.config.max_buffer_bytes,
      buffer_bytes: state.buffer_bytes,
      brick_bytes: state.brick_bytes as u64,
      ram_limit_bytes: state.ram_limit_bytes,
      directory: state.directory.clone(),
      file_prefix: state.file_prefix.clone(),
      files: state.buffers.iter().map(|b| b.file.clone()).collect(),
      slot_count: state.table.len() as u64,
      generations: state.table.sparse_generations(),
      free_slots: state.table.free_slots().to_vec(),
    }))
  }
}

#[cfg(test)]
#[path = "disk_test.rs"]
mod disk_test;
