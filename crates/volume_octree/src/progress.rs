//! Progress reporting for long-running operations.
//!
//! Construction and pool flushing report a fraction in `[0, 1]`. Values are
//! clamped and never move backwards, so a sink can forward them directly to a
//! UI or a log without extra bookkeeping.

use crossbeam_channel::{Receiver, Sender};

/// Receives the progress of a running operation.
pub trait ProgressSink {
  /// Report progress in `[0, 1]`. Lower values than the current one are ignored.
  fn set_progress(&mut self, progress: f32);

  /// Last reported progress.
  fn progress(&self) -> f32;
}

#[inline]
fn advance(current: f32, progress: f32) -> f32 {
  let progress = if progress.is_nan() { current } else { progress.clamp(0.0, 1.0) };
  current.max(progress)
}

/// Discards all reports.
#[derive(Debug, Default)]
pub struct NoProgress {
  current: f32,
}

impl ProgressSink for NoProgress {
  fn set_progress(&mut self, progress: f32) {
    self.current = advance(self.current, progress);
  }

  fn progress(&self) -> f32 {
    self.current
  }
}

/// Forwards each change to a closure.
pub struct FnProgress<F: FnMut(f32)> {
  callback: F,
  current: f32,
}

impl<F: FnMut(f32)> FnProgress<F> {
  pub fn new(callback: F) -> Self {
    Self {
      callback,
      current: 0.0,
    }
  }
}

impl<F: FnMut(f32)> ProgressSink for FnProgress<F> {
  fn set_progress(&mut self, progress: f32) {
    let next = advance(self.current, progress);
    if next > self.current || (next == 0.0 && self.current == 0.0) {
      self.current = next;
      (self.callback)(next);
    }
  }

  fn progress(&self) -> f32 {
    self.current
  }
}

/// Sends each change over a channel, for consumers on another thread.
///
/// Send failures (receiver dropped) are ignored.
#[derive(Debug)]
pub struct ChannelProgress {
  sender: Sender<f32>,
  current: f32,
}

impl ChannelProgress {
  pub fn channel() -> (Self, Receiver<f32>) {
    let (sender, receiver) = crossbeam_channel::unbounded();
    (
      Self {
        sender,
        current: 0.0,
      },
      receiver,
    )
  }
}

impl ProgressSink for ChannelProgress {
  fn set_progress(&mut self, progress: f32) {
    let next = advance(self.current, progress);
    if next > self.current {
      self.current = next;
      let _ = self.sender.send(next);
    }
  }

  fn progress(&self) -> f32 {
    self.current
  }
}

/// Maps `[0, 1]` onto `[start, end]` of a parent sink.
pub struct SubRange<'a> {
  parent: &'a mut dyn ProgressSink,
  start: f32,
  end: f32,
}

impl<'a> SubRange<'a> {
  pub fn new(parent: &'a mut dyn ProgressSink, start: f32, end: f32) -> Self {
    let start = start.clamp(0.0, 1.0);
    let end = end.clamp(start, 1.0);
    Self { parent, start, end }
  }
}

impl ProgressSink for SubRange<'_> {
  fn set_progress(&mut self, progress: f32) {
    let local = progress.clamp(0.0, 1.0);
    self
      .parent
      .set_progress(self.start + (self.end - self.start) * local);
  }

  fn progress(&self) -> f32 {
    let span = self.end - self.start;
    if span <= 0.0 {
      1.0
    } else {
      ((self.parent.progress() - self.start) / span).clamp(0.0, 1.0)
    }
  }
}
