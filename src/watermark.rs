//! Commit notifications.
//!
//! The aggregator is the only writer of the commit state. Everyone else
//! observes it through a `CommitWatcher`, which wraps a `tokio::sync::watch`
//! receiver: intermediate watermarks may be coalesced, but the latest one is
//! never missed.

use tokio::sync::watch;

use crate::error::{Error, Result};

/// The most recently committed entry.
///
/// `offset` is the byte offset at which that entry's frame starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Watermark {
  pub id: u64,
  pub offset: u64,
}

/// Snapshot published by the aggregator after every state change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitState {
  pub watermark: Watermark,
  /// Set once the tape halts: ids at or above this will never commit.
  pub halted_from: Option<u64>,
}

impl CommitState {
  /// Whether the fate of `id` is decided by this state.
  fn settles(&self, id: u64) -> bool {
    self.watermark.id >= id || self.halted_from.is_some_and(|from| id >= from)
  }
}

/// Subscription to watermark advances.
#[derive(Clone)]
pub struct CommitWatcher {
  rx: watch::Receiver<CommitState>,
}

impl CommitWatcher {
  pub(crate) fn new(rx: watch::Receiver<CommitState>) -> Self {
    Self { rx }
  }

  /// Returns the latest published state without waiting.
  pub fn current(&self) -> CommitState {
    *self.rx.borrow()
  }

  /// Waits for the next published state.
  pub async fn changed(&mut self) -> Result<CommitState> {
    self.rx.changed().await.map_err(|_| Error::Closed)?;
    Ok(*self.rx.borrow_and_update())
  }

  /// Waits until the watermark reaches `id`.
  ///
  /// Resolves as soon as the commit covering `id` is published. A watermark
  /// past `id` means every id up to it is settled; whether `id` itself
  /// succeeded is reported by its `WriteHandle`. Fails with `Error::Halted`
  /// if the tape halts below `id`.
  pub async fn wait_for(&mut self, id: u64) -> Result<Watermark> {
    let state = *self
      .rx
      .wait_for(|state| state.settles(id))
      .await
      .map_err(|_| Error::Closed)?;

    if state.watermark.id >= id {
      return Ok(state.watermark);
    }
    match state.halted_from {
      Some(from_id) => Err(Error::Halted { from_id }),
      None => Err(Error::Closed),
    }
  }
}
