//! Group commit.
//!
//! A single task collects write outcomes in whatever order the writers
//! finish them. A batch is committed with one `sync` only when its ids form
//! an unbroken run starting right after the last committed id; otherwise it
//! keeps accumulating until the missing ids arrive.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Notify};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use super::writer::{Notifier, WriteOutcome};
use super::HaltFlag;
use crate::config::{FailurePolicy, TapeOptions};
use crate::error::{Error, Result};
use crate::storage::Storage;
use crate::watermark::{CommitState, Watermark};

/// A completed write waiting for a covering sync.
pub(crate) struct Pending {
  pub id: u64,
  pub offset: u64,
  /// None for a failed write kept only as a contiguity placeholder.
  notifier: Option<Notifier>,
}

impl Pending {
  fn resolve(self, result: Result<Watermark>) {
    if let Some(notifier) = self.notifier {
      // The caller may have stopped waiting.
      let _ = notifier.send(result);
    }
  }
}

/// Completions collected since the last commit.
pub(crate) struct PendingBatch {
  entries: Vec<Pending>,
  min_id: Option<u64>,
  max: Option<Watermark>,
}

impl PendingBatch {
  pub fn with_capacity(capacity: usize) -> Self {
    Self {
      entries: Vec::with_capacity(capacity),
      min_id: None,
      max: None,
    }
  }

  pub fn push(&mut self, id: u64, offset: u64, notifier: Option<Notifier>) {
    if self.min_id.map_or(true, |min| id < min) {
      self.min_id = Some(id);
    }
    if self.max.map_or(true, |max| id > max.id) {
      self.max = Some(Watermark { id, offset });
    }
    self.entries.push(Pending { id, offset, notifier });
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// True iff the buffered ids are exactly `last_committed_id + 1 ..= max`.
  /// Independent of arrival order.
  pub fn is_ready(&self, last_committed_id: u64) -> bool {
    match (self.min_id, self.max) {
      (Some(min), Some(max)) => min == last_committed_id + 1 && max.id - min + 1 == self.entries.len() as u64,
      _ => false,
    }
  }

  /// Empties the batch, returning the highest entry and everything buffered.
  pub fn take(&mut self) -> Option<(Watermark, Vec<Pending>)> {
    let max = self.max.take()?;
    self.min_id = None;
    Some((max, std::mem::take(&mut self.entries)))
  }

  /// Removes every entry with `id >= from_id`.
  pub fn split_from(&mut self, from_id: u64) -> Vec<Pending> {
    let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
      .into_iter()
      .partition(|entry| entry.id >= from_id);

    self.min_id = None;
    self.max = None;
    for entry in kept {
      self.push(entry.id, entry.offset, entry.notifier);
    }
    removed
  }
}

/// The single owner of the commit watermark and of every `sync` call.
pub(crate) struct Aggregator {
  storage: Arc<dyn Storage>,
  results: mpsc::Receiver<WriteOutcome>,
  commits: watch::Sender<CommitState>,
  halt: Arc<HaltFlag>,
  wake: Arc<Notify>,
  max_group_commit: usize,
  flush_interval: Duration,
  policy: FailurePolicy,
  batch: PendingBatch,
  last: Watermark,
}

impl Aggregator {
  pub fn new(
    storage: Arc<dyn Storage>,
    results: mpsc::Receiver<WriteOutcome>,
    commits: watch::Sender<CommitState>,
    halt: Arc<HaltFlag>,
    wake: Arc<Notify>,
    options: &TapeOptions,
  ) -> Self {
    Self {
      storage,
      results,
      commits,
      halt,
      wake,
      max_group_commit: options.max_group_commit,
      flush_interval: options.flush_interval,
      policy: options.on_write_failure,
      batch: PendingBatch::with_capacity(options.max_group_commit.min(65_536)),
      last: Watermark::default(),
    }
  }

  /// Runs until every writer has exited and the result queue is drained.
  pub async fn run(mut self) {
    info!(
      target: "microtape",
      max_group_commit = self.max_group_commit,
      flush_interval_ms = self.flush_interval.as_millis() as u64,
      policy = ?self.policy,
      "Aggregator started"
    );

    // First tick one full period from now, not immediately.
    let mut ticker = interval_at(Instant::now() + self.flush_interval, self.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
      let open = self.collect(&mut ticker).await;
      self.try_commit().await;
      if !open {
        break;
      }
    }

    if !self.batch.is_empty() {
      warn!(
        target: "microtape",
        abandoned = self.batch.len(),
        last_committed = self.last.id,
        "Shutting down with writes that never became contiguous"
      );
    }
    info!(target: "microtape", last_committed = self.last.id, "Aggregator stopped");
  }

  /// Buffers outcomes until the batch is full, the timer fires, a commit is
  /// requested, or the queue closes. Returns false on close.
  async fn collect(&mut self, ticker: &mut Interval) -> bool {
    loop {
      tokio::select! {
        outcome = self.results.recv() => match outcome {
          Some(outcome) => {
            self.accept(outcome);
            if self.batch.len() >= self.max_group_commit {
              return true;
            }
          }
          None => return false,
        },
        _ = ticker.tick() => return true,
        _ = self.wake.notified() => return true,
      }
    }
  }

  fn accept(&mut self, outcome: WriteOutcome) {
    let WriteOutcome {
      id,
      offset,
      notifier,
      result,
    } = outcome;

    if let Some(from_id) = self.halt.get() {
      if id >= from_id {
        let _ = notifier.send(Err(Error::Halted { from_id }));
        return;
      }
    }

    match result {
      Ok(()) => self.batch.push(id, offset, Some(notifier)),
      Err(source) => {
        error!(target: "microtape", id, offset, error = %source, policy = ?self.policy, "Write failed");
        let _ = notifier.send(Err(Error::WriteFailed { id, source }));
        match self.policy {
          FailurePolicy::SkipFailed => self.batch.push(id, offset, None),
          FailurePolicy::Halt => self.halt_from(id),
        }
      }
    }
  }

  async fn try_commit(&mut self) {
    if !self.batch.is_ready(self.last.id) {
      if !self.batch.is_empty() {
        trace!(
          target: "microtape",
          pending = self.batch.len(),
          last_committed = self.last.id,
          "Pending writes are not contiguous yet"
        );
      }
      return;
    }
    let Some((watermark, entries)) = self.batch.take() else {
      return;
    };

    let storage = Arc::clone(&self.storage);
    let synced = match tokio::task::spawn_blocking(move || storage.sync()).await {
      Ok(result) => result,
      Err(e) => Err(io::Error::new(io::ErrorKind::Other, e)),
    };

    match synced {
      Ok(()) => {
        debug!(
          target: "microtape",
          width = entries.len(),
          id = watermark.id,
          offset = watermark.offset,
          "Group commit"
        );
        self.last = watermark;
        self.commits.send_modify(|state| state.watermark = watermark);
        for entry in entries {
          entry.resolve(Ok(watermark));
        }
      }
      Err(e) => {
        let source = Arc::new(e);
        error!(
          target: "microtape",
          width = entries.len(),
          up_to = watermark.id,
          error = %source,
          "Sync failed, failing the whole group"
        );
        for entry in entries {
          let id = entry.id;
          entry.resolve(Err(Error::SyncFailed {
            id,
            source: Arc::clone(&source),
          }));
        }
        self.halt_from(self.last.id + 1);
      }
    }
  }

  /// Stops committing at `from_id`: buffered entries at or above it fail
  /// now, later arrivals fail in `accept`.
  fn halt_from(&mut self, from_id: u64) {
    let from_id = self.halt.raise(from_id);
    error!(target: "microtape", from_id, last_committed = self.last.id, "Tape halted");

    for entry in self.batch.split_from(from_id) {
      entry.resolve(Err(Error::Halted { from_id }));
    }
    self.commits.send_modify(|state| state.halted_from = Some(from_id));
  }
}
