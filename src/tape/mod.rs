mod aggregator;
mod sequencer;
mod writer;

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::TapeOptions;
use crate::error::{Error, Result};
use crate::frame::BLOCK_SIZE;
use crate::storage::{LogFile, Storage};
use crate::util;
use crate::watermark::{CommitState, CommitWatcher, Watermark};

use aggregator::Aggregator;
use sequencer::{Cursor, Sequencer};
use writer::WriterPool;

pub use sequencer::WriteHandle;

/// First id that can no longer commit, shared between the aggregator (which
/// raises it) and the sequencer (which refuses new work once it is set).
/// Zero means running.
pub(crate) struct HaltFlag(AtomicU64);

impl HaltFlag {
  pub fn new() -> Self {
    Self(AtomicU64::new(0))
  }

  pub fn get(&self) -> Option<u64> {
    match self.0.load(Ordering::Acquire) {
      0 => None,
      from_id => Some(from_id),
    }
  }

  /// Lowers the halt point to `from_id` and returns the effective value.
  pub fn raise(&self, from_id: u64) -> u64 {
    let _ = self.0.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
      (current == 0 || from_id < current).then_some(from_id)
    });
    self.0.load(Ordering::Acquire)
  }
}

struct Tasks {
  aggregator: JoinHandle<()>,
  writers: WriterPool,
}

struct TapeState {
  options: TapeOptions,
  sequencer: Mutex<Sequencer>,
  commits: watch::Receiver<CommitState>,
  wake: Arc<Notify>,
  /// Held for the whole shutdown, so every `close` caller waits for it.
  tasks: Mutex<Option<Tasks>>,
}

/// A group-committing append log.
///
/// Cloneable; every clone submits into the same sequence. Must be opened
/// from within a tokio runtime.
#[derive(Clone)]
pub struct Tape {
  inner: Arc<TapeState>,
}

impl Tape {
  /// Opens (or creates) the log file at `options.path` and starts the
  /// writer pool and the aggregator.
  pub async fn open(options: TapeOptions) -> Result<Self> {
    options.validate()?;
    let log = LogFile::open(&options.path)?;
    Self::with_storage(Arc::new(log), options).await
  }

  /// Starts a tape over any `Storage`.
  ///
  /// New frames are appended after the existing content, rounded up to the
  /// block size. Ids always start at 1.
  pub async fn with_storage(storage: Arc<dyn Storage>, options: TapeOptions) -> Result<Self> {
    options.validate()?;

    let existing = storage.size()?;
    let start_offset = util::align_up(existing, BLOCK_SIZE as u64);
    if start_offset != existing {
      warn!(
        target: "microtape",
        existing,
        start_offset,
        "Log length is not block aligned; appending after a zero-filled gap"
      );
    }

    let halt = Arc::new(HaltFlag::new());
    let wake = Arc::new(Notify::new());
    let (jobs_tx, jobs_rx) = mpsc::channel(options.queue_capacity);
    let (results_tx, results_rx) = mpsc::channel(options.queue_capacity);
    let (commits_tx, commits_rx) = watch::channel(CommitState::default());

    let writers = WriterPool::spawn(options.writer_concurrency, Arc::clone(&storage), jobs_rx, results_tx)?;
    let aggregator = Aggregator::new(
      storage,
      results_rx,
      commits_tx,
      Arc::clone(&halt),
      Arc::clone(&wake),
      &options,
    );
    let aggregator = tokio::spawn(aggregator.run());

    info!(
      target: "microtape",
      path = %options.path.display(),
      start_offset,
      writers = options.writer_concurrency,
      "Tape opened"
    );

    Ok(Self {
      inner: Arc::new(TapeState {
        sequencer: Mutex::new(Sequencer::new(Cursor::new(start_offset), jobs_tx, halt)),
        commits: commits_rx,
        wake,
        tasks: Mutex::new(Some(Tasks { aggregator, writers })),
        options,
      }),
    })
  }

  pub fn options(&self) -> &TapeOptions {
    &self.inner.options
  }

  // --- Write Operations ---

  /// Assigns the next id and offset and queues the write.
  ///
  /// Waits while the job queue is full. The returned handle resolves once
  /// the entry is durable.
  pub async fn submit(&self, payload: impl Into<Vec<u8>>) -> Result<WriteHandle> {
    let payload = payload.into();
    self.inner.sequencer.lock().await.submit(payload).await
  }

  /// Submits and waits for durability.
  pub async fn append(&self, payload: impl Into<Vec<u8>>) -> Result<Watermark> {
    self.submit(payload).await?.durable().await
  }

  /// Forces a commit evaluation now instead of at the next timer tick.
  pub fn request_commit(&self) {
    self.inner.wake.notify_one();
  }

  // --- Commit Notifications ---

  /// The most recently committed entry. Id 0 means nothing is committed.
  pub fn watermark(&self) -> Watermark {
    self.inner.commits.borrow().watermark
  }

  pub fn commit_state(&self) -> CommitState {
    *self.inner.commits.borrow()
  }

  pub fn subscribe(&self) -> CommitWatcher {
    CommitWatcher::new(self.inner.commits.clone())
  }

  /// Waits until the watermark covers `id`.
  pub async fn wait_for(&self, id: u64) -> Result<Watermark> {
    self.subscribe().wait_for(id).await
  }

  // --- Lifecycle ---

  /// Stops accepting writes, lets queued writes finish, runs a final commit
  /// evaluation and stops the pipeline. Writes still stuck behind a gap
  /// resolve to `Error::Closed`. Concurrent callers all return once the
  /// shutdown has finished.
  pub async fn close(&self) -> Result<()> {
    self.inner.sequencer.lock().await.close();

    let mut tasks = self.inner.tasks.lock().await;
    let Some(Tasks { aggregator, writers }) = tasks.take() else {
      return Ok(());
    };

    aggregator
      .await
      .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::Other, e)))?;
    tokio::task::spawn_blocking(move || writers.join())
      .await
      .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::Other, e)))?;

    info!(target: "microtape", last_committed = self.watermark().id, "Tape closed");
    Ok(())
  }
}
