use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use super::writer::WriteJob;
use super::HaltFlag;
use crate::error::{Error, Result};
use crate::frame::{self, MAX_PAYLOAD_LEN};
use crate::watermark::Watermark;

/// Running position of the tape: the next id to hand out and the byte
/// offset its frame will start at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Cursor {
  pub next_id: u64,
  pub next_offset: u64,
}

impl Cursor {
  /// Ids start at 1; id 0 is the "nothing committed yet" watermark.
  pub fn new(start_offset: u64) -> Self {
    Self {
      next_id: 1,
      next_offset: start_offset,
    }
  }

  pub fn advance(&mut self, frame_len: u64) {
    self.next_id += 1;
    self.next_offset += frame_len;
  }
}

/// Assigns ids and offsets and hands jobs to the writer pool.
///
/// Lives behind an async mutex in `Tape`, so assignment and enqueue happen
/// as one step and the job queue sees ids in order.
pub(crate) struct Sequencer {
  cursor: Cursor,
  jobs: Option<mpsc::Sender<WriteJob>>,
  halt: Arc<HaltFlag>,
}

impl Sequencer {
  pub fn new(cursor: Cursor, jobs: mpsc::Sender<WriteJob>, halt: Arc<HaltFlag>) -> Self {
    Self {
      cursor,
      jobs: Some(jobs),
      halt,
    }
  }

  #[cfg(test)]
  pub fn cursor(&self) -> Cursor {
    self.cursor
  }

  pub async fn submit(&mut self, payload: Vec<u8>) -> Result<WriteHandle> {
    let len = payload.len() as u64;
    if len > MAX_PAYLOAD_LEN {
      return Err(Error::PayloadTooLarge {
        len,
        max: MAX_PAYLOAD_LEN,
      });
    }
    if let Some(from_id) = self.halt.get() {
      return Err(Error::Halted { from_id });
    }
    let jobs = self.jobs.as_ref().ok_or(Error::Closed)?;

    let id = self.cursor.next_id;
    let offset = self.cursor.next_offset;
    let frame_len = frame::frame_len(payload.len());
    let (notifier, rx) = oneshot::channel();

    // Blocks while the queue is full. The cursor only moves once the job is
    // queued, so a dropped or failed send never leaves a hole in the ids.
    jobs
      .send(WriteJob {
        id,
        offset,
        payload,
        notifier,
      })
      .await
      .map_err(|_| Error::Closed)?;
    self.cursor.advance(frame_len);

    Ok(WriteHandle {
      id,
      offset,
      frame_len,
      rx,
    })
  }

  /// Stops accepting work. Writers exit once the queue drains.
  pub fn close(&mut self) {
    self.jobs = None;
  }
}

/// Returned by `Tape::submit`. Resolves once the entry is durable.
#[must_use = "a write is only acknowledged by awaiting its handle"]
pub struct WriteHandle {
  id: u64,
  offset: u64,
  frame_len: u64,
  rx: oneshot::Receiver<Result<Watermark>>,
}

impl WriteHandle {
  pub fn id(&self) -> u64 {
    self.id
  }

  /// Byte offset of this entry's header in the log file.
  pub fn offset(&self) -> u64 {
    self.offset
  }

  /// Header, payload and padding length on disk.
  pub fn frame_len(&self) -> u64 {
    self.frame_len
  }

  /// Waits until a sync covering this entry has succeeded and returns the
  /// watermark of that commit.
  pub async fn durable(self) -> Result<Watermark> {
    self.rx.await.map_err(|_| Error::Closed)?
  }

  /// Like `durable`, but gives up after `limit`.
  pub async fn durable_within(self, limit: Duration) -> Result<Watermark> {
    let id = self.id;
    tokio::time::timeout(limit, self.durable())
      .await
      .map_err(|_| Error::Timeout { id })?
  }
}

impl fmt::Debug for WriteHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WriteHandle")
      .field("id", &self.id)
      .field("offset", &self.offset)
      .field("frame_len", &self.frame_len)
      .finish_non_exhaustive()
  }
}
