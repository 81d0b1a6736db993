use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, trace, warn};

use crate::error::Result;
use crate::frame;
use crate::storage::Storage;
use crate::util;
use crate::watermark::Watermark;

/// Resolves a submitter's `WriteHandle`. Consumed on use, so it fires at
/// most once.
pub(crate) type Notifier = oneshot::Sender<Result<Watermark>>;

/// A sequenced write waiting for a writer.
pub(crate) struct WriteJob {
  pub id: u64,
  pub offset: u64,
  pub payload: Vec<u8>,
  pub notifier: Notifier,
}

/// What a writer reports back to the aggregator.
pub(crate) struct WriteOutcome {
  pub id: u64,
  pub offset: u64,
  pub notifier: Notifier,
  pub result: std::result::Result<(), Arc<io::Error>>,
}

/// Fixed set of OS threads issuing positional writes.
///
/// Offsets are disjoint by construction, so writers never coordinate on
/// file content; they only share the job queue.
pub(crate) struct WriterPool {
  threads: Vec<JoinHandle<()>>,
}

impl WriterPool {
  pub fn spawn(
    concurrency: usize,
    storage: Arc<dyn Storage>,
    jobs: mpsc::Receiver<WriteJob>,
    results: mpsc::Sender<WriteOutcome>,
  ) -> Result<Self> {
    let jobs = Arc::new(Mutex::new(jobs));
    let mut threads = Vec::with_capacity(concurrency);

    for index in 0..concurrency {
      let storage = Arc::clone(&storage);
      let jobs = Arc::clone(&jobs);
      let results = results.clone();
      let handle = thread::Builder::new()
        .name(format!("microtape-writer-{}", index))
        .spawn(move || run_worker(index, storage, jobs, results))?;
      threads.push(handle);
    }

    Ok(Self { threads })
  }

  pub fn join(self) {
    for handle in self.threads {
      if handle.join().is_err() {
        error!(target: "microtape", "Writer thread panicked");
      }
    }
  }
}

fn run_worker(
  index: usize,
  storage: Arc<dyn Storage>,
  jobs: Arc<Mutex<mpsc::Receiver<WriteJob>>>,
  results: mpsc::Sender<WriteOutcome>,
) {
  trace!(target: "microtape", worker = index, "Writer started");

  loop {
    // The lock is held only while waiting for the next job, never during I/O.
    let job = jobs.lock().blocking_recv();
    let Some(job) = job else { break };

    let result = write_frame(storage.as_ref(), &job).map_err(Arc::new);
    if let Err(e) = &result {
      warn!(target: "microtape", worker = index, id = job.id, offset = job.offset, error = %e, "Positional write failed");
    }

    let outcome = WriteOutcome {
      id: job.id,
      offset: job.offset,
      notifier: job.notifier,
      result,
    };
    if results.blocking_send(outcome).is_err() {
      // Aggregator is gone; the dropped notifier reports `Closed`.
      break;
    }
  }

  trace!(target: "microtape", worker = index, "Writer stopped");
}

fn write_frame(storage: &dyn Storage, job: &WriteJob) -> io::Result<()> {
  let frame = frame::encode_frame(job.id, &job.payload, util::unix_now())
    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
  storage.write_at(&frame, job.offset)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::decode_frame;
  use crate::storage::LogFile;

  #[tokio::test]
  async fn test_pool_writes_every_job_at_its_offset() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pool.tape");
    let storage: Arc<dyn Storage> = Arc::new(LogFile::open(&path).unwrap());

    let (jobs_tx, jobs_rx) = mpsc::channel(16);
    let (results_tx, mut results_rx) = mpsc::channel(16);
    let pool = WriterPool::spawn(4, storage, jobs_rx, results_tx).unwrap();

    let payloads: Vec<Vec<u8>> = (0..10u8).map(|i| vec![i; 100 * i as usize]).collect();
    let mut offset = 0;
    let mut offsets = Vec::new();
    for (i, payload) in payloads.iter().enumerate() {
      let (notifier, _rx) = oneshot::channel();
      offsets.push(offset);
      jobs_tx
        .send(WriteJob {
          id: i as u64 + 1,
          offset,
          payload: payload.clone(),
          notifier,
        })
        .await
        .unwrap();
      offset += frame::frame_len(payload.len());
    }
    drop(jobs_tx);

    let mut seen = Vec::new();
    while let Some(outcome) = results_rx.recv().await {
      assert!(outcome.result.is_ok());
      assert_eq!(outcome.offset, offsets[outcome.id as usize - 1]);
      seen.push(outcome.id);
    }
    seen.sort_unstable();
    assert_eq!(seen, (1..=10).collect::<Vec<_>>());

    tokio::task::spawn_blocking(move || pool.join()).await.unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(bytes.len() as u64, offset);
    for (i, payload) in payloads.iter().enumerate() {
      let (header, decoded) = decode_frame(&bytes[offsets[i] as usize..]).unwrap();
      assert_eq!(header.id, i as u64 + 1);
      assert_eq!(decoded, payload.as_slice());
    }
  }
}
