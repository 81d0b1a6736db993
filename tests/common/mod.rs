#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use microtape::frame::{self, EntryHeader};
use microtape::{LogFile, Storage, Tape, TapeOptions};
use parking_lot::Mutex;
use tempfile::TempDir;

/// A `LogFile` that counts syncs and can be told to fail or stall.
pub struct FaultyStorage {
  inner: LogFile,
  syncs: AtomicUsize,
  fail_next_sync: AtomicBool,
  failing_offsets: Mutex<HashSet<u64>>,
  delayed_offsets: Mutex<HashMap<u64, Duration>>,
}

impl FaultyStorage {
  pub fn open(path: &Path) -> Self {
    Self {
      inner: LogFile::open(path).unwrap(),
      syncs: AtomicUsize::new(0),
      fail_next_sync: AtomicBool::new(false),
      failing_offsets: Mutex::new(HashSet::new()),
      delayed_offsets: Mutex::new(HashMap::new()),
    }
  }

  pub fn sync_count(&self) -> usize {
    self.syncs.load(Ordering::SeqCst)
  }

  pub fn fail_write_at(&self, offset: u64) {
    self.failing_offsets.lock().insert(offset);
  }

  pub fn delay_write_at(&self, offset: u64, delay: Duration) {
    self.delayed_offsets.lock().insert(offset, delay);
  }

  pub fn fail_next_sync(&self) {
    self.fail_next_sync.store(true, Ordering::SeqCst);
  }
}

impl Storage for FaultyStorage {
  fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<()> {
    let delay = self.delayed_offsets.lock().get(&offset).copied();
    if let Some(delay) = delay {
      std::thread::sleep(delay);
    }
    if self.failing_offsets.lock().contains(&offset) {
      return Err(io::Error::new(io::ErrorKind::Other, "injected write failure"));
    }
    self.inner.write_at(buf, offset)
  }

  fn sync(&self) -> io::Result<()> {
    self.syncs.fetch_add(1, Ordering::SeqCst);
    if self.fail_next_sync.swap(false, Ordering::SeqCst) {
      return Err(io::Error::new(io::ErrorKind::Other, "injected sync failure"));
    }
    self.inner.sync()
  }

  fn size(&self) -> io::Result<u64> {
    self.inner.size()
  }
}

pub struct TestEnv {
  pub tape: Tape,
  pub storage: Arc<FaultyStorage>,
  // The TempDir guard must be kept alive to prevent premature deletion of the directory.
  pub _dir: TempDir,
  pub path: PathBuf,
}

impl TestEnv {
  pub async fn new(mut options: TapeOptions) -> Self {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.tape");
    options.path = path.clone();

    let storage = Arc::new(FaultyStorage::open(&path));
    let tape = Tape::with_storage(storage.clone(), options).await.unwrap();

    Self {
      tape,
      storage,
      _dir: dir,
      path,
    }
  }

  pub async fn with_default() -> Self {
    Self::new(TapeOptions::default()).await
  }
}

/// Options that never commit on their own: only a full batch, an explicit
/// `request_commit` or `close` triggers an evaluation.
pub fn manual_options(max_group_commit: usize) -> TapeOptions {
  let mut opts = TapeOptions::default();
  opts.max_group_commit = max_group_commit;
  opts.flush_interval = Duration::from_secs(3600);
  opts
}

/// Options that commit quickly on the timer.
pub fn fast_options() -> TapeOptions {
  let mut opts = TapeOptions::default();
  opts.flush_interval = Duration::from_millis(5);
  opts
}

/// Decodes every frame in the log file, front to back.
pub fn read_frames(path: &Path) -> Vec<(u64, EntryHeader, Vec<u8>)> {
  let bytes = std::fs::read(path).unwrap();
  let mut frames = Vec::new();
  let mut offset = 0usize;
  while offset < bytes.len() {
    let (header, payload) = frame::decode_frame(&bytes[offset..]).unwrap();
    frames.push((offset as u64, header, payload.to_vec()));
    offset += frame::frame_len(payload.len()) as usize;
  }
  assert_eq!(offset, bytes.len(), "log must end on a frame boundary");
  frames
}
