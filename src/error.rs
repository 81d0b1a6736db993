use std::io;
use std::sync::Arc;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
  #[error("I/O Error: {0}")]
  Io(#[from] io::Error),

  #[error("Configuration Error: {0}")]
  Config(String),

  #[error("Payload too large: {len} bytes (maximum is {max})")]
  PayloadTooLarge { len: u64, max: u64 },

  #[error("Write failed for entry {id}: {source}")]
  WriteFailed {
    id: u64,
    #[source]
    source: Arc<io::Error>,
  },

  #[error("Sync failed while committing entry {id}: {source}")]
  SyncFailed {
    id: u64,
    #[source]
    source: Arc<io::Error>,
  },

  #[error("Tape halted: entries from id {from_id} onward cannot be committed")]
  Halted { from_id: u64 },

  #[error("Tape closed before the write was committed")]
  Closed,

  #[error("Timed out waiting for entry {id} to become durable")]
  Timeout { id: u64 },

  #[error("Data Corruption: {0}")]
  Corruption(String),

  #[error("Header Checksum Mismatch: expected {expected:o}, got {actual:o}")]
  ChecksumMismatch { expected: u32, actual: u32 },
}
