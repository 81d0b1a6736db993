use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::error::{Error, Result};

/// Defines what happens to the rest of the tape when a single positional
/// write fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
  /// The failed id is reported to its requester and then treated as a dead
  /// slot: it still counts toward contiguity, so the watermark can move past
  /// it and later writes keep committing.
  SkipFailed,

  /// The failed id is reported to its requester and the tape stops
  /// committing at that id. Every higher id resolves to `Error::Halted`;
  /// lower ids still commit normally.
  Halt,
}

impl FailurePolicy {
  fn parse(value: &str) -> Option<Self> {
    match value.trim().to_ascii_lowercase().as_str() {
      "skip" | "skip_failed" => Some(FailurePolicy::SkipFailed),
      "halt" | "fail_stop" => Some(FailurePolicy::Halt),
      _ => None,
    }
  }
}

#[derive(Debug, Clone)]
pub struct TapeOptions {
  /// Path of the log file. Created if absent, never truncated.
  pub path: PathBuf,

  // --- Group Commit ---
  /// Number of buffered write completions that forces a commit evaluation.
  /// Default: 10 000.
  pub max_group_commit: usize,

  /// Upper bound on the time between two commit evaluations, bounding the
  /// acknowledgment latency of small batches.
  /// Default: 100 ms.
  pub flush_interval: Duration,

  // --- Resources ---
  /// Number of writer threads issuing positional writes in parallel.
  /// Default: 1.
  pub writer_concurrency: usize,

  /// Capacity of the job queue and of the completion queue. A full job
  /// queue blocks `submit` (backpressure).
  /// Default: 1 000.
  pub queue_capacity: usize,

  // --- Behavior ---
  pub on_write_failure: FailurePolicy,
}

impl Default for TapeOptions {
  fn default() -> Self {
    Self {
      path: PathBuf::from("./microtape.tape"),
      max_group_commit: 10_000,
      flush_interval: Duration::from_millis(100),
      writer_concurrency: 1,
      queue_capacity: 1_000,
      on_write_failure: FailurePolicy::SkipFailed,
    }
  }
}

impl TapeOptions {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      ..Default::default()
    }
  }

  /// Loads options from `MICROTAPE_*` environment variables.
  /// Missing or unparseable values fall back to the defaults.
  pub fn from_env() -> Self {
    let defaults = Self::default();
    Self {
      path: std::env::var("MICROTAPE_PATH")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or(defaults.path),
      max_group_commit: env_parse("MICROTAPE_MAX_GROUP_COMMIT").unwrap_or(defaults.max_group_commit),
      flush_interval: env_parse("MICROTAPE_FLUSH_INTERVAL_MS")
        .map(Duration::from_millis)
        .unwrap_or(defaults.flush_interval),
      writer_concurrency: env_parse("MICROTAPE_WRITER_CONCURRENCY").unwrap_or(defaults.writer_concurrency),
      queue_capacity: env_parse("MICROTAPE_QUEUE_CAPACITY").unwrap_or(defaults.queue_capacity),
      on_write_failure: std::env::var("MICROTAPE_ON_WRITE_FAILURE")
        .ok()
        .and_then(|s| FailurePolicy::parse(&s))
        .unwrap_or(defaults.on_write_failure),
    }
  }

  pub fn validate(&self) -> Result<()> {
    if self.max_group_commit == 0 {
      return Err(Error::Config("max_group_commit must be at least 1".into()));
    }
    if self.flush_interval.is_zero() {
      return Err(Error::Config("flush_interval must be non-zero".into()));
    }
    if self.writer_concurrency == 0 {
      return Err(Error::Config("writer_concurrency must be at least 1".into()));
    }
    if self.queue_capacity == 0 {
      return Err(Error::Config("queue_capacity must be at least 1".into()));
    }
    if self.queue_capacity > Semaphore::MAX_PERMITS {
      return Err(Error::Config(format!(
        "queue_capacity must be at most {}",
        Semaphore::MAX_PERMITS
      )));
    }
    Ok(())
  }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
  std::env::var(key).ok().and_then(|s| s.parse().ok())
}
