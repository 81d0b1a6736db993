//! # Microtape
//!
//! `microtape` is a minimal write-ahead append log with group commit.
//! Callers submit byte payloads and get a handle that resolves only after
//! the payload is durably synced to storage.
//!
//! ## Key Features
//!
//! * **Group Commit**: One `fsync` covers every write completed since the
//!   last one, bounded by a batch size and a flush interval.
//! * **Parallel Writes**: A pool of writers issues positional writes into
//!   disjoint, pre-assigned byte ranges.
//! * **Strict Ordering**: The commit watermark only advances over an
//!   unbroken run of ids, no matter in which order writes complete.
//! * **Tar Framing**: Every entry is a ustar member, so the log file can be
//!   listed or extracted with `tar`.
//! * **Isolated Failures**: Write and sync errors are reported to the
//!   affected callers instead of aborting the process.
//!
//! ## Example
//!
//! ```no_run
//! use microtape::{Tape, TapeOptions};
//!
//! # async fn run() -> microtape::Result<()> {
//! let tape = Tape::open(TapeOptions::new("/var/lib/app/events.tape")).await?;
//!
//! // Fire-and-wait
//! let watermark = tape.append(b"event_1".to_vec()).await?;
//! assert!(watermark.id >= 1);
//!
//! // Submit many, then wait for each
//! let a = tape.submit(b"event_2".to_vec()).await?;
//! let b = tape.submit(b"event_3".to_vec()).await?;
//! a.durable().await?;
//! b.durable().await?;
//!
//! tape.close().await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
pub mod frame;
mod storage;
mod tape;
mod util;
mod watermark;

// Re-exports for the flat public API
pub use config::{FailurePolicy, TapeOptions};
pub use error::{Error, Result};
pub use storage::{LogFile, Storage};
pub use tape::{Tape, WriteHandle};
pub use watermark::{CommitState, CommitWatcher, Watermark};
