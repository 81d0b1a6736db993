use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// The byte store a tape writes its frames into.
///
/// Writers call `write_at` concurrently on disjoint ranges; only the
/// aggregator calls `sync`.
pub trait Storage: Send + Sync + 'static {
  /// Writes the whole buffer at `offset`.
  fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<()>;

  /// Makes every previously completed `write_at` durable.
  fn sync(&self) -> io::Result<()>;

  /// Current length of the underlying store in bytes.
  fn size(&self) -> io::Result<u64>;
}

/// A log file on the local filesystem.
pub struct LogFile {
  path: PathBuf,
  file: File,
}

impl LogFile {
  /// Opens the log read/write, creating it if needed. Existing content is
  /// never truncated.
  pub fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref().to_path_buf();
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&path)?;
    Ok(Self { path, file })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl Storage for LogFile {
  #[cfg(unix)]
  fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    self.file.write_all_at(buf, offset)
  }

  #[cfg(windows)]
  fn write_at(&self, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
      match self.file.seek_write(buf, offset) {
        Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "failed to write whole frame")),
        Ok(n) => {
          buf = &buf[n..];
          offset += n as u64;
        }
        Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
        Err(e) => return Err(e),
      }
    }
    Ok(())
  }

  fn sync(&self) -> io::Result<()> {
    self.file.sync_data()
  }

  fn size(&self) -> io::Result<u64> {
    Ok(self.file.metadata()?.len())
  }
}
