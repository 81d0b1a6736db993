//! On-disk framing.
//!
//! Every entry is stored as a ustar archive member so the raw log file can be
//! listed or extracted with ordinary `tar` tooling:
//!
//! ```text
//! [Header: 512][Payload: N][Zero padding to the next 512-byte boundary]
//! ```
//!
//! Header fields used (offsets per the POSIX ustar interchange format):
//!
//! | offset | len | field    | value                          |
//! |--------|-----|----------|--------------------------------|
//! | 0      | 100 | name     | `{id:016}.entry`               |
//! | 100    | 8   | mode     | `0000400`                      |
//! | 108    | 8   | uid      | `0001750`                      |
//! | 116    | 8   | gid      | `0001750`                      |
//! | 124    | 12  | size     | 11 octal digits                |
//! | 136    | 12  | mtime    | 11 octal digits                |
//! | 148    | 8   | chksum   | 6 octal digits, NUL, space     |
//! | 156    | 1   | typeflag | `0` (regular file)             |
//! | 257    | 8   | magic    | `ustar\0` + version `00`       |
//! | 265    | 32  | uname    | `microtape`                    |
//! | 297    | 32  | gname    | `microtape`                    |

use crate::error::{Error, Result};
use crate::util::{entry_filename, format_octal, parse_entry_id, parse_octal};

/// Alignment unit of the archive format.
pub const BLOCK_SIZE: usize = 512;

/// Largest payload the 11-digit octal size field can describe.
pub const MAX_PAYLOAD_LEN: u64 = 0o77777777777;

const NAME: usize = 0;
const MODE: usize = 100;
const UID: usize = 108;
const GID: usize = 116;
const SIZE: usize = 124;
const MTIME: usize = 136;
const CHKSUM: usize = 148;
const CHKSUM_LEN: usize = 8;
const TYPEFLAG: usize = 156;
const MAGIC: usize = 257;
const UNAME: usize = 265;
const GNAME: usize = 297;

const USTAR_MAGIC: &[u8] = b"ustar\x0000";
const OWNER: &[u8] = b"microtape\x00";

/// Decoded view of an entry header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHeader {
  pub id: u64,
  pub size: u64,
  pub mtime: u64,
}

impl EntryHeader {
  pub const SIZE: usize = BLOCK_SIZE;

  /// Renders the 512-byte header block, checksum included.
  pub fn encode(&self) -> Result<[u8; BLOCK_SIZE]> {
    let mut block = [0u8; BLOCK_SIZE];

    put(&mut block, NAME, entry_filename(self.id).as_bytes());
    put(&mut block, MODE, b"0000400\x00");
    put(&mut block, UID, b"0001750\x00");
    put(&mut block, GID, b"0001750\x00");

    let size = format_octal(self.size, 11).ok_or(Error::PayloadTooLarge {
      len: self.size,
      max: MAX_PAYLOAD_LEN,
    })?;
    put(&mut block, SIZE, size.as_bytes());

    let mtime = format_octal(self.mtime, 11)
      .ok_or_else(|| Error::Corruption(format!("mtime {} does not fit the header", self.mtime)))?;
    put(&mut block, MTIME, mtime.as_bytes());

    block[TYPEFLAG] = b'0';
    put(&mut block, MAGIC, USTAR_MAGIC);
    put(&mut block, UNAME, OWNER);
    put(&mut block, GNAME, OWNER);

    let checksum = header_checksum(&block);
    put(&mut block, CHKSUM, format!("{:06o}\x00 ", checksum).as_bytes());

    Ok(block)
  }

  /// Parses and verifies a header block.
  pub fn parse(block: &[u8]) -> Result<Self> {
    if block.len() < BLOCK_SIZE {
      return Err(Error::Corruption(format!("Header block is {} bytes", block.len())));
    }
    let block = &block[..BLOCK_SIZE];

    if &block[MAGIC..MAGIC + USTAR_MAGIC.len()] != USTAR_MAGIC {
      return Err(Error::Corruption("Invalid ustar magic".into()));
    }

    let expected = header_checksum(block);
    let actual = parse_octal(&block[CHKSUM..CHKSUM + CHKSUM_LEN])
      .ok_or_else(|| Error::Corruption("Unreadable checksum field".into()))? as u32;
    if expected != actual {
      return Err(Error::ChecksumMismatch { expected, actual });
    }

    let name_end = block[NAME..MODE].iter().position(|&b| b == 0).unwrap_or(MODE - NAME);
    let name = std::str::from_utf8(&block[NAME..NAME + name_end])
      .map_err(|e| Error::Corruption(format!("Invalid UTF-8 in entry name: {}", e)))?;
    let id = parse_entry_id(name).ok_or_else(|| Error::Corruption(format!("Unexpected entry name: {}", name)))?;

    let size = parse_octal(&block[SIZE..MTIME]).ok_or_else(|| Error::Corruption("Unreadable size field".into()))?;
    let mtime = parse_octal(&block[MTIME..CHKSUM]).ok_or_else(|| Error::Corruption("Unreadable mtime field".into()))?;

    Ok(Self { id, size, mtime })
  }
}

fn put(block: &mut [u8], offset: usize, bytes: &[u8]) {
  block[offset..offset + bytes.len()].copy_from_slice(bytes);
}

/// Sums the unsigned bytes of a header block with the checksum field
/// counted as eight spaces.
pub fn header_checksum(block: &[u8]) -> u32 {
  block[..BLOCK_SIZE]
    .iter()
    .enumerate()
    .map(|(i, &b)| {
      if (CHKSUM..CHKSUM + CHKSUM_LEN).contains(&i) {
        b' ' as u32
      } else {
        b as u32
      }
    })
    .sum()
}

/// Zero bytes needed after a payload to reach the next block boundary.
pub fn padding_len(payload_len: usize) -> usize {
  (BLOCK_SIZE - payload_len % BLOCK_SIZE) % BLOCK_SIZE
}

/// Total on-disk length of an entry: header, payload and padding.
pub fn frame_len(payload_len: usize) -> u64 {
  (BLOCK_SIZE + payload_len + padding_len(payload_len)) as u64
}

/// Encodes a full frame stamped with the given modification time.
pub fn encode_frame(id: u64, payload: &[u8], mtime: u64) -> Result<Vec<u8>> {
  let header = EntryHeader {
    id,
    size: payload.len() as u64,
    mtime,
  }
  .encode()?;

  let mut frame = Vec::with_capacity(frame_len(payload.len()) as usize);
  frame.extend_from_slice(&header);
  frame.extend_from_slice(payload);
  frame.resize(frame.len() + padding_len(payload.len()), 0);
  Ok(frame)
}

/// Decodes the frame at the start of `buf`, returning its header and a
/// borrowed view of the payload.
pub fn decode_frame(buf: &[u8]) -> Result<(EntryHeader, &[u8])> {
  let header = EntryHeader::parse(buf)?;
  let start = BLOCK_SIZE;
  let end = start
    .checked_add(header.size as usize)
    .filter(|&end| end <= buf.len())
    .ok_or_else(|| Error::Corruption(format!("Entry {} payload is truncated", header.id)))?;
  Ok((header, &buf[start..end]))
}
