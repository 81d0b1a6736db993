use std::time::{SystemTime, UNIX_EPOCH};

/// Generates the archive member name for an entry.
/// Format: 0000000000000042.entry (16 digits)
pub fn entry_filename(id: u64) -> String {
  format!("{:016}.entry", id)
}

/// Parses an entry id from an archive member name.
pub fn parse_entry_id(filename: &str) -> Option<u64> {
  filename.strip_suffix(".entry")?.parse::<u64>().ok()
}

/// Renders `value` as zero-padded octal of exactly `digits` digits.
/// Returns None if the value does not fit.
pub fn format_octal(value: u64, digits: usize) -> Option<String> {
  let rendered = format!("{:0width$o}", value, width = digits);
  if rendered.len() > digits {
    return None;
  }
  Some(rendered)
}

/// Parses a NUL/space terminated octal header field.
pub fn parse_octal(field: &[u8]) -> Option<u64> {
  let end = field
    .iter()
    .position(|&b| b == 0 || b == b' ')
    .unwrap_or(field.len());
  let digits = std::str::from_utf8(&field[..end]).ok()?.trim_start();
  if digits.is_empty() {
    return None;
  }
  u64::from_str_radix(digits, 8).ok()
}

/// Rounds `offset` up to the next multiple of `block`.
pub fn align_up(offset: u64, block: u64) -> u64 {
  offset.div_ceil(block) * block
}

/// Wall-clock seconds since the Unix epoch, clamped to zero for clocks set
/// before 1970.
pub fn unix_now() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or(0)
}
