//! HTTP Range header parsing and resolution against a file length.
//!
//! Only single `bytes` ranges are served. Parsing happens before any handle
//! is acquired; resolution needs the file length and happens after.

use super::StreamingError;

/// Syntactically valid single byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSpec {
    /// `bytes=a-b`
    Bounded { start: u64, end: u64 },
    /// `bytes=a-`, through the end of the file
    From { start: u64 },
    /// `bytes=-n`, the final `n` bytes
    Suffix { length: u64 },
}

/// Inclusive byte window inside a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeWindow {
    pub start: u64,
    pub end: u64,
}

impl RangeWindow {
    /// Number of bytes covered, never zero.
    pub fn byte_count(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` header value for a file of `file_length` bytes.
    pub fn content_range(&self, file_length: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, file_length)
    }
}

/// Parses a `Range` header value.
///
/// # Errors
/// - `StreamingError::RangeMalformed` - Not a single `bytes` range
///
/// # Examples
/// ```
/// use streamify_core::streaming::{RangeSpec, parse_range_header};
///
/// let spec = parse_range_header("bytes=200-499").unwrap();
/// assert_eq!(spec, RangeSpec::Bounded { start: 200, end: 499 });
/// assert!(parse_range_header("bytes=0-1,5-9").is_err());
/// ```
pub fn parse_range_header(value: &str) -> Result<RangeSpec, StreamingError> {
    let malformed = || StreamingError::RangeMalformed {
        header: value.to_string(),
    };

    let (unit, set) = value.trim().split_once('=').ok_or_else(malformed)?;
    if !unit.trim().eq_ignore_ascii_case("bytes") || set.contains(',') {
        return Err(malformed());
    }

    let (first, last) = set.trim().split_once('-').ok_or_else(malformed)?;
    let (first, last) = (first.trim(), last.trim());

    match (first.is_empty(), last.is_empty()) {
        (true, true) => Err(malformed()),
        (true, false) => Ok(RangeSpec::Suffix {
            length: parse_position(last).ok_or_else(malformed)?,
        }),
        (false, true) => Ok(RangeSpec::From {
            start: parse_position(first).ok_or_else(malformed)?,
        }),
        (false, false) => Ok(RangeSpec::Bounded {
            start: parse_position(first).ok_or_else(malformed)?,
            end: parse_position(last).ok_or_else(malformed)?,
        }),
    }
}

fn parse_position(digits: &str) -> Option<u64> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

impl RangeSpec {
    /// Resolves the range against a file, clamping an end past the file.
    ///
    /// # Errors
    /// - `StreamingError::RangeInvalid` - Start past the end, `a > b`, `-0`, or empty file
    pub fn resolve(&self, file_length: u64) -> Result<RangeWindow, StreamingError> {
        let invalid = StreamingError::RangeInvalid { file_length };
        if file_length == 0 {
            return Err(invalid);
        }
        let last_byte = file_length - 1;

        match *self {
            RangeSpec::Bounded { start, end } => {
                if start > end || start > last_byte {
                    return Err(invalid);
                }
                Ok(RangeWindow {
                    start,
                    end: end.min(last_byte),
                })
            }
            RangeSpec::From { start } => {
                if start > last_byte {
                    return Err(invalid);
                }
                Ok(RangeWindow {
                    start,
                    end: last_byte,
                })
            }
            RangeSpec::Suffix { length } => {
                if length == 0 {
                    return Err(invalid);
                }
                Ok(RangeWindow {
                    start: file_length.saturating_sub(length),
                    end: last_byte,
                })
            }
        }
    }
}
