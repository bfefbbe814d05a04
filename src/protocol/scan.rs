//! Byte-level scanning helpers
//!
//! Change payloads look like JSON but are not guaranteed to be well formed
//! outside the spans the relay cares about, so they are never handed to a
//! structured parser. Instead the relay searches for literal markers and
//! matches delimiters by counting nesting depth. All markers are ASCII, so
//! offsets found here are always valid split points for UTF-8 text.
//!
//! Quotes and escapes are not tracked: a `{` inside a string value counts
//! as an opener. Clients must not send unbalanced delimiters inside the
//! spans that get matched.

use crate::error::ProtocolError;

/// Find `needle` in `haystack` at or after `from`
pub fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| pos + from)
}

/// Find a single byte at or after `from`
pub fn find_byte(haystack: &[u8], byte: u8, from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .iter()
        .position(|&b| b == byte)
        .map(|pos| pos + from)
}

/// Find the closer matching the opener at `open_at`
///
/// Depth starts at one just inside the opener; every further `open` adds
/// one and every `close` subtracts one. The index where depth reaches zero
/// is returned.
pub fn matching_close(
    buf: &[u8],
    open_at: usize,
    open: u8,
    close: u8,
) -> Result<usize, ProtocolError> {
    let mut depth = 1usize;
    for (i, &b) in buf.iter().enumerate().skip(open_at + 1) {
        if b == open {
            depth += 1;
        } else if b == close {
            depth -= 1;
            if depth == 0 {
                return Ok(i);
            }
        }
    }

    Err(ProtocolError::UnbalancedDelimiter {
        open: open as char,
        at: open_at,
    })
}
