//! Input adapters for the decode path.

use crate::error::{Error, Result};
use std::io::{self, Read};

/// Reader that yields at most `limit` bytes.
///
/// Once the limit is reached it reports end of input even if the source
/// holds more, and remembers whether more was available so the caller can
/// tell a complete input from a truncated one.
#[derive(Debug)]
pub struct BoundedReader<R> {
    inner: R,
    limit: u64,
    remaining: u64,
    exceeded: bool,
}

impl<R: Read> BoundedReader<R> {
    /// Wraps `inner`, capping it at `limit` bytes.
    pub const fn new(inner: R, limit: u64) -> Self {
        Self {
            inner,
            limit,
            remaining: limit,
            exceeded: false,
        }
    }

    /// The configured cap.
    #[must_use]
    pub const fn limit(&self) -> u64 {
        self.limit
    }

    /// Returns true if the source had bytes beyond the cap.
    #[must_use]
    pub const fn limit_exceeded(&self) -> bool {
        self.exceeded
    }
}

impl<R: Read> Read for BoundedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        if self.remaining == 0 {
            if !self.exceeded {
                let mut extra = [0u8; 1];
                self.exceeded = loop {
                    match self.inner.read(&mut extra) {
                        Ok(n) => break n > 0,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => return Err(e),
                    }
                };
            }
            return Ok(0);
        }

        let max = usize::try_from(self.remaining).map_or(buf.len(), |r| r.min(buf.len()));
        let n = self.inner.read(&mut buf[..max])?;
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Reader that drops whitespace at the very start of a stream.
///
/// Any run of Unicode whitespace (space, tab, CR, LF, NEL, NBSP, ...) before
/// the first other character is discarded, however many underlying reads it
/// spans. Everything after that passes through untouched.
#[derive(Debug)]
pub struct TrimReader<R> {
    inner: R,
    trimming: bool,
    /// Bytes of a multi-byte character split across reads.
    carry: Vec<u8>,
}

impl<R: Read> TrimReader<R> {
    /// Wraps `inner`.
    pub const fn new(inner: R) -> Self {
        Self {
            inner,
            trimming: true,
            carry: Vec::new(),
        }
    }

    /// Returns the wrapped reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for TrimReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.trimming {
            if self.carry.is_empty() {
                return self.inner.read(buf);
            }
            let n = self.carry.len().min(buf.len());
            buf[..n].copy_from_slice(&self.carry[..n]);
            self.carry.drain(..n);
            return Ok(n);
        }

        loop {
            let mut chunk = std::mem::take(&mut self.carry);
            let start = chunk.len();
            chunk.resize(start + buf.len().max(4), 0);
            let n = self.inner.read(&mut chunk[start..])?;
            chunk.truncate(start + n);

            let at_eof = n == 0;
            let (skip, settled) = leading_whitespace(&chunk, at_eof);
            chunk.drain(..skip);

            if settled {
                self.trimming = false;
                self.carry = chunk;
                return self.read(buf);
            }
            if at_eof {
                return Ok(0);
            }
            self.carry = chunk;
        }
    }
}

/// Length of the whitespace prefix of `bytes`, and whether trimming is done.
///
/// Trimming is done once a non-whitespace character is found. A trailing
/// partial UTF-8 sequence is left for the next read unless `at_eof`.
fn leading_whitespace(bytes: &[u8], at_eof: bool) -> (usize, bool) {
    let mut pos = 0;
    while pos < bytes.len() {
        let width = utf8_width(bytes[pos]);
        if width == 0 {
            return (pos, true);
        }
        let Some(seq) = bytes.get(pos..pos + width) else {
            // Incomplete character at the end of what has been read so far.
            return (pos, at_eof);
        };
        match std::str::from_utf8(seq).ok().and_then(|s| s.chars().next()) {
            Some(c) if c.is_whitespace() => pos += width,
            _ => return (pos, true),
        }
    }
    (pos, false)
}

const fn utf8_width(first: u8) -> usize {
    match first {
        0x00..=0x7f => 1,
        0xc2..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xf4 => 4,
        _ => 0,
    }
}

/// Reads a whole message, capped at `limit` bytes, skipping leading whitespace.
///
/// # Errors
///
/// Returns [`Error::SizeLimitExceeded`] if the source holds more than
/// `limit` bytes, or the source's I/O error.
pub fn read_message<R: Read>(source: R, limit: u64) -> Result<Vec<u8>> {
    let mut trimmed = TrimReader::new(BoundedReader::new(source, limit));
    let mut data = Vec::new();
    trimmed.read_to_end(&mut data)?;

    let bounded = trimmed.into_inner();
    if bounded.limit_exceeded() {
        return Err(Error::SizeLimitExceeded {
            limit: bounded.limit(),
        });
    }
    Ok(data)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    /// Yields its data a few bytes per read.
    struct Trickle<'a> {
        data: &'a [u8],
        step: usize,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.data.len().min(buf.len()).min(self.step);
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    #[test]
    fn test_bounded_reader_stops_at_limit() {
        let mut reader = BoundedReader::new(&b"0123456789"[..], 4);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"0123");
        assert!(reader.limit_exceeded());
    }

    #[test]
    fn test_bounded_reader_exact_fit() {
        let mut reader = BoundedReader::new(&b"0123"[..], 4);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"0123");
        assert!(!reader.limit_exceeded());
    }

    #[test]
    fn test_trim_reader_strips_leading_whitespace() {
        let mut reader = TrimReader::new(&b"\r\n \t\r\nFrom: a\r\n  indented"[..]);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"From: a\r\n  indented");
    }

    #[test]
    fn test_trim_reader_across_small_reads() {
        let data = "\n\n\u{a0}\u{2003} \r\nSubject: x\n\n body ";
        let mut reader = TrimReader::new(Trickle {
            data: data.as_bytes(),
            step: 1,
        });
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"Subject: x\n\n body ");
    }

    #[test]
    fn test_trim_reader_only_whitespace() {
        let mut reader = TrimReader::new(&b" \r\n\t"[..]);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_trim_reader_small_buffer() {
        let mut reader = TrimReader::new(&b"   abcdef"[..]);
        let mut buf = [0u8; 2];
        let mut out = Vec::new();
        loop {
            let n = reader.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, b"abcdef");
    }

    #[test]
    fn test_read_message_limits() {
        let data = b"\r\nSubject: hi\r\n\r\nbody";
        assert_eq!(read_message(&data[..], 1024).unwrap(), &data[2..]);

        let err = read_message(&data[..], 8).unwrap_err();
        assert!(matches!(err, Error::SizeLimitExceeded { limit: 8 }));
    }
}
