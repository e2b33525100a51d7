//! Line-length enforcement for encoders that do not wrap their own output.

use crate::error::{ClosedWriter, Error, Result};
use std::io::{self, Write};

/// Maximum line length per RFC 2045, excluding the CRLF.
pub const MAX_LINE_LENGTH: usize = 76;

const CRLF: &[u8] = b"\r\n";

/// Pass-through writer that breaks its output into 76-byte CRLF lines.
///
/// The column position is carried across `write` calls, so callers may
/// write in bursts of any size. A CRLF is emitted immediately after every
/// 76th byte. [`close`](Self::close) writes one final CRLF, even when the
/// current line is empty, after which every write and close fails with
/// [`Error::WriterClosed`].
#[derive(Debug)]
pub struct ChunkedLineWriter<W: Write> {
    inner: W,
    column: usize,
    closed: bool,
}

impl<W: Write> ChunkedLineWriter<W> {
    /// Creates a chunk writer over `inner`, starting at column zero.
    pub const fn new(inner: W) -> Self {
        Self {
            inner,
            column: 0,
            closed: false,
        }
    }

    /// Returns the inner writer.
    ///
    /// Bytes written directly to it bypass the column count.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Current column, i.e. bytes written since the last inserted break.
    #[must_use]
    pub const fn column(&self) -> usize {
        self.column
    }

    /// Returns true once [`close`](Self::close) has been called.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Writes the terminating CRLF and closes the writer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WriterClosed`] if already closed, or the inner
    /// writer's error.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::WriterClosed);
        }
        self.closed = true;
        self.inner.write_all(CRLF)?;
        Ok(())
    }
}

impl<W: Write> Write for ChunkedLineWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(ClosedWriter::into_io());
        }

        let mut written = 0;
        let mut rest = buf;
        while !rest.is_empty() {
            let room = MAX_LINE_LENGTH - self.column;
            let take = room.min(rest.len());

            let n = self.inner.write(&rest[..take])?;
            if n == 0 {
                return if written == 0 {
                    Err(io::ErrorKind::WriteZero.into())
                } else {
                    Ok(written)
                };
            }
            written += n;
            self.column += n;
            rest = &rest[n..];

            if self.column == MAX_LINE_LENGTH {
                self.inner.write_all(CRLF)?;
                self.column = 0;
            }
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
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
    use crate::encoding::{Base64, BodyCodec};
    use proptest::prelude::*;

    #[test]
    fn test_base64_through_chunk_writer() {
        let file = concat!(
            "I'm a file long enough to force the function to wrap a\n",
            "couple of lines, but I stop short of the end of one line and\n",
            "have some padding dangling at the end."
        );
        let encoded = concat!(
            "SSdtIGEgZmlsZSBsb25nIGVub3VnaCB0byBmb3JjZSB0aGUgZnVuY3Rpb24gdG8gd3JhcCBhCmNv\r\n",
            "dXBsZSBvZiBsaW5lcywgYnV0IEkgc3RvcCBzaG9ydCBvZiB0aGUgZW5kIG9mIG9uZSBsaW5lIGFu\r\n",
            "ZApoYXZlIHNvbWUgcGFkZGluZyBkYW5nbGluZyBhdCB0aGUgZW5kLg==\r\n",
        );

        let mut chunks = ChunkedLineWriter::new(Vec::new());
        Base64.encode(&mut file.as_bytes(), &mut chunks).unwrap();
        chunks.close().unwrap();

        assert_eq!(String::from_utf8(chunks.inner).unwrap(), encoded);
    }

    #[test]
    fn test_break_right_after_76th_byte() {
        let mut chunks = ChunkedLineWriter::new(Vec::new());
        chunks.write_all(&[b'a'; 76]).unwrap();
        assert_eq!(chunks.column(), 0);
        chunks.write_all(b"b").unwrap();
        chunks.close().unwrap();

        let mut expected = vec![b'a'; 76];
        expected.extend_from_slice(b"\r\nb\r\n");
        assert_eq!(chunks.inner, expected);
    }

    #[test]
    fn test_close_on_empty_line_still_terminates() {
        let mut chunks = ChunkedLineWriter::new(Vec::new());
        chunks.close().unwrap();
        assert_eq!(chunks.inner, b"\r\n");
    }

    #[test]
    fn test_closed_writer_rejects_reuse() {
        let mut chunks = ChunkedLineWriter::new(Vec::new());
        chunks.write_all(b"abc").unwrap();
        chunks.close().unwrap();
        assert!(chunks.is_closed());

        let err: Error = chunks.write(b"more").unwrap_err().into();
        assert!(matches!(err, Error::WriterClosed));
        assert!(matches!(chunks.close(), Err(Error::WriterClosed)));
        assert_eq!(chunks.inner, b"abc\r\n");
    }

    proptest! {
        #[test]
        fn prop_lines_fit_and_content_survives(
            data in prop::collection::vec(
                any::<u8>().prop_filter("no line breaks", |b| *b != b'\r' && *b != b'\n'),
                0..4096,
            ),
            bursts in prop::collection::vec(1usize..200, 1..32),
        ) {
            let mut chunks = ChunkedLineWriter::new(Vec::new());
            let mut rest = data.as_slice();
            let mut i = 0;
            while !rest.is_empty() {
                let n = bursts[i % bursts.len()].min(rest.len());
                chunks.write_all(&rest[..n]).unwrap();
                rest = &rest[n..];
                i += 1;
            }
            chunks.close().unwrap();
            let out = chunks.inner;

            prop_assert!(out.ends_with(b"\r\n"));
            let body = &out[..out.len() - 2];
            let lines: Vec<&[u8]> = body.split(|&b| b == b'\n').collect();
            for line in &lines {
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                prop_assert!(line.len() <= MAX_LINE_LENGTH);
            }
            let joined: Vec<u8> = body
                .iter()
                .copied()
                .filter(|b| *b != b'\r' && *b != b'\n')
                .collect();
            prop_assert_eq!(joined, data);
        }
    }

    #[test]
    fn test_large_input_round_trips() {
        let data: Vec<u8> = (0..300_000u32).map(|i| b'A' + (i % 26) as u8).collect();
        let mut chunks = ChunkedLineWriter::new(Vec::new());
        for piece in data.chunks(4093) {
            chunks.write_all(piece).unwrap();
        }
        chunks.close().unwrap();

        let stripped: Vec<u8> = chunks
            .inner
            .split(|&b| b == b'\n')
            .flat_map(|line| line.strip_suffix(b"\r").unwrap_or(line).to_vec())
            .collect();
        assert_eq!(stripped, data);
    }
}
