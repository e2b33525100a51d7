//! Quoted-Printable transfer encoding (RFC 2045 section 6.7).

use super::BodyCodec;
use crate::error::{Error, Result};
use std::io::{self, Read, Write};

/// Maximum encoded line length, including the soft break `=`.
const MAX_LINE_LENGTH: usize = 76;

const UPPER_HEX: &[u8; 16] = b"0123456789ABCDEF";

/// Quoted-printable [`BodyCodec`].
#[derive(Debug, Clone, Copy, Default)]
pub struct QuotedPrintable;

impl BodyCodec for QuotedPrintable {
    fn encode(&self, source: &mut dyn Read, sink: &mut dyn Write) -> io::Result<u64> {
        let mut writer = QuotedPrintableWriter::new(sink);
        let copied = io::copy(source, &mut writer)?;
        writer.finish()?;
        Ok(copied)
    }

    fn decode(&self, body: &[u8]) -> Result<Vec<u8>> {
        decode(body)
    }
}

/// Streaming quoted-printable encoder for text bodies.
///
/// Line breaks in the input (`\n` or `\r\n`) become CRLF. Encoded lines
/// never exceed 76 characters; longer lines are split with a soft break.
/// A space or tab right before a line break is hex-escaped so it survives
/// transports that strip trailing whitespace. Call [`finish`] to flush the
/// last line; no line break is added after it.
///
/// [`finish`]: QuotedPrintableWriter::finish
#[derive(Debug)]
pub struct QuotedPrintableWriter<W: Write> {
    inner: W,
    line: [u8; MAX_LINE_LENGTH + 2],
    len: usize,
    after_cr: bool,
}

impl<W: Write> QuotedPrintableWriter<W> {
    /// Creates an encoder writing to `inner`.
    pub const fn new(inner: W) -> Self {
        Self {
            inner,
            line: [0; MAX_LINE_LENGTH + 2],
            len: 0,
            after_cr: false,
        }
    }

    /// Flushes the pending line and returns the inner writer.
    ///
    /// # Errors
    ///
    /// Returns any error from the inner writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.escape_trailing_whitespace()?;
        self.flush_line()?;
        Ok(self.inner)
    }

    fn push_literal(&mut self, byte: u8) -> io::Result<()> {
        if byte == b'\r' || byte == b'\n' {
            if self.after_cr && byte == b'\n' {
                self.after_cr = false;
                return Ok(());
            }
            self.after_cr = byte == b'\r';
            self.escape_trailing_whitespace()?;
            return self.hard_break();
        }

        if self.len == MAX_LINE_LENGTH - 1 {
            self.soft_break()?;
        }
        self.line[self.len] = byte;
        self.len += 1;
        self.after_cr = false;
        Ok(())
    }

    fn push_escaped(&mut self, byte: u8) -> io::Result<()> {
        if MAX_LINE_LENGTH - 1 - self.len < 3 {
            self.soft_break()?;
        }
        self.line[self.len] = b'=';
        self.line[self.len + 1] = UPPER_HEX[usize::from(byte >> 4)];
        self.line[self.len + 2] = UPPER_HEX[usize::from(byte & 0x0f)];
        self.len += 3;
        Ok(())
    }

    fn escape_trailing_whitespace(&mut self) -> io::Result<()> {
        if self.len == 0 {
            return Ok(());
        }
        let last = self.line[self.len - 1];
        if is_whitespace(last) {
            self.len -= 1;
            self.push_escaped(last)?;
        }
        Ok(())
    }

    fn soft_break(&mut self) -> io::Result<()> {
        self.line[self.len] = b'=';
        self.len += 1;
        self.hard_break()
    }

    fn hard_break(&mut self) -> io::Result<()> {
        self.line[self.len] = b'\r';
        self.line[self.len + 1] = b'\n';
        self.len += 2;
        self.flush_line()
    }

    fn flush_line(&mut self) -> io::Result<()> {
        self.inner.write_all(&self.line[..self.len])?;
        self.len = 0;
        Ok(())
    }
}

impl<W: Write> Write for QuotedPrintableWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for &byte in buf {
            if is_literal(byte) || is_whitespace(byte) || byte == b'\r' || byte == b'\n' {
                self.push_literal(byte)?;
            } else {
                self.push_escaped(byte)?;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

const fn is_literal(byte: u8) -> bool {
    byte >= b'!' && byte <= b'~' && byte != b'='
}

const fn is_whitespace(byte: u8) -> bool {
    byte == b' ' || byte == b'\t'
}

/// Encodes text using quoted-printable encoding.
#[must_use]
pub fn encode(data: &[u8]) -> Vec<u8> {
    let mut writer = QuotedPrintableWriter::new(Vec::with_capacity(data.len()));
    // Writes into a Vec cannot fail.
    let _ = writer.write_all(data);
    writer.finish().unwrap_or_default()
}

/// Decodes a quoted-printable body.
///
/// Soft line breaks are removed, whitespace at the end of each line is
/// dropped and hard line breaks are kept as they appear. Lower-case hex
/// digits and unescaped bytes above 0x7F are accepted.
///
/// # Errors
///
/// Returns an error for a malformed escape followed by two or more
/// characters, or for an unescaped control character.
pub fn decode(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len());

    for raw in data.split_inclusive(|&b| b == b'\n') {
        let has_lf = raw.ends_with(b"\n");
        let has_crlf = raw.ends_with(b"\r\n");
        let mut line = trim_end_whitespace(raw);
        let mut soft = false;

        if let Some(stripped) = line.strip_suffix(b"=") {
            line = stripped;
            soft = true;
        }

        decode_line(line, &mut out)?;

        if !soft && has_lf {
            if has_crlf {
                out.extend_from_slice(b"\r\n");
            } else {
                out.push(b'\n');
            }
        }
    }

    Ok(out)
}

fn decode_line(line: &[u8], out: &mut Vec<u8>) -> Result<()> {
    let mut i = 0;
    while i < line.len() {
        let byte = line[i];
        match byte {
            b'=' => {
                let hi = line.get(i + 1).copied().and_then(hex_value);
                let lo = line.get(i + 2).copied().and_then(hex_value);
                if let (Some(hi), Some(lo)) = (hi, lo) {
                    out.push(hi << 4 | lo);
                    i += 3;
                    continue;
                }
                let rest = &line[i + 1..];
                if rest.len() >= 2 && rest[0] != b'\r' && rest[0] != b'\n' {
                    return Err(Error::InvalidEncoding(format!(
                        "invalid escape sequence: {:?}",
                        String::from_utf8_lossy(&rest[..2])
                    )));
                }
                out.push(b'=');
            }
            b'\t' | b'\r' | b'\n' | b' '..=b'~' | 0x80..=0xff => out.push(byte),
            _ => {
                return Err(Error::InvalidEncoding(format!(
                    "invalid unescaped byte 0x{byte:02x}"
                )));
            }
        }
        i += 1;
    }
    Ok(())
}

const fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        _ => None,
    }
}

fn trim_end_whitespace(line: &[u8]) -> &[u8] {
    let end = line
        .iter()
        .rposition(|&b| !matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
        .map_or(0, |idx| idx + 1);
    &line[..end]
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
    use proptest::prelude::*;

    #[test]
    fn test_quoted_printable_encode() {
        assert_eq!(encode(b"Hello, World!"), b"Hello, World!");

        let encoded = encode("Héllo, Wørld!".as_bytes());
        assert_eq!(encoded, b"H=C3=A9llo, W=C3=B8rld!");
    }

    #[test]
    fn test_encode_wraps_and_normalizes_line_breaks() {
        let text = concat!(
            "Dear reader!\n\n",
            "This is a test email to try and capture some of the corner cases that exist within\n",
            "the quoted-printable encoding.\n",
            "There are some wacky parts like =, and this input assumes UNIX line breaks so\r\n",
            "it can come out a little weird.  Also, we need to support unicode ",
            "so here's a fish: \u{1F41F}\n",
        );
        let expected = concat!(
            "Dear reader!\r\n\r\n",
            "This is a test email to try and capture some of the corner cases that exist=\r\n",
            " within\r\n",
            "the quoted-printable encoding.\r\n",
            "There are some wacky parts like =3D, and this input assumes UNIX line break=\r\n",
            "s so\r\n",
            "it can come out a little weird.  Also, we need to support unicode so here's=\r\n",
            " a fish: =F0=9F=90=9F\r\n",
        );
        assert_eq!(String::from_utf8(encode(text.as_bytes())).unwrap(), expected);
    }

    #[test]
    fn test_encode_trailing_whitespace() {
        assert_eq!(encode(b"end \nnext\t"), b"end=20\r\nnext=09");
    }

    #[test]
    fn test_encode_no_trailing_break_added() {
        assert_eq!(encode(b"hi\n"), b"hi\r\n");
        assert_eq!(encode(b"hi"), b"hi");
    }

    #[test]
    fn test_quoted_printable_decode() {
        assert_eq!(decode(b"Hello, World!").unwrap(), b"Hello, World!");
        assert_eq!(decode(b"H=C3=A9llo").unwrap(), "Héllo".as_bytes());
        assert_eq!(decode(b"lower =c3=a9").unwrap(), "lower é".as_bytes());
    }

    #[test]
    fn test_quoted_printable_soft_line_break() {
        assert_eq!(decode(b"Hello=\r\nWorld").unwrap(), b"HelloWorld");
        assert_eq!(decode(b"Hello=  \nWorld").unwrap(), b"HelloWorld");
        assert_eq!(decode(b"trailing=").unwrap(), b"trailing");
    }

    #[test]
    fn test_decode_keeps_hard_breaks_and_drops_trailing_space() {
        assert_eq!(decode(b"a  \r\nb\t\nc").unwrap(), b"a\r\nb\nc");
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(decode(b"bad =ZZ escape"), Err(Error::InvalidEncoding(_))));
        assert!(matches!(decode(b"ctl \x01 byte"), Err(Error::InvalidEncoding(_))));
        assert_eq!(decode(b"lone =").unwrap(), b"lone ");
        assert_eq!(decode(b"x=4").unwrap(), b"x=4");
    }

    #[test]
    fn test_decode_reference_text() {
        let encoded = concat!(
            "Dear reader!\r\n\r\n",
            "This is a test email to try and capture some of the corner cases that exist=\r\n",
            " within\r\n",
            "the quoted-printable encoding.\r\n",
            "There are some wacky parts like =3D, and this input assumes UNIX line break=\r\n",
            "s so\r\n",
            "it can come out a little weird.  Also, we need to support unicode so here's=\r\n",
            " a fish: =F0=9F=90=9F\r\n",
        );
        let expected = concat!(
            "Dear reader!\r\n\r\n",
            "This is a test email to try and capture some of the corner cases ",
            "that exist within\r\n",
            "the quoted-printable encoding.\r\n",
            "There are some wacky parts like =, and this input assumes UNIX line breaks so\r\n",
            "it can come out a little weird.  Also, we need to support unicode ",
            "so here's a fish: \u{1F41F}\r\n",
        );
        assert_eq!(decode(encoded.as_bytes()).unwrap(), expected.as_bytes());
    }

    proptest! {
        #[test]
        fn prop_encoded_lines_fit(text in "\\PC{0,400}") {
            let encoded = encode(text.as_bytes());
            for line in encoded.split(|&b| b == b'\n') {
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                prop_assert!(line.len() <= MAX_LINE_LENGTH);
            }
        }

        #[test]
        fn prop_round_trip_crlf_text(lines in prop::collection::vec("\\PC{0,120}", 0..8)) {
            let text = lines.join("\r\n");
            let encoded = encode(text.as_bytes());
            prop_assert_eq!(decode(&encoded).unwrap(), text.as_bytes());
        }
    }
}
